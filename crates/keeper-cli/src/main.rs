mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, secret::SecretSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "keeper",
    about = "Publish apps to stable deployment addresses",
    version,
    propagate_version = true
)]
struct Cli {
    /// Workspace root (default: auto-detect from .keeper/ or .git/)
    #[arg(long, global = true, env = "KEEPER_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .keeper/config.yaml and ignore the bindings file in git
    Init,

    /// Validate, push, resolve every channel, clean up, and propagate
    Publish {
        /// Push sources and propagate existing bindings only
        #[arg(long)]
        push_only: bool,

        /// Never create new deployments; unresolvable channels are degraded
        #[arg(long)]
        no_create: bool,

        /// Open each resolved address in the browser
        #[arg(long)]
        open: bool,
    },

    /// Run the source gate for every project without touching the platform
    Validate,

    /// Show channel bindings and their addresses
    Status,

    /// Bind a channel to a deployment id by hand
    Bind { tag: String, id: String },

    /// Forget a channel's binding
    Unbind { tag: String },

    /// Manage secrets used by propagations
    Secret {
        #[command(subcommand)]
        subcommand: SecretSubcommand,
    },

    /// Inspect the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Publish { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Publish {
            push_only,
            no_create,
            open,
        } => cmd::publish::run(
            &root,
            cmd::publish::Flags {
                push_only,
                no_create,
                open,
            },
            cli.json,
        ),
        Commands::Validate => cmd::validate::run(&root, cli.json),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Bind { tag, id } => cmd::bind::bind(&root, &tag, &id, cli.json),
        Commands::Unbind { tag } => cmd::bind::unbind(&root, &tag, cli.json),
        Commands::Secret { subcommand } => cmd::secret::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
