//! [`Platform`] implementation backed by the `clasp` CLI.
//!
//! Each call runs one `clasp` subcommand in the project root with an argument
//! vector (no shell). Output is captured from both streams and classified:
//! anything mentioning the versioned-deployment cap becomes
//! [`PlatformError::QuotaExceeded`] regardless of exit status, because clasp
//! does not reliably exit non-zero on API errors.

use super::parse;
use super::{DeploymentEntry, Platform, PlatformError, PlatformResult};
use crate::config::PlatformSettings;
use crate::paths;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Captured output is capped to this many bytes (keeping the tail).
const MAX_OUTPUT: usize = 10 * 1024;

#[derive(Debug, Clone)]
pub struct ClaspPlatform {
    root: PathBuf,
    program: Vec<String>,
    timeout: Option<Duration>,
}

impl ClaspPlatform {
    pub fn new(root: &Path, settings: &PlatformSettings) -> Self {
        let timeout = match settings.timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            root: root.to_path_buf(),
            program: resolve_program(root, settings.command.as_deref()),
            timeout,
        }
    }

    fn run(&self, cwd: &Path, args: &[&str]) -> PlatformResult<String> {
        let shown = format!("{} {}", self.program.join(" "), args.join(" "));
        let mut cmd = Command::new(&self.program[0]);
        cmd.args(&self.program[1..]).args(args).current_dir(cwd);

        tracing::debug!(command = %shown, cwd = %cwd.display(), "running clasp");
        let (success, output) = match execute(cmd, self.timeout) {
            Exec::Finished { success, output } => (success, output),
            Exec::TimedOut => {
                return Err(PlatformError::Timeout {
                    command: shown,
                    seconds: self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
                })
            }
            Exec::SpawnFailed(reason) => {
                return Err(PlatformError::Spawn {
                    command: shown,
                    reason,
                })
            }
        };

        if parse::is_quota_message(&output) {
            return Err(PlatformError::QuotaExceeded(output));
        }
        if !success {
            return Err(PlatformError::CommandFailed {
                command: shown,
                output,
            });
        }
        Ok(output)
    }
}

impl Platform for ClaspPlatform {
    fn push(&self, root: &Path) -> PlatformResult<()> {
        self.run(root, &["push", "--force"]).map(|_| ())
    }

    fn create(&self, description: &str) -> PlatformResult<String> {
        let output = self.run(&self.root, &["deploy", "--description", description])?;
        parse::parse_deployment_id(&output).ok_or(PlatformError::UnparsableOutput(output))
    }

    fn update(&self, id: &str, description: &str) -> PlatformResult<()> {
        self.run(
            &self.root,
            &["deploy", "--deploymentId", id, "--description", description],
        )
        .map(|_| ())
    }

    fn list(&self) -> PlatformResult<Vec<DeploymentEntry>> {
        let output = self.run(&self.root, &["deployments"])?;
        Ok(parse::parse_listing(&output))
    }

    fn delete(&self, id: &str) -> PlatformResult<()> {
        self.run(&self.root, &["undeploy", id]).map(|_| ())
    }

    fn version_count(&self) -> PlatformResult<u32> {
        let output = self.run(&self.root, &["versions"])?;
        parse::parse_version_count(&output).ok_or(PlatformError::UnparsableOutput(output))
    }

    fn console_url(&self) -> Option<String> {
        script_id(&self.root)
            .map(|id| format!("https://script.google.com/home/projects/{id}/edit"))
    }
}

// ---------------------------------------------------------------------------
// Program resolution
// ---------------------------------------------------------------------------

fn clasp_bin_name() -> &'static str {
    if cfg!(windows) {
        "clasp.cmd"
    } else {
        "clasp"
    }
}

/// Resolve how to invoke clasp.
///
/// Priority:
/// 1. Configured `platform.command` (split on whitespace)
/// 2. `node_modules/.bin/clasp` in the project root or any ancestor
/// 3. `clasp` on `PATH`
/// 4. `npx clasp`
pub fn resolve_program(root: &Path, configured: Option<&str>) -> Vec<String> {
    if let Some(cmd) = configured {
        let parts: Vec<String> = cmd.split_whitespace().map(str::to_string).collect();
        if !parts.is_empty() {
            return parts;
        }
    }
    for dir in root.ancestors() {
        let local = dir.join("node_modules").join(".bin").join(clasp_bin_name());
        if local.is_file() {
            return vec![local.to_string_lossy().into_owned()];
        }
    }
    if let Ok(global) = which::which("clasp") {
        return vec![global.to_string_lossy().into_owned()];
    }
    vec!["npx".to_string(), "clasp".to_string()]
}

/// `scriptId` from the project's `.clasp.json`.
fn script_id(root: &Path) -> Option<String> {
    let data = std::fs::read_to_string(root.join(paths::CLASP_JSON)).ok()?;
    let value: serde_json::Value = serde_json::from_str(&data).ok()?;
    value
        .get("scriptId")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Subprocess execution
// ---------------------------------------------------------------------------

enum Exec {
    Finished { success: bool, output: String },
    TimedOut,
    SpawnFailed(String),
}

/// Run a command to completion with an optional timeout.
///
/// Stdout and stderr are drained on dedicated threads so a chatty child
/// cannot fill a pipe and stall. The wait happens on a third thread; on
/// timeout the child is killed by pid and the readers see EOF.
fn execute(mut cmd: Command, timeout: Option<Duration>) -> Exec {
    let mut child = match cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => return Exec::SpawnFailed(e.to_string()),
    };

    let child_pid = child.id();
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || read_all(stdout_handle));
    let stderr_thread = std::thread::spawn(move || read_all(stderr_handle));

    let wait_result = match timeout {
        None => child.wait(),
        Some(timeout_dur) => {
            let (tx, rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let _ = tx.send(child.wait());
            });
            match rx.recv_timeout(timeout_dur) {
                Ok(result) => result,
                Err(_) => {
                    kill_process(child_pid);
                    return Exec::TimedOut;
                }
            }
        }
    };

    let stdout_buf = stdout_thread.join().unwrap_or_default();
    let stderr_buf = stderr_thread.join().unwrap_or_default();

    match wait_result {
        Ok(status) => Exec::Finished {
            success: status.success(),
            output: combine_output(&stdout_buf, &stderr_buf),
        },
        Err(e) => Exec::SpawnFailed(format!("wait failed: {e}")),
    }
}

fn read_all<R: std::io::Read>(handle: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut r) = handle {
        let _ = r.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Combine stdout/stderr and cap the result, keeping the tail.
fn combine_output(stdout: &str, stderr: &str) -> String {
    let output = if stderr.is_empty() {
        stdout.to_string()
    } else if stdout.is_empty() {
        stderr.to_string()
    } else {
        format!("{stdout}\n{stderr}")
    };
    let trimmed = output.trim();
    if trimmed.len() <= MAX_OUTPUT {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - MAX_OUTPUT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

/// Terminate a process by pid. Best-effort; errors are ignored.
fn kill_process(pid: u32) {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("taskkill");
        c.args(["/F", "/PID", &pid.to_string()]);
        c
    } else {
        let mut c = Command::new("kill");
        c.args(["-9", &pid.to_string()]);
        c
    };
    let _ = cmd.stdout(Stdio::null()).stderr(Stdio::null()).status();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(command: &str, timeout_seconds: u64) -> PlatformSettings {
        PlatformSettings {
            command: Some(command.to_string()),
            timeout_seconds,
            ..PlatformSettings::default()
        }
    }

    #[test]
    fn configured_command_wins() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            resolve_program(dir.path(), Some("npx  clasp")),
            vec!["npx", "clasp"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn local_node_modules_bin_is_found_from_subproject() {
        let dir = TempDir::new().unwrap();
        let bin_dir = dir.path().join("node_modules/.bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        std::fs::write(bin_dir.join("clasp"), "#!/bin/sh\n").unwrap();
        let sub = dir.path().join("checklist-app");
        std::fs::create_dir_all(&sub).unwrap();

        let program = resolve_program(&sub, None);
        assert_eq!(program, vec![bin_dir.join("clasp").to_string_lossy().into_owned()]);
    }

    #[test]
    fn console_url_from_clasp_json() {
        let dir = TempDir::new().unwrap();
        let platform = ClaspPlatform::new(dir.path(), &settings("clasp", 5));
        assert_eq!(platform.console_url(), None);
        std::fs::write(
            dir.path().join(".clasp.json"),
            r#"{"scriptId":"1abcSCRIPT","rootDir":"."}"#,
        )
        .unwrap();
        assert_eq!(
            platform.console_url().as_deref(),
            Some("https://script.google.com/home/projects/1abcSCRIPT/edit")
        );
    }

    #[test]
    fn output_is_capped_to_tail() {
        let long = "x".repeat(MAX_OUTPUT + 100) + "END";
        let out = combine_output(&long, "");
        assert_eq!(out.len(), MAX_OUTPUT);
        assert!(out.ends_with("END"));
        assert_eq!(combine_output("out", "err"), "out\nerr");
    }

    #[cfg(unix)]
    #[test]
    fn quota_message_is_classified_even_on_success() {
        let dir = TempDir::new().unwrap();
        let platform = ClaspPlatform::new(
            dir.path(),
            &settings("echo Scripts may only have up to 20 versioned deployments", 5),
        );
        let err = platform.update("AKfycbSomething", "owner").unwrap_err();
        assert!(err.is_quota(), "got {err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_reports_output() {
        let dir = TempDir::new().unwrap();
        let platform = ClaspPlatform::new(dir.path(), &settings("false", 5));
        let err = platform.delete("AKfycbSomething").unwrap_err();
        assert!(matches!(err, PlatformError::CommandFailed { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn errors_name_the_full_command_line() {
        let dir = TempDir::new().unwrap();
        let platform = ClaspPlatform::new(dir.path(), &settings("false", 5));
        match platform.delete("AKfycbSomething") {
            Err(PlatformError::CommandFailed { command, .. }) => {
                assert_eq!(command, "false undeploy AKfycbSomething");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn missing_binary_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let platform = ClaspPlatform::new(
            dir.path(),
            &settings("definitely-not-a-real-clasp-binary", 5),
        );
        assert!(matches!(
            platform.list(),
            Err(PlatformError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn create_parses_id_from_echoed_output() {
        let dir = TempDir::new().unwrap();
        let platform = ClaspPlatform::new(
            dir.path(),
            &settings("echo https://script.google.com/macros/s/AKfycbNewDeployment000000000/exec", 5),
        );
        assert_eq!(
            platform.create("owner 2026-01-01").unwrap(),
            "AKfycbNewDeployment000000000"
        );
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_times_out() {
        let mut cmd = Command::new("sleep");
        cmd.arg("60");
        assert!(matches!(
            execute(cmd, Some(Duration::from_millis(150))),
            Exec::TimedOut
        ));
    }
}
