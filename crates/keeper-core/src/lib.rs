pub mod config;
pub mod error;
pub mod gate;
pub mod guardian;
pub mod io;
pub mod paths;
pub mod pipeline;
pub mod platform;
pub mod propagate;
pub mod resolver;
pub mod store;
pub mod transform;

pub use error::{KeeperError, Result};
