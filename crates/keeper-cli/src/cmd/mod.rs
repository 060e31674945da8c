pub mod bind;
pub mod config;
pub mod init;
pub mod publish;
pub mod secret;
pub mod status;
pub mod validate;
