//! Reference connector host: a line-based participant gateway driven by
//! the control plane, with the control bridge exposed over HTTP and a Unix
//! socket.

pub mod app;
pub mod config;
pub mod host;
pub mod shutdown;

pub use app::{AppError, Connector};
pub use config::{Cli, ServerConfig};
