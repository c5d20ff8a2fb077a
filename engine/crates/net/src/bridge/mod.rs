//! Control-plane request bridge.
//!
//! Two listeners share one [`BridgeRouter`]: HTTP on a TCP port and the
//! `METHOD PATH\nBODY` framing on a Unix socket. Every operation that
//! touches host state is handed to the logic thread and awaited.

pub mod framing;
pub mod http;
pub mod router;
pub mod unix;

#[cfg(test)]
mod test_host;

pub use router::{BridgeRouter, ContentType, Request, Response, RouteError};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
