//! Network surfaces: the control-plane bridge and the participant line
//! gateway.

pub mod ansi;
pub mod bridge;
pub mod channels;
pub mod output_router;
pub mod server;
pub mod telnet;

pub use bridge::{BridgeError, BridgeRouter, Request, Response};
pub use channels::{gateway_channels, GatewayEnds, GatewayEvent, GatewayLinks, OutputTx};
pub use output_router::run_output_router;
pub use server::serve_lines;
