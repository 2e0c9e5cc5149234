//! HTTP server module.
//!
//! Binds the listener, serves the router and drains on SIGTERM/SIGINT. On
//! shutdown every running ranking job is cancelled so in-flight pollers see
//! a terminal state before the connections close.

mod server;
mod shutdown;

pub use server::{serve, start_server, ServerError};
pub use shutdown::shutdown_signal;
