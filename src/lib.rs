//! Rollcall: mention rankings for Discord servers.
//!
//! Scans a server's text channels backwards through their history, counts
//! how often each member is mentioned and serves the ranking through a
//! start-then-poll HTTP API.

pub mod config;
pub mod error;
pub mod http;
pub mod jobs;
pub mod middleware;
pub mod ranking;
pub mod routes;
pub mod source;
pub mod state;

pub use error::AppError;
pub use state::AppState;
