//! Protocol bridge gateway: republish a stdio tool server as an
//! authenticated HTTP API.
//!
//! The bridge spawns the configured tool server as a child process, speaks
//! newline-delimited JSON-RPC 2.0 with it over stdin/stdout, discovers its
//! tools at startup, and serves one `POST /<toolName>` route per tool. The
//! child is supervised: on exit the gateway degrades, restarts it with
//! bounded backoff, and fails terminally when the budget runs out.

pub mod backend;
pub mod bridge;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod supervisor;
pub mod validate;
