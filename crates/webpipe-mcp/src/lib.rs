//! `webpipe` crate (library surface).
//!
//! The primary entrypoint for end users is the `webpipe` binary (tool
//! registry + MCP SSE transport + research orchestrator CLI). This library
//! module exists so integration tests and embedders can reuse the same
//! registry/transport/orchestrator without shelling out to the binary.

pub use webpipe_core as core;

pub mod orchestrator;
pub mod registry;
pub mod rpc;
pub mod session;
pub mod state;
pub mod tools;
pub mod transport;
