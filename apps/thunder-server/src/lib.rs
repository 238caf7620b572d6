//! Thunder Server Library
//!
//! Streaming gateway that serves files stored in a private messaging
//! channel as range-seekable HTTP resources. The binary in main.rs wires
//! these modules together; integration tests drive the router directly.
//!
//! # Modules
//!
//! - `upstream`: messaging platform capability and its backends
//! - `streaming`: connection pool, descriptor and session caches, chunked reads
//! - `routes`: HTTP surface

pub mod config;
pub mod error;
pub mod format;
pub mod keepalive;
pub mod routes;
pub mod state;
pub mod streaming;
pub mod upstream;
