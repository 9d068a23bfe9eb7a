//! remote-exec library
//!
//! Server and client for running submitted source files on a remote host:
//! - Text-framed wire protocol with MD5 payload checksums
//! - Executor registry with suffix and name based selection
//! - TCP server with a single serialized job dispatcher
//! - Async client used by the CLI and the integration tests

pub mod client;
pub mod config;
pub mod executor;
pub mod protocol;
pub mod server;
