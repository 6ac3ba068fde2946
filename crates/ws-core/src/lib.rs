//! Core connection state machine for an epoll-driven, RFC 6455 compliant
//! WebSocket server.
//!
//! This crate owns the protocol and I/O plumbing — buffer pooling, frame
//! parsing, the opening handshake, and the per-connection state machine —
//! and stays agnostic to how an embedding process drives its event loop.
//! The expected caller pumps a [`mio::Poll`], accepts connections onto a
//! [`registry::ConnectionRegistry`], and calls
//! [`registry::ConnectionRegistry::dispatch`] once per readiness event.

pub mod config;
pub mod conn;
pub mod error;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod pool;
pub mod registry;
pub mod stream;

pub use config::ServerConfig;
pub use conn::{ConnOutcome, ConnState, Connection};
pub use error::{FrameError, HandshakeError};
pub use frame::OpCode;
pub use pool::{Buffer, BufferPool};
pub use registry::ConnectionRegistry;
