//! Unix socket transport for container attach sessions.
//!
//! Provides the data-plane socket an attach session streams over:
//! - connecting to a server-prepared attach socket (`SOCK_SEQPACKET` by default)
//! - half-closing the write direction exactly once
//! - binding and accepting, for peers and test harnesses
//!
//! This is the lowest layer of attachprims. Framing and session handling
//! build on the [`AttachSocket`] type provided here.

pub mod error;

#[cfg(unix)]
pub mod socket;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use socket::{AttachSocket, SocketKind};

#[cfg(unix)]
pub use uds::{connect, pair, AttachListener};
