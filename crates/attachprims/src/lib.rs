//! Client-side container attach streaming over Unix sockets.
//!
//! attachprims connects to a server-prepared attach socket and relays a
//! container's stdio: output packets are demultiplexed into stdout/stderr
//! sinks while stdin is forwarded with detach-key detection.
//!
//! # Crate Structure
//!
//! - [`transport`] - Attach socket connect, half-close and listeners
//! - [`frame`] - Tagged stdio packets and the output demultiplexer
//! - [`session`] - Attach session coordination (behind `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use attachprims_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use attachprims_frame::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use attachprims_session::*;
}
