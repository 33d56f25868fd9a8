//! Client-side attach sessions.
//!
//! Announces an attach over a caller-supplied control plane, connects the
//! data-plane socket, then streams stdio until the session completes:
//! container output is demultiplexed into the caller's sinks while stdin is
//! forwarded with in-band detach-key detection.

pub mod client;
pub mod completion;
pub mod config;
pub mod control;
pub mod detach;
pub mod error;
pub mod keys;
pub mod resize;

pub use client::AttachClient;
pub use config::{AttachConfig, AttachStreams, Hook, Source};
pub use control::{AttachRequest, ControlError, ControlPlane, TerminalSize, WindowSizeRequest};
pub use detach::{copy_detachable, CopyError, DetachMatcher};
pub use error::{AttachError, DetachKeysError, HookError, Result};
pub use keys::{parse_detach_keys, DEFAULT_DETACH_KEYS};
pub use resize::{spawn_resize_notifier, ResizeStats};
