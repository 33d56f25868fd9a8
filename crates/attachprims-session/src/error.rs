use std::path::PathBuf;

use attachprims_frame::FrameError;
use attachprims_transport::TransportError;

use crate::control::ControlError;
use crate::detach::CopyError;

/// Error returned by a caller-supplied pre/post attach hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can end an attach session.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    /// The control plane rejected or failed the attach announcement.
    #[error("announce attach for container {id}: {source}")]
    Announce {
        id: String,
        #[source]
        source: ControlError,
    },

    /// The data-plane socket could not be opened.
    #[error("failed to connect to container's attach socket: {path}: {}", connect_reason(.source))]
    Connect {
        path: PathBuf,
        #[source]
        source: TransportError,
    },

    #[error("run pre attach hook: {0}")]
    PreAttach(#[source] HookError),

    #[error("run post attach hook: {0}")]
    PostAttach(#[source] HookError),

    /// The connected socket could not be shared between tasks.
    #[error("attach socket: {0}")]
    Socket(#[source] TransportError),

    /// A streaming task could not be started.
    #[error("spawn {task} task: {source}")]
    Spawn {
        task: &'static str,
        source: std::io::Error,
    },

    /// Demultiplexing container output failed.
    #[error("redirect response to output streams: {0}")]
    Output(#[source] FrameError),

    /// Forwarding stdin to the socket failed.
    #[error("forward stdin: {0}")]
    Stdin(#[source] CopyError),

    #[error("close write half of attach socket: {0}")]
    CloseWrite(#[source] TransportError),

    /// The detach-key sequence was typed on stdin. Not a failure.
    #[error("detached from container")]
    Detached,

    #[error("{0} task panicked")]
    TaskPanicked(&'static str),

    #[error("attach tasks exited without reporting")]
    TaskLost,
}

impl AttachError {
    /// Whether the session ended because the user detached.
    pub fn is_detach(&self) -> bool {
        matches!(self, AttachError::Detached)
    }
}

/// The transport failure without the path `Connect` already prints.
fn connect_reason(err: &TransportError) -> String {
    match err {
        TransportError::Connect { source, .. } => source.to_string(),
        TransportError::PathTooLong { len, max, .. } => {
            format!("socket path too long ({len} bytes, max {max})")
        }
        other => other.to_string(),
    }
}

/// Invalid detach-key notation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid detach keys {input:?}: unknown key {key:?}")]
pub struct DetachKeysError {
    pub input: String,
    pub key: String,
}

pub type Result<T> = std::result::Result<T, AttachError>;
