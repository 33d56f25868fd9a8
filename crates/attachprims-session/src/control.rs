use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Error reported by a control-plane implementation.
pub type ControlError = Box<dyn std::error::Error + Send + Sync>;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub width: u16,
    pub height: u16,
}

impl TerminalSize {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }
}

/// Announcement that a client is about to attach to a container's socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachRequest {
    pub id: String,
    pub socket_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_session: Option<String>,
}

/// Request to resize a container's terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSizeRequest {
    pub id: String,
    #[serde(flatten)]
    pub size: TerminalSize,
}

/// Request/response calls made to the server outside the attach socket.
///
/// Implementations carry the requests over whatever RPC transport the
/// server speaks. Calls block until the server acknowledges.
pub trait ControlPlane: Send + Sync {
    /// Tell the server a client is attaching to `request.socket_path`.
    fn announce_attach(&self, request: &AttachRequest) -> Result<(), ControlError>;

    /// Change the container's terminal size.
    fn set_window_size(&self, request: &WindowSizeRequest) -> Result<(), ControlError>;
}
