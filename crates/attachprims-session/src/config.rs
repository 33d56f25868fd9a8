use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;

use attachprims_frame::Sink;

use crate::control::{AttachRequest, TerminalSize};
use crate::error::HookError;

/// Caller-owned stdin source.
pub type Source = Box<dyn Read + Send>;

/// Callback run around stream setup, e.g. to start the container.
pub type Hook = Box<dyn FnOnce() -> Result<(), HookError> + Send>;

/// The standard streams of an attach session. Each one is optional.
#[derive(Default)]
pub struct AttachStreams {
    pub stdin: Option<Source>,
    pub stdout: Option<Sink>,
    pub stderr: Option<Sink>,
}

impl AttachStreams {
    /// Whether any output sink is configured.
    pub fn has_output(&self) -> bool {
        self.stdout.is_some() || self.stderr.is_some()
    }
}

impl fmt::Debug for AttachStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachStreams")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Configuration for one attach session.
pub struct AttachConfig {
    /// Container ID.
    pub id: String,
    /// Path of the server-prepared attach socket.
    pub socket_path: PathBuf,
    /// Exec session ID, if this attach is for an exec.
    pub exec_session: Option<String>,
    /// Whether the attached process has a terminal.
    pub tty: bool,
    /// Finish as soon as stdin reaches EOF instead of waiting for output.
    ///
    /// Ignored when no stdin is configured: the session then waits for the
    /// output stream as usual.
    pub stop_after_stdin_eof: bool,
    /// Stdio is already wired to the caller's own streams; no socket I/O.
    pub passthrough: bool,
    /// Terminal resize events, forwarded for as long as the sender lives.
    pub resize: Option<Receiver<TerminalSize>>,
    pub streams: AttachStreams,
    pub pre_attach: Option<Hook>,
    pub post_attach: Option<Hook>,
    /// Byte sequence on stdin that detaches. Empty disables detaching.
    pub detach_keys: Vec<u8>,
}

impl AttachConfig {
    /// Configuration with no streams, no hooks and detaching disabled.
    pub fn new(id: impl Into<String>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            socket_path: socket_path.into(),
            exec_session: None,
            tty: false,
            stop_after_stdin_eof: false,
            passthrough: false,
            resize: None,
            streams: AttachStreams::default(),
            pre_attach: None,
            post_attach: None,
            detach_keys: Vec::new(),
        }
    }

    pub fn with_stdin(mut self, stdin: impl Read + Send + 'static) -> Self {
        self.streams.stdin = Some(Box::new(stdin));
        self
    }

    pub fn with_stdout(mut self, stdout: impl std::io::Write + Send + 'static) -> Self {
        self.streams.stdout = Some(Box::new(stdout));
        self
    }

    pub fn with_stderr(mut self, stderr: impl std::io::Write + Send + 'static) -> Self {
        self.streams.stderr = Some(Box::new(stderr));
        self
    }

    pub fn with_detach_keys(mut self, keys: impl Into<Vec<u8>>) -> Self {
        self.detach_keys = keys.into();
        self
    }

    pub fn with_resize(mut self, events: Receiver<TerminalSize>) -> Self {
        self.resize = Some(events);
        self
    }

    pub fn with_pre_attach(
        mut self,
        hook: impl FnOnce() -> Result<(), HookError> + Send + 'static,
    ) -> Self {
        self.pre_attach = Some(Box::new(hook));
        self
    }

    pub fn with_post_attach(
        mut self,
        hook: impl FnOnce() -> Result<(), HookError> + Send + 'static,
    ) -> Self {
        self.post_attach = Some(Box::new(hook));
        self
    }

    /// The control-plane announcement for this session.
    pub fn attach_request(&self) -> AttachRequest {
        AttachRequest {
            id: self.id.clone(),
            socket_path: self.socket_path.clone(),
            exec_session: self.exec_session.clone(),
        }
    }
}

impl fmt::Debug for AttachConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachConfig")
            .field("id", &self.id)
            .field("socket_path", &self.socket_path)
            .field("exec_session", &self.exec_session)
            .field("tty", &self.tty)
            .field("stop_after_stdin_eof", &self.stop_after_stdin_eof)
            .field("passthrough", &self.passthrough)
            .field("resize", &self.resize.is_some())
            .field("streams", &self.streams)
            .field("pre_attach", &self.pre_attach.is_some())
            .field("post_attach", &self.post_attach.is_some())
            .field(
                "detach_keys",
                &format_args!("<{} bytes>", self.detach_keys.len()),
            )
            .finish()
    }
}
