//! Local terminal handling for `attach --tty`.

use std::io;
use std::sync::mpsc::{self, Receiver};
use std::thread::JoinHandle;

use attachprims_session::TerminalSize;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use signal_hook::consts::signal::SIGWINCH;
use signal_hook::iterator::{Handle, Signals};
use tracing::debug;

/// Keeps the local terminal in raw mode; restores it on drop (including panics).
///
/// Raw mode turns off line buffering, echo and XON/XOFF flow control, so
/// every key (ctrl-q included) reaches the container and the detach matcher.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Source of the current terminal size as `(columns, rows)`.
pub type SizeSource = fn() -> io::Result<(u16, u16)>;

/// Reports terminal size changes until dropped.
pub struct ResizeWatch {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl ResizeWatch {
    /// Watch SIGWINCH and report the local terminal's size.
    pub fn start() -> io::Result<(Self, Receiver<TerminalSize>)> {
        Self::with_source(crossterm::terminal::size)
    }

    /// Watch SIGWINCH, reading sizes from `size`.
    ///
    /// The current size is sent first so the container starts with the
    /// caller's dimensions.
    pub fn with_source(size: SizeSource) -> io::Result<(Self, Receiver<TerminalSize>)> {
        let mut signals = Signals::new([SIGWINCH])?;
        let handle = signals.handle();
        let (tx, rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("attach-winch".to_string())
            .spawn(move || {
                if !send_size(&tx, size) {
                    return;
                }
                for _ in signals.forever() {
                    if !send_size(&tx, size) {
                        return;
                    }
                }
            })?;

        Ok((
            Self {
                handle,
                thread: Some(thread),
            },
            rx,
        ))
    }
}

impl Drop for ResizeWatch {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Returns false once nobody is listening.
fn send_size(tx: &mpsc::Sender<TerminalSize>, size: SizeSource) -> bool {
    match size() {
        Ok((width, height)) => tx.send(TerminalSize::new(width, height)).is_ok(),
        Err(err) => {
            debug!(error = %err, "unable to read terminal size");
            true
        }
    }
}
