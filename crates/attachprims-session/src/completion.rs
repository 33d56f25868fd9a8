//! Reconciling the two streaming tasks into one session result.
//!
//! The output task (demux) and the input task (stdin forwarder) each report
//! exactly one [`Completion`] on a shared channel. Whichever arrives first
//! decides the branch:
//!
//! 1. output first: close the write half; the output result is the session
//!    result.
//! 2. input first:
//!    a. `stop_after_stdin_eof` with stdin configured: close the write half
//!       and succeed without waiting for output.
//!    b. detach: close the write half and return [`AttachError::Detached`].
//!    c. clean EOF: close the write half, then wait for the output result
//!       if any output sink is configured.
//!    d. stdin I/O error: close the write half; an output error wins over
//!       the stdin error, which is returned otherwise.
//!
//! Every branch closes the write half exactly once.

use std::sync::mpsc::{Receiver, Sender};

use attachprims_frame::DemuxStats;
use attachprims_transport::AttachSocket;
use tracing::{debug, error};

use crate::error::{AttachError, Result};

/// Result reported by one streaming task.
#[derive(Debug)]
pub enum Completion {
    Input(Result<u64>),
    Output(Result<DemuxStats>),
}

/// Which streaming task a [`Reporter`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Input,
    Output,
}

impl Task {
    pub fn name(self) -> &'static str {
        match self {
            Task::Input => "stdin forwarder",
            Task::Output => "output demuxer",
        }
    }

    fn panicked(self) -> Completion {
        let err = AttachError::TaskPanicked(self.name());
        match self {
            Task::Input => Completion::Input(Err(err)),
            Task::Output => Completion::Output(Err(err)),
        }
    }
}

/// Sends a task's completion exactly once, even if the task panics.
pub struct Reporter {
    tx: Option<Sender<Completion>>,
    task: Task,
}

impl Reporter {
    pub fn new(tx: Sender<Completion>, task: Task) -> Self {
        Self { tx: Some(tx), task }
    }

    pub fn report(mut self, completion: Completion) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(completion);
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(self.task.panicked());
        }
    }
}

/// The direction of the attach socket the coordinator half-closes.
pub trait WriteHalf {
    fn close_write(&self) -> attachprims_transport::Result<()>;
}

impl WriteHalf for AttachSocket {
    fn close_write(&self) -> attachprims_transport::Result<()> {
        AttachSocket::close_write(self)
    }
}

/// Session facts that select between completion branches.
#[derive(Debug, Clone, Copy, Default)]
pub struct Policy {
    pub stop_after_stdin_eof: bool,
    pub stdin_configured: bool,
    pub output_configured: bool,
}

/// Wait for the first completion and resolve the session result.
pub fn resolve<C>(conn: &C, completions: &Receiver<Completion>, policy: Policy) -> Result<()>
where
    C: WriteHalf + ?Sized,
{
    match recv(completions)? {
        Completion::Output(result) => {
            debug!("output finished first");
            let closed = conn.close_write();
            match result {
                Ok(stats) => {
                    debug!(?stats, "output stream ended");
                    closed.map_err(AttachError::CloseWrite)
                }
                Err(err) => {
                    if let Err(close_err) = closed {
                        error!(error = %close_err, "unable to close write half of attach socket");
                    }
                    Err(err)
                }
            }
        }
        Completion::Input(result) => {
            debug!("input finished first");
            if policy.stop_after_stdin_eof && policy.stdin_configured {
                close_logged(conn);
                debug!("stdin reached EOF; not waiting for output");
                return Ok(());
            }

            match result {
                Err(AttachError::Detached) => {
                    close_logged(conn);
                    Err(AttachError::Detached)
                }
                Ok(written) => {
                    debug!(written, "stdin finished");
                    close_logged(conn);
                    if policy.output_configured {
                        return wait_output(completions);
                    }
                    Ok(())
                }
                Err(err) => {
                    close_logged(conn);
                    if policy.output_configured {
                        wait_output(completions)?;
                    }
                    Err(err)
                }
            }
        }
    }
}

fn recv(completions: &Receiver<Completion>) -> Result<Completion> {
    completions.recv().map_err(|_| AttachError::TaskLost)
}

fn wait_output(completions: &Receiver<Completion>) -> Result<()> {
    loop {
        if let Completion::Output(result) = recv(completions)? {
            let stats = result?;
            debug!(?stats, "output stream ended");
            return Ok(());
        }
    }
}

fn close_logged<C: WriteHalf + ?Sized>(conn: &C) {
    if let Err(err) = conn.close_write() {
        error!(error = %err, "unable to close write half of attach socket");
    }
}
