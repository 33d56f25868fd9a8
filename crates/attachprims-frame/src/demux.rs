use std::io::{ErrorKind, Read, Write};

use bytes::BytesMut;
use tracing::{info, trace};

use crate::codec::{split_packet, PACKET_SIZE};
use crate::error::{FrameError, Result};
use crate::tag::{tag_name, StreamTag};

/// Caller-owned output destination.
pub type Sink = Box<dyn Write + Send>;

/// Byte counts delivered by a [`Demuxer`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub packets: u64,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
}

/// Routes tagged packets from an attach socket to stdout/stderr sinks.
///
/// One read is one packet: byte 0 is the stream tag, the rest is payload.
/// Sinks are never closed by the demuxer.
pub struct Demuxer<R> {
    inner: R,
    stdout: Option<Sink>,
    stderr: Option<Sink>,
    buf: BytesMut,
}

impl<R: Read> Demuxer<R> {
    /// Create a demuxer over `inner` with the given (optional) sinks.
    pub fn new(inner: R, stdout: Option<Sink>, stderr: Option<Sink>) -> Self {
        Self {
            inner,
            stdout,
            stderr,
            buf: BytesMut::zeroed(PACKET_SIZE),
        }
    }

    /// Deliver packets until end of stream.
    ///
    /// Returns `Ok` on a clean EOF. A packet whose tag is unrecognised or
    /// whose sink is not configured stops the loop with
    /// [`FrameError::NilDestination`].
    pub fn run(&mut self) -> Result<DemuxStats> {
        let mut stats = DemuxStats::default();
        loop {
            let read = match self.inner.read(&mut self.buf[..]) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Read(err)),
            };
            let Some((tag, payload)) = split_packet(&self.buf[..read]) else {
                return Ok(stats);
            };

            let (stream, sink) = match StreamTag::from_byte(tag) {
                Some(StreamTag::Stdout) => (StreamTag::Stdout, self.stdout.as_mut()),
                Some(StreamTag::Stderr) => (StreamTag::Stderr, self.stderr.as_mut()),
                _ => {
                    info!(tag, name = tag_name(tag), "received unexpected attach packet tag");
                    return Err(FrameError::NilDestination { tag });
                }
            };
            let Some(sink) = sink else {
                return Err(FrameError::NilDestination { tag });
            };

            write_payload(sink.as_mut(), stream.name(), payload)?;
            trace!(stream = stream.name(), len = payload.len(), "delivered packet");

            stats.packets += 1;
            match stream {
                StreamTag::Stderr => stats.stderr_bytes += payload.len() as u64,
                _ => stats.stdout_bytes += payload.len() as u64,
            }
        }
    }

    /// Consume the demuxer and return the reader and sinks.
    pub fn into_parts(self) -> (R, Option<Sink>, Option<Sink>) {
        (self.inner, self.stdout, self.stderr)
    }
}

fn write_payload(sink: &mut dyn Write, stream: &'static str, payload: &[u8]) -> Result<()> {
    let written = loop {
        match sink.write(payload) {
            Ok(n) => break n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(source) => return Err(FrameError::Write { stream, source }),
        }
    };
    if written != payload.len() {
        return Err(FrameError::ShortWrite {
            stream,
            expected: payload.len(),
            written,
        });
    }
    sink.flush()
        .map_err(|source| FrameError::Write { stream, source })
}
