use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, TransportError};

/// Socket type used for the attach data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketKind {
    /// `SOCK_SEQPACKET`: every read yields exactly one packet.
    #[default]
    SeqPacket,
    /// `SOCK_STREAM`: a byte stream. One read may carry several packets and
    /// the demuxer routes all of them by the first tag, so only peers that
    /// write one packet at a time and wait (test harnesses) are safe here.
    Stream,
}

impl SocketKind {
    pub(crate) fn raw(self) -> libc::c_int {
        match self {
            SocketKind::SeqPacket => libc::SOCK_SEQPACKET,
            SocketKind::Stream => libc::SOCK_STREAM,
        }
    }

    /// Name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            SocketKind::SeqPacket => "seqpacket",
            SocketKind::Stream => "stream",
        }
    }
}

/// A connected attach socket. Implements `Read + Write`.
///
/// Clones made with [`AttachSocket::try_clone`] share the underlying socket
/// and its write-half state, so one task can read while another writes and
/// a third closes the write direction.
pub struct AttachSocket {
    stream: UnixStream,
    kind: SocketKind,
    write_closed: Arc<AtomicBool>,
}

impl AttachSocket {
    pub(crate) fn from_unix(stream: UnixStream, kind: SocketKind) -> Self {
        Self {
            stream,
            kind,
            write_closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Socket type of this connection.
    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// Try to clone this socket (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let stream = self.stream.try_clone()?;
        Ok(Self {
            stream,
            kind: self.kind,
            write_closed: Arc::clone(&self.write_closed),
        })
    }

    /// Shut down the write direction so the peer observes end of input.
    ///
    /// Only the first call across all clones reaches the socket; later calls
    /// return `Ok(())` without touching it.
    pub fn close_write(&self) -> Result<()> {
        if self.write_closed.swap(true, Ordering::SeqCst) {
            debug!("write half already closed");
            return Ok(());
        }
        match self.stream.shutdown(Shutdown::Write) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(TransportError::CloseWrite(err)),
        }
    }

    /// Whether the write direction has been closed through any clone.
    pub fn is_write_closed(&self) -> bool {
        self.write_closed.load(Ordering::SeqCst)
    }

    /// Shut down both directions, unblocking any reader or writer.
    pub fn shutdown(&self) -> Result<()> {
        self.write_closed.store(true, Ordering::SeqCst);
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Get the credentials of the connected peer (Linux only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` if unavailable.
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        use std::os::fd::AsRawFd;

        let fd = self.stream.as_raw_fd();
        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and `fd` is an open Unix socket descriptor owned by this process.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

impl Read for AttachSocket {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Read for &AttachSocket {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        (&self.stream).read(buf)
    }
}

impl Write for AttachSocket {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl Write for &AttachSocket {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        (&self.stream).write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        (&self.stream).flush()
    }
}

impl std::fmt::Debug for AttachSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachSocket")
            .field("kind", &self.kind.name())
            .field("write_closed", &self.is_write_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uds::pair;

    #[test]
    fn close_write_reaches_socket_once() {
        let (left, mut right) = pair(SocketKind::SeqPacket).unwrap();
        let clone = left.try_clone().unwrap();

        left.close_write().unwrap();
        assert!(clone.is_write_closed());
        clone.close_write().unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(right.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn close_write_keeps_read_direction_open() {
        let (mut left, mut right) = pair(SocketKind::Stream).unwrap();
        left.close_write().unwrap();

        right.write_all(b"still here").unwrap();
        let mut buf = [0u8; 10];
        left.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"still here");
    }

    #[test]
    fn shutdown_unblocks_reader_thread() {
        let (left, _right) = pair(SocketKind::SeqPacket).unwrap();
        let reader = left.try_clone().unwrap();

        let handle = std::thread::spawn(move || {
            let mut reader = reader;
            let mut buf = [0u8; 16];
            reader.read(&mut buf)
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        left.shutdown().unwrap();
        let read = handle.join().unwrap().unwrap();
        assert_eq!(read, 0);
        assert!(left.is_write_closed());
    }

    #[test]
    fn debug_output_names_kind() {
        let (left, _right) = pair(SocketKind::Stream).unwrap();
        let rendered = format!("{left:?}");
        assert!(rendered.contains("stream"));
    }
}
