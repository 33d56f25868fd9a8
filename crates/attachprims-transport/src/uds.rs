use std::io::{self, ErrorKind};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::socket::{AttachSocket, SocketKind};

/// Default permission mode for created socket paths.
pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(target_os = "macos")]
const MAX_PATH_LEN: usize = 104;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const MAX_PATH_LEN: usize = 104;

/// Connect to a container's attach socket (blocking).
///
/// Paths longer than `sun_path` are reached on Linux through the parent
/// directory's `/proc/self/fd` entry.
pub fn connect(path: impl AsRef<Path>, kind: SocketKind) -> Result<AttachSocket> {
    let path = path.as_ref();
    let connect_err = |source: io::Error| TransportError::Connect {
        path: path.to_path_buf(),
        source,
    };

    let len = path.as_os_str().len();
    let stream = if len >= MAX_PATH_LEN {
        connect_long(path, kind).map_err(|err| match err {
            LongPathError::Unsupported => TransportError::PathTooLong {
                path: path.to_path_buf(),
                len,
                max: MAX_PATH_LEN,
            },
            LongPathError::Io(source) => connect_err(source),
        })?
    } else {
        connect_raw(path, kind).map_err(connect_err)?
    };

    debug!(?path, kind = kind.name(), "connected to attach socket");
    Ok(AttachSocket::from_unix(stream, kind))
}

/// Create a connected pair of attach sockets.
pub fn pair(kind: SocketKind) -> Result<(AttachSocket, AttachSocket)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` is a valid writable array of two descriptors.
    let rc = unsafe { libc::socketpair(libc::AF_UNIX, kind.raw(), 0, fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error().into());
    }

    // SAFETY: socketpair succeeded, so both descriptors are open and owned by us.
    let (left, right) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(&left)?;
    set_cloexec(&right)?;

    Ok((
        AttachSocket::from_unix(UnixStream::from(left), kind),
        AttachSocket::from_unix(UnixStream::from(right), kind),
    ))
}

/// Listening attach socket, as a server prepares it for a client.
///
/// Used by peers and test harnesses; the session engine itself only connects.
pub struct AttachListener {
    fd: OwnedFd,
    path: PathBuf,
    kind: SocketKind,
    created_inode: Option<(u64, u64)>,
}

impl AttachListener {
    /// Bind and listen on a filesystem-path Unix socket.
    ///
    /// If the path already exists and is a socket, it is removed first
    /// (stale socket cleanup). Other file types are never removed.
    pub fn bind(path: impl AsRef<Path>, kind: SocketKind) -> Result<Self> {
        Self::bind_with_mode(path, kind, DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, kind: SocketKind, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: MAX_PATH_LEN,
            });
        }

        let bind_err = |source: io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(bind_err)?;
            } else {
                return Err(bind_err(io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
        }

        let fd = new_socket(kind).map_err(bind_err)?;
        let (addr, len) = socket_addr(&path).map_err(bind_err)?;
        // SAFETY: `addr` is a fully initialised sockaddr_un and `len` covers the path.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&addr as *const libc::sockaddr_un).cast::<libc::sockaddr>(),
                len,
            )
        };
        if rc != 0 {
            return Err(bind_err(io::Error::last_os_error()));
        }
        // SAFETY: `fd` is a bound socket descriptor owned by this listener.
        if unsafe { libc::listen(fd.as_raw_fd(), libc::SOMAXCONN) } != 0 {
            return Err(bind_err(io::Error::last_os_error()));
        }

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;
        let created_inode = Some((created.dev(), created.ino()));

        info!(?path, kind = kind.name(), "listening on attach socket");

        Ok(Self {
            fd,
            path,
            kind,
            created_inode,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<AttachSocket> {
        loop {
            // SAFETY: a null address buffer is permitted; the peer address is not needed.
            let fd = unsafe {
                libc::accept(
                    self.fd.as_raw_fd(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            };
            if fd < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(TransportError::Accept(err));
            }

            // SAFETY: accept returned a fresh descriptor that nothing else owns.
            let owned = unsafe { OwnedFd::from_raw_fd(fd) };
            set_cloexec(&owned).map_err(TransportError::Accept)?;
            debug!("accepted attach connection");
            return Ok(AttachSocket::from_unix(UnixStream::from(owned), self.kind));
        }
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Socket type of accepted connections.
    pub fn kind(&self) -> SocketKind {
        self.kind
    }
}

impl Drop for AttachListener {
    fn drop(&mut self) {
        if let Some((expected_dev, expected_ino)) = self.created_inode {
            if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino
                {
                    debug!(path = ?self.path, "cleaning up socket file");
                    let _ = std::fs::remove_file(&self.path);
                } else {
                    debug!(
                        path = ?self.path,
                        "socket path identity changed; skipping cleanup"
                    );
                }
            }
        }
    }
}

enum LongPathError {
    Unsupported,
    Io(io::Error),
}

#[cfg(target_os = "linux")]
fn connect_long(path: &Path, kind: SocketKind) -> std::result::Result<UnixStream, LongPathError> {
    let name = path.file_name().ok_or(LongPathError::Unsupported)?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    // The directory handle must stay open until connect returns.
    let dir = std::fs::File::open(parent).map_err(LongPathError::Io)?;
    let short = PathBuf::from(format!("/proc/self/fd/{}", dir.as_raw_fd())).join(name);
    if short.as_os_str().len() >= MAX_PATH_LEN {
        return Err(LongPathError::Unsupported);
    }

    debug!(?path, via = ?short, "connecting through directory descriptor");
    connect_raw(&short, kind).map_err(LongPathError::Io)
}

#[cfg(not(target_os = "linux"))]
fn connect_long(_path: &Path, _kind: SocketKind) -> std::result::Result<UnixStream, LongPathError> {
    Err(LongPathError::Unsupported)
}

fn connect_raw(path: &Path, kind: SocketKind) -> io::Result<UnixStream> {
    let fd = new_socket(kind)?;
    let (addr, len) = socket_addr(path)?;
    loop {
        // SAFETY: `addr` is a fully initialised sockaddr_un and `len` covers the path.
        let rc = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                (&addr as *const libc::sockaddr_un).cast::<libc::sockaddr>(),
                len,
            )
        };
        if rc == 0 {
            return Ok(UnixStream::from(fd));
        }
        let err = io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn new_socket(kind: SocketKind) -> io::Result<OwnedFd> {
    // SAFETY: plain socket(2) call; the result is checked before use.
    let fd = unsafe { libc::socket(libc::AF_UNIX, kind.raw(), 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: socket returned a fresh descriptor that nothing else owns.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    set_cloexec(&owned)?;
    Ok(owned)
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    // SAFETY: `fd` is an open descriptor owned by the caller.
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn socket_addr(path: &Path) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
    // SAFETY: sockaddr_un is plain old data; all-zero is a valid value.
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let bytes = path.as_os_str().as_bytes();
    if bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "socket path does not fit sun_path",
        ));
    }
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }

    let len = std::mem::offset_of!(libc::sockaddr_un, sun_path) + bytes.len() + 1;
    Ok((addr, len as libc::socklen_t))
}
