use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use attachprims_frame::Demuxer;
use attachprims_transport::{connect, AttachSocket, SocketKind};
use tracing::{debug, error, info, warn};

use crate::completion::{resolve, Completion, Policy, Reporter, Task};
use crate::config::{AttachConfig, AttachStreams, Hook};
use crate::control::ControlPlane;
use crate::detach::{copy_detachable, CopyError};
use crate::error::{AttachError, HookError, Result};
use crate::resize::spawn_resize_notifier;

/// Attaches to containers whose stdio a server exposes over attach sockets.
pub struct AttachClient {
    control: Arc<dyn ControlPlane>,
    socket_kind: SocketKind,
}

impl AttachClient {
    /// Create a client that announces attaches and resizes through `control`.
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self {
            control,
            socket_kind: SocketKind::default(),
        }
    }

    /// Override the attach socket type (default `SOCK_SEQPACKET`).
    ///
    /// See [`SocketKind::Stream`] for when a byte stream is safe.
    pub fn with_socket_kind(mut self, kind: SocketKind) -> Self {
        self.socket_kind = kind;
        self
    }

    /// Announce the attach to the server, then stream until the session ends.
    ///
    /// Returns `Err(AttachError::Detached)` when the user typed the detach
    /// keys; see [`AttachError::is_detach`].
    pub fn attach_container(&self, config: AttachConfig) -> Result<()> {
        let request = config.attach_request();
        info!(container_id = %request.id, path = ?request.socket_path, "announcing attach");
        self.control
            .announce_attach(&request)
            .map_err(|source| AttachError::Announce {
                id: request.id.clone(),
                source,
            })?;

        self.run_attach(config)
    }

    /// Stream an already announced session.
    pub fn run_attach(&self, config: AttachConfig) -> Result<()> {
        let AttachConfig {
            id,
            socket_path,
            tty,
            stop_after_stdin_eof,
            passthrough,
            resize,
            streams,
            pre_attach,
            post_attach,
            detach_keys,
            ..
        } = config;

        if passthrough {
            debug!(container_id = %id, "passthrough attach; stdio handled by the caller");
            return run_hook(pre_attach).map_err(AttachError::PreAttach);
        }

        debug!(container_id = %id, tty, "attaching to container");
        if let Some(events) = resize {
            if let Err(err) = spawn_resize_notifier(Arc::clone(&self.control), id.clone(), events)
            {
                warn!(container_id = %id, error = %err, "resize notifications unavailable");
            }
        }

        let socket = connect(&socket_path, self.socket_kind).map_err(|source| {
            AttachError::Connect {
                path: socket_path.clone(),
                source,
            }
        })?;
        if let Some((uid, gid, pid)) = socket.peer_credentials() {
            debug!(uid, gid, pid, "attach socket peer");
        }

        run_hook(pre_attach).map_err(AttachError::PreAttach)?;

        let policy = Policy {
            stop_after_stdin_eof,
            stdin_configured: streams.stdin.is_some(),
            output_configured: streams.has_output(),
        };
        let streaming = Streaming::start(socket, streams, detach_keys)?;

        if let Err(err) = run_hook(post_attach) {
            streaming.finish();
            return Err(AttachError::PostAttach(err));
        }

        let result = resolve(&streaming.socket, &streaming.completions, policy);
        streaming.finish();

        match &result {
            Ok(()) => info!(container_id = %id, "attach session finished"),
            Err(err) if err.is_detach() => info!(container_id = %id, "detached from container"),
            Err(err) => debug!(container_id = %id, error = %err, "attach session failed"),
        }
        result
    }
}

fn run_hook(hook: Option<Hook>) -> std::result::Result<(), HookError> {
    hook.map_or(Ok(()), |hook| hook())
}

/// The two data-path tasks of a connected session.
struct Streaming {
    socket: AttachSocket,
    completions: Receiver<Completion>,
    output: JoinHandle<()>,
    input: JoinHandle<()>,
}

impl Streaming {
    fn start(socket: AttachSocket, streams: AttachStreams, detach_keys: Vec<u8>) -> Result<Self> {
        let AttachStreams {
            stdin,
            stdout,
            stderr,
        } = streams;
        let reader = socket.try_clone().map_err(AttachError::Socket)?;
        let mut writer = socket.try_clone().map_err(AttachError::Socket)?;
        let (tx, completions) = mpsc::channel();

        let reporter = Reporter::new(tx.clone(), Task::Output);
        let output = std::thread::Builder::new()
            .name("attach-output".to_string())
            .spawn(move || {
                let result = Demuxer::new(reader, stdout, stderr)
                    .run()
                    .map_err(AttachError::Output);
                reporter.report(Completion::Output(result));
            })
            .map_err(|source| AttachError::Spawn {
                task: Task::Output.name(),
                source,
            })?;

        let reporter = Reporter::new(tx, Task::Input);
        let input = std::thread::Builder::new()
            .name("attach-stdin".to_string())
            .spawn(move || {
                let result = match stdin {
                    None => Ok(0),
                    Some(mut stdin) => copy_detachable(&mut writer, &mut stdin, &detach_keys)
                        .map_err(|err| match err {
                            CopyError::Detached { .. } => AttachError::Detached,
                            other => AttachError::Stdin(other),
                        }),
                };
                reporter.report(Completion::Input(result));
            });

        let input = match input {
            Ok(handle) => handle,
            Err(source) => {
                shutdown_logged(&socket);
                reap(output, Task::Output);
                return Err(AttachError::Spawn {
                    task: Task::Input.name(),
                    source,
                });
            }
        };

        Ok(Self {
            socket,
            completions,
            output,
            input,
        })
    }

    /// Shut the socket down and reap the tasks that have already ended.
    ///
    /// Neither task is waited for. The output task may be blocked writing to
    /// a slow sink and ends on its next socket read. The input task may be
    /// blocked reading the caller's stdin and ends on its next write.
    fn finish(self) {
        shutdown_logged(&self.socket);
        reap(self.output, Task::Output);
        reap(self.input, Task::Input);
    }
}

fn reap(handle: JoinHandle<()>, task: Task) {
    if !handle.is_finished() {
        debug!(task = task.name(), "task still blocked on caller stream; releasing it");
        return;
    }
    if handle.join().is_err() {
        error!(task = task.name(), "task panicked");
    }
}

fn shutdown_logged(socket: &AttachSocket) {
    if let Err(err) = socket.shutdown() {
        error!(error = %err, "unable to shut down attach socket");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::{Cursor, Read, Write};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use attachprims_frame::{encode_packet, FrameError, STDERR, STDOUT};
    use attachprims_transport::AttachListener;
    use bytes::BytesMut;

    use super::*;
    use crate::control::{AttachRequest, ControlError, TerminalSize, WindowSizeRequest};

    #[derive(Default)]
    struct RecordingControl {
        announces: Mutex<Vec<AttachRequest>>,
        sizes: Mutex<Vec<WindowSizeRequest>>,
        fail_announce: bool,
    }

    impl ControlPlane for RecordingControl {
        fn announce_attach(&self, request: &AttachRequest) -> std::result::Result<(), ControlError> {
            self.announces.lock().unwrap().push(request.clone());
            if self.fail_announce {
                return Err("no such container".into());
            }
            Ok(())
        }

        fn set_window_size(
            &self,
            request: &WindowSizeRequest,
        ) -> std::result::Result<(), ControlError> {
            self.sizes.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ChunkedReader {
        chunks: VecDeque<Vec<u8>>,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.chunks.pop_front() {
                None => Ok(0),
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
            }
        }
    }

    fn unique_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "attach-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn packet(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_packet(tag, payload, &mut buf).expect("payload should fit");
        buf.to_vec()
    }

    fn read_until_eof(socket: &mut AttachSocket) -> Vec<u8> {
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match socket.read(&mut buf) {
                Ok(0) | Err(_) => return received,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
    }

    fn client(control: &Arc<RecordingControl>) -> AttachClient {
        AttachClient::new(control.clone())
    }

    fn serve<F>(path: &Path, handler: F) -> std::thread::JoinHandle<Vec<u8>>
    where
        F: FnOnce(&mut AttachSocket) -> Vec<u8> + Send + 'static,
    {
        serve_kind(path, SocketKind::SeqPacket, handler)
    }

    fn serve_kind<F>(path: &Path, kind: SocketKind, handler: F) -> std::thread::JoinHandle<Vec<u8>>
    where
        F: FnOnce(&mut AttachSocket) -> Vec<u8> + Send + 'static,
    {
        let listener = AttachListener::bind(path, kind).expect("listener should bind");
        std::thread::spawn(move || {
            let mut socket = listener.accept().expect("listener should accept");
            handler(&mut socket)
        })
    }

    #[test]
    fn passthrough_announces_runs_pre_hook_and_skips_socket() {
        let control = Arc::new(RecordingControl::default());
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let mut cfg = AttachConfig::new("ctr", "/nonexistent/attach.sock").with_pre_attach(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        cfg.passthrough = true;

        client(&control).attach_container(cfg).expect("passthrough should succeed");

        assert!(ran.load(Ordering::SeqCst));
        let announces = control.announces.lock().unwrap();
        assert_eq!(announces.len(), 1);
        assert_eq!(announces[0].socket_path, PathBuf::from("/nonexistent/attach.sock"));
    }

    #[test]
    fn announce_failure_aborts_before_connect() {
        let control = Arc::new(RecordingControl {
            fail_announce: true,
            ..RecordingControl::default()
        });
        let cfg = AttachConfig::new("ctr", "/nonexistent/attach.sock");

        let err = client(&control).attach_container(cfg).unwrap_err();
        assert!(matches!(err, AttachError::Announce { ref id, .. } if id == "ctr"));
    }

    #[test]
    fn connect_failure_names_socket_path() {
        let dir = unique_dir("connect-fail");
        let path = dir.join("missing.sock");
        let control = Arc::new(RecordingControl::default());

        let err = client(&control)
            .attach_container(AttachConfig::new("ctr", &path))
            .unwrap_err();
        match err {
            AttachError::Connect { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn output_without_stdin_is_delivered() {
        let dir = unique_dir("stdout-only");
        let path = dir.join("attach.sock");
        let server = serve(&path, |socket| {
            socket.write_all(&packet(STDOUT, b"hi")).unwrap();
            Vec::new()
        });

        let control = Arc::new(RecordingControl::default());
        let out = SharedBuf::default();
        let cfg = AttachConfig::new("ctr", &path).with_stdout(out.clone());

        client(&control).attach_container(cfg).expect("attach should succeed");
        server.join().unwrap();
        assert_eq!(out.contents(), b"hi");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stdin_eof_closes_write_half_then_waits_for_output() {
        let dir = unique_dir("stdin-eof");
        let path = dir.join("attach.sock");
        let server = serve(&path, |socket| {
            let stdin = read_until_eof(socket);
            socket.write_all(&packet(STDOUT, b"got it")).unwrap();
            socket.write_all(&packet(STDERR, b"warning")).unwrap();
            stdin
        });

        let control = Arc::new(RecordingControl::default());
        let out = SharedBuf::default();
        let err = SharedBuf::default();
        let cfg = AttachConfig::new("ctr", &path)
            .with_stdin(Cursor::new(b"echo hi\n".to_vec()))
            .with_stdout(out.clone())
            .with_stderr(err.clone());

        client(&control).attach_container(cfg).expect("attach should succeed");

        assert_eq!(server.join().unwrap(), b"echo hi\n");
        assert_eq!(out.contents(), b"got it");
        assert_eq!(err.contents(), b"warning");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn detach_keys_across_reads_end_session_with_detach() {
        let dir = unique_dir("detach");
        let path = dir.join("attach.sock");
        let server = serve(&path, read_until_eof);

        let control = Arc::new(RecordingControl::default());
        let stdin = ChunkedReader {
            chunks: VecDeque::from(vec![b"ab\x10".to_vec(), b"\x11rest".to_vec()]),
        };
        let cfg = AttachConfig::new("ctr", &path)
            .with_stdin(stdin)
            .with_stdout(SharedBuf::default())
            .with_detach_keys(vec![0x10u8, 0x11]);

        let err = client(&control).attach_container(cfg).unwrap_err();
        assert!(err.is_detach());
        assert_eq!(server.join().unwrap(), b"ab");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stop_after_stdin_eof_returns_while_output_is_open() {
        let dir = unique_dir("stop-eof");
        let path = dir.join("attach.sock");
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let server = serve(&path, move |socket| {
            let stdin = read_until_eof(socket);
            let _ = socket.write_all(&packet(STDOUT, b"still running"));
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            stdin
        });

        let control = Arc::new(RecordingControl::default());
        let mut cfg = AttachConfig::new("ctr", &path)
            .with_stdin(Cursor::new(b"x".to_vec()))
            .with_stdout(SharedBuf::default());
        cfg.stop_after_stdin_eof = true;

        let started = Instant::now();
        client(&control).attach_container(cfg).expect("attach should succeed");
        assert!(started.elapsed() < Duration::from_secs(5));

        release_tx.send(()).unwrap();
        assert_eq!(server.join().unwrap(), b"x");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stream_socket_kind_connects_to_stream_listener() {
        let dir = unique_dir("stream-kind");
        let path = dir.join("attach.sock");
        let server = serve_kind(&path, SocketKind::Stream, |socket| {
            let stdin = read_until_eof(socket);
            socket.write_all(&packet(STDOUT, b"one packet")).unwrap();
            stdin
        });

        let control = Arc::new(RecordingControl::default());
        let out = SharedBuf::default();
        let cfg = AttachConfig::new("ctr", &path)
            .with_stdin(Cursor::new(b"q".to_vec()))
            .with_stdout(out.clone());

        client(&control)
            .with_socket_kind(SocketKind::Stream)
            .attach_container(cfg)
            .expect("attach should succeed");

        assert_eq!(server.join().unwrap(), b"q");
        assert_eq!(out.contents(), b"one packet");
        let _ = std::fs::remove_dir_all(&dir);
    }

    /// Sink whose first write parks until released.
    struct StalledSink {
        entered: Option<mpsc::Sender<()>>,
        release: mpsc::Receiver<()>,
    }

    impl Write for StalledSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Some(entered) = self.entered.take() {
                let _ = entered.send(());
                let _ = self.release.recv_timeout(Duration::from_secs(4));
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Stdin that yields `payload` once the output sink is stalled, then EOF.
    struct AfterStall {
        stalled: mpsc::Receiver<()>,
        payload: Option<Vec<u8>>,
    }

    impl Read for AfterStall {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.payload.take() {
                None => Ok(0),
                Some(payload) => {
                    let _ = self.stalled.recv_timeout(Duration::from_secs(4));
                    buf[..payload.len()].copy_from_slice(&payload);
                    Ok(payload.len())
                }
            }
        }
    }

    fn attach_with_stalled_sink(
        stdin_payload: &[u8],
        stop_after_stdin_eof: bool,
    ) -> (Result<()>, Duration) {
        let dir = unique_dir("stalled-sink");
        let path = dir.join("attach.sock");
        let server = serve(&path, |socket| {
            socket.write_all(&packet(STDOUT, b"slow")).unwrap();
            read_until_eof(socket)
        });

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let sink = StalledSink {
            entered: Some(entered_tx),
            release: release_rx,
        };
        let stdin = AfterStall {
            stalled: entered_rx,
            payload: Some(stdin_payload.to_vec()),
        };
        let mut cfg = AttachConfig::new("ctr", &path)
            .with_stdin(stdin)
            .with_stdout(sink)
            .with_detach_keys(vec![0x10u8, 0x11]);
        cfg.stop_after_stdin_eof = stop_after_stdin_eof;

        let control = Arc::new(RecordingControl::default());
        let started = Instant::now();
        let result = client(&control).attach_container(cfg);
        let elapsed = started.elapsed();

        let _ = release_tx.send(());
        server.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
        (result, elapsed)
    }

    #[test]
    fn stop_after_stdin_eof_does_not_wait_for_stalled_sink() {
        let (result, elapsed) = attach_with_stalled_sink(b"", true);
        result.expect("attach should succeed");
        assert!(elapsed < Duration::from_secs(3), "waited {elapsed:?}");
    }

    #[test]
    fn detach_does_not_wait_for_stalled_sink() {
        let (result, elapsed) = attach_with_stalled_sink(b"\x10\x11", false);
        assert!(result.unwrap_err().is_detach());
        assert!(elapsed < Duration::from_secs(3), "waited {elapsed:?}");
    }

    #[test]
    fn unknown_tag_fails_session() {
        let dir = unique_dir("bad-tag");
        let path = dir.join("attach.sock");
        let server = serve(&path, |socket| {
            socket.write_all(&packet(9, b"???")).unwrap();
            Vec::new()
        });

        let control = Arc::new(RecordingControl::default());
        let cfg = AttachConfig::new("ctr", &path).with_stdout(SharedBuf::default());

        let err = client(&control).attach_container(cfg).unwrap_err();
        assert!(matches!(
            err,
            AttachError::Output(FrameError::NilDestination { tag: 9 })
        ));
        server.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn pre_hook_failure_aborts_and_closes_socket() {
        let dir = unique_dir("pre-hook");
        let path = dir.join("attach.sock");
        let server = serve(&path, read_until_eof);

        let control = Arc::new(RecordingControl::default());
        let cfg = AttachConfig::new("ctr", &path)
            .with_stdout(SharedBuf::default())
            .with_pre_attach(|| Err("start failed".into()));

        let err = client(&control).attach_container(cfg).unwrap_err();
        assert!(matches!(err, AttachError::PreAttach(_)));
        assert!(server.join().unwrap().is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn post_hook_failure_still_drains_tasks() {
        let dir = unique_dir("post-hook");
        let path = dir.join("attach.sock");
        let server = serve(&path, read_until_eof);

        let control = Arc::new(RecordingControl::default());
        let cfg = AttachConfig::new("ctr", &path)
            .with_stdout(SharedBuf::default())
            .with_post_attach(|| Err("notify failed".into()));

        let err = client(&control).attach_container(cfg).unwrap_err();
        assert!(matches!(err, AttachError::PostAttach(_)));
        server.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn resize_events_reach_control_plane() {
        let dir = unique_dir("resize");
        let path = dir.join("attach.sock");
        let server = serve(&path, |_socket| Vec::new());

        let control = Arc::new(RecordingControl::default());
        let (tx, rx) = mpsc::channel();
        tx.send(TerminalSize::new(80, 24)).unwrap();
        tx.send(TerminalSize::new(132, 43)).unwrap();
        drop(tx);

        let mut cfg = AttachConfig::new("ctr", &path).with_resize(rx);
        cfg.tty = true;
        client(&control).attach_container(cfg).expect("attach should succeed");
        server.join().unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        while control.sizes.lock().unwrap().len() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let sizes = control.sizes.lock().unwrap();
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[1].size, TerminalSize::new(132, 43));
        assert!(sizes.iter().all(|r| r.id == "ctr"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
