use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use attachprims_session::{
    parse_detach_keys, AttachClient, AttachConfig, AttachRequest, ControlError, ControlPlane,
    WindowSizeRequest,
};
use tracing::{debug, info, warn};

use crate::cmd::AttachArgs;
use crate::exit::{attach_error, detach_keys_error, io_error, CliResult, SUCCESS};
use crate::terminal::{RawModeGuard, ResizeWatch};

/// Control plane for a socket the server has already prepared.
///
/// The CLI has no RPC channel to the server, so announcements and resizes
/// are only logged.
struct LoggingControl;

impl ControlPlane for LoggingControl {
    fn announce_attach(&self, request: &AttachRequest) -> Result<(), ControlError> {
        info!(
            container_id = %request.id,
            path = ?request.socket_path,
            exec_session = ?request.exec_session,
            "attach announced"
        );
        Ok(())
    }

    fn set_window_size(&self, request: &WindowSizeRequest) -> Result<(), ControlError> {
        info!(
            container_id = %request.id,
            width = request.size.width,
            height = request.size.height,
            "window size changed"
        );
        Ok(())
    }
}

pub fn run(args: AttachArgs) -> CliResult<i32> {
    let detach_keys = parse_detach_keys(&args.detach_keys).map_err(detach_keys_error)?;
    let id = args
        .id
        .clone()
        .unwrap_or_else(|| default_container_id(&args.path));

    let mut config = AttachConfig::new(id.clone(), args.path.clone())
        .with_stdout(std::io::stdout())
        .with_stderr(std::io::stderr())
        .with_detach_keys(detach_keys);
    config.tty = args.tty;
    config.stop_after_stdin_eof = args.stop_after_stdin_eof;
    if !args.no_stdin {
        config = config.with_stdin(std::io::stdin());
    }

    let tty = if args.tty {
        let (with_tty, tty) = prepare_tty(config, args.no_stdin)?;
        config = with_tty;
        Some(tty)
    } else {
        None
    };

    let result = AttachClient::new(Arc::new(LoggingControl)).attach_container(config);
    // Restore the terminal before anything else is printed.
    drop(tty);

    match result {
        Ok(()) => Ok(SUCCESS),
        Err(err) if err.is_detach() => {
            eprintln!("detached from container {id}");
            Ok(SUCCESS)
        }
        Err(err) => Err(attach_error("attach failed", err)),
    }
}

/// Local terminal state held for the length of a `--tty` session.
///
/// Fields drop in order: resize reporting stops before raw mode is left.
struct TtyState {
    _resize: Option<ResizeWatch>,
    _raw_mode: Option<RawModeGuard>,
}

/// Put an interactive stdin in raw mode and report terminal size changes.
fn prepare_tty(config: AttachConfig, no_stdin: bool) -> CliResult<(AttachConfig, TtyState)> {
    let raw_mode = if !no_stdin && std::io::stdin().is_terminal() {
        Some(RawModeGuard::enable().map_err(|err| io_error("enable raw mode", err))?)
    } else {
        debug!("stdin is not a terminal; leaving terminal mode unchanged");
        None
    };

    let (config, resize) = match ResizeWatch::start() {
        Ok((watch, events)) => (config.with_resize(events), Some(watch)),
        Err(err) => {
            warn!(error = %err, "terminal resize events unavailable");
            (config, None)
        }
    };

    Ok((
        config,
        TtyState {
            _resize: resize,
            _raw_mode: raw_mode,
        },
    ))
}

/// Attach sockets usually live at `<state dir>/<container id>/attach`.
fn default_container_id(path: &Path) -> String {
    path.parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "container".to_string())
}
