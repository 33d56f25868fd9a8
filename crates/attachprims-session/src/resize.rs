use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::debug;

use crate::control::{ControlPlane, TerminalSize, WindowSizeRequest};

/// Totals reported by a resize notifier once its event source closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResizeStats {
    pub events: u64,
    pub failures: u64,
}

/// Forward every terminal-size event to the control plane.
///
/// Runs until all senders of `events` are dropped. Failed calls are logged
/// and never end the notifier or the attach session.
pub fn spawn_resize_notifier(
    control: Arc<dyn ControlPlane>,
    id: String,
    events: Receiver<TerminalSize>,
) -> std::io::Result<JoinHandle<ResizeStats>> {
    std::thread::Builder::new()
        .name("attach-resize".to_string())
        .spawn(move || {
            let mut stats = ResizeStats::default();
            for size in events.iter() {
                debug!(container_id = %id, ?size, "got a resize event");
                stats.events += 1;
                let request = WindowSizeRequest {
                    id: id.clone(),
                    size,
                };
                if let Err(err) = control.set_window_size(&request) {
                    stats.failures += 1;
                    debug!(container_id = %id, error = %err, "failed to resize terminal");
                }
            }
            debug!(container_id = %id, events = stats.events, "resize event source closed");
            stats
        })
}
