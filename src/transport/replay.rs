use super::{NotificationFn, StopReason, Transport, TransportError};
use crate::capture::Capture;
use crossbeam::channel::Sender;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Plays a recorded capture back with its original spacing.
pub struct ReplayTransport {
    source: PathBuf,
    capture: Option<Capture>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ReplayTransport {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            capture: None,
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn from_capture(capture: Capture) -> Self {
        Self {
            source: PathBuf::new(),
            capture: Some(capture),
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl Transport for ReplayTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.capture.is_none() {
            info!("loading capture {}", self.source.display());
            self.capture = Some(Capture::load(&self.source)?);
        }
        Ok(())
    }

    fn subscribe(
        &mut self,
        mut on_notification: NotificationFn,
        stop: Sender<StopReason>,
    ) -> Result<(), TransportError> {
        let capture = self
            .capture
            .take()
            .ok_or_else(|| TransportError::Link("replay is not connected".into()))?;
        let cancel = Arc::clone(&self.cancel);

        let worker = std::thread::Builder::new()
            .name("replay".into())
            .spawn(move || {
                let started = Instant::now();
                for packet in capture.packets {
                    // out-of-range arrivals play immediately
                    let due = Duration::try_from_secs_f64(packet.arrival_ms.max(0.0) / 1000.0)
                        .unwrap_or_default();
                    while let Some(wait) = due.checked_sub(started.elapsed()) {
                        if cancel.load(Ordering::Relaxed) {
                            return;
                        }
                        std::thread::sleep(wait.min(Duration::from_millis(50)));
                    }
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    on_notification(packet.payload);
                }
                debug!("replay finished");
                let _ = stop.send(StopReason::TransportClosed);
            })
            .map_err(|e| TransportError::Link(e.to_string()))?;

        self.worker = Some(worker);
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<(), TransportError> {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| TransportError::Link("replay thread panicked".into()))?;
        }
        Ok(())
    }
}
