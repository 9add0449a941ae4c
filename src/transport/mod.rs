mod replay;

#[cfg(feature = "ble")]
mod ble;

#[cfg(feature = "ble")]
pub use ble::BleTransport;
pub use replay::ReplayTransport;

use crossbeam::channel::Sender;
use thiserror::Error;

pub const DEVICE_NAME: &str = "WU-BT10 MIDI";
pub const MIDI_CHARACTERISTIC: &str = "7772e5db-3868-4112-a1a9-f2669d106bf3";

/// Called once per notification, from whatever thread the transport runs on.
pub type NotificationFn = Box<dyn FnMut(Vec<u8>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The operator asked to stop recording.
    Operator,
    /// The link went away or the source ran dry.
    TransportClosed,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not find device with name {0}")]
    DeviceNotFound(String),
    #[error("no bluetooth adapter available")]
    NoAdapter,
    #[error("link error: {0}")]
    Link(String),
    #[error("replay source: {0}")]
    Replay(#[from] crate::capture::CaptureError),
    #[error("{0}")]
    Unsupported(String),
}

/// Source of raw notification payloads.
///
/// `connect` runs before any task starts; failing there aborts the session.
/// After `subscribe`, the transport pushes payloads into the callback and
/// sends [StopReason::TransportClosed] on `stop` if it ends on its own.
pub trait Transport: Send {
    fn connect(&mut self) -> Result<(), TransportError>;

    fn subscribe(
        &mut self,
        on_notification: NotificationFn,
        stop: Sender<StopReason>,
    ) -> Result<(), TransportError>;

    fn unsubscribe(&mut self) -> Result<(), TransportError>;

    fn disconnect(&mut self) {}
}
