pub mod capture;
pub mod config;
pub mod correlate;
pub mod decode;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod output;
pub mod smf;
pub mod timeline;
pub mod timing;
pub mod transport;

pub use capture::Capture;
pub use config::SessionConfig;
pub use engine::{Pipeline, Session, SessionError, SessionReport, SessionState};
pub use events::{CompletedNote, ControllerEvent, RawPacket};
pub use output::{LiveOutput, MidiPortOutput, OutputError};
pub use timeline::Timeline;
pub use transport::{ReplayTransport, StopReason, Transport, TransportError};
