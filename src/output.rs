use midir::{MidiOutput, MidiOutputConnection};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to initialise MIDI output: {0}")]
    Init(String),
    #[error("no MIDI output port available")]
    NoPort,
    #[error("failed to connect MIDI output: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("output already closed")]
    Closed,
}

/// The real-time sink that decoded events are played through.
pub trait LiveOutput: Send {
    fn send(&mut self, message: &[u8; 3]) -> Result<(), OutputError>;
    fn close(&mut self);
}

/// Sends to the first MIDI output port the system offers.
pub struct MidiPortOutput {
    connection: Option<MidiOutputConnection>,
    port_name: String,
}

impl MidiPortOutput {
    pub fn open_first(client_name: &str) -> Result<Self, OutputError> {
        let midi_out = MidiOutput::new(client_name).map_err(|e| OutputError::Init(e.to_string()))?;

        let ports = midi_out.ports();
        let port = ports.first().ok_or(OutputError::NoPort)?;
        let port_name = midi_out
            .port_name(port)
            .map_err(|e| OutputError::Connect(e.to_string()))?;

        let connection = midi_out
            .connect(port, "bt10-output")
            .map_err(|e| OutputError::Connect(e.to_string()))?;

        info!("Opening midi port {} for sending...", port_name);

        Ok(Self {
            connection: Some(connection),
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl LiveOutput for MidiPortOutput {
    fn send(&mut self, message: &[u8; 3]) -> Result<(), OutputError> {
        let conn = self.connection.as_mut().ok_or(OutputError::Closed)?;
        conn.send(message)
            .map_err(|e| OutputError::Send(e.to_string()))
    }

    fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
            info!("Closed MIDI output: {}", self.port_name);
        }
    }
}

impl Drop for MidiPortOutput {
    fn drop(&mut self) {
        self.close();
    }
}
