use crate::transport::StopReason;
use serde::{Deserialize, Serialize};

pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const CONTROL_CHANGE: u8 = 0xB0;

/// One notification as it left the transport, stamped by the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPacket {
    /// Milliseconds since streaming started, host clock.
    pub arrival_ms: f64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineMessage {
    Packet(RawPacket),
    EndOfSession { elapsed_ms: f64, reason: StopReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NoteOn,
    NoteOff,
    Controller,
    Other(u8),
}

impl EventKind {
    pub fn from_status(status: u8) -> Self {
        match status & 0xF0 {
            NOTE_OFF => EventKind::NoteOff,
            NOTE_ON => EventKind::NoteOn,
            CONTROL_CHANGE => EventKind::Controller,
            other => EventKind::Other(other),
        }
    }
}

/// A single event group decoded from a payload, still on the packet-local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubEvent {
    pub local_clock: u32,
    pub channel: u8,
    pub kind: EventKind,
    pub data: [u8; 2],
}

impl SubEvent {
    /// Raw three byte message for the live output, channel forced to 0.
    pub fn live_message(&self) -> Option<[u8; 3]> {
        let status = match self.kind {
            EventKind::NoteOn => NOTE_ON,
            EventKind::NoteOff => NOTE_OFF,
            EventKind::Controller => CONTROL_CHANGE,
            EventKind::Other(_) => return None,
        };
        Some([status, self.data[0], self.data[1]])
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletedNote {
    pub onset_ms: f64,
    pub duration_ms: f64,
    pub pitch: u8,
    pub velocity: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerEvent {
    pub time_ms: f64,
    pub controller: u8,
    pub value: u8,
}

/// Work handed to the dispatcher. Every variant carries the live message so
/// nothing reaches the timeline without a live send.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Live([u8; 3]),
    Note { live: [u8; 3], note: CompletedNote },
    Controller { live: [u8; 3], event: ControllerEvent },
}
