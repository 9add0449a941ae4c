use crate::events::{CompletedNote, ControllerEvent};

/// Everything recorded during a session, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    pub notes: Vec<CompletedNote>,
    pub controllers: Vec<ControllerEvent>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_note(&mut self, note: CompletedNote) {
        self.notes.push(note);
    }

    pub fn push_controller(&mut self, event: ControllerEvent) {
        self.controllers.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.controllers.is_empty()
    }
}

/// Length of one quarter note in milliseconds.
pub fn quarter_ms(bpm: u32) -> f64 {
    60_000.0 / f64::from(bpm)
}

pub fn ms_to_beats(ms: f64, bpm: u32) -> f64 {
    ms / quarter_ms(bpm)
}
