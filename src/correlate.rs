use crate::events::{CompletedNote, Dispatch, NOTE_OFF, NOTE_ON};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingNote {
    pub onset_ms: f64,
    pub pitch: u8,
    pub velocity: u8,
}

/// Pairs note-ons with the next note-off of the same pitch.
///
/// A pitch can only be pending once: a second note-on is dropped rather than
/// stacked, so a map keyed by pitch gives the same answer as scanning the
/// pending notes in arrival order.
#[derive(Debug, Default)]
pub struct NoteCorrelator {
    pending: HashMap<u8, PendingNote>,
}

impl NoteCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, pitch: u8) -> bool {
        self.pending.contains_key(&pitch)
    }

    pub fn note_on(&mut self, time_ms: f64, pitch: u8, velocity: u8) -> Option<Dispatch> {
        if let Some(held) = self.pending.get(&pitch) {
            info!(
                "Dup note on {} at T:{} - {} V: {} - {}",
                pitch, held.onset_ms, time_ms, held.velocity, velocity
            );
            return None;
        }

        self.pending.insert(
            pitch,
            PendingNote {
                onset_ms: time_ms,
                pitch,
                velocity,
            },
        );
        Some(Dispatch::Live([NOTE_ON, pitch, velocity]))
    }

    pub fn note_off(&mut self, time_ms: f64, pitch: u8, velocity: u8) -> Option<Dispatch> {
        let Some(onset) = self.pending.remove(&pitch) else {
            info!("Unmatched note off {} at {}", pitch, time_ms);
            return None;
        };

        let mut duration_ms = time_ms - onset.onset_ms;
        if duration_ms < 0.0 {
            warn!(
                pitch,
                onset_ms = onset.onset_ms,
                time_ms,
                "note off before its note on, clamping duration"
            );
            duration_ms = 0.0;
        }

        Some(Dispatch::Note {
            live: [NOTE_OFF, pitch, velocity],
            note: CompletedNote {
                onset_ms: onset.onset_ms,
                duration_ms,
                pitch,
                velocity: onset.velocity,
            },
        })
    }

    /// Abandons every outstanding note, oldest onset first.
    pub fn drain_pending(&mut self) -> Vec<PendingNote> {
        let mut notes: Vec<PendingNote> = self.pending.drain().map(|(_, note)| note).collect();
        notes.sort_by(|a, b| a.onset_ms.total_cmp(&b.onset_ms));
        notes
    }
}
