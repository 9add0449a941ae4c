//! Standard MIDI File output for a finished session.
//!
//! Positions come in as beats (quarter notes) and are quantised to
//! [TICKS_PER_QUARTER]. Track 0 holds the tempo, track 1 the performance.

use crate::timeline::{Timeline, ms_to_beats};
use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

pub const TICKS_PER_QUARTER: u16 = 960;

const MAX_DELTA: u32 = 0x0FFF_FFFF;
const MAX_TEMPO: u32 = 0x00FF_FFFF;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("failed to write MIDI file: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} bpm is too slow for a MIDI tempo event")]
    TempoOutOfRange(u32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct NoteEntry {
    channel: u8,
    pitch: u8,
    onset_beats: f64,
    duration_beats: f64,
    velocity: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ControllerEntry {
    channel: u8,
    time_beats: f64,
    controller: u8,
    value: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MidiFileWriter {
    track_name: String,
    bpm: u32,
    notes: Vec<NoteEntry>,
    controllers: Vec<ControllerEntry>,
}

impl MidiFileWriter {
    pub fn new(track_name: impl Into<String>, bpm: u32) -> Self {
        Self {
            track_name: track_name.into(),
            bpm,
            notes: Vec::new(),
            controllers: Vec::new(),
        }
    }

    /// Builds a file from a timeline kept in milliseconds. Everything lands on channel 0.
    pub fn from_timeline(track_name: impl Into<String>, bpm: u32, timeline: &Timeline) -> Self {
        let mut writer = Self::new(track_name, bpm);
        for note in &timeline.notes {
            writer.add_note(
                0,
                note.pitch,
                ms_to_beats(note.onset_ms, bpm),
                ms_to_beats(note.duration_ms, bpm),
                note.velocity,
            );
        }
        for cc in &timeline.controllers {
            writer.add_controller_event(0, ms_to_beats(cc.time_ms, bpm), cc.controller, cc.value);
        }
        writer
    }

    pub fn add_note(
        &mut self,
        channel: u8,
        pitch: u8,
        onset_beats: f64,
        duration_beats: f64,
        velocity: u8,
    ) {
        self.notes.push(NoteEntry {
            channel,
            pitch,
            onset_beats,
            duration_beats,
            velocity,
        });
    }

    pub fn add_controller_event(
        &mut self,
        channel: u8,
        time_beats: f64,
        controller: u8,
        value: u8,
    ) {
        self.controllers.push(ControllerEntry {
            channel,
            time_beats,
            controller,
            value,
        });
    }

    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    pub fn write_to<W: Write>(&self, out: W) -> Result<(), FileError> {
        self.to_smf()?.write_std(out)?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), FileError> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        self.write_to(&mut out)?;
        out.flush()?;
        Ok(())
    }

    fn to_smf(&self) -> Result<Smf<'_>, FileError> {
        let micros_per_quarter = match 60_000_000u32.checked_div(self.bpm) {
            Some(micros) if micros <= MAX_TEMPO => micros,
            _ => return Err(FileError::TempoOutOfRange(self.bpm)),
        };

        let header = Header::new(Format::Parallel, Timing::Metrical(u15::new(TICKS_PER_QUARTER)));
        let mut smf = Smf::new(header);

        smf.tracks.push(vec![
            meta(MetaMessage::Tempo(u24::new(micros_per_quarter))),
            meta(MetaMessage::EndOfTrack),
        ]);

        // (tick, rank, event); note-offs rank first so back-to-back notes of
        // the same pitch do not swallow each other.
        let mut timed: Vec<(u64, u8, TrackEventKind<'_>)> = Vec::new();
        for note in &self.notes {
            let on = beats_to_ticks(note.onset_beats);
            // a note always lasts at least one tick so its off follows its own on
            let off = on + beats_to_ticks(note.duration_beats).max(1);
            timed.push((
                on,
                2,
                midi(note.channel, MidiMessage::NoteOn {
                    key: u7::new(note.pitch & 0x7F),
                    vel: u7::new(note.velocity & 0x7F),
                }),
            ));
            timed.push((
                off,
                0,
                midi(note.channel, MidiMessage::NoteOff {
                    key: u7::new(note.pitch & 0x7F),
                    vel: u7::new(0),
                }),
            ));
        }
        for cc in &self.controllers {
            timed.push((
                beats_to_ticks(cc.time_beats),
                1,
                midi(cc.channel, MidiMessage::Controller {
                    controller: u7::new(cc.controller & 0x7F),
                    value: u7::new(cc.value & 0x7F),
                }),
            ));
        }
        timed.sort_by_key(|(tick, rank, _)| (*tick, *rank));

        let mut track = vec![meta(MetaMessage::TrackName(self.track_name.as_bytes()))];
        let mut last_tick = 0u64;
        for (tick, _, kind) in timed {
            let delta = (tick - last_tick).min(u64::from(MAX_DELTA)) as u32;
            track.push(TrackEvent {
                delta: u28::new(delta),
                kind,
            });
            last_tick = tick;
        }
        track.push(meta(MetaMessage::EndOfTrack));
        smf.tracks.push(track);

        Ok(smf)
    }
}

/// Negative positions (events before the file's zero) clamp to the start.
fn beats_to_ticks(beats: f64) -> u64 {
    (beats.max(0.0) * f64::from(TICKS_PER_QUARTER)).round() as u64
}

fn meta(message: MetaMessage<'_>) -> TrackEvent<'_> {
    TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(message),
    }
}

fn midi(channel: u8, message: MidiMessage) -> TrackEventKind<'static> {
    TrackEventKind::Midi {
        channel: u4::new(channel & 0x0F),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CompletedNote, ControllerEvent};

    fn absolute(track: &[TrackEvent<'_>]) -> Vec<(u32, TrackEventKind<'static>)> {
        let mut tick = 0;
        track
            .iter()
            .filter_map(|event| {
                tick += event.delta.as_int();
                match event.kind {
                    TrackEventKind::Midi { channel, message } => {
                        Some((tick, TrackEventKind::Midi { channel, message }))
                    }
                    _ => None,
                }
            })
            .collect()
    }

    #[test]
    fn writes_tempo_and_notes() {
        let mut writer = MidiFileWriter::new("Track1", 120);
        writer.add_note(0, 60, 2.0, 1.0, 100);
        writer.add_controller_event(0, 0.5, 64, 127);

        let mut bytes = Vec::new();
        writer.write_to(&mut bytes).unwrap();
        let smf = Smf::parse(&bytes).expect("written file should parse");

        assert_eq!(smf.header.format, Format::Parallel);
        assert_eq!(smf.header.timing, Timing::Metrical(u15::new(960)));
        assert_eq!(smf.tracks.len(), 2);
        assert!(smf.tracks[0].iter().any(|e| matches!(
            e.kind,
            TrackEventKind::Meta(MetaMessage::Tempo(t)) if t.as_int() == 500_000
        )));
        assert!(matches!(
            smf.tracks[1][0].kind,
            TrackEventKind::Meta(MetaMessage::TrackName(b"Track1"))
        ));

        let events = absolute(&smf.tracks[1]);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].0, 480);
        assert!(matches!(
            events[0].1,
            TrackEventKind::Midi { message: MidiMessage::Controller { controller, value }, .. }
                if controller.as_int() == 64 && value.as_int() == 127
        ));
        assert_eq!(events[1].0, 1920);
        assert!(matches!(
            events[1].1,
            TrackEventKind::Midi { message: MidiMessage::NoteOn { key, vel }, .. }
                if key.as_int() == 60 && vel.as_int() == 100
        ));
        assert_eq!(events[2].0, 2880);
        assert!(matches!(
            events[2].1,
            TrackEventKind::Midi { message: MidiMessage::NoteOff { .. }, .. }
        ));
    }

    #[test]
    fn note_off_sorts_before_note_on_on_same_tick() {
        let mut writer = MidiFileWriter::new("t", 120);
        writer.add_note(0, 60, 1.0, 1.0, 80);
        writer.add_note(0, 60, 0.0, 1.0, 80);

        let mut bytes = Vec::new();
        writer.write_to(&mut bytes).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        let events = absolute(&smf.tracks[1]);

        let at_960: Vec<bool> = events
            .iter()
            .filter(|(tick, _)| *tick == 960)
            .map(|(_, kind)| {
                matches!(kind, TrackEventKind::Midi { message: MidiMessage::NoteOff { .. }, .. })
            })
            .collect();
        assert_eq!(at_960, vec![true, false]);
    }

    #[test]
    fn zero_length_note_ends_after_it_starts() {
        let mut writer = MidiFileWriter::new("t", 120);
        writer.add_note(0, 60, 1.0, 0.0, 80);

        let mut bytes = Vec::new();
        writer.write_to(&mut bytes).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        let events = absolute(&smf.tracks[1]);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, 960);
        assert!(matches!(
            events[0].1,
            TrackEventKind::Midi { message: MidiMessage::NoteOn { key, vel }, .. }
                if key.as_int() == 60 && vel.as_int() == 80
        ));
        assert_eq!(events[1].0, 961);
        assert!(matches!(
            events[1].1,
            TrackEventKind::Midi { message: MidiMessage::NoteOff { key, .. }, .. }
                if key.as_int() == 60
        ));
    }

    #[test]
    fn slowest_tempo_that_fits_is_written_exactly() {
        let writer = MidiFileWriter::new("t", 4);
        let mut bytes = Vec::new();
        writer.write_to(&mut bytes).unwrap();
        let smf = Smf::parse(&bytes).unwrap();

        assert!(matches!(
            smf.tracks[0][0].kind,
            TrackEventKind::Meta(MetaMessage::Tempo(t)) if t.as_int() == 15_000_000
        ));
    }

    #[test]
    fn tempo_below_range_is_an_error() {
        for bpm in [0, 2, 3] {
            let writer = MidiFileWriter::new("t", bpm);
            let result = writer.write_to(Vec::new());
            assert!(
                matches!(result, Err(FileError::TempoOutOfRange(b)) if b == bpm),
                "bpm {bpm}"
            );
        }
    }

    #[test]
    fn negative_onsets_clamp_to_zero() {
        assert_eq!(beats_to_ticks(-0.25), 0);
        assert_eq!(beats_to_ticks(0.5), 480);
    }

    #[test]
    fn from_timeline_converts_with_tempo() {
        let timeline = Timeline {
            notes: vec![CompletedNote {
                onset_ms: 1000.0,
                duration_ms: 500.0,
                pitch: 64,
                velocity: 70,
            }],
            controllers: vec![ControllerEvent {
                time_ms: 250.0,
                controller: 1,
                value: 3,
            }],
        };
        let writer = MidiFileWriter::from_timeline("Take", 60, &timeline);
        assert_eq!(writer.notes[0].onset_beats, 1.0);
        assert_eq!(writer.notes[0].duration_beats, 0.5);
        assert_eq!(writer.controllers[0].time_beats, 0.25);
    }

    #[test]
    fn saves_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Track1.mid");
        let mut writer = MidiFileWriter::new("Track1", 90);
        writer.add_note(0, 48, 0.0, 4.0, 64);
        writer.save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"MThd");
        assert_eq!(writer.note_count(), 1);
    }
}
