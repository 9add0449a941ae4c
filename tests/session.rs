use bt10_recorder::transport::NotificationFn;
use bt10_recorder::{
    LiveOutput, OutputError, Session, SessionConfig, SessionError, SessionState, StopReason,
    Transport, TransportError,
};
use crossbeam::channel::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Feeds fixed payloads, then reports the link as gone.
struct ScriptedTransport {
    payloads: Vec<Vec<u8>>,
    fail_connect: bool,
    fail_subscribe: bool,
    worker: Option<JoinHandle<()>>,
}

impl ScriptedTransport {
    fn new(payloads: Vec<Vec<u8>>) -> Self {
        Self {
            payloads,
            fail_connect: false,
            fail_subscribe: false,
            worker: None,
        }
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.fail_connect {
            return Err(TransportError::DeviceNotFound("WU-BT10 MIDI".into()));
        }
        Ok(())
    }

    fn subscribe(
        &mut self,
        mut on_notification: NotificationFn,
        stop: Sender<StopReason>,
    ) -> Result<(), TransportError> {
        if self.fail_subscribe {
            return Err(TransportError::Link("characteristic went away".into()));
        }
        let payloads = std::mem::take(&mut self.payloads);
        self.worker = Some(std::thread::spawn(move || {
            for payload in payloads {
                on_notification(payload);
            }
            let _ = stop.send(StopReason::TransportClosed);
        }));
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<(), TransportError> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        // teardown errors are logged, not fatal
        Err(TransportError::Link("already disconnected".into()))
    }
}

#[derive(Clone, Default)]
struct Recorder {
    sent: Arc<Mutex<Vec<[u8; 3]>>>,
    closed: Arc<Mutex<bool>>,
}

impl LiveOutput for Recorder {
    fn send(&mut self, message: &[u8; 3]) -> Result<(), OutputError> {
        self.sent.lock().unwrap().push(*message);
        Ok(())
    }

    fn close(&mut self) {
        *self.closed.lock().unwrap() = true;
    }
}

fn encode(groups: &[(u32, u8, u8, u8)]) -> Vec<u8> {
    let header = groups.first().map_or(0, |g| (g.0 >> 7) as u8 & 0x3F);
    let mut payload = vec![0x80 | header];
    for &(clock, status, d1, d2) in groups {
        payload.extend_from_slice(&[0x80 | (clock & 0x7F) as u8, status, d1, d2]);
    }
    payload
}

fn config(dir: &std::path::Path) -> SessionConfig {
    SessionConfig {
        name: "Track1".into(),
        output_dir: dir.to_path_buf(),
        capture: Some(dir.join("take.ron")),
        ..Default::default()
    }
}

#[test]
fn records_a_take_and_drops_held_notes() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![
        encode(&[(100, 0x90, 60, 100)]),
        encode(&[(1100, 0x80, 60, 0)]),
        vec![0x80, 0x80],
        encode(&[(1200, 0x90, 64, 90), (1210, 0x90, 67, 90), (1220, 0xB0, 64, 127)]),
    ]);
    let output = Recorder::default();

    let session = Session::new(config(dir.path())).unwrap();
    let report = session
        .run(Box::new(transport), Box::new(output.clone()))
        .unwrap();

    assert_eq!(report.state, SessionState::Closed);
    assert_eq!(
        report.history,
        vec![
            SessionState::Idle,
            SessionState::Connected,
            SessionState::Streaming,
            SessionState::Draining,
            SessionState::Closed
        ]
    );
    assert_eq!(report.stop_reason, Some(StopReason::TransportClosed));
    assert_eq!(report.stats.packets, 4);
    assert_eq!(report.stats.dropped_packets, 1);
    assert_eq!(report.unmatched_notes, 2);
    assert_eq!(report.timeline.notes.len(), 1);
    assert_eq!(report.timeline.notes[0].pitch, 60);
    assert_eq!(report.timeline.notes[0].velocity, 100);
    assert!((report.timeline.notes[0].duration_ms - 1000.0).abs() < 1e-6);
    assert_eq!(report.timeline.controllers.len(), 1);

    assert_eq!(
        *output.sent.lock().unwrap(),
        vec![
            [0x90, 60, 100],
            [0x80, 60, 0],
            [0x90, 64, 90],
            [0x90, 67, 90],
            [0xB0, 64, 127]
        ]
    );
    assert!(*output.closed.lock().unwrap());

    let bytes = std::fs::read(dir.path().join("Track1.mid")).unwrap();
    let smf = midly::Smf::parse(&bytes).unwrap();
    let note_ons = smf.tracks[1]
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                midly::TrackEventKind::Midi {
                    message: midly::MidiMessage::NoteOn { .. },
                    ..
                }
            )
        })
        .count();
    assert_eq!(note_ons, 1);

    let capture = bt10_recorder::Capture::load(&dir.path().join("take.ron")).unwrap();
    assert_eq!(capture.packets.len(), 4);
}

#[test]
fn stop_requested_before_connecting_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![
        encode(&[(100, 0x90, 60, 100)]),
        encode(&[(600, 0x80, 60, 0)]),
    ]);

    let session = Session::new(config(dir.path())).unwrap();
    session.stopper().send(StopReason::Operator).unwrap();
    let report = session
        .run(Box::new(transport), Box::new(Recorder::default()))
        .unwrap();

    assert_eq!(report.stop_reason, Some(StopReason::TransportClosed));
    assert_eq!(report.timeline.notes.len(), 1);
}

#[test]
fn missing_device_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut transport = ScriptedTransport::new(vec![]);
    transport.fail_connect = true;

    let session = Session::new(config(dir.path())).unwrap();
    let err = session
        .run(Box::new(transport), Box::new(Recorder::default()))
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Transport(TransportError::DeviceNotFound(_))
    ));
    assert!(!dir.path().join("Track1.mid").exists());
}

#[test]
fn failed_subscribe_does_not_hang_consumer() {
    let dir = tempfile::tempdir().unwrap();
    let mut transport = ScriptedTransport::new(vec![encode(&[(0, 0x90, 60, 1)])]);
    transport.fail_subscribe = true;
    let output = Recorder::default();

    let session = Session::new(config(dir.path())).unwrap();
    let err = session
        .run(Box::new(transport), Box::new(output.clone()))
        .unwrap_err();

    assert!(matches!(err, SessionError::ProducerAborted));
    assert!(*output.closed.lock().unwrap());
    assert!(!dir.path().join("Track1.mid").exists());
}

#[test]
fn rejects_tempo_too_slow_for_a_midi_file() {
    let config = SessionConfig {
        bpm: 3,
        ..Default::default()
    };
    assert!(matches!(Session::new(config), Err(SessionError::Config(_))));
}
