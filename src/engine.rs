use crate::capture::Capture;
use crate::config::{ConfigError, SessionConfig};
use crate::correlate::{NoteCorrelator, PendingNote};
use crate::decode::extract;
use crate::dispatch::Dispatcher;
use crate::events::{ControllerEvent, Dispatch, EventKind, PipelineMessage, RawPacket, SubEvent};
use crate::output::LiveOutput;
use crate::smf::{FileError, MidiFileWriter};
use crate::timeline::Timeline;
use crate::timing::TimestampUnwrapper;
use crate::transport::{DEVICE_NAME, NotificationFn, StopReason, Transport, TransportError};
use crossbeam::channel::{Receiver, Sender};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connected,
    Streaming,
    Draining,
    Closed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    File(#[from] FileError),
    #[error("producer exited without ending the session")]
    ProducerAborted,
    #[error("failed to start {0} thread: {1}")]
    Spawn(&'static str, std::io::Error),
    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub packets: usize,
    pub dropped_packets: usize,
    pub events: usize,
}

/// What the consumer holds when the end-of-session message arrives.
#[derive(Debug)]
pub struct SessionOutcome {
    pub timeline: Timeline,
    pub unmatched: Vec<PendingNote>,
    pub capture: Option<Capture>,
    pub stats: PipelineStats,
    pub failed_sends: usize,
    pub elapsed_ms: f64,
}

#[derive(Debug)]
pub struct SessionReport {
    pub state: SessionState,
    pub timeline: Timeline,
    pub unmatched_notes: usize,
    pub stats: PipelineStats,
    pub failed_sends: usize,
    pub elapsed_ms: f64,
    pub file: PathBuf,
    /// Every state the session passed through, in order.
    pub history: Vec<SessionState>,
    /// What ended the recording, when it ended through a session.
    pub stop_reason: Option<StopReason>,
}

/// Consumer-side state for one session: clock, pending notes and sinks.
pub struct Pipeline {
    clock: TimestampUnwrapper,
    correlator: NoteCorrelator,
    dispatcher: Dispatcher,
    capture: Option<Capture>,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(output: Box<dyn LiveOutput>) -> Self {
        Self {
            clock: TimestampUnwrapper::new(),
            correlator: NoteCorrelator::new(),
            dispatcher: Dispatcher::new(output),
            capture: None,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_capture(mut self, device: &str) -> Self {
        self.capture = Some(Capture::new(device));
        self
    }

    pub fn epoch_ms(&self) -> Option<f64> {
        self.clock.epoch_ms()
    }

    pub fn pending_notes(&self) -> usize {
        self.correlator.pending_count()
    }

    pub fn timeline(&self) -> &Timeline {
        self.dispatcher.timeline()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Decodes, correlates and dispatches every event in one packet.
    pub fn process(&mut self, packet: RawPacket) {
        debug!(
            "Received callback data at {}: {:02X?}",
            packet.arrival_ms, packet.payload
        );
        self.stats.packets += 1;

        match extract(&packet.payload) {
            Ok(events) => {
                for event in events {
                    let time_ms = self.clock.resolve(packet.arrival_ms, event.local_clock);
                    // only channel 0 is played and recorded
                    if event.channel != 0 {
                        continue;
                    }
                    self.handle(event, time_ms);
                }
            }
            Err(e) => {
                self.stats.dropped_packets += 1;
                info!("{}", e);
            }
        }

        if let Some(capture) = &mut self.capture {
            capture.packets.push(packet);
        }
    }

    fn handle(&mut self, event: SubEvent, time_ms: f64) {
        let [first, second] = event.data;
        let dispatch = match event.kind {
            EventKind::NoteOn => self.correlator.note_on(time_ms, first, second),
            EventKind::NoteOff => self.correlator.note_off(time_ms, first, second),
            EventKind::Controller => event.live_message().map(|live| Dispatch::Controller {
                live,
                event: ControllerEvent {
                    time_ms,
                    controller: first,
                    value: second,
                },
            }),
            EventKind::Other(_) => None,
        };

        if let Some(dispatch) = dispatch {
            self.stats.events += 1;
            self.dispatcher.dispatch(dispatch);
        }
    }

    /// Stops taking packets, closes the live output and gives up pending notes.
    pub fn drain(mut self, elapsed_ms: f64) -> SessionOutcome {
        let unmatched = self.correlator.drain_pending();
        if !unmatched.is_empty() {
            info!("{} unmatched note on", unmatched.len());
            for note in &unmatched {
                debug!(pitch = note.pitch, onset_ms = note.onset_ms, "dropping held note");
            }
        }

        let failed_sends = self.dispatcher.failed_sends();
        SessionOutcome {
            timeline: self.dispatcher.finish(),
            unmatched,
            capture: self.capture,
            stats: self.stats,
            failed_sends,
            elapsed_ms,
        }
    }

    /// Tears down without producing anything.
    pub fn abort(self) {
        self.dispatcher.finish();
    }
}

/// Writes the session's results. Only reached on a graceful end.
pub fn close_session(
    outcome: SessionOutcome,
    config: &SessionConfig,
) -> Result<SessionReport, SessionError> {
    let file = config.output_path();
    let writer = MidiFileWriter::from_timeline(&config.name, config.bpm, &outcome.timeline);
    writer.save(&file)?;
    info!(
        "wrote {} notes and {} controller events to {}",
        outcome.timeline.notes.len(),
        outcome.timeline.controllers.len(),
        file.display()
    );

    if let (Some(path), Some(capture)) = (&config.capture, &outcome.capture) {
        match capture.save(path) {
            Ok(()) => info!("saved {} raw packets to {}", capture.packets.len(), path.display()),
            Err(e) => error!("failed to save capture {}: {}", path.display(), e),
        }
    }

    Ok(SessionReport {
        state: SessionState::Closed,
        timeline: outcome.timeline,
        unmatched_notes: outcome.unmatched.len(),
        stats: outcome.stats,
        failed_sends: outcome.failed_sends,
        elapsed_ms: outcome.elapsed_ms,
        file,
        history: vec![SessionState::Draining, SessionState::Closed],
        stop_reason: None,
    })
}

/// One recording, from connecting to the device to writing the file.
pub struct Session {
    config: SessionConfig,
    history: Vec<SessionState>,
    stop_tx: Sender<StopReason>,
    stop_rx: Receiver<StopReason>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let (stop_tx, stop_rx) = crossbeam::channel::unbounded();
        Ok(Self {
            config,
            history: vec![SessionState::Idle],
            stop_tx,
            stop_rx,
        })
    }

    /// A handle the operator can use to end the recording.
    pub fn stopper(&self) -> Sender<StopReason> {
        self.stop_tx.clone()
    }

    fn enter(&mut self, state: SessionState) {
        debug!(from = ?self.history.last(), to = ?state, "session state");
        self.history.push(state);
    }

    pub fn run(
        mut self,
        mut transport: Box<dyn Transport>,
        output: Box<dyn LiveOutput>,
    ) -> Result<SessionReport, SessionError> {
        transport.connect()?;
        // a stop requested while still searching for the device does not end the take
        for stale in self.stop_rx.try_iter() {
            debug!(?stale, "ignoring stop request from before the connection");
        }
        self.enter(SessionState::Connected);
        info!("connected to {}, recording until stopped", DEVICE_NAME);

        let (packet_tx, packet_rx) = crossbeam::channel::unbounded();
        let mut pipeline = Pipeline::new(output);
        if self.config.capture.is_some() {
            pipeline = pipeline.with_capture(DEVICE_NAME);
        }

        let stop_tx = self.stop_tx.clone();
        let stop_rx = self.stop_rx.clone();
        let producer = std::thread::Builder::new()
            .name("producer".into())
            .spawn(move || produce(transport, packet_tx, stop_tx, stop_rx))
            .map_err(|e| SessionError::Spawn("producer", e))?;
        self.enter(SessionState::Streaming);

        let config = self.config.clone();
        let consumer = std::thread::Builder::new()
            .name("consumer".into())
            .spawn(move || consume(pipeline, packet_rx, &config))
            .map_err(|e| SessionError::Spawn("consumer", e))?;

        let report = consumer
            .join()
            .map_err(|_| SessionError::Panicked("consumer"))?;
        if producer.join().is_err() {
            error!("producer thread panicked");
        }

        let mut report = report?;
        for state in std::mem::take(&mut report.history) {
            self.enter(state);
        }
        report.history = self.history;
        info!("Main method done.");
        Ok(report)
    }
}

/// Stamps every notification with its arrival time and queues it.
///
/// `packets` is owned by this function, so the channel closes on every exit
/// path and the consumer can never wait forever.
fn produce(
    mut transport: Box<dyn Transport>,
    packets: Sender<PipelineMessage>,
    stop_tx: Sender<StopReason>,
    stop_rx: Receiver<StopReason>,
) {
    let started = Instant::now();
    let tx = packets.clone();
    let on_notification: NotificationFn = Box::new(move |payload| {
        let arrival_ms = started.elapsed().as_secs_f64() * 1000.0;
        let _ = tx.send(PipelineMessage::Packet(RawPacket {
            arrival_ms,
            payload,
        }));
    });

    if let Err(e) = transport.subscribe(on_notification, stop_tx) {
        error!("Unable to read from {}: {}", DEVICE_NAME, e);
        transport.disconnect();
        return;
    }
    info!("streaming notifications from {}", DEVICE_NAME);

    let reason = stop_rx.recv().unwrap_or(StopReason::TransportClosed);
    info!(?reason, "ending session");

    if let Err(e) = transport.unsubscribe() {
        error!("Unable to unsubscribe from {}: {}", DEVICE_NAME, e);
    }
    transport.disconnect();

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    if packets
        .send(PipelineMessage::EndOfSession { elapsed_ms, reason })
        .is_err()
    {
        warn!("consumer already gone");
    }
}

fn consume(
    mut pipeline: Pipeline,
    packets: Receiver<PipelineMessage>,
    config: &SessionConfig,
) -> Result<SessionReport, SessionError> {
    info!("Starting queue consumer");
    loop {
        match packets.recv() {
            Ok(PipelineMessage::Packet(packet)) => pipeline.process(packet),
            Ok(PipelineMessage::EndOfSession { elapsed_ms, reason }) => {
                info!("Got message from client about disconnection. Exiting consumer loop...");
                debug!(to = ?SessionState::Draining, ?reason, "session state");
                let outcome = pipeline.drain(elapsed_ms);
                let mut report = close_session(outcome, config)?;
                report.stop_reason = Some(reason);
                return Ok(report);
            }
            Err(crossbeam::channel::RecvError) => {
                error!("packet channel closed before the session ended, nothing written");
                pipeline.abort();
                return Err(SessionError::ProducerAborted);
            }
        }
    }
}
