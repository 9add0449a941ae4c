use crate::events::Dispatch;
use crate::output::LiveOutput;
use crate::timeline::Timeline;
use tracing::warn;

/// Plays events live and keeps the timeline that ends up on disk.
///
/// The live send always happens first; a failed send is logged and the
/// timeline entry is still kept.
pub struct Dispatcher {
    output: Box<dyn LiveOutput>,
    timeline: Timeline,
    failed_sends: usize,
}

impl Dispatcher {
    pub fn new(output: Box<dyn LiveOutput>) -> Self {
        Self {
            output,
            timeline: Timeline::new(),
            failed_sends: 0,
        }
    }

    pub fn dispatch(&mut self, item: Dispatch) {
        match item {
            Dispatch::Live(live) => self.send(&live),
            Dispatch::Note { live, note } => {
                self.send(&live);
                self.timeline.push_note(note);
            }
            Dispatch::Controller { live, event } => {
                self.send(&live);
                self.timeline.push_controller(event);
            }
        }
    }

    fn send(&mut self, message: &[u8; 3]) {
        if let Err(e) = self.output.send(message) {
            self.failed_sends += 1;
            warn!("live output dropped {:02X?}: {}", message, e);
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn failed_sends(&self) -> usize {
        self.failed_sends
    }

    /// Closes the live output and hands over the timeline.
    pub fn finish(mut self) -> Timeline {
        self.output.close();
        self.timeline
    }
}
