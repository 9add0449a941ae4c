use crate::events::{EventKind, SubEvent};
use crate::timing::PacketClock;
use thiserror::Error;

/// Bytes per event group after the header byte.
pub const GROUP_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("cannot parse notification of {0} bytes")]
    MalformedLength(usize),
}

/// Lazily walks the event groups of one notification.
#[derive(Debug, Clone)]
pub struct SubEvents<'a> {
    groups: std::slice::ChunksExact<'a, u8>,
    clock: PacketClock,
}

/// Validates the payload length and returns an iterator over its events.
///
/// Nothing is decoded until the iterator is driven, so a rejected payload
/// never touches clock state.
pub fn extract(payload: &[u8]) -> Result<SubEvents<'_>, DecodeError> {
    let Some((&header, body)) = payload.split_first() else {
        return Err(DecodeError::MalformedLength(0));
    };
    if body.len() % GROUP_LEN != 0 {
        return Err(DecodeError::MalformedLength(payload.len()));
    }

    Ok(SubEvents {
        groups: body.chunks_exact(GROUP_LEN),
        clock: PacketClock::new(header),
    })
}

impl Iterator for SubEvents<'_> {
    type Item = SubEvent;

    fn next(&mut self) -> Option<SubEvent> {
        let group = self.groups.next()?;
        let local_clock = self.clock.advance(group[0]);
        let status = group[1];

        Some(SubEvent {
            local_clock,
            channel: status & 0x0F,
            kind: EventKind::from_status(status),
            data: [group[2], group[3]],
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.groups.size_hint()
    }
}

impl ExactSizeIterator for SubEvents<'_> {}
