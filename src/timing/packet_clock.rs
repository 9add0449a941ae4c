/// Rebuilds the device's 13-bit millisecond counter inside one packet.
///
/// The header carries the top 6 bits, every event group the bottom 7 bits.
/// A low field smaller than the one before it means the low field rolled
/// over, so the high field moves up by one. The value is not masked back to
/// 13 bits: a reading can run past 8191 near the end of a wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketClock {
    high: u32,
    prev_low: Option<u8>,
}

impl PacketClock {
    pub fn new(header: u8) -> Self {
        Self {
            high: u32::from(header & 0x3F),
            prev_low: None,
        }
    }

    pub fn advance(&mut self, low: u8) -> u32 {
        let low = low & 0x7F;
        if let Some(prev) = self.prev_low {
            if low < prev {
                self.high += 1;
            }
        }
        self.prev_low = Some(low);
        self.high << 7 | u32::from(low)
    }

    pub fn high(&self) -> u32 {
        self.high
    }
}
