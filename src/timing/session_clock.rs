use tracing::debug;

/// Period of the device counter.
pub const WRAP_MS: f64 = 8192.0;
pub const HALF_WRAP_MS: f64 = WRAP_MS / 2.0;

/// Turns packet-local clock readings into session-relative milliseconds.
///
/// The device counter is exact below one wrap but says nothing about which
/// wrap it is in; host arrival time picks the wrap. The epoch is the host
/// instant at which the device counter read zero, fixed on the first event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimestampUnwrapper {
    epoch_ms: Option<f64>,
    cycle: i64,
}

impl TimestampUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch_ms(&self) -> Option<f64> {
        self.epoch_ms
    }

    /// Wrap count used for the most recent timestamp.
    pub fn cycle(&self) -> i64 {
        self.cycle
    }

    pub fn resolve(&mut self, arrival_ms: f64, local_clock: u32) -> f64 {
        let local = f64::from(local_clock);
        let epoch = *self.epoch_ms.get_or_insert(arrival_ms - local);

        let since_epoch = arrival_ms - epoch;
        let mut cycle = since_epoch.div_euclid(WRAP_MS) as i64;
        let expected = since_epoch.rem_euclid(WRAP_MS);

        if (expected - local).abs() > HALF_WRAP_MS {
            debug!(
                cycle,
                expected, local_clock, "device clock and arrival time disagree on wrap"
            );
            if local > expected {
                cycle -= 1;
            } else {
                cycle += 1;
            }
        }

        self.cycle = cycle;
        epoch + WRAP_MS * cycle as f64 + local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_event_fixes_epoch() {
        let mut clock = TimestampUnwrapper::new();
        assert_eq!(clock.resolve(1000.0, 100), 1000.0);
        assert_eq!(clock.epoch_ms(), Some(900.0));

        // same packet, 1000ms later on the device
        assert_eq!(clock.resolve(1000.0, 1100), 2000.0);
        assert_eq!(clock.epoch_ms(), Some(900.0));
    }

    #[test]
    fn epoch_may_be_negative() {
        let mut clock = TimestampUnwrapper::new();
        assert_eq!(clock.resolve(50.0, 3000), 50.0);
        assert_eq!(clock.epoch_ms(), Some(-2950.0));
        assert_eq!(clock.resolve(1050.0, 4000), 1050.0);
    }

    #[test]
    fn late_arrival_after_device_wrap() {
        let mut clock = TimestampUnwrapper::new();
        clock.resolve(0.0, 0);
        // device wrapped to 10 but the packet landed just before the host wrap
        let t = clock.resolve(8150.0, 10);
        assert_eq!(t, 8192.0 + 10.0);
        assert_eq!(clock.cycle(), 1);
    }

    #[test]
    fn early_arrival_before_device_wrap() {
        let mut clock = TimestampUnwrapper::new();
        clock.resolve(0.0, 0);
        // device still at 8180 while the host already crossed the wrap
        let t = clock.resolve(8230.0, 8180);
        assert_eq!(t, 8180.0);
        assert_eq!(clock.cycle(), 0);
    }

    #[test]
    fn stays_monotonic_across_many_wraps() {
        // device runs 1234ms ahead of the host, arrivals carry 0..300ms latency
        let offset = 1234u64;
        let mut seed = 0x2545_F491u32;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed
        };

        let mut clock = TimestampUnwrapper::new();
        let mut true_ms = 0u64;
        let mut last = f64::MIN;
        for _ in 0..5000 {
            true_ms += u64::from(next() % 3000);
            let latency = f64::from(next() % 300);
            let local = ((true_ms + offset) % 8192) as u32;
            let t = clock.resolve(true_ms as f64 + latency, local);
            assert!(t >= last, "{t} went backwards from {last}");
            last = t;
        }
    }
}
