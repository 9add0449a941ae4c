mod packet_clock;
mod session_clock;

pub use packet_clock::PacketClock;
pub use session_clock::{TimestampUnwrapper, HALF_WRAP_MS, WRAP_MS};
