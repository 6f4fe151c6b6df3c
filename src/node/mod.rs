//! Sensor node: trigger detection, wake scheduling and delivery to the gateway.

pub mod debounce;
pub mod scheduler;
pub mod state;
pub mod transport;

use std::time::Duration;

/// Node-local monotonic milliseconds. Wraps; compare with `wrapping_sub`.
pub type Tick = u32;

pub(crate) fn ticks(duration: Duration) -> Tick {
    Tick::try_from(duration.as_millis()).unwrap_or(Tick::MAX)
}
