use crate::TimeSource;
use std::time::{SystemTime, UNIX_EPOCH};

/// A [`TimeSource`] backed by [`SystemTime`].
///
/// Unlike a monotonic timer this clock follows wall-clock adjustments, which
/// is what a cross-process ID scheme needs: timestamps from different hosts
/// must be comparable. A backward adjustment is detected by the generator and
/// reported as [`Error::ClockMovedBackward`] rather than hidden.
///
/// A system clock set before 1970 reads as zero.
///
/// [`Error::ClockMovedBackward`]: crate::Error::ClockMovedBackward
#[derive(Default, Clone, Copy, Debug)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
            })
    }
}
