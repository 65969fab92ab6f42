/// A trait for time sources that return a wall-clock timestamp.
///
/// This abstraction allows you to plug in the system clock, or a mocked time
/// source in tests.
///
/// The unit is **milliseconds since the Unix epoch**. The sequence generator
/// truncates it to whole seconds, while lease heartbeats keep the full
/// precision.
///
/// # Example
///
/// ```
/// use leaseflake::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1_517_414_400_000
///     }
/// }
///
/// let time = FixedTime;
/// assert_eq!(time.current_millis(), 1_517_414_400_000);
/// assert_eq!(time.current_secs(), 1_517_414_400);
/// ```
pub trait TimeSource {
    /// Returns the current time in milliseconds since the Unix epoch.
    fn current_millis(&self) -> u64;

    /// Returns the current time truncated to whole seconds.
    fn current_secs(&self) -> u64 {
        self.current_millis() / 1000
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for std::sync::Arc<T> {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}
