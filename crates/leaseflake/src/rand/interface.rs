/// A trait for random sources used to pick a sequence start value.
///
/// This abstraction allows you to plug in a real random source or a mocked
/// random source in tests.
///
/// # Example
/// ```
/// use leaseflake::RandSource;
///
/// struct FixedRand;
/// impl RandSource for FixedRand {
///     fn rand_below(&self, upper: u64) -> u64 {
///         1234 % upper
///     }
/// }
///
/// let rng = FixedRand;
/// assert_eq!(rng.rand_below(1000), 234);
/// ```
pub trait RandSource {
    /// Returns an integer drawn uniformly from `[0, upper)`.
    ///
    /// Callers guarantee `upper > 0`.
    fn rand_below(&self, upper: u64) -> u64;
}
