use core::{cmp::Ordering, time::Duration};
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    BitLayout, Error, RandSource, Result, SequenceStart, SystemClock, ThreadRandom, TimeSource,
    generator::{Mutex, MutexGuard},
};

/// Pause between clock polls while waiting out an exhausted tick.
pub const TICK_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Upper bound on clock polls while waiting out an exhausted tick, roughly
/// five seconds at [`TICK_POLL_INTERVAL`].
pub const MAX_TICK_POLLS: u32 = 5_000;

/// Mutable generator state. Only ever touched while holding the generator's
/// lock.
#[derive(Debug, Default)]
struct GeneratorState {
    /// Seconds since the Unix epoch of the last successful generation.
    last_timestamp: Option<u64>,
    sequence: u64,
}

/// A lock-based, second-resolution Snowflake-style ID generator.
///
/// Each ID packs `(seconds since epoch, worker id, sequence)` according to a
/// [`BitLayout`]. IDs from one generator are strictly increasing as long as
/// the clock does not regress, and IDs from generators with different worker
/// IDs never collide.
///
/// The state lives behind an [`Arc<Mutex<_>>`], so cloning the generator
/// yields a handle onto the same sequence and every clone can be shared
/// across threads. The critical section performs no I/O; the only wait inside
/// it is the tick rollover, where callers queue until the clock advances.
///
/// # Example
///
/// ```
/// use leaseflake::{BitLayout, SequenceGenerator, SequenceStart, SystemClock, ThreadRandom};
///
/// let generator = SequenceGenerator::new(
///     BitLayout::default(),
///     5,
///     SequenceStart::Fixed(0),
///     SystemClock,
///     ThreadRandom,
/// )
/// .unwrap();
///
/// let a = generator.generate().unwrap();
/// let b = generator.generate().unwrap();
/// assert!(a < b);
/// assert_eq!(generator.decode_worker(b), 5);
/// ```
pub struct SequenceGenerator<T = SystemClock, R = ThreadRandom>
where
    T: TimeSource,
    R: RandSource,
{
    #[cfg(feature = "cache-padded")]
    state: Arc<crossbeam_utils::CachePadded<Mutex<GeneratorState>>>,
    #[cfg(not(feature = "cache-padded"))]
    state: Arc<Mutex<GeneratorState>>,
    layout: BitLayout,
    worker_id: u64,
    start: SequenceStart,
    time: T,
    rng: R,
    pub(crate) max_tick_polls: u32,
}

impl SequenceGenerator {
    /// Creates a generator with the default layout, a sequence starting at
    /// zero, the system clock, and the thread-local RNG.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWorkerId`] if `worker_id` does not fit in the
    /// default 12-bit worker field.
    pub fn with_defaults(worker_id: u64) -> Result<Self> {
        Self::new(
            BitLayout::default(),
            worker_id,
            SequenceStart::default(),
            SystemClock,
            ThreadRandom,
        )
    }
}

impl<T, R> SequenceGenerator<T, R>
where
    T: TimeSource,
    R: RandSource,
{
    /// Creates a new generator for `worker_id`.
    ///
    /// # Parameters
    ///
    /// - `layout`: field widths and epoch shared by every generator that must
    ///   produce comparable IDs.
    /// - `worker_id`: the identity encoded into every ID, usually obtained
    ///   from a [`WorkerLeaseManager`].
    /// - `start`: where the sequence restarts on each new tick.
    /// - `time`: the [`TimeSource`] read on every call.
    /// - `rng`: the [`RandSource`] used by [`SequenceStart::Random`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidWorkerId`] if `worker_id > layout.max_worker_id()`
    /// - [`Error::InvalidSequenceStart`] if `start` does not fit the sequence
    ///   field
    ///
    /// [`WorkerLeaseManager`]: crate::WorkerLeaseManager
    pub fn new(
        layout: BitLayout,
        worker_id: u64,
        start: SequenceStart,
        time: T,
        rng: R,
    ) -> Result<Self> {
        layout.check_worker_id(worker_id)?;
        start.validate(&layout)?;

        let state = Mutex::new(GeneratorState::default());
        Ok(Self {
            #[cfg(feature = "cache-padded")]
            state: Arc::new(crossbeam_utils::CachePadded::new(state)),
            #[cfg(not(feature = "cache-padded"))]
            state: Arc::new(state),
            layout,
            worker_id,
            start,
            time,
            rng,
            max_tick_polls: MAX_TICK_POLLS,
        })
    }

    pub const fn worker_id(&self) -> u64 {
        self.worker_id
    }

    pub const fn layout(&self) -> &BitLayout {
        &self.layout
    }

    pub const fn time(&self) -> &T {
        &self.time
    }

    /// Generates the next ID.
    ///
    /// Within one tick the sequence increments; when it wraps, the call waits
    /// (holding the lock) until the clock reaches the next second. A new tick
    /// restarts the sequence according to the [`SequenceStart`] policy.
    ///
    /// # Errors
    ///
    /// - [`Error::ClockMovedBackward`] if the clock is behind the last
    ///   successful call. No ID is returned and the state is left unchanged.
    /// - [`Error::ClockBeforeEpoch`] / [`Error::TimestampOverflow`] if the
    ///   current second cannot be encoded in the layout.
    /// - [`Error::ClockStalled`] if the tick never advances while waiting.
    /// - [`Error::LockPoisoned`] if another thread panicked mid-generation
    ///   (std mutex only).
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self), fields(worker_id = self.worker_id)))]
    pub fn generate(&self) -> Result<u64> {
        let mut state = self.lock_state()?;
        let now = self.time.current_secs();

        let (now, sequence) = match state.last_timestamp {
            Some(last) => match now.cmp(&last) {
                Ordering::Less => return Err(Self::cold_clock_behind(last, now)),
                Ordering::Equal => {
                    let sequence = (state.sequence + 1) & self.layout.max_sequence();
                    if sequence == 0 {
                        (self.next_tick(last)?, self.start.next_start(&self.rng))
                    } else {
                        (now, sequence)
                    }
                }
                Ordering::Greater => (now, self.start.next_start(&self.rng)),
            },
            None => (now, self.start.next_start(&self.rng)),
        };

        let elapsed = self.elapsed_since_epoch(now)?;
        state.last_timestamp = Some(now);
        state.sequence = sequence;

        Ok(self.layout.compose(elapsed, self.worker_id, sequence))
    }

    /// Absolute timestamp of `id`, in seconds since the Unix epoch.
    pub const fn decode_timestamp(&self, id: u64) -> u64 {
        self.layout.decode_timestamp(id)
    }

    pub const fn decode_worker(&self, id: u64) -> u64 {
        self.layout.decode_worker(id)
    }

    pub const fn decode_sequence(&self, id: u64) -> u64 {
        self.layout.decode_sequence(id)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, GeneratorState>> {
        #[cfg(feature = "parking-lot")]
        {
            Ok(self.state.lock())
        }
        #[cfg(not(feature = "parking-lot"))]
        {
            Ok(self.state.lock()?)
        }
    }

    /// Polls the clock until it moves past `last`.
    ///
    /// With a one-second tick the wait is short, so a sleep-and-poll loop is
    /// cheaper than anything smarter. Sleeping between polls keeps it from
    /// pegging a core.
    fn next_tick(&self, last: u64) -> Result<u64> {
        for _ in 0..self.max_tick_polls {
            std::thread::sleep(TICK_POLL_INTERVAL);
            let now = self.time.current_secs();
            match now.cmp(&last) {
                Ordering::Greater => return Ok(now),
                Ordering::Less => return Err(Self::cold_clock_behind(last, now)),
                Ordering::Equal => {}
            }
        }

        #[cfg(feature = "tracing")]
        tracing::error!(last, "clock did not advance while waiting for the next tick");
        Err(Error::ClockStalled { last })
    }

    fn elapsed_since_epoch(&self, now: u64) -> Result<u64> {
        let epoch = self.layout.epoch();
        let Some(elapsed) = now.checked_sub(epoch) else {
            return Err(Error::ClockBeforeEpoch { now, epoch });
        };
        let max = self.layout.max_timestamp();
        if elapsed > max {
            return Err(Error::TimestampOverflow { elapsed, max });
        }
        Ok(elapsed)
    }

    #[cold]
    #[inline(never)]
    fn cold_clock_behind(last: u64, now: u64) -> Error {
        #[cfg(feature = "tracing")]
        tracing::error!(last, now, "clock moved backwards");
        Error::ClockMovedBackward { last, now }
    }
}

impl<T, R> Clone for SequenceGenerator<T, R>
where
    T: TimeSource + Clone,
    R: RandSource + Clone,
{
    /// Returns a handle sharing the same sequence state.
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            layout: self.layout,
            worker_id: self.worker_id,
            start: self.start,
            time: self.time.clone(),
            rng: self.rng.clone(),
            max_tick_polls: self.max_tick_polls,
        }
    }
}

impl<T, R> core::fmt::Debug for SequenceGenerator<T, R>
where
    T: TimeSource,
    R: RandSource,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SequenceGenerator")
            .field("layout", &self.layout)
            .field("worker_id", &self.worker_id)
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}
