use crate::{Error, Result};

/// Usable ID width. The sign bit of a 64-bit integer is always zero so IDs
/// survive a round trip through signed storage.
pub const ID_BITS: u8 = 63;

/// Default epoch: Thursday, February 1, 2018 00:00:00 UTC, in seconds.
pub const DEFAULT_EPOCH: u64 = 1_517_414_400;

/// Default width of the timestamp field (~136 years of seconds).
pub const DEFAULT_TIMESTAMP_BITS: u8 = 32;

/// Default width of the padding between the timestamp and worker fields.
pub const DEFAULT_PADDING_HIGH_BITS: u8 = 0;

/// Default width of the worker ID field (4096 workers).
pub const DEFAULT_WORKER_ID_BITS: u8 = 12;

/// Default width of the padding between the worker and sequence fields.
pub const DEFAULT_PADDING_LOW_BITS: u8 = 0;

/// Field widths and offsets of a second-resolution Snowflake-style ID.
///
/// From most to least significant bit:
///
/// ```text
/// 0 | timestamp | padding high | worker id | padding low | sequence
/// ```
///
/// The sequence takes whatever is left of the 63 usable bits. Padding bits
/// are always zero and reserve room for widening a neighbouring field later
/// without reshuffling existing IDs.
///
/// Clock resolution is one second, so a single worker can mint at most
/// `max_sequence() + 1` IDs per second before the generator has to wait for
/// the next tick. Size the sequence for the burst rate tolerated in one second.
///
/// # Example
///
/// ```
/// use leaseflake::BitLayout;
///
/// let layout = BitLayout::new(32, 0, 12, 0, 1_517_414_400).unwrap();
/// assert_eq!(layout.sequence_bits(), 19);
/// assert_eq!(layout.timestamp_shift(), 31);
///
/// let id = layout.compose(100, 5, 0);
/// assert_eq!(id, (100 << 31) | (5 << 19));
/// assert_eq!(layout.decode_timestamp(id), 1_517_414_400 + 100);
/// assert_eq!(layout.decode_worker(id), 5);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BitLayout {
    timestamp_bits: u8,
    padding_high_bits: u8,
    worker_id_bits: u8,
    padding_low_bits: u8,
    sequence_bits: u8,
    epoch: u64,
}

impl Default for BitLayout {
    /// 32-bit timestamp, 12-bit worker ID, 19-bit sequence, no padding, and
    /// [`DEFAULT_EPOCH`].
    fn default() -> Self {
        Self {
            timestamp_bits: DEFAULT_TIMESTAMP_BITS,
            padding_high_bits: DEFAULT_PADDING_HIGH_BITS,
            worker_id_bits: DEFAULT_WORKER_ID_BITS,
            padding_low_bits: DEFAULT_PADDING_LOW_BITS,
            sequence_bits: ID_BITS
                - DEFAULT_TIMESTAMP_BITS
                - DEFAULT_PADDING_HIGH_BITS
                - DEFAULT_WORKER_ID_BITS
                - DEFAULT_PADDING_LOW_BITS,
            epoch: DEFAULT_EPOCH,
        }
    }
}

impl BitLayout {
    /// Builds a layout from explicit field widths and an epoch in seconds
    /// since the Unix epoch. The sequence width is derived as
    /// `63 - (timestamp + padding_high + worker_id + padding_low)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] if the widths sum to more than 63 bits.
    pub fn new(
        timestamp_bits: u8,
        padding_high_bits: u8,
        worker_id_bits: u8,
        padding_low_bits: u8,
        epoch: u64,
    ) -> Result<Self> {
        let used = u16::from(timestamp_bits)
            + u16::from(padding_high_bits)
            + u16::from(worker_id_bits)
            + u16::from(padding_low_bits);

        let Some(sequence_bits) = u16::from(ID_BITS)
            .checked_sub(used)
            .and_then(|bits| u8::try_from(bits).ok())
        else {
            return Err(Error::InvalidLayout {
                reason: format!(
                    "timestamp ({timestamp_bits}) + padding high ({padding_high_bits}) + worker id \
                     ({worker_id_bits}) + padding low ({padding_low_bits}) = {used} bits exceeds \
                     {ID_BITS}"
                ),
            });
        };

        Ok(Self {
            timestamp_bits,
            padding_high_bits,
            worker_id_bits,
            padding_low_bits,
            sequence_bits,
            epoch,
        })
    }

    /// Returns a copy of this layout anchored at a different epoch.
    #[must_use]
    pub const fn with_epoch(self, epoch: u64) -> Self {
        Self { epoch, ..self }
    }

    pub const fn timestamp_bits(&self) -> u8 {
        self.timestamp_bits
    }

    pub const fn padding_high_bits(&self) -> u8 {
        self.padding_high_bits
    }

    pub const fn worker_id_bits(&self) -> u8 {
        self.worker_id_bits
    }

    pub const fn padding_low_bits(&self) -> u8 {
        self.padding_low_bits
    }

    pub const fn sequence_bits(&self) -> u8 {
        self.sequence_bits
    }

    /// Reference time origin, in seconds since the Unix epoch.
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    pub const fn max_timestamp(&self) -> u64 {
        max_at_bits(self.timestamp_bits)
    }

    pub const fn max_worker_id(&self) -> u64 {
        max_at_bits(self.worker_id_bits)
    }

    pub const fn max_sequence(&self) -> u64 {
        max_at_bits(self.sequence_bits)
    }

    /// Number of worker IDs the layout can address.
    pub const fn worker_pool_size(&self) -> u64 {
        self.max_worker_id() + 1
    }

    pub const fn worker_shift(&self) -> u8 {
        self.sequence_bits + self.padding_low_bits
    }

    pub const fn timestamp_shift(&self) -> u8 {
        self.worker_shift() + self.worker_id_bits + self.padding_high_bits
    }

    /// Checks that `worker_id` fits in the worker field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWorkerId`] if `worker_id > max_worker_id()`.
    pub fn check_worker_id(&self, worker_id: u64) -> Result<()> {
        if worker_id > self.max_worker_id() {
            return Err(Error::InvalidWorkerId {
                worker_id,
                max_worker_id: self.max_worker_id(),
            });
        }
        Ok(())
    }

    /// Packs already-validated components into an ID.
    ///
    /// `elapsed` is seconds since [`Self::epoch`]. Out-of-range components
    /// are masked to their field width.
    pub const fn compose(&self, elapsed: u64, worker_id: u64, sequence: u64) -> u64 {
        debug_assert!(elapsed <= self.max_timestamp(), "timestamp overflow");
        debug_assert!(worker_id <= self.max_worker_id(), "worker_id overflow");
        debug_assert!(sequence <= self.max_sequence(), "sequence overflow");

        ((elapsed & self.max_timestamp()) << self.timestamp_shift())
            | ((worker_id & self.max_worker_id()) << self.worker_shift())
            | (sequence & self.max_sequence())
    }

    /// Seconds since the layout epoch encoded in `id`.
    pub const fn decode_elapsed(&self, id: u64) -> u64 {
        (id >> self.timestamp_shift()) & self.max_timestamp()
    }

    /// Absolute timestamp encoded in `id`, in seconds since the Unix epoch.
    pub const fn decode_timestamp(&self, id: u64) -> u64 {
        self.decode_elapsed(id).saturating_add(self.epoch)
    }

    pub const fn decode_worker(&self, id: u64) -> u64 {
        (id >> self.worker_shift()) & self.max_worker_id()
    }

    pub const fn decode_sequence(&self, id: u64) -> u64 {
        id & self.max_sequence()
    }
}

/// Largest value representable in `bits` bits (`bits <= 63`).
const fn max_at_bits(bits: u8) -> u64 {
    (1_u64 << bits) - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_matches_documented_constants() {
        let layout = BitLayout::default();
        assert_eq!(
            layout,
            BitLayout::new(32, 0, 12, 0, DEFAULT_EPOCH).unwrap()
        );
        assert_eq!(layout.sequence_bits(), 19);
        assert_eq!(layout.max_worker_id(), 4095);
        assert_eq!(layout.max_sequence(), (1 << 19) - 1);
        assert_eq!(layout.worker_shift(), 19);
        assert_eq!(layout.timestamp_shift(), 31);
    }

    #[test]
    fn padding_moves_the_shifts() {
        let layout = BitLayout::new(30, 2, 10, 3, 0).unwrap();
        assert_eq!(layout.sequence_bits(), 18);
        assert_eq!(layout.worker_shift(), 21);
        assert_eq!(layout.timestamp_shift(), 33);

        let id = layout.compose(7, 1023, 5);
        assert_eq!(layout.decode_elapsed(id), 7);
        assert_eq!(layout.decode_worker(id), 1023);
        assert_eq!(layout.decode_sequence(id), 5);
        // padding bits stay clear
        assert_eq!(id & (0b111 << 18), 0);
        assert_eq!(id & (0b11 << 31), 0);
    }

    #[test]
    fn rejects_widths_over_63_bits() {
        let err = BitLayout::new(40, 0, 20, 4, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidLayout { .. }));

        let err = BitLayout::new(u8::MAX, u8::MAX, u8::MAX, u8::MAX, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidLayout { .. }));
    }

    #[test]
    fn zero_width_sequence_is_allowed() {
        let layout = BitLayout::new(41, 1, 21, 0, 0).unwrap();
        assert_eq!(layout.sequence_bits(), 0);
        assert_eq!(layout.max_sequence(), 0);
        assert_eq!(layout.worker_shift(), 0);
    }

    #[test]
    fn ids_never_touch_the_sign_bit() {
        let layout = BitLayout::default();
        let id = layout.compose(
            layout.max_timestamp(),
            layout.max_worker_id(),
            layout.max_sequence(),
        );
        assert_eq!(id, (1 << 63) - 1);
        assert!(i64::try_from(id).is_ok());
    }

    #[test]
    fn worker_id_bounds() {
        let layout = BitLayout::new(32, 0, 4, 0, 0).unwrap();
        assert!(layout.check_worker_id(15).is_ok());
        assert_eq!(
            layout.check_worker_id(16),
            Err(Error::InvalidWorkerId {
                worker_id: 16,
                max_worker_id: 15
            })
        );
    }

    #[test]
    fn decoders_are_total_on_foreign_bits() {
        let layout = BitLayout::new(32, 0, 12, 0, 10).unwrap();
        let id = u64::MAX;
        assert_eq!(layout.decode_elapsed(id), layout.max_timestamp());
        assert_eq!(layout.decode_timestamp(id), layout.max_timestamp() + 10);
        assert_eq!(layout.decode_worker(id), layout.max_worker_id());
        assert_eq!(layout.decode_sequence(id), layout.max_sequence());
    }
}
