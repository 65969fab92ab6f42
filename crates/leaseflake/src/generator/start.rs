use crate::{BitLayout, Error, RandSource, Result};

/// How the sequence counter is reset when the clock moves to a new tick.
///
/// A randomized start lowers the odds of two generators colliding if they
/// briefly share a worker ID during a lease race, and keeps low sequence
/// values from being predictable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SequenceStart {
    /// Every tick starts counting at this value.
    Fixed(u64),
    /// Every tick starts at a value drawn uniformly from `[0, range)`.
    Random {
        /// Exclusive upper bound of the start value.
        range: u64,
    },
}

impl Default for SequenceStart {
    fn default() -> Self {
        Self::Fixed(0)
    }
}

impl SequenceStart {
    /// Maps a `random_sequence_start_range` setting to a policy: `0` disables
    /// randomization and starts every tick at zero.
    pub const fn from_random_range(range: u64) -> Self {
        if range == 0 {
            Self::Fixed(0)
        } else {
            Self::Random { range }
        }
    }

    /// Maps a `(range, randomize)` pair: randomized draws from `[0, range)`,
    /// otherwise every tick starts at `range` itself.
    pub const fn from_range(range: u64, randomize: bool) -> Self {
        if randomize {
            Self::from_random_range(range)
        } else {
            Self::Fixed(range)
        }
    }

    /// Checks that every start value this policy can produce fits in the
    /// layout's sequence field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSequenceStart`] if a fixed start exceeds the
    /// maximum sequence, or if a random range is empty or wider than the
    /// sequence space.
    pub fn validate(&self, layout: &BitLayout) -> Result<()> {
        let max_sequence = layout.max_sequence();
        match *self {
            Self::Fixed(start) if start > max_sequence => Err(Error::InvalidSequenceStart {
                reason: format!("fixed start {start} exceeds max sequence {max_sequence}"),
            }),
            Self::Random { range: 0 } => Err(Error::InvalidSequenceStart {
                reason: "random start range must be at least 1".to_string(),
            }),
            Self::Random { range } if range - 1 > max_sequence => {
                Err(Error::InvalidSequenceStart {
                    reason: format!(
                        "random start range {range} exceeds sequence space of {}",
                        max_sequence + 1
                    ),
                })
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn next_start(&self, rng: &impl RandSource) -> u64 {
        match *self {
            Self::Fixed(start) => start,
            Self::Random { range } => rng.rand_below(range),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_range_disables_randomization() {
        assert_eq!(SequenceStart::from_random_range(0), SequenceStart::Fixed(0));
        assert_eq!(
            SequenceStart::from_random_range(16),
            SequenceStart::Random { range: 16 }
        );
    }

    #[test]
    fn non_random_range_is_a_fixed_start() {
        assert_eq!(SequenceStart::from_range(5, false), SequenceStart::Fixed(5));
        assert_eq!(
            SequenceStart::from_range(5, true),
            SequenceStart::Random { range: 5 }
        );
        assert_eq!(SequenceStart::from_range(0, true), SequenceStart::Fixed(0));
    }

    #[test]
    fn validates_against_the_sequence_field() {
        // 3 sequence bits
        let layout = BitLayout::new(32, 0, 28, 0, 0).unwrap();
        assert!(SequenceStart::Fixed(7).validate(&layout).is_ok());
        assert!(SequenceStart::Random { range: 8 }.validate(&layout).is_ok());

        for start in [
            SequenceStart::Fixed(8),
            SequenceStart::Random { range: 0 },
            SequenceStart::Random { range: 9 },
        ] {
            assert!(matches!(
                start.validate(&layout),
                Err(Error::InvalidSequenceStart { .. })
            ));
        }
    }
}
