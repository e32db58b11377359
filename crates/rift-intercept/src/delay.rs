//! Delay specifications for connection and response latency.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Simulated latency before a lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(untagged)]
pub enum Delay {
    #[default]
    #[serde(skip)]
    None,
    /// Fixed delay in milliseconds
    Fixed(u64),
    /// Random delay within an inclusive range
    Range {
        #[serde(rename = "min")]
        min_ms: u64,
        #[serde(rename = "max")]
        max_ms: u64,
    },
}

impl Delay {
    pub fn fixed(ms: u64) -> Self {
        if ms == 0 {
            Delay::None
        } else {
            Delay::Fixed(ms)
        }
    }

    pub fn range(min_ms: u64, max_ms: u64) -> Self {
        Delay::Range {
            min_ms: min_ms.min(max_ms),
            max_ms: min_ms.max(max_ms),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Delay::None | Delay::Fixed(0))
    }

    /// Sample the wait duration in milliseconds.
    pub fn get_duration_ms(&self) -> u64 {
        match self {
            Delay::None => 0,
            Delay::Fixed(ms) => *ms,
            Delay::Range { min_ms, max_ms } => {
                use rand::Rng;
                rand::thread_rng().gen_range(*min_ms..=*max_ms)
            }
        }
    }

    /// Sample the wait, or `None` when no wait applies.
    pub fn sample(&self) -> Option<Duration> {
        match self.get_duration_ms() {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl From<u64> for Delay {
    fn from(ms: u64) -> Self {
        Delay::fixed(ms)
    }
}

/// Sub-millisecond durations round up to one millisecond; only
/// `Duration::ZERO` means no delay.
impl From<Duration> for Delay {
    fn from(d: Duration) -> Self {
        let ms = d.as_nanos().div_ceil(1_000_000).min(u128::from(u64::MAX));
        Delay::fixed(ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_fixed() {
        assert_eq!(Delay::fixed(100).get_duration_ms(), 100);
        assert_eq!(Delay::fixed(100).sample(), Some(Duration::from_millis(100)));
        assert!(Delay::fixed(0).is_none());
        assert_eq!(Delay::None.sample(), None);
    }

    #[test]
    fn test_delay_from_duration_rounds_up() {
        assert_eq!(Delay::from(Duration::from_micros(500)), Delay::Fixed(1));
        assert_eq!(Delay::from(Duration::from_micros(1500)), Delay::Fixed(2));
        assert_eq!(Delay::from(Duration::from_millis(40)), Delay::Fixed(40));
        assert!(Delay::from(Duration::ZERO).is_none());
    }

    #[test]
    fn test_delay_range() {
        let delay = Delay::range(200, 100);
        assert_eq!(
            delay,
            Delay::Range {
                min_ms: 100,
                max_ms: 200
            }
        );
        for _ in 0..10 {
            assert!((100..=200).contains(&delay.get_duration_ms()));
        }
    }

    #[test]
    fn test_delay_serde() {
        let delay: Delay = serde_yaml::from_str("100").unwrap();
        assert_eq!(delay, Delay::Fixed(100));

        let delay: Delay = serde_yaml::from_str("min: 10\nmax: 20").unwrap();
        assert_eq!(
            delay,
            Delay::Range {
                min_ms: 10,
                max_ms: 20
            }
        );
    }
}
