//! Priority keys and the series/niceness priority factory
//!
//! Queue items are ordered by a [`PriorityKey`]: first by tier (rushed items,
//! ordinary items, relaxed items), then by numeric priority (lower first),
//! then by submission sequence so equal priorities dispatch FIFO.
//!
//! [`SeriesClock`] turns a niceness and an optional series label into a
//! priority. Every series has its own serial counter; a series seen for the
//! first time starts at the highest serial of any existing series, so a new
//! series never jumps ahead of work that was queued before it. The priority
//! is `serial * (1 + ((niceness + 20) / 10)^2)`: a series with niceness
//! N + 10 is dequeued at roughly half the rate of one with niceness N.

use crate::error::QueueError;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;

/// Lowest allowed niceness (highest scheduling priority)
pub const MIN_NICENESS: i32 = -20;

/// Highest allowed niceness (lowest scheduling priority)
pub const MAX_NICENESS: i32 = 20;

/// Coarse ordering class of a queue item
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Runs before every ordinary item
    Next,
    /// Ordered by numeric priority
    Normal,
    /// Runs after every ordinary item
    Last,
}

/// Full ordering key of a queue item. Smaller keys dispatch first.
#[derive(Debug, Copy, Clone)]
pub struct PriorityKey {
    tier: Tier,
    priority: f64,
    seq: u64,
}

impl PriorityKey {
    /// Create a key
    pub fn new(tier: Tier, priority: f64, seq: u64) -> Self {
        Self {
            tier,
            priority,
            seq,
        }
    }

    /// Tier of the key
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Numeric priority (lower runs first)
    pub fn priority(&self) -> f64 {
        self.priority
    }

    /// Submission sequence number
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Ord for PriorityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tier
            .cmp(&other.tier)
            .then_with(|| self.priority.total_cmp(&other.priority))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for PriorityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PriorityKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PriorityKey {}

/// Check that a niceness is within -20..=20
pub fn validate_niceness(niceness: i32) -> Result<(), QueueError> {
    if (MIN_NICENESS..=MAX_NICENESS).contains(&niceness) {
        Ok(())
    } else {
        Err(QueueError::InvalidNiceness(niceness))
    }
}

/// Priority multiplier for a niceness: `1 + ((niceness + 20) / 10)^2`
pub fn niceness_factor(niceness: i32) -> f64 {
    let normalized = f64::from(niceness - MIN_NICENESS) / 10.0;
    1.0 + normalized * normalized
}

/// Serial counters for task series
///
/// `None` is the default series and is tracked like any other. One entry is
/// kept per label ever seen until it is dropped with
/// [`forget`](Self::forget).
#[derive(Debug, Default)]
pub struct SeriesClock {
    serials: FxHashMap<Option<String>, u64>,
}

impl SeriesClock {
    /// Create a clock with no series
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the serial number of `series`
    pub fn next_serial(&mut self, series: Option<&str>) -> u64 {
        let key = series.map(str::to_owned);
        if !self.serials.contains_key(&key) {
            let start = self.serials.values().copied().max().unwrap_or(0);
            self.serials.insert(key.clone(), start);
        }
        let serial = self.serials.entry(key).or_insert(0);
        *serial += 1;
        *serial
    }

    /// Priority for the next task of `series` at `niceness`
    pub fn priority(&mut self, niceness: i32, series: Option<&str>) -> Result<f64, QueueError> {
        validate_niceness(niceness)?;
        let serial = self.next_serial(series);
        Ok(serial as f64 * niceness_factor(niceness))
    }

    /// Drop the serial of `series`. Its next call starts over like a new series.
    ///
    /// Returns `false` if the series was not tracked.
    pub fn forget(&mut self, series: &str) -> bool {
        self.serials.remove(&Some(series.to_owned())).is_some()
    }

    /// Number of series currently tracked
    pub fn series_count(&self) -> usize {
        self.serials.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        let next = PriorityKey::new(Tier::Next, 100.0, 5);
        let low = PriorityKey::new(Tier::Normal, 1.0, 9);
        let high = PriorityKey::new(Tier::Normal, 2.0, 0);
        let last = PriorityKey::new(Tier::Last, -5.0, 1);

        let mut keys = vec![last, high, low, next];
        keys.sort();
        assert_eq!(
            keys.iter().map(|k| k.seq()).collect::<Vec<_>>(),
            vec![5, 9, 0, 1]
        );
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let a = PriorityKey::new(Tier::Normal, 3.0, 1);
        let b = PriorityKey::new(Tier::Normal, 3.0, 2);
        assert!(a < b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_niceness_bounds() {
        assert!(validate_niceness(-20).is_ok());
        assert!(validate_niceness(20).is_ok());
        assert!(matches!(
            validate_niceness(21),
            Err(QueueError::InvalidNiceness(21))
        ));
        assert!(matches!(
            validate_niceness(-21),
            Err(QueueError::InvalidNiceness(-21))
        ));
    }

    #[test]
    fn test_niceness_factor() {
        assert_eq!(niceness_factor(-20), 1.0);
        assert_eq!(niceness_factor(0), 5.0);
        assert_eq!(niceness_factor(20), 17.0);
    }

    #[test]
    fn test_series_serials() {
        let mut clock = SeriesClock::new();
        assert_eq!(clock.next_serial(Some("a")), 1);
        assert_eq!(clock.next_serial(Some("a")), 2);
        assert_eq!(clock.next_serial(Some("a")), 3);

        // New series starts after the highest existing serial
        assert_eq!(clock.next_serial(Some("b")), 4);
        assert_eq!(clock.next_serial(Some("a")), 4);
        assert_eq!(clock.next_serial(None), 5);
        assert_eq!(clock.series_count(), 3);
    }

    #[test]
    fn test_forget_series() {
        let mut clock = SeriesClock::new();
        for _ in 0..3 {
            clock.next_serial(Some("a"));
        }
        clock.next_serial(Some("b"));
        assert_eq!(clock.series_count(), 2);

        assert!(clock.forget("a"));
        assert!(!clock.forget("a"));
        assert_eq!(clock.series_count(), 1);

        // Restarts after the highest remaining serial
        assert_eq!(clock.next_serial(Some("a")), 5);
        assert_eq!(clock.series_count(), 2);
    }

    #[test]
    fn test_priority_formula() {
        let mut clock = SeriesClock::new();
        assert_eq!(clock.priority(0, None).unwrap(), 5.0);
        assert_eq!(clock.priority(0, None).unwrap(), 10.0);
        assert!(clock.priority(30, None).is_err());
        // Rejected niceness does not advance the serial
        assert_eq!(clock.priority(-20, None).unwrap(), 3.0);
    }
}
