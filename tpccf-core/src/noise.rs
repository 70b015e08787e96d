//! Per-pad noise flags.

use std::sync::atomic::{AtomicBool, Ordering};

/// One "is noisy" flag per global pad.
///
/// During a pass flags are only ever set, never cleared, so any number of
/// workers may mark pads concurrently in any order. Flags are cleared only
/// by [`PadNoiseFlags::reset`] between events.
#[derive(Debug, Default)]
pub struct PadNoiseFlags {
    flags: Vec<AtomicBool>,
}

impl PadNoiseFlags {
    /// Creates cleared flags for `num_pads` pads.
    #[must_use]
    pub fn new(num_pads: usize) -> Self {
        Self {
            flags: (0..num_pads).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Number of pads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Returns true if there are no pads.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Flags a pad as noisy. Returns true if it was not flagged before.
    ///
    /// Pads outside the table are ignored.
    #[inline]
    pub fn mark_noisy(&self, global_pad: usize) -> bool {
        self.flags
            .get(global_pad)
            .is_some_and(|flag| !flag.swap(true, Ordering::Relaxed))
    }

    /// Returns true if the pad is flagged noisy.
    #[inline]
    #[must_use]
    pub fn is_noisy(&self, global_pad: usize) -> bool {
        self.flags
            .get(global_pad)
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Number of flagged pads.
    #[must_use]
    pub fn count(&self) -> usize {
        self.flags
            .iter()
            .filter(|flag| flag.load(Ordering::Relaxed))
            .count()
    }

    /// Global indices of all flagged pads, ascending.
    #[must_use]
    pub fn noisy_pads(&self) -> Vec<usize> {
        self.flags
            .iter()
            .enumerate()
            .filter(|(_, flag)| flag.load(Ordering::Relaxed))
            .map(|(pad, _)| pad)
            .collect()
    }

    /// Clears every flag.
    pub fn reset(&mut self) {
        for flag in &mut self.flags {
            *flag.get_mut() = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_is_sticky() {
        let flags = PadNoiseFlags::new(4);
        assert!(flags.mark_noisy(2));
        assert!(!flags.mark_noisy(2));
        assert!(flags.is_noisy(2));
        assert!(!flags.is_noisy(1));
        assert_eq!(flags.noisy_pads(), vec![2]);
    }

    #[test]
    fn test_out_of_range_ignored() {
        let flags = PadNoiseFlags::new(2);
        assert!(!flags.mark_noisy(9));
        assert!(!flags.is_noisy(9));
        assert_eq!(flags.count(), 0);
    }

    #[test]
    fn test_reset() {
        let mut flags = PadNoiseFlags::new(3);
        flags.mark_noisy(0);
        flags.mark_noisy(1);
        flags.reset();
        assert_eq!(flags.count(), 0);
        assert_eq!(flags.len(), 3);
    }
}
