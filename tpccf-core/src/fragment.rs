//! Time fragments of an event.
//!
//! An event is processed in fragments of at most `max_length` time bins.
//! Consecutive fragments overlap by `2 * OVERLAP_TIME_BINS` so that every
//! cluster near a seam sees its full neighborhood in one of them. Only the
//! core range of a fragment (between the overlaps) is authoritative; the
//! core ranges of all fragments tile the event exactly once.

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of halo time bins on each inner side of a fragment.
pub const OVERLAP_TIME_BINS: u32 = 8;

/// A contiguous time-bin range of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CfFragment {
    index: u32,
    has_backlog: bool,
    has_future: bool,
    start: u32,
    length: u32,
    total_length: u32,
    max_length: u32,
}

impl CfFragment {
    /// Creates the first fragment of an event with `total_length` time bins.
    ///
    /// `max_length` must leave room for a core range between two overlaps.
    pub fn new(total_length: u32, max_length: u32) -> Result<Self> {
        if max_length <= 2 * OVERLAP_TIME_BINS {
            return Err(Error::InvalidFragment(format!(
                "maximum fragment length {max_length} must exceed {}",
                2 * OVERLAP_TIME_BINS
            )));
        }
        Ok(Self::at(0, false, 0, total_length, max_length))
    }

    fn at(index: u32, has_backlog: bool, start: u32, total_length: u32, max_length: u32) -> Self {
        let remainder = total_length.saturating_sub(start);
        let has_future = remainder > max_length;
        let length = if has_future { max_length } else { remainder };
        Self {
            index,
            has_backlog,
            has_future,
            start,
            length,
            total_length,
            max_length,
        }
    }

    /// Returns the fragment following this one.
    #[must_use]
    pub fn next(&self) -> Self {
        let overlap = if self.has_future {
            2 * OVERLAP_TIME_BINS
        } else {
            0
        };
        Self::at(
            self.index + 1,
            self.has_future,
            self.start + self.length - overlap,
            self.total_length,
            self.max_length,
        )
    }

    /// Position of this fragment within the event.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// True if a previous fragment overlaps the start of this one.
    #[must_use]
    pub fn has_backlog(&self) -> bool {
        self.has_backlog
    }

    /// True if a following fragment overlaps the end of this one.
    #[must_use]
    pub fn has_future(&self) -> bool {
        self.has_future
    }

    /// First global time bin of the fragment.
    #[must_use]
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Number of time bins in the fragment, overlaps included.
    #[must_use]
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Returns true past the last fragment of the event.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.length == 0
    }

    /// Maximum fragment length this event is split with.
    #[must_use]
    pub fn max_length(&self) -> u32 {
        self.max_length
    }

    /// Total number of time bins of the event.
    #[must_use]
    pub fn total_length(&self) -> u32 {
        self.total_length
    }

    /// First local time bin of the core range.
    #[must_use]
    pub fn first_non_overlap_time_bin(&self) -> u32 {
        if self.has_backlog {
            OVERLAP_TIME_BINS
        } else {
            0
        }
    }

    /// One past the last local time bin of the core range.
    #[must_use]
    pub fn last_non_overlap_time_bin(&self) -> u32 {
        let future = if self.has_future {
            OVERLAP_TIME_BINS
        } else {
            0
        };
        self.length.saturating_sub(future)
    }

    /// Number of time bins in the core range.
    #[must_use]
    pub fn length_without_overlap(&self) -> u32 {
        self.last_non_overlap_time_bin()
            .saturating_sub(self.first_non_overlap_time_bin())
    }

    /// Returns true if the global time bin lies in this fragment.
    #[must_use]
    pub fn contains(&self, global_time: u32) -> bool {
        global_time >= self.start && global_time - self.start < self.length
    }

    /// Converts a global time bin to a local one.
    #[must_use]
    pub fn to_local(&self, global_time: u32) -> Option<u32> {
        self.contains(global_time)
            .then(|| global_time - self.start)
    }

    /// Converts a local time bin to a global one.
    #[must_use]
    pub fn to_global(&self, local_time: u32) -> u32 {
        self.start + local_time
    }

    /// Returns true if the local time bin lies in the core range.
    #[must_use]
    pub fn is_core(&self, local_time: u32) -> bool {
        (self.first_non_overlap_time_bin()..self.last_non_overlap_time_bin()).contains(&local_time)
    }

    /// Iterates over this fragment and all following ones.
    #[must_use]
    pub fn iter(self) -> Fragments {
        Fragments { next: self }
    }
}

/// Iterator over the fragments of an event.
#[derive(Debug, Clone)]
pub struct Fragments {
    next: CfFragment,
}

impl Iterator for Fragments {
    type Item = CfFragment;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_end() {
            return None;
        }
        let current = self.next;
        self.next = current.next();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_fragment() {
        let fragment = CfFragment::new(100, 4000).unwrap();
        assert!(!fragment.has_backlog());
        assert!(!fragment.has_future());
        assert_eq!(fragment.length(), 100);
        assert_eq!(fragment.first_non_overlap_time_bin(), 0);
        assert_eq!(fragment.last_non_overlap_time_bin(), 100);
        assert!(fragment.next().is_end());
    }

    #[test]
    fn test_fragment_chain() {
        let fragments: Vec<_> = CfFragment::new(100, 40).unwrap().iter().collect();
        assert_eq!(fragments.len(), 4);

        assert_eq!(fragments[0].start(), 0);
        assert_eq!(fragments[0].length(), 40);
        assert_eq!(fragments[1].start(), 24);
        assert!(fragments[1].has_backlog());
        assert_eq!(fragments[2].start(), 48);
        assert_eq!(fragments[3].start(), 72);
        assert_eq!(fragments[3].length(), 28);
        assert!(!fragments[3].has_future());
        for (i, fragment) in fragments.iter().enumerate() {
            assert_eq!(fragment.index() as usize, i);
        }
    }

    #[test]
    fn test_core_ranges_tile_event() {
        let total = 1000;
        let mut covered = vec![0u32; total as usize];
        for fragment in CfFragment::new(total, 128).unwrap().iter() {
            for local in fragment.first_non_overlap_time_bin()..fragment.last_non_overlap_time_bin()
            {
                covered[fragment.to_global(local) as usize] += 1;
            }
        }
        assert!(covered.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_length_without_overlap() {
        let first = CfFragment::new(100, 40).unwrap();
        assert_eq!(first.length_without_overlap(), 32);
        assert_eq!(first.next().length_without_overlap(), 24);
    }

    #[test]
    fn test_local_global_conversion() {
        let fragment = CfFragment::new(100, 40).unwrap().next();
        assert_eq!(fragment.to_local(30), Some(6));
        assert_eq!(fragment.to_local(10), None);
        assert_eq!(fragment.to_local(64), None);
        assert_eq!(fragment.to_global(6), 30);
        assert!(fragment.is_core(8));
        assert!(!fragment.is_core(7));
        assert!(!fragment.is_core(32));
    }

    #[test]
    fn test_empty_event() {
        let fragment = CfFragment::new(0, 40).unwrap();
        assert!(fragment.is_end());
        assert_eq!(fragment.iter().count(), 0);
    }

    #[test]
    fn test_too_short_fragments_rejected() {
        assert!(matches!(
            CfFragment::new(100, 16),
            Err(Error::InvalidFragment(_))
        ));
    }
}
