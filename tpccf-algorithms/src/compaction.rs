//! Stream compaction helpers.

use tpccf_core::{ChargePos, Error, Result};

/// Exclusive prefix sum of `counts`, starting at `start`.
///
/// Returns the offset of every entry and the running total after the last
/// one. The scan is ordered, so offsets are identical on every backend.
#[must_use]
pub fn exclusive_scan(counts: &[u32], start: u32) -> (Vec<u32>, u32) {
    let mut total = start;
    let offsets = counts
        .iter()
        .map(|&count| {
            let offset = total;
            total += count;
            offset
        })
        .collect();
    (offsets, total)
}

/// Keeps the positions whose predicate is set, in input order.
pub fn compact_peaks(positions: &[ChargePos], predicate: &[bool]) -> Result<Vec<ChargePos>> {
    if predicate.len() != positions.len() {
        return Err(Error::GeometryMismatch {
            what: "peak predicate",
            expected: positions.len(),
            actual: predicate.len(),
        });
    }
    let flags: Vec<u32> = predicate.iter().map(|&p| u32::from(p)).collect();
    let (offsets, total) = exclusive_scan(&flags, 0);
    let mut peaks = vec![ChargePos::invalid(); total as usize];
    for ((pos, &keep), &offset) in positions.iter().zip(predicate).zip(&offsets) {
        if keep {
            peaks[offset as usize] = *pos;
        }
    }
    Ok(peaks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_scan() {
        let (offsets, total) = exclusive_scan(&[3, 0, 1], 0);
        assert_eq!(offsets, vec![0, 3, 3]);
        assert_eq!(total, 4);

        let (offsets, total) = exclusive_scan(&[2, 2], 10);
        assert_eq!(offsets, vec![10, 12]);
        assert_eq!(total, 14);

        let (offsets, total) = exclusive_scan(&[], 5);
        assert!(offsets.is_empty());
        assert_eq!(total, 5);
    }

    #[test]
    fn test_compact_keeps_order() {
        let positions: Vec<_> = (0..5).map(|t| ChargePos::new(0, 1, t)).collect();
        let peaks = compact_peaks(&positions, &[false, true, false, true, true]).unwrap();
        assert_eq!(peaks, vec![positions[1], positions[3], positions[4]]);
    }

    #[test]
    fn test_compact_length_mismatch() {
        let positions = vec![ChargePos::new(0, 0, 0)];
        assert!(compact_peaks(&positions, &[]).is_err());
    }
}
