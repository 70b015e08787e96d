//! Monte-Carlo truth label containers.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One Monte-Carlo particle contributing to a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct McLabel {
    /// Track id within the event.
    pub track_id: i32,
    /// Event id.
    pub event_id: i32,
    /// Simulation source id.
    pub source_id: i16,
    /// True if the association is fake.
    pub fake: bool,
    /// Share of the cluster charge from this particle.
    pub weight: f32,
}

impl McLabel {
    /// Creates a label with unit weight.
    #[must_use]
    pub fn new(track_id: i32, event_id: i32, source_id: i16) -> Self {
        Self {
            track_id,
            event_id,
            source_id,
            fake: false,
            weight: 1.0,
        }
    }

    /// Sets the weight.
    #[must_use]
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Marks the label as fake.
    #[must_use]
    pub fn into_fake(mut self) -> Self {
        self.fake = true;
        self
    }
}

/// Labels of one cluster before flattening.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClusterMcInterim {
    /// Contributing particles.
    pub labels: Vec<McLabel>,
    /// Offset of the first label relative to the start of the row.
    pub data_offset: u32,
}

impl ClusterMcInterim {
    /// Creates interim labels for one cluster.
    #[must_use]
    pub fn new(labels: Vec<McLabel>) -> Self {
        Self {
            labels,
            data_offset: 0,
        }
    }
}

/// Flattened labels of all clusters.
///
/// `header[i]` is the index in `data` of the first label of cluster `i`;
/// the labels of cluster `i` end where those of cluster `i + 1` begin.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinearLabels {
    /// Data offset per cluster.
    pub header: Vec<u32>,
    /// Concatenated labels.
    pub data: Vec<McLabel>,
}

impl LinearLabels {
    /// Creates empty arrays.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clusters.
    #[must_use]
    pub fn num_clusters(&self) -> usize {
        self.header.len()
    }

    /// Labels of cluster `cluster`, if it exists.
    #[must_use]
    pub fn labels(&self, cluster: usize) -> Option<&[McLabel]> {
        let start = usize::try_from(*self.header.get(cluster)?).ok()?;
        let end = match self.header.get(cluster + 1) {
            Some(&next) => usize::try_from(next).ok()?,
            None => self.data.len(),
        };
        self.data.get(start..end)
    }

    /// Clears both arrays.
    pub fn clear(&mut self) {
        self.header.clear();
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_lookup() {
        let labels = LinearLabels {
            header: vec![0, 2, 2],
            data: vec![
                McLabel::new(1, 0, 0),
                McLabel::new(2, 0, 0),
                McLabel::new(3, 0, 0).into_fake(),
            ],
        };
        assert_eq!(labels.num_clusters(), 3);
        assert_eq!(labels.labels(0).unwrap().len(), 2);
        assert!(labels.labels(1).unwrap().is_empty());
        assert!(labels.labels(2).unwrap()[0].fake);
        assert!(labels.labels(3).is_none());
    }
}
