//! Monte-Carlo label flattener.
//!
//! Clusters are found row by row, each with its own list of contributing
//! particles. The flattener turns those per-row lists into one
//! [`LinearLabels`] pair in three steps: offsets within every row, an
//! ordered prefix sum over rows that also grows the output, and a parallel
//! copy where every row writes a disjoint range.
#![allow(clippy::cast_possible_truncation)]

use log::debug;
use tpccf_core::{ClusterMcInterim, Error, LinearLabels, McLabel, Result};

use crate::compaction::exclusive_scan;
use crate::exec::Executor;
use crate::registry::KernelRegistry;

/// Interim labels of every cluster, grouped by row.
pub type McInterimLabels = Vec<Vec<ClusterMcInterim>>;

/// Output ranges of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowLabelOffsets {
    /// Number of clusters in the row.
    pub clusters_in_row: u32,
    /// Number of labels over all clusters of the row.
    pub labels_in_row: u32,
    /// Index of the row's first cluster in the header.
    pub header_offset: u32,
    /// Index of the row's first label in the data array.
    pub data_offset: u32,
}

struct RowJob<'a> {
    header: &'a mut [u32],
    data: &'a mut [McLabel],
    data_base: u32,
    clusters: &'a mut Vec<ClusterMcInterim>,
}

fn to_u32(value: usize, what: &'static str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::CapacityOverflow {
        what,
        needed: value,
        capacity: u32::MAX as usize,
    })
}

/// Flattens per-row interim labels into header and data arrays.
#[derive(Clone, Copy, Debug, Default)]
pub struct McLabelFlattener {
    executor: Executor,
}

impl McLabelFlattener {
    /// Kernel names in the registry, in execution order.
    pub const KERNELS: [&'static str; 3] = [
        "mc_labels_set_row_offsets",
        "mc_labels_set_global_offsets",
        "mc_labels_flatten",
    ];

    /// Creates the flattener and registers its kernels.
    pub fn new(executor: Executor, registry: &mut KernelRegistry) -> Self {
        for name in Self::KERNELS {
            registry.register(name, 1);
        }
        Self { executor }
    }

    /// Records every cluster's data offset relative to its row and returns
    /// the label count of every row.
    pub fn set_row_offsets(&self, rows: &mut [Vec<ClusterMcInterim>]) -> Result<Vec<u32>> {
        let total: usize = rows.iter().flatten().map(|c| c.labels.len()).sum();
        to_u32(total, "mc label data")?;

        self.executor.for_each_mut(rows, |_, clusters| {
            let mut offset = 0u32;
            for cluster in clusters.iter_mut() {
                cluster.data_offset = offset;
                offset += cluster.labels.len() as u32;
            }
        });

        Ok(rows
            .iter()
            .map(|clusters| {
                clusters
                    .last()
                    .map_or(0, |c| c.data_offset + c.labels.len() as u32)
            })
            .collect())
    }

    /// Assigns every row its global output ranges, starting after the data
    /// already in `out`, and grows `out` to hold them.
    pub fn set_global_offsets_and_allocate(
        &self,
        rows: &[Vec<ClusterMcInterim>],
        labels_in_row: &[u32],
        out: &mut LinearLabels,
    ) -> Result<Vec<RowLabelOffsets>> {
        if labels_in_row.len() != rows.len() {
            return Err(Error::Inconsistent(format!(
                "label counts for {} rows, but {} rows of clusters",
                labels_in_row.len(),
                rows.len()
            )));
        }
        let clusters_in_row = rows
            .iter()
            .map(|clusters| to_u32(clusters.len(), "mc label header"))
            .collect::<Result<Vec<_>>>()?;

        let header_start = to_u32(out.header.len(), "mc label header")?;
        let data_start = to_u32(out.data.len(), "mc label data")?;
        let (header_offsets, header_end) =
            checked_exclusive_scan(&clusters_in_row, header_start, "mc label header")?;
        let (data_offsets, data_end) =
            checked_exclusive_scan(labels_in_row, data_start, "mc label data")?;

        if header_end as usize > out.header.len() {
            out.header.resize(header_end as usize, 0);
        }
        if data_end as usize > out.data.len() {
            out.data.resize(data_end as usize, McLabel::default());
        }

        Ok((0..rows.len())
            .map(|row| RowLabelOffsets {
                clusters_in_row: clusters_in_row[row],
                labels_in_row: labels_in_row[row],
                header_offset: header_offsets[row],
                data_offset: data_offsets[row],
            })
            .collect())
    }

    /// Copies every row into its output range and releases the interim
    /// lists, leaving `rows` empty.
    pub fn flatten(
        &self,
        rows: &mut [Vec<ClusterMcInterim>],
        offsets: &[RowLabelOffsets],
        out: &mut LinearLabels,
    ) -> Result<()> {
        if offsets.len() != rows.len() {
            return Err(Error::Inconsistent(format!(
                "offsets for {} rows, but {} rows of clusters",
                offsets.len(),
                rows.len()
            )));
        }
        for (row, (clusters, offset)) in rows.iter().zip(offsets).enumerate() {
            check_row(row, clusters, offset, out)?;
        }

        let mut jobs = Vec::with_capacity(rows.len());
        let mut header_rest: &mut [u32] = &mut out.header;
        let mut data_rest: &mut [McLabel] = &mut out.data;
        let mut header_pos = 0usize;
        let mut data_pos = 0usize;
        for (row, (clusters, offset)) in rows.iter_mut().zip(offsets).enumerate() {
            let header_start = offset.header_offset as usize;
            let data_start = offset.data_offset as usize;
            if header_start < header_pos || data_start < data_pos {
                return Err(Error::Inconsistent(format!(
                    "output ranges of row {row} overlap the previous row"
                )));
            }
            let (_, tail) = std::mem::take(&mut header_rest).split_at_mut(header_start - header_pos);
            let (header, tail) = tail.split_at_mut(offset.clusters_in_row as usize);
            header_rest = tail;
            header_pos = header_start + header.len();

            let (_, tail) = std::mem::take(&mut data_rest).split_at_mut(data_start - data_pos);
            let (data, tail) = tail.split_at_mut(offset.labels_in_row as usize);
            data_rest = tail;
            data_pos = data_start + data.len();

            jobs.push(RowJob {
                header,
                data,
                data_base: offset.data_offset,
                clusters,
            });
        }

        self.executor.for_each_mut(&mut jobs, |_, job| {
            for (slot, cluster) in job.header.iter_mut().zip(job.clusters.iter_mut()) {
                *slot = job.data_base + cluster.data_offset;
                let start = cluster.data_offset as usize;
                if let Some(dst) = job.data.get_mut(start..start + cluster.labels.len()) {
                    dst.copy_from_slice(&cluster.labels);
                }
                *cluster = ClusterMcInterim::default();
            }
            *job.clusters = Vec::new();
        });

        debug!(
            "flattened mc labels of {} rows: {} clusters, {} labels",
            rows.len(),
            out.header.len(),
            out.data.len()
        );
        Ok(())
    }

    /// Runs all three steps, appending to `out`.
    pub fn run(&self, rows: &mut [Vec<ClusterMcInterim>], out: &mut LinearLabels) -> Result<()> {
        let labels_in_row = self.set_row_offsets(rows)?;
        let offsets = self.set_global_offsets_and_allocate(rows, &labels_in_row, out)?;
        self.flatten(rows, &offsets, out)
    }
}

/// Exclusive scan that fails instead of wrapping past `u32::MAX`.
fn checked_exclusive_scan(counts: &[u32], start: u32, what: &'static str) -> Result<(Vec<u32>, u32)> {
    let total = counts.iter().map(|&c| u64::from(c)).sum::<u64>() + u64::from(start);
    if total > u64::from(u32::MAX) {
        return Err(Error::CapacityOverflow {
            what,
            needed: usize::try_from(total).unwrap_or(usize::MAX),
            capacity: u32::MAX as usize,
        });
    }
    Ok(exclusive_scan(counts, start))
}

fn check_row(
    row: usize,
    clusters: &[ClusterMcInterim],
    offset: &RowLabelOffsets,
    out: &LinearLabels,
) -> Result<()> {
    if clusters.len() != offset.clusters_in_row as usize {
        return Err(Error::Inconsistent(format!(
            "row {row} has {} clusters, offsets expect {}",
            clusters.len(),
            offset.clusters_in_row
        )));
    }
    let mut expected = 0u32;
    for cluster in clusters {
        if cluster.data_offset != expected {
            return Err(Error::Inconsistent(format!(
                "row {row}: cluster data offset {} does not follow {expected}",
                cluster.data_offset
            )));
        }
        expected += cluster.labels.len() as u32;
    }
    if expected != offset.labels_in_row {
        return Err(Error::Inconsistent(format!(
            "row {row} has {expected} labels, offsets expect {}",
            offset.labels_in_row
        )));
    }

    let header_end = offset.header_offset as usize + offset.clusters_in_row as usize;
    if header_end > out.header.len() {
        return Err(Error::CapacityOverflow {
            what: "mc label header",
            needed: header_end,
            capacity: out.header.len(),
        });
    }
    let data_end = offset.data_offset as usize + offset.labels_in_row as usize;
    if data_end > out.data.len() {
        return Err(Error::CapacityOverflow {
            what: "mc label data",
            needed: data_end,
            capacity: out.data.len(),
        });
    }
    Ok(())
}
