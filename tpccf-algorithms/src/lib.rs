//! tpccf-algorithms: Cluster finder stages for TPC charge data.
//!
//! This crate provides the stages that turn a fragment of charge samples
//! into peaks, plus the stages around them:
//! - **Charge map filler** - bins gain-corrected digits into the grid
//! - **Pad baseline checker** - flags noisy pads from their time series
//! - **Peak finder** - local maxima with a directional tie-break
//! - **MC label flattener** - per-row truth labels into flat arrays
//! - **Neighbor finder** - links hits of adjacent rows
//!
//! Every stage runs on an [`Executor`], serially or on the rayon pool, with
//! identical results.
//!
#![warn(missing_docs)]

mod baseline;
mod compaction;
pub mod exec;
mod filler;
mod labels;
mod neighbors;
mod peaks;
mod processing;
mod registry;
pub mod spatial;

pub use baseline::{
    is_noisy, PadBaselineChecker, PadStats, BASELINE_GROUP_SIZE, CACHED_TIME_BINS,
    PADS_PER_CACHELINE,
};
pub use compaction::{compact_peaks, exclusive_scan};
pub use exec::{Backend, Executor, GroupScope};
pub use filler::ChargeMapFiller;
pub use labels::{McInterimLabels, McLabelFlattener, RowLabelOffsets};
pub use neighbors::{LinkSide, NeighborConfig, NeighborFinder, RowLinkGeometry};
pub use peaks::{
    is_local_maximum, PeakFinder, PeakMapValue, INNER_NEIGHBORS, NUM_LESS_EQUAL, PEAK_GROUP_SIZE,
};
pub use processing::{ClusterFinder, ClusterFinderConfig, ClusterFinderState, EventSummary, FoundPeak};
pub use registry::{KernelInfo, KernelRegistry};
pub use spatial::RowGrid;
