//! tpccf-core: Core types for the TPC cluster finder.
//!
//! This crate provides the data model shared by every cluster finder stage:
//! packed charges, charge positions, the tiled charge grid, time fragments,
//! pad geometry, calibration thresholds, Monte-Carlo label containers and
//! per-row hit sets for neighbor linking.
//!

pub mod calib;
pub mod charge;
pub mod digit;
pub mod error;
pub mod fragment;
pub mod geometry;
pub mod grid;
pub mod hit;
pub mod labels;
pub mod noise;
pub mod pos;

pub use calib::Calibration;
pub use charge::{Charge, PackedCharge};
pub use digit::Digit;
pub use error::{Error, Result};
pub use fragment::{CfFragment, OVERLAP_TIME_BINS};
pub use geometry::{PadGeometry, RowGeometry};
pub use grid::{buffer_len, Array2D, GridDims, GridLayout, LinearLayout, TilingLayout};
pub use hit::{HitRow, RowLinks, SpacePoint, NO_LINK};
pub use labels::{ClusterMcInterim, LinearLabels, McLabel};
pub use noise::PadNoiseFlags;
pub use pos::{ChargePos, Delta2, INVALID_TIME_BIN, PADDING_PAD, PADDING_TIME};
