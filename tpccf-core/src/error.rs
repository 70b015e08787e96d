//! Error types for tpccf-core.

use thiserror::Error;

/// Result type alias for cluster finder operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for cluster finder operations.
///
/// Every variant describes an inconsistency that aborts the current event.
/// Disabled thresholds are never reported as errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    InvalidConfig(String),

    /// Sizes of two collaborating inputs disagree.
    #[error("geometry mismatch in {what}: expected {expected}, got {actual}")]
    GeometryMismatch {
        /// Which quantity disagreed.
        what: &'static str,
        /// Size required by the geometry.
        expected: usize,
        /// Size actually provided.
        actual: usize,
    },

    /// A computed offset range does not fit the allocated output.
    #[error("capacity overflow in {what}: need {needed} entries, have {capacity}")]
    CapacityOverflow {
        /// Which buffer overflowed.
        what: &'static str,
        /// Number of entries required.
        needed: usize,
        /// Number of entries available.
        capacity: usize,
    },

    /// A write addressed a cell outside the charge grid.
    #[error("position outside charge grid: row {row}, pad {pad}, time {time}")]
    OutOfGrid {
        /// Row of the rejected position.
        row: u16,
        /// Pad of the rejected position.
        pad: i16,
        /// Fragment-local time bin of the rejected position.
        time: i16,
    },

    /// Invalid fragment parameters.
    #[error("invalid fragment: {0}")]
    InvalidFragment(String),

    /// Charge value outside the packable range.
    #[error("charge {0} outside packable range")]
    ChargeOutOfRange(f32),

    /// Internal bookkeeping disagrees with the data it describes.
    #[error("inconsistent data: {0}")]
    Inconsistent(String),
}
