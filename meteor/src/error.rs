//! Module containing the universal error type for mesh operations
use crate::data::Format;
use thiserror::Error;

/// Universal error type for meteor
///
/// Every variant is a usage error: the mesh is left untouched when one is
/// returned.  Corruption of the point/triangle graph is never reported through
/// this type; it panics instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The requested fields are not part of the mesh format
    #[error("format {requested:?} is not available (mesh has {available:?})")]
    FormatNotAvailable {
        /// Fields requested by the caller
        requested: Format,
        /// Fields stored by the mesh
        available: Format,
    },

    /// The mesh topology changed since the last `rewind`
    #[error("mesh has been modified since rewind")]
    MeshModified,

    /// A point index does not refer to a live point
    #[error("index {index} out of range ({count} points)")]
    IndexOutOfRange {
        /// Index given by the caller
        index: usize,
        /// Number of live points
        count: usize,
    },

    /// A point index was negative or not integral
    #[error("invalid point index {0}")]
    InvalidIndex(f64),

    /// A triangle would use the same point twice
    #[error("triangle uses point {0} more than once")]
    DegenerateTriangle(usize),

    /// Triangles can only be written by index or by coordinates
    #[error("must have coordinate or index data to write triangles")]
    MissingCoordinates,

    /// Point indices cannot be assigned by the caller
    #[error("point indices are read-only")]
    ReadOnlyIndex,

    /// The caller's buffer cannot hold the requested records
    #[error("buffer too small: need {needed} values, got {actual}")]
    BufferTooSmall {
        /// Number of scalars required
        needed: usize,
        /// Number of scalars provided
        actual: usize,
    },

    /// The sampling grid is empty or has a non-positive step
    #[error("invalid grid: {0}")]
    InvalidGrid(&'static str),

    /// A callback needed by this operation was never installed
    #[error("no {0} function has been set")]
    MissingCallback(&'static str),

    /// The operation would invalidate an in-progress build
    #[error("cannot {0} while a build is in progress")]
    BuildInProgress(&'static str),
}
