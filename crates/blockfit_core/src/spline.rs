//! Trivariate B-spline volumes.
//!
//! A [`Volume`] owns the structured sample grid it was built from (when there
//! is one), its per-axis chord-length parameterization, knot vectors, orders
//! and the local control-point grid. Everything the block pipeline needs from
//! a volume goes through this module: basis rows for fitting, corner and edge
//! queries for connectivity, and point projection.

pub mod basis;
pub mod knots;
pub mod volume;

use serde::{Deserialize, Serialize};

pub use volume::{ProjectionSettings, SampleGrid, Volume, VolumeProjection};

/// Parametric direction of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    U,
    V,
    W,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::U, Axis::V, Axis::W];

    pub fn index(self) -> usize {
        match self {
            Axis::U => 0,
            Axis::V => 1,
            Axis::W => 2,
        }
    }

    /// The two remaining axes, in increasing order.
    pub fn others(self) -> [Axis; 2] {
        match self {
            Axis::U => [Axis::V, Axis::W],
            Axis::V => [Axis::U, Axis::W],
            Axis::W => [Axis::U, Axis::V],
        }
    }
}

/// Row-major flattening of `(i, j, k)` in a grid of `dims`, `k` fastest.
pub fn flat_index(dims: [usize; 3], i: usize, j: usize, k: usize) -> usize {
    (i * dims[1] + j) * dims[2] + k
}
