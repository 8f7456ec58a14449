//! The `blockfit_core` crate is the engine behind the `blockfit` CLI. It turns a
//! set of structured grid blocks into B-spline volumes that agree wherever the
//! blocks touch, and fits them together in one least-squares solve.
//!
//! Key components:
//! - **Spline**: `Volume` (trivariate B-spline with its samples), knot
//!   construction and basis evaluation.
//! - **Topology**: connectivity resolution (nodes, edges, design groups), the
//!   connectivity file and `GlobalNumbering` of shared grids.
//! - **Propagate**: one control count, order and knot vector per design group.
//! - **Fit**: sparse observation matrix and normal-equation solve.
//! - **Block**: `BlockGeometry`, the session that runs the phases in order.
//! - **IO**: plot3d grids and bvol spline files, ascii or binary.
pub mod block;
pub mod embedded;
pub mod error;
pub mod fit;
pub mod io;
pub mod project;
pub mod propagate;
pub mod spline;
pub mod topology;

pub use block::{BlockGeometry, BlockSettings, InitialSpline, Phase, Source};
pub use embedded::{EmbeddedVolume, SingleProcess, WriteCoordinator};
pub use error::{BlockError, Result};
pub use fit::{FitReport, GlobalFit};
pub use io::{Encoding, IndexOrder};
pub use project::PointProjection;
pub use propagate::KnotSettings;
pub use spline::{Axis, ProjectionSettings, SampleGrid, Volume};
pub use topology::{BlockTopology, ConnectivitySettings, Direction, GlobalNumbering};
