use serde::{Deserialize, Serialize};

use crate::error::{BlockError, Result};
use crate::spline::{ProjectionSettings, Volume};

/// Closest point found over all volumes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointProjection {
    pub volume: usize,
    pub params: [f64; 3],
    /// Physical point minus the volume value at `params`.
    pub residual: [f64; 3],
}

impl PointProjection {
    pub fn distance(&self) -> f64 {
        self.residual.iter().map(|r| r * r).sum::<f64>().sqrt()
    }
}

/// Projects `x` onto every volume and keeps the smallest residual. Ties go to
/// the lower volume index.
pub fn project_point(
    volumes: &[Volume],
    x: [f64; 3],
    settings: &ProjectionSettings,
) -> Result<PointProjection> {
    let mut best: Option<PointProjection> = None;
    for (volume, v) in volumes.iter().enumerate() {
        let found = v.project_point(x, settings);
        let candidate = PointProjection {
            volume,
            params: found.params,
            residual: found.residual,
        };
        if best.map_or(true, |b| candidate.distance() < b.distance()) {
            best = Some(candidate);
        }
    }
    best.ok_or_else(|| BlockError::Precondition("no volumes to project onto".into()))
}
