//! Point sets embedded in the block geometry.
//!
//! Each point is bound to the volume and parametric location it projected to;
//! after the control net changes, the points move with it. Embedding is costly
//! (a projection per point against every volume), so the binding can be cached
//! in a plain text file: the point count, then the volume ids, then the `u`,
//! `v` and `w` values, one value per line.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BlockError, Result};
use crate::fit::observation_matrix;
use crate::io::AsciiValues;
use crate::project::project_point;
use crate::spline::{ProjectionSettings, Volume};
use crate::topology::GlobalNumbering;

/// Decides which of several cooperating processes writes shared files.
/// Every process calls [`WriteCoordinator::barrier`] after the writer is done.
pub trait WriteCoordinator {
    fn is_writer(&self) -> bool;
    fn barrier(&self);
}

/// The only process: always writes, never waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl WriteCoordinator for SingleProcess {
    fn is_writer(&self) -> bool {
        true
    }

    fn barrier(&self) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedVolume {
    pub volume_ids: Vec<usize>,
    pub params: Vec<[f64; 3]>,
}

impl EmbeddedVolume {
    /// Binds every point to its closest volume location.
    pub fn embed(
        volumes: &[Volume],
        points: &[[f64; 3]],
        settings: &ProjectionSettings,
    ) -> Result<Self> {
        let mut volume_ids = Vec::with_capacity(points.len());
        let mut params = Vec::with_capacity(points.len());
        let mut worst = 0.0f64;
        for &x in points {
            let found = project_point(volumes, x, settings)?;
            worst = worst.max(found.distance());
            volume_ids.push(found.volume);
            params.push(found.params);
        }
        debug!(points = points.len(), worst_distance = worst, "embedded points");
        Ok(Self { volume_ids, params })
    }

    /// Reads the cache at `path` when it exists; otherwise embeds and writes it.
    pub fn load_or_embed(
        path: &Path,
        volumes: &[Volume],
        points: &[[f64; 3]],
        settings: &ProjectionSettings,
        coordinator: &dyn WriteCoordinator,
    ) -> Result<Self> {
        if path.exists() {
            let cached = Self::read_cache(path)?;
            cached.check_volumes(volumes.len())?;
            return Ok(cached);
        }
        let embedded = Self::embed(volumes, points, settings)?;
        embedded.write_cache(path, coordinator)?;
        Ok(embedded)
    }

    pub fn len(&self) -> usize {
        self.volume_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volume_ids.is_empty()
    }

    fn check_volumes(&self, n_vol: usize) -> Result<()> {
        match self.volume_ids.iter().find(|&&v| v >= n_vol) {
            Some(v) => Err(BlockError::Precondition(format!(
                "embedded point refers to volume {v}, geometry has {n_vol}"
            ))),
            None => Ok(()),
        }
    }

    /// Current physical position of every point.
    pub fn points(&self, volumes: &[Volume]) -> Result<Vec<[f64; 3]>> {
        self.check_volumes(volumes.len())?;
        Ok(self
            .volume_ids
            .iter()
            .zip(&self.params)
            .map(|(&vol, &params)| volumes[vol].value(params))
            .collect())
    }

    /// `d(point)/d(global control point)`, one row per point. The same weights
    /// apply to each coordinate.
    pub fn derivative(
        &self,
        volumes: &[Volume],
        control: &GlobalNumbering,
    ) -> Result<CsrMatrix<f64>> {
        self.check_volumes(volumes.len())?;
        let sizes: Vec<[usize; 3]> = volumes.iter().map(Volume::n_ctl).collect();
        control.ensure_current(&sizes)?;
        info!(points = self.len(), "computing embedded point derivative");
        observation_matrix(
            volumes,
            control,
            self.volume_ids.iter().copied().zip(self.params.iter().copied()),
        )
    }

    /// Writes the cache from the coordinator's writer process, then waits for
    /// every process. The barrier is reached even when the write fails.
    pub fn write_cache(&self, path: &Path, coordinator: &dyn WriteCoordinator) -> Result<()> {
        let written = if coordinator.is_writer() {
            let result = self.write_cache_file(path);
            if result.is_ok() {
                info!(path = %path.display(), points = self.len(), "wrote embedded volume");
            }
            result.map_err(|e| BlockError::io(path, e))
        } else {
            Ok(())
        };
        coordinator.barrier();
        written
    }

    fn write_cache_file(&self, path: &Path) -> std::io::Result<()> {
        let mut out = BufWriter::new(fs::File::create(path)?);
        writeln!(out, "{}", self.len())?;
        for id in &self.volume_ids {
            writeln!(out, "{id}")?;
        }
        for axis in 0..3 {
            for params in &self.params {
                writeln!(out, "{}", params[axis])?;
            }
        }
        out.flush()
    }

    pub fn read_cache(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| BlockError::io(path, e))?;
        let mut values = AsciiValues::new(path, &text);
        let n = values.parse_n::<usize>("point count", 1)?[0];
        let volume_ids = values.parse_n::<usize>("volume ids", n)?;
        let u = values.parse_n::<f64>("u values", n)?;
        let v = values.parse_n::<f64>("v values", n)?;
        let w = values.parse_n::<f64>("w values", n)?;
        let params = (0..n).map(|i| [u[i], v[i], w[i]]).collect();
        info!(path = %path.display(), points = n, "read embedded volume");
        Ok(Self { volume_ids, params })
    }
}
