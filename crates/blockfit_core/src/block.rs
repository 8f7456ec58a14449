//! The block geometry session: volumes plus everything derived from them,
//! advanced through the pipeline one phase at a time.
//!
//! Calls that need an earlier phase fail with [`BlockError::PhaseOrder`]
//! instead of reading half-built state. Redoing a phase drops everything
//! computed after it.

use std::path::Path;

use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::embedded::{EmbeddedVolume, WriteCoordinator};
use crate::error::{BlockError, Result};
use crate::fit::{self, FitReport};
use crate::io::bvol::{read_bvol, write_bvol};
use crate::io::plot3d::{read_plot3d, write_plot3d};
use crate::io::{Encoding, IndexOrder};
use crate::project::{self, PointProjection};
use crate::propagate::{self, KnotSettings};
use crate::spline::{ProjectionSettings, SampleGrid, Volume};
use crate::topology::{
    load_connectivity, resolve_volumes, save_connectivity, BlockTopology, ConnectivitySettings,
    GlobalNumbering,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Unresolved,
    Resolved,
    Propagated,
    Numbered,
    Fitted,
}

/// Where the volumes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    /// Structured grids; volumes carry samples and are fitted.
    Plot3d,
    /// Existing spline volumes; no samples.
    Bvol,
    /// Grids handed in directly.
    Created,
}

/// Order and control count given to each axis of a volume built from a grid,
/// before propagation settles them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialSpline {
    pub order: usize,
    pub n_ctl: usize,
}

impl Default for InitialSpline {
    fn default() -> Self {
        Self { order: 2, n_ctl: 3 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockSettings {
    pub connectivity: ConnectivitySettings,
    pub knots: KnotSettings,
    pub projection: ProjectionSettings,
    pub initial: InitialSpline,
}

#[derive(Debug)]
pub struct BlockGeometry {
    settings: BlockSettings,
    source: Source,
    volumes: Vec<Volume>,
    phase: Phase,
    topology: Option<BlockTopology>,
    numbering: Option<GlobalNumbering>,
    coef: Option<Vec<[f64; 3]>>,
    report: Option<FitReport>,
    embedded: Vec<EmbeddedVolume>,
}

impl BlockGeometry {
    pub fn from_grids(grids: Vec<SampleGrid>, settings: BlockSettings) -> Result<Self> {
        Self::with_grids(grids, settings, Source::Created)
    }

    pub fn from_plot3d(
        path: &Path,
        encoding: Encoding,
        order: IndexOrder,
        settings: BlockSettings,
    ) -> Result<Self> {
        let grids = read_plot3d(path, encoding, order)?;
        Self::with_grids(grids, settings, Source::Plot3d)
    }

    pub fn from_bvol(path: &Path, encoding: Encoding, settings: BlockSettings) -> Result<Self> {
        let volumes = read_bvol(path, encoding)?;
        Ok(Self::new(volumes, settings, Source::Bvol))
    }

    fn with_grids(grids: Vec<SampleGrid>, settings: BlockSettings, source: Source) -> Result<Self> {
        let initial = settings.initial;
        let volumes = grids
            .into_iter()
            .map(|grid| Volume::from_samples(grid, initial.order, initial.n_ctl))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(volumes, settings, source))
    }

    fn new(volumes: Vec<Volume>, settings: BlockSettings, source: Source) -> Self {
        info!(volumes = volumes.len(), ?source, "created block geometry");
        Self {
            settings,
            source,
            volumes,
            phase: Phase::Unresolved,
            topology: None,
            numbering: None,
            coef: None,
            report: None,
            embedded: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn settings(&self) -> &BlockSettings {
        &self.settings
    }

    pub fn n_vol(&self) -> usize {
        self.volumes.len()
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    /// Direct access to the volumes. Changing control counts here makes the
    /// current numbering stale; the next fit reports it.
    pub fn volumes_mut(&mut self) -> &mut [Volume] {
        &mut self.volumes
    }

    pub fn topology(&self) -> Option<&BlockTopology> {
        self.topology.as_ref()
    }

    pub fn numbering(&self) -> Option<&GlobalNumbering> {
        self.numbering.as_ref()
    }

    /// Global control points of the last fit or update.
    pub fn global_coef(&self) -> Option<&[[f64; 3]]> {
        self.coef.as_deref()
    }

    pub fn fit_report(&self) -> Option<&FitReport> {
        self.report.as_ref()
    }

    fn require(&self, operation: &'static str, required: Phase) -> Result<()> {
        if self.phase < required {
            return Err(BlockError::PhaseOrder {
                operation,
                required,
                current: self.phase,
            });
        }
        Ok(())
    }

    fn topo(&self, operation: &'static str) -> Result<&BlockTopology> {
        self.require(operation, Phase::Resolved)?;
        self.topology
            .as_ref()
            .ok_or_else(|| BlockError::Precondition(format!("{operation} needs a topology")))
    }

    fn control_numbering(&self, operation: &'static str) -> Result<&GlobalNumbering> {
        self.require(operation, Phase::Numbered)?;
        self.numbering
            .as_ref()
            .ok_or_else(|| BlockError::Precondition(format!("{operation} needs a numbering")))
    }

    fn set_topology(&mut self, topology: BlockTopology) {
        self.topology = Some(topology);
        self.numbering = None;
        self.coef = None;
        self.report = None;
        self.phase = Phase::Resolved;
    }

    pub fn resolve_connectivity(&mut self) -> Result<&BlockTopology> {
        let topology = resolve_volumes(&self.volumes, &self.settings.connectivity);
        self.set_topology(topology);
        self.topo("resolve_connectivity")
    }

    pub fn load_connectivity(&mut self, path: &Path) -> Result<&BlockTopology> {
        let topology = load_connectivity(path)?;
        if topology.n_vol() != self.volumes.len() {
            return Err(BlockError::Precondition(format!(
                "{} describes {} volumes, geometry has {}",
                path.display(),
                topology.n_vol(),
                self.volumes.len()
            )));
        }
        self.set_topology(topology);
        self.topo("load_connectivity")
    }

    pub fn save_connectivity(&self, path: &Path) -> Result<()> {
        save_connectivity(path, self.topo("save_connectivity")?)
    }

    pub fn propagate_knots(&mut self) -> Result<()> {
        self.require("propagate_knots", Phase::Resolved)?;
        let topology = self
            .topology
            .as_ref()
            .ok_or_else(|| BlockError::Precondition("propagate_knots needs a topology".into()))?;
        propagate::propagate_knots(topology, &mut self.volumes, &self.settings.knots)?;
        self.numbering = None;
        self.coef = None;
        self.report = None;
        self.phase = Phase::Propagated;
        Ok(())
    }

    /// Numbers the control points for the current control counts.
    pub fn renumber(&mut self) -> Result<&GlobalNumbering> {
        let sizes: Vec<[usize; 3]> = self.volumes.iter().map(Volume::n_ctl).collect();
        let numbering = GlobalNumbering::compute(self.topo("renumber")?, &sizes)?;
        info!(
            local = numbering.n_local(),
            global = numbering.n_global(),
            "numbered control points"
        );
        self.numbering = Some(numbering);
        self.coef = None;
        self.report = None;
        self.phase = Phase::Numbered;
        self.control_numbering("renumber")
    }

    /// Loads connectivity from `path` when it exists, otherwise resolves,
    /// propagates and saves it; then renumbers. Spline volumes read from a
    /// bvol file keep their knots when the connectivity is loaded.
    pub fn do_connectivity(&mut self, path: &Path) -> Result<&GlobalNumbering> {
        if path.exists() {
            self.load_connectivity(path)?;
            if self.source != Source::Bvol {
                self.propagate_knots()?;
            }
        } else {
            self.resolve_connectivity()?;
            self.propagate_knots()?;
            self.save_connectivity(path)?;
        }
        self.renumber()
    }

    pub fn fit_global(&mut self) -> Result<&FitReport> {
        self.require("fit_global", Phase::Numbered)?;
        let (Some(topology), Some(numbering)) = (self.topology.as_ref(), self.numbering.as_ref())
        else {
            return Err(BlockError::Precondition(
                "fit_global needs a topology and a numbering".into(),
            ));
        };
        let fitted = fit::fit_global(topology, numbering, &mut self.volumes)?;
        self.coef = Some(fitted.coef);
        self.phase = Phase::Fitted;
        Ok(&*self.report.insert(fitted.report))
    }

    /// Replaces the global control points and updates every volume.
    pub fn set_global_coef(&mut self, coef: Vec<[f64; 3]>) -> Result<()> {
        self.require("set_global_coef", Phase::Numbered)?;
        let Some(numbering) = self.numbering.as_ref() else {
            return Err(BlockError::Precondition(
                "set_global_coef needs a numbering".into(),
            ));
        };
        if coef.len() != numbering.n_global() {
            return Err(BlockError::Precondition(format!(
                "expected {} global control points, got {}",
                numbering.n_global(),
                coef.len()
            )));
        }
        let sizes: Vec<[usize; 3]> = self.volumes.iter().map(Volume::n_ctl).collect();
        numbering.ensure_current(&sizes)?;
        fit::scatter_coefficients(numbering, &mut self.volumes, &coef);
        self.coef = Some(coef);
        Ok(())
    }

    pub fn project_point(&self, x: [f64; 3]) -> Result<PointProjection> {
        project::project_point(&self.volumes, x, &self.settings.projection)
    }

    /// Embeds a point set and returns its index. With a cache path the binding
    /// is read from the file when present and written to it otherwise.
    pub fn embed_volume(
        &mut self,
        points: &[[f64; 3]],
        cache: Option<&Path>,
        coordinator: &dyn WriteCoordinator,
    ) -> Result<usize> {
        let settings = &self.settings.projection;
        let embedded = match cache {
            Some(path) => {
                EmbeddedVolume::load_or_embed(path, &self.volumes, points, settings, coordinator)?
            }
            None => EmbeddedVolume::embed(&self.volumes, points, settings)?,
        };
        self.embedded.push(embedded);
        Ok(self.embedded.len() - 1)
    }

    pub fn embedded(&self, index: usize) -> Result<&EmbeddedVolume> {
        self.embedded.get(index).ok_or_else(|| {
            BlockError::Precondition(format!(
                "no embedded volume {index}, have {}",
                self.embedded.len()
            ))
        })
    }

    pub fn volume_points(&self, index: usize) -> Result<Vec<[f64; 3]>> {
        self.embedded(index)?.points(&self.volumes)
    }

    pub fn embedded_derivative(&self, index: usize) -> Result<CsrMatrix<f64>> {
        let numbering = self.control_numbering("embedded_derivative")?;
        self.embedded(index)?.derivative(&self.volumes, numbering)
    }

    pub fn write_bvol(&self, path: &Path, encoding: Encoding) -> Result<()> {
        write_bvol(path, &self.volumes, encoding)
    }

    /// Writes every volume evaluated at its sample parameters, or on a
    /// uniform grid of its control-net size when it has no samples.
    pub fn write_plot3d(&self, path: &Path, encoding: Encoding) -> Result<()> {
        let grids = self
            .volumes
            .iter()
            .map(evaluated_grid)
            .collect::<Result<Vec<_>>>()?;
        write_plot3d(path, &grids, encoding)
    }
}

fn evaluated_grid(volume: &Volume) -> Result<SampleGrid> {
    match volume.sample_dims() {
        Some(dims) => {
            let mut points = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
            for i in 0..dims[0] {
                for j in 0..dims[1] {
                    for k in 0..dims[2] {
                        let params = volume.sample_params(i, j, k).ok_or_else(|| {
                            BlockError::Precondition(format!(
                                "sample ({i}, {j}, {k}) has no parameters"
                            ))
                        })?;
                        points.push(volume.value(params));
                    }
                }
            }
            SampleGrid::new(dims, points)
        }
        None => {
            let dims = volume.n_ctl();
            let param = |n: usize, count: usize| n as f64 / (count - 1) as f64;
            SampleGrid::from_fn(dims, |i, j, k| {
                volume.value([param(i, dims[0]), param(j, dims[1]), param(k, dims[2])])
            })
        }
    }
}
