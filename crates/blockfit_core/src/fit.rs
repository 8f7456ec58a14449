//! Global least-squares fit of every volume's control net to its samples.
//!
//! Sample points are numbered globally over the sample grids, so a point on a
//! shared face is one observation. Each observation row holds the basis weights
//! of its representative volume, remapped from local to global control
//! indices. The normal equations `MᵗM c = Mᵗ p` are factorized once and solved
//! for all three coordinates together.

use nalgebra::DMatrix;
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CscMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BlockError, Result};
use crate::spline::Volume;
use crate::topology::{BlockTopology, GlobalNumbering};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub n_samples: usize,
    pub n_control: usize,
    pub nnz: usize,
    pub rms_residual: f64,
    pub max_residual: f64,
}

#[derive(Debug, Clone)]
pub struct GlobalFit {
    /// Coefficients indexed by global control number.
    pub coef: Vec<[f64; 3]>,
    pub report: FitReport,
}

/// Row-by-row CSR assembly. Duplicate columns within a row are summed.
pub struct ObservationBuilder {
    n_cols: usize,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<f64>,
}

impl ObservationBuilder {
    pub fn new(n_cols: usize) -> Self {
        Self::with_capacity(n_cols, 0, 0)
    }

    /// Reserves `n_rows` rows of up to `per_row` non-zeros each.
    pub fn with_capacity(n_cols: usize, n_rows: usize, per_row: usize) -> Self {
        let nnz = n_rows.saturating_mul(per_row);
        let mut row_offsets = Vec::with_capacity(n_rows + 1);
        row_offsets.push(0);
        Self {
            n_cols,
            row_offsets,
            col_indices: Vec::with_capacity(nnz),
            values: Vec::with_capacity(nnz),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.row_offsets.len() - 1
    }

    pub fn push_row(&mut self, entries: &mut [(usize, f64)]) {
        entries.sort_unstable_by_key(|&(col, _)| col);
        let row_start = self.col_indices.len();
        for &(col, value) in entries.iter() {
            if self.col_indices.len() > row_start && self.col_indices.last() == Some(&col) {
                if let Some(last) = self.values.last_mut() {
                    *last += value;
                }
            } else {
                self.col_indices.push(col);
                self.values.push(value);
            }
        }
        self.row_offsets.push(self.col_indices.len());
    }

    pub fn finish(self) -> Result<CsrMatrix<f64>> {
        let n_rows = self.n_rows();
        CsrMatrix::try_from_csr_data(
            n_rows,
            self.n_cols,
            self.row_offsets,
            self.col_indices,
            self.values,
        )
        .map_err(|e| BlockError::Precondition(format!("invalid observation matrix: {e}")))
    }
}

/// Sparse map from global control points to the physical positions at
/// `(volume, params)` locations, one row per location. Each row holds at most
/// `k_max³` weights, `k_max` being the highest order of any volume axis.
pub fn observation_matrix(
    volumes: &[Volume],
    control: &GlobalNumbering,
    locations: impl IntoIterator<Item = (usize, [f64; 3])>,
) -> Result<CsrMatrix<f64>> {
    let locations = locations.into_iter();
    let k_max = volumes
        .iter()
        .flat_map(|v| v.orders())
        .max()
        .unwrap_or(0);
    let per_row = k_max.pow(3);
    let mut builder =
        ObservationBuilder::with_capacity(control.n_global(), locations.size_hint().0, per_row);
    let mut row = Vec::with_capacity(per_row);
    for (vol, params) in locations {
        let volume = volumes.get(vol).ok_or_else(|| {
            BlockError::Precondition(format!("location refers to missing volume {vol}"))
        })?;
        let local_to_global = control.local_to_global(vol);
        row.clear();
        volume.basis_row(params, &mut row);
        for entry in row.iter_mut() {
            entry.0 = local_to_global[entry.0];
        }
        builder.push_row(&mut row);
    }
    builder.finish()
}

pub fn fit_global(
    topo: &BlockTopology,
    control: &GlobalNumbering,
    volumes: &mut [Volume],
) -> Result<GlobalFit> {
    let control_sizes: Vec<[usize; 3]> = volumes.iter().map(Volume::n_ctl).collect();
    control.ensure_current(&control_sizes)?;
    let sample_sizes = volumes
        .iter()
        .enumerate()
        .map(|(vol, v)| {
            v.sample_dims().ok_or_else(|| {
                BlockError::Precondition(format!("volume {vol} has no sample data to fit"))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let k_max = volumes
        .iter()
        .flat_map(|v| v.orders())
        .max()
        .unwrap_or(0);

    info!(volumes = volumes.len(), "creating global sample numbering");
    let samples = GlobalNumbering::compute(topo, &sample_sizes)?;
    let n_samples = samples.n_global();
    let n_control = control.n_global();

    info!(n_samples, n_control, k_max, "assembling observation matrix");
    let mut points = DMatrix::<f64>::zeros(n_samples, 3);
    let mut locations = Vec::with_capacity(n_samples);
    for g in 0..n_samples {
        let slot = samples.locals(g)[0];
        let volume = &volumes[slot.volume];
        let (params, point) = volume
            .sample_params(slot.i, slot.j, slot.k)
            .zip(volume.samples().map(|s| s.point(slot.i, slot.j, slot.k)))
            .ok_or_else(|| {
                BlockError::Precondition(format!("volume {} lost its samples", slot.volume))
            })?;
        for d in 0..3 {
            points[(g, d)] = point[d];
        }
        locations.push((slot.volume, params));
    }
    let m = observation_matrix(volumes, control, locations)?;
    let mt = m.transpose();

    info!(nnz = m.nnz(), "factorizing normal equations");
    let ntn = &mt * &m;
    let cholesky = CscCholesky::factor(&CscMatrix::from(&ntn)).map_err(|e| {
        BlockError::NumericFailure(format!(
            "cholesky factorization of {n_control}x{n_control} normal matrix failed: {e:?}"
        ))
    })?;

    info!("back solving");
    let rhs = &mt * &points;
    let solution = cholesky.solve(&rhs);
    if solution.iter().any(|v| !v.is_finite()) {
        return Err(BlockError::NumericFailure(
            "global fit produced non-finite coefficients".into(),
        ));
    }
    let coef: Vec<[f64; 3]> = (0..n_control)
        .map(|g| [solution[(g, 0)], solution[(g, 1)], solution[(g, 2)]])
        .collect();

    info!("scattering coefficients");
    scatter_coefficients(control, volumes, &coef);

    let fitted = &m * &solution;
    let mut sum_sq = 0.0;
    let mut max_residual = 0.0f64;
    for g in 0..n_samples {
        let sq: f64 = (0..3).map(|d| (fitted[(g, d)] - points[(g, d)]).powi(2)).sum();
        sum_sq += sq;
        max_residual = max_residual.max(sq.sqrt());
    }
    let report = FitReport {
        n_samples,
        n_control,
        nnz: m.nnz(),
        rms_residual: if n_samples > 0 {
            (sum_sq / n_samples as f64).sqrt()
        } else {
            0.0
        },
        max_residual,
    };
    info!(
        rms = report.rms_residual,
        max = report.max_residual,
        "global fit complete"
    );
    Ok(GlobalFit { coef, report })
}

/// Copies global coefficients into every volume's local control net.
pub fn scatter_coefficients(control: &GlobalNumbering, volumes: &mut [Volume], coef: &[[f64; 3]]) {
    for (vol, volume) in volumes.iter_mut().enumerate() {
        let local_to_global = control.local_to_global(vol);
        for (local, value) in volume.coef_mut().iter_mut().enumerate() {
            *value = coef[local_to_global[local]];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagate::{propagate_knots, KnotSettings};
    use crate::spline::volume::distance;
    use crate::spline::{Axis, SampleGrid};
    use crate::topology::{resolve_volumes, ConnectivitySettings};

    fn cube(offset: f64, n: usize) -> Volume {
        let h = 1.0 / (n - 1) as f64;
        let grid = SampleGrid::from_fn([n, n, n], |i, j, k| {
            [offset + i as f64 * h, j as f64 * h, k as f64 * h]
        })
        .expect("grid");
        Volume::from_samples(grid, 2, 3).expect("volume")
    }

    fn prepared(volumes: &mut [Volume]) -> (BlockTopology, GlobalNumbering) {
        let topo = resolve_volumes(volumes, &ConnectivitySettings::default());
        propagate_knots(&topo, volumes, &KnotSettings::default()).expect("propagate");
        let sizes: Vec<[usize; 3]> = volumes.iter().map(Volume::n_ctl).collect();
        let numbering = GlobalNumbering::compute(&topo, &sizes).expect("numbering");
        (topo, numbering)
    }

    #[test]
    fn builder_merges_duplicate_columns() {
        let mut builder = ObservationBuilder::new(4);
        builder.push_row(&mut [(3, 1.0), (1, 2.0), (3, 0.5)]);
        builder.push_row(&mut []);
        builder.push_row(&mut [(0, 1.0)]);
        let m = builder.finish().expect("valid csr");
        assert_eq!(m.nrows(), 3);
        assert_eq!(m.nnz(), 3);
        let row = m.row(0);
        assert_eq!(row.col_indices(), &[1, 3]);
        assert_eq!(row.values(), &[2.0, 1.5]);
    }

    #[test]
    fn observation_rows_fit_the_reserved_arena() {
        let mut volumes = vec![cube(0.0, 5), cube(1.0, 5)];
        let (_, numbering) = prepared(&mut volumes);
        let locations = [(0, [0.3, 0.6, 0.1]), (1, [1.0, 0.0, 0.5]), (1, [0.25; 3])];
        let m = observation_matrix(&volumes, &numbering, locations).expect("matrix");
        assert_eq!((m.nrows(), m.ncols()), (3, numbering.n_global()));
        let k_max = volumes.iter().flat_map(|v| v.orders()).max().expect("orders");
        assert!(m.row_iter().all(|row| row.nnz() <= k_max.pow(3)));

        let builder = ObservationBuilder::with_capacity(10, 3, 64);
        assert!(builder.row_offsets.capacity() >= 4);
        assert!(builder.col_indices.capacity() >= 192);
        assert!(builder.values.capacity() >= 192);
        assert_eq!(builder.n_rows(), 0);
    }

    #[test]
    fn two_cubes_fit_exactly_and_agree_on_shared_face() {
        let mut volumes = vec![cube(0.0, 6), cube(1.0, 6)];
        let (topo, numbering) = prepared(&mut volumes);
        assert_eq!(numbering.n_global(), 112);

        let fit = fit_global(&topo, &numbering, &mut volumes).expect("fit");
        assert_eq!(fit.report.n_samples, 2 * 216 - 36);
        assert_eq!(fit.report.n_control, 112);
        assert!(fit.report.max_residual < 1e-9, "{:?}", fit.report);

        for (vol, volume) in volumes.iter().enumerate() {
            for params in [[0.3, 0.6, 0.1], [1.0, 0.5, 0.5], [0.0, 0.25, 0.75]] {
                let expected = [vol as f64 + params[0], params[1], params[2]];
                assert!(distance(&volume.value(params), &expected) < 1e-9);
            }
        }
        for j in 0..4 {
            for k in 0..4 {
                let a = volumes[0].coef()[volumes[0].local_index(3, j, k)];
                let b = volumes[1].coef()[volumes[1].local_index(0, j, k)];
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn stale_numbering_is_rejected() {
        let mut volumes = vec![cube(0.0, 5)];
        let (topo, numbering) = prepared(&mut volumes);
        volumes[0].set_axis_size(Axis::U, 3, 3);
        volumes[0].calc_knots();
        volumes[0].set_coef_size();
        match fit_global(&topo, &numbering, &mut volumes) {
            Err(BlockError::StaleNumbering { volume, .. }) => assert_eq!(volume, 0),
            other => panic!("expected stale numbering, got {other:?}"),
        }
    }

    #[test]
    fn too_few_samples_is_a_numeric_failure() {
        let mut volumes = vec![cube(0.0, 2)];
        let (topo, numbering) = prepared(&mut volumes);
        assert_eq!(volumes[0].n_ctl(), [4, 4, 4]);
        let err = fit_global(&topo, &numbering, &mut volumes).expect_err("singular system");
        assert!(matches!(err, BlockError::NumericFailure(_)), "{err}");
    }

    #[test]
    fn volumes_without_samples_cannot_be_fitted() {
        let mut volumes = vec![Volume::from_control_net(
            [2, 2, 2],
            [2, 2, 2],
            std::array::from_fn(|_| vec![0.0, 0.0, 1.0, 1.0]),
            (0..8)
                .map(|idx| [(idx >> 2) as f64, ((idx >> 1) & 1) as f64, (idx & 1) as f64])
                .collect(),
        )
        .expect("volume")];
        let topo = resolve_volumes(&volumes, &ConnectivitySettings::default());
        let numbering = GlobalNumbering::compute(&topo, &[[2, 2, 2]]).expect("numbering");
        let err = fit_global(&topo, &numbering, &mut volumes).expect_err("no samples");
        assert!(format!("{err}").contains("no sample data"));
    }
}
