use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use super::basis::{basis_funs, basis_funs_with_derivs, find_span};
use super::knots::{knots_for_params, uniform_knots};
use super::{flat_index, Axis};
use crate::error::{BlockError, Result};
use crate::topology::layout::{corner_bits, CORNERS, EDGES, EDGE_AXIS, EDGE_CORNERS};

/// Structured grid of physical sample points, `k` varying fastest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleGrid {
    dims: [usize; 3],
    points: Vec<[f64; 3]>,
}

impl SampleGrid {
    pub fn new(dims: [usize; 3], points: Vec<[f64; 3]>) -> Result<Self> {
        if dims.iter().any(|&n| n < 2) {
            return Err(BlockError::Precondition(format!(
                "sample grid needs at least 2 points per axis, got {dims:?}"
            )));
        }
        let expected = dims[0] * dims[1] * dims[2];
        if points.len() != expected {
            return Err(BlockError::Precondition(format!(
                "sample grid {dims:?} expects {expected} points, got {}",
                points.len()
            )));
        }
        Ok(Self { dims, points })
    }

    pub fn from_fn(dims: [usize; 3], f: impl Fn(usize, usize, usize) -> [f64; 3]) -> Result<Self> {
        let mut points = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
        for i in 0..dims[0] {
            for j in 0..dims[1] {
                for k in 0..dims[2] {
                    points.push(f(i, j, k));
                }
            }
        }
        Self::new(dims, points)
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    pub fn point(&self, i: usize, j: usize, k: usize) -> [f64; 3] {
        self.points[flat_index(self.dims, i, j, k)]
    }

    fn at(&self, ijk: [usize; 3]) -> [f64; 3] {
        self.point(ijk[0], ijk[1], ijk[2])
    }
}

/// Sample grid plus its chord-length parameterization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Samples {
    grid: SampleGrid,
    /// Per-sample parameter along each axis.
    params: [Vec<f64>; 3],
    /// Per-axis parameters averaged over all grid lines; drives knot placement.
    axis_params: [Vec<f64>; 3],
}

impl Samples {
    fn new(grid: SampleGrid) -> Self {
        let dims = grid.dims;
        let total = grid.points.len();
        let mut params: [Vec<f64>; 3] = Default::default();
        let mut axis_params: [Vec<f64>; 3] = Default::default();

        for axis in Axis::ALL {
            let a = axis.index();
            let [b, c] = axis.others().map(Axis::index);
            let n = dims[a];
            let mut line_params = vec![0.0; total];
            let mut averaged = vec![0.0; n];
            let mut lengths = vec![0.0; n];

            for ib in 0..dims[b] {
                for ic in 0..dims[c] {
                    let mut ijk = [0usize; 3];
                    ijk[b] = ib;
                    ijk[c] = ic;
                    let mut prev = grid.at(ijk);
                    for i in 1..n {
                        ijk[a] = i;
                        let cur = grid.at(ijk);
                        lengths[i] = lengths[i - 1] + distance(&prev, &cur);
                        prev = cur;
                    }
                    let total_len = lengths[n - 1];
                    for i in 0..n {
                        ijk[a] = i;
                        let t = if total_len > 0.0 {
                            lengths[i] / total_len
                        } else {
                            i as f64 / (n - 1) as f64
                        };
                        line_params[flat_index(dims, ijk[0], ijk[1], ijk[2])] = t;
                        averaged[i] += t;
                    }
                }
            }

            let lines = (dims[b] * dims[c]) as f64;
            for value in &mut averaged {
                *value /= lines;
            }
            averaged[0] = 0.0;
            averaged[n - 1] = 1.0;
            params[a] = line_params;
            axis_params[a] = averaged;
        }

        Self {
            grid,
            params,
            axis_params,
        }
    }
}

/// Settings for projecting a physical point onto a volume.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Seeds per axis when the volume has no sample grid to seed from.
    pub lattice: usize,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-14,
            lattice: 5,
        }
    }
}

/// Closest parametric location found for a point, and `x - volume(u, v, w)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeProjection {
    pub params: [f64; 3],
    pub residual: [f64; 3],
}

impl VolumeProjection {
    pub fn distance(&self) -> f64 {
        norm(&self.residual)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    samples: Option<Samples>,
    orders: [usize; 3],
    n_ctl: [usize; 3],
    knots: [Vec<f64>; 3],
    coef: Vec<[f64; 3]>,
}

impl Volume {
    /// Builds the parameterization and knot vectors for a sample grid. The
    /// control net starts zeroed; it is filled by a fit.
    pub fn from_samples(grid: SampleGrid, order: usize, n_ctl: usize) -> Result<Self> {
        if order < 2 || n_ctl < 2 {
            return Err(BlockError::Precondition(format!(
                "volume needs order >= 2 and n_ctl >= 2, got order {order}, n_ctl {n_ctl}"
            )));
        }
        let dims = grid.dims();
        let n_ctl = dims.map(|n| n_ctl.min(n));
        let orders = n_ctl.map(|n| order.min(n));
        let mut volume = Self {
            samples: Some(Samples::new(grid)),
            orders,
            n_ctl,
            knots: Default::default(),
            coef: Vec::new(),
        };
        volume.calc_knots();
        volume.set_coef_size();
        Ok(volume)
    }

    /// Wraps an existing control net, e.g. one read back from a bvol file.
    pub fn from_control_net(
        n_ctl: [usize; 3],
        orders: [usize; 3],
        knots: [Vec<f64>; 3],
        coef: Vec<[f64; 3]>,
    ) -> Result<Self> {
        for axis in Axis::ALL {
            let a = axis.index();
            if orders[a] < 1 || orders[a] > n_ctl[a] {
                return Err(BlockError::Precondition(format!(
                    "axis {axis:?}: order {} is invalid for {} control points",
                    orders[a], n_ctl[a]
                )));
            }
            if knots[a].len() != n_ctl[a] + orders[a] {
                return Err(BlockError::Precondition(format!(
                    "axis {axis:?}: expected {} knots, got {}",
                    n_ctl[a] + orders[a],
                    knots[a].len()
                )));
            }
            if knots[a].windows(2).any(|w| w[1] < w[0]) {
                return Err(BlockError::Precondition(format!(
                    "axis {axis:?}: knot vector is not non-decreasing"
                )));
            }
        }
        let expected = n_ctl[0] * n_ctl[1] * n_ctl[2];
        if coef.len() != expected {
            return Err(BlockError::Precondition(format!(
                "control net {n_ctl:?} expects {expected} coefficients, got {}",
                coef.len()
            )));
        }
        Ok(Self {
            samples: None,
            orders,
            n_ctl,
            knots,
            coef,
        })
    }

    pub fn orders(&self) -> [usize; 3] {
        self.orders
    }

    pub fn n_ctl(&self) -> [usize; 3] {
        self.n_ctl
    }

    pub fn knots(&self, axis: Axis) -> &[f64] {
        &self.knots[axis.index()]
    }

    pub fn coef(&self) -> &[[f64; 3]] {
        &self.coef
    }

    pub fn coef_mut(&mut self) -> &mut [[f64; 3]] {
        &mut self.coef
    }

    pub fn samples(&self) -> Option<&SampleGrid> {
        self.samples.as_ref().map(|s| &s.grid)
    }

    pub fn sample_dims(&self) -> Option<[usize; 3]> {
        self.samples().map(SampleGrid::dims)
    }

    /// Parametric location `(u, v, w)` of sample `(i, j, k)`.
    pub fn sample_params(&self, i: usize, j: usize, k: usize) -> Option<[f64; 3]> {
        let samples = self.samples.as_ref()?;
        let idx = flat_index(samples.grid.dims, i, j, k);
        Some([
            samples.params[0][idx],
            samples.params[1][idx],
            samples.params[2][idx],
        ])
    }

    pub fn local_index(&self, i: usize, j: usize, k: usize) -> usize {
        flat_index(self.n_ctl, i, j, k)
    }

    /// Sets the control count and order of one axis. Knots and coefficients
    /// are left alone until [`Volume::calc_knots`] and [`Volume::set_coef_size`].
    pub fn set_axis_size(&mut self, axis: Axis, n_ctl: usize, order: usize) {
        self.n_ctl[axis.index()] = n_ctl;
        self.orders[axis.index()] = order;
    }

    pub fn set_knots(&mut self, axis: Axis, knots: Vec<f64>) {
        self.knots[axis.index()] = knots;
    }

    /// Recomputes every knot vector for the current control counts and orders.
    pub fn calc_knots(&mut self) {
        for axis in Axis::ALL {
            let a = axis.index();
            let (n_ctl, order) = (self.n_ctl[a], self.orders[a]);
            self.knots[a] = match &self.samples {
                Some(samples) => knots_for_params(&samples.axis_params[a], n_ctl, order),
                None if self.knots[a].len() == n_ctl + order => self.knots[a].clone(),
                None => uniform_knots(n_ctl, order),
            };
        }
    }

    /// Derives control counts from the knot vectors and resizes the control
    /// net. Coefficients survive only when the size is unchanged.
    pub fn set_coef_size(&mut self) {
        for a in 0..3 {
            self.n_ctl[a] = self.knots[a].len().saturating_sub(self.orders[a]);
        }
        let total = self.n_ctl[0] * self.n_ctl[1] * self.n_ctl[2];
        if self.coef.len() != total {
            self.coef = vec![[0.0; 3]; total];
        }
    }

    /// Appends the non-zero basis weights at `params` to `row` as
    /// `(local control index, weight)` pairs.
    pub fn basis_row(&self, params: [f64; 3], row: &mut Vec<(usize, f64)>) {
        let mut spans = [0usize; 3];
        let mut values: [Vec<f64>; 3] = Default::default();
        for a in 0..3 {
            let order = self.orders[a];
            let t = params[a].clamp(0.0, 1.0);
            spans[a] = find_span(&self.knots[a], order, self.n_ctl[a], t);
            values[a] = vec![0.0; order];
            basis_funs(&self.knots[a], order, spans[a], t, &mut values[a]);
        }
        let first = [0, 1, 2].map(|a| spans[a] + 1 - self.orders[a]);

        for (ii, nu) in values[0].iter().enumerate() {
            for (jj, nv) in values[1].iter().enumerate() {
                for (kk, nw) in values[2].iter().enumerate() {
                    let weight = nu * nv * nw;
                    if weight != 0.0 {
                        let idx = self.local_index(first[0] + ii, first[1] + jj, first[2] + kk);
                        row.push((idx, weight));
                    }
                }
            }
        }
    }

    pub fn value(&self, params: [f64; 3]) -> [f64; 3] {
        let mut row = Vec::new();
        self.basis_row(params, &mut row);
        let mut out = [0.0; 3];
        for (idx, weight) in row {
            for d in 0..3 {
                out[d] += weight * self.coef[idx][d];
            }
        }
        out
    }

    /// Position and parametric Jacobian (columns `d/du`, `d/dv`, `d/dw`).
    pub fn value_and_jacobian(&self, params: [f64; 3]) -> ([f64; 3], Matrix3<f64>) {
        let mut spans = [0usize; 3];
        let mut values: [Vec<f64>; 3] = Default::default();
        let mut derivs: [Vec<f64>; 3] = Default::default();
        for a in 0..3 {
            let order = self.orders[a];
            let t = params[a].clamp(0.0, 1.0);
            spans[a] = find_span(&self.knots[a], order, self.n_ctl[a], t);
            values[a] = vec![0.0; order];
            derivs[a] = vec![0.0; order];
            basis_funs_with_derivs(
                &self.knots[a],
                order,
                spans[a],
                t,
                &mut values[a],
                &mut derivs[a],
            );
        }
        let first = [0, 1, 2].map(|a| spans[a] + 1 - self.orders[a]);

        let mut point = Vector3::zeros();
        let mut jac = Matrix3::zeros();
        for ii in 0..self.orders[0] {
            for jj in 0..self.orders[1] {
                for kk in 0..self.orders[2] {
                    let idx = self.local_index(first[0] + ii, first[1] + jj, first[2] + kk);
                    let p = self.coef[idx];
                    let p = Vector3::new(p[0], p[1], p[2]);
                    let (nu, nv, nw) = (values[0][ii], values[1][jj], values[2][kk]);
                    let (du, dv, dw) = (derivs[0][ii], derivs[1][jj], derivs[2][kk]);
                    point += p * (nu * nv * nw);
                    jac.column_mut(0).axpy(du * nv * nw, &p, 1.0);
                    jac.column_mut(1).axpy(nu * dv * nw, &p, 1.0);
                    jac.column_mut(2).axpy(nu * nv * dw, &p, 1.0);
                }
            }
        }
        ([point.x, point.y, point.z], jac)
    }

    /// Physical corner `corner` (see [`crate::topology::layout`]), taken from
    /// the sample grid when present and evaluated from the spline otherwise.
    pub fn corner(&self, corner: usize) -> [f64; 3] {
        debug_assert!(corner < CORNERS);
        let bits = corner_bits(corner);
        match self.samples() {
            Some(grid) => {
                let dims = grid.dims();
                let ijk = [0, 1, 2].map(|a| bits[a] * (dims[a] - 1));
                grid.at(ijk)
            }
            None => self.value(bits.map(|b| b as f64)),
        }
    }

    /// Physical midpoint of local edge `edge`.
    pub fn edge_midpoint(&self, edge: usize) -> [f64; 3] {
        debug_assert!(edge < EDGES);
        let bits = corner_bits(EDGE_CORNERS[edge][0]);
        let axis = EDGE_AXIS[edge].index();
        match self.samples() {
            Some(grid) => {
                let dims = grid.dims();
                let mut ijk = [0, 1, 2].map(|a| bits[a] * (dims[a] - 1));
                let n = dims[axis];
                ijk[axis] = n / 2;
                let upper = grid.at(ijk);
                if n % 2 == 1 {
                    return upper;
                }
                ijk[axis] = n / 2 - 1;
                let lower = grid.at(ijk);
                [0, 1, 2].map(|d| 0.5 * (lower[d] + upper[d]))
            }
            None => {
                let mut params = bits.map(|b| b as f64);
                params[axis] = 0.5;
                self.value(params)
            }
        }
    }

    /// Finds the parametric location closest to `x0` by Gauss-Newton from the
    /// nearest seed, with backtracking and clamping to the unit cube.
    pub fn project_point(&self, x0: [f64; 3], settings: &ProjectionSettings) -> VolumeProjection {
        let mut params = self.projection_seed(x0, settings.lattice);
        let target = Vector3::new(x0[0], x0[1], x0[2]);
        let mut current = self.value(params);
        let mut dist = norm(&sub(&x0, &current));

        for _ in 0..settings.max_iterations {
            let (x, jac) = self.value_and_jacobian(params);
            let r = target - Vector3::new(x[0], x[1], x[2]);
            let jtj = jac.transpose() * jac;
            let rhs = jac.transpose() * r;
            let Some(step) = jtj.lu().solve(&rhs) else {
                break;
            };
            if !step.iter().all(|v| v.is_finite()) {
                break;
            }

            let mut scale = 1.0;
            let mut accepted = None;
            for _ in 0..10 {
                let trial = [0, 1, 2].map(|a| (params[a] + scale * step[a]).clamp(0.0, 1.0));
                let value = self.value(trial);
                let trial_dist = norm(&sub(&x0, &value));
                if trial_dist < dist {
                    accepted = Some((trial, value, trial_dist));
                    break;
                }
                scale *= 0.5;
            }
            let Some((trial, value, trial_dist)) = accepted else {
                break;
            };
            let moved = norm(&sub(&trial, &params));
            params = trial;
            current = value;
            dist = trial_dist;
            if moved < settings.tolerance || dist < settings.tolerance {
                break;
            }
        }

        VolumeProjection {
            params,
            residual: sub(&x0, &current),
        }
    }

    fn projection_seed(&self, x0: [f64; 3], lattice: usize) -> [f64; 3] {
        let mut best = ([0.0; 3], f64::INFINITY);
        let mut consider = |params: [f64; 3], point: [f64; 3]| {
            let d = distance(&x0, &point);
            if d < best.1 {
                best = (params, d);
            }
        };

        match &self.samples {
            Some(samples) => {
                let dims = samples.grid.dims;
                for i in 0..dims[0] {
                    for j in 0..dims[1] {
                        for k in 0..dims[2] {
                            let idx = flat_index(dims, i, j, k);
                            let params = [0, 1, 2].map(|a| samples.params[a][idx]);
                            consider(params, samples.grid.points[idx]);
                        }
                    }
                }
            }
            None => {
                let n = lattice.max(2);
                let step = 1.0 / (n - 1) as f64;
                for i in 0..n {
                    for j in 0..n {
                        for k in 0..n {
                            let params = [i as f64 * step, j as f64 * step, k as f64 * step];
                            consider(params, self.value(params));
                        }
                    }
                }
            }
        }
        best.0
    }
}

fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn norm(a: &[f64; 3]) -> f64 {
    (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt()
}

pub(crate) fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    norm(&sub(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_grid(origin: [f64; 3], size: [f64; 3], dims: [usize; 3]) -> SampleGrid {
        SampleGrid::from_fn(dims, |i, j, k| {
            let idx = [i, j, k];
            [0, 1, 2].map(|a| origin[a] + size[a] * idx[a] as f64 / (dims[a] - 1) as f64)
        })
        .expect("grid")
    }

    /// Trilinear control net reproducing the identity map on the unit cube.
    fn identity_volume(order: usize, n: usize) -> Volume {
        let knots = uniform_knots(n, order);
        let greville: Vec<f64> = (0..n)
            .map(|i| knots[i + 1..i + order].iter().sum::<f64>() / (order - 1) as f64)
            .collect();
        let mut coef = Vec::new();
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    coef.push([greville[i], greville[j], greville[k]]);
                }
            }
        }
        Volume::from_control_net(
            [n; 3],
            [order; 3],
            [knots.clone(), knots.clone(), knots],
            coef,
        )
        .expect("volume")
    }

    #[test]
    fn sample_grid_rejects_bad_shapes() {
        assert!(SampleGrid::new([1, 2, 2], vec![[0.0; 3]; 4]).is_err());
        assert!(SampleGrid::new([2, 2, 2], vec![[0.0; 3]; 7]).is_err());
    }

    #[test]
    fn chord_length_parameters_follow_spacing() {
        let grid = SampleGrid::from_fn([3, 2, 2], |i, j, k| {
            let x = [0.0, 1.0, 4.0][i];
            [x, j as f64, k as f64]
        })
        .expect("grid");
        let volume = Volume::from_samples(grid, 2, 3).expect("volume");
        let params = volume.sample_params(1, 1, 0).expect("params");
        assert!((params[0] - 0.25).abs() < 1e-12);
        assert!((params[1] - 1.0).abs() < 1e-12);
        assert!((params[2] - 0.0).abs() < 1e-12);
    }

    #[test]
    fn from_samples_clamps_counts_to_grid() {
        let volume = Volume::from_samples(box_grid([0.0; 3], [1.0; 3], [2, 5, 5]), 4, 3)
            .expect("volume");
        assert_eq!(volume.n_ctl(), [2, 3, 3]);
        assert_eq!(volume.orders(), [2, 3, 3]);
        assert_eq!(volume.knots(Axis::U).len(), 4);
        assert_eq!(volume.coef().len(), 18);
    }

    #[test]
    fn from_control_net_validates_lengths() {
        let knots = uniform_knots(3, 2);
        let err = Volume::from_control_net(
            [3, 3, 3],
            [2, 2, 2],
            [knots.clone(), knots.clone(), vec![0.0, 1.0]],
            vec![[0.0; 3]; 27],
        )
        .expect_err("bad knots");
        assert!(format!("{err}").contains("expected 5 knots"));
    }

    #[test]
    fn basis_row_has_order_cubed_entries_summing_to_one() {
        let volume = identity_volume(3, 5);
        let mut row = Vec::new();
        volume.basis_row([0.3, 0.55, 0.9], &mut row);
        assert_eq!(row.len(), 27);
        let sum: f64 = row.iter().map(|(_, w)| w).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn identity_volume_evaluates_to_its_parameters() {
        let volume = identity_volume(3, 5);
        let x = volume.value([0.2, 0.7, 0.45]);
        for (got, want) in x.iter().zip([0.2, 0.7, 0.45]) {
            assert!((got - want).abs() < 1e-12);
        }
        let (_, jac) = volume.value_and_jacobian([0.2, 0.7, 0.45]);
        assert!((jac - Matrix3::identity()).norm() < 1e-10);
    }

    #[test]
    fn corners_and_midpoints_come_from_samples() {
        let volume = Volume::from_samples(box_grid([1.0, 2.0, 3.0], [2.0; 3], [4, 3, 3]), 2, 3)
            .expect("volume");
        assert_eq!(volume.corner(0), [1.0, 2.0, 3.0]);
        assert_eq!(volume.corner(7), [3.0, 4.0, 5.0]);
        // Even count along u averages the two middle samples.
        assert!(distance(&volume.edge_midpoint(0), &[2.0, 2.0, 3.0]) < 1e-12);
        assert_eq!(volume.edge_midpoint(8), [1.0, 2.0, 4.0]);
    }

    #[test]
    fn corners_fall_back_to_evaluation() {
        let volume = identity_volume(2, 3);
        assert_eq!(volume.corner(5), [1.0, 0.0, 1.0]);
        let mid = volume.edge_midpoint(11);
        assert!((mid[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn project_point_recovers_interior_parameters() {
        let volume = identity_volume(4, 6);
        let projection = volume.project_point([0.31, 0.62, 0.17], &ProjectionSettings::default());
        assert!(projection.distance() < 1e-10);
        for (got, want) in projection.params.iter().zip([0.31, 0.62, 0.17]) {
            assert!((got - want).abs() < 1e-8);
        }
    }

    #[test]
    fn project_point_clamps_outside_points() {
        let volume = identity_volume(2, 2);
        let projection = volume.project_point([1.5, 0.5, 0.5], &ProjectionSettings::default());
        assert!((projection.params[0] - 1.0).abs() < 1e-12);
        assert!((projection.distance() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn set_coef_size_keeps_coefficients_when_size_is_unchanged() {
        let mut volume = identity_volume(2, 3);
        let before = volume.coef().to_vec();
        volume.calc_knots();
        volume.set_coef_size();
        assert_eq!(volume.coef(), before.as_slice());

        volume.set_axis_size(Axis::U, 4, 2);
        volume.calc_knots();
        volume.set_coef_size();
        assert_eq!(volume.n_ctl(), [4, 3, 3]);
        assert!(volume.coef().iter().all(|c| *c == [0.0; 3]));
    }
}
