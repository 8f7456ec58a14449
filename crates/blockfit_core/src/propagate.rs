//! Knot-vector propagation across design groups.
//!
//! Every volume axis in a design group ends up with the same control count,
//! order and knot vector, read in the group's frame: a reversed axis stores the
//! consensus vector flipped.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BlockError, Result};
use crate::spline::knots::{blend_knot_vectors, flip_knots};
use crate::spline::{Axis, Volume};
use crate::topology::layout::AXIS_EDGES;
use crate::topology::{BlockTopology, Direction};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnotSettings {
    /// Highest order propagation raises an axis to.
    pub max_order: usize,
    /// Symmetrize consensus knot vectors about 0.5.
    pub symmetric: bool,
}

impl Default for KnotSettings {
    fn default() -> Self {
        Self {
            max_order: 4,
            symmetric: false,
        }
    }
}

/// New order for an axis that is to carry `n_ctl` control points.
pub fn clamp_order(order: usize, n_ctl: usize, max_order: usize) -> usize {
    if order < n_ctl {
        max_order.min(n_ctl)
    } else {
        n_ctl
    }
}

pub fn propagate_knots(
    topo: &BlockTopology,
    volumes: &mut [Volume],
    settings: &KnotSettings,
) -> Result<()> {
    if volumes.len() != topo.n_vol() {
        return Err(BlockError::Precondition(format!(
            "topology has {} volumes, geometry has {}",
            topo.n_vol(),
            volumes.len()
        )));
    }
    if settings.max_order < 2 {
        return Err(BlockError::Precondition(format!(
            "max_order must be at least 2, got {}",
            settings.max_order
        )));
    }
    let counts = topo.design_group_counts();
    if let Some(dg) = counts.iter().position(|&n| n < 2) {
        return Err(BlockError::Precondition(format!(
            "design group {dg} has {} control points, need at least 2",
            counts[dg]
        )));
    }

    let members = axis_members(topo);

    let mut group_order = vec![0usize; counts.len()];
    for (dg, axes) in members.iter().enumerate() {
        for &(vol, axis, _) in axes {
            let current = volumes[vol].orders()[axis.index()];
            let order = clamp_order(current, counts[dg], settings.max_order);
            group_order[dg] = group_order[dg].max(order);
        }
    }
    for (dg, axes) in members.iter().enumerate() {
        for &(vol, axis, _) in axes {
            volumes[vol].set_axis_size(axis, counts[dg], group_order[dg]);
        }
    }
    for volume in volumes.iter_mut() {
        volume.calc_knots();
    }

    for (dg, axes) in members.iter().enumerate() {
        let gathered: Vec<Vec<f64>> = axes
            .iter()
            .map(|&(vol, axis, dir)| {
                let knots = volumes[vol].knots(axis);
                match dir {
                    Direction::Forward => knots.to_vec(),
                    Direction::Reversed => flip_knots(knots),
                }
            })
            .collect();
        if gathered.is_empty() {
            continue;
        }
        let consensus = if !settings.symmetric && already_agree(&gathered) {
            gathered[0].clone()
        } else {
            blend_knot_vectors(&gathered, settings.symmetric)?
        };
        debug!(
            dg,
            members = axes.len(),
            n_ctl = counts[dg],
            order = group_order[dg],
            "blended knots"
        );
        for &(vol, axis, dir) in axes {
            let knots = match dir {
                Direction::Forward => consensus.clone(),
                Direction::Reversed => flip_knots(&consensus),
            };
            volumes[vol].set_knots(axis, knots);
        }
    }

    for volume in volumes.iter_mut() {
        volume.set_coef_size();
    }
    info!(
        design_groups = counts.len(),
        control_points = volumes.iter().map(|v| v.coef().len()).sum::<usize>(),
        "propagated knot vectors"
    );
    Ok(())
}

/// `(volume, axis, direction)` of every volume axis, grouped by design group.
/// An axis's direction is read from its reference edge.
fn axis_members(topo: &BlockTopology) -> Vec<Vec<(usize, Axis, Direction)>> {
    let mut members = vec![Vec::new(); topo.n_design_groups()];
    for vol in 0..topo.n_vol() {
        for axis in Axis::ALL {
            let dg = topo.axis_design_group(vol, axis);
            let dir = topo.edge_dir(vol, AXIS_EDGES[axis.index()][0]);
            members[dg].push((vol, axis, dir));
        }
    }
    members
}

/// Vectors read back after an earlier propagation differ from the consensus
/// only by flip round-off; keep the consensus as is so repeated runs are stable.
fn already_agree(vectors: &[Vec<f64>]) -> bool {
    let first = &vectors[0];
    vectors.iter().all(|v| {
        v.len() == first.len() && v.iter().zip(first).all(|(a, b)| (a - b).abs() <= 1e-12)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spline::SampleGrid;
    use crate::topology::resolve_volumes;
    use crate::topology::ConnectivitySettings;

    fn graded_box(offset: f64, dims: [usize; 3]) -> Volume {
        let grid = SampleGrid::from_fn(dims, |i, j, k| {
            let s = i as f64 / (dims[0] - 1) as f64;
            [
                offset + s * s,
                j as f64 / (dims[1] - 1) as f64,
                k as f64 / (dims[2] - 1) as f64,
            ]
        })
        .expect("grid");
        Volume::from_samples(grid, 2, 3).expect("volume")
    }

    #[test]
    fn clamp_order_never_exceeds_count() {
        assert_eq!(clamp_order(2, 6, 4), 4);
        assert_eq!(clamp_order(2, 3, 4), 3);
        assert_eq!(clamp_order(4, 4, 4), 4);
        assert_eq!(clamp_order(4, 2, 4), 2);
    }

    #[test]
    fn design_groups_share_counts_orders_and_knots() {
        let mut volumes = vec![graded_box(0.0, [7, 5, 5]), graded_box(1.0, [9, 5, 5])];
        let topo = resolve_volumes(&volumes, &ConnectivitySettings::default());
        propagate_knots(&topo, &mut volumes, &KnotSettings::default()).expect("propagate");

        for volume in &volumes {
            assert_eq!(volume.n_ctl(), [4, 4, 4]);
            assert_eq!(volume.orders(), [4, 4, 4]);
            assert_eq!(volume.coef().len(), 64);
        }
        assert_eq!(volumes[0].knots(Axis::V), volumes[1].knots(Axis::V));
        assert_eq!(volumes[0].knots(Axis::W), volumes[1].knots(Axis::W));
    }

    #[test]
    fn reversed_axis_receives_flipped_consensus() {
        // Second box sits on the first with its u axis running in -x over
        // the same graded samples.
        let first = graded_box(0.0, [6, 4, 4]);
        let grid = SampleGrid::from_fn([6, 4, 4], |i, j, k| {
            let s = (5 - i) as f64 / 5.0;
            [s * s, j as f64 / 3.0, 1.0 + k as f64 / 3.0]
        })
        .expect("grid");
        let second = Volume::from_samples(grid, 2, 3).expect("volume");
        let mut volumes = vec![first, second];
        let mut topo = resolve_volumes(&volumes, &ConnectivitySettings::default());
        let dg = topo.axis_design_group(0, Axis::U);
        assert_eq!(dg, topo.axis_design_group(1, Axis::U));
        for edge in &mut topo.edges {
            edge.n_ctl = 5;
        }
        propagate_knots(&topo, &mut volumes, &KnotSettings::default()).expect("propagate");

        let forward = volumes[0].knots(Axis::U).to_vec();
        let reversed = volumes[1].knots(Axis::U).to_vec();
        assert_eq!(reversed, flip_knots(&forward));
        assert_eq!(forward.len(), 5 + 4);
    }

    #[test]
    fn propagation_is_idempotent() {
        let mut volumes = vec![graded_box(0.0, [7, 5, 4]), graded_box(1.0, [8, 5, 4])];
        let topo = resolve_volumes(&volumes, &ConnectivitySettings::default());
        let settings = KnotSettings {
            symmetric: true,
            ..KnotSettings::default()
        };
        propagate_knots(&topo, &mut volumes, &settings).expect("first pass");
        let once = volumes.clone();
        propagate_knots(&topo, &mut volumes, &settings).expect("second pass");
        assert_eq!(volumes, once);
    }

    #[test]
    fn rejects_mismatched_volume_count() {
        let mut volumes = vec![graded_box(0.0, [4, 4, 4])];
        let topo = resolve_volumes(&volumes, &ConnectivitySettings::default());
        let err = propagate_knots(&topo, &mut volumes[..0], &KnotSettings::default())
            .expect_err("no volumes");
        assert!(format!("{err}").contains("topology has 1 volumes"));
    }
}
