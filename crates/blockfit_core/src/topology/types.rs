//! Node, edge and per-volume link tables of a multi-block topology.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::layout::{AXIS_EDGES, CORNERS, EDGES, EDGE_AXIS};
use crate::error::{BlockError, Result};
use crate::spline::Axis;

/// Orientation of a volume-local edge relative to the stored global edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Reversed,
}

impl Direction {
    pub fn sign(self) -> i8 {
        match self {
            Direction::Forward => 1,
            Direction::Reversed => -1,
        }
    }

    pub fn from_sign(sign: i64) -> Option<Self> {
        match sign {
            1 => Some(Direction::Forward),
            -1 => Some(Direction::Reversed),
            _ => None,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Direction::Forward => Direction::Reversed,
            Direction::Reversed => Direction::Forward,
        }
    }

    pub fn is_reversed(self) -> bool {
        self == Direction::Reversed
    }
}

/// A deduplicated corner location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub position: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// End nodes in the edge's stored direction.
    pub nodes: [usize; 2],
    pub midpoint: [f64; 3],
    /// Design group: every edge in a group shares one knot vector.
    pub dg: usize,
    /// Control points along the edge; the first edge of a group sets the count
    /// for the whole group.
    pub n_ctl: usize,
}

/// Links from one volume's local corners and edges to the global tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeLinks {
    pub nodes: [usize; CORNERS],
    pub edges: [usize; EDGES],
    pub directions: [Direction; EDGES],
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlockTopology {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub volumes: Vec<VolumeLinks>,
}

impl BlockTopology {
    pub fn n_vol(&self) -> usize {
        self.volumes.len()
    }

    pub fn n_node(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_edge(&self) -> usize {
        self.edges.len()
    }

    pub fn n_design_groups(&self) -> usize {
        self.edges.iter().map(|e| e.dg + 1).max().unwrap_or(0)
    }

    pub fn edge_link(&self, vol: usize, edge: usize) -> usize {
        self.volumes[vol].edges[edge]
    }

    pub fn edge_dir(&self, vol: usize, edge: usize) -> Direction {
        self.volumes[vol].directions[edge]
    }

    /// Design group governing `axis` of volume `vol`.
    pub fn axis_design_group(&self, vol: usize, axis: Axis) -> usize {
        let reference = AXIS_EDGES[axis.index()][0];
        self.edges[self.edge_link(vol, reference)].dg
    }

    /// Control count per design group, taken from the group's first edge.
    pub fn design_group_counts(&self) -> Vec<usize> {
        let mut counts: Vec<Option<usize>> = vec![None; self.n_design_groups()];
        for edge in &self.edges {
            counts[edge.dg].get_or_insert(edge.n_ctl);
        }
        counts.into_iter().map(|c| c.unwrap_or(0)).collect()
    }

    /// Overwrites every edge's count with its design group's count.
    pub fn unify_design_group_counts(&mut self) {
        let counts = self.design_group_counts();
        for edge in &mut self.edges {
            edge.n_ctl = counts[edge.dg];
        }
    }

    /// Every `(volume, local edge, direction)` whose edge belongs to `dg`, in
    /// volume then edge order.
    pub fn design_group_members(&self, dg: usize) -> Vec<(usize, usize, Direction)> {
        let mut members = Vec::new();
        for (vol, links) in self.volumes.iter().enumerate() {
            for local in 0..EDGES {
                if self.edges[links.edges[local]].dg == dg {
                    members.push((vol, local, links.directions[local]));
                }
            }
        }
        members
    }

    /// Nodes referenced by more than one volume.
    pub fn shared_nodes(&self) -> usize {
        count_shared(self.n_node(), self.volumes.iter().map(|v| &v.nodes[..]))
    }

    /// Edges referenced by more than one volume.
    pub fn shared_edges(&self) -> usize {
        count_shared(self.n_edge(), self.volumes.iter().map(|v| &v.edges[..]))
    }

    /// Checks index ranges and that each volume's parallel edges share a
    /// design group.
    pub fn validate(&self) -> Result<()> {
        for (id, edge) in self.edges.iter().enumerate() {
            if edge.nodes.iter().any(|&n| n >= self.n_node()) {
                return Err(BlockError::Topology(format!(
                    "edge {id} references node outside 0..{}",
                    self.n_node()
                )));
            }
            if edge.n_ctl < 2 {
                return Err(BlockError::Topology(format!(
                    "edge {id} has {} control points, need at least 2",
                    edge.n_ctl
                )));
            }
        }
        for (vol, links) in self.volumes.iter().enumerate() {
            if let Some(&n) = links.nodes.iter().find(|&&n| n >= self.n_node()) {
                return Err(BlockError::Topology(format!(
                    "volume {vol} references node {n} outside 0..{}",
                    self.n_node()
                )));
            }
            if let Some(&e) = links.edges.iter().find(|&&e| e >= self.n_edge()) {
                return Err(BlockError::Topology(format!(
                    "volume {vol} references edge {e} outside 0..{}",
                    self.n_edge()
                )));
            }
            for axis in Axis::ALL {
                let groups: BTreeSet<usize> = AXIS_EDGES[axis.index()]
                    .iter()
                    .map(|&local| self.edges[links.edges[local]].dg)
                    .collect();
                if groups.len() > 1 {
                    return Err(BlockError::Topology(format!(
                        "volume {vol} axis {axis:?} spans design groups {groups:?}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn count_shared<'a>(len: usize, links: impl Iterator<Item = &'a [usize]>) -> usize {
    let mut owners: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); len];
    for (vol, ids) in links.enumerate() {
        for &id in ids {
            owners[id].insert(vol);
        }
    }
    owners.iter().filter(|o| o.len() > 1).count()
}

impl fmt::Display for BlockTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} volumes, {} nodes, {} edges, {} design groups",
            self.n_vol(),
            self.n_node(),
            self.n_edge(),
            self.n_design_groups()
        )?;
        writeln!(f, "{:>6} {:>6} {:>6} {:>4} {:>6}", "edge", "n0", "n1", "dg", "n_ctl")?;
        for (id, edge) in self.edges.iter().enumerate() {
            writeln!(
                f,
                "{:>6} {:>6} {:>6} {:>4} {:>6}",
                id, edge.nodes[0], edge.nodes[1], edge.dg, edge.n_ctl
            )?;
        }
        for (vol, links) in self.volumes.iter().enumerate() {
            write!(f, "volume {vol}:")?;
            for local in 0..EDGES {
                let axis = match EDGE_AXIS[local] {
                    Axis::U => 'u',
                    Axis::V => 'v',
                    Axis::W => 'w',
                };
                write!(
                    f,
                    " {}{}{:+}",
                    axis,
                    links.edges[local],
                    links.directions[local].sign()
                )?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_volume_topology() -> BlockTopology {
        let links = |offset: usize| VolumeLinks {
            nodes: [0; CORNERS],
            edges: std::array::from_fn(|i| if i < 4 { i + offset } else { i }),
            directions: [Direction::Forward; EDGES],
        };
        let edges = (0..14)
            .map(|id| Edge {
                nodes: [0, 0],
                midpoint: [0.0; 3],
                dg: match id {
                    0 | 1 | 4 | 5 | 12 => 0,
                    _ => 1,
                },
                n_ctl: 3 + id,
            })
            .collect();
        BlockTopology {
            nodes: vec![Node {
                position: [0.0; 3],
            }],
            edges,
            volumes: vec![links(0), links(2)],
        }
    }

    #[test]
    fn direction_signs_round_trip() {
        for dir in [Direction::Forward, Direction::Reversed] {
            assert_eq!(Direction::from_sign(dir.sign() as i64), Some(dir));
            assert_eq!(dir.flipped().flipped(), dir);
        }
        assert_eq!(Direction::from_sign(0), None);
    }

    #[test]
    fn design_group_counts_take_first_edge() {
        let mut topo = two_volume_topology();
        assert_eq!(topo.n_design_groups(), 2);
        assert_eq!(topo.design_group_counts(), vec![3, 5]);
        topo.unify_design_group_counts();
        assert!(topo.edges.iter().all(|e| e.n_ctl == if e.dg == 0 { 3 } else { 5 }));
    }

    #[test]
    fn shared_counts_and_members() {
        let topo = two_volume_topology();
        // Edges 2, 3 appear in both volumes, as do edges 4..12.
        assert_eq!(topo.shared_edges(), 10);
        assert_eq!(topo.shared_nodes(), 1);
        let members = topo.design_group_members(0);
        assert!(members.contains(&(0, 0, Direction::Forward)));
        assert!(members.contains(&(0, 1, Direction::Forward)));
    }

    #[test]
    fn validate_rejects_split_axis() {
        let topo = two_volume_topology();
        let err = topo.validate().expect_err("volume 1 axis u mixes groups");
        assert!(format!("{err}").contains("spans design groups"));
    }
}
