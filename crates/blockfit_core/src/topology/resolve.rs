//! Corner, edge and design-group resolution from per-volume outlines.
//!
//! Corners closer than `node_tol` merge into one node; merging is transitive,
//! so the result does not depend on volume order. Two volume edges are the same
//! global edge when their end nodes match in either orientation and their
//! midpoints lie within `edge_tol`. When more than one stored edge qualifies the
//! nearest midpoint wins, then the lowest edge id.
//!
//! Design groups are the connected components of "parallel in some volume".
//! Each group's edges are re-oriented to agree with the group's first edge, so a
//! volume's four parallel edges carry the same direction flag.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::layout::{AXIS_EDGES, CORNERS, EDGES, EDGE_CORNERS};
use super::types::{BlockTopology, Direction, Edge, Node, VolumeLinks};
use crate::spline::volume::distance;
use crate::spline::{Axis, Volume};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivitySettings {
    /// Absolute distance below which two corners are one node.
    pub node_tol: f64,
    /// Absolute distance below which two edge midpoints coincide.
    pub edge_tol: f64,
    /// Control count given to every new edge.
    pub default_n_ctl: usize,
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            node_tol: 1e-4,
            edge_tol: 1e-4,
            default_n_ctl: 4,
        }
    }
}

/// The geometric features of one volume that connectivity looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOutline {
    pub corners: [[f64; 3]; CORNERS],
    pub midpoints: [[f64; 3]; EDGES],
}

impl PatchOutline {
    pub fn from_volume(volume: &Volume) -> Self {
        Self {
            corners: std::array::from_fn(|c| volume.corner(c)),
            midpoints: std::array::from_fn(|e| volume.edge_midpoint(e)),
        }
    }
}

pub fn resolve_volumes(volumes: &[Volume], settings: &ConnectivitySettings) -> BlockTopology {
    let outlines: Vec<PatchOutline> = volumes.iter().map(PatchOutline::from_volume).collect();
    resolve_connectivity(&outlines, settings)
}

pub fn resolve_connectivity(
    outlines: &[PatchOutline],
    settings: &ConnectivitySettings,
) -> BlockTopology {
    let (nodes, corner_nodes) = merge_corners(outlines, settings.node_tol);

    let mut edges: Vec<Edge> = Vec::new();
    let mut by_nodes: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    let mut volumes = Vec::with_capacity(outlines.len());

    for (vol, outline) in outlines.iter().enumerate() {
        let node_ids: [usize; CORNERS] = std::array::from_fn(|c| corner_nodes[vol * CORNERS + c]);
        let mut links = VolumeLinks {
            nodes: node_ids,
            edges: [0; EDGES],
            directions: [Direction::Forward; EDGES],
        };

        for local in 0..EDGES {
            let [c0, c1] = EDGE_CORNERS[local];
            let (n0, n1) = (node_ids[c0], node_ids[c1]);
            let midpoint = outline.midpoints[local];
            let key = (n0.min(n1), n0.max(n1));

            let candidates = by_nodes.entry(key).or_default();
            let matched = nearest_edge(&edges, candidates, &midpoint, settings.edge_tol);
            let (id, direction) = match matched {
                Some(id) => {
                    let direction = if n0 != n1 && edges[id].nodes == [n1, n0] {
                        Direction::Reversed
                    } else {
                        Direction::Forward
                    };
                    (id, direction)
                }
                None => {
                    let id = edges.len();
                    edges.push(Edge {
                        nodes: [n0, n1],
                        midpoint,
                        dg: 0,
                        n_ctl: settings.default_n_ctl,
                    });
                    candidates.push(id);
                    (id, Direction::Forward)
                }
            };
            links.edges[local] = id;
            links.directions[local] = direction;
        }
        volumes.push(links);
    }

    let mut topo = BlockTopology {
        nodes,
        edges,
        volumes,
    };
    assign_design_groups(&mut topo);

    info!(
        volumes = topo.n_vol(),
        nodes = topo.n_node(),
        edges = topo.n_edge(),
        design_groups = topo.n_design_groups(),
        shared_nodes = topo.shared_nodes(),
        shared_edges = topo.shared_edges(),
        "resolved connectivity"
    );
    topo
}

/// Unions corners within `tol` and numbers the resulting nodes by first
/// appearance. Returns the node table and the node of every corner.
fn merge_corners(outlines: &[PatchOutline], tol: f64) -> (Vec<Node>, Vec<usize>) {
    let corners: Vec<[f64; 3]> = outlines.iter().flat_map(|o| o.corners).collect();
    let mut forest = ParityForest::new(corners.len());

    let mut order: Vec<usize> = (0..corners.len()).collect();
    order.sort_by(|&a, &b| corners[a][0].total_cmp(&corners[b][0]));
    for (pos, &a) in order.iter().enumerate() {
        for &b in &order[pos + 1..] {
            if corners[b][0] - corners[a][0] > tol {
                break;
            }
            if distance(&corners[a], &corners[b]) <= tol {
                forest.union(a, b, false);
            }
        }
    }

    let mut node_of_root: HashMap<usize, usize> = HashMap::new();
    let mut nodes = Vec::new();
    let mut corner_nodes = Vec::with_capacity(corners.len());
    for (idx, corner) in corners.iter().enumerate() {
        let (root, _) = forest.find(idx);
        let node = *node_of_root.entry(root).or_insert_with(|| {
            nodes.push(Node { position: *corner });
            nodes.len() - 1
        });
        corner_nodes.push(node);
    }
    (nodes, corner_nodes)
}

fn nearest_edge(
    edges: &[Edge],
    candidates: &[usize],
    midpoint: &[f64; 3],
    tol: f64,
) -> Option<usize> {
    let mut within: Vec<(f64, usize)> = candidates
        .iter()
        .map(|&id| (distance(&edges[id].midpoint, midpoint), id))
        .filter(|&(d, _)| d <= tol)
        .collect();
    if within.len() > 1 {
        debug!(candidates = within.len(), "edge match ambiguous, taking nearest midpoint");
    }
    within.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    within.first().map(|&(_, id)| id)
}

/// Groups parallel edges, numbers groups by first appearance in edge order and
/// flips stored edges so each agrees with its group's first edge.
fn assign_design_groups(topo: &mut BlockTopology) {
    let mut forest = ParityForest::new(topo.n_edge());
    let mut conflicts = 0usize;
    for (vol, links) in topo.volumes.iter().enumerate() {
        for axis in Axis::ALL {
            let [reference, rest @ ..] = AXIS_EDGES[axis.index()];
            for other in rest {
                let odd = links.directions[reference] != links.directions[other];
                if !forest.union(links.edges[reference], links.edges[other], odd) {
                    conflicts += 1;
                    warn!(volume = vol, axis = ?axis, "design group orientation conflict");
                }
            }
        }
    }

    let mut dg_of_root: HashMap<usize, (usize, bool)> = HashMap::new();
    let mut flip = vec![false; topo.n_edge()];
    for id in 0..topo.n_edge() {
        let (root, parity) = forest.find(id);
        let next = dg_of_root.len();
        let &mut (dg, frame) = dg_of_root.entry(root).or_insert((next, parity));
        topo.edges[id].dg = dg;
        flip[id] = parity != frame;
    }

    for (id, edge) in topo.edges.iter_mut().enumerate() {
        if flip[id] {
            edge.nodes.swap(0, 1);
        }
    }
    for links in &mut topo.volumes {
        for local in 0..EDGES {
            if flip[links.edges[local]] {
                links.directions[local] = links.directions[local].flipped();
            }
        }
    }
    if conflicts > 0 {
        warn!(conflicts, "some design groups have no consistent orientation");
    }
}

/// Union-find whose links carry a parity bit: the relative orientation of a
/// member with respect to its root.
struct ParityForest {
    parent: Vec<usize>,
    parity: Vec<bool>,
    size: Vec<usize>,
}

impl ParityForest {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            parity: vec![false; len],
            size: vec![1; len],
        }
    }

    fn find(&mut self, x: usize) -> (usize, bool) {
        let mut path = Vec::new();
        let mut root = x;
        while self.parent[root] != root {
            path.push(root);
            root = self.parent[root];
        }
        for &node in path.iter().rev() {
            let parent = self.parent[node];
            if parent != root {
                self.parity[node] ^= self.parity[parent];
            }
            self.parent[node] = root;
        }
        (root, if x == root { false } else { self.parity[x] })
    }

    /// Joins `a` and `b` with relative parity `odd`. Returns false when they are
    /// already joined with the opposite parity.
    fn union(&mut self, a: usize, b: usize, odd: bool) -> bool {
        let (ra, pa) = self.find(a);
        let (rb, pb) = self.find(b);
        if ra == rb {
            return (pa ^ pb) == odd;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.parity[small] = pa ^ pb ^ odd;
        self.size[big] += self.size[small];
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::layout::corner_bits;

    fn box_outline(origin: [f64; 3], size: [f64; 3]) -> PatchOutline {
        let corners: [[f64; 3]; CORNERS] = std::array::from_fn(|c| {
            let bits = corner_bits(c);
            std::array::from_fn(|a| origin[a] + size[a] * bits[a] as f64)
        });
        let midpoints = std::array::from_fn(|e| {
            let [c0, c1] = EDGE_CORNERS[e];
            std::array::from_fn(|a| 0.5 * (corners[c0][a] + corners[c1][a]))
        });
        PatchOutline { corners, midpoints }
    }

    /// Unit box whose `u` axis runs in -x.
    fn mirrored_outline(origin: [f64; 3]) -> PatchOutline {
        let mut outline = box_outline(origin, [1.0, 1.0, 1.0]);
        for corner in &mut outline.corners {
            corner[0] = 2.0 * origin[0] + 1.0 - corner[0];
        }
        for midpoint in &mut outline.midpoints {
            midpoint[0] = 2.0 * origin[0] + 1.0 - midpoint[0];
        }
        outline
    }

    #[test]
    fn parity_forest_detects_conflicts() {
        let mut forest = ParityForest::new(3);
        assert!(forest.union(0, 1, true));
        assert!(forest.union(1, 2, true));
        assert_eq!(forest.find(2).1, forest.find(0).1);
        assert!(!forest.union(0, 2, true));
        assert!(forest.union(0, 2, false));
    }

    #[test]
    fn edge_match_prefers_nearest_midpoint_then_lowest_id() {
        // Three stored edges on the same node pair, bowed in different directions.
        let edges: Vec<Edge> = [[0.5, 0.0, 0.0], [0.5, 0.3, 0.0], [0.5, 0.0, 0.3]]
            .into_iter()
            .map(|midpoint| Edge {
                nodes: [0, 1],
                midpoint,
                dg: 0,
                n_ctl: 4,
            })
            .collect();

        assert_eq!(nearest_edge(&edges, &[0, 1, 2], &[0.5, 0.2, 0.0], 0.5), Some(1));
        assert_eq!(nearest_edge(&edges, &[0, 1, 2], &[0.5, 0.0, 0.25], 0.5), Some(2));
        // Equidistant from all three.
        let tie = [0.5, 0.15, 0.15];
        assert_eq!(nearest_edge(&edges, &[2, 1, 0], &tie, 0.5), Some(0));
        assert_eq!(nearest_edge(&edges, &[2, 1], &tie, 0.5), Some(1));
        assert_eq!(nearest_edge(&edges, &[0, 1, 2], &tie, 0.1), None);
    }

    #[test]
    fn single_box_has_three_groups() {
        let topo = resolve_connectivity(
            &[box_outline([0.0; 3], [1.0; 3])],
            &ConnectivitySettings::default(),
        );
        assert_eq!(topo.n_node(), 8);
        assert_eq!(topo.n_edge(), 12);
        assert_eq!(topo.n_design_groups(), 3);
        assert!(topo.volumes[0]
            .directions
            .iter()
            .all(|d| *d == Direction::Forward));
        assert_eq!(topo.design_group_counts(), vec![4, 4, 4]);
    }

    #[test]
    fn boxes_sharing_a_face_share_four_nodes_and_edges() {
        let outlines = [
            box_outline([0.0; 3], [1.0; 3]),
            box_outline([1.0, 0.0, 0.0], [1.0; 3]),
        ];
        let topo = resolve_connectivity(&outlines, &ConnectivitySettings::default());
        assert_eq!(topo.n_node(), 12);
        assert_eq!(topo.n_edge(), 20);
        assert_eq!(topo.shared_nodes(), 4);
        assert_eq!(topo.shared_edges(), 4);
        // u axes stay separate; v and w groups span both boxes.
        assert_eq!(topo.n_design_groups(), 4);
        assert_eq!(
            topo.axis_design_group(0, Axis::V),
            topo.axis_design_group(1, Axis::V)
        );
        assert_ne!(
            topo.axis_design_group(0, Axis::U),
            topo.axis_design_group(1, Axis::U)
        );
        topo.validate().expect("resolved topology should validate");
    }

    #[test]
    fn disjoint_boxes_share_nothing() {
        let outlines = [
            box_outline([0.0; 3], [1.0; 3]),
            box_outline([5.0, 0.0, 0.0], [1.0; 3]),
        ];
        let topo = resolve_connectivity(&outlines, &ConnectivitySettings::default());
        assert_eq!(topo.shared_nodes(), 0);
        assert_eq!(topo.shared_edges(), 0);
        assert_eq!(topo.n_design_groups(), 6);
    }

    #[test]
    fn corners_within_tolerance_merge_transitively() {
        let mut second = box_outline([1.0, 0.0, 0.0], [1.0; 3]);
        second.corners[0][0] += 5e-5;
        let outlines = [box_outline([0.0; 3], [1.0; 3]), second];
        let settings = ConnectivitySettings::default();
        let topo = resolve_connectivity(&outlines, &settings);
        assert_eq!(topo.n_node(), 12);

        let mut reversed = outlines.to_vec();
        reversed.reverse();
        let flipped = resolve_connectivity(&reversed, &settings);
        assert_eq!(flipped.n_node(), 12);
        assert_eq!(flipped.shared_nodes(), topo.shared_nodes());
    }

    #[test]
    fn reversed_neighbour_is_flagged_and_groups_stay_consistent() {
        let outlines = [box_outline([0.0; 3], [1.0; 3]), mirrored_outline([1.0, 0.0, 0.0])];
        let topo = resolve_connectivity(&outlines, &ConnectivitySettings::default());
        assert_eq!(topo.shared_edges(), 4);
        // Second box's v and w edges run the same way; its u edges run in -x but
        // form their own group, normalized to that box's frame.
        for axis in Axis::ALL {
            for vol in 0..2 {
                let dirs: Vec<Direction> = AXIS_EDGES[axis.index()]
                    .iter()
                    .map(|&e| topo.edge_dir(vol, e))
                    .collect();
                assert!(dirs.iter().all(|d| *d == dirs[0]), "vol {vol} axis {axis:?}");
            }
        }
        assert!(topo
            .volumes
            .iter()
            .all(|v| v.directions.iter().all(|d| *d == Direction::Forward)));
    }

    #[test]
    fn flipped_shared_edge_reports_reversal() {
        // Box 1 sits on top of box 0 with its u axis running in -x, so its
        // bottom u edges are box 0's top u edges traversed backwards.
        let base = box_outline([0.0; 3], [1.0; 3]);
        let mut stacked = box_outline([0.0, 0.0, 1.0], [1.0; 3]);
        for corner in &mut stacked.corners {
            corner[0] = 1.0 - corner[0];
        }
        for midpoint in &mut stacked.midpoints {
            midpoint[0] = 1.0 - midpoint[0];
        }
        let topo = resolve_connectivity(&[base, stacked], &ConnectivitySettings::default());
        assert_eq!(topo.edge_link(0, 4), topo.edge_link(1, 0));
        assert_eq!(
            topo.axis_design_group(0, Axis::U),
            topo.axis_design_group(1, Axis::U)
        );
        assert_eq!(topo.edge_dir(0, 0), Direction::Forward);
        for &local in &AXIS_EDGES[Axis::U.index()] {
            assert_eq!(topo.edge_dir(1, local), Direction::Reversed);
        }
    }
}
