//! Global numbering of structured per-volume grids.
//!
//! The same routine numbers control points (sizes = control counts) and sample
//! points (sizes = sample grid dimensions). Slots on a corner take the node's
//! index, slots inside an edge are stored in the edge's own direction, slots
//! inside a face are stored in the frame of the first volume that reaches the
//! face, and everything else gets a fresh index.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::layout::{axis_edge, edge_between, face_at, FACE_AXES, FACE_CORNERS, FACE_SIDES};
use super::types::BlockTopology;
use crate::error::{BlockError, Result};
use crate::spline::{flat_index, Axis};

/// One local slot `(i, j, k)` of one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRef {
    pub volume: usize,
    pub i: usize,
    pub j: usize,
    pub k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalNumbering {
    sizes: Vec<[usize; 3]>,
    local_to_global: Vec<Vec<usize>>,
    global_to_local: Vec<Vec<SlotRef>>,
}

impl GlobalNumbering {
    pub fn compute(topo: &BlockTopology, sizes: &[[usize; 3]]) -> Result<Self> {
        if sizes.len() != topo.n_vol() {
            return Err(BlockError::Precondition(format!(
                "numbering needs one size per volume: topology has {}, got {}",
                topo.n_vol(),
                sizes.len()
            )));
        }
        let too_small = sizes.iter().enumerate().find(|(_, d)| d.iter().any(|&n| n < 2));
        if let Some((vol, dims)) = too_small {
            return Err(BlockError::Precondition(format!(
                "volume {vol} has grid size {dims:?}, need at least 2 per axis"
            )));
        }

        let mut numberer = Numberer::new(topo);
        let mut local_to_global = Vec::with_capacity(sizes.len());
        for (vol, &dims) in sizes.iter().enumerate() {
            let mut indices = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
            for i in 0..dims[0] {
                for j in 0..dims[1] {
                    for k in 0..dims[2] {
                        indices.push(numberer.slot(vol, dims, [i, j, k])?);
                    }
                }
            }
            local_to_global.push(indices);
        }

        let mut global_to_local = vec![Vec::new(); numberer.next];
        for (vol, &dims) in sizes.iter().enumerate() {
            for i in 0..dims[0] {
                for j in 0..dims[1] {
                    for k in 0..dims[2] {
                        let g = local_to_global[vol][flat_index(dims, i, j, k)];
                        global_to_local[g].push(SlotRef { volume: vol, i, j, k });
                    }
                }
            }
        }

        debug!(
            volumes = sizes.len(),
            local = local_to_global.iter().map(Vec::len).sum::<usize>(),
            global = global_to_local.len(),
            "computed global numbering"
        );
        Ok(Self {
            sizes: sizes.to_vec(),
            local_to_global,
            global_to_local,
        })
    }

    pub fn n_global(&self) -> usize {
        self.global_to_local.len()
    }

    pub fn n_local(&self) -> usize {
        self.local_to_global.iter().map(Vec::len).sum()
    }

    /// Grid sizes the numbering was computed for.
    pub fn sizes(&self) -> &[[usize; 3]] {
        &self.sizes
    }

    /// All local slots sharing global index `g`; the first is its representative.
    pub fn locals(&self, g: usize) -> &[SlotRef] {
        &self.global_to_local[g]
    }

    /// Global index of every slot of `vol`, in flat local order.
    pub fn local_to_global(&self, vol: usize) -> &[usize] {
        &self.local_to_global[vol]
    }

    pub fn global_index(&self, vol: usize, i: usize, j: usize, k: usize) -> usize {
        self.local_to_global[vol][flat_index(self.sizes[vol], i, j, k)]
    }

    /// Fails when any volume's grid size differs from the numbered one.
    pub fn ensure_current(&self, sizes: &[[usize; 3]]) -> Result<()> {
        if sizes.len() != self.sizes.len() {
            return Err(BlockError::Precondition(format!(
                "numbering covers {} volumes, geometry has {}",
                self.sizes.len(),
                sizes.len()
            )));
        }
        match self
            .sizes
            .iter()
            .zip(sizes)
            .position(|(numbered, current)| numbered != current)
        {
            Some(volume) => Err(BlockError::StaleNumbering {
                volume,
                numbered: self.sizes[volume],
                current: sizes[volume],
            }),
            None => Ok(()),
        }
    }
}

/// Corner nodes, side edges and interior size of one volume face, in that
/// face's `(a, b)` frame.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FaceFrame {
    nodes: [usize; 4],
    sides: [usize; 4],
    dims: [usize; 2],
}

impl FaceFrame {
    fn new(topo: &BlockTopology, vol: usize, face: usize, dims: [usize; 3]) -> Result<Self> {
        let corners = FACE_CORNERS[face];
        let [a, b] = FACE_AXES[face];
        let links = &topo.volumes[vol];
        let mut sides = [0usize; 4];
        for (side, [p, q]) in sides.iter_mut().zip(FACE_SIDES) {
            let local = edge_between(corners[p], corners[q]).ok_or_else(|| {
                BlockError::Topology(format!(
                    "face {face} corners {} and {} share no block edge",
                    corners[p], corners[q]
                ))
            })?;
            *side = links.edges[local];
        }
        Ok(Self {
            nodes: corners.map(|c| links.nodes[c]),
            sides,
            dims: [dims[a.index()] - 2, dims[b.index()] - 2],
        })
    }
}

/// Maps one face frame onto another: optional swap of the two axes, then
/// optional reversal of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FaceTransform {
    swap: bool,
    flip_a: bool,
    flip_b: bool,
}

impl FaceTransform {
    const IDENTITY: Self = Self {
        swap: false,
        flip_a: false,
        flip_b: false,
    };

    fn all() -> impl Iterator<Item = Self> {
        (0..8).map(|bits| Self {
            swap: bits & 4 != 0,
            flip_a: bits & 1 != 0,
            flip_b: bits & 2 != 0,
        })
    }

    fn corner(self, pos: usize) -> usize {
        let (mut a, mut b) = (pos & 1, pos >> 1);
        if self.swap {
            std::mem::swap(&mut a, &mut b);
        }
        (a ^ self.flip_a as usize) + 2 * (b ^ self.flip_b as usize)
    }

    fn point(self, p: usize, q: usize, target: [usize; 2]) -> [usize; 2] {
        let (mut x, mut y) = if self.swap { (q, p) } else { (p, q) };
        if self.flip_a {
            x = target[0] - 1 - x;
        }
        if self.flip_b {
            y = target[1] - 1 - y;
        }
        [x, y]
    }

    fn maps(self, from: &FaceFrame, onto: &FaceFrame) -> bool {
        let dims = if self.swap {
            [from.dims[1], from.dims[0]]
        } else {
            from.dims
        };
        if dims != onto.dims {
            return false;
        }
        if (0..4).any(|pos| from.nodes[pos] != onto.nodes[self.corner(pos)]) {
            return false;
        }
        FACE_SIDES.iter().enumerate().all(|(side, &[p, q])| {
            let (mp, mq) = (self.corner(p), self.corner(q));
            FACE_SIDES
                .iter()
                .position(|&[r, s]| (r == mp && s == mq) || (r == mq && s == mp))
                .is_some_and(|target| from.sides[side] == onto.sides[target])
        })
    }
}

struct StoredFace {
    owner: (usize, usize),
    frame: FaceFrame,
    globals: Vec<usize>,
}

struct Numberer<'a> {
    topo: &'a BlockTopology,
    next: usize,
    nodes: Vec<Option<usize>>,
    edges: Vec<Option<Vec<usize>>>,
    faces: HashMap<[usize; 4], StoredFace>,
    transforms: HashMap<(usize, usize), ([usize; 4], FaceTransform)>,
}

impl<'a> Numberer<'a> {
    fn new(topo: &'a BlockTopology) -> Self {
        Self {
            topo,
            next: 0,
            nodes: vec![None; topo.n_node()],
            edges: vec![None; topo.n_edge()],
            faces: HashMap::new(),
            transforms: HashMap::new(),
        }
    }

    fn fresh(&mut self, count: usize) -> Vec<usize> {
        let block = (self.next..self.next + count).collect();
        self.next += count;
        block
    }

    fn slot(&mut self, vol: usize, dims: [usize; 3], idx: [usize; 3]) -> Result<usize> {
        let on_bound: [bool; 3] = std::array::from_fn(|a| idx[a] == 0 || idx[a] == dims[a] - 1);
        let bit = |a: usize| usize::from(idx[a] != 0);
        // Along an edge: the one free axis. On a face: the one bound axis.
        let along = |axis: Axis| {
            let [o0, o1] = axis.others();
            let local = axis_edge(axis, [bit(o0.index()), bit(o1.index())]);
            (local, dims[axis.index()], idx[axis.index()])
        };
        let across = |axis: Axis| {
            let face = face_at(axis, bit(axis.index()));
            let [a, b] = FACE_AXES[face];
            (face, [idx[a.index()] - 1, idx[b.index()] - 1])
        };
        match on_bound {
            [true, true, true] => {
                let corner = bit(0) | (bit(1) << 1) | (bit(2) << 2);
                Ok(self.node(self.topo.volumes[vol].nodes[corner]))
            }
            [false, true, true] => {
                let (local, n, t) = along(Axis::U);
                self.edge_slot(vol, local, n, t)
            }
            [true, false, true] => {
                let (local, n, t) = along(Axis::V);
                self.edge_slot(vol, local, n, t)
            }
            [true, true, false] => {
                let (local, n, t) = along(Axis::W);
                self.edge_slot(vol, local, n, t)
            }
            [true, false, false] => {
                let (face, pq) = across(Axis::U);
                self.face_slot(vol, face, dims, pq)
            }
            [false, true, false] => {
                let (face, pq) = across(Axis::V);
                self.face_slot(vol, face, dims, pq)
            }
            [false, false, true] => {
                let (face, pq) = across(Axis::W);
                self.face_slot(vol, face, dims, pq)
            }
            [false, false, false] => Ok(self.fresh(1)[0]),
        }
    }

    fn node(&mut self, node: usize) -> usize {
        if let Some(g) = self.nodes[node] {
            return g;
        }
        let g = self.fresh(1)[0];
        self.nodes[node] = Some(g);
        g
    }

    fn edge_slot(&mut self, vol: usize, local: usize, n: usize, t: usize) -> Result<usize> {
        let edge = self.topo.edge_link(vol, local);
        let interior = n - 2;
        let stored = match self.edges[edge].take() {
            Some(stored) => stored,
            None => self.fresh(interior),
        };
        let pos = if self.topo.edge_dir(vol, local).is_reversed() {
            interior - t
        } else {
            t - 1
        };
        let found = if stored.len() == interior {
            Ok(stored[pos])
        } else {
            Err(BlockError::Topology(format!(
                "edge {edge} has {} interior points elsewhere but {interior} in volume {vol}",
                stored.len()
            )))
        };
        self.edges[edge] = Some(stored);
        found
    }

    fn face_slot(
        &mut self,
        vol: usize,
        face: usize,
        dims: [usize; 3],
        pq: [usize; 2],
    ) -> Result<usize> {
        let (key, transform) = match self.transforms.get(&(vol, face)) {
            Some(&cached) => cached,
            None => {
                let cached = self.register_face(vol, face, dims)?;
                self.transforms.insert((vol, face), cached);
                cached
            }
        };
        let stored = self.faces.get(&key).ok_or_else(|| {
            BlockError::Topology(format!("face {face} of volume {vol} was never registered"))
        })?;
        let [x, y] = transform.point(pq[0], pq[1], stored.frame.dims);
        Ok(stored.globals[x * stored.frame.dims[1] + y])
    }

    fn register_face(
        &mut self,
        vol: usize,
        face: usize,
        dims: [usize; 3],
    ) -> Result<([usize; 4], FaceTransform)> {
        let frame = FaceFrame::new(self.topo, vol, face, dims)?;
        let mut key = frame.sides;
        key.sort_unstable();

        if let Some(stored) = self.faces.get(&key) {
            let transform = FaceTransform::all()
                .find(|t| t.maps(&frame, &stored.frame))
                .ok_or_else(|| {
                    BlockError::Topology(format!(
                        "face {face} of volume {vol} cannot be oriented onto face {} of volume {}",
                        stored.owner.1, stored.owner.0
                    ))
                })?;
            return Ok((key, transform));
        }

        let globals = self.fresh(frame.dims[0] * frame.dims[1]);
        self.faces.insert(
            key,
            StoredFace {
                owner: (vol, face),
                frame,
                globals,
            },
        );
        Ok((key, FaceTransform::IDENTITY))
    }
}
