//! Corner, edge and face numbering of a single hexahedral block.
//!
//! Corner `c` sits at the parametric extreme given by its bits: bit 0 selects
//! `u`, bit 1 `v`, bit 2 `w`. Edges run from their first corner to their second
//! in the direction of increasing parameter. Face corners are listed as
//! `(a0 b0, a1 b0, a0 b1, a1 b1)` over the face's two in-plane axes.

use crate::spline::Axis;

pub const CORNERS: usize = 8;
pub const EDGES: usize = 12;
pub const FACES: usize = 6;

pub const EDGE_CORNERS: [[usize; 2]; EDGES] = [
    [0, 1],
    [2, 3],
    [0, 2],
    [1, 3],
    [4, 5],
    [6, 7],
    [4, 6],
    [5, 7],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

pub const EDGE_AXIS: [Axis; EDGES] = [
    Axis::U,
    Axis::U,
    Axis::V,
    Axis::V,
    Axis::U,
    Axis::U,
    Axis::V,
    Axis::V,
    Axis::W,
    Axis::W,
    Axis::W,
    Axis::W,
];

/// The four parallel edges running along each axis. The first one is the
/// reference edge used to read an axis's design group.
pub const AXIS_EDGES: [[usize; 4]; 3] = [[0, 1, 4, 5], [2, 3, 6, 7], [8, 9, 10, 11]];

pub const FACE_CORNERS: [[usize; 4]; FACES] = [
    [0, 1, 2, 3],
    [4, 5, 6, 7],
    [0, 2, 4, 6],
    [1, 3, 5, 7],
    [0, 1, 4, 5],
    [2, 3, 6, 7],
];

pub const FACE_AXES: [[Axis; 2]; FACES] = [
    [Axis::U, Axis::V],
    [Axis::U, Axis::V],
    [Axis::V, Axis::W],
    [Axis::V, Axis::W],
    [Axis::U, Axis::W],
    [Axis::U, Axis::W],
];

/// Sides of a face as pairs of positions in its `FACE_CORNERS` row:
/// `b = 0`, `b = 1`, `a = 0`, `a = 1`.
pub const FACE_SIDES: [[usize; 2]; 4] = [[0, 1], [2, 3], [0, 2], [1, 3]];

pub fn corner_bits(corner: usize) -> [usize; 3] {
    [corner & 1, (corner >> 1) & 1, (corner >> 2) & 1]
}

pub fn corner_from_bits(bits: [usize; 3]) -> usize {
    bits[0] | (bits[1] << 1) | (bits[2] << 2)
}

/// Local edge joining two corners, in either order.
pub fn edge_between(a: usize, b: usize) -> Option<usize> {
    EDGE_CORNERS
        .iter()
        .position(|&[c0, c1]| (c0 == a && c1 == b) || (c0 == b && c1 == a))
}

/// Edge running along `axis` at the extremes `bits` of the two remaining axes
/// (in `Axis::others` order).
pub fn axis_edge(axis: Axis, bits: [usize; 2]) -> usize {
    AXIS_EDGES[axis.index()][bits[0] + 2 * bits[1]]
}

/// Face lying at the low (`side == 0`) or high (`side == 1`) end of `axis`.
pub fn face_at(axis: Axis, side: usize) -> usize {
    match axis {
        Axis::W => side,
        Axis::U => 2 + side,
        Axis::V => 4 + side,
    }
}
