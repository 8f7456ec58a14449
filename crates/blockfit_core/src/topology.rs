//! Multi-block connectivity: shared nodes and edges, design groups, global
//! numbering of structured grids and the connectivity file format.

pub mod layout;
pub mod numbering;
pub mod resolve;
pub mod store;
pub mod types;

pub use numbering::{GlobalNumbering, SlotRef};
pub use resolve::{resolve_connectivity, resolve_volumes, ConnectivitySettings, PatchOutline};
pub use store::{load_connectivity, save_connectivity};
pub use types::{BlockTopology, Direction, Edge, Node, VolumeLinks};
