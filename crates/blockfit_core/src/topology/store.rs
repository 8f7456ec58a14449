//! Plain-text connectivity files.
//!
//! ```text
//! # comment
//! nodes 12
//! 0 0 0 0
//! ...
//! edges 20
//! # id n0 n1 dg n_ctl mx my mz
//! 0 0 1 0 4 0.5 0 0
//! ...
//! volumes 2
//! # id : 8 nodes | 12 edges | 12 directions
//! 0 : 0 1 2 3 4 5 6 7 | 0 1 ... 11 | 1 1 ... -1
//! ```
//!
//! Edge `n_ctl` values may be edited by hand between runs; after loading, the
//! first edge of each design group sets the count for the group.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::info;

use super::layout::{CORNERS, EDGES};
use super::types::{BlockTopology, Direction, Edge, Node, VolumeLinks};
use crate::error::{BlockError, Result};

pub fn save_connectivity(path: &Path, topo: &BlockTopology) -> Result<()> {
    let file = fs::File::create(path).map_err(|e| BlockError::io(path, e))?;
    let mut out = BufWriter::new(file);
    write_topology(&mut out, topo)
        .and_then(|()| out.flush())
        .map_err(|e| BlockError::io(path, e))?;
    info!(path = %path.display(), edges = topo.n_edge(), "wrote connectivity");
    Ok(())
}

fn write_topology(out: &mut impl Write, topo: &BlockTopology) -> std::io::Result<()> {
    writeln!(out, "# blockfit connectivity")?;
    writeln!(out, "nodes {}", topo.n_node())?;
    for (id, node) in topo.nodes.iter().enumerate() {
        let [x, y, z] = node.position;
        writeln!(out, "{id} {x} {y} {z}")?;
    }
    writeln!(out, "edges {}", topo.n_edge())?;
    writeln!(out, "# id n0 n1 dg n_ctl mx my mz")?;
    for (id, edge) in topo.edges.iter().enumerate() {
        let [mx, my, mz] = edge.midpoint;
        writeln!(
            out,
            "{id} {} {} {} {} {mx} {my} {mz}",
            edge.nodes[0], edge.nodes[1], edge.dg, edge.n_ctl
        )?;
    }
    writeln!(out, "volumes {}", topo.n_vol())?;
    writeln!(out, "# id : nodes | edges | directions")?;
    for (id, links) in topo.volumes.iter().enumerate() {
        let signs = links.directions.map(Direction::sign);
        writeln!(
            out,
            "{id} : {} | {} | {}",
            joined(&links.nodes),
            joined(&links.edges),
            joined(&signs)
        )?;
    }
    Ok(())
}

fn joined<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn load_connectivity(path: &Path) -> Result<BlockTopology> {
    let text = fs::read_to_string(path).map_err(|e| BlockError::io(path, e))?;
    let mut lines = Lines::new(path, &text);

    let n_node = lines.header("nodes")?;
    let mut nodes = Vec::with_capacity(n_node);
    for id in 0..n_node {
        let (line, fields) = lines.record("nodes", n_node, id)?;
        let values: Vec<f64> = line.parse_all(&fields, 4)?;
        nodes.push(Node {
            position: [values[1], values[2], values[3]],
        });
    }

    let n_edge = lines.header("edges")?;
    let mut edges = Vec::with_capacity(n_edge);
    for id in 0..n_edge {
        let (line, fields) = lines.record("edges", n_edge, id)?;
        if fields.len() != 8 {
            return Err(line.error(format!("edge record needs 8 fields, found {}", fields.len())));
        }
        let ints: Vec<usize> = line.parse_all(&fields[..5], 5)?;
        let floats: Vec<f64> = line.parse_all(&fields[5..], 3)?;
        edges.push(Edge {
            nodes: [ints[1], ints[2]],
            dg: ints[3],
            n_ctl: ints[4],
            midpoint: [floats[0], floats[1], floats[2]],
        });
    }

    let n_vol = lines.header("volumes")?;
    let mut volumes = Vec::with_capacity(n_vol);
    for id in 0..n_vol {
        let (line, fields) = lines.record("volumes", n_vol, id)?;
        volumes.push(parse_volume(&line, &fields)?);
    }

    let mut topo = BlockTopology {
        nodes,
        edges,
        volumes,
    };
    topo.validate()?;
    let counts = topo.design_group_counts();
    if let Some(dg) = counts.iter().position(|&n| n == 0) {
        return Err(BlockError::Topology(format!("design group {dg} has no edges")));
    }
    topo.unify_design_group_counts();
    info!(
        path = %path.display(),
        volumes = topo.n_vol(),
        edges = topo.n_edge(),
        design_groups = topo.n_design_groups(),
        "loaded connectivity"
    );
    Ok(topo)
}

fn parse_volume(line: &Line, fields: &[&str]) -> Result<VolumeLinks> {
    // id : nodes | edges | directions
    let expected = 1 + 1 + CORNERS + 1 + EDGES + 1 + EDGES;
    if fields.len() != expected || fields[1] != ":" || fields[2 + CORNERS] != "|" {
        return Err(line.error(format!(
            "volume record needs `id : {CORNERS} nodes | {EDGES} edges | {EDGES} directions`"
        )));
    }
    let edge_start = 3 + CORNERS;
    let dir_start = edge_start + EDGES + 1;
    if fields[dir_start - 1] != "|" {
        return Err(line.error("missing `|` before directions".into()));
    }
    let nodes: Vec<usize> = line.parse_all(&fields[2..2 + CORNERS], CORNERS)?;
    let edges: Vec<usize> = line.parse_all(&fields[edge_start..edge_start + EDGES], EDGES)?;
    let signs: Vec<i64> = line.parse_all(&fields[dir_start..], EDGES)?;
    let mut directions = [Direction::Forward; EDGES];
    for (slot, sign) in directions.iter_mut().zip(signs) {
        *slot = Direction::from_sign(sign)
            .ok_or_else(|| line.error(format!("edge direction must be 1 or -1, found {sign}")))?;
    }
    Ok(VolumeLinks {
        nodes: std::array::from_fn(|c| nodes[c]),
        edges: std::array::from_fn(|e| edges[e]),
        directions,
    })
}

struct Line {
    path: PathBuf,
    number: usize,
}

impl Line {
    fn error(&self, message: String) -> BlockError {
        BlockError::Format {
            path: self.path.clone(),
            line: self.number,
            message,
        }
    }

    fn parse_all<T: FromStr>(&self, fields: &[&str], count: usize) -> Result<Vec<T>> {
        if fields.len() != count {
            return Err(self.error(format!("expected {count} values, found {}", fields.len())));
        }
        fields
            .iter()
            .map(|f| {
                f.parse()
                    .map_err(|_| self.error(format!("cannot parse `{f}`")))
            })
            .collect()
    }
}

/// Non-blank, non-comment lines with their 1-based line numbers.
struct Lines<'a> {
    path: &'a Path,
    inner: std::iter::Peekable<Box<dyn Iterator<Item = (usize, &'a str)> + 'a>>,
    last_line: usize,
}

impl<'a> Lines<'a> {
    fn new(path: &'a Path, text: &'a str) -> Self {
        let iter: Box<dyn Iterator<Item = (usize, &'a str)> + 'a> = Box::new(
            text.lines()
                .enumerate()
                .map(|(i, l)| (i + 1, l.trim()))
                .filter(|(_, l)| !l.is_empty() && !l.starts_with('#')),
        );
        Self {
            path,
            inner: iter.peekable(),
            last_line: text.lines().count(),
        }
    }

    fn line(&self, number: usize) -> Line {
        Line {
            path: self.path.to_path_buf(),
            number,
        }
    }

    /// Reads `<section> <count>`.
    fn header(&mut self, section: &str) -> Result<usize> {
        let Some((number, text)) = self.inner.next() else {
            return Err(self.line(self.last_line).error(format!("missing `{section}` section")));
        };
        let line = self.line(number);
        match text.split_whitespace().collect::<Vec<_>>()[..] {
            [name, count] if name == section => count
                .parse()
                .map_err(|_| line.error(format!("bad {section} count `{count}`"))),
            _ => Err(line.error(format!("expected `{section} <count>`, found `{text}`"))),
        }
    }

    /// Reads record `id` of a section, checking its leading id.
    fn record(
        &mut self,
        section: &str,
        expected: usize,
        id: usize,
    ) -> Result<(Line, Vec<&'a str>)> {
        let truncated = |found| BlockError::Truncated {
            path: self.path.to_path_buf(),
            what: section.to_string(),
            expected,
            found,
        };
        let Some((number, text)) = self.inner.peek().copied() else {
            return Err(truncated(id));
        };
        let fields: Vec<&str> = text.split_whitespace().collect();
        let is_header = fields.len() == 2
            && fields[1].parse::<usize>().is_ok()
            && fields[0].parse::<usize>().is_err();
        if is_header {
            // Next section header reached early.
            return Err(truncated(id));
        }
        self.inner.next();
        let line = self.line(number);
        match fields.first().map(|f| f.parse::<usize>()) {
            Some(Ok(found)) if found == id => Ok((line, fields)),
            _ => Err(line.error(format!("expected {section} record {id}"))),
        }
    }
}
