//! Spline-volume files. Per volume: control counts and orders
//! `(nu, nv, nw, ku, kv, kw)`, the three knot vectors, then the control points
//! in C order with x, y and z of each point together.

use std::path::Path;

use tracing::info;

use super::{read_bytes, Encoding, ValueReader, ValueWriter, MAX_PREALLOC};
use crate::error::{BlockError, Result};
use crate::spline::{Axis, Volume};

pub fn read_bvol(path: &Path, encoding: Encoding) -> Result<Vec<Volume>> {
    let data = read_bytes(path)?;
    let mut reader = ValueReader::new(path, encoding, &data)?;
    let n_vol = reader.count("volume count")?;

    let mut volumes = Vec::with_capacity(n_vol.min(MAX_PREALLOC));
    for vol in 0..n_vol {
        let header = reader.counts(&format!("volume {vol} header"), 6)?;
        let n_ctl = [header[0], header[1], header[2]];
        let orders = [header[3], header[4], header[5]];
        let mut knots: [Vec<f64>; 3] = Default::default();
        for axis in Axis::ALL {
            let a = axis.index();
            let what = format!("volume {vol} {axis:?} knots");
            let len = n_ctl[a].checked_add(orders[a]).ok_or_else(|| BlockError::Format {
                path: path.to_path_buf(),
                line: 0,
                message: format!("{what}: count {} + {} overflows", n_ctl[a], orders[a]),
            })?;
            knots[a] = reader.values(&what, len)?;
        }
        let what = format!("volume {vol} coefficients");
        let n_values = reader.product(&what, &[n_ctl[0], n_ctl[1], n_ctl[2], 3])?;
        let flat = reader.values(&what, n_values)?;
        let coef = flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
        volumes.push(Volume::from_control_net(n_ctl, orders, knots, coef)?);
    }
    info!(path = %path.display(), volumes = n_vol, "read bvol");
    Ok(volumes)
}

pub fn write_bvol(path: &Path, volumes: &[Volume], encoding: Encoding) -> Result<()> {
    let mut writer = ValueWriter::create(path, encoding)?;
    writer.counts(&[volumes.len()])?;
    for volume in volumes {
        let [nu, nv, nw] = volume.n_ctl();
        let [ku, kv, kw] = volume.orders();
        writer.counts(&[nu, nv, nw, ku, kv, kw])?;
        for axis in Axis::ALL {
            writer.values(volume.knots(axis).iter().copied())?;
        }
        writer.values(volume.coef().iter().flatten().copied())?;
    }
    writer.finish()?;
    info!(path = %path.display(), volumes = volumes.len(), "wrote bvol");
    Ok(())
}
