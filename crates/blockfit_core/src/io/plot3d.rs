//! Multi-block plot3d grids: block count, `(ni, nj, nk)` per block, then each
//! block's x, y and z values.

use std::path::Path;

use tracing::info;

use super::{read_bytes, Encoding, IndexOrder, ValueReader, ValueWriter, MAX_PREALLOC};
use crate::error::Result;
use crate::spline::SampleGrid;

pub fn read_plot3d(path: &Path, encoding: Encoding, order: IndexOrder) -> Result<Vec<SampleGrid>> {
    let data = read_bytes(path)?;
    let mut reader = ValueReader::new(path, encoding, &data)?;
    let n_block = reader.count("block count")?;
    let n_sizes = reader.product("block dimension count", &[n_block, 3])?;
    let sizes = reader.counts("block dimensions", n_sizes)?;

    let mut grids = Vec::with_capacity(n_block.min(MAX_PREALLOC));
    for (block, dims) in sizes.chunks_exact(3).enumerate() {
        let dims = [dims[0], dims[1], dims[2]];
        let total = reader.product(&format!("block {block} dimensions"), &dims)?;
        let x = reader.values(&format!("block {block} x"), total)?;
        let y = reader.values(&format!("block {block} y"), total)?;
        let z = reader.values(&format!("block {block} z"), total)?;
        let mut points = vec![[0.0; 3]; total];
        for n in 0..total {
            points[order.to_c(dims, n)] = [x[n], y[n], z[n]];
        }
        grids.push(SampleGrid::new(dims, points)?);
    }
    info!(path = %path.display(), blocks = n_block, "read plot3d grid");
    Ok(grids)
}

/// Writes grids in Fortran order.
pub fn write_plot3d(path: &Path, grids: &[SampleGrid], encoding: Encoding) -> Result<()> {
    let mut writer = ValueWriter::create(path, encoding)?;
    writer.counts(&[grids.len()])?;
    let sizes: Vec<usize> = grids.iter().flat_map(SampleGrid::dims).collect();
    writer.counts(&sizes)?;
    for grid in grids {
        let [ni, nj, nk] = grid.dims();
        for d in 0..3 {
            writer.values((0..nk).flat_map(|k| {
                (0..nj).flat_map(move |j| (0..ni).map(move |i| grid.point(i, j, k)[d]))
            }))?;
        }
    }
    writer.finish()?;
    info!(path = %path.display(), blocks = grids.len(), "wrote plot3d grid");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlockError;

    fn grid(offset: f64) -> SampleGrid {
        SampleGrid::from_fn([2, 3, 4], |i, j, k| {
            [offset + i as f64, 0.5 * j as f64, 0.25 * k as f64 + 0.1]
        })
        .expect("grid")
    }

    #[test]
    fn round_trips_in_both_encodings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let grids = vec![grid(0.0), grid(1.0)];
        for encoding in [Encoding::Ascii, Encoding::Binary] {
            let path = dir.path().join(format!("grid-{encoding:?}.xyz"));
            write_plot3d(&path, &grids, encoding).expect("write");
            let read = read_plot3d(&path, encoding, IndexOrder::Fortran).expect("read");
            assert_eq!(read, grids);
        }
    }

    #[test]
    fn c_order_reads_k_fastest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("c.xyz");
        let xs: Vec<String> = (0..8).map(|n| n.to_string()).collect();
        let text = format!("1\n2 2 2\n{}\n{}\n{}\n", xs.join(" "), "0 ".repeat(8), "0 ".repeat(8));
        std::fs::write(&path, text).expect("write");
        let read = read_plot3d(&path, Encoding::Ascii, IndexOrder::C).expect("read");
        assert_eq!(read[0].point(0, 0, 1)[0], 1.0);
        assert_eq!(read[0].point(1, 0, 0)[0], 4.0);

        let fortran = read_plot3d(&path, Encoding::Ascii, IndexOrder::Fortran).expect("read");
        assert_eq!(fortran[0].point(1, 0, 0)[0], 1.0);
        assert_eq!(fortran[0].point(0, 0, 1)[0], 4.0);
    }

    #[test]
    fn short_file_is_truncated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("short.xyz");
        std::fs::write(&path, "1\n2 2 2\n0 1 2\n").expect("write");
        match read_plot3d(&path, Encoding::Ascii, IndexOrder::Fortran) {
            Err(BlockError::Truncated {
                what,
                expected,
                found,
                ..
            }) => {
                assert_eq!(what, "block 0 x");
                assert_eq!((expected, found), (8, 3));
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[test]
    fn oversized_counts_fail_without_allocating() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("huge.xyz");

        std::fs::write(&path, format!("{}\n", usize::MAX)).expect("write");
        match read_plot3d(&path, Encoding::Ascii, IndexOrder::Fortran) {
            Err(BlockError::Format { message, .. }) => assert!(message.contains("overflows")),
            other => panic!("expected an overflow error, got {other:?}"),
        }

        let huge = 1usize << 22;
        std::fs::write(&path, format!("1\n{huge} {huge} {huge}\n")).expect("write");
        match read_plot3d(&path, Encoding::Ascii, IndexOrder::Fortran) {
            Err(BlockError::Format { message, .. }) => {
                assert!(message.contains("block 0 dimensions"))
            }
            other => panic!("expected an overflow error, got {other:?}"),
        }

        std::fs::write(&path, "1\n1000 1000 1000\n0.5\n").expect("write");
        match read_plot3d(&path, Encoding::Ascii, IndexOrder::Fortran) {
            Err(BlockError::Truncated {
                what,
                expected,
                found,
                ..
            }) => {
                assert_eq!(what, "block 0 x");
                assert_eq!((expected, found), (1_000_000_000, 1));
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }
}
