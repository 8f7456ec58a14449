//! Grid and spline-volume file formats.
//!
//! Ascii files are whitespace-separated values. Binary files are raw
//! little-endian streams: `i32` for counts and `f64` for coordinates, with no
//! record markers.

pub mod bvol;
pub mod plot3d;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BlockError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Ascii,
    Binary,
}

/// Storage order of a block's values: `Fortran` runs `i` fastest, `C` runs `k`
/// fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOrder {
    C,
    #[default]
    Fortran,
}

impl IndexOrder {
    /// Position in a C-ordered (`k` fastest) array of the `n`-th stored value.
    pub fn to_c(self, dims: [usize; 3], n: usize) -> usize {
        match self {
            IndexOrder::C => n,
            IndexOrder::Fortran => {
                let i = n % dims[0];
                let j = (n / dims[0]) % dims[1];
                let k = n / (dims[0] * dims[1]);
                (i * dims[1] + j) * dims[2] + k
            }
        }
    }
}

/// Reads counts and values in either encoding with file context on errors.
pub(crate) enum ValueReader<'a> {
    Ascii(AsciiValues<'a>),
    Binary(BinaryValues<'a>),
}

impl<'a> ValueReader<'a> {
    pub(crate) fn new(path: &'a Path, encoding: Encoding, data: &'a [u8]) -> Result<Self> {
        Ok(match encoding {
            Encoding::Ascii => {
                let text = std::str::from_utf8(data).map_err(|e| BlockError::Format {
                    path: path.to_path_buf(),
                    line: 0,
                    message: format!("ascii file is not valid utf-8: {e}"),
                })?;
                ValueReader::Ascii(AsciiValues::new(path, text))
            }
            Encoding::Binary => ValueReader::Binary(BinaryValues { path, data, pos: 0 }),
        })
    }

    pub(crate) fn counts(&mut self, what: &str, n: usize) -> Result<Vec<usize>> {
        match self {
            ValueReader::Ascii(r) => r.parse_n(what, n),
            ValueReader::Binary(r) => r
                .i32s(what, n)?
                .into_iter()
                .map(|v| {
                    usize::try_from(v).map_err(|_| r.error(format!("negative {what} value {v}")))
                })
                .collect(),
        }
    }

    pub(crate) fn count(&mut self, what: &str) -> Result<usize> {
        Ok(self.counts(what, 1)?[0])
    }

    pub(crate) fn values(&mut self, what: &str, n: usize) -> Result<Vec<f64>> {
        match self {
            ValueReader::Ascii(r) => r.parse_n(what, n),
            ValueReader::Binary(r) => r.f64s(what, n),
        }
    }

    fn path(&self) -> &Path {
        match self {
            ValueReader::Ascii(r) => r.path,
            ValueReader::Binary(r) => r.path,
        }
    }

    /// Product of counts read from the file, rejected when it overflows.
    pub(crate) fn product(&self, what: &str, factors: &[usize]) -> Result<usize> {
        checked_product(self.path(), what, factors)
    }
}

/// Upper bound on slots reserved ahead of reading; a count in the file is not
/// trusted until values back it.
pub(crate) const MAX_PREALLOC: usize = 1 << 16;

pub(crate) fn checked_product(path: &Path, what: &str, factors: &[usize]) -> Result<usize> {
    factors
        .iter()
        .try_fold(1usize, |acc, &f| acc.checked_mul(f))
        .ok_or_else(|| BlockError::Format {
            path: path.to_path_buf(),
            line: 0,
            message: format!("{what} {factors:?} overflows"),
        })
}

/// Whitespace-separated tokens with their line numbers.
pub(crate) struct AsciiValues<'a> {
    path: &'a Path,
    tokens: Box<dyn Iterator<Item = (usize, &'a str)> + 'a>,
}

impl<'a> AsciiValues<'a> {
    pub(crate) fn new(path: &'a Path, text: &'a str) -> Self {
        let tokens = text
            .lines()
            .enumerate()
            .flat_map(|(i, line)| line.split_whitespace().map(move |t| (i + 1, t)));
        Self {
            path,
            tokens: Box::new(tokens),
        }
    }

    pub(crate) fn parse_n<T: FromStr>(&mut self, what: &str, n: usize) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(n.min(MAX_PREALLOC));
        for found in 0..n {
            let Some((line, token)) = self.tokens.next() else {
                return Err(truncated(self.path, what, n, found));
            };
            let value = token.parse().map_err(|_| BlockError::Format {
                path: self.path.to_path_buf(),
                line,
                message: format!("cannot parse {what} value `{token}`"),
            })?;
            out.push(value);
        }
        Ok(out)
    }
}

pub(crate) struct BinaryValues<'a> {
    path: &'a Path,
    data: &'a [u8],
    pos: usize,
}

impl BinaryValues<'_> {
    fn error(&self, message: String) -> BlockError {
        BlockError::Format {
            path: self.path.to_path_buf(),
            line: 0,
            message: format!("byte {}: {message}", self.pos),
        }
    }

    fn take<const N: usize>(&mut self, what: &str, n: usize) -> Result<Vec<[u8; N]>> {
        let available = (self.data.len() - self.pos) / N;
        if available < n {
            return Err(truncated(self.path, what, n, available));
        }
        let chunk = &self.data[self.pos..self.pos + n * N];
        self.pos += n * N;
        Ok(chunk
            .chunks_exact(N)
            .map(|c| {
                let mut bytes = [0u8; N];
                bytes.copy_from_slice(c);
                bytes
            })
            .collect())
    }

    fn i32s(&mut self, what: &str, n: usize) -> Result<Vec<i32>> {
        Ok(self.take::<4>(what, n)?.into_iter().map(i32::from_le_bytes).collect())
    }

    fn f64s(&mut self, what: &str, n: usize) -> Result<Vec<f64>> {
        Ok(self.take::<8>(what, n)?.into_iter().map(f64::from_le_bytes).collect())
    }
}

fn truncated(path: &Path, what: &str, expected: usize, found: usize) -> BlockError {
    BlockError::Truncated {
        path: path.to_path_buf(),
        what: what.to_string(),
        expected,
        found,
    }
}

pub(crate) fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| BlockError::io(path, e))
}

/// Buffered writer for counts and values in either encoding.
pub(crate) struct ValueWriter {
    path: PathBuf,
    encoding: Encoding,
    out: std::io::BufWriter<fs::File>,
}

impl ValueWriter {
    pub(crate) fn create(path: &Path, encoding: Encoding) -> Result<Self> {
        let file = fs::File::create(path).map_err(|e| BlockError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            encoding,
            out: std::io::BufWriter::new(file),
        })
    }

    /// Writes counts on one ascii line.
    pub(crate) fn counts(&mut self, counts: &[usize]) -> Result<()> {
        let result = match self.encoding {
            Encoding::Ascii => {
                let line: Vec<String> = counts.iter().map(usize::to_string).collect();
                writeln!(self.out, "{}", line.join(" "))
            }
            Encoding::Binary => counts.iter().try_for_each(|&c| {
                let value = i32::try_from(c).map_err(|_| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("count {c} does not fit in i32"),
                    )
                })?;
                self.out.write_all(&value.to_le_bytes())
            }),
        };
        result.map_err(|e| BlockError::io(&self.path, e))
    }

    /// Writes values one per ascii line.
    pub(crate) fn values(&mut self, values: impl IntoIterator<Item = f64>) -> Result<()> {
        let result = values.into_iter().try_for_each(|v| match self.encoding {
            Encoding::Ascii => writeln!(self.out, "{v}"),
            Encoding::Binary => self.out.write_all(&v.to_le_bytes()),
        });
        result.map_err(|e| BlockError::io(&self.path, e))
    }

    pub(crate) fn finish(mut self) -> Result<()> {
        self.out.flush().map_err(|e| BlockError::io(&self.path, e))
    }
}
