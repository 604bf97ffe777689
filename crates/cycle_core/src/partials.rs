//! Storage encodings for analytic sub-Jacobians and a registry that holds them.

use nalgebra::DMatrix;
use nalgebra_sparse::convert::serial::{convert_csr_dense, convert_dense_csr};
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::error::{ConfigError, CycleError, CycleResult};
use crate::traits::PartialRegistry;

/// Entries with magnitude at or below this are left out of triplet blocks.
pub const TRIPLET_THRESHOLD: f64 = 1e-15;

/// Physical encoding of a sub-Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialFormat {
    #[default]
    Dense,
    /// Compressed sparse row.
    Sparse,
    /// Coordinate (value, row, col) triplets.
    Triplet,
}

impl FromStr for PartialFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dense" | "array" => Ok(Self::Dense),
            "sparse" | "csr" => Ok(Self::Sparse),
            "triplet" | "aij" | "coo" => Ok(Self::Triplet),
            other => Err(ConfigError::UnknownFormat(other.to_string())),
        }
    }
}

/// A sub-Jacobian in one of the supported encodings.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialBlock {
    Dense(DMatrix<f64>),
    Sparse(CsrMatrix<f64>),
    Triplet {
        values: Vec<f64>,
        rows: Vec<usize>,
        cols: Vec<usize>,
        shape: (usize, usize),
    },
}

impl PartialBlock {
    pub fn format(&self) -> PartialFormat {
        match self {
            PartialBlock::Dense(_) => PartialFormat::Dense,
            PartialBlock::Sparse(_) => PartialFormat::Sparse,
            PartialBlock::Triplet { .. } => PartialFormat::Triplet,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            PartialBlock::Dense(m) => m.shape(),
            PartialBlock::Sparse(csr) => (csr.nrows(), csr.ncols()),
            PartialBlock::Triplet { shape, .. } => *shape,
        }
    }

    /// Stored (row, col) positions; `None` for dense blocks, which store
    /// every entry.
    pub fn pattern(&self) -> Option<HashSet<(usize, usize)>> {
        match self {
            PartialBlock::Dense(_) => None,
            PartialBlock::Sparse(csr) => Some(csr.triplet_iter().map(|(r, c, _)| (r, c)).collect()),
            PartialBlock::Triplet { rows, cols, .. } => {
                Some(rows.iter().copied().zip(cols.iter().copied()).collect())
            }
        }
    }

    /// Rebuilds the dense block.
    pub fn to_dense(&self) -> DMatrix<f64> {
        match self {
            PartialBlock::Dense(m) => m.clone(),
            PartialBlock::Sparse(csr) => convert_csr_dense(csr),
            PartialBlock::Triplet {
                values,
                rows,
                cols,
                shape,
            } => {
                let mut dense = DMatrix::zeros(shape.0, shape.1);
                for ((&value, &row), &col) in values.iter().zip(rows).zip(cols) {
                    dense[(row, col)] += value;
                }
                dense
            }
        }
    }
}

/// Encodes a dense block.
///
/// Triplets are collected in row-major order and keep only entries with
/// `|a| > TRIPLET_THRESHOLD`; the mask is structural, so `TRIPLET_THRESHOLD`
/// itself is dropped.
pub fn format_partial(block: &DMatrix<f64>, format: PartialFormat) -> PartialBlock {
    match format {
        PartialFormat::Dense => PartialBlock::Dense(block.clone()),
        PartialFormat::Sparse => PartialBlock::Sparse(convert_dense_csr(block)),
        PartialFormat::Triplet => {
            let mut values = Vec::new();
            let mut rows = Vec::new();
            let mut cols = Vec::new();
            for i in 0..block.nrows() {
                for j in 0..block.ncols() {
                    let value = block[(i, j)];
                    if value.abs() > TRIPLET_THRESHOLD {
                        values.push(value);
                        rows.push(i);
                        cols.push(j);
                    }
                }
            }
            PartialBlock::Triplet {
                values,
                rows,
                cols,
                shape: block.shape(),
            }
        }
    }
}

/// Same as [`format_partial`] for a loosely typed format name.
pub fn format_partial_named(block: &DMatrix<f64>, format: &str) -> CycleResult<PartialBlock> {
    let format = format
        .parse()
        .map_err(|_| CycleError::UnsupportedFormat(format.to_string()))?;
    Ok(format_partial(block, format))
}

#[derive(Debug, Clone)]
struct PartialEntry {
    structure: PartialBlock,
    value: Option<PartialBlock>,
}

/// In-memory partial registry keyed by (output, input).
#[derive(Debug, Clone, Default)]
pub struct PartialTable {
    entries: HashMap<(String, String), PartialEntry>,
}

impl PartialTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_declared(&self, of: &str, wrt: &str) -> bool {
        self.entries.contains_key(&key(of, wrt))
    }

    pub fn structure(&self, of: &str, wrt: &str) -> Option<&PartialBlock> {
        self.entries.get(&key(of, wrt)).map(|e| &e.structure)
    }

    /// Most recently assigned value.
    pub fn get(&self, of: &str, wrt: &str) -> Option<&PartialBlock> {
        self.entries.get(&key(of, wrt)).and_then(|e| e.value.as_ref())
    }

    pub fn dense(&self, of: &str, wrt: &str) -> Option<DMatrix<f64>> {
        self.get(of, wrt).map(PartialBlock::to_dense)
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .keys()
            .map(|(of, wrt)| (of.as_str(), wrt.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialRegistry for PartialTable {
    fn declare(&mut self, of: &str, wrt: &str, structure: PartialBlock) {
        self.entries.insert(
            key(of, wrt),
            PartialEntry {
                structure,
                value: None,
            },
        );
    }

    fn assign(&mut self, of: &str, wrt: &str, value: PartialBlock) -> CycleResult<()> {
        let entry = self
            .entries
            .get_mut(&key(of, wrt))
            .ok_or_else(|| CycleError::UndeclaredPartial {
                of: of.to_string(),
                wrt: wrt.to_string(),
            })?;
        let declared = entry.structure.format();
        if declared != value.format() {
            return Err(CycleError::FormatMismatch {
                of: of.to_string(),
                wrt: wrt.to_string(),
                declared,
                assigned: value.format(),
            });
        }
        // A value may leave out declared positions (entries filtered as
        // zero) but may not store anything outside them.
        let within = match (entry.structure.pattern(), value.pattern()) {
            (Some(declared), Some(assigned)) => assigned.is_subset(&declared),
            _ => true,
        };
        if !within || entry.structure.shape() != value.shape() {
            return Err(CycleError::StructureMismatch {
                of: of.to_string(),
                wrt: wrt.to_string(),
            });
        }
        entry.value = Some(value);
        Ok(())
    }
}

fn key(of: &str, wrt: &str) -> (String, String) {
    (of.to_string(), wrt.to_string())
}
