//! Residual-by-parameter dependency structure.
//!
//! The pattern hints the solver which Jacobian entries can be non-zero, so
//! finite differences can perturb several independent columns at once.

use std::fmt;
use std::io::Write;

use nalgebra::DMatrix;

use crate::error::{OptimizerError, Result};
use crate::params::ParamRegistry;
use crate::residuals::ResidualRegistry;

/// Boolean matrix of shape `(num_residuals, num_parameters)` stored by row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsityPattern {
    ncols: usize,
    rows: Vec<Vec<usize>>,
}

impl SparsityPattern {
    /// Builds the pattern from the residual declarations.
    ///
    /// Each listed parameter name is resolved to its flat-vector column. Fails
    /// with [`OptimizerError::UnknownParameter`] for unresolvable names.
    pub fn build(residuals: &ResidualRegistry, params: &ParamRegistry) -> Result<Self> {
        let mut rows = Vec::with_capacity(residuals.len());
        for residual in residuals.iter() {
            let mut cols = Vec::with_capacity(residual.params.len());
            for param in &residual.params {
                let col = params.resolve(param).ok_or_else(|| {
                    OptimizerError::UnknownParameter {
                        residual: residual.name.clone(),
                        param: param.clone(),
                    }
                })?;
                cols.push(col);
            }
            cols.sort_unstable();
            cols.dedup();
            rows.push(cols);
        }
        Ok(Self {
            ncols: params.num_params(),
            rows,
        })
    }

    /// A pattern with every cell set.
    pub fn dense(nrows: usize, ncols: usize) -> Self {
        Self {
            ncols,
            rows: vec![(0..ncols).collect(); nrows],
        }
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols)
    }

    /// Number of set cells.
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.rows
            .get(row)
            .is_some_and(|cols| cols.binary_search(&col).is_ok())
    }

    /// Sorted columns set in `row`.
    pub fn row(&self, row: usize) -> &[usize] {
        &self.rows[row]
    }

    /// Rows set in each column (the transposed structure).
    pub fn column_rows(&self) -> Vec<Vec<usize>> {
        let mut cols = vec![Vec::new(); self.ncols];
        for (i, row) in self.rows.iter().enumerate() {
            for &j in row {
                cols[j].push(i);
            }
        }
        cols
    }

    /// Dense 0/1 matrix.
    pub fn to_dense(&self) -> DMatrix<u8> {
        let mut m = DMatrix::zeros(self.nrows(), self.ncols);
        for (i, row) in self.rows.iter().enumerate() {
            for &j in row {
                m[(i, j)] = 1;
            }
        }
        m
    }

    /// Attaches row and column labels for display or export.
    pub fn labeled<'a>(
        &'a self,
        row_labels: &'a [String],
        col_labels: &'a [String],
    ) -> LabeledSparsity<'a> {
        debug_assert_eq!(row_labels.len(), self.nrows());
        debug_assert_eq!(col_labels.len(), self.ncols);
        LabeledSparsity {
            pattern: self,
            row_labels,
            col_labels,
        }
    }
}

/// A pattern with residual names as rows and parameter names as columns.
#[derive(Debug, Clone, Copy)]
pub struct LabeledSparsity<'a> {
    pattern: &'a SparsityPattern,
    row_labels: &'a [String],
    col_labels: &'a [String],
}

impl LabeledSparsity<'_> {
    /// Writes the matrix as CSV: a header of parameter names, then one
    /// `residual,0,1,...` line per residual.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = Vec::with_capacity(self.col_labels.len() + 1);
        header.push("");
        header.extend(self.col_labels.iter().map(String::as_str));
        wtr.write_record(&header)?;

        for (i, label) in self.row_labels.iter().enumerate() {
            let mut record = Vec::with_capacity(self.col_labels.len() + 1);
            record.push(label.clone());
            record.extend((0..self.pattern.ncols).map(|j| {
                if self.pattern.contains(i, j) { "1" } else { "0" }.to_string()
            }));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl fmt::Display for LabeledSparsity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label_width = self.row_labels.iter().map(String::len).max().unwrap_or(0);
        write!(f, "{:label_width$}", "")?;
        for col in self.col_labels {
            write!(f, " {col}")?;
        }
        writeln!(f)?;
        for (i, label) in self.row_labels.iter().enumerate() {
            write!(f, "{label:label_width$}")?;
            for (j, col) in self.col_labels.iter().enumerate() {
                let cell = u8::from(self.pattern.contains(i, j));
                write!(f, " {cell:>width$}", width = col.len())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
