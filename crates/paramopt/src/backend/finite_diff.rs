//! Forward-difference Jacobian estimation with column grouping.

use nalgebra::DMatrix;

use crate::error::Result;
use crate::params::Bound;
use crate::sparsity::SparsityPattern;

/// Partition of the Jacobian columns into structurally orthogonal groups.
///
/// Columns in one group never share a non-zero row, so a single perturbed
/// evaluation recovers all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnGroups {
    groups: Vec<Vec<usize>>,
    /// Non-zero rows per column. Every row when `None`.
    column_rows: Option<Vec<Vec<usize>>>,
}

impl ColumnGroups {
    /// One column per group.
    pub fn dense(ncols: usize) -> Self {
        Self {
            groups: (0..ncols).map(|j| vec![j]).collect(),
            column_rows: None,
        }
    }

    /// Greedy first-fit grouping over the pattern's columns.
    ///
    /// Columns without any non-zero row are left out.
    pub fn from_pattern(pattern: &SparsityPattern) -> Self {
        let column_rows = pattern.column_rows();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut occupied: Vec<Vec<bool>> = Vec::new();

        for (j, rows) in column_rows.iter().enumerate() {
            if rows.is_empty() {
                continue;
            }
            let slot = occupied
                .iter()
                .position(|mask| rows.iter().all(|&i| !mask[i]));
            let slot = match slot {
                Some(slot) => slot,
                None => {
                    groups.push(Vec::new());
                    occupied.push(vec![false; pattern.nrows()]);
                    groups.len() - 1
                }
            };
            groups[slot].push(j);
            for &i in rows {
                occupied[slot][i] = true;
            }
        }

        Self {
            groups,
            column_rows: Some(column_rows),
        }
    }

    /// Number of perturbed evaluations per Jacobian.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    /// Estimates the Jacobian at `x`, where `f0` holds the residuals at `x`.
    pub(crate) fn estimate<F>(
        &self,
        x: &[f64],
        f0: &[f64],
        bounds: &[Bound],
        diff_step: f64,
        mut eval: F,
    ) -> Result<DMatrix<f64>>
    where
        F: FnMut(&[f64]) -> Result<Vec<f64>>,
    {
        let m = f0.len();
        let mut jac = DMatrix::zeros(m, x.len());
        let mut xp = x.to_vec();

        for group in &self.groups {
            xp.copy_from_slice(x);
            let mut perturbed = Vec::with_capacity(group.len());
            for &j in group {
                if let Some(h) = step(x[j], diff_step, &bounds[j]) {
                    xp[j] = x[j] + h;
                    perturbed.push(j);
                }
            }
            if perturbed.is_empty() {
                continue;
            }

            let fp = eval(&xp)?;
            for &j in &perturbed {
                let h = xp[j] - x[j];
                match &self.column_rows {
                    Some(column_rows) => {
                        for &i in &column_rows[j] {
                            jac[(i, j)] = (fp[i] - f0[i]) / h;
                        }
                    }
                    None => {
                        for i in 0..m {
                            jac[(i, j)] = (fp[i] - f0[i]) / h;
                        }
                    }
                }
            }
        }
        Ok(jac)
    }
}

/// Forward step for one parameter, kept inside its bounds.
///
/// The step has magnitude `diff_step * max(1, |x|)` and follows the sign of
/// `x`. It is flipped when it would leave the box and shrunk when the box is
/// narrower than the step. Returns `None` for a parameter pinned by
/// `lower == upper`.
pub(crate) fn step(x: f64, diff_step: f64, bound: &Bound) -> Option<f64> {
    let h = diff_step * x.abs().max(1.0);
    let room_up = bound.upper.map_or(f64::INFINITY, |u| u - x);
    let room_down = bound.lower.map_or(f64::INFINITY, |l| x - l);
    let fits = |s: f64| if s > 0.0 { s <= room_up } else { -s <= room_down };

    let preferred = if x >= 0.0 { h } else { -h };
    if fits(preferred) {
        Some(preferred)
    } else if fits(-preferred) {
        Some(-preferred)
    } else if room_up >= room_down && room_up > 0.0 {
        Some(room_up)
    } else if room_down > 0.0 {
        Some(-room_down)
    } else {
        None
    }
}
