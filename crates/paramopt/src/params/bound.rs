//! Per-parameter box constraints.

use serde::{Deserialize, Serialize};

use crate::error::{OptimizerError, Result};

/// Box constraint for a single parameter.
///
/// A missing side is unbounded. The constructors normalize `-inf` as a lower
/// bound and `+inf` as an upper bound to `None`; any other infinity is kept
/// so that registration rejects the empty box.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bound {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Bound {
    /// No constraint on either side.
    pub const UNBOUNDED: Bound = Bound {
        lower: None,
        upper: None,
    };

    /// Constrains the parameter to `[lower, upper]`.
    pub fn new(lower: f64, upper: f64) -> Self {
        Self {
            lower: lower_side(lower),
            upper: upper_side(upper),
        }
    }

    pub fn at_least(lower: f64) -> Self {
        Self {
            lower: lower_side(lower),
            upper: None,
        }
    }

    pub fn at_most(upper: f64) -> Self {
        Self {
            lower: None,
            upper: upper_side(upper),
        }
    }

    /// Returns `true` if neither side is constrained.
    pub fn is_unbounded(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    /// Returns `true` if `value` satisfies the constraint.
    pub fn contains(&self, value: f64) -> bool {
        self.lower.map_or(true, |lo| value >= lo) && self.upper.map_or(true, |hi| value <= hi)
    }

    /// Projects `value` onto the feasible interval.
    pub fn clamp(&self, value: f64) -> f64 {
        let mut v = value;
        if let Some(lo) = self.lower {
            v = v.max(lo);
        }
        if let Some(hi) = self.upper {
            v = v.min(hi);
        }
        v
    }

    pub(crate) fn validate(&self, param: &str) -> Result<()> {
        let lower = self.lower.unwrap_or(f64::NEG_INFINITY);
        let upper = self.upper.unwrap_or(f64::INFINITY);
        let empty = lower > upper || lower == f64::INFINITY || upper == f64::NEG_INFINITY;
        if lower.is_nan() || upper.is_nan() || empty {
            return Err(OptimizerError::InvalidBound {
                param: param.to_string(),
                lower,
                upper,
            });
        }
        Ok(())
    }
}

fn lower_side(value: f64) -> Option<f64> {
    (value != f64::NEG_INFINITY).then_some(value)
}

fn upper_side(value: f64) -> Option<f64> {
    (value != f64::INFINITY).then_some(value)
}
