//! Residual declarations and objective-result normalization.

use std::collections::{BTreeMap, HashMap};

use crate::error::{OptimizerError, Result};

/// A named residual and the parameters that influence it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Residual {
    pub name: String,
    pub params: Vec<String>,
}

/// Residuals in registration order.
///
/// The order fixes both the expected layout of [`ResidualValues::Ordered`]
/// and the row order of the sparsity matrix.
#[derive(Debug, Clone, Default)]
pub struct ResidualRegistry {
    entries: Vec<Residual>,
    by_name: HashMap<String, usize>,
}

impl ResidualRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Residual> + '_ {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|r| r.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Residual> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Appends a residual. Parameter names are validated by the caller.
    pub(crate) fn push(&mut self, name: String, params: Vec<String>) -> Result<()> {
        if self.by_name.contains_key(&name) {
            return Err(OptimizerError::DuplicateResidual(name));
        }
        self.by_name.insert(name.clone(), self.entries.len());
        self.entries.push(Residual { name, params });
        Ok(())
    }
}

/// Value returned by an objective function.
///
/// `Ordered` must follow residual registration order. `Named` is resolved
/// against the registry by [`ResidualValues::into_ordered`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResidualValues {
    Ordered(Vec<f64>),
    Named(HashMap<String, f64>),
}

impl ResidualValues {
    /// Converts to a vector in registry order.
    ///
    /// A `Named` result must contain exactly the registered residuals: a
    /// missing name fails with [`OptimizerError::MissingResidual`], an extra one
    /// with [`OptimizerError::UnknownResidual`]. No partial vector is returned.
    pub fn into_ordered(self, registry: &ResidualRegistry) -> Result<Vec<f64>> {
        match self {
            ResidualValues::Ordered(values) => Ok(values),
            ResidualValues::Named(map) => {
                let mut ordered = Vec::with_capacity(registry.len());
                for name in registry.names() {
                    let value = map
                        .get(name)
                        .ok_or_else(|| OptimizerError::MissingResidual(name.to_string()))?;
                    ordered.push(*value);
                }
                if map.len() != ordered.len() {
                    let mut extra: Vec<&String> = map
                        .keys()
                        .filter(|k| registry.position(k).is_none())
                        .collect();
                    extra.sort();
                    if let Some(name) = extra.first() {
                        return Err(OptimizerError::UnknownResidual(name.to_string()));
                    }
                }
                Ok(ordered)
            }
        }
    }
}

impl From<Vec<f64>> for ResidualValues {
    fn from(values: Vec<f64>) -> Self {
        ResidualValues::Ordered(values)
    }
}

impl From<HashMap<String, f64>> for ResidualValues {
    fn from(map: HashMap<String, f64>) -> Self {
        ResidualValues::Named(map)
    }
}

impl From<BTreeMap<String, f64>> for ResidualValues {
    fn from(map: BTreeMap<String, f64>) -> Self {
        ResidualValues::Named(map.into_iter().collect())
    }
}
