//! Ordered registry of parameter groups and the flat-vector layout they own.

use std::collections::HashMap;

use log::{debug, warn};

use crate::error::{OptimizerError, Result};
use crate::models::DataModels;

use super::bound::Bound;
use super::group::{ErasedGetter, ErasedSetter, GroupKind, GroupOptions, ParamGroup};

/// Everything needed to register one group.
pub(crate) struct GroupSpec {
    pub kind: GroupKind,
    pub name: String,
    pub data_key: String,
    pub model_type: &'static str,
    pub getter: ErasedGetter,
    pub setter: ErasedSetter,
    pub options: GroupOptions,
}

/// Parameter groups in registration order.
///
/// Group `k` owns the flat-vector indices immediately following those of
/// group `k - 1`, so the union of all groups is exactly `0..num_params()`.
#[derive(Debug, Default)]
pub struct ParamRegistry {
    groups: Vec<ParamGroup>,
    by_name: HashMap<String, usize>,
    param_index: HashMap<String, usize>,
    num_params: usize,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of scalar parameters (length of the flat vector).
    pub fn num_params(&self) -> usize {
        self.num_params
    }

    pub fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&ParamGroup> {
        self.by_name.get(name).map(|&i| &self.groups[i])
    }

    /// Flat-vector index of a parameter name.
    pub fn resolve(&self, param: &str) -> Option<usize> {
        self.param_index.get(param).copied()
    }

    /// All parameter names in flat-vector order.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.groups
            .iter()
            .flat_map(|g| g.param_names.iter().map(String::as_str))
    }

    /// Per-parameter bounds assembled in group-registry order.
    pub fn bounds(&self) -> Vec<Bound> {
        self.groups
            .iter()
            .flat_map(|g| g.bounds.iter().copied())
            .collect()
    }

    /// Validates and appends a group, reading its initial values into `x`.
    ///
    /// Nothing is modified unless every check passes.
    pub(crate) fn register(
        &mut self,
        spec: GroupSpec,
        models: &DataModels,
        x: &mut Vec<f64>,
    ) -> Result<&ParamGroup> {
        debug_assert_eq!(x.len(), self.num_params);

        let GroupSpec {
            kind,
            name,
            data_key,
            model_type,
            getter,
            setter,
            options,
        } = spec;

        if self.by_name.contains_key(&name) {
            return Err(OptimizerError::DuplicateGroup(name));
        }
        if !models.contains(&data_key) {
            return Err(OptimizerError::UnknownModel {
                group: name,
                key: data_key,
            });
        }

        let values = getter(models.get_any(&data_key)?).ok_or_else(|| {
            OptimizerError::ModelType {
                key: data_key.clone(),
                expected: model_type,
            }
        })?;

        let arity = match kind {
            GroupKind::Scalar => 1,
            GroupKind::Vector3 => 3,
            GroupKind::Vector => options.arity.unwrap_or(values.len()),
        };
        if let Some(requested) = options.arity {
            if requested != arity {
                return Err(OptimizerError::ArityMismatch {
                    group: name,
                    what: "arity",
                    expected: arity,
                    got: requested,
                });
            }
        }
        if values.len() != arity {
            return Err(OptimizerError::GetterContract {
                group: name,
                expected: arity,
                got: values.len(),
            });
        }

        let bounds = match options.bounds {
            None => vec![Bound::UNBOUNDED; arity],
            Some(bounds) if bounds.len() == arity => bounds,
            Some(bounds) => {
                return Err(OptimizerError::ArityMismatch {
                    group: name,
                    what: "bounds",
                    expected: arity,
                    got: bounds.len(),
                })
            }
        };

        let param_names = match kind {
            GroupKind::Scalar => vec![name.clone()],
            GroupKind::Vector3 | GroupKind::Vector => {
                let suffixes = options
                    .suffixes
                    .unwrap_or_else(|| default_suffixes(kind, arity));
                if suffixes.len() != arity {
                    return Err(OptimizerError::ArityMismatch {
                        group: name,
                        what: "suffixes",
                        expected: arity,
                        got: suffixes.len(),
                    });
                }
                suffixes.iter().map(|s| format!("{name}{s}")).collect()
            }
        };

        for (i, param) in param_names.iter().enumerate() {
            if self.param_index.contains_key(param) || param_names[..i].contains(param) {
                return Err(OptimizerError::DuplicateParameter {
                    group: name,
                    param: param.clone(),
                });
            }
        }
        for ((param, bound), value) in param_names.iter().zip(&bounds).zip(&values) {
            bound.validate(param)?;
            if !bound.contains(*value) {
                warn!("initial value {value} of `{param}` lies outside its bounds {bound:?}");
            }
        }

        let start = self.num_params;
        let indices = start..start + arity;
        for (offset, param) in param_names.iter().enumerate() {
            self.param_index.insert(param.clone(), start + offset);
        }
        x.extend_from_slice(&values);
        self.num_params += arity;

        debug!("registered group `{name}` on `{data_key}`: {param_names:?} at {indices:?}");

        self.by_name.insert(name.clone(), self.groups.len());
        self.groups.push(ParamGroup {
            name,
            param_names,
            indices,
            data_key,
            model_type,
            bounds,
            getter,
            setter,
        });
        Ok(&self.groups[self.groups.len() - 1])
    }

    /// Copies every group's model values into `x` (getter direction).
    ///
    /// `x` is only written once every getter has succeeded.
    pub(crate) fn read_into(&self, models: &DataModels, x: &mut [f64]) -> Result<()> {
        self.check_len(x.len())?;
        let mut scratch = Vec::with_capacity(self.num_params);
        for group in &self.groups {
            scratch.extend(group.read(models)?);
        }
        x.copy_from_slice(&scratch);
        Ok(())
    }

    /// Applies `x` to every group's model (setter direction).
    pub(crate) fn write_from(&self, x: &[f64], models: &mut DataModels) -> Result<()> {
        self.check_len(x.len())?;
        for group in &self.groups {
            group.write(models, &x[group.indices()])?;
        }
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.num_params {
            return Err(OptimizerError::VectorLength {
                expected: self.num_params,
                got: len,
            });
        }
        Ok(())
    }
}

fn default_suffixes(kind: GroupKind, arity: usize) -> Vec<String> {
    match kind {
        GroupKind::Vector3 => ["x", "y", "z"].iter().map(|s| s.to_string()).collect(),
        _ => (0..arity).map(|i| i.to_string()).collect(),
    }
}
