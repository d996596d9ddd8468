//! Parameter groups: named slices of the flat vector bound to one data model.

use std::any::Any;
use std::fmt;
use std::ops::Range;

use crate::error::{OptimizerError, Result};
use crate::models::DataModels;

use super::bound::Bound;

pub(crate) type ErasedGetter = Box<dyn Fn(&dyn Any) -> Option<Vec<f64>>>;
pub(crate) type ErasedSetter = Box<dyn Fn(&mut dyn Any, &[f64]) -> bool>;

/// Wraps a typed getter so it can be stored next to groups of other model types.
pub(crate) fn erase_getter<T, G>(getter: G) -> ErasedGetter
where
    T: Any,
    G: Fn(&T) -> Vec<f64> + 'static,
{
    Box::new(move |model: &dyn Any| model.downcast_ref::<T>().map(&getter))
}

pub(crate) fn erase_setter<T, S>(setter: S) -> ErasedSetter
where
    T: Any,
    S: Fn(&mut T, &[f64]) + 'static,
{
    Box::new(move |model: &mut dyn Any, values: &[f64]| {
        match model.downcast_mut::<T>() {
            Some(model) => {
                setter(model, values);
                true
            }
            None => false,
        }
    })
}

/// Optional settings shared by the fixed-3 and general vector registrations.
///
/// # Example
///
/// ```
/// use paramopt::{Bound, GroupOptions};
///
/// let opts = GroupOptions::default()
///     .with_suffixes(["_tx", "_ty", "_tz"])
///     .with_bounds(vec![Bound::new(-1.0, 1.0); 3]);
/// assert_eq!(opts.suffixes.as_ref().map(Vec::len), Some(3));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupOptions {
    /// Per-parameter bounds. Unbounded when `None`.
    pub bounds: Option<Vec<Bound>>,
    /// Name suffixes appended to the group name.
    pub suffixes: Option<Vec<String>>,
    /// Explicit arity. Inferred from the getter when `None`.
    pub arity: Option<usize>,
}

impl GroupOptions {
    pub fn with_bounds(mut self, bounds: Vec<Bound>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suffixes = Some(suffixes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }
}

/// Registration variant, determines arity and naming rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupKind {
    Scalar,
    Vector3,
    Vector,
}

/// A registered parameter group.
pub struct ParamGroup {
    pub(crate) name: String,
    pub(crate) param_names: Vec<String>,
    pub(crate) indices: Range<usize>,
    pub(crate) data_key: String,
    pub(crate) model_type: &'static str,
    pub(crate) bounds: Vec<Bound>,
    pub(crate) getter: ErasedGetter,
    pub(crate) setter: ErasedSetter,
}

impl ParamGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter names in flat-vector order.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Contiguous positions of this group in the flat vector.
    pub fn indices(&self) -> Range<usize> {
        self.indices.clone()
    }

    pub fn arity(&self) -> usize {
        self.param_names.len()
    }

    pub fn data_key(&self) -> &str {
        &self.data_key
    }

    pub fn bounds(&self) -> &[Bound] {
        &self.bounds
    }

    /// Reads the group's current values from its data model.
    pub(crate) fn read(&self, models: &DataModels) -> Result<Vec<f64>> {
        let model = models.get_any(&self.data_key)?;
        let values = (self.getter)(model).ok_or_else(|| self.type_error())?;
        if values.len() != self.arity() {
            return Err(OptimizerError::GetterContract {
                group: self.name.clone(),
                expected: self.arity(),
                got: values.len(),
            });
        }
        Ok(values)
    }

    /// Writes `values` into the group's data model through the setter.
    pub(crate) fn write(&self, models: &mut DataModels, values: &[f64]) -> Result<()> {
        debug_assert_eq!(values.len(), self.arity());
        let model = models.get_any_mut(&self.data_key)?;
        if (self.setter)(model, values) {
            Ok(())
        } else {
            Err(self.type_error())
        }
    }

    fn type_error(&self) -> OptimizerError {
        OptimizerError::ModelType {
            key: self.data_key.clone(),
            expected: self.model_type,
        }
    }
}

impl fmt::Debug for ParamGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamGroup")
            .field("name", &self.name)
            .field("param_names", &self.param_names)
            .field("indices", &self.indices)
            .field("data_key", &self.data_key)
            .field("bounds", &self.bounds)
            .finish_non_exhaustive()
    }
}
