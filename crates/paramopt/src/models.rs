//! Registry of named, opaque data models.
//!
//! The coordinator never looks inside a model. It only hands models to
//! getters, setters and the objective function, which downcast them to the
//! concrete type they were registered with.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;

use crate::error::{OptimizerError, Result};

/// Named collection of caller-owned data models.
#[derive(Default)]
pub struct DataModels {
    models: HashMap<String, Box<dyn Any>>,
}

impl DataModels {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `model` under `name`.
    ///
    /// Fails with [`OptimizerError::DuplicateKey`] if the name is taken.
    pub fn insert<T: Any>(&mut self, name: impl Into<String>, model: T) -> Result<()> {
        let name = name.into();
        if self.models.contains_key(&name) {
            return Err(OptimizerError::DuplicateKey(name));
        }
        self.models.insert(name, Box::new(model));
        Ok(())
    }

    /// Returns `true` if a model is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Registered names, sorted for deterministic output.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.models.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub(crate) fn get_any(&self, name: &str) -> Result<&dyn Any> {
        match self.models.get(name) {
            Some(model) => Ok(&**model),
            None => Err(OptimizerError::UnknownKey(name.to_string())),
        }
    }

    pub(crate) fn get_any_mut(&mut self, name: &str) -> Result<&mut dyn Any> {
        match self.models.get_mut(name) {
            Some(model) => Ok(&mut **model),
            None => Err(OptimizerError::UnknownKey(name.to_string())),
        }
    }

    /// Typed access to a model.
    ///
    /// Fails with [`OptimizerError::UnknownKey`] if the name is absent and with
    /// [`OptimizerError::ModelType`] if the model is not a `T`.
    pub fn get<T: Any>(&self, name: &str) -> Result<&T> {
        let model = self
            .models
            .get(name)
            .ok_or_else(|| OptimizerError::UnknownKey(name.to_string()))?;
        model
            .downcast_ref::<T>()
            .ok_or_else(|| type_error::<T>(name))
    }

    /// Typed mutable access to a model.
    pub fn get_mut<T: Any>(&mut self, name: &str) -> Result<&mut T> {
        let model = self
            .models
            .get_mut(name)
            .ok_or_else(|| OptimizerError::UnknownKey(name.to_string()))?;
        model
            .downcast_mut::<T>()
            .ok_or_else(|| type_error::<T>(name))
    }

    /// Removes a model and hands ownership back to the caller.
    pub fn take<T: Any>(&mut self, name: &str) -> Result<T> {
        let boxed = self
            .models
            .remove(name)
            .ok_or_else(|| OptimizerError::UnknownKey(name.to_string()))?;
        match boxed.downcast::<T>() {
            Ok(model) => Ok(*model),
            Err(boxed) => {
                self.models.insert(name.to_string(), boxed);
                Err(type_error::<T>(name))
            }
        }
    }
}

fn type_error<T>(name: &str) -> OptimizerError {
    OptimizerError::ModelType {
        key: name.to_string(),
        expected: type_name::<T>(),
    }
}

impl fmt::Debug for DataModels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataModels")
            .field("keys", &self.keys())
            .finish()
    }
}
