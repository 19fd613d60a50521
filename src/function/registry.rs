//! Name to function lookup
//!
//! The standard registry holding every built-in is created once and shared;
//! tests and embedders can build their own with [`Registry::new`] and
//! [`Registry::register`].

use super::{aggregate, filter, forecast, join, summary, tag, transform, MetricFunction};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure to register a function
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two functions share a name
    #[error("function {0} has already been registered")]
    AlreadyRegistered(String),

    /// Functions must be named
    #[error("empty function name")]
    EmptyName,
}

/// Function table keyed by query name
#[derive(Debug, Default)]
pub struct Registry {
    functions: HashMap<String, Arc<MetricFunction>>,
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with every built-in function
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        let families = [
            join::functions(),
            aggregate::functions(),
            transform::functions(),
            filter::functions(),
            summary::functions(),
            tag::functions(),
            forecast::functions(),
        ];
        for function in families.into_iter().flatten() {
            registry.register(function)?;
        }
        Ok(registry)
    }

    /// Add a function; names must be unique and non-empty
    pub fn register(&mut self, function: MetricFunction) -> Result<(), RegistryError> {
        if function.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.functions.contains_key(&function.name) {
            return Err(RegistryError::AlreadyRegistered(function.name));
        }
        self.functions.insert(function.name.clone(), Arc::new(function));
        Ok(())
    }

    /// Look up a function by name
    pub fn get(&self, name: &str) -> Option<Arc<MetricFunction>> {
        self.functions.get(name).cloned()
    }

    /// Sorted names of all registered functions
    pub fn all(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }
}

lazy_static! {
    static ref STANDARD: Arc<Registry> =
        Arc::new(Registry::with_builtins().expect("built-in function names are unique"));
}

/// Shared registry of built-in functions
pub fn standard() -> Arc<Registry> {
    Arc::clone(&STANDARD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Value;

    fn constant(name: &str) -> MetricFunction {
        MetricFunction::eager(name, 0, Some(0), |_ctx, _args, _groups| Ok(Value::Scalar(1.0)))
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = Registry::new();
        registry.register(constant("b.one")).unwrap();
        registry.register(constant("a.one")).unwrap();
        assert!(registry.get("a.one").is_some());
        assert!(registry.get("c.one").is_none());
        assert_eq!(registry.all(), vec!["a.one".to_string(), "b.one".to_string()]);
    }

    #[test]
    fn test_register_rejects_duplicates_and_empty_names() {
        let mut registry = Registry::new();
        registry.register(constant("x")).unwrap();
        assert_eq!(
            registry.register(constant("x")),
            Err(RegistryError::AlreadyRegistered("x".to_string()))
        );
        assert_eq!(registry.register(constant("")), Err(RegistryError::EmptyName));
    }

    #[test]
    fn test_standard_registry_contents() {
        let registry = standard();
        for name in [
            "+",
            "aggregate.sum",
            "transform.timeshift",
            "filter.recent_highest_max",
            "summarize.last_not_nan",
            "tag.set",
            "forecast.train_multiplicative_holt_winters",
        ] {
            assert!(registry.get(name).is_some(), "missing {}", name);
        }
        let all = registry.all();
        let mut sorted = all.clone();
        sorted.sort();
        assert_eq!(all, sorted);
    }
}
