//! The fixed set of daemons under supervision.
//!
//! Built once from configuration at startup and never mutated afterwards.
//! Declaration order is preserved for status listings.

use crate::config::{Config, DaemonSpec};
use crate::error::{Error, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    specs: Vec<DaemonSpec>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new(specs: Vec<DaemonSpec>) -> Result<Self> {
        let mut index = HashMap::with_capacity(specs.len());
        for (position, spec) in specs.iter().enumerate() {
            if index.insert(spec.name.clone(), position).is_some() {
                return Err(Error::DuplicateDaemon(spec.name.clone()));
            }
        }
        Ok(Self { specs, index })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.daemons.clone())
    }

    pub fn get(&self, name: &str) -> Option<&DaemonSpec> {
        self.index.get(name).map(|&i| &self.specs[i])
    }

    /// Like [`Registry::get`], but unknown names are an error.
    pub fn require(&self, name: &str) -> Result<&DaemonSpec> {
        self.get(name)
            .ok_or_else(|| Error::DaemonNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &DaemonSpec> {
        self.specs.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_preserves_declaration_order() {
        let registry = Registry::new(vec![
            DaemonSpec::new("zeta", "z"),
            DaemonSpec::new("alpha", "a"),
        ])
        .unwrap();

        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
        assert_eq!(registry.get("alpha").unwrap().command, "a");
        assert!(registry.get("missing").is_none());
        assert!(matches!(
            registry.require("missing"),
            Err(Error::DaemonNotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn duplicates_rejected() {
        let err = Registry::new(vec![DaemonSpec::new("a", "x"), DaemonSpec::new("a", "y")])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateDaemon(name) if name == "a"));
    }
}
