//! Rule registry - index of all available rules

use crate::rule::Rule;
use bastion_core::{Error, Result};
use std::collections::HashMap;
use tracing::{error, warn};

/// Builds a fresh rule instance
pub type RuleFactory = Box<dyn Fn() -> Result<Box<dyn Rule>> + Send + Sync>;

struct Entry {
    number: u32,
    name: String,
    factory: RuleFactory,
}

/// Registry of all available rules, keyed by name and number
pub struct RuleRegistry {
    /// Factories in registration order
    entries: Vec<Entry>,
    /// Index by rule name
    by_name: HashMap<String, usize>,
    /// Index by rule number
    by_number: HashMap<u32, usize>,
}

impl RuleRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
            by_number: HashMap::new(),
        }
    }

    /// Registry holding every built-in rule
    pub fn with_builtin_rules() -> Self {
        let mut registry = Self::new();
        crate::builtin::register_all(&mut registry);
        registry
    }

    /// Register a rule factory. Names and numbers must be unique.
    pub fn register<F>(&mut self, number: u32, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn() -> Result<Box<dyn Rule>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(Error::Configuration(format!(
                "Rule name {} registered twice",
                name
            )));
        }
        if self.by_number.contains_key(&number) {
            return Err(Error::Configuration(format!(
                "Rule number {} registered twice",
                number
            )));
        }

        let index = self.entries.len();
        self.by_name.insert(name.clone(), index);
        self.by_number.insert(number, index);
        self.entries.push(Entry {
            number,
            name,
            factory: Box::new(factory),
        });
        Ok(())
    }

    fn build(&self, entry: &Entry) -> Result<Box<dyn Rule>> {
        let rule = (entry.factory)()?;
        if rule.number() != entry.number || rule.name() != entry.name {
            warn!(
                "Factory for {}({}) built {}({})",
                entry.name,
                entry.number,
                rule.name(),
                rule.number()
            );
        }
        Ok(rule)
    }

    /// Instantiate a rule by name
    pub fn create(&self, name: &str) -> Result<Box<dyn Rule>> {
        let index = self
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::RuleNotFound {
                name: name.to_string(),
            })?;
        self.build(&self.entries[index])
    }

    /// Instantiate a rule by number
    pub fn create_by_number(&self, number: u32) -> Result<Box<dyn Rule>> {
        let index = self
            .by_number
            .get(&number)
            .copied()
            .ok_or_else(|| Error::RuleNotFound {
                name: number.to_string(),
            })?;
        self.build(&self.entries[index])
    }

    /// Instantiate every registered rule. Rules whose factory fails are
    /// logged and left out.
    pub fn instantiate_all(&self) -> Vec<Box<dyn Rule>> {
        self.entries
            .iter()
            .filter_map(|entry| match self.build(entry) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    error!("Failed to construct rule {}: {}", entry.name, e);
                    None
                }
            })
            .collect()
    }

    /// Check whether a rule name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Get all rule names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Get number of registered rules
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
