//! Single typed registry keyed by `(category, name)`.
//!
//! Registration is explicit; nothing is discovered by scanning. The
//! built-in strategies register under the `"strategy"` category.

use std::collections::BTreeMap;

use eb_types::{ConfigError, ParamMap};

use crate::strategy::{RsiReversion, SmaCrossover, Strategy};

/// Constructor for a registered strategy.
pub type StrategyCtor = fn(&ParamMap) -> Result<Box<dyn Strategy>, ConfigError>;

pub struct Registry<T> {
    entries: BTreeMap<(String, String), T>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    pub fn register(
        &mut self,
        category: &str,
        name: &str,
        value: T,
    ) -> Result<(), ConfigError> {
        let key = (category.to_string(), name.to_string());
        if self.entries.contains_key(&key) {
            return Err(ConfigError::Contradictory {
                message: format!("{category}/{name} registered twice"),
            });
        }
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn get(&self, category: &str, name: &str) -> Option<&T> {
        self.entries.get(&(category.to_string(), name.to_string()))
    }

    pub fn names(&self, category: &str) -> Vec<&str> {
        self.entries
            .keys()
            .filter(|(c, _)| c == category)
            .map(|(_, n)| n.as_str())
            .collect()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry preloaded with the built-in strategies.
pub fn default_registry() -> Registry<StrategyCtor> {
    let mut registry = Registry::new();
    // Built-in names are distinct constants; registration cannot collide.
    let sma: StrategyCtor =
        |params| Ok(Box::new(SmaCrossover::from_params(params)?) as Box<dyn Strategy>);
    let rsi: StrategyCtor =
        |params| Ok(Box::new(RsiReversion::from_params(params)?) as Box<dyn Strategy>);
    let _ = registry.register("strategy", SmaCrossover::NAME, sma);
    let _ = registry.register("strategy", RsiReversion::NAME, rsi);
    registry
}

/// Looks up and instantiates a strategy by name.
pub fn build_strategy(
    registry: &Registry<StrategyCtor>,
    name: &str,
    params: &ParamMap,
) -> Result<Box<dyn Strategy>, ConfigError> {
    let ctor = registry.get("strategy", name).ok_or_else(|| ConfigError::UnknownComponent {
        category: "strategy".into(),
        name: name.into(),
    })?;
    ctor(params)
}
