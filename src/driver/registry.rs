// src/driver/registry.rs
//
// Driver lookup by id. Drivers are resolved once from a DriverConfig; the
// built-in table holds the reference drivers and callers may register more.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::fs::FsDriver;
use super::ram::RamDriver;
use super::Driver;
use crate::config::DriverConfig;
use crate::errors::{DriverError, DriverResult};

pub type DriverFactory = fn(&DriverConfig) -> DriverResult<Arc<dyn Driver>>;

pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("ram", RamDriver::build);
        registry.register("fs", FsDriver::build);
        registry
    }
}

impl DriverRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, id: &str, factory: DriverFactory) {
        self.factories.insert(id.to_string(), factory);
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate the driver named by `config.driver`.
    pub fn build(&self, config: &DriverConfig) -> DriverResult<Arc<dyn Driver>> {
        let factory = self.factories.get(&config.driver).ok_or_else(|| {
            DriverError::Config(format!(
                "unknown driver '{}' (available: {})",
                config.driver,
                self.ids().collect::<Vec<_>>().join(", ")
            ))
        })?;
        debug!(driver = %config.driver, "building driver");
        factory(config)
    }
}
