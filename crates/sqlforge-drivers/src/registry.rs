//! Lookup table for the drivers compiled into this build, keyed by
//! [`Dialect`].

use std::collections::HashMap;
use std::sync::Arc;

use sqlforge_core::{DatabaseDriver, Dialect};

/// Registry of the [`DatabaseDriver`] implementations enabled by this
/// build's Cargo features.
pub struct DriverRegistry {
    drivers: HashMap<Dialect, Arc<dyn DatabaseDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Registers one driver instance per feature enabled at compile time.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::sqlite::SqliteDriver::new()));
        #[cfg(feature = "postgres")]
        registry.register(Arc::new(crate::postgres::PostgresDriver::new()));
        #[cfg(feature = "mysql")]
        registry.register(Arc::new(crate::mysql::MySqlDriver::new()));

        registry
    }

    pub fn register(&mut self, driver: Arc<dyn DatabaseDriver>) {
        let dialect = driver.dialect();
        tracing::info!(dialect = %dialect, "registering database driver");
        self.drivers.insert(dialect, driver);
    }

    pub fn get(&self, dialect: Dialect) -> Option<Arc<dyn DatabaseDriver>> {
        let driver = self.drivers.get(&dialect).cloned();
        if driver.is_none() {
            tracing::warn!(%dialect, "driver not found in registry");
        }
        driver
    }

    pub fn has(&self, dialect: Dialect) -> bool {
        self.drivers.contains_key(&dialect)
    }

    pub fn dialects(&self) -> Vec<Dialect> {
        self.drivers.keys().copied().collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
