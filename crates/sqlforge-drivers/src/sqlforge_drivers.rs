//! sqlforge-drivers - feature-gated aggregation of the concrete
//! [`DatabaseDriver`] implementations.

#[cfg(feature = "postgres")]
pub use sqlforge_driver_postgres as postgres;
#[cfg(feature = "mysql")]
pub use sqlforge_driver_mysql as mysql;
#[cfg(feature = "sqlite")]
pub use sqlforge_driver_sqlite as sqlite;

mod registry;

pub use registry::DriverRegistry;

pub use sqlforge_core::{DatabaseDriver, Dialect};
