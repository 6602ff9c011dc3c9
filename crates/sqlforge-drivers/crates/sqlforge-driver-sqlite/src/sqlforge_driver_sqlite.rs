//! sqlforge-driver-sqlite - the SQLite [`DatabaseDriver`] implementation.

mod connection;
mod dialect;

pub use connection::SqliteConnection;
pub use dialect::SqliteDriver;

pub use sqlforge_core::DatabaseDriver;
