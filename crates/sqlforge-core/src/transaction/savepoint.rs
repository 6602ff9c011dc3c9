//! Savepoint support for database transactions.
//!
//! Savepoints are named points within a transaction that can be rolled back
//! to without aborting the whole transaction.

use async_trait::async_trait;

use crate::error::Result;

/// A savepoint within a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    name: String,
}

impl Savepoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Trait for transactions that support savepoints.
#[async_trait]
pub trait SavepointSupport: Send + Sync {
    /// Create a savepoint with the given name. Must be called inside an
    /// active transaction.
    async fn savepoint(&self, name: &str) -> Result<Savepoint>;

    /// Roll back to a previously-created savepoint, undoing everything
    /// done after it while leaving the savepoint itself valid.
    async fn rollback_to_savepoint(&self, name: &str) -> Result<()>;

    /// Release a savepoint; it can no longer be rolled back to.
    async fn release_savepoint(&self, name: &str) -> Result<()>;

    /// Whether this transaction/connection supports savepoints at all.
    fn supports_savepoints(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn savepoint_name_roundtrip() {
        let sp = Savepoint::new("before_bob");
        assert_eq!(sp.name(), "before_bob");
    }

    #[test]
    fn savepoint_equality() {
        assert_eq!(Savepoint::new("a"), Savepoint::new("a"));
        assert_ne!(Savepoint::new("a"), Savepoint::new("b"));
    }
}
