//! The query layer's configuration surface, modeled as a plain Rust struct rather than a file-format
//! reader — loading it from disk is out of scope.

use std::sync::Arc;
use std::time::Duration;

use sqlforge_core::{StatementResult, Value};
use sqlforge_schema::SingularizeStrategy;

/// How a joined relation's columns are aliased in the select list to avoid
/// collisions between the base table and eagerly-loaded relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelationColumnAliasFormat {
    /// `table_column`, e.g. `posts_title`.
    #[default]
    TableColumn,
    /// `table.column`, e.g. `posts.title`.
    TableDotColumn,
    /// `postsTitle`.
    CamelCase,
}

#[derive(Debug, Clone)]
pub struct TimestampsConfig {
    pub created_at: String,
    pub updated_at: String,
    pub default_order_column: String,
}

impl Default for TimestampsConfig {
    fn default() -> Self {
        Self {
            created_at: "created_at".to_string(),
            updated_at: "updated_at".to_string(),
            default_order_column: "id".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaginationConfig {
    pub default_per_page: u64,
    pub cursor_column: String,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_per_page: 15,
            cursor_column: "id".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AliasingConfig {
    pub relation_column_alias_format: RelationColumnAliasFormat,
}

#[derive(Debug, Clone)]
pub struct RelationsConfig {
    pub foreign_key_format: String,
    pub max_depth: usize,
    pub max_eager_load: usize,
    pub detect_cycles: bool,
    pub singularize_strategy: SingularizeStrategy,
}

impl Default for RelationsConfig {
    fn default() -> Self {
        Self {
            foreign_key_format: "{model}_id".to_string(),
            max_depth: 10,
            max_eager_load: 50,
            detect_cycles: true,
            singularize_strategy: SingularizeStrategy::default(),
        }
    }
}

/// Backoff schedule for transaction retries: delay before
/// attempt `k` is `min(maxMs, baseMs * factor^(k-1))`, reduced by up to
/// `jitter` fraction.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub factor: f64,
    pub max_ms: u64,
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 50,
            factor: 2.0,
            max_ms: 5_000,
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionDefaults {
    pub retries: u32,
    pub isolation: sqlforge_core::IsolationLevel,
    pub read_only: bool,
    pub sql_states: Vec<String>,
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonContainsMode {
    Native,
    Dialect,
}

#[derive(Debug, Clone, Default)]
pub struct SqlConfig {
    pub random_function_override: Option<String>,
    pub shared_lock_syntax_override: Option<String>,
    /// Overrides the driver's native JSON-containment dispatch; `None`
    /// defers to [`sqlforge_core::DatabaseDriver::json_contains_operator`].
    pub json_contains_mode: Option<JsonContainsMode>,
}

#[derive(Debug, Clone)]
pub struct SoftDeleteConfig {
    pub enabled: bool,
    pub column: String,
    /// Whether `get()` filters by the soft-delete column by default, absent
    /// an explicit `withTrashed`/`onlyTrashed` call.
    pub default_filter: bool,
}

impl Default for SoftDeleteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            column: "deleted_at".to_string(),
            default_filter: true,
        }
    }
}

/// Query lifecycle hook fired just before a statement is sent to the driver.
pub struct QueryStartEvent<'a> {
    pub sql: &'a str,
    pub kind: QueryKind,
}

/// Fired on successful completion of a suspension point.
pub struct QueryEndEvent<'a> {
    pub sql: &'a str,
    pub duration_ms: u64,
    pub row_count: Option<usize>,
    pub kind: QueryKind,
}

/// Fired when the driver returns an error.
pub struct QueryErrorEvent<'a> {
    pub sql: &'a str,
    pub error: &'a crate::error::QueryError,
    pub duration_ms: u64,
    pub kind: QueryKind,
}

/// Which shape of statement is running, for hook/log context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
}

pub type QueryStartHook = Arc<dyn Fn(&QueryStartEvent<'_>) + Send + Sync>;
pub type QueryEndHook = Arc<dyn Fn(&QueryEndEvent<'_>) + Send + Sync>;
pub type QueryErrorHook = Arc<dyn Fn(&QueryErrorEvent<'_>) + Send + Sync>;
pub type RetryHook = Arc<dyn Fn(u32, &crate::error::QueryError) + Send + Sync>;
pub type AfterCommitHook = Arc<dyn Fn() + Send + Sync>;
pub type RollbackHook = Arc<dyn Fn(&crate::error::QueryError) + Send + Sync>;
/// Fired once the transaction's rollback has completed, distinct from
/// [`RollbackHook`] which fires with the triggering error as rollback
/// begins.
pub type AfterRollbackHook = Arc<dyn Fn() + Send + Sync>;
pub type BeforeCreateHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type AfterCreateHook = Arc<dyn Fn(&str, &StatementResult) + Send + Sync>;

/// Best-effort lifecycle hooks: a hook that panics or returns an error
/// never propagates to the caller; it is logged and the caller's query
/// proceeds unaffected.
#[derive(Clone, Default)]
pub struct HooksConfig {
    pub on_query_start: Option<QueryStartHook>,
    pub on_query_end: Option<QueryEndHook>,
    pub on_query_error: Option<QueryErrorHook>,
    pub before_create: Option<BeforeCreateHook>,
    pub after_create: Option<AfterCreateHook>,
    pub before_delete: Option<BeforeCreateHook>,
    pub after_delete: Option<AfterCreateHook>,
    pub on_retry: Option<RetryHook>,
    pub after_commit: Option<AfterCommitHook>,
    pub on_rollback: Option<RollbackHook>,
    pub after_rollback: Option<AfterRollbackHook>,
}

impl std::fmt::Debug for HooksConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HooksConfig")
            .field("on_query_start", &self.on_query_start.is_some())
            .field("on_query_end", &self.on_query_end.is_some())
            .field("on_query_error", &self.on_query_error.is_some())
            .field("before_create", &self.before_create.is_some())
            .field("after_create", &self.after_create.is_some())
            .field("before_delete", &self.before_delete.is_some())
            .field("after_delete", &self.after_delete.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .field("after_commit", &self.after_commit.is_some())
            .field("on_rollback", &self.on_rollback.is_some())
            .field("after_rollback", &self.after_rollback.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DebugConfig {
    /// Whether `dd()`/query-error logging captures the fully composed SQL
    /// text.
    pub capture_text: bool,
}

/// Query cache tuning.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_millis(60_000),
            max_entries: 100,
        }
    }
}

/// Top-level configuration surface, shared immutably across
/// builders.
#[derive(Clone, Default, Debug)]
pub struct Config {
    pub timestamps: TimestampsConfig,
    pub pagination: PaginationConfig,
    pub aliasing: AliasingConfig,
    pub relations: RelationsConfig,
    pub transaction_defaults: TransactionDefaults,
    pub sql: SqlConfig,
    pub soft_deletes: SoftDeleteConfig,
    pub hooks: HooksConfig,
    pub debug: DebugConfig,
    pub cache: CacheConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.relations.max_depth, 10);
        assert_eq!(config.relations.max_eager_load, 50);
        assert_eq!(config.cache.default_ttl, Duration::from_millis(60_000));
        assert_eq!(config.cache.max_entries, 100);
    }

    #[test]
    fn backoff_defaults_are_sane() {
        let backoff = BackoffConfig::default();
        assert!(backoff.factor > 1.0);
        assert!(backoff.jitter < 1.0);
    }
}
