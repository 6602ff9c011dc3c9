//! Select Compiler: composes a read query as an append-only
//! textual SQL buffer plus parameter vector. Every mutator is infallible
//! and purely additive; identifier validation, relation resolution, and
//! SQL assembly all happen lazily in [`SelectBuilder::compile`], matching
//! the state machine's "transitions are additive only, `execute` finalises"
//! contract.

pub mod join;
pub mod pagination;
pub mod window;

use std::sync::Arc;
use std::time::Duration;

use sqlforge_core::{validate_identifier, DatabaseDriver, Value};
use sqlforge_schema::SchemaMetadataGraph;

use crate::config::Config;
use crate::condition::{Condition, Conjunction};
use crate::error::{QueryError, Result};
use crate::execution::{self, ExecOptions, Executor};
use crate::param::ParamBinder;
use crate::registry::SoftDeleteRegistry;
use join::{JoinContext, JoinStep};
use window::WindowSpec;

/// `lockForUpdate` / `sharedLock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    ForUpdate,
    Shared,
}

/// `withTrashed` / `onlyTrashed` scoping for models with the soft-deletes
/// trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SoftDeleteMode {
    #[default]
    Default,
    WithTrashed,
    OnlyTrashed,
}

/// A pending common table expression, resolved against the shared parameter
/// binder at compile time so its placeholders are numbered continuously
/// with the rest of the statement (no post-hoc placeholder renumbering is
/// needed because the whole tree compiles in one pass).
#[derive(Clone)]
struct CteSpec {
    name: String,
    recursive: bool,
    builder: Box<SelectBuilder>,
}

/// Which correlated-existence shape to emit for `has`/`doesntHave`
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExistenceMode {
    Has,
    DoesntHave,
}

/// A registered `with(...)` eager load: a flat name or dotted path, plus
/// (for the `{relation: callback}` shape) extra predicates ANDed onto the
/// last hop's generated `ON` clause.
#[derive(Clone)]
enum RelationSpec {
    Plain(String),
    Constrained(String, Vec<Condition>),
}

impl RelationSpec {
    fn path(&self) -> &str {
        match self {
            RelationSpec::Plain(path) | RelationSpec::Constrained(path, _) => path,
        }
    }
}

/// Predicate accumulator passed to `with_constrained`'s callback so it can
/// compose extra join predicates the same way `where_cond` does for the
/// base query.
#[derive(Default)]
pub struct RelationConstraint {
    conditions: Vec<Condition>,
}

impl RelationConstraint {
    pub fn where_cond(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

#[derive(Clone)]
struct ExistencePredicate {
    relation: String,
    mode: ExistenceMode,
    extra: Vec<Condition>,
    conjunction: Conjunction,
}

#[derive(Clone)]
struct CountSpec {
    relation: String,
    alias: String,
    extra: Vec<Condition>,
}

/// Builds a `SELECT` statement against one base table.
///
/// Cloneable so pagination (`paginate`/`chunk`/`chunkById`) can derive a
/// fresh per-page builder from the same base query without re-threading
/// every clause by hand.
#[derive(Clone)]
pub struct SelectBuilder {
    driver: Arc<dyn DatabaseDriver>,
    metadata: Option<Arc<SchemaMetadataGraph>>,
    soft_deletes: Arc<SoftDeleteRegistry>,
    config: Arc<Config>,

    table: String,
    alias: Option<String>,
    distinct: bool,
    columns: Vec<String>,
    ctes: Vec<CteSpec>,
    with_relations: Vec<RelationSpec>,
    existence_predicates: Vec<ExistencePredicate>,
    counts: Vec<CountSpec>,
    wheres: Vec<(Conjunction, Condition)>,
    group_by: Vec<String>,
    havings: Vec<(Conjunction, Condition)>,
    order_by: Vec<(String, bool)>,
    windows: Vec<WindowSpec>,
    limit: Option<u64>,
    offset: Option<u64>,
    lock: Option<LockMode>,
    soft_delete_mode: SoftDeleteMode,
    cache_ttl: Option<Duration>,
    timeout: Option<Duration>,
}

impl SelectBuilder {
    pub fn new(driver: Arc<dyn DatabaseDriver>, config: Arc<Config>, table: impl Into<String>) -> Self {
        Self {
            driver,
            metadata: None,
            soft_deletes: Arc::new(SoftDeleteRegistry::default()),
            config,
            table: table.into(),
            alias: None,
            distinct: false,
            columns: Vec::new(),
            ctes: Vec::new(),
            with_relations: Vec::new(),
            existence_predicates: Vec::new(),
            counts: Vec::new(),
            wheres: Vec::new(),
            group_by: Vec::new(),
            havings: Vec::new(),
            order_by: Vec::new(),
            windows: Vec::new(),
            limit: None,
            offset: None,
            lock: None,
            soft_delete_mode: SoftDeleteMode::default(),
            cache_ttl: None,
            timeout: None,
        }
    }

    /// Attaches the schema metadata graph and soft-delete registry needed
    /// to resolve `with(...)`/`whereHas`/`withCount` relation names.
    pub fn with_schema(
        mut self,
        metadata: Arc<SchemaMetadataGraph>,
        soft_deletes: Arc<SoftDeleteRegistry>,
    ) -> Self {
        self.metadata = Some(metadata);
        self.soft_deletes = soft_deletes;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Adds one or more raw select-list entries (column names or pre-built
    /// expressions); `*` is used when none are supplied.
    pub fn select(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn window(mut self, spec: WindowSpec) -> Self {
        self.windows.push(spec);
        self
    }

    /// Prepends `WITH name AS (sub)` using `sub`'s own compiled body,
    /// resolved with the parent's parameter binder.
    pub fn with_cte(mut self, name: impl Into<String>, sub: SelectBuilder) -> Self {
        self.ctes.push(CteSpec {
            name: name.into(),
            recursive: false,
            builder: Box::new(sub),
        });
        self
    }

    pub fn with_recursive(mut self, name: impl Into<String>, sub: SelectBuilder) -> Self {
        self.ctes.push(CteSpec {
            name: name.into(),
            recursive: true,
            builder: Box::new(sub),
        });
        self
    }

    /// Registers a relation (flat name or dotted path) to eagerly join
    ///.
    pub fn with(mut self, relation: impl Into<String>) -> Self {
        self.with_relations.push(RelationSpec::Plain(relation.into()));
        self
    }

    /// `with({relation: callback})`: eagerly joins `relation`, extending the
    /// generated `ON` clause with whatever predicates the callback adds to
    /// the [`RelationConstraint`] it's handed.
    pub fn with_constrained(
        mut self,
        relation: impl Into<String>,
        callback: impl FnOnce(RelationConstraint) -> RelationConstraint,
    ) -> Self {
        let constraint = callback(RelationConstraint::default());
        self.with_relations
            .push(RelationSpec::Constrained(relation.into(), constraint.conditions));
        self
    }

    pub fn where_cond(mut self, condition: Condition) -> Self {
        self.wheres.push((Conjunction::And, condition));
        self
    }

    pub fn or_where(mut self, condition: Condition) -> Self {
        self.wheres.push((Conjunction::Or, condition));
        self
    }

    /// Conjunction-of-equality/IN shape from an object literal.
    pub fn where_all(mut self, entries: indexmap::IndexMap<String, Value>) -> Self {
        for condition in Condition::from_object(entries) {
            self.wheres.push((Conjunction::And, condition));
        }
        self
    }

    /// `whereAny`: the same operator/value across a column list, joined by
    /// OR.
    pub fn where_any(
        mut self,
        columns: impl IntoIterator<Item = impl Into<String>>,
        op: crate::condition::Op,
        value: Value,
    ) -> Self {
        let children = columns
            .into_iter()
            .map(|c| Condition::triple(c, op, value.clone()))
            .collect();
        self.wheres.push((
            Conjunction::And,
            Condition::Group {
                conjunction: Conjunction::Or,
                negate: false,
                children,
            },
        ));
        self
    }

    /// `whereAll`: the same operator/value across a column list, joined by
    /// AND.
    pub fn where_all_of(
        mut self,
        columns: impl IntoIterator<Item = impl Into<String>>,
        op: crate::condition::Op,
        value: Value,
    ) -> Self {
        let children = columns
            .into_iter()
            .map(|c| Condition::triple(c, op, value.clone()))
            .collect();
        self.wheres.push((
            Conjunction::And,
            Condition::Group {
                conjunction: Conjunction::And,
                negate: false,
                children,
            },
        ));
        self
    }

    /// `whereNone`: negated-OR across a column list.
    pub fn where_none(
        mut self,
        columns: impl IntoIterator<Item = impl Into<String>>,
        op: crate::condition::Op,
        value: Value,
    ) -> Self {
        let children = columns
            .into_iter()
            .map(|c| Condition::triple(c, op, value.clone()))
            .collect();
        self.wheres.push((
            Conjunction::And,
            Condition::Group {
                conjunction: Conjunction::Or,
                negate: true,
                children,
            },
        ));
        self
    }

    /// Case-insensitive `LIKE`: native `ILIKE` on PostgreSQL, `LOWER(col)
    /// LIKE LOWER(?)` elsewhere.
    pub fn where_ilike(mut self, column: impl Into<String>, pattern: impl Into<Value>) -> Self {
        self.wheres.push((Conjunction::And, Condition::ilike(column, pattern)));
        self
    }

    /// JSON path/containment predicate, dispatched through the driver's
    /// `json_contains_operator` (native `@>`, `JSON_CONTAINS`, or
    /// `json_extract`).
    pub fn where_json_contains(
        mut self,
        column: impl Into<String>,
        path: Option<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.wheres
            .push((Conjunction::And, Condition::json_contains(column, path, value)));
        self
    }

    /// Dynamic `where{Column}`.
    pub fn dynamic_where(mut self, method_name: &str, value: Value) -> Self {
        if let Some((join, column)) = crate::condition::parse_dynamic_predicate(method_name) {
            let op = if matches!(value, Value::Array(_)) {
                crate::condition::Op::In
            } else {
                crate::condition::Op::Eq
            };
            let condition = Condition::triple(column, op, value);
            self.wheres.push((join.conjunction(), condition));
        }
        self
    }

    pub fn group_by(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn having(mut self, condition: Condition) -> Self {
        self.havings.push((Conjunction::And, condition));
        self
    }

    pub fn or_having(mut self, condition: Condition) -> Self {
        self.havings.push((Conjunction::Or, condition));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by.push((column.into(), descending));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn lock_for_update(mut self) -> Self {
        self.lock = Some(LockMode::ForUpdate);
        self
    }

    pub fn shared_lock(mut self) -> Self {
        self.lock = Some(LockMode::Shared);
        self
    }

    pub fn with_trashed(mut self) -> Self {
        self.soft_delete_mode = SoftDeleteMode::WithTrashed;
        self
    }

    pub fn only_trashed(mut self) -> Self {
        self.soft_delete_mode = SoftDeleteMode::OnlyTrashed;
        self
    }

    /// Opts this query into the cache; a
    /// missing `ttl` falls back to the configured default (60000 ms).
    pub fn cache(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = Some(ttl.unwrap_or(self.config.cache.default_ttl));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `whereHas`: restrict to rows where a correlated EXISTS against the
    /// relation's target (optionally pivot-joined) matches.
    pub fn where_has(mut self, relation: impl Into<String>, extra: Vec<Condition>) -> Self {
        self.existence_predicates.push(ExistencePredicate {
            relation: relation.into(),
            mode: ExistenceMode::Has,
            extra,
            conjunction: Conjunction::And,
        });
        self
    }

    pub fn where_doesnt_have(mut self, relation: impl Into<String>, extra: Vec<Condition>) -> Self {
        self.existence_predicates.push(ExistencePredicate {
            relation: relation.into(),
            mode: ExistenceMode::DoesntHave,
            extra,
            conjunction: Conjunction::And,
        });
        self
    }

    /// `withCount`: appends a correlated `(SELECT COUNT(*) ...) AS alias`
    /// to the select list.
    pub fn with_count(mut self, relation: impl Into<String>, alias: impl Into<String>) -> Self {
        self.counts.push(CountSpec {
            relation: relation.into(),
            alias: alias.into(),
            extra: Vec::new(),
        });
        self
    }

    fn metadata(&self) -> Result<&SchemaMetadataGraph> {
        self.metadata
            .as_deref()
            .ok_or_else(|| QueryError::BuilderState("no schema metadata attached to this builder".into()))
    }

    /// Resolves a relation (flat or dotted) to the `FROM ... [JOIN ...]`
    /// source and correlation condition used by a correlated `EXISTS`/
    /// `COUNT` subquery: walks every hop up to the last, then splits
    /// the last hop's join into a subquery source plus the condition that
    /// correlates it back to this builder's base table.
    fn correlated_source(&self, relation: &str) -> Result<(String, String)> {
        let metadata = self.metadata()?;
        let mut ctx = JoinContext::new(
            metadata,
            self.driver.as_ref(),
            &self.config.relations,
            &self.soft_deletes,
            self.config.soft_deletes.enabled,
        );
        let steps = ctx.resolve_path(&self.table, relation)?;
        let last = steps
            .last()
            .ok_or_else(|| QueryError::BuilderState(format!("empty relation path {relation:?}")))?;
        Ok(last.as_correlated_source())
    }

    /// Renders the full `SELECT` statement and its bound parameters in one
    /// pass: CTEs, then the base query, so placeholders are numbered
    /// continuously end-to-end.
    pub fn compile(&self) -> Result<(String, Vec<Value>)> {
        let mut binder = ParamBinder::new(self.driver.clone());
        let sql = self.compile_with(&mut binder)?;
        Ok((sql, binder.into_values()))
    }

    fn compile_with(&self, binder: &mut ParamBinder) -> Result<String> {
        let driver = self.driver.as_ref();
        let mut parts = Vec::new();

        if !self.ctes.is_empty() {
            let mut cte_fragments = Vec::with_capacity(self.ctes.len());
            let mut any_recursive = false;
            for cte in &self.ctes {
                validate_identifier(&cte.name, "CTE name")?;
                any_recursive |= cte.recursive;
                let body = cte.builder.compile_with(binder)?;
                cte_fragments.push(format!("{} AS ({body})", driver.quote_identifier(&cte.name)));
            }
            let keyword = if any_recursive { "WITH RECURSIVE" } else { "WITH" };
            parts.push(format!("{keyword} {}", cte_fragments.join(", ")));
        }

        validate_identifier(&self.table, "table")?;
        let quoted_table = driver.quote_identifier(&self.table);
        let from = match &self.alias {
            Some(alias) => {
                validate_identifier(alias, "table alias")?;
                format!("{quoted_table} AS {}", driver.quote_identifier(alias))
            }
            None => quoted_table.clone(),
        };

        let select_list = self.render_select_list(driver)?;
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        parts.push(format!("SELECT {distinct}{select_list} FROM {from}"));

        let joins = self.render_joins(driver, binder)?;
        parts.extend(joins);

        let wheres = self.render_wheres(driver, binder)?;
        if let Some(clause) = wheres {
            parts.push(format!("WHERE {clause}"));
        }

        if !self.group_by.is_empty() {
            for column in &self.group_by {
                validate_identifier(column, "group by column")?;
            }
            let columns = self
                .group_by
                .iter()
                .map(|c| driver.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("GROUP BY {columns}"));
        }

        if !self.havings.is_empty() {
            let rendered = self
                .havings
                .iter()
                .map(|(_, cond)| cond.render(driver, binder))
                .collect::<Result<Vec<_>>>()?;
            let joined = join_with_conjunctions(&self.havings, &rendered);
            parts.push(format!("HAVING {joined}"));
        }

        if !self.order_by.is_empty() {
            for (column, _) in &self.order_by {
                validate_identifier(column, "order by column")?;
            }
            let columns = self
                .order_by
                .iter()
                .map(|(c, desc)| {
                    let quoted = driver.quote_identifier(c);
                    if *desc {
                        format!("{quoted} DESC")
                    } else {
                        format!("{quoted} ASC")
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("ORDER BY {columns}"));
        }

        if let Some(limit) = self.limit {
            parts.push(format!("LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            parts.push(format!("OFFSET {offset}"));
        }

        match self.lock {
            Some(LockMode::ForUpdate) => parts.push("FOR UPDATE".to_string()),
            Some(LockMode::Shared) => {
                if let Some(syntax) = driver.shared_lock_syntax() {
                    parts.push(syntax.to_string());
                }
            }
            None => {}
        }

        Ok(parts.join(" "))
    }

    fn render_select_list(&self, driver: &dyn DatabaseDriver) -> Result<String> {
        let mut entries: Vec<String> = if self.columns.is_empty() {
            vec!["*".to_string()]
        } else {
            self.columns.clone()
        };

        for window in &self.windows {
            entries.push(window.render(driver)?);
        }

        for count in &self.counts {
            let (source, correlation) = self.correlated_source(&count.relation)?;
            validate_identifier(&count.alias, "withCount alias")?;
            entries.push(format!(
                "(SELECT COUNT(*) {source} WHERE {correlation}) AS {}",
                driver.quote_identifier(&count.alias)
            ));
        }

        Ok(entries.join(", "))
    }

    fn render_joins(&self, driver: &dyn DatabaseDriver, binder: &mut ParamBinder) -> Result<Vec<String>> {
        if self.with_relations.is_empty() {
            return Ok(Vec::new());
        }
        let metadata = self.metadata()?;
        let relations_config = &self.config.relations;
        let mut ctx = JoinContext::new(
            metadata,
            self.driver.as_ref(),
            relations_config,
            &self.soft_deletes,
            self.config.soft_deletes.enabled,
        );
        let mut joins = Vec::new();
        for spec in &self.with_relations {
            let mut steps = ctx.resolve_path(&self.table, spec.path())?;
            if let RelationSpec::Constrained(_, extra) = spec {
                let last_segment = steps
                    .last_mut()
                    .and_then(|step| step.segments.last_mut())
                    .ok_or_else(|| QueryError::BuilderState(format!("empty relation path {:?}", spec.path())))?;
                for condition in extra {
                    let rendered = condition.render(driver, binder)?;
                    last_segment.on_condition.push_str(" AND ");
                    last_segment.on_condition.push_str(&rendered);
                }
            }
            joins.extend(steps.iter().map(JoinStep::sql));
        }
        Ok(joins)
    }

    fn render_wheres(
        &self,
        driver: &dyn DatabaseDriver,
        binder: &mut ParamBinder,
    ) -> Result<Option<String>> {
        let mut rendered = self
            .wheres
            .iter()
            .map(|(conj, cond)| Ok((*conj, cond.render(driver, binder)?)))
            .collect::<Result<Vec<_>>>()?;

        if self.soft_delete_mode != SoftDeleteMode::WithTrashed && self.config.soft_deletes.enabled {
            if let Some(column) = self.soft_deletes.column_for(&self.table) {
                let quoted = driver.quote_identifier(column);
                let fragment = match self.soft_delete_mode {
                    SoftDeleteMode::OnlyTrashed => format!("{quoted} IS NOT NULL"),
                    _ => format!("{quoted} IS NULL"),
                };
                rendered.push((Conjunction::And, fragment));
            }
        }

        for predicate in &self.existence_predicates {
            let (source, correlation) = self.correlated_source(&predicate.relation)?;
            let mut extra_sql = String::new();
            for condition in &predicate.extra {
                extra_sql.push_str(" AND ");
                extra_sql.push_str(&condition.render(driver, binder)?);
            }
            let exists_sql = format!("EXISTS (SELECT 1 {source} WHERE {correlation}{extra_sql})");
            let fragment = match predicate.mode {
                ExistenceMode::Has => exists_sql,
                ExistenceMode::DoesntHave => format!("NOT {exists_sql}"),
            };
            rendered.push((predicate.conjunction, fragment));
        }

        if rendered.is_empty() {
            return Ok(None);
        }

        let texts: Vec<String> = rendered.iter().map(|(_, sql)| sql.clone()).collect();
        Ok(Some(join_with_conjunctions(&rendered, &texts)))
    }

    /// Builds the `(SELECT COUNT(*) FROM (...) x)` wrapper used by offset
    /// pagination.
    pub(crate) fn compile_count(&self) -> Result<(String, Vec<Value>)> {
        let mut binder = ParamBinder::new(self.driver.clone());
        let base = self.compile_with(&mut binder)?;
        Ok((
            format!("SELECT COUNT(*) AS count FROM ({base}) AS sqlforge_count_subquery"),
            binder.into_values(),
        ))
    }

    pub async fn fetch_all(
        &self,
        executor: Executor<'_>,
        cache: Option<&crate::cache::QueryCache>,
    ) -> Result<sqlforge_core::QueryResult> {
        let (sql, params) = self.compile()?;
        let options = ExecOptions {
            timeout: self.timeout,
            abort: None,
            cache_ttl: self.cache_ttl,
        };
        execution::run_query(
            executor,
            &self.config,
            cache,
            &sql,
            &params,
            crate::config::QueryKind::Select,
            options,
        )
        .await
    }

    pub async fn fetch_one(
        &self,
        executor: Executor<'_>,
        cache: Option<&crate::cache::QueryCache>,
    ) -> Result<Option<sqlforge_core::Row>> {
        let result = self.fetch_all(executor, cache).await?;
        Ok(result.rows.into_iter().next())
    }

    pub async fn count(&self, executor: Executor<'_>) -> Result<u64> {
        let (sql, params) = self.compile_count()?;
        let result = execution::run_query(
            executor,
            &self.config,
            None,
            &sql,
            &params,
            crate::config::QueryKind::Select,
            ExecOptions::default(),
        )
        .await?;
        let row = result
            .rows
            .first()
            .ok_or_else(|| QueryError::BuilderState("COUNT(*) query returned no rows".into()))?;
        Ok(row.get(0).and_then(Value::as_i64).unwrap_or(0) as u64)
    }
}

pub(crate) fn join_with_conjunctions<T>(items: &[(Conjunction, T)], rendered: &[String]) -> String {
    let mut out = String::new();
    for (i, ((conjunction, _), text)) in items.iter().zip(rendered.iter()).enumerate() {
        if i > 0 {
            out.push_str(match conjunction {
                Conjunction::And => " AND ",
                Conjunction::Or => " OR ",
            });
        }
        out.push_str(text);
    }
    out
}
