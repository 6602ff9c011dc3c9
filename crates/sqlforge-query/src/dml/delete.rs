//! DELETE compiler.

use std::sync::Arc;
use std::time::Duration;

use sqlforge_core::{validate_identifier, DatabaseDriver, QueryResult, StatementResult, Value};

use crate::condition::{Condition, Conjunction};
use crate::config::{Config, QueryKind};
use crate::error::{QueryError, Result};
use crate::execution::{self, ExecOptions, Executor};
use crate::param::ParamBinder;

/// Builds a `DELETE` statement. `where(expr)` is the sole clause;
/// `returning` is appended where the dialect permits it.
#[derive(Clone)]
pub struct DeleteBuilder {
    driver: Arc<dyn DatabaseDriver>,
    config: Arc<Config>,
    table: String,
    wheres: Vec<(Conjunction, Condition)>,
    returning: Vec<String>,
    timeout: Option<Duration>,
}

impl DeleteBuilder {
    pub fn new(driver: Arc<dyn DatabaseDriver>, config: Arc<Config>, table: impl Into<String>) -> Self {
        Self {
            driver,
            config,
            table: table.into(),
            wheres: Vec::new(),
            returning: Vec::new(),
            timeout: None,
        }
    }

    pub fn where_cond(mut self, condition: Condition) -> Self {
        self.wheres.push((Conjunction::And, condition));
        self
    }

    pub fn or_where(mut self, condition: Condition) -> Self {
        self.wheres.push((Conjunction::Or, condition));
        self
    }

    pub fn returning(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.returning = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn compile(&self) -> Result<(String, Vec<Value>)> {
        validate_identifier(&self.table, "table")?;
        for column in &self.returning {
            validate_identifier(column, "returning column")?;
        }

        let driver = self.driver.as_ref();
        let mut binder = ParamBinder::new(self.driver.clone());
        let quoted_table = driver.quote_identifier(&self.table);
        let mut sql = format!("DELETE FROM {quoted_table}");

        if !self.wheres.is_empty() {
            let rendered = self
                .wheres
                .iter()
                .map(|(_, cond)| cond.render(driver, &mut binder))
                .collect::<Result<Vec<_>>>()?;
            let joined = crate::select::join_with_conjunctions(&self.wheres, &rendered);
            sql.push_str(&format!(" WHERE {joined}"));
        }

        if !self.returning.is_empty() && driver.capabilities().supports_returning {
            let cols = self
                .returning
                .iter()
                .map(|c| driver.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" RETURNING {cols}"));
        }

        Ok((sql, binder.into_values()))
    }

    pub async fn execute(&self, executor: Executor<'_>) -> Result<StatementResult> {
        let (sql, params) = self.compile()?;
        let options = ExecOptions {
            timeout: self.timeout,
            abort: None,
            cache_ttl: None,
        };
        execution::run_statement(executor, &self.config, &sql, &params, QueryKind::Delete, options).await
    }

    /// Runs the delete as a query rather than a statement when `returning`
    /// was set and the dialect supports it, so the deleted rows come back.
    pub async fn execute_returning(&self, executor: Executor<'_>) -> Result<QueryResult> {
        if self.returning.is_empty() || !self.driver.capabilities().supports_returning {
            return Err(QueryError::BuilderState(
                "execute_returning requires .returning(...) and dialect support".into(),
            ));
        }
        let (sql, params) = self.compile()?;
        let options = ExecOptions {
            timeout: self.timeout,
            abort: None,
            cache_ttl: None,
        };
        execution::run_query(executor, &self.config, None, &sql, &params, QueryKind::Delete, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Op;
    use sqlforge_core::Dialect;

    fn driver(dialect: Dialect) -> Arc<dyn DatabaseDriver> {
        crate::test_support::stub_driver(dialect)
    }

    #[test]
    fn delete_with_where_binds_parameter() {
        let builder = DeleteBuilder::new(driver(Dialect::Postgres), Arc::new(Config::default()), "users")
            .where_cond(Condition::triple("id", Op::Eq, Value::Int64(7)));
        let (sql, params) = builder.compile().unwrap();
        assert_eq!(sql, "DELETE FROM \"users\" WHERE \"id\" = $1");
        assert_eq!(params, vec![Value::Int64(7)]);
    }

    #[test]
    fn delete_without_where_has_no_clause() {
        let builder = DeleteBuilder::new(driver(Dialect::Postgres), Arc::new(Config::default()), "users");
        let (sql, params) = builder.compile().unwrap();
        assert_eq!(sql, "DELETE FROM \"users\"");
        assert!(params.is_empty());
    }

    #[test]
    fn returning_is_appended_on_postgres() {
        let builder = DeleteBuilder::new(driver(Dialect::Postgres), Arc::new(Config::default()), "users")
            .where_cond(Condition::triple("id", Op::Eq, Value::Int64(7)))
            .returning(["id", "email"]);
        let (sql, _) = builder.compile().unwrap();
        assert!(sql.ends_with("RETURNING \"id\", \"email\""));
    }

    #[test]
    fn returning_is_dropped_on_mysql() {
        let builder = DeleteBuilder::new(driver(Dialect::MySql), Arc::new(Config::default()), "users")
            .where_cond(Condition::triple("id", Op::Eq, Value::Int64(7)))
            .returning(["id"]);
        let (sql, _) = builder.compile().unwrap();
        assert!(!sql.contains("RETURNING"));
    }

    #[test]
    fn unsafe_table_name_is_rejected() {
        let builder = DeleteBuilder::new(driver(Dialect::Postgres), Arc::new(Config::default()), "users; DROP TABLE users");
        assert!(builder.compile().is_err());
    }
}
