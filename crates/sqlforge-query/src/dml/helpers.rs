//! Convenience helpers: `firstOrCreate`,
//! `updateOrCreate`, `save`, and `findOrFail`, each a thin composition of
//! the select compiler and the insert/update builders rather than its own
//! SQL-generating path.

use std::sync::Arc;

use indexmap::IndexMap;
use sqlforge_core::{DatabaseDriver, Row, Value};

use crate::condition::{Condition, Op};
use crate::config::Config;
use crate::error::{QueryError, Result};
use crate::execution::Executor;
use crate::select::SelectBuilder;

use super::insert::InsertBuilder;
use super::update::UpdateBuilder;

fn match_conditions(match_on: &IndexMap<String, Value>) -> Vec<Condition> {
    match_on
        .iter()
        .map(|(column, value)| Condition::triple(column.clone(), Op::Eq, value.clone()))
        .collect()
}

fn select_by_match(
    driver: Arc<dyn DatabaseDriver>,
    config: Arc<Config>,
    table: &str,
    match_on: &IndexMap<String, Value>,
) -> SelectBuilder {
    let mut builder = SelectBuilder::new(driver, config, table);
    for condition in match_conditions(match_on) {
        builder = builder.where_cond(condition);
    }
    builder
}

/// `firstOrCreate(match, defaults)`: returns the first row matching `match`,
/// inserting a new row from `match` merged with `defaults` when none exists.
pub async fn first_or_create(
    driver: Arc<dyn DatabaseDriver>,
    config: Arc<Config>,
    table: &str,
    match_on: IndexMap<String, Value>,
    defaults: IndexMap<String, Value>,
    executor: Executor<'_>,
) -> Result<Row> {
    let existing = select_by_match(driver.clone(), config.clone(), table, &match_on)
        .limit(1)
        .fetch_one(executor, None)
        .await?;
    if let Some(row) = existing {
        return Ok(row);
    }

    let mut attributes = match_on;
    for (column, value) in defaults {
        attributes.insert(column, value);
    }

    let insert = InsertBuilder::new(driver.clone(), config.clone(), table).values(vec![attributes.clone()])?;
    insert.execute(executor).await?;

    select_by_match(driver, config, table, &attributes)
        .limit(1)
        .fetch_one(executor, None)
        .await?
        .ok_or_else(|| QueryError::NotFound(format!("row in {table} vanished after insert")))
}

/// `updateOrCreate(match, values)`: updates the row matching `match` with
/// `values` when it exists, otherwise inserts `match` merged with `values`.
/// Either way, returns the resulting row.
pub async fn update_or_create(
    driver: Arc<dyn DatabaseDriver>,
    config: Arc<Config>,
    table: &str,
    match_on: IndexMap<String, Value>,
    values: IndexMap<String, Value>,
    executor: Executor<'_>,
) -> Result<Row> {
    let existing = select_by_match(driver.clone(), config.clone(), table, &match_on)
        .limit(1)
        .fetch_one(executor, None)
        .await?;

    if existing.is_some() {
        let mut update = UpdateBuilder::new(driver.clone(), config.clone(), table).set(values);
        for condition in match_conditions(&match_on) {
            update = update.where_cond(condition);
        }
        update.execute(executor).await?;
    } else {
        let mut attributes = match_on.clone();
        for (column, value) in values {
            attributes.insert(column, value);
        }
        let insert = InsertBuilder::new(driver.clone(), config.clone(), table).values(vec![attributes])?;
        insert.execute(executor).await?;
    }

    select_by_match(driver, config, table, &match_on)
        .limit(1)
        .fetch_one(executor, None)
        .await?
        .ok_or_else(|| QueryError::NotFound(format!("row in {table} vanished after update_or_create")))
}

/// `save(...)`: dispatches to `UPDATE` when `primary_key` names a column
/// present in `attributes` and a row with that key exists, otherwise
/// `INSERT`s. Returns the saved row.
pub async fn save(
    driver: Arc<dyn DatabaseDriver>,
    config: Arc<Config>,
    table: &str,
    primary_key: &str,
    attributes: IndexMap<String, Value>,
    executor: Executor<'_>,
) -> Result<Row> {
    let key_value = attributes.get(primary_key).cloned();

    let existing = match &key_value {
        Some(value) if !matches!(value, Value::Null) => {
            SelectBuilder::new(driver.clone(), config.clone(), table)
                .where_cond(Condition::triple(primary_key, Op::Eq, value.clone()))
                .limit(1)
                .fetch_one(executor, None)
                .await?
        }
        _ => None,
    };

    if existing.is_some() {
        let key_value = key_value.expect("checked above");
        let mut update_attrs = attributes.clone();
        update_attrs.shift_remove(primary_key);
        UpdateBuilder::new(driver.clone(), config.clone(), table)
            .set(update_attrs)
            .where_cond(Condition::triple(primary_key, Op::Eq, key_value.clone()))
            .execute(executor)
            .await?;
        return SelectBuilder::new(driver, config, table)
            .where_cond(Condition::triple(primary_key, Op::Eq, key_value))
            .limit(1)
            .fetch_one(executor, None)
            .await?
            .ok_or_else(|| QueryError::NotFound(format!("row in {table} vanished after save")));
    }

    let insert = InsertBuilder::new(driver.clone(), config.clone(), table).values(vec![attributes.clone()])?;
    let id = insert.insert_get_id(executor).await?;

    SelectBuilder::new(driver, config, table)
        .where_cond(Condition::triple(primary_key, Op::Eq, id))
        .limit(1)
        .fetch_one(executor, None)
        .await?
        .ok_or_else(|| QueryError::NotFound(format!("row in {table} vanished after save")))
}

/// `findOrFail(id)`: fetches the row whose `primary_key` equals `id`,
/// failing with [`QueryError::NotFound`] when absent.
pub async fn find_or_fail(
    driver: Arc<dyn DatabaseDriver>,
    config: Arc<Config>,
    table: &str,
    primary_key: &str,
    id: Value,
    executor: Executor<'_>,
) -> Result<Row> {
    SelectBuilder::new(driver, config, table)
        .where_cond(Condition::triple(primary_key, Op::Eq, id.clone()))
        .limit(1)
        .fetch_one(executor, None)
        .await?
        .ok_or_else(|| QueryError::NotFound(format!("no row in {table} with {primary_key} = {id:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::stub_driver;
    use sqlforge_core::Dialect;

    fn attrs(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn match_conditions_builds_one_eq_per_entry() {
        let match_on = attrs(&[("email", Value::String("ada@example.com".into()))]);
        let conditions = match_conditions(&match_on);
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn select_by_match_compiles_with_all_predicates() {
        let driver = stub_driver(Dialect::Postgres);
        let config = Arc::new(Config::default());
        let match_on = attrs(&[("id", Value::Int64(1))]);
        let builder = select_by_match(driver, config, "users", &match_on).limit(1);
        let (sql, params) = builder.compile().unwrap();
        assert!(sql.contains("WHERE \"id\" = $1"));
        assert_eq!(params, vec![Value::Int64(1)]);
    }
}
