//! Parameter binding: every builder owns a monotonically-growing parameter
//! vector, and placeholders are rendered through the dialect driver so
//! Postgres gets `$1, $2, ...` while MySQL/SQLite get `?`. Parameter values
//! never flow through the identifier path; they are always
//! placeholder-bound.

use std::sync::Arc;

use sqlforge_core::{DatabaseDriver, Value};

/// Accumulates bound parameter values for one builder and renders
/// dialect-correct placeholders as values are pushed.
#[derive(Clone)]
pub struct ParamBinder {
    driver: Arc<dyn DatabaseDriver>,
    values: Vec<Value>,
}

impl ParamBinder {
    pub fn new(driver: Arc<dyn DatabaseDriver>) -> Self {
        Self {
            driver,
            values: Vec::new(),
        }
    }

    /// Appends `value` and returns the placeholder text for its position.
    pub fn push(&mut self, value: Value) -> String {
        self.values.push(value);
        self.driver.placeholder(self.values.len())
    }

    /// Appends each value in `values` and returns their placeholders
    /// joined by `, `, for `IN (...)`-shaped fragments.
    pub fn push_list(&mut self, values: impl IntoIterator<Item = Value>) -> String {
        values
            .into_iter()
            .map(|v| self.push(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn driver(&self) -> &dyn DatabaseDriver {
        self.driver.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlforge_core::Dialect;

    fn postgres() -> Arc<dyn DatabaseDriver> {
        crate::test_support::stub_driver(Dialect::Postgres)
    }

    fn sqlite() -> Arc<dyn DatabaseDriver> {
        crate::test_support::stub_driver(Dialect::Sqlite)
    }

    #[test]
    fn postgres_placeholders_are_positional() {
        let mut binder = ParamBinder::new(postgres());
        assert_eq!(binder.push(Value::Int64(1)), "$1");
        assert_eq!(binder.push(Value::Int64(2)), "$2");
        assert_eq!(binder.values().len(), 2);
    }

    #[test]
    fn sqlite_placeholders_are_question_marks() {
        let mut binder = ParamBinder::new(sqlite());
        assert_eq!(binder.push(Value::Int64(1)), "?");
        assert_eq!(binder.push(Value::Int64(2)), "?");
    }

    #[test]
    fn push_list_binds_each_value_in_order() {
        let mut binder = ParamBinder::new(postgres());
        let fragment = binder.push_list([Value::Int64(1), Value::Int64(2), Value::Int64(3)]);
        assert_eq!(fragment, "$1, $2, $3");
    }
}
