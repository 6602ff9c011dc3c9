//! Window function fragments: `rowNumber`,
//! `rank`, `denseRank`, each optionally partitioned and ordered.

use sqlforge_core::{validate_identifier, DatabaseDriver};

use crate::error::Result;

/// Which window function to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFunction {
    RowNumber,
    Rank,
    DenseRank,
}

impl WindowFunction {
    fn sql(self) -> &'static str {
        match self {
            WindowFunction::RowNumber => "ROW_NUMBER()",
            WindowFunction::Rank => "RANK()",
            WindowFunction::DenseRank => "DENSE_RANK()",
        }
    }
}

/// A single window-function select-list entry.
#[derive(Debug, Clone)]
pub struct WindowSpec {
    pub function: WindowFunction,
    pub alias: String,
    pub partition_by: Vec<String>,
    pub order_by: Vec<(String, bool)>,
}

impl WindowSpec {
    pub fn new(function: WindowFunction, alias: impl Into<String>) -> Self {
        Self {
            function,
            alias: alias.into(),
            partition_by: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn partition_by(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.partition_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by.push((column.into(), descending));
        self
    }

    /// Renders `ROW_NUMBER() OVER (PARTITION BY ... ORDER BY ...) AS alias`.
    pub fn render(&self, driver: &dyn DatabaseDriver) -> Result<String> {
        validate_identifier(&self.alias, "window function alias")?;
        for column in &self.partition_by {
            validate_identifier(column, "window function partition column")?;
        }
        for (column, _) in &self.order_by {
            validate_identifier(column, "window function order column")?;
        }

        let mut over = String::new();
        if !self.partition_by.is_empty() {
            let columns = self
                .partition_by
                .iter()
                .map(|c| driver.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ");
            over.push_str("PARTITION BY ");
            over.push_str(&columns);
        }
        if !self.order_by.is_empty() {
            if !over.is_empty() {
                over.push(' ');
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
            over.push_str("ORDER BY ");
            over.push_str(&columns);
        }

        let alias = driver.quote_identifier(&self.alias);
        Ok(format!("{} OVER ({}) AS {}", self.function.sql(), over, alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlforge_core::Dialect;

    fn driver() -> std::sync::Arc<dyn DatabaseDriver> {
        crate::test_support::stub_driver(Dialect::Postgres)
    }

    #[test]
    fn row_number_with_partition_and_order() {
        let spec = WindowSpec::new(WindowFunction::RowNumber, "rn")
            .partition_by(["department_id"])
            .order_by("salary", true);
        let sql = spec.render(driver().as_ref()).unwrap();
        assert_eq!(
            sql,
            "ROW_NUMBER() OVER (PARTITION BY \"department_id\" ORDER BY \"salary\" DESC) AS \"rn\""
        );
    }

    #[test]
    fn rank_with_no_partition() {
        let spec = WindowSpec::new(WindowFunction::Rank, "r").order_by("score", false);
        let sql = spec.render(driver().as_ref()).unwrap();
        assert_eq!(sql, "RANK() OVER (ORDER BY \"score\" ASC) AS \"r\"");
    }

    #[test]
    fn rejects_unsafe_alias() {
        let spec = WindowSpec::new(WindowFunction::DenseRank, "r; DROP TABLE x");
        assert!(spec.render(driver().as_ref()).is_err());
    }
}
