//! Pagination: offset pagination (data + total +
//! page count), simple pagination (`perPage + 1` fetch to detect `hasMore`
//! without a `COUNT(*)`), and cursor pagination (stable ordering, emitting
//! `nextCursor`/`prevCursor`). `chunk`/`chunkById`/`eachById` iterate pages
//! until a page comes back short or no cursor advances.

use sqlforge_core::{QueryResult, Row, Value};

use crate::condition::{Condition, Op};
use crate::error::{QueryError, Result};
use crate::execution::Executor;

use super::SelectBuilder;

/// Result of `paginate`: the page's rows alongside the total row count of
/// the unpaginated query and the derived page count.
#[derive(Debug, Clone)]
pub struct OffsetPage {
    pub data: QueryResult,
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
}

/// Result of `simplePaginate`: no `COUNT(*)`, just whether a next page
/// exists.
#[derive(Debug, Clone)]
pub struct SimplePage {
    pub data: QueryResult,
    pub per_page: u64,
    pub current_page: u64,
    pub has_more: bool,
}

/// Result of `cursorPaginate`: stable-order rows plus the cursor to resume
/// from in either direction.
#[derive(Debug, Clone)]
pub struct CursorPage {
    pub data: QueryResult,
    pub next_cursor: Option<Value>,
    pub prev_cursor: Option<Value>,
}

impl SelectBuilder {
    /// Offset pagination: `data` + `total` (via `COUNT(*)` over the composed
    /// query) + `lastPage`.
    pub async fn paginate(&self, page: u64, per_page: u64, executor: Executor<'_>) -> Result<OffsetPage> {
        if per_page == 0 {
            return Err(QueryError::BuilderState("per_page must be greater than zero".into()));
        }
        let current_page = page.max(1);
        let offset = (current_page - 1) * per_page;

        let total = self.count(executor).await?;
        let data = self
            .clone()
            .limit(per_page)
            .offset(offset)
            .fetch_all(executor, None)
            .await?;
        let last_page = total.div_ceil(per_page).max(1);

        Ok(OffsetPage {
            data,
            total,
            per_page,
            current_page,
            last_page,
        })
    }

    /// Simple pagination: fetches `perPage + 1` rows and trims the extra one
    /// to report `hasMore` without a separate count query.
    pub async fn simple_paginate(&self, page: u64, per_page: u64, executor: Executor<'_>) -> Result<SimplePage> {
        if per_page == 0 {
            return Err(QueryError::BuilderState("per_page must be greater than zero".into()));
        }
        let current_page = page.max(1);
        let offset = (current_page - 1) * per_page;

        let mut result = self
            .clone()
            .limit(per_page + 1)
            .offset(offset)
            .fetch_all(executor, None)
            .await?;
        let has_more = result.row_count() as u64 > per_page;
        if has_more {
            result.rows.truncate(per_page as usize);
        }

        Ok(SimplePage {
            data: result,
            per_page,
            current_page,
            has_more,
        })
    }

    /// Cursor pagination: orders by the configured cursor column (default
    /// `id`), fetching one row past `perPage` to derive `nextCursor`.
    /// `cursor` is `None` to start from the beginning.
    pub async fn cursor_paginate(
        &self,
        cursor: Option<Value>,
        per_page: u64,
        executor: Executor<'_>,
    ) -> Result<CursorPage> {
        if per_page == 0 {
            return Err(QueryError::BuilderState("per_page must be greater than zero".into()));
        }
        let cursor_column = self.config.pagination.cursor_column.clone();

        let mut page = self.clone().order_by(&cursor_column, false).limit(per_page + 1);
        if let Some(value) = cursor.clone() {
            page = page.where_cond(Condition::triple(cursor_column.clone(), Op::Gt, value));
        }

        let mut result = page.fetch_all(executor, None).await?;
        let has_more = result.row_count() as u64 > per_page;
        if has_more {
            result.rows.truncate(per_page as usize);
        }

        let next_cursor = if has_more {
            result
                .rows
                .last()
                .and_then(|row| row.get_by_name(&cursor_column))
                .cloned()
        } else {
            None
        };

        Ok(CursorPage {
            data: result,
            next_cursor,
            prev_cursor: cursor,
        })
    }

    /// Iterates offset-based pages, invoking `handler` with each page's rows.
    /// Stops when `handler` returns `Ok(false)` or a page returns fewer than
    /// `per_page` rows.
    pub async fn chunk<F>(&self, per_page: u64, executor: Executor<'_>, mut handler: F) -> Result<()>
    where
        F: FnMut(&QueryResult) -> Result<bool>,
    {
        if per_page == 0 {
            return Err(QueryError::BuilderState("per_page must be greater than zero".into()));
        }
        let mut offset = 0u64;
        loop {
            let result = self
                .clone()
                .limit(per_page)
                .offset(offset)
                .fetch_all(executor, None)
                .await?;
            let row_count = result.row_count() as u64;
            if row_count == 0 {
                return Ok(());
            }
            let keep_going = handler(&result)?;
            if !keep_going || row_count < per_page {
                return Ok(());
            }
            offset += per_page;
        }
    }

    /// Iterates pages ordered by `id_column`, resuming each page from the
    /// last id seen rather than an offset, so rows inserted/deleted between
    /// pages don't skip or repeat a page.
    pub async fn chunk_by_id<F>(
        &self,
        per_page: u64,
        id_column: &str,
        executor: Executor<'_>,
        mut handler: F,
    ) -> Result<()>
    where
        F: FnMut(&QueryResult) -> Result<bool>,
    {
        if per_page == 0 {
            return Err(QueryError::BuilderState("per_page must be greater than zero".into()));
        }
        let mut last_id: Option<Value> = None;
        loop {
            let mut page = self.clone().order_by(id_column, false).limit(per_page);
            if let Some(id) = last_id.clone() {
                page = page.where_cond(Condition::triple(id_column, Op::Gt, id));
            }
            let result = page.fetch_all(executor, None).await?;
            let row_count = result.row_count() as u64;
            if row_count == 0 {
                return Ok(());
            }

            let new_last = result.rows.last().and_then(|row| row.get_by_name(id_column)).cloned();
            let keep_going = handler(&result)?;
            let advanced = match (&new_last, &last_id) {
                (Some(new_id), Some(old_id)) => new_id != old_id,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !keep_going || row_count < per_page || !advanced {
                return Ok(());
            }
            last_id = new_last;
        }
    }

    /// Like [`SelectBuilder::chunk_by_id`] but invokes `handler` once per
    /// row rather than once per page.
    pub async fn each_by_id<F>(
        &self,
        per_page: u64,
        id_column: &str,
        executor: Executor<'_>,
        mut handler: F,
    ) -> Result<()>
    where
        F: FnMut(&Row) -> Result<bool>,
    {
        self.chunk_by_id(per_page, id_column, executor, |page| {
            for row in &page.rows {
                if !handler(row)? {
                    return Ok(false);
                }
            }
            Ok(true)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use sqlforge_core::{Connection, IsolationLevel, StatementResult, Transaction};

    use super::*;
    use crate::config::Config;
    use sqlforge_core::{DatabaseDriver, Dialect};

    fn postgres() -> Arc<dyn DatabaseDriver> {
        crate::test_support::stub_driver(Dialect::Postgres)
    }

    fn builder(table: &str) -> SelectBuilder {
        SelectBuilder::new(postgres(), Arc::new(Config::default()), table)
    }

    /// A connection that serves 25 monotonic-id rows out of an in-memory
    /// table, honouring `LIMIT`/`OFFSET`/`WHERE id > ?`/`COUNT(*)` well
    /// enough to drive the pagination tests end to end.
    struct FakeTableConnection {
        row_count: i64,
        calls: AtomicU64,
    }

    fn all_rows(n: i64) -> Vec<Row> {
        (1..=n)
            .map(|id| Row::new(vec!["id".to_string()], vec![Value::Int64(id)]))
            .collect()
    }

    #[async_trait]
    impl Connection for FakeTableConnection {
        fn driver_name(&self) -> &str {
            "fake"
        }

        async fn execute(&self, _sql: &str, _params: &[Value]) -> sqlforge_core::Result<StatementResult> {
            unreachable!("pagination only issues queries")
        }

        async fn query(&self, sql: &str, params: &[Value]) -> sqlforge_core::Result<QueryResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let rows = all_rows(self.row_count);

            if sql.contains("COUNT(*)") {
                return Ok(QueryResult {
                    columns: vec!["count".to_string()],
                    rows: vec![Row::new(vec!["count".to_string()], vec![Value::Int64(self.row_count)])],
                    execution_time_ms: 0,
                });
            }

            let cursor_floor: i64 = if sql.contains("\"id\" > ") {
                params.first().and_then(Value::as_i64).unwrap_or(0)
            } else {
                0
            };

            let filtered: Vec<Row> = rows.into_iter().filter(|r| r.get(0).unwrap().as_i64().unwrap() > cursor_floor).collect();

            let offset = extract_clause(sql, "OFFSET").unwrap_or(0) as usize;
            let limit = extract_clause(sql, "LIMIT").unwrap_or(filtered.len() as u64) as usize;

            let page: Vec<Row> = if sql.contains("\"id\" > ") {
                filtered.into_iter().take(limit).collect()
            } else {
                filtered.into_iter().skip(offset).take(limit).collect()
            };

            Ok(QueryResult {
                columns: vec!["id".to_string()],
                rows: page,
                execution_time_ms: 0,
            })
        }

        async fn begin_transaction(
            &self,
            _isolation: IsolationLevel,
            _read_only: bool,
        ) -> sqlforge_core::Result<Box<dyn Transaction>> {
            Err(sqlforge_core::Error::NotSupported("transactions".into()))
        }

        async fn close(&self) -> sqlforge_core::Result<()> {
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    fn extract_clause(sql: &str, keyword: &str) -> Option<u64> {
        let idx = sql.find(keyword)?;
        let rest = &sql[idx + keyword.len()..];
        rest.split_whitespace().next()?.parse().ok()
    }

    #[tokio::test]
    async fn offset_pagination_reports_total_and_last_page() {
        let conn = FakeTableConnection {
            row_count: 25,
            calls: AtomicU64::new(0),
        };
        let page = builder("rows")
            .paginate(2, 10, Executor::Connection(&conn))
            .await
            .unwrap();
        assert_eq!(page.total, 25);
        assert_eq!(page.current_page, 2);
        assert_eq!(page.last_page, 3);
        assert_eq!(page.data.row_count(), 10);
    }

    #[tokio::test]
    async fn simple_pagination_flags_has_more_without_counting() {
        let conn = FakeTableConnection {
            row_count: 25,
            calls: AtomicU64::new(0),
        };
        let page = builder("rows")
            .simple_paginate(3, 10, Executor::Connection(&conn))
            .await
            .unwrap();
        assert_eq!(page.data.row_count(), 5);
        assert!(!page.has_more);
        // never queries COUNT(*)
        assert_eq!(conn.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cursor_pagination_advances_and_terminates() {
        let conn = FakeTableConnection {
            row_count: 25,
            calls: AtomicU64::new(0),
        };
        let first = builder("rows")
            .cursor_paginate(None, 10, Executor::Connection(&conn))
            .await
            .unwrap();
        assert_eq!(first.data.row_count(), 10);
        assert_eq!(first.next_cursor, Some(Value::Int64(10)));

        let second = builder("rows")
            .cursor_paginate(first.next_cursor, 10, Executor::Connection(&conn))
            .await
            .unwrap();
        assert_eq!(second.data.row_count(), 10);
        assert_eq!(second.next_cursor, Some(Value::Int64(20)));

        let third = builder("rows")
            .cursor_paginate(second.next_cursor, 10, Executor::Connection(&conn))
            .await
            .unwrap();
        assert_eq!(third.data.row_count(), 5);
        assert_eq!(third.next_cursor, None);
    }

    #[tokio::test]
    async fn chunk_terminates_on_short_page() {
        let conn = FakeTableConnection {
            row_count: 25,
            calls: AtomicU64::new(0),
        };
        let mut seen = 0u64;
        let mut pages = 0u64;
        builder("rows")
            .chunk(10, Executor::Connection(&conn), |page| {
                seen += page.row_count() as u64;
                pages += 1;
                Ok(true)
            })
            .await
            .unwrap();
        assert_eq!(seen, 25);
        assert_eq!(pages, 3);
    }

    #[tokio::test]
    async fn chunk_by_id_stops_when_cursor_stalls() {
        let conn = FakeTableConnection {
            row_count: 25,
            calls: AtomicU64::new(0),
        };
        let mut seen = 0u64;
        builder("rows")
            .chunk_by_id(10, "id", Executor::Connection(&conn), |page| {
                seen += page.row_count() as u64;
                Ok(true)
            })
            .await
            .unwrap();
        assert_eq!(seen, 25);
    }

    #[tokio::test]
    async fn each_by_id_invokes_handler_per_row() {
        let conn = FakeTableConnection {
            row_count: 25,
            calls: AtomicU64::new(0),
        };
        let mut ids = Vec::new();
        builder("rows")
            .each_by_id(10, "id", Executor::Connection(&conn), |row| {
                ids.push(row.get_by_name("id").and_then(Value::as_i64).unwrap());
                Ok(true)
            })
            .await
            .unwrap();
        assert_eq!(ids.len(), 25);
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&25));
    }

    #[tokio::test]
    async fn chunk_stops_early_when_handler_returns_false() {
        let conn = FakeTableConnection {
            row_count: 25,
            calls: AtomicU64::new(0),
        };
        let mut pages = 0u64;
        builder("rows")
            .chunk(10, Executor::Connection(&conn), |_page| {
                pages += 1;
                Ok(pages < 1)
            })
            .await
            .unwrap();
        assert_eq!(pages, 1);
    }
}
