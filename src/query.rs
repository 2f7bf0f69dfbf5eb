//! Retryable text-query execution and scalar helpers.
//!
//! Literal SQL texts run through a retry loop that resubmits the identical
//! query on the two transient error classes (lock-wait timeout, deadlock)
//! and drains any pending result sets before each attempt, as the protocol
//! requires. Row-returning queries expose their result either buffered
//! (materialized client-side) or streaming (row-by-row with server-side
//! cursor state); a streaming result mutably borrows the connection, so the
//! compiler rejects any attempt to run another query while it is open.

use crate::connection::Connection;
use crate::driver::{Driver, DriverConn, ResultInit};
use crate::error::{Error, Result, retryable};

/// How a result set is retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Materialize the entire result client-side.
    Buffered,
    /// Fetch row-by-row, holding server-side cursor state until dropped.
    Streaming,
}

/// Drain every pending result set on the handle.
///
/// Issuing a new query while unread results are pending corrupts the
/// session, so this runs before every text-query attempt and on every
/// connection acquisition.
pub(crate) fn drain_results<C: DriverConn>(conn: &mut C) {
    conn.free_result();
    while conn.next_result() {
        conn.free_result();
    }
}

/// Execute a literal SQL text, retrying transient errors.
pub(crate) fn exec_text<C: DriverConn>(conn: &mut C, sql: &str) -> Result<()> {
    drain_results(conn);
    loop {
        if conn.query(sql) == 0 {
            return Ok(());
        }
        let diag = conn.diag();
        if retryable(diag.code) {
            tracing::trace!(code = diag.code, "transient error, resubmitting query");
            continue;
        }
        return Err(Error::Query {
            sql: sql.to_string(),
            diag,
        });
    }
}

/// Rows of a text query's result set.
///
/// Holds the connection borrowed for as long as the result is open; the
/// result is freed on drop. In streaming mode the server-side cursor stays
/// open until then.
#[derive(Debug)]
pub struct TextRows<'c, C: DriverConn> {
    conn: &'c mut C,
}

impl<C: DriverConn> TextRows<'_, C> {
    /// Fetch the next row; each cell is `None` for SQL NULL.
    pub fn next_row(&mut self) -> Option<Vec<Option<String>>> {
        self.conn.fetch_row()
    }
}

impl<C: DriverConn> Drop for TextRows<'_, C> {
    fn drop(&mut self) {
        self.conn.free_result();
    }
}

impl<D: Driver> Connection<D> {
    /// Execute a literal SQL text, discarding any result.
    pub fn run(&mut self, sql: &str) -> Result<()> {
        let conn = self.acquire()?;
        exec_text(conn, sql)
    }

    /// Execute a statement that must change at least one row.
    pub fn affect(&mut self, sql: &str) -> Result<u64> {
        let conn = self.acquire()?;
        exec_text(conn, sql)?;
        match conn.affected_rows() {
            None => Err(Error::Query {
                sql: sql.to_string(),
                diag: conn.diag(),
            }),
            Some(0) => Err(Error::ZeroAffected {
                sql: sql.to_string(),
            }),
            Some(n) => Ok(n),
        }
    }

    /// Execute a row-returning query and open its result set.
    ///
    /// A query that yields no result set at all is an error here; use
    /// [`run`](Self::run) for statements without results.
    pub fn query_rows(&mut self, sql: &str, mode: FetchMode) -> Result<TextRows<'_, D::Conn>> {
        let conn = self.acquire()?;
        exec_text(conn, sql)?;
        let init = match mode {
            FetchMode::Buffered => conn.store_result(),
            FetchMode::Streaming => conn.use_result(),
        };
        match init {
            ResultInit::Ready => Ok(TextRows { conn }),
            ResultInit::NoResult => Err(Error::NoResult {
                sql: sql.to_string(),
            }),
            ResultInit::Failed => Err(Error::Query {
                sql: sql.to_string(),
                diag: conn.diag(),
            }),
        }
    }

    /// Stream one column of a query's rows through a callback.
    ///
    /// Stops early when the callback returns false. The cell passed is
    /// `None` for SQL NULL (or an out-of-range column index).
    pub fn query_column(
        &mut self,
        sql: &str,
        col: usize,
        mut next_row: impl FnMut(Option<&str>) -> bool,
    ) -> Result<()> {
        let mut rows = self.query_rows(sql, FetchMode::Streaming)?;
        while let Some(row) = rows.next_row() {
            let cell = row.get(col).and_then(|c| c.as_deref());
            if !next_row(cell) {
                break;
            }
        }
        Ok(())
    }

    /// First non-NULL value of a column, or the empty string when the
    /// query returns no row (or only NULLs).
    pub fn query_string(&mut self, sql: &str, col: usize) -> Result<String> {
        let mut found = String::new();
        self.query_column(sql, col, |cell| match cell {
            Some(value) => {
                found = value.to_string();
                false
            }
            None => true,
        })?;
        Ok(found)
    }

    /// First non-NULL value of a column parsed as an unsigned integer.
    ///
    /// `Ok(None)` when the query returns no row, which is a normal
    /// outcome; a row whose value is not an unsigned integer is a fatal
    /// [`Error::Parse`], so callers can tell the two apart.
    pub fn query_u64(&mut self, sql: &str, col: usize) -> Result<Option<u64>> {
        let mut found: Option<Result<u64>> = None;
        self.query_column(sql, col, |cell| match cell {
            Some(value) => {
                found = Some(value.parse::<u64>().map_err(|_| Error::Parse {
                    what: "unsigned integer",
                    value: value.to_string(),
                }));
                false
            }
            None => true,
        })?;
        found.transpose()
    }

    /// Switch the session's current database.
    pub fn use_database(&mut self, db_name: &str) -> Result<()> {
        self.run(&format!("use {db_name}"))
    }

    /// Whether the server compares table names case-sensitively.
    pub fn is_case_sensitive(&mut self) -> Result<bool> {
        let value = self
            .query_u64("show variables like 'lower\\_case\\_table\\_names'", 1)?
            .unwrap_or(0);
        match value {
            0 => Ok(true),  // unix-like storage, case-sensitive
            1 | 2 => Ok(false), // lowercased or case-folded comparison
            n => Err(Error::Unexpected(format!(
                "lower_case_table_names value {n}"
            ))),
        }
    }

    /// The `show create table` schema text with the database qualifier
    /// stripped.
    ///
    /// When a parent table or view is missing, the server qualifies names
    /// with the database even if it is the current one; stripping the
    /// qualifier keeps the schema text relocatable.
    pub fn table_schema(&mut self, db_name: &str, table_name: &str) -> Result<String> {
        let db_prefix = format!("`{db_name}`.");
        let schema = self.query_string(&format!("show create table {db_prefix}{table_name}"), 1)?;
        Ok(schema.replace(&db_prefix, ""))
    }
}
