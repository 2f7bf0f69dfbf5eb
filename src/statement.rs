//! Prepared-statement execution engine.
//!
//! A [`Statement`] owns one native prepared-statement handle and the
//! [`BindArray`] it reuses across unrelated queries. It composes the two
//! lower layers: the binding buffer (zero-initialized on every binding
//! pass, grow-only capacity) and chunked long-data transfer for parameters
//! that exceed the server's packet limit.
//!
//! Execution retries deadlocks (error 1213) indefinitely with no backoff:
//! the server guarantees a deadlocked statement had no side effect, so it
//! is safe to resubmit unchanged, and the server's deadlock detector
//! eventually lets one contender through. Callers needing a bound must
//! impose it externally; there is no cancellation mechanism.

use bytes::Bytes;
use smallvec::SmallVec;

use crate::bind::{BindArray, BindSlot};
use crate::driver::{DriverStmt, FetchOutcome};
use crate::error::{ER_LOCK_DEADLOCK, Error, Result};

/// Chunk-limit fallback when the server's packet-size answer is absent or
/// not a multiple of 1024, applied before halving.
const FALLBACK_PACKET_BYTES: u64 = 65536;

/// Auxiliary query for discovering the server's packet limit.
const MAX_PACKET_SQL: &str = "select @@max_allowed_packet";

/// One prepared statement bound to a live connection.
///
/// The statement is created by
/// [`Connection::statement`](crate::Connection::statement) and reused
/// across unrelated queries via [`prepare`](Self::prepare) /
/// [`clear`](Self::clear). Its native handle is scoped to the session it
/// was allocated on; the connection discards it on reconnect.
pub struct Statement<S: DriverStmt> {
    stmt: S,
    binds: BindArray,
    /// Cached long-data chunk limit in bytes; 0 means not yet discovered.
    chunk_limit: u64,
}

impl<S: DriverStmt> Statement<S> {
    /// Wrap a freshly allocated native statement handle.
    #[must_use]
    pub fn new(stmt: S) -> Self {
        Self {
            stmt,
            binds: BindArray::new(),
            chunk_limit: 0,
        }
    }

    /// Compile a statement text against the connection.
    pub fn prepare(&mut self, sql: &str) -> Result<()> {
        if self.stmt.prepare(sql) != 0 {
            return Err(Error::Prepare {
                sql: sql.to_string(),
                diag: self.stmt.diag(),
            });
        }
        Ok(())
    }

    /// Bind the statement's parameters.
    ///
    /// Resizes the binding array to the statement's declared parameter
    /// count (zero-initializing every slot), invokes `binder` to populate
    /// the descriptors, performs the native bind, and then streams every
    /// parameter whose value exceeds the chunk limit through repeated
    /// out-of-band sends of at most `chunk_limit` bytes each.
    pub fn bind_params(&mut self, binder: impl FnOnce(&mut [BindSlot])) -> Result<()> {
        let count = self.stmt.param_count();
        self.binds.resize(count);
        binder(self.binds.slots_mut());

        let mut long_params: SmallVec<[usize; 4]> = SmallVec::new();
        let limit = if count == 0 { 0 } else { self.chunk_limit()? };
        for (i, slot) in self.binds.slots().iter().enumerate() {
            if slot.buffer.len() as u64 > limit {
                long_params.push(i);
            }
        }

        if self.stmt.bind_params(self.binds.slots()) != 0 {
            return Err(Error::Statement {
                op: "bind params",
                diag: self.stmt.diag(),
            });
        }

        for i in long_params {
            let buffer = &self.binds.slots()[i].buffer;
            tracing::debug!(
                param = i,
                bytes = buffer.len(),
                limit,
                "streaming over-sized parameter out of band"
            );
            for chunk in buffer.chunks(limit as usize) {
                if self.stmt.send_long_data(i, chunk) != 0 {
                    return Err(Error::LongData {
                        bytes: chunk.len(),
                        diag: self.stmt.diag(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run the statement, retrying deadlocks indefinitely.
    pub fn execute(&mut self) -> Result<()> {
        match self.execute_unchecked() {
            0 => Ok(()),
            _ => Err(Error::Statement {
                op: "execute",
                diag: self.stmt.diag(),
            }),
        }
    }

    /// Run the statement and return the raw server error code instead of
    /// raising (0 = success).
    ///
    /// Deadlocks are still retried internally; every other code is returned
    /// to the caller, which enables bespoke patterns such as
    /// ignore-on-duplicate-key.
    pub fn execute_unchecked(&mut self) -> u32 {
        loop {
            let code = self.stmt.execute();
            if code == ER_LOCK_DEADLOCK {
                tracing::trace!("deadlock on execute, resubmitting");
                continue;
            }
            return code;
        }
    }

    /// Bind the result columns after a successful execute.
    ///
    /// Resizes the binding array to the statement's result column count,
    /// invokes `binder` to populate the descriptors, and performs the
    /// native result bind.
    pub fn bind_results(&mut self, binder: impl FnOnce(&mut [BindSlot])) -> Result<()> {
        self.binds.resize(self.stmt.field_count());
        binder(self.binds.slots_mut());
        if self.stmt.bind_results(self.binds.slots()) != 0 {
            return Err(Error::Statement {
                op: "bind results",
                diag: self.stmt.diag(),
            });
        }
        Ok(())
    }

    /// Execute, then bind the result columns.
    pub fn exec_bind_results(&mut self, binder: impl FnOnce(&mut [BindSlot])) -> Result<()> {
        self.execute()?;
        self.bind_results(binder)
    }

    /// Advance the result cursor, filling the bound result slots.
    ///
    /// Returns false at end of data. A truncated column still counts as a
    /// row; its full value is available via
    /// [`get_long_blob`](Self::get_long_blob). A fetch error is fatal.
    pub fn next_row(&mut self) -> Result<bool> {
        match self.stmt.fetch(self.binds.slots_mut()) {
            FetchOutcome::Row | FetchOutcome::Truncated => Ok(true),
            FetchOutcome::NoData => Ok(false),
            FetchOutcome::Failed => Err(Error::Statement {
                op: "fetch row",
                diag: self.stmt.diag(),
            }),
        }
    }

    /// Read a long column of the current row with a right-sized buffer.
    ///
    /// The column is expected to have been bound with a zero-length
    /// placeholder ([`BindSlot::set_long_blob_result`]); after the fetch
    /// reported its actual length, this issues a separate fetch-column
    /// request with a freshly allocated buffer of exactly that size.
    /// Returns `None` when the column was SQL NULL.
    pub fn get_long_blob(&mut self, index: usize) -> Result<Option<Bytes>> {
        let bound = &self.binds.slots()[index];
        if bound.is_null {
            return Ok(None);
        }
        let mut scratch = BindSlot {
            field_type: bound.field_type,
            buffer: vec![0; bound.length],
            length: bound.length,
            ..BindSlot::default()
        };
        if self.stmt.fetch_column(&mut scratch, index, 0) != 0 {
            return Err(Error::Statement {
                op: "fetch blob column",
                diag: self.stmt.diag(),
            });
        }
        Ok(Some(Bytes::from(scratch.buffer)))
    }

    /// Execute a one-column unsigned-integer query and fetch its first row
    /// into `dst`.
    ///
    /// Returns false when no row was returned or the value was NULL; `dst`
    /// is untouched in that case.
    pub fn query_uint(&mut self, dst: &mut u64) -> Result<bool> {
        self.exec_bind_results(|slots| slots[0].set_int_result::<u64>())?;
        if !self.next_row()? {
            return Ok(false);
        }
        let slot = &self.binds.slots()[0];
        if slot.is_null {
            return Ok(false);
        }
        *dst = slot.uint_value();
        Ok(true)
    }

    /// Discard any pending result set without fetching it.
    ///
    /// Required before reusing the statement or touching the connection
    /// that owns it.
    pub fn clear(&mut self) {
        self.stmt.free_result();
    }

    /// Whether the last execution affected at least one row.
    #[must_use]
    pub fn affected(&self) -> bool {
        self.stmt.affected_rows() > 0
    }

    /// The active bind descriptors of the most recent binding pass.
    #[must_use]
    pub fn slots(&self) -> &[BindSlot] {
        self.binds.slots()
    }

    /// Logical size of the binding array.
    #[must_use]
    pub fn bind_len(&self) -> usize {
        self.binds.len()
    }

    /// Allocated capacity of the binding array (high-water mark).
    #[must_use]
    pub fn bind_capacity(&self) -> usize {
        self.binds.capacity()
    }

    /// The chunk limit for out-of-band transfer, discovering it on first
    /// use.
    ///
    /// Queries the server's `max_allowed_packet` once per statement
    /// lifetime through a short-lived sibling statement on the same
    /// session, so the caller's own statement state is never disturbed.
    /// The answer is halved for a safety margin; an absent answer, a NULL,
    /// or one that is not a multiple of 1024 falls back to
    /// [`FALLBACK_PACKET_BYTES`].
    pub fn chunk_limit(&mut self) -> Result<u64> {
        if self.chunk_limit == 0 {
            let handle = self.stmt.sibling().ok_or_else(|| Error::Statement {
                op: "allocate auxiliary statement",
                diag: self.stmt.diag(),
            })?;
            let mut probe = Statement::new(handle);
            probe.prepare(MAX_PACKET_SQL)?;
            let mut max_packet = 0u64;
            if !probe.query_uint(&mut max_packet)? || max_packet % 1024 != 0 || max_packet == 0 {
                max_packet = FALLBACK_PACKET_BYTES;
            }
            self.chunk_limit = max_packet / 2;
            tracing::debug!(limit = self.chunk_limit, "discovered long-data chunk limit");
        }
        Ok(self.chunk_limit)
    }
}

impl<S: DriverStmt> std::fmt::Debug for Statement<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("bind_len", &self.binds.len())
            .field("bind_capacity", &self.binds.capacity())
            .field("chunk_limit", &self.chunk_limit)
            .finish_non_exhaustive()
    }
}
