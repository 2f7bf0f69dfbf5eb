//! Scoped table locking.
//!
//! [`TableLocks`] collects a table-to-mode spec and issues a single
//! multi-table `lock tables` statement for it. Dropping the guard always
//! releases whatever is held, on every exit path including unwinding.

use std::collections::BTreeMap;

use crate::connection::Connection;
use crate::driver::Driver;
use crate::error::Result;

/// Lock mode requested for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared read lock.
    Read,
    /// Exclusive write lock.
    Write,
}

impl LockMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Unlocked,
    BySpec,
    AllRead,
}

/// Scoped table-lock coordinator.
///
/// Spec mutations ([`add_read`](Self::add_read), [`add_write`](Self::add_write),
/// [`remove`](Self::remove), [`remove_all`](Self::remove_all)) never touch
/// server state; only [`lock`](Self::lock), [`lock_all_read`](Self::lock_all_read)
/// and [`unlock`](Self::unlock) do.
pub struct TableLocks<'a, D: Driver> {
    conn: &'a mut Connection<D>,
    spec: BTreeMap<String, LockMode>,
    state: LockState,
}

impl<'a, D: Driver> TableLocks<'a, D> {
    /// Create an unlocked coordinator on a connection.
    pub fn new(conn: &'a mut Connection<D>) -> Self {
        Self {
            conn,
            spec: BTreeMap::new(),
            state: LockState::Unlocked,
        }
    }

    /// Add (or change) a table to the pending spec with a read lock.
    pub fn add_read(&mut self, table: impl Into<String>) {
        self.spec.insert(table.into(), LockMode::Read);
    }

    /// Add (or change) a table to the pending spec with a write lock.
    pub fn add_write(&mut self, table: impl Into<String>) {
        self.spec.insert(table.into(), LockMode::Write);
    }

    /// Remove a table from the pending spec.
    pub fn remove(&mut self, table: &str) {
        self.spec.remove(table);
    }

    /// Clear the pending spec.
    pub fn remove_all(&mut self) {
        self.spec.clear();
    }

    /// Lock every table of the spec in one statement.
    ///
    /// An empty spec unlocks instead.
    pub fn lock(&mut self) -> Result<()> {
        if self.spec.is_empty() {
            return self.unlock();
        }
        let mut sql = String::from("lock tables ");
        for (i, (table, mode)) in self.spec.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(table);
            sql.push(' ');
            sql.push_str(mode.as_str());
        }
        self.conn.run(&sql)?;
        self.state = LockState::BySpec;
        Ok(())
    }

    /// Take a global read lock on all tables, flushing them first.
    ///
    /// Idempotent when already in that state.
    pub fn lock_all_read(&mut self) -> Result<()> {
        if self.state != LockState::AllRead {
            self.conn.run("FLUSH TABLES WITH READ LOCK")?;
            self.state = LockState::AllRead;
        }
        Ok(())
    }

    /// Release whatever is held; a no-op when already unlocked.
    pub fn unlock(&mut self) -> Result<()> {
        if self.state != LockState::Unlocked {
            self.conn.run("unlock tables")?;
            self.state = LockState::Unlocked;
        }
        Ok(())
    }

    /// The underlying connection.
    pub fn connection(&mut self) -> &mut Connection<D> {
        self.conn
    }
}

impl<D: Driver> Drop for TableLocks<'_, D> {
    fn drop(&mut self) {
        if let Err(err) = self.unlock() {
            tracing::warn!(error = %err, "failed to release table locks on scope exit");
        }
    }
}
