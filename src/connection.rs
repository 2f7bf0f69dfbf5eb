//! Connection lifecycle management.
//!
//! A [`Connection`] owns one native session handle, the last-known
//! server-assigned thread id, and the connection's single reusable
//! [`Statement`]. Every access goes through [`acquire`](Connection::acquire),
//! which probes liveness, detects silent reconnection by comparing thread
//! ids, and performs a full reconnect with freshly provided credentials
//! when the probe fails.

use crate::config::{ArgSource, ConnectArgs};
use crate::driver::{Capabilities, Driver, DriverConn};
use crate::error::{Error, Result};
use crate::query::drain_results;
use crate::statement::Statement;

/// The statement handle type a driver's connections produce.
pub type StmtFor<D> = <<D as Driver>::Conn as DriverConn>::Stmt;

/// SQL mode applied immediately after every successful connect.
const STRICT_MODE_SQL: &str = "SET sql_mode = 'STRICT_ALL_TABLES'";

/// One logical session to the server, with self-healing access.
///
/// Not safe for concurrent use: all operations on a connection (and on the
/// statement it owns) must be externally serialized, e.g. one connection
/// per worker thread.
pub struct Connection<D: Driver> {
    driver: D,
    args: ArgSource,
    // The statement is declared before the handle so it is dropped first:
    // a statement must never outlive the session it was allocated on.
    stmt: Option<Statement<StmtFor<D>>>,
    conn: Option<D::Conn>,
    thread_id: u64,
}

impl<D: Driver> Connection<D> {
    /// Create an unconnected session.
    ///
    /// `args` is invoked on every (re)connect attempt, so it may rotate
    /// credentials between attempts. The first actual connect happens on
    /// first access.
    pub fn new(driver: D, args: impl FnMut() -> ConnectArgs + Send + 'static) -> Self {
        Self {
            driver,
            args: Box::new(args),
            stmt: None,
            conn: None,
            thread_id: 0,
        }
    }

    /// Return a usable native handle, guaranteed live at return time.
    ///
    /// Clears any pending result set of the owned statement (undelivered
    /// result sets on a stale session corrupt subsequent queries), drains
    /// queued multi-statement results, and probes liveness. A successful
    /// probe that comes back with a different thread id means the session
    /// was silently re-established; the owned statement is then invalid
    /// and gets discarded. A failed probe triggers a full reconnect.
    pub fn acquire(&mut self) -> Result<&mut D::Conn> {
        if let Some(stmt) = &mut self.stmt {
            stmt.clear();
        }

        let mut alive = false;
        if let Some(conn) = &mut self.conn {
            drain_results(conn);
            if conn.ping() == 0 {
                let current = conn.thread_id();
                if current != self.thread_id {
                    tracing::info!(
                        old = self.thread_id,
                        new = current,
                        "liveness probe came back on a new session; discarding prepared statement"
                    );
                    self.thread_id = current;
                    self.stmt = None;
                }
                alive = true;
            } else {
                tracing::warn!(diag = %conn.diag(), "liveness probe failed");
            }
        }

        if alive {
            match self.conn.as_mut() {
                Some(conn) => Ok(conn),
                None => unreachable!("probe succeeded on an existing handle"),
            }
        } else {
            self.reconnect()
        }
    }

    /// The connection's reusable statement, connecting first if necessary.
    pub fn statement(&mut self) -> Result<&mut Statement<StmtFor<D>>> {
        self.acquire()?;
        if self.stmt.is_none() {
            let Some(conn) = self.conn.as_mut() else {
                unreachable!("acquire() guarantees a live handle");
            };
            let handle = conn.stmt_init().ok_or_else(|| Error::Statement {
                op: "allocate statement handle",
                diag: conn.diag(),
            })?;
            self.stmt = Some(Statement::new(handle));
        }
        match self.stmt.as_mut() {
            Some(stmt) => Ok(stmt),
            None => unreachable!("statement installed above"),
        }
    }

    /// The server-assigned session id, connecting if necessary.
    pub fn thread_id(&mut self) -> Result<u64> {
        if self.conn.is_none() {
            self.reconnect()?;
        }
        Ok(self.thread_id)
    }

    /// Close the session, destroying the owned statement first.
    pub fn disconnect(&mut self) {
        self.stmt = None;
        self.conn = None;
    }

    /// Whether a native handle currently exists (it may still be stale).
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Full reconnect: close any existing handle, request fresh arguments,
    /// apply options, connect, and set strict SQL mode.
    ///
    /// Connect failures are not retried here; the caller decides whether to
    /// call [`acquire`](Self::acquire) again. Any failure releases the
    /// partially-constructed handle before the error is raised.
    ///
    /// # Panics
    ///
    /// Panics when the native driver cannot even allocate a handle, which
    /// is a programming or environment error, not a server condition.
    fn reconnect(&mut self) -> Result<&mut D::Conn> {
        self.disconnect();

        #[allow(clippy::panic)]
        let Some(mut conn) = self.driver.init() else {
            panic!("native driver failed to initialize a connection handle");
        };

        let args = (self.args)();
        if conn.set_charset(&args.charset) != 0 {
            return Err(Error::Connect {
                step: "set charset",
                diag: conn.diag(),
            });
        }
        if conn.set_auto_reconnect(true) != 0 {
            return Err(Error::Connect {
                step: "enable auto-reconnect",
                diag: conn.diag(),
            });
        }
        if conn.connect(&args, Capabilities::standard()) != 0 {
            return Err(Error::Connect {
                step: "connect",
                diag: conn.diag(),
            });
        }
        // Strict mode rejects silent truncation; without it a value that
        // does not fit its column degrades to a warning.
        if let Err(err) = crate::query::exec_text(&mut conn, STRICT_MODE_SQL) {
            let diag = err.diag().cloned().unwrap_or_default();
            return Err(Error::Connect {
                step: "set strict sql_mode",
                diag,
            });
        }

        self.thread_id = conn.thread_id();
        tracing::info!(
            host = %args.host,
            user = %args.user,
            thread_id = self.thread_id,
            "connected"
        );
        Ok(self.conn.insert(conn))
    }
}

impl<D: Driver> Drop for Connection<D> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl<D: Driver> std::fmt::Debug for Connection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.conn.is_some())
            .field("thread_id", &self.thread_id)
            .field("has_statement", &self.stmt.is_some())
            .finish_non_exhaustive()
    }
}
