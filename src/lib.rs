//! # maria-client
//!
//! Self-healing synchronous client driver layer for MariaDB/MySQL.
//!
//! This crate sits atop the server's native binary protocol, which it does
//! not reimplement: the wire driver is an external collaborator plugged in
//! through the [`driver`] traits. On top of that seam the crate owns the
//! three things that are genuinely hard to get right:
//!
//! - **Connection lifecycle** — [`Connection::acquire`] probes liveness on
//!   every access, detects silently re-established sessions by comparing
//!   server thread ids, invalidates dependent statement state, and performs
//!   a full reconnect with freshly provided credentials when the probe
//!   fails.
//! - **Prepared-statement engine** — [`Statement`] manages a grow-only,
//!   zero-initialized-on-reuse binding array and streams over-sized
//!   parameters in chunks bounded by the server's advertised packet limit,
//!   discovered lazily per statement.
//! - **Transient-error retry** — statements that failed with a lock-wait
//!   timeout or deadlock are resubmitted unchanged; the server guarantees
//!   such attempts had no side effect. Every other error surfaces with the
//!   server's code, SQLSTATE, and message attached.
//!
//! ## Concurrency model
//!
//! Every call is a blocking, synchronous round-trip. Connection and
//! statement objects are not safe for concurrent use and must be
//! externally serialized, e.g. one connection per worker thread. Retry
//! loops are synchronous and unbounded, relying on the server's deadlock
//! detector to eventually let one contender through.
//!
//! ## Example
//!
//! ```rust,ignore
//! use maria_client::{ConnectArgs, Connection, FetchMode};
//!
//! let mut conn = Connection::new(native_driver, || {
//!     ConnectArgs::new("db.internal", "app")
//!         .password("s3cret")
//!         .database("inventory")
//! });
//!
//! // Text path with transparent transient-error retry.
//! let version = conn.query_string("select version()", 0)?;
//!
//! // Prepared path with automatic long-data chunking.
//! let stmt = conn.statement()?;
//! stmt.prepare("insert into blobs (data) values (?)")?;
//! stmt.bind_params(|slots| slots[0].set_blob_param(&payload))?;
//! stmt.execute()?;
//! # Ok::<(), maria_client::Error>(())
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bind;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod lock;
pub mod query;
pub mod statement;
#[cfg(feature = "test-utils")]
pub mod testing;

// Re-export commonly used types
pub use bind::{BindArray, BindSlot, FieldType, IntValue};
pub use config::{ArgSource, ConnectArgs, DEFAULT_CHARSET};
pub use connection::{Connection, StmtFor};
pub use driver::{Capabilities, Driver, DriverConn, DriverStmt, FetchOutcome, ResultInit};
pub use error::{ER_LOCK_DEADLOCK, ER_LOCK_WAIT_TIMEOUT, Error, Result, ServerDiag, retryable};
pub use lock::{LockMode, TableLocks};
pub use query::{FetchMode, TextRows};
pub use statement::Statement;
