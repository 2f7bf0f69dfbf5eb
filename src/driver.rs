//! Boundary to the native client library.
//!
//! The wire protocol is not implemented here. Everything below this seam is
//! an opaque capability shaped after the native C client's connection and
//! prepared-statement handles: operations return a numeric server error
//! code (0 = success) and expose their last diagnostics through
//! [`ServerDiag`] accessors, exactly as the native library does.
//!
//! The layer above owns all policy: liveness probing, reconnect, binding
//! discipline, chunked long-data transfer, and retry. Implementations of
//! these traits own only the mechanics of one handle.

use crate::bind::BindSlot;
use crate::config::ConnectArgs;
use crate::error::ServerDiag;

/// Capabilities requested when establishing a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Allow multiple statements per query string (and multiple result
    /// sets per round-trip).
    pub multi_statements: bool,
    /// Enable protocol compression.
    pub compress: bool,
}

impl Capabilities {
    /// The capability set every managed connection is established with.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            multi_statements: true,
            compress: true,
        }
    }
}

/// Outcome of materializing a result set after a text query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultInit {
    /// A result set is now current and rows can be fetched.
    Ready,
    /// The statement legitimately produced no result set.
    NoResult,
    /// The driver failed; consult [`DriverConn::diag`].
    Failed,
}

/// Outcome of advancing a prepared statement's row cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A row was fetched into the bound result slots.
    Row,
    /// A row was fetched but at least one column did not fit its bound
    /// buffer; the full value can still be read via
    /// [`DriverStmt::fetch_column`].
    Truncated,
    /// End of data.
    NoData,
    /// The fetch failed; consult [`DriverStmt::diag`].
    Failed,
}

/// Factory for native connection handles.
pub trait Driver {
    /// Connection handle type produced by this driver.
    type Conn: DriverConn;

    /// Allocate a fresh, unconnected handle.
    ///
    /// Returns `None` only when the native library itself is broken
    /// (allocation or global-init failure); the caller treats that as a
    /// programming error, not a recoverable condition.
    fn init(&self) -> Option<Self::Conn>;
}

/// One native session handle.
///
/// Options ([`set_charset`](Self::set_charset),
/// [`set_auto_reconnect`](Self::set_auto_reconnect)) apply only before
/// [`connect`](Self::connect). A handle holds at most one current result
/// set at a time; multi-statement queries queue further sets behind
/// [`next_result`](Self::next_result).
pub trait DriverConn {
    /// Prepared-statement handle type bound to this connection.
    type Stmt: DriverStmt;

    /// Set the connection character set. Pre-connect only.
    fn set_charset(&mut self, charset: &str) -> u32;

    /// Enable or disable the native auto-reconnect option. Pre-connect only.
    fn set_auto_reconnect(&mut self, enabled: bool) -> u32;

    /// Establish the session.
    fn connect(&mut self, args: &ConnectArgs, caps: Capabilities) -> u32;

    /// Liveness probe. 0 means the session answered.
    ///
    /// With auto-reconnect enabled the probe may silently re-establish the
    /// session; the caller must compare [`thread_id`](Self::thread_id)
    /// afterwards to detect that.
    fn ping(&mut self) -> u32;

    /// Server-assigned session id of the current connection.
    fn thread_id(&self) -> u64;

    /// Execute a literal SQL text.
    fn query(&mut self, sql: &str) -> u32;

    /// Materialize the current result set entirely client-side.
    fn store_result(&mut self) -> ResultInit;

    /// Open the current result set for row-by-row server-side fetching.
    ///
    /// While open, no other query may run on this handle.
    fn use_result(&mut self) -> ResultInit;

    /// Fetch the next row of the current result set.
    ///
    /// Each cell is `None` for SQL NULL, text otherwise.
    fn fetch_row(&mut self) -> Option<Vec<Option<String>>>;

    /// Release the current result set, fetched or not.
    fn free_result(&mut self);

    /// Advance to the next queued result set of a multi-statement query.
    ///
    /// Returns true when another set is now current.
    fn next_result(&mut self) -> bool;

    /// Rows affected by the last statement; `None` when the count is
    /// unavailable (e.g. after an error).
    fn affected_rows(&self) -> Option<u64>;

    /// Allocate a prepared-statement handle on this connection.
    ///
    /// `None` means allocation failed; diagnostics are on the connection.
    fn stmt_init(&mut self) -> Option<Self::Stmt>;

    /// Last connection-level diagnostics.
    fn diag(&self) -> ServerDiag;
}

/// One native prepared-statement handle.
///
/// The handle stays valid only as long as the session it was allocated on;
/// the layer above discards it whenever the session is re-established.
pub trait DriverStmt: Sized {
    /// Compile a statement text.
    fn prepare(&mut self, sql: &str) -> u32;

    /// Number of `?` placeholders in the prepared statement.
    fn param_count(&self) -> usize;

    /// Number of result columns of the prepared statement.
    fn field_count(&self) -> usize;

    /// Register the parameter descriptor array.
    ///
    /// The driver captures what it needs from the slots; the caller keeps
    /// ownership and must not mutate them before execution.
    fn bind_params(&mut self, slots: &[BindSlot]) -> u32;

    /// Register the result descriptor array (types and buffer sizes).
    fn bind_results(&mut self, slots: &[BindSlot]) -> u32;

    /// Run the prepared statement with the bound parameters.
    fn execute(&mut self) -> u32;

    /// Fetch the next row into the bound result slots.
    ///
    /// The driver fills each slot's buffer and sets its null flag and
    /// actual-length indicator.
    fn fetch(&mut self, slots: &mut [BindSlot]) -> FetchOutcome;

    /// Re-fetch one column of the current row into a caller-supplied slot,
    /// starting at `offset` bytes into the value.
    fn fetch_column(&mut self, slot: &mut BindSlot, index: usize, offset: usize) -> u32;

    /// Send one out-of-band chunk of parameter `index`'s value.
    ///
    /// Chunks accumulate in order; the assembled value replaces the bound
    /// buffer at execution time.
    fn send_long_data(&mut self, index: usize, chunk: &[u8]) -> u32;

    /// Discard any pending result set of this statement.
    fn free_result(&mut self);

    /// Rows affected by the last execution (negative when unavailable).
    fn affected_rows(&self) -> i64;

    /// Allocate a second, independent statement handle on the same native
    /// session.
    ///
    /// Used for short-lived auxiliary queries that must not disturb this
    /// statement's own state. `None` means allocation failed.
    fn sibling(&self) -> Option<Self>;

    /// Last statement-level diagnostics.
    fn diag(&self) -> ServerDiag;
}
