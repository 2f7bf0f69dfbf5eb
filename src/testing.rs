//! In-memory scriptable driver.
//!
//! Implements the [`driver`](crate::driver) traits against a shared
//! in-memory server model, so every behavior of the layer above the wire
//! protocol — liveness recovery, binding discipline, chunked long-data
//! transfer, retry policy, lock scoping — can be exercised without a
//! server. Tests script outcomes (canned rows, error sequences, ping
//! behavior) through a [`MockServer`] handle and inspect what the "server"
//! received afterwards.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use crate::bind::BindSlot;
use crate::config::ConnectArgs;
use crate::driver::{Capabilities, Driver, DriverConn, DriverStmt, FetchOutcome, ResultInit};
use crate::error::ServerDiag;

/// Scripted behavior of one liveness probe.
#[derive(Debug, Clone, Copy)]
enum PingBehavior {
    /// Probe fails ("server has gone away").
    Dead,
    /// Probe succeeds but the session was silently re-established under a
    /// new thread id.
    SilentReconnect,
}

/// A row of a prepared statement's binary result set: one raw cell per
/// column, `None` for SQL NULL.
pub type BinaryRow = Vec<Option<Vec<u8>>>;

/// A row of a text result set.
pub type TextRow = Vec<Option<String>>;

#[derive(Debug, Default)]
struct ServerState {
    thread_id: u64,
    init_fails: bool,
    connects: Vec<ConnectArgs>,
    charsets: Vec<String>,
    auto_reconnect: Vec<bool>,
    connect_failures: VecDeque<ServerDiag>,
    charset_failures: VecDeque<ServerDiag>,
    ping_script: VecDeque<PingBehavior>,
    executed: Vec<String>,
    text_rows: HashMap<String, Vec<TextRow>>,
    query_errors: HashMap<String, VecDeque<ServerDiag>>,
    affected: Option<u64>,
    freed_results: usize,
    pending_extra_results: usize,
    prepared_rows: HashMap<String, Vec<BinaryRow>>,
    prepare_errors: HashMap<String, ServerDiag>,
    execute_errors: HashMap<String, VecDeque<ServerDiag>>,
    long_chunk_errors: VecDeque<ServerDiag>,
    long_chunks: Vec<(usize, Vec<u8>)>,
    executed_params: Vec<BinaryRow>,
    stmt_allocs: usize,
}

impl ServerState {
    fn new() -> Self {
        Self {
            affected: Some(1),
            ..Self::default()
        }
    }
}

/// Handle for scripting the in-memory server and inspecting what reached it.
#[derive(Debug, Clone)]
pub struct MockServer {
    state: Rc<RefCell<ServerState>>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    /// Create a fresh server model.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(ServerState::new())),
        }
    }

    /// A driver producing connections to this server.
    #[must_use]
    pub fn driver(&self) -> MockDriver {
        MockDriver {
            server: self.clone(),
        }
    }

    /// Make the next `Driver::init` call fail.
    pub fn fail_driver_init(&self) {
        self.state.borrow_mut().init_fails = true;
    }

    /// Script a failure for the next connect attempt.
    pub fn fail_next_connect(&self, diag: ServerDiag) {
        self.state.borrow_mut().connect_failures.push_back(diag);
    }

    /// Script a failure for the next charset option call.
    pub fn fail_next_charset(&self, diag: ServerDiag) {
        self.state.borrow_mut().charset_failures.push_back(diag);
    }

    /// Make the next liveness probe fail.
    pub fn fail_next_ping(&self) {
        self.state
            .borrow_mut()
            .ping_script
            .push_back(PingBehavior::Dead);
    }

    /// Make the next liveness probe succeed on a silently re-established
    /// session (new thread id).
    pub fn silent_reconnect_on_next_ping(&self) {
        self.state
            .borrow_mut()
            .ping_script
            .push_back(PingBehavior::SilentReconnect);
    }

    /// Can the text result for a query.
    pub fn set_text_rows(&self, sql: &str, rows: Vec<TextRow>) {
        self.state
            .borrow_mut()
            .text_rows
            .insert(sql.to_string(), rows);
    }

    /// Script an error sequence for a text query; each entry is consumed by
    /// one attempt, after which the query succeeds.
    pub fn push_query_error(&self, sql: &str, diag: ServerDiag) {
        self.state
            .borrow_mut()
            .query_errors
            .entry(sql.to_string())
            .or_default()
            .push_back(diag);
    }

    /// Set the affected-row count reported after statements.
    pub fn set_affected(&self, affected: Option<u64>) {
        self.state.borrow_mut().affected = affected;
    }

    /// Queue `n` extra pending result sets to be drained.
    pub fn leave_pending_results(&self, n: usize) {
        self.state.borrow_mut().pending_extra_results = n;
    }

    /// Can the binary result rows for a prepared statement.
    pub fn set_prepared_rows(&self, sql: &str, rows: Vec<BinaryRow>) {
        self.state
            .borrow_mut()
            .prepared_rows
            .insert(sql.to_string(), rows);
    }

    /// Set the server's advertised `max_allowed_packet`.
    pub fn set_max_allowed_packet(&self, bytes: u64) {
        self.set_prepared_rows(
            "select @@max_allowed_packet",
            vec![vec![Some(bytes.to_le_bytes().to_vec())]],
        );
    }

    /// Script a failure for preparing a specific statement text.
    pub fn fail_prepare(&self, sql: &str, diag: ServerDiag) {
        self.state
            .borrow_mut()
            .prepare_errors
            .insert(sql.to_string(), diag);
    }

    /// Script an error sequence for executing a prepared statement; each
    /// entry is consumed by one attempt.
    pub fn push_execute_error(&self, sql: &str, diag: ServerDiag) {
        self.state
            .borrow_mut()
            .execute_errors
            .entry(sql.to_string())
            .or_default()
            .push_back(diag);
    }

    /// Script a failure for the next out-of-band chunk send.
    pub fn fail_next_long_chunk(&self, diag: ServerDiag) {
        self.state.borrow_mut().long_chunk_errors.push_back(diag);
    }

    /// Every SQL text the server executed, in order (text and prepared).
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.state.borrow().executed.clone()
    }

    /// Every out-of-band chunk received, in order, as (param index, bytes).
    #[must_use]
    pub fn long_chunks(&self) -> Vec<(usize, Vec<u8>)> {
        self.state.borrow().long_chunks.clone()
    }

    /// Effective parameter values of each prepared execution, with
    /// out-of-band long data assembled in place of the bound buffer.
    #[must_use]
    pub fn executed_params(&self) -> Vec<BinaryRow> {
        self.state.borrow().executed_params.clone()
    }

    /// Number of successful connects so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.borrow().connects.len()
    }

    /// Connection arguments of every connect attempt, in order.
    #[must_use]
    pub fn connect_args(&self) -> Vec<ConnectArgs> {
        self.state.borrow().connects.clone()
    }

    /// Charsets applied before each connect, in order.
    #[must_use]
    pub fn charsets_applied(&self) -> Vec<String> {
        self.state.borrow().charsets.clone()
    }

    /// Current server-side thread id.
    #[must_use]
    pub fn thread_id(&self) -> u64 {
        self.state.borrow().thread_id
    }

    /// Number of result sets freed by clients.
    #[must_use]
    pub fn freed_results(&self) -> usize {
        self.state.borrow().freed_results
    }

    /// Number of statement handles allocated.
    #[must_use]
    pub fn stmt_allocs(&self) -> usize {
        self.state.borrow().stmt_allocs
    }
}

/// Driver producing [`MockConn`] handles.
pub struct MockDriver {
    server: MockServer,
}

impl Driver for MockDriver {
    type Conn = MockConn;

    fn init(&self) -> Option<MockConn> {
        let mut st = self.server.state.borrow_mut();
        if st.init_fails {
            st.init_fails = false;
            return None;
        }
        drop(st);
        Some(MockConn {
            server: self.server.clone(),
            connected: false,
            thread_id: 0,
            produced: None,
            current: None,
            diag: ServerDiag::default(),
        })
    }
}

/// One mock session handle.
#[derive(Debug)]
pub struct MockConn {
    server: MockServer,
    connected: bool,
    thread_id: u64,
    produced: Option<VecDeque<TextRow>>,
    current: Option<VecDeque<TextRow>>,
    diag: ServerDiag,
}

impl DriverConn for MockConn {
    type Stmt = MockStmt;

    fn set_charset(&mut self, charset: &str) -> u32 {
        let mut st = self.server.state.borrow_mut();
        if let Some(diag) = st.charset_failures.pop_front() {
            let code = diag.code;
            self.diag = diag;
            return code;
        }
        st.charsets.push(charset.to_string());
        0
    }

    fn set_auto_reconnect(&mut self, enabled: bool) -> u32 {
        self.server.state.borrow_mut().auto_reconnect.push(enabled);
        0
    }

    fn connect(&mut self, args: &ConnectArgs, _caps: Capabilities) -> u32 {
        let mut st = self.server.state.borrow_mut();
        if let Some(diag) = st.connect_failures.pop_front() {
            let code = diag.code;
            self.diag = diag;
            return code;
        }
        st.thread_id += 1;
        st.connects.push(args.clone());
        self.thread_id = st.thread_id;
        self.connected = true;
        self.diag = ServerDiag::default();
        0
    }

    fn ping(&mut self) -> u32 {
        if !self.connected {
            self.diag = ServerDiag::new(2006, "HY000", "server has gone away");
            return self.diag.code;
        }
        let behavior = self.server.state.borrow_mut().ping_script.pop_front();
        match behavior {
            Some(PingBehavior::Dead) => {
                self.diag = ServerDiag::new(2006, "HY000", "server has gone away");
                self.diag.code
            }
            Some(PingBehavior::SilentReconnect) => {
                let mut st = self.server.state.borrow_mut();
                st.thread_id += 1;
                self.thread_id = st.thread_id;
                0
            }
            None => 0,
        }
    }

    fn thread_id(&self) -> u64 {
        self.thread_id
    }

    fn query(&mut self, sql: &str) -> u32 {
        let mut st = self.server.state.borrow_mut();
        let scripted = st.query_errors.get_mut(sql).and_then(VecDeque::pop_front);
        if let Some(diag) = scripted {
            let code = diag.code;
            self.diag = diag;
            return code;
        }
        st.executed.push(sql.to_string());
        self.produced = st
            .text_rows
            .get(sql)
            .map(|rows| rows.iter().cloned().collect());
        self.diag = ServerDiag::default();
        0
    }

    fn store_result(&mut self) -> ResultInit {
        match self.produced.take() {
            Some(rows) => {
                self.current = Some(rows);
                ResultInit::Ready
            }
            None => ResultInit::NoResult,
        }
    }

    fn use_result(&mut self) -> ResultInit {
        // Same visible behavior as store_result: the model keeps all rows
        // server-side either way.
        self.store_result()
    }

    fn fetch_row(&mut self) -> Option<TextRow> {
        self.current.as_mut()?.pop_front()
    }

    fn free_result(&mut self) {
        let had_produced = self.produced.take().is_some();
        let had_current = self.current.take().is_some();
        if had_produced || had_current {
            self.server.state.borrow_mut().freed_results += 1;
        }
    }

    fn next_result(&mut self) -> bool {
        let mut st = self.server.state.borrow_mut();
        if st.pending_extra_results > 0 {
            st.pending_extra_results -= 1;
            self.produced = Some(VecDeque::new());
            true
        } else {
            false
        }
    }

    fn affected_rows(&self) -> Option<u64> {
        self.server.state.borrow().affected
    }

    fn stmt_init(&mut self) -> Option<MockStmt> {
        self.server.state.borrow_mut().stmt_allocs += 1;
        Some(MockStmt::new(self.server.clone()))
    }

    fn diag(&self) -> ServerDiag {
        self.diag.clone()
    }
}

/// One mock prepared-statement handle.
pub struct MockStmt {
    server: MockServer,
    sql: String,
    params: Vec<BindSlot>,
    long_data: BTreeMap<usize, Vec<u8>>,
    rows: VecDeque<BinaryRow>,
    current_row: Option<BinaryRow>,
    diag: ServerDiag,
}

impl MockStmt {
    fn new(server: MockServer) -> Self {
        Self {
            server,
            sql: String::new(),
            params: Vec::new(),
            long_data: BTreeMap::new(),
            rows: VecDeque::new(),
            current_row: None,
            diag: ServerDiag::default(),
        }
    }
}

impl DriverStmt for MockStmt {
    fn prepare(&mut self, sql: &str) -> u32 {
        let mut st = self.server.state.borrow_mut();
        if let Some(diag) = st.prepare_errors.remove(sql) {
            let code = diag.code;
            self.diag = diag;
            return code;
        }
        drop(st);
        self.sql = sql.to_string();
        self.params.clear();
        self.long_data.clear();
        self.rows.clear();
        self.current_row = None;
        self.diag = ServerDiag::default();
        0
    }

    fn param_count(&self) -> usize {
        self.sql.matches('?').count()
    }

    fn field_count(&self) -> usize {
        let st = self.server.state.borrow();
        match st.prepared_rows.get(&self.sql) {
            Some(rows) => rows.first().map_or(1, Vec::len),
            None if self.sql.trim_start().to_ascii_lowercase().starts_with("select") => 1,
            None => 0,
        }
    }

    fn bind_params(&mut self, slots: &[BindSlot]) -> u32 {
        self.params = slots.to_vec();
        0
    }

    fn bind_results(&mut self, _slots: &[BindSlot]) -> u32 {
        0
    }

    fn execute(&mut self) -> u32 {
        let mut st = self.server.state.borrow_mut();
        let scripted = st
            .execute_errors
            .get_mut(&self.sql)
            .and_then(VecDeque::pop_front);
        if let Some(diag) = scripted {
            let code = diag.code;
            self.diag = diag;
            return code;
        }
        st.executed.push(self.sql.clone());
        if !self.params.is_empty() {
            let effective: BinaryRow = self
                .params
                .iter()
                .enumerate()
                .map(|(i, slot)| match self.long_data.get(&i) {
                    Some(assembled) => Some(assembled.clone()),
                    None if slot.is_null => None,
                    None => Some(slot.buffer.clone()),
                })
                .collect();
            st.executed_params.push(effective);
        }
        self.rows = st
            .prepared_rows
            .get(&self.sql)
            .map(|rows| rows.iter().cloned().collect())
            .unwrap_or_default();
        drop(st);
        self.long_data.clear();
        self.current_row = None;
        self.diag = ServerDiag::default();
        0
    }

    fn fetch(&mut self, slots: &mut [BindSlot]) -> FetchOutcome {
        let Some(row) = self.rows.pop_front() else {
            return FetchOutcome::NoData;
        };
        let mut truncated = false;
        for (i, slot) in slots.iter_mut().enumerate() {
            match row.get(i) {
                Some(Some(bytes)) => {
                    slot.is_null = false;
                    slot.length = bytes.len();
                    let n = bytes.len().min(slot.buffer.len());
                    slot.buffer[..n].copy_from_slice(&bytes[..n]);
                    if bytes.len() > slot.buffer.len() {
                        truncated = true;
                    }
                }
                Some(None) | None => {
                    slot.is_null = true;
                    slot.length = 0;
                }
            }
        }
        self.current_row = Some(row);
        if truncated {
            FetchOutcome::Truncated
        } else {
            FetchOutcome::Row
        }
    }

    fn fetch_column(&mut self, slot: &mut BindSlot, index: usize, offset: usize) -> u32 {
        let cell = self
            .current_row
            .as_ref()
            .and_then(|row| row.get(index))
            .and_then(Option::as_ref);
        let Some(bytes) = cell else {
            self.diag = ServerDiag::new(2053, "HY000", "attempt to read column without a row");
            return self.diag.code;
        };
        let available = bytes.len().saturating_sub(offset);
        let n = available.min(slot.buffer.len());
        slot.buffer[..n].copy_from_slice(&bytes[offset..offset + n]);
        slot.length = bytes.len();
        slot.is_null = false;
        0
    }

    fn send_long_data(&mut self, index: usize, chunk: &[u8]) -> u32 {
        let mut st = self.server.state.borrow_mut();
        if let Some(diag) = st.long_chunk_errors.pop_front() {
            let code = diag.code;
            self.diag = diag;
            return code;
        }
        st.long_chunks.push((index, chunk.to_vec()));
        drop(st);
        self.long_data.entry(index).or_default().extend_from_slice(chunk);
        0
    }

    fn free_result(&mut self) {
        self.rows.clear();
        self.current_row = None;
    }

    fn affected_rows(&self) -> i64 {
        self.server
            .state
            .borrow()
            .affected
            .map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX))
    }

    fn sibling(&self) -> Option<Self> {
        self.server.state.borrow_mut().stmt_allocs += 1;
        Some(Self::new(self.server.clone()))
    }

    fn diag(&self) -> ServerDiag {
        self.diag.clone()
    }
}
