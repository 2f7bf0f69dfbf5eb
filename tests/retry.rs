//! Retry policy on the text protocol path: transient lock errors resubmit
//! the identical statement, everything else propagates untouched.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use maria_client::testing::{MockDriver, MockServer};
use maria_client::{
    ConnectArgs, Connection, ER_LOCK_DEADLOCK, ER_LOCK_WAIT_TIMEOUT, Error, ServerDiag, retryable,
};

fn connection(server: &MockServer) -> Connection<MockDriver> {
    Connection::new(server.driver(), || ConnectArgs::new("db.internal", "tester"))
}

#[test]
fn transient_lock_errors_are_resubmitted() {
    let server = MockServer::new();
    let mut conn = connection(&server);
    let sql = "delete from sessions where expired = 1";

    server.push_query_error(
        sql,
        ServerDiag::new(ER_LOCK_WAIT_TIMEOUT, "HY000", "Lock wait timeout exceeded"),
    );
    server.push_query_error(sql, ServerDiag::new(ER_LOCK_DEADLOCK, "40001", "Deadlock found"));

    conn.run(sql).unwrap();
    let runs = server.executed().iter().filter(|s| s.as_str() == sql).count();
    assert_eq!(runs, 1, "only the successful attempt reaches the server log");
}

#[test]
fn nonretryable_error_propagates_with_diagnostics_intact() {
    let server = MockServer::new();
    let mut conn = connection(&server);
    let sql = "insert into t values (1)";

    server.push_query_error(sql, ServerDiag::new(1062, "23000", "Duplicate entry '1'"));
    let err = conn.run(sql).unwrap_err();
    match err {
        Error::Query { sql: text, diag } => {
            assert_eq!(text, sql);
            assert_eq!(diag.code, 1062);
            assert_eq!(diag.sqlstate, "23000");
            assert_eq!(diag.message, "Duplicate entry '1'");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn retry_stops_at_the_first_nonretryable_code() {
    let server = MockServer::new();
    let mut conn = connection(&server);
    let sql = "update t set v = v + 1";

    server.push_query_error(
        sql,
        ServerDiag::new(ER_LOCK_WAIT_TIMEOUT, "HY000", "Lock wait timeout exceeded"),
    );
    server.push_query_error(sql, ServerDiag::new(1146, "42S02", "Table 't' doesn't exist"));

    let err = conn.run(sql).unwrap_err();
    assert_eq!(err.diag().unwrap().code, 1146);
    assert!(!err.is_retryable());
    assert!(
        !server.executed().iter().any(|s| s.as_str() == sql),
        "the statement never succeeded"
    );
}

#[test]
fn retryable_code_set_is_exactly_the_two_lock_errors() {
    assert!(retryable(ER_LOCK_WAIT_TIMEOUT));
    assert!(retryable(ER_LOCK_DEADLOCK));
    assert!(!retryable(0));
    assert!(!retryable(1062));
    assert!(!retryable(2006));
}
