//! Table-lock coordinator: single-statement locking, scope-bound release,
//! and the global read-lock mode.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use maria_client::testing::{MockDriver, MockServer};
use maria_client::{ConnectArgs, Connection, Error, Result, TableLocks};

fn connection(server: &MockServer) -> Connection<MockDriver> {
    Connection::new(server.driver(), || ConnectArgs::new("db.internal", "tester"))
}

fn unlock_count(server: &MockServer) -> usize {
    server
        .executed()
        .iter()
        .filter(|s| s.as_str() == "unlock tables")
        .count()
}

#[test]
fn lock_names_every_table_with_its_mode_in_one_statement() {
    let server = MockServer::new();
    let mut conn = connection(&server);

    let mut locks = TableLocks::new(&mut conn);
    locks.add_write("orders");
    locks.add_read("products");
    locks.lock().unwrap();

    assert!(
        server
            .executed()
            .contains(&"lock tables orders write, products read".to_string())
    );
}

#[test]
fn later_mode_for_the_same_table_wins() {
    let server = MockServer::new();
    let mut conn = connection(&server);

    let mut locks = TableLocks::new(&mut conn);
    locks.add_read("orders");
    locks.add_write("orders");
    locks.lock().unwrap();

    assert!(server.executed().contains(&"lock tables orders write".to_string()));
}

#[test]
fn locking_an_empty_spec_releases_instead() {
    let server = MockServer::new();
    let mut conn = connection(&server);

    let mut locks = TableLocks::new(&mut conn);
    locks.add_write("orders");
    locks.lock().unwrap();

    locks.remove_all();
    locks.lock().unwrap();
    assert_eq!(unlock_count(&server), 1);
    drop(locks);
    // Already unlocked; the guard does not release a second time.
    assert_eq!(unlock_count(&server), 1);
}

#[test]
fn guard_releases_exactly_once_on_scope_exit() {
    let server = MockServer::new();
    let mut conn = connection(&server);

    {
        let mut locks = TableLocks::new(&mut conn);
        locks.add_read("audit_log");
        locks.lock().unwrap();
    }
    assert_eq!(unlock_count(&server), 1);

    {
        let mut locks = TableLocks::new(&mut conn);
        // Never locked: nothing to release.
        locks.add_read("audit_log");
    }
    assert_eq!(unlock_count(&server), 1);
}

#[test]
fn guard_releases_on_the_error_path_too() {
    fn copy_rows(conn: &mut Connection<MockDriver>) -> Result<()> {
        let mut locks = TableLocks::new(conn);
        locks.add_write("dst");
        locks.add_read("src");
        locks.lock()?;
        Err(Error::Unexpected("simulated mid-batch failure".to_string()))
    }

    let server = MockServer::new();
    let mut conn = connection(&server);
    assert!(copy_rows(&mut conn).is_err());
    assert_eq!(unlock_count(&server), 1);
}

#[test]
fn global_read_lock_is_idempotent() {
    let server = MockServer::new();
    let mut conn = connection(&server);

    let mut locks = TableLocks::new(&mut conn);
    locks.lock_all_read().unwrap();
    locks.lock_all_read().unwrap();

    let flushes = server
        .executed()
        .iter()
        .filter(|s| s.as_str() == "FLUSH TABLES WITH READ LOCK")
        .count();
    assert_eq!(flushes, 1);

    drop(locks);
    assert_eq!(unlock_count(&server), 1);
}

#[test]
fn relocking_by_spec_after_a_global_lock_reissues_the_statement() {
    let server = MockServer::new();
    let mut conn = connection(&server);

    let mut locks = TableLocks::new(&mut conn);
    locks.lock_all_read().unwrap();
    locks.add_write("orders");
    locks.lock().unwrap();
    // Global state was replaced by the spec lock.
    locks.lock_all_read().unwrap();

    let flushes = server
        .executed()
        .iter()
        .filter(|s| s.as_str() == "FLUSH TABLES WITH READ LOCK")
        .count();
    assert_eq!(flushes, 2);
}

#[test]
fn queries_run_through_the_guard_while_locked() {
    let server = MockServer::new();
    let mut conn = connection(&server);

    let mut locks = TableLocks::new(&mut conn);
    locks.add_write("counters");
    locks.lock().unwrap();
    locks.connection().run("update counters set n = n + 1").unwrap();
    drop(locks);

    let executed = server.executed();
    let lock_pos = executed
        .iter()
        .position(|s| s.starts_with("lock tables"))
        .unwrap();
    let update_pos = executed
        .iter()
        .position(|s| s.starts_with("update counters"))
        .unwrap();
    let unlock_pos = executed
        .iter()
        .position(|s| s.as_str() == "unlock tables")
        .unwrap();
    assert!(lock_pos < update_pos && update_pos < unlock_pos);
}
