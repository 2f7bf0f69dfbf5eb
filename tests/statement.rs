//! Prepared-statement engine: binding discipline, packet-limit discovery,
//! chunked long-data transfer, and blob read-back.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use maria_client::testing::{MockDriver, MockServer};
use maria_client::{BindSlot, ConnectArgs, Connection, Error, ServerDiag};
use proptest::prelude::*;

fn connection(server: &MockServer) -> Connection<MockDriver> {
    Connection::new(server.driver(), || ConnectArgs::new("db.internal", "tester"))
}

/// A payload with enough structure that misassembled chunks are caught.
fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn rebinding_starts_from_zeroed_slots() {
    let server = MockServer::new();
    server.set_max_allowed_packet(1 << 20);
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();

    stmt.prepare("insert into t values (?, ?)").unwrap();
    stmt.bind_params(|slots| {
        slots[0].set_str_param("left-over value");
        slots[1].set_int_param(42i32);
    })
    .unwrap();
    assert_eq!(stmt.bind_len(), 2);

    // A statement with no parameters releases the array outright.
    stmt.prepare("select 1").unwrap();
    stmt.bind_params(|_| {}).unwrap();
    assert_eq!(stmt.bind_len(), 0);
    assert_eq!(stmt.bind_capacity(), 0);

    // Rebinding at the old width must not see the earlier values.
    stmt.prepare("insert into t values (?, ?)").unwrap();
    stmt.bind_params(|slots| {
        for slot in slots.iter() {
            assert_eq!(*slot, BindSlot::default(), "slot carried stale state");
        }
    })
    .unwrap();
}

#[test]
fn capacity_is_a_high_water_mark_while_nonzero() {
    let server = MockServer::new();
    server.set_max_allowed_packet(1 << 20);
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();

    stmt.prepare("insert into t values (?, ?, ?)").unwrap();
    stmt.bind_params(|_| {}).unwrap();
    assert_eq!(stmt.bind_capacity(), 3);

    stmt.prepare("insert into u values (?)").unwrap();
    stmt.bind_params(|_| {}).unwrap();
    assert_eq!(stmt.bind_len(), 1);
    assert_eq!(stmt.bind_capacity(), 3);
}

#[test]
fn oversized_parameter_is_streamed_in_bounded_chunks() {
    let server = MockServer::new();
    server.set_max_allowed_packet(8192); // chunk limit 4096
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();

    let payload = patterned(3 * 4096 + 1);
    stmt.prepare("insert into blobs values (?)").unwrap();
    stmt.bind_params(|slots| slots[0].set_blob_param(&payload))
        .unwrap();

    let chunks = server.long_chunks();
    assert_eq!(chunks.len(), 4);
    assert!(chunks.iter().all(|(i, c)| *i == 0 && c.len() <= 4096));
    let reassembled: Vec<u8> = chunks.into_iter().flat_map(|(_, c)| c).collect();
    assert_eq!(reassembled, payload);

    stmt.execute().unwrap();
    assert_eq!(server.executed_params()[0][0].as_deref(), Some(&payload[..]));
}

#[test]
fn parameter_at_the_limit_is_bound_inline() {
    let server = MockServer::new();
    server.set_max_allowed_packet(8192);
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();

    let payload = patterned(4096);
    stmt.prepare("insert into blobs values (?)").unwrap();
    stmt.bind_params(|slots| slots[0].set_blob_param(&payload))
        .unwrap();
    stmt.execute().unwrap();

    assert!(server.long_chunks().is_empty());
    assert_eq!(server.executed_params()[0][0].as_deref(), Some(&payload[..]));
}

#[test]
fn packet_limit_falls_back_when_the_server_gives_no_answer() {
    let server = MockServer::new();
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();
    assert_eq!(stmt.chunk_limit().unwrap(), 32768);
}

#[test]
fn packet_limit_falls_back_on_null_or_unaligned_answers() {
    for row in [
        vec![vec![None]],                                    // NULL
        vec![vec![Some(1000u64.to_le_bytes().to_vec())]],    // not a multiple of 1024
        vec![vec![Some(0u64.to_le_bytes().to_vec())]],       // zero
    ] {
        let server = MockServer::new();
        server.set_prepared_rows("select @@max_allowed_packet", row);
        let mut conn = connection(&server);
        let stmt = conn.statement().unwrap();
        assert_eq!(stmt.chunk_limit().unwrap(), 32768);
    }
}

#[test]
fn packet_limit_is_half_the_advertised_maximum() {
    let server = MockServer::new();
    server.set_max_allowed_packet(131072);
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();
    assert_eq!(stmt.chunk_limit().unwrap(), 65536);
}

#[test]
fn packet_limit_is_probed_once_and_off_to_the_side() {
    let server = MockServer::new();
    server.set_max_allowed_packet(8192);
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();

    stmt.prepare("insert into blobs values (?)").unwrap();
    stmt.bind_params(|slots| slots[0].set_blob_param(&patterned(5000)))
        .unwrap();
    stmt.bind_params(|slots| slots[0].set_blob_param(&patterned(6000)))
        .unwrap();

    let probes = server
        .executed()
        .iter()
        .filter(|sql| sql.as_str() == "select @@max_allowed_packet")
        .count();
    assert_eq!(probes, 1, "probe must run on a sibling handle, once");
    // The caller's own statement text is still the prepared one.
    stmt.execute().unwrap();
    assert_eq!(server.executed().last().unwrap(), "insert into blobs values (?)");
}

#[test]
fn deadlocked_execute_is_resubmitted_until_it_goes_through() {
    let server = MockServer::new();
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();

    let sql = "update accounts set balance = balance - 1";
    for _ in 0..3 {
        server.push_execute_error(sql, ServerDiag::new(1213, "40001", "Deadlock found"));
    }
    stmt.prepare(sql).unwrap();
    stmt.execute().unwrap();
    // Three deadlocked attempts plus the successful one; only the success
    // reaches the log.
    let runs = server.executed().iter().filter(|s| s.as_str() == sql).count();
    assert_eq!(runs, 1);
}

#[test]
fn execute_unchecked_returns_the_first_nonretryable_code() {
    let server = MockServer::new();
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();

    let sql = "insert into t values (?)";
    server.push_execute_error(sql, ServerDiag::new(1213, "40001", "Deadlock found"));
    server.push_execute_error(sql, ServerDiag::new(1062, "23000", "Duplicate entry"));
    stmt.prepare(sql).unwrap();
    assert_eq!(stmt.execute_unchecked(), 1062);
}

#[test]
fn execute_failure_carries_the_server_diagnostics() {
    let server = MockServer::new();
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();

    let sql = "insert into t values (1)";
    server.push_execute_error(sql, ServerDiag::new(1146, "42S02", "Table 't' doesn't exist"));
    stmt.prepare(sql).unwrap();
    let err = stmt.execute().unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(err.diag().unwrap().code, 1146);
}

#[test]
fn prepare_failure_names_the_statement_text() {
    let server = MockServer::new();
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();

    server.fail_prepare("bogus sql", ServerDiag::new(1064, "42000", "syntax error"));
    let err = stmt.prepare("bogus sql").unwrap_err();
    match err {
        Error::Prepare { sql, diag } => {
            assert_eq!(sql, "bogus sql");
            assert_eq!(diag.code, 1064);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn fetch_fills_bound_slots_and_reports_nulls() {
    let server = MockServer::new();
    let sql = "select a, b from t";
    server.set_prepared_rows(
        sql,
        vec![
            vec![Some(7u32.to_le_bytes().to_vec()), Some(b"seven".to_vec())],
            vec![Some(8u32.to_le_bytes().to_vec()), None],
        ],
    );
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();

    stmt.prepare(sql).unwrap();
    stmt.exec_bind_results(|slots| {
        slots[0].set_int_result::<u32>();
        slots[1].set_str_result(16);
    })
    .unwrap();

    assert!(stmt.next_row().unwrap());
    assert_eq!(stmt.slots()[0].uint_value(), 7);
    assert_eq!(stmt.slots()[1].text_value(), "seven");

    assert!(stmt.next_row().unwrap());
    assert_eq!(stmt.slots()[0].uint_value(), 8);
    assert!(stmt.slots()[1].is_null);
    assert_eq!(stmt.slots()[1].text_value(), "");

    assert!(!stmt.next_row().unwrap());
}

#[test]
fn blob_written_in_chunks_reads_back_byte_identical() {
    let server = MockServer::new();
    server.set_max_allowed_packet(2048); // chunk limit 1024
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();

    let payload = patterned(3 * 1024 + 1);
    stmt.prepare("insert into blobs values (?)").unwrap();
    stmt.bind_params(|slots| slots[0].set_blob_param(&payload))
        .unwrap();
    stmt.execute().unwrap();

    let stored = server.executed_params()[0][0].clone().unwrap();
    assert_eq!(stored, payload);
    server.set_prepared_rows("select data from blobs", vec![vec![Some(stored)]]);

    stmt.prepare("select data from blobs").unwrap();
    stmt.exec_bind_results(|slots| slots[0].set_long_blob_result())
        .unwrap();
    // The zero-length placeholder truncates, which still counts as a row.
    assert!(stmt.next_row().unwrap());
    let blob = stmt.get_long_blob(0).unwrap().unwrap();
    assert_eq!(&blob[..], &payload[..]);
}

#[test]
fn null_blob_reads_back_as_none() {
    let server = MockServer::new();
    let sql = "select data from blobs";
    server.set_prepared_rows(sql, vec![vec![None]]);
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();

    stmt.prepare(sql).unwrap();
    stmt.exec_bind_results(|slots| slots[0].set_long_blob_result())
        .unwrap();
    assert!(stmt.next_row().unwrap());
    assert_eq!(stmt.get_long_blob(0).unwrap(), None);
}

#[test]
fn chunk_send_failure_is_fatal() {
    let server = MockServer::new();
    server.set_max_allowed_packet(2048);
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();

    server.fail_next_long_chunk(ServerDiag::new(2006, "HY000", "server has gone away"));
    stmt.prepare("insert into blobs values (?)").unwrap();
    let err = stmt
        .bind_params(|slots| slots[0].set_blob_param(&patterned(5000)))
        .unwrap_err();
    assert!(matches!(err, Error::LongData { .. }));
}

#[test]
fn query_uint_distinguishes_value_null_and_no_row() {
    let sql = "select count(*) from t";

    let server = MockServer::new();
    server.set_prepared_rows(sql, vec![vec![Some(42u64.to_le_bytes().to_vec())]]);
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();
    stmt.prepare(sql).unwrap();
    let mut value = 0u64;
    assert!(stmt.query_uint(&mut value).unwrap());
    assert_eq!(value, 42);

    let server = MockServer::new();
    server.set_prepared_rows(sql, vec![]);
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();
    stmt.prepare(sql).unwrap();
    let mut value = 99u64;
    assert!(!stmt.query_uint(&mut value).unwrap());
    assert_eq!(value, 99, "destination untouched without a row");

    let server = MockServer::new();
    server.set_prepared_rows(sql, vec![vec![None]]);
    let mut conn = connection(&server);
    let stmt = conn.statement().unwrap();
    stmt.prepare(sql).unwrap();
    let mut value = 99u64;
    assert!(!stmt.query_uint(&mut value).unwrap());
    assert_eq!(value, 99);
}

proptest! {
    /// Any payload reassembles exactly from its out-of-band chunks, with
    /// ceil(len / limit) sends, none larger than the limit.
    #[test]
    fn chunking_reassembles_any_payload(payload in proptest::collection::vec(any::<u8>(), 0..20_000)) {
        const LIMIT: usize = 4096;
        let server = MockServer::new();
        server.set_max_allowed_packet(2 * LIMIT as u64);
        let mut conn = connection(&server);
        let stmt = conn.statement().unwrap();

        stmt.prepare("insert into blobs values (?)").unwrap();
        stmt.bind_params(|slots| slots[0].set_blob_param(&payload)).unwrap();
        stmt.execute().unwrap();

        let chunks = server.long_chunks();
        if payload.len() > LIMIT {
            prop_assert_eq!(chunks.len(), payload.len().div_ceil(LIMIT));
            prop_assert!(chunks.iter().all(|(_, c)| !c.is_empty() && c.len() <= LIMIT));
            let reassembled: Vec<u8> = chunks.into_iter().flat_map(|(_, c)| c).collect();
            prop_assert_eq!(&reassembled, &payload);
        } else {
            prop_assert!(chunks.is_empty());
        }
        let executed = server.executed_params();
        prop_assert_eq!(executed[0][0].as_deref(), Some(&payload[..]));
    }
}
