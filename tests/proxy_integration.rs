mod common;

use std::sync::Arc;

use mcptrace::bus::FanOutBus;
use mcptrace::journal::{EventKind, JournalStore, RunFilters};
use mcptrace::proxy;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Duration};

/// Scenario 1 from the testable-properties list: a client round-trips a
/// `tools/call` through a real child-process tool server, and the journal
/// ends up with the full session_start/rpc_request/tool_call/rpc_response/
/// tool_result/session_end sequence, latency included.
#[tokio::test]
async fn happy_path_round_trip_against_a_real_tool_server() {
    let (_fixture_dir, target_command) = common::fixture_server();

    let journal = Arc::new(JournalStore::open_in_memory().unwrap());
    let bus = Arc::new(FanOutBus::new());

    let (mut client_side, proxy_reader) = duplex(8192);
    let (proxy_writer, mut upstream_side) = duplex(8192);

    let handle = proxy::start(
        &target_command,
        None,
        journal.clone(),
        bus,
        None,
        proxy_reader,
        proxy_writer,
    )
    .await
    .expect("proxy should start against a real fixture server");
    let run_id = handle.run_id;

    client_side
        .write_all(br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"add","arguments":{"a":3,"b":4}}}"#)
        .await
        .unwrap();
    client_side.write_all(b"\n").await.unwrap();

    let mut buf = [0u8; 1024];
    let n = timeout(Duration::from_secs(5), upstream_side.read(&mut buf))
        .await
        .expect("response should arrive before the timeout")
        .unwrap();
    let response: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
    assert_eq!(response["result"]["sum"], 7);

    drop(client_side);
    timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("proxy should end the run after client eof")
        .unwrap();

    let events = journal.get_events(run_id, None, None).await.unwrap();
    let kinds: Vec<&str> = events.iter().map(|e| e.kind.as_str()).collect();
    assert_eq!(
        kinds,
        vec![
            "session_start",
            "rpc_request",
            "tool_call",
            "rpc_response",
            "tool_result",
            "session_end",
        ]
    );

    let tool_result = events
        .iter()
        .find(|e| e.kind == EventKind::ToolResult)
        .unwrap();
    assert!(tool_result.latency_ms.unwrap_or(-1) >= 0);

    let runs = journal
        .list_runs(RunFilters::default())
        .await
        .unwrap();
    let run = runs.iter().find(|r| r.id == run_id).unwrap();
    assert_eq!(run.counters.total_calls, 1);
    assert_eq!(run.counters.total_errors, 0);
}

/// Spec scenario 1, literal form: a `tools/list` round-trip with no
/// `tools/call` must not count as a tool call. `total_calls` only counts
/// `tools/call` requests.
#[tokio::test]
async fn tools_list_round_trip_does_not_count_as_a_tool_call() {
    let (_fixture_dir, target_command) = common::fixture_server();

    let journal = Arc::new(JournalStore::open_in_memory().unwrap());
    let bus = Arc::new(FanOutBus::new());

    let (mut client_side, proxy_reader) = duplex(8192);
    let (proxy_writer, mut upstream_side) = duplex(8192);

    let handle = proxy::start(
        &target_command,
        None,
        journal.clone(),
        bus,
        None,
        proxy_reader,
        proxy_writer,
    )
    .await
    .expect("proxy should start against a real fixture server");
    let run_id = handle.run_id;

    client_side
        .write_all(br#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#)
        .await
        .unwrap();
    client_side.write_all(b"\n").await.unwrap();

    let mut buf = [0u8; 1024];
    let n = timeout(Duration::from_secs(5), upstream_side.read(&mut buf))
        .await
        .expect("response should arrive before the timeout")
        .unwrap();
    let response: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
    assert!(response["result"]["tools"].is_array());

    drop(client_side);
    timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("proxy should end the run after client eof")
        .unwrap();

    let runs = journal
        .list_runs(RunFilters::default())
        .await
        .unwrap();
    let run = runs.iter().find(|r| r.id == run_id).unwrap();
    assert_eq!(run.counters.total_calls, 0);
    assert_eq!(run.counters.total_errors, 0);
}
