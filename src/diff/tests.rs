use super::*;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::journal::EventKind;

fn tool_call(tool: &str, correlation_id: &str, arguments: Value) -> TraceEvent {
    TraceEvent {
        id: 0,
        run_id: Uuid::nil(),
        kind: EventKind::ToolCall,
        ts: Utc::now(),
        method: None,
        tool: Some(tool.to_string()),
        params: Some(arguments),
        result: None,
        error: None,
        latency_ms: None,
        chaos_applied: None,
        correlation_id: Some(correlation_id.to_string()),
        outcome: None,
    }
}

fn tool_result(correlation_id: &str, latency_ms: i64) -> TraceEvent {
    TraceEvent {
        id: 0,
        run_id: Uuid::nil(),
        kind: EventKind::ToolResult,
        ts: Utc::now(),
        method: None,
        tool: None,
        params: None,
        result: None,
        error: None,
        latency_ms: Some(latency_ms),
        chaos_applied: None,
        correlation_id: Some(correlation_id.to_string()),
        outcome: None,
    }
}

#[test]
fn empty_inputs_yield_an_empty_report() {
    let report = diff(&[], &[]);
    assert_eq!(report.baseline_call_count, 0);
    assert!(report.added.is_empty());
    assert!(report.removed.is_empty());
    assert!(report.changed.is_empty());
    assert!(report.latency_changes.is_empty());
}

#[test]
fn tool_present_only_in_current_is_added() {
    let a = vec![];
    let b = vec![tool_call("new_tool", "1", json!({}))];
    let report = diff(&a, &b);
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.added[0].tool, "new_tool");
}

#[test]
fn tool_present_only_in_baseline_is_removed() {
    let a = vec![tool_call("old_tool", "1", json!({}))];
    let b = vec![];
    let report = diff(&a, &b);
    assert_eq!(report.removed.len(), 1);
    assert_eq!(report.removed[0].tool, "old_tool");
}

#[test]
fn differing_arguments_for_the_same_tool_are_changed() {
    let a = vec![tool_call("search", "1", json!({"query": "cats"}))];
    let b = vec![tool_call("search", "1", json!({"query": "dogs"}))];
    let report = diff(&a, &b);
    assert_eq!(report.changed.len(), 1);
    assert_eq!(report.changed[0].tool, "search");
}

#[test]
fn argument_key_order_does_not_count_as_a_change() {
    let a = vec![tool_call("search", "1", json!({"a": 1, "b": 2}))];
    let b = vec![tool_call("search", "1", json!({"b": 2, "a": 1}))];
    let report = diff(&a, &b);
    assert!(report.changed.is_empty());
}

#[test]
fn a_large_latency_increase_is_reported() {
    let a = vec![
        tool_call("search", "1", json!({})),
        tool_result("1", 100),
    ];
    let b = vec![
        tool_call("search", "1", json!({})),
        tool_result("1", 300),
    ];
    let report = diff(&a, &b);
    assert_eq!(report.latency_changes.len(), 1);
    assert!(report.latency_changes[0].percent_change > 100.0);
}

#[test]
fn a_small_latency_change_is_not_reported() {
    let a = vec![tool_call("search", "1", json!({})), tool_result("1", 100)];
    let b = vec![tool_call("search", "1", json!({})), tool_result("1", 105)];
    let report = diff(&a, &b);
    assert!(report.latency_changes.is_empty());
}

#[test]
fn surplus_calls_on_the_current_side_become_added() {
    let a = vec![tool_call("search", "1", json!({}))];
    let b = vec![
        tool_call("search", "1", json!({})),
        tool_call("search", "2", json!({})),
    ];
    let report = diff(&a, &b);
    assert_eq!(report.added.len(), 1);
    assert!(report.changed.is_empty());
}
