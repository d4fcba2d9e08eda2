//! Diff Engine: compares two runs' tool-call traffic by tool name,
//! argument payload, and latency shift. Never fails — empty inputs yield
//! empty output lists.

use serde_json::{Map, Value};

use crate::journal::TraceEvent;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolCall {
    pub tool: String,
    pub arguments: Value,
    pub latency_ms: Option<i64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ChangedCall {
    pub tool: String,
    pub baseline_arguments: Value,
    pub current_arguments: Value,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LatencyChange {
    pub tool: String,
    pub baseline_mean_ms: f64,
    pub current_mean_ms: f64,
    pub percent_change: f64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DiffReport {
    pub baseline_call_count: usize,
    pub current_call_count: usize,
    pub added: Vec<ToolCall>,
    pub removed: Vec<ToolCall>,
    pub changed: Vec<ChangedCall>,
    pub latency_changes: Vec<LatencyChange>,
}

/// Threshold beyond which a latency shift is reported, per the
/// ±20% relative-change rule.
const LATENCY_CHANGE_THRESHOLD: f64 = 0.20;

/// Extracts `(tool, arguments, latency_ms)` triples from a run's events,
/// pairing each `tool_call` with the `tool_result` that shares its
/// correlation id (latency is carried on the result event).
fn extract_tool_calls(events: &[TraceEvent]) -> Vec<ToolCall> {
    use crate::journal::EventKind;
    use std::collections::HashMap;

    let mut latencies: HashMap<&str, i64> = HashMap::new();
    for event in events {
        if event.kind == EventKind::ToolResult {
            if let (Some(id), Some(latency)) = (event.correlation_id.as_deref(), event.latency_ms) {
                latencies.insert(id, latency);
            }
        }
    }

    events
        .iter()
        .filter(|e| e.kind == EventKind::ToolCall)
        .filter_map(|e| {
            let tool = e.tool.clone()?;
            let latency_ms = e
                .correlation_id
                .as_deref()
                .and_then(|id| latencies.get(id))
                .copied();
            Some(ToolCall {
                tool,
                arguments: e.params.clone().unwrap_or(Value::Null),
                latency_ms,
            })
        })
        .collect()
}

/// Recursively sorts object keys so two structurally-identical payloads
/// always serialize to the same string regardless of field order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

fn mean_latency(calls: &[&ToolCall]) -> Option<f64> {
    let latencies: Vec<f64> = calls.iter().filter_map(|c| c.latency_ms).map(|l| l as f64).collect();
    if latencies.is_empty() {
        return None;
    }
    Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
}

/// Compares baseline run `a`'s events against current run `b`'s events.
pub fn diff(a: &[TraceEvent], b: &[TraceEvent]) -> DiffReport {
    let baseline = extract_tool_calls(a);
    let current = extract_tool_calls(b);

    let mut report = DiffReport {
        baseline_call_count: baseline.len(),
        current_call_count: current.len(),
        ..Default::default()
    };

    let mut tool_names: Vec<String> = baseline
        .iter()
        .chain(current.iter())
        .map(|c| c.tool.clone())
        .collect();
    tool_names.sort();
    tool_names.dedup();

    for tool in &tool_names {
        let baseline_calls: Vec<&ToolCall> = baseline.iter().filter(|c| &c.tool == tool).collect();
        let current_calls: Vec<&ToolCall> = current.iter().filter(|c| &c.tool == tool).collect();

        if baseline_calls.is_empty() {
            report.added.extend(current_calls.iter().map(|c| (*c).clone()));
            continue;
        }
        if current_calls.is_empty() {
            report.removed.extend(baseline_calls.iter().map(|c| (*c).clone()));
            continue;
        }

        let paired = baseline_calls.len().min(current_calls.len());
        for i in 0..paired {
            let base = baseline_calls[i];
            let cur = current_calls[i];
            if canonical_json(&base.arguments) != canonical_json(&cur.arguments) {
                report.changed.push(ChangedCall {
                    tool: tool.clone(),
                    baseline_arguments: base.arguments.clone(),
                    current_arguments: cur.arguments.clone(),
                });
            }
        }
        report
            .added
            .extend(current_calls[paired..].iter().map(|c| (*c).clone()));
        report
            .removed
            .extend(baseline_calls[paired..].iter().map(|c| (*c).clone()));

        if let (Some(base_mean), Some(cur_mean)) =
            (mean_latency(&baseline_calls), mean_latency(&current_calls))
        {
            if base_mean > 0.0 {
                let relative_change = (cur_mean - base_mean) / base_mean;
                if relative_change.abs() > LATENCY_CHANGE_THRESHOLD {
                    report.latency_changes.push(LatencyChange {
                        tool: tool.clone(),
                        baseline_mean_ms: base_mean,
                        current_mean_ms: cur_mean,
                        percent_change: relative_change * 100.0,
                    });
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests;
