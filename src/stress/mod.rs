//! Stress Runner: drives a one-shot tool-server subprocess through its
//! initialization handshake, enumerates its tools, and probes each one
//! with the Mutation Generator's sequence, classifying every outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use uuid::Uuid;

use crate::bus::FanOutBus;
use crate::classify::{classify, Outcome};
use crate::errors::{TraceError, TraceResult};
use crate::journal::{EventKind, JournalStore, NewEvent, RunCounters, RunKind, RunStatus};
use crate::mutate;
use crate::proxy::framing::{parse_line, stringify_id, ParsedLine};
use crate::utils::subprocess::spawn_target_command;

const PROTOCOL_VERSION: &str = "2024-11-05";
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 10_000;
const POST_INITIALIZED_DELAY_MS: u64 = 100;

pub struct StressRunner {
    journal: Arc<JournalStore>,
    bus: Arc<FanOutBus>,
    probe_timeout: Duration,
}

impl StressRunner {
    pub fn new(journal: Arc<JournalStore>, bus: Arc<FanOutBus>) -> Self {
        Self {
            journal,
            bus,
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Runs the full sweep to completion and returns the finished run's id.
    pub async fn run(&self, target_command: &str, agent_id: Option<Uuid>) -> TraceResult<Uuid> {
        let run = self
            .journal
            .create_run(target_command, None, agent_id, RunKind::Stress)
            .await?;
        let run_id = run.id;

        let mut child = match spawn_target_command(target_command) {
            Ok(child) => child,
            Err(e) => {
                self.journal
                    .update_run_status(run_id, RunStatus::Failed, Some(RunCounters::default()))
                    .await?;
                self.publish_status(run_id, agent_id, "failed");
                return Err(e);
            }
        };
        self.journal
            .update_run_status(run_id, RunStatus::Running, None)
            .await?;
        self.publish_status(run_id, agent_id, "running");
        self.journal
            .insert_event(run_id, NewEvent::new(EventKind::SessionStart))
            .await?;

        let outcome = self.drive_sweep(run_id, agent_id, &mut child).await;

        let _ = child.start_kill();
        let _ = child.wait().await;

        match outcome {
            Ok(counters) => {
                self.journal
                    .insert_event(
                        run_id,
                        NewEvent {
                            result: Some(json!({
                                "passed": counters.stress_passed,
                                "graceful": counters.stress_graceful,
                                "crashed": counters.stress_crashed,
                                "score": counters.stress_score,
                            })),
                            ..NewEvent::new(EventKind::SessionEnd)
                        },
                    )
                    .await?;
                self.journal
                    .update_run_status(run_id, RunStatus::Completed, Some(counters))
                    .await?;
                self.publish_status(run_id, agent_id, "completed");
            }
            Err(e) => {
                self.journal
                    .update_run_status(run_id, RunStatus::Failed, Some(RunCounters::default()))
                    .await?;
                self.publish_status(run_id, agent_id, "failed");
                if e.is_fatal_to_run() {
                    return Err(e);
                }
            }
        }

        Ok(run_id)
    }

    async fn drive_sweep(
        &self,
        run_id: Uuid,
        agent_id: Option<Uuid>,
        child: &mut tokio::process::Child,
    ) -> TraceResult<RunCounters> {
        let mut stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let mut lines = BufReader::new(stdout).lines();
        let mut next_id: i64 = 1;

        send_request(
            &mut stdin,
            next_id,
            "initialize",
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "mcptrace", "version": env!("CARGO_PKG_VERSION") },
            })),
        )
        .await?;
        read_response_for(&mut lines, &stringify_id(&json!(next_id)), self.probe_timeout).await?;
        next_id += 1;

        send_notification(&mut stdin, "notifications/initialized").await?;
        tokio::time::sleep(Duration::from_millis(POST_INITIALIZED_DELAY_MS)).await;

        send_request(&mut stdin, next_id, "tools/list", None).await?;
        let list_response =
            read_response_for(&mut lines, &stringify_id(&json!(next_id)), self.probe_timeout).await?;
        next_id += 1;

        let tools = list_response
            .result
            .as_ref()
            .and_then(|r| r.get("tools"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut counters = RunCounters::default();
        let mut total_probes: i64 = 0;

        for tool in &tools {
            let Some(tool_name) = tool.get("name").and_then(Value::as_str) else {
                continue;
            };
            let Some(schema) = tool.get("inputSchema") else {
                continue;
            };

            for mutation in mutate::generate(schema) {
                let id = next_id;
                next_id += 1;

                let params = json!({ "name": tool_name, "arguments": mutation.input });
                send_request(&mut stdin, id, "tools/call", Some(params.clone())).await?;

                let start = Instant::now();
                let probe = read_response_for(&mut lines, &stringify_id(&json!(id)), self.probe_timeout).await;
                let latency_ms = start.elapsed().as_millis() as i64;

                let (timed_out, error_message, result, error_value) = match probe {
                    Ok(response) => {
                        let error_message = response.error.as_ref().map(|e| {
                            e.get("message")
                                .and_then(Value::as_str)
                                .map(str::to_string)
                                .unwrap_or_else(|| e.to_string())
                        });
                        (false, error_message, response.result, response.error)
                    }
                    Err(TraceError::ProbeTimeout(_)) => (true, None, None, None),
                    Err(e) => (false, Some(e.to_string()), None, Some(json!({ "message": e.to_string() }))),
                };

                let outcome = classify(timed_out, error_message.as_deref());
                match outcome {
                    Outcome::Pass => counters.stress_passed += 1,
                    Outcome::GracefulFail => counters.stress_graceful += 1,
                    Outcome::CrashOrHang => counters.stress_crashed += 1,
                }
                total_probes += 1;

                let event_id = self
                    .journal
                    .insert_event(
                        run_id,
                        NewEvent {
                            tool: Some(tool_name.to_string()),
                            params: Some(params),
                            result,
                            error: error_value,
                            latency_ms: Some(latency_ms),
                            correlation_id: Some(id.to_string()),
                            outcome: Some(outcome.as_str().to_string()),
                            ..NewEvent::new(EventKind::StressMutation)
                        },
                    )
                    .await?;
                self.publish_probe(run_id, agent_id, event_id, tool_name, &mutation.label, outcome);
            }
        }

        counters.stress_score = if total_probes > 0 {
            Some(((100.0 * (counters.stress_passed + counters.stress_graceful) as f64
                / total_probes as f64)
                .round()) as i64)
        } else {
            Some(0)
        };

        Ok(counters)
    }

    fn publish_status(&self, run_id: Uuid, agent_id: Option<Uuid>, status: &str) {
        let payload = json!({ "run_id": run_id, "status": status });
        self.bus.publish(&crate::bus::run_topic(run_id), payload.clone());
        if let Some(agent_id) = agent_id {
            self.bus.publish(&crate::bus::agent_topic(agent_id), payload.clone());
        }
        self.bus.publish(crate::bus::GLOBAL_TOPIC, payload);
    }

    fn publish_probe(
        &self,
        run_id: Uuid,
        agent_id: Option<Uuid>,
        event_id: i64,
        tool: &str,
        label: &str,
        outcome: Outcome,
    ) {
        let payload = json!({
            "event_id": event_id,
            "run_id": run_id,
            "tool": tool,
            "mutation": label,
            "outcome": outcome.as_str(),
        });
        self.bus.publish(&crate::bus::run_topic(run_id), payload.clone());
        if let Some(agent_id) = agent_id {
            self.bus.publish(&crate::bus::agent_topic(agent_id), payload.clone());
        }
        self.bus.publish(crate::bus::GLOBAL_TOPIC, payload);
    }
}

struct ParsedResponse {
    result: Option<Value>,
    error: Option<Value>,
}

async fn send_request<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    id: i64,
    method: &str,
    params: Option<Value>,
) -> TraceResult<()> {
    let mut line = json!({ "jsonrpc": "2.0", "id": id, "method": method });
    if let Some(params) = params {
        line["params"] = params;
    }
    write_line(writer, &line).await
}

async fn send_notification<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    method: &str,
) -> TraceResult<()> {
    let line = json!({ "jsonrpc": "2.0", "method": method });
    write_line(writer, &line).await
}

async fn write_line<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, value: &Value) -> TraceResult<()> {
    let text = serde_json::to_string(value).map_err(|e| TraceError::Internal(e.into()))?;
    writer
        .write_all(text.as_bytes())
        .await
        .map_err(|e| TraceError::Internal(e.into()))?;
    writer.write_all(b"\n").await.map_err(|e| TraceError::Internal(e.into()))?;
    writer.flush().await.map_err(|e| TraceError::Internal(e.into()))
}

/// Reads lines from the server until one is a `Response` whose id matches
/// `expected_id`. Lines belonging to other ids or unparseable lines are
/// skipped, since the init/probe sequence is strictly sequential.
async fn read_response_for<R>(
    lines: &mut tokio::io::Lines<BufReader<R>>,
    expected_id: &str,
    deadline: Duration,
) -> TraceResult<ParsedResponse>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let result = timeout(deadline, async {
        loop {
            let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| TraceError::Internal(e.into()))?
            else {
                return Err(TraceError::PeerClosed);
            };
            let Some(ParsedLine::Response { id: Some(id), result, error }) = parse_line(&line) else {
                continue;
            };
            if stringify_id(&id) == expected_id {
                return Ok(ParsedResponse { result, error });
            }
        }
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(TraceError::ProbeTimeout(deadline.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests;
