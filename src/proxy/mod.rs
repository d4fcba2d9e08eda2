//! Stdio Proxy: bridges a client's stdio with a spawned tool server's
//! stdio, journaling every request/response pair and applying chaos.

mod correlation;
pub mod framing;

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::bus::FanOutBus;
use crate::chaos::{ChaosApplied, ChaosConfig, ChaosEngine};
use crate::errors::{TraceError, TraceResult};
use crate::journal::{EventKind, JournalStore, NewEvent, RunCounters, RunKind, RunStatus};
use crate::utils::subprocess::spawn_target_command;

use correlation::{CorrelationTable, Pending};
use framing::{parse_line, stringify_id, ParsedLine, TOOLS_CALL_METHOD};

pub struct ProxyHandle {
    pub run_id: Uuid,
    task: JoinHandle<TraceResult<()>>,
}

impl ProxyHandle {
    pub async fn join(self) -> TraceResult<()> {
        self.task
            .await
            .map_err(|e| TraceError::Internal(anyhow::anyhow!(e)))?
    }
}

/// Spawns the target tool server and bridges it with `client_reader` /
/// `client_writer`. Returns once the run is recorded as `pending` and the
/// background task has been spawned; call `.join()` on the handle to wait
/// for the run to end.
pub async fn start<R, W>(
    target_command: &str,
    chaos_config: Option<ChaosConfig>,
    journal: Arc<JournalStore>,
    bus: Arc<FanOutBus>,
    agent_id: Option<Uuid>,
    client_reader: R,
    client_writer: W,
) -> TraceResult<ProxyHandle>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let chaos_snapshot = chaos_config.as_ref().map(|c| serde_json::to_value(c).unwrap_or(Value::Null));
    let run = journal
        .create_run(target_command, chaos_snapshot, agent_id, RunKind::Proxy)
        .await?;
    let run_id = run.id;

    let child = match spawn_target_command(target_command) {
        Ok(child) => child,
        Err(e) => {
            journal
                .update_run_status(run_id, RunStatus::Failed, Some(RunCounters::default()))
                .await?;
            publish_status(&bus, run_id, agent_id, "failed");
            return Err(e);
        }
    };

    journal.update_run_status(run_id, RunStatus::Running, None).await?;
    publish_status(&bus, run_id, agent_id, "running");

    let chaos = chaos_config.map(|c| Arc::new(ChaosEngine::new(c)));

    let span = info_span!("run", %run_id);
    let task = tokio::spawn(
        run_loop(
            run_id,
            agent_id,
            child,
            client_reader,
            client_writer,
            journal,
            bus,
            chaos,
        )
        .instrument(span),
    );

    Ok(ProxyHandle { run_id, task })
}

fn publish_status(bus: &FanOutBus, run_id: Uuid, agent_id: Option<Uuid>, status: &str) {
    let payload = json!({ "run_id": run_id, "status": status });
    bus.publish(&crate::bus::run_topic(run_id), payload.clone());
    if let Some(agent_id) = agent_id {
        bus.publish(&crate::bus::agent_topic(agent_id), payload.clone());
    }
    bus.publish(crate::bus::GLOBAL_TOPIC, payload);
}

async fn run_loop<R, W>(
    run_id: Uuid,
    agent_id: Option<Uuid>,
    mut child: tokio::process::Child,
    client_reader: R,
    mut client_writer: W,
    journal: Arc<JournalStore>,
    bus: Arc<FanOutBus>,
    chaos: Option<Arc<ChaosEngine>>,
) -> TraceResult<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut server_stdin = child.stdin.take().expect("piped stdin");
    let server_stdout = child.stdout.take().expect("piped stdout");

    let (client_tx, mut client_rx) = mpsc::channel::<String>(256);
    let (server_tx, mut server_rx) = mpsc::channel::<String>(256);

    spawn_line_reader(client_reader, client_tx);
    spawn_line_reader(server_stdout, server_tx);

    journal
        .insert_event(run_id, NewEvent::new(EventKind::SessionStart))
        .await?;

    let mut correlation = CorrelationTable::new();
    let mut total_calls: i64 = 0;
    let mut total_errors: i64 = 0;
    let mut client_done = false;
    let mut server_done = false;
    let mut failed = false;

    loop {
        if client_done && server_done {
            break;
        }
        tokio::select! {
            line = client_rx.recv(), if !client_done => {
                match line {
                    Some(line) => {
                        if let Err(e) = handle_client_line(
                            &line,
                            run_id,
                            &mut server_stdin,
                            &journal,
                            &bus,
                            agent_id,
                            &mut correlation,
                            chaos.as_deref(),
                            &mut total_calls,
                        ).await {
                            warn!("client-line handling failed: {e}");
                            failed = true;
                            break;
                        }
                    }
                    None => {
                        client_done = true;
                        let _ = child.start_kill();
                    }
                }
            }
            line = server_rx.recv(), if !server_done => {
                match line {
                    Some(line) => {
                        if let Err(e) = handle_server_line(
                            &line,
                            run_id,
                            &mut client_writer,
                            &journal,
                            &bus,
                            agent_id,
                            &mut correlation,
                            &mut total_errors,
                        ).await {
                            warn!("server-line handling failed: {e}");
                            failed = true;
                            break;
                        }
                    }
                    None => server_done = true,
                }
            }
        }
        if failed {
            break;
        }
    }

    let _ = child.start_kill();
    let _ = child.wait().await;

    let counters = RunCounters {
        total_calls,
        total_errors,
        ..Default::default()
    };
    let final_status = if failed { RunStatus::Failed } else { RunStatus::Completed };
    journal
        .insert_event(
            run_id,
            NewEvent {
                result: Some(json!({ "total_calls": total_calls, "total_errors": total_errors })),
                ..NewEvent::new(EventKind::SessionEnd)
            },
        )
        .await?;
    journal
        .update_run_status(run_id, final_status, Some(counters))
        .await?;
    publish_status(&bus, run_id, agent_id, final_status.as_str());

    if failed {
        return Err(TraceError::PeerClosed);
    }
    Ok(())
}

fn spawn_line_reader<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    });
}

#[allow(clippy::too_many_arguments)]
async fn handle_client_line<W>(
    line: &str,
    run_id: Uuid,
    server_stdin: &mut W,
    journal: &JournalStore,
    bus: &FanOutBus,
    agent_id: Option<Uuid>,
    correlation: &mut CorrelationTable,
    chaos: Option<&ChaosEngine>,
    total_calls: &mut i64,
) -> TraceResult<()>
where
    W: AsyncWrite + Unpin,
{
    let Some(parsed) = parse_line(line) else {
        return forward_line(server_stdin, line).await;
    };

    match parsed {
        ParsedLine::Request { id, method, params } => {
            if method == TOOLS_CALL_METHOD {
                *total_calls += 1;
            }
            let id_key = stringify_id(&id);
            let tool = if method == TOOLS_CALL_METHOD {
                params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            } else {
                None
            };

            let mut chaos_applied: Option<ChaosApplied> = None;
            if method == TOOLS_CALL_METHOD {
                if let (Some(engine), Some(tool_name)) = (chaos, tool.as_deref()) {
                    let applied = engine.apply(tool_name);
                    if let Some(delay_ms) = applied.delay_ms {
                        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    }
                    chaos_applied = Some(applied);
                }
            }

            let event = NewEvent {
                method: Some(method.clone()),
                params: params.clone(),
                correlation_id: Some(id_key.clone()),
                ..NewEvent::new(EventKind::RpcRequest)
            };
            let event_id = journal.insert_event(run_id, event.clone()).await?;
            publish_event(bus, run_id, agent_id, event_id, &event);

            if method == TOOLS_CALL_METHOD {
                let tool_event = NewEvent {
                    tool: tool.clone(),
                    params: params
                        .as_ref()
                        .and_then(|p| p.get("arguments"))
                        .cloned(),
                    correlation_id: Some(id_key.clone()),
                    ..NewEvent::new(EventKind::ToolCall)
                };
                let tool_event_id = journal.insert_event(run_id, tool_event.clone()).await?;
                publish_event(bus, run_id, agent_id, tool_event_id, &tool_event);
            }

            correlation.insert(
                id_key,
                Pending {
                    start: Instant::now(),
                    tool,
                    chaos_applied,
                },
            );

            forward_line(server_stdin, line).await
        }
        ParsedLine::Notification { .. } => forward_line(server_stdin, line).await,
        ParsedLine::Response { .. } => forward_line(server_stdin, line).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_server_line<W>(
    line: &str,
    run_id: Uuid,
    client_writer: &mut W,
    journal: &JournalStore,
    bus: &FanOutBus,
    agent_id: Option<Uuid>,
    correlation: &mut CorrelationTable,
    total_errors: &mut i64,
) -> TraceResult<()>
where
    W: AsyncWrite + Unpin,
{
    let Some(parsed) = parse_line(line) else {
        return forward_line(client_writer, line).await;
    };

    match parsed {
        ParsedLine::Response { id, result, error } => {
            let id_key = id.as_ref().map(stringify_id);
            let pending = id_key.as_ref().and_then(|k| correlation.take(k));

            let (latency_ms, tool, chaos_applied) = match &pending {
                Some(p) => (
                    Some(p.start.elapsed().as_millis() as i64),
                    p.tool.clone(),
                    p.chaos_applied,
                ),
                None => (None, None, None),
            };

            let original_result = result.clone();
            let original_error = error.clone();
            let (result, error) = apply_response_chaos(result, error, chaos_applied);
            let payload_changed = result != original_result || error != original_error;

            if error.is_some() {
                *total_errors += 1;
            }

            let event = NewEvent {
                result: result.clone(),
                error: error.clone(),
                latency_ms,
                chaos_applied: chaos_applied.and_then(|c| serde_json::to_value(c).ok()),
                correlation_id: id_key.clone(),
                ..NewEvent::new(EventKind::RpcResponse)
            };
            let event_id = journal.insert_event(run_id, event.clone()).await?;
            publish_event(bus, run_id, agent_id, event_id, &event);

            if let Some(tool) = tool {
                let tool_event = NewEvent {
                    tool: Some(tool),
                    result: result.clone(),
                    error: error.clone(),
                    latency_ms,
                    correlation_id: id_key,
                    ..NewEvent::new(EventKind::ToolResult)
                };
                let tool_event_id = journal.insert_event(run_id, tool_event.clone()).await?;
                publish_event(bus, run_id, agent_id, tool_event_id, &tool_event);
            }

            if payload_changed {
                let outgoing = rebuild_response_line(line, &result, &error)?;
                forward_line(client_writer, &outgoing).await
            } else {
                forward_line(client_writer, line).await
            }
        }
        ParsedLine::Request { .. } | ParsedLine::Notification { .. } => {
            forward_line(client_writer, line).await
        }
    }
}

/// Applies decided error-injection/corruption to a response payload.
/// Error injection substitutes the result with a synthesized error;
/// corruption wraps the original payload in a corruption-marker envelope.
fn apply_response_chaos(
    result: Option<Value>,
    error: Option<Value>,
    chaos_applied: Option<ChaosApplied>,
) -> (Option<Value>, Option<Value>) {
    let Some(applied) = chaos_applied else {
        return (result, error);
    };

    if applied.error_injected {
        return (
            None,
            Some(json!({ "code": -32000, "message": "chaos: injected failure" })),
        );
    }
    if applied.corrupted {
        if let Some(result) = result {
            let original_keys: Vec<String> = result
                .as_object()
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default();
            let mut corrupted = result.clone();
            if let Some(obj) = corrupted.as_object_mut() {
                obj.insert("_corrupted".to_string(), json!(true));
                obj.insert("_originalKeys".to_string(), json!(original_keys));
            }
            return (Some(corrupted), error);
        }
    }
    (result, error)
}

/// Reconstructs the outgoing response line after chaos substituted the
/// result/error. Only called when the payload actually changed; an
/// untouched response is forwarded as the original line, byte-for-byte.
fn rebuild_response_line(
    original_line: &str,
    result: &Option<Value>,
    error: &Option<Value>,
) -> TraceResult<String> {
    let mut value: Value = serde_json::from_str(original_line)
        .map_err(|e| TraceError::ParseError(e.to_string()))?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("result");
        obj.remove("error");
        if let Some(result) = result {
            obj.insert("result".to_string(), result.clone());
        }
        if let Some(error) = error {
            obj.insert("error".to_string(), error.clone());
        }
    }
    serde_json::to_string(&value).map_err(|e| TraceError::ParseError(e.to_string()))
}

fn publish_event(bus: &FanOutBus, run_id: Uuid, agent_id: Option<Uuid>, event_id: i64, event: &NewEvent) {
    let payload = json!({
        "event_id": event_id,
        "run_id": run_id,
        "kind": event.kind.as_str(),
        "method": event.method,
        "tool": event.tool,
        "latency_ms": event.latency_ms,
    });
    bus.publish(&crate::bus::run_topic(run_id), payload.clone());
    if let Some(agent_id) = agent_id {
        bus.publish(&crate::bus::agent_topic(agent_id), payload.clone());
    }
    bus.publish(crate::bus::GLOBAL_TOPIC, payload);
    info!(kind = event.kind.as_str(), "journaled event {}", event_id);
}

async fn forward_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> TraceResult<()> {
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| TraceError::Internal(e.into()))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| TraceError::Internal(e.into()))?;
    writer.flush().await.map_err(|e| TraceError::Internal(e.into()))
}
