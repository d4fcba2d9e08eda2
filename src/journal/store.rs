use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::{TraceError, TraceResult};

use super::models::*;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    target_command TEXT NOT NULL,
    chaos_config TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(project_id, name)
);
CREATE INDEX IF NOT EXISTS idx_agents_project_id ON agents(project_id);

CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    agent_id TEXT REFERENCES agents(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    target_command TEXT NOT NULL,
    chaos_snapshot TEXT,
    status TEXT NOT NULL,
    started_at TEXT,
    ended_at TEXT,
    total_calls INTEGER NOT NULL DEFAULT 0,
    total_errors INTEGER NOT NULL DEFAULT 0,
    stress_passed INTEGER NOT NULL DEFAULT 0,
    stress_graceful INTEGER NOT NULL DEFAULT 0,
    stress_crashed INTEGER NOT NULL DEFAULT 0,
    stress_score INTEGER,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_runs_agent_id ON runs(agent_id);
CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
CREATE INDEX IF NOT EXISTS idx_runs_kind ON runs(kind);
CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs(created_at);

CREATE TABLE IF NOT EXISTS trace_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    ts TEXT NOT NULL,
    method TEXT,
    tool_name TEXT,
    params TEXT,
    result TEXT,
    error TEXT,
    latency_ms INTEGER,
    chaos_applied TEXT,
    correlation_id TEXT,
    outcome TEXT
);
CREATE INDEX IF NOT EXISTS idx_trace_events_run_id ON trace_events(run_id);
CREATE INDEX IF NOT EXISTS idx_trace_events_method ON trace_events(method);
CREATE INDEX IF NOT EXISTS idx_trace_events_tool_name ON trace_events(tool_name);
"#;

/// Durable catalog of Projects/Agents/Runs plus an append-only Event log.
///
/// Single-writer semantics: every mutating call takes the same mutex, so
/// writes are serialized while the connection itself remains usable for
/// concurrent reads between them.
pub struct JournalStore {
    conn: Mutex<Connection>,
}

impl JournalStore {
    pub fn open(path: &Path) -> TraceResult<Self> {
        let conn = Connection::open(path).map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> TraceResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> TraceResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> TraceResult<Project> {
        let conn = self.conn.lock().await;
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM projects WHERE name = ?1", params![name], |r| r.get(0))
            .optional()
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        if exists.is_some() {
            return Err(TraceError::Conflict {
                kind: "project",
                name: name.to_string(),
            });
        }
        let project = Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO projects (id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                project.id.to_string(),
                project.name,
                project.description,
                project.created_at.to_rfc3339()
            ],
        )
        .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        Ok(project)
    }

    pub async fn create_agent(
        &self,
        project_id: Uuid,
        name: &str,
        target_command: &str,
        chaos_config: Option<Value>,
    ) -> TraceResult<Agent> {
        let conn = self.conn.lock().await;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM agents WHERE project_id = ?1 AND name = ?2",
                params![project_id.to_string(), name],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        if exists.is_some() {
            return Err(TraceError::Conflict {
                kind: "agent",
                name: name.to_string(),
            });
        }
        let agent = Agent {
            id: Uuid::new_v4(),
            project_id,
            name: name.to_string(),
            target_command: target_command.to_string(),
            chaos_config,
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO agents (id, project_id, name, target_command, chaos_config, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                agent.id.to_string(),
                agent.project_id.to_string(),
                agent.name,
                agent.target_command,
                agent.chaos_config.as_ref().map(|v| v.to_string()),
                agent.created_at.to_rfc3339()
            ],
        )
        .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        Ok(agent)
    }

    /// Recomputes counters for any run still `running` with matching
    /// `(agent, kind)` and marks it `completed`. Intentional crash
    /// recovery, scoped so it never touches an unrelated concurrent run.
    fn cleanup_stale(
        conn: &Connection,
        agent_id: Uuid,
        kind: RunKind,
    ) -> TraceResult<()> {
        let mut stmt = conn
            .prepare(
                "SELECT id FROM runs WHERE agent_id = ?1 AND kind = ?2 AND status = 'running'",
            )
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        let stale_ids: Vec<String> = stmt
            .query_map(params![agent_id.to_string(), kind.as_str()], |r| r.get(0))
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        drop(stmt);

        for run_id in stale_ids {
            let total_calls: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM trace_events WHERE run_id = ?1 AND kind = 'tool_call'",
                    params![run_id],
                    |r| r.get(0),
                )
                .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
            let total_errors: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM trace_events WHERE run_id = ?1 AND kind = 'rpc_response' AND error IS NOT NULL",
                    params![run_id],
                    |r| r.get(0),
                )
                .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
            conn.execute(
                "UPDATE runs SET status = 'completed', ended_at = ?2, total_calls = ?3, total_errors = ?4 WHERE id = ?1",
                params![run_id, Utc::now().to_rfc3339(), total_calls, total_errors],
            )
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn create_run(
        &self,
        target_command: &str,
        chaos_snapshot: Option<Value>,
        agent_id: Option<Uuid>,
        kind: RunKind,
    ) -> TraceResult<Run> {
        let conn = self.conn.lock().await;
        if let Some(agent_id) = agent_id {
            Self::cleanup_stale(&conn, agent_id, kind)?;
        }
        let run = Run {
            id: Uuid::new_v4(),
            agent_id,
            kind,
            target_command: target_command.to_string(),
            chaos_snapshot,
            status: RunStatus::Pending,
            started_at: None,
            ended_at: None,
            counters: RunCounters::default(),
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO runs (id, agent_id, kind, target_command, chaos_snapshot, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.id.to_string(),
                run.agent_id.map(|a| a.to_string()),
                run.kind.as_str(),
                run.target_command,
                run.chaos_snapshot.as_ref().map(|v| v.to_string()),
                run.status.as_str(),
                run.created_at.to_rfc3339()
            ],
        )
        .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        Ok(run)
    }

    pub async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        counters: Option<RunCounters>,
    ) -> TraceResult<()> {
        let conn = self.conn.lock().await;
        let current: String = conn
            .query_row(
                "SELECT status FROM runs WHERE id = ?1",
                params![run_id.to_string()],
                |r| r.get(0),
            )
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        let current = RunStatus::from_str(&current)
            .ok_or_else(|| TraceError::JournalWriteError(format!("unknown status {current}")))?;
        if !current.can_transition_to(status) {
            return Err(TraceError::JournalWriteError(format!(
                "illegal run status transition {current:?} -> {status:?}"
            )));
        }

        let now = Utc::now().to_rfc3339();
        match status {
            RunStatus::Running => {
                conn.execute(
                    "UPDATE runs SET status = ?2, started_at = ?3 WHERE id = ?1",
                    params![run_id.to_string(), status.as_str(), now],
                )
                .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
            }
            RunStatus::Completed | RunStatus::Failed => {
                if let Some(c) = counters {
                    conn.execute(
                        "UPDATE runs SET status = ?2, ended_at = ?3, total_calls = ?4, total_errors = ?5,
                         stress_passed = ?6, stress_graceful = ?7, stress_crashed = ?8, stress_score = ?9
                         WHERE id = ?1",
                        params![
                            run_id.to_string(),
                            status.as_str(),
                            now,
                            c.total_calls,
                            c.total_errors,
                            c.stress_passed,
                            c.stress_graceful,
                            c.stress_crashed,
                            c.stress_score
                        ],
                    )
                    .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
                } else {
                    conn.execute(
                        "UPDATE runs SET status = ?2, ended_at = ?3 WHERE id = ?1",
                        params![run_id.to_string(), status.as_str(), now],
                    )
                    .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
                }
            }
            RunStatus::Pending => unreachable!("no transition ends at pending"),
        }
        Ok(())
    }

    pub async fn insert_event(&self, run_id: Uuid, event: NewEvent) -> TraceResult<i64> {
        let conn = self.conn.lock().await;
        let ts = Utc::now();
        conn.execute(
            "INSERT INTO trace_events
             (run_id, kind, ts, method, tool_name, params, result, error, latency_ms, chaos_applied, correlation_id, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run_id.to_string(),
                event.kind.as_str(),
                ts.to_rfc3339(),
                event.method,
                event.tool,
                event.params.as_ref().map(|v| v.to_string()),
                event.result.as_ref().map(|v| v.to_string()),
                event.error.as_ref().map(|v| v.to_string()),
                event.latency_ms,
                event.chaos_applied.as_ref().map(|v| v.to_string()),
                event.correlation_id,
                event.outcome
            ],
        )
        .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn list_runs(&self, filters: RunFilters) -> TraceResult<Vec<Run>> {
        let conn = self.conn.lock().await;
        let mut sql = String::from("SELECT id, agent_id, kind, target_command, chaos_snapshot, status, started_at, ended_at, total_calls, total_errors, stress_passed, stress_graceful, stress_crashed, stress_score, created_at FROM runs WHERE 1=1");
        let mut clauses = Vec::new();
        if filters.agent_id.is_some() {
            clauses.push(" AND agent_id = ?".to_string());
        }
        if filters.status.is_some() {
            clauses.push(" AND status = ?".to_string());
        }
        if filters.kind.is_some() {
            clauses.push(" AND kind = ?".to_string());
        }
        if filters.target_substring.is_some() {
            clauses.push(" AND target_command LIKE ?".to_string());
        }
        sql.push_str(&clauses.concat());
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;

        let mut bind_values: Vec<String> = Vec::new();
        if let Some(a) = filters.agent_id {
            bind_values.push(a.to_string());
        }
        if let Some(s) = filters.status {
            bind_values.push(s.as_str().to_string());
        }
        if let Some(k) = filters.kind {
            bind_values.push(k.as_str().to_string());
        }
        if let Some(sub) = &filters.target_substring {
            bind_values.push(format!("%{sub}%"));
        }
        let limit = filters.limit.unwrap_or(i64::MAX);
        let offset = filters.offset.unwrap_or(0);
        let mut bind_refs: Vec<&dyn rusqlite::ToSql> =
            bind_values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
        bind_refs.push(&limit);
        bind_refs.push(&offset);

        let rows = stmt
            .query_map(bind_refs.as_slice(), row_to_run)
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))
    }

    pub async fn get_events(
        &self,
        run_id: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> TraceResult<Vec<TraceEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, run_id, kind, ts, method, tool_name, params, result, error, latency_ms, chaos_applied, correlation_id, outcome
                 FROM trace_events WHERE run_id = ?1 ORDER BY id ASC LIMIT ?2 OFFSET ?3",
            )
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        let rows = stmt
            .query_map(
                params![run_id.to_string(), limit.unwrap_or(i64::MAX), offset.unwrap_or(0)],
                row_to_event,
            )
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| TraceError::JournalWriteError(e.to_string()))
    }

    pub async fn delete_project(&self, project_id: Uuid) -> TraceResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM projects WHERE id = ?1",
            params![project_id.to_string()],
        )
        .map_err(|e| TraceError::JournalWriteError(e.to_string()))?;
        Ok(())
    }
}

fn parse_json_col(s: Option<String>) -> Option<Value> {
    s.and_then(|s| serde_json::from_str(&s).ok())
}

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<Run> {
    let id: String = row.get(0)?;
    let agent_id: Option<String> = row.get(1)?;
    let kind: String = row.get(2)?;
    let target_command: String = row.get(3)?;
    let chaos_snapshot: Option<String> = row.get(4)?;
    let status: String = row.get(5)?;
    let started_at: Option<String> = row.get(6)?;
    let ended_at: Option<String> = row.get(7)?;
    let total_calls: i64 = row.get(8)?;
    let total_errors: i64 = row.get(9)?;
    let stress_passed: i64 = row.get(10)?;
    let stress_graceful: i64 = row.get(11)?;
    let stress_crashed: i64 = row.get(12)?;
    let stress_score: Option<i64> = row.get(13)?;
    let created_at: String = row.get(14)?;

    Ok(Run {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        agent_id: agent_id.and_then(|a| Uuid::parse_str(&a).ok()),
        kind: RunKind::from_str(&kind).unwrap_or(RunKind::Proxy),
        target_command,
        chaos_snapshot: parse_json_col(chaos_snapshot),
        status: RunStatus::from_str(&status).unwrap_or(RunStatus::Pending),
        started_at: started_at.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        ended_at: ended_at.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        counters: RunCounters {
            total_calls,
            total_errors,
            stress_passed,
            stress_graceful,
            stress_crashed,
            stress_score,
        },
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<TraceEvent> {
    let id: i64 = row.get(0)?;
    let run_id: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let ts: String = row.get(3)?;
    let method: Option<String> = row.get(4)?;
    let tool: Option<String> = row.get(5)?;
    let params: Option<String> = row.get(6)?;
    let result: Option<String> = row.get(7)?;
    let error: Option<String> = row.get(8)?;
    let latency_ms: Option<i64> = row.get(9)?;
    let chaos_applied: Option<String> = row.get(10)?;
    let correlation_id: Option<String> = row.get(11)?;
    let outcome: Option<String> = row.get(12)?;

    Ok(TraceEvent {
        id,
        run_id: Uuid::parse_str(&run_id).unwrap_or_default(),
        kind: EventKind::from_str(&kind).unwrap_or(EventKind::RpcRequest),
        ts: chrono::DateTime::parse_from_rfc3339(&ts)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        method,
        tool,
        params: parse_json_col(params),
        result: parse_json_col(result),
        error: parse_json_col(error),
        latency_ms,
        chaos_applied: parse_json_col(chaos_applied),
        correlation_id,
        outcome,
    })
}

#[cfg(test)]
mod tests;
