use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub target_command: String,
    pub chaos_config: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Proxy,
    Stress,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::Stress => "stress",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "proxy" => Some(Self::Proxy),
            "stress" => Some(Self::Stress),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Status transitions are monotonic: pending -> running -> {completed, failed}.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (*self, next),
            (Pending, Running)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCounters {
    pub total_calls: i64,
    pub total_errors: i64,
    pub stress_passed: i64,
    pub stress_graceful: i64,
    pub stress_crashed: i64,
    pub stress_score: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub agent_id: Option<Uuid>,
    pub kind: RunKind,
    pub target_command: String,
    pub chaos_snapshot: Option<Value>,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub counters: RunCounters,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    SessionEnd,
    RpcRequest,
    RpcResponse,
    ToolCall,
    ToolResult,
    StressMutation,
    ChatMessage,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::RpcRequest => "rpc_request",
            Self::RpcResponse => "rpc_response",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::StressMutation => "stress_mutation",
            Self::ChatMessage => "chat_message",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "session_start" => Some(Self::SessionStart),
            "session_end" => Some(Self::SessionEnd),
            "rpc_request" => Some(Self::RpcRequest),
            "rpc_response" => Some(Self::RpcResponse),
            "tool_call" => Some(Self::ToolCall),
            "tool_result" => Some(Self::ToolResult),
            "stress_mutation" => Some(Self::StressMutation),
            "chat_message" => Some(Self::ChatMessage),
            _ => None,
        }
    }
}

/// A single journaled observation within a run. Append-only: never
/// rewritten, never deleted except via cascade when its run is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub kind: EventKind,
    pub method: Option<String>,
    pub tool: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<Value>,
    pub latency_ms: Option<i64>,
    pub chaos_applied: Option<Value>,
    pub correlation_id: Option<String>,
    pub outcome: Option<String>,
}

impl NewEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            method: None,
            tool: None,
            params: None,
            result: None,
            error: None,
            latency_ms: None,
            chaos_applied: None,
            correlation_id: None,
            outcome: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub id: i64,
    pub run_id: Uuid,
    pub kind: EventKind,
    pub ts: DateTime<Utc>,
    pub method: Option<String>,
    pub tool: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<Value>,
    pub latency_ms: Option<i64>,
    pub chaos_applied: Option<Value>,
    pub correlation_id: Option<String>,
    pub outcome: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunFilters {
    pub agent_id: Option<Uuid>,
    pub status: Option<RunStatus>,
    pub kind: Option<RunKind>,
    pub target_substring: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
