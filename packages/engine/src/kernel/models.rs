//! Core data model: Job, ExecutionState, logs, artifacts, workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Status lattice from §3: `queued -> running -> {completed, failed,
/// waiting_for_user, queued}`; `waiting_for_user -> {queued, cancelled}`;
/// `queued -> cancelled` only before claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    WaitingForUser,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// Human-in-the-loop mode. Shapes the agent loop's system prompt, not its
/// mechanics (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HitlMode {
    PlanApproval,
    AutoExecute,
    AlwaysAsk,
}

impl Default for HitlMode {
    fn default() -> Self {
        HitlMode::PlanApproval
    }
}

/// A unit of work, as described in §3.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: Uuid,
    pub credential_id: Uuid,
    pub task: String,
    pub priority: i32,
    pub timeout_seconds: i32,
    pub model: String,
    pub hitl_mode: HitlMode,
    pub status: JobStatus,
    pub worker_id: Option<String>,
    pub tools_discovered: serde_json::Value,
    pub execution_state: Option<serde_json::Value>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub agent_question: Option<String>,
    pub user_answer: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
}

/// One message in a conversation with the chat provider.
///
/// A typed tagged variant, per §9 ("untyped conversation history crossing
/// the park/resume boundary must be modeled as a tagged variant"). Converted
/// to/from raw `serde_json::Value` at the `chat-client` boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ConversationMessage {
    System { content: String },
    User { content: String },
    Assistant {
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<serde_json::Value>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ConversationMessage {
    /// Render in OpenAI-compatible wire format, for handing to `chat-client`.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            ConversationMessage::System { content } => {
                serde_json::json!({"role": "system", "content": content})
            }
            ConversationMessage::User { content } => {
                serde_json::json!({"role": "user", "content": content})
            }
            ConversationMessage::Assistant { content, tool_calls } => {
                let mut v = serde_json::json!({
                    "role": "assistant",
                    "content": content.clone().unwrap_or_default(),
                });
                if !tool_calls.is_empty() {
                    v["tool_calls"] = serde_json::Value::Array(tool_calls.clone());
                }
                v
            }
            ConversationMessage::Tool { tool_call_id, content } => {
                serde_json::json!({"role": "tool", "tool_call_id": tool_call_id, "content": content})
            }
        }
    }

    /// Build from a raw assistant message returned by `chat-client`.
    pub fn from_assistant_raw(raw: &serde_json::Value) -> Self {
        let content = raw
            .get("content")
            .and_then(|c| c.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let tool_calls = raw
            .get("tool_calls")
            .and_then(|tc| tc.as_array())
            .cloned()
            .unwrap_or_default();
        ConversationMessage::Assistant { content, tool_calls }
    }
}

/// The serializable checkpoint captured when a Job is parked (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Schema-evolution tag, so older checkpoints remain decodable.
    pub checkpoint: String,
    pub conversation_history: Vec<ConversationMessage>,
    pub files_written: Vec<String>,
    pub packages_installed: Vec<String>,
    pub resumed_count: i32,
    pub last_checkpoint_at: DateTime<Utc>,
}

impl ExecutionState {
    pub const CHECKPOINT_V1: &'static str = "v1";

    pub fn new(conversation_history: Vec<ConversationMessage>) -> Self {
        Self {
            checkpoint: Self::CHECKPOINT_V1.to_string(),
            conversation_history,
            files_written: Vec::new(),
            packages_installed: Vec::new(),
            resumed_count: 0,
            last_checkpoint_at: Utc::now(),
        }
    }

    /// Cap conversation history so HITL round-trips cannot grow a checkpoint
    /// without bound: keep the leading system message plus the most recent
    /// window of the rest.
    pub fn truncate_history(&mut self, max_messages: usize) {
        if self.conversation_history.len() <= max_messages {
            return;
        }
        let system = self
            .conversation_history
            .first()
            .filter(|m| matches!(m, ConversationMessage::System { .. }))
            .cloned();
        let keep_from = self.conversation_history.len() - (max_messages - system.is_some() as usize);
        let mut truncated: Vec<ConversationMessage> = system.into_iter().collect();
        truncated.extend(self.conversation_history.drain(keep_from..));
        self.conversation_history = truncated;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Append-only per-job log entry (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobLog {
    pub id: Uuid,
    pub job_id: Uuid,
    pub sequence: i64,
    pub level: LogLevel,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A file produced by a Job (§3), distinct from an attachment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobArtifact {
    pub id: Uuid,
    pub job_id: Uuid,
    pub filename: String,
    pub mime_type: String,
    pub storage_path: String,
    pub public_url: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

/// An input file supplied by the submitter (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobAttachment {
    pub id: Uuid,
    pub job_id: Option<Uuid>,
    pub filename: String,
    pub mime_type: String,
    pub storage_path: String,
    pub public_url: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Active,
    Draining,
    Dead,
}

/// A worker runtime registration (§3). Health is derived purely from
/// `last_heartbeat` (§6.4), never stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Worker {
    pub id: String,
    pub hostname: String,
    pub version: String,
    pub status: WorkerStatus,
    pub active_job_count: i32,
    pub last_heartbeat: DateTime<Utc>,
}

/// Derived worker health classification (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerHealth {
    Healthy,
    Warning,
    Dead,
}

impl Worker {
    pub fn health(&self, now: DateTime<Utc>) -> WorkerHealth {
        let age = (now - self.last_heartbeat).num_seconds();
        if age >= 120 {
            WorkerHealth::Dead
        } else if age >= 60 {
            WorkerHealth::Warning
        } else {
            WorkerHealth::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_health_thresholds() {
        let now = Utc::now();
        let mk = |secs_ago: i64| Worker {
            id: "w".into(),
            hostname: "h".into(),
            version: "0".into(),
            status: WorkerStatus::Active,
            active_job_count: 0,
            last_heartbeat: now - chrono::Duration::seconds(secs_ago),
        };

        assert_eq!(mk(10).health(now), WorkerHealth::Healthy);
        assert_eq!(mk(90).health(now), WorkerHealth::Warning);
        assert_eq!(mk(200).health(now), WorkerHealth::Dead);
    }

    #[test]
    fn truncate_history_keeps_system_and_recent_window() {
        let mut state = ExecutionState::new(vec![
            ConversationMessage::System { content: "sys".into() },
            ConversationMessage::User { content: "1".into() },
            ConversationMessage::User { content: "2".into() },
            ConversationMessage::User { content: "3".into() },
        ]);
        state.truncate_history(2);
        assert_eq!(state.conversation_history.len(), 2);
        assert!(matches!(state.conversation_history[0], ConversationMessage::System { .. }));
    }

    #[test]
    fn conversation_message_round_trips_through_wire_format() {
        let raw = serde_json::json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [{"id": "call_1", "function": {"name": "final_answer", "arguments": "{}"}}]
        });
        let msg = ConversationMessage::from_assistant_raw(&raw);
        let wire = msg.to_wire();
        assert_eq!(wire["tool_calls"][0]["id"], "call_1");
    }
}
