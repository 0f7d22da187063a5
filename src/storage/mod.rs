//! State store for conversations, the tool audit trail and handler memory.
//!
//! Conversations, turns and tool invocations are append-only. Entity memory
//! and report records are upserted. Every mutating call is durable before it
//! returns.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::llm::Message;

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Get the role name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("Unknown turn role: {}", s)),
        }
    }
}

/// Outcome of the request a turn belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Completed,
    Failed,
    Cancelled,
}

impl TurnStatus {
    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Completed => "completed",
            TurnStatus::Failed => "failed",
            TurnStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TurnStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TurnStatus::Completed),
            "failed" => Ok(TurnStatus::Failed),
            "cancelled" => Ok(TurnStatus::Cancelled),
            _ => Err(format!("Unknown turn status: {}", s)),
        }
    }
}

/// A conversation, created on its first turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Number of turns recorded so far.
    pub turn_count: i64,
}

/// One persisted message within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub conversation_id: String,
    /// Gap-free, starting at 1.
    pub seq: i64,
    pub role: Role,
    pub content: String,
    /// Handler that answered; `None` for user turns and unrouted failures.
    pub handler: Option<String>,
    pub status: TurnStatus,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Convert into a model context message.
    pub fn to_message(&self) -> Message {
        match self.role {
            Role::User => Message::user(&self.content),
            Role::Assistant => Message::assistant(&self.content),
            Role::System => Message::system(&self.content),
        }
    }
}

/// A turn before the store has assigned its id and sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTurn {
    pub role: Role,
    pub content: String,
    pub handler: Option<String>,
    pub status: TurnStatus,
}

impl NewTurn {
    /// A user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            handler: None,
            status: TurnStatus::Completed,
        }
    }

    /// An assistant response
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            handler: None,
            status: TurnStatus::Completed,
        }
    }

    /// Set the handler that produced the turn
    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    /// Set the turn status
    pub fn with_status(mut self, status: TurnStatus) -> Self {
        self.status = status;
        self
    }
}

/// Audit record of one attempted tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    /// Owning turn; set when the invocation is recorded.
    pub turn_id: Option<String>,
    pub tool_name: String,
    /// Handler that made the call.
    pub handler: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub latency_ms: i64,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

impl ToolInvocation {
    /// Start an invocation record. It counts as failed until completed.
    pub fn new(
        tool_name: impl Into<String>,
        handler: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            turn_id: None,
            tool_name: tool_name.into(),
            handler: handler.into(),
            input,
            output: None,
            error: Some("did not complete".to_string()),
            latency_ms: 0,
            success: false,
            created_at: Utc::now(),
        }
    }

    /// Mark as successful with output
    pub fn success(mut self, output: serde_json::Value, latency_ms: i64) -> Self {
        self.success = true;
        self.output = Some(output);
        self.error = None;
        self.latency_ms = latency_ms;
        self
    }

    /// Mark as failed with error
    pub fn failure(mut self, error: impl Into<String>, latency_ms: i64) -> Self {
        self.success = false;
        self.output = None;
        self.error = Some(error.into());
        self.latency_ms = latency_ms;
        self
    }
}

/// A durable fact a handler learned about a business entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMemoryRecord {
    pub entity_type: String,
    pub entity_id: String,
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Usage statistics for a named, re-runnable report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub name: String,
    /// Query or specification that produced the report.
    pub spec: String,
    pub run_count: i64,
    pub last_result: String,
    pub created_at: DateTime<Utc>,
    pub last_run: DateTime<Utc>,
}

/// State store trait.
#[async_trait]
pub trait Storage: Send + Sync {
    // Conversations and turns

    /// Append a turn, assigning the next sequence number atomically.
    /// Creates the conversation on its first turn.
    async fn append_turn(&self, conversation_id: &str, turn: NewTurn) -> StorageResult<Turn>;
    /// Append a turn together with the tool invocations made while producing
    /// it, in one transaction: either all of them are stored or none are.
    async fn append_turn_with_invocations(
        &self,
        conversation_id: &str,
        turn: NewTurn,
        invocations: &[ToolInvocation],
    ) -> StorageResult<Turn>;
    /// Get a conversation by ID.
    async fn get_conversation(&self, conversation_id: &str)
        -> StorageResult<Option<Conversation>>;
    /// Get the most recent `limit` turns, oldest first.
    async fn get_recent_turns(&self, conversation_id: &str, limit: u32)
        -> StorageResult<Vec<Turn>>;

    // Audit trail

    /// Record a tool invocation against an existing turn.
    ///
    /// Fails with [`StorageError::TurnNotFound`](crate::error::StorageError::TurnNotFound)
    /// when the turn does not exist.
    async fn record_tool_invocation(
        &self,
        turn_id: &str,
        invocation: &ToolInvocation,
    ) -> StorageResult<()>;
    /// Get all invocations recorded against a turn.
    async fn get_turn_invocations(&self, turn_id: &str) -> StorageResult<Vec<ToolInvocation>>;

    // Entity memory

    /// Insert or overwrite one key of an entity's memory.
    async fn upsert_entity_memory(
        &self,
        entity_type: &str,
        entity_id: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> StorageResult<EntityMemoryRecord>;
    /// Get every key recorded for an entity, sorted by key.
    async fn get_entity_memory(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StorageResult<Vec<EntityMemoryRecord>>;

    // Reports

    /// Record a report run: creates the record or bumps its run count.
    async fn upsert_report(
        &self,
        name: &str,
        spec: &str,
        result_summary: &str,
    ) -> StorageResult<ReportRecord>;
    /// Get a report by name.
    async fn get_report(&self, name: &str) -> StorageResult<Option<ReportRecord>>;
}
