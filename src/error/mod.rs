use thiserror::Error;

use crate::sql::{ExecutionPath, StatementClass};

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Tool registry errors. These are startup/configuration errors and are
/// never retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Tool '{name}' is already registered by handler '{owner}'")]
    DuplicateTool { name: String, owner: String },

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("Invalid input for {tool}: {message}")]
    InvalidInput { tool: String, message: String },

    #[error("Handler '{handler}' may not invoke tool '{tool}'")]
    AccessDenied { tool: String, handler: String },
}

/// Raised by the SQL safety validator before a statement reaches the database.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{class} statement refused: {reason}")]
pub struct UnsafeQueryError {
    pub class: StatementClass,
    /// Path the caller asked for.
    pub path: ExecutionPath,
    pub reason: String,
}

/// Classification / generation capability errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM service unavailable: {message} (retries: {retries})")]
    ServiceUnavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Business database execution errors
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Query execution failed: {message}")]
    Execution { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// State store errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Turn not found: {turn_id}")]
    TurnNotFound { turn_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Stdio protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Invalid params for {method}: {message}")]
    InvalidParameters { method: String, message: String },
}

/// Everything a single tool call can fail with.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Unsafe query: {0}")]
    UnsafeQuery(#[from] UnsafeQueryError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("Entity type '{entity_type}' is owned by '{owner}', not '{handler}'")]
    EntityOwnership {
        entity_type: String,
        owner: String,
        handler: String,
    },

    #[error("Tool execution failed: {message}")]
    Failed { message: String },
}

impl ToolError {
    /// Short label used in the audit trail and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Registry(RegistryError::DuplicateTool { .. }) => "duplicate_tool",
            ToolError::Registry(RegistryError::ToolNotFound { .. }) => "tool_not_found",
            ToolError::Registry(RegistryError::InvalidInput { .. }) => "invalid_input",
            ToolError::Registry(RegistryError::AccessDenied { .. }) => "access_denied",
            ToolError::UnsafeQuery(_) => "unsafe_query",
            ToolError::Query(_) => "query_execution",
            ToolError::Persistence(_) => "persistence",
            ToolError::EntityOwnership { .. } => "entity_ownership",
            ToolError::Failed { .. } => "failed",
        }
    }
}

impl From<ToolError> for AppError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Persistence(e) => AppError::Persistence(e),
            other => AppError::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for state store operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for business database operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Result type alias for tool calls
pub type ToolResult<T> = Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::DuplicateTool {
            name: "list_customers".to_string(),
            owner: "sales".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Tool 'list_customers' is already registered by handler 'sales'"
        );

        let err = RegistryError::ToolNotFound {
            name: "missing".to_string(),
        };
        assert_eq!(err.to_string(), "Tool not found: missing");

        let err = RegistryError::AccessDenied {
            tool: "run_report".to_string(),
            handler: "sales".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Handler 'sales' may not invoke tool 'run_report'"
        );
    }

    #[test]
    fn test_unsafe_query_error_display() {
        let err = UnsafeQueryError {
            class: StatementClass::Rejected,
            path: ExecutionPath::Write,
            reason: "schema changes are not allowed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "rejected statement refused: schema changes are not allowed"
        );
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::ServiceUnavailable {
            message: "server down".to_string(),
            retries: 3,
        };
        assert_eq!(
            err.to_string(),
            "LLM service unavailable: server down (retries: 3)"
        );

        let err = LlmError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 401 - unauthorized");

        let err = LlmError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::TurnNotFound {
            turn_id: "turn-1".to_string(),
        };
        assert_eq!(err.to_string(), "Turn not found: turn-1");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidParameters {
            method: "assistant/handle".to_string(),
            message: "missing field `message`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid params for assistant/handle: missing field `message`"
        );

        let err: ProtocolError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("Parse error:"));
    }

    #[test]
    fn test_tool_error_kind() {
        let err: ToolError = UnsafeQueryError {
            class: StatementClass::Mutating,
            path: ExecutionPath::Read,
            reason: "read path".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "unsafe_query");

        let err: ToolError = QueryError::Execution {
            message: "no such table".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "query_execution");

        let err: ToolError = RegistryError::ToolNotFound {
            name: "x".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "tool_not_found");
    }

    #[test]
    fn test_tool_persistence_error_stays_persistence() {
        let err: AppError = ToolError::Persistence(StorageError::Query {
            message: "disk full".to_string(),
        })
        .into();
        assert!(matches!(err, AppError::Persistence(_)));
    }

    #[test]
    fn test_tool_error_conversion_to_app_error() {
        let err: AppError = ToolError::Failed {
            message: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::Internal { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_storage_error_conversion_to_app_error() {
        let err: AppError = StorageError::TurnNotFound {
            turn_id: "t".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::Persistence(_)));
    }
}
