//! # ERP Assistant
//!
//! Agent-orchestration core of a chat-driven business assistant. A
//! [`Router`] classifies each utterance, dispatches it to exactly one
//! [`Handler`](handlers::Handler), and records the conversation and every
//! tool call in a durable state store.
//!
//! ## Architecture
//!
//! ```text
//! stdio JSON-RPC → Router ─ classify ─→ LanguageModel (HTTP) / keyword rules
//!                    │
//!                    ├─ dispatch ─→ Handler ─→ ToolRegistry ─→ Tool
//!                    │                                          │
//!                    │                         SQL safety check ┘
//!                    │                                   ↓
//!                    │                          business database
//!                    └─ record ─→ State Store (SQLite)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use erp_assistant::config::RouterConfig;
//! use erp_assistant::handlers::{SalesHandler, SystemHandler, SYSTEM_HANDLER};
//! use erp_assistant::storage::SqliteStorage;
//! use erp_assistant::tools::ToolRegistry;
//! use erp_assistant::Router;
//!
//! let storage = Arc::new(SqliteStorage::new_in_memory().await?);
//! let registry = Arc::new(ToolRegistry::default());
//! let router = Router::builder(registry, storage, RouterConfig::default())
//!     .handler(Arc::new(SalesHandler::new()))
//!     .handler(Arc::new(SystemHandler::new()))
//!     .default_handler(SYSTEM_HANDLER)
//!     .build()?;
//! let response = router.handle("conv-1", "show customers").await?;
//! ```

/// Environment-driven configuration.
pub mod config;
/// Business database capability and the guarded executor.
pub mod database;
/// Error types and result aliases.
pub mod error;
/// Domain handlers and the handler context.
pub mod handlers;
/// Classification and generation capability.
pub mod llm;
mod locks;
/// Prompt texts for the hosted model.
pub mod prompts;
/// Router state machine.
pub mod router;
/// JSON-RPC server over stdio.
pub mod server;
/// SQL safety validator.
pub mod sql;
/// State store for conversations, audit trail and memory.
pub mod storage;
/// Tool contract, registry and built-in tools.
pub mod tools;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use router::{Router, RouterResponse};
pub use server::AssistantServer;
