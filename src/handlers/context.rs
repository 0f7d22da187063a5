//! Per-request handler context and the tool invocation recorder.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::{user_message, HandlerResult};
use crate::config::DEFAULT_MODEL_TIMEOUT_MS;
use crate::error::{LlmError, LlmResult, RegistryError, ToolError, ToolResult};
use crate::llm::{serialize_for_log, within, LanguageModel};
use crate::storage::{EntityMemoryRecord, ReportRecord, Storage, ToolInvocation, Turn};
use crate::tools::ToolRegistry;

/// Tool calls attempted during one request, in call order.
///
/// Shared between the handler and the router so the audit trail survives a
/// cancelled request.
#[derive(Clone, Default)]
pub struct InvocationLog {
    entries: Arc<Mutex<Vec<ToolInvocation>>>,
}

impl InvocationLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending invocation; returns its slot.
    fn begin(&self, invocation: ToolInvocation) -> usize {
        let mut entries = self.entries.lock();
        entries.push(invocation);
        entries.len() - 1
    }

    fn complete(&self, slot: usize, invocation: ToolInvocation) {
        if let Some(entry) = self.entries.lock().get_mut(slot) {
            *entry = invocation;
        }
    }

    /// Copy of every invocation so far. Calls still in flight appear as
    /// failed.
    pub fn snapshot(&self) -> Vec<ToolInvocation> {
        self.entries.lock().clone()
    }

    /// Number of attempted calls
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no tool call was attempted
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Everything a handler may use while answering one utterance.
#[derive(Clone)]
pub struct HandlerContext {
    conversation_id: String,
    handler: String,
    history: Vec<Turn>,
    registry: Arc<ToolRegistry>,
    storage: Arc<dyn Storage>,
    llm: Option<Arc<dyn LanguageModel>>,
    model_timeout: Duration,
    entity_owners: Arc<HashMap<String, String>>,
    available_handlers: Vec<String>,
    log: InvocationLog,
}

impl HandlerContext {
    /// Create a context for `handler` answering in `conversation_id`.
    pub fn new(
        conversation_id: impl Into<String>,
        handler: impl Into<String>,
        registry: Arc<ToolRegistry>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            handler: handler.into(),
            history: Vec::new(),
            registry,
            storage,
            llm: None,
            model_timeout: Duration::from_millis(DEFAULT_MODEL_TIMEOUT_MS),
            entity_owners: Arc::new(HashMap::new()),
            available_handlers: Vec::new(),
            log: InvocationLog::new(),
        }
    }

    /// Set the recent turns, oldest first
    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }

    /// Set the generation capability
    pub fn with_llm(mut self, llm: Option<Arc<dyn LanguageModel>>) -> Self {
        self.llm = llm;
        self
    }

    /// Set the deadline for one generation call
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    /// Set the entity type to owning handler map
    pub fn with_entity_owners(mut self, owners: Arc<HashMap<String, String>>) -> Self {
        self.entity_owners = owners;
        self
    }

    /// Set the handler names shown in help text
    pub fn with_available_handlers(mut self, handlers: Vec<String>) -> Self {
        self.available_handlers = handlers;
        self
    }

    /// Record into an existing log
    pub fn with_log(mut self, log: InvocationLog) -> Self {
        self.log = log;
        self
    }

    /// Conversation being answered.
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Name of the handler this context acts for.
    pub fn handler(&self) -> &str {
        &self.handler
    }

    /// Recent turns, oldest first.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Generation capability, if configured.
    pub fn llm(&self) -> Option<&Arc<dyn LanguageModel>> {
        self.llm.as_ref()
    }

    /// Generate a completion within the model deadline.
    ///
    /// Fails with [`LlmError::ServiceUnavailable`] when no model is
    /// configured and [`LlmError::Timeout`] when the deadline passes.
    pub async fn generate(&self, prompt: &str) -> LlmResult<String> {
        let Some(llm) = &self.llm else {
            return Err(LlmError::ServiceUnavailable {
                message: "no language model configured".to_string(),
                retries: 0,
            });
        };
        within(self.model_timeout, llm.generate(prompt)).await
    }

    /// Names of every handler the router knows.
    pub fn available_handlers(&self) -> &[String] {
        &self.available_handlers
    }

    /// The invocation log for this request.
    pub fn log(&self) -> &InvocationLog {
        &self.log
    }

    /// Invoke a registered tool and record the attempt.
    ///
    /// Names that are not registered fail with
    /// [`RegistryError::ToolNotFound`] and are not recorded, so every
    /// recorded invocation names a tool that existed when it was called.
    pub async fn invoke_tool(&self, name: &str, input: Value) -> ToolResult<Value> {
        if !self.registry.contains(name) {
            warn!(tool = %name, handler = %self.handler, "Unknown tool requested");
            return Err(RegistryError::ToolNotFound {
                name: name.to_string(),
            }
            .into());
        }

        let start = Instant::now();
        let invocation = ToolInvocation::new(name, &self.handler, input.clone());
        let slot = self.log.begin(invocation.clone());

        let result = self.registry.invoke(name, &self.handler, input).await;
        let latency = start.elapsed().as_millis() as i64;

        match &result {
            Ok(output) => {
                info!(
                    tool = %name,
                    handler = %self.handler,
                    latency_ms = latency,
                    success = true,
                    "Tool invocation completed"
                );
                self.log.complete(
                    slot,
                    invocation.success(serialize_for_log(output, name), latency),
                );
            }
            Err(e) => {
                warn!(
                    tool = %name,
                    handler = %self.handler,
                    latency_ms = latency,
                    success = false,
                    error = %e,
                    "Tool invocation failed"
                );
                self.log.complete(
                    slot,
                    invocation.failure(format!("{}: {}", e.kind(), e), latency),
                );
            }
        }

        result
    }

    /// Write one memory key for an entity this handler owns.
    pub async fn remember(
        &self,
        entity_type: &str,
        entity_id: &str,
        key: &str,
        value: &Value,
    ) -> ToolResult<EntityMemoryRecord> {
        match self.entity_owners.get(entity_type) {
            Some(owner) if owner == &self.handler => {}
            owner => {
                return Err(ToolError::EntityOwnership {
                    entity_type: entity_type.to_string(),
                    owner: owner.cloned().unwrap_or_else(|| "nobody".to_string()),
                    handler: self.handler.clone(),
                });
            }
        }

        Ok(self
            .storage
            .upsert_entity_memory(entity_type, entity_id, key, value)
            .await?)
    }

    /// Read everything remembered about an entity. Any handler may read.
    pub async fn recall(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> ToolResult<Vec<EntityMemoryRecord>> {
        Ok(self.storage.get_entity_memory(entity_type, entity_id).await?)
    }

    /// Usage record of a named report.
    pub async fn get_report(&self, name: &str) -> ToolResult<Option<ReportRecord>> {
        Ok(self.storage.get_report(name).await?)
    }

    /// Successful result carrying every invocation so far.
    pub fn finish(&self, text: impl Into<String>) -> HandlerResult {
        HandlerResult {
            text: text.into(),
            tool_invocations: self.log.snapshot(),
            failed: false,
        }
    }

    /// Turn a tool failure into a safe response. Persistence errors are
    /// returned unchanged.
    pub fn recover(&self, err: ToolError) -> ToolResult<HandlerResult> {
        if let ToolError::Persistence(_) = err {
            return Err(err);
        }

        warn!(
            handler = %self.handler,
            conversation_id = %self.conversation_id,
            kind = err.kind(),
            error = %err,
            "Handler recovered from tool failure"
        );

        Ok(HandlerResult {
            text: user_message(&err),
            tool_invocations: self.log.snapshot(),
            failed: true,
        })
    }
}
