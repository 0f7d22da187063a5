//! Router state machine.
//!
//! One call to [`Router::handle`] takes an utterance through
//! `Idle -> Classifying -> Dispatching -> Executing -> Recording -> Idle`:
//! load recent turns and record the user turn, classify (model, falling back
//! to keyword rules), pick the best handler (ties and low confidence go to the
//! default handler), execute it, then append the assistant turn and its tool
//! invocations.
//!
//! Only persistence failures are returned as errors. Everything else becomes
//! a safe response recorded as a failed turn.

mod audit;
mod state;

pub use state::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::RouterConfig;
use crate::error::{AppError, AppResult, ToolError};
use crate::handlers::{Handler, HandlerContext, InvocationLog, KeywordClassifier};
use crate::llm::{within, Classification, LanguageModel, Message};
use crate::locks::KeyedLocks;
use crate::storage::{NewTurn, Storage, Turn, TurnStatus};
use crate::tools::{Tool, ToolRegistry};
use audit::{record_detached, AuditGuard, CANCELLED_TURN_TEXT};

/// Response text used when a handler fails outright.
pub const FALLBACK_MESSAGE: &str =
    "Sorry, I couldn't complete that request. Please try again or rephrase it.";

/// Response text used when a request exceeds its deadline.
pub const TIMEOUT_MESSAGE: &str = "Sorry, that request took too long and was cancelled.";

/// What the caller of [`Router::handle`] gets back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterResponse {
    pub response_text: String,
    /// Handler that answered; `None` if the request never reached one.
    pub handler_used: Option<String>,
    pub latency_ms: u64,
    pub conversation_id: String,
}

/// Result of the stages before recording.
struct Outcome {
    text: String,
    handler: Option<String>,
    status: TurnStatus,
}

/// Logs every state change of one request.
struct Transitions<'a> {
    conversation_id: &'a str,
    state: RouterState,
}

impl<'a> Transitions<'a> {
    fn new(conversation_id: &'a str) -> Self {
        Self {
            conversation_id,
            state: RouterState::Idle,
        }
    }

    fn advance(&mut self, next: RouterState) {
        if !self.state.can_transition_to(next) {
            warn!(
                conversation_id = %self.conversation_id,
                from = %self.state,
                to = %next,
                "Unexpected router state transition"
            );
        }
        debug!(
            conversation_id = %self.conversation_id,
            from = %self.state,
            to = %next,
            "Router state transition"
        );
        self.state = next;
    }
}

/// Classifies utterances and dispatches them to exactly one handler.
pub struct Router {
    handlers: Vec<Arc<dyn Handler>>,
    default_handler: Arc<dyn Handler>,
    registry: Arc<ToolRegistry>,
    storage: Arc<dyn Storage>,
    llm: Option<Arc<dyn LanguageModel>>,
    keywords: KeywordClassifier,
    entity_owners: Arc<HashMap<String, String>>,
    config: RouterConfig,
    conversations: KeyedLocks,
}

impl Router {
    /// Start building a router.
    pub fn builder(
        registry: Arc<ToolRegistry>,
        storage: Arc<dyn Storage>,
        config: RouterConfig,
    ) -> RouterBuilder {
        RouterBuilder {
            registry,
            storage,
            config,
            llm: None,
            handlers: Vec::new(),
            default_handler: None,
        }
    }

    /// The tool registry shared with handlers.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Handler names, sorted.
    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|h| h.name().to_string()).collect();
        names.sort();
        names
    }

    /// Name of the default handler.
    pub fn default_handler(&self) -> &str {
        self.default_handler.name()
    }

    /// Register a tool owned by one of this router's handlers.
    ///
    /// # Errors
    /// [`AppError::Config`] for an unknown handler, [`AppError::Registry`]
    /// for a duplicate tool name.
    pub fn register_tool(&self, tool: Arc<dyn Tool>, handler: &str) -> AppResult<()> {
        if !self.handlers.iter().any(|h| h.name() == handler) {
            return Err(AppError::Config {
                message: format!("Cannot register tool for unknown handler '{}'", handler),
            });
        }
        self.registry.register(tool, handler)?;
        Ok(())
    }

    /// Answer one utterance.
    ///
    /// Requests on the same conversation run one at a time; different
    /// conversations proceed independently.
    ///
    /// # Errors
    /// Only [`AppError::Persistence`]: the turn could not be recorded, so the
    /// request is not reported as successful.
    pub async fn handle(&self, conversation_id: &str, utterance: &str) -> AppResult<RouterResponse> {
        let start = Instant::now();
        let _conversation = self.conversations.lock(conversation_id).await;

        let log = InvocationLog::new();
        let guard = AuditGuard::new(Arc::clone(&self.storage), conversation_id, log.clone());
        let mut transitions = Transitions::new(conversation_id);

        let deadline = Duration::from_millis(self.config.request_timeout_ms);
        let stages = tokio::time::timeout(
            deadline,
            self.run_stages(conversation_id, utterance, &log, &guard, &mut transitions),
        )
        .await;

        let outcome = match stages {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Request failed on persistence"
                );
                return Err(e);
            }
            Err(_) => {
                warn!(
                    conversation_id = %conversation_id,
                    timeout_ms = self.config.request_timeout_ms,
                    state = %transitions.state,
                    "Request timed out"
                );
                Outcome {
                    text: TIMEOUT_MESSAGE.to_string(),
                    handler: guard.handler(),
                    status: TurnStatus::Cancelled,
                }
            }
        };

        transitions.advance(RouterState::Recording);
        guard.disarm();

        let mut turn = NewTurn::assistant(&outcome.text).with_status(outcome.status);
        if let Some(handler) = &outcome.handler {
            turn = turn.with_handler(handler);
        }
        let invocations = log.snapshot();
        let invocation_count = invocations.len();

        let recorded = record_detached(
            Arc::clone(&self.storage),
            conversation_id.to_string(),
            turn,
            invocations,
        )
        .await
        .map_err(|e| {
            error!(
                conversation_id = %conversation_id,
                error = %e,
                "Failed to record turn - audit trail incomplete"
            );
            AppError::Persistence(e)
        })?;

        transitions.advance(RouterState::Idle);

        let latency_ms = start.elapsed().as_millis() as u64;
        info!(
            conversation_id = %conversation_id,
            handler = ?outcome.handler,
            status = outcome.status.as_str(),
            seq = recorded.seq,
            invocations = invocation_count,
            latency_ms,
            "Request handled"
        );

        Ok(RouterResponse {
            response_text: outcome.text,
            handler_used: outcome.handler,
            latency_ms,
            conversation_id: conversation_id.to_string(),
        })
    }

    async fn run_stages(
        &self,
        conversation_id: &str,
        utterance: &str,
        log: &InvocationLog,
        guard: &AuditGuard,
        transitions: &mut Transitions<'_>,
    ) -> AppResult<Outcome> {
        transitions.advance(RouterState::Classifying);

        let history = self
            .storage
            .get_recent_turns(conversation_id, self.config.history_limit)
            .await?;
        self.storage
            .append_turn(conversation_id, NewTurn::user(utterance))
            .await?;

        let classification = self.classify(conversation_id, utterance, &history).await;

        transitions.advance(RouterState::Dispatching);
        let handler = self.select_handler(&classification);
        guard.set_handler(handler.name());

        info!(
            conversation_id = %conversation_id,
            intent = %classification.intent,
            confidence = classification.confidence,
            source = ?classification.source,
            handler = %handler.name(),
            "Routed utterance"
        );

        transitions.advance(RouterState::Executing);
        let ctx = HandlerContext::new(
            conversation_id,
            handler.name(),
            Arc::clone(&self.registry),
            Arc::clone(&self.storage),
        )
        .with_history(history)
        .with_llm(self.llm.clone())
        .with_model_timeout(self.config.model_budget())
        .with_entity_owners(Arc::clone(&self.entity_owners))
        .with_available_handlers(self.handler_names())
        .with_log(log.clone());

        let (text, status) = match handler.execute(utterance, &ctx).await {
            Ok(result) if result.text.trim().is_empty() => {
                warn!(handler = %handler.name(), "Handler returned an empty response");
                (FALLBACK_MESSAGE.to_string(), TurnStatus::Failed)
            }
            Ok(result) if result.failed => (result.text, TurnStatus::Failed),
            Ok(result) => (result.text, TurnStatus::Completed),
            Err(ToolError::Persistence(e)) => return Err(AppError::Persistence(e)),
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    handler = %handler.name(),
                    kind = e.kind(),
                    error = %e,
                    "Handler failed"
                );
                (FALLBACK_MESSAGE.to_string(), TurnStatus::Failed)
            }
        };

        Ok(Outcome {
            text,
            handler: Some(handler.name().to_string()),
            status,
        })
    }

    /// Model classification, or keyword rules when the model is absent,
    /// fails, or misses its budget.
    async fn classify(
        &self,
        conversation_id: &str,
        utterance: &str,
        history: &[Turn],
    ) -> Classification {
        let Some(llm) = &self.llm else {
            return self.keywords.classify(utterance);
        };

        let context: Vec<Message> = history.iter().map(Turn::to_message).collect();
        let budget = self.config.model_budget();
        match within(budget, llm.classify(utterance, &context)).await {
            Ok(classification) => classification,
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Classification unavailable, using keyword rules"
                );
                self.keywords.classify(utterance)
            }
        }
    }

    /// Highest-scoring handler; ties, non-positive scores and scores under
    /// the confidence threshold go to the default handler.
    fn select_handler(&self, classification: &Classification) -> Arc<dyn Handler> {
        let mut best: Option<(&Arc<dyn Handler>, f64)> = None;
        let mut tied = false;

        for handler in &self.handlers {
            let score = handler.can_handle(classification);
            if !score.is_finite() {
                continue;
            }
            match best {
                Some((_, top)) if score < top => {}
                Some((_, top)) if score == top => tied = true,
                _ => {
                    best = Some((handler, score));
                    tied = false;
                }
            }
        }

        match best {
            Some((handler, score))
                if !tied && score > 0.0 && score >= self.config.min_confidence =>
            {
                Arc::clone(handler)
            }
            _ => {
                debug!(
                    intent = %classification.intent,
                    confidence = classification.confidence,
                    tied,
                    "No confident handler, using default"
                );
                Arc::clone(&self.default_handler)
            }
        }
    }
}

/// Builder for [`Router`].
pub struct RouterBuilder {
    registry: Arc<ToolRegistry>,
    storage: Arc<dyn Storage>,
    config: RouterConfig,
    llm: Option<Arc<dyn LanguageModel>>,
    handlers: Vec<Arc<dyn Handler>>,
    default_handler: Option<String>,
}

impl RouterBuilder {
    /// Use a classification / generation capability.
    pub fn llm(mut self, llm: Option<Arc<dyn LanguageModel>>) -> Self {
        self.llm = llm;
        self
    }

    /// Add a handler.
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Name the handler that answers unroutable utterances.
    pub fn default_handler(mut self, name: impl Into<String>) -> Self {
        self.default_handler = Some(name.into());
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    /// [`AppError::Config`] if handler names repeat, the default handler is
    /// missing, or two handlers claim the same entity type.
    pub fn build(self) -> AppResult<Router> {
        let mut entity_owners: HashMap<String, String> = HashMap::new();

        for (i, handler) in self.handlers.iter().enumerate() {
            if self.handlers[..i].iter().any(|h| h.name() == handler.name()) {
                return Err(AppError::Config {
                    message: format!("Handler '{}' is registered twice", handler.name()),
                });
            }
            for entity_type in handler.owned_entity_types() {
                if let Some(owner) = entity_owners.get(*entity_type) {
                    return Err(AppError::Config {
                        message: format!(
                            "Entity type '{}' is claimed by both '{}' and '{}'",
                            entity_type,
                            owner,
                            handler.name()
                        ),
                    });
                }
                entity_owners.insert(entity_type.to_string(), handler.name().to_string());
            }
        }

        let default_name = self.default_handler.ok_or_else(|| AppError::Config {
            message: "No default handler configured".to_string(),
        })?;
        let default_handler = self
            .handlers
            .iter()
            .find(|h| h.name() == default_name)
            .cloned()
            .ok_or_else(|| AppError::Config {
                message: format!("Default handler '{}' is not registered", default_name),
            })?;

        info!(
            handlers = self.handlers.len(),
            default = %default_name,
            tools = self.registry.count(),
            model = self.llm.is_some(),
            "Router ready"
        );

        Ok(Router {
            handlers: self.handlers,
            default_handler,
            registry: self.registry,
            storage: self.storage,
            llm: self.llm,
            keywords: KeywordClassifier::new(),
            entity_owners: Arc::new(entity_owners),
            config: self.config,
            conversations: KeyedLocks::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{
        AnalyticsHandler, FinanceHandler, InventoryHandler, SalesHandler, SystemHandler,
        SYSTEM_HANDLER,
    };
    use crate::llm::ClassificationSource;
    use crate::storage::SqliteStorage;
    use crate::tools::{register_builtin_tools, test_support::seeded_db};

    async fn create_test_router(config: RouterConfig) -> (Router, Arc<dyn Storage>) {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let registry = Arc::new(ToolRegistry::default());
        register_builtin_tools(&registry, seeded_db().await, Arc::clone(&storage)).unwrap();

        let router = Router::builder(registry, Arc::clone(&storage), config)
            .handler(Arc::new(SalesHandler::new()))
            .handler(Arc::new(InventoryHandler::new()))
            .handler(Arc::new(FinanceHandler::new()))
            .handler(Arc::new(AnalyticsHandler::new()))
            .handler(Arc::new(SystemHandler::new()))
            .default_handler(SYSTEM_HANDLER)
            .build()
            .unwrap();
        (router, storage)
    }

    fn classification(intent: &str, confidence: f64) -> Classification {
        Classification::new(intent, confidence, ClassificationSource::Model)
    }

    #[tokio::test]
    async fn test_select_handler_by_confidence() {
        let (router, _) = create_test_router(RouterConfig::default()).await;

        assert_eq!(router.select_handler(&classification("sales", 0.9)).name(), "sales");
        assert_eq!(
            router.select_handler(&classification("analytics", 0.5)).name(),
            "analytics"
        );
        assert_eq!(router.select_handler(&classification("sales", 0.3)).name(), "system");
        assert_eq!(router.select_handler(&classification("unknown", 0.9)).name(), "system");
    }

    #[tokio::test]
    async fn test_build_requires_default_handler() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let registry = Arc::new(ToolRegistry::default());

        let err = Router::builder(Arc::clone(&registry), Arc::clone(&storage), RouterConfig::default())
            .handler(Arc::new(SalesHandler::new()))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("No default handler"));

        let err = Router::builder(registry, storage, RouterConfig::default())
            .handler(Arc::new(SalesHandler::new()))
            .default_handler("system")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("not registered"));
    }

    #[tokio::test]
    async fn test_build_rejects_duplicate_handlers() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let err = Router::builder(Arc::new(ToolRegistry::default()), storage, RouterConfig::default())
            .handler(Arc::new(SalesHandler::new()))
            .handler(Arc::new(SalesHandler::new()))
            .default_handler("sales")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("registered twice"));
    }

    #[tokio::test]
    async fn test_handle_records_both_turns() {
        let (router, storage) = create_test_router(RouterConfig::default()).await;

        let response = router.handle("conv-1", "show customers").await.unwrap();
        assert_eq!(response.handler_used.as_deref(), Some("sales"));
        assert!(response.response_text.contains("Acme Corp"));

        let turns = storage.get_recent_turns("conv-1", 10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "show customers");
        assert_eq!(turns[1].handler.as_deref(), Some("sales"));
        assert_eq!(turns[1].status, TurnStatus::Completed);

        let invocations = storage.get_turn_invocations(&turns[1].id).await.unwrap();
        assert_eq!(invocations.len(), 1);
        assert!(invocations[0].success);
    }

    #[tokio::test]
    async fn test_register_tool_requires_known_handler() {
        let (router, _) = create_test_router(RouterConfig::default()).await;
        let db = seeded_db().await;

        let err = router
            .register_tool(Arc::new(crate::tools::SystemStatus::new(db.clone())), "billing")
            .unwrap_err();
        assert!(matches!(err, AppError::Config { .. }));

        let err = router
            .register_tool(Arc::new(crate::tools::SystemStatus::new(db)), "system")
            .unwrap_err();
        assert!(matches!(err, AppError::Registry(_)));
    }
}
