//! Integration tests for the router
//!
//! Runs full requests against an in-memory state store and a seeded
//! in-memory business database.

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use erp_assistant::config::RouterConfig;
use erp_assistant::database::{
    seed_sample_data, Database, GuardedDatabase, Row, SqlParam, SqliteDatabase,
};
use erp_assistant::error::{
    AppError, LlmError, LlmResult, QueryResult, StorageError, StorageResult, ToolResult,
};
use erp_assistant::handlers::{
    AnalyticsHandler, FinanceHandler, Handler, HandlerContext, HandlerResult, InventoryHandler,
    SalesHandler, SystemHandler, SYSTEM_HANDLER,
};
use erp_assistant::llm::{Classification, ClassificationSource, LanguageModel, Message};
use erp_assistant::router::{Router, FALLBACK_MESSAGE, TIMEOUT_MESSAGE};
use erp_assistant::sql::{classify, StatementClass};
use erp_assistant::storage::{
    Conversation, EntityMemoryRecord, NewTurn, ReportRecord, Role, SqliteStorage, Storage,
    ToolInvocation, Turn, TurnStatus,
};
use erp_assistant::tools::{
    register_builtin_tools, SystemStatus, Tool, ToolDescriptor, ToolRegistry,
};

// ============================================================================
// Test doubles
// ============================================================================

/// Model stub: fixed classification and completion; `None` means unavailable.
struct StubModel {
    classification: Option<Classification>,
    completion: Option<String>,
}

impl StubModel {
    fn unavailable() -> Self {
        Self {
            classification: None,
            completion: None,
        }
    }

    fn classifying(intent: &str, confidence: f64) -> Self {
        Self {
            classification: Some(Classification::new(
                intent,
                confidence,
                ClassificationSource::Model,
            )),
            completion: None,
        }
    }

    fn with_completion(mut self, completion: &str) -> Self {
        self.completion = Some(completion.to_string());
        self
    }
}

fn unavailable() -> LlmError {
    LlmError::ServiceUnavailable {
        message: "stub".to_string(),
        retries: 0,
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn classify(&self, _text: &str, _context: &[Message]) -> LlmResult<Classification> {
        self.classification.clone().ok_or_else(unavailable)
    }

    async fn generate(&self, _prompt: &str) -> LlmResult<String> {
        self.completion.clone().ok_or_else(unavailable)
    }
}

/// Model whose calls never return.
struct HangingModel;

#[async_trait]
impl LanguageModel for HangingModel {
    async fn classify(&self, _text: &str, _context: &[Message]) -> LlmResult<Classification> {
        std::future::pending().await
    }

    async fn generate(&self, _prompt: &str) -> LlmResult<String> {
        std::future::pending().await
    }
}

/// State store whose assistant-turn recording always fails; everything else
/// goes to the wrapped store.
struct FailingRecordStore {
    inner: Arc<SqliteStorage>,
}

#[async_trait]
impl Storage for FailingRecordStore {
    async fn append_turn(&self, conversation_id: &str, turn: NewTurn) -> StorageResult<Turn> {
        self.inner.append_turn(conversation_id, turn).await
    }

    async fn append_turn_with_invocations(
        &self,
        _conversation_id: &str,
        _turn: NewTurn,
        _invocations: &[ToolInvocation],
    ) -> StorageResult<Turn> {
        Err(StorageError::Query {
            message: "disk full".to_string(),
        })
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> StorageResult<Option<Conversation>> {
        self.inner.get_conversation(conversation_id).await
    }

    async fn get_recent_turns(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> StorageResult<Vec<Turn>> {
        self.inner.get_recent_turns(conversation_id, limit).await
    }

    async fn record_tool_invocation(
        &self,
        turn_id: &str,
        invocation: &ToolInvocation,
    ) -> StorageResult<()> {
        self.inner.record_tool_invocation(turn_id, invocation).await
    }

    async fn get_turn_invocations(&self, turn_id: &str) -> StorageResult<Vec<ToolInvocation>> {
        self.inner.get_turn_invocations(turn_id).await
    }

    async fn upsert_entity_memory(
        &self,
        entity_type: &str,
        entity_id: &str,
        key: &str,
        value: &Value,
    ) -> StorageResult<EntityMemoryRecord> {
        self.inner
            .upsert_entity_memory(entity_type, entity_id, key, value)
            .await
    }

    async fn get_entity_memory(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StorageResult<Vec<EntityMemoryRecord>> {
        self.inner.get_entity_memory(entity_type, entity_id).await
    }

    async fn upsert_report(
        &self,
        name: &str,
        spec: &str,
        result_summary: &str,
    ) -> StorageResult<ReportRecord> {
        self.inner.upsert_report(name, spec, result_summary).await
    }

    async fn get_report(&self, name: &str) -> StorageResult<Option<ReportRecord>> {
        self.inner.get_report(name).await
    }
}

/// Business database that records every statement it executes.
struct RecordingDatabase {
    inner: SqliteDatabase,
    executed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Database for RecordingDatabase {
    async fn execute_read(&self, sql: &str, params: &[SqlParam]) -> QueryResult<Vec<Row>> {
        self.executed.lock().push(sql.to_string());
        self.inner.execute_read(sql, params).await
    }

    async fn execute_write(&self, sql: &str, params: &[SqlParam]) -> QueryResult<u64> {
        self.executed.lock().push(sql.to_string());
        self.inner.execute_write(sql, params).await
    }
}

/// Tool that signals when it starts, then sleeps.
struct SlowTool {
    started: Arc<Notify>,
    delay: Duration,
}

#[async_trait]
impl Tool for SlowTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("slow_lookup", "Sleeps before answering")
    }

    async fn invoke(&self, _input: Value) -> ToolResult<Value> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        Ok(json!({"done": true}))
    }
}

/// Handler that answers the `slow` intent by calling `slow_lookup`.
struct SlowHandler;

#[async_trait]
impl Handler for SlowHandler {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Slow lookups"
    }

    fn can_handle(&self, classification: &Classification) -> f64 {
        if classification.is("slow") {
            classification.confidence
        } else {
            0.0
        }
    }

    async fn execute(&self, _utterance: &str, ctx: &HandlerContext) -> ToolResult<HandlerResult> {
        match ctx.invoke_tool("slow_lookup", json!({})).await {
            Ok(_) => Ok(ctx.finish("done")),
            Err(e) => ctx.recover(e),
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    router: Arc<Router>,
    storage: Arc<SqliteStorage>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn store(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }
}

async fn create_test_harness(
    llm: Option<Arc<dyn LanguageModel>>,
    config: RouterConfig,
    extra: Vec<Arc<dyn Handler>>,
) -> Harness {
    let storage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
    let store: Arc<dyn Storage> = storage.clone();

    let business = SqliteDatabase::in_memory().await.unwrap();
    seed_sample_data(business.pool()).await.unwrap();
    let executed = Arc::new(Mutex::new(Vec::new()));
    let db = GuardedDatabase::new(Arc::new(RecordingDatabase {
        inner: business,
        executed: executed.clone(),
    }));

    let registry = Arc::new(ToolRegistry::default());
    register_builtin_tools(&registry, db, store.clone()).unwrap();

    let mut builder = Router::builder(registry, store, config)
        .llm(llm)
        .handler(Arc::new(SalesHandler::new()))
        .handler(Arc::new(InventoryHandler::new()))
        .handler(Arc::new(FinanceHandler::new()))
        .handler(Arc::new(AnalyticsHandler::new()))
        .handler(Arc::new(SystemHandler::new()))
        .default_handler(SYSTEM_HANDLER);
    for handler in extra {
        builder = builder.handler(handler);
    }

    Harness {
        router: Arc::new(builder.build().unwrap()),
        storage,
        executed,
    }
}

async fn create_default_harness() -> Harness {
    create_test_harness(None, RouterConfig::default(), vec![]).await
}

fn model(stub: StubModel) -> Option<Arc<dyn LanguageModel>> {
    Some(Arc::new(stub))
}

// ============================================================================
// Routing scenarios
// ============================================================================

#[cfg(test)]
mod routing_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_show_customers_routes_to_sales() {
        let h = create_default_harness().await;

        let response = h.router.handle("conv-1", "show customers").await.unwrap();

        assert_eq!(response.handler_used.as_deref(), Some("sales"));
        assert!(!response.response_text.is_empty());
        assert_eq!(response.conversation_id, "conv-1");

        let executed = h.executed.lock().clone();
        assert_eq!(executed.len(), 1);
        assert_eq!(classify(&executed[0]), StatementClass::ReadOnly);

        let turns = h.store().get_recent_turns("conv-1", 10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].handler.as_deref(), Some("sales"));

        let invocations = h.store().get_turn_invocations(&turns[1].id).await.unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].tool_name, "list_customers");
        assert!(invocations[0].success);
        assert_eq!(invocations[0].turn_id.as_deref(), Some(turns[1].id.as_str()));
    }

    #[tokio::test]
    async fn test_model_classification_is_used() {
        let h = create_test_harness(
            model(StubModel::classifying("analytics", 0.9)),
            RouterConfig::default(),
            vec![],
        )
        .await;

        let response = h.router.handle("conv-1", "what is our revenue?").await.unwrap();
        assert_eq!(response.handler_used.as_deref(), Some("analytics"));
        assert!(response.response_text.contains("revenue: 1696.99"));
    }

    #[tokio::test]
    async fn test_unavailable_model_falls_back_to_keywords() {
        let h = create_test_harness(
            model(StubModel::unavailable()),
            RouterConfig::default(),
            vec![],
        )
        .await;

        let response = h.router.handle("conv-1", "show customers").await.unwrap();
        assert_eq!(response.handler_used.as_deref(), Some("sales"));
        assert!(response.response_text.contains("Acme Corp"));

        let turns = h.store().get_recent_turns("conv-1", 10).await.unwrap();
        assert_eq!(turns[1].handler.as_deref(), Some("sales"));
        assert_eq!(turns[1].status, TurnStatus::Completed);
    }

    #[tokio::test]
    async fn test_low_confidence_goes_to_default_handler() {
        let h = create_test_harness(
            model(StubModel::classifying("sales", 0.2)),
            RouterConfig::default(),
            vec![],
        )
        .await;

        let response = h.router.handle("conv-1", "show customers").await.unwrap();
        assert_eq!(response.handler_used.as_deref(), Some("system"));
        assert!(response.response_text.contains("System status:"));

        let turns = h.store().get_recent_turns("conv-1", 10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].handler.as_deref(), Some("system"));
    }

    #[tokio::test]
    async fn test_inventory_and_finance_requests_route_by_keywords() {
        let h = create_default_harness().await;

        let response = h.router.handle("conv-1", "any low stock alerts?").await.unwrap();
        assert_eq!(response.handler_used.as_deref(), Some("inventory"));
        assert!(response.response_text.contains("Tool Max"));

        let response = h.router.handle("conv-1", "show pending invoices").await.unwrap();
        assert_eq!(response.handler_used.as_deref(), Some("finance"));
        assert!(response.response_text.contains("INV-1002"));

        let turns = h.store().get_recent_turns("conv-1", 10).await.unwrap();
        let invocations = h.store().get_turn_invocations(&turns[3].id).await.unwrap();
        assert_eq!(invocations[0].tool_name, "list_invoices");
    }

    #[tokio::test]
    async fn test_keyword_tie_goes_to_default_handler() {
        let h = create_default_harness().await;

        let response = h.router.handle("conv-1", "revenue per order").await.unwrap();
        assert_eq!(response.handler_used.as_deref(), Some("system"));
    }

    #[tokio::test]
    async fn test_history_is_kept_across_requests() {
        let h = create_default_harness().await;

        h.router.handle("conv-1", "show customers").await.unwrap();
        h.router.handle("conv-1", "list leads").await.unwrap();

        let turns = h.store().get_recent_turns("conv-1", 10).await.unwrap();
        let seqs: Vec<i64> = turns.iter().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(turns[2].content, "list leads");

        let conversation = h.store().get_conversation("conv-1").await.unwrap().unwrap();
        assert_eq!(conversation.turn_count, 4);
    }

    #[tokio::test]
    async fn test_entity_memory_spans_conversations() {
        let h = create_default_harness().await;

        h.router.handle("conv-a", "find customer acme").await.unwrap();
        let response = h.router.handle("conv-b", "find customer acme").await.unwrap();

        assert!(response
            .response_text
            .contains("last discussed: find customer acme"));
    }

    #[tokio::test]
    async fn test_report_run_twice_through_router() {
        let h = create_default_harness().await;

        h.router
            .handle("conv-1", "run the monthly-revenue report")
            .await
            .unwrap();
        let first = h.store().get_report("monthly-revenue").await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(2)).await;
        h.router
            .handle("conv-1", "run the monthly-revenue report")
            .await
            .unwrap();
        let second = h.store().get_report("monthly-revenue").await.unwrap().unwrap();

        assert_eq!(first.run_count, 1);
        assert_eq!(second.run_count, 2);
        assert!(second.last_run > first.last_run);
    }
}

// ============================================================================
// Failure handling
// ============================================================================

#[cfg(test)]
mod failure_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_unsafe_generated_sql_is_refused_and_audited() {
        let h = create_test_harness(
            model(StubModel::classifying("analytics", 0.9).with_completion("DROP TABLE customers")),
            RouterConfig::default(),
            vec![],
        )
        .await;

        let response = h
            .router
            .handle("conv-1", "tidy up the tables please")
            .await
            .unwrap();

        assert_eq!(response.handler_used.as_deref(), Some("analytics"));
        assert!(response.response_text.contains("read-only"));
        assert!(!response.response_text.to_lowercase().contains("drop"));
        assert!(h.executed.lock().is_empty());

        let turns = h.store().get_recent_turns("conv-1", 10).await.unwrap();
        assert_eq!(turns[1].status, TurnStatus::Failed);

        let invocations = h.store().get_turn_invocations(&turns[1].id).await.unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].tool_name, "run_sql_query");
        assert!(!invocations[0].success);
        assert!(invocations[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("unsafe_query"));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_returned() {
        let h = create_default_harness().await;
        h.storage.close().await;

        let err = h.router.handle("conv-1", "show customers").await.unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_failed_recording_stores_no_assistant_turn() {
        let sqlite = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let store: Arc<dyn Storage> = Arc::new(FailingRecordStore {
            inner: sqlite.clone(),
        });

        let business = SqliteDatabase::in_memory().await.unwrap();
        seed_sample_data(business.pool()).await.unwrap();
        let registry = Arc::new(ToolRegistry::default());
        register_builtin_tools(
            &registry,
            GuardedDatabase::new(Arc::new(business)),
            store.clone(),
        )
        .unwrap();

        let router = Router::builder(registry, store, RouterConfig::default())
            .handler(Arc::new(SalesHandler::new()))
            .handler(Arc::new(SystemHandler::new()))
            .default_handler(SYSTEM_HANDLER)
            .build()
            .unwrap();

        let err = router.handle("conv-1", "show customers").await.unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));

        let turns = sqlite.get_recent_turns("conv-1", 10).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::User);
        assert!(sqlite
            .get_turn_invocations(&turns[0].id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_slow_classification_falls_back_to_keywords() {
        let config = RouterConfig {
            request_timeout_ms: 600,
            model_timeout_ms: 200,
            ..RouterConfig::default()
        };
        let h = create_test_harness(Some(Arc::new(HangingModel)), config, vec![]).await;

        let response = h.router.handle("conv-1", "show customers").await.unwrap();

        assert_eq!(response.handler_used.as_deref(), Some("sales"));
        assert!(response.response_text.contains("Acme Corp"));
        assert_ne!(response.response_text, TIMEOUT_MESSAGE);

        let turns = h.store().get_recent_turns("conv-1", 10).await.unwrap();
        assert_eq!(turns[1].status, TurnStatus::Completed);
    }

    #[tokio::test]
    async fn test_timeout_records_cancelled_turn() {
        let started = Arc::new(Notify::new());
        let config = RouterConfig {
            request_timeout_ms: 100,
            ..RouterConfig::default()
        };
        let h = create_test_harness(
            model(StubModel::classifying("slow", 0.9)),
            config,
            vec![Arc::new(SlowHandler)],
        )
        .await;
        h.router
            .register_tool(
                Arc::new(SlowTool {
                    started: started.clone(),
                    delay: Duration::from_secs(5),
                }),
                "slow",
            )
            .unwrap();

        let response = h.router.handle("conv-1", "take your time").await.unwrap();
        assert_eq!(response.response_text, TIMEOUT_MESSAGE);
        assert_eq!(response.handler_used.as_deref(), Some("slow"));

        let turns = h.store().get_recent_turns("conv-1", 10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].status, TurnStatus::Cancelled);
        assert_eq!(turns[1].handler.as_deref(), Some("slow"));

        let invocations = h.store().get_turn_invocations(&turns[1].id).await.unwrap();
        assert_eq!(invocations.len(), 1);
        assert!(!invocations[0].success);
        assert_eq!(invocations[0].error.as_deref(), Some("did not complete"));
    }

    #[tokio::test]
    async fn test_dropped_request_still_records_attempted_tool_call() {
        let started = Arc::new(Notify::new());
        let h = create_test_harness(
            model(StubModel::classifying("slow", 0.9)),
            RouterConfig::default(),
            vec![Arc::new(SlowHandler)],
        )
        .await;
        h.router
            .register_tool(
                Arc::new(SlowTool {
                    started: started.clone(),
                    delay: Duration::from_secs(30),
                }),
                "slow",
            )
            .unwrap();

        let router = h.router.clone();
        let task = tokio::spawn(async move { router.handle("conv-1", "take your time").await });
        started.notified().await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let store = h.store();
        let mut turns = Vec::new();
        for _ in 0..100 {
            turns = store.get_recent_turns("conv-1", 10).await.unwrap();
            if turns.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].status, TurnStatus::Cancelled);
        assert_eq!(turns[1].handler.as_deref(), Some("slow"));

        let invocations = store.get_turn_invocations(&turns[1].id).await.unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].tool_name, "slow_lookup");
        assert!(!invocations[0].success);
    }

    #[tokio::test]
    async fn test_failing_handler_gets_fallback_message() {
        struct BrokenHandler;

        #[async_trait]
        impl Handler for BrokenHandler {
            fn name(&self) -> &str {
                "broken"
            }
            fn description(&self) -> &str {
                "Always fails"
            }
            fn can_handle(&self, classification: &Classification) -> f64 {
                if classification.is("broken") {
                    1.0
                } else {
                    0.0
                }
            }
            async fn execute(
                &self,
                _utterance: &str,
                _ctx: &HandlerContext,
            ) -> ToolResult<HandlerResult> {
                Err(erp_assistant::error::ToolError::Failed {
                    message: "internal detail".to_string(),
                })
            }
        }

        let h = create_test_harness(
            model(StubModel::classifying("broken", 1.0)),
            RouterConfig::default(),
            vec![Arc::new(BrokenHandler)],
        )
        .await;

        let response = h.router.handle("conv-1", "anything").await.unwrap();
        assert_eq!(response.response_text, FALLBACK_MESSAGE);

        let turns = h.store().get_recent_turns("conv-1", 10).await.unwrap();
        assert_eq!(turns[1].status, TurnStatus::Failed);
        assert_eq!(turns[1].handler.as_deref(), Some("broken"));
    }

    #[tokio::test]
    async fn test_duplicate_tool_registration_is_rejected() {
        let h = create_default_harness().await;
        let business = SqliteDatabase::in_memory().await.unwrap();
        let db = GuardedDatabase::new(Arc::new(business));

        let err = h
            .router
            .register_tool(Arc::new(SystemStatus::new(db)), "sales")
            .unwrap_err();
        assert!(matches!(err, AppError::Registry(_)));

        let descriptor = h.router.registry().lookup("system_status").unwrap();
        assert_eq!(descriptor.owner, "system");
    }
}

// ============================================================================
// Concurrency
// ============================================================================

#[cfg(test)]
mod concurrency_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_on_one_conversation() {
        let h = create_default_harness().await;

        let mut tasks = Vec::new();
        for i in 0..8 {
            let router = h.router.clone();
            tasks.push(tokio::spawn(async move {
                router
                    .handle("shared", &format!("show customers {}", i))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let turns = h.store().get_recent_turns("shared", 100).await.unwrap();
        assert_eq!(turns.len(), 16);
        for (i, turn) in turns.iter().enumerate() {
            assert_eq!(turn.seq, i as i64 + 1);
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(turn.role, expected, "turn {}", turn.seq);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_conversations_are_independent() {
        let h = create_default_harness().await;

        let mut tasks = Vec::new();
        for i in 0..6 {
            let router = h.router.clone();
            tasks.push(tokio::spawn(async move {
                router.handle(&format!("conv-{}", i), "system status").await
            }));
        }
        for task in tasks {
            let response = task.await.unwrap().unwrap();
            assert_eq!(response.handler_used.as_deref(), Some("system"));
        }

        for i in 0..6 {
            let turns = h
                .store()
                .get_recent_turns(&format!("conv-{}", i), 10)
                .await
                .unwrap();
            let seqs: Vec<i64> = turns.iter().map(|t| t.seq).collect();
            assert_eq!(seqs, vec![1, 2]);
        }
    }
}
