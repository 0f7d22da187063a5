//! End-to-end SQL safety tests
//!
//! Tools are registered over a mocked business database so the tests can
//! assert that refused statements never reach execution.

use async_trait::async_trait;
use mockall::mock;
use serde_json::json;
use std::sync::Arc;

use erp_assistant::database::{Database, GuardedDatabase, Row, SqlParam};
use erp_assistant::error::{QueryError, QueryResult};
use erp_assistant::handlers::user_message;
use erp_assistant::sql::{analyze, classify, StatementClass};
use erp_assistant::storage::{SqliteStorage, Storage};
use erp_assistant::tools::{register_builtin_tools, ToolRegistry};

mock! {
    pub BusinessDb {}

    #[async_trait]
    impl Database for BusinessDb {
        async fn execute_read(&self, sql: &str, params: &[SqlParam]) -> QueryResult<Vec<Row>>;
        async fn execute_write(&self, sql: &str, params: &[SqlParam]) -> QueryResult<u64>;
    }
}

/// Register the built-in tools over `db`
async fn create_test_registry(db: MockBusinessDb) -> ToolRegistry {
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
    let registry = ToolRegistry::default();
    register_builtin_tools(&registry, GuardedDatabase::new(Arc::new(db)), storage).unwrap();
    registry
}

#[cfg(test)]
mod refusal_tests {
    use super::*;

    #[tokio::test]
    async fn test_ad_hoc_sql_refuses_without_executing() {
        let mut db = MockBusinessDb::new();
        db.expect_execute_read().never();
        db.expect_execute_write().never();
        let registry = create_test_registry(db).await;

        for sql in [
            "DROP TABLE customers",
            "DELETE FROM orders",
            "UPDATE leads SET status = 'won'",
            "SELECT 1; DROP TABLE customers",
            "/* harmless */ ATTACH DATABASE 'other.db' AS o",
            "PRAGMA writable_schema = ON",
        ] {
            let err = registry
                .invoke("run_sql_query", "analytics", json!({ "sql": sql }))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "unsafe_query", "{}", sql);
            assert_eq!(
                user_message(&err),
                "I can only run safe, read-only queries, so I didn't run that one."
            );
        }
    }

    #[tokio::test]
    async fn test_select_reaches_read_path_only() {
        let mut db = MockBusinessDb::new();
        db.expect_execute_read()
            .withf(|sql, _| sql.trim() == "SELECT name FROM customers")
            .times(1)
            .returning(|_, _| {
                let mut row = Row::new();
                row.insert("name".to_string(), json!("Acme Corp"));
                Ok(vec![row])
            });
        db.expect_execute_write().never();
        let registry = create_test_registry(db).await;

        let output = registry
            .invoke(
                "run_sql_query",
                "analytics",
                json!({ "sql": "SELECT name FROM customers" }),
            )
            .await
            .unwrap();

        assert_eq!(output["rows"][0]["name"], "Acme Corp");
        assert_eq!(output["truncated"], false);
    }

    #[tokio::test]
    async fn test_lead_update_uses_write_path() {
        let mut db = MockBusinessDb::new();
        db.expect_execute_read().never();
        db.expect_execute_write()
            .withf(|sql, params| {
                sql.starts_with("UPDATE leads")
                    && params.to_vec() == vec![SqlParam::from("qualified"), SqlParam::from(2_i64)]
            })
            .times(1)
            .returning(|_, _| Ok(1));
        let registry = create_test_registry(db).await;

        let output = registry
            .invoke(
                "update_lead_status",
                "sales",
                json!({ "lead_id": 2, "status": "qualified" }),
            )
            .await
            .unwrap();
        assert_eq!(output["updated"], 1);
    }

    #[tokio::test]
    async fn test_invalid_input_never_executes() {
        let mut db = MockBusinessDb::new();
        db.expect_execute_read().never();
        db.expect_execute_write().never();
        let registry = create_test_registry(db).await;

        let err = registry
            .invoke(
                "update_lead_status",
                "sales",
                json!({ "lead_id": 2, "status": "bribed" }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");

        let err = registry
            .invoke("run_sql_query", "analytics", json!({ "sql": "" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[tokio::test]
    async fn test_database_errors_are_not_shown_to_users() {
        let mut db = MockBusinessDb::new();
        db.expect_execute_read().returning(|_, _| {
            Err(QueryError::Execution {
                message: "disk I/O error at /var/lib/erp/secret.db".to_string(),
            })
        });
        let registry = create_test_registry(db).await;

        let err = registry
            .invoke("list_customers", "sales", json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "query_execution");
        let text = user_message(&err);
        assert!(!text.contains("secret"));
        assert!(!text.contains("disk"));
    }
}

#[cfg(test)]
mod classification_tests {
    use super::*;

    #[test]
    fn test_keywords_inside_literals_and_comments_are_ignored() {
        assert_eq!(
            classify("SELECT 'DROP TABLE customers' AS note"),
            StatementClass::ReadOnly
        );
        assert_eq!(
            classify("-- DELETE FROM orders\nSELECT id FROM orders"),
            StatementClass::ReadOnly
        );
        assert_eq!(classify("SELECT 1;"), StatementClass::ReadOnly);
    }

    #[test]
    fn test_rejections_carry_a_reason() {
        let verdict = analyze("SELECT load_extension('evil')");
        assert_eq!(verdict.class, StatementClass::Rejected);
        assert!(verdict.reason.is_some());

        let verdict = analyze("SELECT 'unterminated");
        assert_eq!(verdict.class, StatementClass::Rejected);
    }
}
