use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::{first_row, rows_output, str_param, ParamSpec, Tool, ToolDescriptor};
use crate::database::{GuardedDatabase, Row};
use crate::error::{ToolError, ToolResult};
use crate::storage::Storage;

/// Rows returned by an ad-hoc query before truncation.
const MAX_QUERY_ROWS: usize = 200;

/// A named, re-runnable report.
#[derive(Debug, Clone, Copy)]
pub struct ReportDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub sql: &'static str,
}

/// Built-in report catalog.
pub const REPORTS: &[ReportDefinition] = &[
    ReportDefinition {
        name: "monthly-revenue",
        description: "Revenue and order count per month",
        sql: r#"SELECT substr(created_at, 1, 7) AS month,
       COUNT(*) AS orders,
       ROUND(SUM(total), 2) AS revenue
FROM orders
WHERE status != 'cancelled'
GROUP BY month
ORDER BY month"#,
    },
    ReportDefinition {
        name: "top-customers",
        description: "Customers ranked by revenue",
        sql: r#"SELECT c.name AS customer,
       COUNT(o.id) AS orders,
       ROUND(SUM(o.total), 2) AS revenue
FROM customers c
JOIN orders o ON o.customer_id = c.id
WHERE o.status != 'cancelled'
GROUP BY c.id, c.name
ORDER BY revenue DESC
LIMIT 10"#,
    },
    ReportDefinition {
        name: "order-status",
        description: "Order count per status",
        sql: r#"SELECT status, COUNT(*) AS orders
FROM orders
GROUP BY status
ORDER BY orders DESC, status"#,
    },
];

/// Find a catalog report by name.
pub fn find_report(name: &str) -> Option<&'static ReportDefinition> {
    REPORTS.iter().find(|r| r.name == name)
}

/// One-line digest of a result set, stored as the report's last result.
pub fn summarize_rows(rows: &[Row]) -> String {
    match rows.first() {
        None => "0 rows".to_string(),
        Some(first) => {
            let fields: Vec<String> = first
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => format!("{}={}", k, s),
                    other => format!("{}={}", k, other),
                })
                .collect();
            format!("{} rows; first: {}", rows.len(), fields.join(", "))
        }
    }
}

/// Read-only ad-hoc SQL.
pub struct RunSqlQuery {
    db: GuardedDatabase,
}

impl RunSqlQuery {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for RunSqlQuery {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "run_sql_query",
            "Run a read-only SQL query against the business database",
        )
        .with_param(
            "sql",
            ParamSpec::string("A single SELECT statement")
                .required()
                .min_length(1),
        )
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let sql = str_param(&input, "sql")?;
        let mut rows = self.db.read(sql, &[]).await?;

        let truncated = rows.len() > MAX_QUERY_ROWS;
        rows.truncate(MAX_QUERY_ROWS);

        let mut output = rows_output(rows);
        output["truncated"] = json!(truncated);
        Ok(output)
    }
}

/// Run a catalog report and record the run.
pub struct RunReport {
    db: GuardedDatabase,
    storage: Arc<dyn Storage>,
}

impl RunReport {
    pub fn new(db: GuardedDatabase, storage: Arc<dyn Storage>) -> Self {
        Self { db, storage }
    }
}

#[async_trait]
impl Tool for RunReport {
    fn descriptor(&self) -> ToolDescriptor {
        let names: Vec<&str> = REPORTS.iter().map(|r| r.name).collect();
        ToolDescriptor::new("run_report", "Run a saved report and track its usage")
            .with_param("name", ParamSpec::string("Report name").required().one_of(&names))
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let name = str_param(&input, "name")?;
        let report = find_report(name).ok_or_else(|| ToolError::Failed {
            message: format!("unknown report '{}'", name),
        })?;

        let rows = self.db.read(report.sql, &[]).await?;
        let summary = summarize_rows(&rows);

        let record = self
            .storage
            .upsert_report(report.name, report.sql, &summary)
            .await?;

        info!(
            report = %record.name,
            run_count = record.run_count,
            "Report run recorded"
        );

        Ok(json!({
            "report": record.name,
            "description": report.description,
            "run_count": record.run_count,
            "last_run": record.last_run.to_rfc3339(),
            "count": rows.len(),
            "rows": rows,
        }))
    }
}

/// Revenue, order count and average order value.
pub struct RevenueSummary {
    db: GuardedDatabase,
}

impl RevenueSummary {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for RevenueSummary {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("revenue_summary", "Total revenue and average order value")
    }

    async fn invoke(&self, _input: Value) -> ToolResult<Value> {
        let rows = self
            .db
            .read(
                r#"
                SELECT COUNT(*) AS orders,
                       ROUND(COALESCE(SUM(total), 0.0), 2) AS revenue,
                       ROUND(COALESCE(AVG(total), 0.0), 2) AS average_order
                FROM orders
                WHERE status != 'cancelled'
                "#,
                &[],
            )
            .await?;
        Ok(first_row(rows))
    }
}
