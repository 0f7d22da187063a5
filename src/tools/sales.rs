use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    first_row, int_param, limit_param, rows_output, str_param, ParamSpec, Tool, ToolDescriptor,
};
use crate::database::{GuardedDatabase, SqlParam};
use crate::error::{ToolError, ToolResult};

/// Lead pipeline states.
pub const LEAD_STATUSES: &[&str] = &["new", "contacted", "qualified", "converted", "lost"];

/// Order states used by the business database.
pub const ORDER_STATUSES: &[&str] = &["pending", "paid", "shipped", "cancelled"];

/// Escape LIKE wildcards so user text matches literally.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Customers with their order count and total spend.
pub struct ListCustomers {
    db: GuardedDatabase,
}

impl ListCustomers {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for ListCustomers {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "list_customers",
            "List customers with order count and total spent",
        )
        .with_param("limit", limit_param())
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let rows = self
            .db
            .read(
                r#"
                SELECT c.id, c.name, c.email,
                       COUNT(o.id) AS order_count,
                       ROUND(COALESCE(SUM(o.total), 0.0), 2) AS total_spent
                FROM customers c
                LEFT JOIN orders o ON o.customer_id = c.id
                GROUP BY c.id, c.name, c.email
                ORDER BY c.name
                LIMIT ?
                "#,
                &[int_param(&input, "limit")?.into()],
            )
            .await?;
        Ok(rows_output(rows))
    }
}

/// Customer lookup by name or email fragment.
pub struct SearchCustomers {
    db: GuardedDatabase,
}

impl SearchCustomers {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for SearchCustomers {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("search_customers", "Search customers by name or email")
            .with_param(
                "query",
                ParamSpec::string("Name or email fragment")
                    .required()
                    .min_length(3),
            )
            .with_param("limit", limit_param())
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let pattern = like_pattern(str_param(&input, "query")?);
        let rows = self
            .db
            .read(
                r#"
                SELECT id, name, email, created_at
                FROM customers
                WHERE name LIKE ? ESCAPE '\' OR email LIKE ? ESCAPE '\'
                ORDER BY name
                LIMIT ?
                "#,
                &[
                    pattern.clone().into(),
                    pattern.into(),
                    int_param(&input, "limit")?.into(),
                ],
            )
            .await?;
        Ok(rows_output(rows))
    }
}

/// Headline counts for the customer base.
pub struct CustomerSummary {
    db: GuardedDatabase,
}

impl CustomerSummary {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for CustomerSummary {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "customer_summary",
            "Customer, order and open-lead totals",
        )
    }

    async fn invoke(&self, _input: Value) -> ToolResult<Value> {
        let rows = self
            .db
            .read(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM customers) AS customers,
                    (SELECT COUNT(*) FROM orders) AS orders,
                    (SELECT ROUND(COALESCE(SUM(total), 0.0), 2) FROM orders
                        WHERE status != 'cancelled') AS revenue,
                    (SELECT COUNT(*) FROM leads
                        WHERE status NOT IN ('converted', 'lost')) AS open_leads
                "#,
                &[],
            )
            .await?;
        Ok(first_row(rows))
    }
}

/// Leads, best-scored first.
pub struct ListLeads {
    db: GuardedDatabase,
}

impl ListLeads {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for ListLeads {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("list_leads", "List sales leads, optionally by status")
            .with_param(
                "status",
                ParamSpec::string("Only leads in this status").one_of(LEAD_STATUSES),
            )
            .with_param("limit", limit_param())
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let limit = int_param(&input, "limit")?;
        let (filter, mut params): (&str, Vec<SqlParam>) = match input.get("status").and_then(Value::as_str) {
            Some(status) => ("WHERE status = ?", vec![status.into()]),
            None => ("", Vec::new()),
        };
        params.push(limit.into());

        let sql = format!(
            r#"
            SELECT id, customer_name, contact_email, message, score, status, created_at
            FROM leads
            {}
            ORDER BY score DESC, created_at DESC
            LIMIT ?
            "#,
            filter
        );

        let rows = self.db.read(&sql, &params).await?;
        Ok(rows_output(rows))
    }
}

/// Pipeline totals and the share of leads converted.
pub struct LeadSummary {
    db: GuardedDatabase,
}

impl LeadSummary {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for LeadSummary {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "lead_summary",
            "Lead totals, average score and conversion rate",
        )
    }

    async fn invoke(&self, _input: Value) -> ToolResult<Value> {
        // conversion_rate is a percentage of all leads.
        let rows = self
            .db
            .read(
                r#"
                SELECT
                    COUNT(*) AS total_leads,
                    COUNT(CASE WHEN status = 'new' THEN 1 END) AS new_leads,
                    COUNT(CASE WHEN status = 'converted' THEN 1 END) AS converted,
                    ROUND(COALESCE(AVG(score), 0.0), 2) AS average_score,
                    ROUND(CASE WHEN COUNT(*) = 0 THEN 0.0
                        ELSE 100.0 * COUNT(CASE WHEN status = 'converted' THEN 1 END) / COUNT(*)
                    END, 1) AS conversion_rate
                FROM leads
                "#,
                &[],
            )
            .await?;
        Ok(first_row(rows))
    }
}

/// Orders, newest first.
pub struct ListOrders {
    db: GuardedDatabase,
}

impl ListOrders {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for ListOrders {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("list_orders", "List recent orders, optionally by status")
            .with_param(
                "status",
                ParamSpec::string("Only orders in this status").one_of(ORDER_STATUSES),
            )
            .with_param("limit", limit_param())
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let limit = int_param(&input, "limit")?;
        let (filter, mut params): (&str, Vec<SqlParam>) = match input.get("status").and_then(Value::as_str) {
            Some(status) => ("WHERE o.status = ?", vec![status.into()]),
            None => ("", Vec::new()),
        };
        params.push(limit.into());

        let sql = format!(
            r#"
            SELECT o.id, c.name AS customer, o.total, o.status, o.created_at
            FROM orders o
            JOIN customers c ON c.id = o.customer_id
            {}
            ORDER BY o.created_at DESC
            LIMIT ?
            "#,
            filter
        );

        let rows = self.db.read(&sql, &params).await?;
        Ok(rows_output(rows))
    }
}

/// Order counts and totals per status.
pub struct OrderSummary {
    db: GuardedDatabase,
}

impl OrderSummary {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for OrderSummary {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("order_summary", "Order count and value per status")
    }

    async fn invoke(&self, _input: Value) -> ToolResult<Value> {
        let rows = self
            .db
            .read(
                r#"
                SELECT status, COUNT(*) AS orders, ROUND(SUM(total), 2) AS total
                FROM orders
                GROUP BY status
                ORDER BY orders DESC, status
                "#,
                &[],
            )
            .await?;
        Ok(rows_output(rows))
    }
}

/// Move a lead through the pipeline. The only write-path sales tool.
pub struct UpdateLeadStatus {
    db: GuardedDatabase,
}

impl UpdateLeadStatus {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for UpdateLeadStatus {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("update_lead_status", "Set the pipeline status of a lead")
            .with_param("lead_id", ParamSpec::integer("Lead id").required().minimum(1))
            .with_param(
                "status",
                ParamSpec::string("New status")
                    .required()
                    .one_of(LEAD_STATUSES),
            )
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let lead_id = int_param(&input, "lead_id")?;
        let status = str_param(&input, "status")?;

        let updated = self
            .db
            .write(
                "UPDATE leads SET status = ? WHERE id = ?",
                &[status.into(), lead_id.into()],
            )
            .await?;

        if updated == 0 {
            return Err(ToolError::Failed {
                message: format!("lead {} not found", lead_id),
            });
        }

        Ok(json!({
            "lead_id": lead_id,
            "status": status,
            "updated": updated,
        }))
    }
}
