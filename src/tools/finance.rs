use async_trait::async_trait;
use serde_json::Value;

use super::{first_row, int_param, limit_param, rows_output, ParamSpec, Tool, ToolDescriptor};
use crate::database::{GuardedDatabase, SqlParam};
use crate::error::ToolResult;

/// Invoice states used by the business database.
pub const INVOICE_STATUSES: &[&str] = &["pending", "paid", "overdue", "void"];

/// Invoices with their order's customer, newest first.
pub struct ListInvoices {
    db: GuardedDatabase,
}

impl ListInvoices {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for ListInvoices {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("list_invoices", "List invoices, optionally by status")
            .with_param(
                "status",
                ParamSpec::string("Only invoices in this status").one_of(INVOICE_STATUSES),
            )
            .with_param("limit", limit_param())
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let limit = int_param(&input, "limit")?;
        let (filter, mut params): (&str, Vec<SqlParam>) = match input.get("status").and_then(Value::as_str) {
            Some(status) => ("WHERE v.status = ?", vec![status.into()]),
            None => ("", Vec::new()),
        };
        params.push(limit.into());

        let sql = format!(
            r#"
            SELECT v.invoice_number, c.name AS customer, v.total, v.status, v.issued_at,
                   ROUND(COALESCE((SELECT SUM(p.amount) FROM payments p
                       WHERE p.invoice_id = v.id), 0.0), 2) AS paid
            FROM invoices v
            JOIN orders o ON o.id = v.order_id
            JOIN customers c ON c.id = o.customer_id
            {}
            ORDER BY v.issued_at DESC
            LIMIT ?
            "#,
            filter
        );

        let rows = self.db.read(&sql, &params).await?;
        Ok(rows_output(rows))
    }
}

/// Invoice counts and value per state.
pub struct InvoiceSummary {
    db: GuardedDatabase,
}

impl InvoiceSummary {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for InvoiceSummary {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("invoice_summary", "Invoice count and value by status")
    }

    async fn invoke(&self, _input: Value) -> ToolResult<Value> {
        let rows = self
            .db
            .read(
                r#"
                SELECT
                    COUNT(*) AS invoices,
                    ROUND(COALESCE(SUM(total), 0.0), 2) AS total_amount,
                    COUNT(CASE WHEN status = 'paid' THEN 1 END) AS paid,
                    COUNT(CASE WHEN status = 'pending' THEN 1 END) AS pending,
                    COUNT(CASE WHEN status = 'overdue' THEN 1 END) AS overdue
                FROM invoices
                WHERE status != 'void'
                "#,
                &[],
            )
            .await?;
        Ok(first_row(rows))
    }
}

/// Money received against money invoiced.
pub struct PaymentSummary {
    db: GuardedDatabase,
}

impl PaymentSummary {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for PaymentSummary {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "payment_summary",
            "Payments received and the balance still outstanding",
        )
    }

    async fn invoke(&self, _input: Value) -> ToolResult<Value> {
        let rows = self
            .db
            .read(
                r#"
                WITH invoiced AS (
                    SELECT COALESCE(SUM(total), 0.0) AS amount
                    FROM invoices WHERE status != 'void'
                ),
                received AS (
                    SELECT COUNT(*) AS payments, COALESCE(SUM(amount), 0.0) AS amount
                    FROM payments
                )
                SELECT
                    received.payments AS payments,
                    ROUND(received.amount, 2) AS received,
                    ROUND(invoiced.amount, 2) AS invoiced,
                    ROUND(invoiced.amount - received.amount, 2) AS outstanding
                FROM invoiced, received
                "#,
                &[],
            )
            .await?;
        Ok(first_row(rows))
    }
}

/// Invoiced revenue split into collected and still due.
pub struct InvoiceRevenue {
    db: GuardedDatabase,
}

impl InvoiceRevenue {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for InvoiceRevenue {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "invoice_revenue",
            "Invoiced revenue split into paid and pending",
        )
    }

    async fn invoke(&self, _input: Value) -> ToolResult<Value> {
        let rows = self
            .db
            .read(
                r#"
                SELECT
                    ROUND(COALESCE(SUM(CASE WHEN status = 'paid' THEN total END), 0.0), 2)
                        AS paid_revenue,
                    ROUND(COALESCE(SUM(CASE WHEN status IN ('pending', 'overdue')
                        THEN total END), 0.0), 2) AS pending_revenue,
                    ROUND(COALESCE(SUM(total), 0.0), 2) AS total_invoiced
                FROM invoices
                WHERE status != 'void'
                "#,
                &[],
            )
            .await?;
        Ok(first_row(rows))
    }
}
