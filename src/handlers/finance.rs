//! Finance handler: invoices, payments and collected revenue.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    domain_score, mentions, mentions_any, render_fields, render_rows, words, Handler,
    HandlerContext, HandlerResult, FINANCE_HANDLER,
};
use crate::error::ToolResult;
use crate::llm::Classification;
use crate::tools::INVOICE_STATUSES;

const HELP: &str = "I can help with finance. Try:\n\
- \"show pending invoices\" or \"invoice summary\"\n\
- \"payment summary\" or \"what is outstanding?\"\n\
- \"invoiced revenue\"";

/// Answers invoice and payment questions.
#[derive(Debug, Default)]
pub struct FinanceHandler;

impl FinanceHandler {
    pub fn new() -> Self {
        Self
    }

    async fn respond(&self, utterance: &str, ctx: &HandlerContext) -> ToolResult<String> {
        let words = words(utterance);

        if mentions_any(&words, &["payment", "paid", "outstanding", "owed", "balance", "received"])
            && !mentions(&words, "invoice")
        {
            let output = ctx.invoke_tool("payment_summary", json!({})).await?;
            return Ok(format!("Payments:\n{}", render_fields(&output)));
        }

        if mentions(&words, "invoice") {
            if mentions_any(&words, &["summary", "overview", "total", "breakdown"]) {
                let output = ctx.invoke_tool("invoice_summary", json!({})).await?;
                return Ok(format!("Invoices:\n{}", render_fields(&output)));
            }

            let mut input = json!({});
            if let Some(status) = words
                .iter()
                .rev()
                .find_map(|w| INVOICE_STATUSES.iter().find(|s| **s == w.as_str()))
            {
                input["status"] = json!(status);
            }
            let output = ctx.invoke_tool("list_invoices", input).await?;
            return Ok(format!(
                "Invoices ({}):\n{}",
                count(&output),
                render_rows(
                    &output,
                    &["invoice_number", "customer", "total", "paid", "status", "issued_at"]
                )
            ));
        }

        if mentions_any(&words, &["revenue", "money", "income", "billing", "finance"]) {
            let output = ctx.invoke_tool("invoice_revenue", json!({})).await?;
            return Ok(format!("Invoiced revenue:\n{}", render_fields(&output)));
        }

        Ok(HELP.to_string())
    }
}

#[async_trait]
impl Handler for FinanceHandler {
    fn name(&self) -> &str {
        FINANCE_HANDLER
    }

    fn description(&self) -> &str {
        "Invoices, payments and collected revenue"
    }

    fn can_handle(&self, classification: &Classification) -> f64 {
        domain_score(classification, FINANCE_HANDLER)
    }

    async fn execute(&self, utterance: &str, ctx: &HandlerContext) -> ToolResult<HandlerResult> {
        match self.respond(utterance, ctx).await {
            Ok(text) => Ok(ctx.finish(text)),
            Err(e) => ctx.recover(e),
        }
    }
}

fn count(output: &Value) -> u64 {
    output.get("count").and_then(Value::as_u64).unwrap_or(0)
}
