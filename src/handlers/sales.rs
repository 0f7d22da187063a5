//! Sales handler: customers, leads and orders.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    display_value, domain_score, first_number, mentions, mentions_any, render_fields, render_rows,
    words, Handler, HandlerContext, HandlerResult, SALES_HANDLER,
};
use crate::error::ToolResult;
use crate::llm::Classification;
use crate::tools::{LEAD_STATUSES, ORDER_STATUSES};

/// Entity type whose memory the sales handler owns.
pub const CUSTOMER_ENTITY: &str = "customer";

const HELP: &str = "I can help with sales data. Try:\n\
- \"show customers\"\n\
- \"search customers for acme\"\n\
- \"list qualified leads\" or \"lead summary\"\n\
- \"show pending orders\" or \"order summary\"\n\
- \"mark lead 2 as contacted\"";

/// Words after which a search term starts.
const SEARCH_MARKERS: &[&str] = &[
    "search", "find", "lookup", "for", "customer", "customers", "named", "called",
];

/// Answers customer, lead and order questions.
#[derive(Debug, Default)]
pub struct SalesHandler;

impl SalesHandler {
    pub fn new() -> Self {
        Self
    }

    async fn respond(&self, utterance: &str, ctx: &HandlerContext) -> ToolResult<String> {
        let words = words(utterance);

        if mentions_any(&words, &["update", "mark", "set", "move", "change"])
            && mentions(&words, "lead")
        {
            return self.update_lead(&words, ctx).await;
        }

        if mentions_any(&words, &["search", "find", "lookup", "look"]) {
            return self.search_customers(&words, utterance, ctx).await;
        }

        if mentions(&words, "lead")
            && mentions_any(&words, &["summary", "overview", "conversion", "pipeline", "rate"])
        {
            let output = ctx.invoke_tool("lead_summary", json!({})).await?;
            return Ok(format!("Lead pipeline:\n{}", render_fields(&output)));
        }

        if mentions(&words, "lead") {
            let mut input = json!({});
            if let Some(status) = last_of(&words, LEAD_STATUSES) {
                input["status"] = json!(status);
            }
            let output = ctx.invoke_tool("list_leads", input).await?;
            return Ok(format!(
                "Leads ({}):\n{}",
                count(&output),
                render_rows(&output, &["id", "customer_name", "score", "status"])
            ));
        }

        if mentions(&words, "order") {
            if mentions_any(&words, &["summary", "breakdown", "total", "overview"]) {
                let output = ctx.invoke_tool("order_summary", json!({})).await?;
                return Ok(format!(
                    "Orders by status:\n{}",
                    render_rows(&output, &["status", "orders", "total"])
                ));
            }

            let mut input = json!({});
            if let Some(status) = last_of(&words, ORDER_STATUSES) {
                input["status"] = json!(status);
            }
            let output = ctx.invoke_tool("list_orders", input).await?;
            return Ok(format!(
                "Orders ({}):\n{}",
                count(&output),
                render_rows(&output, &["id", "customer", "total", "status", "created_at"])
            ));
        }

        if mentions_any(&words, &["summary", "overview", "pipeline"]) {
            let output = ctx.invoke_tool("customer_summary", json!({})).await?;
            return Ok(format!("Sales overview:\n{}", render_fields(&output)));
        }

        if mentions_any(&words, &["customer", "client", "account"]) {
            let output = ctx.invoke_tool("list_customers", json!({})).await?;
            return Ok(format!(
                "Customers ({}):\n{}",
                count(&output),
                render_rows(&output, &["name", "email", "order_count", "total_spent"])
            ));
        }

        Ok(HELP.to_string())
    }

    async fn update_lead(&self, words: &[String], ctx: &HandlerContext) -> ToolResult<String> {
        let lead_id = first_number(words);
        let status = last_of(words, LEAD_STATUSES);

        let (Some(lead_id), Some(status)) = (lead_id, status) else {
            return Ok(format!(
                "To update a lead, name its id and one of: {}. For example \"mark lead 2 as contacted\".",
                LEAD_STATUSES.join(", ")
            ));
        };

        ctx.invoke_tool(
            "update_lead_status",
            json!({"lead_id": lead_id, "status": status}),
        )
        .await?;

        Ok(format!("Lead {} is now {}.", lead_id, status))
    }

    async fn search_customers(
        &self,
        words: &[String],
        utterance: &str,
        ctx: &HandlerContext,
    ) -> ToolResult<String> {
        let start = words
            .iter()
            .rposition(|w| SEARCH_MARKERS.contains(&w.as_str()))
            .map_or(0, |i| i + 1);
        let term = words[start..].join(" ");

        if term.is_empty() {
            return Ok("Who should I look for? For example \"find customer acme\".".to_string());
        }

        let output = ctx
            .invoke_tool("search_customers", json!({"query": term}))
            .await?;
        let rows = output
            .get("rows")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if rows.is_empty() {
            return Ok(format!("No customers match \"{}\".", term));
        }

        let now = Utc::now().to_rfc3339();
        let mut lines = vec![format!("Customers matching \"{}\":", term)];

        for row in &rows {
            let id = display_value(&row["id"]);
            lines.push(format!(
                "- {} ({})",
                display_value(&row["name"]),
                display_value(&row["email"])
            ));

            // Notes from earlier conversations, read before this one overwrites them.
            for note in ctx.recall(CUSTOMER_ENTITY, &id).await? {
                if note.key == "last_interaction" {
                    lines.push(format!("  last discussed: {}", display_value(&note.value)));
                }
            }

            ctx.remember(CUSTOMER_ENTITY, &id, "last_interaction", &json!(utterance))
                .await?;
            ctx.remember(CUSTOMER_ENTITY, &id, "last_interaction_date", &json!(now))
                .await?;
        }

        debug!(matches = rows.len(), term = %term, "Recorded customer interactions");
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl Handler for SalesHandler {
    fn name(&self) -> &str {
        SALES_HANDLER
    }

    fn description(&self) -> &str {
        "Customers, leads and orders"
    }

    fn can_handle(&self, classification: &Classification) -> f64 {
        domain_score(classification, SALES_HANDLER)
    }

    fn owned_entity_types(&self) -> &[&'static str] {
        &[CUSTOMER_ENTITY]
    }

    async fn execute(&self, utterance: &str, ctx: &HandlerContext) -> ToolResult<HandlerResult> {
        match self.respond(utterance, ctx).await {
            Ok(text) => Ok(ctx.finish(text)),
            Err(e) => ctx.recover(e),
        }
    }
}

/// Last word of the utterance that is one of `candidates`.
fn last_of(words: &[String], candidates: &[&'static str]) -> Option<&'static str> {
    words
        .iter()
        .rev()
        .find_map(|w| candidates.iter().find(|c| **c == w.as_str()).copied())
}

fn count(output: &Value) -> u64 {
    output.get("count").and_then(Value::as_u64).unwrap_or(0)
}
