//! Inventory handler: catalog and stock levels.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    domain_score, first_number, mentions_any, render_fields, render_rows, words, Handler,
    HandlerContext, HandlerResult, INVENTORY_HANDLER,
};
use crate::error::ToolResult;
use crate::llm::Classification;

const HELP: &str = "I can help with inventory. Try:\n\
- \"list products\"\n\
- \"stock levels\"\n\
- \"low stock alerts\" or \"products below 50 units\"";

/// Answers product and stock questions.
#[derive(Debug, Default)]
pub struct InventoryHandler;

impl InventoryHandler {
    pub fn new() -> Self {
        Self
    }

    async fn respond(&self, utterance: &str, ctx: &HandlerContext) -> ToolResult<String> {
        let words = words(utterance);

        if mentions_any(&words, &["low", "below", "under", "reorder", "alert", "shortage"]) {
            let mut input = json!({});
            if let Some(threshold) = first_number(&words) {
                input["threshold"] = json!(threshold);
            }
            let output = ctx.invoke_tool("low_stock", input).await?;
            if count(&output) == 0 {
                return Ok(format!(
                    "No products at or below {} units.",
                    output["threshold"]
                ));
            }
            return Ok(format!(
                "Low stock (at or below {} units):\n{}",
                output["threshold"],
                render_rows(&output, &["sku", "name", "stock_quantity"])
            ));
        }

        if mentions_any(&words, &["stock", "inventory", "level", "summary", "value"]) {
            let output = ctx.invoke_tool("stock_summary", json!({})).await?;
            return Ok(format!("Stock summary:\n{}", render_fields(&output)));
        }

        if mentions_any(&words, &["product", "sku", "catalog", "item"]) {
            let output = ctx.invoke_tool("list_products", json!({})).await?;
            return Ok(format!(
                "Products ({}):\n{}",
                count(&output),
                render_rows(&output, &["sku", "name", "price", "stock_quantity"])
            ));
        }

        Ok(HELP.to_string())
    }
}

#[async_trait]
impl Handler for InventoryHandler {
    fn name(&self) -> &str {
        INVENTORY_HANDLER
    }

    fn description(&self) -> &str {
        "Products and stock levels"
    }

    fn can_handle(&self, classification: &Classification) -> f64 {
        domain_score(classification, INVENTORY_HANDLER)
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
