use async_trait::async_trait;
use serde_json::json;

use super::{
    domain_score, mentions_any, render_fields, words, Handler, HandlerContext, HandlerResult,
    SYSTEM_HANDLER,
};
use crate::error::ToolResult;
use crate::llm::Classification;

/// The router's direct-answer path: system status and help.
///
/// Also the default handler, so it must answer anything.
#[derive(Debug, Default)]
pub struct SystemHandler;

impl SystemHandler {
    pub fn new() -> Self {
        Self
    }

    async fn respond(&self, utterance: &str, ctx: &HandlerContext) -> ToolResult<String> {
        let words = words(utterance);
        let status = ctx.invoke_tool("system_status", json!({})).await?;

        let mut sections = Vec::new();
        if !mentions_any(&words, &["status", "health", "system"]) {
            sections.push(
                "I can answer questions about customers, leads, orders, products, stock, \
                 invoices, payments, reports and revenue."
                    .to_string(),
            );
        }
        sections.push(format!("System status:\n{}", render_fields(&status)));
        sections.push(format!(
            "Available handlers: {}",
            ctx.available_handlers().join(", ")
        ));

        Ok(sections.join("\n\n"))
    }
}

#[async_trait]
impl Handler for SystemHandler {
    fn name(&self) -> &str {
        SYSTEM_HANDLER
    }

    fn description(&self) -> &str {
        "System status and help"
    }

    fn can_handle(&self, classification: &Classification) -> f64 {
        domain_score(classification, SYSTEM_HANDLER)
    }

    async fn execute(&self, utterance: &str, ctx: &HandlerContext) -> ToolResult<HandlerResult> {
        match self.respond(utterance, ctx).await {
            Ok(text) => Ok(ctx.finish(text)),
            Err(e) => ctx.recover(e),
        }
    }
}
