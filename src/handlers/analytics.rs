//! Analytics handler: saved reports, revenue and question-to-SQL.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{
    domain_score, mentions, mentions_any, render_fields, render_rows, words, Handler,
    HandlerContext, HandlerResult, ANALYTICS_HANDLER,
};
use crate::error::ToolResult;
use crate::llm::Classification;
use crate::prompts::text_to_sql_prompt;
use crate::tools::{ReportDefinition, REPORTS};

/// Answers reporting and analysis questions.
#[derive(Debug, Default)]
pub struct AnalyticsHandler;

impl AnalyticsHandler {
    pub fn new() -> Self {
        Self
    }

    async fn respond(&self, utterance: &str, ctx: &HandlerContext) -> ToolResult<String> {
        if let Some(report) = mentioned_report(utterance) {
            return self.run_report(report, ctx).await;
        }

        let words = words(utterance);

        if mentions(&words, "report") {
            return self.list_reports(ctx).await;
        }

        if mentions_any(&words, &["revenue", "summary", "sales"]) {
            return self.revenue_summary(ctx).await;
        }

        if ctx.llm().is_none() {
            let summary = self.revenue_summary(ctx).await?;
            return Ok(format!(
                "I can't answer free-form questions right now, so here is the revenue summary.\n{}",
                summary
            ));
        }

        let prompt = text_to_sql_prompt(utterance, ctx.history());
        let sql = match ctx.generate(&prompt).await {
            Ok(completion) => extract_sql(&completion),
            Err(e) => {
                warn!(error = %e, "SQL generation unavailable, using revenue summary");
                None
            }
        };

        match sql {
            Some(sql) => {
                info!(sql = %sql, "Running generated query");
                let output = ctx.invoke_tool("run_sql_query", json!({"sql": sql})).await?;
                let mut text = format!("Results ({} rows):\n{}", count(&output), render_table(&output));
                if output["truncated"] == json!(true) {
                    text.push_str("\n(results truncated)");
                }
                Ok(text)
            }
            None => {
                let summary = self.revenue_summary(ctx).await?;
                Ok(format!(
                    "I couldn't turn that into a query, so here is the revenue summary.\n{}",
                    summary
                ))
            }
        }
    }

    async fn run_report(&self, report: &ReportDefinition, ctx: &HandlerContext) -> ToolResult<String> {
        let output = ctx
            .invoke_tool("run_report", json!({"name": report.name}))
            .await?;
        Ok(format!(
            "{} ({}, run {} times):\n{}",
            report.name,
            report.description,
            output["run_count"],
            render_table(&output)
        ))
    }

    async fn list_reports(&self, ctx: &HandlerContext) -> ToolResult<String> {
        let mut lines = vec!["Available reports:".to_string()];
        for report in REPORTS {
            let runs = ctx
                .get_report(report.name)
                .await?
                .map_or(0, |record| record.run_count);
            lines.push(format!(
                "- {}: {} (run {} times)",
                report.name, report.description, runs
            ));
        }
        Ok(lines.join("\n"))
    }

    async fn revenue_summary(&self, ctx: &HandlerContext) -> ToolResult<String> {
        let output = ctx.invoke_tool("revenue_summary", json!({})).await?;
        Ok(format!("Revenue summary:\n{}", render_fields(&output)))
    }
}

#[async_trait]
impl Handler for AnalyticsHandler {
    fn name(&self) -> &str {
        ANALYTICS_HANDLER
    }

    fn description(&self) -> &str {
        "Reports, revenue and data questions"
    }

    fn can_handle(&self, classification: &Classification) -> f64 {
        domain_score(classification, ANALYTICS_HANDLER)
    }

    async fn execute(&self, utterance: &str, ctx: &HandlerContext) -> ToolResult<HandlerResult> {
        match self.respond(utterance, ctx).await {
            Ok(text) => Ok(ctx.finish(text)),
            Err(e) => ctx.recover(e),
        }
    }
}

/// Catalog report named in the utterance, by its name or with spaces for hyphens.
fn mentioned_report(utterance: &str) -> Option<&'static ReportDefinition> {
    let text = utterance.to_lowercase();
    REPORTS
        .iter()
        .find(|r| text.contains(r.name) || text.contains(&r.name.replace('-', " ")))
}

/// Pull a SQL statement out of a completion, dropping code fences.
pub(crate) fn extract_sql(completion: &str) -> Option<String> {
    let body = match completion.split("```").nth(1) {
        Some(fenced) => fenced,
        None => completion,
    };

    let body = body.trim();
    let body = body
        .strip_prefix("sql")
        .or_else(|| body.strip_prefix("SQL"))
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .unwrap_or(body)
        .trim();

    (!body.is_empty()).then(|| body.to_string())
}

/// Render rows using the columns of the first row.
fn render_table(output: &Value) -> String {
    let columns: Vec<&str> = output["rows"]
        .get(0)
        .and_then(Value::as_object)
        .map(|row| row.keys().map(String::as_str).collect())
        .unwrap_or_default();
    render_rows(output, &columns)
}

fn count(output: &Value) -> u64 {
    output.get("count").and_then(Value::as_u64).unwrap_or(0)
}
