//! Domain handlers selected by the router.
//!
//! - [`SalesHandler`]: customers, leads and orders; owns the `customer` entity type
//! - [`InventoryHandler`]: products and stock levels
//! - [`FinanceHandler`]: invoices, payments and collected revenue
//! - [`AnalyticsHandler`]: reports, revenue and ad-hoc read-only SQL
//! - [`SystemHandler`]: the default direct-answer path
//!
//! Handlers keep no state between calls. Everything they learn is written
//! through [`HandlerContext`] to the state store.

mod analytics;
mod context;
mod finance;
mod inventory;
mod keywords;
mod sales;
mod system;

pub use analytics::*;
pub use context::*;
pub use finance::*;
pub use inventory::*;
pub use keywords::*;
pub use sales::*;
pub use system::*;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{RegistryError, ToolError, ToolResult};
use crate::llm::Classification;
use crate::sql::ExecutionPath;
use crate::storage::ToolInvocation;

/// Name of the sales handler.
pub const SALES_HANDLER: &str = "sales";
/// Name of the inventory handler.
pub const INVENTORY_HANDLER: &str = "inventory";
/// Name of the finance handler.
pub const FINANCE_HANDLER: &str = "finance";
/// Name of the analytics handler.
pub const ANALYTICS_HANDLER: &str = "analytics";
/// Name of the default system handler.
pub const SYSTEM_HANDLER: &str = "system";

/// What a handler produced for one utterance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerResult {
    /// User-facing response text.
    pub text: String,
    /// Every tool call attempted, successful or not.
    pub tool_invocations: Vec<ToolInvocation>,
    /// Whether the handler answered with an error message.
    pub failed: bool,
}

/// A domain-specific query executor.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Unique handler name; tools are registered under it.
    fn name(&self) -> &str;

    /// One-line description shown to users.
    fn description(&self) -> &str;

    /// Confidence in `0.0..=1.0` that this handler should answer.
    fn can_handle(&self, classification: &Classification) -> f64;

    /// Entity types whose memory only this handler may write.
    fn owned_entity_types(&self) -> &[&'static str] {
        &[]
    }

    /// Answer an utterance.
    ///
    /// Tool failures become a [`HandlerResult`] with `failed` set; only
    /// persistence errors are returned as `Err`.
    async fn execute(&self, utterance: &str, ctx: &HandlerContext) -> ToolResult<HandlerResult>;
}

/// Score for handlers that answer exactly one intent label.
pub(crate) fn domain_score(classification: &Classification, domain: &str) -> f64 {
    if classification.is(domain) {
        classification.confidence
    } else {
        0.0
    }
}

/// Safe, user-facing text for a failed tool call. Database error text is
/// never included.
pub fn user_message(err: &ToolError) -> String {
    match err {
        ToolError::UnsafeQuery(e) => match e.path {
            ExecutionPath::Read => {
                "I can only run safe, read-only queries, so I didn't run that one.".to_string()
            }
            ExecutionPath::Write => {
                "That change isn't allowed, so I didn't make it.".to_string()
            }
        },
        ToolError::Query(_) => {
            "I couldn't retrieve that data right now. Please try again.".to_string()
        }
        ToolError::Registry(RegistryError::InvalidInput { message, .. }) => {
            format!("I couldn't run that request: {}.", message)
        }
        ToolError::Registry(RegistryError::ToolNotFound { .. })
        | ToolError::Registry(RegistryError::AccessDenied { .. }) => {
            "That capability isn't available for this request.".to_string()
        }
        ToolError::Failed { message } => format!("I couldn't complete that: {}.", message),
        _ => "Something went wrong while handling your request.".to_string(),
    }
}

/// Lowercased alphanumeric words of an utterance.
pub(crate) fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whether `word` is `keyword` or one of its plural forms.
pub(crate) fn matches_keyword(word: &str, keyword: &str) -> bool {
    word == keyword
        || word
            .strip_prefix(keyword)
            .is_some_and(|rest| rest == "s" || rest == "es")
}

pub(crate) fn mentions(words: &[String], keyword: &str) -> bool {
    words.iter().any(|w| matches_keyword(w, keyword))
}

pub(crate) fn mentions_any(words: &[String], keywords: &[&str]) -> bool {
    keywords.iter().any(|k| mentions(words, k))
}

/// First non-negative whole number in the utterance.
pub(crate) fn first_number(words: &[String]) -> Option<i64> {
    words.iter().find_map(|w| w.parse::<i64>().ok())
}

/// Render a cell for display.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render the `rows` of a tool output as a bulleted list.
pub(crate) fn render_rows(output: &Value, columns: &[&str]) -> String {
    let rows = output
        .get("rows")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    if rows.is_empty() {
        return "No matching records.".to_string();
    }

    rows.iter()
        .map(|row| {
            let cells: Vec<String> = columns
                .iter()
                .map(|c| format!("{}: {}", c, display_value(&row[*c])))
                .collect();
            format!("- {}", cells.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a single-object tool output as `key: value` lines.
pub(crate) fn render_fields(output: &Value) -> String {
    match output.as_object() {
        Some(fields) if !fields.is_empty() => fields
            .iter()
            .map(|(k, v)| format!("- {}: {}", k, display_value(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => "No data.".to_string(),
    }
}
