//! Prompt texts sent to the completion pipes.

use crate::storage::Turn;

/// System prompt for intent classification.
///
/// The intent labels must match handler names.
pub const INTENT_CLASSIFIER_PROMPT: &str = r#"You route messages for a small-business ERP assistant.

Classify the user's latest message into exactly one intent:
- "sales": customers, leads, prospects, orders, deals, CRM contacts
- "inventory": products, SKUs, stock levels, low-stock alerts, warehouse and supply
- "finance": invoices, payments, billing, outstanding balances, accounting
- "analytics": reports, revenue, trends, dashboards, metrics, ad-hoc data questions
- "system": system status, health, help, or anything that fits none of the above

Your response MUST be valid JSON in this exact format:
{
  "intent": "sales",
  "confidence": 0.8
}

confidence is between 0.0 and 1.0. Use a low confidence when the message is ambiguous.
Always respond with valid JSON only, no other text."#;

/// System prompt for the generation pipe.
pub const BUSINESS_ASSISTANT_PROMPT: &str = r#"You are a concise business assistant for a small company.
Answer using only the information given in the request. Do not invent figures."#;

/// Schema description handed to the model when turning questions into SQL.
pub const BUSINESS_SCHEMA: &str = r#"customers(id INTEGER, name TEXT, email TEXT, created_at TEXT)
products(id INTEGER, sku TEXT, name TEXT, price REAL, stock_quantity INTEGER)
orders(id INTEGER, customer_id INTEGER, total REAL, status TEXT, created_at TEXT)
order_items(id INTEGER, order_id INTEGER, product_id INTEGER, quantity INTEGER, price REAL)
invoices(id INTEGER, order_id INTEGER, invoice_number TEXT, total REAL, status TEXT, issued_at TEXT)
payments(id INTEGER, invoice_id INTEGER, amount REAL, method TEXT, paid_at TEXT)
leads(id INTEGER, customer_name TEXT, contact_email TEXT, message TEXT, score REAL, status TEXT, created_at TEXT)"#;

/// Most recent turns quoted in a prompt.
const PROMPT_HISTORY_TURNS: usize = 6;

/// Longest turn text quoted in a prompt, in characters.
const PROMPT_TURN_CHARS: usize = 300;

/// Build the text-to-SQL prompt for a question, quoting the latest turns of
/// the conversation so follow-up questions can be resolved.
pub fn text_to_sql_prompt(question: &str, history: &[Turn]) -> String {
    let mut prompt = format!(
        "Write one SQLite SELECT statement that answers the question below.\n\
         Use only these tables:\n{}\n\n\
         Return only the SQL, without explanation. Never modify data.\n\n",
        BUSINESS_SCHEMA
    );

    let recent = &history[history.len().saturating_sub(PROMPT_HISTORY_TURNS)..];
    if !recent.is_empty() {
        prompt.push_str("Conversation so far:\n");
        for turn in recent {
            let content: String = turn.content.chars().take(PROMPT_TURN_CHARS).collect();
            prompt.push_str(&format!("{}: {}\n", turn.role, content));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("Question: {}", question));
    prompt
}
