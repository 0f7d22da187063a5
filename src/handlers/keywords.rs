//! Deterministic intent rules used when the classification model is
//! unavailable.

use super::{
    matches_keyword, words, ANALYTICS_HANDLER, FINANCE_HANDLER, INVENTORY_HANDLER, SALES_HANDLER,
    SYSTEM_HANDLER,
};
use crate::llm::{Classification, ClassificationSource};

/// Sales vocabulary.
pub const SALES_KEYWORDS: &[&str] = &[
    "customer", "lead", "prospect", "sale", "order", "crm", "contact", "deal", "client",
];

/// Inventory vocabulary.
pub const INVENTORY_KEYWORDS: &[&str] = &[
    "product", "stock", "inventory", "warehouse", "supply", "sku", "catalog",
];

/// Finance vocabulary.
pub const FINANCE_KEYWORDS: &[&str] = &[
    "invoice",
    "payment",
    "finance",
    "accounting",
    "ledger",
    "billing",
    "outstanding",
];

/// Analytics vocabulary.
pub const ANALYTICS_KEYWORDS: &[&str] = &[
    "report",
    "analytics",
    "dashboard",
    "metrics",
    "analysis",
    "trend",
    "chart",
    "insight",
    "revenue",
];

/// System vocabulary.
pub const SYSTEM_KEYWORDS: &[&str] = &["status", "system", "health", "help"];

/// Highest confidence a keyword match can reach.
const MAX_KEYWORD_CONFIDENCE: f64 = 0.95;

/// Keyword table classifier.
///
/// Confidence is `matches / (matches + 1)`, capped at 0.95. No match, or a
/// tie between intents, yields the system intent with zero confidence so the
/// router falls through to its default handler.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    table: Vec<(&'static str, &'static [&'static str])>,
}

impl KeywordClassifier {
    /// Classifier with the built-in table, one row per handler.
    pub fn new() -> Self {
        Self {
            table: vec![
                (SALES_HANDLER, SALES_KEYWORDS),
                (INVENTORY_HANDLER, INVENTORY_KEYWORDS),
                (FINANCE_HANDLER, FINANCE_KEYWORDS),
                (ANALYTICS_HANDLER, ANALYTICS_KEYWORDS),
                (SYSTEM_HANDLER, SYSTEM_KEYWORDS),
            ],
        }
    }

    /// Classify an utterance.
    pub fn classify(&self, text: &str) -> Classification {
        let words = words(text);

        let scores: Vec<(&str, usize)> = self
            .table
            .iter()
            .map(|(intent, keywords)| {
                let hits = words
                    .iter()
                    .filter(|w| keywords.iter().any(|k| matches_keyword(w, k)))
                    .count();
                (*intent, hits)
            })
            .collect();

        let best = scores.iter().map(|(_, hits)| *hits).max().unwrap_or(0);
        let leaders: Vec<&str> = scores
            .iter()
            .filter(|(_, hits)| *hits == best)
            .map(|(intent, _)| *intent)
            .collect();

        if best == 0 || leaders.len() > 1 {
            return Classification::new(SYSTEM_HANDLER, 0.0, ClassificationSource::Keywords);
        }

        let matches = best as f64;
        let confidence = (matches / (matches + 1.0)).min(MAX_KEYWORD_CONFIDENCE);
        Classification::new(leaders[0], confidence, ClassificationSource::Keywords)
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_sales_keyword() {
        let c = KeywordClassifier::new().classify("show customers");
        assert_eq!(c.intent, "sales");
        assert_eq!(c.confidence, 0.5);
        assert_eq!(c.source, ClassificationSource::Keywords);
    }

    #[test]
    fn test_confidence_grows_with_matches() {
        let c = KeywordClassifier::new().classify("revenue trend report for the dashboard");
        assert_eq!(c.intent, "analytics");
        assert_eq!(c.confidence, 0.8);
    }

    #[test]
    fn test_confidence_is_capped() {
        let text = "report ".repeat(40);
        let c = KeywordClassifier::new().classify(&text);
        assert_eq!(c.confidence, MAX_KEYWORD_CONFIDENCE);
    }

    #[test]
    fn test_no_match_defaults_to_system() {
        let c = KeywordClassifier::new().classify("what's the weather like?");
        assert_eq!(c.intent, "system");
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_tie_defaults_to_system() {
        let c = KeywordClassifier::new().classify("revenue per order");
        assert_eq!(c.intent, "system");
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_inventory_and_finance_keywords() {
        let c = KeywordClassifier::new().classify("which products are low on stock?");
        assert_eq!(c.intent, "inventory");
        assert!((c.confidence - 2.0 / 3.0).abs() < 1e-9);

        let c = KeywordClassifier::new().classify("show outstanding invoices");
        assert_eq!(c.intent, "finance");
        assert!((c.confidence - 2.0 / 3.0).abs() < 1e-9);

        let c = KeywordClassifier::new().classify("payments");
        assert_eq!(c.intent, "finance");
        assert_eq!(c.confidence, 0.5);
    }

    #[test]
    fn test_system_keywords() {
        let c = KeywordClassifier::new().classify("system status");
        assert_eq!(c.intent, "system");
        assert!((c.confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_plural_and_case_insensitive() {
        let c = KeywordClassifier::new().classify("LEADS and Deals");
        assert_eq!(c.intent, "sales");
        assert!((c.confidence - 2.0 / 3.0).abs() < 1e-9);
    }
}
