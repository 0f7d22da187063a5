//! SQL safety validation.
//!
//! Every SQL-bearing tool call goes through [`check`] before it reaches the
//! business database. Statements are classified by their leading keyword
//! after a small lexer has stripped comments and string literals:
//!
//! - `SELECT`, `VALUES`, `EXPLAIN` and a read-only subset of `PRAGMA` are
//!   [`StatementClass::ReadOnly`]
//! - `INSERT`, `UPDATE`, `DELETE` and `REPLACE` are [`StatementClass::Mutating`]
//! - schema changes, `ATTACH`, transaction control and anything with a second
//!   statement after a `;` are [`StatementClass::Rejected`]
//!
//! A read-path caller accepts only read-only statements. A write-path caller
//! accepts read-only and mutating statements. Nobody accepts rejected ones.

use serde::{Deserialize, Serialize};

use crate::error::UnsafeQueryError;

/// Safety class of a SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementClass {
    /// Cannot change the database.
    ReadOnly,
    /// Changes rows but not the schema.
    Mutating,
    /// Never executed.
    Rejected,
}

impl StatementClass {
    /// Get the class name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementClass::ReadOnly => "read_only",
            StatementClass::Mutating => "mutating",
            StatementClass::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for StatementClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which execution path a caller requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    Read,
    Write,
}

/// Full classification result, with the keyword that decided it.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub class: StatementClass,
    pub keyword: Option<String>,
    pub reason: Option<String>,
}

impl Verdict {
    fn allowed(class: StatementClass, keyword: String) -> Self {
        Self {
            class,
            keyword: Some(keyword),
            reason: None,
        }
    }

    fn rejected(keyword: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            class: StatementClass::Rejected,
            keyword,
            reason: Some(reason.into()),
        }
    }
}

const READ_ONLY_PRAGMAS: &[&str] = &[
    "TABLE_INFO",
    "TABLE_XINFO",
    "TABLE_LIST",
    "INDEX_LIST",
    "INDEX_INFO",
    "INDEX_XINFO",
    "FOREIGN_KEY_LIST",
    "DATABASE_LIST",
    "COLLATION_LIST",
    "FUNCTION_LIST",
    "COMPILE_OPTIONS",
    "USER_VERSION",
    "SCHEMA_VERSION",
    "PAGE_COUNT",
    "PAGE_SIZE",
];

const SCHEMA_KEYWORDS: &[&str] = &["DROP", "ALTER", "CREATE", "TRUNCATE", "REINDEX", "VACUUM"];

const CONNECTION_KEYWORDS: &[&str] = &[
    "ATTACH",
    "DETACH",
    "BEGIN",
    "COMMIT",
    "END",
    "ROLLBACK",
    "SAVEPOINT",
    "RELEASE",
    "ANALYZE",
    "GRANT",
    "REVOKE",
];

const FORBIDDEN_FUNCTIONS: &[&str] = &["LOAD_EXTENSION"];

/// Classify a statement.
pub fn classify(sql: &str) -> StatementClass {
    analyze(sql).class
}

/// Classify a statement and explain the decision.
pub fn analyze(sql: &str) -> Verdict {
    let tokens = match lex(sql) {
        Ok(tokens) => tokens,
        Err(reason) => return Verdict::rejected(None, reason),
    };

    // A single trailing separator is tolerated; anything after a separator is
    // a second statement.
    let mut end = tokens.len();
    while end > 0 && tokens[end - 1] == Token::Semicolon {
        end -= 1;
    }
    let tokens = &tokens[..end];

    if tokens.is_empty() {
        return Verdict::rejected(None, "empty statement");
    }
    if tokens.contains(&Token::Semicolon) {
        return Verdict::rejected(None, "multiple statements are not allowed");
    }

    let keyword = match &tokens[0] {
        Token::Word(word) => word.clone(),
        _ => return Verdict::rejected(None, "statement does not start with a keyword"),
    };

    if let Some(function) = tokens.iter().find_map(|t| match t {
        Token::Word(w) if FORBIDDEN_FUNCTIONS.contains(&w.as_str()) => Some(w.clone()),
        _ => None,
    }) {
        return Verdict::rejected(Some(keyword), format!("{} is not allowed", function));
    }

    match keyword.as_str() {
        "SELECT" | "VALUES" | "EXPLAIN" => Verdict::allowed(StatementClass::ReadOnly, keyword),
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => {
            Verdict::allowed(StatementClass::Mutating, keyword)
        }
        "PRAGMA" => classify_pragma(tokens),
        "WITH" => classify_with(tokens),
        kw if SCHEMA_KEYWORDS.contains(&kw) => {
            Verdict::rejected(Some(keyword), "schema changes are not allowed")
        }
        kw if CONNECTION_KEYWORDS.contains(&kw) => Verdict::rejected(
            Some(keyword),
            "connection and transaction control is not allowed",
        ),
        _ => Verdict::rejected(Some(keyword), "unrecognised statement"),
    }
}

/// Validate `sql` for the requested execution path.
///
/// Returns the statement class when the caller may run it.
pub fn check(sql: &str, path: ExecutionPath) -> Result<StatementClass, UnsafeQueryError> {
    let verdict = analyze(sql);
    match (verdict.class, path) {
        (StatementClass::ReadOnly, _) => Ok(StatementClass::ReadOnly),
        (StatementClass::Mutating, ExecutionPath::Write) => Ok(StatementClass::Mutating),
        (StatementClass::Mutating, ExecutionPath::Read) => Err(UnsafeQueryError {
            class: StatementClass::Mutating,
            path,
            reason: format!(
                "{} is not allowed on the read-only path",
                verdict.keyword.unwrap_or_default()
            ),
        }),
        (StatementClass::Rejected, _) => Err(UnsafeQueryError {
            class: StatementClass::Rejected,
            path,
            reason: verdict
                .reason
                .unwrap_or_else(|| "statement rejected".to_string()),
        }),
    }
}

/// Shorthand for `check(sql, ExecutionPath::Read)`.
pub fn check_read(sql: &str) -> Result<StatementClass, UnsafeQueryError> {
    check(sql, ExecutionPath::Read)
}

/// Shorthand for `check(sql, ExecutionPath::Write)`.
pub fn check_write(sql: &str) -> Result<StatementClass, UnsafeQueryError> {
    check(sql, ExecutionPath::Write)
}

fn classify_pragma(tokens: &[Token]) -> Verdict {
    let keyword = Some("PRAGMA".to_string());

    // PRAGMA [schema.]name [(arg) | = value]
    let mut rest = &tokens[1..];
    if rest.len() >= 2 && rest[1] == Token::Other('.') {
        rest = &rest[2..];
    }
    let name = match rest.first() {
        Some(Token::Word(name)) => name.as_str(),
        _ => return Verdict::rejected(keyword, "pragma name missing"),
    };

    if rest.contains(&Token::Other('=')) {
        return Verdict::rejected(keyword, "pragma assignment is not allowed");
    }
    if !READ_ONLY_PRAGMAS.contains(&name) {
        return Verdict::rejected(keyword, format!("pragma {} is not read-only", name));
    }

    Verdict::allowed(StatementClass::ReadOnly, "PRAGMA".to_string())
}

fn classify_with(tokens: &[Token]) -> Verdict {
    let mut depth = 0usize;
    for token in &tokens[1..] {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Word(word) if depth == 0 => match word.as_str() {
                "SELECT" | "VALUES" => {
                    return Verdict::allowed(StatementClass::ReadOnly, word.clone())
                }
                "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => {
                    return Verdict::allowed(StatementClass::Mutating, word.clone())
                }
                _ => {}
            },
            _ => {}
        }
    }
    Verdict::rejected(
        Some("WITH".to_string()),
        "common table expression without a main statement",
    )
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Bare keyword or identifier, upper-cased.
    Word(String),
    /// String literal or quoted identifier; contents are irrelevant.
    Quoted,
    Semicolon,
    LParen,
    RParen,
    Other(char),
}

fn lex(sql: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                loop {
                    if i + 1 >= chars.len() {
                        return Err("unterminated block comment".to_string());
                    }
                    if chars[i] == '*' && chars[i + 1] == '/' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated quoted text".to_string()),
                        // A doubled quote is an escaped quote.
                        Some(&ch) if ch == close && close != ']' && chars.get(i + 1) == Some(&close) => {
                            i += 2;
                        }
                        Some(&ch) if ch == close => {
                            i += 1;
                            break;
                        }
                        Some(_) => i += 1,
                    }
                }
                tokens.push(Token::Quoted);
            }
            ';' => {
                tokens.push(Token::Semicolon);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(Token::Word(word.to_uppercase()));
            }
            other => {
                tokens.push(Token::Other(other));
                i += 1;
            }
        }
    }

    Ok(tokens)
}
