use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;
use crate::tools::ToolSharing;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub database: DatabaseConfig,
    pub business_database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub router: RouterConfig,
}

/// Hosted LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// When absent the router classifies with the keyword table only.
    pub api_key: Option<String>,
    pub base_url: String,
    pub classifier_pipe: String,
    pub generator_pipe: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Routing policy
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Minimum handler confidence; below it the default handler answers.
    pub min_confidence: f64,
    /// Number of recent turns loaded as conversation context.
    pub history_limit: u32,
    /// Deadline for a whole request, after which it is cancelled.
    pub request_timeout_ms: u64,
    /// Deadline for one classification or generation call, retries included.
    pub model_timeout_ms: u64,
    /// Registry-wide default for cross-handler tool sharing.
    pub tool_sharing: ToolSharing,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let llm = LlmConfig {
            api_key: env::var("LLM_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
            classifier_pipe: env::var("LLM_CLASSIFIER_PIPE")
                .unwrap_or_else(|_| "intent-classifier-v1".to_string()),
            generator_pipe: env::var("LLM_GENERATOR_PIPE")
                .unwrap_or_else(|_| "business-assistant-v1".to_string()),
        };

        let max_connections = parse_env("DATABASE_MAX_CONNECTIONS", 5);

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/assistant.db".to_string()),
            ),
            max_connections,
        };

        let business_database = DatabaseConfig {
            path: PathBuf::from(
                env::var("BUSINESS_DATABASE_PATH").unwrap_or_else(|_| "./data/erp.db".to_string()),
            ),
            max_connections,
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", 30000),
            max_retries: parse_env("MAX_RETRIES", 3),
            retry_delay_ms: parse_env("RETRY_DELAY_MS", 1000),
        };

        let tool_sharing = match env::var("TOOL_SHARING") {
            Ok(raw) => raw.parse().map_err(|message| AppError::Config { message })?,
            Err(_) => ToolSharing::Open,
        };

        let router = RouterConfig {
            min_confidence: parse_env("ROUTER_MIN_CONFIDENCE", 0.5_f64).clamp(0.0, 1.0),
            history_limit: parse_env("ROUTER_HISTORY_LIMIT", 10),
            request_timeout_ms: parse_env("ROUTER_REQUEST_TIMEOUT_MS", 60000),
            model_timeout_ms: parse_env("ROUTER_MODEL_TIMEOUT_MS", DEFAULT_MODEL_TIMEOUT_MS),
            tool_sharing,
        };

        Ok(Config {
            llm,
            database,
            business_database,
            logging,
            request,
            router,
        })
    }
}

/// Default deadline for one model call.
pub const DEFAULT_MODEL_TIMEOUT_MS: u64 = 15000;

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            history_limit: 10,
            request_timeout_ms: 60000,
            model_timeout_ms: DEFAULT_MODEL_TIMEOUT_MS,
            tool_sharing: ToolSharing::Open,
        }
    }
}

impl RouterConfig {
    /// Time allowed for one model call: `model_timeout_ms`, capped at half
    /// the request deadline so a fallback always has time to run.
    pub fn model_budget(&self) -> Duration {
        Duration::from_millis(self.model_timeout_ms.min(self.request_timeout_ms / 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_config_default() {
        let config = RequestConfig::default();
        assert_eq!(config.timeout_ms, 30000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 1000);
    }

    #[test]
    fn test_router_config_default() {
        let config = RouterConfig::default();
        assert_eq!(config.min_confidence, 0.5);
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.tool_sharing, ToolSharing::Open);
        assert_eq!(config.model_budget(), Duration::from_millis(15000));
    }

    #[test]
    fn test_model_budget_is_capped_by_request_deadline() {
        let config = RouterConfig {
            request_timeout_ms: 600,
            model_timeout_ms: 30000,
            ..RouterConfig::default()
        };
        assert_eq!(config.model_budget(), Duration::from_millis(300));

        let config = RouterConfig {
            model_timeout_ms: 200,
            ..config
        };
        assert_eq!(config.model_budget(), Duration::from_millis(200));
    }
}
