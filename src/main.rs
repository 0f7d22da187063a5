use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use erp_assistant::{
    config::{Config, LogFormat},
    database::{seed_sample_data, GuardedDatabase, SqliteDatabase},
    handlers::{
        AnalyticsHandler, FinanceHandler, InventoryHandler, SalesHandler, SystemHandler,
        SYSTEM_HANDLER,
    },
    llm::{LanguageModel, LlmClient},
    router::Router,
    server::AssistantServer,
    storage::{SqliteStorage, Storage},
    tools::{register_builtin_tools, ToolRegistry},
};

#[derive(Parser)]
#[command(name = "erp-assistant", version, about = "Chat-driven ERP assistant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve JSON-RPC requests on stdin/stdout (default)
    Serve,
    /// Answer a single message and print the response
    Ask {
        /// Conversation to continue
        #[arg(short, long, default_value = "cli")]
        conversation: String,
        /// The message
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Create the sample business schema and rows
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "ERP assistant starting...");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Seed => {
            let db = SqliteDatabase::connect(&config.business_database).await?;
            seed_sample_data(db.pool()).await?;
            info!(path = %config.business_database.path.display(), "Sample data ready");
        }
        Command::Ask {
            conversation,
            message,
        } => {
            let router = build_router(&config).await?;
            let response = router.handle(&conversation, &message.join(" ")).await?;
            info!(
                handler = ?response.handler_used,
                latency_ms = response.latency_ms,
                "Answered"
            );
            println!("{}", response.response_text);
        }
        Command::Serve => {
            let router = build_router(&config).await?;
            let server = AssistantServer::new(router);

            info!("Server ready, waiting for requests on stdin...");

            if let Err(e) = server.run().await {
                error!(error = %e, "Server error");
                return Err(e.into());
            }

            info!("Server shutdown complete");
        }
    }

    Ok(())
}

/// Wire storage, the business database, tools, the model and handlers.
async fn build_router(config: &Config) -> anyhow::Result<Arc<Router>> {
    let storage: Arc<dyn Storage> = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "State store initialized");
            Arc::new(s)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize state store");
            return Err(e.into());
        }
    };

    let business = SqliteDatabase::connect(&config.business_database).await?;
    info!(
        path = %config.business_database.path.display(),
        "Business database connected"
    );
    let db = GuardedDatabase::new(Arc::new(business));

    let registry = Arc::new(ToolRegistry::new(config.router.tool_sharing.clone()));
    register_builtin_tools(&registry, db, Arc::clone(&storage))?;

    let llm: Option<Arc<dyn LanguageModel>> =
        match LlmClient::new(&config.llm, config.request.clone()) {
            Ok(client) => {
                info!(base_url = %client.base_url(), "LLM client initialized");
                Some(Arc::new(client))
            }
            Err(e) => {
                warn!(error = %e, "LLM unavailable, classifying with keyword rules only");
                None
            }
        };

    let router = Router::builder(registry, storage, config.router.clone())
        .llm(llm)
        .handler(Arc::new(SalesHandler::new()))
        .handler(Arc::new(InventoryHandler::new()))
        .handler(Arc::new(FinanceHandler::new()))
        .handler(Arc::new(AnalyticsHandler::new()))
        .handler(Arc::new(SystemHandler::new()))
        .default_handler(SYSTEM_HANDLER)
        .build()?;

    Ok(Arc::new(router))
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
