use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    Conversation, EntityMemoryRecord, NewTurn, ReportRecord, Storage, ToolInvocation, Turn,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::locks::KeyedLocks;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed state store
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    sequence_locks: KeyedLocks,
}

impl SqliteStorage {
    /// Open (or create) the state store and run migrations
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        Self::with_pool(pool).await
    }

    /// In-memory store for tests
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        // Every pooled connection to :memory: is a separate database, so keep exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> StorageResult<Self> {
        let storage = Self {
            pool,
            sequence_locks: KeyedLocks::default(),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, flushing WAL state to disk
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert a turn and its invocations in one transaction.
    async fn insert_turn(
        &self,
        conversation_id: &str,
        turn: &NewTurn,
        invocations: &[ToolInvocation],
    ) -> StorageResult<Turn> {
        let id = Uuid::new_v4().to_string();
        let now = now_micros();

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO conversations (id, created_at_us) VALUES (?, ?)")
            .bind(conversation_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        // Sequence is derived inside the insert; UNIQUE(conversation_id, seq)
        // turns any collision into an error instead of a duplicate.
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO turns (id, conversation_id, seq, role, content, handler, status, created_at_us)
            SELECT ?, ?, COALESCE(MAX(seq), 0) + 1, ?, ?, ?, ?, ?
            FROM turns
            WHERE conversation_id = ?
            RETURNING seq
            "#,
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(&turn.handler)
        .bind(turn.status.as_str())
        .bind(now)
        .bind(conversation_id)
        .fetch_one(&mut *tx)
        .await?;

        for invocation in invocations {
            insert_invocation(&mut *tx, &id, invocation).await?;
        }

        // Dropping `tx` on any error above rolls back the whole turn.
        tx.commit().await?;

        Ok(Turn {
            id,
            conversation_id: conversation_id.to_string(),
            seq,
            role: turn.role,
            content: turn.content.clone(),
            handler: turn.handler.clone(),
            status: turn.status,
            created_at: from_micros(now),
        })
    }
}

async fn insert_invocation(
    conn: &mut SqliteConnection,
    turn_id: &str,
    invocation: &ToolInvocation,
) -> StorageResult<()> {
    let output = invocation.output.as_ref().map(to_json_text).transpose()?;

    let result = sqlx::query(
        r#"
        INSERT INTO tool_invocations
            (id, turn_id, tool_name, handler, input, output, error, latency_ms, success, created_at_us)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&invocation.id)
    .bind(turn_id)
    .bind(&invocation.tool_name)
    .bind(&invocation.handler)
    .bind(to_json_text(&invocation.input)?)
    .bind(output)
    .bind(&invocation.error)
    .bind(invocation.latency_ms)
    .bind(invocation.success)
    .bind(invocation.created_at.timestamp_micros())
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
            Err(StorageError::TurnNotFound {
                turn_id: turn_id.to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(us).unwrap_or_default()
}

fn to_json_text(value: &serde_json::Value) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Query {
        message: format!("Failed to serialize value: {}", e),
    })
}

fn from_json_text(text: &str) -> StorageResult<serde_json::Value> {
    serde_json::from_str(text).map_err(|e| StorageError::Query {
        message: format!("Corrupt JSON in store: {}", e),
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn append_turn(&self, conversation_id: &str, turn: NewTurn) -> StorageResult<Turn> {
        self.append_turn_with_invocations(conversation_id, turn, &[])
            .await
    }

    async fn append_turn_with_invocations(
        &self,
        conversation_id: &str,
        turn: NewTurn,
        invocations: &[ToolInvocation],
    ) -> StorageResult<Turn> {
        let turn = {
            let _guard = self.sequence_locks.lock(conversation_id).await;
            self.insert_turn(conversation_id, &turn, invocations).await?
        };
        debug!(
            conversation_id = %conversation_id,
            seq = turn.seq,
            role = %turn.role,
            invocations = invocations.len(),
            "Appended turn"
        );
        Ok(turn)
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> StorageResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            r#"
            SELECT c.id, c.created_at_us,
                   (SELECT COUNT(*) FROM turns t WHERE t.conversation_id = c.id) AS turn_count
            FROM conversations c
            WHERE c.id = ?
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_recent_turns(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> StorageResult<Vec<Turn>> {
        let rows: Vec<TurnRow> = sqlx::query_as(
            r#"
            SELECT id, conversation_id, seq, role, content, handler, status, created_at_us
            FROM (
                SELECT * FROM turns
                WHERE conversation_id = ?
                ORDER BY seq DESC
                LIMIT ?
            )
            ORDER BY seq ASC
            "#,
        )
        .bind(conversation_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Turn::try_from).collect()
    }

    async fn record_tool_invocation(
        &self,
        turn_id: &str,
        invocation: &ToolInvocation,
    ) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_invocation(&mut *conn, turn_id, invocation).await
    }

    async fn get_turn_invocations(&self, turn_id: &str) -> StorageResult<Vec<ToolInvocation>> {
        let rows: Vec<InvocationRow> = sqlx::query_as(
            r#"
            SELECT id, turn_id, tool_name, handler, input, output, error, latency_ms, success, created_at_us
            FROM tool_invocations
            WHERE turn_id = ?
            ORDER BY created_at_us ASC, rowid ASC
            "#,
        )
        .bind(turn_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ToolInvocation::try_from).collect()
    }

    async fn upsert_entity_memory(
        &self,
        entity_type: &str,
        entity_id: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> StorageResult<EntityMemoryRecord> {
        // updated_at always moves forward, even within one clock tick.
        let row: EntityMemoryRow = sqlx::query_as(
            r#"
            INSERT INTO entity_memory (entity_type, entity_id, key, value, updated_at_us)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (entity_type, entity_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at_us = MAX(excluded.updated_at_us, entity_memory.updated_at_us + 1)
            RETURNING entity_type, entity_id, key, value, updated_at_us
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(key)
        .bind(to_json_text(value)?)
        .bind(now_micros())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_entity_memory(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StorageResult<Vec<EntityMemoryRecord>> {
        let rows: Vec<EntityMemoryRow> = sqlx::query_as(
            r#"
            SELECT entity_type, entity_id, key, value, updated_at_us
            FROM entity_memory
            WHERE entity_type = ? AND entity_id = ?
            ORDER BY key ASC
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EntityMemoryRecord::try_from).collect()
    }

    async fn upsert_report(
        &self,
        name: &str,
        spec: &str,
        result_summary: &str,
    ) -> StorageResult<ReportRecord> {
        let now = now_micros();

        let row: ReportRow = sqlx::query_as(
            r#"
            INSERT INTO reports (name, spec, run_count, last_result, created_at_us, last_run_us)
            VALUES (?, ?, 1, ?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                spec = excluded.spec,
                run_count = reports.run_count + 1,
                last_result = excluded.last_result,
                last_run_us = MAX(excluded.last_run_us, reports.last_run_us + 1)
            RETURNING name, spec, run_count, last_result, created_at_us, last_run_us
            "#,
        )
        .bind(name)
        .bind(spec)
        .bind(result_summary)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        debug!(report = %name, run_count = row.run_count, "Recorded report run");
        Ok(row.into())
    }

    async fn get_report(&self, name: &str) -> StorageResult<Option<ReportRecord>> {
        let row: Option<ReportRow> = sqlx::query_as(
            r#"
            SELECT name, spec, run_count, last_result, created_at_us, last_run_us
            FROM reports
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }
}

// ============================================================================
// Row types for SQLx
// ============================================================================

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    created_at_us: i64,
    turn_count: i64,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            created_at: from_micros(row.created_at_us),
            turn_count: row.turn_count,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TurnRow {
    id: String,
    conversation_id: String,
    seq: i64,
    role: String,
    content: String,
    handler: Option<String>,
    status: String,
    created_at_us: i64,
}

impl TryFrom<TurnRow> for Turn {
    type Error = StorageError;

    fn try_from(row: TurnRow) -> Result<Self, Self::Error> {
        let corrupt = |message: String| StorageError::Query { message };
        Ok(Self {
            id: row.id,
            conversation_id: row.conversation_id,
            seq: row.seq,
            role: row.role.parse().map_err(corrupt)?,
            content: row.content,
            handler: row.handler,
            status: row.status.parse().map_err(corrupt)?,
            created_at: from_micros(row.created_at_us),
        })
    }
}

#[derive(sqlx::FromRow)]
struct InvocationRow {
    id: String,
    turn_id: String,
    tool_name: String,
    handler: String,
    input: String,
    output: Option<String>,
    error: Option<String>,
    latency_ms: i64,
    success: bool,
    created_at_us: i64,
}

impl TryFrom<InvocationRow> for ToolInvocation {
    type Error = StorageError;

    fn try_from(row: InvocationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            turn_id: Some(row.turn_id),
            tool_name: row.tool_name,
            handler: row.handler,
            input: from_json_text(&row.input)?,
            output: row.output.as_deref().map(from_json_text).transpose()?,
            error: row.error,
            latency_ms: row.latency_ms,
            success: row.success,
            created_at: from_micros(row.created_at_us),
        })
    }
}

#[derive(sqlx::FromRow)]
struct EntityMemoryRow {
    entity_type: String,
    entity_id: String,
    key: String,
    value: String,
    updated_at_us: i64,
}

impl TryFrom<EntityMemoryRow> for EntityMemoryRecord {
    type Error = StorageError;

    fn try_from(row: EntityMemoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            key: row.key,
            value: from_json_text(&row.value)?,
            updated_at: from_micros(row.updated_at_us),
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    name: String,
    spec: String,
    run_count: i64,
    last_result: String,
    created_at_us: i64,
    last_run_us: i64,
}

impl From<ReportRow> for ReportRecord {
    fn from(row: ReportRow) -> Self {
        Self {
            name: row.name,
            spec: row.spec,
            run_count: row.run_count,
            last_result: row.last_result,
            created_at: from_micros(row.created_at_us),
            last_run: from_micros(row.last_run_us),
        }
    }
}
