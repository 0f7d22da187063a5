//! Turn recording and the cancellation audit guard.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::{StorageError, StorageResult};
use crate::handlers::InvocationLog;
use crate::storage::{NewTurn, Storage, ToolInvocation, Turn, TurnStatus};

/// Text recorded for a request that never finished.
pub(crate) const CANCELLED_TURN_TEXT: &str = "Request cancelled before a response was produced.";

/// Append the assistant turn and every invocation as one unit.
pub(crate) async fn record_turn(
    storage: Arc<dyn Storage>,
    conversation_id: String,
    turn: NewTurn,
    invocations: Vec<ToolInvocation>,
) -> StorageResult<Turn> {
    storage
        .append_turn_with_invocations(&conversation_id, turn, &invocations)
        .await
}

/// Run [`record_turn`] on its own task so dropping the caller cannot
/// interrupt it halfway.
pub(crate) async fn record_detached(
    storage: Arc<dyn Storage>,
    conversation_id: String,
    turn: NewTurn,
    invocations: Vec<ToolInvocation>,
) -> StorageResult<Turn> {
    tokio::spawn(record_turn(storage, conversation_id, turn, invocations))
        .await
        .map_err(|e| StorageError::Query {
            message: format!("Recording task failed: {}", e),
        })?
}

/// Records a cancelled turn if a request is dropped after attempting tool
/// calls but before reaching the recording stage.
pub(crate) struct AuditGuard {
    storage: Arc<dyn Storage>,
    conversation_id: String,
    log: InvocationLog,
    handler: Mutex<Option<String>>,
    armed: AtomicBool,
}

impl AuditGuard {
    pub fn new(storage: Arc<dyn Storage>, conversation_id: &str, log: InvocationLog) -> Self {
        Self {
            storage,
            conversation_id: conversation_id.to_string(),
            log,
            handler: Mutex::new(None),
            armed: AtomicBool::new(true),
        }
    }

    pub fn set_handler(&self, handler: &str) {
        *self.handler.lock() = Some(handler.to_string());
    }

    pub fn handler(&self) -> Option<String> {
        self.handler.lock().clone()
    }

    /// Called when the request takes over recording itself.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

impl Drop for AuditGuard {
    fn drop(&mut self) {
        if !self.armed.load(Ordering::SeqCst) || self.log.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(
                conversation_id = %self.conversation_id,
                "No runtime to record cancelled request - audit trail incomplete"
            );
            return;
        };

        let invocations = self.log.snapshot();
        let mut turn = NewTurn::assistant(CANCELLED_TURN_TEXT).with_status(TurnStatus::Cancelled);
        if let Some(handler) = self.handler() {
            turn = turn.with_handler(handler);
        }

        warn!(
            conversation_id = %self.conversation_id,
            invocations = invocations.len(),
            "Request dropped mid-flight, recording cancelled turn"
        );

        let storage = Arc::clone(&self.storage);
        let conversation_id = self.conversation_id.clone();
        runtime.spawn(async move {
            if let Err(e) =
                record_turn(storage, conversation_id.clone(), turn, invocations).await
            {
                error!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Failed to record cancelled request - audit trail incomplete"
                );
            }
        });
    }
}
