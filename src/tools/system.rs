use async_trait::async_trait;
use serde_json::Value;

use super::{first_row, Tool, ToolDescriptor};
use crate::database::GuardedDatabase;
use crate::error::ToolResult;

/// Record counts for the core business tables.
pub struct SystemStatus {
    db: GuardedDatabase,
}

impl SystemStatus {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for SystemStatus {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("system_status", "Customer, order and lead counts")
    }

    async fn invoke(&self, _input: Value) -> ToolResult<Value> {
        let rows = self
            .db
            .read(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM customers) AS customers,
                    (SELECT COUNT(*) FROM orders) AS orders,
                    (SELECT COUNT(*) FROM leads) AS leads
                "#,
                &[],
            )
            .await?;
        Ok(first_row(rows))
    }
}
