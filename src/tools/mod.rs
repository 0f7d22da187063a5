//! Tool contract, descriptors, the registry and the built-in business tools.
//!
//! Every tool is registered once at startup under an owning handler:
//! - sales: [`ListCustomers`], [`SearchCustomers`], [`CustomerSummary`],
//!   [`ListLeads`], [`LeadSummary`], [`ListOrders`], [`OrderSummary`],
//!   [`UpdateLeadStatus`]
//! - inventory: [`ListProducts`], [`StockSummary`], [`LowStock`]
//! - finance: [`ListInvoices`], [`InvoiceSummary`], [`PaymentSummary`],
//!   [`InvoiceRevenue`]
//! - analytics: [`RunSqlQuery`], [`RunReport`], [`RevenueSummary`]
//! - system: [`SystemStatus`]

mod analytics;
mod finance;
mod inventory;
mod registry;
mod sales;
mod system;
mod types;

pub use analytics::*;
pub use finance::*;
pub use inventory::*;
pub use registry::*;
pub use sales::*;
pub use system::*;
pub use types::*;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::database::{GuardedDatabase, Row};
use crate::error::{RegistryError, ToolError, ToolResult};
use crate::handlers::{
    ANALYTICS_HANDLER, FINANCE_HANDLER, INVENTORY_HANDLER, SALES_HANDLER, SYSTEM_HANDLER,
};
use crate::storage::Storage;

/// A named, schema-described capability a handler can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static description, including the input schema.
    fn descriptor(&self) -> ToolDescriptor;

    /// Run the tool. `input` has already been validated against the schema.
    async fn invoke(&self, input: Value) -> ToolResult<Value>;
}

/// Register every built-in tool under its owning handler.
pub fn register_builtin_tools(
    registry: &ToolRegistry,
    db: GuardedDatabase,
    storage: Arc<dyn Storage>,
) -> Result<(), RegistryError> {
    let sales: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ListCustomers::new(db.clone())),
        Arc::new(SearchCustomers::new(db.clone())),
        Arc::new(CustomerSummary::new(db.clone())),
        Arc::new(ListLeads::new(db.clone())),
        Arc::new(LeadSummary::new(db.clone())),
        Arc::new(ListOrders::new(db.clone())),
        Arc::new(OrderSummary::new(db.clone())),
        Arc::new(UpdateLeadStatus::new(db.clone())),
    ];
    for tool in sales {
        registry.register(tool, SALES_HANDLER)?;
    }

    let inventory: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ListProducts::new(db.clone())),
        Arc::new(StockSummary::new(db.clone())),
        Arc::new(LowStock::new(db.clone())),
    ];
    for tool in inventory {
        registry.register(tool, INVENTORY_HANDLER)?;
    }

    let finance: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ListInvoices::new(db.clone())),
        Arc::new(InvoiceSummary::new(db.clone())),
        Arc::new(PaymentSummary::new(db.clone())),
        Arc::new(InvoiceRevenue::new(db.clone())),
    ];
    for tool in finance {
        registry.register(tool, FINANCE_HANDLER)?;
    }

    let analytics: Vec<Arc<dyn Tool>> = vec![
        Arc::new(RunSqlQuery::new(db.clone())),
        Arc::new(RunReport::new(db.clone(), storage)),
        Arc::new(RevenueSummary::new(db.clone())),
    ];
    for tool in analytics {
        registry.register(tool, ANALYTICS_HANDLER)?;
    }

    registry.register(Arc::new(SystemStatus::new(db)), SYSTEM_HANDLER)?;

    Ok(())
}

pub(crate) fn limit_param() -> ParamSpec {
    ParamSpec::integer("Maximum number of rows")
        .minimum(1)
        .with_default(20)
}

pub(crate) fn str_param<'a>(input: &'a Value, name: &str) -> ToolResult<&'a str> {
    input
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::Failed {
            message: format!("missing string parameter '{}'", name),
        })
}

pub(crate) fn int_param(input: &Value, name: &str) -> ToolResult<i64> {
    input
        .get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| ToolError::Failed {
            message: format!("missing integer parameter '{}'", name),
        })
}

pub(crate) fn rows_output(rows: Vec<Row>) -> Value {
    json!({
        "count": rows.len(),
        "rows": rows,
    })
}

pub(crate) fn first_row(rows: Vec<Row>) -> Value {
    rows.into_iter()
        .next()
        .map(Value::Object)
        .unwrap_or_else(|| json!({}))
}
