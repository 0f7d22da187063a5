use async_trait::async_trait;
use serde_json::Value;

use super::{first_row, int_param, limit_param, rows_output, ParamSpec, Tool, ToolDescriptor};
use crate::database::GuardedDatabase;
use crate::error::ToolResult;

/// Stock level at or below which a product counts as low.
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 20;

/// Product catalog with prices and stock on hand.
pub struct ListProducts {
    db: GuardedDatabase,
}

impl ListProducts {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for ListProducts {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("list_products", "List products with price and stock on hand")
            .with_param("limit", limit_param())
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let rows = self
            .db
            .read(
                r#"
                SELECT id, sku, name, price, stock_quantity
                FROM products
                ORDER BY name
                LIMIT ?
                "#,
                &[int_param(&input, "limit")?.into()],
            )
            .await?;
        Ok(rows_output(rows))
    }
}

/// Totals across the whole catalog.
pub struct StockSummary {
    db: GuardedDatabase,
}

impl StockSummary {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for StockSummary {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "stock_summary",
            "Product count, units in stock and stock value",
        )
    }

    async fn invoke(&self, _input: Value) -> ToolResult<Value> {
        let rows = self
            .db
            .read(
                r#"
                SELECT
                    COUNT(*) AS products,
                    COALESCE(SUM(stock_quantity), 0) AS units_in_stock,
                    ROUND(COALESCE(AVG(stock_quantity), 0.0), 1) AS average_stock,
                    ROUND(COALESCE(SUM(stock_quantity * price), 0.0), 2) AS stock_value
                FROM products
                "#,
                &[],
            )
            .await?;
        Ok(first_row(rows))
    }
}

/// Products whose stock is at or below a threshold, scarcest first.
pub struct LowStock {
    db: GuardedDatabase,
}

impl LowStock {
    pub fn new(db: GuardedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for LowStock {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("low_stock", "Products at or below a stock threshold")
            .with_param(
                "threshold",
                ParamSpec::integer("Stock level counted as low")
                    .minimum(0)
                    .with_default(DEFAULT_LOW_STOCK_THRESHOLD),
            )
    }

    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        let threshold = int_param(&input, "threshold")?;
        let rows = self
            .db
            .read(
                r#"
                SELECT id, sku, name, stock_quantity
                FROM products
                WHERE stock_quantity <= ?
                ORDER BY stock_quantity, name
                "#,
                &[threshold.into()],
            )
            .await?;

        let mut output = rows_output(rows);
        output["threshold"] = threshold.into();
        Ok(output)
    }
}
