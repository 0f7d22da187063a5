use sqlx::SqlitePool;
use tracing::info;

use crate::error::QueryResult;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS customers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT,
        created_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sku TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        price REAL NOT NULL,
        stock_quantity INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        customer_id INTEGER NOT NULL REFERENCES customers(id),
        total REAL NOT NULL,
        status TEXT,
        created_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS order_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        order_id INTEGER NOT NULL REFERENCES orders(id),
        product_id INTEGER NOT NULL REFERENCES products(id),
        quantity INTEGER NOT NULL,
        price REAL NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        order_id INTEGER NOT NULL REFERENCES orders(id),
        invoice_number TEXT NOT NULL UNIQUE,
        total REAL NOT NULL,
        status TEXT NOT NULL,
        issued_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        invoice_id INTEGER NOT NULL REFERENCES invoices(id),
        amount REAL NOT NULL,
        method TEXT,
        paid_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS leads (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        customer_name TEXT,
        contact_email TEXT,
        message TEXT,
        score REAL,
        status TEXT,
        created_at TEXT
    )
    "#,
];

const CUSTOMERS: &[(&str, &str, &str)] = &[
    ("Acme Corp", "contact@acme.example", "2024-01-10 10:00:00"),
    ("Globex LLC", "sales@globex.example", "2024-02-15 12:30:00"),
    ("Initech", "info@initech.example", "2024-03-01 09:15:00"),
];

const PRODUCTS: &[(&str, &str, f64, i64)] = &[
    ("WP-001", "Widget Pro", 199.99, 42),
    ("SVC-A", "Service A", 499.00, 100),
    ("TM-100", "Tool Max", 249.50, 8),
];

const ORDERS: &[(i64, f64, &str, &str)] = &[
    (1, 948.49, "paid", "2024-04-05 14:00:00"),
    (2, 249.50, "pending", "2024-04-10 13:20:00"),
    (1, 499.00, "paid", "2024-05-02 09:40:00"),
    (3, 199.99, "cancelled", "2024-05-18 16:05:00"),
];

/// (order_id, product_id, quantity, price)
const ORDER_ITEMS: &[(i64, i64, i64, f64)] = &[
    (1, 1, 2, 199.99),
    (1, 2, 1, 499.00),
    (2, 3, 1, 249.50),
    (3, 2, 1, 499.00),
    (4, 1, 1, 199.99),
];

const INVOICES: &[(i64, &str, f64, &str, &str)] = &[
    (1, "INV-1001", 948.49, "paid", "2024-04-05 15:00:00"),
    (2, "INV-1002", 249.50, "pending", "2024-04-10 14:00:00"),
    (3, "INV-1003", 499.00, "paid", "2024-05-02 10:00:00"),
];

/// (invoice_id, amount, method, paid_at)
const PAYMENTS: &[(i64, f64, &str, &str)] = &[
    (1, 948.49, "card", "2024-04-06 12:00:00"),
    (3, 499.00, "transfer", "2024-05-09 09:30:00"),
    (2, 100.00, "transfer", "2024-04-20 11:00:00"),
];

const LEADS: &[(&str, &str, &str, f64, &str, &str)] = &[
    (
        "Wayne Enterprises",
        "bruce@wayne.example",
        "Interested in bulk order",
        0.9,
        "new",
        "2024-04-02 08:30:00",
    ),
    (
        "Stark Industries",
        "tony@stark.example",
        "Request for quote",
        0.8,
        "contacted",
        "2024-04-03 11:45:00",
    ),
];

/// Create the minimal ERP schema and seed rows.
///
/// Provisioning bypasses the safety validator; it is never reachable from a
/// conversation. Seeding is skipped when customers already exist.
pub async fn seed_sample_data(pool: &SqlitePool) -> QueryResult<()> {
    let mut tx = pool.begin().await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers")
        .fetch_one(&mut *tx)
        .await?;
    if existing > 0 {
        tx.commit().await?;
        info!(customers = existing, "Sample data already present");
        return Ok(());
    }

    for (name, email, created_at) in CUSTOMERS {
        sqlx::query("INSERT INTO customers (name, email, created_at) VALUES (?, ?, ?)")
            .bind(*name)
            .bind(*email)
            .bind(*created_at)
            .execute(&mut *tx)
            .await?;
    }

    for (sku, name, price, stock) in PRODUCTS {
        sqlx::query("INSERT INTO products (sku, name, price, stock_quantity) VALUES (?, ?, ?, ?)")
            .bind(*sku)
            .bind(*name)
            .bind(*price)
            .bind(*stock)
            .execute(&mut *tx)
            .await?;
    }

    for (customer_id, total, status, created_at) in ORDERS {
        sqlx::query(
            "INSERT INTO orders (customer_id, total, status, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(*customer_id)
        .bind(*total)
        .bind(*status)
        .bind(*created_at)
        .execute(&mut *tx)
        .await?;
    }

    for (order_id, product_id, quantity, price) in ORDER_ITEMS {
        sqlx::query(
            "INSERT INTO order_items (order_id, product_id, quantity, price) VALUES (?, ?, ?, ?)",
        )
        .bind(*order_id)
        .bind(*product_id)
        .bind(*quantity)
        .bind(*price)
        .execute(&mut *tx)
        .await?;
    }

    for (order_id, number, total, status, issued_at) in INVOICES {
        sqlx::query(
            r#"
            INSERT INTO invoices (order_id, invoice_number, total, status, issued_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(*order_id)
        .bind(*number)
        .bind(*total)
        .bind(*status)
        .bind(*issued_at)
        .execute(&mut *tx)
        .await?;
    }

    for (invoice_id, amount, method, paid_at) in PAYMENTS {
        sqlx::query("INSERT INTO payments (invoice_id, amount, method, paid_at) VALUES (?, ?, ?, ?)")
            .bind(*invoice_id)
            .bind(*amount)
            .bind(*method)
            .bind(*paid_at)
            .execute(&mut *tx)
            .await?;
    }

    for (name, email, message, score, status, created_at) in LEADS {
        sqlx::query(
            r#"
            INSERT INTO leads (customer_name, contact_email, message, score, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(*name)
        .bind(*email)
        .bind(*message)
        .bind(*score)
        .bind(*status)
        .bind(*created_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(
        customers = CUSTOMERS.len(),
        products = PRODUCTS.len(),
        orders = ORDERS.len(),
        invoices = INVOICES.len(),
        leads = LEADS.len(),
        "Seeded sample business data"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        seed_sample_data(db.pool()).await.unwrap();
        seed_sample_data(db.pool()).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, CUSTOMERS.len() as i64);
    }

    #[tokio::test]
    async fn test_seeded_rows_reference_each_other() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        seed_sample_data(db.pool()).await.unwrap();

        let orphans: i64 = sqlx::query_scalar(
            r#"
            SELECT
                (SELECT COUNT(*) FROM order_items i
                    LEFT JOIN products p ON p.id = i.product_id WHERE p.id IS NULL)
              + (SELECT COUNT(*) FROM invoices v
                    LEFT JOIN orders o ON o.id = v.order_id WHERE o.id IS NULL)
              + (SELECT COUNT(*) FROM payments y
                    LEFT JOIN invoices v ON v.id = y.invoice_id WHERE v.id IS NULL)
            "#,
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(orphans, 0);

        let invoiced: f64 = sqlx::query_scalar("SELECT ROUND(SUM(total), 2) FROM invoices")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(invoiced, 1696.99);
    }
}
