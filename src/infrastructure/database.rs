// Database connection and pool management
// This module handles SQLite database connections using sqlx

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Create database file directory if it doesn't exist
        let db_path = if database_url.starts_with("sqlite://") {
            database_url.trim_start_matches("sqlite://")
        } else if database_url.starts_with("sqlite:") {
            database_url.trim_start_matches("sqlite:")
        } else {
            database_url
        };

        if !Path::new(db_path).exists() {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            std::fs::File::create(db_path)?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Private in-memory database, used by tests. Single connection so the
    /// whole pool sees one database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn pool_arc(&self) -> Arc<SqlitePool> {
        Arc::new(self.pool.clone())
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_products_sql = r#"
            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_id TEXT,
                business_key TEXT,
                secondary_key TEXT NOT NULL,
                display_name TEXT NOT NULL,
                description TEXT,
                price REAL NOT NULL DEFAULT 0,
                stock REAL NOT NULL DEFAULT 0,
                category_label TEXT NOT NULL DEFAULT 'UNCLASSIFIED',
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                last_sync_at DATETIME
            )
        "#;

        let create_customers_sql = r#"
            CREATE TABLE IF NOT EXISTS customers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_id TEXT,
                business_key TEXT,
                display_name TEXT NOT NULL,
                id_type TEXT,
                person_type TEXT,
                commercial_name TEXT,
                email TEXT,
                phone TEXT,
                address TEXT,
                city TEXT,
                state TEXT,
                country TEXT,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                last_sync_at DATETIME
            )
        "#;

        let create_categories_sql = r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_id TEXT,
                business_key TEXT,
                display_name TEXT NOT NULL,
                description TEXT,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                last_sync_at DATETIME
            )
        "#;

        // The unique secondary-key index is what conflict resolution leans
        // on; the partial unique indexes keep identities one-to-one without
        // rejecting rows that have no remote link yet.
        let index_sql = [
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_products_secondary_key ON products (secondary_key)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_products_remote_id ON products (remote_id) WHERE remote_id IS NOT NULL",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_products_business_key ON products (business_key) WHERE business_key IS NOT NULL",
            "CREATE INDEX IF NOT EXISTS idx_products_last_sync_at ON products (last_sync_at)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_customers_remote_id ON customers (remote_id) WHERE remote_id IS NOT NULL",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_customers_business_key ON customers (business_key) WHERE business_key IS NOT NULL",
            "CREATE INDEX IF NOT EXISTS idx_customers_last_sync_at ON customers (last_sync_at)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_remote_id ON categories (remote_id) WHERE remote_id IS NOT NULL",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_business_key ON categories (business_key) WHERE business_key IS NOT NULL",
            "CREATE INDEX IF NOT EXISTS idx_categories_last_sync_at ON categories (last_sync_at)",
        ];

        sqlx::query(create_products_sql).execute(&self.pool).await?;
        sqlx::query(create_customers_sql).execute(&self.pool).await?;
        sqlx::query(create_categories_sql).execute(&self.pool).await?;
        for sql in index_sql {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_database_connection() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test.db");
        let database_url = format!("sqlite:{}", db_path.to_string_lossy());

        let db = DatabaseConnection::new(&database_url).await?;
        assert!(!db.pool().is_closed());
        Ok(())
    }

    #[tokio::test]
    async fn test_migration_creates_mirror_tables() -> Result<()> {
        let db = DatabaseConnection::in_memory().await?;
        db.migrate().await?;

        for table in ["products", "customers", "categories"] {
            let found =
                sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
                    .bind(table)
                    .fetch_optional(db.pool())
                    .await?;
            assert!(found.is_some(), "table {table} missing");
        }

        // Migration must be re-runnable.
        db.migrate().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_secondary_key_uniqueness_is_enforced() -> Result<()> {
        let db = DatabaseConnection::in_memory().await?;
        db.migrate().await?;

        sqlx::query(
            "INSERT INTO products (secondary_key, display_name) VALUES ('770001', 'first')",
        )
        .execute(db.pool())
        .await?;

        let dup = sqlx::query(
            "INSERT INTO products (secondary_key, display_name) VALUES ('770001', 'second')",
        )
        .execute(db.pool())
        .await;
        assert!(dup.is_err());
        Ok(())
    }
}
