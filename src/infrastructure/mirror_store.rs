//! Mirror store: idempotent persistence for the three catalog tables.
//!
//! All write policy lives here. Remote-authoritative nullable fields only
//! overwrite when the incoming value is present (`COALESCE`), locally owned
//! columns (`products.category_label`) are never touched, and an existing
//! real secondary key is only replaced when the remote's normalized value
//! actually differs. Uniqueness violations come back as a dedicated error
//! variant so the caller can regenerate a placeholder key and retry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::{EntityFields, EntityKind, MirrorRow, NormalizedRecord};
use crate::sync_engine::conflict::{is_temporary_key, KeyProvenance, KeyResolution};
use crate::sync_engine::normalizer::normalize_secondary_key;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An insert or update collided with the unique secondary-key index.
    #[error("secondary key already in use: {key}")]
    UniqueViolation { key: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Aggregate row counts for one mirror table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub total: u32,
    pub active: u32,
    /// Rows still carrying a placeholder secondary key. Always 0 for kinds
    /// without secondary keys.
    pub temporary_keys: u32,
}

/// Full product row, used by targeted lookups and the status surface.
#[derive(Debug, Clone)]
pub struct ProductRow {
    pub id: i64,
    pub remote_id: Option<String>,
    pub business_key: Option<String>,
    pub secondary_key: String,
    pub display_name: String,
    pub description: Option<String>,
    pub price: f64,
    pub stock: f64,
    pub category_label: String,
    pub is_active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Full customer row.
#[derive(Debug, Clone)]
pub struct CustomerRow {
    pub id: i64,
    pub remote_id: Option<String>,
    pub business_key: Option<String>,
    pub display_name: String,
    pub id_type: Option<String>,
    pub person_type: Option<String>,
    pub commercial_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub is_active: bool,
}

#[derive(Clone)]
pub struct MirrorStore {
    pool: Arc<SqlitePool>,
}

impl MirrorStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    // ===============================
    // IDENTITY LOOKUPS
    // ===============================

    pub async fn find_by_remote_id(
        &self,
        kind: EntityKind,
        remote_id: &str,
    ) -> Result<Option<MirrorRow>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE remote_id = ?",
            Self::identity_columns(kind),
            kind.table()
        );
        let row = sqlx::query(&sql)
            .bind(remote_id)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.map(|row| Self::to_mirror_row(kind, &row)))
    }

    pub async fn find_by_business_key(
        &self,
        kind: EntityKind,
        business_key: &str,
    ) -> Result<Option<MirrorRow>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE business_key = ?",
            Self::identity_columns(kind),
            kind.table()
        );
        let row = sqlx::query(&sql)
            .bind(business_key)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.map(|row| Self::to_mirror_row(kind, &row)))
    }

    /// Secondary-key lookups only exist for kinds that carry one.
    pub async fn find_by_secondary_key(
        &self,
        kind: EntityKind,
        secondary_key: &str,
    ) -> Result<Option<MirrorRow>, StoreError> {
        if !kind.uses_secondary_key() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {} FROM {} WHERE secondary_key = ?",
            Self::identity_columns(kind),
            kind.table()
        );
        let row = sqlx::query(&sql)
            .bind(secondary_key)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.map(|row| Self::to_mirror_row(kind, &row)))
    }

    // ===============================
    // WRITES
    // ===============================

    /// Inserts a new row and returns its id.
    pub async fn insert(
        &self,
        record: &NormalizedRecord,
        resolution: &KeyResolution,
    ) -> Result<i64, StoreError> {
        let now = Utc::now();
        let result = match &record.fields {
            EntityFields::Product {
                price,
                stock,
                description,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO products
                    (remote_id, business_key, secondary_key, display_name, description,
                     price, stock, is_active, created_at, updated_at, last_sync_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&record.remote_id)
                .bind(&record.business_key)
                .bind(&resolution.key)
                .bind(&record.display_name)
                .bind(description)
                .bind(price)
                .bind(stock)
                .bind(record.is_active)
                .bind(now)
                .bind(now)
                .bind(now)
                .execute(&*self.pool)
                .await
            }
            EntityFields::Customer {
                id_type,
                person_type,
                commercial_name,
                email,
                phone,
                address,
                city,
                state,
                country,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO customers
                    (remote_id, business_key, display_name, id_type, person_type,
                     commercial_name, email, phone, address, city, state, country,
                     is_active, created_at, updated_at, last_sync_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&record.remote_id)
                .bind(&record.business_key)
                .bind(&record.display_name)
                .bind(id_type)
                .bind(person_type)
                .bind(commercial_name)
                .bind(email)
                .bind(phone)
                .bind(address)
                .bind(city)
                .bind(state)
                .bind(country)
                .bind(record.is_active)
                .bind(now)
                .bind(now)
                .bind(now)
                .execute(&*self.pool)
                .await
            }
            EntityFields::Category { description } => {
                sqlx::query(
                    r#"
                    INSERT INTO categories
                    (remote_id, business_key, display_name, description, is_active,
                     created_at, updated_at, last_sync_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&record.remote_id)
                .bind(&record.business_key)
                .bind(&record.display_name)
                .bind(description)
                .bind(record.is_active)
                .bind(now)
                .bind(now)
                .bind(now)
                .execute(&*self.pool)
                .await
            }
        };

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(err) => Err(Self::classify(err, resolution.key.as_deref())),
        }
    }

    /// Updates an existing row in place, applying the field overwrite
    /// policy. The remote id is written through `COALESCE`, which is what
    /// makes a re-link the same statement as a plain update.
    pub async fn update(
        &self,
        row: &MirrorRow,
        record: &NormalizedRecord,
        resolution: &KeyResolution,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let result = match &record.fields {
            EntityFields::Product {
                price,
                stock,
                description,
            } => {
                let next_key = Self::next_secondary_key(row, resolution);
                sqlx::query(
                    r#"
                    UPDATE products SET
                        remote_id = COALESCE(?, remote_id),
                        business_key = COALESCE(?, business_key),
                        secondary_key = COALESCE(?, secondary_key),
                        display_name = ?,
                        description = COALESCE(?, description),
                        price = ?,
                        stock = ?,
                        is_active = ?,
                        updated_at = ?,
                        last_sync_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&record.remote_id)
                .bind(&record.business_key)
                .bind(&next_key)
                .bind(&record.display_name)
                .bind(description)
                .bind(price)
                .bind(stock)
                .bind(record.is_active)
                .bind(now)
                .bind(now)
                .bind(row.id)
                .execute(&*self.pool)
                .await
            }
            EntityFields::Customer {
                id_type,
                person_type,
                commercial_name,
                email,
                phone,
                address,
                city,
                state,
                country,
            } => {
                sqlx::query(
                    r#"
                    UPDATE customers SET
                        remote_id = COALESCE(?, remote_id),
                        business_key = COALESCE(?, business_key),
                        display_name = ?,
                        id_type = COALESCE(?, id_type),
                        person_type = COALESCE(?, person_type),
                        commercial_name = COALESCE(?, commercial_name),
                        email = COALESCE(?, email),
                        phone = COALESCE(?, phone),
                        address = COALESCE(?, address),
                        city = COALESCE(?, city),
                        state = COALESCE(?, state),
                        country = COALESCE(?, country),
                        is_active = ?,
                        updated_at = ?,
                        last_sync_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&record.remote_id)
                .bind(&record.business_key)
                .bind(&record.display_name)
                .bind(id_type)
                .bind(person_type)
                .bind(commercial_name)
                .bind(email)
                .bind(phone)
                .bind(address)
                .bind(city)
                .bind(state)
                .bind(country)
                .bind(record.is_active)
                .bind(now)
                .bind(now)
                .bind(row.id)
                .execute(&*self.pool)
                .await
            }
            EntityFields::Category { description } => {
                sqlx::query(
                    r#"
                    UPDATE categories SET
                        remote_id = COALESCE(?, remote_id),
                        business_key = COALESCE(?, business_key),
                        display_name = ?,
                        description = COALESCE(?, description),
                        is_active = ?,
                        updated_at = ?,
                        last_sync_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&record.remote_id)
                .bind(&record.business_key)
                .bind(&record.display_name)
                .bind(description)
                .bind(record.is_active)
                .bind(now)
                .bind(now)
                .bind(row.id)
                .execute(&*self.pool)
                .await
            }
        };

        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(Self::classify(err, resolution.key.as_deref())),
        }
    }

    /// Marks one row inactive without touching its other columns.
    pub async fn deactivate_row(&self, kind: EntityKind, row_id: i64) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET is_active = 0, updated_at = ? WHERE id = ?",
            kind.table()
        );
        sqlx::query(&sql)
            .bind(Utc::now())
            .bind(row_id)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    /// Deactivates rows the finished run did not touch: active rows whose
    /// `last_sync_at` predates the job start. Returns how many were swept.
    pub async fn deactivate_stale(
        &self,
        kind: EntityKind,
        job_started_at: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let sql = format!(
            r#"
            UPDATE {} SET is_active = 0, updated_at = ?
            WHERE is_active = 1 AND (last_sync_at IS NULL OR last_sync_at < ?)
            "#,
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(job_started_at)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected() as u32)
    }

    // ===============================
    // STATUS QUERIES
    // ===============================

    pub async fn table_counts(&self, kind: EntityKind) -> Result<TableCounts, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) AS total, COALESCE(SUM(is_active), 0) AS active FROM {}",
            kind.table()
        );
        let row = sqlx::query(&sql).fetch_one(&*self.pool).await?;
        let total: i64 = row.get("total");
        let active: i64 = row.get("active");

        let temporary_keys = if kind.uses_secondary_key() {
            let sql = format!(
                "SELECT COUNT(*) AS n FROM {} WHERE secondary_key LIKE 'TEMP-%'",
                kind.table()
            );
            let row = sqlx::query(&sql).fetch_one(&*self.pool).await?;
            row.get::<i64, _>("n") as u32
        } else {
            0
        };

        Ok(TableCounts {
            total: total as u32,
            active: active as u32,
            temporary_keys,
        })
    }

    pub async fn product_by_business_key(
        &self,
        business_key: &str,
    ) -> Result<Option<ProductRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, remote_id, business_key, secondary_key, display_name, description,
                   price, stock, category_label, is_active, last_sync_at
            FROM products WHERE business_key = ?
            "#,
        )
        .bind(business_key)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(|row| ProductRow {
            id: row.get("id"),
            remote_id: row.get("remote_id"),
            business_key: row.get("business_key"),
            secondary_key: row.get("secondary_key"),
            display_name: row.get("display_name"),
            description: row.get("description"),
            price: row.get("price"),
            stock: row.get("stock"),
            category_label: row.get("category_label"),
            is_active: row.get("is_active"),
            last_sync_at: row.get("last_sync_at"),
        }))
    }

    pub async fn customer_by_business_key(
        &self,
        business_key: &str,
    ) -> Result<Option<CustomerRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, remote_id, business_key, display_name, id_type, person_type,
                   commercial_name, email, phone, address, city, state, country, is_active
            FROM customers WHERE business_key = ?
            "#,
        )
        .bind(business_key)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(|row| CustomerRow {
            id: row.get("id"),
            remote_id: row.get("remote_id"),
            business_key: row.get("business_key"),
            display_name: row.get("display_name"),
            id_type: row.get("id_type"),
            person_type: row.get("person_type"),
            commercial_name: row.get("commercial_name"),
            email: row.get("email"),
            phone: row.get("phone"),
            address: row.get("address"),
            city: row.get("city"),
            state: row.get("state"),
            country: row.get("country"),
            is_active: row.get("is_active"),
        }))
    }

    /// Overwrites `products.category_label`, the one locally owned column.
    /// Exists for operators; the sync pipeline never calls it.
    pub async fn set_category_label(&self, row_id: i64, label: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE products SET category_label = ?, updated_at = ? WHERE id = ?")
            .bind(label)
            .bind(Utc::now())
            .bind(row_id)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    // ===============================
    // INTERNAL
    // ===============================

    fn identity_columns(kind: EntityKind) -> &'static str {
        if kind.uses_secondary_key() {
            "id, remote_id, business_key, secondary_key, is_active"
        } else {
            "id, remote_id, business_key, NULL AS secondary_key, is_active"
        }
    }

    fn to_mirror_row(kind: EntityKind, row: &sqlx::sqlite::SqliteRow) -> MirrorRow {
        MirrorRow {
            id: row.get("id"),
            kind,
            remote_id: row.get("remote_id"),
            business_key: row.get("business_key"),
            secondary_key: row.get("secondary_key"),
            is_active: row.get("is_active"),
        }
    }

    /// Decides what the product's secondary key becomes on update. A stored
    /// real key survives unless the remote's normalized value differs; a
    /// placeholder is always replaced once a real key arrives; and a
    /// placeholder resolution never displaces a stored key.
    fn next_secondary_key(row: &MirrorRow, resolution: &KeyResolution) -> Option<String> {
        let current = row.secondary_key.as_deref();
        match (resolution.provenance, resolution.key.as_deref()) {
            (KeyProvenance::Real, Some(resolved)) => match current {
                Some(stored) if is_temporary_key(stored) => Some(resolved.to_owned()),
                Some(stored) => {
                    if normalize_secondary_key(stored).as_deref() == Some(resolved) {
                        Some(stored.to_owned())
                    } else {
                        Some(resolved.to_owned())
                    }
                }
                None => Some(resolved.to_owned()),
            },
            _ => current.map(str::to_owned).or_else(|| resolution.key.clone()),
        }
    }

    fn classify(err: sqlx::Error, attempted_key: Option<&str>) -> StoreError {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation {
                    key: attempted_key.unwrap_or("<unknown>").to_owned(),
                };
            }
        }
        StoreError::Database(err)
    }
}
