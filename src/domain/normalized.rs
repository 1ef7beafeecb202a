//! Canonical record shape produced by normalization.
//!
//! Whatever the remote payload looked like, downstream stages (identity
//! resolution, conflict handling, persistence) only ever see this shape.

use serde::{Deserialize, Serialize};

use super::entity::EntityKind;

/// A remote record mapped to the local schema, with every field cleaned up
/// and every absence made explicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub kind: EntityKind,
    /// Identifier assigned by the remote system. Stable in theory, observed
    /// to change across remote re-imports in practice.
    pub remote_id: Option<String>,
    /// Durable business identity (product code, customer tax id, category
    /// name). Survives remote id churn.
    pub business_key: Option<String>,
    /// Always non-empty; the normalizer substitutes a fallback when the
    /// remote omits every name field.
    pub display_name: String,
    /// Candidate secondary key (barcode), already normalized. Only products
    /// carry one; `None` for other kinds and for products without a usable
    /// barcode.
    pub secondary_key: Option<String>,
    pub is_active: bool,
    pub fields: EntityFields,
}

impl NormalizedRecord {
    /// True when the record carries no identity at all. Such records cannot
    /// be synchronized idempotently and are rejected upstream.
    pub fn is_anonymous(&self) -> bool {
        self.remote_id.is_none() && self.business_key.is_none()
    }
}

/// Per-kind scalar payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityFields {
    Product {
        price: f64,
        stock: f64,
        description: Option<String>,
    },
    Customer {
        id_type: Option<String>,
        person_type: Option<String>,
        commercial_name: Option<String>,
        email: Option<String>,
        phone: Option<String>,
        address: Option<String>,
        city: Option<String>,
        state: Option<String>,
        country: Option<String>,
    },
    Category {
        description: Option<String>,
    },
}

impl EntityFields {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityFields::Product { .. } => EntityKind::Product,
            EntityFields::Customer { .. } => EntityKind::Customer,
            EntityFields::Category { .. } => EntityKind::Category,
        }
    }
}
