//! Entity families handled by the reconciliation engine.
//!
//! The remote ERP exposes three catalog collections that we mirror locally.
//! Every engine operation is scoped to exactly one of these kinds; jobs of
//! different kinds are independent of each other.

use serde::{Deserialize, Serialize};

/// One family of catalog records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Customer,
    Category,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Product,
        EntityKind::Customer,
        EntityKind::Category,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Customer => "customer",
            EntityKind::Category => "category",
        }
    }

    /// Local mirror table for this kind.
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Product => "products",
            EntityKind::Customer => "customers",
            EntityKind::Category => "categories",
        }
    }

    /// Collection segment in the remote API (`/v1/{collection}`).
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Product => "products",
            EntityKind::Customer => "customers",
            EntityKind::Category => "account-groups",
        }
    }

    /// Whether this kind carries the uniqueness-constrained secondary key
    /// (barcode). Customers and categories store none, so conflict
    /// resolution does not apply to them.
    pub fn uses_secondary_key(self) -> bool {
        matches!(self, EntityKind::Product)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "product" | "products" => Ok(EntityKind::Product),
            "customer" | "customers" => Ok(EntityKind::Customer),
            "category" | "categories" | "account-groups" => Ok(EntityKind::Category),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_singular_and_plural_forms() {
        assert_eq!("products".parse::<EntityKind>().unwrap(), EntityKind::Product);
        assert_eq!("Customer".parse::<EntityKind>().unwrap(), EntityKind::Customer);
        assert_eq!("account-groups".parse::<EntityKind>().unwrap(), EntityKind::Category);
        assert!("invoices".parse::<EntityKind>().is_err());
    }

    #[test]
    fn only_products_carry_a_secondary_key() {
        assert!(EntityKind::Product.uses_secondary_key());
        assert!(!EntityKind::Customer.uses_secondary_key());
        assert!(!EntityKind::Category.uses_secondary_key());
    }
}
