//! Identity projection of a local mirror row.
//!
//! Lookups during identity and conflict resolution only need the key
//! columns, not the full record, so the store hands back this slim view.

use super::entity::EntityKind;

#[derive(Debug, Clone, PartialEq)]
pub struct MirrorRow {
    pub id: i64,
    pub kind: EntityKind,
    pub remote_id: Option<String>,
    pub business_key: Option<String>,
    pub secondary_key: Option<String>,
    pub is_active: bool,
}

impl MirrorRow {
    /// Whether this row was ever linked to a remote identifier.
    pub fn is_linked(&self) -> bool {
        self.remote_id.is_some()
    }
}
