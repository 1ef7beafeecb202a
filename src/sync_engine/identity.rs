//! Identity resolution: which local row, if any, is this remote record?
//!
//! Remote ids are supposed to be stable but are observed to change when the
//! remote re-imports its own data. The business key is the durable identity,
//! so a miss on remote id falls through to a business-key lookup, and a hit
//! there re-links the row to the new remote id instead of duplicating it.

use tracing::warn;

use crate::domain::{MirrorRow, NormalizedRecord};
use crate::infrastructure::mirror_store::{MirrorStore, StoreError};

/// How the incoming record maps onto the mirror.
#[derive(Debug, Clone, PartialEq)]
pub enum RowMatch {
    /// No row matches either identity; insert a new one.
    Create,
    /// Matched an existing row; update it in place.
    Update(MirrorRow),
    /// Matched by business key while the stored remote id differs (or was
    /// never set); update and rewrite the link.
    Relink(MirrorRow),
}

impl RowMatch {
    pub fn existing(&self) -> Option<&MirrorRow> {
        match self {
            RowMatch::Create => None,
            RowMatch::Update(row) | RowMatch::Relink(row) => Some(row),
        }
    }
}

/// Resolves the target row for a normalized record.
///
/// Lookup order is remote id first, business key second. Records carrying
/// neither identity never reach this point; the pipeline rejects them.
pub async fn resolve(
    store: &MirrorStore,
    record: &NormalizedRecord,
) -> Result<RowMatch, StoreError> {
    if let Some(remote_id) = &record.remote_id {
        if let Some(row) = store.find_by_remote_id(record.kind, remote_id).await? {
            return Ok(RowMatch::Update(row));
        }
    }

    if let Some(business_key) = &record.business_key {
        if let Some(row) = store.find_by_business_key(record.kind, business_key).await? {
            return Ok(match &record.remote_id {
                Some(new_id) if row.remote_id.as_deref() != Some(new_id.as_str()) => {
                    warn!(
                        "🔗 Re-linking {} {business_key}: remote id {:?} -> {new_id}",
                        record.kind, row.remote_id
                    );
                    RowMatch::Relink(row)
                }
                // No new remote id to write, or the id already matches
                // (possible when the remote-id lookup was skipped).
                _ => RowMatch::Update(row),
            });
        }
    }

    Ok(RowMatch::Create)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityFields, EntityKind};
    use crate::infrastructure::database::DatabaseConnection;
    use crate::sync_engine::conflict::KeyResolution;

    async fn store() -> MirrorStore {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        MirrorStore::new(db.pool_arc())
    }

    fn customer(remote_id: Option<&str>, business_key: &str) -> NormalizedRecord {
        NormalizedRecord {
            kind: EntityKind::Customer,
            remote_id: remote_id.map(str::to_owned),
            business_key: Some(business_key.to_owned()),
            display_name: format!("Customer {business_key}"),
            secondary_key: None,
            is_active: true,
            fields: EntityFields::Customer {
                id_type: Some("NIT".into()),
                person_type: None,
                commercial_name: None,
                email: None,
                phone: None,
                address: None,
                city: None,
                state: None,
                country: None,
            },
        }
    }

    #[tokio::test]
    async fn unknown_record_resolves_to_create() {
        let store = store().await;
        let record = customer(Some("uuid-1"), "900111");
        assert_eq!(resolve(&store, &record).await.unwrap(), RowMatch::Create);
    }

    #[tokio::test]
    async fn remote_id_match_wins_over_business_key() {
        let store = store().await;
        let record = customer(Some("uuid-1"), "900111");
        store
            .insert(&record, &KeyResolution::not_applicable())
            .await
            .unwrap();

        let found = resolve(&store, &record).await.unwrap();
        match found {
            RowMatch::Update(row) => assert_eq!(row.remote_id.as_deref(), Some("uuid-1")),
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn changed_remote_id_resolves_to_relink() {
        let store = store().await;
        let original = customer(Some("uuid-old"), "900222");
        store
            .insert(&original, &KeyResolution::not_applicable())
            .await
            .unwrap();

        let reimported = customer(Some("uuid-new"), "900222");
        match resolve(&store, &reimported).await.unwrap() {
            RowMatch::Relink(row) => {
                assert_eq!(row.remote_id.as_deref(), Some("uuid-old"));
                assert_eq!(row.business_key.as_deref(), Some("900222"));
            }
            other => panic!("expected relink, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_remote_id_updates_without_relink() {
        let store = store().await;
        let original = customer(Some("uuid-1"), "900333");
        store
            .insert(&original, &KeyResolution::not_applicable())
            .await
            .unwrap();

        let without_id = customer(None, "900333");
        match resolve(&store, &without_id).await.unwrap() {
            RowMatch::Update(row) => assert_eq!(row.business_key.as_deref(), Some("900333")),
            other => panic!("expected update, got {other:?}"),
        }
    }
}
