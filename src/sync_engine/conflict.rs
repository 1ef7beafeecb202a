//! Secondary-key (barcode) conflict resolution.
//!
//! The mirror enforces uniqueness on product barcodes, but the remote data
//! does not: barcodes are missing, reused across articles, or collide after
//! normalization. Instead of rejecting such records, the engine deposits a
//! visibly synthetic placeholder key and keeps going. Operators later grep
//! for the `TEMP-` prefix to find rows needing manual curation.
//!
//! Placeholder shapes:
//! - `TEMP-NOBC-{key}-{suffix}` when the record has no usable barcode
//! - `TEMP-DUP-{barcode}-{key}-{suffix}` when another row owns the barcode

use chrono::Utc;
use tracing::warn;

use crate::domain::EntityKind;
use crate::infrastructure::mirror_store::{MirrorStore, StoreError};

const TEMP_PREFIX: &str = "TEMP-";
const MISSING_PREFIX: &str = "TEMP-NOBC";
const DUPLICATE_PREFIX: &str = "TEMP-DUP";

/// Longest business-key fragment embedded in a placeholder.
const KEY_FRAGMENT_LEN: usize = 24;

/// Where a resolved secondary key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyProvenance {
    /// The remote value itself, free of conflicts.
    Real,
    /// Synthesized because the record carried no usable key.
    Generated,
    /// Synthesized because another row already owns the remote value.
    DuplicateDisplaced,
}

/// Outcome of resolving one record's secondary key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyResolution {
    /// The key to store. `None` only for kinds without secondary keys.
    pub key: Option<String>,
    /// The normalized remote candidate, kept so a later regeneration can
    /// rebuild a duplicate placeholder from it.
    pub candidate: Option<String>,
    pub provenance: KeyProvenance,
}

impl KeyResolution {
    /// Resolution for kinds that carry no secondary key at all.
    pub fn not_applicable() -> Self {
        Self {
            key: None,
            candidate: None,
            provenance: KeyProvenance::Real,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.key.as_deref().is_some_and(is_temporary_key)
    }
}

/// Recognizes placeholder keys by their reserved prefix.
pub fn is_temporary_key(key: &str) -> bool {
    key.starts_with(TEMP_PREFIX)
}

/// Decides the secondary key for one record before it is written.
///
/// A candidate owned by a row with the *same* business key is our own row
/// seen again and stays `Real`; any other owner displaces the candidate to
/// a duplicate placeholder.
pub async fn resolve(
    store: &MirrorStore,
    kind: EntityKind,
    candidate: Option<&str>,
    business_key: Option<&str>,
    row_index: u64,
) -> Result<KeyResolution, StoreError> {
    if !kind.uses_secondary_key() {
        return Ok(KeyResolution::not_applicable());
    }

    let Some(candidate) = candidate else {
        return Ok(KeyResolution {
            key: Some(missing_key(business_key, row_index, &time_suffix())),
            candidate: None,
            provenance: KeyProvenance::Generated,
        });
    };

    match store.find_by_secondary_key(kind, candidate).await? {
        Some(owner) if owner.business_key.as_deref() != business_key => {
            warn!(
                "🔁 Barcode {candidate} already belongs to row {} ({:?}); displacing",
                owner.id, owner.business_key
            );
            Ok(KeyResolution {
                key: Some(duplicate_key(
                    candidate,
                    business_key,
                    row_index,
                    &time_suffix(),
                )),
                candidate: Some(candidate.to_owned()),
                provenance: KeyProvenance::DuplicateDisplaced,
            })
        }
        _ => Ok(KeyResolution {
            key: Some(candidate.to_owned()),
            candidate: Some(candidate.to_owned()),
            provenance: KeyProvenance::Real,
        }),
    }
}

/// Rebuilds a placeholder after a storage uniqueness violation, with extra
/// entropy so the second attempt cannot collide the same way.
///
/// A `Real` resolution that still hit the constraint lost a race with a
/// concurrent writer; it degrades to a duplicate placeholder here.
pub fn regenerate(
    previous: &KeyResolution,
    business_key: Option<&str>,
    row_index: u64,
) -> KeyResolution {
    let suffix = format!("{}{}", time_suffix(), entropy_suffix());
    match &previous.candidate {
        Some(candidate) => KeyResolution {
            key: Some(duplicate_key(candidate, business_key, row_index, &suffix)),
            candidate: Some(candidate.clone()),
            provenance: KeyProvenance::DuplicateDisplaced,
        },
        None => KeyResolution {
            key: Some(missing_key(business_key, row_index, &suffix)),
            candidate: None,
            provenance: KeyProvenance::Generated,
        },
    }
}

fn missing_key(business_key: Option<&str>, row_index: u64, suffix: &str) -> String {
    format!(
        "{MISSING_PREFIX}-{}-{suffix}",
        key_fragment(business_key, row_index)
    )
}

fn duplicate_key(
    candidate: &str,
    business_key: Option<&str>,
    row_index: u64,
    suffix: &str,
) -> String {
    format!(
        "{DUPLICATE_PREFIX}-{candidate}-{}-{suffix}",
        key_fragment(business_key, row_index)
    )
}

fn key_fragment(business_key: Option<&str>, row_index: u64) -> String {
    match business_key {
        Some(key) => key.chars().take(KEY_FRAGMENT_LEN).collect(),
        None => format!("ROW{row_index}"),
    }
}

/// Last six digits of the current unix-millis clock. Enough to keep
/// placeholders generated in one run distinct from earlier runs.
fn time_suffix() -> String {
    let millis = Utc::now().timestamp_millis();
    format!("{:06}", millis.rem_euclid(1_000_000))
}

fn entropy_suffix() -> String {
    format!("{:04x}", fastrand::u16(..))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityFields, NormalizedRecord};
    use crate::infrastructure::database::DatabaseConnection;

    async fn store() -> MirrorStore {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        MirrorStore::new(db.pool_arc())
    }

    fn product(business_key: &str, secondary: Option<&str>) -> NormalizedRecord {
        NormalizedRecord {
            kind: EntityKind::Product,
            remote_id: Some(format!("uuid-{business_key}")),
            business_key: Some(business_key.to_owned()),
            display_name: format!("Product {business_key}"),
            secondary_key: secondary.map(str::to_owned),
            is_active: true,
            fields: EntityFields::Product {
                price: 1.0,
                stock: 0.0,
                description: None,
            },
        }
    }

    #[tokio::test]
    async fn free_candidate_resolves_as_real() {
        let store = store().await;
        let resolution = resolve(&store, EntityKind::Product, Some("770123"), Some("SKU-1"), 0)
            .await
            .unwrap();
        assert_eq!(resolution.key.as_deref(), Some("770123"));
        assert_eq!(resolution.provenance, KeyProvenance::Real);
        assert!(!resolution.is_temporary());
    }

    #[tokio::test]
    async fn missing_candidate_generates_a_placeholder() {
        let store = store().await;
        let resolution = resolve(&store, EntityKind::Product, None, Some("SKU-2"), 7)
            .await
            .unwrap();
        let key = resolution.key.unwrap();
        assert!(key.starts_with("TEMP-NOBC-SKU-2-"), "unexpected key: {key}");
        assert_eq!(resolution.provenance, KeyProvenance::Generated);
        assert!(is_temporary_key(&key));

        let anonymous = resolve(&store, EntityKind::Product, None, None, 41)
            .await
            .unwrap();
        assert!(anonymous.key.unwrap().starts_with("TEMP-NOBC-ROW41-"));
    }

    #[tokio::test]
    async fn taken_candidate_is_displaced_to_a_duplicate_placeholder() {
        let store = store().await;
        let owner = product("SKU-OWNER", Some("555000"));
        let resolution = resolve(&store, EntityKind::Product, Some("555000"), Some("SKU-OWNER"), 0)
            .await
            .unwrap();
        store.insert(&owner, &resolution).await.unwrap();

        // Same barcode, same business key: still ours, stays real.
        let same = resolve(&store, EntityKind::Product, Some("555000"), Some("SKU-OWNER"), 1)
            .await
            .unwrap();
        assert_eq!(same.provenance, KeyProvenance::Real);

        // Same barcode, different business key: displaced.
        let clash = resolve(&store, EntityKind::Product, Some("555000"), Some("SKU-OTHER"), 2)
            .await
            .unwrap();
        assert_eq!(clash.provenance, KeyProvenance::DuplicateDisplaced);
        let key = clash.key.as_deref().unwrap();
        assert!(
            key.starts_with("TEMP-DUP-555000-SKU-OTHER-"),
            "unexpected key: {key}"
        );
    }

    #[tokio::test]
    async fn other_kinds_resolve_to_no_key() {
        let store = store().await;
        let resolution = resolve(&store, EntityKind::Customer, Some("ignored"), Some("900"), 0)
            .await
            .unwrap();
        assert_eq!(resolution, KeyResolution::not_applicable());
    }

    #[test]
    fn regeneration_adds_entropy_and_keeps_the_shape() {
        let generated = KeyResolution {
            key: Some("TEMP-NOBC-SKU-9-123456".into()),
            candidate: None,
            provenance: KeyProvenance::Generated,
        };
        let again = regenerate(&generated, Some("SKU-9"), 3);
        let key = again.key.as_deref().unwrap();
        assert!(key.starts_with("TEMP-NOBC-SKU-9-"));
        assert_ne!(key, generated.key.as_deref().unwrap());
        assert_eq!(again.provenance, KeyProvenance::Generated);

        // A real key that lost a write race degrades to a duplicate marker.
        let real = KeyResolution {
            key: Some("770555".into()),
            candidate: Some("770555".into()),
            provenance: KeyProvenance::Real,
        };
        let displaced = regenerate(&real, Some("SKU-9"), 3);
        assert!(displaced
            .key
            .as_deref()
            .unwrap()
            .starts_with("TEMP-DUP-770555-SKU-9-"));
        assert_eq!(displaced.provenance, KeyProvenance::DuplicateDisplaced);
    }
}
