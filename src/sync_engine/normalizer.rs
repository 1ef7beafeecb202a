//! Pure mapping from raw remote payloads to [`NormalizedRecord`]s.
//!
//! Everything in here is total: a missing or malformed field degrades to a
//! safe default (`None`, `0.0`, a fallback name), never to an error. The
//! same input always normalizes to the same output, which is what makes
//! repeated sync runs idempotent.
//!
//! The cleanup rules encode years of accumulated remote data quirks:
//! barcodes arriving as `7701234,000` or with embedded whitespace, names
//! padded with control characters, document types spelled a dozen ways.

use serde_json::Value;

use crate::domain::{EntityFields, EntityKind, NormalizedRecord, RemoteRecord};

/// Placeholder the remote uses where a barcode should be. Treated as absent.
const BARCODE_PLACEHOLDER: &str = "PENDIENTE";

/// Sentinel the remote stores in `commercial_name` when there is none.
const NO_COMMERCIAL_NAME: &str = "no aplica";

const FALLBACK_PRODUCT_NAME: &str = "Unnamed product";
const FALLBACK_CUSTOMER_NAME: &str = "Unnamed customer";
const FALLBACK_CATEGORY_NAME: &str = "Unnamed category";

/// Metadata entry names that are checked for smuggled barcodes.
const BARCODE_HINTS: [&str; 4] = ["barcode", "barra", "codigo", "código"];

/// Maps one raw record to the canonical shape for its kind.
pub fn normalize(record: &RemoteRecord, kind: EntityKind) -> NormalizedRecord {
    match kind {
        EntityKind::Product => normalize_product(record),
        EntityKind::Customer => normalize_customer(record),
        EntityKind::Category => normalize_category(record),
    }
}

/// Products the remote returns without any price list are internal/hidden
/// articles that must not reach the mirror.
pub fn is_hidden_product(record: &RemoteRecord) -> bool {
    match record.payload().get("prices") {
        Some(Value::Array(prices)) => prices.is_empty(),
        _ => true,
    }
}

fn normalize_product(record: &RemoteRecord) -> NormalizedRecord {
    let business_key = scalar_string(record.payload().get("code"));
    let display_name = record
        .str_at(&["name"])
        .map(|name| sanitize_text(&name))
        .filter(|name| !name.is_empty())
        .or_else(|| business_key.clone())
        .unwrap_or_else(|| FALLBACK_PRODUCT_NAME.to_owned());

    NormalizedRecord {
        kind: EntityKind::Product,
        remote_id: record.remote_id(),
        business_key,
        display_name,
        secondary_key: extract_secondary_key(record),
        is_active: record.bool_at(&["active"]).unwrap_or(true),
        fields: EntityFields::Product {
            price: extract_price(record.payload()),
            stock: record.f64_at(&["available_quantity"]).unwrap_or(0.0),
            description: record
                .str_at(&["description"])
                .map(|d| sanitize_text(&d))
                .filter(|d| !d.is_empty()),
        },
    }
}

fn normalize_customer(record: &RemoteRecord) -> NormalizedRecord {
    let payload = record.payload();
    let business_key = scalar_string(payload.get("identification"));

    let commercial_name = record
        .str_at(&["commercial_name"])
        .map(|n| sanitize_text(&n))
        .filter(|n| !n.is_empty() && !n.eq_ignore_ascii_case(NO_COMMERCIAL_NAME));

    let display_name = customer_display_name(payload)
        .or_else(|| commercial_name.clone())
        .or_else(|| business_key.clone())
        .unwrap_or_else(|| FALLBACK_CUSTOMER_NAME.to_owned());

    let id_type = record
        .str_at(&["id_type", "code"])
        .or_else(|| record.str_at(&["id_type", "name"]))
        .or_else(|| record.str_at(&["id_type"]))
        .map(|raw| normalize_document_type(&raw));

    let city = payload.get("address").and_then(|a| a.get("city"));

    NormalizedRecord {
        kind: EntityKind::Customer,
        remote_id: record.remote_id(),
        business_key,
        display_name,
        secondary_key: None,
        is_active: record.bool_at(&["active"]).unwrap_or(true),
        fields: EntityFields::Customer {
            id_type,
            person_type: record.str_at(&["person_type"]),
            commercial_name,
            email: first_entry_string(payload.get("contacts"), "email"),
            phone: first_entry_string(payload.get("phones"), "number"),
            address: record
                .str_at(&["address", "address"])
                .map(|a| sanitize_text(&a))
                .filter(|a| !a.is_empty()),
            city: nested_city_field(city, "city_name"),
            state: nested_city_field(city, "state_name"),
            country: nested_city_field(city, "country_name"),
        },
    }
}

fn normalize_category(record: &RemoteRecord) -> NormalizedRecord {
    let name = record
        .str_at(&["name"])
        .map(|n| sanitize_text(&n))
        .filter(|n| !n.is_empty());

    NormalizedRecord {
        kind: EntityKind::Category,
        remote_id: record.remote_id(),
        // Account groups have no separate code; the name doubles as the
        // durable identity.
        business_key: name.clone(),
        display_name: name.unwrap_or_else(|| FALLBACK_CATEGORY_NAME.to_owned()),
        secondary_key: None,
        is_active: record.bool_at(&["active"]).unwrap_or(true),
        fields: EntityFields::Category { description: None },
    }
}

/// Strips control characters, stray replacement characters left behind by
/// broken surrogate pairs, and characters outside the Basic Multilingual
/// Plane, then trims. Idempotent.
pub fn sanitize_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() && *c != '\u{FFFD}' && (*c as u32) <= 0xFFFF)
        .collect::<String>()
        .trim()
        .to_owned()
}

/// Canonicalizes a secondary-key (barcode) candidate:
/// commas become dots, whitespace is dropped, and a purely numeric value
/// with a decimal tail (`7701234.000`) loses the tail. Returns `None` when
/// nothing usable remains. Idempotent.
pub fn normalize_secondary_key(raw: &str) -> Option<String> {
    let mut cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    if let Some((integer, fraction)) = cleaned.split_once('.') {
        let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
        if all_digits(integer) && all_digits(fraction) {
            cleaned = integer.to_owned();
        }
    }

    (!cleaned.is_empty()).then_some(cleaned)
}

/// Looks for a usable barcode in priority order: the dedicated field, the
/// additional-fields block, then metadata entries whose name hints at a
/// barcode. The first candidate that survives normalization wins.
pub fn extract_secondary_key(record: &RemoteRecord) -> Option<String> {
    let direct = record.str_at(&["barcode"]);
    let additional = record.str_at(&["additional_fields", "barcode"]);
    let from_metadata = metadata_barcode(record.payload());

    [direct, additional, from_metadata]
        .into_iter()
        .flatten()
        .filter_map(|candidate| normalize_secondary_key(&candidate))
        .find(|key| !key.eq_ignore_ascii_case(BARCODE_PLACEHOLDER))
}

fn metadata_barcode(payload: &Value) -> Option<String> {
    let entries = payload.get("metadata")?.as_array()?;
    entries.iter().find_map(|entry| {
        let name = entry.get("name")?.as_str()?.to_lowercase();
        if BARCODE_HINTS.iter().any(|hint| name.contains(hint)) {
            scalar_string(entry.get("value"))
        } else {
            None
        }
    })
}

/// Unit price from the nested price-list structure. Products without one
/// price at all are filtered out before normalization; a present but
/// malformed structure degrades to `0.0`.
fn extract_price(payload: &Value) -> f64 {
    payload
        .get("prices")
        .and_then(Value::as_array)
        .and_then(|prices| prices.first())
        .and_then(|entry| entry.get("price_list"))
        .and_then(Value::as_array)
        .and_then(|lists| lists.first())
        .and_then(|list| list.get("value"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

/// Collapses the many spellings of identity-document types to one canonical
/// code. Unknown inputs become `OTHER` rather than passing through raw.
pub fn normalize_document_type(raw: &str) -> String {
    let token = raw.trim().to_uppercase();
    let mapped = match token.as_str() {
        "13" => "CC",
        "31" => "NIT",
        "22" => "CE",
        "12" => "TI",
        "41" => "PP",
        "42" => "DNI",
        _ => {
            if token.contains("NIT") {
                "NIT"
            } else if token.contains("EXTRANJER") || token == "CE" {
                "CE"
            } else if token.contains("CIUDADAN") || token == "CC" {
                "CC"
            } else if token.contains("TARJETA") || token == "TI" {
                "TI"
            } else if token.contains("PASAPORTE") || token == "PP" {
                "PP"
            } else if token.contains("DNI") {
                "DNI"
            } else if token.contains("RUT") {
                "RUT"
            } else {
                "OTHER"
            }
        }
    };
    mapped.to_owned()
}

/// The customer name field arrives as an array of name parts for natural
/// persons and as a plain string for companies.
fn customer_display_name(payload: &Value) -> Option<String> {
    let joined = match payload.get("name") {
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        Some(Value::String(s)) => s.clone(),
        _ => return None,
    };
    let cleaned = sanitize_text(&joined);
    (!cleaned.is_empty()).then_some(cleaned)
}

/// `contacts[0].email`, `phones[0].number` and friends.
fn first_entry_string(list: Option<&Value>, field: &str) -> Option<String> {
    let first = list?.as_array()?.first()?;
    scalar_string(first.get(field)).map(|s| sanitize_text(&s)).filter(|s| !s.is_empty())
}

fn nested_city_field(city: Option<&Value>, field: &str) -> Option<String> {
    scalar_string(city?.get(field))
}

/// Accepts both string and numeric scalars, since the remote is not
/// consistent about which one it sends for codes and identifications.
fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
