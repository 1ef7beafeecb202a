//! Normalization throughput benchmarks.
//!
//! Normalization runs once per record on every page of a bulk sync, so its
//! per-call cost bounds how fast a catalog can be mirrored once network and
//! storage stop being the bottleneck.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use catalog_mirror::domain::{EntityKind, RemoteRecord};
use catalog_mirror::sync_engine::normalizer::{
    normalize, normalize_secondary_key, sanitize_text,
};

fn product_record() -> RemoteRecord {
    RemoteRecord::new(json!({
        "id": "ec4c9b4a-ffe3-44c3-a271-7e4c3f0d5b2e",
        "code": "SKU-100245",
        "name": "  Chocolatina artesanal 70% cacao  ",
        "description": "Barra de chocolate de origen único, 55 g.",
        "barcode": "7701234,000",
        "active": true,
        "prices": [{"currency_code": "COP", "price_list": [{"position": 1, "value": 8900.0}]}],
        "available_quantity": 42.0,
        "metadata": [
            {"name": "color", "value": "oscuro"},
            {"name": "Codigo de barras", "value": "7701234000999"}
        ]
    }))
}

fn customer_record() -> RemoteRecord {
    RemoteRecord::new(json!({
        "id": "1f0a7c2d-30cc-4f8e-9f47-2f42b3a1e9d0",
        "identification": "901234567",
        "name": ["Distribuidora", "El", "Puerto"],
        "commercial_name": "El Puerto",
        "person_type": "Company",
        "id_type": {"code": "31", "name": "NIT"},
        "contacts": [{"email": "compras@elpuerto.co"}],
        "phones": [{"number": "605 555 0199"}],
        "address": {
            "address": "Calle 30 # 15-22",
            "city": {
                "city_name": "Barranquilla",
                "state_name": "Atlántico",
                "country_name": "Colombia"
            }
        },
        "active": true
    }))
}

fn normalization_benches(c: &mut Criterion) {
    let product = product_record();
    c.bench_function("normalize product record", |b| {
        b.iter(|| normalize(black_box(&product), EntityKind::Product))
    });

    let customer = customer_record();
    c.bench_function("normalize customer record", |b| {
        b.iter(|| normalize(black_box(&customer), EntityKind::Customer))
    });

    c.bench_function("normalize messy barcode", |b| {
        b.iter(|| normalize_secondary_key(black_box(" 77 012 34,000 ")))
    });

    c.bench_function("sanitize padded name", |b| {
        b.iter(|| sanitize_text(black_box("  Caf\u{0000}é con pan\u{0007}ela \u{FFFD}  ")))
    });
}

criterion_group!(benches, normalization_benches);
criterion_main!(benches);
