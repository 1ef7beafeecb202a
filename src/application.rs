//! Application layer module
//!
//! Inbound workflows that sit on top of the sync engine, currently the
//! webhook change-notification intake.

pub mod webhook;

pub use webhook::{ChangeNotification, WebhookDisposition, WebhookIngestor};
