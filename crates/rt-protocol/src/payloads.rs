//! Typed payloads for domain events.
//!
//! Field names are camelCase on the wire. Fields this build does not model
//! are kept in `extra` so the REST layer can attach data without a protocol
//! change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity used to merge duplicate deliveries of the same event.
pub trait EventKey {
    fn event_key(&self) -> String;
}

// ─────────────────────────────────────────────────────────────────────────────
// Activity
// ─────────────────────────────────────────────────────────────────────────────

/// An activity feed entry (`activity_update`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityData {
    /// Globally unique activity id (assigned by the datastore)
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActivityData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl EventKey for ActivityData {
    fn event_key(&self) -> String {
        self.id.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Quotes
// ─────────────────────────────────────────────────────────────────────────────

/// A quote moved between statuses (`quote_status_change`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteStatusChangeData {
    pub quote_id: String,
    pub new_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QuoteStatusChangeData {
    pub fn new(quote_id: impl Into<String>, new_status: impl Into<String>) -> Self {
        Self {
            quote_id: quote_id.into(),
            new_status: new_status.into(),
            ..Default::default()
        }
    }
}

impl EventKey for QuoteStatusChangeData {
    fn event_key(&self) -> String {
        let at = self
            .changed_at
            .map(|t| t.timestamp_millis().to_string())
            .unwrap_or_default();
        format!("{}:{}:{}", self.quote_id, self.new_status, at)
    }
}

/// A quote was created (`new_quote`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuoteData {
    pub quote_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NewQuoteData {
    pub fn new(quote_id: impl Into<String>, quote_number: impl Into<String>) -> Self {
        Self {
            quote_id: quote_id.into(),
            quote_number: Some(quote_number.into()),
            ..Default::default()
        }
    }
}

impl EventKey for NewQuoteData {
    fn event_key(&self) -> String {
        self.quote_id.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Customers
// ─────────────────────────────────────────────────────────────────────────────

/// A customer record changed (`customer_update`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerUpdateData {
    pub customer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// `created`, `updated` or `deleted`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CustomerUpdateData {
    pub fn new(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            ..Default::default()
        }
    }
}

impl EventKey for CustomerUpdateData {
    fn event_key(&self) -> String {
        let at = self
            .updated_at
            .map(|t| t.timestamp_millis().to_string())
            .unwrap_or_default();
        format!("{}:{}", self.customer_id, at)
    }
}
