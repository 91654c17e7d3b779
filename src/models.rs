use crate::shopify::{SortOrder, UserError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    #[serde(default, alias = "collection_id")]
    pub collection_id: Option<String>,
    #[serde(default, alias = "dry_run")]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReorderReport {
    pub ok: bool,
    pub collection_id: String,
    pub moved: usize,
    pub mode_change: ModeChange,
    pub errors: Vec<UserError>,
    pub job: Option<String>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<Vec<PlannedMove>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub stages: Vec<StageReport>,
}

impl ReorderReport {
    pub fn mode_change_failed(&self) -> bool {
        self.mode_change.succeeded == Some(false)
    }
}

/// Whether the run had to switch the collection to manual sorting first.
#[derive(Debug, Clone, Serialize)]
pub struct ModeChange {
    pub previous: SortOrder,
    pub needed: bool,
    pub succeeded: Option<bool>,
}

impl ModeChange {
    pub fn from_current(previous: SortOrder) -> Self {
        Self {
            previous,
            needed: !previous.is_manual(),
            succeeded: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedMove {
    pub id: String,
    pub new_position: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub discount_percent: Decimal,
}

#[derive(Debug, Serialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
