//! models/ads_model.rs
//! Snapshots de recursos de Ads y resultado de las operaciones `ensure_*`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureKind {
    Noop,
    Mutated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureResult {
    pub kind: EnsureKind,
    pub resource_name: String,
    pub before: Value,
    pub after: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdGroupSnapshot {
    pub resource_name: String,
    pub status: String,
}

impl AdGroupSnapshot {
    pub fn to_json(&self) -> Value {
        json!({ "status": self.status })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordSnapshot {
    pub resource_name: String,
    pub cpc_bid_micros: i64,
}

impl KeywordSnapshot {
    pub fn to_json(&self) -> Value {
        json!({ "cpc_bid_micros": self.cpc_bid_micros })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetSnapshot {
    pub resource_name: String,
    pub amount_micros: i64,
}

impl BudgetSnapshot {
    pub fn to_json(&self) -> Value {
        json!({ "amount_micros": self.amount_micros })
    }
}

/// Una operación de mutate (formato REST): update + updateMask.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutateOperation {
    pub update: Value,
    pub update_mask: String,
}

/// Credenciales inyectadas por request (sin cliente global).
/// Sin `Debug`: no deben terminar en los logs.
#[derive(Clone)]
pub struct AdsCredentials {
    pub developer_token: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub login_customer_id: Option<String>,
}
