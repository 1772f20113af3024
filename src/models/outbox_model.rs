//! models/outbox_model.rs
//! Filas del outbox: un efecto externo intentado (un email, una llamada, un mutate).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Voice,
    Ads,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Voice => "voice",
            Channel::Ads => "ads",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email" => Some(Channel::Email),
            "voice" => Some(Channel::Voice),
            "ads" => Some(Channel::Ads),
            _ => None,
        }
    }

    /// Estado terminal de éxito para el canal.
    pub fn success_status(&self) -> OutboxStatus {
        match self {
            Channel::Voice => OutboxStatus::Called,
            Channel::Email | Channel::Ads => OutboxStatus::Sent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Queued,
    Scheduled,
    Sent,
    Called,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Queued => "queued",
            OutboxStatus::Scheduled => "scheduled",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Called => "called",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(OutboxStatus::Queued),
            "scheduled" => Some(OutboxStatus::Scheduled),
            "sent" => Some(OutboxStatus::Sent),
            "called" => Some(OutboxStatus::Called),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxSkipReason {
    IdempotentReplay,
}

impl OutboxSkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxSkipReason::IdempotentReplay => "idempotent_replay",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: String,
    pub tenant_id: String,
    pub workspace_id: String,
    pub run_id: Option<String>,
    pub channel: Channel,
    pub provider: String,
    pub recipient: String,
    pub idempotency_key: String,
    pub status: OutboxStatus,
    pub payload: Option<Value>,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOutboxEntry {
    pub tenant_id: String,
    pub workspace_id: String,
    pub run_id: Option<String>,
    pub channel: Channel,
    pub provider: String,
    pub recipient: String,
    pub idempotency_key: String,
    /// Contenido ya personalizado; permite reintentar tras un crash con lo mismo.
    pub payload: Option<Value>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Resultado de `insert_pending`: un duplicado es un resultado normal.
/// `status` es el estado que quedó escrito; la decisión de llamar o no al
/// proveedor se toma sobre él y no sobre un reloj leído de nuevo.
#[derive(Debug, Clone)]
pub enum OutboxInsert {
    Inserted { id: String, status: OutboxStatus },
    Duplicate { existing: OutboxEntry },
}
