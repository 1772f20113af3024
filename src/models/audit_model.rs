//! models/audit_model.rs
//! Eventos del ledger append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Created,
    Blocked,
    QueuedForApproval,
    Approved,
    Rejected,
    ExecutionStarted,
    ExecutionSucceeded,
    ExecutionFailed,
    VerificationSucceeded,
    VerificationFailed,
    Reverted,
    Note,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::Created => "created",
            AuditEventType::Blocked => "blocked",
            AuditEventType::QueuedForApproval => "queued_for_approval",
            AuditEventType::Approved => "approved",
            AuditEventType::Rejected => "rejected",
            AuditEventType::ExecutionStarted => "execution_started",
            AuditEventType::ExecutionSucceeded => "execution_succeeded",
            AuditEventType::ExecutionFailed => "execution_failed",
            AuditEventType::VerificationSucceeded => "verification_succeeded",
            AuditEventType::VerificationFailed => "verification_failed",
            AuditEventType::Reverted => "reverted",
            AuditEventType::Note => "note",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let parsed = match value {
            "created" => AuditEventType::Created,
            "blocked" => AuditEventType::Blocked,
            "queued_for_approval" => AuditEventType::QueuedForApproval,
            "approved" => AuditEventType::Approved,
            "rejected" => AuditEventType::Rejected,
            "execution_started" => AuditEventType::ExecutionStarted,
            "execution_succeeded" => AuditEventType::ExecutionSucceeded,
            "execution_failed" => AuditEventType::ExecutionFailed,
            "verification_succeeded" => AuditEventType::VerificationSucceeded,
            "verification_failed" => AuditEventType::VerificationFailed,
            "reverted" => AuditEventType::Reverted,
            "note" => AuditEventType::Note,
            _ => return None,
        };
        Some(parsed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Ai,
    Human,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Ai => "ai",
            ActorType::Human => "human",
            ActorType::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ai" => Some(ActorType::Ai),
            "human" => Some(ActorType::Human),
            "system" => Some(ActorType::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub seq: i64,
    pub id: String,
    pub workspace_id: String,
    pub ad_account_id: Option<String>,
    pub unit_id: Option<String>,
    pub event_type: AuditEventType,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub run_id: Option<String>,
    pub message: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

/// Evento a registrar. `details` lleva before_state / mutation / after_state / expected.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub workspace_id: String,
    pub ad_account_id: Option<String>,
    pub unit_id: Option<String>,
    pub event_type: AuditEventType,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub run_id: Option<String>,
    pub message: String,
    pub details: Value,
}

impl NewAuditEvent {
    pub fn new(workspace_id: &str, event_type: AuditEventType, message: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            ad_account_id: None,
            unit_id: None,
            event_type,
            actor_type: ActorType::System,
            actor_id: None,
            run_id: None,
            message: message.into(),
            details: Value::Object(Default::default()),
        }
    }

    pub fn unit(mut self, unit_id: &str) -> Self {
        self.unit_id = Some(unit_id.to_string());
        self
    }

    pub fn account(mut self, ad_account_id: &str) -> Self {
        self.ad_account_id = Some(ad_account_id.to_string());
        self
    }

    pub fn actor(mut self, actor_type: ActorType, actor_id: Option<&str>) -> Self {
        self.actor_type = actor_type;
        self.actor_id = actor_id.map(str::to_string);
        self
    }

    pub fn run(mut self, run_id: Option<&str>) -> Self {
        self.run_id = run_id.map(str::to_string);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}
