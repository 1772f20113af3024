//! models/deploy_model.rs
//! Requests/responses de los deploys por canal (email, voz) y contactos del CRM.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::outbox_model::OutboxStatus;

/// Contacto del CRM, sólo lectura.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub industry: Option<String>,
    pub job_title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployEmailRequest {
    pub tenant_id: String,
    pub workspace_id: String,
    pub campaign_run_id: String,
    pub asset_id: String,
    pub subject: String,
    pub body: String,
    /// Lista explícita; si falta se usan los contactos activos del workspace.
    pub recipients: Option<Vec<String>>,
    /// Filtro adicional (AND) sobre los contactos del CRM.
    pub segment: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployVoiceRequest {
    pub tenant_id: String,
    pub workspace_id: String,
    pub campaign_run_id: String,
    pub asset_id: String,
    pub script: String,
    pub phone_numbers: Option<Vec<String>>,
    pub segment: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientResult {
    pub recipient: String,
    pub idempotency_key: String,
    pub status: OutboxStatus,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub sent: usize,
    pub scheduled: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<RecipientResult>,
}

impl DeployResponse {
    pub fn from_results(results: Vec<RecipientResult>) -> Self {
        let mut resp = DeployResponse::default();
        for r in &results {
            if r.skipped {
                resp.skipped += 1;
                continue;
            }
            match r.status {
                OutboxStatus::Sent | OutboxStatus::Called => resp.sent += 1,
                OutboxStatus::Scheduled => resp.scheduled += 1,
                OutboxStatus::Failed => resp.failed += 1,
                OutboxStatus::Queued => {}
            }
        }
        resp.results = results;
        resp
    }
}

/// Resumen del barrido de reconciliación del outbox.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
}
