//! models/execution_model.rs
//! Unidad de ejecución, su máquina de estados y los resultados del ejecutor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ads_model::EnsureResult;
use crate::models::audit_model::ActorType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Created,
    Blocked,
    QueuedForApproval,
    Approved,
    Rejected,
    Executing,
    Executed,
    Failed,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Created => "created",
            UnitStatus::Blocked => "blocked",
            UnitStatus::QueuedForApproval => "queued_for_approval",
            UnitStatus::Approved => "approved",
            UnitStatus::Rejected => "rejected",
            UnitStatus::Executing => "executing",
            UnitStatus::Executed => "executed",
            UnitStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(UnitStatus::Created),
            "blocked" => Some(UnitStatus::Blocked),
            "queued_for_approval" => Some(UnitStatus::QueuedForApproval),
            "approved" => Some(UnitStatus::Approved),
            "rejected" => Some(UnitStatus::Rejected),
            "executing" => Some(UnitStatus::Executing),
            "executed" => Some(UnitStatus::Executed),
            "failed" => Some(UnitStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionUnit {
    pub id: String,
    pub workspace_id: String,
    pub owner_id: String,
    pub ad_account_id: String,
    pub status: UnitStatus,
    pub proposed_payload: Value,
    pub approved_payload: Option<Value>,
    pub executed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Resultado del claim atómico.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResult {
    /// true sólo para el único llamador que hizo approved -> executing.
    pub claimed: bool,
    pub status: UnitStatus,
    pub executed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ExecutionDisabled,
    AlreadyExecuted,
    AlreadyClaimed,
    InvalidState,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ExecutionDisabled => "execution_disabled",
            SkipReason::AlreadyExecuted => "already_executed",
            SkipReason::AlreadyClaimed => "already_claimed",
            SkipReason::InvalidState => "invalid_state",
        }
    }
}

/// Resultado etiquetado del ejecutor. Los fallos reales viajan como `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Applied(EnsureResult),
    Skipped { reason: SkipReason, status: UnitStatus },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResult {
    pub outcome: &'static str,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub status: UnitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ensure: Option<EnsureResult>,
}

impl ExecutionOutcome {
    pub fn to_result(&self) -> ExecuteResult {
        match self {
            ExecutionOutcome::Applied(ensure) => ExecuteResult {
                outcome: "success",
                skipped: false,
                reason: None,
                status: UnitStatus::Executed,
                ensure: Some(ensure.clone()),
            },
            ExecutionOutcome::Skipped { reason, status } => ExecuteResult {
                // Estado inválido es un skip, pero no un éxito.
                outcome: if *reason == SkipReason::InvalidState {
                    "failure"
                } else {
                    "success"
                },
                skipped: true,
                reason: Some(reason.as_str()),
                status: *status,
                ensure: None,
            },
        }
    }
}

/// Body del trigger interno POST /internal/ads/execute
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub proposal_id: String,
    pub workspace_id: String,
    pub ad_account_id: String,
    pub approved_payload: Value,
    pub run_id: Option<String>,
    pub actor_type: Option<ActorType>,
    pub actor_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUnitRequest {
    pub workspace_id: String,
    pub owner_id: String,
    pub ad_account_id: String,
    pub payload: Value,
    pub actor_type: Option<ActorType>,
    pub actor_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub actor_type: Option<ActorType>,
    pub actor_id: Option<String>,
    pub reason: Option<String>,
}
