//! models/guardrail_model.rs
//! Política de guardrails por (workspace, cuenta) y sus topes absolutos.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ExecutorError;

/// Topes absolutos: ningún tenant puede configurar por encima.
pub const MAX_SINGLE_CHANGE_PCT_CAP: f64 = 20.0;
pub const MAX_NET_DAILY_CHANGE_PCT_CAP: f64 = 50.0;

pub const DEFAULT_MAX_SINGLE_CHANGE_PCT: f64 = 10.0;
pub const DEFAULT_APPROVAL_THRESHOLD_PCT: f64 = 5.0;
pub const DEFAULT_MAX_NET_DAILY_CHANGE_PCT: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailPolicy {
    pub workspace_id: String,
    pub ad_account_id: String,
    pub max_single_change_pct: f64,
    /// Orientativo: sólo fija `requires_approval` en el evento
    /// `queued_for_approval`. Toda unidad pasa igualmente por aprobación.
    pub approval_required_threshold_pct: f64,
    pub max_net_daily_change_pct: f64,
    pub execution_enabled: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl GuardrailPolicy {
    /// Política por defecto cuando la cuenta no tiene fila.
    pub fn defaults(workspace_id: &str, ad_account_id: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            ad_account_id: ad_account_id.to_string(),
            max_single_change_pct: DEFAULT_MAX_SINGLE_CHANGE_PCT,
            approval_required_threshold_pct: DEFAULT_APPROVAL_THRESHOLD_PCT,
            max_net_daily_change_pct: DEFAULT_MAX_NET_DAILY_CHANGE_PCT,
            execution_enabled: true,
            updated_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), ExecutorError> {
        let fields = [
            ("maxSingleChangePct", self.max_single_change_pct),
            (
                "approvalRequiredThresholdPct",
                self.approval_required_threshold_pct,
            ),
            ("maxNetDailyChangePct", self.max_net_daily_change_pct),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ExecutorError::Validation(format!(
                    "{name} must be a finite, non-negative number"
                )));
            }
        }
        if self.max_single_change_pct > MAX_SINGLE_CHANGE_PCT_CAP {
            return Err(ExecutorError::Validation(format!(
                "maxSingleChangePct {} exceeds cap {}",
                self.max_single_change_pct, MAX_SINGLE_CHANGE_PCT_CAP
            )));
        }
        if self.approval_required_threshold_pct > self.max_single_change_pct {
            return Err(ExecutorError::Validation(
                "approvalRequiredThresholdPct must not exceed maxSingleChangePct".to_string(),
            ));
        }
        if self.max_net_daily_change_pct > MAX_NET_DAILY_CHANGE_PCT_CAP {
            return Err(ExecutorError::Validation(format!(
                "maxNetDailyChangePct {} exceeds cap {}",
                self.max_net_daily_change_pct, MAX_NET_DAILY_CHANGE_PCT_CAP
            )));
        }
        Ok(())
    }
}

/// Body de PUT /internal/guardrails/{workspace}/{account}
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertGuardrailRequest {
    pub max_single_change_pct: f64,
    pub approval_required_threshold_pct: f64,
    pub max_net_daily_change_pct: f64,
    pub execution_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny { reason: String },
}

/// Resultado de evaluar los límites numéricos contra una propuesta.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundsDecision {
    /// Dentro de límites; `requires_approval` si supera el umbral.
    WithinBounds { requires_approval: bool },
    Exceeds { reason: String },
}
