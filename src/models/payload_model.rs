//! models/payload_model.rs
//! Payload aprobado: unión discriminada por `kind`.
//! Es lo ÚNICO sobre lo que la ejecución puede actuar.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ExecutorError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ApprovedPayload {
    PauseAdGroup {
        #[serde(rename = "adGroupId")]
        ad_group_id: String,
    },
    ReduceKeywordBid {
        #[serde(rename = "adGroupId")]
        ad_group_id: String,
        #[serde(rename = "criterionId")]
        criterion_id: String,
        #[serde(rename = "afterCpcBidMicros")]
        after_cpc_bid_micros: i64,
        /// Valor observado cuando se generó la propuesta (para guardrails).
        #[serde(rename = "beforeCpcBidMicros", default, skip_serializing_if = "Option::is_none")]
        before_cpc_bid_micros: Option<i64>,
    },
    IncreaseCampaignBudget {
        #[serde(rename = "campaignBudgetId")]
        campaign_budget_id: String,
        #[serde(rename = "afterAmountMicros")]
        after_amount_micros: i64,
        #[serde(rename = "beforeAmountMicros", default, skip_serializing_if = "Option::is_none")]
        before_amount_micros: Option<i64>,
    },
}

impl ApprovedPayload {
    /// Parseo estricto desde JSON libre: kind desconocido o campos extra = rechazo.
    pub fn parse(value: &Value) -> Result<Self, ExecutorError> {
        let payload: ApprovedPayload = serde_json::from_value(value.clone())
            .map_err(|e| ExecutorError::Validation(format!("invalid approvedPayload: {e}")))?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn validate(&self) -> Result<(), ExecutorError> {
        match self {
            ApprovedPayload::PauseAdGroup { ad_group_id } => {
                require_numeric_id("adGroupId", ad_group_id)?;
            }
            ApprovedPayload::ReduceKeywordBid {
                ad_group_id,
                criterion_id,
                after_cpc_bid_micros,
                before_cpc_bid_micros,
            } => {
                require_numeric_id("adGroupId", ad_group_id)?;
                require_numeric_id("criterionId", criterion_id)?;
                require_positive_micros("afterCpcBidMicros", *after_cpc_bid_micros)?;
                if let Some(before) = before_cpc_bid_micros {
                    require_positive_micros("beforeCpcBidMicros", *before)?;
                    if *after_cpc_bid_micros > *before {
                        return Err(ExecutorError::Validation(format!(
                            "reduce_keyword_bid must not raise the bid ({before} -> {after_cpc_bid_micros})"
                        )));
                    }
                }
            }
            ApprovedPayload::IncreaseCampaignBudget {
                campaign_budget_id,
                after_amount_micros,
                before_amount_micros,
            } => {
                require_numeric_id("campaignBudgetId", campaign_budget_id)?;
                require_positive_micros("afterAmountMicros", *after_amount_micros)?;
                if let Some(before) = before_amount_micros {
                    require_positive_micros("beforeAmountMicros", *before)?;
                    if *after_amount_micros < *before {
                        return Err(ExecutorError::Validation(format!(
                            "increase_campaign_budget must not lower the budget ({before} -> {after_amount_micros})"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApprovedPayload::PauseAdGroup { .. } => "pause_ad_group",
            ApprovedPayload::ReduceKeywordBid { .. } => "reduce_keyword_bid",
            ApprovedPayload::IncreaseCampaignBudget { .. } => "increase_campaign_budget",
        }
    }

    /// Cambio porcentual con signo: negativo para reducciones.
    pub fn signed_change_pct(&self) -> Option<f64> {
        let (before, after) = match self {
            ApprovedPayload::PauseAdGroup { .. } => return None,
            ApprovedPayload::ReduceKeywordBid {
                after_cpc_bid_micros,
                before_cpc_bid_micros,
                ..
            } => ((*before_cpc_bid_micros)?, *after_cpc_bid_micros),
            ApprovedPayload::IncreaseCampaignBudget {
                after_amount_micros,
                before_amount_micros,
                ..
            } => ((*before_amount_micros)?, *after_amount_micros),
        };
        Some(change_pct(before, after))
    }
}

/// (after - before) / before * 100
pub fn change_pct(before: i64, after: i64) -> f64 {
    if before <= 0 {
        return f64::INFINITY;
    }
    (after - before) as f64 / before as f64 * 100.0
}

fn require_numeric_id(field: &str, value: &str) -> Result<(), ExecutorError> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(ExecutorError::Validation(format!(
            "{field} must be a non-empty numeric id, got '{value}'"
        )));
    }
    Ok(())
}

fn require_positive_micros(field: &str, value: i64) -> Result<(), ExecutorError> {
    if value <= 0 {
        return Err(ExecutorError::Validation(format!(
            "{field} must be positive, got {value}"
        )));
    }
    Ok(())
}
