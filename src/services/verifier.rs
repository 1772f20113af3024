//! services/verifier.rs
//! Re-lee el estado desde la fuente autoritativa (nunca de la respuesta del
//! mutate) y lo compara con el estado esperado.

use serde_json::{json, Value};

use crate::errors::ExecutorError;
use crate::models::payload_model::ApprovedPayload;
use crate::services::ads_dispatcher::AdsDispatcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedState {
    AdGroupStatus {
        ad_group_id: String,
        status: String,
    },
    KeywordCpcBid {
        ad_group_id: String,
        criterion_id: String,
        cpc_bid_micros: i64,
    },
    BudgetAmount {
        budget_id: String,
        amount_micros: i64,
    },
}

impl ExpectedState {
    pub fn from_payload(payload: &ApprovedPayload) -> Self {
        match payload {
            ApprovedPayload::PauseAdGroup { ad_group_id } => ExpectedState::AdGroupStatus {
                ad_group_id: ad_group_id.clone(),
                status: "PAUSED".to_string(),
            },
            ApprovedPayload::ReduceKeywordBid {
                ad_group_id,
                criterion_id,
                after_cpc_bid_micros,
                ..
            } => ExpectedState::KeywordCpcBid {
                ad_group_id: ad_group_id.clone(),
                criterion_id: criterion_id.clone(),
                cpc_bid_micros: *after_cpc_bid_micros,
            },
            ApprovedPayload::IncreaseCampaignBudget {
                campaign_budget_id,
                after_amount_micros,
                ..
            } => ExpectedState::BudgetAmount {
                budget_id: campaign_budget_id.clone(),
                amount_micros: *after_amount_micros,
            },
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ExpectedState::AdGroupStatus { status, .. } => json!({ "status": status }),
            ExpectedState::KeywordCpcBid { cpc_bid_micros, .. } => {
                json!({ "cpc_bid_micros": cpc_bid_micros })
            }
            ExpectedState::BudgetAmount { amount_micros, .. } => {
                json!({ "amount_micros": amount_micros })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub ok: bool,
    pub expected: Value,
    pub actual: Value,
}

pub async fn verify(
    dispatcher: &AdsDispatcher<'_>,
    expected: &ExpectedState,
) -> Result<Verification, ExecutorError> {
    let (ok, actual) = match expected {
        ExpectedState::AdGroupStatus {
            ad_group_id,
            status,
        } => {
            let snap = dispatcher.fetch_ad_group(ad_group_id).await?;
            (snap.status == *status, snap.to_json())
        }
        ExpectedState::KeywordCpcBid {
            ad_group_id,
            criterion_id,
            cpc_bid_micros,
        } => {
            let snap = dispatcher.fetch_keyword(ad_group_id, criterion_id).await?;
            (snap.cpc_bid_micros == *cpc_bid_micros, snap.to_json())
        }
        ExpectedState::BudgetAmount {
            budget_id,
            amount_micros,
        } => {
            let snap = dispatcher.fetch_budget(budget_id).await?;
            (snap.amount_micros == *amount_micros, snap.to_json())
        }
    };

    if !ok {
        log::warn!(
            "(verify) estado no coincide: esperado={} actual={}",
            expected.to_json(),
            actual
        );
    }

    Ok(Verification {
        ok,
        expected: expected.to_json(),
        actual,
    })
}
