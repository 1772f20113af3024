//! services/ads_dispatcher.rs
//! Adaptador de Ads: cada `ensure_*` lee el estado actual, compara con el
//! deseado y sólo muta si difieren. Nunca borra: pausar, no eliminar.
//! Con `MutationFence` cada mutate queda además detrás de una fila del outbox.

use chrono::Utc;
use serde_json::{json, Value};

use crate::errors::ExecutorError;
use crate::models::ads_model::{
    AdGroupSnapshot, BudgetSnapshot, EnsureKind, EnsureResult, KeywordSnapshot, MutateOperation,
};
use crate::models::outbox_model::{Channel, NewOutboxEntry, OutboxInsert, OutboxSkipReason, OutboxStatus};
use crate::models::payload_model::ApprovedPayload;
use crate::services::ads_client::{normalize_customer_id, AdsApi};
use crate::services::idempotency::{day_bucket, derive_key};
use crate::services::outbox_service::OutboxService;

pub const PROVIDER_NAME: &str = "google_ads";
const PAUSED: &str = "PAUSED";

/// Lo observado/intentado durante una ejecución, para el rastro de auditoría.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTrace {
    pub before: Option<Value>,
    pub mutation: Option<Value>,
    pub after: Option<Value>,
}

/// Alcance del outbox para los mutates de una unidad.
pub struct MutationFence<'a> {
    pub outbox: &'a OutboxService,
    pub tenant_id: String,
    pub workspace_id: String,
    pub unit_id: String,
    pub run_id: Option<String>,
}

pub struct AdsDispatcher<'a> {
    api: &'a dyn AdsApi,
    customer_id: String,
    fence: Option<MutationFence<'a>>,
}

impl<'a> AdsDispatcher<'a> {
    pub fn new(api: &'a dyn AdsApi, ad_account_id: &str) -> Self {
        Self {
            api,
            customer_id: normalize_customer_id(ad_account_id),
            fence: None,
        }
    }

    pub fn with_fence(mut self, fence: MutationFence<'a>) -> Self {
        self.fence = Some(fence);
        self
    }

    // ------------------------------------------------------------------
    // Lecturas
    // ------------------------------------------------------------------

    pub async fn fetch_ad_group(&self, ad_group_id: &str) -> Result<AdGroupSnapshot, ExecutorError> {
        let resource_name = format!("customers/{}/adGroups/{}", self.customer_id, ad_group_id);
        let query = format!(
            "SELECT ad_group.resource_name, ad_group.status FROM ad_group \
             WHERE ad_group.resource_name = '{resource_name}'"
        );
        let row = self.search_one(&query, "adGroup", &resource_name).await?;
        let status = row
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ExecutorError::Provider(format!("{resource_name} has no status")))?;
        Ok(AdGroupSnapshot {
            resource_name,
            status: status.to_string(),
        })
    }

    pub async fn fetch_keyword(
        &self,
        ad_group_id: &str,
        criterion_id: &str,
    ) -> Result<KeywordSnapshot, ExecutorError> {
        let resource_name = format!(
            "customers/{}/adGroupCriteria/{}~{}",
            self.customer_id, ad_group_id, criterion_id
        );
        let query = format!(
            "SELECT ad_group_criterion.resource_name, ad_group_criterion.cpc_bid_micros \
             FROM ad_group_criterion WHERE ad_group_criterion.resource_name = '{resource_name}'"
        );
        let row = self
            .search_one(&query, "adGroupCriterion", &resource_name)
            .await?;
        // Sin puja propia hereda la del ad group: la tratamos como 0.
        let cpc_bid_micros = parse_micros(row.get("cpcBidMicros")).unwrap_or(0);
        Ok(KeywordSnapshot {
            resource_name,
            cpc_bid_micros,
        })
    }

    pub async fn fetch_budget(&self, budget_id: &str) -> Result<BudgetSnapshot, ExecutorError> {
        let resource_name = format!("customers/{}/campaignBudgets/{}", self.customer_id, budget_id);
        let query = format!(
            "SELECT campaign_budget.resource_name, campaign_budget.amount_micros \
             FROM campaign_budget WHERE campaign_budget.resource_name = '{resource_name}'"
        );
        let row = self
            .search_one(&query, "campaignBudget", &resource_name)
            .await?;
        let amount_micros = parse_micros(row.get("amountMicros"))
            .ok_or_else(|| ExecutorError::Provider(format!("{resource_name} has no amountMicros")))?;
        Ok(BudgetSnapshot {
            resource_name,
            amount_micros,
        })
    }

    async fn search_one(
        &self,
        query: &str,
        entity: &str,
        resource_name: &str,
    ) -> Result<Value, ExecutorError> {
        let rows = self.api.search(&self.customer_id, query).await?;
        rows.into_iter()
            .filter_map(|row| row.get(entity).cloned())
            .find(|row| row.get("resourceName").and_then(Value::as_str) == Some(resource_name))
            .ok_or_else(|| ExecutorError::NotFound(resource_name.to_string()))
    }

    // ------------------------------------------------------------------
    // ensure_*
    // ------------------------------------------------------------------

    pub async fn ensure_ad_group_paused(&self, ad_group_id: &str) -> Result<EnsureResult, ExecutorError> {
        self.ensure_ad_group_paused_traced(ad_group_id, &mut ExecutionTrace::default())
            .await
    }

    pub async fn ensure_keyword_cpc_bid(
        &self,
        ad_group_id: &str,
        criterion_id: &str,
        cpc_bid_micros: i64,
    ) -> Result<EnsureResult, ExecutorError> {
        self.ensure_keyword_cpc_bid_traced(
            ad_group_id,
            criterion_id,
            cpc_bid_micros,
            &mut ExecutionTrace::default(),
        )
        .await
    }

    pub async fn ensure_campaign_budget_amount(
        &self,
        budget_id: &str,
        amount_micros: i64,
    ) -> Result<EnsureResult, ExecutorError> {
        self.ensure_campaign_budget_amount_traced(
            budget_id,
            amount_micros,
            &mut ExecutionTrace::default(),
        )
        .await
    }

    /// Despacha el payload aprobado al `ensure_*` correspondiente.
    pub async fn ensure(
        &self,
        payload: &ApprovedPayload,
        trace: &mut ExecutionTrace,
    ) -> Result<EnsureResult, ExecutorError> {
        match payload {
            ApprovedPayload::PauseAdGroup { ad_group_id } => {
                self.ensure_ad_group_paused_traced(ad_group_id, trace).await
            }
            ApprovedPayload::ReduceKeywordBid {
                ad_group_id,
                criterion_id,
                after_cpc_bid_micros,
                ..
            } => {
                self.ensure_keyword_cpc_bid_traced(
                    ad_group_id,
                    criterion_id,
                    *after_cpc_bid_micros,
                    trace,
                )
                .await
            }
            ApprovedPayload::IncreaseCampaignBudget {
                campaign_budget_id,
                after_amount_micros,
                ..
            } => {
                self.ensure_campaign_budget_amount_traced(campaign_budget_id, *after_amount_micros, trace)
                    .await
            }
        }
    }

    async fn ensure_ad_group_paused_traced(
        &self,
        ad_group_id: &str,
        trace: &mut ExecutionTrace,
    ) -> Result<EnsureResult, ExecutorError> {
        let current = self.fetch_ad_group(ad_group_id).await?;
        let before = current.to_json();
        trace.before = Some(before.clone());

        if current.status == PAUSED {
            log::info!("(ensure_ad_group_paused) {} ya está PAUSED: noop", current.resource_name);
            trace.after = Some(before.clone());
            return Ok(noop(current.resource_name, before));
        }

        let op = MutateOperation {
            update: json!({ "resourceName": current.resource_name, "status": PAUSED }),
            update_mask: "status".to_string(),
        };
        self.apply_mutation("adGroups", &current.resource_name, op, trace)
            .await?;

        let after = json!({ "status": PAUSED });
        trace.after = Some(after.clone());
        Ok(EnsureResult {
            kind: EnsureKind::Mutated,
            resource_name: current.resource_name,
            before,
            after,
        })
    }

    async fn ensure_keyword_cpc_bid_traced(
        &self,
        ad_group_id: &str,
        criterion_id: &str,
        cpc_bid_micros: i64,
        trace: &mut ExecutionTrace,
    ) -> Result<EnsureResult, ExecutorError> {
        require_positive("cpc_bid_micros", cpc_bid_micros)?;

        let current = self.fetch_keyword(ad_group_id, criterion_id).await?;
        let before = current.to_json();
        trace.before = Some(before.clone());

        if current.cpc_bid_micros == cpc_bid_micros {
            trace.after = Some(before.clone());
            return Ok(noop(current.resource_name, before));
        }

        let op = MutateOperation {
            update: json!({
                "resourceName": current.resource_name,
                "cpcBidMicros": cpc_bid_micros.to_string(),
            }),
            update_mask: "cpc_bid_micros".to_string(),
        };
        self.apply_mutation("adGroupCriteria", &current.resource_name, op, trace)
            .await?;

        let after = json!({ "cpc_bid_micros": cpc_bid_micros });
        trace.after = Some(after.clone());
        Ok(EnsureResult {
            kind: EnsureKind::Mutated,
            resource_name: current.resource_name,
            before,
            after,
        })
    }

    async fn ensure_campaign_budget_amount_traced(
        &self,
        budget_id: &str,
        amount_micros: i64,
        trace: &mut ExecutionTrace,
    ) -> Result<EnsureResult, ExecutorError> {
        require_positive("amount_micros", amount_micros)?;

        let current = self.fetch_budget(budget_id).await?;
        let before = current.to_json();
        trace.before = Some(before.clone());

        if current.amount_micros == amount_micros {
            trace.after = Some(before.clone());
            return Ok(noop(current.resource_name, before));
        }

        let op = MutateOperation {
            update: json!({
                "resourceName": current.resource_name,
                "amountMicros": amount_micros.to_string(),
            }),
            update_mask: "amount_micros".to_string(),
        };
        self.apply_mutation("campaignBudgets", &current.resource_name, op, trace)
            .await?;

        let after = json!({ "amount_micros": amount_micros });
        trace.after = Some(after.clone());
        Ok(EnsureResult {
            kind: EnsureKind::Mutated,
            resource_name: current.resource_name,
            before,
            after,
        })
    }

    /// Mutate único. Con fence: fila de outbox antes de llamar, y un
    /// duplicado de clave nunca vuelve a llamar al proveedor.
    async fn apply_mutation(
        &self,
        service: &str,
        resource_name: &str,
        op: MutateOperation,
        trace: &mut ExecutionTrace,
    ) -> Result<(), ExecutorError> {
        let op_json = serde_json::to_value(&op).map_err(anyhow::Error::from)?;
        trace.mutation = Some(json!({ "service": service, "operation": op_json }));

        let Some(fence) = &self.fence else {
            self.api.mutate(&self.customer_id, service, vec![op]).await?;
            return Ok(());
        };

        let key = derive_key(
            &fence.unit_id,
            resource_name,
            &op_json.to_string(),
            &day_bucket(Utc::now()),
        );
        let entry = NewOutboxEntry {
            tenant_id: fence.tenant_id.clone(),
            workspace_id: fence.workspace_id.clone(),
            run_id: fence.run_id.clone(),
            channel: Channel::Ads,
            provider: PROVIDER_NAME.to_string(),
            recipient: resource_name.to_string(),
            idempotency_key: key,
            payload: Some(json!({ "service": service, "operation": op_json })),
            scheduled_at: None,
        };

        match fence.outbox.insert_pending(&entry).await? {
            OutboxInsert::Duplicate { existing } => {
                fence
                    .outbox
                    .record_skip(&entry, OutboxSkipReason::IdempotentReplay)
                    .await?;
                match existing.status {
                    OutboxStatus::Sent => {
                        log::info!(
                            "(apply_mutation) mutate de {} ya aplicado: replay idempotente",
                            resource_name
                        );
                        Ok(())
                    }
                    other => Err(ExecutorError::Provider(format!(
                        "mutation of {resource_name} already attempted (status {}); reconciliation required",
                        other.as_str()
                    ))),
                }
            }
            OutboxInsert::Inserted { id, .. } => {
                match self
                    .api
                    .mutate(&self.customer_id, service, vec![op])
                    .await
                {
                    Ok(names) => {
                        let confirmation = names
                            .first()
                            .cloned()
                            .unwrap_or_else(|| resource_name.to_string());
                        fence
                            .outbox
                            .mark_sent(&id, Channel::Ads, &confirmation, Some(&json!({ "results": names })))
                            .await?;
                        Ok(())
                    }
                    Err(e) => {
                        fence.outbox.mark_failed(&id, &e.to_string()).await?;
                        Err(e)
                    }
                }
            }
        }
    }
}

fn noop(resource_name: String, state: Value) -> EnsureResult {
    EnsureResult {
        kind: EnsureKind::Noop,
        resource_name,
        before: state.clone(),
        after: state,
    }
}

fn require_positive(field: &str, value: i64) -> Result<(), ExecutorError> {
    if value <= 0 {
        return Err(ExecutorError::Validation(format!(
            "{field} must be positive, got {value}"
        )));
    }
    Ok(())
}

/// La API REST serializa int64 como string; aceptamos ambas formas.
pub fn parse_micros(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}
