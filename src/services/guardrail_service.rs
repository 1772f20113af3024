//! services/guardrail_service.rs
//! Kill switch y límites numéricos por (workspace, cuenta).
//! Los topes se validan aquí y, además, con CHECK en la tabla.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

use crate::database::{fmt_ts, now_rfc3339, parse_opt_ts};
use crate::errors::{is_check_violation, ExecutorError};
use crate::models::guardrail_model::{BoundsDecision, GateDecision, GuardrailPolicy};
use crate::models::payload_model::ApprovedPayload;

#[derive(Clone, Debug)]
pub struct GuardrailService {
    db_pool: Pool<Sqlite>,
}

impl GuardrailService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        GuardrailService { db_pool }
    }

    /// Política de la cuenta, o los defaults si no hay fila.
    pub async fn get_policy(&self, workspace_id: &str, ad_account_id: &str) -> Result<GuardrailPolicy> {
        let row = sqlx::query(
            r#"
            SELECT max_single_change_pct, approval_required_threshold_pct,
                   max_net_daily_change_pct, execution_enabled, updated_at
            FROM guardrail_policies
            WHERE workspace_id = ?1 AND ad_account_id = ?2
            "#,
        )
        .bind(workspace_id)
        .bind(ad_account_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Fallo al leer guardrail policy")?;

        let Some(row) = row else {
            return Ok(GuardrailPolicy::defaults(workspace_id, ad_account_id));
        };

        let enabled: i64 = row.try_get("execution_enabled")?;
        Ok(GuardrailPolicy {
            workspace_id: workspace_id.to_string(),
            ad_account_id: ad_account_id.to_string(),
            max_single_change_pct: row.try_get("max_single_change_pct")?,
            approval_required_threshold_pct: row.try_get("approval_required_threshold_pct")?,
            max_net_daily_change_pct: row.try_get("max_net_daily_change_pct")?,
            execution_enabled: enabled != 0,
            updated_at: parse_opt_ts(row.try_get("updated_at")?)?,
        })
    }

    /// Valida contra los topes y persiste. Una violación del CHECK también
    /// se reporta como error de validación.
    pub async fn upsert_policy(&self, policy: &GuardrailPolicy) -> Result<GuardrailPolicy, ExecutorError> {
        policy.validate()?;

        let res = sqlx::query(
            r#"
            INSERT INTO guardrail_policies (
                workspace_id, ad_account_id, max_single_change_pct,
                approval_required_threshold_pct, max_net_daily_change_pct,
                execution_enabled, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (workspace_id, ad_account_id) DO UPDATE SET
                max_single_change_pct = excluded.max_single_change_pct,
                approval_required_threshold_pct = excluded.approval_required_threshold_pct,
                max_net_daily_change_pct = excluded.max_net_daily_change_pct,
                execution_enabled = excluded.execution_enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&policy.workspace_id)
        .bind(&policy.ad_account_id)
        .bind(policy.max_single_change_pct)
        .bind(policy.approval_required_threshold_pct)
        .bind(policy.max_net_daily_change_pct)
        .bind(policy.execution_enabled as i64)
        .bind(now_rfc3339())
        .execute(&self.db_pool)
        .await;

        match res {
            Ok(_) => {}
            Err(e) if is_check_violation(&e) => {
                return Err(ExecutorError::Validation(format!(
                    "guardrail policy out of bounds: {e}"
                )));
            }
            Err(e) => return Err(ExecutorError::Store(e)),
        }

        log::info!(
            "(upsert_policy) workspace={} account={} single={} approval={} daily={} enabled={}",
            policy.workspace_id,
            policy.ad_account_id,
            policy.max_single_change_pct,
            policy.approval_required_threshold_pct,
            policy.max_net_daily_change_pct,
            policy.execution_enabled
        );

        Ok(self
            .get_policy(&policy.workspace_id, &policy.ad_account_id)
            .await?)
    }

    /// Kill switch. Se evalúa ANTES del claim.
    pub async fn check_gate(&self, workspace_id: &str, ad_account_id: &str) -> Result<GateDecision> {
        let policy = self.get_policy(workspace_id, ad_account_id).await?;
        if policy.execution_enabled {
            Ok(GateDecision::Allow)
        } else {
            Ok(GateDecision::Deny {
                reason: "execution_disabled".to_string(),
            })
        }
    }

    /// Límites numéricos para una propuesta, incluyendo el neto diario ya ejecutado.
    pub async fn check_bounds(
        &self,
        workspace_id: &str,
        ad_account_id: &str,
        payload: &ApprovedPayload,
    ) -> Result<BoundsDecision> {
        let policy = self.get_policy(workspace_id, ad_account_id).await?;

        let Some(signed) = payload.signed_change_pct() else {
            return Ok(match payload {
                // Pausar no mueve importes; siempre requiere aprobación.
                ApprovedPayload::PauseAdGroup { .. } => BoundsDecision::WithinBounds {
                    requires_approval: true,
                },
                // Sin importe previo no hay porcentaje que acotar.
                ApprovedPayload::ReduceKeywordBid { .. } => BoundsDecision::Exceeds {
                    reason: "reduce_keyword_bid requires beforeCpcBidMicros to check the change"
                        .to_string(),
                },
                ApprovedPayload::IncreaseCampaignBudget { .. } => BoundsDecision::Exceeds {
                    reason: "increase_campaign_budget requires beforeAmountMicros to check the change"
                        .to_string(),
                },
            });
        };

        let magnitude = signed.abs();
        if !magnitude.is_finite() || magnitude > policy.max_single_change_pct {
            return Ok(BoundsDecision::Exceeds {
                reason: format!(
                    "single change {:.2}% exceeds max {:.2}%",
                    magnitude, policy.max_single_change_pct
                ),
            });
        }

        let day_start = start_of_day(Utc::now());
        let net_today = self
            .net_change_since(workspace_id, ad_account_id, day_start)
            .await?;
        let projected = net_today + signed;
        if projected.abs() > policy.max_net_daily_change_pct {
            return Ok(BoundsDecision::Exceeds {
                reason: format!(
                    "net daily change {:.2}% would exceed max {:.2}%",
                    projected, policy.max_net_daily_change_pct
                ),
            });
        }

        Ok(BoundsDecision::WithinBounds {
            requires_approval: magnitude > policy.approval_required_threshold_pct,
        })
    }

    /// Suma con signo de los cambios ejecutados desde `since` en la cuenta.
    async fn net_change_since(
        &self,
        workspace_id: &str,
        ad_account_id: &str,
        since: DateTime<Utc>,
    ) -> Result<f64> {
        let rows = sqlx::query(
            r#"
            SELECT approved_payload FROM execution_units
            WHERE workspace_id = ?1 AND ad_account_id = ?2
              AND status = 'executed' AND executed_at >= ?3
              AND approved_payload IS NOT NULL
            "#,
        )
        .bind(workspace_id)
        .bind(ad_account_id)
        .bind(fmt_ts(since))
        .fetch_all(&self.db_pool)
        .await
        .context("Fallo al calcular cambio neto diario")?;

        let mut net = 0.0;
        for row in rows {
            let raw: String = row.try_get("approved_payload")?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            // Payloads ya ejecutados fueron validados; si no parsean se ignoran.
            if let Ok(payload) = serde_json::from_value::<ApprovedPayload>(value) {
                net += payload.signed_change_pct().unwrap_or(0.0);
            }
        }
        Ok(net)
    }
}

fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(at)
}
