//! services/execution_service.rs
//! Máquina de estados de las unidades de ejecución.
//! Cada transición es un UPDATE condicionado al estado previo: no hay
//! lectura-luego-escritura, y el claim approved -> executing es el único
//! punto de serialización entre workers.

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::database::{now_rfc3339, parse_opt_ts, parse_ts};
use crate::errors::ExecutorError;
use crate::models::audit_model::{ActorType, AuditEventType, NewAuditEvent};
use crate::models::execution_model::{ClaimResult, CreateUnitRequest, ExecutionUnit, UnitStatus};
use crate::models::guardrail_model::BoundsDecision;
use crate::models::payload_model::ApprovedPayload;
use crate::services::audit_service::AuditService;
use crate::services::guardrail_service::GuardrailService;

const SELECT_COLUMNS: &str = r#"
    id, workspace_id, owner_id, ad_account_id, status, proposed_payload,
    approved_payload, executed_at, last_error, created_at, updated_at
"#;

#[derive(Clone, Debug)]
pub struct ExecutionService {
    db_pool: Pool<Sqlite>,
    audit: AuditService,
    guardrails: GuardrailService,
}

impl ExecutionService {
    pub fn new(db_pool: Pool<Sqlite>, audit: AuditService, guardrails: GuardrailService) -> Self {
        Self {
            db_pool,
            audit,
            guardrails,
        }
    }

    /// Crea la unidad en estado `created`. El payload se valida de forma estricta.
    pub async fn create_unit(&self, req: CreateUnitRequest) -> Result<ExecutionUnit, ExecutorError> {
        let payload = ApprovedPayload::parse(&req.payload)?;
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let normalized = serde_json::to_value(&payload).map_err(anyhow::Error::from)?;

        sqlx::query(
            r#"
            INSERT INTO execution_units (
                id, workspace_id, owner_id, ad_account_id, status,
                proposed_payload, approved_payload, executed_at, last_error,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, 'created', ?5, NULL, NULL, NULL, ?6, ?6)
            "#,
        )
        .bind(&id)
        .bind(&req.workspace_id)
        .bind(&req.owner_id)
        .bind(&req.ad_account_id)
        .bind(normalized.to_string())
        .bind(&now)
        .execute(&self.db_pool)
        .await?;

        self.audit
            .record(
                NewAuditEvent::new(&req.workspace_id, AuditEventType::Created, "unit created")
                    .unit(&id)
                    .account(&req.ad_account_id)
                    .actor(
                        req.actor_type.unwrap_or(ActorType::Ai),
                        req.actor_id.as_deref(),
                    )
                    .details(json!({ "proposal": normalized })),
            )
            .await?;

        log::info!(
            "(create_unit) unit={} kind={} workspace={}",
            id,
            payload.kind(),
            req.workspace_id
        );
        Ok(self.get_unit(&id).await?)
    }

    /// created -> blocked | queued_for_approval, según los guardrails.
    pub async fn submit_for_approval(&self, unit_id: &str) -> Result<ExecutionUnit, ExecutorError> {
        let unit = self.get_unit(unit_id).await?;
        if unit.status != UnitStatus::Created {
            return Err(ExecutorError::Validation(format!(
                "unit {unit_id} is {}, expected created",
                unit.status
            )));
        }
        let payload = ApprovedPayload::parse(&unit.proposed_payload)?;
        let decision = self
            .guardrails
            .check_bounds(&unit.workspace_id, &unit.ad_account_id, &payload)
            .await?;

        let (next, event_type, message, details) = match &decision {
            BoundsDecision::WithinBounds { requires_approval } => (
                UnitStatus::QueuedForApproval,
                AuditEventType::QueuedForApproval,
                "queued for approval".to_string(),
                json!({ "requires_approval": requires_approval }),
            ),
            BoundsDecision::Exceeds { reason } => (
                UnitStatus::Blocked,
                AuditEventType::Blocked,
                format!("blocked by guardrail: {reason}"),
                json!({ "reason": reason }),
            ),
        };

        if !self
            .transition(unit_id, UnitStatus::Created, next)
            .await?
        {
            return Err(ExecutorError::Validation(format!(
                "unit {unit_id} changed state concurrently"
            )));
        }

        self.audit
            .record(
                NewAuditEvent::new(&unit.workspace_id, event_type, message)
                    .unit(unit_id)
                    .account(&unit.ad_account_id)
                    .details(details),
            )
            .await?;

        Ok(self.get_unit(unit_id).await?)
    }

    /// queued_for_approval -> approved. Congela el payload aprobado.
    pub async fn approve(
        &self,
        unit_id: &str,
        actor_type: ActorType,
        actor_id: Option<&str>,
    ) -> Result<ExecutionUnit, ExecutorError> {
        let unit = self.get_unit(unit_id).await?;
        let payload = ApprovedPayload::parse(&unit.proposed_payload)?;
        let approved = serde_json::to_value(&payload).map_err(anyhow::Error::from)?;

        let res = sqlx::query(
            r#"
            UPDATE execution_units
            SET status = 'approved', approved_payload = ?2, updated_at = ?3
            WHERE id = ?1 AND status = 'queued_for_approval'
            "#,
        )
        .bind(unit_id)
        .bind(approved.to_string())
        .bind(now_rfc3339())
        .execute(&self.db_pool)
        .await?;

        if res.rows_affected() != 1 {
            return Err(ExecutorError::Validation(format!(
                "unit {unit_id} is {}, expected queued_for_approval",
                unit.status
            )));
        }

        self.audit
            .record(
                NewAuditEvent::new(&unit.workspace_id, AuditEventType::Approved, "approved")
                    .unit(unit_id)
                    .account(&unit.ad_account_id)
                    .actor(actor_type, actor_id)
                    .details(json!({ "approved_payload": approved })),
            )
            .await?;

        log::info!("(approve) unit={} aprobada por {:?}", unit_id, actor_id);
        Ok(self.get_unit(unit_id).await?)
    }

    /// queued_for_approval | blocked -> rejected
    pub async fn reject(
        &self,
        unit_id: &str,
        actor_type: ActorType,
        actor_id: Option<&str>,
        reason: Option<&str>,
    ) -> Result<ExecutionUnit, ExecutorError> {
        let unit = self.get_unit(unit_id).await?;
        let res = sqlx::query(
            r#"
            UPDATE execution_units
            SET status = 'rejected', last_error = ?2, updated_at = ?3
            WHERE id = ?1 AND status IN ('queued_for_approval', 'blocked')
            "#,
        )
        .bind(unit_id)
        .bind(reason)
        .bind(now_rfc3339())
        .execute(&self.db_pool)
        .await?;

        if res.rows_affected() != 1 {
            return Err(ExecutorError::Validation(format!(
                "unit {unit_id} is {}, cannot be rejected",
                unit.status
            )));
        }

        self.audit
            .record(
                NewAuditEvent::new(&unit.workspace_id, AuditEventType::Rejected, "rejected")
                    .unit(unit_id)
                    .account(&unit.ad_account_id)
                    .actor(actor_type, actor_id)
                    .details(json!({ "reason": reason })),
            )
            .await?;

        Ok(self.get_unit(unit_id).await?)
    }

    /// Claim atómico: approved -> executing en un único UPDATE condicional.
    /// Si la unidad no estaba `approved` no se modifica nada y se devuelve
    /// su estado actual.
    pub async fn claim_for_execution(&self, unit_id: &str) -> Result<ClaimResult> {
        let res = sqlx::query(
            r#"
            UPDATE execution_units
            SET status = 'executing', updated_at = ?2
            WHERE id = ?1 AND status = 'approved' AND executed_at IS NULL
            "#,
        )
        .bind(unit_id)
        .bind(now_rfc3339())
        .execute(&self.db_pool)
        .await
        .context("Fallo en claim de unidad")?;

        let claimed = res.rows_affected() == 1;

        let row = sqlx::query("SELECT status, executed_at FROM execution_units WHERE id = ?1")
            .bind(unit_id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Fallo al leer unidad tras claim")?
            .ok_or_else(|| anyhow!("unit {unit_id} not found"))?;

        let raw_status: String = row.try_get("status")?;
        let status = UnitStatus::parse(&raw_status)
            .ok_or_else(|| anyhow!("estado desconocido '{raw_status}'"))?;
        let executed_at = parse_opt_ts(row.try_get("executed_at")?)?;

        log::info!(
            "(claim_for_execution) unit={} claimed={} status={}",
            unit_id,
            claimed,
            status
        );

        Ok(ClaimResult {
            // Sólo vale como claim si además seguimos siendo dueños del estado.
            claimed: claimed && status == UnitStatus::Executing,
            status,
            executed_at,
        })
    }

    /// executing -> executed
    pub async fn mark_executed(&self, unit_id: &str) -> Result<bool> {
        let now = now_rfc3339();
        let res = sqlx::query(
            r#"
            UPDATE execution_units
            SET status = 'executed', executed_at = ?2, last_error = NULL, updated_at = ?2
            WHERE id = ?1 AND status = 'executing'
            "#,
        )
        .bind(unit_id)
        .bind(&now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al marcar unidad ejecutada")?;
        Ok(res.rows_affected() == 1)
    }

    /// executing -> failed. No se libera de vuelta a `approved`.
    pub async fn mark_failed(&self, unit_id: &str, error: &str) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE execution_units
            SET status = 'failed', last_error = ?2, updated_at = ?3
            WHERE id = ?1 AND status = 'executing'
            "#,
        )
        .bind(unit_id)
        .bind(error)
        .bind(now_rfc3339())
        .execute(&self.db_pool)
        .await
        .context("Fallo al marcar unidad fallida")?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn get_unit(&self, unit_id: &str) -> Result<ExecutionUnit, ExecutorError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM execution_units WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(unit_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ExecutorError::NotFound(format!("unit {unit_id}")))?;
        Ok(row_to_unit(&row)?)
    }

    async fn transition(
        &self,
        unit_id: &str,
        from: UnitStatus,
        to: UnitStatus,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE execution_units
            SET status = ?3, updated_at = ?4
            WHERE id = ?1 AND status = ?2
            "#,
        )
        .bind(unit_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(now_rfc3339())
        .execute(&self.db_pool)
        .await
        .with_context(|| format!("Fallo en transición {from} -> {to}"))?;
        Ok(res.rows_affected() == 1)
    }
}

fn row_to_unit(row: &SqliteRow) -> Result<ExecutionUnit> {
    let status: String = row.try_get("status")?;
    let proposed: String = row.try_get("proposed_payload")?;
    let approved: Option<String> = row.try_get("approved_payload")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(ExecutionUnit {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        owner_id: row.try_get("owner_id")?,
        ad_account_id: row.try_get("ad_account_id")?,
        status: UnitStatus::parse(&status).ok_or_else(|| anyhow!("estado desconocido '{status}'"))?,
        proposed_payload: serde_json::from_str::<Value>(&proposed)?,
        approved_payload: approved
            .map(|raw| serde_json::from_str::<Value>(&raw))
            .transpose()?,
        executed_at: parse_opt_ts(row.try_get("executed_at")?)?,
        last_error: row.try_get("last_error")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}
