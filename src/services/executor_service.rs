//! services/executor_service.rs
//! Pipeline de ejecución de una unidad aprobada:
//! validar -> gate -> claim -> ensure (lectura, comparación, mutate) -> verificar.
//! Cada rama deja un evento en el ledger. Los skips gobernados son valores;
//! los fallos reales marcan la unidad `failed` y se re-lanzan.

use std::sync::Arc;

use serde_json::json;

use crate::errors::ExecutorError;
use crate::models::ads_model::EnsureResult;
use crate::models::audit_model::{ActorType, AuditEventType, NewAuditEvent};
use crate::models::execution_model::{
    ExecuteRequest, ExecutionOutcome, ExecutionUnit, SkipReason, UnitStatus,
};
use crate::models::guardrail_model::GateDecision;
use crate::models::payload_model::ApprovedPayload;
use crate::services::ads_client::{AdsApi, AdsConnector};
use crate::services::ads_dispatcher::{AdsDispatcher, ExecutionTrace, MutationFence};
use crate::services::audit_service::AuditService;
use crate::services::execution_service::ExecutionService;
use crate::services::guardrail_service::GuardrailService;
use crate::services::outbox_service::OutboxService;
use crate::services::verifier::{verify, ExpectedState};

/// Identidad del intento, común a todos sus eventos.
struct Attempt<'a> {
    unit: &'a ExecutionUnit,
    actor_type: ActorType,
    actor_id: Option<&'a str>,
    run_id: Option<&'a str>,
}

impl Attempt<'_> {
    fn event(&self, event_type: AuditEventType, message: impl Into<String>) -> NewAuditEvent {
        NewAuditEvent::new(&self.unit.workspace_id, event_type, message)
            .unit(&self.unit.id)
            .account(&self.unit.ad_account_id)
            .actor(self.actor_type, self.actor_id)
            .run(self.run_id)
    }
}

#[derive(Clone)]
pub struct ExecutorService {
    units: ExecutionService,
    audit: AuditService,
    guardrails: GuardrailService,
    outbox: OutboxService,
    connector: Arc<dyn AdsConnector>,
}

impl ExecutorService {
    pub fn new(
        units: ExecutionService,
        audit: AuditService,
        guardrails: GuardrailService,
        outbox: OutboxService,
        connector: Arc<dyn AdsConnector>,
    ) -> Self {
        Self {
            units,
            audit,
            guardrails,
            outbox,
            connector,
        }
    }

    pub async fn execute(&self, req: ExecuteRequest) -> Result<ExecutionOutcome, ExecutorError> {
        // Validación: antes de cualquier transición o llamada externa.
        let payload = ApprovedPayload::parse(&req.approved_payload)?;
        let unit = self.units.get_unit(&req.proposal_id).await?;
        check_request_matches_unit(&req, &unit, &payload)?;

        let attempt = Attempt {
            unit: &unit,
            actor_type: req.actor_type.unwrap_or(ActorType::System),
            actor_id: req.actor_id.as_deref(),
            run_id: req.run_id.as_deref(),
        };

        log::info!(
            "(execute) unit={} kind={} run={:?}",
            unit.id,
            payload.kind(),
            req.run_id
        );

        // Kill switch ANTES del claim: una cuenta deshabilitada nunca deja unidades en `executing`.
        if let GateDecision::Deny { reason } = self
            .guardrails
            .check_gate(&unit.workspace_id, &unit.ad_account_id)
            .await?
        {
            self.audit
                .record(
                    attempt
                        .event(AuditEventType::Note, "execution skipped: execution disabled")
                        .details(json!({ "reason": reason, "status": unit.status })),
                )
                .await?;
            log::info!("(execute) unit={} omitida: {}", unit.id, reason);
            return Ok(ExecutionOutcome::Skipped {
                reason: SkipReason::ExecutionDisabled,
                status: unit.status,
            });
        }

        let api = match self.connector.connect().await {
            Ok(api) => api,
            Err(e) => {
                self.audit
                    .record(
                        attempt
                            .event(AuditEventType::Note, "ads connection failed before claim")
                            .details(json!({ "error": e.to_string() })),
                    )
                    .await?;
                return Err(e);
            }
        };

        let claim = self.units.claim_for_execution(&unit.id).await?;
        if !claim.claimed {
            let reason = if claim.executed_at.is_some() || claim.status == UnitStatus::Executed {
                SkipReason::AlreadyExecuted
            } else if claim.status == UnitStatus::Executing {
                SkipReason::AlreadyClaimed
            } else {
                SkipReason::InvalidState
            };
            self.audit
                .record(
                    attempt
                        .event(AuditEventType::Note, format!("execution skipped: {}", reason.as_str()))
                        .details(json!({ "reason": reason.as_str(), "status": claim.status })),
                )
                .await?;
            log::info!(
                "(execute) unit={} sin claim: {} (status={})",
                unit.id,
                reason.as_str(),
                claim.status
            );
            return Ok(ExecutionOutcome::Skipped {
                reason,
                status: claim.status,
            });
        }

        // Desde aquí la unidad es nuestra y termina en executed o failed.
        let mut trace = ExecutionTrace::default();
        match self
            .run_claimed(&attempt, api.as_ref(), &payload, &mut trace)
            .await
        {
            Ok(ensure) => {
                match self.units.mark_executed(&unit.id).await {
                    Ok(true) => {}
                    Ok(false) => log::warn!("(execute) unit={} ya no estaba en executing", unit.id),
                    Err(e) => {
                        // El mutate ya se aplicó, pero la unidad no puede quedar en executing.
                        let err = ExecutorError::from(e);
                        self.fail(&attempt, &trace, &err).await;
                        return Err(err);
                    }
                }
                log::info!(
                    "(execute) unit={} ejecutada ({:?} {})",
                    unit.id,
                    ensure.kind,
                    ensure.resource_name
                );
                Ok(ExecutionOutcome::Applied(ensure))
            }
            Err(e) => {
                self.fail(&attempt, &trace, &e).await;
                Err(e)
            }
        }
    }

    async fn run_claimed(
        &self,
        attempt: &Attempt<'_>,
        api: &dyn AdsApi,
        payload: &ApprovedPayload,
        trace: &mut ExecutionTrace,
    ) -> Result<EnsureResult, ExecutorError> {
        let unit = attempt.unit;
        self.audit
            .record(
                attempt
                    .event(AuditEventType::ExecutionStarted, "execution started")
                    .details(json!({ "kind": payload.kind(), "approved_payload": payload })),
            )
            .await?;

        let dispatcher = AdsDispatcher::new(api, &unit.ad_account_id).with_fence(MutationFence {
            outbox: &self.outbox,
            tenant_id: unit.owner_id.clone(),
            workspace_id: unit.workspace_id.clone(),
            unit_id: unit.id.clone(),
            run_id: attempt.run_id.map(str::to_string),
        });

        let ensure = dispatcher.ensure(payload, trace).await?;
        self.audit
            .record(
                attempt
                    .event(AuditEventType::ExecutionSucceeded, "mutation applied")
                    .details(json!({
                        "kind": ensure.kind,
                        "resource_name": ensure.resource_name,
                        "before_state": ensure.before,
                        "mutation": trace.mutation,
                        "after_state": ensure.after,
                    })),
            )
            .await?;

        // Re-lectura independiente: la respuesta del mutate no cuenta como prueba.
        let expected = ExpectedState::from_payload(payload);
        let verification = verify(&dispatcher, &expected).await?;
        trace.after = Some(verification.actual.clone());

        if verification.ok {
            self.audit
                .record(
                    attempt
                        .event(AuditEventType::VerificationSucceeded, "verified")
                        .details(json!({
                            "resource_name": ensure.resource_name,
                            "expected": verification.expected,
                            "actual": verification.actual,
                        })),
                )
                .await?;
            Ok(ensure)
        } else {
            self.audit
                .record(
                    attempt
                        .event(AuditEventType::VerificationFailed, "verification mismatch")
                        .details(json!({
                            "resource_name": ensure.resource_name,
                            "expected": verification.expected,
                            "actual": verification.actual,
                        })),
                )
                .await?;
            Err(ExecutorError::Verification(format!(
                "{}: expected {} but found {}",
                ensure.resource_name, verification.expected, verification.actual
            )))
        }
    }

    /// execution_failed con el contexto completo y la unidad a `failed`.
    /// Los errores de esta limpieza se registran pero no tapan el original.
    async fn fail(&self, attempt: &Attempt<'_>, trace: &ExecutionTrace, error: &ExecutorError) {
        let unit_id = &attempt.unit.id;
        log::error!("(execute) unit={} falló: {}", unit_id, error);

        if let Err(audit_err) = self
            .audit
            .record(
                attempt
                    .event(AuditEventType::ExecutionFailed, "execution failed")
                    .details(json!({
                        "error": error.to_string(),
                        "before_state": trace.before,
                        "mutation": trace.mutation,
                        "after_state": trace.after,
                    })),
            )
            .await
        {
            log::error!("(execute) unit={} sin evento execution_failed: {}", unit_id, audit_err);
        }

        match self.units.mark_failed(unit_id, &error.to_string()).await {
            Ok(true) => {}
            Ok(false) => log::warn!("(execute) unit={} ya no estaba en executing", unit_id),
            Err(e) => log::error!("(execute) unit={} no se pudo marcar failed: {:#}", unit_id, e),
        }
    }
}

/// El request debe describir exactamente la unidad aprobada.
fn check_request_matches_unit(
    req: &ExecuteRequest,
    unit: &ExecutionUnit,
    payload: &ApprovedPayload,
) -> Result<(), ExecutorError> {
    if unit.workspace_id != req.workspace_id || unit.ad_account_id != req.ad_account_id {
        return Err(ExecutorError::Validation(format!(
            "unit {} does not belong to workspace {} / account {}",
            unit.id, req.workspace_id, req.ad_account_id
        )));
    }
    if let Some(stored) = &unit.approved_payload {
        let stored = ApprovedPayload::parse(stored)?;
        if &stored != payload {
            return Err(ExecutorError::Validation(format!(
                "approvedPayload does not match the payload approved for unit {}",
                unit.id
            )));
        }
    }
    Ok(())
}
