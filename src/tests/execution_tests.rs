//! tests/execution_tests.rs
//! Máquina de estados, claim atómico, guardrails y ledger append-only.

#[cfg(test)]
mod tests {
    use actix_rt::test;
    use serde_json::json;

    use crate::errors::{is_check_violation, ExecutorError};
    use crate::models::audit_model::{ActorType, AuditEventType, NewAuditEvent};
    use crate::models::execution_model::{CreateUnitRequest, UnitStatus};
    use crate::models::guardrail_model::{GateDecision, GuardrailPolicy};
    use crate::tests::support::{
        harness, pause_payload, reduce_bid_payload, ACCOUNT, CUSTOMER, TENANT, WORKSPACE,
    };

    fn create_request(payload: serde_json::Value) -> CreateUnitRequest {
        CreateUnitRequest {
            workspace_id: WORKSPACE.to_string(),
            owner_id: TENANT.to_string(),
            ad_account_id: ACCOUNT.to_string(),
            payload,
            actor_type: None,
            actor_id: None,
        }
    }

    #[test]
    async fn test_lifecycle_to_approved() {
        let h = harness().await;
        let unit = h.approved_unit(reduce_bid_payload()).await;

        assert_eq!(unit.status, UnitStatus::Approved);
        assert!(unit.approved_payload.is_some());
        assert_eq!(
            h.event_types(&unit.id).await,
            vec!["created", "queued_for_approval", "approved"]
        );
    }

    #[test]
    async fn test_create_rejects_unknown_kind() {
        let h = harness().await;
        let res = h
            .services
            .units
            .create_unit(create_request(json!({ "kind": "delete_campaign", "campaignId": "1" })))
            .await;
        assert!(matches!(res, Err(ExecutorError::Validation(_))));
    }

    #[test]
    async fn test_submit_blocks_oversized_change() {
        let h = harness().await;
        // +30% supera el máximo por defecto de 10%.
        let unit = h
            .services
            .units
            .create_unit(create_request(json!({
                "kind": "increase_campaign_budget",
                "campaignBudgetId": "333",
                "afterAmountMicros": 13_000_000,
                "beforeAmountMicros": 10_000_000
            })))
            .await
            .unwrap();

        let submitted = h.services.units.submit_for_approval(&unit.id).await.unwrap();
        assert_eq!(submitted.status, UnitStatus::Blocked);
        assert_eq!(h.event_types(&unit.id).await, vec!["created", "blocked"]);

        // Bloqueada no se aprueba; sí se rechaza.
        let approve = h
            .services
            .units
            .approve(&unit.id, ActorType::Human, Some("reviewer-1"))
            .await;
        assert!(approve.is_err());
        let rejected = h
            .services
            .units
            .reject(&unit.id, ActorType::Human, Some("reviewer-1"), Some("too large"))
            .await
            .unwrap();
        assert_eq!(rejected.status, UnitStatus::Rejected);
        assert_eq!(rejected.last_error.as_deref(), Some("too large"));
    }

    #[test]
    async fn test_submit_blocks_change_without_before_value() {
        let h = harness().await;
        h.ads.with_budget("333", 10_000_000);
        // Sin beforeAmountMicros el salto a 100M no se puede acotar.
        let unit = h
            .services
            .units
            .create_unit(create_request(json!({
                "kind": "increase_campaign_budget",
                "campaignBudgetId": "333",
                "afterAmountMicros": 100_000_000
            })))
            .await
            .unwrap();

        let submitted = h.services.units.submit_for_approval(&unit.id).await.unwrap();
        assert_eq!(submitted.status, UnitStatus::Blocked);
        assert_eq!(h.event_types(&unit.id).await, vec!["created", "blocked"]);
        let events = h.services.audit.list_for_unit(&unit.id).await.unwrap();
        assert!(events[1].message.contains("beforeAmountMicros"));

        let approve = h
            .services
            .units
            .approve(&unit.id, ActorType::Human, Some("reviewer-1"))
            .await;
        assert!(approve.is_err());
        assert_eq!(h.ads.mutates(), 0);
        assert_eq!(
            h.ads.field(&format!("customers/{CUSTOMER}/campaignBudgets/333"), "amountMicros"),
            Some(json!("10000000"))
        );

        let bid = h
            .services
            .units
            .create_unit(create_request(json!({
                "kind": "reduce_keyword_bid",
                "adGroupId": "111",
                "criterionId": "222",
                "afterCpcBidMicros": 100_000
            })))
            .await
            .unwrap();
        let submitted = h.services.units.submit_for_approval(&bid.id).await.unwrap();
        assert_eq!(submitted.status, UnitStatus::Blocked);
    }

    #[test]
    async fn test_approval_threshold_only_flags_the_queued_event() {
        let h = harness().await;
        for (after, expected) in [(980_000, false), (930_000, true)] {
            let unit = h
                .services
                .units
                .create_unit(create_request(json!({
                    "kind": "reduce_keyword_bid",
                    "adGroupId": "111",
                    "criterionId": "222",
                    "afterCpcBidMicros": after,
                    "beforeCpcBidMicros": 1_000_000
                })))
                .await
                .unwrap();

            // Por debajo del umbral también queda esperando aprobación.
            let submitted = h.services.units.submit_for_approval(&unit.id).await.unwrap();
            assert_eq!(submitted.status, UnitStatus::QueuedForApproval);
            let events = h.services.audit.list_for_unit(&unit.id).await.unwrap();
            assert_eq!(events[1].event_type, AuditEventType::QueuedForApproval);
            assert_eq!(events[1].details["requires_approval"], json!(expected), "after {after}");
        }
    }

    #[test]
    async fn test_concurrent_claim_single_winner() {
        let h = harness().await;
        let unit = h.approved_unit(pause_payload()).await;
        let units = &h.services.units;

        let (a, b) = futures::join!(
            units.claim_for_execution(&unit.id),
            units.claim_for_execution(&unit.id)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(
            [a.claimed, b.claimed].iter().filter(|c| **c).count(),
            1,
            "Exactamente un claim debe ganar"
        );
        assert_eq!(a.status, UnitStatus::Executing);
        assert_eq!(b.status, UnitStatus::Executing);
    }

    #[test]
    async fn test_claim_after_execution_is_noop() {
        let h = harness().await;
        let unit = h.approved_unit(pause_payload()).await;
        let units = &h.services.units;

        assert!(units.claim_for_execution(&unit.id).await.unwrap().claimed);
        assert!(units.mark_executed(&unit.id).await.unwrap());

        let again = units.claim_for_execution(&unit.id).await.unwrap();
        assert!(!again.claimed);
        assert_eq!(again.status, UnitStatus::Executed);
        assert!(again.executed_at.is_some());

        // Un failed no vuelve a approved.
        assert!(!units.mark_failed(&unit.id, "late").await.unwrap());
    }

    #[test]
    async fn test_claim_requires_approved() {
        let h = harness().await;
        let unit = h
            .services
            .units
            .create_unit(create_request(pause_payload()))
            .await
            .unwrap();

        let claim = h.services.units.claim_for_execution(&unit.id).await.unwrap();
        assert!(!claim.claimed);
        assert_eq!(claim.status, UnitStatus::Created);
    }

    #[test]
    async fn test_approved_payload_is_immutable() {
        let h = harness().await;
        let unit = h.approved_unit(reduce_bid_payload()).await;

        let res = sqlx::query("UPDATE execution_units SET approved_payload = '{}' WHERE id = ?1")
            .bind(&unit.id)
            .execute(&h.pool)
            .await;
        assert!(res.is_err(), "approved_payload no debe poder reescribirse");
    }

    #[test]
    async fn test_guardrail_defaults_and_caps() {
        let h = harness().await;
        let guardrails = &h.services.guardrails;

        let policy = guardrails.get_policy(WORKSPACE, ACCOUNT).await.unwrap();
        assert_eq!(policy, GuardrailPolicy::defaults(WORKSPACE, ACCOUNT));

        let mut oversized = GuardrailPolicy::defaults(WORKSPACE, ACCOUNT);
        oversized.max_single_change_pct = 25.0;
        let res = guardrails.upsert_policy(&oversized).await;
        assert!(matches!(res, Err(ExecutorError::Validation(_))));

        let mut inverted = GuardrailPolicy::defaults(WORKSPACE, ACCOUNT);
        inverted.approval_required_threshold_pct = 15.0;
        assert!(guardrails.upsert_policy(&inverted).await.is_err());

        let mut nan = GuardrailPolicy::defaults(WORKSPACE, ACCOUNT);
        nan.max_net_daily_change_pct = f64::NAN;
        assert!(guardrails.upsert_policy(&nan).await.is_err());

        // Nada de lo anterior llegó a la tabla.
        assert_eq!(
            guardrails.get_policy(WORKSPACE, ACCOUNT).await.unwrap().updated_at,
            None
        );
    }

    #[test]
    async fn test_guardrail_check_constraint_rejects_direct_write() {
        let h = harness().await;
        let res = sqlx::query(
            r#"
            INSERT INTO guardrail_policies (
                workspace_id, ad_account_id, max_single_change_pct,
                approval_required_threshold_pct, max_net_daily_change_pct,
                execution_enabled, updated_at
            )
            VALUES ('ws-1', 'acct', 25.0, 5.0, 20.0, 1, '2025-01-01T00:00:00.000000Z')
            "#,
        )
        .execute(&h.pool)
        .await;

        let err = res.expect_err("el CHECK debe rechazar 25%");
        assert!(is_check_violation(&err));
    }

    #[test]
    async fn test_kill_switch_gate() {
        let h = harness().await;
        let guardrails = &h.services.guardrails;
        assert_eq!(
            guardrails.check_gate(WORKSPACE, ACCOUNT).await.unwrap(),
            GateDecision::Allow
        );

        let mut disabled = GuardrailPolicy::defaults(WORKSPACE, ACCOUNT);
        disabled.execution_enabled = false;
        let saved = guardrails.upsert_policy(&disabled).await.unwrap();
        assert!(!saved.execution_enabled);
        assert!(saved.updated_at.is_some());

        assert_eq!(
            guardrails.check_gate(WORKSPACE, ACCOUNT).await.unwrap(),
            GateDecision::Deny {
                reason: "execution_disabled".to_string()
            }
        );
    }

    #[test]
    async fn test_audit_log_is_append_only() {
        let h = harness().await;
        let audit = &h.services.audit;
        let first = audit
            .record(NewAuditEvent::new(WORKSPACE, AuditEventType::Note, "uno").run(Some("run-a")))
            .await
            .unwrap();
        audit
            .record(NewAuditEvent::new(WORKSPACE, AuditEventType::Note, "dos").run(Some("run-a")))
            .await
            .unwrap();

        let events = audit.list_for_run("run-a").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, first);
        assert!(events[0].seq < events[1].seq);

        let update = sqlx::query("UPDATE audit_events SET message = 'x' WHERE id = ?1")
            .bind(&first)
            .execute(&h.pool)
            .await;
        assert!(update.is_err(), "UPDATE debe fallar");

        let delete = sqlx::query("DELETE FROM audit_events WHERE id = ?1")
            .bind(&first)
            .execute(&h.pool)
            .await;
        assert!(delete.is_err(), "DELETE debe fallar");
    }
}
