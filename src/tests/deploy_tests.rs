//! tests/deploy_tests.rs
//! Deploys de email y voz: idempotencia bajo concurrencia, targeting y
//! personalización.

#[cfg(test)]
mod tests {
    use actix_rt::test;
    use chrono::{Duration, Utc};

    use crate::errors::ExecutorError;
    use crate::models::deploy_model::{DeployEmailRequest, DeployVoiceRequest};
    use crate::models::outbox_model::OutboxStatus;
    use crate::services::idempotency::{day_bucket, derive_key};
    use crate::tests::support::{harness, harness_with_email, FakeEmailProvider, TENANT, WORKSPACE};

    fn email_request(recipients: Option<Vec<&str>>) -> DeployEmailRequest {
        DeployEmailRequest {
            tenant_id: TENANT.to_string(),
            workspace_id: WORKSPACE.to_string(),
            campaign_run_id: "run-email".to_string(),
            asset_id: "asset-1".to_string(),
            subject: "Hola {{first_name}}".to_string(),
            body: "<p>{{Company}} merece más, {{ FIRST_NAME }}.</p>".to_string(),
            recipients: recipients.map(|r| r.into_iter().map(str::to_string).collect()),
            segment: None,
            scheduled_at: None,
        }
    }

    #[test]
    async fn test_concurrent_deploys_send_once() {
        let h = harness().await;
        let deploy = &h.services.deploy;

        let runs = (0..5).map(|_| deploy.deploy_email(email_request(Some(vec!["Ana@Example.com"]))));
        let responses: Vec<_> = futures::future::join_all(runs)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let sent: usize = responses.iter().map(|r| r.sent).sum();
        let skipped: usize = responses.iter().map(|r| r.skipped).sum();
        assert_eq!(sent, 1, "Un solo envío real");
        assert_eq!(skipped, 4, "N-1 replays");
        assert_eq!(h.email.sent_count(), 1);

        let entries = h.services.outbox.list_by_run("run-email").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, OutboxStatus::Sent);
        assert!(entries[0].provider_message_id.is_some());
        assert_eq!(entries[0].recipient, "ana@example.com");

        let key = derive_key("run-email", "ana@example.com", "asset-1", &day_bucket(Utc::now()));
        assert_eq!(entries[0].idempotency_key, key);
        assert_eq!(
            h.services.outbox.count_skips(TENANT, WORKSPACE, &key).await.unwrap(),
            4
        );

        for r in responses.iter().flat_map(|r| &r.results).filter(|r| r.skipped) {
            assert_eq!(r.skip_reason, Some("idempotent_replay"));
            assert_eq!(r.idempotency_key, key);
        }
    }

    #[test]
    async fn test_crm_targeting_and_personalization() {
        let h = harness().await;
        h.seed_contact("ana@example.com", Some("Ana"), Some("Acme"), "active", Some("vip"))
            .await;
        h.seed_contact("bob@example.com", None, None, "active", Some("vip"))
            .await;
        h.seed_contact("carl@example.com", Some("Carl"), None, "active", Some("trial"))
            .await;
        h.seed_contact("dora@example.com", Some("Dora"), None, "unsubscribed", Some("vip"))
            .await;

        let mut req = email_request(None);
        req.segment = Some("vip".to_string());
        let resp = h.services.deploy.deploy_email(req).await.unwrap();
        assert_eq!(resp.sent, 2, "Sólo activos del segmento vip");

        let sent = h.email.sent.lock().unwrap().clone();
        let mut by_recipient: Vec<_> = sent.iter().map(|(e, _)| e.clone()).collect();
        by_recipient.sort_by(|a, b| a.to.cmp(&b.to));

        assert_eq!(by_recipient[0].to, "ana@example.com");
        assert_eq!(by_recipient[0].subject, "Hola Ana");
        assert_eq!(by_recipient[0].html_body, "<p>Acme merece más, Ana.</p>");

        assert_eq!(by_recipient[1].to, "bob@example.com");
        assert_eq!(by_recipient[1].subject, "Hola there");
        assert_eq!(by_recipient[1].html_body, "<p>your company merece más, there.</p>");

        for email in &by_recipient {
            assert!(!email.subject.contains("{{") && !email.html_body.contains("{{"));
        }
    }

    #[test]
    async fn test_explicit_list_ignores_segment() {
        let h = harness().await;
        h.seed_contact("ana@example.com", Some("Ana"), None, "active", Some("trial"))
            .await;

        let mut req = email_request(Some(vec!["ana@example.com", "nuevo@example.com"]));
        req.segment = Some("vip".to_string());
        let resp = h.services.deploy.deploy_email(req).await.unwrap();

        assert_eq!(resp.sent, 2);
        let subjects: Vec<String> = h
            .email
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(e, _)| e.subject.clone())
            .collect();
        assert!(subjects.contains(&"Hola Ana".to_string()));
        assert!(subjects.contains(&"Hola there".to_string()));
    }

    #[test]
    async fn test_provider_failure_marks_row_failed() {
        let h = harness_with_email(FakeEmailProvider::failing_for("bad@example.com")).await;
        let resp = h
            .services
            .deploy
            .deploy_email(email_request(Some(vec!["ok@example.com", "bad@example.com"])))
            .await
            .unwrap();

        assert_eq!(resp.sent, 1);
        assert_eq!(resp.failed, 1);
        let failed = resp.results.iter().find(|r| r.recipient == "bad@example.com").unwrap();
        assert_eq!(failed.status, OutboxStatus::Failed);
        assert!(failed.error.is_some());

        let entry = h
            .services
            .outbox
            .find_by_key(TENANT, WORKSPACE, &failed.idempotency_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, OutboxStatus::Failed);
        assert!(entry.provider_message_id.is_none());
    }

    #[test]
    async fn test_scheduled_deploy_does_not_call_provider() {
        let h = harness().await;
        let mut req = email_request(Some(vec!["ana@example.com"]));
        req.scheduled_at = Some(Utc::now() + Duration::days(1));

        let resp = h.services.deploy.deploy_email(req).await.unwrap();
        assert_eq!(resp.scheduled, 1);
        assert_eq!(h.email.sent_count(), 0);

        let entries = h.services.outbox.list_by_run("run-email").await.unwrap();
        assert_eq!(entries[0].status, OutboxStatus::Scheduled);
        assert!(entries[0].scheduled_at.is_some());
    }

    #[test]
    async fn test_missing_fields_are_rejected() {
        let h = harness().await;
        let mut req = email_request(Some(vec!["ana@example.com"]));
        req.subject = "  ".to_string();
        let res = h.services.deploy.deploy_email(req).await;
        assert!(matches!(res, Err(ExecutorError::Validation(_))));
        assert_eq!(h.email.sent_count(), 0);
    }

    #[test]
    async fn test_voice_deploy_marks_called() {
        let h = harness().await;
        let req = DeployVoiceRequest {
            tenant_id: TENANT.to_string(),
            workspace_id: WORKSPACE.to_string(),
            campaign_run_id: "run-voice".to_string(),
            asset_id: "script-1".to_string(),
            script: "Hola {{first_name}}, llamamos de parte de {{company}}.".to_string(),
            phone_numbers: Some(vec!["+15550001".to_string(), " +15550001 ".to_string()]),
            segment: None,
            scheduled_at: None,
        };

        let resp = h.services.deploy.deploy_voice(req.clone()).await.unwrap();
        assert_eq!(resp.sent, 1, "Números repetidos se deduplican");
        assert_eq!(resp.results[0].status, OutboxStatus::Called);

        let calls = h.voice.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.script, "Hola there, llamamos de parte de your company.");

        let again = h.services.deploy.deploy_voice(req).await.unwrap();
        assert_eq!(again.skipped, 1);
        assert_eq!(h.voice.calls.lock().unwrap().len(), 1);
    }

    #[test]
    async fn test_near_due_schedule_is_sent_exactly_once() {
        let h = harness().await;
        let mut req = email_request(Some(vec!["ana@example.com"]));
        req.scheduled_at = Some(Utc::now() + Duration::milliseconds(50));

        let resp = h.services.deploy.deploy_email(req).await.unwrap();
        let entries = h.services.outbox.list_by_run("run-email").await.unwrap();
        assert_eq!(entries.len(), 1);

        // El estado guardado y la llamada al proveedor siempre coinciden.
        match entries[0].status {
            OutboxStatus::Scheduled => {
                assert_eq!(resp.scheduled, 1);
                assert_eq!(h.email.sent_count(), 0);
            }
            OutboxStatus::Sent => {
                assert_eq!(resp.sent, 1);
                assert_eq!(h.email.sent_count(), 1);
            }
            other => panic!("estado inesperado {other:?}"),
        }

        actix_rt::time::sleep(std::time::Duration::from_millis(100)).await;
        h.services.reconcile.run_once().await.unwrap();
        assert_eq!(h.email.sent_count(), 1, "Nunca dos envíos");
        let entry = h.services.outbox.get(&entries[0].id).await.unwrap();
        assert_eq!(entry.status, OutboxStatus::Sent);
    }
}
