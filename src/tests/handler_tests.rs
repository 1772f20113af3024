//! tests/handler_tests.rs
//! Endpoints internos de punta a punta sobre `init_service`.

#[cfg(test)]
mod tests {
    use actix_rt::test;
    use actix_web::http::StatusCode;
    use actix_web::{test as web_test, App};
    use serde_json::{json, Value};

    use crate::app::init_app;
    use crate::handlers::internal::SECRET_HEADER;
    use crate::tests::support::{harness, reduce_bid_payload, ACCOUNT, TENANT, WORKSPACE};

    const SECRET: &str = "test-secret";

    #[test]
    async fn test_execute_requires_secret() {
        let h = harness().await;
        let services = h.services.clone();
        let app = web_test::init_service(
            App::new()
                .configure(move |cfg| services.register(cfg))
                .configure(init_app),
        )
        .await;

        let req = web_test::TestRequest::post()
            .uri("/internal/ads/execute")
            .set_json(json!({ "proposalId": "x" }))
            .to_request();
        let resp = web_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = web_test::read_body_json(resp).await;
        assert_eq!(body["ok"], json!(false));

        let req = web_test::TestRequest::post()
            .uri("/internal/ads/execute")
            .insert_header((SECRET_HEADER, "wrong-secret"))
            .set_json(json!({ "proposalId": "x" }))
            .to_request();
        let resp = web_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(h.ads.search_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    async fn test_execute_happy_path_over_http() {
        let h = harness().await;
        h.ads.with_keyword("111", "222", 1_000_000);
        let unit = h.approved_unit(reduce_bid_payload()).await;

        let services = h.services.clone();
        let app = web_test::init_service(
            App::new()
                .configure(move |cfg| services.register(cfg))
                .configure(init_app),
        )
        .await;

        let execute = json!({
            "proposalId": unit.id,
            "workspaceId": WORKSPACE,
            "adAccountId": ACCOUNT,
            "approvedPayload": reduce_bid_payload(),
            "runId": "run-http"
        });
        let req = web_test::TestRequest::post()
            .uri("/internal/ads/execute")
            .insert_header((SECRET_HEADER, SECRET))
            .set_json(&execute)
            .to_request();
        let resp = web_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = web_test::read_body_json(resp).await;
        assert_eq!(body["ok"], json!(true));
        assert_eq!(body["result"]["outcome"], json!("success"));
        assert_eq!(body["result"]["status"], json!("executed"));

        // Segundo trigger: skip idempotente, sin mutate.
        let req = web_test::TestRequest::post()
            .uri("/internal/ads/execute")
            .insert_header((SECRET_HEADER, SECRET))
            .set_json(&execute)
            .to_request();
        let body: Value = web_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["result"]["skipped"], json!(true));
        assert_eq!(body["result"]["reason"], json!("already_executed"));
        assert_eq!(h.ads.mutates(), 1);

        // El rastro del run queda visible por HTTP.
        let req = web_test::TestRequest::get()
            .uri("/internal/outbox/run-http")
            .insert_header((SECRET_HEADER, SECRET))
            .to_request();
        let body: Value = web_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["entries"].as_array().map(Vec::len), Some(1));
        assert!(body["events"].as_array().is_some_and(|e| !e.is_empty()));
    }

    #[test]
    async fn test_execute_bad_body_is_500() {
        let h = harness().await;
        let services = h.services.clone();
        let app = web_test::init_service(
            App::new()
                .configure(move |cfg| services.register(cfg))
                .configure(init_app),
        )
        .await;

        let req = web_test::TestRequest::post()
            .uri("/internal/ads/execute")
            .insert_header((SECRET_HEADER, SECRET))
            .set_payload("not json")
            .to_request();
        let resp = web_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = web_test::read_body_json(resp).await;
        assert_eq!(body["ok"], json!(false));
    }

    #[test]
    async fn test_guardrail_put_rejects_oversized_cap() {
        let h = harness().await;
        let services = h.services.clone();
        let app = web_test::init_service(
            App::new()
                .configure(move |cfg| services.register(cfg))
                .configure(init_app),
        )
        .await;
        let uri = format!("/internal/guardrails/{WORKSPACE}/{ACCOUNT}");

        let req = web_test::TestRequest::put()
            .uri(&uri)
            .insert_header((SECRET_HEADER, SECRET))
            .set_json(json!({
                "maxSingleChangePct": 25.0,
                "approvalRequiredThresholdPct": 5.0,
                "maxNetDailyChangePct": 20.0,
                "executionEnabled": true
            }))
            .to_request();
        let resp = web_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = web_test::TestRequest::put()
            .uri(&uri)
            .insert_header((SECRET_HEADER, SECRET))
            .set_json(json!({
                "maxSingleChangePct": 8.0,
                "approvalRequiredThresholdPct": 4.0,
                "maxNetDailyChangePct": 15.0,
                "executionEnabled": false
            }))
            .to_request();
        let resp = web_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = web_test::TestRequest::get()
            .uri(&uri)
            .insert_header((SECRET_HEADER, SECRET))
            .to_request();
        let body: Value = web_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["policy"]["executionEnabled"], json!(false));
        assert_eq!(body["policy"]["maxSingleChangePct"], json!(8.0));
    }

    #[test]
    async fn test_unit_lifecycle_over_http() {
        let h = harness().await;
        let services = h.services.clone();
        let app = web_test::init_service(
            App::new()
                .configure(move |cfg| services.register(cfg))
                .configure(init_app),
        )
        .await;

        let req = web_test::TestRequest::get()
            .uri("/internal/units/no-such-unit")
            .insert_header((SECRET_HEADER, SECRET))
            .to_request();
        let resp = web_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = web_test::TestRequest::post()
            .uri("/internal/units")
            .insert_header((SECRET_HEADER, SECRET))
            .set_json(json!({
                "workspaceId": WORKSPACE,
                "ownerId": TENANT,
                "adAccountId": ACCOUNT,
                "payload": reduce_bid_payload()
            }))
            .to_request();
        let resp = web_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = web_test::read_body_json(resp).await;
        let id = body["unit"]["id"].as_str().unwrap().to_string();

        for step in ["submit", "approve"] {
            let req = web_test::TestRequest::post()
                .uri(&format!("/internal/units/{id}/{step}"))
                .insert_header((SECRET_HEADER, SECRET))
                .to_request();
            let resp = web_test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK, "paso {step}");
        }

        let req = web_test::TestRequest::get()
            .uri(&format!("/internal/units/{id}/events"))
            .insert_header((SECRET_HEADER, SECRET))
            .to_request();
        let body: Value = web_test::call_and_read_body_json(&app, req).await;
        let types: Vec<&str> = body["events"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["eventType"].as_str())
            .collect();
        assert_eq!(types, vec!["created", "queued_for_approval", "approved"]);
    }
}
