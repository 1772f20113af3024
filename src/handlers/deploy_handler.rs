use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::config::app_config::AppConfig;
use crate::errors::ExecutorError;
use crate::handlers::internal::{authorize, error_response, parse_json};
use crate::models::deploy_model::{DeployEmailRequest, DeployVoiceRequest};
use crate::services::audit_service::AuditService;
use crate::services::deploy_service::DeployService;
use crate::services::outbox_service::OutboxService;
use crate::services::reconcile_service::ReconcileService;

/// POST /internal/email/deploy
pub async fn deploy_email_endpoint(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    deploy: web::Data<DeployService>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(resp) = authorize(&req, &config) {
        return resp;
    }
    let request: DeployEmailRequest = match parse_json(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match deploy.deploy_email(request).await {
        Ok(summary) => HttpResponse::Ok().json(json!({ "ok": true, "result": summary })),
        Err(e) => error_response(&e),
    }
}

/// POST /internal/voice/deploy
pub async fn deploy_voice_endpoint(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    deploy: web::Data<DeployService>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(resp) = authorize(&req, &config) {
        return resp;
    }
    let request: DeployVoiceRequest = match parse_json(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match deploy.deploy_voice(request).await {
        Ok(summary) => HttpResponse::Ok().json(json!({ "ok": true, "result": summary })),
        Err(e) => error_response(&e),
    }
}

/// GET /internal/outbox/{run_id}
pub async fn outbox_by_run_endpoint(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    outbox: web::Data<OutboxService>,
    audit: web::Data<AuditService>,
    path: web::Path<String>,
) -> HttpResponse {
    if let Err(resp) = authorize(&req, &config) {
        return resp;
    }
    let run_id = path.into_inner();

    let entries = match outbox.list_by_run(&run_id).await {
        Ok(entries) => entries,
        Err(e) => return error_response(&ExecutorError::from(e)),
    };
    match audit.list_for_run(&run_id).await {
        Ok(events) => HttpResponse::Ok().json(json!({
            "ok": true,
            "entries": entries,
            "events": events
        })),
        Err(e) => error_response(&ExecutorError::from(e)),
    }
}

/// POST /internal/outbox/reconcile
pub async fn reconcile_endpoint(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    reconcile: web::Data<ReconcileService>,
) -> HttpResponse {
    if let Err(resp) = authorize(&req, &config) {
        return resp;
    }
    match reconcile.run_once().await {
        Ok(report) => HttpResponse::Ok().json(json!({ "ok": true, "result": report })),
        Err(e) => error_response(&e),
    }
}
