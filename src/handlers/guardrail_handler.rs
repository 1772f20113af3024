use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::config::app_config::AppConfig;
use crate::errors::ExecutorError;
use crate::handlers::internal::{authorize, error_response, parse_json};
use crate::models::guardrail_model::{GuardrailPolicy, UpsertGuardrailRequest};
use crate::services::guardrail_service::GuardrailService;

/// GET /internal/guardrails/{workspace_id}/{ad_account_id}
pub async fn get_guardrail_endpoint(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    guardrails: web::Data<GuardrailService>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    if let Err(resp) = authorize(&req, &config) {
        return resp;
    }
    let (workspace_id, ad_account_id) = path.into_inner();
    match guardrails.get_policy(&workspace_id, &ad_account_id).await {
        Ok(policy) => HttpResponse::Ok().json(json!({ "ok": true, "policy": policy })),
        Err(e) => error_response(&ExecutorError::from(e)),
    }
}

/// PUT /internal/guardrails/{workspace_id}/{ad_account_id}
pub async fn put_guardrail_endpoint(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    guardrails: web::Data<GuardrailService>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(resp) = authorize(&req, &config) {
        return resp;
    }
    let upsert: UpsertGuardrailRequest = match parse_json(&body) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let (workspace_id, ad_account_id) = path.into_inner();

    let policy = GuardrailPolicy {
        workspace_id,
        ad_account_id,
        max_single_change_pct: upsert.max_single_change_pct,
        approval_required_threshold_pct: upsert.approval_required_threshold_pct,
        max_net_daily_change_pct: upsert.max_net_daily_change_pct,
        execution_enabled: upsert.execution_enabled,
        updated_at: None,
    };

    match guardrails.upsert_policy(&policy).await {
        Ok(saved) => HttpResponse::Ok().json(json!({ "ok": true, "policy": saved })),
        Err(e) => error_response(&e),
    }
}
