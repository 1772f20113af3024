use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::config::app_config::AppConfig;
use crate::errors::ExecutorError;
use crate::handlers::internal::{authorize, error_response, parse_json};
use crate::models::audit_model::ActorType;
use crate::models::execution_model::{CreateUnitRequest, ReviewRequest};
use crate::services::audit_service::AuditService;
use crate::services::execution_service::ExecutionService;

/// POST /internal/units
pub async fn create_unit_endpoint(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    units: web::Data<ExecutionService>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(resp) = authorize(&req, &config) {
        return resp;
    }
    let create: CreateUnitRequest = match parse_json(&body) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match units.create_unit(create).await {
        Ok(unit) => HttpResponse::Created().json(json!({ "ok": true, "unit": unit })),
        Err(e) => error_response(&e),
    }
}

/// POST /internal/units/{id}/submit
pub async fn submit_unit_endpoint(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    units: web::Data<ExecutionService>,
    path: web::Path<String>,
) -> HttpResponse {
    if let Err(resp) = authorize(&req, &config) {
        return resp;
    }
    match units.submit_for_approval(&path.into_inner()).await {
        Ok(unit) => HttpResponse::Ok().json(json!({ "ok": true, "unit": unit })),
        Err(e) => error_response(&e),
    }
}

/// POST /internal/units/{id}/approve
pub async fn approve_unit_endpoint(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    units: web::Data<ExecutionService>,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(resp) = authorize(&req, &config) {
        return resp;
    }
    let review = match review_from_body(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match units
        .approve(
            &path.into_inner(),
            review.actor_type.unwrap_or(ActorType::Human),
            review.actor_id.as_deref(),
        )
        .await
    {
        Ok(unit) => HttpResponse::Ok().json(json!({ "ok": true, "unit": unit })),
        Err(e) => error_response(&e),
    }
}

/// POST /internal/units/{id}/reject
pub async fn reject_unit_endpoint(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    units: web::Data<ExecutionService>,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(resp) = authorize(&req, &config) {
        return resp;
    }
    let review = match review_from_body(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match units
        .reject(
            &path.into_inner(),
            review.actor_type.unwrap_or(ActorType::Human),
            review.actor_id.as_deref(),
            review.reason.as_deref(),
        )
        .await
    {
        Ok(unit) => HttpResponse::Ok().json(json!({ "ok": true, "unit": unit })),
        Err(e) => error_response(&e),
    }
}

/// GET /internal/units/{id}
pub async fn get_unit_endpoint(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    units: web::Data<ExecutionService>,
    path: web::Path<String>,
) -> HttpResponse {
    if let Err(resp) = authorize(&req, &config) {
        return resp;
    }
    match units.get_unit(&path.into_inner()).await {
        Ok(unit) => HttpResponse::Ok().json(json!({ "ok": true, "unit": unit })),
        Err(e) => error_response(&e),
    }
}

/// GET /internal/units/{id}/events
pub async fn unit_events_endpoint(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    units: web::Data<ExecutionService>,
    audit: web::Data<AuditService>,
    path: web::Path<String>,
) -> HttpResponse {
    if let Err(resp) = authorize(&req, &config) {
        return resp;
    }
    let unit_id = path.into_inner();
    if let Err(e) = units.get_unit(&unit_id).await {
        return error_response(&e);
    }
    match audit.list_for_unit(&unit_id).await {
        Ok(events) => HttpResponse::Ok().json(json!({ "ok": true, "events": events })),
        Err(e) => error_response(&ExecutorError::from(e)),
    }
}

/// Body opcional: vacío equivale a `{}`.
fn review_from_body(body: &web::Bytes) -> Result<ReviewRequest, HttpResponse> {
    if body.is_empty() {
        return Ok(ReviewRequest {
            actor_type: None,
            actor_id: None,
            reason: None,
        });
    }
    parse_json(body)
}
