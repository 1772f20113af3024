use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::config::app_config::AppConfig;
use crate::handlers::internal::authorize;
use crate::models::execution_model::ExecuteRequest;
use crate::services::executor_service::ExecutorService;

/// POST /internal/ads/execute
/// 200 `{ok: true, result}`; 401 sin secreto; 500 para cualquier otro fallo.
pub async fn execute_endpoint(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    executor: web::Data<ExecutorService>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(resp) = authorize(&req, &config) {
        return resp;
    }

    let request: ExecuteRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            log::error!("Execute request inválido: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "ok": false,
                "error": format!("invalid request body: {e}")
            }));
        }
    };

    match executor.execute(request).await {
        Ok(outcome) => HttpResponse::Ok().json(json!({
            "ok": true,
            "result": outcome.to_result()
        })),
        Err(e) => {
            log::error!("Execute error: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "ok": false,
                "error": e.to_string()
            }))
        }
    }
}
