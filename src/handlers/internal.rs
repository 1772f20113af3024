//! handlers/internal.rs
//! Piezas comunes de los endpoints internos: secreto compartido, parseo del
//! body y mapeo de `ExecutorError` a respuestas.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::config::app_config::AppConfig;
use crate::errors::ExecutorError;

pub const SECRET_HEADER: &str = "x-internal-secret";

/// 401 si falta el header o no coincide con `INTERNAL_SHARED_SECRET`.
pub fn authorize(req: &HttpRequest, config: &AppConfig) -> Result<(), HttpResponse> {
    let provided = req
        .headers()
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided.is_empty() || !constant_time_eq(provided.as_bytes(), config.internal_shared_secret.as_bytes()) {
        log::warn!("(authorize) request a {} sin secreto válido", req.path());
        return Err(HttpResponse::Unauthorized().json(json!({
            "ok": false,
            "error": "unauthorized"
        })));
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// El body se parsea a mano para que la autorización vaya primero.
pub fn parse_json<T: DeserializeOwned>(body: &web::Bytes) -> Result<T, HttpResponse> {
    serde_json::from_slice(body).map_err(|e| {
        HttpResponse::BadRequest().json(json!({
            "ok": false,
            "error": format!("invalid JSON body: {e}")
        }))
    })
}

pub fn error_response(err: &ExecutorError) -> HttpResponse {
    let body = json!({ "ok": false, "error": err.to_string() });
    match err {
        ExecutorError::Validation(_) => HttpResponse::BadRequest().json(body),
        ExecutorError::NotFound(_) => HttpResponse::NotFound().json(body),
        _ => {
            log::error!("(error_response) {}", err);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_whole_secret() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
