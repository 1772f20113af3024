//! services/idempotency.rs
//! Derivación de claves de idempotencia: SHA-256 hex de las partes unidas
//! por un delimitador que no puede aparecer sin escapar.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

const DELIMITER: char = '\u{1f}';

/// Clave estable para (scope, destinatario/objetivo, asset/payload, bucket temporal).
pub fn derive_key(
    scope_id: &str,
    recipient_or_target_id: &str,
    asset_or_payload_id: &str,
    time_bucket: &str,
) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in [
        scope_id,
        recipient_or_target_id,
        asset_or_payload_id,
        time_bucket,
    ]
    .iter()
    .enumerate()
    {
        if i > 0 {
            hasher.update(DELIMITER.to_string().as_bytes());
        }
        // Prefijo de longitud: ninguna concatenación distinta colisiona.
        hasher.update(part.len().to_string().as_bytes());
        hasher.update(b":");
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Bucket diario (UTC): un reenvío legítimo al día siguiente es otra clave.
pub fn day_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Normaliza un email/teléfono para que variaciones triviales no escapen al dedupe.
pub fn normalize_recipient(raw: &str) -> String {
    raw.trim().to_lowercase()
}
