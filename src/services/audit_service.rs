//! services/audit_service.rs
//! Ledger append-only. Si la escritura falla, la operación que la disparó
//! falla también: la completitud del rastro es parte de la corrección.

use anyhow::{anyhow, Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::database::{now_rfc3339, parse_ts};
use crate::errors::ExecutorError;
use crate::models::audit_model::{ActorType, AuditEvent, AuditEventType, NewAuditEvent};

#[derive(Clone, Debug)]
pub struct AuditService {
    db_pool: Pool<Sqlite>,
}

impl AuditService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        AuditService { db_pool }
    }

    /// Escribe el evento de forma durable antes de devolver.
    pub async fn record(&self, event: NewAuditEvent) -> Result<String, ExecutorError> {
        let id = Uuid::new_v4().to_string();
        let details = event.details.to_string();

        sqlx::query(
            r#"
            INSERT INTO audit_events (
                id, workspace_id, ad_account_id, unit_id, event_type,
                actor_type, actor_id, run_id, message, details, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&id)
        .bind(&event.workspace_id)
        .bind(&event.ad_account_id)
        .bind(&event.unit_id)
        .bind(event.event_type.as_str())
        .bind(event.actor_type.as_str())
        .bind(&event.actor_id)
        .bind(&event.run_id)
        .bind(&event.message)
        .bind(details)
        .bind(now_rfc3339())
        .execute(&self.db_pool)
        .await
        .map_err(|e| {
            log::error!(
                "(record) no se pudo escribir evento {} unit={:?}: {}",
                event.event_type.as_str(),
                event.unit_id,
                e
            );
            ExecutorError::Audit(e.to_string())
        })?;

        log::debug!(
            "(record) evento {} unit={:?} id={}",
            event.event_type.as_str(),
            event.unit_id,
            id
        );
        Ok(id)
    }

    /// Eventos de una unidad en orden de escritura.
    pub async fn list_for_unit(&self, unit_id: &str) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, id, workspace_id, ad_account_id, unit_id, event_type,
                   actor_type, actor_id, run_id, message, details, created_at
            FROM audit_events
            WHERE unit_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(unit_id)
        .fetch_all(&self.db_pool)
        .await
        .context("Fallo al listar eventos de auditoría")?;

        rows.iter().map(row_to_event).collect()
    }

    pub async fn list_for_run(&self, run_id: &str) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, id, workspace_id, ad_account_id, unit_id, event_type,
                   actor_type, actor_id, run_id, message, details, created_at
            FROM audit_events
            WHERE run_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.db_pool)
        .await
        .context("Fallo al listar eventos del run")?;

        rows.iter().map(row_to_event).collect()
    }
}

fn row_to_event(row: &SqliteRow) -> Result<AuditEvent> {
    let event_type: String = row.try_get("event_type")?;
    let actor_type: String = row.try_get("actor_type")?;
    let details: String = row.try_get("details")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(AuditEvent {
        seq: row.try_get("seq")?,
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        ad_account_id: row.try_get("ad_account_id")?,
        unit_id: row.try_get("unit_id")?,
        event_type: AuditEventType::parse(&event_type)
            .ok_or_else(|| anyhow!("tipo de evento desconocido '{event_type}'"))?,
        actor_type: ActorType::parse(&actor_type)
            .ok_or_else(|| anyhow!("tipo de actor desconocido '{actor_type}'"))?,
        actor_id: row.try_get("actor_id")?,
        run_id: row.try_get("run_id")?,
        message: row.try_get("message")?,
        details: serde_json::from_str(&details).context("details de auditoría corruptos")?,
        created_at: parse_ts(&created_at)?,
    })
}
