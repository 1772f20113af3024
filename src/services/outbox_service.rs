//! services/outbox_service.rs
//! Outbox durable. La fila se inserta ANTES de llamar al proveedor; la
//! restricción UNIQUE (tenant, workspace, idempotency_key) es la única
//! serialización entre workers para un mismo efecto externo.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::database::{fmt_ts, now_rfc3339, parse_opt_ts, parse_ts};
use crate::errors::is_unique_violation;
use crate::models::outbox_model::{
    Channel, NewOutboxEntry, OutboxEntry, OutboxInsert, OutboxSkipReason, OutboxStatus,
};

const SELECT_COLUMNS: &str = r#"
    id, tenant_id, workspace_id, run_id, channel, provider, recipient,
    idempotency_key, status, payload, provider_message_id, error,
    scheduled_at, created_at, updated_at
"#;

#[derive(Clone, Debug)]
pub struct OutboxService {
    db_pool: Pool<Sqlite>,
}

impl OutboxService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        OutboxService { db_pool }
    }

    /// Inserta la fila pendiente. Un duplicado NO es un fallo: es un replay.
    pub async fn insert_pending(&self, entry: &NewOutboxEntry) -> Result<OutboxInsert> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let status = if entry.scheduled_at.is_some_and(|at| at > Utc::now()) {
            OutboxStatus::Scheduled
        } else {
            OutboxStatus::Queued
        };
        let payload = entry.payload.as_ref().map(Value::to_string);
        let scheduled_at = entry.scheduled_at.map(fmt_ts);

        let res = sqlx::query(
            r#"
            INSERT INTO outbox_entries (
                id, tenant_id, workspace_id, run_id, channel, provider, recipient,
                idempotency_key, status, payload, scheduled_at,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
            "#,
        )
        .bind(&id)
        .bind(&entry.tenant_id)
        .bind(&entry.workspace_id)
        .bind(&entry.run_id)
        .bind(entry.channel.as_str())
        .bind(&entry.provider)
        .bind(&entry.recipient)
        .bind(&entry.idempotency_key)
        .bind(status.as_str())
        .bind(payload)
        .bind(scheduled_at)
        .bind(&now)
        .execute(&self.db_pool)
        .await;

        match res {
            Ok(_) => {
                log::info!(
                    "(insert_pending) outbox id={} channel={} status={}",
                    id,
                    entry.channel.as_str(),
                    status.as_str()
                );
                Ok(OutboxInsert::Inserted { id, status })
            }
            Err(e) if is_unique_violation(&e) => {
                log::info!(
                    "(insert_pending) clave duplicada key={} channel={}: replay idempotente",
                    entry.idempotency_key,
                    entry.channel.as_str()
                );
                // Las filas del outbox nunca se borran: la que ganó tiene que estar.
                let existing = self
                    .find_by_key(&entry.tenant_id, &entry.workspace_id, &entry.idempotency_key)
                    .await?
                    .ok_or_else(|| {
                        anyhow!(
                            "outbox key {} reported duplicate but no row was found",
                            entry.idempotency_key
                        )
                    })?;
                Ok(OutboxInsert::Duplicate { existing })
            }
            Err(e) => Err(anyhow::Error::new(e).context("Fallo al insertar outbox entry")),
        }
    }

    /// Registra el intento deduplicado. Nunca toca la fila original.
    pub async fn record_skip(
        &self,
        entry: &NewOutboxEntry,
        reason: OutboxSkipReason,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO outbox_skips (
                id, tenant_id, workspace_id, run_id, channel, recipient,
                idempotency_key, skip_reason, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&id)
        .bind(&entry.tenant_id)
        .bind(&entry.workspace_id)
        .bind(&entry.run_id)
        .bind(entry.channel.as_str())
        .bind(&entry.recipient)
        .bind(&entry.idempotency_key)
        .bind(reason.as_str())
        .bind(now_rfc3339())
        .execute(&self.db_pool)
        .await
        .context("Fallo al registrar outbox skip")?;
        Ok(id)
    }

    /// Única actualización terminal de éxito. Devuelve false si la fila ya no estaba pendiente.
    pub async fn mark_sent(
        &self,
        id: &str,
        channel: Channel,
        provider_message_id: &str,
        provider_response: Option<&Value>,
    ) -> Result<bool> {
        let status = channel.success_status();
        let res = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET status = ?2,
                provider_message_id = ?3,
                provider_response = ?4,
                error = NULL,
                updated_at = ?5
            WHERE id = ?1 AND status IN ('queued', 'scheduled')
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(provider_message_id)
        .bind(provider_response.map(Value::to_string))
        .bind(now_rfc3339())
        .execute(&self.db_pool)
        .await
        .context("Fallo al marcar outbox como enviado")?;

        let updated = res.rows_affected() == 1;
        if !updated {
            log::warn!("(mark_sent) outbox id={} ya estaba en estado terminal", id);
        }
        Ok(updated)
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET status = 'failed',
                error = ?2,
                updated_at = ?3
            WHERE id = ?1 AND status IN ('queued', 'scheduled')
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now_rfc3339())
        .execute(&self.db_pool)
        .await
        .context("Fallo al marcar outbox como fallido")?;

        let updated = res.rows_affected() == 1;
        if !updated {
            log::warn!("(mark_failed) outbox id={} ya estaba en estado terminal", id);
        }
        Ok(updated)
    }

    /// Lease optimista para la reconciliación: sólo un barrido gana la fila.
    pub async fn touch_if_unchanged(&self, id: &str, expected_updated_at: &str) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET updated_at = ?3
            WHERE id = ?1 AND updated_at = ?2 AND status IN ('queued', 'scheduled')
            "#,
        )
        .bind(id)
        .bind(expected_updated_at)
        .bind(now_rfc3339())
        .execute(&self.db_pool)
        .await
        .context("Fallo al tomar lease de outbox")?;
        Ok(res.rows_affected() == 1)
    }

    /// Pasa una fila `scheduled` vencida a `queued` (condicional).
    pub async fn release_scheduled(&self, id: &str) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET status = 'queued', updated_at = ?2
            WHERE id = ?1 AND status = 'scheduled'
            "#,
        )
        .bind(id)
        .bind(now_rfc3339())
        .execute(&self.db_pool)
        .await
        .context("Fallo al liberar outbox programado")?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn get(&self, id: &str) -> Result<OutboxEntry> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM outbox_entries WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Fallo al leer outbox entry")?
            .ok_or_else(|| anyhow!("outbox entry {id} not found"))?;
        row_to_entry(&row)
    }

    pub async fn find_by_key(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<OutboxEntry>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_entries \
             WHERE tenant_id = ?1 AND workspace_id = ?2 AND idempotency_key = ?3"
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(workspace_id)
            .bind(idempotency_key)
            .fetch_optional(&self.db_pool)
            .await
            .context("Fallo al buscar outbox por clave")?;
        row.as_ref().map(row_to_entry).transpose()
    }

    pub async fn list_by_run(&self, run_id: &str) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_entries WHERE run_id = ?1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(run_id)
            .fetch_all(&self.db_pool)
            .await
            .context("Fallo al listar outbox por run")?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Filas `queued` sin actualizar desde `older_than` (posible crash a mitad de envío).
    pub async fn list_stale_queued(&self, older_than: DateTime<Utc>) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_entries \
             WHERE status = 'queued' AND updated_at < ?1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(fmt_ts(older_than))
            .fetch_all(&self.db_pool)
            .await
            .context("Fallo al listar outbox pendientes")?;
        rows.iter().map(row_to_entry).collect()
    }

    pub async fn list_due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_entries \
             WHERE status = 'scheduled' AND scheduled_at <= ?1 ORDER BY scheduled_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(fmt_ts(now))
            .fetch_all(&self.db_pool)
            .await
            .context("Fallo al listar outbox programados")?;
        rows.iter().map(row_to_entry).collect()
    }

    pub async fn count_skips(
        &self,
        tenant_id: &str,
        workspace_id: &str,
        idempotency_key: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS cnt FROM outbox_skips
            WHERE tenant_id = ?1 AND workspace_id = ?2 AND idempotency_key = ?3
            "#,
        )
        .bind(tenant_id)
        .bind(workspace_id)
        .bind(idempotency_key)
        .fetch_one(&self.db_pool)
        .await?;
        Ok(row.try_get::<i64, _>("cnt")?)
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<OutboxEntry> {
    let channel: String = row.try_get("channel")?;
    let status: String = row.try_get("status")?;
    let payload: Option<String> = row.try_get("payload")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(OutboxEntry {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        workspace_id: row.try_get("workspace_id")?,
        run_id: row.try_get("run_id")?,
        channel: Channel::parse(&channel).ok_or_else(|| anyhow!("canal desconocido '{channel}'"))?,
        provider: row.try_get("provider")?,
        recipient: row.try_get("recipient")?,
        idempotency_key: row.try_get("idempotency_key")?,
        status: OutboxStatus::parse(&status)
            .ok_or_else(|| anyhow!("estado de outbox desconocido '{status}'"))?,
        payload: payload
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .context("payload de outbox corrupto")?,
        provider_message_id: row.try_get("provider_message_id")?,
        error: row.try_get("error")?,
        scheduled_at: parse_opt_ts(row.try_get("scheduled_at")?)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}
