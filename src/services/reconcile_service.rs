//! services/reconcile_service.rs
//! Barrido del outbox para filas que quedaron sin estado terminal
//! (crash entre el INSERT y la llamada, o envíos programados ya vencidos).
//! Nunca inserta filas: sólo completa o falla las existentes.

use chrono::{Duration, Utc};

use crate::database::fmt_ts;
use crate::errors::ExecutorError;
use crate::models::deploy_model::ReconcileReport;
use crate::models::outbox_model::OutboxEntry;
use crate::services::deploy_service::DeployService;
use crate::services::outbox_service::OutboxService;

pub const UNCONFIRMED_AFTER_CRASH: &str = "unconfirmed_after_crash";

#[derive(Clone)]
pub struct ReconcileService {
    outbox: OutboxService,
    deploy: DeployService,
    stale_after: Duration,
}

impl ReconcileService {
    pub fn new(outbox: OutboxService, deploy: DeployService, stale_after_secs: i64) -> Self {
        Self {
            outbox,
            deploy,
            stale_after: Duration::seconds(stale_after_secs.max(0)),
        }
    }

    pub async fn run_once(&self) -> Result<ReconcileReport, ExecutorError> {
        let now = Utc::now();
        let mut report = ReconcileReport::default();

        // Programados vencidos: nunca se llamó al proveedor, enviar es seguro.
        for entry in self.outbox.list_due_scheduled(now).await? {
            if !self.outbox.release_scheduled(&entry.id).await? {
                continue;
            }
            report.examined += 1;
            self.complete(&entry, &mut report).await?;
        }

        for entry in self.outbox.list_stale_queued(now - self.stale_after).await? {
            // Otro barrido concurrente ya la tomó.
            if !self
                .outbox
                .touch_if_unchanged(&entry.id, &fmt_ts(entry.updated_at))
                .await?
            {
                continue;
            }
            report.examined += 1;

            if self.deploy.honours_idempotency_key(entry.channel) {
                self.complete(&entry, &mut report).await?;
            } else {
                log::warn!(
                    "(reconcile) outbox id={} channel={} sin confirmación tras crash: requiere revisión",
                    entry.id,
                    entry.channel.as_str()
                );
                if self.outbox.mark_failed(&entry.id, UNCONFIRMED_AFTER_CRASH).await? {
                    report.failed += 1;
                }
            }
        }

        log::info!(
            "(reconcile) examinadas={} completadas={} fallidas={}",
            report.examined,
            report.completed,
            report.failed
        );
        Ok(report)
    }

    async fn complete(&self, entry: &OutboxEntry, report: &mut ReconcileReport) -> Result<(), ExecutorError> {
        match self.deploy.redeliver(entry).await {
            Ok(receipt) => {
                if self
                    .outbox
                    .mark_sent(&entry.id, entry.channel, &receipt.message_id, Some(&receipt.response))
                    .await?
                {
                    report.completed += 1;
                }
            }
            Err(e) => {
                log::error!("(reconcile) outbox id={} reenvío falló: {}", entry.id, e);
                if self.outbox.mark_failed(&entry.id, &e.to_string()).await? {
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }
}
