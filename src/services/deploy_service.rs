//! services/deploy_service.rs
//! Deploy de email y voz con el protocolo del outbox:
//! insertar fila -> (duplicado: skip) -> (programado: sin llamada) ->
//! llamar al proveedor con la clave -> marcar sent/called o failed.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::errors::ExecutorError;
use crate::models::deploy_model::{DeployEmailRequest, DeployResponse, DeployVoiceRequest, RecipientResult};
use crate::models::outbox_model::{
    Channel, NewOutboxEntry, OutboxEntry, OutboxInsert, OutboxSkipReason, OutboxStatus,
};
use crate::services::contact_service::{ContactService, RecipientField};
use crate::services::email_provider::{EmailProvider, OutboundEmail, ProviderReceipt};
use crate::services::idempotency::{day_bucket, derive_key};
use crate::services::outbox_service::OutboxService;
use crate::services::personalization::personalize;
use crate::services::voice_provider::{OutboundCall, VoiceProvider};

#[derive(Clone)]
pub struct DeployService {
    outbox: OutboxService,
    contacts: ContactService,
    email: Arc<dyn EmailProvider>,
    voice: Option<Arc<dyn VoiceProvider>>,
    concurrency: usize,
}

impl DeployService {
    pub fn new(
        outbox: OutboxService,
        contacts: ContactService,
        email: Arc<dyn EmailProvider>,
        voice: Option<Arc<dyn VoiceProvider>>,
        concurrency: usize,
    ) -> Self {
        Self {
            outbox,
            contacts,
            email,
            voice,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn deploy_email(&self, req: DeployEmailRequest) -> Result<DeployResponse, ExecutorError> {
        require_non_empty(&[
            ("tenantId", &req.tenant_id),
            ("workspaceId", &req.workspace_id),
            ("campaignRunId", &req.campaign_run_id),
            ("assetId", &req.asset_id),
            ("subject", &req.subject),
            ("body", &req.body),
        ])?;

        let targets = self
            .contacts
            .resolve_targets(
                &req.tenant_id,
                &req.workspace_id,
                req.recipients.as_deref(),
                req.segment.as_deref(),
                RecipientField::Email,
            )
            .await?;

        let bucket = day_bucket(req.scheduled_at.unwrap_or_else(Utc::now));
        let provider = self.email.name();

        let results: Vec<Result<RecipientResult, ExecutorError>> = stream::iter(targets)
            .map(|target| {
                let email = OutboundEmail {
                    to: target.recipient.clone(),
                    subject: personalize(&req.subject, &target.contact),
                    html_body: personalize(&req.body, &target.contact),
                };
                let entry = NewOutboxEntry {
                    tenant_id: req.tenant_id.clone(),
                    workspace_id: req.workspace_id.clone(),
                    run_id: Some(req.campaign_run_id.clone()),
                    channel: Channel::Email,
                    provider: provider.to_string(),
                    recipient: target.recipient.clone(),
                    idempotency_key: derive_key(
                        &req.campaign_run_id,
                        &target.recipient,
                        &req.asset_id,
                        &bucket,
                    ),
                    payload: Some(email.to_json()),
                    scheduled_at: req.scheduled_at,
                };
                async move {
                    let key = entry.idempotency_key.clone();
                    self.dispatch_one(entry, || self.email.send(&email, &key))
                        .await
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let response = DeployResponse::from_results(results.into_iter().collect::<Result<_, _>>()?);
        log::info!(
            "(deploy_email) run={} sent={} scheduled={} failed={} skipped={}",
            req.campaign_run_id,
            response.sent,
            response.scheduled,
            response.failed,
            response.skipped
        );
        Ok(response)
    }

    pub async fn deploy_voice(&self, req: DeployVoiceRequest) -> Result<DeployResponse, ExecutorError> {
        require_non_empty(&[
            ("tenantId", &req.tenant_id),
            ("workspaceId", &req.workspace_id),
            ("campaignRunId", &req.campaign_run_id),
            ("assetId", &req.asset_id),
            ("script", &req.script),
        ])?;
        let voice = self
            .voice
            .clone()
            .ok_or_else(|| ExecutorError::Config("voice provider is not configured".to_string()))?;

        let targets = self
            .contacts
            .resolve_targets(
                &req.tenant_id,
                &req.workspace_id,
                req.phone_numbers.as_deref(),
                req.segment.as_deref(),
                RecipientField::Phone,
            )
            .await?;

        let bucket = day_bucket(req.scheduled_at.unwrap_or_else(Utc::now));

        let results: Vec<Result<RecipientResult, ExecutorError>> = stream::iter(targets)
            .map(|target| {
                let call = OutboundCall {
                    to: target.recipient.clone(),
                    script: personalize(&req.script, &target.contact),
                };
                let entry = NewOutboxEntry {
                    tenant_id: req.tenant_id.clone(),
                    workspace_id: req.workspace_id.clone(),
                    run_id: Some(req.campaign_run_id.clone()),
                    channel: Channel::Voice,
                    provider: voice.name().to_string(),
                    recipient: target.recipient.clone(),
                    idempotency_key: derive_key(
                        &req.campaign_run_id,
                        &target.recipient,
                        &req.asset_id,
                        &bucket,
                    ),
                    payload: Some(call.to_json()),
                    scheduled_at: req.scheduled_at,
                };
                let voice = voice.clone();
                async move {
                    let key = entry.idempotency_key.clone();
                    self.dispatch_one(entry, || async move { voice.place_call(&call, &key).await })
                        .await
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let response = DeployResponse::from_results(results.into_iter().collect::<Result<_, _>>()?);
        log::info!(
            "(deploy_voice) run={} called={} scheduled={} failed={} skipped={}",
            req.campaign_run_id,
            response.sent,
            response.scheduled,
            response.failed,
            response.skipped
        );
        Ok(response)
    }

    /// Protocolo del outbox para un destinatario. Un fallo del proveedor es
    /// un resultado `failed`; un fallo del store aborta el deploy.
    async fn dispatch_one<F, Fut>(
        &self,
        entry: NewOutboxEntry,
        send: F,
    ) -> Result<RecipientResult, ExecutorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ProviderReceipt, ExecutorError>>,
    {
        let mut result = RecipientResult {
            recipient: entry.recipient.clone(),
            idempotency_key: entry.idempotency_key.clone(),
            status: OutboxStatus::Queued,
            skipped: false,
            skip_reason: None,
            provider_message_id: None,
            error: None,
        };

        let id = match self.outbox.insert_pending(&entry).await? {
            OutboxInsert::Duplicate { existing } => {
                self.outbox
                    .record_skip(&entry, OutboxSkipReason::IdempotentReplay)
                    .await?;
                result.skipped = true;
                result.skip_reason = Some(OutboxSkipReason::IdempotentReplay.as_str());
                result.status = existing.status;
                result.provider_message_id = existing.provider_message_id;
                return Ok(result);
            }
            OutboxInsert::Inserted { id, status } => {
                // Programada: el envío queda para el barrido.
                if status == OutboxStatus::Scheduled {
                    result.status = OutboxStatus::Scheduled;
                    return Ok(result);
                }
                id
            }
        };

        match send().await {
            Ok(receipt) => {
                self.outbox
                    .mark_sent(&id, entry.channel, &receipt.message_id, Some(&receipt.response))
                    .await?;
                result.status = entry.channel.success_status();
                result.provider_message_id = Some(receipt.message_id);
            }
            Err(e) => {
                log::error!(
                    "(dispatch_one) {} a {} falló: {}",
                    entry.channel.as_str(),
                    entry.recipient,
                    e
                );
                self.outbox.mark_failed(&id, &e.to_string()).await?;
                result.status = OutboxStatus::Failed;
                result.error = Some(e.to_string());
            }
        }
        Ok(result)
    }

    /// Reenvía una fila existente con su propio payload y clave. Lo usa la
    /// reconciliación; nunca crea filas.
    pub async fn redeliver(&self, entry: &OutboxEntry) -> Result<ProviderReceipt, ExecutorError> {
        let payload = entry.payload.as_ref().ok_or_else(|| {
            ExecutorError::Validation(format!("outbox entry {} has no payload", entry.id))
        })?;
        match entry.channel {
            Channel::Email => {
                let email = OutboundEmail::from_json(payload).ok_or_else(|| {
                    ExecutorError::Validation(format!("outbox entry {} has a malformed email payload", entry.id))
                })?;
                self.email.send(&email, &entry.idempotency_key).await
            }
            Channel::Voice => {
                let call = OutboundCall::from_json(payload).ok_or_else(|| {
                    ExecutorError::Validation(format!("outbox entry {} has a malformed call payload", entry.id))
                })?;
                let voice = self
                    .voice
                    .as_ref()
                    .ok_or_else(|| ExecutorError::Config("voice provider is not configured".to_string()))?;
                voice.place_call(&call, &entry.idempotency_key).await
            }
            Channel::Ads => Err(ExecutorError::Validation(
                "ads mutations are not re-sent from the outbox".to_string(),
            )),
        }
    }

    /// Si reenviar con la misma clave es seguro para el canal.
    pub fn honours_idempotency_key(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email.honours_idempotency_key(),
            Channel::Voice => self
                .voice
                .as_ref()
                .is_some_and(|v| v.honours_idempotency_key()),
            Channel::Ads => false,
        }
    }
}

fn require_non_empty(fields: &[(&str, &String)]) -> Result<(), ExecutorError> {
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(ExecutorError::Validation(format!("{name} is required")));
        }
    }
    Ok(())
}
