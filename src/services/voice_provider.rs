//! services/voice_provider.rs
//! Proveedor de llamadas salientes. Mismo contrato que email: la clave de
//! idempotencia viaja en cada request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::app_config::AppConfig;
use crate::errors::ExecutorError;
use crate::services::email_provider::ProviderReceipt;

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCall {
    pub to: String,
    pub script: String,
}

impl OutboundCall {
    pub fn to_json(&self) -> Value {
        json!({ "to": self.to, "script": self.script })
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        Some(OutboundCall {
            to: value.get("to")?.as_str()?.to_string(),
            script: value.get("script")?.as_str()?.to_string(),
        })
    }
}

#[async_trait]
pub trait VoiceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn honours_idempotency_key(&self) -> bool;

    async fn place_call(
        &self,
        call: &OutboundCall,
        idempotency_key: &str,
    ) -> Result<ProviderReceipt, ExecutorError>;
}

pub struct HttpVoiceProvider {
    http: Client,
    api_url: String,
    api_key: String,
}

impl HttpVoiceProvider {
    pub fn new(http: Client, api_url: &str, api_key: &str) -> Self {
        Self {
            http,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl VoiceProvider for HttpVoiceProvider {
    fn name(&self) -> &'static str {
        "http_voice"
    }

    fn honours_idempotency_key(&self) -> bool {
        true
    }

    async fn place_call(
        &self,
        call: &OutboundCall,
        idempotency_key: &str,
    ) -> Result<ProviderReceipt, ExecutorError> {
        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", idempotency_key)
            .json(&json!({
                "phone_number": call.to,
                "script": call.script,
                "metadata": { "idempotency_key": idempotency_key },
            }))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ExecutorError::Provider(format!("voice request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ExecutorError::Provider(format!(
                "voice provider returned {status}: {text}"
            )));
        }

        let response: Value = resp
            .json()
            .await
            .map_err(|e| ExecutorError::Provider(format!("invalid voice provider response: {e}")))?;

        let message_id = response
            .get("call_id")
            .or_else(|| response.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| ExecutorError::Provider("voice provider response has no call id".to_string()))?
            .to_string();

        Ok(ProviderReceipt {
            message_id,
            response,
        })
    }
}

/// `None` si la voz no está configurada; el deploy de voz lo reporta como error de config.
pub fn voice_provider_from_config(config: &AppConfig, http: Client) -> Option<Arc<dyn VoiceProvider>> {
    match (&config.voice_api_url, &config.voice_api_key) {
        (Some(url), Some(key)) => Some(Arc::new(HttpVoiceProvider::new(http, url, key))),
        _ => {
            log::warn!("(voice_provider_from_config) VOICE_API_URL/VOICE_API_KEY no definidos: voz deshabilitada");
            None
        }
    }
}
