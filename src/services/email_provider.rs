//! services/email_provider.rs
//! Proveedores de email transaccional. El `idempotency_key` del outbox viaja
//! siempre al proveedor: por header en la API HTTP, como Message-ID por SMTP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::app_config::{AppConfig, EmailProviderKind};
use crate::errors::ExecutorError;

/// Un email ya personalizado, listo para un único destinatario.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

impl OutboundEmail {
    pub fn to_json(&self) -> Value {
        json!({ "to": self.to, "subject": self.subject, "html": self.html_body })
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        Some(OutboundEmail {
            to: value.get("to")?.as_str()?.to_string(),
            subject: value.get("subject")?.as_str()?.to_string(),
            html_body: value.get("html")?.as_str()?.to_string(),
        })
    }
}

/// Confirmación del proveedor: el id es la prueba de envío.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReceipt {
    pub message_id: String,
    pub response: Value,
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// true si el proveedor deduplica por clave: reenviar con la misma clave
    /// no produce un segundo email.
    fn honours_idempotency_key(&self) -> bool;

    async fn send(
        &self,
        email: &OutboundEmail,
        idempotency_key: &str,
    ) -> Result<ProviderReceipt, ExecutorError>;
}

// ============================================================================
// API HTTP
// ============================================================================

pub struct HttpEmailProvider {
    http: Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpEmailProvider {
    pub fn new(http: Client, api_url: &str, api_key: &str, from: &str) -> Self {
        Self {
            http,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        }
    }
}

#[async_trait]
impl EmailProvider for HttpEmailProvider {
    fn name(&self) -> &'static str {
        "http_email"
    }

    fn honours_idempotency_key(&self) -> bool {
        true
    }

    async fn send(
        &self,
        email: &OutboundEmail,
        idempotency_key: &str,
    ) -> Result<ProviderReceipt, ExecutorError> {
        let body = json!({
            "from": self.from,
            "to": [email.to],
            "subject": email.subject,
            "html": email.html_body,
        });

        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", idempotency_key)
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ExecutorError::Provider(format!("email request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ExecutorError::Provider(format!(
                "email provider returned {status}: {text}"
            )));
        }

        let response: Value = resp
            .json()
            .await
            .map_err(|e| ExecutorError::Provider(format!("invalid email provider response: {e}")))?;

        // Sin id no hay prueba de envío.
        let message_id = response
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ExecutorError::Provider("email provider response has no id".to_string()))?
            .to_string();

        Ok(ProviderReceipt {
            message_id,
            response,
        })
    }
}

// ============================================================================
// SMTP
// ============================================================================

pub struct SmtpEmailProvider {
    host: String,
    port: u16,
    user: Option<String>,
    pass: Option<String>,
    from: String,
}

impl SmtpEmailProvider {
    pub fn new(host: &str, port: u16, user: Option<String>, pass: Option<String>, from: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            user,
            pass,
            from: from.to_string(),
        }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let tls_params = TlsParameters::new(self.host.clone())?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)?
            .port(self.port)
            .tls(Tls::Required(tls_params));
        if let (Some(user), Some(pass)) = (&self.user, &self.pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(builder.build())
    }

    fn build_message(&self, email: &OutboundEmail, message_id: &str) -> Result<Message> {
        let from: Mailbox = self.from.parse().context("Invalid from address")?;
        let to: Mailbox = email.to.parse().context("Invalid recipient address")?;
        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .message_id(Some(message_id.to_string()))
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone())?;
        Ok(message)
    }
}

#[async_trait]
impl EmailProvider for SmtpEmailProvider {
    fn name(&self) -> &'static str {
        "smtp"
    }

    // El Message-ID deja deduplicar aguas abajo, pero el relay puede entregar dos veces.
    fn honours_idempotency_key(&self) -> bool {
        false
    }

    async fn send(
        &self,
        email: &OutboundEmail,
        idempotency_key: &str,
    ) -> Result<ProviderReceipt, ExecutorError> {
        let message_id = smtp_message_id(idempotency_key, &self.from);
        let message = self
            .build_message(email, &message_id)
            .map_err(|e| ExecutorError::Validation(format!("{e:#}")))?;
        let mailer = self
            .transport()
            .map_err(|e| ExecutorError::Config(format!("smtp transport: {e:#}")))?;

        let response = tokio::time::timeout(Duration::from_secs(30), mailer.send(message))
            .await
            .map_err(|_| ExecutorError::Provider("smtp send timed out".to_string()))?
            .map_err(|e| ExecutorError::Provider(format!("smtp send failed: {e}")))?;

        Ok(ProviderReceipt {
            message_id,
            response: json!({
                "code": response.code().to_string(),
                "message": response.message().collect::<Vec<_>>(),
            }),
        })
    }
}

/// `<clave@dominio-del-remitente>`
fn smtp_message_id(idempotency_key: &str, from: &str) -> String {
    let domain = from
        .rsplit_once('@')
        .map(|(_, d)| d.trim_end_matches('>'))
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    format!("<{idempotency_key}@{domain}>")
}

/// Elige el proveedor según `EMAIL_PROVIDER`. Falta de datos requeridos es
/// un error de arranque.
pub fn email_provider_from_config(config: &AppConfig, http: Client) -> Result<Arc<dyn EmailProvider>> {
    match config.email_provider {
        EmailProviderKind::Http => {
            let api_url = config
                .email_api_url
                .as_deref()
                .ok_or_else(|| anyhow!("EMAIL_API_URL es requerido con EMAIL_PROVIDER=http"))?;
            let api_key = config
                .email_api_key
                .as_deref()
                .ok_or_else(|| anyhow!("EMAIL_API_KEY es requerido con EMAIL_PROVIDER=http"))?;
            Ok(Arc::new(HttpEmailProvider::new(
                http,
                api_url,
                api_key,
                &config.email_from,
            )))
        }
        EmailProviderKind::Smtp => {
            let host = config
                .smtp_host
                .as_deref()
                .ok_or_else(|| anyhow!("SMTP_HOST es requerido con EMAIL_PROVIDER=smtp"))?;
            Ok(Arc::new(SmtpEmailProvider::new(
                host,
                config.smtp_port,
                config.smtp_user.clone(),
                config.smtp_pass.clone(),
                &config.email_from,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_uses_sender_domain() {
        assert_eq!(
            smtp_message_id("abc123", "Ventas <ventas@example.com>"),
            "<abc123@example.com>"
        );
        assert_eq!(smtp_message_id("abc123", "sin-dominio"), "<abc123@localhost>");
    }

    #[test]
    fn outbound_email_survives_outbox_payload() {
        let email = OutboundEmail {
            to: "ana@example.com".to_string(),
            subject: "Hola Ana".to_string(),
            html_body: "<p>Hola</p>".to_string(),
        };
        assert_eq!(OutboundEmail::from_json(&email.to_json()), Some(email));
        assert_eq!(OutboundEmail::from_json(&json!({ "to": "x" })), None);
    }

    #[test]
    fn http_provider_requires_url_and_key() {
        let config = AppConfig::for_tests();
        let err = email_provider_from_config(&config, Client::new()).err();
        assert!(err.is_some());

        let mut config = AppConfig::for_tests();
        config.email_api_url = Some("http://127.0.0.1:9/emails".to_string());
        config.email_api_key = Some("k".to_string());
        let provider = email_provider_from_config(&config, Client::new()).unwrap();
        assert_eq!(provider.name(), "http_email");
        assert!(provider.honours_idempotency_key());
    }
}
