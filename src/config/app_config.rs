//! config/app_config.rs
//! Configuración del servicio, leída de variables de entorno (.env incluido).

use std::env;

use anyhow::{anyhow, Context, Result};

use crate::models::ads_model::AdsCredentials;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmailProviderKind {
    Http,
    Smtp,
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_host: String,
    pub bind_port: u16,
    pub http_workers: usize,
    pub internal_shared_secret: String,

    pub ads_api_base_url: String,
    pub ads_oauth_token_url: String,
    pub ads_credentials: Option<AdsCredentials>,

    pub email_provider: EmailProviderKind,
    pub email_api_url: Option<String>,
    pub email_api_key: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub email_from: String,

    pub voice_api_url: Option<String>,
    pub voice_api_key: Option<String>,

    pub deploy_concurrency: usize,
    pub recovery_interval_secs: u64,
    pub recovery_stale_after_secs: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./data/executor.db".to_string());

        let internal_shared_secret = env::var("INTERNAL_SHARED_SECRET")
            .map_err(|_| anyhow!("No se definió INTERNAL_SHARED_SECRET"))?;
        if internal_shared_secret.trim().is_empty() {
            return Err(anyhow!("INTERNAL_SHARED_SECRET no puede estar vacío"));
        }

        let email_provider = match optional("EMAIL_PROVIDER").as_deref() {
            None | Some("http") => EmailProviderKind::Http,
            Some("smtp") => EmailProviderKind::Smtp,
            Some(other) => return Err(anyhow!("EMAIL_PROVIDER no soportado: {other}")),
        };

        let config = AppConfig {
            database_url,
            bind_host: env::var("BIND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            bind_port: parse_or("BIND_PORT", 5022)?,
            http_workers: parse_or("HTTP_WORKERS", 2)?,
            internal_shared_secret,
            ads_api_base_url: env::var("ADS_API_BASE_URL")
                .unwrap_or_else(|_| "https://googleads.googleapis.com/v17".to_string()),
            ads_oauth_token_url: env::var("ADS_OAUTH_TOKEN_URL")
                .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".to_string()),
            ads_credentials: ads_credentials_from_env(),
            email_provider,
            email_api_url: optional("EMAIL_API_URL"),
            email_api_key: optional("EMAIL_API_KEY"),
            smtp_host: optional("SMTP_HOST"),
            smtp_port: parse_or("SMTP_PORT", 587)?,
            smtp_user: optional("SMTP_USER"),
            smtp_pass: optional("SMTP_PASS"),
            email_from: env::var("EMAIL_FROM").unwrap_or_else(|_| "no-reply@localhost".to_string()),
            voice_api_url: optional("VOICE_API_URL"),
            voice_api_key: optional("VOICE_API_KEY"),
            deploy_concurrency: parse_or("DEPLOY_CONCURRENCY", 4)?,
            recovery_interval_secs: parse_or("RECOVERY_INTERVAL_SECS", 300)?,
            recovery_stale_after_secs: parse_or("RECOVERY_STALE_AFTER_SECS", 600)?,
        };

        if config.deploy_concurrency == 0 {
            return Err(anyhow!("DEPLOY_CONCURRENCY debe ser >= 1"));
        }

        Ok(config)
    }

    /// Config mínima para tests: sin proveedores reales.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            bind_host: "127.0.0.1".to_string(),
            bind_port: 0,
            http_workers: 1,
            internal_shared_secret: "test-secret".to_string(),
            ads_api_base_url: "http://127.0.0.1:9".to_string(),
            ads_oauth_token_url: "http://127.0.0.1:9/token".to_string(),
            ads_credentials: None,
            email_provider: EmailProviderKind::Http,
            email_api_url: None,
            email_api_key: None,
            smtp_host: None,
            smtp_port: 587,
            smtp_user: None,
            smtp_pass: None,
            email_from: "no-reply@localhost".to_string(),
            voice_api_url: None,
            voice_api_key: None,
            deploy_concurrency: 4,
            recovery_interval_secs: 0,
            recovery_stale_after_secs: 600,
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Valor inválido para {key}: '{raw}'")),
        None => Ok(default),
    }
}

fn ads_credentials_from_env() -> Option<AdsCredentials> {
    Some(AdsCredentials {
        developer_token: optional("ADS_DEVELOPER_TOKEN")?,
        client_id: optional("ADS_CLIENT_ID")?,
        client_secret: optional("ADS_CLIENT_SECRET")?,
        refresh_token: optional("ADS_REFRESH_TOKEN")?,
        login_customer_id: optional("ADS_LOGIN_CUSTOMER_ID"),
    })
}
