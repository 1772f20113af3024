//! services/ads_client.rs
//! Cliente REST de la API de Ads. Se construye por request a partir de
//! credenciales inyectadas; no hay cliente global.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::ExecutorError;
use crate::models::ads_model::{AdsCredentials, MutateOperation};

/// Lectura (GAQL) y mutate sobre la API de Ads.
#[async_trait]
pub trait AdsApi: Send + Sync {
    async fn search(&self, customer_id: &str, query: &str) -> Result<Vec<Value>, ExecutorError>;

    /// `service` es el segmento REST: "adGroups", "adGroupCriteria", "campaignBudgets".
    /// Siempre con partialFailure=false y validateOnly=false.
    async fn mutate(
        &self,
        customer_id: &str,
        service: &str,
        operations: Vec<MutateOperation>,
    ) -> Result<Vec<String>, ExecutorError>;
}

/// Abre un `AdsApi` para un request concreto.
#[async_trait]
pub trait AdsConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn AdsApi>, ExecutorError>;
}

pub struct GoogleAdsClient {
    http: Client,
    base_url: String,
    developer_token: String,
    login_customer_id: Option<String>,
    access_token: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Value>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MutateResponse {
    #[serde(default)]
    results: Vec<MutateResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MutateResult {
    resource_name: String,
}

impl GoogleAdsClient {
    /// Intercambia el refresh token por un access token y arma el cliente.
    pub async fn connect(
        http: Client,
        base_url: &str,
        token_url: &str,
        credentials: &AdsCredentials,
    ) -> Result<Self, ExecutorError> {
        let resp = http
            .post(token_url)
            .form(&[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("refresh_token", credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| ExecutorError::Provider(format!("oauth token request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ExecutorError::Provider(format!(
                "oauth token request returned {status}: {body}"
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ExecutorError::Provider(format!("invalid oauth token response: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            developer_token: credentials.developer_token.clone(),
            login_customer_id: credentials.login_customer_id.clone(),
            access_token: token.access_token,
        })
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .header("developer-token", &self.developer_token);
        if let Some(login) = &self.login_customer_id {
            builder = builder.header("login-customer-id", normalize_customer_id(login));
        }
        builder
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ExecutorError> {
        let resp = self
            .request(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ExecutorError::Provider(format!("ads request failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExecutorError::NotFound(format!("ads resource: {body}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExecutorError::Provider(format!(
                "ads api returned {status}: {body}"
            )));
        }

        resp.json()
            .await
            .map_err(|e| ExecutorError::Provider(format!("invalid ads api response: {e}")))
    }
}

#[async_trait]
impl AdsApi for GoogleAdsClient {
    async fn search(&self, customer_id: &str, query: &str) -> Result<Vec<Value>, ExecutorError> {
        let url = format!(
            "{}/customers/{}/googleAds:search",
            self.base_url,
            normalize_customer_id(customer_id)
        );
        let mut results = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut body = json!({ "query": query });
            if let Some(token) = &page_token {
                body["pageToken"] = json!(token);
            }
            let raw = self.post_json(&url, &body).await?;
            let page: SearchResponse = serde_json::from_value(raw)
                .map_err(|e| ExecutorError::Provider(format!("invalid search response: {e}")))?;
            results.extend(page.results);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(results)
    }

    async fn mutate(
        &self,
        customer_id: &str,
        service: &str,
        operations: Vec<MutateOperation>,
    ) -> Result<Vec<String>, ExecutorError> {
        let url = format!(
            "{}/customers/{}/{}:mutate",
            self.base_url,
            normalize_customer_id(customer_id),
            service
        );
        let body = json!({
            "operations": operations,
            "partialFailure": false,
            "validateOnly": false,
        });
        let raw = self.post_json(&url, &body).await?;
        let parsed: MutateResponse = serde_json::from_value(raw)
            .map_err(|e| ExecutorError::Provider(format!("invalid mutate response: {e}")))?;
        Ok(parsed.results.into_iter().map(|r| r.resource_name).collect())
    }
}

/// Conector que usa las credenciales de la configuración del servicio.
pub struct GoogleAdsConnector {
    pub http: Client,
    pub base_url: String,
    pub token_url: String,
    pub credentials: Option<AdsCredentials>,
}

#[async_trait]
impl AdsConnector for GoogleAdsConnector {
    async fn connect(&self) -> Result<Arc<dyn AdsApi>, ExecutorError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| ExecutorError::Config("ads credentials are not configured".to_string()))?;
        let client =
            GoogleAdsClient::connect(self.http.clone(), &self.base_url, &self.token_url, credentials)
                .await?;
        Ok(Arc::new(client))
    }
}

/// "123-456-7890" -> "1234567890"
pub fn normalize_customer_id(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}
