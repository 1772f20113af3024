//! tests/support.rs
//! Base en memoria, fakes de proveedores y helpers comunes a los tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::{Pool, Sqlite};

use crate::app::AppServices;
use crate::config::app_config::AppConfig;
use crate::database::{now_rfc3339, run_migrations, setup_database};
use crate::errors::ExecutorError;
use crate::models::ads_model::MutateOperation;
use crate::models::execution_model::{CreateUnitRequest, ExecuteRequest, ExecutionUnit};
use crate::services::ads_client::{AdsApi, AdsConnector};
use crate::services::email_provider::{EmailProvider, OutboundEmail, ProviderReceipt};
use crate::services::voice_provider::{OutboundCall, VoiceProvider};

pub const WORKSPACE: &str = "ws-1";
pub const TENANT: &str = "tenant-1";
pub const ACCOUNT: &str = "123-456-7890";
pub const CUSTOMER: &str = "1234567890";

pub async fn test_pool() -> Pool<Sqlite> {
    let pool = setup_database("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

// ============================================================================
// Ads
// ============================================================================

/// API de Ads en memoria: recursos por resource name, en la forma JSON de REST.
#[derive(Default)]
pub struct FakeAdsApi {
    resources: Mutex<HashMap<String, (String, Value)>>,
    pub search_calls: AtomicUsize,
    pub mutate_calls: AtomicUsize,
    /// Acepta los mutates sin aplicarlos (proveedor que "miente").
    pub ignore_mutations: AtomicBool,
}

impl FakeAdsApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_ad_group(&self, ad_group_id: &str, status: &str) {
        let rn = format!("customers/{CUSTOMER}/adGroups/{ad_group_id}");
        self.put("adGroup", &rn, json!({ "resourceName": rn, "status": status }));
    }

    pub fn with_keyword(&self, ad_group_id: &str, criterion_id: &str, cpc_bid_micros: i64) {
        let rn = format!("customers/{CUSTOMER}/adGroupCriteria/{ad_group_id}~{criterion_id}");
        self.put(
            "adGroupCriterion",
            &rn,
            json!({ "resourceName": rn, "cpcBidMicros": cpc_bid_micros.to_string() }),
        );
    }

    pub fn with_budget(&self, budget_id: &str, amount_micros: i64) {
        let rn = format!("customers/{CUSTOMER}/campaignBudgets/{budget_id}");
        self.put(
            "campaignBudget",
            &rn,
            json!({ "resourceName": rn, "amountMicros": amount_micros.to_string() }),
        );
    }

    pub fn field(&self, resource_name: &str, field: &str) -> Option<Value> {
        let resources = self.resources.lock().unwrap();
        resources
            .get(resource_name)
            .and_then(|(_, v)| v.get(field).cloned())
    }

    pub fn mutates(&self) -> usize {
        self.mutate_calls.load(Ordering::SeqCst)
    }

    fn put(&self, entity: &str, resource_name: &str, value: Value) {
        self.resources
            .lock()
            .unwrap()
            .insert(resource_name.to_string(), (entity.to_string(), value));
    }
}

#[async_trait]
impl AdsApi for FakeAdsApi {
    async fn search(&self, _customer_id: &str, query: &str) -> Result<Vec<Value>, ExecutorError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let resource_name = query.split('\'').nth(1).unwrap_or_default();
        let resources = self.resources.lock().unwrap();
        Ok(resources
            .get(resource_name)
            .map(|(entity, value)| {
                let mut row = serde_json::Map::new();
                row.insert(entity.clone(), value.clone());
                vec![Value::Object(row)]
            })
            .unwrap_or_default())
    }

    async fn mutate(
        &self,
        _customer_id: &str,
        _service: &str,
        operations: Vec<MutateOperation>,
    ) -> Result<Vec<String>, ExecutorError> {
        self.mutate_calls.fetch_add(1, Ordering::SeqCst);
        let mut resources = self.resources.lock().unwrap();
        let mut names = Vec::new();
        for op in operations {
            let rn = op.update["resourceName"].as_str().unwrap_or_default().to_string();
            let (_, current) = resources
                .get_mut(&rn)
                .ok_or_else(|| ExecutorError::NotFound(rn.clone()))?;
            if !self.ignore_mutations.load(Ordering::SeqCst) {
                if let (Some(target), Some(update)) = (current.as_object_mut(), op.update.as_object()) {
                    for (k, v) in update {
                        target.insert(k.clone(), v.clone());
                    }
                }
            }
            names.push(rn);
        }
        Ok(names)
    }
}

pub struct FakeConnector {
    pub api: Arc<FakeAdsApi>,
}

#[async_trait]
impl AdsConnector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn AdsApi>, ExecutorError> {
        Ok(self.api.clone())
    }
}

// ============================================================================
// Email / voz
// ============================================================================

pub struct FakeEmailProvider {
    pub sent: Mutex<Vec<(OutboundEmail, String)>>,
    pub honours_key: bool,
    pub fail_for: Option<String>,
}

impl FakeEmailProvider {
    pub fn new(honours_key: bool) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            honours_key,
            fail_for: None,
        })
    }

    pub fn failing_for(recipient: &str) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            honours_key: true,
            fail_for: Some(recipient.to_string()),
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailProvider for FakeEmailProvider {
    fn name(&self) -> &'static str {
        "fake_email"
    }

    fn honours_idempotency_key(&self) -> bool {
        self.honours_key
    }

    async fn send(
        &self,
        email: &OutboundEmail,
        idempotency_key: &str,
    ) -> Result<ProviderReceipt, ExecutorError> {
        // Cede el turno para que los envíos concurrentes se intercalen.
        tokio::task::yield_now().await;
        if self.fail_for.as_deref() == Some(email.to.as_str()) {
            return Err(ExecutorError::Provider("mailbox unavailable".to_string()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((email.clone(), idempotency_key.to_string()));
        let message_id = format!("msg-{}", sent.len());
        Ok(ProviderReceipt {
            response: json!({ "id": message_id }),
            message_id,
        })
    }
}

#[derive(Default)]
pub struct FakeVoiceProvider {
    pub calls: Mutex<Vec<(OutboundCall, String)>>,
}

#[async_trait]
impl VoiceProvider for FakeVoiceProvider {
    fn name(&self) -> &'static str {
        "fake_voice"
    }

    fn honours_idempotency_key(&self) -> bool {
        true
    }

    async fn place_call(
        &self,
        call: &OutboundCall,
        idempotency_key: &str,
    ) -> Result<ProviderReceipt, ExecutorError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((call.clone(), idempotency_key.to_string()));
        let message_id = format!("call-{}", calls.len());
        Ok(ProviderReceipt {
            response: json!({ "call_id": message_id }),
            message_id,
        })
    }
}

// ============================================================================
// Ensamblado
// ============================================================================

pub struct Harness {
    pub pool: Pool<Sqlite>,
    pub services: AppServices,
    pub ads: Arc<FakeAdsApi>,
    pub email: Arc<FakeEmailProvider>,
    pub voice: Arc<FakeVoiceProvider>,
}

pub async fn harness() -> Harness {
    harness_with_email(FakeEmailProvider::new(true)).await
}

pub async fn harness_with_email(email: Arc<FakeEmailProvider>) -> Harness {
    let pool = test_pool().await;
    let ads = FakeAdsApi::new();
    let voice = Arc::new(FakeVoiceProvider::default());
    let services = AppServices::new(
        AppConfig::for_tests(),
        pool.clone(),
        Arc::new(FakeConnector { api: ads.clone() }),
        email.clone(),
        Some(voice.clone()),
    );
    Harness {
        pool,
        services,
        ads,
        email,
        voice,
    }
}

impl Harness {
    /// created -> queued_for_approval -> approved
    pub async fn approved_unit(&self, payload: Value) -> ExecutionUnit {
        let units = &self.services.units;
        let unit = units
            .create_unit(CreateUnitRequest {
                workspace_id: WORKSPACE.to_string(),
                owner_id: TENANT.to_string(),
                ad_account_id: ACCOUNT.to_string(),
                payload,
                actor_type: None,
                actor_id: None,
            })
            .await
            .unwrap();
        units.submit_for_approval(&unit.id).await.unwrap();
        units
            .approve(&unit.id, crate::models::audit_model::ActorType::Human, Some("reviewer-1"))
            .await
            .unwrap()
    }

    /// Unidad aprobada fuera del flujo de revisión (p. ej. importada ya
    /// aprobada): no pasa por `submit_for_approval`.
    pub async fn seeded_approved_unit(&self, payload: Value) -> ExecutionUnit {
        let units = &self.services.units;
        let unit = units
            .create_unit(CreateUnitRequest {
                workspace_id: WORKSPACE.to_string(),
                owner_id: TENANT.to_string(),
                ad_account_id: ACCOUNT.to_string(),
                payload: payload.clone(),
                actor_type: None,
                actor_id: None,
            })
            .await
            .unwrap();
        sqlx::query(
            "UPDATE execution_units SET status = 'approved', approved_payload = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(&unit.id)
        .bind(payload.to_string())
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await
        .unwrap();
        units.get_unit(&unit.id).await.unwrap()
    }

    pub async fn event_types(&self, unit_id: &str) -> Vec<&'static str> {
        self.services
            .audit
            .list_for_unit(unit_id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.event_type.as_str())
            .collect()
    }

    pub async fn seed_contact(
        &self,
        email: &str,
        first_name: Option<&str>,
        company: Option<&str>,
        lifecycle_status: &str,
        segment: Option<&str>,
    ) {
        sqlx::query(
            r#"
            INSERT INTO contacts (
                id, tenant_id, workspace_id, email, phone, first_name, last_name,
                company, lifecycle_status, segment, created_at
            )
            VALUES (?1, ?2, ?3, ?4, NULL, ?5, NULL, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(TENANT)
        .bind(WORKSPACE)
        .bind(email)
        .bind(first_name)
        .bind(company)
        .bind(lifecycle_status)
        .bind(segment)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await
        .unwrap();
    }
}

pub fn execute_request(unit: &ExecutionUnit, payload: Value) -> ExecuteRequest {
    ExecuteRequest {
        proposal_id: unit.id.clone(),
        workspace_id: unit.workspace_id.clone(),
        ad_account_id: unit.ad_account_id.clone(),
        approved_payload: payload,
        run_id: Some("run-1".to_string()),
        actor_type: None,
        actor_id: None,
    }
}

pub fn reduce_bid_payload() -> Value {
    json!({
        "kind": "reduce_keyword_bid",
        "adGroupId": "111",
        "criterionId": "222",
        "afterCpcBidMicros": 950_000,
        "beforeCpcBidMicros": 1_000_000
    })
}

pub fn pause_payload() -> Value {
    json!({ "kind": "pause_ad_group", "adGroupId": "111" })
}
