//! services/mod.rs
//! Capas de negocio: estado durable (unidades, outbox, auditoría, guardrails),
//! adaptadores de proveedores y los pipelines de ejecución y deploy.

pub mod ads_client;
pub mod ads_dispatcher;
pub mod audit_service;
pub mod contact_service;
pub mod deploy_service;
pub mod email_provider;
pub mod execution_service;
pub mod executor_service;
pub mod guardrail_service;
pub mod idempotency;
pub mod outbox_service;
pub mod personalization;
pub mod reconcile_service;
pub mod verifier;
pub mod voice_provider;
