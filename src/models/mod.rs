//! models/mod.rs
//! Módulo raíz para modelos/estructuras compartidas.

pub mod ads_model;
pub mod audit_model;
pub mod deploy_model;
pub mod execution_model;
pub mod guardrail_model;
pub mod outbox_model;
pub mod payload_model;
