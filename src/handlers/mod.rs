//! handlers/mod.rs
//! Endpoints internos (/internal/...). Todos exigen el secreto compartido.
pub mod deploy_handler;
pub mod execute_handler;
pub mod guardrail_handler;
pub mod internal;
pub mod unit_handler;
