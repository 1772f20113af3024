//! tests/mod.rs
//! Tests de integración sobre SQLite en memoria con proveedores falsos.

mod support;

mod deploy_tests;
mod execution_tests;
mod handler_tests;
