use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer};
use dotenv::dotenv;

use crate::app::AppServices;
use crate::config::app_config::AppConfig;
use crate::logger::init_logger;
use crate::services::ads_client::GoogleAdsConnector;
use crate::services::email_provider::email_provider_from_config;
use crate::services::reconcile_service::ReconcileService;
use crate::services::voice_provider::voice_provider_from_config;

mod app;
mod config;
mod database;
mod errors;
mod handlers;
mod logger;
mod models;
mod services;

#[cfg(test)]
mod tests;

/// Barrido periódico del outbox. Con intervalo 0 no se lanza.
fn spawn_reconcile_loop(reconcile: ReconcileService, interval_secs: u64) {
    if interval_secs == 0 {
        log::info!("Reconciliación periódica deshabilitada");
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = reconcile.run_once().await {
                log::error!("Error en reconciliación del outbox: {}", e);
            }
        }
    });
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        log::error!("Configuración inválida: {:#}", e);
        std::process::exit(1);
    });

    // Conectarnos a la DB y aplicar el esquema
    let db_pool = database::setup_database(&config.database_url)
        .await
        .unwrap_or_else(|e| {
            log::error!("{:#}", e);
            std::process::exit(1);
        });
    if let Err(e) = database::run_migrations(&db_pool).await {
        log::error!("{:#}", e);
        std::process::exit(1);
    }

    let http = reqwest::Client::new();
    let email = email_provider_from_config(&config, http.clone()).unwrap_or_else(|e| {
        log::error!("Proveedor de email: {:#}", e);
        std::process::exit(1);
    });
    let voice = voice_provider_from_config(&config, http.clone());
    let ads = Arc::new(GoogleAdsConnector {
        http,
        base_url: config.ads_api_base_url.clone(),
        token_url: config.ads_oauth_token_url.clone(),
        credentials: config.ads_credentials.clone(),
    });
    if config.ads_credentials.is_none() {
        log::warn!("Credenciales de Ads no definidas: /internal/ads/execute fallará");
    }

    let services = AppServices::new(config.clone(), db_pool, ads, email, voice);
    spawn_reconcile_loop(services.reconcile.clone(), config.recovery_interval_secs);

    // Levantar servidor
    log::info!(
        "Levantando servidor en {}:{}",
        config.bind_host,
        config.bind_port
    );
    HttpServer::new(move || {
        let services = services.clone();
        App::new()
            .configure(move |cfg| services.register(cfg))
            .configure(app::init_app)
    })
    .workers(config.http_workers)
    .bind((config.bind_host.as_str(), config.bind_port))?
    .run()
    .await
}
