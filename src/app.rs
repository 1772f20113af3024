//! app.rs
use std::sync::Arc;

use actix_web::web;
use sqlx::{Pool, Sqlite};

use crate::config::app_config::AppConfig;
use crate::handlers::{deploy_handler, execute_handler, guardrail_handler, unit_handler};
use crate::services::ads_client::AdsConnector;
use crate::services::audit_service::AuditService;
use crate::services::contact_service::ContactService;
use crate::services::deploy_service::DeployService;
use crate::services::email_provider::EmailProvider;
use crate::services::execution_service::ExecutionService;
use crate::services::executor_service::ExecutorService;
use crate::services::guardrail_service::GuardrailService;
use crate::services::outbox_service::OutboxService;
use crate::services::reconcile_service::ReconcileService;
use crate::services::voice_provider::VoiceProvider;

/// Servicios inyectados en cada worker vía `web::Data`.
#[derive(Clone)]
pub struct AppServices {
    pub config: AppConfig,
    pub audit: AuditService,
    pub guardrails: GuardrailService,
    pub outbox: OutboxService,
    pub units: ExecutionService,
    pub executor: ExecutorService,
    pub deploy: DeployService,
    pub reconcile: ReconcileService,
}

impl AppServices {
    pub fn new(
        config: AppConfig,
        db_pool: Pool<Sqlite>,
        ads: Arc<dyn AdsConnector>,
        email: Arc<dyn EmailProvider>,
        voice: Option<Arc<dyn VoiceProvider>>,
    ) -> Self {
        let audit = AuditService::new(db_pool.clone());
        let guardrails = GuardrailService::new(db_pool.clone());
        let outbox = OutboxService::new(db_pool.clone());
        let units = ExecutionService::new(db_pool.clone(), audit.clone(), guardrails.clone());
        let executor = ExecutorService::new(
            units.clone(),
            audit.clone(),
            guardrails.clone(),
            outbox.clone(),
            ads,
        );
        let deploy = DeployService::new(
            outbox.clone(),
            ContactService::new(db_pool),
            email,
            voice,
            config.deploy_concurrency,
        );
        let reconcile = ReconcileService::new(
            outbox.clone(),
            deploy.clone(),
            config.recovery_stale_after_secs,
        );

        AppServices {
            config,
            audit,
            guardrails,
            outbox,
            units,
            executor,
            deploy,
            reconcile,
        }
    }

    pub fn register(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::Data::new(self.config.clone()))
            .app_data(web::Data::new(self.audit.clone()))
            .app_data(web::Data::new(self.guardrails.clone()))
            .app_data(web::Data::new(self.outbox.clone()))
            .app_data(web::Data::new(self.units.clone()))
            .app_data(web::Data::new(self.executor.clone()))
            .app_data(web::Data::new(self.deploy.clone()))
            .app_data(web::Data::new(self.reconcile.clone()));
    }
}

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/internal")
            .service(
                web::scope("/ads")
                    .route("/execute", web::post().to(execute_handler::execute_endpoint)),
            )
            .service(
                web::scope("/units")
                    .route("", web::post().to(unit_handler::create_unit_endpoint))
                    .route("/{id}", web::get().to(unit_handler::get_unit_endpoint))
                    .route(
                        "/{id}/submit",
                        web::post().to(unit_handler::submit_unit_endpoint),
                    )
                    .route(
                        "/{id}/approve",
                        web::post().to(unit_handler::approve_unit_endpoint),
                    )
                    .route(
                        "/{id}/reject",
                        web::post().to(unit_handler::reject_unit_endpoint),
                    )
                    .route(
                        "/{id}/events",
                        web::get().to(unit_handler::unit_events_endpoint),
                    ),
            )
            .service(
                web::scope("/guardrails")
                    .route(
                        "/{workspace_id}/{ad_account_id}",
                        web::get().to(guardrail_handler::get_guardrail_endpoint),
                    )
                    .route(
                        "/{workspace_id}/{ad_account_id}",
                        web::put().to(guardrail_handler::put_guardrail_endpoint),
                    ),
            )
            .service(
                web::scope("/email")
                    .route("/deploy", web::post().to(deploy_handler::deploy_email_endpoint)),
            )
            .service(
                web::scope("/voice")
                    .route("/deploy", web::post().to(deploy_handler::deploy_voice_endpoint)),
            )
            .service(
                web::scope("/outbox")
                    .route(
                        "/reconcile",
                        web::post().to(deploy_handler::reconcile_endpoint),
                    )
                    .route(
                        "/{run_id}",
                        web::get().to(deploy_handler::outbox_by_run_endpoint),
                    ),
            ),
    );
}
