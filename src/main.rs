mod config;
mod db;
mod dtos;
mod error;
mod handler;
mod middleware;
mod models;
mod routes;
mod service;
mod utils;

use std::sync::Arc;

use anyhow::Context;
use axum::http::{header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE}, HeaderValue, Method};
use config::Config;
use crate::db::db::DBClient;
use dotenv::dotenv;
use routes::create_router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::filter::LevelFilter;

use service::{
    amendment_service::{AmendmentContext, AmendmentService, AmendmentWindows},
    audit_service::AuditService,
    commission_service::CommissionPolicy,
    contract_service::ContractService,
    dispute_service::DisputeService,
    event_bus::EventBus,
    notification_service::NotificationService,
    payment_provider::{self, PaymentGateway},
};

#[derive(Debug, Clone)]
pub struct AppState {
    pub env: Config,
    pub db_client: Arc<DBClient>,
    pub event_bus: Arc<EventBus>,
    // Services
    pub contract_service: Arc<ContractService>,
    pub amendment_service: Arc<AmendmentService>,
    pub dispute_service: Arc<DisputeService>,
    pub notification_service: Arc<NotificationService>,
    pub audit_service: Arc<AuditService>,
}

impl AppState {
    pub fn new(db_client: DBClient, config: Config, payment_gateway: Arc<dyn PaymentGateway>) -> Self {
        let db_client_arc = Arc::new(db_client);
        let event_bus = Arc::new(EventBus::new());

        let notification_service = Arc::new(NotificationService::new(db_client_arc.clone(), event_bus.clone()));
        let audit_service = Arc::new(AuditService::new(db_client_arc.clone()));
        let policy = CommissionPolicy::from_config(&config);

        let contract_service = Arc::new(ContractService::new(
            db_client_arc.clone(),
            policy.clone(),
            notification_service.clone(),
            audit_service.clone(),
        ));

        let amendment_service = Arc::new(AmendmentService::new(
            AmendmentContext {
                db_client: db_client_arc.clone(),
                policy,
                windows: AmendmentWindows::from_config(&config),
                notification_service: notification_service.clone(),
                audit_service: audit_service.clone(),
            },
            payment_gateway,
        ));

        let dispute_service = Arc::new(DisputeService::new(
            db_client_arc.clone(),
            notification_service.clone(),
            audit_service.clone(),
        ));

        Self {
            env: config,
            db_client: db_client_arc,
            event_bus,
            contract_service,
            amendment_service,
            dispute_service,
            notification_service,
            audit_service,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::init()?;

    let level = config.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::DEBUG);
    tracing_subscriber::fmt().with_max_level(level).init();

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the database")?;
    tracing::info!("Connection to the database is successful");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    let db_client = match config.redis_url {
        Some(ref redis_url) => DBClient::with_redis(pool, redis_url).await,
        None => {
            tracing::info!("Redis not configured, running without cache (set REDIS_URL to enable)");
            DBClient::new(pool)
        }
    };

    let payment_gateway = payment_provider::from_config(&config)?;
    tracing::info!("Payment provider: {}", payment_gateway.name());

    let allowed_origins = config
        .allowed_origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("invalid CORS origin {}", origin))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::PATCH]);

    let app_state = Arc::new(AppState::new(db_client, config.clone(), payment_gateway));

    let app = create_router(app_state.clone()).layer(cors);

    tracing::info!("Cache status: {}", app_state.db_client.cache_status());

    // Start background jobs
    let app_state_clone = app_state.clone();
    tokio::spawn(async move {
        service::background_jobs::start_escalation_sweep_job(app_state_clone).await;
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", &config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!("Server is running on http://localhost:{}", config.port);

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
