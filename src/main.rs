use std::sync::Arc;

use tracing::{error, info, warn};

use safisha_api::config::{AppConfig, MpesaConfig};
use safisha_api::database::connection::{ensure_indexes, get_db_client};
use safisha_api::errors::Result;
use safisha_api::repository::mongo::{
    MongoBookingStore, MongoCleanerProfileStore, MongoTransactionStore,
};
use safisha_api::services::mpesa::MpesaGateway;
use safisha_api::services::notify::MongoNotifier;
use safisha_api::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt().init();

    let config = AppConfig::from_env()?;

    let db = get_db_client(&config.database_url).await?;
    ensure_indexes(&db).await?;

    if config.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET not set; settlement callbacks will be refused");
    }

    let mut app_state = AppState::new(
        Arc::new(MongoBookingStore::new(&db)),
        Arc::new(MongoTransactionStore::new(&db)),
        Arc::new(MongoCleanerProfileStore::new(&db)),
        Arc::new(MongoNotifier::new(&db)),
        config.webhook_secret.clone(),
        config.jwt_secret.clone(),
    );

    // The API stays up without gateway credentials; payment initiation
    // answers 503 until they are provided.
    match MpesaConfig::from_env() {
        Ok(mpesa_config) => {
            let gateway = MpesaGateway::new(mpesa_config)?;
            match gateway.get_access_token().await {
                Ok(_) => {
                    info!("M-Pesa gateway connected");
                    app_state = app_state.with_gateway(Arc::new(gateway));
                }
                Err(e) => {
                    error!("M-Pesa auth check failed, payments disabled: {}", e);
                }
            }
        }
        Err(e) => {
            warn!("M-Pesa not configured, payments disabled: {}", e);
        }
    }

    let app = safisha_api::build_router(app_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        safisha_api::errors::AppError::configuration(format!("bind {}: {}", addr, e))
    })?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| safisha_api::errors::AppError::service(e.to_string()))?;

    Ok(())
}
