use std::net::TcpListener;
use std::sync::Arc;

use phonegate::configuration::get_configuration;
use phonegate::provider::NacProvider;
use phonegate::session::SessionManager;
use phonegate::startup::run;
use phonegate::store::PostgresStore;
use phonegate::telemetry::init_telemetry;
use phonegate::verification::VerificationCorrelator;

fn startup_error(kind: std::io::ErrorKind, what: &str) -> std::io::Error {
    std::io::Error::new(kind, what.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(startup_error(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    tracing::info!("Attempting to connect to database");
    let store = PostgresStore::connect(&configuration.database)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            startup_error(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;
    store.migrate().await.map_err(|e| {
        tracing::error!("Failed to apply migrations: {}", e);
        startup_error(std::io::ErrorKind::Other, "Database migration error")
    })?;
    tracing::info!("Database ready");

    let provider = NacProvider::new(configuration.provider.clone()).map_err(|e| {
        tracing::error!("Failed to build provider client: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Provider configuration error")
    })?;

    let store = Arc::new(store);
    let correlator = VerificationCorrelator::new(
        store.clone(),
        Arc::new(provider),
        configuration.verification.clone(),
    );
    let session_manager = SessionManager::new(
        store.clone(),
        store,
        configuration.jwt.clone(),
        configuration.refresh.clone(),
    );

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(listener, correlator, session_manager)?.await
}
