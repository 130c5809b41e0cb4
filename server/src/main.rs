use std::sync::Arc;
use tokio::net::TcpListener;

use collab_server::auth::jwt::{self, JwtAuthenticator};
use collab_server::config::{generate_config_template, Config};
use collab_server::db::{self, store::SqliteStore};
use collab_server::routes;
use collab_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("collab_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter())
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter())
            .init();
    }

    tracing::info!("Collaboration server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;
    let store = Arc::new(SqliteStore::new(db));

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = jwt::load_or_generate_jwt_secret(&config.data_dir)?;
    let authenticator = Arc::new(JwtAuthenticator::with_ttls(
        jwt_secret,
        chrono::Duration::minutes(config.access_token_ttl_mins),
        chrono::Duration::days(config.refresh_token_ttl_days),
    ));

    let app_state = AppState::new(
        authenticator,
        store.clone(),
        store,
        config.session_settings(),
    );

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
