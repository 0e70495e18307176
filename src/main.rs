use std::net::SocketAddr;

use tokio::net::TcpListener;

use osmium::config::{generate_config_template, Config};
use osmium::routes::build_router;
use osmium::state::AppState;

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
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "osmium=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "osmium=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("osmium v{} starting", env!("CARGO_PKG_VERSION"));

    // Misconfigurations that would silently break every issued link are
    // fatal at boot, not at request time.
    if config.domain.is_empty() {
        return Err("domain must be set (retrieval URLs cannot be built without it)".into());
    }
    if config.encryption.nonce.is_empty() {
        return Err("encryption.nonce must be set (keys cannot be derived without it)".into());
    }
    let storage_dir = std::path::Path::new(&config.storage.directory);
    if !storage_dir.is_dir() {
        return Err(format!(
            "storage directory {:?} does not exist or is not a directory",
            config.storage.directory
        )
        .into());
    }

    if config.security.master_key.is_empty() {
        tracing::warn!("security.master_key is empty: anyone can upload to this server");
    }

    let app_state = AppState::new(config.clone());
    let app = build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
