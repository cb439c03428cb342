use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use campusmate::auth::mailer::build_mailer;
use campusmate::auth::service::{bootstrap_admin, AdminBootstrap};
use campusmate::auth::verification::spawn_sweeper;
use campusmate::config::{Cli, Config};
use campusmate::db;
use campusmate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Initialize database
    let pool = db::create_pool(config.db_path())?;
    db::run_migrations(&pool)?;

    if config.admin.credentials().is_some() {
        match bootstrap_admin(&pool, &config) {
            Ok(AdminBootstrap::Created(user)) => {
                tracing::info!("Bootstrap admin created: {}", user.email)
            }
            Ok(AdminBootstrap::AlreadyExists) => tracing::debug!("Bootstrap admin already present"),
            Err(e) => tracing::warn!("Could not bootstrap admin: {}", e),
        }
    }

    let mailer = build_mailer(&config.mail);
    let sweep_every = Duration::from_secs(config.auth.sweep_interval_secs.max(1));
    let state = AppState::new(pool.clone(), config.clone(), mailer);

    // Expired verification tokens
    let _sweeper = spawn_sweeper(pool, sweep_every);

    let app = campusmate::build_app(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
