mod server;

use anyhow::Result;
use clap::Parser;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::{error, info, warn};

use streamers_core::{logging, Config};

use server::{Server, Services};

#[derive(Parser, Debug)]
#[command(name = "streamers")]
#[command(about = "Control plane for member live audio streams", long_about = None)]
struct Args {
    /// Config file; environment variables override its values
    #[arg(long, short, env = "STREAMERS_CONFIG_PATH")]
    config: Option<String>,

    /// Run database migrations and exit
    #[arg(long, default_value_t = false)]
    migrate_only: bool,
}

/// Load and validate configuration, failing fast on any problem
fn load_config(path: Option<&str>) -> Result<Config> {
    let config = Config::load(path)?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }
    Ok(config)
}

async fn init_database(config: &Config) -> Result<PgPool> {
    info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_seconds))
        .connect(&config.database.url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            anyhow::anyhow!("Database connection failed: {e}")
        })?;

    info!("Database connected successfully");
    Ok(pool)
}

async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            anyhow::anyhow!("Migration failed: {e}")
        })?;
    info!("Migrations completed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Streamers starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Storage
    let pool = if config.uses_database() {
        let pool = init_database(&config).await?;
        run_migrations(&pool).await?;
        Some(pool)
    } else {
        warn!("No database configured, using in-memory storage; nothing will persist");
        None
    };

    if args.migrate_only {
        if pool.is_none() {
            return Err(anyhow::anyhow!("--migrate-only needs database.url"));
        }
        return Ok(());
    }

    // 4. Services
    let services = Services::build(&config, pool)?;

    // 5. Serve until shutdown
    Server::new(config, args.config, services).run().await
}
