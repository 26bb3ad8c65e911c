//! Server lifecycle
//!
//! Wires the storage backends into the services, starts the background
//! workers, serves HTTP and tears everything down on SIGINT/SIGTERM. SIGHUP
//! reloads the `streamers` settings section from the config file.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use streamers_api::{create_router, http::AuthKeys, AppState};
use streamers_core::{
    cache::LiveStatusCache,
    provider::IcecastClient,
    repository::{
        MemoryDirectory, MemoryStreamSettingStore, PgStreamSettingStore, PgUserDirectory,
        StreamSettingStore, UserDirectory,
    },
    service::{
        events::DEFAULT_QUEUE_CAPACITY, EventDispatcher, LiveStatusService, MembershipService,
        SettingsHandle, SourceAuthService, SweepScheduler, UserSettingsService,
    },
    Config, KeyBuilder,
};

/// How long background workers get to finish after the HTTP server stops
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Every long-lived service, built once at startup
#[derive(Clone)]
pub struct Services {
    pub settings: SettingsHandle,
    pub source_auth: SourceAuthService,
    pub user_settings: UserSettingsService,
    pub membership: MembershipService,
    pub live_status: LiveStatusCache,
}

impl Services {
    pub fn build(config: &Config, pool: Option<PgPool>) -> anyhow::Result<Self> {
        let (store, directory): (Arc<dyn StreamSettingStore>, Arc<dyn UserDirectory>) = match pool
        {
            Some(pool) => (
                Arc::new(PgStreamSettingStore::new(pool.clone())),
                Arc::new(PgUserDirectory::new(pool)),
            ),
            None => (
                Arc::new(MemoryStreamSettingStore::new()),
                Arc::new(MemoryDirectory::new()),
            ),
        };

        let provider = Arc::new(IcecastClient::new()?);
        let live_status = LiveStatusCache::new(
            LiveStatusService::new(directory.clone(), store.clone(), provider),
            KeyBuilder::from_config(config),
        );

        Ok(Self {
            settings: SettingsHandle::new(config.streamers.clone()),
            source_auth: SourceAuthService::new(directory.clone(), store.clone()),
            user_settings: UserSettingsService::new(directory.clone(), store.clone()),
            membership: MembershipService::new(directory, store)
                .with_batch_size(config.sweep.batch_size),
            live_status,
        })
    }
}

pub struct Server {
    config: Config,
    config_path: Option<String>,
    services: Services,
}

impl Server {
    #[must_use]
    pub const fn new(config: Config, config_path: Option<String>, services: Services) -> Self {
        Self {
            config,
            config_path,
            services,
        }
    }

    /// Start all components and wait for a shutdown signal
    pub async fn run(self) -> anyhow::Result<()> {
        let shutdown = CancellationToken::new();

        // Membership event worker
        let (events, event_worker) = EventDispatcher::spawn(
            self.services.membership.clone(),
            self.services.settings.clone(),
            DEFAULT_QUEUE_CAPACITY,
            shutdown.clone(),
        );

        // Periodic bulk sweep
        let scheduler = SweepScheduler::new(
            self.services.membership.clone(),
            self.services.settings.clone(),
            Duration::from_secs(self.config.sweep.interval_seconds),
            self.config.sweep.run_on_startup,
        )
        .spawn(shutdown.clone());

        let signals = spawn_signal_handler(
            self.config_path.clone(),
            self.services.clone(),
            events.clone(),
            shutdown.clone(),
        );

        let state = AppState {
            settings: self.services.settings.clone(),
            source_auth: self.services.source_auth.clone(),
            user_settings: self.services.user_settings.clone(),
            live_status: self.services.live_status.clone(),
            events,
            auth: Arc::new(AuthKeys::from_config(&self.config.auth)),
        };
        let router = create_router(state);

        let http_addr: SocketAddr = self.config.http_address().parse().map_err(|e| {
            anyhow::anyhow!("Invalid HTTP address '{}': {e}", self.config.http_address())
        })?;
        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;
        info!("HTTP server listening on {}", http_addr);

        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

        // The server may also stop on its own; make sure the workers follow
        shutdown.cancel();
        info!("HTTP server shut down, stopping background workers...");
        drain(vec![event_worker, scheduler, signals]).await;

        result.map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;
        info!("Streamers stopped");
        Ok(())
    }
}

async fn drain(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        match tokio::time::timeout(WORKER_DRAIN_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Background worker panicked: {}", e),
            Err(_) => warn!("Background worker did not stop within {:?}", WORKER_DRAIN_TIMEOUT),
        }
    }
}

/// Watch for SIGINT/SIGTERM (shutdown) and SIGHUP (settings reload)
fn spawn_signal_handler(
    config_path: Option<String>,
    services: Services,
    events: EventDispatcher,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut hangup =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(signal) => Some(signal),
                Err(e) => {
                    error!("Failed to install SIGHUP handler: {}", e);
                    None
                }
            };

        loop {
            #[cfg(unix)]
            let reload = async {
                match hangup.as_mut() {
                    Some(signal) => {
                        signal.recv().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };
            #[cfg(not(unix))]
            let reload = std::future::pending::<()>();

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = shutdown_signal() => {
                    info!("Shutdown signal received, starting graceful shutdown...");
                    shutdown.cancel();
                    break;
                }
                () = reload => {
                    info!("Received SIGHUP, reloading settings");
                    reload_settings(config_path.as_deref(), &services, &events);
                }
            }
        }
    })
}

/// Swap in the `streamers` section of a freshly loaded config.
///
/// Other sections only take effect on restart.
fn reload_settings(config_path: Option<&str>, services: &Services, events: &EventDispatcher) {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Settings reload failed, keeping current settings: {}", e);
            return;
        }
    };
    if let Err(errors) = config.validate() {
        error!(?errors, "Reloaded config is invalid, keeping current settings");
        return;
    }

    let change = services.settings.replace(config.streamers);
    if change.is_empty() {
        info!("Settings unchanged");
        return;
    }
    info!(changed = ?change.changed, "Settings reloaded");

    services.live_status.invalidate_all();
    if let Some(event) = change.membership_event() {
        if let Err(e) = events.try_dispatch(event) {
            warn!(error = %e, "Failed to queue settings change");
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
