//! Daemon assembly and HTTP serving.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{self, AppState};
use crate::config::{Config, StoreBackend};
use crate::gateway::{Gateway, OriginPolicy};
use crate::registry::ConnectionRegistry;
use crate::service::{CodeService, DispatchService};
use crate::store::{CodeStore, MemoryStore, RedisStore, StoreError};

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Opens the configured code store.
///
/// Redis must answer `PING` before the daemon starts serving.
pub async fn connect_store(config: &Config) -> Result<Arc<dyn CodeStore>, StoreError> {
    match config.store {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.redis.url()).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory code store; codes will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// A wired daemon, ready to serve.
pub struct Daemon {
    gateway: Arc<Gateway>,
    router: Router,
    cancel: CancellationToken,
    header_read_timeout: Duration,
    shutdown_grace: Duration,
}

impl Daemon {
    /// Wires registry, gateway, services and routes around `store`.
    pub fn new(config: &Config, store: Arc<dyn CodeStore>, cancel: CancellationToken) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&registry),
            OriginPolicy::new(&config.allowed_origins),
            config.gateway.clone(),
            cancel.clone(),
        ));

        let state = AppState {
            codes: CodeService::new(store, gateway.clone())
                .with_store_timeout(config.store_timeout),
            dispatch: DispatchService::new(gateway.clone()),
            registry,
        };
        let router = api::router(state, Arc::clone(&gateway));

        Self {
            gateway,
            router,
            cancel,
            header_read_timeout: config.header_read_timeout,
            shutdown_grace: config.shutdown_grace,
        }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Serves until the cancel token fires.
    ///
    /// On cancel the listener is dropped, every realtime connection is
    /// closed, and in-flight requests get `shutdown_grace` to finish before
    /// they are dropped.
    pub async fn serve(self, listener: TcpListener) {
        let reaper = self.gateway.spawn_reaper();

        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "HTTP server listening");
        }

        let mut builder = Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.header_read_timeout);
        let graceful = GracefulShutdown::new();

        loop {
            let (stream, peer) = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            let service = TowerToHyperService::new(self.router.clone());
            let connection = builder
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .into_owned();
            let connection = graceful.watch(connection);
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    debug!(peer = %peer, error = %e, "HTTP connection ended with error");
                }
            });
        }
        drop(listener);

        info!("Shutting down, closing realtime connections");
        self.gateway.shutdown();

        match tokio::time::timeout(self.shutdown_grace, graceful.shutdown()).await {
            Ok(()) => debug!("HTTP connections drained"),
            Err(_) => warn!(
                grace_secs = self.shutdown_grace.as_secs_f64(),
                "Forced shutdown, dropping in-flight requests"
            ),
        }

        if let Err(e) = reaper.await {
            warn!(error = %e, "Idle reaper ended abnormally");
        }
    }
}
