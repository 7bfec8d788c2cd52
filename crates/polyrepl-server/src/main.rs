//! Server binary: wires the store, backend, and coordinator together and
//! serves the HTTP surface.

use std::{net::SocketAddr, sync::Arc};

use polyrepl_backend::{CalcBackend, CalcCodec};
use polyrepl_coordinator::{Coordinator, CoordinatorConfig};
use polyrepl_core::SessionStore;
use polyrepl_server::{AppState, Config, router};
use polyrepl_store::{MemoryStore, SqliteStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env();

    let store: Arc<dyn SessionStore> = match &config.database_url {
        Some(url) => {
            tracing::info!(%url, "using sqlite session store");
            Arc::new(SqliteStore::connect(url, config.implicit_sessions).await?)
        }
        None => {
            tracing::info!("using in-memory session store");
            Arc::new(MemoryStore::new(config.implicit_sessions))
        }
    };

    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&store),
        Arc::new(CalcBackend::new()),
        Arc::new(CalcCodec),
        CoordinatorConfig {
            exec_timeout: config.exec_timeout,
            implicit_sessions: config.implicit_sessions,
        },
    ));

    let app = router(AppState { store, coordinator }, &config);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
