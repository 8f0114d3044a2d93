use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::router::router;
use crate::store::memory::MemoryStore;
use crate::store::postgres::PgContactStore;
use crate::store::ContactStore;

pub async fn create_store(config: &Config) -> anyhow::Result<Arc<dyn ContactStore>> {
    match config.storage_backend.as_str() {
        "postgres" => {
            let store = PgContactStore::connect(
                &config.database_url,
                config.max_pg_connections,
                config.acquire_timeout(),
            )
            .await
            .inspect_err(|e| {
                error!(
                    error = %e,
                    max_connections = config.max_pg_connections,
                    "Failed to create Postgres client"
                )
            })
            .context("failed to connect to postgres")?;
            info!("Successfully created Postgres client");

            if config.run_migrations {
                store.migrate().await.context("failed to run migrations")?;
                info!("Applied database migrations");
            }
            Ok(Arc::new(store))
        }
        "memory" => {
            info!("Using in-memory contact store");
            Ok(Arc::new(MemoryStore::new()))
        }
        other => bail!("unknown storage backend '{other}', expected 'postgres' or 'memory'"),
    }
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let store = create_store(&config).await?;

    info!("listening on {:?}", listener.local_addr()?);
    let app = router(
        store,
        config.export_page_size,
        config.max_upload_bytes,
        config.enable_metrics,
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server error")
}
