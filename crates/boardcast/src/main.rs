use std::env;
use std::time::Duration;

use boardcast::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let bind = env::var("BOARDCAST_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let idle_timeout = match env::var("BOARDCAST_IDLE_SECS") {
        Ok(secs) => Some(Duration::from_secs(secs.parse()?)),
        Err(_) => None,
    };

    let builder = BoardcastServerBuilder::new()
        .bind(&bind)
        .room_config(RoomConfig {
            idle_timeout,
            ..RoomConfig::default()
        });

    match env::var_os("BOARDCAST_DATA_DIR") {
        Some(dir) => {
            let store = FileStore::open(dir).await?;
            tracing::info!(root = %store.root().display(), "using file store");
            serve(builder.build(store).await?).await?;
        }
        None => {
            tracing::warn!("BOARDCAST_DATA_DIR not set, snapshots are kept in memory only");
            serve(builder.build(MemoryStore::new()).await?).await?;
        }
    }
    Ok(())
}

/// Runs until Ctrl-C, then drains every room.
async fn serve<S: SnapshotStore>(server: BoardcastServer<S>) -> Result<(), BoardcastError> {
    if let Ok(addr) = server.local_addr() {
        tracing::info!(%addr, "listening");
    }
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
}
