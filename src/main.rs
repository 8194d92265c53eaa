use anyhow::Context;
use rustydocs::{
    api,
    config::{self, Config, IndexBackend},
    logging,
    pipeline::PipelineOrchestrator,
    qdrant::QdrantIndexer,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let config = config::init_config().context("Failed to load configuration")?;

    let mut builder = PipelineOrchestrator::builder(config.clone());
    if config.index_backend == IndexBackend::Qdrant {
        let indexer =
            QdrantIndexer::from_config(&config).context("Failed to configure Qdrant indexer")?;
        tracing::info!(
            url = %config.qdrant_url,
            collection = %config.qdrant_collection_name,
            "Using Qdrant index backend"
        );
        builder = builder.indexer(Arc::new(indexer));
    }
    let app = api::create_router(Arc::new(builder.build()));

    let (listener, port) = bind_listener(&config)
        .await
        .context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn bind_listener(config: &Config) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
