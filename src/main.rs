use std::{future::IntoFuture, pin::pin, process, sync::Arc, time::Duration};

use clap::Parser;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use raffica::{
    cache::{CacheConfig, CacheStore, SingleFlight},
    config::{self, CliArgs, Settings},
    infra::{
        InfraError,
        http::{AppState, build_router},
        telemetry,
    },
    pipeline::{PipelineConfig, PipelineState, RouteTable},
    sitemap::{HttpHeadProbe, SitemapService, StaticPageSource},
};

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let settings = match config::load(&cli) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("configuration error: {err}");
            process::exit(2);
        }
    };

    if let Err(err) = telemetry::init(&settings.logging) {
        eprintln!("telemetry error: {err}");
        process::exit(2);
    }

    if let Err(err) = serve(settings).await {
        error!(error = %err, "server terminated with error");
        process::exit(1);
    }
}

async fn serve(settings: Settings) -> Result<(), InfraError> {
    let store = Arc::new(CacheStore::new());
    let cache = Arc::new(SingleFlight::new(CacheConfig::from(&settings.cache), store));

    let probe = HttpHeadProbe::new(settings.sitemap.config.probe_timeout())
        .map_err(|err| InfraError::http_client(err.to_string()))?;
    let sitemap = Arc::new(SitemapService::new(
        Arc::new(StaticPageSource::new(settings.sitemap.cultures.clone())),
        Arc::new(probe),
        Arc::clone(&cache),
        settings.sitemap.config.clone(),
    ));

    let pipeline = PipelineState {
        routes: Arc::new(RouteTable::new(settings.routing.rules.clone())),
        config: Arc::new(PipelineConfig {
            compression: settings.compression.preference,
            cache_headers: settings.cache_headers.clone(),
            rewrite_tokens: settings.pipeline.rewrite_tokens,
            intercept_errors: settings.pipeline.intercept_errors,
        }),
    };

    let app = AppState {
        sitemap,
        content_dir: settings.server.content_dir.clone(),
    };
    let router = build_router(app, pipeline);

    let listener = tokio::net::TcpListener::bind(settings.server.listen).await?;
    info!(
        addr = %settings.server.listen,
        content_dir = %settings.server.content_dir.display(),
        "raffica listening"
    );

    let (drain_tx, drain_rx) = oneshot::channel::<()>();
    let shutdown = async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received; draining connections"),
            Err(err) => error!(error = %err, "failed to listen for shutdown signal"),
        }
        let _ = drain_tx.send(());
    };

    let mut server = pin!(axum::serve(listener, router).with_graceful_shutdown(shutdown).into_future());
    tokio::select! {
        result = &mut server => result?,
        () = drain_deadline(drain_rx, settings.server.graceful_shutdown) => {
            warn!(
                grace_secs = settings.server.graceful_shutdown.as_secs(),
                "graceful shutdown window elapsed; aborting open connections"
            );
        }
    }

    Ok(())
}

async fn drain_deadline(drain_rx: oneshot::Receiver<()>, grace: Duration) {
    let _ = drain_rx.await;
    tokio::time::sleep(grace).await;
}
