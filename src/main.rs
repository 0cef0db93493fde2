use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

mod config;
mod dashboard;
mod driver;
mod error;
mod league;
mod orchestrator;
mod store;
mod tasks;
mod timer;

use config::Config;
use dashboard::AppState;
use driver::webdriver::WebDriverConnector;
use driver::{Connector, Session};
use orchestrator::Orchestrator;
use store::Store;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let store = Store::open(&config.data_dir)?;
    info!("Store opened: {}", config.data_dir.display());

    // Start the browser
    let webdriver_url = Url::parse(&config.webdriver_url)?;
    let connector: Arc<dyn Connector> =
        Arc::new(WebDriverConnector::new(webdriver_url, config.headless)?);
    let driver = connector
        .connect()
        .await
        .with_context(|| format!("cannot reach WebDriver at {}", config.webdriver_url))?;
    info!(
        "Browser session started ({}, headless: {})",
        driver.name(),
        config.headless
    );
    let session = Arc::new(Session::new(
        driver,
        &config.target_url,
        &config.leagues,
        config.element_timeout(),
    ));

    let shutdown = CancellationToken::new();
    let mut orchestrator = Orchestrator::new(
        &config,
        session,
        store.clone(),
        connector,
        shutdown.clone(),
    );

    // Status endpoints
    if let Some(addr) = config.status_addr {
        let app = dashboard::router(AppState {
            status: orchestrator.subscribe_status(),
            metrics: orchestrator.metrics(),
            store,
        });
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Status endpoints listening on http://{}", addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Status server stopped: {}", e);
            }
        });
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, shutting down");
                    shutdown.cancel();
                }
                Err(e) => error!("Cannot listen for Ctrl-C: {}", e),
            }
        });
    }

    orchestrator.run().await
}
