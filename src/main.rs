use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use expin::{
    api,
    clock::SystemClock,
    config::{CliArgs, Command, Config, LoggingConfig},
    file_storage::FileDocumentStore,
    storage::DocumentStore,
};

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn serve(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let mut state = expin::build_state(config, Arc::new(SystemClock))?;
    state.metrics = Some(handle);

    let app = api::router(Arc::new(state));
    let addr = config.listen_addr()?;
    tracing::info!(%addr, oauth = config.oauth.enabled, "API listening");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn purge_invoices(config: &Config, area: expin_core::Area) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileDocumentStore::open(config.storage.invoices_dir())?;
    let removed = store.purge(area)?;
    println!("Deleted {} invoice(s) from {}.", removed, area);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_logging(&config.logging);

    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::PurgeInvoices { area } => purge_invoices(&config, area),
    }
}
