use dotline::config::Config;
use dotline::delivery::LogDelivery;
use dotline::server::Server;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        hostname = %config.session.hostname,
        max_sessions = config.max_sessions,
        overflow = ?config.overflow,
        timeout_secs = config.session.timeout.as_secs(),
        max_data_size = config.session.max_data_size,
        "Starting dotline server"
    );

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if let Some(workers) = config.workers {
        runtime.worker_threads(workers);
    }

    runtime.build()?.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::new(config, Arc::new(LogDelivery));

    let listener = match server.bind() {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %server.listen_address(), error = %e, "Cannot listen");
            std::process::exit(1);
        }
    };

    server.serve(listener).await?;
    Ok(())
}
