use std::{process, sync::Arc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt};

use crate::{
    config::Config, error::Result, launcher::AppState, provider::SmtpConnector,
    web_server::http_server,
};

mod config;
mod dispatch;
mod error;
mod launcher;
mod provider;
mod queue;
mod quota;
mod relay;
mod session;
mod web_server;


pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// start the send queue and the web server, returns when either stops
async fn run(config: Config) -> Result<()> {
    info!(
        "Mail launcher v{VERSION} starting on {}:{} relaying through {}",
        config.http_host, config.http_port, config.provider
    );

    let token = CancellationToken::new();
    let connector = Box::new(SmtpConnector::new(config.provider.clone()));
    let state = Arc::new(AppState::new(config, connector, token.clone()));

    let mut tasks = JoinSet::new();

    tasks.spawn(queue::worker(
        state.queue.clone(),
        state.quota.clone(),
        state.config.policy.clone(),
        token.clone(),
        |_, _| {},
    ));
    tasks.spawn(http_server(state));

    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
        }
        shutdown.cancel();
    });

    let mut result = Ok(());

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(name)) => info!("{name} stopped"),
            Ok(Err(e)) => {
                error!("task failed: {e}");
                result = Err(e);
            }
            Err(e) => error!("task panicked: {e}"),
        }

        // one task stopping brings the others down
        token.cancel();
    }

    result
}

#[tokio::main]
async fn main() {
    // initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "mailrelay_launcher=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let exit_code = match Config::from_env() {
        Ok(config) => match run(config).await {
            Ok(()) => {
                info!("Mail launcher stopped");
                0
            }
            Err(e) => {
                error!("Mail launcher error {e}");
                1
            }
        },
        Err(e) => {
            error!("Mail launcher error {e}");
            1
        }
    };

    process::exit(exit_code);
}
