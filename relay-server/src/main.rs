//! Relay server binary.
//!
//! Parses [`RelayConfig`] from environment/CLI, connects to Postgres, runs
//! migrations, builds the HTTP + WebSocket router, and serves it until
//! shutdown.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use clap::Parser as _;
use eyre::Context as _;
use relay_service::router::EventRouter;
use relay_service::rpc::RpcBridge;
use relay_service::token::TokenService;
use relay_service::{Readiness, RelayConfig, RelayState, build_router};
use relay_store::Store;

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    relay_service::observability::initialize_tracing();
    relay_service::metrics::describe_metrics();
    tracing::info!(
        "starting {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = RelayConfig::parse();
    config.validate()?;

    match run(config).await {
        Ok(()) => {
            tracing::info!("good night!");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!("{err:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(config: RelayConfig) -> eyre::Result<()> {
    let config = Arc::new(config);

    let (cancellation_token, is_graceful_shutdown) = relay_service::shutdown::spawn_shutdown_task(
        relay_service::shutdown::default_shutdown_signal(),
    );

    tracing::info!("connecting to store...");
    let store = Store::connect(
        &config.database_url,
        config.db_max_connections.get(),
        config.db_acquire_timeout,
    )
    .await
    .context("while connecting to postgres")?;
    store.migrate().await.context("while running migrations")?;

    let readiness = Readiness::default();
    let service_handle = readiness.new_service();

    let state = RelayState {
        store,
        tokens: TokenService::new(&config.master_secret),
        router: EventRouter::default(),
        rpc: RpcBridge::default(),
        config: config.clone(),
    };

    let app = build_router(state, readiness);
    let bind_addr = config.effective_bind_addr();
    let tcp_listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("while binding tcp-listener")?;
    service_handle.mark_started();

    let axum_cancel_token = cancellation_token.clone();
    let server = tokio::spawn(async move {
        tracing::info!(
            "starting axum server on {}",
            tcp_listener
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| String::from("invalid addr"))
        );
        let axum_shutdown_signal = axum_cancel_token.clone();
        let axum_result = axum::serve(tcp_listener, app)
            .with_graceful_shutdown(async move { axum_shutdown_signal.cancelled().await })
            .await;
        tracing::info!("axum server shutdown");
        if let Err(err) = axum_result {
            tracing::error!("got error from axum: {err:?}");
        }
        axum_cancel_token.cancel();
    });

    tracing::info!("everything started successfully - now waiting for shutdown...");
    cancellation_token.cancelled().await;

    tracing::info!(
        "waiting for shutdown (max wait time {:?})..",
        config.max_wait_time_shutdown
    );
    if tokio::time::timeout(config.max_wait_time_shutdown, server)
        .await
        .is_err()
    {
        is_graceful_shutdown.store(false, Ordering::Relaxed);
        tracing::warn!("could not finish shutdown in time");
    }

    if is_graceful_shutdown.load(Ordering::Relaxed) {
        Ok(())
    } else {
        eyre::bail!("unexpected shutdown - check error logs")
    }
}
