//! Utilities for testing the consortium relay and its store.

use std::time::Duration;

use ed25519_dalek::SigningKey;
use eyre::Context as _;
use sqlx::{Connection as _, PgConnection};
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::testcontainers::ContainerAsync;
use testcontainers_modules::testcontainers::runners::AsyncRunner as _;

/// Opens a single ad-hoc connection, for driving migrations or raw setup
/// queries against a test database outside of the crate's own pool.
pub async fn open_pg_connection(connection_string: &str) -> eyre::Result<PgConnection> {
    PgConnection::connect(connection_string)
        .await
        .context("while opening PgConnection")
}

/// Spins up an ephemeral Postgres container and returns it together with a
/// connection string to it. The container must be kept alive for as long as
/// the connection string is used; dropping it tears down the database.
pub async fn postgres_testcontainer() -> eyre::Result<(ContainerAsync<Postgres>, String)> {
    let postgres_container = Postgres::default().start().await?;
    let connection_string = format!(
        "postgres://postgres:postgres@{}:{}/postgres",
        postgres_container.get_host().await?,
        postgres_container.get_host_port_ipv4(5432).await?
    );
    Ok((postgres_container, connection_string))
}

/// Generates a fresh Ed25519 keypair for exercising `/v1/auth`-style flows
/// in integration tests.
pub fn test_signing_key() -> SigningKey {
    SigningKey::generate(&mut rand::rngs::OsRng)
}

/// Returns the hex-encoded public key for a signing key, in the form the
/// relay expects on the wire.
pub fn public_key_hex(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_bytes())
}

/// Polls a service's `/health` endpoint until it answers OK, or the
/// deadline elapses.
pub async fn wait_until_healthy(base_url: &str, max_wait_time: Duration) -> eyre::Result<()> {
    let health_url = format!("{base_url}/health");
    tokio::time::timeout(max_wait_time, async {
        loop {
            if let Ok(resp) = reqwest::get(&health_url).await
                && resp.status().is_success()
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .map_err(|_| eyre::eyre!("service at {base_url} not healthy within {max_wait_time:?}"))
}
