//! Configuration types and CLI/environment parsing for the relay.
//!
//! Can be configured via environment variables or command line arguments
//! using `clap`.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    time::Duration,
};

use clap::Parser;
use secrecy::SecretString;

/// The relay's full runtime configuration.
#[derive(Parser, Debug)]
pub struct RelayConfig {
    /// TCP port the HTTP/WebSocket server listens on, used to build the
    /// default `bind_addr` when that is not set explicitly.
    #[clap(long, env = "PORT", default_value = "3005")]
    pub port: u16,

    /// The bind address of the HTTP/WebSocket server. Defaults to
    /// `0.0.0.0:<PORT>`.
    #[clap(long, env = "BIND_ADDR")]
    pub bind_addr: Option<SocketAddr>,

    /// Store connection string.
    #[clap(long, env = "DATABASE_URL")]
    pub database_url: SecretString,

    /// Master secret the token-signing key is derived from. Must be at
    /// least 32 characters; changing it invalidates all issued tokens.
    #[clap(long, env = "CONSORTIUM_MASTER_SECRET")]
    pub master_secret: SecretString,

    /// Max connections in the Postgres pool.
    #[clap(long, env = "DB_MAX_CONNECTIONS", default_value = "10")]
    pub db_max_connections: NonZeroU32,

    /// Max time to wait for a DB connection to become available.
    #[clap(
        long,
        env = "DB_ACQUIRE_TIMEOUT",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    pub db_acquire_timeout: Duration,

    /// Max message size a WebSocket connection accepts, in bytes.
    #[clap(long, env = "WS_MAX_MESSAGE_SIZE", default_value = "1048576")]
    pub ws_max_message_size: usize,

    /// Hard timeout for an `rpc-call` awaiting its target's ack.
    #[clap(
        long,
        env = "RPC_CALL_TIMEOUT",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub rpc_call_timeout: Duration,

    /// Max wait time the service waits for its workers during shutdown.
    #[clap(
        long,
        env = "MAX_WAIT_TIME_SHUTDOWN",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub max_wait_time_shutdown: Duration,
}

impl RelayConfig {
    /// Validates constraints `clap` cannot express declaratively (the
    /// master secret's minimum length).
    pub fn validate(&self) -> eyre::Result<()> {
        use secrecy::ExposeSecret as _;
        if self.master_secret.expose_secret().len() < 32 {
            eyre::bail!("CONSORTIUM_MASTER_SECRET must be at least 32 characters");
        }
        Ok(())
    }

    /// The address the server binds to: `bind_addr` if set explicitly,
    /// otherwise `0.0.0.0:<port>`.
    pub fn effective_bind_addr(&self) -> SocketAddr {
        self.bind_addr
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port))
    }
}
