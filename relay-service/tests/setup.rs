use std::sync::Arc;

use axum_test::TestServer;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::Signer as _;
use relay_service::router::EventRouter;
use relay_service::rpc::RpcBridge;
use relay_service::token::TokenService;
use relay_service::{Readiness, RelayConfig, RelayState, build_router};
use relay_store::Store;
use relay_test_utils::{postgres_testcontainer, test_signing_key};
use secrecy::SecretString;
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::testcontainers::ContainerAsync;

/// An in-process relay, backed by a real Postgres testcontainer, driven
/// through `axum-test` rather than a bound TCP socket.
pub struct TestRelay {
    pub server: TestServer,
    // kept alive for the container's lifetime; dropping it tears down Postgres.
    _container: ContainerAsync<Postgres>,
}

impl TestRelay {
    pub async fn start() -> eyre::Result<Self> {
        let (container, connection_string) = postgres_testcontainer().await?;
        let store = Store::connect(
            &SecretString::from(connection_string),
            5,
            std::time::Duration::from_secs(5),
        )
        .await?;
        store.migrate().await?;

        let config = Arc::new(test_config());
        let state = RelayState {
            store,
            tokens: TokenService::new(&config.master_secret),
            router: EventRouter::default(),
            rpc: RpcBridge::default(),
            config,
        };
        let readiness = Readiness::default();
        let service_handle = readiness.new_service();
        service_handle.mark_started();

        let app = build_router(state, readiness);
        let server = TestServer::builder()
            .http_transport()
            .build(app)
            .expect("can build test server");

        Ok(Self {
            server,
            _container: container,
        })
    }

    /// Authenticates a fresh Ed25519 keypair against `/v1/auth` and returns
    /// the bearer token the relay issued.
    pub async fn auth_new_account(&self) -> String {
        let key = test_signing_key();
        let challenge = b"relay-auth-challenge";
        let signature = key.sign(challenge);
        let response = self
            .server
            .post("/v1/auth")
            .json(&serde_json::json!({
                "publicKey": STANDARD.encode(key.verifying_key().to_bytes()),
                "challenge": STANDARD.encode(challenge),
                "signature": STANDARD.encode(signature.to_bytes()),
            }))
            .await;
        response.assert_status_ok();
        response.json::<serde_json::Value>()["token"]
            .as_str()
            .expect("token must be a string")
            .to_owned()
    }
}

fn test_config() -> RelayConfig {
    use clap::Parser as _;
    RelayConfig::parse_from([
        "relay-service-tests",
        "--database-url",
        "postgres://unused/unused",
        "--master-secret",
        "test-master-secret-at-least-32-bytes-long",
    ])
}
