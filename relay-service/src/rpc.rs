//! The RPC bridge (§4.5): routes `rpc-call` frames between a user's own
//! connections.
//!
//! Each account owns a `methodName -> ConnectionId` registry (who currently
//! answers that method) and a `callId -> oneshot sender` table of in-flight
//! calls awaiting an ack. Both are guarded by the same per-account
//! `parking_lot::Mutex` the event router uses, for the same reason: cheap
//! cross-account parallelism, simple per-account serialization.
//!
//! A call is resolved at most once by construction: [`RpcBridge::resolve`]
//! removes the `oneshot::Sender` from the pending table before sending on
//! it, so a duplicate ack (or a race with the timeout) finds nothing left to
//! resolve.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_types::AccountId;
use relay_types::api::v1::{RpcRequestEvent, ServerFrame};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::router::{ConnectionId, EventRouter};

/// Why an `rpc-call` failed to complete.
#[derive(Debug, Clone)]
pub enum RpcCallError {
    /// No connection currently has `method` registered.
    NotAvailable,
    /// The only registrant is the caller itself.
    SameSocket,
    /// The target did not ack within the configured timeout.
    Timeout,
    /// The target acked with an error.
    Target(String),
}

impl RpcCallError {
    /// A human-readable message suitable for [`relay_types::api::v1::RpcCallResult::error`].
    pub fn message(&self) -> String {
        match self {
            Self::NotAvailable => "RPC method not available".to_owned(),
            Self::SameSocket => "Cannot call RPC on the same socket".to_owned(),
            Self::Timeout => "RPC call timed out".to_owned(),
            Self::Target(msg) => msg.clone(),
        }
    }
}

#[derive(Default)]
struct AccountRpc {
    methods: HashMap<String, ConnectionId>,
    pending: HashMap<String, oneshot::Sender<Result<Value, String>>>,
}

/// Routes `rpc-register`/`rpc-unregister`/`rpc-call` frames for every
/// account.
#[derive(Clone, Default)]
pub struct RpcBridge {
    accounts: Arc<dashmap::DashMap<AccountId, Arc<Mutex<AccountRpc>>>>,
}

impl RpcBridge {
    fn entry(&self, account_id: AccountId) -> Arc<Mutex<AccountRpc>> {
        self.accounts.entry(account_id).or_default().clone()
    }

    /// Registers `method` as handled by `connection_id`. A later
    /// registration for the same method silently replaces an earlier one.
    pub fn register(&self, account_id: AccountId, method: String, connection_id: ConnectionId) {
        self.entry(account_id).lock().methods.insert(method, connection_id);
    }

    /// Removes `method`'s registration, but only if it is still owned by
    /// `connection_id`. Returns whether a registration was removed.
    pub fn unregister(&self, account_id: AccountId, method: &str, connection_id: ConnectionId) -> bool {
        let entry = self.entry(account_id);
        let mut guard = entry.lock();
        if guard.methods.get(method) == Some(&connection_id) {
            guard.methods.remove(method);
            true
        } else {
            false
        }
    }

    /// Removes every registration owned by `connection_id`, e.g. on
    /// disconnect. Pending calls it is waiting on are left alone; they will
    /// simply time out.
    pub fn remove_connection(&self, account_id: AccountId, connection_id: ConnectionId) {
        if let Some(entry) = self.accounts.get(&account_id) {
            entry.lock().methods.retain(|_, owner| *owner != connection_id);
        }
    }

    /// Routes an `rpc-call`: looks up `method`'s current registrant, forwards
    /// an `rpc-request` frame to it carrying a fresh call id as `ackId`, and
    /// awaits either the matching [`RpcBridge::resolve`] or `timeout`.
    pub async fn call(
        &self,
        router: &EventRouter,
        account_id: AccountId,
        caller: ConnectionId,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcCallError> {
        let entry = self.entry(account_id);
        let target = {
            let guard = entry.lock();
            *guard.methods.get(method).ok_or(RpcCallError::NotAvailable)?
        };
        if target == caller {
            return Err(RpcCallError::SameSocket);
        }

        let call_id = nanoid::nanoid!(12);
        let (tx, rx) = oneshot::channel();
        entry.lock().pending.insert(call_id.clone(), tx);

        let frame = ServerFrame::reply(
            "rpc-request",
            call_id.clone(),
            RpcRequestEvent {
                method: method.to_owned(),
                params,
            },
        );
        let payload = serde_json::to_string(&frame).expect("rpc-request frame must serialize");

        if !router.send_to_connection(account_id, target, &payload) {
            entry.lock().pending.remove(&call_id);
            return Err(RpcCallError::NotAvailable);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(RpcCallError::Target(message)),
            Ok(Err(_canceled)) => Err(RpcCallError::Target("caller disconnected".to_owned())),
            Err(_elapsed) => {
                entry.lock().pending.remove(&call_id);
                Err(RpcCallError::Timeout)
            }
        }
    }

    /// Resolves the pending call keyed by `call_id`, if any, with the
    /// target's ack payload. Returns whether a pending call was found (and
    /// therefore consumed). A frame whose `ackId` does not match any pending
    /// call is not an RPC ack at all, and the caller should fall back to
    /// treating it as an ordinary client frame.
    pub fn resolve(&self, account_id: AccountId, call_id: &str, result: Result<Value, String>) -> bool {
        let Some(entry) = self.accounts.get(&account_id) else {
            return false;
        };
        let sender = entry.lock().pending.remove(call_id);
        match sender {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use relay_types::SessionId;

    use super::*;
    use crate::router::ConnectionScope;

    #[tokio::test]
    async fn calls_route_to_the_registrant_and_resolve_on_ack() {
        let router = EventRouter::default();
        let bridge = RpcBridge::default();
        let account_id = AccountId::new_v4();

        let (caller_id, mut caller_rx) = router.add(account_id, ConnectionScope::User);
        let (target_id, mut target_rx) =
            router.add(account_id, ConnectionScope::Session(SessionId::new_v4()));
        bridge.register(account_id, "doThing".to_owned(), target_id);

        let bridge_clone = bridge.clone();
        let router_clone = router.clone();
        let call = tokio::spawn(async move {
            bridge_clone
                .call(
                    &router_clone,
                    account_id,
                    caller_id,
                    "doThing",
                    serde_json::json!({"x": 1}),
                    Duration::from_secs(5),
                )
                .await
        });

        let forwarded = target_rx.recv().await.expect("rpc-request forwarded");
        let frame: relay_types::api::v1::ClientFrame = serde_json::from_str(&forwarded).unwrap();
        assert_eq!(frame.event, "rpc-request");
        let ack_id = frame.ack_id.expect("rpc-request carries ack id");

        assert!(bridge.resolve(account_id, &ack_id, Ok(serde_json::json!({"ok": true}))));
        let result = call.await.unwrap().expect("call resolves");
        assert_eq!(result, serde_json::json!({"ok": true}));
        assert!(caller_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn call_to_unregistered_method_fails_fast() {
        let router = EventRouter::default();
        let bridge = RpcBridge::default();
        let account_id = AccountId::new_v4();
        let (caller_id, _rx) = router.add(account_id, ConnectionScope::User);

        let err = bridge
            .call(
                &router,
                account_id,
                caller_id,
                "missing",
                Value::Null,
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RpcCallError::NotAvailable));
    }

    #[tokio::test]
    async fn call_to_self_is_rejected() {
        let router = EventRouter::default();
        let bridge = RpcBridge::default();
        let account_id = AccountId::new_v4();
        let (conn_id, _rx) = router.add(account_id, ConnectionScope::User);
        bridge.register(account_id, "echo".to_owned(), conn_id);

        let err = bridge
            .call(
                &router,
                account_id,
                conn_id,
                "echo",
                Value::Null,
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RpcCallError::SameSocket));
    }
}
