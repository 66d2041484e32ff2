//! The event router (§4.3): tracks live WebSocket connections per account
//! and fans out update/ephemeral payloads by recipient filter.
//!
//! `add`/`remove`/`emit` for the same account are serialized by a per-account
//! lock (a `parking_lot::Mutex` guarding that account's connection set), so
//! concurrent mutation and iteration never race; different accounts proceed
//! fully in parallel since each gets an independent entry in the
//! [`dashmap::DashMap`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use relay_types::{AccountId, MachineId, SessionId};
use tokio::sync::mpsc;

use crate::metrics::METRICS_ID_CONNECTIONS_OPEN;

/// A unique handle for one live connection, used to address
/// `skipSenderConnection` and to remove a connection on disconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The scope a connection declared at handshake time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionScope {
    /// Dashboard-wide: sees every update and ephemeral for the account.
    User,
    /// Scoped to one session: sees only that session's traffic.
    Session(SessionId),
    /// Scoped to one machine: sees only that machine's traffic.
    Machine(MachineId),
}

/// A registered connection: its scope and a channel to push frames to its
/// WebSocket send loop.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    scope: ConnectionScope,
    sender: mpsc::UnboundedSender<OutboundFrame>,
}

/// A frame queued for delivery to one connection's send loop. Carries the
/// pre-serialized JSON text, since every recipient receives the identical
/// bytes.
pub type OutboundFrame = String;

/// Which connections of an account a payload should reach (§4.3 table).
#[derive(Debug, Clone)]
pub enum RecipientFilter {
    /// Session-scoped connections for `sid`, plus all user-scoped
    /// connections.
    AllInterestedInSession(SessionId),
    /// User-scoped connections only.
    UserScopedOnly,
    /// Machine-scoped connections for `mid`, plus all user-scoped
    /// connections.
    MachineScopedOnly(MachineId),
    /// Every connection of the account, regardless of scope.
    AllUserAuthenticatedConnections,
}

impl RecipientFilter {
    fn matches(&self, scope: &ConnectionScope) -> bool {
        match (self, scope) {
            (_, ConnectionScope::User) => true,
            (Self::AllInterestedInSession(sid), ConnectionScope::Session(s)) => s == sid,
            (Self::MachineScopedOnly(mid), ConnectionScope::Machine(m)) => m == mid,
            (Self::AllUserAuthenticatedConnections, _) => true,
            _ => false,
        }
    }
}

#[derive(Default)]
struct AccountConnections {
    connections: Vec<Connection>,
}

/// Tracks live connections per account and fans out payloads to them.
#[derive(Clone, Default)]
pub struct EventRouter {
    accounts: Arc<dashmap::DashMap<AccountId, Arc<Mutex<AccountConnections>>>>,
}

impl EventRouter {
    /// Registers a new connection for `account_id`, returning its id and a
    /// receiver the caller's send loop should forward to the socket.
    pub fn add(
        &self,
        account_id: AccountId,
        scope: ConnectionScope,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ConnectionId::next();
        let entry = self
            .accounts
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(AccountConnections::default())))
            .clone();
        entry.lock().connections.push(Connection { id, scope, sender });
        metrics::gauge!(METRICS_ID_CONNECTIONS_OPEN).increment(1);
        (id, receiver)
    }

    /// Removes a connection, e.g. on disconnect. A no-op if already removed.
    pub fn remove(&self, account_id: AccountId, connection_id: ConnectionId) {
        if let Some(entry) = self.accounts.get(&account_id) {
            let mut guard = entry.lock();
            let before = guard.connections.len();
            guard.connections.retain(|c| c.id != connection_id);
            if guard.connections.len() != before {
                metrics::gauge!(METRICS_ID_CONNECTIONS_OPEN).decrement(1);
            }
        }
    }

    /// Delivers `payload` to every connection of `account_id` matching
    /// `filter`, skipping `skip_sender` if set. Delivery is best-effort: a
    /// closed channel is silently ignored and does not affect other
    /// recipients.
    pub fn emit(
        &self,
        account_id: AccountId,
        filter: RecipientFilter,
        skip_sender: Option<ConnectionId>,
        payload: &str,
    ) {
        let Some(entry) = self.accounts.get(&account_id) else {
            return;
        };
        let guard = entry.lock();
        for conn in guard.connections.iter() {
            if Some(conn.id) == skip_sender {
                continue;
            }
            if filter.matches(&conn.scope) {
                let _ = conn.sender.send(payload.to_owned());
            }
        }
    }

    /// Delivers `payload` to exactly one connection, addressed by id.
    /// Returns `false` if the connection is not currently registered (e.g.
    /// it already disconnected).
    pub fn send_to_connection(
        &self,
        account_id: AccountId,
        connection_id: ConnectionId,
        payload: &str,
    ) -> bool {
        let Some(entry) = self.accounts.get(&account_id) else {
            return false;
        };
        let guard = entry.lock();
        match guard.connections.iter().find(|c| c.id == connection_id) {
            Some(conn) => conn.sender.send(payload.to_owned()).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use relay_types::SessionId;

    use super::*;

    #[test]
    fn recipient_filter_matches_per_scope_table() {
        let sid = SessionId::new_v4();
        let other_sid = SessionId::new_v4();
        let mid = MachineId::new("machine-a");
        let other_mid = MachineId::new("machine-b");

        assert!(RecipientFilter::AllInterestedInSession(sid).matches(&ConnectionScope::User));
        assert!(
            RecipientFilter::AllInterestedInSession(sid)
                .matches(&ConnectionScope::Session(sid))
        );
        assert!(
            !RecipientFilter::AllInterestedInSession(sid)
                .matches(&ConnectionScope::Session(other_sid))
        );
        assert!(
            !RecipientFilter::AllInterestedInSession(sid)
                .matches(&ConnectionScope::Machine(mid.clone()))
        );

        assert!(RecipientFilter::UserScopedOnly.matches(&ConnectionScope::User));
        assert!(!RecipientFilter::UserScopedOnly.matches(&ConnectionScope::Session(sid)));
        assert!(!RecipientFilter::UserScopedOnly.matches(&ConnectionScope::Machine(mid.clone())));

        assert!(RecipientFilter::MachineScopedOnly(mid.clone()).matches(&ConnectionScope::User));
        assert!(
            RecipientFilter::MachineScopedOnly(mid.clone())
                .matches(&ConnectionScope::Machine(mid.clone()))
        );
        assert!(
            !RecipientFilter::MachineScopedOnly(mid.clone())
                .matches(&ConnectionScope::Machine(other_mid))
        );
        assert!(
            !RecipientFilter::MachineScopedOnly(mid.clone())
                .matches(&ConnectionScope::Session(sid))
        );

        assert!(
            RecipientFilter::AllUserAuthenticatedConnections.matches(&ConnectionScope::User)
        );
        assert!(
            RecipientFilter::AllUserAuthenticatedConnections
                .matches(&ConnectionScope::Session(sid))
        );
        assert!(
            RecipientFilter::AllUserAuthenticatedConnections
                .matches(&ConnectionScope::Machine(mid))
        );
    }

    #[test]
    fn add_remove_and_send_to_connection() {
        let router = EventRouter::default();
        let account_id = AccountId::new_v4();
        let (conn_id, mut rx) = router.add(account_id, ConnectionScope::User);

        assert!(router.send_to_connection(account_id, conn_id, "hello"));
        assert_eq!(rx.try_recv().expect("frame delivered"), "hello");

        router.remove(account_id, conn_id);
        assert!(!router.send_to_connection(account_id, conn_id, "gone"));
    }
}
