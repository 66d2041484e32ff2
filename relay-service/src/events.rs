//! Builds and emits `update`/`ephemeral` push frames (§4.3/§4.6): wraps a
//! kind-specific body in the envelope the event router fans out, stamping a
//! fresh idempotency id and the emission time.

use relay_types::AccountId;
use relay_types::api::v1::{EphemeralEvent, ServerFrame, UpdateBody, UpdateEvent};

use crate::metrics::METRICS_ID_UPDATES_EMITTED;
use crate::router::{ConnectionId, EventRouter, RecipientFilter};
use crate::time::now_millis;

/// Builds and emits an `update` push event. `seq` must already have been
/// allocated by the store, in the same transaction that produced `body`
/// where one exists, so that the sequence observed by clients has no gaps.
pub fn emit_update(
    router: &EventRouter,
    account_id: AccountId,
    seq: i64,
    body: UpdateBody,
    filter: RecipientFilter,
    skip_sender: Option<ConnectionId>,
) {
    let event = UpdateEvent {
        id: nanoid::nanoid!(12),
        seq,
        body,
        created_at: now_millis(),
    };
    let frame = ServerFrame::push("update", event);
    let payload = serde_json::to_string(&frame).expect("update frame must serialize");
    metrics::counter!(METRICS_ID_UPDATES_EMITTED).increment(1);
    router.emit(account_id, filter, skip_sender, &payload);
}

/// Builds and emits an `ephemeral` push event. Never fails; delivery is
/// best-effort per connection, same as every other router emission.
pub fn emit_ephemeral(
    router: &EventRouter,
    account_id: AccountId,
    event: EphemeralEvent,
    filter: RecipientFilter,
    skip_sender: Option<ConnectionId>,
) {
    let frame = ServerFrame::push("ephemeral", event);
    let payload = serde_json::to_string(&frame).expect("ephemeral frame must serialize");
    router.emit(account_id, filter, skip_sender, &payload);
}
