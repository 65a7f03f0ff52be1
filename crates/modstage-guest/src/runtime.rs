//! The guest-side runtime API.
//!
//! `GuestRuntime` is the only surface mod code interacts with: named event
//! listeners, one-way `emit`/`action` sends, correlated `invoke` calls and
//! diagnostic logging. It lives inside the isolated context; everything it
//! sends toward the host is tagged with the context id the host assigned at
//! creation time.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use modstage_protocol::{
    ContextId, EventPayload, GuestFrame, InvokePayload, InvokeResultPayload, Message, EVENT_LOG,
    EVENT_UPDATE,
};

use crate::error::GuestError;

/// Deadline for a correlated `invoke` call.
pub const INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

/// A named-event listener. Registered and removed by `Arc` identity, so the
/// same closure must be kept around to unregister it.
pub type EventListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// A pending correlated call. Settled exactly once: whichever of the reply
/// path and the caller's guard removes the entry from the table wins, and
/// the other path becomes a no-op.
struct PendingInvocation {
    reply: oneshot::Sender<Result<Value, String>>,
}

/// Removes the pending entry once the calling future finishes, times out
/// or is dropped mid-await. Removal is idempotent against the reply path.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<String, PendingInvocation>>,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.id);
    }
}

/// The API surface exposed to mod code inside an isolated context.
pub struct GuestRuntime {
    context_id: ContextId,
    to_host: mpsc::UnboundedSender<GuestFrame>,
    listeners: Mutex<HashMap<String, Vec<EventListener>>>,
    pending: Mutex<HashMap<String, PendingInvocation>>,
    invoke_seq: AtomicU64,
}

impl GuestRuntime {
    pub fn new(context_id: ContextId, to_host: mpsc::UnboundedSender<GuestFrame>) -> Self {
        Self {
            context_id,
            to_host,
            listeners: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            invoke_seq: AtomicU64::new(0),
        }
    }

    /// The identity the host assigned to this context.
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    // ─────────────────────────────────────────────────────────────────────
    // Listener registration
    // ─────────────────────────────────────────────────────────────────────

    /// Register a listener for a named event.
    ///
    /// Multiple listeners per name are supported, insertion order is
    /// preserved and duplicates are allowed. The reserved name
    /// [`EVENT_UPDATE`] receives prop updates from the host.
    pub fn on(&self, name: impl Into<String>, listener: EventListener) {
        self.listeners
            .lock()
            .entry(name.into())
            .or_default()
            .push(listener);
    }

    /// Remove every occurrence of `listener` registered under `name`.
    pub fn off(&self, name: &str, listener: &EventListener) {
        let mut listeners = self.listeners.lock();
        if let Some(list) = listeners.get_mut(name) {
            list.retain(|l| !Arc::ptr_eq(l, listener));
            if list.is_empty() {
                listeners.remove(name);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Outbound messages
    // ─────────────────────────────────────────────────────────────────────

    /// Send a one-way `event` message to the host. `payload` is merged with
    /// the event name on the wire.
    pub fn emit(&self, name: impl Into<String>, payload: Value) {
        self.post(&Message::event(name, payload));
    }

    /// Send a one-way `action` message to the host.
    pub fn action(&self, name: impl Into<String>, data: Option<Value>) {
        self.post(&Message::action(name, data));
    }

    /// Local diagnostic output, relayed best-effort to the host as a
    /// reserved `__log` event.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(context = %self.context_id, "{}", message);
        self.emit(EVENT_LOG, serde_json::json!({ "message": message }));
    }

    /// Perform a correlated call into a host-exposed command.
    ///
    /// Allocates a session-unique id, records a pending entry and races the
    /// eventual `invoke-result` against a 30 s deadline. Exactly one of the
    /// two settles the call; a reply arriving after the deadline finds no
    /// pending entry and is dropped.
    pub async fn invoke(&self, command: &str, args: Value) -> Result<Value, GuestError> {
        let id = format!("inv-{}", self.invoke_seq.fetch_add(1, Ordering::Relaxed));

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending
            .lock()
            .insert(id.clone(), PendingInvocation { reply: reply_tx });
        // Cleans the table on every exit, including the caller cancelling
        // this future mid-await.
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        let sent = self.post(&Message::Invoke(InvokePayload {
            id: id.clone(),
            command: command.to_string(),
            args,
        }));
        if !sent {
            return Err(GuestError::ChannelClosed);
        }

        match tokio::time::timeout(INVOKE_TIMEOUT, reply_rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => Err(GuestError::Command {
                command: command.to_string(),
                error,
            }),
            Ok(Err(_)) => Err(GuestError::ChannelClosed),
            Err(_) => Err(GuestError::InvokeTimeout(command.to_string())),
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send the readiness signal. Called once by the worker after the mod
    /// script's setup has run.
    pub(crate) fn send_ready(&self) {
        self.post(&Message::Ready);
    }

    fn post(&self, message: &Message) -> bool {
        let body = match serde_json::to_value(message) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(context = %self.context_id, error = %e, "Failed to encode message");
                return false;
            }
        };
        let frame = GuestFrame {
            source: self.context_id,
            body,
        };
        if self.to_host.send(frame).is_err() {
            tracing::trace!(context = %self.context_id, "Host channel closed, message dropped");
            return false;
        }
        true
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inbound dispatch
    // ─────────────────────────────────────────────────────────────────────

    /// Process one inbound message from the host.
    pub fn dispatch(&self, message: Message) {
        match message {
            Message::PropUpdate(props) => self.fan_out(EVENT_UPDATE, &props),
            Message::Event(payload) => {
                let value = payload.to_value();
                self.fan_out(&payload.name, &value);
            }
            Message::InvokeResult(payload) => self.settle(payload),
            other => {
                tracing::trace!(context = %self.context_id, ?other, "Dropping host-bound message");
            }
        }
    }

    fn settle(&self, payload: InvokeResultPayload) {
        let entry = self.pending.lock().remove(&payload.id);
        match entry {
            Some(pending) => {
                let outcome = match payload.error {
                    Some(error) => Err(error),
                    None => Ok(payload.result.unwrap_or(Value::Null)),
                };
                // The caller may have given up between removal and send;
                // either way the entry is gone and the id is settled.
                let _ = pending.reply.send(outcome);
            }
            None => {
                tracing::trace!(
                    context = %self.context_id,
                    id = %payload.id,
                    "Dropping invoke-result with no pending entry"
                );
            }
        }
    }

    /// Invoke every listener registered under `name`, isolating panics so a
    /// failing listener never starves its siblings.
    fn fan_out(&self, name: &str, payload: &Value) {
        let listeners: Vec<EventListener> = self
            .listeners
            .lock()
            .get(name)
            .map(|list| list.to_vec())
            .unwrap_or_default();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
                tracing::warn!(
                    context = %self.context_id,
                    event = %name,
                    "Listener panicked during dispatch"
                );
            }
        }
    }
}

impl std::fmt::Debug for GuestRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestRuntime")
            .field("context_id", &self.context_id)
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn runtime() -> (Arc<GuestRuntime>, mpsc::UnboundedReceiver<GuestFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(GuestRuntime::new(ContextId::new(), tx)), rx)
    }

    fn body_of(frame: GuestFrame) -> Message {
        Message::parse(frame.body).expect("guest produced a malformed frame")
    }

    #[tokio::test]
    async fn test_emit_and_action_frames() {
        let (rt, mut rx) = runtime();

        rt.emit("greeting", serde_json::json!({"text": "hi"}));
        rt.action("close_settings", Some(serde_json::json!({"reason": "done"})));

        match body_of(rx.recv().await.unwrap()) {
            Message::Event(p) => {
                assert_eq!(p.name, "greeting");
                assert_eq!(p.fields["text"], "hi");
            }
            other => panic!("unexpected: {:?}", other),
        }
        match body_of(rx.recv().await.unwrap()) {
            Message::Action(p) => {
                assert_eq!(p.action, "close_settings");
                assert_eq!(p.data.unwrap()["reason"], "done");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listener_order_and_duplicates() {
        let (rt, _rx) = runtime();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first: EventListener = {
            let order = order.clone();
            Arc::new(move |_: &Value| order.lock().push("first"))
        };
        let second: EventListener = {
            let order = order.clone();
            Arc::new(move |_: &Value| order.lock().push("second"))
        };

        rt.on("e", first.clone());
        rt.on("e", second);
        rt.on("e", first.clone()); // duplicates allowed

        rt.dispatch(Message::event("e", serde_json::json!({})));
        assert_eq!(*order.lock(), vec!["first", "second", "first"]);

        // off removes every occurrence of the identity
        rt.off("e", &first);
        order.lock().clear();
        rt.dispatch(Message::event("e", serde_json::json!({})));
        assert_eq!(*order.lock(), vec!["second"]);
    }

    #[tokio::test]
    async fn test_listener_panic_is_isolated() {
        let (rt, _rx) = runtime();
        let hits = Arc::new(AtomicUsize::new(0));

        rt.on("e", Arc::new(|_: &Value| panic!("listener exploded")));
        let hits_clone = hits.clone();
        rt.on(
            "e",
            Arc::new(move |_: &Value| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        rt.dispatch(Message::event("e", serde_json::json!({})));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prop_update_hits_update_listeners() {
        let (rt, _rx) = runtime();
        let seen = Arc::new(Mutex::new(None));

        let seen_clone = seen.clone();
        rt.on(
            EVENT_UPDATE,
            Arc::new(move |props: &Value| {
                *seen_clone.lock() = Some(props.clone());
            }),
        );

        rt.dispatch(Message::PropUpdate(serde_json::json!({"volume": 0.5})));
        assert_eq!(seen.lock().as_ref().unwrap()["volume"], 0.5);
    }

    #[tokio::test]
    async fn test_invoke_resolves_on_reply() {
        let (rt, mut rx) = runtime();

        let caller = {
            let rt = rt.clone();
            tokio::spawn(async move { rt.invoke("list_items", serde_json::json!({})).await })
        };

        let id = match body_of(rx.recv().await.unwrap()) {
            Message::Invoke(p) => {
                assert_eq!(p.command, "list_items");
                p.id
            }
            other => panic!("unexpected: {:?}", other),
        };

        rt.dispatch(Message::InvokeResult(InvokeResultPayload {
            id,
            result: Some(serde_json::json!([1, 2, 3])),
            error: None,
        }));

        let result = caller.await.unwrap().unwrap();
        assert_eq!(result, serde_json::json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_invoke_rejects_on_error_reply() {
        let (rt, mut rx) = runtime();

        let caller = {
            let rt = rt.clone();
            tokio::spawn(async move { rt.invoke("save", serde_json::json!({})).await })
        };

        let id = match body_of(rx.recv().await.unwrap()) {
            Message::Invoke(p) => p.id,
            other => panic!("unexpected: {:?}", other),
        };
        rt.dispatch(Message::InvokeResult(InvokeResultPayload {
            id,
            result: None,
            error: Some("disk full".into()),
        }));

        match caller.await.unwrap() {
            Err(GuestError::Command { command, error }) => {
                assert_eq!(command, "save");
                assert_eq!(error, "disk full");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_times_out() {
        let (rt, _rx) = runtime();

        let err = rt
            .invoke("list_items", serde_json::json!({}))
            .await
            .unwrap_err();

        let text = err.to_string();
        assert!(text.contains("list_items"));
        assert!(text.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_after_timeout_is_noop() {
        let (rt, mut rx) = runtime();

        let err = rt.invoke("slow", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, GuestError::InvokeTimeout(_)));

        let id = match body_of(rx.recv().await.unwrap()) {
            Message::Invoke(p) => p.id,
            other => panic!("unexpected: {:?}", other),
        };

        // Late and duplicate replies are both dropped without effect.
        let reply = Message::InvokeResult(InvokeResultPayload {
            id,
            result: Some(Value::Null),
            error: None,
        });
        rt.dispatch(reply.clone());
        rt.dispatch(reply);
    }

    #[tokio::test]
    async fn test_cancelled_invoke_clears_pending_entry() {
        let (rt, mut rx) = runtime();

        let caller = {
            let rt = rt.clone();
            tokio::spawn(async move { rt.invoke("slow", serde_json::json!({})).await })
        };

        let id = match body_of(rx.recv().await.unwrap()) {
            Message::Invoke(p) => p.id,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(rt.pending_len(), 1);

        caller.abort();
        let _ = caller.await;
        assert_eq!(rt.pending_len(), 0);

        // A reply for the abandoned call finds nothing to settle.
        rt.dispatch(Message::InvokeResult(InvokeResultPayload {
            id,
            result: Some(Value::Null),
            error: None,
        }));
        assert_eq!(rt.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_invoke_id_is_dropped() {
        let (rt, _rx) = runtime();
        rt.dispatch(Message::InvokeResult(InvokeResultPayload {
            id: "never-issued".into(),
            result: None,
            error: None,
        }));
    }

    #[tokio::test]
    async fn test_invoke_ids_are_session_unique() {
        let (rt, mut rx) = runtime();

        for _ in 0..3 {
            let rt = rt.clone();
            tokio::spawn(async move {
                let _ = rt.invoke("noop", Value::Null).await;
            });
        }

        let mut ids = std::collections::HashSet::new();
        for _ in 0..3 {
            if let Message::Invoke(p) = body_of(rx.recv().await.unwrap()) {
                assert!(ids.insert(p.id));
            }
        }
    }
}
