//! Message envelope for host <-> guest communication.
//!
//! Every value crossing the sandbox boundary is a `{type, payload}` envelope.
//! Messages arriving from a guest context are untrusted: the host never
//! deserializes them directly into domain types but goes through
//! [`Message::parse`], which drops anything that is not an object with a
//! recognized `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Reserved event name: prop-update style dispatch on the guest side.
pub const EVENT_UPDATE: &str = "update";

/// Reserved event name: guest diagnostic output relayed to the host.
pub const EVENT_LOG: &str = "__log";

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// The wire envelope exchanged between a Host Gateway and its guest context.
///
/// Serialized as `{"type": "...", "payload": ...}`, with `payload` omitted
/// for `ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum Message {
    /// Guest -> host: the guest runtime finished booting.
    Ready,
    /// Host -> guest: the current slot props.
    PropUpdate(Value),
    /// Either direction: a named event.
    Event(EventPayload),
    /// Guest -> host: a fire-and-forget action.
    Action(ActionPayload),
    /// Guest -> host: a correlated command call.
    Invoke(InvokePayload),
    /// Host -> guest: the reply to an `invoke`.
    InvokeResult(InvokeResultPayload),
}

impl Message {
    /// Defensively parse an untrusted value into a message.
    ///
    /// Returns `None` for anything that is not an object with a recognized
    /// `type` and a well-formed payload. Malformed input is the caller's
    /// signal to drop the message, not an error.
    pub fn parse(value: Value) -> Option<Message> {
        serde_json::from_value(value).ok()
    }

    /// Build an `event` message, merging `fields` (an object, or ignored
    /// otherwise) with the event name.
    pub fn event(name: impl Into<String>, fields: Value) -> Message {
        let fields = match fields {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Message::Event(EventPayload {
            name: name.into(),
            fields,
        })
    }

    /// Build an `action` message.
    pub fn action(name: impl Into<String>, data: Option<Value>) -> Message {
        Message::Action(ActionPayload {
            action: name.into(),
            data,
        })
    }
}

/// Payload of an `event` message: `{name, ...fields}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub name: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

impl EventPayload {
    /// The payload as a single JSON object (name merged with the fields),
    /// the shape listeners receive.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("name".to_string(), Value::String(self.name.clone()));
        Value::Object(map)
    }
}

/// Payload of an `action` message: `{action, data?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPayload {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Payload of an `invoke` message: `{id, command, args}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokePayload {
    pub id: String,
    pub command: String,
    pub args: Value,
}

/// Payload of an `invoke-result` message: `{id, result?, error?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResultPayload {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Context identity and channel bundle
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque identity of an isolated guest context.
///
/// Assigned by the Host Gateway at context creation and attached to every
/// guest-originated frame. The gateway compares it against its own stored
/// id to reject spoofed or stale senders; nothing is ever inferred from the
/// message content itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// An untrusted frame received from a guest context.
///
/// The body stays a raw JSON value until the gateway has checked the source
/// identity and run it through [`Message::parse`].
#[derive(Debug, Clone)]
pub struct GuestFrame {
    pub source: ContextId,
    pub body: Value,
}

/// The channel bundle handed to a freshly created guest context.
///
/// This is the only thing that crosses the host/guest boundary: the guest
/// holds the sending half toward the host and the receiving half from it.
/// Channels are unbounded so that sends never block either event loop, and
/// each direction preserves send order.
pub struct GuestLink {
    pub context_id: ContextId,
    pub to_host: mpsc::UnboundedSender<GuestFrame>,
    pub from_host: mpsc::UnboundedReceiver<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shapes() {
        let ready = serde_json::to_value(&Message::Ready).unwrap();
        assert_eq!(ready, json!({"type": "ready"}));

        let props = serde_json::to_value(&Message::PropUpdate(json!({"x": 1}))).unwrap();
        assert_eq!(props, json!({"type": "prop-update", "payload": {"x": 1}}));

        let event = serde_json::to_value(&Message::event("chat", json!({"text": "hi"}))).unwrap();
        assert_eq!(
            event,
            json!({"type": "event", "payload": {"name": "chat", "text": "hi"}})
        );

        let action = serde_json::to_value(&Message::action("close_settings", None)).unwrap();
        assert_eq!(
            action,
            json!({"type": "action", "payload": {"action": "close_settings"}})
        );
    }

    #[test]
    fn test_parse_round_trip() {
        let value = json!({
            "type": "invoke",
            "payload": {"id": "inv-1", "command": "list_items", "args": {}}
        });
        match Message::parse(value) {
            Some(Message::Invoke(p)) => {
                assert_eq!(p.id, "inv-1");
                assert_eq!(p.command, "list_items");
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Message::parse(json!(42)).is_none());
        assert!(Message::parse(json!("ready")).is_none());
        assert!(Message::parse(json!({"no_type": true})).is_none());
        assert!(Message::parse(json!({"type": "bogus"})).is_none());
        // Recognized type, malformed payload
        assert!(Message::parse(json!({"type": "invoke", "payload": {"id": "x"}})).is_none());
        assert!(Message::parse(json!({"type": "event", "payload": 7})).is_none());
    }

    #[test]
    fn test_event_payload_merges_name() {
        let msg = Message::event("touch", json!({"area": "head"}));
        if let Message::Event(payload) = msg {
            let merged = payload.to_value();
            assert_eq!(merged["name"], "touch");
            assert_eq!(merged["area"], "head");
        } else {
            unreachable!();
        }
    }

    #[test]
    fn test_invoke_result_optional_fields() {
        let ok: Message = Message::InvokeResult(InvokeResultPayload {
            id: "1".into(),
            result: Some(json!([1, 2])),
            error: None,
        });
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["payload"], json!({"id": "1", "result": [1, 2]}));

        let err = Message::parse(json!({
            "type": "invoke-result",
            "payload": {"id": "2", "error": "boom"}
        }));
        match err {
            Some(Message::InvokeResult(p)) => assert_eq!(p.error.as_deref(), Some("boom")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
