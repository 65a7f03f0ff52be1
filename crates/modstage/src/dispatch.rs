//! Action Dispatcher - translation layer between guest messages and the
//! host domain.
//!
//! Guest actions fan out to two targets: the backend mod-script runtime
//! (keyed `action:<name>`) and a process-wide host notification channel.
//! In the other direction, selected host lifecycle events are relayed to
//! every mounted gateway and to the script runtime, so non-UI mod scripts
//! observe the same stream as slot-hosted UI mods. Each relay target is
//! isolated: one failing never blocks the other.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use wildmatch::WildMatch;

use modstage_protocol::{ActionPayload, EventPayload, Message};

use crate::bridge::CommandBridge;
use crate::router::MessageRouter;

/// Two taps within this window count as one rapid_tap gesture.
const RAPID_TAP_WINDOW: Duration = Duration::from_millis(1500);

/// Process-wide notification raised for every validated guest action.
#[derive(Debug, Clone, Serialize)]
pub struct HostNotification {
    pub component_id: String,
    pub action: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Per-component hook receiving validated guest events.
pub type EventObserver = Arc<dyn Fn(&EventPayload) + Send + Sync>;

pub struct ActionDispatcher {
    bridge: Arc<dyn CommandBridge>,
    router: Arc<MessageRouter>,
    notify_tx: broadcast::Sender<HostNotification>,
    observers: DashMap<String, EventObserver>,
    relay_patterns: Vec<WildMatch>,
    last_tap: Mutex<Option<Instant>>,
}

impl ActionDispatcher {
    /// Create a dispatcher relaying every host lifecycle event (`*`).
    pub fn new(bridge: Arc<dyn CommandBridge>, router: Arc<MessageRouter>) -> Arc<Self> {
        Self::with_relay_patterns(bridge, router, vec!["*".to_string()])
    }

    /// Create a dispatcher relaying only lifecycle events matching one of
    /// the given wildcard patterns (e.g. `chat/*`, `expression-changed`).
    pub fn with_relay_patterns(
        bridge: Arc<dyn CommandBridge>,
        router: Arc<MessageRouter>,
        patterns: Vec<String>,
    ) -> Arc<Self> {
        let (notify_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            bridge,
            router,
            notify_tx,
            observers: DashMap::new(),
            relay_patterns: patterns.iter().map(|p| WildMatch::new(p)).collect(),
            last_tap: Mutex::new(None),
        })
    }

    /// Subscribe to host notifications raised for guest actions.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<HostNotification> {
        self.notify_tx.subscribe()
    }

    /// Install the event-observer hook for a component.
    pub fn set_event_observer(&self, component_id: impl Into<String>, observer: EventObserver) {
        self.observers.insert(component_id.into(), observer);
    }

    /// Remove a component's event-observer hook; idempotent.
    pub fn clear_event_observer(&self, component_id: &str) {
        self.observers.remove(component_id);
    }

    /// Forward a validated guest event to the component's observer hook.
    pub fn on_guest_event(&self, component_id: &str, event: &EventPayload) {
        let observer = self.observers.get(component_id).map(|o| Arc::clone(&o));
        match observer {
            Some(observer) => {
                if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                    tracing::warn!(
                        component = %component_id,
                        event = %event.name,
                        "Event observer panicked"
                    );
                }
            }
            None => {
                tracing::debug!(
                    component = %component_id,
                    event = %event.name,
                    "Guest event with no observer"
                );
            }
        }
    }

    /// Relay a validated guest action to the backend script runtime and
    /// raise the host notification. Backend failure is logged, never
    /// propagated to the guest, and never blocks the notification.
    pub fn on_guest_action(self: &Arc<Self>, component_id: &str, payload: ActionPayload) {
        let action = self.upgrade_gesture(payload.action);
        let data = payload.data.unwrap_or(Value::Null);

        let key = format!("action:{}", action);
        let bridge = Arc::clone(&self.bridge);
        let script_data = data.clone();
        let component = component_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = bridge.dispatch_script(&key, script_data).await {
                tracing::warn!(component = %component, key = %key, error = %e, "Script dispatch failed");
            }
        });

        // No receivers is fine; the notification is best-effort by design.
        let _ = self.notify_tx.send(HostNotification {
            component_id: component_id.to_string(),
            action,
            data,
            timestamp: Utc::now(),
        });
    }

    /// Relay a host-domain lifecycle event to every mounted gateway and to
    /// the backend script runtime, if it matches the relay patterns.
    pub fn relay_host_event(self: &Arc<Self>, name: &str, data: Value) {
        if !self.relay_patterns.iter().any(|p| p.matches(name)) {
            tracing::trace!(event = %name, "Lifecycle event outside relay patterns");
            return;
        }

        self.router.broadcast(Message::event(name, data.clone()));

        let key = format!("event:{}", name);
        let bridge = Arc::clone(&self.bridge);
        let event = name.to_string();
        tokio::spawn(async move {
            if let Err(e) = bridge.dispatch_script(&key, data).await {
                tracing::warn!(event = %event, error = %e, "Script relay failed");
            }
        });
    }

    /// Gesture-combo upgrade: a second `tap` arriving inside the window
    /// becomes a `rapid_tap`, which the backend chat pipeline treats as a
    /// distinct touch reaction. All other actions pass through untouched.
    fn upgrade_gesture(&self, action: String) -> String {
        if action != "tap" {
            return action;
        }
        let mut last_tap = self.last_tap.lock();
        let now = Instant::now();
        match last_tap.take() {
            Some(previous) if now.duration_since(previous) <= RAPID_TAP_WINDOW => {
                "rapid_tap".to_string()
            }
            _ => {
                *last_tap = Some(now);
                action
            }
        }
    }
}
