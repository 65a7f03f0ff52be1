//! Host Gateway - the host-side owner of one isolated guest context.
//!
//! The gateway is the trust boundary: everything arriving from its context
//! is an untrusted frame that must pass the source-identity check and the
//! defensive envelope parse before anything else sees it. It is the only
//! component that registers with the Message Router.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use modstage_protocol::{
    ContextId, GuestFrame, GuestLink, InvokePayload, InvokeResultPayload, Message,
    RestrictionProfile,
};

use crate::bridge::CommandBridge;
use crate::dispatch::ActionDispatcher;
use crate::router::{ChannelHandle, MessageRouter};

/// Per-gateway session state.
#[derive(Default)]
struct Session {
    /// Transitions false -> true at most once per mount.
    ready: bool,
    /// Latest props seen before `ready`; flushed exactly once.
    pending_props: Option<Value>,
}

/// Host-side endpoint of one mounted mod surface.
pub struct HostGateway {
    component_id: String,
    context_id: ContextId,
    profile: RestrictionProfile,
    to_guest: mpsc::UnboundedSender<Message>,
    session: Mutex<Session>,
    router: Arc<MessageRouter>,
    dispatcher: Arc<ActionDispatcher>,
    bridge: Arc<dyn CommandBridge>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl HostGateway {
    /// Mount a gateway: create the isolated context's channel pair and
    /// start the inbound pump. The returned [`GuestLink`] is handed to
    /// whatever boots the guest content into the context.
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount(
        component_id: impl Into<String>,
        profile: RestrictionProfile,
        router: Arc<MessageRouter>,
        dispatcher: Arc<ActionDispatcher>,
        bridge: Arc<dyn CommandBridge>,
    ) -> (Arc<HostGateway>, GuestLink) {
        let component_id = component_id.into();
        let context_id = ContextId::new();

        let (to_guest, from_host) = mpsc::unbounded_channel();
        let (to_host, from_guest) = mpsc::unbounded_channel();

        let gateway = Arc::new(HostGateway {
            component_id: component_id.clone(),
            context_id,
            profile,
            to_guest,
            session: Mutex::new(Session::default()),
            router,
            dispatcher,
            bridge,
            pump: Mutex::new(None),
        });

        let pump = tokio::spawn(run_pump(Arc::clone(&gateway), from_guest));
        *gateway.pump.lock() = Some(pump);

        tracing::info!(component = %component_id, context = %context_id, "Gateway mounted");

        let link = GuestLink {
            context_id,
            to_host,
            from_host,
        };
        (gateway, link)
    }

    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// The execution-restriction profile derived from the mod's declared
    /// permissions at mount time.
    pub fn restriction_profile(&self) -> RestrictionProfile {
        self.profile
    }

    pub fn is_ready(&self) -> bool {
        self.session.lock().ready
    }

    /// Forward the current slot props to the guest.
    ///
    /// Before the readiness signal only the most recent props are held;
    /// they are sent exactly once right after `ready` arrives. The send
    /// happens under the session lock (the channel is unbounded, so it
    /// never blocks), which keeps the pre-ready flush and concurrent
    /// updates in order.
    pub fn update_props(&self, props: Value) {
        let mut session = self.session.lock();
        if session.ready {
            let _ = self.to_guest.send(Message::PropUpdate(props));
        } else {
            session.pending_props = Some(props);
        }
    }

    /// Unmount: deregister from the Router first so no observer sees a
    /// half-torn-down gateway as live, then reset session state and stop
    /// the inbound pump.
    pub fn unmount(&self) {
        self.router.unregister(&self.component_id);
        {
            let mut session = self.session.lock();
            session.ready = false;
            session.pending_props = None;
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        tracing::info!(component = %self.component_id, "Gateway unmounted");
    }

    /// Validate and process one untrusted frame from the context.
    fn handle_frame(&self, frame: GuestFrame) {
        if frame.source != self.context_id {
            tracing::trace!(
                component = %self.component_id,
                source = %frame.source,
                "Dropping frame from stale or spoofed context"
            );
            return;
        }

        let Some(message) = Message::parse(frame.body) else {
            tracing::trace!(component = %self.component_id, "Dropping malformed message");
            return;
        };

        match message {
            Message::Ready => self.on_ready(),
            Message::Event(payload) => {
                self.dispatcher.on_guest_event(&self.component_id, &payload);
            }
            Message::Action(payload) => {
                self.dispatcher.on_guest_action(&self.component_id, payload);
            }
            Message::Invoke(payload) => self.service_invoke(payload),
            other => {
                tracing::trace!(component = %self.component_id, ?other, "Dropping guest-bound message");
            }
        }
    }

    fn on_ready(&self) {
        {
            let mut session = self.session.lock();
            if session.ready {
                tracing::debug!(component = %self.component_id, "Duplicate ready ignored");
                return;
            }
            session.ready = true;
            // Flushed under the same lock that flips `ready`, so an
            // update racing with the handshake can never be overtaken by
            // the stale pre-ready props.
            if let Some(props) = session.pending_props.take() {
                let _ = self.to_guest.send(Message::PropUpdate(props));
            }
        }

        self.router.register(
            self.component_id.clone(),
            ChannelHandle::new(self.context_id, self.to_guest.clone()),
        );

        tracing::info!(component = %self.component_id, "Guest context ready");
    }

    /// Service a correlated call: run it through the backend bridge and
    /// reply with the same id. The correlation state lives entirely on the
    /// guest side; the host never tracks pending ids.
    fn service_invoke(&self, payload: InvokePayload) {
        let bridge = Arc::clone(&self.bridge);
        let to_guest = self.to_guest.clone();
        let component = self.component_id.clone();
        tokio::spawn(async move {
            let reply = match bridge.invoke(&payload.command, payload.args).await {
                Ok(result) => InvokeResultPayload {
                    id: payload.id,
                    result: Some(result),
                    error: None,
                },
                Err(e) => {
                    tracing::debug!(
                        component = %component,
                        command = %payload.command,
                        error = %e,
                        "Invoke failed"
                    );
                    InvokeResultPayload {
                        id: payload.id,
                        result: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            let _ = to_guest.send(Message::InvokeResult(reply));
        });
    }
}

/// Inbound pump: drains the guest's frame channel for the gateway's
/// lifetime. Exits when the guest side drops its sender or the gateway
/// unmounts.
async fn run_pump(gateway: Arc<HostGateway>, mut from_guest: mpsc::UnboundedReceiver<GuestFrame>) {
    while let Some(frame) = from_guest.recv().await {
        gateway.handle_frame(frame);
    }
    tracing::debug!(component = %gateway.component_id, "Guest frame channel closed");
}
