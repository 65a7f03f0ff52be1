//! ModHost - the session object tying the core together.
//!
//! One ModHost owns one Message Router, one Slot Registry, one Action
//! Dispatcher and the directory of mounted gateways. It is explicitly
//! constructed (no module-level singleton) so tests and embedders can run
//! isolated instances side by side.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde_json::Value;

use modstage_protocol::{GuestLink, ModManifest, RestrictionProfile};

use crate::bridge::CommandBridge;
use crate::dispatch::ActionDispatcher;
use crate::error::Result;
use crate::gateway::HostGateway;
use crate::router::MessageRouter;
use crate::slots::{SlotComponent, SlotRegistry};

/// Boots guest content into a freshly created isolated context.
///
/// The embedding layer (iframe host, webview, worker pool) implements
/// this; the core only decides *when* a context is needed and with which
/// restriction profile.
pub trait ContextLauncher: Send + Sync {
    fn launch(
        &self,
        component_id: &str,
        locator: &str,
        profile: RestrictionProfile,
        link: GuestLink,
    );
}

/// Session-scoped owner of the messaging core.
pub struct ModHost {
    router: Arc<MessageRouter>,
    slots: Arc<SlotRegistry>,
    dispatcher: Arc<ActionDispatcher>,
    bridge: Arc<dyn CommandBridge>,
    launcher: Arc<dyn ContextLauncher>,
    /// Mounted gateways keyed `modId:slotName`.
    gateways: DashMap<String, Arc<HostGateway>>,
}

impl ModHost {
    pub fn new(bridge: Arc<dyn CommandBridge>, launcher: Arc<dyn ContextLauncher>) -> Arc<Self> {
        let router = MessageRouter::new_shared();
        let dispatcher = ActionDispatcher::new(Arc::clone(&bridge), Arc::clone(&router));
        Arc::new(Self {
            router,
            slots: SlotRegistry::new_shared(),
            dispatcher,
            bridge,
            launcher,
            gateways: DashMap::new(),
        })
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn slots(&self) -> &Arc<SlotRegistry> {
        &self.slots
    }

    pub fn dispatcher(&self) -> &Arc<ActionDispatcher> {
        &self.dispatcher
    }

    /// Install a host-default slot implementation. Safe to call on every
    /// re-initialization; a mod override is never clobbered.
    pub fn register_default(&self, slot: impl Into<String>, component: Arc<dyn SlotComponent>) {
        self.slots.register(slot, component);
    }

    /// Claim a slot for a mod component.
    ///
    /// Installs a delegating implementation that lazily mounts a Host
    /// Gateway (keyed `modId:slotName`) the first time the rendering layer
    /// invokes it with props, and forwards props on every render.
    pub fn register_mod_component(self: &Arc<Self>, manifest: &ModManifest, slot: &str, locator: &str) {
        let component = Arc::new(ModSlotComponent {
            host: Arc::downgrade(self),
            mod_id: manifest.id.clone(),
            slot: slot.to_string(),
            locator: locator.to_string(),
            profile: manifest.restriction_profile(),
        });
        self.slots
            .register_mod_component(slot, manifest.id.clone(), component);
    }

    /// Register everything a validated manifest declares: one override per
    /// entry in its `components` map.
    pub fn register_mod(self: &Arc<Self>, manifest: &ModManifest) -> Result<()> {
        manifest.validate()?;
        for (slot, locator) in &manifest.components {
            self.register_mod_component(manifest, slot, locator);
        }
        Ok(())
    }

    /// Tear down a mod: unmount its gateways (Router deregistration
    /// happens inside unmount, before any registry notification fires),
    /// then drop its slot bindings. Idempotent.
    pub fn unload_mod(&self, mod_id: &str) {
        let prefix = format!("{}:", mod_id);
        let doomed: Vec<String> = self
            .gateways
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.key().clone())
            .collect();
        for key in doomed {
            if let Some((_, gateway)) = self.gateways.remove(&key) {
                gateway.unmount();
                self.dispatcher.clear_event_observer(&key);
            }
        }
        self.slots.unregister_mod(mod_id);
    }

    /// Get or create the gateway for a mod component, launching the
    /// isolated context on first use.
    fn gateway_for(
        &self,
        mod_id: &str,
        slot: &str,
        locator: &str,
        profile: RestrictionProfile,
    ) -> Arc<HostGateway> {
        let component_id = format!("{}:{}", mod_id, slot);
        if let Some(gateway) = self.gateways.get(&component_id) {
            return Arc::clone(&gateway);
        }

        let (gateway, link) = HostGateway::mount(
            component_id.clone(),
            profile,
            Arc::clone(&self.router),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.bridge),
        );
        self.gateways.insert(component_id.clone(), Arc::clone(&gateway));
        self.launcher.launch(&component_id, locator, profile, link);
        gateway
    }
}

/// The delegating implementation bound into the Slot Registry for a mod
/// component: renders by driving the component's gateway.
struct ModSlotComponent {
    host: Weak<ModHost>,
    mod_id: String,
    slot: String,
    locator: String,
    profile: RestrictionProfile,
}

impl SlotComponent for ModSlotComponent {
    fn render(&self, props: &Value) {
        let Some(host) = self.host.upgrade() else {
            tracing::debug!(slot = %self.slot, "Render after host teardown ignored");
            return;
        };
        // Mounting a gateway spawns its inbound pump, which needs a
        // runtime on the calling thread.
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(slot = %self.slot, "Render outside a tokio runtime, props dropped");
            return;
        }
        let gateway = host.gateway_for(&self.mod_id, &self.slot, &self.locator, self.profile);
        gateway.update_props(props.clone());
    }
}
