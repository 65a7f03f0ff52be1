//! Slot Registry - directory of UI extension points.
//!
//! Each named slot resolves to exactly one implementation: either the
//! host's default or a mod override. Overrides win: the host's own default
//! registration is idempotent and may run repeatedly (e.g. on every app
//! re-initialization) without ever clobbering a mod's claim. An override
//! shadows the default rather than discarding it; the per-slot state
//! machine is `Unbound -> HostDefault <-> ModOverride`, and the owning
//! mod's unregistration transitions back to the shadowed default.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

/// An implementation serving a named slot.
///
/// The rendering layer invokes `render` whenever the slot is drawn or its
/// props change. Host defaults implement this directly; mod overrides are
/// delegating wrappers that drive a Host Gateway.
pub trait SlotComponent: Send + Sync {
    fn render(&self, props: &Value);
}

/// A change observer. Notification means "re-check the registry", not
/// "the value changed".
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct SlotBinding {
    /// Host-default implementation; kept alive while shadowed.
    default: Option<Arc<dyn SlotComponent>>,
    /// Mod override tagged with the owning mod id.
    mod_override: Option<(String, Arc<dyn SlotComponent>)>,
}

impl SlotBinding {
    fn resolve(&self) -> Option<Arc<dyn SlotComponent>> {
        self.mod_override
            .as_ref()
            .map(|(_, component)| Arc::clone(component))
            .or_else(|| self.default.as_ref().map(Arc::clone))
    }
}

#[derive(Default)]
struct RegistryState {
    bindings: HashMap<String, SlotBinding>,
    subscribers: Vec<(u64, ChangeListener)>,
    next_subscriber: u64,
}

/// Directory mapping slot names to their current implementation.
pub struct SlotRegistry {
    state: Mutex<RegistryState>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Create a new registry wrapped in an Arc
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Bind a host-default implementation.
    ///
    /// If a mod currently owns the slot the default is stored behind the
    /// override (override-wins) but does not become visible until the mod
    /// unregisters; returns whether the default is the visible binding.
    /// Only a visible binding change notifies.
    pub fn register(&self, name: impl Into<String>, component: Arc<dyn SlotComponent>) -> bool {
        let name = name.into();
        let visible = {
            let mut state = self.state.lock();
            let binding = state.bindings.entry(name.clone()).or_default();
            binding.default = Some(component);
            binding.mod_override.is_none()
        };
        if visible {
            tracing::debug!(slot = %name, "Registered host default");
            self.notify();
        } else {
            tracing::debug!(slot = %name, "Host default shadowed, slot is mod-owned");
        }
        visible
    }

    /// Bind a mod-owned implementation over the slot.
    ///
    /// Always overwrites a previous override, including one from the same
    /// mod; a host default already in place survives underneath.
    pub fn register_mod_component(
        &self,
        name: impl Into<String>,
        mod_id: impl Into<String>,
        component: Arc<dyn SlotComponent>,
    ) {
        let name = name.into();
        let mod_id = mod_id.into();
        {
            let mut state = self.state.lock();
            let binding = state.bindings.entry(name.clone()).or_default();
            binding.mod_override = Some((mod_id.clone(), component));
        }
        tracing::info!(slot = %name, mod_id = %mod_id, "Registered mod override");
        self.notify();
    }

    /// Remove every override owned by `mod_id`; idempotent.
    ///
    /// Slots with a shadowed host default fall back to it; slots that never
    /// had one become unbound. Returns the number of overrides removed;
    /// notifies once if any was.
    pub fn unregister_mod(&self, mod_id: &str) -> usize {
        let removed = {
            let mut state = self.state.lock();
            let mut removed = 0;
            state.bindings.retain(|_, binding| {
                if binding
                    .mod_override
                    .as_ref()
                    .is_some_and(|(owner, _)| owner == mod_id)
                {
                    binding.mod_override = None;
                    removed += 1;
                }
                binding.default.is_some() || binding.mod_override.is_some()
            });
            removed
        };
        if removed > 0 {
            tracing::info!(mod_id = %mod_id, removed, "Removed mod slot overrides");
            self.notify();
        }
        removed
    }

    /// The implementation currently serving `name`: the override if a mod
    /// owns the slot, the host default otherwise.
    pub fn get(&self, name: &str) -> Option<Arc<dyn SlotComponent>> {
        self.state
            .lock()
            .bindings
            .get(name)
            .and_then(SlotBinding::resolve)
    }

    /// True iff the current binding for `name` is a mod override.
    pub fn is_mod_component(&self, name: &str) -> bool {
        self.state
            .lock()
            .bindings
            .get(name)
            .is_some_and(|binding| binding.mod_override.is_some())
    }

    /// The owning mod of the current binding, if any.
    pub fn owner(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .bindings
            .get(name)
            .and_then(|binding| binding.mod_override.as_ref().map(|(owner, _)| owner.clone()))
    }

    /// Register a change observer; dropping (or explicitly unsubscribing)
    /// the returned handle removes it.
    pub fn subscribe(self: &Arc<Self>, listener: ChangeListener) -> SlotSubscription {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_subscriber;
            state.next_subscriber += 1;
            state.subscribers.push((id, listener));
            id
        };
        SlotSubscription {
            registry: Arc::downgrade(self),
            id,
        }
    }

    /// Invoke every subscriber. Bookkeeping is always complete before this
    /// runs, so observers never see a partially-applied mutation.
    fn notify(&self) {
        let subscribers: Vec<ChangeListener> = self
            .state
            .lock()
            .subscribers
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in subscribers {
            listener();
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.state
            .lock()
            .subscribers
            .retain(|(sub_id, _)| *sub_id != id);
    }
}

impl Default for SlotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard for a registry subscription.
pub struct SlotSubscription {
    registry: Weak<SlotRegistry>,
    id: u64,
}

impl SlotSubscription {
    /// Remove the observer. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for SlotSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}
