//! End-to-end demo of the mod messaging core.
//!
//! Run with: cargo run -p modstage --example mod_host_demo
//!
//! Wires a ModHost to an in-process launcher that boots a guest runtime per
//! mounted component, registers a mod over the "Panel" slot, then drives
//! props, actions, a correlated invoke and a host lifecycle relay through
//! the full stack.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use modstage::bridge::{BridgeError, CommandBridge};
use modstage::host::{ContextLauncher, ModHost};
use modstage::protocol::{GuestLink, ModManifest, RestrictionProfile};
use modstage::slots::SlotComponent;
use modstage_guest::{spawn_guest, GuestHandle};

/// Backend stub: serves one command and logs script dispatches.
struct DemoBridge;

#[async_trait]
impl CommandBridge for DemoBridge {
    async fn invoke(&self, command: &str, args: Value) -> Result<Value, BridgeError> {
        println!("  [bridge] invoke {} {}", command, args);
        match command {
            "list_presets" => Ok(json!(["calm", "energetic", "focused"])),
            _ => Err(BridgeError::new(format!("unknown command: {}", command))),
        }
    }

    async fn dispatch_script(&self, key: &str, data: Value) -> Result<(), BridgeError> {
        println!("  [bridge] script {} {}", key, data);
        Ok(())
    }
}

/// In-process launcher standing in for the iframe/webview layer.
struct DemoLauncher {
    handles: Mutex<Vec<GuestHandle>>,
}

impl ContextLauncher for DemoLauncher {
    fn launch(
        &self,
        component_id: &str,
        locator: &str,
        profile: RestrictionProfile,
        link: GuestLink,
    ) {
        println!(
            "  [launcher] {} -> {} (scripts={}, popups={})",
            component_id, locator, profile.allow_scripts, profile.allow_popups
        );

        let handle = spawn_guest(component_id.to_string(), link, |rt| {
            // The mod's setup script: react to props, reach back into the
            // host, and fire an action on the first update.
            let emitter = Arc::clone(rt);
            rt.on(
                "update",
                Arc::new(move |props: &Value| {
                    println!("  [guest] props {}", props);
                    emitter.action("tap", Some(json!({"source": "demo"})));
                }),
            );

            rt.on(
                "chat/delta",
                Arc::new(|data: &Value| {
                    println!("  [guest] lifecycle chat/delta {}", data);
                }),
            );

            let invoker = Arc::clone(rt);
            tokio::spawn(async move {
                match invoker.invoke("list_presets", json!({})).await {
                    Ok(presets) => invoker.log(format!("presets: {}", presets)),
                    Err(e) => invoker.log(format!("invoke failed: {}", e)),
                }
            });
        })
        .expect("failed to spawn guest");

        self.handles.lock().push(handle);
    }
}

struct DefaultPanel;

impl SlotComponent for DefaultPanel {
    fn render(&self, props: &Value) {
        println!("  [default panel] {}", props);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let launcher = Arc::new(DemoLauncher {
        handles: Mutex::new(Vec::new()),
    });
    let host = ModHost::new(Arc::new(DemoBridge), launcher.clone());

    let mut notifications = host.dispatcher().subscribe_notifications();

    println!("=== Host defaults ===");
    host.register_default("Panel", Arc::new(DefaultPanel));
    host.slots().get("Panel").unwrap().render(&json!({"volume": 0.2}));

    println!("\n=== Mod registration ===");
    let manifest: ModManifest = serde_json::from_value(json!({
        "id": "ambience",
        "version": "1.0.0",
        "permissions": ["overlay"],
        "components": { "Panel": "mod://ambience/panel.html" }
    }))?;
    host.register_mod(&manifest)?;

    // The override wins; rendering mounts the guest and forwards props.
    host.slots().get("Panel").unwrap().render(&json!({"volume": 0.8}));
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Ok(notification) = notifications.try_recv() {
        println!(
            "  [host] notification from {}: {}",
            notification.component_id, notification.action
        );
    }

    println!("\n=== Host lifecycle relay ===");
    host.dispatcher()
        .relay_host_event("chat/delta", json!({"text": "hello"}));
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("\n=== Unload ===");
    host.unload_mod("ambience");
    host.register_default("Panel", Arc::new(DefaultPanel));
    host.slots().get("Panel").unwrap().render(&json!({"volume": 0.2}));

    launcher.handles.lock().clear();
    println!("\n=== Done ===");
    Ok(())
}
