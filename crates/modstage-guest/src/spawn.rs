//! Guest context spawn function.
//!
//! A guest runs on a dedicated thread with its own single-threaded event
//! loop, mirroring the "no shared memory" model of a real isolated context:
//! only the channel pair in the [`GuestLink`] crosses the boundary.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use tokio::sync::{mpsc, watch};

use modstage_protocol::{GuestLink, Message};

use crate::error::GuestError;
use crate::handle::GuestHandle;
use crate::runtime::GuestRuntime;

/// Spawn a guest context.
///
/// `script` is the mod's setup code: it runs once on the guest thread with
/// the runtime in hand to register listeners and kick off its own work.
/// The readiness signal is sent after setup returns, so listeners are in
/// place before the host flushes pending props.
pub fn spawn_guest<F>(name: String, link: GuestLink, script: F) -> Result<GuestHandle, GuestError>
where
    F: FnOnce(&Arc<GuestRuntime>) + Send + 'static,
{
    tracing::debug!("[spawn_guest] Starting {}", name);

    let GuestLink {
        context_id,
        to_host,
        from_host,
    } = link;

    let runtime = Arc::new(GuestRuntime::new(context_id, to_host));
    let terminated = Arc::new(AtomicBool::new(false));

    // Shutdown signal (watch channel - multiple receivers can subscribe)
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_runtime = Arc::clone(&runtime);
    let name_clone = name.clone();
    let thread_handle = thread::Builder::new().name(name.clone()).spawn(move || {
        tracing::debug!("[spawn_guest:{}] Thread started", name_clone);

        // Create tokio runtime for this thread
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!("[spawn_guest:{}] Failed to build runtime: {}", name_clone, e);
                return;
            }
        };

        rt.block_on(run_worker(worker_runtime, from_host, shutdown_rx, script));

        rt.shutdown_background();
        tracing::debug!("[spawn_guest:{}] Thread exiting", name_clone);
    })?;

    Ok(GuestHandle {
        runtime,
        shutdown_tx,
        terminated,
        thread_handle: std::sync::Mutex::new(Some(thread_handle)),
    })
}

/// The guest event loop: run setup, signal readiness, then process inbound
/// messages until shutdown or the host drops its end of the channel.
async fn run_worker<F>(
    runtime: Arc<GuestRuntime>,
    mut from_host: mpsc::UnboundedReceiver<Message>,
    mut shutdown_rx: watch::Receiver<bool>,
    script: F,
) where
    F: FnOnce(&Arc<GuestRuntime>),
{
    script(&runtime);
    runtime.send_ready();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::debug!(context = %runtime.context_id(), "Guest shutting down");
                    break;
                }
            }

            inbound = from_host.recv() => {
                match inbound {
                    Some(message) => runtime.dispatch(message),
                    None => {
                        tracing::debug!(context = %runtime.context_id(), "Host channel closed");
                        break;
                    }
                }
            }
        }
    }
}
