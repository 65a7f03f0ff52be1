//! Handle to a spawned guest context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::sync::watch;

use crate::error::GuestError;
use crate::runtime::GuestRuntime;

/// Handle to a guest context running on its own thread.
///
/// Terminating the handle signals the worker loop to shut down; dropping it
/// terminates and joins so the thread never outlives the host-side owner.
pub struct GuestHandle {
    pub(crate) runtime: Arc<GuestRuntime>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) terminated: Arc<AtomicBool>,
    pub(crate) thread_handle: std::sync::Mutex<Option<thread::JoinHandle<()>>>,
}

impl GuestHandle {
    /// The runtime running inside this context. Exposed for scripts that
    /// keep driving the API after setup and for tests.
    pub fn runtime(&self) -> Arc<GuestRuntime> {
        Arc::clone(&self.runtime)
    }

    /// Terminate the guest context.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return; // Already terminated
        }
        // Signal shutdown - this wakes the worker's select!
        let _ = self.shutdown_tx.send(true);
    }

    /// Check if the guest has been terminated.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Wait for the guest thread to finish.
    pub fn join(self) -> Result<(), GuestError> {
        if let Some(handle) = self.thread_handle.lock().unwrap().take() {
            handle.join().map_err(|_| GuestError::ThreadPanic)?;
        }
        Ok(())
    }
}

impl Drop for GuestHandle {
    fn drop(&mut self) {
        self.terminate();
        if let Some(handle) = self.thread_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
