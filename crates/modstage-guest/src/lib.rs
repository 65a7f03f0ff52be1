//! Guest runtime for modstage sandboxed mods.
//!
//! This crate is the code injected into the isolated context: the
//! [`GuestRuntime`] API a mod author programs against
//! (`on`/`off`/`emit`/`action`/`invoke`/`log`), the readiness handshake and
//! the inbound message dispatch loop. The host side lives in the `modstage`
//! crate; the two share only the types in `modstage-protocol`.

mod error;
mod handle;
mod runtime;
mod spawn;

pub use error::GuestError;
pub use handle::GuestHandle;
pub use runtime::{EventListener, GuestRuntime, INVOKE_TIMEOUT};
pub use spawn::spawn_guest;
