//! The textual command surface the host's CLI binds.

use tracing::warn;

use vqueue_core::MoleculeId;

use crate::engine::EngineHandle;

/// `vqueue_enqueue <priority> <mode>+ <atom>+`
///
/// Returns the molecule id (always ≥ 1), or 0 when the command is
/// rejected; the reason is logged.
pub fn vqueue_enqueue(handle: &EngineHandle, args: &str) -> MoleculeId {
    match handle.enqueue(args) {
        Ok(id) => id,
        Err(err) => {
            warn!(%err, args, "vqueue_enqueue rejected");
            0
        }
    }
}

/// `vqueue_stop <id>` — cancels one molecule; unknown ids are ignored.
pub fn vqueue_stop(handle: &EngineHandle, args: &str) {
    match args.trim().parse::<MoleculeId>() {
        Ok(id) => handle.stop(id),
        Err(_) => warn!(args, "vqueue_stop needs a numeric id"),
    }
}

/// `vqueue_cancel <priority>` — discards a whole lane; unknown priorities
/// are ignored.
pub fn vqueue_cancel(handle: &EngineHandle, args: &str) {
    match args.trim().parse::<u8>() {
        Ok(priority) => handle.cancel_priority(priority),
        Err(_) => warn!(args, "vqueue_cancel needs a numeric priority"),
    }
}
