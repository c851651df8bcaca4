//! Single-slot update guard
//!
//! At most one update sequence may run per daemon. The guard is a shared
//! flag; the lock handle clears it on drop, so a failed download or
//! staging step frees the slot again.

use crate::error::{UpdateError, UpdateResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Owner of the update slot
#[derive(Debug, Clone, Default)]
pub struct UpdateGuard {
    busy: Arc<AtomicBool>,
}

impl UpdateGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot, or fail with `Busy` if another update holds it
    pub fn try_acquire(&self) -> UpdateResult<UpdateLock> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Rejected update trigger: another update is in progress");
            return Err(UpdateError::Busy);
        }

        debug!("Update slot acquired");
        Ok(UpdateLock {
            busy: Arc::clone(&self.busy),
        })
    }

    /// Check if an update currently holds the slot
    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Update lock handle - releases the slot on drop
#[derive(Debug)]
pub struct UpdateLock {
    busy: Arc<AtomicBool>,
}

impl UpdateLock {
    /// Keep the slot taken for the rest of the process lifetime.
    ///
    /// Used once the installer is launched: the process is about to exit
    /// and must not start a second update in the meantime.
    pub fn hold_until_exit(self) {
        std::mem::forget(self);
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        debug!("Update slot released");
    }
}
