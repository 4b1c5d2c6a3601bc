//! Arbitration between bulk sync and single-document mutation.
//!
//! Two sections share one lock: `syncing` and `crud_busy`. A mutation that
//! finds a sync round running fails at once with [`Error::Locked`]; a mutation
//! that finds another mutation running waits for it. Waiters park on a
//! [`Notify`] and re-check both flags on every wake-up.

use crate::{error::Result, Error};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Sections {
    syncing: bool,
    crud_busy: bool,
}

/// Two-section gate over the local replica.
#[derive(Debug, Default)]
pub struct SyncCoordinator {
    sections: Mutex<Sections>,
    crud_released: Notify,
}

impl SyncCoordinator {
    /// Create a coordinator with both sections free.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a coordinator wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Whether a sync round currently holds the gate.
    pub fn is_syncing(&self) -> bool {
        self.sections.lock().syncing
    }

    /// Whether a mutation's critical section is in progress.
    pub fn is_crud_busy(&self) -> bool {
        self.sections.lock().crud_busy
    }

    /// Claim the sync section. Returns false if a round is already running.
    pub fn try_start_sync(&self) -> bool {
        let mut sections = self.sections.lock();
        if sections.syncing {
            return false;
        }
        sections.syncing = true;
        true
    }

    /// Release the sync section.
    pub fn end_sync(&self) {
        self.sections.lock().syncing = false;
    }

    /// Claim the mutation section. Returns false if it is busy.
    pub fn try_start_crud(&self) -> bool {
        let mut sections = self.sections.lock();
        if sections.crud_busy {
            return false;
        }
        sections.crud_busy = true;
        true
    }

    /// Release the mutation section and wake waiting mutations.
    pub fn end_crud(&self) {
        self.sections.lock().crud_busy = false;
        self.crud_released.notify_waiters();
    }

    /// Claim the sync section as a guard, or fail with [`Error::Locked`].
    pub fn start_sync(self: &Arc<Self>) -> Result<SyncGuard> {
        if self.try_start_sync() {
            Ok(SyncGuard {
                coordinator: Arc::clone(self),
            })
        } else {
            Err(Error::Locked)
        }
    }

    /// Enter the mutation critical section.
    ///
    /// Fails immediately with [`Error::Locked`] while a sync round runs.
    /// Suspends while another mutation holds the section.
    pub async fn enter_crud_section(self: &Arc<Self>) -> Result<CrudGuard> {
        loop {
            let released = self.crud_released.notified();
            tokio::pin!(released);
            // Register before checking so a release between check and await is not lost
            released.as_mut().enable();

            {
                let mut sections = self.sections.lock();
                if sections.syncing {
                    return Err(Error::Locked);
                }
                if !sections.crud_busy {
                    sections.crud_busy = true;
                    return Ok(CrudGuard {
                        coordinator: Arc::clone(self),
                    });
                }
            }

            tracing::trace!("Mutation section busy, waiting");
            released.await;
        }
    }
}

/// Holds the sync section until dropped.
#[derive(Debug)]
pub struct SyncGuard {
    coordinator: Arc<SyncCoordinator>,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.coordinator.end_sync();
    }
}

/// Holds the mutation section until dropped.
#[derive(Debug)]
pub struct CrudGuard {
    coordinator: Arc<SyncCoordinator>,
}

impl Drop for CrudGuard {
    fn drop(&mut self) {
        self.coordinator.end_crud();
    }
}
