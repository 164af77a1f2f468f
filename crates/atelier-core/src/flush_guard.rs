//! Flush-on-exit.
//!
//! Teardown gives no durability guarantee: the process may be gone before a
//! flushed write reaches the remote store. The guard forces every pending
//! coalesced write out as early as it can and nothing more.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::scheduler::WriteScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Nothing was pending, or the guard was disarmed.
    Idle,
    Flushed { writes: usize },
}

pub struct FlushGuard {
    scheduler: WriteScheduler,
    armed: AtomicBool,
}

impl FlushGuard {
    pub fn new(scheduler: WriteScheduler) -> Self {
        Self {
            scheduler,
            armed: AtomicBool::new(true),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Flush every pending write and wait for the remote calls to settle.
    /// Runs at most once.
    pub async fn on_teardown(&self) -> TeardownOutcome {
        if !self.armed.swap(false, Ordering::SeqCst) {
            return TeardownOutcome::Idle;
        }
        let writes = self.scheduler.pending_count();
        self.scheduler.flush_all().await;
        if writes == 0 {
            TeardownOutcome::Idle
        } else {
            info!("flush_guard: flushed {} pending writes on teardown", writes);
            TeardownOutcome::Flushed { writes }
        }
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// Flush when the process receives Ctrl-C.
    pub fn spawn_on_ctrl_c(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("flush_guard: interrupt received");
                    self.on_teardown().await;
                }
                Err(e) => warn!("flush_guard: cannot listen for interrupt: {}", e),
            }
        })
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        if !self.is_armed() || self.scheduler.pending_count() == 0 {
            return;
        }
        // Detached; whether it completes depends on the runtime outliving us.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let scheduler = self.scheduler.clone();
                handle.spawn(async move { scheduler.flush_all().await });
            }
            Err(_) => warn!(
                "flush_guard: dropped outside a runtime with {} unsent writes",
                self.scheduler.pending_count()
            ),
        }
    }
}
