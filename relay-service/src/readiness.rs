//! Readiness gate for `/health`.
//!
//! A local stand-in for the shared `StartedServices` helper the hosting
//! binary would otherwise register slow-starting background services with:
//! each service registers itself at startup and is handed back a
//! [`ServiceHandle`] to flip once it finished initializing; `/health`
//! reports `200` only once every registered service has done so.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// A handle a background service uses to record that it finished starting.
#[derive(Clone)]
pub struct ServiceHandle(Arc<AtomicBool>);

impl ServiceHandle {
    /// Marks the owning service as started.
    pub fn mark_started(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Aggregates the started/not-started state of every service registered
/// against it.
#[derive(Clone, Default)]
pub struct Readiness {
    services: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
}

impl Readiness {
    /// Registers a new service, not-started by default, returning the handle
    /// it uses to flip itself to started.
    pub fn new_service(&self) -> ServiceHandle {
        let flag = Arc::new(AtomicBool::new(false));
        self.services.lock().push(flag.clone());
        ServiceHandle(flag)
    }

    /// Whether every registered service has marked itself started.
    pub fn all_started(&self) -> bool {
        self.services
            .lock()
            .iter()
            .all(|flag| flag.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_ready_only_once_every_service_started() {
        let readiness = Readiness::default();
        assert!(readiness.all_started());

        let a = readiness.new_service();
        let b = readiness.new_service();
        assert!(!readiness.all_started());

        a.mark_started();
        assert!(!readiness.all_started());

        b.mark_started();
        assert!(readiness.all_started());
    }
}
