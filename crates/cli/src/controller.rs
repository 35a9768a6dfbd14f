use std::sync::atomic::{AtomicBool, Ordering};

/// Health check state reported to the orchestrator
///
/// Both flags start healthy and are flipped by hand through the HTTP surface
/// to exercise restarts and traffic removal.
#[derive(Debug)]
pub struct Controller {
    liveness: AtomicBool,
    readiness: AtomicBool,
}

impl Controller {
    pub fn new() -> Self {
        Self {
            liveness: AtomicBool::new(true),
            readiness: AtomicBool::new(true),
        }
    }

    pub fn is_live(&self) -> bool {
        self.liveness.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.load(Ordering::SeqCst)
    }

    /// Flip liveness, returning the new value
    pub fn toggle_liveness(&self) -> bool {
        !self.liveness.fetch_xor(true, Ordering::SeqCst)
    }

    /// Flip readiness, returning the new value
    pub fn toggle_readiness(&self) -> bool {
        !self.readiness.fetch_xor(true, Ordering::SeqCst)
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}
