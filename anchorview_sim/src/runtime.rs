//! Simulated AR tracking runtime.

use anchorview_core::{ReferenceTarget, RuntimeError, TrackingRuntime};
use anchorview_env::AnchorViewContext;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::context::SimContext;

/// Becomes ready at a fixed virtual time and records registered targets.
pub struct SimTrackingRuntime {
    context: Arc<SimContext>,
    /// `None` never becomes ready
    ready_at: Option<Duration>,
    registered: Mutex<Vec<ReferenceTarget>>,
}

impl SimTrackingRuntime {
    pub fn new(context: Arc<SimContext>, ready_at: Option<Duration>) -> Self {
        Self {
            context,
            ready_at,
            registered: Mutex::new(Vec::new()),
        }
    }

    pub fn registered(&self) -> Vec<ReferenceTarget> {
        self.registered.lock().unwrap().clone()
    }
}

impl TrackingRuntime for SimTrackingRuntime {
    fn is_ready(&self) -> bool {
        self.ready_at.is_some_and(|at| self.context.now() >= at)
    }

    fn register_target(&self, target: &ReferenceTarget) -> Result<(), RuntimeError> {
        if target.physical_width_m <= 0.0 {
            return Err(RuntimeError::InvalidImage(format!(
                "physical width must be positive, got {}",
                target.physical_width_m
            )));
        }
        self.registered.lock().unwrap().push(target.clone());
        Ok(())
    }
}
