//! Device-detection gate
//!
//! Owns the "detection enabled" flag and the probe cooldown as one value
//! object instead of ambient module state. The inventory consults it before
//! touching the USB bus; the flash engine suspends it for the duration of a
//! job and the suspension guard restores the prior state unconditionally.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::defaults;

/// Rate-limit and enable/disable gate for hardware probes
#[derive(Debug)]
pub struct DetectionGate {
    cooldown: Duration,
    state: Mutex<GateState>,
}

#[derive(Debug)]
struct GateState {
    enabled: bool,
    last_probe: Option<Instant>,
}

impl DetectionGate {
    /// Gate with a custom cooldown (tests use short ones)
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: Mutex::new(GateState {
                enabled: true,
                last_probe: None,
            }),
        }
    }

    /// Whether unforced probes are currently allowed at all
    pub fn is_enabled(&self) -> bool {
        self.state.lock().expect("gate state poisoned").enabled
    }

    /// Set the enabled flag, returning the prior value.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let mut state = self.state.lock().expect("gate state poisoned");
        std::mem::replace(&mut state.enabled, enabled)
    }

    /// Decide whether a probe may run now. A forced probe always passes;
    /// an unforced one passes only when the gate is enabled and the cooldown
    /// has elapsed. Passing stamps the probe time.
    pub fn try_probe(&self, force: bool) -> bool {
        let mut state = self.state.lock().expect("gate state poisoned");

        if !force {
            if !state.enabled {
                return false;
            }
            if let Some(last) = state.last_probe {
                if last.elapsed() < self.cooldown {
                    return false;
                }
            }
        }

        state.last_probe = Some(Instant::now());
        true
    }

    /// Disable detection for the lifetime of the returned guard. Dropping
    /// the guard restores whatever the flag was before, success or failure.
    pub fn suspend(self: &Arc<Self>) -> DetectionSuspension {
        let prior = self.set_enabled(false);
        DetectionSuspension {
            gate: Arc::clone(self),
            prior,
        }
    }
}

impl Default for DetectionGate {
    fn default() -> Self {
        Self::new(defaults::DETECT_COOLDOWN)
    }
}

/// Guard restoring the gate's prior enabled state on drop
#[derive(Debug)]
pub struct DetectionSuspension {
    gate: Arc<DetectionGate>,
    prior: bool,
}

impl Drop for DetectionSuspension {
    fn drop(&mut self) {
        self.gate.set_enabled(self.prior);
    }
}
