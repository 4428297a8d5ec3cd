// =============================================================================
// Kill Switch — single-set latch that halts all trading
// =============================================================================
//
// Activation is one-way: the first trigger wins, later triggers are
// ignored. Registered callbacks fire exactly once, in registration
// (priority) order, on the activating thread. Every entry point consults
// `is_active` before performing side effects.
// =============================================================================

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::types::{KillReason, TimestampMs};

/// Serialisable snapshot of the switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchState {
    pub active: bool,
    pub reason: Option<String>,
    pub triggered_by: Option<KillReason>,
    pub triggered_at: Option<TimestampMs>,
}

type Callback = Box<dyn Fn(KillReason) + Send + Sync>;

struct Inner {
    active: bool,
    reason: Option<String>,
    triggered_by: Option<KillReason>,
    triggered_at: Option<TimestampMs>,
}

/// The engine-wide kill latch.
pub struct KillSwitch {
    clock: SharedClock,
    state: RwLock<Inner>,
    callbacks: Mutex<Vec<(String, Callback)>>,
}

impl KillSwitch {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            state: RwLock::new(Inner {
                active: false,
                reason: None,
                triggered_by: None,
                triggered_at: None,
            }),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback fired once on activation. Registration order is
    /// priority order.
    pub fn on_activate(&self, name: impl Into<String>, cb: impl Fn(KillReason) + Send + Sync + 'static) {
        self.callbacks.lock().push((name.into(), Box::new(cb)));
    }

    /// Activate the switch. Only the first call has any effect; it returns
    /// true. Callbacks run before this returns.
    pub fn activate(&self, triggered_by: KillReason, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        {
            let mut state = self.state.write();
            if state.active {
                return false;
            }
            state.active = true;
            state.reason = Some(reason.clone());
            state.triggered_by = Some(triggered_by);
            state.triggered_at = Some(self.clock.now_ms());
        }

        warn!(reason = %reason, triggered_by = %triggered_by, "KILL SWITCH ACTIVATED");

        let callbacks = self.callbacks.lock();
        for (name, cb) in callbacks.iter() {
            info!(callback = %name, "running kill-switch callback");
            cb(triggered_by);
        }
        true
    }

    pub fn is_active(&self) -> bool {
        self.state.read().active
    }

    pub fn state(&self) -> KillSwitchState {
        let s = self.state.read();
        KillSwitchState {
            active: s.active,
            reason: s.reason.clone(),
            triggered_by: s.triggered_by,
            triggered_at: s.triggered_at,
        }
    }
}

impl std::fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.read();
        f.debug_struct("KillSwitch")
            .field("active", &s.active)
            .field("triggered_by", &s.triggered_by)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn first_activation_wins() {
        let ks = KillSwitch::new(SimClock::new(42_000));
        assert!(ks.activate(KillReason::DailyLoss, "limit hit"));
        assert!(!ks.activate(KillReason::Manual, "too late"));

        let state = ks.state();
        assert!(state.active);
        assert_eq!(state.triggered_by, Some(KillReason::DailyLoss));
        assert_eq!(state.reason.as_deref(), Some("limit hit"));
        assert_eq!(state.triggered_at, Some(42_000));
    }

    #[test]
    fn callbacks_fire_once_in_order() {
        let ks = KillSwitch::new(SimClock::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        for name in ["first", "second", "third"] {
            let order = order.clone();
            let calls = calls.clone();
            ks.on_activate(name, move |_| {
                order.lock().push(name);
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        ks.activate(KillReason::RpcFailure, "stream down");
        ks.activate(KillReason::Manual, "ignored");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn inactive_by_default() {
        let ks = KillSwitch::new(SimClock::new(0));
        assert!(!ks.is_active());
        assert!(ks.state().reason.is_none());
    }
}
