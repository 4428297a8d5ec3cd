// =============================================================================
// Health Monitor — named service checks with degradation thresholds
// =============================================================================
//
// Each registered service reports successes and failures; consecutive
// failures walk it Healthy -> Degraded (3) -> Critical (5). A critical
// failure on a service registered as critical pauses trading via the
// orchestrator's gate; recovery resumes it.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::types::TimestampMs;

const DEGRADED_AFTER: u32 = 3;
const CRITICAL_AFTER: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// Snapshot of one service's health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub status: HealthStatus,
    pub critical_service: bool,
    pub consecutive_failures: u32,
    pub last_ok: Option<TimestampMs>,
    pub last_error: Option<String>,
}

/// Registry of service health checks.
pub struct HealthMonitor {
    clock: SharedClock,
    services: RwLock<HashMap<String, ServiceHealth>>,
}

impl HealthMonitor {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Register a service. `critical_service` marks services whose failure
    /// must pause trading.
    pub fn register(&self, name: impl Into<String>, critical_service: bool) {
        let name = name.into();
        self.services.write().insert(
            name.clone(),
            ServiceHealth {
                name,
                status: HealthStatus::Healthy,
                critical_service,
                consecutive_failures: 0,
                last_ok: None,
                last_error: None,
            },
        );
    }

    pub fn report_ok(&self, name: &str) {
        let mut services = self.services.write();
        if let Some(s) = services.get_mut(name) {
            if s.status != HealthStatus::Healthy {
                info!(service = %name, "service recovered");
            }
            s.status = HealthStatus::Healthy;
            s.consecutive_failures = 0;
            s.last_ok = Some(self.clock.now_ms());
            s.last_error = None;
        }
    }

    pub fn report_failure(&self, name: &str, error: impl Into<String>) {
        let error = error.into();
        let mut services = self.services.write();
        if let Some(s) = services.get_mut(name) {
            s.consecutive_failures += 1;
            s.last_error = Some(error.clone());
            let new_status = if s.consecutive_failures >= CRITICAL_AFTER {
                HealthStatus::Critical
            } else if s.consecutive_failures >= DEGRADED_AFTER {
                HealthStatus::Degraded
            } else {
                s.status
            };
            if new_status != s.status {
                warn!(
                    service = %name,
                    failures = s.consecutive_failures,
                    status = %new_status,
                    error = %error,
                    "service health degraded"
                );
            }
            s.status = new_status;
        }
    }

    /// True when any critical service is in Critical state.
    pub fn any_critical_down(&self) -> bool {
        self.services
            .read()
            .values()
            .any(|s| s.critical_service && s.status == HealthStatus::Critical)
    }

    /// All services, sorted by name for stable display.
    pub fn snapshot(&self) -> Vec<ServiceHealth> {
        let mut v: Vec<ServiceHealth> = self.services.read().values().cloned().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("services", &self.services.read().len())
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

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(SimClock::new(0))
    }

    #[test]
    fn degradation_ladder() {
        let hm = monitor();
        hm.register("event_stream", true);

        for _ in 0..2 {
            hm.report_failure("event_stream", "timeout");
        }
        assert_eq!(hm.snapshot()[0].status, HealthStatus::Healthy);

        hm.report_failure("event_stream", "timeout");
        assert_eq!(hm.snapshot()[0].status, HealthStatus::Degraded);
        assert!(!hm.any_critical_down());

        hm.report_failure("event_stream", "timeout");
        hm.report_failure("event_stream", "timeout");
        assert_eq!(hm.snapshot()[0].status, HealthStatus::Critical);
        assert!(hm.any_critical_down());
    }

    #[test]
    fn recovery_resets_everything() {
        let hm = monitor();
        hm.register("quote_provider", true);
        for _ in 0..6 {
            hm.report_failure("quote_provider", "503");
        }
        assert!(hm.any_critical_down());

        hm.report_ok("quote_provider");
        let s = &hm.snapshot()[0];
        assert_eq!(s.status, HealthStatus::Healthy);
        assert_eq!(s.consecutive_failures, 0);
        assert!(s.last_error.is_none());
        assert!(!hm.any_critical_down());
    }

    #[test]
    fn non_critical_service_never_pauses() {
        let hm = monitor();
        hm.register("dashboard", false);
        for _ in 0..10 {
            hm.report_failure("dashboard", "render");
        }
        assert_eq!(hm.snapshot()[0].status, HealthStatus::Critical);
        assert!(!hm.any_critical_down());
    }
}
