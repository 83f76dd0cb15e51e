use chrono::Utc;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::models::{Alert, RegistryEvent};

/// Retained alert cap; oldest entries are dropped past this
const MAX_ALERTS: usize = 1000;

/// Whitelist check for a device identity.
///
/// Fail-open by design: with security disabled or an empty whitelist there
/// is no restriction configured, so everything is authorized. Otherwise an
/// identity passes on an exact whitelist match or when a whitelist entry is
/// a prefix of it (OUI-style partial matching).
pub fn is_authorized(identity: &str, whitelist: &[String], security_enabled: bool) -> bool {
    if !security_enabled || whitelist.is_empty() {
        return true;
    }
    whitelist
        .iter()
        .any(|entry| identity == entry || identity.starts_with(entry.as_str()))
}

/// Consumes registry creation events and raises one-shot alerts.
///
/// An alert fires exactly once per device lifetime: at the cycle that
/// created it, and only if it was unauthorized at that moment. Later
/// authorization flips never re-alert; the registry still recomputes the
/// status every cycle for filtering.
#[derive(Debug, Default)]
pub struct Alerter {
    alerts: Mutex<Vec<Alert>>,
}

impl Alerter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one cycle's creation events; returns the number of alerts
    /// raised.
    pub fn process(&self, events: &[RegistryEvent]) -> usize {
        let mut raised = 0;
        for event in events {
            let RegistryEvent::DeviceCreated {
                identity,
                addr,
                authorized,
            } = event;

            if *authorized {
                info!("New authorized device {} at {}", identity, addr);
                continue;
            }

            warn!("ALERT: unauthorized device {} first seen at {}", identity, addr);

            let mut alerts = self.alerts.lock().unwrap();
            if alerts.len() >= MAX_ALERTS {
                let drain = alerts.len() - MAX_ALERTS + 1;
                alerts.drain(..drain);
            }
            alerts.push(Alert {
                identity: identity.clone(),
                addr: *addr,
                raised_at: Utc::now(),
            });
            raised += 1;
        }
        raised
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}
