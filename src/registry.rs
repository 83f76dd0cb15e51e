use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use tracing::{debug, info};

use crate::authorize;
use crate::config::SecurityConfig;
use crate::models::{
    CycleResult, Device, DeviceFilter, Identity, RawObservation, RegistryEvent, UNKNOWN_NAME,
};
use crate::signal;

/// Identity-stable device registry
///
/// The single shared mutable resource of the engine. One writer runs
/// `reconcile` per cycle; readers take whole-registry snapshots. Devices
/// are never deleted: one that stops being observed simply stops being
/// refreshed, and is inferred offline once it exceeds the staleness window.
#[derive(Debug, Default)]
pub struct Registry {
    devices: HashMap<Identity, Device>,
    /// Malformed observations discarded since startup
    dropped_total: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one cycle's observations into the registry.
    ///
    /// Observations are processed in source order (ARP table first, then
    /// sweep); when both sources report the same address in a cycle, the
    /// first observation wins and the rest are discarded. A second
    /// observation resolving to an already-processed identity (a
    /// multi-homed host) only refreshes the address so the scan count
    /// advances at most once per cycle.
    pub fn reconcile(
        &mut self,
        observations: Vec<RawObservation>,
        now: DateTime<Utc>,
        security: &SecurityConfig,
        staleness_secs: u64,
    ) -> CycleResult {
        let mut result = CycleResult {
            timestamp: now,
            ..Default::default()
        };

        let mut seen_addrs: HashSet<IpAddr> = HashSet::new();
        let mut seen_identities: HashSet<Identity> = HashSet::new();

        for obs in observations {
            if !seen_addrs.insert(obs.addr) {
                debug!("Discarding duplicate observation for {}", obs.addr);
                result.dropped += 1;
                continue;
            }

            let identity = Identity::resolve(obs.physical.as_deref(), obs.addr);

            if !seen_identities.insert(identity.clone()) {
                // Same identity under a second address this cycle
                if let Some(device) = self.devices.get_mut(&identity) {
                    device.addr = obs.addr;
                }
                continue;
            }

            let estimate = signal::estimate(if obs.reachable { obs.rtt_ms } else { None });
            let authorized = authorize::is_authorized(
                &identity.to_string(),
                &security.whitelist,
                security.enabled,
            );

            match self.devices.get_mut(&identity) {
                Some(device) => {
                    device.scan_count += 1;
                    device.authorized = authorized;
                    if estimate.online {
                        device.addr = obs.addr;
                        device.signal_score = estimate.score;
                        device.online = true;
                        device.last_seen = now;
                        device.confidence = signal::confidence(estimate.score, true);
                    } else {
                        // Offline: keep last known score/address/name,
                        // last_seen stops advancing
                        device.online = false;
                        device.confidence = signal::confidence(device.signal_score, false);
                    }
                    result.samples.push((identity, device.signal_score));
                }
                None => {
                    let device = Device {
                        identity: identity.clone(),
                        addr: obs.addr,
                        display_name: UNKNOWN_NAME.to_string(),
                        signal_score: estimate.score,
                        online: estimate.online,
                        first_seen: now,
                        last_seen: now,
                        scan_count: 1,
                        confidence: signal::confidence(estimate.score, estimate.online),
                        authorized,
                    };
                    info!(
                        "New device {} at {} ({})",
                        identity,
                        obs.addr,
                        device.status_str()
                    );
                    result.created.push(RegistryEvent::DeviceCreated {
                        identity: identity.clone(),
                        addr: obs.addr,
                        authorized,
                    });
                    result.samples.push((identity.clone(), device.signal_score));
                    self.devices.insert(identity, device);
                }
            }

            result.observed += 1;
        }

        self.mark_stale(now, staleness_secs, &seen_identities);
        self.dropped_total += result.dropped as u64;

        result
    }

    /// Infer absence: a device not observed this cycle whose last sighting
    /// is older than the staleness window goes offline without an explicit
    /// failed probe.
    fn mark_stale(&mut self, now: DateTime<Utc>, staleness_secs: u64, observed: &HashSet<Identity>) {
        let cutoff = now - chrono::Duration::seconds(staleness_secs as i64);
        for device in self.devices.values_mut() {
            if device.online && !observed.contains(&device.identity) && device.last_seen < cutoff {
                debug!(
                    "Device {} unseen since {}, marking offline",
                    device.identity, device.last_seen
                );
                device.online = false;
                device.confidence = signal::confidence(device.signal_score, false);
            }
        }
    }

    /// Attach a resolved hostname to a device
    pub fn set_display_name(&mut self, identity: &Identity, name: String) {
        if let Some(device) = self.devices.get_mut(identity) {
            device.display_name = name;
        }
    }

    pub fn get(&self, identity: &Identity) -> Option<&Device> {
        self.devices.get(identity)
    }

    /// Point-in-time view of the registry, filtered, sorted by address for
    /// stable output
    pub fn snapshot(&self, filter: DeviceFilter) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        devices.sort_by_key(|d| d.addr);
        devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }
}
