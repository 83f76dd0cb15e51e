use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Name shown for a device before reverse lookup resolves anything
pub const UNKNOWN_NAME: &str = "Unknown";

/// Stable key for a tracked device
///
/// A real hardware address when the probe source reported one, otherwise a
/// synthetic key derived from the network address. The synthetic form keeps
/// merging idempotent across cycles for sources (ping sweep) that never see
/// a MAC, at the cost of never correlating such a sighting with a later
/// ARP sighting of the same host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Identity {
    /// Hardware (MAC) address, normalized to lowercase
    Physical(String),
    /// Derived from the network address of an address-only sighting
    Synthetic(String),
}

impl Identity {
    /// Resolve an observation's identity. A missing, empty, or all-zero
    /// hardware address (the kernel's placeholder for incomplete ARP
    /// entries) falls back to a synthetic key over the network address.
    pub fn resolve(physical: Option<&str>, addr: IpAddr) -> Self {
        match physical {
            Some(mac) if !mac.is_empty() && !Self::is_zero_mac(mac) => {
                Identity::Physical(mac.to_ascii_lowercase())
            }
            _ => Identity::Synthetic(addr.to_string()),
        }
    }

    fn is_zero_mac(mac: &str) -> bool {
        mac.chars().all(|c| c == '0' || c == ':' || c == '-')
    }

    pub fn is_physical(&self) -> bool {
        matches!(self, Identity::Physical(_))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::Physical(mac) => write!(f, "{}", mac),
            Identity::Synthetic(addr) => write!(f, "ip:{}", addr),
        }
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        match s.strip_prefix("ip:") {
            Some(addr) => Identity::Synthetic(addr.to_string()),
            None => Identity::Physical(s),
        }
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.to_string()
    }
}

impl std::str::FromStr for Identity {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Identity::from(s.to_string()))
    }
}

/// Which probe source produced an observation. Order matters for in-cycle
/// deduplication: the ARP table carries hardware identities and wins over
/// the sweep for the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservationSource {
    ArpTable,
    PingSweep,
}

/// One raw sighting from a probe source, before reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
    pub addr: IpAddr,
    /// Hardware address, if the source knows one
    pub physical: Option<String>,
    pub reachable: bool,
    /// Round-trip time of the echo probe, when it answered
    pub rtt_ms: Option<f64>,
    pub source: ObservationSource,
}

impl RawObservation {
    pub fn reachable(
        addr: IpAddr,
        physical: Option<String>,
        rtt_ms: f64,
        source: ObservationSource,
    ) -> Self {
        Self {
            addr,
            physical,
            reachable: true,
            rtt_ms: Some(rtt_ms),
            source,
        }
    }

    pub fn unreachable(addr: IpAddr, physical: Option<String>, source: ObservationSource) -> Self {
        Self {
            addr,
            physical,
            reachable: false,
            rtt_ms: None,
            source,
        }
    }
}

/// A tracked host in the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub identity: Identity,
    /// Current network address; may change across cycles while the
    /// identity stays the same
    pub addr: IpAddr,
    pub display_name: String,
    /// Link-quality estimate derived from RTT, bounded to -100..-30
    pub signal_score: i16,
    pub online: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Number of cycles this device has been observed in
    pub scan_count: u64,
    /// Measurement reliability in [0, 1]
    pub confidence: f64,
    pub authorized: bool,
}

impl Device {
    pub fn status_str(&self) -> &'static str {
        if self.online {
            "Online"
        } else {
            "Offline"
        }
    }
}

/// Transition event emitted by the registry during reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A previously unseen identity entered the registry this cycle
    DeviceCreated {
        identity: Identity,
        addr: IpAddr,
        authorized: bool,
    },
}

/// Outcome of one reconcile pass
#[derive(Debug, Clone, Default)]
pub struct CycleResult {
    /// Shared timestamp for every registry update and audit row of the cycle
    pub timestamp: DateTime<Utc>,
    /// Observations merged into the registry
    pub observed: usize,
    /// Malformed or duplicate observations discarded
    pub dropped: usize,
    /// Creation events for the alerter
    pub created: Vec<RegistryEvent>,
    /// Per-device signal samples for the history tracker
    pub samples: Vec<(Identity, i16)>,
}

/// Filter predicate for registry snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceFilter {
    #[default]
    All,
    Online,
    Offline,
    Unauthorized,
}

impl DeviceFilter {
    pub fn matches(&self, device: &Device) -> bool {
        match self {
            DeviceFilter::All => true,
            DeviceFilter::Online => device.online,
            DeviceFilter::Offline => !device.online,
            DeviceFilter::Unauthorized => !device.authorized,
        }
    }
}

impl std::fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceFilter::All => write!(f, "all"),
            DeviceFilter::Online => write!(f, "online"),
            DeviceFilter::Offline => write!(f, "offline"),
            DeviceFilter::Unauthorized => write!(f, "unauthorized"),
        }
    }
}

impl std::str::FromStr for DeviceFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(DeviceFilter::All),
            "online" => Ok(DeviceFilter::Online),
            "offline" => Ok(DeviceFilter::Offline),
            "unauthorized" => Ok(DeviceFilter::Unauthorized),
            other => Err(format!("Unknown filter: {}", other)),
        }
    }
}

/// One-shot notification for an unauthorized first sighting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub identity: Identity,
    pub addr: IpAddr,
    pub raised_at: DateTime<Utc>,
}
