use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ProbeConfig;
use crate::models::{ObservationSource, RawObservation};

/// What one probe source saw this cycle
#[derive(Debug, Default)]
pub struct ProbeReport {
    pub observations: Vec<RawObservation>,
    /// Entries that could not be parsed into an observation
    pub malformed: usize,
}

/// A discovery source polled once per scan cycle
#[async_trait]
pub trait ProbeSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn collect(&self) -> Result<ProbeReport>;
}

/// Build the configured sources, ARP table first (its observations win
/// in-cycle deduplication).
pub fn sources_from_config(config: &ProbeConfig) -> Result<Vec<Box<dyn ProbeSource>>> {
    let mut sources: Vec<Box<dyn ProbeSource>> = Vec::new();
    sources.push(Box::new(ArpTableSource::new(
        &config.arp_table_path,
        config.timeout_ms,
    )?));

    let sweep = PingSweepSource::new(
        config.sweep_network.as_deref(),
        &config.sweep_targets,
        config.timeout_ms,
    )?;
    if !sweep.is_empty() {
        sources.push(Box::new(sweep));
    }
    Ok(sources)
}

/// Echo-probe a single address; `None` on timeout or send failure
pub async fn probe_rtt(addr: IpAddr, timeout_ms: u64) -> Option<f64> {
    let payload = [0u8; 56];
    match timeout(Duration::from_millis(timeout_ms), surge_ping::ping(addr, &payload)).await {
        Ok(Ok((_packet, duration))) => Some(duration.as_secs_f64() * 1000.0),
        Ok(Err(e)) => {
            debug!("Ping error for {}: {}", addr, e);
            None
        }
        Err(_) => None,
    }
}

/// Best-effort reverse DNS via the system resolver
pub async fn resolve_hostname(addr: IpAddr, timeout_ms: u64) -> Option<String> {
    let lookup = tokio::process::Command::new("nslookup")
        .arg(addr.to_string())
        .output();
    let output = timeout(Duration::from_millis(timeout_ms), lookup)
        .await
        .ok()?
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let response = String::from_utf8_lossy(&output.stdout);
    for line in response.lines() {
        if let Some(name_start) = line.find("name = ") {
            let hostname = line[name_start + 7..].trim().trim_end_matches('.');
            if !hostname.is_empty() && hostname != addr.to_string() {
                return Some(hostname.to_string());
            }
        }
    }
    None
}

/// Snapshot of the kernel's address-resolution table
///
/// Each parsed entry is echo-probed for reachability and RTT. Incomplete
/// entries (flags 0x0 or an all-zero MAC) carry no usable hardware
/// identity and are reported address-only.
pub struct ArpTableSource {
    path: PathBuf,
    timeout_ms: u64,
    line_pattern: Regex,
}

impl ArpTableSource {
    pub fn new<P: Into<PathBuf>>(path: P, timeout_ms: u64) -> Result<Self> {
        // IP address, HW type, Flags, HW address, Mask, Device
        let line_pattern = Regex::new(
            r"^(?P<ip>\S+)\s+0x\w+\s+(?P<flags>0x\w+)\s+(?P<mac>[0-9a-fA-F:]+)\s+",
        )
        .context("Failed to compile ARP table regex")?;

        Ok(Self {
            path: path.into(),
            timeout_ms,
            line_pattern,
        })
    }

    /// Parse one table; returns (address, hardware address) pairs and the
    /// count of unparseable lines
    fn parse_table(&self, content: &str) -> (Vec<(IpAddr, Option<String>)>, usize) {
        let mut entries = Vec::new();
        let mut malformed = 0;

        for line in content.lines().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            let Some(captures) = self.line_pattern.captures(line) else {
                debug!("Unparseable ARP entry: {}", line);
                malformed += 1;
                continue;
            };

            let ip_str = captures.name("ip").map(|m| m.as_str()).unwrap_or_default();
            let Ok(addr) = ip_str.parse::<IpAddr>() else {
                debug!("Bad address in ARP entry: {}", ip_str);
                malformed += 1;
                continue;
            };

            let flags = captures.name("flags").map(|m| m.as_str()).unwrap_or("0x0");
            let mac = captures.name("mac").map(|m| m.as_str()).unwrap_or_default();
            let physical = if flags == "0x0" {
                // Incomplete entry, the MAC field is a placeholder
                None
            } else {
                Some(mac.to_ascii_lowercase())
            };

            entries.push((addr, physical));
        }

        (entries, malformed)
    }
}

#[async_trait]
impl ProbeSource for ArpTableSource {
    fn name(&self) -> &'static str {
        "arp-table"
    }

    async fn collect(&self) -> Result<ProbeReport> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read ARP table: {}", self.path.display()))?;

        let (entries, malformed) = self.parse_table(&content);

        // Independent targets: probe them concurrently
        let timeout_ms = self.timeout_ms;
        let mut handles = Vec::with_capacity(entries.len());
        for (addr, physical) in entries {
            handles.push(tokio::spawn(async move {
                match probe_rtt(addr, timeout_ms).await {
                    Some(rtt) => {
                        RawObservation::reachable(addr, physical, rtt, ObservationSource::ArpTable)
                    }
                    None => RawObservation::unreachable(addr, physical, ObservationSource::ArpTable),
                }
            }));
        }

        let mut observations = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(obs) = handle.await {
                observations.push(obs);
            }
        }

        debug!(
            "ARP table yielded {} observations ({} malformed)",
            observations.len(),
            malformed
        );
        Ok(ProbeReport {
            observations,
            malformed,
        })
    }
}

/// ICMP sweep over a /24 network plus explicit infrastructure targets
///
/// Network-derived addresses only produce an observation when they answer;
/// explicit targets are known infrastructure and report unreachability too,
/// so a router going dark transitions Offline instead of vanishing.
pub struct PingSweepSource {
    network_targets: Vec<IpAddr>,
    fixed_targets: Vec<IpAddr>,
    timeout_ms: u64,
}

impl PingSweepSource {
    pub fn new(network: Option<&str>, targets: &[String], timeout_ms: u64) -> Result<Self> {
        let mut network_targets = Vec::new();
        if let Some(net) = network.filter(|n| !n.is_empty()) {
            network_targets = expand_slash24(net)
                .with_context(|| format!("Invalid sweep network: {}", net))?;
        }

        let mut fixed_targets = Vec::new();
        for target in targets {
            match target.parse::<IpAddr>() {
                Ok(addr) => fixed_targets.push(addr),
                Err(_) => warn!("Ignoring invalid sweep target: {}", target),
            }
        }

        Ok(Self {
            network_targets,
            fixed_targets,
            timeout_ms,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.network_targets.is_empty() && self.fixed_targets.is_empty()
    }
}

#[async_trait]
impl ProbeSource for PingSweepSource {
    fn name(&self) -> &'static str {
        "ping-sweep"
    }

    async fn collect(&self) -> Result<ProbeReport> {
        let timeout_ms = self.timeout_ms;
        let mut handles = Vec::new();

        for &addr in &self.network_targets {
            handles.push(tokio::spawn(async move {
                probe_rtt(addr, timeout_ms)
                    .await
                    .map(|rtt| RawObservation::reachable(addr, None, rtt, ObservationSource::PingSweep))
            }));
        }
        for &addr in &self.fixed_targets {
            handles.push(tokio::spawn(async move {
                Some(match probe_rtt(addr, timeout_ms).await {
                    Some(rtt) => {
                        RawObservation::reachable(addr, None, rtt, ObservationSource::PingSweep)
                    }
                    None => RawObservation::unreachable(addr, None, ObservationSource::PingSweep),
                })
            }));
        }

        let mut observations = Vec::new();
        for handle in handles {
            if let Ok(Some(obs)) = handle.await {
                observations.push(obs);
            }
        }

        debug!("Sweep yielded {} observations", observations.len());
        Ok(ProbeReport {
            observations,
            malformed: 0,
        })
    }
}

/// Expand a `a.b.c.0/24` network into its 254 host addresses
fn expand_slash24(network: &str) -> Option<Vec<IpAddr>> {
    let base = network.strip_suffix("/24")?;
    let base_ip = Ipv4Addr::from_str(base).ok()?;
    let octets = base_ip.octets();
    Some(
        (1..255)
            .map(|host| IpAddr::V4(Ipv4Addr::new(octets[0], octets[1], octets[2], host)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARP_TABLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         a4:91:b1:0c:22:01     *        wlan0
192.168.1.50     0x1         0x0         00:00:00:00:00:00     *        wlan0
not-an-address   0x1         0x2         aa:bb:cc:dd:ee:ff     *        wlan0
garbage line
192.168.1.7      0x1         0x2         AA:BB:CC:11:22:33     *        eth0
";

    #[test]
    fn test_arp_table_parsing() {
        let source = ArpTableSource::new("/proc/net/arp", 1000).unwrap();
        let (entries, malformed) = source.parse_table(ARP_TABLE);

        assert_eq!(malformed, 2);
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].0.to_string(), "192.168.1.1");
        assert_eq!(entries[0].1.as_deref(), Some("a4:91:b1:0c:22:01"));

        // Incomplete entry keeps the address but no hardware identity
        assert_eq!(entries[1].0.to_string(), "192.168.1.50");
        assert_eq!(entries[1].1, None);

        // MAC normalized to lowercase
        assert_eq!(entries[2].1.as_deref(), Some("aa:bb:cc:11:22:33"));
    }

    #[test]
    fn test_slash24_expansion() {
        let addrs = expand_slash24("192.168.1.0/24").unwrap();
        assert_eq!(addrs.len(), 254);
        assert_eq!(addrs[0].to_string(), "192.168.1.1");
        assert_eq!(addrs[253].to_string(), "192.168.1.254");

        assert!(expand_slash24("192.168.1.0/16").is_none());
        assert!(expand_slash24("bogus/24").is_none());
    }

    #[test]
    fn test_sweep_source_target_setup() {
        let source = PingSweepSource::new(
            None,
            &["192.168.1.1".to_string(), "not-an-ip".to_string()],
            1000,
        )
        .unwrap();
        assert_eq!(source.fixed_targets.len(), 1);
        assert!(!source.is_empty());

        let empty = PingSweepSource::new(None, &[], 1000).unwrap();
        assert!(empty.is_empty());
    }
}
