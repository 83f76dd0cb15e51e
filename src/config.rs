use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
///
/// Loaded once per process lifetime. Missing or invalid sections fall back
/// to documented defaults rather than failing startup; an empty whitelist
/// means no restriction is configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub probe: ProbeConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/lanwarden/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("lanwarden/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the audit log path
    pub fn log_path(&self) -> PathBuf {
        PathBuf::from(&self.general.log_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Seconds between scan cycles
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Run cycles on the timer; false means manual refresh only
    #[serde(default = "default_true")]
    pub auto_refresh: bool,

    /// Path to the append-only audit CSV
    #[serde(default = "default_log_path")]
    pub log_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds after which an unobserved device is inferred offline
    #[serde(default = "default_staleness")]
    pub staleness_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            auto_refresh: true,
            log_path: default_log_path(),
            log_level: default_log_level(),
            staleness_secs: default_staleness(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Whether whitelist evaluation is active at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Authorized identities: exact MACs or prefixes (OUI-style).
    /// Empty means everything is authorized.
    #[serde(default)]
    pub whitelist: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            whitelist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Kernel ARP table location (overridable for tests)
    #[serde(default = "default_arp_table_path")]
    pub arp_table_path: String,

    /// Optional /24 network to sweep, e.g. "192.168.1.0/24"
    #[serde(default)]
    pub sweep_network: Option<String>,

    /// Known-infrastructure addresses probed every cycle even when a
    /// network sweep is off; these report unreachability
    #[serde(default)]
    pub sweep_targets: Vec<String>,

    /// Per-probe echo timeout in milliseconds
    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,

    /// Reverse-resolve display names for newly seen devices
    #[serde(default = "default_true")]
    pub resolve_hostnames: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            arp_table_path: default_arp_table_path(),
            sweep_network: None,
            sweep_targets: Vec::new(),
            timeout_ms: default_probe_timeout(),
            resolve_hostnames: true,
        }
    }
}

// Default value functions
fn default_scan_interval() -> u64 {
    30
}

fn default_log_path() -> String {
    "/var/log/lanwarden/audit.csv".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_staleness() -> u64 {
    90
}

fn default_arp_table_path() -> String {
    "/proc/net/arp".to_string()
}

fn default_probe_timeout() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.scan_interval_secs, 30);
        assert_eq!(config.general.staleness_secs, 90);
        assert!(config.security.enabled);
        assert!(config.security.whitelist.is_empty());
        assert_eq!(config.probe.arp_table_path, "/proc/net/arp");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.general.log_path, config.general.log_path);
        assert_eq!(parsed.probe.timeout_ms, config.probe.timeout_ms);
    }

    #[test]
    fn test_partial_config_gets_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [security]
            whitelist = ["aa:bb:cc"]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.security.whitelist, vec!["aa:bb:cc".to_string()]);
        assert_eq!(parsed.general.scan_interval_secs, 30);
        assert!(parsed.probe.resolve_hostnames);
    }
}
