use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level daemon configuration, loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Path of the JSON lease snapshot. Empty disables persistence.
    #[serde(default)]
    pub lease_file: String,

    #[serde(default)]
    pub networks: Vec<Network>,
}

/// One served network segment, bound to a single interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub interface: String,

    /// First address of the dynamic pool, dotted quad.
    pub start_ip: String,

    /// Number of addresses in the pool.
    pub range: usize,

    pub net_mask: String,

    /// Default lease duration, e.g. "20m" or "1h".
    #[serde(with = "humantime_serde")]
    pub lease_duration: Duration,

    #[serde(default)]
    pub dns_servers: Vec<String>,

    #[serde(default)]
    pub static_leases: Vec<StaticLeaseEntry>,
}

/// A fixed MAC-to-IP reservation from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticLeaseEntry {
    pub mac: String,
    pub name: String,
    pub ip: String,
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for network in &self.networks {
            if network.range == 0 {
                return Err(Error::InvalidConfig(format!(
                    "range must be at least 1 on {}",
                    network.interface
                )));
            }

            if network.lease_duration.is_zero() {
                return Err(Error::InvalidConfig(format!(
                    "lease_duration must be greater than 0 on {}",
                    network.interface
                )));
            }

            let mut seen_macs: HashSet<String> = HashSet::new();
            let mut seen_ips: HashSet<&str> = HashSet::new();
            for entry in &network.static_leases {
                if !seen_macs.insert(normalize_mac(&entry.mac)) {
                    return Err(Error::InvalidConfig(format!(
                        "duplicate MAC address in static leases: {}",
                        entry.mac
                    )));
                }
                if !seen_ips.insert(entry.ip.as_str()) {
                    return Err(Error::InvalidConfig(format!(
                        "duplicate IP address in static leases: {}",
                        entry.ip
                    )));
                }
            }
        }

        Ok(())
    }
}

pub fn normalize_mac(mac: &str) -> String {
    mac.to_lowercase().replace('-', ":")
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
lease_file = "/var/lib/dhcpeterd/leases.json"

[[networks]]
interface = "eth0"
start_ip = "10.0.0.10"
range = 50
net_mask = "255.255.255.0"
lease_duration = "20m"
dns_servers = ["10.0.0.1", "9.9.9.9"]

[[networks.static_leases]]
mac = "aa:bb:cc:00:00:02"
name = "printer"
ip = "10.0.0.12"
"#;

    #[test]
    fn test_parse_example() {
        let config: Config = toml::from_str(EXAMPLE).unwrap();
        assert_eq!(config.lease_file, "/var/lib/dhcpeterd/leases.json");
        assert_eq!(config.networks.len(), 1);

        let network = &config.networks[0];
        assert_eq!(network.interface, "eth0");
        assert_eq!(network.start_ip, "10.0.0.10");
        assert_eq!(network.range, 50);
        assert_eq!(network.lease_duration, Duration::from_secs(20 * 60));
        assert_eq!(network.dns_servers.len(), 2);
        assert_eq!(network.static_leases[0].name, "printer");

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_lease_file_by_default() {
        let config: Config = toml::from_str("networks = []").unwrap();
        assert!(config.lease_file.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_range() {
        let mut config: Config = toml::from_str(EXAMPLE).unwrap();
        config.networks[0].range = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_duration() {
        let mut config: Config = toml::from_str(EXAMPLE).unwrap();
        config.networks[0].lease_duration = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_static_leases() {
        let mut config: Config = toml::from_str(EXAMPLE).unwrap();
        config.networks[0].static_leases.push(StaticLeaseEntry {
            mac: "AA-BB-CC-00-00-02".to_string(),
            name: "printer2".to_string(),
            ip: "10.0.0.13".to_string(),
        });
        // Same MAC in a different spelling.
        assert!(config.validate().is_err());

        config.networks[0].static_leases[1].mac = "aa:bb:cc:00:00:03".to_string();
        config.networks[0].static_leases[1].ip = "10.0.0.12".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac("AA-BB-CC-DD-EE-FF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee:ff"), "aa:bb:cc:dd:ee:ff");
    }
}
