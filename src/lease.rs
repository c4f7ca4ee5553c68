//! Lease records.
//!
//! A [`Lease`] binds a client hardware address to one offset of the
//! configured address pool. Leases are the unit of persistence: the handler
//! publishes complete snapshots of them on every mutation, and restores them
//! once at startup.

use std::net::Ipv4Addr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// How long after the last ACK a lease still counts as actively in use.
const ACTIVE_WINDOW_MINUTES: i64 = 20;

/// A dynamic DHCP lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Pool offset relative to the network's start address.
    pub num: usize,

    /// The leased address; always `start_ip + num`.
    pub addr: Ipv4Addr,

    /// Lowercase colon-separated MAC of the owning client.
    pub hardware_addr: String,

    /// Hostname supplied by the client (option 12).
    #[serde(default)]
    pub hostname: String,

    /// Operator-assigned hostname; when non-empty it survives renewals and
    /// shadows whatever the client reports.
    #[serde(default)]
    pub hostname_override: String,

    /// When the lease expires. `None` means the lease is permanent.
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,

    /// Instant of the most recent ACK for this lease.
    #[serde(default)]
    pub last_ack: Option<DateTime<Utc>>,
}

impl Lease {
    /// Returns true if the lease has expired as of `at`.
    ///
    /// Permanent leases never expire.
    pub fn expired(&self, at: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| at > expiry)
    }

    /// Returns true if the client acknowledged this lease recently enough
    /// (within 20 minutes of `at`) to be considered on the network.
    pub fn active(&self, at: DateTime<Utc>) -> bool {
        self.last_ack
            .is_some_and(|ack| at < ack + TimeDelta::minutes(ACTIVE_WINDOW_MINUTES))
    }

    /// Returns true if the lease never expires.
    pub fn permanent(&self) -> bool {
        self.expiry.is_none()
    }
}

/// An operator-configured address reservation. Never expires.
#[derive(Debug, Clone)]
pub struct StaticLease {
    pub addr: Ipv4Addr,
    pub hardware_addr: String,
    pub hostname: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(expiry: Option<DateTime<Utc>>, last_ack: Option<DateTime<Utc>>) -> Lease {
        Lease {
            num: 2,
            addr: Ipv4Addr::new(10, 0, 0, 12),
            hardware_addr: "aa:bb:cc:00:00:01".to_string(),
            hostname: "printer".to_string(),
            hostname_override: String::new(),
            expiry,
            last_ack,
        }
    }

    #[test]
    fn test_expired() {
        let now = Utc::now();

        assert!(lease(Some(now - TimeDelta::seconds(1)), None).expired(now));
        assert!(!lease(Some(now + TimeDelta::seconds(1)), None).expired(now));
        assert!(!lease(Some(now), None).expired(now));

        let permanent = lease(None, None);
        assert!(permanent.permanent());
        assert!(!permanent.expired(now + TimeDelta::days(10_000)));
    }

    #[test]
    fn test_active() {
        let now = Utc::now();

        assert!(!lease(None, None).active(now));
        assert!(lease(None, Some(now)).active(now));
        assert!(lease(None, Some(now - TimeDelta::minutes(19))).active(now));
        assert!(!lease(None, Some(now - TimeDelta::minutes(20))).active(now));
    }

    #[test]
    fn test_json_round_trip() {
        let original = Lease {
            hostname_override: "work-laptop".to_string(),
            expiry: Some(Utc::now()),
            last_ack: Some(Utc::now() - TimeDelta::minutes(3)),
            ..lease(None, None)
        };

        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: Lease = serde_json::from_str(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_json_shape() {
        let encoded = serde_json::to_string(&lease(None, None)).unwrap();
        assert!(encoded.contains("\"addr\":\"10.0.0.12\""));
        assert!(encoded.contains("\"expiry\":null"));
    }
}
