//! Per-interface DHCP state machine and lease database.
//!
//! The handler owns the lease indices for one interface and turns parsed
//! DHCPv4 requests into reply payloads. It performs no I/O itself: the serve
//! loop feeds it packets and writes whatever it returns, and lease snapshots
//! leave through a [`LeaseSink`] on every mutation.
//!
//! Address pool positions are "offsets": offset `n` corresponds to the
//! address `start_ip + n`. Static reservations mark offsets that the dynamic
//! search must never hand out.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::lease::{Lease, StaticLease};
use crate::options::{DhcpOption, MessageType, OptionCode};
use crate::packet::DhcpPacket;
use crate::vendor;

/// Receives a full snapshot of the lease table after every mutation, plus the
/// lease the mutation touched.
pub trait LeaseSink: Send + Sync {
    fn publish(&self, leases: Vec<Lease>, latest: &Lease);
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Adds `offset` addresses to `start`, big-endian.
pub(crate) fn ip_add(start: Ipv4Addr, offset: i64) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(start).wrapping_add(offset as u32))
}

/// Inclusive count of addresses from `start` to `stop`, big-endian. Negative
/// when `stop` lies below `start`.
pub(crate) fn ip_range(start: Ipv4Addr, stop: Ipv4Addr) -> i64 {
    i64::from(u32::from(stop)) - i64::from(u32::from(start)) + 1
}

#[derive(Default)]
struct LeaseTable {
    by_offset: HashMap<usize, Lease>,
    by_hw: HashMap<String, usize>,
}

impl LeaseTable {
    /// The lease currently owned by `hwaddr`.
    ///
    /// The hardware index may point at an offset that has since been handed
    /// to another client, so the owner is re-checked before trusting it.
    fn lease_for(&self, hwaddr: &str) -> Option<&Lease> {
        let num = self.by_hw.get(hwaddr)?;
        self.by_offset
            .get(num)
            .filter(|lease| lease.hardware_addr == hwaddr)
    }

    fn vacant_or_expired(&self, offset: usize, at: DateTime<Utc>) -> bool {
        self.by_offset
            .get(&offset)
            .is_none_or(|lease| lease.expired(at))
    }
}

pub struct Handler {
    interface: String,
    server_ip: Ipv4Addr,
    start_ip: Ipv4Addr,
    lease_range: usize,
    lease_period: TimeDelta,
    options: BTreeMap<u8, DhcpOption>,
    static_by_hw: HashMap<String, StaticLease>,
    reserved_offsets: HashSet<i64>,
    sink: Option<Box<dyn LeaseSink>>,
    now: Clock,
    rng: Mutex<StdRng>,
    table: Mutex<LeaseTable>,
}

impl Handler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        interface: &str,
        server_ip: Ipv4Addr,
        start_ip: Ipv4Addr,
        netmask: Ipv4Addr,
        lease_range: usize,
        lease_period: Duration,
        dns_servers: &[String],
        static_leases: Vec<StaticLease>,
    ) -> Result<Self> {
        let mut dns = Vec::with_capacity(dns_servers.len());
        for server in dns_servers {
            let ip: Ipv4Addr = server.parse().map_err(|_| {
                Error::InvalidConfig(format!("invalid dns server address: {}", server))
            })?;
            dns.push(ip);
        }

        let lease_period = TimeDelta::from_std(lease_period).map_err(|_| {
            Error::InvalidConfig(format!("lease duration out of range on {}", interface))
        })?;

        let mut static_by_hw = HashMap::new();
        let mut reserved_offsets = HashSet::new();
        for static_lease in static_leases {
            reserved_offsets.insert(ip_range(start_ip, static_lease.addr));
            static_by_hw.insert(static_lease.hardware_addr.to_lowercase(), static_lease);
        }

        let mut options = BTreeMap::new();
        options.insert(
            OptionCode::SubnetMask as u8,
            DhcpOption::SubnetMask(netmask),
        );
        options.insert(
            OptionCode::Router as u8,
            DhcpOption::Router(vec![server_ip]),
        );
        options.insert(
            OptionCode::DomainNameServer as u8,
            DhcpOption::DomainNameServer(dns),
        );
        options.insert(
            OptionCode::ServerIdentifier as u8,
            DhcpOption::ServerIdentifier(server_ip),
        );

        info!(
            "handler on {}: server {}, pool {} + {}, default lease {}s",
            interface,
            server_ip,
            start_ip,
            lease_range,
            lease_period.num_seconds()
        );

        Ok(Self {
            interface: interface.to_string(),
            server_ip,
            start_ip,
            lease_range,
            lease_period,
            options,
            static_by_hw,
            reserved_offsets,
            sink: None,
            now: Box::new(Utc::now),
            rng: Mutex::new(StdRng::from_entropy()),
            table: Mutex::new(LeaseTable::default()),
        })
    }

    /// Replaces the clock used for every time comparison. Test seam.
    pub fn with_clock(
        mut self,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        self.now = Box::new(clock);
        self
    }

    /// Replaces the allocation RNG. Test seam.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Wires up the snapshot observer. Must be called before serving starts.
    pub fn set_sink(&mut self, sink: Box<dyn LeaseSink>) {
        self.sink = Some(sink);
    }

    /// Overwrites the lease database with `leases`, typically loaded from
    /// persistent storage. Must be called before serving starts.
    pub fn set_leases(&self, leases: Vec<Lease>) {
        let mut table = self.table.lock().unwrap();
        table.by_offset.clear();
        table.by_hw.clear();
        for mut lease in leases {
            // Snapshots written before last_ack existed carry only an expiry.
            if lease.last_ack.is_none() {
                lease.last_ack = lease.expiry;
            }
            table.by_hw.insert(lease.hardware_addr.clone(), lease.num);
            table.by_offset.insert(lease.num, lease);
        }
    }

    /// All current leases, ordered by pool offset.
    pub fn leases(&self) -> Vec<Lease> {
        let table = self.table.lock().unwrap();
        let mut leases: Vec<Lease> = table.by_offset.values().cloned().collect();
        leases.sort_by_key(|lease| lease.num);
        leases
    }

    /// Handles one inbound DHCP message and returns the reply payload, if
    /// the message warrants one.
    pub fn serve_dhcp(&self, request: &DhcpPacket) -> Option<DhcpPacket> {
        let Some(msg_type) = request.message_type() else {
            info!("dropping packet without message type on {}", self.interface);
            return None;
        };

        match msg_type {
            MessageType::Discover => self.handle_discover(request),
            MessageType::Request => self.handle_request(request),
            MessageType::Decline => self.handle_decline(request),
            _ => {
                info!("ignoring {} on {}", msg_type, self.interface);
                None
            }
        }
    }

    fn handle_discover(&self, request: &DhcpPacket) -> Option<DhcpPacket> {
        let hwaddr = request.mac_address();
        let requested = Self::requested_ip(request);

        let mut offset = self
            .static_by_hw
            .get(&hwaddr)
            .and_then(|static_lease| self.can_lease(static_lease.addr, &hwaddr));

        if offset.is_none() && !requested.is_unspecified() {
            offset = self.can_lease(requested, &hwaddr);
        }

        if offset.is_none()
            && let Some(lease) = self.current_lease(&hwaddr)
            && !lease.expired((self.now)())
        {
            offset = Some(lease.num);
        }

        if offset.is_none() {
            offset = self.find_free_offset();
        }

        let Some(offset) = offset else {
            error!(
                "cannot reply with DHCPOFFER on {}: no more leases available",
                self.interface
            );
            return None;
        };

        let addr = ip_add(self.start_ip, offset as i64);
        info!(
            "DISCOVER on {}: offering {} to {} (hostname {:?})",
            self.interface,
            addr,
            hwaddr,
            request.hostname().unwrap_or_default()
        );

        Some(self.reply(request, MessageType::Offer, addr, &hwaddr))
    }

    fn handle_request(&self, request: &DhcpPacket) -> Option<DhcpPacket> {
        let hwaddr = request.mac_address();
        let requested = Self::requested_ip(request);

        if let Some(server_id) = request.server_identifier()
            && server_id != self.server_ip
        {
            // The client selected another DHCP server.
            return None;
        }

        let Some(offset) = self.can_lease(requested, &hwaddr) else {
            info!("REQUEST on {}: NAK {} for {}", self.interface, requested, hwaddr);
            return Some(DhcpPacket::create_reply(
                request,
                MessageType::Nak,
                self.server_ip,
                Ipv4Addr::UNSPECIFIED,
                None,
                Vec::new(),
            ));
        };

        let now = (self.now)();
        let mut lease = Lease {
            num: offset,
            addr: requested,
            hardware_addr: hwaddr.clone(),
            hostname: request.hostname().unwrap_or_default(),
            hostname_override: String::new(),
            expiry: Some(now + self.lease_period_for(&hwaddr)),
            last_ack: Some(now),
        };

        {
            let mut table = self.table.lock().unwrap();
            if let Some(prior) = table.lease_for(&hwaddr).cloned() {
                if prior.expiry.is_none() {
                    // Retain permanent lease properties.
                    lease.expiry = None;
                    lease.hostname = prior.hostname.clone();
                }
                if !prior.hostname_override.is_empty() {
                    lease.hostname = prior.hostname_override.clone();
                    lease.hostname_override = prior.hostname_override.clone();
                }

                // Release any old lease for this client.
                table.by_offset.remove(&prior.num);
            }

            table.by_offset.insert(offset, lease.clone());
            table.by_hw.insert(hwaddr.clone(), offset);
            self.publish_locked(&table, &lease);
        }

        info!(
            "REQUEST on {}: ACK {} to {} (hostname {:?})",
            self.interface, requested, hwaddr, lease.hostname
        );

        Some(self.reply(request, MessageType::Ack, requested, &hwaddr))
    }

    fn handle_decline(&self, request: &DhcpPacket) -> Option<DhcpPacket> {
        let hwaddr = request.mac_address();
        if self.expire_lease(&hwaddr) {
            info!("DECLINE on {}: expired lease of {}", self.interface, hwaddr);
        }
        // Decline does not expect a reply.
        None
    }

    /// Builds an OFFER or ACK carrying the lease period for this client and
    /// the option set filtered by the request's parameter list.
    fn reply(
        &self,
        request: &DhcpPacket,
        msg_type: MessageType,
        yiaddr: Ipv4Addr,
        hwaddr: &str,
    ) -> DhcpPacket {
        let duration = self.lease_period_for(hwaddr).num_seconds() as u32;
        let options = self.options_for(request.parameter_request_list().as_deref());
        DhcpPacket::create_reply(
            request,
            msg_type,
            self.server_ip,
            yiaddr,
            Some(duration),
            options,
        )
    }

    /// The precomputed options in the order the client asked for them, or
    /// all of them when the request carries no parameter list.
    fn options_for(&self, requested: Option<&[u8]>) -> Vec<DhcpOption> {
        match requested {
            Some(codes) => codes
                .iter()
                .filter_map(|code| self.options.get(code).cloned())
                .collect(),
            None => self.options.values().cloned().collect(),
        }
    }

    fn requested_ip(request: &DhcpPacket) -> Ipv4Addr {
        request.requested_ip().unwrap_or(request.ciaddr)
    }

    /// The pool offset `hwaddr` may take for `requested`, if any.
    fn can_lease(&self, requested: Ipv4Addr, hwaddr: &str) -> Option<usize> {
        if requested.is_unspecified() {
            return None;
        }

        let num = ip_range(self.start_ip, requested) - 1;
        if num < 0 {
            return None;
        }
        let num = num as usize;

        let table = self.table.lock().unwrap();
        let Some(lease) = table.by_offset.get(&num) else {
            if num >= self.lease_range {
                return None;
            }
            return Some(num); // lease available
        };

        if lease.hardware_addr == hwaddr {
            return Some(num); // lease already owned by the requestor
        }

        if num >= self.lease_range {
            return None;
        }

        if lease.expired((self.now)()) {
            return Some(num); // lease expired, free to take over
        }

        None // lease unavailable
    }

    /// Picks a free pool offset: one random probe, then a linear scan.
    ///
    /// A probe that lands on a reserved or occupied offset falls through to
    /// the scan, so small pools keep stable assignments across restarts while
    /// dense pools still fill completely.
    fn find_free_offset(&self) -> Option<usize> {
        let table = self.table.lock().unwrap();
        let now = (self.now)();

        if table.by_offset.len() >= self.lease_range {
            return None;
        }

        let probe = self.rng.lock().unwrap().gen_range(0..self.lease_range);
        if table.vacant_or_expired(probe, now) && !self.reserved(probe) {
            return Some(probe);
        }

        (0..self.lease_range).find(|&i| table.vacant_or_expired(i, now) && !self.reserved(i))
    }

    fn reserved(&self, offset: usize) -> bool {
        self.reserved_offsets.contains(&(offset as i64))
    }

    fn current_lease(&self, hwaddr: &str) -> Option<Lease> {
        self.table.lock().unwrap().lease_for(hwaddr).cloned()
    }

    /// One hour for vendors known to misbehave under short leases, otherwise
    /// the configured default. Unparseable MACs get the default.
    fn lease_period_for(&self, hwaddr: &str) -> TimeDelta {
        let mut prefix = [0u8; 3];
        let mut parts = hwaddr.split(':');
        for byte in prefix.iter_mut() {
            match parts.next().and_then(|part| u8::from_str_radix(part, 16).ok()) {
                Some(value) => *byte = value,
                None => return self.lease_period,
            }
        }

        if vendor::is_nintendo_oui(&prefix) {
            TimeDelta::hours(1)
        } else {
            self.lease_period
        }
    }

    /// Marks the lease of `hwaddr` expired as of now. Reports whether a
    /// lease was actually expired by this call.
    fn expire_lease(&self, hwaddr: &str) -> bool {
        let mut table = self.table.lock().unwrap();
        let Some(&num) = table.by_hw.get(hwaddr) else {
            return false;
        };
        let Some(lease) = table.by_offset.get_mut(&num) else {
            return false;
        };
        if lease.hardware_addr != hwaddr {
            return false;
        }
        lease.expiry = Some((self.now)());
        true
    }

    /// Operator-initiated rename: pins `hostname` on the client's current
    /// lease so later renewals cannot overwrite it.
    pub fn set_hostname(&self, hwaddr: &str, hostname: &str) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        let num = *table
            .by_hw
            .get(hwaddr)
            .ok_or_else(|| Error::NoValidLease(hwaddr.to_string()))?;
        let lease = table
            .by_offset
            .get_mut(&num)
            .ok_or_else(|| Error::NoValidLease(hwaddr.to_string()))?;
        if lease.hardware_addr != hwaddr || lease.expired((self.now)()) {
            return Err(Error::NoValidLease(hwaddr.to_string()));
        }
        lease.hostname = hostname.to_string();
        lease.hostname_override = hostname.to_string();
        let lease = lease.clone();
        self.publish_locked(&table, &lease);
        Ok(())
    }

    fn publish_locked(&self, table: &LeaseTable, latest: &Lease) {
        let Some(sink) = &self.sink else {
            return;
        };
        let leases: Vec<Lease> = table.by_offset.values().cloned().collect();
        sink.publish(leases, latest);
    }
}
