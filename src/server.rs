//! Per-interface serve loops.
//!
//! Each configured network gets two ingress paths feeding one handler: a raw
//! ETH_P_ALL socket on the interface (the primary path, also used for every
//! reply so that address-less clients can be reached) and a UDP:67 listener
//! bound to the device for environments where datagrams arrive through the
//! kernel stack.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pnet::datalink::{self, Channel, DataLinkReceiver, DataLinkSender, NetworkInterface};
use pnet::ipnetwork::IpNetwork;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;
use pnet::util::MacAddr;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::config::{normalize_mac, Network};
use crate::error::{Error, Result};
use crate::frame;
use crate::handler::Handler;
use crate::lease::{Lease, StaticLease};
use crate::packet::{DhcpPacket, BOOTREQUEST, DHCP_SERVER_PORT};
use crate::persist::{LeaseUpdate, SnapshotSink};

const RECV_BUFFER_SIZE: usize = 1500;
const RAW_READ_TIMEOUT_MILLIS: u64 = 100;

/// Serves one configured network until the process exits.
///
/// Errors returned from here are startup-fatal (bad addresses, unknown
/// interface, socket failures); everything later is logged and survived.
pub async fn run(
    network: Network,
    restored: Vec<Lease>,
    updates: UnboundedSender<LeaseUpdate>,
) -> Result<()> {
    let interface = find_interface(&network.interface)?;

    let start_ip: Ipv4Addr = network.start_ip.parse().map_err(|_| {
        Error::InvalidConfig(format!(
            "parse start_ip on {} error invalid: {}",
            network.interface, network.start_ip
        ))
    })?;

    let netmask: Ipv4Addr = network.net_mask.parse().map_err(|_| {
        Error::InvalidConfig(format!(
            "parse net_mask on {} error invalid: {}",
            network.interface, network.net_mask
        ))
    })?;

    let server_ip = server_ip_for(&interface, start_ip)?;

    let source_mac = interface
        .mac
        .ok_or_else(|| Error::Interface(format!("{} has no MAC address", interface.name)))?;

    let static_leases = parse_static_leases(&network);

    let mut handler = Handler::new(
        &network.interface,
        server_ip,
        start_ip,
        netmask,
        network.range,
        network.lease_duration,
        &network.dns_servers,
        static_leases,
    )?;

    if !restored.is_empty() {
        info!(
            "restoring {} persisted leases on {}",
            restored.len(),
            network.interface
        );
        handler.set_leases(restored);
    }

    handler.set_sink(Box::new(SnapshotSink::new(
        network.interface.clone(),
        updates,
    )));

    let handler = Arc::new(handler);

    let (link_tx, link_rx) = open_link(&interface)?;
    let link_tx = Arc::new(Mutex::new(link_tx));

    let udp_socket = bind_udp(&network.interface)?;

    info!(
        "listening on {} (server {}, pool {} + {})",
        network.interface, server_ip, start_ip, network.range
    );

    let raw_task = {
        let handler = Arc::clone(&handler);
        let link_tx = Arc::clone(&link_tx);
        tokio::task::spawn_blocking(move || {
            raw_loop(link_rx, &handler, &link_tx, source_mac, server_ip)
        })
    };

    let udp_task = tokio::spawn(udp_loop(udp_socket, handler, link_tx, source_mac, server_ip));

    tokio::select! {
        result = raw_task => result.map_err(|err| Error::Socket(format!("raw serve task: {}", err)))?,
        result = udp_task => result.map_err(|err| Error::Socket(format!("udp serve task: {}", err)))?,
    }
}

fn find_interface(name: &str) -> Result<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .find(|interface| interface.name == name)
        .ok_or_else(|| Error::Interface(format!("no such interface: {}", name)))
}

/// Picks the interface address whose network contains `start_ip`.
fn server_ip_for(interface: &NetworkInterface, start_ip: Ipv4Addr) -> Result<Ipv4Addr> {
    for ip_network in &interface.ips {
        if let IpNetwork::V4(v4) = ip_network
            && v4.contains(start_ip)
        {
            return Ok(v4.ip());
        }
    }
    Err(Error::Interface(format!(
        "failed to find network containing {} on {}",
        start_ip, interface.name
    )))
}

/// Static leases from the config; entries with unparseable addresses are
/// skipped with a log so one typo cannot take the whole segment down.
fn parse_static_leases(network: &Network) -> Vec<StaticLease> {
    let mut leases = Vec::with_capacity(network.static_leases.len());
    for entry in &network.static_leases {
        let Ok(addr) = entry.ip.parse::<Ipv4Addr>() else {
            error!("invalid static lease ip on {}: {}", network.interface, entry.ip);
            continue;
        };
        leases.push(StaticLease {
            addr,
            hardware_addr: normalize_mac(&entry.mac),
            hostname: entry.name.clone(),
        });
    }
    leases
}

fn open_link(
    interface: &NetworkInterface,
) -> Result<(Box<dyn DataLinkSender>, Box<dyn DataLinkReceiver>)> {
    let config = datalink::Config {
        read_timeout: Some(Duration::from_millis(RAW_READ_TIMEOUT_MILLIS)),
        ..Default::default()
    };

    match datalink::channel(interface, config) {
        Ok(Channel::Ethernet(tx, rx)) => Ok((tx, rx)),
        Ok(_) => Err(Error::Socket("unsupported datalink channel type".to_string())),
        Err(err) => Err(Error::Socket(format!(
            "open raw socket on {}: {}",
            interface.name, err
        ))),
    }
}

/// The UDP:67 listener, bound to the device so multiple segments can be
/// served from one process.
fn bind_udp(interface: &str) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|err| Error::Socket(format!("Failed to create socket: {}", err)))?;

    socket
        .set_reuse_address(true)
        .map_err(|err| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", err)))?;

    socket
        .set_broadcast(true)
        .map_err(|err| Error::Socket(format!("Failed to set SO_BROADCAST: {}", err)))?;

    socket
        .bind_device(Some(interface.as_bytes()))
        .map_err(|err| Error::Socket(format!("Failed to bind to device {}: {}", interface, err)))?;

    socket
        .set_nonblocking(true)
        .map_err(|err| Error::Socket(format!("Failed to set non-blocking: {}", err)))?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCP_SERVER_PORT);
    socket
        .bind(&bind_addr.into())
        .map_err(|err| Error::Socket(format!("Failed to bind to {}: {}", bind_addr, err)))?;

    UdpSocket::from_std(socket.into())
        .map_err(|err| Error::Socket(format!("Failed to convert to tokio socket: {}", err)))
}

fn raw_loop(
    mut link_rx: Box<dyn DataLinkReceiver>,
    handler: &Handler,
    link_tx: &Mutex<Box<dyn DataLinkSender>>,
    source_mac: MacAddr,
    server_ip: Ipv4Addr,
) -> Result<()> {
    loop {
        let frame_bytes = match link_rx.next() {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(err) => {
                error!("raw receive error: {}", err);
                continue;
            }
        };

        let Some(payload) = dhcp_payload(frame_bytes) else {
            continue;
        };
        handle_and_reply(handler, &payload, link_tx, source_mac, server_ip);
    }
}

async fn udp_loop(
    socket: UdpSocket,
    handler: Arc<Handler>,
    link_tx: Arc<Mutex<Box<dyn DataLinkSender>>>,
    source_mac: MacAddr,
    server_ip: Ipv4Addr,
) -> Result<()> {
    let mut buffer = [0u8; RECV_BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((size, _source)) => {
                handle_and_reply(&handler, &buffer[..size], &link_tx, source_mac, server_ip);
            }
            Err(err) => error!("udp receive error: {}", err),
        }
    }
}

/// Parses one inbound DHCP payload, runs it through the handler, and writes
/// any reply back out as a raw Ethernet frame.
fn handle_and_reply(
    handler: &Handler,
    payload: &[u8],
    link_tx: &Mutex<Box<dyn DataLinkSender>>,
    source_mac: MacAddr,
    server_ip: Ipv4Addr,
) {
    let request = match DhcpPacket::parse(payload) {
        Ok(packet) => packet,
        Err(err) => {
            warn!("malformed DHCP packet: {}", err);
            return;
        }
    };

    if request.op != BOOTREQUEST {
        return;
    }

    let Some(reply) = handler.serve_dhcp(&request) else {
        return;
    };

    let (dst_mac, dst_ip) = reply_destination(&request, &reply);
    let bytes = match frame::frame_reply(source_mac, dst_mac, server_ip, dst_ip, &reply.encode()) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("frame reply: {}", err);
            return;
        }
    };

    let mut link_tx = link_tx.lock().unwrap();
    match link_tx.send_to(&bytes, None) {
        Some(Ok(())) => {}
        Some(Err(err)) => error!("raw write failed: {}", err),
        None => error!("raw write failed: channel unavailable"),
    }
}

/// Where the reply frame goes: the client's hardware address and offered IP,
/// or all-ones when the client asked for broadcast delivery.
fn reply_destination(request: &DhcpPacket, reply: &DhcpPacket) -> (MacAddr, Ipv4Addr) {
    if request.is_broadcast() {
        (MacAddr::broadcast(), Ipv4Addr::BROADCAST)
    } else {
        let hw = &request.chaddr;
        (
            MacAddr(hw[0], hw[1], hw[2], hw[3], hw[4], hw[5]),
            reply.yiaddr,
        )
    }
}

/// Extracts the DHCP payload from a raw Ethernet frame, if the frame is an
/// IPv4/UDP datagram addressed to the DHCP server port.
fn dhcp_payload(frame_bytes: &[u8]) -> Option<Vec<u8>> {
    let ethernet = EthernetPacket::new(frame_bytes)?;
    if ethernet.get_ethertype() != EtherTypes::Ipv4 {
        return None;
    }

    let ip = Ipv4Packet::new(ethernet.payload())?;
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
        return None;
    }

    let udp = UdpPacket::new(ip.payload())?;
    if udp.get_destination() != DHCP_SERVER_PORT {
        return None;
    }

    Some(udp.payload().to_vec())
}
