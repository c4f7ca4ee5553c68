//! Link-layer framing for DHCP replies.
//!
//! Clients answering a DISCOVER have no IP address yet, so replies cannot be
//! routed; they are written as complete Ethernet II frames on the raw socket.
//! This module wraps a DHCP payload in Ethernet + IPv4 + UDP headers with
//! both checksums computed (UDP over the IPv4 pseudo-header).

use std::net::Ipv4Addr;

use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, Ipv4Flags, MutableIpv4Packet};
use pnet::packet::udp::{self, MutableUdpPacket};
use pnet::util::MacAddr;

use crate::error::{Error, Result};
use crate::packet::{DHCP_CLIENT_PORT, DHCP_SERVER_PORT};

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

/// Builds the Ethernet/IPv4/UDP frame carrying `payload` from the server to
/// a client at `dst_mac`/`dst_ip`.
pub fn frame_reply(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let mut buffer =
        vec![0u8; ETHERNET_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN + payload.len()];

    {
        let mut ethernet = MutableEthernetPacket::new(&mut buffer)
            .ok_or_else(|| Error::InvalidPacket("reply frame buffer too small".to_string()))?;
        ethernet.set_destination(dst_mac);
        ethernet.set_source(src_mac);
        ethernet.set_ethertype(EtherTypes::Ipv4);
    }

    {
        let mut udp = MutableUdpPacket::new(&mut buffer[ETHERNET_HEADER_LEN + IPV4_HEADER_LEN..])
            .ok_or_else(|| Error::InvalidPacket("reply frame buffer too small".to_string()))?;
        udp.set_source(DHCP_SERVER_PORT);
        udp.set_destination(DHCP_CLIENT_PORT);
        udp.set_length((UDP_HEADER_LEN + payload.len()) as u16);
        udp.set_payload(payload);
        let checksum = udp::ipv4_checksum(&udp.to_immutable(), &src_ip, &dst_ip);
        udp.set_checksum(checksum);
    }

    {
        let mut ip = MutableIpv4Packet::new(&mut buffer[ETHERNET_HEADER_LEN..])
            .ok_or_else(|| Error::InvalidPacket("reply frame buffer too small".to_string()))?;
        ip.set_version(4);
        ip.set_header_length((IPV4_HEADER_LEN / 4) as u8);
        ip.set_total_length((IPV4_HEADER_LEN + UDP_HEADER_LEN + payload.len()) as u16);
        ip.set_ttl(255);
        ip.set_flags(Ipv4Flags::DontFragment);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        ip.set_source(src_ip);
        ip.set_destination(dst_ip);
        let checksum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(checksum);
    }

    Ok(buffer)
}
