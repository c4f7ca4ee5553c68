//! DHCP option codes and typed option values.
//!
//! Only the options this server reads or emits get a typed variant; anything
//! else rides along as [`DhcpOption::Unknown`] so replies can echo what they
//! do not understand.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    Pad = 0,
    SubnetMask = 1,
    Router = 3,
    DomainNameServer = 6,
    HostName = 12,
    RequestedIpAddress = 50,
    LeaseTime = 51,
    MessageType = 53,
    ServerIdentifier = 54,
    ParameterRequestList = 55,
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        use OptionCode::*;
        let code = match value {
            0 => Pad,
            1 => SubnetMask,
            3 => Router,
            6 => DomainNameServer,
            12 => HostName,
            50 => RequestedIpAddress,
            51 => LeaseTime,
            53 => MessageType,
            54 => ServerIdentifier,
            55 => ParameterRequestList,
            255 => End,
            other => return Err(other),
        };
        Ok(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        const ORDERED: [MessageType; 8] = [
            MessageType::Discover,
            MessageType::Offer,
            MessageType::Request,
            MessageType::Decline,
            MessageType::Ack,
            MessageType::Nak,
            MessageType::Release,
            MessageType::Inform,
        ];
        match value {
            1..=8 => Ok(ORDERED[value as usize - 1]),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Discover => "DISCOVER",
            Self::Offer => "OFFER",
            Self::Request => "REQUEST",
            Self::Decline => "DECLINE",
            Self::Ack => "ACK",
            Self::Nak => "NAK",
            Self::Release => "RELEASE",
            Self::Inform => "INFORM",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum DhcpOption {
    SubnetMask(Ipv4Addr),
    Router(Vec<Ipv4Addr>),
    DomainNameServer(Vec<Ipv4Addr>),
    HostName(String),
    RequestedIpAddress(Ipv4Addr),
    LeaseTime(u32),
    MessageType(MessageType),
    ServerIdentifier(Ipv4Addr),
    ParameterRequestList(Vec<u8>),
    Unknown(u8, Vec<u8>),
}

/// An option value of exactly `N` bytes, or an error naming the option.
fn fixed<const N: usize>(value: &[u8], what: &str) -> Result<[u8; N]> {
    value
        .try_into()
        .map_err(|_| Error::InvalidPacket(format!("option {} must be {} bytes", what, N)))
}

/// A non-empty list of 4-byte addresses.
fn addr_list(value: &[u8], what: &str) -> Result<Vec<Ipv4Addr>> {
    if value.is_empty() || value.len() % 4 != 0 {
        return Err(Error::InvalidPacket(format!(
            "option {} must be a non-empty multiple of 4 bytes",
            what
        )));
    }
    Ok(value
        .chunks_exact(4)
        .map(|quad| Ipv4Addr::new(quad[0], quad[1], quad[2], quad[3]))
        .collect())
}

fn tlv(code: u8, value: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(2 + value.len());
    wire.push(code);
    wire.push(value.len() as u8);
    wire.extend_from_slice(value);
    wire
}

fn addr_bytes(addrs: &[Ipv4Addr]) -> Vec<u8> {
    addrs.iter().flat_map(|addr| addr.octets()).collect()
}

impl DhcpOption {
    pub fn parse(code: u8, value: &[u8]) -> Result<Self> {
        let option = match OptionCode::try_from(code) {
            Ok(OptionCode::SubnetMask) => {
                Self::SubnetMask(Ipv4Addr::from(fixed::<4>(value, "subnet mask")?))
            }
            Ok(OptionCode::Router) => Self::Router(addr_list(value, "router")?),
            Ok(OptionCode::DomainNameServer) => {
                Self::DomainNameServer(addr_list(value, "dns server")?)
            }
            Ok(OptionCode::HostName) => {
                Self::HostName(String::from_utf8_lossy(value).into_owned())
            }
            Ok(OptionCode::RequestedIpAddress) => {
                Self::RequestedIpAddress(Ipv4Addr::from(fixed::<4>(value, "requested address")?))
            }
            Ok(OptionCode::LeaseTime) => {
                Self::LeaseTime(u32::from_be_bytes(fixed(value, "lease time")?))
            }
            Ok(OptionCode::MessageType) => {
                let [raw] = fixed::<1>(value, "message type")?;
                let msg_type = MessageType::try_from(raw).map_err(|raw| {
                    Error::InvalidPacket(format!("unknown message type {}", raw))
                })?;
                Self::MessageType(msg_type)
            }
            Ok(OptionCode::ServerIdentifier) => {
                Self::ServerIdentifier(Ipv4Addr::from(fixed::<4>(value, "server identifier")?))
            }
            Ok(OptionCode::ParameterRequestList) => Self::ParameterRequestList(value.to_vec()),
            Ok(OptionCode::Pad) | Ok(OptionCode::End) => {
                return Err(Error::InvalidPacket(
                    "padding carries no option value".to_string(),
                ));
            }
            Err(unknown) => Self::Unknown(unknown, value.to_vec()),
        };
        Ok(option)
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::SubnetMask(addr) => tlv(OptionCode::SubnetMask as u8, &addr.octets()),
            Self::Router(addrs) => tlv(OptionCode::Router as u8, &addr_bytes(addrs)),
            Self::DomainNameServer(addrs) => {
                tlv(OptionCode::DomainNameServer as u8, &addr_bytes(addrs))
            }
            Self::HostName(name) => tlv(OptionCode::HostName as u8, name.as_bytes()),
            Self::RequestedIpAddress(addr) => {
                tlv(OptionCode::RequestedIpAddress as u8, &addr.octets())
            }
            Self::LeaseTime(seconds) => tlv(OptionCode::LeaseTime as u8, &seconds.to_be_bytes()),
            Self::MessageType(msg_type) => tlv(OptionCode::MessageType as u8, &[*msg_type as u8]),
            Self::ServerIdentifier(addr) => {
                tlv(OptionCode::ServerIdentifier as u8, &addr.octets())
            }
            Self::ParameterRequestList(params) => {
                tlv(OptionCode::ParameterRequestList as u8, params)
            }
            Self::Unknown(code, value) => tlv(*code, value),
        }
    }
}
