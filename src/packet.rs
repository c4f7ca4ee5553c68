//! DHCPv4 wire format.
//!
//! A [`DhcpPacket`] mirrors the fixed BOOTP layout of RFC 2131 §2 plus the
//! variable option region. Parsing is strict about the guards that matter to
//! a server (header length, magic cookie, relay hop bound, option bounds)
//! and tolerant of everything else; encoding pads replies up to the BOOTP
//! minimum so old clients accept them.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::options::{DhcpOption, MessageType, OptionCode};

/// Options start after the fixed fields and the magic cookie.
const OPTIONS_OFFSET: usize = 240;
const COOKIE_OFFSET: usize = 236;
const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
/// BOOTP requires replies to span at least this many bytes.
const MIN_REPLY_SIZE: usize = 300;
/// Relay hop counts beyond this are bogus per RFC 1542.
const MAX_HOPS: u8 = 16;
/// Flags-word bit a client sets when it needs broadcast replies.
const BROADCAST_FLAG: u16 = 0x8000;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;
pub const HTYPE_ETHERNET: u8 = 1;
pub const HLEN_ETHERNET: u8 = 6;

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

/// Sequential reader over the fixed header fields. The caller guarantees the
/// buffer covers the whole fixed region before construction.
struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut field = [0u8; N];
        field.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        field
    }

    fn byte(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn be16(&mut self) -> u16 {
        u16::from_be_bytes(self.take())
    }

    fn be32(&mut self) -> u32 {
        u32::from_be_bytes(self.take())
    }

    fn addr(&mut self) -> Ipv4Addr {
        Ipv4Addr::from(self.take::<4>())
    }
}

#[derive(Debug, Clone)]
pub struct DhcpPacket {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub options: Vec<DhcpOption>,
}

impl DhcpPacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < OPTIONS_OFFSET {
            return Err(Error::InvalidPacket(format!(
                "{} bytes is shorter than the fixed BOOTP header",
                data.len()
            )));
        }

        if data[COOKIE_OFFSET..OPTIONS_OFFSET] != MAGIC_COOKIE {
            return Err(Error::InvalidPacket(
                "missing DHCP magic cookie".to_string(),
            ));
        }

        let mut fields = FieldReader::new(data);
        let op = fields.byte();
        let htype = fields.byte();
        let hlen = fields.byte();
        let hops = fields.byte();

        if hops > MAX_HOPS {
            return Err(Error::InvalidPacket(format!(
                "relay hop count {} out of range",
                hops
            )));
        }

        let xid = fields.be32();
        let secs = fields.be16();
        let flags = fields.be16();
        let ciaddr = fields.addr();
        let yiaddr = fields.addr();
        let siaddr = fields.addr();
        let giaddr = fields.addr();
        let chaddr = fields.take::<16>();
        let sname = fields.take::<64>();
        let file = fields.take::<128>();

        let options = Self::walk_options(&data[OPTIONS_OFFSET..])?;

        Ok(Self {
            op,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            options,
        })
    }

    /// Walks the TLV option region. Pad bytes are skipped, End stops the
    /// walk, and any option claiming more bytes than remain is an error.
    fn walk_options(mut region: &[u8]) -> Result<Vec<DhcpOption>> {
        let mut options = Vec::new();
        loop {
            match region {
                [] => break,
                [0, rest @ ..] => region = rest,
                [255, ..] => break,
                [code] => {
                    return Err(Error::InvalidPacket(format!(
                        "option {} has no length byte",
                        code
                    )));
                }
                [code, length, rest @ ..] => {
                    let Some((value, rest)) = rest.split_at_checked(*length as usize) else {
                        return Err(Error::InvalidPacket(format!(
                            "option {} overruns the packet",
                            code
                        )));
                    };
                    options.push(DhcpOption::parse(*code, value)?);
                    region = rest;
                }
            }
        }
        Ok(options)
    }

    /// Serializes the packet, padding the result up to the BOOTP minimum.
    pub fn encode(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(MIN_REPLY_SIZE);

        wire.extend([self.op, self.htype, self.hlen, self.hops]);
        wire.extend(self.xid.to_be_bytes());
        wire.extend(self.secs.to_be_bytes());
        wire.extend(self.flags.to_be_bytes());
        for addr in [self.ciaddr, self.yiaddr, self.siaddr, self.giaddr] {
            wire.extend(addr.octets());
        }
        wire.extend(self.chaddr);
        wire.extend(self.sname);
        wire.extend(self.file);
        wire.extend(MAGIC_COOKIE);

        for option in &self.options {
            wire.extend(option.encode());
        }
        wire.push(OptionCode::End as u8);

        if wire.len() < MIN_REPLY_SIZE {
            wire.resize(MIN_REPLY_SIZE, 0);
        }
        wire
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::MessageType(msg_type) => Some(*msg_type),
            _ => None,
        })
    }

    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::RequestedIpAddress(ip) => Some(*ip),
            _ => None,
        })
    }

    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::ServerIdentifier(ip) => Some(*ip),
            _ => None,
        })
    }

    pub fn hostname(&self) -> Option<String> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::HostName(name) => Some(name.clone()),
            _ => None,
        })
    }

    pub fn parameter_request_list(&self) -> Option<Vec<u8>> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::ParameterRequestList(params) => Some(params.clone()),
            _ => None,
        })
    }

    /// The client hardware address as a lowercase colon-separated string.
    pub fn mac_address(&self) -> String {
        let hw = &self.chaddr;
        format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            hw[0], hw[1], hw[2], hw[3], hw[4], hw[5]
        )
    }

    pub fn is_broadcast(&self) -> bool {
        self.flags & BROADCAST_FLAG != 0
    }

    /// Builds a BOOTREPLY for `request`.
    ///
    /// The reply always carries the message type and server identifier;
    /// `lease_duration` adds option 51 when present (NAKs carry none). The
    /// remaining `options` are appended in the order given.
    pub fn create_reply(
        request: &DhcpPacket,
        message_type: MessageType,
        server_ip: Ipv4Addr,
        your_ip: Ipv4Addr,
        lease_duration: Option<u32>,
        options: Vec<DhcpOption>,
    ) -> Self {
        let mut all_options = vec![
            DhcpOption::MessageType(message_type),
            DhcpOption::ServerIdentifier(server_ip),
        ];
        if let Some(duration) = lease_duration {
            all_options.push(DhcpOption::LeaseTime(duration));
        }
        all_options.extend(options);

        Self {
            op: BOOTREPLY,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: your_ip,
            siaddr: server_ip,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: all_options,
        }
    }
}
