//! Fuzz properties for the DHCPv4 wire parser.
//!
//! Each property targets one of the parser's guards: the fixed-header length
//! check, the magic cookie, the relay hop bound, and the bounds checks of the
//! option walk. Mirror constants are asserted here rather than imported so a
//! drift in the parser shows up as a test failure.

use std::net::Ipv4Addr;

use proptest::prelude::*;

use dhcpeterd::{DhcpOption, DhcpPacket, MessageType};

/// Fixed BOOTP fields plus the magic cookie.
const FIXED_HEADER_LEN: usize = 240;
const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
/// Largest relay hop count the parser accepts.
const HOP_BOUND: u8 = 16;
/// Replies are padded to the BOOTP minimum.
const BOOTP_MIN_REPLY: usize = 300;

/// A syntactically valid BOOTREQUEST header with an empty option region.
fn header(hops: u8, xid: u32, chaddr: [u8; 16]) -> Vec<u8> {
    let mut bytes = vec![0u8; FIXED_HEADER_LEN];
    bytes[0] = 1; // BOOTREQUEST
    bytes[1] = 1; // ethernet
    bytes[2] = 6;
    bytes[3] = hops;
    bytes[4..8].copy_from_slice(&xid.to_be_bytes());
    bytes[28..44].copy_from_slice(&chaddr);
    bytes[236..240].copy_from_slice(&MAGIC_COOKIE);
    bytes
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 2048,
        max_global_rejects: 8192,
        ..ProptestConfig::default()
    })]

    #[test]
    fn arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..768)) {
        let _ = DhcpPacket::parse(&data);
    }

    #[test]
    fn arbitrary_option_regions_never_panic(
        hops in 0u8..=HOP_BOUND,
        xid in any::<u32>(),
        chaddr in any::<[u8; 16]>(),
        region in prop::collection::vec(any::<u8>(), 0..400),
    ) {
        let mut bytes = header(hops, xid, chaddr);
        bytes.extend(region);
        let _ = DhcpPacket::parse(&bytes);
    }

    #[test]
    fn anything_shorter_than_the_fixed_header_is_rejected(
        data in prop::collection::vec(any::<u8>(), 0..FIXED_HEADER_LEN)
    ) {
        prop_assert!(DhcpPacket::parse(&data).is_err());
    }

    #[test]
    fn wrong_cookie_is_rejected(cookie in any::<[u8; 4]>(), xid in any::<u32>()) {
        prop_assume!(cookie != MAGIC_COOKIE);

        let mut bytes = header(0, xid, [0; 16]);
        bytes[236..240].copy_from_slice(&cookie);
        prop_assert!(DhcpPacket::parse(&bytes).is_err());
    }

    #[test]
    fn hop_bound_is_enforced_both_ways(hops in any::<u8>(), xid in any::<u32>()) {
        let bytes = header(hops, xid, [0; 16]);
        let parsed = DhcpPacket::parse(&bytes);
        if hops > HOP_BOUND {
            prop_assert!(parsed.is_err());
        } else {
            prop_assert!(parsed.is_ok());
        }
    }

    #[test]
    fn overrunning_option_is_rejected(
        code in 1u8..=254,
        claimed in 1u8..=255,
        supplied in prop::collection::vec(any::<u8>(), 0..255),
    ) {
        prop_assume!(supplied.len() < claimed as usize);

        let mut bytes = header(0, 1, [0; 16]);
        bytes.push(code);
        bytes.push(claimed);
        bytes.extend(supplied);
        // The option claims more value bytes than the packet holds.
        prop_assert!(DhcpPacket::parse(&bytes).is_err());
    }

    #[test]
    fn pad_runs_are_transparent(pads in 0usize..64, xid in any::<u32>()) {
        let mut bytes = header(0, xid, [0; 16]);
        bytes.extend(vec![0u8; pads]);
        bytes.extend([53, 1, 1]); // DISCOVER
        bytes.push(255);

        let packet = DhcpPacket::parse(&bytes).unwrap();
        prop_assert_eq!(packet.options.len(), 1);
        prop_assert_eq!(packet.message_type(), Some(MessageType::Discover));
    }

    #[test]
    fn struct_round_trips_through_the_wire(
        xid in any::<u32>(),
        secs in any::<u16>(),
        flags in any::<u16>(),
        ciaddr in any::<u32>(),
        yiaddr in any::<u32>(),
        chaddr in any::<[u8; 16]>(),
        lease_secs in any::<u32>(),
    ) {
        let packet = DhcpPacket {
            op: 2,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid,
            secs,
            flags,
            ciaddr: Ipv4Addr::from(ciaddr),
            yiaddr: Ipv4Addr::from(yiaddr),
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: [0; 64],
            file: [0; 128],
            options: vec![
                DhcpOption::MessageType(MessageType::Offer),
                DhcpOption::LeaseTime(lease_secs),
            ],
        };

        let wire = packet.encode();
        prop_assert!(wire.len() >= BOOTP_MIN_REPLY);

        let parsed = DhcpPacket::parse(&wire).unwrap();
        prop_assert_eq!(parsed.xid, xid);
        prop_assert_eq!(parsed.secs, secs);
        prop_assert_eq!(parsed.flags, flags);
        prop_assert_eq!(parsed.ciaddr, Ipv4Addr::from(ciaddr));
        prop_assert_eq!(parsed.yiaddr, Ipv4Addr::from(yiaddr));
        prop_assert_eq!(parsed.chaddr, chaddr);
        prop_assert_eq!(parsed.message_type(), Some(MessageType::Offer));
        let lease_time = parsed.options.iter().find_map(|option| match option {
            DhcpOption::LeaseTime(seconds) => Some(*seconds),
            _ => None,
        });
        prop_assert_eq!(lease_time, Some(lease_secs));
    }
}
