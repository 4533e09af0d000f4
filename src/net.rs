//! Network payload helpers for stream benches.
//!
//! Frames travel over AXI4-Stream with the first byte in the least
//! significant lane of the first beat. [`packet_frame`] writes a [`FlowKey`]
//! into Ethernet/IP/TCP/UDP headers, [`parse_flow`] reads it back, and
//! [`toeplitz_hash`] computes the receive side scaling hash a design is
//! expected to produce for it.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::axis::StreamTransfer;
use crate::codec::{bytes_in_keep, from_bytes, keep_for_bytes, to_bytes, value_mask, Endian};
use crate::stimulus::StimulusPolicy;

/// Source MAC of generated frames.
pub const SRC_MAC: [u8; 6] = [0x53, 0x00, 0x00, 0x00, 0x00, 0x01];
/// Destination MAC of generated frames.
pub const DST_MAC: [u8; 6] = [0x53, 0x00, 0x00, 0x00, 0x00, 0x02];
/// Local experimental EtherType used for raw test frames.
pub const ETHERTYPE_TEST: u16 = 0x88B5;
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;
const PROTO_IPV6: u8 = 41;
/// IANA "use for experimentation", carried when a flow has no ports.
const PROTO_EXPERIMENTAL: u8 = 253;

const IPV4_MORE_FRAGMENTS: u16 = 0x2000;
const IPV4_FRAGMENT_OFFSET: u16 = 0x1FFF;
const HOP_LIMIT: u8 = 64;

/// Microsoft's 40-byte RSS verification key.
pub const RSS_DEFAULT_KEY: [u8; 40] = [
    0x6d, 0x5a, 0x56, 0xda, 0x25, 0x5b, 0x0e, 0xc2, 0x41, 0x67, 0x25, 0x3d, 0x43, 0xa3, 0x8f,
    0xb0, 0xd0, 0xca, 0x2b, 0xcb, 0xae, 0x7b, 0x30, 0xb4, 0x77, 0xcb, 0x2d, 0xa3, 0x80, 0x30,
    0xf2, 0x0c, 0x6a, 0x42, 0xb7, 0x3b, 0xbe, 0xac, 0x01, 0xfa,
];

/// Splits `payload` into `bit_width`-bit beats.
pub fn payload_to_beats(payload: &[u8], bit_width: u32) -> StreamTransfer {
    let beat_bytes = (bit_width / 8) as usize;
    assert!(beat_bytes > 0, "bit width {} below one byte", bit_width);
    assert!(!payload.is_empty(), "empty payload");

    let data: Vec<u128> = payload
        .chunks(beat_bytes)
        .map(|chunk| from_bytes(chunk, Endian::Little))
        .collect();
    let tail = payload.len() - (data.len() - 1) * beat_bytes;
    StreamTransfer::new(data, keep_for_bytes(tail))
}

/// Reassembles the payload carried by `transfer`.
pub fn beats_to_payload(transfer: &StreamTransfer, bit_width: u32) -> Vec<u8> {
    assert!(!transfer.is_empty(), "stream transfer needs at least one beat");
    let beat_bytes = (bit_width / 8) as usize;
    let last = transfer.len() - 1;
    let mut payload = Vec::with_capacity(transfer.len() * beat_bytes);
    for (i, &word) in transfer.data.iter().enumerate() {
        let n = if i == last {
            bytes_in_keep(transfer.keep)
        } else {
            beat_bytes
        };
        payload.extend(to_bytes(word & value_mask(n as u32 * 8), n, Endian::Little));
    }
    payload
}

/// Layer 4 protocol carrying a flow's ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    fn protocol(self) -> u8 {
        match self {
            Transport::Tcp => PROTO_TCP,
            Transport::Udp => PROTO_UDP,
        }
    }

    fn from_protocol(protocol: u8) -> Option<Self> {
        match protocol {
            PROTO_TCP => Some(Transport::Tcp),
            PROTO_UDP => Some(Transport::Udp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowAddrs {
    V4 { src: Ipv4Addr, dst: Ipv4Addr },
    V6 { src: Ipv6Addr, dst: Ipv6Addr },
}

/// Header fields that select a receive queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowKey {
    pub addrs: FlowAddrs,
    /// TCP/UDP source and destination ports.
    pub ports: Option<(u16, u16)>,
    /// Protocol of `ports`; UDP unless set.
    pub transport: Transport,
    /// IPv4 fragment (MF set or non-zero offset).
    pub fragment: bool,
    /// Addresses of an IPv6 packet tunneled in IPv4 (protocol 41).
    pub tunneled: Option<(Ipv6Addr, Ipv6Addr)>,
}

impl FlowKey {
    pub fn v4(src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        Self {
            addrs: FlowAddrs::V4 { src, dst },
            ports: None,
            transport: Transport::Udp,
            fragment: false,
            tunneled: None,
        }
    }

    pub fn v6(src: Ipv6Addr, dst: Ipv6Addr) -> Self {
        Self {
            addrs: FlowAddrs::V6 { src, dst },
            ports: None,
            transport: Transport::Udp,
            fragment: false,
            tunneled: None,
        }
    }

    pub fn ports(mut self, src: u16, dst: u16) -> Self {
        self.ports = Some((src, dst));
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn fragment(mut self) -> Self {
        self.fragment = true;
        self
    }

    pub fn tunneled(mut self, src: Ipv6Addr, dst: Ipv6Addr) -> Self {
        self.tunneled = Some((src, dst));
        self
    }

    /// Bytes fed to the hash, in header order.
    ///
    /// 6in4 packets hash the inner IPv6 addresses only; IPv4 fragments hash
    /// the addresses only.
    pub fn hash_input(&self) -> Vec<u8> {
        if let (FlowAddrs::V4 { .. }, Some((src, dst))) = (self.addrs, self.tunneled) {
            return [src.octets(), dst.octets()].concat();
        }

        let mut input = match self.addrs {
            FlowAddrs::V4 { src, dst } => [src.octets(), dst.octets()].concat(),
            FlowAddrs::V6 { src, dst } => [src.octets(), dst.octets()].concat(),
        };
        let fragmented = matches!(self.addrs, FlowAddrs::V4 { .. }) && self.fragment;
        if let (Some((sport, dport)), false) = (self.ports, fragmented) {
            input.extend(sport.to_be_bytes());
            input.extend(dport.to_be_bytes());
        }
        input
    }
}

/// Toeplitz hash of `flow` under `key`.
///
/// `key` must be at least four bytes longer than the hash input; the 40-byte
/// [`RSS_DEFAULT_KEY`] covers every flow.
pub fn toeplitz_hash(flow: &FlowKey, key: &[u8]) -> u32 {
    let input = flow.hash_input();
    assert!(
        key.len() >= input.len() + 4,
        "Toeplitz key of {} bytes too short for {} input bytes",
        key.len(),
        input.len()
    );

    let mut window = u32::from_be_bytes([key[0], key[1], key[2], key[3]]);
    let mut hash = 0u32;
    for (i, byte) in input.iter().enumerate() {
        let next = key[i + 4];
        for bit in 0..8 {
            if byte & (0x80 >> bit) != 0 {
                hash ^= window;
            }
            window = (window << 1) | ((next >> (7 - bit)) & 1) as u32;
        }
    }
    hash
}

fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks(2)
        .map(|word| u16::from_be_bytes([word[0], word[1]]) as u32)
        .sum();
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

fn ipv4_packet(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, fragment: bool, body: &[u8]) -> Vec<u8> {
    let total_len = (20 + body.len()) as u16;
    let flags = if fragment { IPV4_MORE_FRAGMENTS } else { 0 };
    let mut packet = Vec::with_capacity(total_len as usize);
    packet.extend([0x45, 0x00]);
    packet.extend(total_len.to_be_bytes());
    packet.extend([0x00, 0x00]);
    packet.extend(flags.to_be_bytes());
    packet.extend([HOP_LIMIT, protocol, 0x00, 0x00]);
    packet.extend(src.octets());
    packet.extend(dst.octets());
    let checksum = ipv4_checksum(&packet);
    packet[10..12].copy_from_slice(&checksum.to_be_bytes());
    packet.extend_from_slice(body);
    packet
}

fn ipv6_packet(src: Ipv6Addr, dst: Ipv6Addr, next_header: u8, body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(40 + body.len());
    packet.extend([0x60, 0x00, 0x00, 0x00]);
    packet.extend((body.len() as u16).to_be_bytes());
    packet.extend([next_header, HOP_LIMIT]);
    packet.extend(src.octets());
    packet.extend(dst.octets());
    packet.extend_from_slice(body);
    packet
}

fn transport_segment(transport: Transport, (sport, dport): (u16, u16), payload: &[u8]) -> Vec<u8> {
    let mut segment = Vec::with_capacity(20 + payload.len());
    segment.extend(sport.to_be_bytes());
    segment.extend(dport.to_be_bytes());
    match transport {
        Transport::Udp => {
            segment.extend(((8 + payload.len()) as u16).to_be_bytes());
            segment.extend([0x00, 0x00]);
        }
        Transport::Tcp => {
            // seq, ack, 20-byte header with SYN, full window
            segment.extend([0u8; 8]);
            segment.extend([0x50, 0x02, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00]);
        }
    }
    segment.extend_from_slice(payload);
    segment
}

/// Ethernet frame carrying `payload` in the headers that `flow` describes.
///
/// A tunneled IPv4 flow carries an inner IPv6 header; ports go into the
/// innermost header. Fragments are marked with MF at offset zero. Checksums
/// other than the IPv4 header checksum are left zero.
pub fn packet_frame(flow: &FlowKey, payload: &[u8]) -> Vec<u8> {
    let (next_header, l4) = match flow.ports {
        Some(ports) => (
            flow.transport.protocol(),
            transport_segment(flow.transport, ports, payload),
        ),
        None => (PROTO_EXPERIMENTAL, payload.to_vec()),
    };

    let (ethertype, l3) = match (flow.addrs, flow.tunneled) {
        (FlowAddrs::V4 { src, dst }, Some((inner_src, inner_dst))) => {
            let inner = ipv6_packet(inner_src, inner_dst, next_header, &l4);
            (ETHERTYPE_IPV4, ipv4_packet(src, dst, PROTO_IPV6, flow.fragment, &inner))
        }
        (FlowAddrs::V4 { src, dst }, None) => (
            ETHERTYPE_IPV4,
            ipv4_packet(src, dst, next_header, flow.fragment, &l4),
        ),
        (FlowAddrs::V6 { src, dst }, _) => (ETHERTYPE_IPV6, ipv6_packet(src, dst, next_header, &l4)),
    };

    let mut frame = Vec::with_capacity(14 + l3.len());
    frame.extend(DST_MAC);
    frame.extend(SRC_MAC);
    frame.extend(ethertype.to_be_bytes());
    frame.extend(l3);
    frame
}

fn be16(bytes: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes(bytes.get(at..at + 2)?.try_into().ok()?))
}

fn ipv6_addr(bytes: &[u8], at: usize) -> Option<Ipv6Addr> {
    let octets: [u8; 16] = bytes.get(at..at + 16)?.try_into().ok()?;
    Some(Ipv6Addr::from(octets))
}

fn with_ports(mut flow: FlowKey, protocol: u8, segment: &[u8]) -> FlowKey {
    if let (Some(transport), Some(sport), Some(dport)) = (
        Transport::from_protocol(protocol),
        be16(segment, 0),
        be16(segment, 2),
    ) {
        flow.ports = Some((sport, dport));
        flow.transport = transport;
    }
    flow
}

/// Recovers the flow of an IPv4 or IPv6 frame. `None` for other EtherTypes
/// and truncated headers.
pub fn parse_flow(frame: &[u8]) -> Option<FlowKey> {
    let l3 = frame.get(14..)?;
    match be16(frame, 12)? {
        ETHERTYPE_IPV4 => {
            let header_len = (*l3.first()? & 0x0F) as usize * 4;
            let fragment_bits = be16(l3, 6)?;
            let src: [u8; 4] = l3.get(12..16)?.try_into().ok()?;
            let dst: [u8; 4] = l3.get(16..20)?.try_into().ok()?;
            let body = l3.get(header_len..)?;

            let mut flow = FlowKey::v4(Ipv4Addr::from(src), Ipv4Addr::from(dst));
            flow.fragment = fragment_bits & (IPV4_MORE_FRAGMENTS | IPV4_FRAGMENT_OFFSET) != 0;
            let protocol = *l3.get(9)?;
            if protocol == PROTO_IPV6 {
                flow.tunneled = Some((ipv6_addr(body, 8)?, ipv6_addr(body, 24)?));
                return Some(with_ports(flow, *body.get(6)?, body.get(40..)?));
            }
            if fragment_bits & IPV4_FRAGMENT_OFFSET != 0 {
                return Some(flow);
            }
            Some(with_ports(flow, protocol, body))
        }
        ETHERTYPE_IPV6 => {
            let flow = FlowKey::v6(ipv6_addr(l3, 8)?, ipv6_addr(l3, 24)?);
            Some(with_ports(flow, *l3.get(6)?, l3.get(40..)?))
        }
        _ => None,
    }
}

/// Random IPv4 or IPv6 packet with 50 to 1000 payload bytes, and the flow it
/// belongs to.
pub fn random_packet(policy: &StimulusPolicy) -> (FlowKey, Vec<u8>) {
    let flow = random_flow(policy);
    let len = policy.cycles(50..=1000) as usize;
    let frame = packet_frame(&flow, &policy.bytes(len));
    (flow, frame)
}

/// Random Ethernet frame with fixed MAC addresses and a 50 to 1000 byte
/// random payload.
pub fn random_frame(policy: &StimulusPolicy) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1014);
    frame.extend(DST_MAC);
    frame.extend(SRC_MAC);
    frame.extend(ETHERTYPE_TEST.to_be_bytes());
    let len = policy.cycles(50..=1000) as usize;
    frame.extend(policy.bytes(len));
    frame
}

fn random_v4(policy: &StimulusPolicy) -> Ipv4Addr {
    Ipv4Addr::from(policy.next_u64() as u32)
}

fn random_v6(policy: &StimulusPolicy) -> Ipv6Addr {
    let high = policy.next_u64() as u128;
    let low = policy.next_u64() as u128;
    Ipv6Addr::from((high << 64) | low)
}

fn random_ports(policy: &StimulusPolicy) -> (u16, u16) {
    let ports = policy.next_u64();
    (ports as u16, (ports >> 16) as u16)
}

fn random_transport(policy: &StimulusPolicy) -> Transport {
    if policy.chance(0.5) {
        Transport::Tcp
    } else {
        Transport::Udp
    }
}

/// Random flow: IPv4 or IPv6, some IPv4 fragments and 6in4 tunnels, most
/// with TCP/UDP ports.
pub fn random_flow(policy: &StimulusPolicy) -> FlowKey {
    let roll = policy.cycles(0..=99);
    if policy.chance(0.5) {
        let flow = FlowKey::v4(random_v4(policy), random_v4(policy));
        match roll {
            0..=9 => flow.fragment(),
            10..=19 => flow.tunneled(random_v6(policy), random_v6(policy)),
            20..=79 => {
                let (sport, dport) = random_ports(policy);
                flow.ports(sport, dport).transport(random_transport(policy))
            }
            _ => flow,
        }
    } else {
        let flow = FlowKey::v6(random_v6(policy), random_v6(policy));
        if roll < 80 {
            let (sport, dport) = random_ports(policy);
            flow.ports(sport, dport).transport(random_transport(policy))
        } else {
            flow
        }
    }
}
