use pnet::packet::MutablePacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpType, IcmpTypes, checksum};

/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;
/// Default payload size (standard ping)
pub const DEFAULT_PAYLOAD_SIZE: usize = 56;
/// Minimum payload size (identifier + sequence backup, 4 bytes timestamp)
const MIN_PAYLOAD_SIZE: usize = 8;

/// ICMPv6 Echo Request type
const ICMPV6_ECHO_REQUEST: u8 = 128;

/// Identifier for the probe task with the given index.
///
/// Concurrent target tasks share the process, so each mixes its index into
/// the process id to keep replies apart.
pub fn get_identifier(task_index: usize) -> u16 {
    (std::process::id() as u16).wrapping_add(task_index as u16)
}

/// Encode a hop-limit position into the ICMP sequence field
pub fn position_to_sequence(position: u8) -> u16 {
    position as u16
}

/// Build an ICMP Echo Request packet
///
/// Payload layout:
/// - Bytes 0-1: identifier (DGRAM sockets may rewrite the header copy)
/// - Bytes 2-3: sequence
/// - Bytes 4-7: timestamp (lower 32 bits)
/// - Bytes 8+: pattern fill
///
/// The ICMPv6 checksum covers a pseudo-header and is filled in by the kernel.
pub fn build_echo_request(identifier: u16, sequence: u16, payload_size: usize, ipv6: bool) -> Vec<u8> {
    let payload_size = payload_size.max(MIN_PAYLOAD_SIZE);
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + payload_size];

    if let Some(mut packet) = MutableEchoRequestPacket::new(&mut buffer) {
        if ipv6 {
            packet.set_icmp_type(IcmpType::new(ICMPV6_ECHO_REQUEST));
        } else {
            packet.set_icmp_type(IcmpTypes::EchoRequest);
        }
        packet.set_icmp_code(IcmpCode::new(0));
        packet.set_identifier(identifier);
        packet.set_sequence_number(sequence);

        let payload = packet.payload_mut();
        payload[0..2].copy_from_slice(&identifier.to_be_bytes());
        payload[2..4].copy_from_slice(&sequence.to_be_bytes());

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u32)
            .unwrap_or(0);
        payload[4..8].copy_from_slice(&timestamp.to_be_bytes());

        for (i, byte) in payload[8..].iter_mut().enumerate() {
            *byte = (i & 0xFF) as u8;
        }
    }

    if !ipv6 {
        let cksum = IcmpPacket::new(&buffer).map(|p| checksum(&p));
        if let (Some(cksum), Some(mut packet)) = (cksum, MutableEchoRequestPacket::new(&mut buffer)) {
            packet.set_checksum(cksum);
        }
    }

    buffer
}
