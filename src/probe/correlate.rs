use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use std::net::{IpAddr, Ipv6Addr};

// IP protocol numbers
const IPPROTO_ICMP: u8 = 1;
const IPPROTO_ICMPV6: u8 = 58;

// ICMPv4 Echo Request type (for error payload validation)
const ICMP_ECHO_REQUEST: u8 = 8;

// ICMPv6 type codes
const ICMPV6_TIME_EXCEEDED: u8 = 3;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;

/// ICMP response kinds that advance a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpResponseType {
    /// The target echoed the probe back
    EchoReply,
    /// A router dropped the probe when its hop limit ran out (carries the code)
    TimeExceeded(u8),
}

/// Parsed ICMP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub responder: IpAddr,
    /// Sequence of the echo request this answers
    pub sequence: u16,
    pub response_type: IcmpResponseType,
    /// Destination of the quoted probe; for Echo Reply this is the responder
    pub original_dest: Option<IpAddr>,
}

/// Validate an ICMP checksum (RFC 1071)
fn validate_icmp_checksum(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }

    let mut sum: u32 = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }
    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum == 0xFFFF || sum == 0x0000
}

/// Parse an ICMP response and match it against our identifier
///
/// When `is_dgram` is true the data starts at the ICMP header. Raw IPv4
/// sockets deliver the IP header too; raw ICMPv6 sockets on Linux strip it.
///
/// Returns None for anything malformed, unrelated to our probes, or of a
/// type that does not advance a trace.
pub fn parse_icmp_response(
    data: &[u8],
    responder: IpAddr,
    our_identifier: u16,
    is_dgram: bool,
) -> Option<ParsedResponse> {
    if data.is_empty() {
        return None;
    }

    match responder {
        IpAddr::V4(_) if is_dgram => parse_icmp_v4(data, responder, our_identifier),
        IpAddr::V4(_) => {
            let ip_packet = Ipv4Packet::new(data)?;
            if ip_packet.get_version() != 4 {
                return None;
            }
            let ip_header_len = (ip_packet.get_header_length() as usize) * 4;
            if ip_header_len < IPV4_MIN_HEADER_LEN || data.len() < ip_header_len + 8 {
                return None;
            }
            parse_icmp_v4(&data[ip_header_len..], responder, our_identifier)
        }
        IpAddr::V6(_) => parse_icmp_v6(data, responder, our_identifier),
    }
}

/// Identifier and sequence stored in the first payload bytes.
///
/// Linux and macOS DGRAM sockets overwrite the header identifier, the payload
/// copy survives.
fn extract_id_from_payload(payload: &[u8], our_identifier: u16) -> Option<u16> {
    if payload.len() < 4 {
        return None;
    }
    let identifier = u16::from_be_bytes([payload[0], payload[1]]);
    let sequence = u16::from_be_bytes([payload[2], payload[3]]);
    (identifier == our_identifier).then_some(sequence)
}

/// Match an echo message (ours or quoted) by its header or payload identifier
fn match_echo(echo: &[u8], our_identifier: u16) -> Option<u16> {
    if echo.len() < 8 {
        return None;
    }
    let identifier = u16::from_be_bytes([echo[4], echo[5]]);
    let sequence = u16::from_be_bytes([echo[6], echo[7]]);
    if identifier == our_identifier {
        return Some(sequence);
    }
    extract_id_from_payload(&echo[8..], our_identifier)
}

/// Parse an ICMPv4 message starting at the ICMP header
fn parse_icmp_v4(icmp_data: &[u8], responder: IpAddr, our_identifier: u16) -> Option<ParsedResponse> {
    let icmp_packet = IcmpPacket::new(icmp_data)?;
    if icmp_data.len() < 8 {
        return None;
    }

    match icmp_packet.get_icmp_type() {
        IcmpTypes::EchoReply => {
            if !validate_icmp_checksum(icmp_data) {
                return None;
            }
            let sequence = match_echo(icmp_data, our_identifier)?;
            Some(ParsedResponse {
                responder,
                sequence,
                response_type: IcmpResponseType::EchoReply,
                original_dest: Some(responder),
            })
        }
        IcmpTypes::TimeExceeded => {
            let code = icmp_packet.get_icmp_code().0;
            parse_time_exceeded_v4(icmp_data, responder, our_identifier, code)
        }
        _ => None,
    }
}

/// Parse the original datagram quoted in an ICMPv4 Time Exceeded
///
/// [0..8]   ICMP header
/// [8..]    Original IP header + at least 8 bytes of the original payload
fn parse_time_exceeded_v4(
    icmp_data: &[u8],
    responder: IpAddr,
    our_identifier: u16,
    code: u8,
) -> Option<ParsedResponse> {
    if icmp_data.len() < 8 + IPV4_MIN_HEADER_LEN + 8 {
        return None;
    }

    let original_ip_data = &icmp_data[8..];
    let original_ip = Ipv4Packet::new(original_ip_data)?;
    let orig_ihl = (original_ip.get_header_length() as usize) * 4;
    if orig_ihl < IPV4_MIN_HEADER_LEN || original_ip_data.len() < orig_ihl + 8 {
        return None;
    }
    if original_ip.get_next_level_protocol().0 != IPPROTO_ICMP {
        return None;
    }

    let original_payload = &original_ip_data[orig_ihl..];
    if original_payload[0] != ICMP_ECHO_REQUEST {
        return None;
    }

    let sequence = match_echo(original_payload, our_identifier)?;
    Some(ParsedResponse {
        responder,
        sequence,
        response_type: IcmpResponseType::TimeExceeded(code),
        original_dest: Some(IpAddr::V4(original_ip.get_destination())),
    })
}

/// Parse an ICMPv6 message starting at the ICMPv6 header
fn parse_icmp_v6(icmp_data: &[u8], responder: IpAddr, our_identifier: u16) -> Option<ParsedResponse> {
    if icmp_data.len() < 8 {
        return None;
    }

    match icmp_data[0] {
        ICMPV6_ECHO_REPLY => {
            let sequence = match_echo(icmp_data, our_identifier)?;
            Some(ParsedResponse {
                responder,
                sequence,
                response_type: IcmpResponseType::EchoReply,
                original_dest: Some(responder),
            })
        }
        ICMPV6_TIME_EXCEEDED => {
            // 8 (ICMPv6 header) + 40 (IPv6 header) + 8 (quoted echo header)
            if icmp_data.len() < 8 + IPV6_HEADER_LEN + 8 {
                return None;
            }
            let original_ip = &icmp_data[8..];
            if original_ip[0] >> 4 != 6 || original_ip[6] != IPPROTO_ICMPV6 {
                return None;
            }
            let mut dest = [0u8; 16];
            dest.copy_from_slice(&original_ip[24..40]);

            let quoted = &original_ip[IPV6_HEADER_LEN..];
            if quoted[0] != ICMPV6_ECHO_REQUEST {
                return None;
            }
            let sequence = match_echo(quoted, our_identifier)?;
            Some(ParsedResponse {
                responder,
                sequence,
                response_type: IcmpResponseType::TimeExceeded(icmp_data[1]),
                original_dest: Some(IpAddr::V6(Ipv6Addr::from(dest))),
            })
        }
        _ => None,
    }
}
