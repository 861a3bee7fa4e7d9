//! The seam between the trace loop and the network.
//!
//! A [`ProbeTransport`] opens one [`ProbeChannel`] per target. A channel
//! sends a single echo request with a given hop limit and waits for the
//! reply that answers it, so the trace loop never sees sockets or packets.

use async_trait::async_trait;
use socket2::Socket;
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::time::{Instant, timeout_at};
use tracing::trace;

use crate::probe::{
    DEFAULT_PAYLOAD_SIZE, IcmpResponseType, ParsedResponse, ProbeError, build_echo_request,
    open_probe_socket, parse_icmp_response, position_to_sequence, recv_icmp, send_icmp, set_hop_limit,
};

/// Answer to one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReply {
    pub responder: IpAddr,
    pub response_type: IcmpResponseType,
}

impl ProbeReply {
    pub fn time_exceeded(responder: IpAddr) -> Self {
        Self {
            responder,
            response_type: IcmpResponseType::TimeExceeded(0),
        }
    }

    pub fn echo_reply(responder: IpAddr) -> Self {
        Self {
            responder,
            response_type: IcmpResponseType::EchoReply,
        }
    }

    /// Echo replies mean the probe made it all the way to the target
    pub fn is_destination(&self) -> bool {
        matches!(self.response_type, IcmpResponseType::EchoReply)
    }
}

/// One target's probe path
#[async_trait]
pub trait ProbeChannel: Send {
    /// Send one probe with `hop_limit` and wait up to `timeout` for its answer.
    ///
    /// `Ok(None)` means nothing answered in time.
    async fn probe(&mut self, hop_limit: u8, timeout: Duration) -> Result<Option<ProbeReply>, ProbeError>;
}

/// Opens probe channels
pub trait ProbeTransport: Send + Sync + 'static {
    type Channel: ProbeChannel + 'static;

    fn open(&self, target: IpAddr, identifier: u16) -> Result<Self::Channel, ProbeError>;
}

/// ICMP echo over raw (or unprivileged dgram) sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct IcmpTransport;

impl ProbeTransport for IcmpTransport {
    type Channel = IcmpChannel;

    fn open(&self, target: IpAddr, identifier: u16) -> Result<IcmpChannel, ProbeError> {
        let info = open_probe_socket(target.is_ipv6())?;
        let fd = AsyncFd::new(info.socket).map_err(ProbeError::Socket)?;
        Ok(IcmpChannel {
            fd,
            is_dgram: info.is_dgram,
            target,
            identifier,
        })
    }
}

/// Socket bound to one target; dropping it closes the socket
pub struct IcmpChannel {
    fd: AsyncFd<Socket>,
    is_dgram: bool,
    target: IpAddr,
    identifier: u16,
}

/// Whether a parsed response answers the probe to `target` sent with `sequence`.
///
/// Echo replies must come from the target itself; time exceeded must quote
/// a probe addressed to it. Late answers to earlier positions carry their
/// own sequence and are rejected.
pub fn answers_probe(response: &ParsedResponse, target: IpAddr, sequence: u16) -> bool {
    if response.sequence != sequence {
        return false;
    }
    match response.response_type {
        IcmpResponseType::EchoReply => response.responder == target,
        IcmpResponseType::TimeExceeded(_) => response.original_dest == Some(target),
    }
}

#[async_trait]
impl ProbeChannel for IcmpChannel {
    async fn probe(&mut self, hop_limit: u8, timeout: Duration) -> Result<Option<ProbeReply>, ProbeError> {
        let ipv6 = self.target.is_ipv6();
        let sequence = position_to_sequence(hop_limit);
        let packet = build_echo_request(self.identifier, sequence, DEFAULT_PAYLOAD_SIZE, ipv6);

        set_hop_limit(self.fd.get_ref(), hop_limit, ipv6).map_err(ProbeError::Socket)?;
        send_icmp(self.fd.get_ref(), &packet, self.target).map_err(|source| ProbeError::Send {
            position: hop_limit,
            source,
        })?;

        let deadline = Instant::now() + timeout;
        let mut buffer = [0u8; 1500];

        loop {
            let mut guard = match timeout_at(deadline, self.fd.readable()).await {
                Ok(guard) => guard.map_err(ProbeError::Recv)?,
                Err(_) => return Ok(None),
            };

            let (len, source) = match guard.try_io(|inner| recv_icmp(inner.get_ref(), &mut buffer)) {
                Ok(Ok(received)) => received,
                Ok(Err(e)) => return Err(ProbeError::Recv(e)),
                // Spurious wakeup, readiness was cleared
                Err(_would_block) => continue,
            };

            let Some(parsed) = parse_icmp_response(&buffer[..len], source, self.identifier, self.is_dgram)
            else {
                continue;
            };

            if !answers_probe(&parsed, self.target, sequence) {
                trace!(
                    target_addr = %self.target,
                    hop_limit,
                    sequence = parsed.sequence,
                    responder = %parsed.responder,
                    "unrelated response dropped"
                );
                continue;
            }

            return Ok(Some(ProbeReply {
                responder: parsed.responder,
                response_type: parsed.response_type,
            }));
        }
    }
}
