pub mod correlate;
pub mod icmp;
pub mod socket;
pub mod transport;

pub use correlate::*;
pub use icmp::*;
pub use socket::*;
pub use transport::*;

use std::io;
use thiserror::Error;

/// Failures while probing a single target
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("insufficient privileges to open an ICMP socket: {0}")]
    Permission(#[source] io::Error),
    #[error("failed to configure probe socket: {0}")]
    Socket(#[source] io::Error),
    #[error("failed to send probe with hop limit {position}: {source}")]
    Send {
        position: u8,
        #[source]
        source: io::Error,
    },
    #[error("failed to receive probe response: {0}")]
    Recv(#[source] io::Error),
}
