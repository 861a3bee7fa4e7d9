//! Address range expansion.
//!
//! A start/end pair is first summarized into the smallest set of CIDR
//! blocks covering it, and the blocks are then walked in order. Blocks are
//! disjoint and ascending, so the flattened output is the ascending,
//! duplicate-free list of every address in `[start, end]`.

use ipnet::{IpNet, Ipv4AddrRange, Ipv4Subnets, Ipv6AddrRange, Ipv6Subnets};
use std::net::IpAddr;
use thiserror::Error;

use crate::state::AddressFamily;

/// Most targets one run will expand a range into
pub const MAX_TARGETS: u128 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("invalid range {start} - {end}: {reason}")]
    InvalidRange {
        start: IpAddr,
        end: IpAddr,
        reason: &'static str,
    },
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("range of {len} addresses exceeds the limit of {max}")]
    TooLarge { len: u128, max: u128 },
}

/// Inclusive range of addresses of one family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    start: IpAddr,
    end: IpAddr,
}

impl AddressRange {
    pub fn new(start: IpAddr, end: IpAddr) -> Result<Self, RangeError> {
        if AddressFamily::of(&start) != AddressFamily::of(&end) {
            return Err(RangeError::InvalidRange {
                start,
                end,
                reason: "addresses belong to different families",
            });
        }
        if start > end {
            return Err(RangeError::InvalidRange {
                start,
                end,
                reason: "start is greater than end",
            });
        }
        Ok(Self { start, end })
    }

    /// Parse both ends from text
    pub fn parse(start: &str, end: &str) -> Result<Self, RangeError> {
        let parse = |s: &str| {
            s.trim()
                .parse::<IpAddr>()
                .map_err(|_| RangeError::InvalidAddress(s.to_string()))
        };
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn start(&self) -> IpAddr {
        self.start
    }

    pub fn end(&self) -> IpAddr {
        self.end
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.start)
    }

    /// Number of addresses in the range
    pub fn len(&self) -> u128 {
        match (self.start, self.end) {
            (IpAddr::V4(s), IpAddr::V4(e)) => (u32::from(e) - u32::from(s)) as u128 + 1,
            // The full v6 space does not fit, saturate instead
            (IpAddr::V6(s), IpAddr::V6(e)) => (u128::from(e) - u128::from(s)).saturating_add(1),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Minimal set of contiguous CIDR blocks covering the range, ascending
    pub fn blocks(&self) -> Vec<IpNet> {
        match (self.start, self.end) {
            (IpAddr::V4(s), IpAddr::V4(e)) => Ipv4Subnets::new(s, e, 0).map(IpNet::V4).collect(),
            (IpAddr::V6(s), IpAddr::V6(e)) => Ipv6Subnets::new(s, e, 0).map(IpNet::V6).collect(),
            _ => Vec::new(),
        }
    }

    /// Every address in the range, ascending
    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.blocks().into_iter().flat_map(block_addresses)
    }

    /// Collect the addresses, refusing ranges larger than [`MAX_TARGETS`]
    pub fn targets(&self) -> Result<Vec<IpAddr>, RangeError> {
        let len = self.len();
        if len > MAX_TARGETS {
            return Err(RangeError::TooLarge { len, max: MAX_TARGETS });
        }
        Ok(self.addresses().collect())
    }
}

/// Walk every address of a block, network and broadcast included
fn block_addresses(block: IpNet) -> Box<dyn Iterator<Item = IpAddr>> {
    match block {
        IpNet::V4(net) => Box::new(
            Ipv4AddrRange::new(net.network(), net.broadcast()).map(IpAddr::V4),
        ),
        IpNet::V6(net) => Box::new(
            Ipv6AddrRange::new(net.network(), net.broadcast()).map(IpAddr::V6),
        ),
    }
}

/// Expand `[start, end]` to the ordered list of concrete addresses
pub fn enumerate(start: IpAddr, end: IpAddr) -> Result<Vec<IpAddr>, RangeError> {
    AddressRange::new(start, end)?.targets()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn v4(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_enumerates_small_range() {
        let addrs = enumerate(v4("10.0.0.1"), v4("10.0.0.3")).unwrap();
        assert_eq!(addrs, vec![v4("10.0.0.1"), v4("10.0.0.2"), v4("10.0.0.3")]);
    }

    #[test]
    fn test_single_address_range() {
        let addrs = enumerate(v4("192.168.1.7"), v4("192.168.1.7")).unwrap();
        assert_eq!(addrs, vec![v4("192.168.1.7")]);
    }

    #[test]
    fn test_range_crossing_octet_boundary() {
        let range = AddressRange::parse("10.0.0.250", "10.0.1.5").unwrap();
        let addrs: Vec<IpAddr> = range.addresses().collect();
        assert_eq!(addrs.len() as u128, range.len());
        assert_eq!(addrs.len(), 12);
        assert_eq!(addrs.first(), Some(&v4("10.0.0.250")));
        assert_eq!(addrs.last(), Some(&v4("10.0.1.5")));
        assert!(addrs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_blocks_are_minimal() {
        let range = AddressRange::parse("10.0.0.0", "10.0.0.255").unwrap();
        assert_eq!(range.blocks(), vec!["10.0.0.0/24".parse::<IpNet>().unwrap()]);

        let range = AddressRange::parse("10.0.0.1", "10.0.0.6").unwrap();
        let blocks: Vec<String> = range.blocks().iter().map(|b| b.to_string()).collect();
        assert_eq!(blocks, vec!["10.0.0.1/32", "10.0.0.2/31", "10.0.0.4/31", "10.0.0.6/32"]);
    }

    #[test]
    fn test_ascending_and_unique_across_many_ranges() {
        let starts = [0u32, 1, 7, 255, 1000];
        let spans = [0u32, 1, 2, 15, 300];
        for &s in &starts {
            for &span in &spans {
                let start = Ipv4Addr::from(0x0a00_0000 + s);
                let end = Ipv4Addr::from(0x0a00_0000 + s + span);
                let addrs = enumerate(IpAddr::V4(start), IpAddr::V4(end)).unwrap();
                let expected: Vec<IpAddr> = (u32::from(start)..=u32::from(end))
                    .map(|n| IpAddr::V4(Ipv4Addr::from(n)))
                    .collect();
                assert_eq!(addrs, expected, "range {} - {}", start, end);
            }
        }
    }

    #[test]
    fn test_ipv6_range() {
        let start: IpAddr = "2001:db8::fe".parse().unwrap();
        let end: IpAddr = "2001:db8::101".parse().unwrap();
        let addrs = enumerate(start, end).unwrap();
        assert_eq!(addrs.len(), 4);
        assert_eq!(addrs[1], IpAddr::V6("2001:db8::ff".parse::<Ipv6Addr>().unwrap()));
        assert_eq!(addrs[3], end);
    }

    #[test]
    fn test_start_after_end_is_invalid() {
        let err = enumerate(v4("10.0.0.5"), v4("10.0.0.1")).unwrap_err();
        assert!(matches!(err, RangeError::InvalidRange { .. }));
    }

    #[test]
    fn test_oversized_range_rejected_before_expansion() {
        let range = AddressRange::parse("2001:db8::", "2001:db8::ffff:ffff:ffff:ffff").unwrap();
        assert_eq!(range.len(), 1 << 64);
        assert_eq!(
            range.targets().unwrap_err(),
            RangeError::TooLarge {
                len: 1 << 64,
                max: MAX_TARGETS
            }
        );

        // One past the limit
        let err = enumerate(v4("10.0.0.0"), v4("10.16.0.0")).unwrap_err();
        assert!(matches!(err, RangeError::TooLarge { len, .. } if len == MAX_TARGETS + 1));
    }

    #[test]
    fn test_whole_v6_space_length_saturates() {
        let range = AddressRange::parse("::", "ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff").unwrap();
        assert_eq!(range.len(), u128::MAX);
        assert!(matches!(range.targets(), Err(RangeError::TooLarge { .. })));
    }

    #[test]
    fn test_family_of_range() {
        assert_eq!(AddressRange::parse("10.0.0.1", "10.0.0.2").unwrap().family(), AddressFamily::V4);
        assert_eq!(AddressRange::parse("::1", "::2").unwrap().family(), AddressFamily::V6);
    }

    #[test]
    fn test_mixed_family_is_invalid() {
        let err = AddressRange::parse("10.0.0.1", "2001:db8::1").unwrap_err();
        assert!(matches!(err, RangeError::InvalidRange { .. }));
    }

    #[test]
    fn test_garbage_address_is_rejected() {
        let err = AddressRange::parse("10.0.0.1", "not-an-ip").unwrap_err();
        assert_eq!(err, RangeError::InvalidAddress("not-an-ip".to_string()));
    }
}
