//! Path deviation against a fixed baseline.
//!
//! The baseline is the route of the first target in enumeration order.
//! Every other route is compared with it index by index over the shorter
//! of the two lengths, and every mismatch is recorded, not just the first.
//! There is no consensus or re-basing: a baseline that is itself unusual
//! makes every other target look deviant.

use serde::Serialize;
use std::net::IpAddr;

use crate::state::{Route, RouteSet};

/// One index where a route disagrees with the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviationPoint {
    /// 0-based index into the route
    pub index: usize,
    /// What the route saw there; None is an unresponsive hop
    pub observed: Option<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviationRecord {
    pub target: IpAddr,
    pub points: Vec<DeviationPoint>,
}

impl DeviationRecord {
    /// Count of distinct divergence points
    pub fn divergence_count(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviationReport {
    baseline: Option<IpAddr>,
    /// One record per non-baseline target, in enumeration order
    records: Vec<DeviationRecord>,
}

impl DeviationReport {
    pub fn detect(routes: &RouteSet) -> Self {
        let Some((baseline, rest)) = routes.routes().split_first() else {
            return Self::default();
        };

        let records = rest
            .iter()
            .map(|route| DeviationRecord {
                target: route.target(),
                points: compare(baseline, route),
            })
            .collect();

        Self {
            baseline: Some(baseline.target()),
            records,
        }
    }

    /// Target whose route everything was compared against
    pub fn baseline(&self) -> Option<IpAddr> {
        self.baseline
    }

    pub fn records(&self) -> &[DeviationRecord] {
        &self.records
    }

    pub fn get(&self, target: IpAddr) -> Option<&DeviationRecord> {
        self.records.iter().find(|r| r.target == target)
    }

    /// Records with at least one divergence
    pub fn deviating(&self) -> impl Iterator<Item = &DeviationRecord> {
        self.records.iter().filter(|r| !r.is_empty())
    }
}

/// Positions where `route` differs from `baseline` over their common length
pub fn compare(baseline: &Route, route: &Route) -> Vec<DeviationPoint> {
    baseline
        .hops()
        .iter()
        .zip(route.hops())
        .enumerate()
        .filter(|(_, (base, seen))| base.responder != seen.responder)
        .map(|(index, (_, seen))| DeviationPoint {
            index,
            observed: seen.responder,
        })
        .collect()
}
