//! What renderers receive: routers with their degree, adjacencies with the
//! targets that crossed them, and every divergence from the baseline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::net::IpAddr;
use thiserror::Error;

use crate::deviation::DeviationReport;
use crate::state::RouteSet;
use crate::topology::TopologyGraph;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write report: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub target: IpAddr,
    /// Responder per position, None where nothing answered
    pub hops: Vec<Option<IpAddr>>,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEntry {
    pub address: IpAddr,
    pub degree: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeEntry {
    pub endpoints: [IpAddr; 2],
    pub targets: Vec<IpAddr>,
}

/// One divergent hop of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviationEntry {
    pub target: IpAddr,
    pub index: usize,
    /// None marks an unresponsive hop
    pub hop: Option<IpAddr>,
    /// Divergence points this target has in total
    pub divergence_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapReport {
    pub started_at: DateTime<Utc>,
    pub baseline: Option<IpAddr>,
    pub routes: Vec<RouteEntry>,
    pub abandoned: Vec<IpAddr>,
    pub nodes: Vec<NodeEntry>,
    pub edges: Vec<EdgeEntry>,
    pub deviations: Vec<DeviationEntry>,
}

impl MapReport {
    pub fn new(routes: &RouteSet, graph: &TopologyGraph, deviations: &DeviationReport) -> Self {
        let entries = routes
            .iter()
            .map(|route| RouteEntry {
                target: route.target(),
                hops: route.hops().iter().map(|h| h.responder).collect(),
                complete: route.is_complete(),
            })
            .collect();

        let nodes = graph
            .nodes()
            .map(|n| NodeEntry {
                address: n.address,
                degree: n.degree,
            })
            .collect();

        let edges = graph
            .edges()
            .map(|e| EdgeEntry {
                endpoints: [e.endpoints.0, e.endpoints.1],
                targets: e.targets.iter().copied().collect(),
            })
            .collect();

        let deviations = deviations
            .deviating()
            .flat_map(|record| {
                record.points.iter().map(move |point| DeviationEntry {
                    target: record.target,
                    index: point.index,
                    hop: point.observed,
                    divergence_count: record.divergence_count(),
                })
            })
            .collect();

        Self {
            started_at: routes.started_at,
            baseline: routes.baseline().map(|r| r.target()),
            routes: entries,
            abandoned: routes.abandoned().to_vec(),
            nodes,
            edges,
            deviations,
        }
    }
}

/// Consumes a finished map, e.g. to render or persist it
pub trait Exporter {
    fn export(&mut self, report: &MapReport) -> Result<(), ExportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Route;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_report_flattens_deviations() {
        let routes = RouteSet::from_routes(vec![
            Route::from_responders(ip(1), [Some(ip(100)), Some(ip(101)), Some(ip(1))], true).unwrap(),
            Route::from_responders(ip(2), [Some(ip(200)), None, Some(ip(2))], true).unwrap(),
        ]);
        let graph = TopologyGraph::build(&routes);
        let deviations = DeviationReport::detect(&routes);

        let report = MapReport::new(&routes, &graph, &deviations);

        assert_eq!(report.baseline, Some(ip(1)));
        assert_eq!(report.deviations.len(), 3);
        assert!(report.deviations.iter().all(|d| d.target == ip(2) && d.divergence_count == 3));
        assert_eq!(report.deviations[1].hop, None);
        assert_eq!(report.edges.len(), 2);
        assert!(report.nodes.iter().any(|n| n.address == ip(101) && n.degree == 2));
    }

    #[test]
    fn test_report_serialized_shape() {
        let routes = RouteSet::from_routes(vec![
            Route::from_responders(ip(1), [Some(ip(100)), Some(ip(1))], true).unwrap(),
        ]);
        let graph = TopologyGraph::build(&routes);
        let report = MapReport::new(&routes, &graph, &DeviationReport::detect(&routes));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["baseline"], "10.0.0.1");
        assert_eq!(json["routes"][0]["hops"][0], "10.0.0.100");
        assert_eq!(json["routes"][0]["complete"], true);
        assert_eq!(json["nodes"][0]["address"], "10.0.0.100");
        assert_eq!(json["nodes"][0]["degree"], 1);
        assert_eq!(json["edges"][0]["endpoints"][1], "10.0.0.100");
        assert_eq!(json["edges"][0]["targets"][0], "10.0.0.1");
        assert!(json["deviations"].as_array().unwrap().is_empty());
    }
}
