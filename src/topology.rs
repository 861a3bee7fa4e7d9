//! Router adjacency graph merged from all routes.
//!
//! Only consecutive responding hops become edges. A silent position breaks
//! adjacency: `A, *, C` yields no `A - C` edge.

use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;

use crate::state::Route;

/// Targets whose route crossed an edge
pub type EdgeTargets = BTreeSet<IpAddr>;

/// A router with its edge count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologyNode {
    pub address: IpAddr,
    pub degree: usize,
}

/// One adjacency; endpoints are ordered low, high
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyEdge<'a> {
    pub endpoints: (IpAddr, IpAddr),
    pub targets: &'a EdgeTargets,
}

#[derive(Debug, Clone, Default)]
pub struct TopologyGraph {
    graph: UnGraph<IpAddr, EdgeTargets>,
    index: HashMap<IpAddr, NodeIndex>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge every route, in iteration order
    pub fn build<'a, I>(routes: I) -> Self
    where
        I: IntoIterator<Item = &'a Route>,
    {
        let mut topology = Self::new();
        for route in routes {
            topology.add_route(route);
        }
        topology
    }

    pub fn add_route(&mut self, route: &Route) {
        let target = route.target();
        for pair in route.hops().windows(2) {
            let (Some(a), Some(b)) = (pair[0].responder, pair[1].responder) else {
                continue;
            };
            // Repeated responder at consecutive positions is not an adjacency
            if a == b {
                self.node(a);
                continue;
            }
            let edge = self.edge(a, b);
            self.graph[edge].insert(target);
        }

        // A lone responder still deserves a node
        for hop in route.responding_hops() {
            if let Some(addr) = hop.responder {
                self.node(addr);
            }
        }
    }

    fn node(&mut self, address: IpAddr) -> NodeIndex {
        if let Some(&idx) = self.index.get(&address) {
            return idx;
        }
        let idx = self.graph.add_node(address);
        self.index.insert(address, idx);
        idx
    }

    fn edge(&mut self, a: IpAddr, b: IpAddr) -> EdgeIndex {
        let a = self.node(a);
        let b = self.node(b);
        match self.graph.find_edge(a, b) {
            Some(edge) => edge,
            None => self.graph.add_edge(a, b, EdgeTargets::new()),
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, address: IpAddr) -> bool {
        self.index.contains_key(&address)
    }

    /// Number of distinct edges touching a node
    pub fn degree(&self, address: IpAddr) -> Option<usize> {
        self.index
            .get(&address)
            .map(|&idx| self.graph.edges(idx).count())
    }

    /// Targets recorded on the edge between two routers, in either order
    pub fn edge_targets(&self, a: IpAddr, b: IpAddr) -> Option<&EdgeTargets> {
        let a = *self.index.get(&a)?;
        let b = *self.index.get(&b)?;
        self.graph.find_edge(a, b).map(|e| &self.graph[e])
    }

    /// Nodes in first-seen order
    pub fn nodes(&self) -> impl Iterator<Item = TopologyNode> + '_ {
        self.graph.node_indices().map(|idx| TopologyNode {
            address: self.graph[idx],
            degree: self.graph.edges(idx).count(),
        })
    }

    /// Edges in first-seen order
    pub fn edges(&self) -> impl Iterator<Item = TopologyEdge<'_>> + '_ {
        self.graph.edge_references().map(|edge| {
            let a = self.graph[edge.source()];
            let b = self.graph[edge.target()];
            TopologyEdge {
                endpoints: if a <= b { (a, b) } else { (b, a) },
                targets: edge.weight(),
            }
        })
    }
}
