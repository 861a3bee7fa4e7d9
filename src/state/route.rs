use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// Upper bound on hop-limited positions in a single route
pub const MAX_HOPS: u8 = 30;

/// Address family of a probed address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "IPv4"),
            Self::V6 => write!(f, "IPv6"),
        }
    }
}

/// One probe position in a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hop {
    /// Hop-limit used for this probe (1-based)
    pub position: u8,
    /// Address that answered, None if nothing came back before the timeout
    pub responder: Option<IpAddr>,
    /// Set when the answer was an echo reply from the target
    pub reached: bool,
}

impl Hop {
    pub fn responding(position: u8, responder: IpAddr) -> Self {
        Self {
            position,
            responder: Some(responder),
            reached: false,
        }
    }

    pub fn unresponsive(position: u8) -> Self {
        Self {
            position,
            responder: None,
            reached: false,
        }
    }

    pub fn is_responding(&self) -> bool {
        self.responder.is_some()
    }
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.responder {
            Some(ip) => write!(f, "{}", ip),
            None => write!(f, "*"),
        }
    }
}

/// Rejected attempts to extend a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("route to {0} already holds {MAX_HOPS} hops")]
    Full(IpAddr),
    #[error("route to {0} already reached its destination")]
    Complete(IpAddr),
}

/// Whether a route ended at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStatus {
    Complete,
    Truncated,
}

/// Ordered hops discovered toward one target.
///
/// Positions are assigned on insertion, so they always run 1, 2, 3, ...
/// without gaps, and nothing can follow a destination-reached hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    target: IpAddr,
    hops: Vec<Hop>,
}

impl Route {
    pub fn new(target: IpAddr) -> Self {
        Self {
            target,
            hops: Vec::with_capacity(MAX_HOPS as usize),
        }
    }

    /// Route recorded when the target could not be probed at all
    pub fn unresponsive(target: IpAddr, max_hops: u8) -> Self {
        let max_hops = max_hops.min(MAX_HOPS);
        Self {
            target,
            hops: (1..=max_hops).map(Hop::unresponsive).collect(),
        }
    }

    /// Build a route from responders in position order.
    ///
    /// When `complete` is set the last responder is marked destination-reached.
    pub fn from_responders<I>(target: IpAddr, responders: I, complete: bool) -> Result<Self, RouteError>
    where
        I: IntoIterator<Item = Option<IpAddr>>,
    {
        let responders: Vec<Option<IpAddr>> = responders.into_iter().collect();
        let last = responders.len();
        let mut route = Self::new(target);
        for (i, responder) in responders.into_iter().enumerate() {
            route.push(responder, complete && i + 1 == last)?;
        }
        Ok(route)
    }

    /// Append the next position
    pub fn push(&mut self, responder: Option<IpAddr>, reached: bool) -> Result<&Hop, RouteError> {
        if self.is_complete() {
            return Err(RouteError::Complete(self.target));
        }
        if self.hops.len() >= MAX_HOPS as usize {
            return Err(RouteError::Full(self.target));
        }

        let position = self.hops.len() as u8 + 1;
        self.hops.push(Hop {
            position,
            responder,
            // Only a responding hop can be the destination
            reached: reached && responder.is_some(),
        });
        Ok(&self.hops[self.hops.len() - 1])
    }

    pub fn target(&self) -> IpAddr {
        self.target
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.hops.last().is_some_and(|h| h.reached)
    }

    pub fn status(&self) -> RouteStatus {
        if self.is_complete() {
            RouteStatus::Complete
        } else {
            RouteStatus::Truncated
        }
    }

    /// Hops that produced an answer
    pub fn responding_hops(&self) -> impl Iterator<Item = &Hop> {
        self.hops.iter().filter(|h| h.is_responding())
    }
}

/// All routes of one run, in enumeration order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSet {
    pub started_at: DateTime<Utc>,
    routes: Vec<Route>,
    /// Targets whose probing was stopped by the deadline
    abandoned: Vec<IpAddr>,
}

impl RouteSet {
    pub fn new(started_at: DateTime<Utc>, routes: Vec<Route>, abandoned: Vec<IpAddr>) -> Self {
        Self {
            started_at,
            routes,
            abandoned,
        }
    }

    pub fn from_routes(routes: Vec<Route>) -> Self {
        Self::new(Utc::now(), routes, Vec::new())
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn abandoned(&self) -> &[IpAddr] {
        &self.abandoned
    }

    pub fn get(&self, target: IpAddr) -> Option<&Route> {
        self.routes.iter().find(|r| r.target == target)
    }

    /// Route of the first probed target in enumeration order
    pub fn baseline(&self) -> Option<&Route> {
        self.routes.first()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Route> {
        self.routes.iter()
    }
}

impl<'a> IntoIterator for &'a RouteSet {
    type Item = &'a Route;
    type IntoIter = std::slice::Iter<'a, Route>;

    fn into_iter(self) -> Self::IntoIter {
        self.routes.iter()
    }
}
