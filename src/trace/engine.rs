use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::probe::{ProbeChannel, ProbeTransport, get_identifier};
use crate::state::{Route, RouteSet};

/// Finished routes keyed by target, written once per target by its own task
pub type RouteMap = Arc<RwLock<HashMap<IpAddr, Route>>>;

/// Create a new empty route map
pub fn new_route_map() -> RouteMap {
    Arc::new(RwLock::new(HashMap::new()))
}

/// The probe engine traces every target through a bounded pool of tasks
pub struct ProbeEngine<T: ProbeTransport> {
    config: Config,
    transport: Arc<T>,
    cancel: CancellationToken,
}

impl<T: ProbeTransport> ProbeEngine<T> {
    pub fn new(config: Config, transport: T, cancel: CancellationToken) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            cancel,
        }
    }

    /// Trace all targets and return their routes in the given order.
    ///
    /// Targets still outstanding when the deadline (or the caller's token)
    /// fires are listed as abandoned; routes finished before that are kept.
    pub async fn run(&self, targets: &[IpAddr]) -> RouteSet {
        let started_at = Utc::now();
        let results = new_route_map();
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let cancel = self.cancel.child_token();

        let deadline_timer = self.config.deadline.map(|deadline| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(deadline) => {
                        warn!(?deadline, "deadline reached, stopping outstanding probes");
                        cancel.cancel();
                    }
                }
            })
        });

        let mut tasks = JoinSet::new();
        for (index, &target) in targets.iter().enumerate() {
            // Acquire before spawning so at most `workers` sockets are open
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let transport = Arc::clone(&self.transport);
            let results = Arc::clone(&results);
            let config = self.config.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let identifier = get_identifier(index);
                if let Some(route) = trace_target(&*transport, target, identifier, &config, &cancel).await {
                    results.write().insert(target, route);
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "probe task failed");
            }
        }

        if let Some(timer) = deadline_timer {
            timer.abort();
        }

        let mut finished = std::mem::take(&mut *results.write());
        let mut routes = Vec::with_capacity(finished.len());
        let mut abandoned = Vec::new();
        for target in targets {
            match finished.remove(target) {
                Some(route) => routes.push(route),
                None => abandoned.push(*target),
            }
        }

        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "targets abandoned before their route finished");
        }

        RouteSet::new(started_at, routes, abandoned)
    }
}

/// Probe one target position by position.
///
/// Positions run strictly in order because an echo reply at one position
/// ends the route. Returns None when cancelled; the partial route is
/// dropped along with the channel.
pub async fn trace_target<T: ProbeTransport>(
    transport: &T,
    target: IpAddr,
    identifier: u16,
    config: &Config,
    cancel: &CancellationToken,
) -> Option<Route> {
    if cancel.is_cancelled() {
        return None;
    }

    let mut channel = match transport.open(target, identifier) {
        Ok(channel) => channel,
        Err(e) => {
            warn!(target_addr = %target, error = %e, "cannot probe target, recording it unresponsive");
            return Some(Route::unresponsive(target, config.max_hops));
        }
    };

    let mut route = Route::new(target);
    for position in 1..=config.max_hops {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(target_addr = %target, position, "cancelled, discarding partial route");
                return None;
            }
            outcome = channel.probe(position, config.timeout) => outcome,
        };

        let (responder, reached) = match outcome {
            Ok(Some(reply)) => (Some(reply.responder), reply.is_destination()),
            Ok(None) => (None, false),
            Err(e) => {
                debug!(target_addr = %target, position, error = %e, "probe failed");
                (None, false)
            }
        };

        match route.push(responder, reached) {
            Ok(hop) => debug!(target_addr = %target, position, hop = %hop, reached, "hop recorded"),
            Err(e) => {
                warn!(error = %e, "route full");
                break;
            }
        }

        if reached {
            break;
        }
    }

    info!(
        target_addr = %target,
        hops = route.len(),
        status = ?route.status(),
        "route finished"
    );
    Some(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeError, ProbeReply};
    use crate::state::RouteStatus;
    use async_trait::async_trait;
    use std::io;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    /// Replays a fixed path; positions past the path are silent
    struct ScriptedChannel {
        path: Vec<Option<ProbeReply>>,
        probed: Arc<RwLock<Vec<u8>>>,
    }

    #[async_trait]
    impl ProbeChannel for ScriptedChannel {
        async fn probe(&mut self, hop_limit: u8, _timeout: Duration) -> Result<Option<ProbeReply>, ProbeError> {
            self.probed.write().push(hop_limit);
            Ok(self.path.get(hop_limit as usize - 1).copied().flatten())
        }
    }

    #[derive(Default)]
    struct ScriptedTransport {
        paths: HashMap<IpAddr, Vec<Option<ProbeReply>>>,
        probed: Arc<RwLock<Vec<u8>>>,
    }

    impl ScriptedTransport {
        fn with_path(mut self, target: IpAddr, path: Vec<Option<ProbeReply>>) -> Self {
            self.paths.insert(target, path);
            self
        }
    }

    impl ProbeTransport for ScriptedTransport {
        type Channel = ScriptedChannel;

        fn open(&self, target: IpAddr, _identifier: u16) -> Result<ScriptedChannel, ProbeError> {
            match self.paths.get(&target) {
                Some(path) => Ok(ScriptedChannel {
                    path: path.clone(),
                    probed: Arc::clone(&self.probed),
                }),
                None => Err(ProbeError::Permission(io::Error::from(io::ErrorKind::PermissionDenied))),
            }
        }
    }

    /// Never answers, each probe waits for the full timeout
    struct SilentTransport;

    struct SilentChannel;

    #[async_trait]
    impl ProbeChannel for SilentChannel {
        async fn probe(&mut self, _hop_limit: u8, timeout: Duration) -> Result<Option<ProbeReply>, ProbeError> {
            tokio::time::sleep(timeout).await;
            Ok(None)
        }
    }

    impl ProbeTransport for SilentTransport {
        type Channel = SilentChannel;

        fn open(&self, _target: IpAddr, _identifier: u16) -> Result<SilentChannel, ProbeError> {
            Ok(SilentChannel)
        }
    }

    /// Tracks how many channels are open at once
    #[derive(Default)]
    struct CountingTransport {
        open: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    struct CountingChannel {
        target: IpAddr,
        open: Arc<AtomicUsize>,
    }

    impl Drop for CountingChannel {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ProbeChannel for CountingChannel {
        async fn probe(&mut self, hop_limit: u8, _timeout: Duration) -> Result<Option<ProbeReply>, ProbeError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if hop_limit < 3 {
                Ok(Some(ProbeReply::time_exceeded(ip(200 + hop_limit))))
            } else {
                Ok(Some(ProbeReply::echo_reply(self.target)))
            }
        }
    }

    impl ProbeTransport for CountingTransport {
        type Channel = CountingChannel;

        fn open(&self, target: IpAddr, _identifier: u16) -> Result<CountingChannel, ProbeError> {
            let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            Ok(CountingChannel {
                target,
                open: Arc::clone(&self.open),
            })
        }
    }

    fn hop(n: u8) -> Option<ProbeReply> {
        Some(ProbeReply::time_exceeded(ip(100 + n)))
    }

    #[tokio::test]
    async fn test_stops_at_echo_reply() {
        let transport = ScriptedTransport::default().with_path(
            ip(1),
            vec![hop(1), hop(2), Some(ProbeReply::echo_reply(ip(1))), hop(4)],
        );
        let probed = Arc::clone(&transport.probed);

        let route = trace_target(&transport, ip(1), 1, &Config::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(route.len(), 3);
        assert_eq!(route.status(), RouteStatus::Complete);
        assert_eq!(*probed.read(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_silent_positions_recorded_and_probing_continues() {
        let transport = ScriptedTransport::default().with_path(
            ip(1),
            vec![hop(1), None, Some(ProbeReply::echo_reply(ip(1)))],
        );

        let route = trace_target(&transport, ip(1), 1, &Config::default(), &CancellationToken::new())
            .await
            .unwrap();

        let responders: Vec<Option<IpAddr>> = route.hops().iter().map(|h| h.responder).collect();
        assert_eq!(responders, vec![Some(ip(101)), None, Some(ip(1))]);
    }

    #[tokio::test]
    async fn test_truncated_route_probes_every_position() {
        let transport = ScriptedTransport::default().with_path(ip(1), vec![hop(1), hop(2)]);
        let probed = Arc::clone(&transport.probed);
        let config = Config {
            max_hops: 5,
            ..Config::default()
        };

        let route = trace_target(&transport, ip(1), 1, &config, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(route.len(), 5);
        assert_eq!(route.status(), RouteStatus::Truncated);
        assert_eq!(*probed.read(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_unopenable_target_is_all_unresponsive() {
        let transport = ScriptedTransport::default();

        let route = trace_target(&transport, ip(7), 1, &Config::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(route.len(), 30);
        assert!(route.hops().iter().all(|h| !h.is_responding()));
    }

    #[tokio::test]
    async fn test_run_keeps_enumeration_order() {
        let transport = ScriptedTransport::default()
            .with_path(ip(1), vec![hop(1), Some(ProbeReply::echo_reply(ip(1)))])
            .with_path(ip(2), vec![Some(ProbeReply::echo_reply(ip(2)))])
            .with_path(ip(3), vec![hop(1), hop(2), Some(ProbeReply::echo_reply(ip(3)))]);
        let engine = ProbeEngine::new(Config::default(), transport, CancellationToken::new());

        let routes = engine.run(&[ip(1), ip(2), ip(3), ip(4)]).await;

        let order: Vec<IpAddr> = routes.iter().map(|r| r.target()).collect();
        assert_eq!(order, vec![ip(1), ip(2), ip(3), ip(4)]);
        assert_eq!(routes.baseline().map(|r| r.target()), Some(ip(1)));
        assert!(routes.abandoned().is_empty());
        // ip(4) had no socket and still produced a route
        assert_eq!(routes.get(ip(4)).map(|r| r.len()), Some(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_abandons_outstanding_targets() {
        let config = Config {
            workers: 2,
            deadline: Some(Duration::from_secs(5)),
            ..Config::default()
        };
        let engine = ProbeEngine::new(config, SilentTransport, CancellationToken::new());

        let routes = engine.run(&[ip(1), ip(2), ip(3)]).await;

        // 30 silent positions at 1s each never finish inside 5s
        assert!(routes.is_empty());
        assert_eq!(routes.abandoned(), &[ip(1), ip(2), ip(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_channels_never_exceed_workers() {
        let transport = CountingTransport::default();
        let (open, peak) = (Arc::clone(&transport.open), Arc::clone(&transport.peak));
        let config = Config {
            workers: 3,
            ..Config::default()
        };
        let engine = ProbeEngine::new(config, transport, CancellationToken::new());
        let targets: Vec<IpAddr> = (1..=100).map(|n| IpAddr::V4(Ipv4Addr::new(10, 0, 1, n))).collect();

        let routes = engine.run(&targets).await;

        assert_eq!(routes.len(), 100);
        assert!(routes.iter().all(|r| r.is_complete()));
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_traces_nothing() {
        let transport = ScriptedTransport::default().with_path(ip(1), vec![Some(ProbeReply::echo_reply(ip(1)))]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(trace_target(&transport, ip(1), 1, &Config::default(), &cancel).await.is_none());
    }
}
