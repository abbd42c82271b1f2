//! Concurrent /24 subnet scanner.
//!
//! For a local address `a.b.c.d` the scanner probes `a.b.c.2 ..= a.b.c.254`
//! on one port and reports which addresses accepted a connection.  A probe
//! is a bare connect with a timeout: success means "device present", any
//! failure means "absent".  Absence is the normal outcome for almost every
//! address, so probe failures are never surfaced as errors.
//!
//! # Concurrency
//!
//! Every `probe_all` call builds its own [`Semaphore`] and [`JoinSet`]; two
//! overlapping scans share nothing.  A probe task is only spawned once it
//! holds a permit, so at most `parallelism` probes are in flight and, on
//! cancellation, addresses that have not started are simply never spawned.
//! The call returns only after the join set is drained, so no probe task
//! outlives it.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use fir_core::protocol::constants::UNRESOLVED_NAME;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::connector::Connector;

/// Default number of probes in flight at once.
pub const DEFAULT_PARALLELISM: usize = 32;

/// Default limit for a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lowest last octet probed.  `.0` is the network and `.1` is assumed to be
/// the gateway.
const FIRST_HOST: u8 = 2;

/// Highest last octet probed; `.255` is the broadcast address.
const LAST_HOST: u8 = 254;

/// Error type for scan operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    /// The scan was interrupted before any probe resolved.
    #[error("scan cancelled")]
    Cancelled,
}

/// Tuning knobs for one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Maximum probes in flight.  Values below 1 are treated as 1.
    pub parallelism: usize,
    /// Limit for each connect attempt.
    pub probe_timeout: Duration,
    /// Skip the caller's own address.
    pub exclude_self: bool,
    /// Emit a `debug` event per probe attempt and per hit.
    pub log_probes: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            exclude_self: true,
            log_probes: false,
        }
    }
}

/// A reachable device found by a scan.
///
/// Values are only produced by the scanner and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanResult {
    name: String,
    addr: Ipv4Addr,
    port: u16,
}

impl ScanResult {
    /// A result whose device has not declared a name yet.
    fn unresolved(addr: Ipv4Addr, port: u16) -> Self {
        Self {
            name: UNRESOLVED_NAME.to_string(),
            addr,
            port,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.addr, self.port)
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}:{}>", self.name, self.addr, self.port)
    }
}

/// Result of probing a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub addr: Ipv4Addr,
    pub reachable: bool,
}

/// Every probe that resolved during a sweep, in completion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSweep {
    pub outcomes: Vec<ProbeOutcome>,
    /// Number of candidate addresses generated.
    pub candidates: usize,
    /// `true` when the sweep stopped early; `outcomes` is then a subset.
    pub cancelled: bool,
}

/// Reachable subset of a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub results: Vec<ScanResult>,
    /// Number of probes that resolved, reachable or not.
    pub probed: usize,
    /// Number of candidate addresses generated.
    pub candidates: usize,
    pub cancelled: bool,
}

/// Generates the candidate addresses for the /24 around `local`.
///
/// The result covers `.2 ..= .254` in ascending order, minus the local
/// address itself when `exclude_self` is set.
pub fn candidates(local: Ipv4Addr, exclude_self: bool) -> Vec<Ipv4Addr> {
    let [a, b, c, own] = local.octets();
    (FIRST_HOST..=LAST_HOST)
        .filter(|&host| !(exclude_self && host == own))
        .map(|host| Ipv4Addr::new(a, b, c, host))
        .collect()
}

/// Probes the local subnet through a [`Connector`].
pub struct Scanner<C: Connector> {
    connector: Arc<C>,
    options: ScanOptions,
}

impl<C: Connector> Scanner<C> {
    pub fn new(connector: Arc<C>, options: ScanOptions) -> Self {
        Self { connector, options }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Probes every candidate around `local` on `port` and reports each
    /// resolved probe.
    ///
    /// Output order follows probe completion, not address order.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Cancelled`] if `cancel` fires before any probe
    /// resolved.  If some had resolved, they are returned with
    /// `cancelled = true` instead.
    pub async fn probe_all(
        &self,
        local: Ipv4Addr,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<ProbeSweep, ScanError> {
        let targets = candidates(local, self.options.exclude_self);
        let total = targets.len();
        let permits = Arc::new(Semaphore::new(self.options.parallelism.max(1)));
        let mut probes = JoinSet::new();
        let mut cancelled = false;

        for addr in targets {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    // The semaphore is never closed while this loop runs.
                    Err(_) => break,
                },
            };

            let connector = Arc::clone(&self.connector);
            let token = cancel.clone();
            let probe_timeout = self.options.probe_timeout;
            let log_probes = self.options.log_probes;

            probes.spawn(async move {
                let _permit = permit;
                let target = SocketAddrV4::new(addr, port);
                if log_probes {
                    debug!(%target, "probing");
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    reachable = probe(connector.as_ref(), target, probe_timeout) => {
                        if log_probes && reachable {
                            debug!(%target, "device answered");
                        }
                        Some(ProbeOutcome { addr, reachable })
                    }
                }
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => cancelled = true,
                Err(e) => warn!("probe task failed: {e}"),
            }
        }

        if cancelled && outcomes.is_empty() {
            return Err(ScanError::Cancelled);
        }

        Ok(ProbeSweep {
            outcomes,
            candidates: total,
            cancelled,
        })
    }

    /// Probes the subnet and keeps only reachable addresses.
    ///
    /// # Errors
    ///
    /// Same as [`Scanner::probe_all`].
    pub async fn scan(
        &self,
        local: Ipv4Addr,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let sweep = self.probe_all(local, port, cancel).await?;
        let results = sweep
            .outcomes
            .iter()
            .filter(|o| o.reachable)
            .map(|o| ScanResult::unresolved(o.addr, port))
            .collect();

        Ok(ScanReport {
            results,
            probed: sweep.outcomes.len(),
            candidates: sweep.candidates,
            cancelled: sweep.cancelled,
        })
    }
}

/// One bounded connect.  The stream is dropped straight away.
async fn probe<C: Connector>(connector: &C, target: SocketAddrV4, limit: Duration) -> bool {
    matches!(
        tokio::time::timeout(limit, connector.connect(target)).await,
        Ok(Ok(_))
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::DuplexStream;

    /// In-memory subnet: some addresses accept, some never answer, the rest
    /// refuse.  Tracks how many connects overlap.
    #[derive(Default)]
    struct FakeSubnet {
        reachable: HashSet<Ipv4Addr>,
        silent: HashSet<Ipv4Addr>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        dialed: Mutex<Vec<Ipv4Addr>>,
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl FakeSubnet {
        fn with_reachable(hosts: &[u8]) -> Self {
            Self {
                reachable: hosts.iter().map(|&h| Ipv4Addr::new(192, 168, 1, h)).collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Connector for FakeSubnet {
        type Stream = DuplexStream;

        async fn connect(&self, addr: SocketAddrV4) -> io::Result<DuplexStream> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlight(&self.in_flight);
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.dialed.lock().unwrap().push(*addr.ip());

            // Stagger completions so probes resolve out of address order.
            let jitter = u64::from(255 - addr.ip().octets()[3]) % 5;
            tokio::time::sleep(Duration::from_millis(jitter)).await;

            if self.silent.contains(addr.ip()) {
                std::future::pending::<()>().await;
            }
            if self.reachable.contains(addr.ip()) {
                Ok(tokio::io::duplex(16).0)
            } else {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            }
        }
    }

    fn local() -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 1, 10)
    }

    fn options(parallelism: usize) -> ScanOptions {
        ScanOptions {
            parallelism,
            probe_timeout: Duration::from_millis(200),
            ..ScanOptions::default()
        }
    }

    // ── candidates ───────────────────────────────────────────────────────────

    #[test]
    fn test_candidates_cover_two_to_254() {
        let all = candidates(local(), false);
        assert_eq!(all.len(), 253);
        assert_eq!(all.first(), Some(&Ipv4Addr::new(192, 168, 1, 2)));
        assert_eq!(all.last(), Some(&Ipv4Addr::new(192, 168, 1, 254)));
    }

    #[test]
    fn test_candidates_exclude_self_when_requested() {
        let all = candidates(local(), true);
        assert_eq!(all.len(), 252);
        assert!(!all.contains(&local()));
    }

    #[test]
    fn test_candidates_self_outside_range_changes_nothing() {
        let gateway = Ipv4Addr::new(10, 0, 0, 1);
        assert_eq!(candidates(gateway, true).len(), 253);
    }

    #[test]
    fn test_candidates_never_include_network_gateway_or_broadcast() {
        let all = candidates(local(), false);
        for host in [0u8, 1, 255] {
            assert!(!all.contains(&Ipv4Addr::new(192, 168, 1, host)));
        }
    }

    // ── ScanResult ───────────────────────────────────────────────────────────

    #[test]
    fn test_scan_result_display_uses_placeholder_name() {
        let result = ScanResult::unresolved(Ipv4Addr::new(192, 168, 1, 42), 7708);
        assert_eq!(result.to_string(), "<??? 192.168.1.42:7708>");
        assert_eq!(result.socket_addr().port(), 7708);
    }

    // ── scanning ─────────────────────────────────────────────────────────────

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scan_returns_exactly_the_reachable_hosts() {
        // Arrange
        let subnet = Arc::new(FakeSubnet::with_reachable(&[11, 42, 200]));
        let scanner = Scanner::new(subnet, options(32));

        // Act
        let report = scanner
            .scan(local(), 7708, &CancellationToken::new())
            .await
            .unwrap();

        // Assert
        let found: HashSet<Ipv4Addr> = report.results.iter().map(|r| r.addr()).collect();
        let expected: HashSet<Ipv4Addr> = [11, 42, 200]
            .into_iter()
            .map(|h| Ipv4Addr::new(192, 168, 1, h))
            .collect();
        assert_eq!(found, expected);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.probed, 252);
        assert!(!report.cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_probe_all_reports_every_candidate() {
        let subnet = Arc::new(FakeSubnet::with_reachable(&[3]));
        let scanner = Scanner::new(Arc::clone(&subnet), options(16));

        let sweep = scanner
            .probe_all(local(), 7708, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sweep.outcomes.len(), 252);
        assert_eq!(sweep.candidates, 252);
        assert_eq!(sweep.outcomes.iter().filter(|o| o.reachable).count(), 1);
        assert!(!subnet.dialed.lock().unwrap().contains(&local()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scan_never_exceeds_parallelism() {
        let subnet = Arc::new(FakeSubnet::with_reachable(&[5, 6, 7]));
        let scanner = Scanner::new(Arc::clone(&subnet), options(4));

        scanner
            .scan(local(), 7708, &CancellationToken::new())
            .await
            .unwrap();

        let peak = subnet.peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "peak in-flight probes was {peak}");
        assert!(peak >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_silent_hosts_time_out_as_absent() {
        // Arrange: two hosts never answer; the probe timeout resolves them.
        let mut subnet = FakeSubnet::with_reachable(&[20]);
        subnet.silent = [21, 22]
            .into_iter()
            .map(|h| Ipv4Addr::new(192, 168, 1, h))
            .collect();
        let scanner = Scanner::new(Arc::new(subnet), options(64));

        // Act
        let report = scanner
            .scan(local(), 7708, &CancellationToken::new())
            .await
            .unwrap();

        // Assert
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.probed, 252);
    }

    #[tokio::test]
    async fn test_parallelism_zero_is_treated_as_one() {
        let subnet = Arc::new(FakeSubnet::with_reachable(&[2]));
        let scanner = Scanner::new(Arc::clone(&subnet), options(0));

        let report = scanner
            .scan(local(), 7708, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(subnet.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start_returns_cancelled() {
        let subnet = Arc::new(FakeSubnet::with_reachable(&[11]));
        let scanner = Scanner::new(Arc::clone(&subnet), options(8));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = scanner.scan(local(), 7708, &cancel).await;

        assert_eq!(result, Err(ScanError::Cancelled));
        assert!(subnet.dialed.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_mid_scan_returns_resolved_subset() {
        // Arrange: .2-.5 answer at once, everything else hangs past the
        // probe timeout, so the scan stalls after the first few probes.
        let mut subnet = FakeSubnet::with_reachable(&[2, 3, 4, 5]);
        subnet.silent = candidates(local(), true)
            .into_iter()
            .filter(|ip| ip.octets()[3] > 5)
            .collect();
        let subnet = Arc::new(subnet);
        let scanner = Scanner::new(
            Arc::clone(&subnet),
            ScanOptions {
                parallelism: 8,
                probe_timeout: Duration::from_secs(30),
                ..ScanOptions::default()
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        // Act
        let report = scanner.scan(local(), 7708, &cancel).await.unwrap();

        // Assert
        assert!(report.cancelled);
        assert_eq!(report.results.len(), 4);
        assert!(subnet.dialed.lock().unwrap().len() < 252, "unstarted probes must not run");
        assert_eq!(subnet.in_flight.load(Ordering::SeqCst), 0, "no probe may outlive the scan");
    }
}
