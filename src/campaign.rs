//! Running a scan campaign for one ASN and port spec from start to finish.

use std::{
    fmt,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::{
    asns::{Asn, AsnCache, LookupError, PrefixSet},
    config::CampaignConfig,
    distribution::{BucketPolicy, Distribution},
    ports::PortSpec,
    scanner::{
        ScanError, ScanRequest, ScanTool,
        output::{MalformedPolicy, OpenPortEvents, ParseError},
        targets::{Ipv4Ranges, ScanTargets},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Scanning,
    Parsing,
    Aggregating,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Resolving => "resolving",
            Stage::Scanning => "scanning",
            Stage::Parsing => "parsing",
            Stage::Aggregating => "aggregating",
            Stage::Done => "done",
        })
    }
}

/// A failure that didn't stop the campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub stage: Stage,
    pub cause: String,
}

#[derive(Debug, Error)]
pub enum CampaignFailure {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("campaign for AS{0} was cancelled")]
    Cancelled(Asn),
}

#[derive(Debug, Clone)]
pub struct CampaignReport {
    pub asn: Asn,
    pub ports: PortSpec,
    pub prefixes: PrefixSet,
    pub output_path: PathBuf,
    pub distribution: Distribution,
    /// True when there was no scan output to read at all.
    pub no_data: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub finished_at: DateTime<Utc>,
}

impl CampaignReport {
    /// Whether there's anything worth handing to the renderer.
    pub fn has_data(&self) -> bool {
        !self.distribution.is_empty()
    }

    /// Fold a later run of the same campaign into this one.
    pub fn merge(&mut self, other: CampaignReport) {
        if let Err(err) = self.distribution.merge(&other.distribution) {
            warn!(asn = %self.asn, "not merging campaign results: {err}");
            return;
        }
        self.no_data &= other.no_data;
        self.diagnostics.extend(other.diagnostics);
        self.finished_at = self.finished_at.max(other.finished_at);
    }
}

#[derive(Debug, Clone, Default)]
pub struct CampaignSettings {
    /// Raw scanner output goes in `<results_dir>/<asn>/`.
    pub results_dir: PathBuf,
    pub buckets: BucketPolicy,
    pub malformed_lines: MalformedPolicy,
    pub exclude: Option<Ipv4Ranges>,
}

/// Resolves, scans, parses and aggregates campaigns.
pub struct Coordinator {
    cache: Arc<AsnCache>,
    scanner: Arc<dyn ScanTool>,
    settings: CampaignSettings,
    /// Held from the scan until parsing is done, so campaigns that share an
    /// output file don't delete it from under each other.
    output_locks: Mutex<FxHashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl Coordinator {
    pub fn new(
        cache: Arc<AsnCache>,
        scanner: Arc<dyn ScanTool>,
        settings: CampaignSettings,
    ) -> Self {
        Self {
            cache,
            scanner,
            settings,
            output_locks: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn output_path(&self, asn: Asn, ports: &PortSpec) -> PathBuf {
        self.settings
            .results_dir
            .join(asn.to_string())
            .join(format!("scan_result_{}.txt", ports.file_tag()))
    }

    fn output_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.output_locks
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    pub async fn run(
        &self,
        asn: Asn,
        ports: &PortSpec,
        cancel: &CancellationToken,
    ) -> Result<CampaignReport, CampaignFailure> {
        let span = info_span!("campaign", %asn, %ports);
        self.run_inner(asn, ports, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        asn: Asn,
        ports: &PortSpec,
        cancel: &CancellationToken,
    ) -> Result<CampaignReport, CampaignFailure> {
        let mut diagnostics = Vec::new();
        let output_path = self.output_path(asn, ports);
        if cancel.is_cancelled() {
            return Err(CampaignFailure::Cancelled(asn));
        }

        debug!(stage = %Stage::Resolving, "resolving prefixes");
        let prefixes = match self.cache.resolve(asn).await {
            Ok(prefixes) => prefixes,
            Err(err) => {
                error!(stage = %Stage::Resolving, "{err}");
                return Err(err.into());
            }
        };

        let mut targets = ScanTargets::from_prefixes(prefixes.prefixes())
            .map_err(|source| LookupError::InvalidPrefix { asn, source })?;
        if let Some(exclude) = &self.settings.exclude {
            let removed = targets.apply_exclude(exclude);
            if !removed.is_empty() {
                info!("excluded {} ranges from this scan", removed.len());
            }
        }

        if targets.is_empty() {
            let cause = "every target address is excluded".to_string();
            warn!(stage = %Stage::Scanning, "{cause}");
            diagnostics.push(Diagnostic {
                stage: Stage::Scanning,
                cause,
            });
            return Ok(self.report(asn, ports, prefixes, output_path, None, diagnostics));
        }

        let _output_guard = tokio::select! {
            guard = self.output_lock(&output_path).lock_owned() => guard,
            _ = cancel.cancelled() => return Err(CampaignFailure::Cancelled(asn)),
        };

        info!(
            stage = %Stage::Scanning,
            "scanning {} addresses ({} prefixes) on {} ports",
            targets.count(),
            prefixes.len(),
            ports.count()
        );
        let request = ScanRequest {
            targets: targets.to_args(),
            ports: ports.clone(),
            output_path: output_path.clone(),
        };
        let scan_result = self
            .scanner
            .scan(&request, cancel)
            .await
            .and_then(|outcome| outcome.check());
        match scan_result {
            Ok(()) => {}
            Err(ScanError::Cancelled) => return Err(CampaignFailure::Cancelled(asn)),
            Err(err) => {
                if let ScanError::Process { stdout, .. } = &err {
                    if !stdout.is_empty() {
                        debug!(stage = %Stage::Scanning, "scanner output: {stdout}");
                    }
                }
                // masscan can still leave useful results behind, so carry on
                warn!(stage = %Stage::Scanning, "{err}");
                diagnostics.push(Diagnostic {
                    stage: Stage::Scanning,
                    cause: err.to_string(),
                });
            }
        }

        debug!(stage = %Stage::Parsing, "reading {}", output_path.display());
        let path = output_path.clone();
        let spec = ports.clone();
        let buckets = self.settings.buckets;
        let malformed_lines = self.settings.malformed_lines;
        let span = Span::current();
        let parsed = tokio::task::spawn_blocking(move || {
            span.in_scope(|| parse_and_aggregate(&path, &spec, &buckets, malformed_lines))
        })
        .await;

        let distribution = match parsed {
            Ok(Ok(parsed)) => {
                if parsed.skipped > 0 {
                    diagnostics.push(Diagnostic {
                        stage: Stage::Parsing,
                        cause: format!("skipped {} malformed records", parsed.skipped),
                    });
                }
                Some(parsed.distribution)
            }
            Ok(Err(err)) => {
                if matches!(err, ParseError::NotFound(_)) {
                    warn!(stage = %Stage::Parsing, "{err}, no successful scan for AS{asn}");
                } else {
                    warn!(stage = %Stage::Parsing, "giving up on scan output: {err}");
                }
                diagnostics.push(Diagnostic {
                    stage: Stage::Parsing,
                    cause: err.to_string(),
                });
                None
            }
            Err(err) => {
                error!(stage = %Stage::Parsing, "parser task failed: {err}");
                diagnostics.push(Diagnostic {
                    stage: Stage::Parsing,
                    cause: err.to_string(),
                });
                None
            }
        };

        let report = self.report(asn, ports, prefixes, output_path, distribution, diagnostics);
        info!(
            stage = %Stage::Done,
            "found {} open ports ({} absorbed errors)",
            report.distribution.total(),
            report.diagnostics.len()
        );
        Ok(report)
    }

    fn report(
        &self,
        asn: Asn,
        ports: &PortSpec,
        prefixes: PrefixSet,
        output_path: PathBuf,
        distribution: Option<Distribution>,
        diagnostics: Vec<Diagnostic>,
    ) -> CampaignReport {
        let no_data = distribution.is_none();
        CampaignReport {
            asn,
            ports: ports.clone(),
            prefixes,
            output_path,
            distribution: distribution
                .unwrap_or_else(|| Distribution::for_spec(ports, &self.settings.buckets)),
            no_data,
            diagnostics,
            finished_at: Utc::now(),
        }
    }

    /// Run several campaigns, at most `concurrency` at a time. Campaigns that
    /// fail to resolve are logged and left out; campaigns that appear more
    /// than once have their results added together. Reports come back in the
    /// order their campaigns were first listed.
    pub async fn run_all(
        &self,
        campaigns: &[CampaignConfig],
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Vec<CampaignReport> {
        let mut results = stream::iter(campaigns.iter().enumerate())
            .map(|(i, campaign)| async move {
                (i, campaign, self.run(campaign.asn, &campaign.ports, cancel).await)
            })
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<_>>()
            .await;
        results.sort_by_key(|(i, _, _)| *i);

        let mut reports: Vec<CampaignReport> = Vec::new();
        for (_, campaign, result) in results {
            let report = match result {
                Ok(report) => report,
                Err(err) => {
                    error!(asn = %campaign.asn, ports = %campaign.ports, "campaign failed: {err}");
                    continue;
                }
            };

            match reports
                .iter_mut()
                .find(|r| r.asn == report.asn && r.ports == report.ports)
            {
                Some(existing) => existing.merge(report),
                None => reports.push(report),
            }
        }
        reports
    }
}

struct Parsed {
    distribution: Distribution,
    skipped: usize,
}

fn parse_and_aggregate(
    path: &Path,
    ports: &PortSpec,
    buckets: &BucketPolicy,
    malformed_lines: MalformedPolicy,
) -> Result<Parsed, ParseError> {
    let events = OpenPortEvents::open(path)?;

    debug!(stage = %Stage::Aggregating, "folding events from {}", path.display());
    let mut distribution = Distribution::for_spec(ports, buckets);
    let mut hosts: FxHashSet<Ipv4Addr> = FxHashSet::default();
    let mut dropped = 0;
    let mut skipped = 0;
    for event in events {
        match event {
            Ok(event) => {
                if !distribution.record(event.port) {
                    dropped += 1;
                    continue;
                }
                hosts.extend(event.addr);
            }
            Err(err @ ParseError::Malformed { .. }) => match malformed_lines {
                MalformedPolicy::Skip => {
                    warn!(stage = %Stage::Parsing, "skipping {err}");
                    skipped += 1;
                }
                MalformedPolicy::Abort => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }

    if dropped > 0 {
        debug!("dropped {dropped} results outside the requested ports");
    }
    info!(
        stage = %Stage::Aggregating,
        "counted {} open ports on {} hosts",
        distribution.total(),
        hosts.len()
    );
    Ok(Parsed {
        distribution,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use std::{
        net::Ipv4Addr,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        asns::PrefixSource,
        scanner::{
            ScanOutcome,
            targets::{Ipv4Range, Ipv4Ranges},
        },
    };

    struct FakeSource(Vec<String>);

    #[async_trait]
    impl PrefixSource for FakeSource {
        async fn fetch_prefixes(&self, asn: Asn) -> Result<Vec<String>, LookupError> {
            if self.0.is_empty() {
                return Err(LookupError::NoPrefixes(asn));
            }
            Ok(self.0.clone())
        }
    }

    /// Writes a canned result file instead of scanning.
    struct FakeScanner {
        output: Option<Vec<u8>>,
        exit_status: i32,
        calls: AtomicUsize,
        targets: parking_lot::Mutex<Vec<String>>,
    }

    impl FakeScanner {
        fn new(output: Option<&str>, exit_status: i32) -> Arc<Self> {
            Arc::new(Self {
                output: output.map(|output| output.as_bytes().to_vec()),
                exit_status,
                calls: AtomicUsize::new(0),
                targets: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn with_bytes(output: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                output: Some(output),
                exit_status: 0,
                calls: AtomicUsize::new(0),
                targets: parking_lot::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ScanTool for FakeScanner {
        async fn scan(
            &self,
            request: &ScanRequest,
            cancel: &CancellationToken,
        ) -> Result<ScanOutcome, ScanError> {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.targets.lock() = request.targets.clone();

            if let Some(output) = &self.output {
                tokio::fs::create_dir_all(request.output_path.parent().unwrap()).await?;
                tokio::fs::write(&request.output_path, output).await?;
            }
            Ok(ScanOutcome {
                success: self.exit_status == 0,
                exit_status: Some(self.exit_status),
                stdout: String::new(),
                stderr: "rate limited".to_string(),
                elapsed: Duration::from_secs(1),
            })
        }
    }

    fn setup(
        dir: &Path,
        prefixes: &[&str],
        scanner: Arc<FakeScanner>,
        settings: CampaignSettings,
    ) -> Coordinator {
        let source = FakeSource(prefixes.iter().map(|p| p.to_string()).collect());
        let cache = Arc::new(AsnCache::new(dir.join("asn"), Box::new(source)));
        Coordinator::new(
            cache,
            scanner,
            CampaignSettings {
                results_dir: dir.join("masscan_results"),
                ..settings
            },
        )
    }

    fn results(ports: &[u16]) -> String {
        let mut output = "#masscan\n".to_string();
        for (i, port) in ports.iter().enumerate() {
            output.push_str(&format!("open tcp {port} 203.0.113.{i} 1700000000\n"));
        }
        output.push_str("# end\n");
        output
    }

    #[tokio::test]
    async fn test_range_campaign() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = FakeScanner::new(Some(&results(&[80, 80, 4000, 8880])), 0);
        let coordinator = setup(
            dir.path(),
            &["203.0.113.0/24"],
            scanner.clone(),
            Default::default(),
        );

        let report = coordinator
            .run(Asn(906), &"80-8880".parse().unwrap(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.has_data());
        assert!(!report.no_data);
        assert!(report.diagnostics.is_empty());
        assert_eq!(report.distribution.len(), 9);
        assert_eq!(report.distribution.get(0), Some(2));
        assert_eq!(report.distribution.get(4), Some(1));
        assert_eq!(report.distribution.get(8), Some(1));
        assert_eq!(report.distribution.total(), 4);
        assert_eq!(
            report.output_path,
            dir.path()
                .join("masscan_results")
                .join("906")
                .join("scan_result_80-8880.txt")
        );
        assert_eq!(*scanner.targets.lock(), vec!["203.0.113.0/24"]);
    }

    #[tokio::test]
    async fn test_list_campaign() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = FakeScanner::new(Some(&results(&[443, 443, 9999])), 0);
        let coordinator = setup(
            dir.path(),
            &["203.0.113.0/24"],
            scanner,
            Default::default(),
        );

        let report = coordinator
            .run(
                Asn(906),
                &"80,443,8443".parse().unwrap(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            report.distribution.iter().collect::<Vec<_>>(),
            vec![(80, 0), (443, 2), (8443, 0)]
        );
    }

    #[tokio::test]
    async fn test_missing_output_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = FakeScanner::new(None, 1);
        let coordinator = setup(
            dir.path(),
            &["203.0.113.0/24"],
            scanner,
            Default::default(),
        );

        let report = coordinator
            .run(Asn(906), &"80,443".parse().unwrap(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.no_data);
        assert!(!report.has_data());
        assert_eq!(report.distribution.len(), 2);
        assert_eq!(
            report
                .diagnostics
                .iter()
                .map(|d| d.stage)
                .collect::<Vec<_>>(),
            vec![Stage::Scanning, Stage::Parsing]
        );
    }

    #[tokio::test]
    async fn test_failed_scan_still_parses_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = FakeScanner::new(Some(&results(&[443])), 1);
        let coordinator = setup(
            dir.path(),
            &["203.0.113.0/24"],
            scanner,
            Default::default(),
        );

        let report = coordinator
            .run(Asn(906), &"443".parse().unwrap(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.distribution.get(443), Some(1));
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].stage, Stage::Scanning);
        assert!(report.diagnostics[0].cause.contains("rate limited"));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = FakeScanner::new(Some(&results(&[443])), 0);
        let coordinator = setup(dir.path(), &[], scanner.clone(), Default::default());

        let result = coordinator
            .run(Asn(906), &"443".parse().unwrap(), &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(CampaignFailure::Lookup(LookupError::NoPrefixes(_)))
        ));
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_policy() {
        let output = "open tcp 443 203.0.113.1 1\n\
                      open tcp https 203.0.113.2 1\n\
                      open tcp 443 203.0.113.3 1\n";

        let dir = tempfile::tempdir().unwrap();
        let coordinator = setup(
            dir.path(),
            &["203.0.113.0/24"],
            FakeScanner::new(Some(output), 0),
            Default::default(),
        );
        let report = coordinator
            .run(Asn(906), &"443".parse().unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.distribution.get(443), Some(2));
        assert_eq!(
            report.diagnostics,
            vec![Diagnostic {
                stage: Stage::Parsing,
                cause: "skipped 1 malformed records".to_string(),
            }]
        );

        let dir = tempfile::tempdir().unwrap();
        let coordinator = setup(
            dir.path(),
            &["203.0.113.0/24"],
            FakeScanner::new(Some(output), 0),
            CampaignSettings {
                malformed_lines: MalformedPolicy::Abort,
                ..Default::default()
            },
        );
        let report = coordinator
            .run(Asn(906), &"443".parse().unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!report.has_data());
        assert_eq!(report.diagnostics[0].stage, Stage::Parsing);
    }

    #[tokio::test]
    async fn test_undecodable_line_keeps_counts() {
        let mut output = results(&[443, 443]).into_bytes();
        output.extend_from_slice(b"banner tcp 443 203.0.113.9 1 ssl \xff\xfe\n");
        output.extend_from_slice(b"open tcp 443 203.0.113.10 1\n");

        let dir = tempfile::tempdir().unwrap();
        let coordinator = setup(
            dir.path(),
            &["203.0.113.0/24"],
            FakeScanner::with_bytes(output),
            Default::default(),
        );
        let report = coordinator
            .run(Asn(906), &"443".parse().unwrap(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!report.no_data);
        assert_eq!(report.distribution.get(443), Some(3));
        assert!(report.diagnostics.is_empty());
    }

    /// Deletes and rewrites its output slowly, like masscan does, and records
    /// how many scans of the same file overlapped.
    struct SlowScanner {
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait]
    impl ScanTool for SlowScanner {
        async fn scan(
            &self,
            request: &ScanRequest,
            _cancel: &CancellationToken,
        ) -> Result<ScanOutcome, ScanError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);

            let _ = tokio::fs::remove_file(&request.output_path).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokio::fs::create_dir_all(request.output_path.parent().unwrap()).await?;
            tokio::fs::write(&request.output_path, results(&[443])).await?;

            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ScanOutcome {
                success: true,
                exit_status: Some(0),
                stdout: String::new(),
                stderr: String::new(),
                elapsed: Duration::from_millis(50),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_same_output_file_is_not_shared() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = Arc::new(SlowScanner {
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let source = FakeSource(vec!["203.0.113.0/24".to_string()]);
        let cache = Arc::new(AsnCache::new(dir.path().join("asn"), Box::new(source)));
        let coordinator = Coordinator::new(
            cache,
            scanner.clone(),
            CampaignSettings {
                results_dir: dir.path().join("masscan_results"),
                ..Default::default()
            },
        );

        let campaign = CampaignConfig {
            asn: Asn(906),
            ports: "443".parse().unwrap(),
        };
        let reports = coordinator
            .run_all(
                &[campaign.clone(), campaign.clone(), campaign],
                3,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(scanner.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].no_data);
        assert!(reports[0].diagnostics.is_empty());
        assert_eq!(reports[0].distribution.get(443), Some(3));
    }

    #[tokio::test]
    async fn test_excluded_targets() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = FakeScanner::new(Some(&results(&[443])), 0);
        let exclude = Ipv4Ranges::new(vec![Ipv4Range::single(Ipv4Addr::new(203, 0, 113, 0))]);
        let coordinator = setup(
            dir.path(),
            &["203.0.113.0/24", "198.51.100.0/24"],
            scanner.clone(),
            CampaignSettings {
                exclude: Some(exclude),
                ..Default::default()
            },
        );

        coordinator
            .run(Asn(906), &"443".parse().unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            *scanner.targets.lock(),
            vec!["198.51.100.0-198.51.100.255", "203.0.113.1-203.0.113.255"]
        );

        // nothing left to scan
        let dir = tempfile::tempdir().unwrap();
        let scanner = FakeScanner::new(Some(&results(&[443])), 0);
        let exclude = Ipv4Ranges::new(vec![Ipv4Range::from_cidr("0.0.0.0/0").unwrap()]);
        let coordinator = setup(
            dir.path(),
            &["203.0.113.0/24"],
            scanner.clone(),
            CampaignSettings {
                exclude: Some(exclude),
                ..Default::default()
            },
        );
        let report = coordinator
            .run(Asn(906), &"443".parse().unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.no_data);
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_campaign() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = FakeScanner::new(Some(&results(&[443])), 0);
        let coordinator = setup(
            dir.path(),
            &["203.0.113.0/24"],
            scanner,
            Default::default(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = coordinator
            .run(Asn(906), &"443".parse().unwrap(), &cancel)
            .await;
        assert!(matches!(result, Err(CampaignFailure::Cancelled(Asn(906)))));
    }

    #[tokio::test]
    async fn test_run_all_merges_repeated_campaigns() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = FakeScanner::new(Some(&results(&[80, 443, 443])), 0);
        let coordinator = setup(
            dir.path(),
            &["203.0.113.0/24"],
            scanner.clone(),
            Default::default(),
        );

        let campaigns = vec![
            CampaignConfig {
                asn: Asn(906),
                ports: "80,443".parse().unwrap(),
            },
            CampaignConfig {
                asn: Asn(906),
                ports: "1-1000".parse().unwrap(),
            },
            CampaignConfig {
                asn: Asn(906),
                ports: "80,443".parse().unwrap(),
            },
        ];
        let reports = coordinator
            .run_all(&campaigns, 1, &CancellationToken::new())
            .await;

        assert_eq!(scanner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].ports, PortSpec::List(vec![80, 443]));
        assert_eq!(reports[0].distribution.get(80), Some(2));
        assert_eq!(reports[0].distribution.get(443), Some(4));
        assert_eq!(reports[1].distribution.total(), 3);
    }
}
