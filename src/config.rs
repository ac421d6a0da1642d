use std::{fs, path::PathBuf};

use serde::Deserialize;

use crate::{
    asns::Asn, distribution::BucketPolicy, ports::PortSpec, scanner::output::MalformedPolicy,
};

#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Where the per-ASN prefix files are kept. Defaults to `asn`.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Where masscan writes its raw output, one directory per ASN. Defaults to
    /// `masscan_results`.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Where finished distributions are written for the chart renderer.
    /// Defaults to `ports_results`.
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// If set, debug logs are also written to a daily rolling file here.
    #[serde(default)]
    pub logging_dir: Option<PathBuf>,

    /// How many campaigns run at once. Scans still happen one at a time, but
    /// lookups and parsing can overlap with them. Defaults to 1.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub malformed_lines: MalformedPolicy,

    /// Addresses that are never scanned, in the same format as masscan's
    /// exclude.conf.
    #[serde(default)]
    pub exclude_file: Option<PathBuf>,

    #[serde(default)]
    pub lookup: LookupConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub buckets: BucketPolicy,

    pub campaigns: Vec<CampaignConfig>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct LookupConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.bgpview.io".to_string(),
            user_agent: "curl/7.68.0".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct ScannerConfig {
    pub binary: PathBuf,
    /// Packets per second, passed as `--rate`.
    pub rate: u64,
    /// How long masscan waits for replies after sending, passed as `--wait`.
    pub wait_secs: u64,
    /// Hard limit on how long masscan may run before it's killed. This should
    /// be comfortably longer than the scan itself plus `wait_secs`.
    pub timeout_secs: u64,
    /// Appended to the command line as-is.
    pub extra_args: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("masscan"),
            rate: 20_000,
            wait_secs: 5,
            timeout_secs: 60 * 60,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CampaignConfig {
    pub asn: Asn,
    pub ports: PortSpec,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("asn")
}
fn default_results_dir() -> PathBuf {
    PathBuf::from("masscan_results")
}
fn default_report_dir() -> PathBuf {
    PathBuf::from("ports_results")
}
fn default_concurrency() -> usize {
    1
}

impl Config {
    pub fn from_file(path: impl Into<PathBuf>) -> eyre::Result<Self> {
        let path = path.into().canonicalize()?;
        let config = toml::from_str(&fs::read_to_string(path)?)?;
        Ok(config)
    }
}
