//! Looking up the IPv4 prefixes an ASN announces.
//!
//! Results are cached on disk as one JSON file per ASN (`<cache_dir>/<asn>`)
//! and never expire. Delete the file to force a fresh lookup.

use std::{
    fmt, io,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::LookupConfig,
    scanner::targets::{InvalidPrefix, Ipv4Range},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Asn(pub u32);

impl FromStr for Asn {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = match s.get(..2) {
            Some(prefix) if prefix.eq_ignore_ascii_case("as") => &s[2..],
            _ => s,
        };
        digits.parse().map(Asn)
    }
}

impl fmt::Display for Asn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Asn {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u32(self.0)
    }
}

// accept both `asn = 906` and `asn = "AS906"`
impl<'de> Deserialize<'de> for Asn {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u32),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(Asn(n)),
            Repr::Text(s) => s
                .parse()
                .map_err(|_| serde::de::Error::custom(format!("invalid ASN {s:?}"))),
        }
    }
}

/// The prefixes announced by an ASN, in the order the lookup returned them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrefixSet(Vec<String>);

impl PrefixSet {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self(prefixes)
    }

    pub fn prefixes(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("prefix lookup for AS{asn} failed: {source}")]
    Request {
        asn: Asn,
        #[source]
        source: reqwest::Error,
    },
    #[error("prefix lookup for AS{asn} returned an unexpected response: {reason}")]
    Malformed { asn: Asn, reason: String },
    #[error("AS{0} doesn't announce any IPv4 prefixes")]
    NoPrefixes(Asn),
    #[error("AS{asn} has an {source}")]
    InvalidPrefix {
        asn: Asn,
        #[source]
        source: InvalidPrefix,
    },
    #[error("address block cache for AS{asn} at {}: {source}", .path.display())]
    Cache {
        asn: Asn,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cached prefixes for AS{asn} at {} are corrupt: {source}", .path.display())]
    CorruptCache {
        asn: Asn,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Somewhere prefixes can be looked up when they aren't cached.
#[async_trait]
pub trait PrefixSource: Send + Sync {
    async fn fetch_prefixes(&self, asn: Asn) -> Result<Vec<String>, LookupError>;
}

/// The bgpview.io API (`/asn/{asn}/prefixes`).
pub struct BgpView {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct BgpViewResponse {
    data: BgpViewData,
}

#[derive(Deserialize)]
struct BgpViewData {
    ipv4_prefixes: Vec<BgpViewPrefix>,
}

#[derive(Deserialize)]
struct BgpViewPrefix {
    prefix: String,
}

impl BgpView {
    pub fn new(config: &LookupConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn parse_bgpview_body(asn: Asn, body: &[u8]) -> Result<Vec<String>, LookupError> {
    let resp: BgpViewResponse =
        serde_json::from_slice(body).map_err(|err| LookupError::Malformed {
            asn,
            reason: err.to_string(),
        })?;

    Ok(resp
        .data
        .ipv4_prefixes
        .into_iter()
        .map(|p| p.prefix)
        .collect())
}

#[async_trait]
impl PrefixSource for BgpView {
    async fn fetch_prefixes(&self, asn: Asn) -> Result<Vec<String>, LookupError> {
        let url = format!("{}/asn/{asn}/prefixes", self.base_url);
        debug!("GET {url}");

        let request_error = |source: reqwest::Error| LookupError::Request { asn, source };
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;
        let body = resp.bytes().await.map_err(request_error)?;

        parse_bgpview_body(asn, &body)
    }
}

/// Resolves ASNs to prefixes, reading from and filling the on-disk cache.
///
/// Construct one per process and share it; lookups that miss the cache are
/// serialized so the remote service only ever sees one request at a time.
pub struct AsnCache {
    dir: PathBuf,
    source: Box<dyn PrefixSource>,
    memory: Mutex<FxHashMap<Asn, PrefixSet>>,
    fetch_lock: tokio::sync::Mutex<()>,
}

impl AsnCache {
    pub fn new(dir: impl Into<PathBuf>, source: Box<dyn PrefixSource>) -> Self {
        Self {
            dir: dir.into(),
            source,
            memory: Mutex::new(FxHashMap::default()),
            fetch_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path_for(&self, asn: Asn) -> PathBuf {
        self.dir.join(asn.to_string())
    }

    pub async fn resolve(&self, asn: Asn) -> Result<PrefixSet, LookupError> {
        if let Some(prefixes) = self.memory.lock().get(&asn) {
            return Ok(prefixes.clone());
        }

        if let Some(prefixes) = self.read_cached(asn).await? {
            debug!("CIDR data for AS{asn} loaded from {}", self.dir.display());
            self.memory.lock().insert(asn, prefixes.clone());
            return Ok(prefixes);
        }

        let _guard = self.fetch_lock.lock().await;

        // another campaign may have fetched it while we were waiting
        if let Some(prefixes) = self.memory.lock().get(&asn) {
            return Ok(prefixes.clone());
        }

        let prefixes = PrefixSet::new(self.source.fetch_prefixes(asn).await?);
        validate(asn, &prefixes)?;
        self.write_cached(asn, &prefixes).await?;
        info!(
            "CIDR data for AS{asn} fetched ({} prefixes) and saved to {}",
            prefixes.len(),
            self.dir.display()
        );

        self.memory.lock().insert(asn, prefixes.clone());
        Ok(prefixes)
    }

    async fn read_cached(&self, asn: Asn) -> Result<Option<PrefixSet>, LookupError> {
        let path = self.path_for(asn);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(LookupError::Cache { asn, path, source }),
        };

        let prefixes: PrefixSet = serde_json::from_slice(&bytes)
            .map_err(|source| LookupError::CorruptCache { asn, path, source })?;
        validate(asn, &prefixes)?;
        Ok(Some(prefixes))
    }

    async fn write_cached(&self, asn: Asn, prefixes: &PrefixSet) -> Result<(), LookupError> {
        let path = self.path_for(asn);
        let cache_error = |source: io::Error| LookupError::Cache {
            asn,
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(cache_error)?;
        let json = serde_json::to_vec(prefixes).map_err(|err| cache_error(err.into()))?;
        tokio::fs::write(&path, json).await.map_err(cache_error)?;
        Ok(())
    }
}

fn validate(asn: Asn, prefixes: &PrefixSet) -> Result<(), LookupError> {
    if prefixes.is_empty() {
        return Err(LookupError::NoPrefixes(asn));
    }
    for prefix in prefixes.prefixes() {
        Ipv4Range::from_cidr(prefix)
            .map_err(|source| LookupError::InvalidPrefix { asn, source })?;
    }
    Ok(())
}
