//! Handing finished distributions to the chart renderer.
//!
//! Each campaign with data becomes one JSON document under
//! `<report_dir>/<asn>/port_distribution_asn<asn>_<ports>.json`.

use std::{io, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{asns::Asn, campaign::CampaignReport, ports::PortSpec};

#[derive(Debug, Serialize)]
pub struct RenderRequest<'a> {
    pub asn: Asn,
    pub ports: &'a PortSpec,
    /// `list` or `range`, which decides how the buckets are labelled.
    pub mode: &'static str,
    pub generated_at: DateTime<Utc>,
    pub total: u64,
    pub buckets: Vec<RenderBucket>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct RenderBucket {
    /// The port itself in list mode, the group index in range mode.
    pub key: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_port: Option<u16>,
    pub count: u64,
}

impl<'a> RenderRequest<'a> {
    pub fn new(report: &'a CampaignReport) -> Self {
        let layout = report.distribution.layout();
        let buckets = report
            .distribution
            .iter()
            .map(|(key, count)| {
                let bounds = layout.group_bounds(key);
                RenderBucket {
                    key,
                    start_port: bounds.map(|(start, _)| start),
                    end_port: bounds.map(|(_, end)| end),
                    count,
                }
            })
            .collect();

        Self {
            asn: report.asn,
            ports: &report.ports,
            mode: if report.ports.is_list() { "list" } else { "range" },
            generated_at: report.finished_at,
            total: report.distribution.total(),
            buckets,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("couldn't write report {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("couldn't serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct JsonReportWriter {
    dir: PathBuf,
}

impl JsonReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, asn: Asn, ports: &PortSpec) -> PathBuf {
        self.dir.join(asn.to_string()).join(format!(
            "port_distribution_asn{asn}_{}.json",
            ports.file_tag()
        ))
    }

    /// Write the report if there's anything in it. Returns where it went, or
    /// None if it was skipped.
    pub async fn write(&self, report: &CampaignReport) -> Result<Option<PathBuf>, ReportError> {
        if !report.has_data() {
            debug!(asn = %report.asn, ports = %report.ports, "no data, not writing a report");
            return Ok(None);
        }

        let path = self.path_for(report.asn, &report.ports);
        let body = serde_json::to_vec_pretty(&RenderRequest::new(report))?;
        let io_error = |source: io::Error| ReportError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        tokio::fs::write(&path, body).await.map_err(io_error)?;

        info!("Saved port distribution to {}", path.display());
        Ok(Some(path))
    }
}
