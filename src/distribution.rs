//! Folding open ports into a histogram.
//!
//! A list of ports gets one bucket per port. A range is split into at most
//! [`BucketPolicy::max_groups`] groups of equal width so wide ranges still fit
//! on a chart.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ports::PortSpec, scanner::output::OpenPortEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BucketPolicy {
    /// The most groups a range will be split into. Defaults to 66.
    pub max_groups: u32,
    /// Roughly how many ports a range needs before it gets another group.
    /// Defaults to 1000.
    pub ports_per_group: u32,
}

impl Default for BucketPolicy {
    fn default() -> Self {
        Self {
            max_groups: 66,
            ports_per_group: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketLayout {
    /// One bucket per requested port, keyed by the port. Sorted.
    Ports(Vec<u16>),
    /// `groups` buckets keyed by index, each `step` ports wide.
    Groups {
        start: u16,
        end: u16,
        groups: u32,
        step: u32,
    },
}

impl BucketLayout {
    pub fn new(spec: &PortSpec, policy: &BucketPolicy) -> Self {
        match spec {
            PortSpec::List(ports) => {
                let mut ports = ports.clone();
                ports.sort_unstable();
                ports.dedup();
                BucketLayout::Ports(ports)
            }
            PortSpec::Range { start, end } => {
                let span = u32::from(*end - *start);
                let width = span + 1;

                let groups = (span / policy.ports_per_group.max(1) + 1)
                    .min(policy.max_groups)
                    .max(1);
                // rounding up keeps `end` inside the last group
                let step = width.div_ceil(groups).max(1);

                BucketLayout::Groups {
                    start: *start,
                    end: *end,
                    groups,
                    step,
                }
            }
        }
    }

    /// The bucket a port is counted in, or None if it wasn't asked for.
    pub fn bucket_for(&self, port: u16) -> Option<u32> {
        match self {
            BucketLayout::Ports(ports) => ports
                .binary_search(&port)
                .ok()
                .map(|_| u32::from(port)),
            BucketLayout::Groups {
                start, end, step, ..
            } => {
                if port < *start || port > *end {
                    return None;
                }
                Some(u32::from(port - *start) / *step)
            }
        }
    }

    /// Every bucket key, in order.
    pub fn keys(&self) -> Vec<u32> {
        match self {
            BucketLayout::Ports(ports) => ports.iter().map(|&p| u32::from(p)).collect(),
            BucketLayout::Groups { groups, .. } => (0..*groups).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BucketLayout::Ports(ports) => ports.len(),
            BucketLayout::Groups { groups, .. } => *groups as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The inclusive ports a bucket covers. None for unknown keys, and for
    /// trailing groups that end up past the end of the range.
    pub fn group_bounds(&self, key: u32) -> Option<(u16, u16)> {
        match self {
            BucketLayout::Ports(_) => {
                let port = u16::try_from(key).ok()?;
                self.bucket_for(port).map(|_| (port, port))
            }
            BucketLayout::Groups {
                start,
                end,
                groups,
                step,
            } => {
                if key >= *groups {
                    return None;
                }
                let low = u64::from(*start) + u64::from(key) * u64::from(*step);
                let high = (low + u64::from(*step) - 1).min(u64::from(*end));
                if low > u64::from(*end) {
                    return None;
                }
                Some((low as u16, high as u16))
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DistributionError {
    #[error("can't merge distributions with different bucket layouts")]
    LayoutMismatch,
}

/// Open port counts per bucket. Every bucket of the layout is always present,
/// even when nothing was counted in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    layout: BucketLayout,
    buckets: BTreeMap<u32, u64>,
}

impl Distribution {
    pub fn new(layout: BucketLayout) -> Self {
        let buckets = layout.keys().into_iter().map(|key| (key, 0)).collect();
        Self { layout, buckets }
    }

    pub fn for_spec(spec: &PortSpec, policy: &BucketPolicy) -> Self {
        Self::new(BucketLayout::new(spec, policy))
    }

    /// Count one open port. Returns false if the port is outside the layout
    /// and was dropped.
    pub fn record(&mut self, port: u16) -> bool {
        let Some(key) = self.layout.bucket_for(port) else {
            return false;
        };
        *self.buckets.entry(key).or_insert(0) += 1;
        true
    }

    /// Add another distribution's counts to this one.
    pub fn merge(&mut self, other: &Distribution) -> Result<(), DistributionError> {
        if self.layout != other.layout {
            return Err(DistributionError::LayoutMismatch);
        }
        for (key, count) in &other.buckets {
            *self.buckets.entry(*key).or_insert(0) += count;
        }
        Ok(())
    }

    pub fn layout(&self) -> &BucketLayout {
        &self.layout
    }

    pub fn get(&self, key: u32) -> Option<u64> {
        self.buckets.get(&key).copied()
    }

    /// Buckets in key order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.buckets.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn total(&self) -> u64 {
        self.buckets.values().sum()
    }

    /// True when nothing was counted, even though the buckets exist.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl Extend<u16> for Distribution {
    fn extend<T: IntoIterator<Item = u16>>(&mut self, ports: T) {
        for port in ports {
            self.record(port);
        }
    }
}

/// Build a distribution for the spec from a sequence of open ports.
pub fn aggregate(
    events: impl IntoIterator<Item = OpenPortEvent>,
    spec: &PortSpec,
    policy: &BucketPolicy,
) -> Distribution {
    let mut distribution = Distribution::for_spec(spec, policy);
    distribution.extend(events.into_iter().map(|event| event.port));
    distribution
}
