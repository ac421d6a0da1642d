use std::{fmt, mem, net::Ipv4Addr, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid IPv4 prefix {0:?}")]
pub struct InvalidPrefix(pub String);

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Ipv4Range {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl Ipv4Range {
    pub fn single(addr: Ipv4Addr) -> Self {
        Self {
            start: addr,
            end: addr,
        }
    }

    /// Parse something like `1.2.3.0/24`. Host bits are masked off, and a bare
    /// address is treated as a /32.
    pub fn from_cidr(input: &str) -> Result<Self, InvalidPrefix> {
        let invalid = || InvalidPrefix(input.to_string());
        let input = input.trim();

        let (ip, prefix_len) = match input.split_once('/') {
            Some((ip, len)) => (ip, len.parse::<u8>().map_err(|_| invalid())?),
            None => (input, 32),
        };
        if prefix_len > 32 {
            return Err(invalid());
        }
        let ip_u32 = u32::from(Ipv4Addr::from_str(ip).map_err(|_| invalid())?);

        let host_bits = 32 - u32::from(prefix_len);
        let mask_bits = if host_bits == 32 {
            u32::MAX
        } else {
            (1u32 << host_bits) - 1
        };

        Ok(Self {
            start: Ipv4Addr::from(ip_u32 & !mask_bits),
            end: Ipv4Addr::from(ip_u32 | mask_bits),
        })
    }

    pub fn count(&self) -> u64 {
        u64::from(u32::from(self.end)) - u64::from(u32::from(self.start)) + 1
    }
}

/// Formatted the way masscan accepts targets.
impl fmt::Display for Ipv4Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// A set of address ranges, sorted by start with overlapping and adjacent
/// ranges merged.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ipv4Ranges {
    ranges: Vec<Ipv4Range>,
}

impl Ipv4Ranges {
    pub fn new(mut ranges: Vec<Ipv4Range>) -> Self {
        ranges.sort_by_key(|r| r.start);

        let mut merged: Vec<Ipv4Range> = Vec::with_capacity(ranges.len());
        for range in ranges {
            if let Some(last) = merged.last_mut() {
                if u64::from(u32::from(range.start)) <= u64::from(u32::from(last.end)) + 1 {
                    if range.end > last.end {
                        last.end = range.end;
                    }
                    continue;
                }
            }
            merged.push(range);
        }

        Self { ranges: merged }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mut start = 0;
        let mut end = self.ranges.len();
        while start < end {
            let mid = (start + end) / 2;
            let range = &self.ranges[mid];
            if range.end < addr {
                start = mid + 1;
            } else if range.start > addr {
                end = mid;
            } else {
                return true;
            }
        }
        false
    }

    /// The number of addresses in the set.
    pub fn count(&self) -> u64 {
        self.ranges.iter().map(Ipv4Range::count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &Vec<Ipv4Range> {
        &self.ranges
    }

    /// Remove the given ranges from this set. Returns the ranges that were
    /// removed.
    pub fn apply_exclude(&mut self, exclude_ranges: &Ipv4Ranges) -> Vec<Ipv4Range> {
        let mut kept = Vec::new();
        let mut removed = Vec::new();

        // both lists are sorted, so exclude ranges behind the current range
        // are behind every later one too
        let mut first = 0;
        for range in mem::take(&mut self.ranges) {
            let mut start = u32::from(range.start);
            let end = u32::from(range.end);
            let mut fully_excluded = false;

            while exclude_ranges
                .ranges
                .get(first)
                .is_some_and(|exclude_range| exclude_range.end < range.start)
            {
                first += 1;
            }

            for exclude_range in &exclude_ranges.ranges[first..] {
                let exclude_start = u32::from(exclude_range.start);
                let exclude_end = u32::from(exclude_range.end);

                if exclude_start > end {
                    break;
                }

                if exclude_start > start {
                    // keep the part before the excluded range
                    kept.push(Ipv4Range {
                        start: Ipv4Addr::from(start),
                        end: Ipv4Addr::from(exclude_start - 1),
                    });
                }
                removed.push(Ipv4Range {
                    start: Ipv4Addr::from(exclude_start.max(start)),
                    end: Ipv4Addr::from(exclude_end.min(end)),
                });

                if exclude_end >= end {
                    fully_excluded = true;
                    break;
                }
                start = exclude_end + 1;
            }

            if !fully_excluded {
                kept.push(Ipv4Range {
                    start: Ipv4Addr::from(start),
                    end: range.end,
                });
            }
        }

        self.ranges = kept;
        removed
    }
}

/// The addresses handed to the scanner for one campaign.
#[derive(Debug, Clone)]
pub struct ScanTargets {
    ranges: Ipv4Ranges,
    /// The prefixes exactly as they were announced. Dropped once an exclude
    /// list removes anything, since they no longer describe the targets.
    cidrs: Option<Vec<String>>,
}

impl ScanTargets {
    pub fn from_prefixes<S: AsRef<str>>(prefixes: &[S]) -> Result<Self, InvalidPrefix> {
        let mut ranges = Vec::with_capacity(prefixes.len());
        let mut cidrs = Vec::with_capacity(prefixes.len());
        for prefix in prefixes {
            let prefix = prefix.as_ref();
            ranges.push(Ipv4Range::from_cidr(prefix)?);
            cidrs.push(prefix.trim().to_string());
        }

        Ok(Self {
            ranges: Ipv4Ranges::new(ranges),
            cidrs: Some(cidrs),
        })
    }

    pub fn apply_exclude(&mut self, exclude_ranges: &Ipv4Ranges) -> Vec<Ipv4Range> {
        let removed = self.ranges.apply_exclude(exclude_ranges);
        if !removed.is_empty() {
            self.cidrs = None;
        }
        removed
    }

    /// The number of distinct addresses that will be scanned.
    pub fn count(&self) -> u64 {
        self.ranges.count()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// One masscan target argument per prefix or range.
    pub fn to_args(&self) -> Vec<String> {
        match &self.cidrs {
            Some(cidrs) => cidrs.clone(),
            None => self.ranges.ranges().iter().map(|r| r.to_string()).collect(),
        }
    }
}
