use std::{fs, net::Ipv4Addr, path::Path, str::FromStr};

use eyre::eyre;

use crate::scanner::targets::{Ipv4Range, Ipv4Ranges};

pub fn parse_file(path: impl AsRef<Path>) -> eyre::Result<Ipv4Ranges> {
    let input = fs::read_to_string(path)?;

    parse(&input)
}

pub fn parse(input: &str) -> eyre::Result<Ipv4Ranges> {
    let mut ranges = Vec::new();

    for line in input.lines() {
        // remove everything after the first #
        let line = line.split('#').next().unwrap_or_default().trim();

        if line.is_empty() {
            continue;
        }

        // can be either like 0.0.0.0-0.0.0.0 or 0.0.0.0/32
        let is_slash = line.contains('/');
        let is_hyphen = line.contains('-');

        if is_slash && is_hyphen {
            return Err(eyre!(
                "Invalid exclude range: {} (cannot contain both - and /)",
                line
            ));
        }

        let range = if is_slash {
            Ipv4Range::from_cidr(line)?
        } else if let Some((ip_start, ip_end)) = line.split_once('-') {
            let ip_start = Ipv4Addr::from_str(ip_start.trim())?;
            let ip_end = Ipv4Addr::from_str(ip_end.trim())?;

            if ip_start > ip_end {
                return Err(eyre!(
                    "Invalid exclude range: {} (start cannot be greater than end)",
                    line
                ));
            }

            Ipv4Range {
                start: ip_start,
                end: ip_end,
            }
        } else {
            Ipv4Range::single(Ipv4Addr::from_str(line)?)
        };

        ranges.push(range);
    }

    Ok(Ipv4Ranges::new(ranges))
}
