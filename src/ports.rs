use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The ports a campaign scans for.
///
/// The mode is decided once when the spec is parsed: a `,` anywhere means a
/// list, otherwise a `-` means an inclusive range. A bare port is a list with
/// one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PortSpec {
    /// Explicit ports, deduplicated, in the order they were first given.
    List(Vec<u16>),
    Range { start: u16, end: u16 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortSpecError {
    #[error("empty port specification")]
    Empty,
    #[error("invalid port {0:?} (expected a number from 1 to 65535)")]
    InvalidPort(String),
    #[error("invalid port range {start}-{end} (start cannot be greater than end)")]
    InvertedRange { start: u16, end: u16 },
}

fn parse_port(input: &str) -> Result<u16, PortSpecError> {
    let input = input.trim();
    match input.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(PortSpecError::InvalidPort(input.to_string())),
    }
}

impl FromStr for PortSpec {
    type Err = PortSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PortSpecError::Empty);
        }

        if s.contains(',') {
            let mut ports = Vec::new();
            for part in s.split(',') {
                let port = parse_port(part)?;
                if !ports.contains(&port) {
                    ports.push(port);
                }
            }
            return Ok(PortSpec::List(ports));
        }

        if let Some((start, end)) = s.split_once('-') {
            let start = parse_port(start)?;
            let end = parse_port(end)?;
            if start > end {
                return Err(PortSpecError::InvertedRange { start, end });
            }
            return Ok(PortSpec::Range { start, end });
        }

        Ok(PortSpec::List(vec![parse_port(s)?]))
    }
}

impl PortSpec {
    pub fn is_list(&self) -> bool {
        matches!(self, PortSpec::List(_))
    }

    /// Number of distinct ports covered.
    pub fn count(&self) -> usize {
        match self {
            PortSpec::List(ports) => ports.len(),
            PortSpec::Range { start, end } => (*end - *start) as usize + 1,
        }
    }

    /// A version of the spec that's safe to put in a file name.
    pub fn file_tag(&self) -> String {
        self.to_string().replace(',', "_")
    }
}

/// Renders the spec the way masscan's `-p` flag takes it.
impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::List(ports) => {
                for (i, port) in ports.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{port}")?;
                }
                Ok(())
            }
            PortSpec::Range { start, end } => write!(f, "{start}-{end}"),
        }
    }
}

impl Serialize for PortSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PortSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
