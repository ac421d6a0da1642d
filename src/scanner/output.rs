//! Reading masscan's list output (`-oL`).
//!
//! Each result is a line like `open tcp 443 203.0.113.7 1700000000`. Anything
//! that doesn't start with `open` (the `#masscan` header, the `# end` footer,
//! closed or banner records) is ignored.

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

/// A port that was seen open on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPortEvent {
    pub port: u16,
    pub addr: Option<Ipv4Addr>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("scan output {} not found", .0.display())]
    NotFound(PathBuf),
    #[error("failed reading scan output: {0}")]
    Io(#[from] io::Error),
    #[error("malformed record on line {line}: {record:?}")]
    Malformed { line: usize, record: String },
}

/// What to do when a record looks like a result but its port isn't a number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Log it and keep going.
    #[default]
    Skip,
    /// Give up on the whole file.
    Abort,
}

/// Lazily yields the open ports in a masscan output file, one line at a time.
///
/// Lines are decoded lossily, banners can carry arbitrary bytes.
pub struct OpenPortEvents {
    reader: BufReader<File>,
    buf: Vec<u8>,
    line_number: usize,
    finished: bool,
}

impl OpenPortEvents {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ParseError::NotFound(path.to_path_buf()),
            _ => ParseError::Io(err),
        })?;

        Ok(Self {
            reader: BufReader::new(file),
            buf: Vec::new(),
            line_number: 0,
            finished: false,
        })
    }
}

impl Iterator for OpenPortEvents {
    type Item = Result<OpenPortEvent, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.finished = true;
                    return None;
                }
                Ok(_) => {}
                Err(err) => {
                    self.finished = true;
                    return Some(Err(ParseError::Io(err)));
                }
            }
            self.line_number += 1;

            let line = String::from_utf8_lossy(&self.buf);
            let line = line.trim_end_matches(['\n', '\r']);

            match parse_line(line) {
                Some(Ok(event)) => return Some(Ok(event)),
                Some(Err(())) => {
                    return Some(Err(ParseError::Malformed {
                        line: self.line_number,
                        record: line.to_string(),
                    }));
                }
                None => continue,
            }
        }
    }
}

/// None if the line isn't a result at all (or is too short to be one), and
/// Err if it is one but the port can't be read.
fn parse_line(line: &str) -> Option<Result<OpenPortEvent, ()>> {
    if !line.starts_with("open") {
        return None;
    }

    let parts = line.split_whitespace().collect::<Vec<_>>();
    if parts.len() < 3 {
        return None;
    }

    let Ok(port) = parts[2].parse::<u16>() else {
        return Some(Err(()));
    };

    Some(Ok(OpenPortEvent {
        port,
        addr: parts.get(3).and_then(|addr| addr.parse().ok()),
    }))
}
