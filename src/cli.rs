use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::reconstruct::CaptureConfig;

/// Default bytes kept after the last known header.
pub const DEFAULT_SNAPLEN: u32 = 96;
/// Largest snaplen: every captured byte fits a 16-bit IP length.
pub const MAX_SNAPLEN: u32 = (1 << 16) - 1;

#[derive(Parser, Debug)]
#[command(
    name = "netcap",
    version,
    about = "Rebuild pcap frames from truncated network capture events"
)]
pub struct Cli {
    /// Raw capture records (u32 length-prefixed), or "-" for stdin
    #[arg(long, short, default_value = "-")]
    pub input: String,

    /// Output pcap file
    #[arg(long, short)]
    pub output: PathBuf,

    /// Bytes kept after the last known protocol header:
    /// default (96), headers (0), max (65535), N, Nb or Nkb
    #[arg(long, default_value = "default", value_parser = parse_snaplen)]
    pub snaplen: u32,

    /// Format of the statistics printed on exit
    #[arg(long, default_value = "tsv")]
    pub stats: StatsFormat,

    /// Capacity of the decoded event channel [default: 1024]
    #[arg(long, default_value_t = 1024, value_parser = validate_capacity)]
    pub channel_capacity: usize,
}

impl Cli {
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            capture_length: self.snaplen,
        }
    }

    pub fn reads_stdin(&self) -> bool {
        self.input == "-"
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsFormat {
    Tsv,
    Json,
}

/// Parse a capture length: a keyword or a byte count with an optional
/// `b` / `kb` unit.
pub fn parse_snaplen(s: &str) -> Result<u32, String> {
    let lower = s.trim().to_ascii_lowercase();
    let bytes: u64 = match lower.as_str() {
        "default" => return Ok(DEFAULT_SNAPLEN),
        "headers" => return Ok(0),
        "max" => return Ok(MAX_SNAPLEN),
        v if v.ends_with("kb") => parse_count(&v[..v.len() - 2], s)?.saturating_mul(1024),
        v if v.ends_with('b') => parse_count(&v[..v.len() - 1], s)?,
        v => parse_count(v, s)?,
    };
    if bytes > MAX_SNAPLEN as u64 {
        Err(format!("snaplen must be at most {MAX_SNAPLEN} bytes"))
    } else {
        Ok(bytes as u32)
    }
}

fn parse_count(digits: &str, original: &str) -> Result<u64, String> {
    digits
        .trim()
        .parse()
        .map_err(|_| format!("'{original}' is not a valid snaplen"))
}

fn validate_capacity(s: &str) -> Result<usize, String> {
    let val: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid integer"))?;
    if val == 0 {
        Err("channel-capacity must be at least 1".to_string())
    } else if val > 1_048_576 {
        Err("channel-capacity must be at most 1048576".to_string())
    } else {
        Ok(val)
    }
}
