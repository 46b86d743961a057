use std::io::Write;

use crate::cli::StatsFormat;
use crate::error::NetcapError;
use crate::stats::StatsSnapshot;

/// Write the final capture statistics in the requested format.
pub fn write_stats(
    stats: &StatsSnapshot,
    format: StatsFormat,
    writer: &mut impl Write,
) -> Result<(), NetcapError> {
    match format {
        StatsFormat::Tsv => write_tsv(stats, writer),
        StatsFormat::Json => write_json(stats, writer),
    }
}

fn write_tsv(stats: &StatsSnapshot, writer: &mut impl Write) -> Result<(), NetcapError> {
    writeln!(writer, "# netcap")
        .and_then(|_| writeln!(writer, "events\tlost"))
        .and_then(|_| {
            writeln!(
                writer,
                "{}\t{}",
                stats.net_cap_events, stats.lost_net_cap_events
            )
        })
        .map_err(NetcapError::Serialization)
}

fn write_json(stats: &StatsSnapshot, writer: &mut impl Write) -> Result<(), NetcapError> {
    serde_json::to_writer_pretty(&mut *writer, stats)
        .map_err(|e| NetcapError::Serialization(std::io::Error::other(e.to_string())))?;
    writeln!(writer).map_err(NetcapError::Serialization)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StatsSnapshot {
        StatsSnapshot {
            net_cap_events: 12,
            lost_net_cap_events: 3,
        }
    }

    #[test]
    fn tsv_output() {
        let mut buf = Vec::new();
        write_stats(&sample(), StatsFormat::Tsv, &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "# netcap\nevents\tlost\n12\t3\n");
    }

    #[test]
    fn json_output() {
        let mut buf = Vec::new();
        write_stats(&sample(), StatsFormat::Json, &mut buf).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(v["net_cap_events"], 12);
        assert_eq!(v["lost_net_cap_events"], 3);
    }
}
