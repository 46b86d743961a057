// Single-file pcap sink.
//
// Writes classic little-endian pcap (not pcapng) with the NULL/loopback link
// type, which matches the 4-byte family header of reconstructed frames.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use pcap_parser::pcap::{LegacyPcapBlock, PcapHeader};
use pcap_parser::{Linktype, ToVec};

use crate::error::NetcapError;
use crate::event::CapturedPacketEvent;
use crate::sink::CaptureSink;

const MAGIC: u32 = 0xa1b2_c3d4;
const SNAPLEN: u32 = 65535;

/// Length of the pcap global header.
pub const FILE_HEADER_LEN: usize = 24;
/// Length of each per-record header.
pub const RECORD_HEADER_LEN: usize = 16;

/// Capture sink writing every frame into one pcap stream.
///
/// Output is buffered; the capture stage flushes the sink when it exits.
pub struct PcapFileSink<W: Write = BufWriter<File>> {
    out: W,
    frames: u64,
}

impl PcapFileSink {
    /// Create `path`, truncating any existing file, and write the header.
    pub fn create(path: &Path) -> Result<Self, NetcapError> {
        let file = File::create(path).map_err(NetcapError::PcapFile)?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> PcapFileSink<W> {
    /// Wrap `out` and write the pcap global header.
    pub fn new(mut out: W) -> Result<Self, NetcapError> {
        let mut hdr = PcapHeader {
            magic_number: MAGIC,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: SNAPLEN,
            network: Linktype::NULL,
        };
        let bytes = hdr
            .to_vec()
            .map_err(|e| NetcapError::Sink(format!("encode pcap header: {e:?}")))?;
        out.write_all(&bytes).map_err(NetcapError::PcapFile)?;
        Ok(Self { out, frames: 0 })
    }

    /// Number of frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn into_inner(mut self) -> Result<W, NetcapError> {
        self.out.flush().map_err(NetcapError::PcapFile)?;
        Ok(self.out)
    }
}

impl<W: Write + Send> CaptureSink for PcapFileSink<W> {
    fn write(&mut self, event: &CapturedPacketEvent, frame: &[u8]) -> Result<(), NetcapError> {
        let len = u32::try_from(frame.len())
            .map_err(|_| NetcapError::Sink(format!("frame of {} bytes", frame.len())))?;
        let ts_sec = u32::try_from(event.timestamp_ns / 1_000_000_000).map_err(|_| {
            NetcapError::Sink(format!("timestamp {}ns out of range", event.timestamp_ns))
        })?;
        let ts_usec = ((event.timestamp_ns % 1_000_000_000) / 1_000) as u32;

        let mut block = LegacyPcapBlock {
            ts_sec,
            ts_usec,
            caplen: len,
            origlen: len,
            data: frame,
        };
        let bytes = block
            .to_vec()
            .map_err(|e| NetcapError::Sink(format!("encode pcap record: {e:?}")))?;

        self.out.write_all(&bytes).map_err(NetcapError::PcapFile)?;
        self.frames += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), NetcapError> {
        self.out.flush().map_err(NetcapError::PcapFile)
    }
}
