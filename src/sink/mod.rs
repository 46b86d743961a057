// Capture sinks: destinations for reconstructed frames.
//
// Routing frames to one file, per-process files or anything else is the
// sink's business; the capture stage only calls `write` once per frame.

pub mod pcap;

use crate::error::NetcapError;
use crate::event::CapturedPacketEvent;

pub use pcap::PcapFileSink;

/// Destination for reconstructed capture frames.
///
/// `frame` starts with the 4-byte BSD loopback header followed by the L3
/// packet. Calls are made synchronously from the capture stage, so a slow
/// sink stalls the stage.
pub trait CaptureSink: Send {
    fn write(&mut self, event: &CapturedPacketEvent, frame: &[u8]) -> Result<(), NetcapError>;

    /// Push buffered frames to their destination.
    fn flush(&mut self) -> Result<(), NetcapError> {
        Ok(())
    }
}

impl<S: CaptureSink + ?Sized> CaptureSink for Box<S> {
    fn write(&mut self, event: &CapturedPacketEvent, frame: &[u8]) -> Result<(), NetcapError> {
        (**self).write(event, frame)
    }

    fn flush(&mut self) -> Result<(), NetcapError> {
        (**self).flush()
    }
}
