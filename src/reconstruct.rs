// Capture frame reconstruction.
//
// Captured payloads arrive as |sizeof u32|L3 packet truncated to snaplen|.
// The size prefix is replaced by a BSD loopback (DLT_NULL) header so IPv4 and
// IPv6 packets can share one capture file, and the IP (and UDP) length fields
// are rewritten to describe the truncated packet, so capture readers do not
// report the missing bytes. Checksums, flags and fragment offsets are never
// touched.

use crate::event::{ArgValue, CapturedPacketEvent, NET_PACKET_CAPTURE, PAYLOAD_ARG};
use crate::packet::{
    self, IPV4_TOTAL_LEN_OFFSET, IPV6_HLEN, NetworkFamily, NetworkHeader, Transport, UDP_HLEN,
    UDP_LEN_OFFSET,
};
use crate::sink::CaptureSink;

/// Length of the fake link-layer header (and of the size prefix it replaces).
pub const LINK_HLEN: usize = 4;

const MAX_LEN_FIELD: u64 = u16::MAX as u64;

// The IPv6 length is written at IPv6 header byte 8, the first bytes of the
// source address, not the Payload Length field at byte 4.
const IPV6_LEN_FRAME_OFFSET: usize = LINK_HLEN + 8;

/// Capture stage configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Bytes kept after the last recognized protocol header.
    pub capture_length: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { capture_length: 96 }
    }
}

// ---------------------------------------------------------------------------
// Frame layout
// ---------------------------------------------------------------------------

/// Where the L3 length field lives and what it measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpLengthField {
    /// IPv4 Total Length: header + payload.
    Ipv4TotalLength,
    /// IPv6 length: everything after the fixed 40-byte header.
    Ipv6PayloadLength,
}

impl IpLengthField {
    /// Offset of the field within the frame (link header included).
    pub fn frame_offset(self) -> usize {
        match self {
            Self::Ipv4TotalLength => LINK_HLEN + IPV4_TOTAL_LEN_OFFSET,
            Self::Ipv6PayloadLength => IPV6_LEN_FRAME_OFFSET,
        }
    }

    fn value_for(self, target: u64) -> u64 {
        match self {
            Self::Ipv4TotalLength => target,
            Self::Ipv6PayloadLength => target.saturating_sub(IPV6_HLEN as u64),
        }
    }
}

/// Header sizes and patchable length fields for one (family, transport)
/// combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub network_header_len: usize,
    pub transport_header_len: usize,
    pub ip_length: IpLengthField,
    /// Frame offset of the UDP Length field, for UDP only.
    pub udp_length_offset: Option<usize>,
}

impl FrameLayout {
    pub fn new(net: &NetworkHeader, transport: Transport) -> Self {
        let ip_length = match net.family {
            NetworkFamily::Ipv4 => IpLengthField::Ipv4TotalLength,
            NetworkFamily::Ipv6 => IpLengthField::Ipv6PayloadLength,
        };
        let udp_length_offset = match transport {
            Transport::Udp => Some(LINK_HLEN + net.header_len + UDP_LEN_OFFSET),
            _ => None,
        };
        Self {
            network_header_len: net.header_len,
            transport_header_len: transport.header_len(),
            ip_length,
            udp_length_offset,
        }
    }

    /// Packet size the capture source keeps for this layout: all recognized
    /// headers plus `capture_length` bytes.
    pub fn target_len(&self, capture_length: u32) -> u64 {
        self.network_header_len as u64 + self.transport_header_len as u64 + capture_length as u64
    }

    /// Rewrite the length fields of `frame` if the captured packet is exactly
    /// the target size clamped to 16 bits. Returns whether anything was
    /// patched.
    ///
    /// Packets of any other size keep the lengths they were captured with.
    pub fn patch_lengths(&self, frame: &mut [u8], capture_length: u32) -> bool {
        let captured = frame.len().saturating_sub(LINK_HLEN) as u64;
        let target = self.target_len(capture_length);
        if captured != clamp_u16(target) as u64 {
            return false;
        }

        // A passing gate means every recognized header was captured in full,
        // so both length fields lie inside the frame.
        let ip_value = clamp_u16(self.ip_length.value_for(target));
        put_u16(frame, self.ip_length.frame_offset(), ip_value);

        if let Some(offset) = self.udp_length_offset {
            let udp_value = clamp_u16(capture_length as u64 + UDP_HLEN as u64);
            put_u16(frame, offset, udp_value);
        }
        true
    }
}

fn clamp_u16(v: u64) -> u16 {
    v.min(MAX_LEN_FIELD) as u16
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    if let Some(field) = buf.get_mut(offset..offset + 2) {
        field.copy_from_slice(&value.to_be_bytes());
    }
}

// ---------------------------------------------------------------------------
// Reconstructor
// ---------------------------------------------------------------------------

/// Why an event did not produce a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    WrongEventType,
    MissingPayload,
    NonBytesPayload,
    EmptyPayload,
    TruncatedPayload,
    UnknownFamily,
    UnparsablePacket,
}

/// Result of reconstructing a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Frame handed to the sink; `patched` tells whether lengths were rewritten.
    Written { patched: bool },
    /// Frame built but the sink rejected it.
    SinkFailed,
    Dropped(DropReason),
}

/// Turns packet capture events into capture frames and writes them to a sink.
pub struct Reconstructor<S> {
    config: CaptureConfig,
    sink: S,
}

impl<S: CaptureSink> Reconstructor<S> {
    pub fn new(config: CaptureConfig, sink: S) -> Self {
        Self { config, sink }
    }

    pub fn config(&self) -> CaptureConfig {
        self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Flush the sink, logging failures.
    pub fn flush(&mut self) {
        if let Err(e) = self.sink.flush() {
            log::error!("could not flush pcap data: {e}");
        }
    }

    /// Reconstruct one event and write the frame to the sink.
    ///
    /// Never fails: malformed events are dropped with a debug log and sink
    /// errors are logged.
    pub fn process(&mut self, mut event: CapturedPacketEvent) -> Outcome {
        if event.event_id != NET_PACKET_CAPTURE {
            log::debug!(
                "network capture: wrong net capture event type {}",
                event.event_id
            );
            return Outcome::Dropped(DropReason::WrongEventType);
        }

        let mut frame = match take_payload(&mut event) {
            Ok(p) => p,
            Err(reason) => return Outcome::Dropped(reason),
        };

        match build_frame(&mut frame, event.return_value, self.config) {
            Ok(patched) => match self.sink.write(&event, &frame) {
                Ok(()) => Outcome::Written { patched },
                Err(e) => {
                    log::error!("could not write pcap data: {e}");
                    Outcome::SinkFailed
                }
            },
            Err(reason) => Outcome::Dropped(reason),
        }
    }
}

/// Move the payload bytes out of the event.
fn take_payload(event: &mut CapturedPacketEvent) -> Result<Vec<u8>, DropReason> {
    let Some(arg) = event.arg_mut(PAYLOAD_ARG) else {
        log::debug!("network capture: no payload packet");
        return Err(DropReason::MissingPayload);
    };
    let ArgValue::Bytes(bytes) = &mut arg.value else {
        log::debug!("network capture: non []byte argument");
        return Err(DropReason::NonBytesPayload);
    };
    let payload = std::mem::take(bytes);
    if payload.is_empty() {
        log::debug!("network capture: empty payload");
        return Err(DropReason::EmptyPayload);
    }
    if payload.len() <= LINK_HLEN {
        log::debug!(
            "network capture: payload of {} bytes has no packet",
            payload.len()
        );
        return Err(DropReason::TruncatedPayload);
    }
    Ok(payload)
}

/// Turn `payload` (size prefix + L3 packet) into a DLT_NULL frame in place.
///
/// Returns whether length fields were patched.
pub fn build_frame(
    payload: &mut [u8],
    return_value: i64,
    config: CaptureConfig,
) -> Result<bool, DropReason> {
    if payload.len() <= LINK_HLEN {
        return Err(DropReason::TruncatedPayload);
    }

    let Some(family) = NetworkFamily::from_return_value(return_value) else {
        log::debug!("network capture: unsupported layer3 protocol (retval {return_value:#x})");
        return Err(DropReason::UnknownFamily);
    };

    let l3 = &payload[LINK_HLEN..];
    let Some(net) = packet::parse_network_header(family, l3) else {
        log::debug!("network capture: could not parse {family:?} packet");
        return Err(DropReason::UnparsablePacket);
    };
    let transport = Transport::classify(&net, &l3[net.header_len..]);
    let layout = FrameLayout::new(&net, transport);

    payload[..LINK_HLEN].copy_from_slice(&family.link_tag().to_be_bytes());

    Ok(layout.patch_lengths(payload, config.capture_length))
}

// ===========================================================================
// Unit tests
// ===========================================================================
