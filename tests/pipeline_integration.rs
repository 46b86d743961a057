//! End-to-end tests of the capture pipeline through the public API:
//! decode stage -> intake -> reconstructor -> sink.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded};

use netcap::cancel::CancelToken;
use netcap::decode::{RecordDecoder, encode_record};
use netcap::error::NetcapError;
use netcap::event::{ArgValue, Argument, CapturedPacketEvent, PAYLOAD_ARG};
use netcap::pipeline::{CapturePipeline, DecodedEvents};
use netcap::reconstruct::{CaptureConfig, Reconstructor};
use netcap::sink::{CaptureSink, PcapFileSink};
use netcap::stats::{CaptureStats, Counter};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Written = Arc<Mutex<Vec<(u32, Vec<u8>)>>>;

#[derive(Clone, Default)]
struct RecordingSink {
    written: Written,
    delay: Option<Duration>,
}

impl CaptureSink for RecordingSink {
    fn write(&mut self, event: &CapturedPacketEvent, frame: &[u8]) -> Result<(), NetcapError> {
        if let Some(d) = self.delay {
            thread::sleep(d);
        }
        self.written
            .lock()
            .unwrap()
            .push((event.pid, frame.to_vec()));
        Ok(())
    }
}

/// |size prefix| IPv4 | UDP | `data` bytes
fn ipv4_udp_payload(data: usize) -> Vec<u8> {
    let mut p = vec![0xAA; 4];
    p.extend_from_slice(&[0x45, 0, 0x05, 0xDC, 0, 1, 0x40, 0, 64, 17, 0x12, 0x34]);
    p.extend_from_slice(&[192, 168, 0, 1, 192, 168, 0, 2]);
    p.extend_from_slice(&[0x30, 0x39, 0, 53, 0x05, 0xC8, 0, 0]);
    p.extend((0..data).map(|i| i as u8));
    p
}

/// |size prefix| IPv6 | TCP (data offset `doff`) | `data` bytes
fn ipv6_tcp_payload(doff: u8, data: usize) -> Vec<u8> {
    let mut p = vec![0xAA; 4];
    p.extend_from_slice(&[0x60, 0, 0, 0, 0x05, 0xDC, 6, 64]);
    p.extend_from_slice(&[0xfe, 0x80]);
    p.extend_from_slice(&[0; 13]);
    p.push(1);
    p.extend_from_slice(&[0xfe, 0x80]);
    p.extend_from_slice(&[0; 13]);
    p.push(2);
    let mut tcp = vec![0u8; (doff as usize * 4).max(20)];
    tcp[12] = doff << 4;
    p.extend_from_slice(&tcp);
    p.extend((0..data).map(|i| i as u8));
    p
}

fn event(pid: u32, return_value: i64, payload: Vec<u8>) -> CapturedPacketEvent {
    CapturedPacketEvent {
        pid,
        ..CapturedPacketEvent::packet(return_value, payload)
    }
}

fn be16(b: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([b[off], b[off + 1]])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn frames_reach_sink_in_arrival_order() {
    let sink = RecordingSink::default();
    let stats = Arc::new(CaptureStats::new());
    let (tx, rx) = unbounded();
    let (lost_tx, lost_rx) = unbounded();

    tx.send(event(1, 1, ipv4_udp_payload(16))).unwrap();
    tx.send(event(2, 0, ipv4_udp_payload(16))).unwrap(); // no family bit
    tx.send(event(3, 2, ipv6_tcp_payload(8, 16))).unwrap();
    tx.send(event(4, 1, vec![1, 2, 3])).unwrap(); // too short
    tx.send(event(5, 1, ipv4_udp_payload(20))).unwrap(); // longer than target
    lost_tx.send(0).unwrap();
    lost_tx.send(9).unwrap();
    drop(tx);
    drop(lost_tx);

    let pipeline = CapturePipeline::new(
        Reconstructor::new(CaptureConfig { capture_length: 16 }, sink.clone()),
        lost_rx,
        Arc::clone(&stats),
    );
    let errors = pipeline
        .run(DecodedEvents(rx), &CancelToken::new())
        .unwrap();
    assert_eq!(errors, 0);

    let written = sink.written.lock().unwrap();
    let pids: Vec<u32> = written.iter().map(|(pid, _)| *pid).collect();
    assert_eq!(pids, vec![1, 3, 5]);

    // IPv4/UDP at the exact target: both lengths rewritten.
    let f = &written[0].1;
    assert_eq!(&f[..4], &[0, 0, 0, 2]);
    assert_eq!(be16(f, 6), 20 + 8 + 16);
    assert_eq!(be16(f, 28), 8 + 16);

    // IPv6/TCP with options: payload length covers TCP header + data.
    let f = &written[1].1;
    assert_eq!(&f[..4], &[0, 0, 0, 28]);
    assert_eq!(be16(f, 12), 32 + 16);

    // Oversized capture keeps its original lengths.
    let f = &written[2].1;
    assert_eq!(&f[..4], &[0, 0, 0, 2]);
    assert_eq!(be16(f, 6), 1500);
    assert_eq!(be16(f, 28), 1480);

    assert_eq!(stats.get(Counter::NetCapEvents), 5);
    assert_eq!(stats.get(Counter::LostNetCapEvents), 9);
}

#[test]
fn decoded_records_are_written_to_pcap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.pcap");
    let sink = PcapFileSink::create(&path).unwrap();

    let (raw_tx, raw_rx) = bounded(8);
    let mut ev = event(77, 1, ipv4_udp_payload(4));
    ev.timestamp_ns = 5_000_000_123;
    raw_tx.send(encode_record(&ev)).unwrap();
    raw_tx.send(vec![0xFF; 3]).unwrap(); // malformed record
    let mut bad = event(78, 1, Vec::new());
    bad.args = vec![Argument::new(PAYLOAD_ARG, ArgValue::Int(1))];
    raw_tx.send(encode_record(&bad)).unwrap();
    drop(raw_tx);

    let (_lost_tx, lost_rx) = unbounded();
    let stats = Arc::new(CaptureStats::new());
    let pipeline = CapturePipeline::new(
        Reconstructor::new(CaptureConfig { capture_length: 4 }, sink),
        lost_rx,
        Arc::clone(&stats),
    );
    let errors = pipeline
        .run(RecordDecoder::new(raw_rx, 8), &CancelToken::new())
        .unwrap();
    assert_eq!(errors, 1);
    assert_eq!(stats.get(Counter::NetCapEvents), 2);

    let data = std::fs::read(&path).unwrap();
    let frame_len = 4 + 20 + 8 + 4;
    assert_eq!(data.len(), 24 + 16 + frame_len);
    let rec = &data[24..];
    assert_eq!(u32::from_le_bytes([rec[0], rec[1], rec[2], rec[3]]), 5);
    assert_eq!(u32::from_le_bytes([rec[4], rec[5], rec[6], rec[7]]), 0);
    assert_eq!(
        u32::from_le_bytes([rec[8], rec[9], rec[10], rec[11]]),
        frame_len as u32
    );
    let frame = &rec[16..];
    assert_eq!(&frame[..4], &[0, 0, 0, 2]);
    assert_eq!(be16(frame, 6), 32);
    assert_eq!(be16(frame, 28), 12);
}

#[test]
fn cancellation_stops_pipeline_promptly() {
    let sink = RecordingSink {
        delay: Some(Duration::from_millis(5)),
        ..RecordingSink::default()
    };
    let (tx, rx) = bounded(1000);
    for pid in 0..1000 {
        tx.send(event(pid, 1, ipv4_udp_payload(8))).unwrap();
    }
    let (_lost_tx, lost_rx) = unbounded();
    let stats = Arc::new(CaptureStats::new());
    let cancel = CancelToken::new();

    let pipeline = CapturePipeline::new(
        Reconstructor::new(CaptureConfig { capture_length: 8 }, sink.clone()),
        lost_rx,
        Arc::clone(&stats),
    );
    let runner = {
        let cancel = cancel.clone();
        thread::spawn(move || pipeline.run(DecodedEvents(rx), &cancel).unwrap())
    };

    thread::sleep(Duration::from_millis(50));
    let start = Instant::now();
    cancel.cancel();
    runner.join().unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));

    let written_at_cancel = sink.written.lock().unwrap().len();
    assert!(written_at_cancel < 1000);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(sink.written.lock().unwrap().len(), written_at_cancel);
    assert!(!tx.is_empty());
    assert_eq!(
        stats.get(Counter::NetCapEvents),
        written_at_cancel as u64
    );
}
