// Raw capture record decoding.
//
// Raw records are the bytes the capture source emits per event. Layout
// (little-endian):
//
//   0   u64  timestamp (ns)
//   8   u32  pid
//   12  u32  tid
//   16  [16] process name, NUL padded
//   32  u32  event id
//   36  i64  return value
//   44  u8   container id length, then the container id (UTF-8)
//   ..  u8   argument count, then the arguments
//
// Each argument is: u8 name length, name, u8 type tag, value. Values are
// bytes (tag 1: u32 length + bytes), int (tag 2: i64) or string (tag 3:
// u32 length + UTF-8).

use std::io::{self, Read};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, select};

use crate::cancel::CancelToken;
use crate::error::NetcapError;
use crate::event::{ArgValue, Argument, CapturedPacketEvent};
use crate::pipeline::{self, DecodeStage, Stage};

const COMM_LEN: usize = 16;

const ARG_BYTES: u8 = 1;
const ARG_INT: u8 = 2;
const ARG_STR: u8 = 3;

/// Largest record accepted by [`spawn_record_reader`].
pub const MAX_RECORD_LEN: usize = 1 << 20;

// ---------------------------------------------------------------------------
// Record parsing
// ---------------------------------------------------------------------------

/// Bounds-checked little-endian reader over one record.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn err(&self, detail: impl Into<String>) -> NetcapError {
        NetcapError::Decode {
            offset: self.pos,
            detail: detail.into(),
        }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], NetcapError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| self.err(format!("truncated {what}")))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self, what: &str) -> Result<u8, NetcapError> {
        Ok(self.take(1, what)?[0])
    }

    fn u32(&mut self, what: &str) -> Result<u32, NetcapError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self, what: &str) -> Result<u64, NetcapError> {
        let b = self.take(8, what)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    fn utf8(&mut self, n: usize, what: &str) -> Result<String, NetcapError> {
        let start = self.pos;
        let b = self.take(n, what)?;
        String::from_utf8(b.to_vec()).map_err(|_| NetcapError::Decode {
            offset: start,
            detail: format!("{what} is not valid UTF-8"),
        })
    }
}

/// Decode a single raw record into an event.
pub fn decode_record(data: &[u8]) -> Result<CapturedPacketEvent, NetcapError> {
    let mut c = Cursor::new(data);

    let timestamp_ns = c.u64("timestamp")?;
    let pid = c.u32("pid")?;
    let tid = c.u32("tid")?;
    let comm = c.take(COMM_LEN, "process name")?;
    let name_len = comm.iter().position(|&b| b == 0).unwrap_or(COMM_LEN);
    let process_name = String::from_utf8_lossy(&comm[..name_len]).into_owned();
    let event_id = c.u32("event id")?;
    let return_value = c.u64("return value")? as i64;

    let cid_len = c.u8("container id length")? as usize;
    let container_id = match c.utf8(cid_len, "container id")? {
        s if s.is_empty() => None,
        s => Some(s),
    };

    let argnum = c.u8("argument count")?;
    let mut args = Vec::with_capacity(argnum as usize);
    for _ in 0..argnum {
        args.push(decode_arg(&mut c)?);
    }

    if c.pos != data.len() {
        return Err(c.err(format!("{} trailing bytes", data.len() - c.pos)));
    }

    Ok(CapturedPacketEvent {
        event_id,
        return_value,
        timestamp_ns,
        pid,
        tid,
        process_name,
        container_id,
        args,
    })
}

fn decode_arg(c: &mut Cursor<'_>) -> Result<Argument, NetcapError> {
    let name_len = c.u8("argument name length")? as usize;
    let name = c.utf8(name_len, "argument name")?;
    let tag_pos = c.pos;
    let value = match c.u8("argument type")? {
        ARG_BYTES => {
            let len = c.u32("bytes length")? as usize;
            ArgValue::Bytes(c.take(len, "bytes argument")?.to_vec())
        }
        ARG_INT => ArgValue::Int(c.u64("int argument")? as i64),
        ARG_STR => {
            let len = c.u32("string length")? as usize;
            ArgValue::Str(c.utf8(len, "string argument")?)
        }
        other => {
            return Err(NetcapError::Decode {
                offset: tag_pos,
                detail: format!("unknown argument type {other}"),
            });
        }
    };
    Ok(Argument { name, value })
}

/// Encode an event as a raw record. Inverse of [`decode_record`].
///
/// Process names longer than 16 bytes and container ids longer than 255
/// bytes are truncated.
pub fn encode_record(event: &CapturedPacketEvent) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&event.timestamp_ns.to_le_bytes());
    out.extend_from_slice(&event.pid.to_le_bytes());
    out.extend_from_slice(&event.tid.to_le_bytes());
    let mut comm = [0u8; COMM_LEN];
    let name = event.process_name.as_bytes();
    let n = name.len().min(COMM_LEN);
    comm[..n].copy_from_slice(&name[..n]);
    out.extend_from_slice(&comm);
    out.extend_from_slice(&event.event_id.to_le_bytes());
    out.extend_from_slice(&event.return_value.to_le_bytes());

    let cid = event.container_id.as_deref().unwrap_or("").as_bytes();
    let cid = &cid[..cid.len().min(u8::MAX as usize)];
    out.push(cid.len() as u8);
    out.extend_from_slice(cid);

    let args = &event.args[..event.args.len().min(u8::MAX as usize)];
    out.push(args.len() as u8);
    for arg in args {
        let name = arg.name.as_bytes();
        let name = &name[..name.len().min(u8::MAX as usize)];
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        match &arg.value {
            ArgValue::Bytes(b) => {
                out.push(ARG_BYTES);
                out.extend_from_slice(&(b.len() as u32).to_le_bytes());
                out.extend_from_slice(b);
            }
            ArgValue::Int(v) => {
                out.push(ARG_INT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            ArgValue::Str(s) => {
                out.push(ARG_STR);
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Decode stage
// ---------------------------------------------------------------------------

/// Decode stage turning raw records into events.
///
/// Malformed records are reported on the stage's error channel and skipped.
pub struct RecordDecoder {
    raw: Receiver<Vec<u8>>,
    capacity: usize,
}

impl RecordDecoder {
    pub fn new(raw: Receiver<Vec<u8>>, capacity: usize) -> Self {
        Self {
            raw,
            capacity: capacity.max(1),
        }
    }
}

impl DecodeStage for RecordDecoder {
    fn start(
        self,
        cancel: CancelToken,
    ) -> Result<(Receiver<CapturedPacketEvent>, Stage), NetcapError> {
        let (tx, rx) = bounded(self.capacity);
        let raw = self.raw;
        let stage = pipeline::spawn_stage("netcap-decode", move |errors| {
            decode_loop(&raw, &tx, errors, &cancel);
        })?;
        Ok((rx, stage))
    }
}

fn decode_loop(
    raw: &Receiver<Vec<u8>>,
    out: &Sender<CapturedPacketEvent>,
    errors: &Sender<NetcapError>,
    cancel: &CancelToken,
) {
    let mut decoded: u64 = 0;
    let mut malformed: u64 = 0;

    loop {
        let record = select! {
            recv(cancel.done()) -> _ => break,
            recv(raw) -> msg => match msg {
                Ok(r) => r,
                Err(_) => break,
            },
        };

        match decode_record(&record) {
            Ok(event) => {
                decoded += 1;
                select! {
                    send(out, event) -> res => if res.is_err() { break },
                    recv(cancel.done()) -> _ => break,
                }
            }
            Err(e) => {
                malformed += 1;
                let _ = errors.send(e);
            }
        }
    }

    log::info!("record decoder exit: decoded={decoded}, malformed={malformed}");
}

// ---------------------------------------------------------------------------
// Record source
// ---------------------------------------------------------------------------

/// Read `u32` LE length-prefixed records from `reader` into `raw`.
///
/// Returns `Ok(None)` at a clean end of stream.
pub fn read_record(reader: &mut impl Read) -> Result<Option<Vec<u8>>, NetcapError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(NetcapError::RecordRead(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated record length",
                )));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(NetcapError::RecordRead(e)),
        }
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Err(NetcapError::RecordRead(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record of {len} bytes exceeds {MAX_RECORD_LEN}"),
        )));
    }
    let mut record = vec![0u8; len];
    reader
        .read_exact(&mut record)
        .map_err(NetcapError::RecordRead)?;
    Ok(Some(record))
}

/// Spawn a thread forwarding records from `reader` into `raw` until end of
/// stream, cancellation or a read error.
///
/// The reader may block in `read`, so the thread is not part of the
/// pipeline's wait set; dropping `raw`'s receiver ends it on the next send.
pub fn spawn_record_reader<R: Read + Send + 'static>(
    mut reader: R,
    raw: Sender<Vec<u8>>,
    cancel: CancelToken,
) -> Result<JoinHandle<()>, NetcapError> {
    thread::Builder::new()
        .name("netcap-reader".into())
        .spawn(move || {
            let mut records: u64 = 0;
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match read_record(&mut reader) {
                    Ok(Some(record)) => {
                        records += 1;
                        select! {
                            send(raw, record) -> res => if res.is_err() { break },
                            recv(cancel.done()) -> _ => break,
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("record reader: {e}");
                        break;
                    }
                }
            }
            log::info!("record reader exit: records={records}");
        })
        .map_err(|e| NetcapError::Fatal(format!("spawn reader thread: {e}")))
}
