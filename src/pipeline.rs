// Network capture pipeline: decode stage -> intake stage -> capture sink.
//
// Every stage runs on its own named thread and reports failures on an error
// channel that closes when the stage returns. The coordinator merges those
// channels and blocks until all of them are closed.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Select, Sender, unbounded};

use crate::cancel::CancelToken;
use crate::error::NetcapError;
use crate::event::CapturedPacketEvent;
use crate::intake;
use crate::reconstruct::Reconstructor;
use crate::sink::CaptureSink;
use crate::stats::CaptureStats;

/// A running pipeline stage.
pub struct Stage {
    name: String,
    errors: Receiver<NetcapError>,
    handle: JoinHandle<()>,
}

impl Stage {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Spawn `body` on a named thread. Errors it sends on the provided channel
/// are logged by [`wait_for_pipeline`].
pub fn spawn_stage<F>(name: &str, body: F) -> Result<Stage, NetcapError>
where
    F: FnOnce(&Sender<NetcapError>) + Send + 'static,
{
    let (err_tx, err_rx) = unbounded();
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(&err_tx))
        .map_err(|e| NetcapError::Fatal(format!("spawn {name} thread: {e}")))?;
    Ok(Stage {
        name: name.to_string(),
        errors: err_rx,
        handle,
    })
}

/// Block until every stage has finished, logging each error they report.
///
/// Returns the number of errors reported.
pub fn wait_for_pipeline(stages: Vec<Stage>) -> usize {
    let mut pending: Vec<(String, Receiver<NetcapError>)> = stages
        .iter()
        .map(|s| (s.name.clone(), s.errors.clone()))
        .collect();
    let mut reported = 0;

    while !pending.is_empty() {
        let (idx, res) = {
            let mut sel = Select::new();
            for (_, rx) in &pending {
                sel.recv(rx);
            }
            let op = sel.select();
            let idx = op.index();
            (idx, op.recv(&pending[idx].1))
        };
        match res {
            Ok(err) => {
                reported += 1;
                log::error!("{}: {err}", pending[idx].0);
            }
            Err(_) => {
                pending.swap_remove(idx);
            }
        }
    }

    for stage in stages {
        if stage.handle.join().is_err() {
            log::error!("{}: stage panicked", stage.name);
        }
    }
    reported
}

// ---------------------------------------------------------------------------
// Decode stage seam
// ---------------------------------------------------------------------------

/// Stage that produces decoded events for the capture pipeline.
pub trait DecodeStage {
    /// Start the stage. The returned receiver closes when the stage ends.
    fn start(
        self,
        cancel: CancelToken,
    ) -> Result<(Receiver<CapturedPacketEvent>, Stage), NetcapError>;
}

/// Decode stage over an already decoded event stream.
pub struct DecodedEvents(pub Receiver<CapturedPacketEvent>);

impl DecodeStage for DecodedEvents {
    fn start(
        self,
        _cancel: CancelToken,
    ) -> Result<(Receiver<CapturedPacketEvent>, Stage), NetcapError> {
        let stage = spawn_stage("netcap-events", |_| {})?;
        Ok((self.0, stage))
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Wires a decode stage to the capture intake and runs both to completion.
pub struct CapturePipeline<S> {
    reconstructor: Reconstructor<S>,
    lost: Receiver<u64>,
    stats: Arc<CaptureStats>,
}

impl<S: CaptureSink + 'static> CapturePipeline<S> {
    pub fn new(
        reconstructor: Reconstructor<S>,
        lost: Receiver<u64>,
        stats: Arc<CaptureStats>,
    ) -> Self {
        Self {
            reconstructor,
            lost,
            stats,
        }
    }

    /// Run until cancellation or until the decode stage's stream is
    /// exhausted. No stage failure is fatal; errors are logged and counted.
    pub fn run<D: DecodeStage>(
        self,
        decoder: D,
        cancel: &CancelToken,
    ) -> Result<usize, NetcapError> {
        let mut stages = Vec::new();

        // source pipeline stage
        let (events, decode_stage) = decoder.start(cancel.clone())?;
        stages.push(decode_stage);

        // network capture stage
        let intake_stage = match intake::spawn_intake(
            self.reconstructor,
            events,
            self.lost,
            self.stats,
            cancel.clone(),
        ) {
            Ok(s) => s,
            Err(e) => {
                cancel.cancel();
                wait_for_pipeline(stages);
                return Err(e);
            }
        };
        stages.push(intake_stage);

        Ok(wait_for_pipeline(stages))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn collects_errors_from_all_stages() {
        let a = spawn_stage("a", |errs| {
            errs.send(NetcapError::Fatal("one".into())).unwrap();
            errs.send(NetcapError::Fatal("two".into())).unwrap();
        })
        .unwrap();
        let b = spawn_stage("b", |errs| {
            thread::sleep(Duration::from_millis(10));
            errs.send(NetcapError::Sink("three".into())).unwrap();
        })
        .unwrap();
        let c = spawn_stage("c", |_| {}).unwrap();
        assert_eq!(c.name(), "c");
        assert_eq!(wait_for_pipeline(vec![a, b, c]), 3);
    }

    #[test]
    fn waits_for_cancelled_stage() {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let stage = spawn_stage("waiter", move |_| {
            let _ = token.done().recv();
        })
        .unwrap();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            cancel.cancel();
        });
        assert_eq!(wait_for_pipeline(vec![stage]), 0);
        canceller.join().unwrap();
    }

    #[test]
    fn panicking_stage_does_not_hang() {
        let stage = spawn_stage("boom", |_| panic!("stage failure")).unwrap();
        assert_eq!(wait_for_pipeline(vec![stage]), 0);
    }
}
