// Capture stage intake: drives the reconstructor from the decoded event
// stream and accounts for events the capture source lost.

use std::sync::Arc;

use crossbeam_channel::{Receiver, never, select};

use crate::cancel::CancelToken;
use crate::error::NetcapError;
use crate::event::CapturedPacketEvent;
use crate::pipeline::{self, Stage};
use crate::reconstruct::Reconstructor;
use crate::sink::CaptureSink;
use crate::stats::{CaptureStats, Counter};

/// Why the intake loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeExit {
    Cancelled,
    EventsClosed,
}

/// Process events until cancellation or until the event stream closes.
///
/// Events are handled one at a time in arrival order. The processed counter
/// counts every event read, including the ones the reconstructor drops.
/// Events still buffered when cancellation is observed are not processed.
pub fn run_intake<S: CaptureSink>(
    reconstructor: &mut Reconstructor<S>,
    events: &Receiver<CapturedPacketEvent>,
    lost: &Receiver<u64>,
    stats: &CaptureStats,
    cancel: &CancelToken,
) -> IntakeExit {
    let closed = never::<u64>();
    let mut lost_open = true;

    loop {
        let lost_rx = if lost_open { lost } else { &closed };

        select! {
            recv(cancel.done()) -> _ => return IntakeExit::Cancelled,
            recv(events) -> msg => match msg {
                Ok(event) => {
                    if cancel.is_cancelled() {
                        return IntakeExit::Cancelled;
                    }
                    reconstructor.process(event);
                    stats.increment(Counter::NetCapEvents);
                }
                Err(_) => {
                    log::debug!("network capture: event stream closed");
                    return IntakeExit::EventsClosed;
                }
            },
            recv(lost_rx) -> msg => match msg {
                Ok(n) => record_lost(stats, n),
                Err(_) => lost_open = false,
            },
        }
    }
}

fn record_lost(stats: &CaptureStats, lost: u64) {
    if lost > 0 {
        stats.add(Counter::LostNetCapEvents, lost);
        log::warn!("lost {lost} network capture events");
    }
}

/// Run [`run_intake`] on its own thread.
pub fn spawn_intake<S: CaptureSink + 'static>(
    mut reconstructor: Reconstructor<S>,
    events: Receiver<CapturedPacketEvent>,
    lost: Receiver<u64>,
    stats: Arc<CaptureStats>,
    cancel: CancelToken,
) -> Result<Stage, NetcapError> {
    pipeline::spawn_stage("netcap-intake", move |_errors| {
        let exit = run_intake(&mut reconstructor, &events, &lost, &stats, &cancel);
        reconstructor.flush();
        let st = stats.snapshot();
        log::info!(
            "network capture intake exit ({exit:?}): events={}, lost={}",
            st.net_cap_events,
            st.lost_net_cap_events
        );
    })
}
