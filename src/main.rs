use std::fs::File;
use std::io::{self, BufReader, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::{bounded, unbounded};

use netcap::cancel::CancelToken;
use netcap::cli::Cli;
use netcap::decode::{self, RecordDecoder};
use netcap::error::NetcapError;
use netcap::output;
use netcap::pipeline::CapturePipeline;
use netcap::reconstruct::Reconstructor;
use netcap::sink::PcapFileSink;
use netcap::stats::CaptureStats;

/// Global shutdown flag, set by signal handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(
            libc::SIGTERM,
            signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGINT,
            signal_handler as *const () as libc::sighandler_t,
        );
    }
}

fn exit_code(err: &NetcapError) -> i32 {
    match err {
        NetcapError::Config(_) => 2,
        NetcapError::Input(_) | NetcapError::PcapFile(_) => 3,
        _ => 4,
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(cli)));

    match result {
        Ok(Ok(())) => std::process::exit(0),
        Ok(Err(e)) => {
            eprintln!("error: {e}");
            std::process::exit(exit_code(&e));
        }
        Err(_) => {
            eprintln!("error: fatal: unexpected panic");
            std::process::exit(4);
        }
    }
}

fn run(cli: Cli) -> Result<(), NetcapError> {
    install_signal_handlers();

    let config = cli.capture_config();
    log::info!("Capture length: {} bytes", config.capture_length);

    let input: Box<dyn Read + Send> = if cli.reads_stdin() {
        Box::new(io::stdin())
    } else {
        Box::new(BufReader::new(
            File::open(&cli.input).map_err(NetcapError::Input)?,
        ))
    };
    let sink = PcapFileSink::create(&cli.output)?;

    let cancel = CancelToken::new();
    let stats = Arc::new(CaptureStats::new());

    // Raw record channel between the reader and the decode stage.
    let (raw_tx, raw_rx) = bounded::<Vec<u8>>(cli.channel_capacity);
    // Replayed records carry no loss reports; the sender is dropped at once.
    let (_, lost_rx) = unbounded::<u64>();

    let _reader = decode::spawn_record_reader(input, raw_tx, cancel.clone())?;
    let watcher = spawn_shutdown_watcher(cancel.clone())?;

    let pipeline = CapturePipeline::new(
        Reconstructor::new(config, sink),
        lost_rx,
        Arc::clone(&stats),
    );
    let errors = pipeline.run(RecordDecoder::new(raw_rx, cli.channel_capacity), &cancel)?;

    // Stop the watcher; the reader may still be blocked on stdin and is left
    // to die with the process.
    cancel.cancel();
    let _ = watcher.join();

    let snapshot = stats.snapshot();
    log::info!(
        "Capture finished: {} events, {} lost, {} stage errors",
        snapshot.net_cap_events,
        snapshot.lost_net_cap_events,
        errors
    );
    output::write_stats(&snapshot, cli.stats, &mut io::stdout().lock())
}

/// Translate signal-driven shutdown requests into pipeline cancellation.
fn spawn_shutdown_watcher(cancel: CancelToken) -> Result<thread::JoinHandle<()>, NetcapError> {
    thread::Builder::new()
        .name("netcap-signals".into())
        .spawn(move || {
            while !cancel.is_cancelled() {
                if SHUTDOWN_REQUESTED.load(Ordering::Relaxed) {
                    log::info!("Shutdown requested");
                    cancel.cancel();
                    return;
                }
                thread::sleep(Duration::from_millis(100));
            }
        })
        .map_err(|e| NetcapError::Fatal(format!("spawn signal thread: {e}")))
}
