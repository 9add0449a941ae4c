use anyhow::{Context, Result};
use bt10_recorder::config::{DEFAULT_BPM, DEFAULT_NAME, MIN_BPM};
use bt10_recorder::transport::DEVICE_NAME;
use bt10_recorder::{MidiPortOutput, ReplayTransport, Session, SessionConfig, StopReason, Transport};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Record a WU-BT10 keyboard to a MIDI file")]
struct Args {
    /// when true use Bluetooth address instead of UUID on macOS
    #[arg(long)]
    macos_use_bdaddr: bool,

    /// sets the MIDI file tempo(BPM)
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_BPM,
        value_parser = clap::value_parser!(u32).range(i64::from(MIN_BPM)..)
    )]
    tempo: u32,

    /// sets the MIDI file name
    #[arg(short, long, default_value = DEFAULT_NAME)]
    name: String,

    /// sets the logging level to debug
    #[arg(short, long)]
    debug: bool,

    /// play back a capture file instead of connecting to the keyboard
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// keep the raw notifications of this session in a capture file
    #[arg(long, value_name = "FILE")]
    capture: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let config = SessionConfig {
        bpm: args.tempo,
        name: args.name.clone(),
        use_bdaddr: args.macos_use_bdaddr,
        capture: args.capture.clone(),
        ..Default::default()
    };

    let transport = open_transport(&args, &config)?;
    let output = MidiPortOutput::open_first("bt10-recorder").context("open MIDI output")?;
    info!("sending live events to {}", output.port_name());

    let session = Session::new(config).context("session config")?;
    let stopper = session.stopper();
    info!("press Enter once connected to quit recording...");
    // every Enter is a stop request; the session ignores those sent before it connected
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if line.is_err() || stopper.send(StopReason::Operator).is_err() {
                break;
            }
        }
    });

    let report = session
        .run(transport, Box::new(output))
        .with_context(|| format!("recording from {DEVICE_NAME}"))?;

    info!(
        "{} packets ({} dropped), {} notes, {} unmatched, {:.1}s -> {}",
        report.stats.packets,
        report.stats.dropped_packets,
        report.timeline.notes.len(),
        report.unmatched_notes,
        report.elapsed_ms / 1000.0,
        report.file.display()
    );
    Ok(())
}

fn open_transport(args: &Args, config: &SessionConfig) -> Result<Box<dyn Transport>> {
    if let Some(path) = &args.replay {
        return Ok(Box::new(ReplayTransport::new(path)));
    }
    ble_transport(config)
}

#[cfg(feature = "ble")]
fn ble_transport(config: &SessionConfig) -> Result<Box<dyn Transport>> {
    let transport = bt10_recorder::transport::BleTransport::new(config.use_bdaddr)
        .context("start bluetooth runtime")?;
    Ok(Box::new(transport))
}

#[cfg(not(feature = "ble"))]
fn ble_transport(_config: &SessionConfig) -> Result<Box<dyn Transport>> {
    Err(bt10_recorder::TransportError::Unsupported(
        "built without the `ble` feature; use --replay or rebuild with --features ble".into(),
    )
    .into())
}
