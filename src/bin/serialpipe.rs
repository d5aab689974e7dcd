//! serialpipe: capture a serial device into a log file and print CSV fields
//!
//! Usage:
//!   serialpipe --device /dev/ttyUSB0 --baud 115200 --log capture.log
//!
//! With a config file, flags override file values:
//!   serialpipe --config serialpipe.toml --echo-lines
//!
//! Replay a previous capture without hardware:
//!   serialpipe --replay capture.log
//!
//! List serial ports:
//!   serialpipe list-ports

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::RecvTimeoutError;
use serialpipe::nodes::Render;
use serialpipe::runtime::StopHandle;
use serialpipe::transport::{self, MockHandle, MockTransport, Parity, SerialTransport, Transport};
use serialpipe::{AppConfig, FileMode, OverflowPolicy, SerialPipeline, TrimPolicy};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// TOML config file (flags override its values)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device path
    #[arg(short, long)]
    device: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Data bits (5-8)
    #[arg(long)]
    data_bits: Option<u8>,

    /// Parity
    #[arg(long, value_enum)]
    parity: Option<ParityArg>,

    /// Stop bits (1 or 2)
    #[arg(long)]
    stop_bits: Option<u8>,

    /// Read timeout in microseconds
    #[arg(long)]
    read_timeout_us: Option<u64>,

    /// Delay before each read in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Raw log file
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Truncate the log file instead of appending
    #[arg(long)]
    overwrite: bool,

    /// Log flush interval in milliseconds
    #[arg(long)]
    flush_interval_ms: Option<u64>,

    /// Field delimiter
    #[arg(long)]
    delimiter: Option<char>,

    /// Whitespace trimming
    #[arg(long, value_enum)]
    trim: Option<TrimArg>,

    /// Bound every queue to this many payloads
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Drop new payloads instead of blocking when a bounded queue is full
    #[arg(long)]
    drop_when_full: bool,

    /// Echo every received line
    #[arg(long)]
    echo_lines: bool,

    /// Bytes to write to the device at start (\n, \r and \t are expanded)
    #[arg(long)]
    send: Option<String>,

    /// Replay a file instead of opening a device; exits when it is consumed
    #[arg(long, conflicts_with = "device")]
    replay: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available serial ports
    ListPorts,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ParityArg {
    None,
    Odd,
    Even,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TrimArg {
    Field,
    Line,
    None,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs on stderr so stdout only carries fields
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    if let Some(Command::ListPorts) = args.command {
        return list_ports();
    }

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    apply_overrides(&mut config, &args);

    let (transport, replay): (Box<dyn Transport>, Option<MockHandle>) = match &args.replay {
        Some(path) => {
            let data = std::fs::read(path)
                .with_context(|| format!("Failed to read replay file {}", path.display()))?;
            config.serial.device = format!("replay:{}", path.display());
            config.validate()?;
            let (mock, handle) = MockTransport::with_data(data);
            (Box::new(mock), Some(handle))
        }
        None => {
            config.validate()?;
            (Box::new(SerialTransport::open(&config.serial)?), None)
        }
    };

    info!("=== serialpipe ===");
    info!("Device: {}", config.serial.device);
    if let Some(path) = &config.dump.path {
        info!("Log file: {} ({:?})", path.display(), config.dump.mode);
    }

    let mut pipeline = SerialPipeline::start(&config, transport)?;
    let stop = pipeline.stop_handle();
    watch_ctrl_c(stop.clone())?;

    if let Some(text) = &args.send {
        pipeline
            .to_device
            .send(unescape(text).into_bytes())
            .map_err(|_| anyhow!("serial source is not running"))?;
    }

    print_fields(&mut pipeline, &stop, replay.as_ref())?;

    pipeline.stop();
    match pipeline.wait() {
        Ok(report) => {
            info!("Pipeline finished:\n{}", report);
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            Err(e.into())
        }
    }
}

/// Print field lists until a stop request, an abort or the end of a replay.
///
/// Stdout is locked per line: the line echo stage writes to it too.
fn print_fields(
    pipeline: &mut SerialPipeline,
    stop: &StopHandle,
    replay: Option<&MockHandle>,
) -> io::Result<()> {
    loop {
        match pipeline.fields.recv_timeout(POLL_INTERVAL) {
            Ok(fields) => {
                let mut out = io::stdout().lock();
                writeln!(out, "{}", fields.render())?;
                out.flush()?;
            }
            Err(RecvTimeoutError::Timeout) => {
                if stop.is_stopped() || pipeline.is_aborted() {
                    return Ok(());
                }
                if let Some(handle) = replay
                    && handle.is_drained()
                {
                    info!("Replay consumed");
                    return Ok(());
                }
            }
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    let serial = &mut config.serial;
    if let Some(device) = &args.device {
        serial.device = device.clone();
    }
    if let Some(baud) = args.baud {
        serial.baud_rate = baud;
    }
    if let Some(bits) = args.data_bits {
        serial.data_bits = bits;
    }
    if let Some(parity) = args.parity {
        serial.parity = match parity {
            ParityArg::None => Parity::None,
            ParityArg::Odd => Parity::Odd,
            ParityArg::Even => Parity::Even,
        };
    }
    if let Some(bits) = args.stop_bits {
        serial.stop_bits = bits;
    }
    if let Some(us) = args.read_timeout_us {
        serial.read_timeout_us = us;
    }
    if let Some(ms) = args.delay_ms {
        config.source.delay_ms = ms;
    }
    if let Some(path) = &args.log {
        config.dump.path = Some(path.clone());
    }
    if args.overwrite {
        config.dump.mode = FileMode::Overwrite;
    }
    if let Some(ms) = args.flush_interval_ms {
        config.dump.flush_interval_ms = ms;
    }
    if let Some(delimiter) = args.delimiter {
        config.parser.delimiter = delimiter;
    }
    if let Some(trim) = args.trim {
        config.parser.trim = match trim {
            TrimArg::Field => TrimPolicy::PerField,
            TrimArg::Line => TrimPolicy::Line,
            TrimArg::None => TrimPolicy::None,
        };
    }
    if let Some(capacity) = args.queue_capacity {
        config.queue.capacity = Some(capacity);
    }
    if args.drop_when_full {
        config.queue.overflow = OverflowPolicy::DropNewest;
    }
    if args.echo_lines {
        config.display.echo_lines = true;
    }
}

/// Trigger an orchestrated shutdown on the first Ctrl-C
fn watch_ctrl_c(stop: StopHandle) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create signal runtime")?;

    std::thread::Builder::new()
        .name("ctrl_c".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl+C received, shutting down...");
                    stop.request_stop();
                }
            });
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

fn list_ports() -> anyhow::Result<()> {
    let ports = transport::list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!(
            "{}\t{}",
            port.port_name,
            transport::describe_port_type(&port.port_type)
        );
    }
    Ok(())
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
