//! Reference consumer CLI.
//!
//! `freshet fetch <prefix> --output=<file>` bootstraps from the stream's
//! meta records and writes reassembled frames, length-prefixed, to the
//! output file until interrupted. The only built-in transport is the
//! synthetic in-process producer (`--face=sim`); real deployments supply
//! their own `Face` implementation and embed the `freshet` crate.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use freshet::{Consumer, ConsumerError, ConsumerOptions, FrameOut, FrameSink};
use freshet_core::{Name, NamespaceInfo};
use freshet_net::{AcceptAll, Face};
use freshet_testing::{SimProducerFace, SimProducerOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "freshet", version, about = "Low-latency video consumer over a named-data substrate")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a live stream and write reassembled frames to a file.
    Fetch(FetchArgs),
}

#[derive(Args)]
struct FetchArgs {
    /// Thread-level stream prefix, e.g. /isp/cam/ndnrtc/v=4/video/front/hi
    prefix: String,

    /// Output file receiving length-prefixed frames
    #[arg(short, long)]
    output: PathBuf,

    /// Request parity segments and recover lost data with FEC
    #[arg(long)]
    use_fec: bool,

    /// Fixed pipeline window; adaptive when omitted
    #[arg(long)]
    pp_size: Option<usize>,

    /// Interest lifetime in milliseconds
    #[arg(long, default_value_t = 2000)]
    lifetime_ms: u64,

    /// Transport: `sim` runs the built-in synthetic producer
    #[arg(long, default_value = "sim")]
    face: String,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log: Option<PathBuf>,
}

/// Writes each frame as `len:u32 | sample:u64 | ts:u64 | flags:u8 | bytes`.
struct FileSink {
    out: BufWriter<File>,
    frames: u64,
    bytes: u64,
}

impl FileSink {
    fn create(path: &PathBuf) -> std::io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            frames: 0,
            bytes: 0,
        })
    }
}

impl FrameSink for FileSink {
    fn frame(&mut self, frame: FrameOut) {
        let mut flags = 0u8;
        if frame.key_frame {
            flags |= 1;
        }
        if frame.recovered {
            flags |= 2;
        }
        let write = (|| -> std::io::Result<()> {
            self.out.write_all(&(frame.bytes.len() as u32).to_be_bytes())?;
            self.out.write_all(&frame.sample_no.to_be_bytes())?;
            self.out.write_all(&frame.timestamp_ms.to_be_bytes())?;
            self.out.write_all(&[flags])?;
            self.out.write_all(&frame.bytes)?;
            Ok(())
        })();
        match write {
            Ok(()) => {
                self.frames += 1;
                self.bytes += frame.bytes.len() as u64;
            }
            Err(err) => error!(%err, sample = frame.sample_no, "frame write failed"),
        }
    }
}

fn init_logging(verbose: u8, log: Option<&PathBuf>) -> std::io::Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    match log {
        Some(path) => {
            let file = File::create(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn build_face(kind: &str) -> Option<Arc<dyn Face>> {
    match kind {
        "sim" => Some(Arc::new(SimProducerFace::new(SimProducerOptions::default()))),
        _ => None,
    }
}

async fn fetch(args: FetchArgs) -> ExitCode {
    let name = match Name::from_uri(&args.prefix) {
        Ok(name) => name,
        Err(err) => {
            eprintln!("bad stream prefix `{}`: {err}", args.prefix);
            return ExitCode::from(2);
        }
    };
    let prefix = match NamespaceInfo::parse(&name) {
        Ok(prefix) => prefix,
        Err(err) => {
            eprintln!("bad stream prefix `{}`: {err}", args.prefix);
            return ExitCode::from(2);
        }
    };

    let Some(face) = build_face(&args.face) else {
        eprintln!(
            "unknown face `{}`: only the built-in `sim` transport ships with this binary",
            args.face
        );
        return ExitCode::from(2);
    };

    let mut sink = match FileSink::create(&args.output) {
        Ok(sink) => sink,
        Err(err) => {
            eprintln!("cannot open {}: {err}", args.output.display());
            return ExitCode::from(2);
        }
    };

    let mut options = ConsumerOptions::new(prefix)
        .with_fec(args.use_fec)
        .with_interest_lifetime(Duration::from_millis(args.lifetime_ms));
    if let Some(size) = args.pp_size {
        options = options.with_pipeline_size(size);
    }

    let consumer = Consumer::new(options, face, Arc::new(AcceptAll));
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt: draining");
                cancel.cancel();
            }
        });
    }

    let result = consumer.run(&mut sink, cancel).await;
    if let Err(err) = sink.out.flush() {
        warn!(%err, "output flush failed");
    }
    info!(frames = sink.frames, bytes = sink.bytes, "done");

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ ConsumerError::BootstrapFailed(_)) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(2)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Fetch(args) => {
            if let Err(err) = init_logging(args.verbose, args.log.as_ref()) {
                eprintln!("cannot open log file: {err}");
                return ExitCode::from(2);
            }
            fetch(args).await
        }
    }
}
