mod info;
mod read;

use std::path::PathBuf;
use std::{fs::File, io::stderr};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use xv11::{Decoder, DecoderOpts, REQUIRED_SYNC_FRAMES};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by all commands that decode a stream.
#[derive(Args)]
struct DecodeArgs {
    /// Number of frames to read per decode cycle.
    #[arg(short = 'n', long, default_value_t = 10)]
    frames_per_read: usize,

    /// Percent of a revolution's frames that may fail their checksum before
    /// synchronization is considered lost.
    #[arg(
        short = 't',
        long,
        default_value_t = 10,
        value_parser = clap::value_parser!(u8).range(0..=100),
    )]
    crc_tolerance: u8,

    /// Consecutive valid frames required to synchronize.
    #[arg(long, default_value_t = REQUIRED_SYNC_FRAMES)]
    sync_frames: usize,

    /// LIDAR tty or a file containing captured sensor bytes.
    ///
    /// A tty must already be configured for 115200 baud raw input, e.g.,
    /// `stty -F /dev/ttyS0 115200 raw`.
    input: PathBuf,
}

impl DecodeArgs {
    fn decoder(&self) -> Result<Decoder<File>> {
        let src = File::open(&self.input)
            .with_context(|| format!("opening input {:?}", self.input))?;
        let opts = DecoderOpts::builder()
            .frames_per_read(self.frames_per_read)
            .crc_tolerance_percent(self.crc_tolerance)
            .sync_frames(self.sync_frames)
            .build();
        debug!(?opts, "synchronizing");
        Decoder::new(src, opts).context("synchronizing with lidar")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Decode frames and write them to stdout.
    Read {
        #[command(flatten)]
        decode: DecodeArgs,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: read::Format,

        /// Stop after this many decode cycles.
        #[arg(short, long, value_name = "count")]
        batches: Option<usize>,

        /// Re-synchronize when synchronization is lost rather than exiting.
        #[arg(long, action)]
        resync: bool,
    },
    /// Decode a number of revolutions and show summary statistics.
    Info {
        #[command(flatten)]
        decode: DecodeArgs,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: info::Format,

        /// Number of revolutions to decode.
        #[arg(short, long, default_value_t = 10)]
        revolutions: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("XV11_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Read {
            decode,
            format,
            batches,
            resync,
        } => read::read(decode.decoder()?, format, *batches, *resync),
        Commands::Info {
            decode,
            format,
            revolutions,
        } => info::info(&decode.input, decode.decoder()?, format, *revolutions),
    }
}
