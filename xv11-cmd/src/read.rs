use std::{
    fs::File,
    io::{stdout, BufWriter, Write},
};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};
use xv11::{Decoder, Event, Frame, Status};

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

fn write_frame<W: Write>(dst: &mut W, frame: &Frame, format: &Format) -> Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer(&mut *dst, frame).context("serializing frame")?;
            writeln!(dst)?;
        }
        Format::Text => {
            write!(dst, "{:#04x} {:5}", frame.index, frame.speed)?;
            for reading in &frame.readings {
                let flag = match (reading.invalid_data, reading.strength_warning) {
                    (true, _) => '!',
                    (false, true) => '~',
                    _ => ' ',
                };
                write!(
                    dst,
                    " {:5}/{:<5}{flag}",
                    reading.distance, reading.signal_strength
                )?;
            }
            writeln!(dst)?;
        }
    }
    Ok(())
}

fn log_event(event: &Event) {
    match event {
        Event::ChecksumFailure {
            index, failures, ..
        } => debug!(index, failures, "frame checksum failed"),
        Event::FramesSkipped {
            expected,
            actual,
            missing,
            ..
        } => info!(expected, actual, ?missing, "lidar skipped frames"),
        Event::SyncLost { failures, .. } => warn!(failures, "too many checksum failures"),
    }
}

pub fn read(
    decoder: Decoder<File>,
    format: &Format,
    limit: Option<usize>,
    resync: bool,
) -> Result<()> {
    let mut dst = BufWriter::new(stdout().lock());
    let mut batches = decoder.batches();
    let mut count = 0;

    while limit.map_or(true, |limit| count < limit) {
        let Some(zult) = batches.next() else {
            break;
        };
        let batch = zult.context("reading from lidar")?;
        count += 1;

        batch.events.iter().for_each(log_event);
        for frame in &batch.frames {
            write_frame(&mut dst, frame, format)?;
        }
        dst.flush().context("writing to stdout")?;

        if batch.status == Status::SynchronizationLost {
            if !resync {
                bail!("synchronization lost; use --resync to re-synchronize");
            }
            warn!("synchronization lost; re-synchronizing");
            let lock = batches
                .decoder()
                .synchronize()
                .context("re-synchronizing with lidar")?;
            info!(restarts = lock.restarts, offset = lock.offset, "re-synchronized");
        }
    }

    Ok(())
}
