use anyhow::{Context, Result};
use handlebars::handlebars_helper;
use serde::Serialize;
use std::{
    fs::File,
    io::{stdout, ErrorKind, Write},
    path::Path,
};
use tracing::debug;
use xv11::{Decoder, DecoderOpts, Error, Lock, Summary};

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

#[derive(Debug, Clone, Serialize)]
struct Info {
    input: String,
    opts: DecoderOpts,
    crc_tolerance: usize,
    lock: Option<Lock>,
    summary: Summary,
}

fn summarize(fpath: &Path, decoder: Decoder<File>, revolutions: usize) -> Result<Info> {
    let opts = decoder.opts().clone();
    let crc_tolerance = decoder.crc_tolerance();
    let lock = decoder.lock().cloned();

    let mut summary = Summary::default();
    for zult in decoder.batches() {
        let batch = match zult {
            Ok(batch) => batch,
            // a capture file simply ends
            Err(Error::Transport(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                debug!("end of input after {} frames", summary.frames);
                break;
            }
            Err(err) => return Err(err).context("reading from lidar"),
        };
        summary.add(&batch);
        if summary.revolutions >= revolutions {
            break;
        }
    }

    Ok(Info {
        input: fpath.to_string_lossy().to_string(),
        opts,
        crc_tolerance,
        lock,
        summary,
    })
}

pub fn info(
    fpath: &Path,
    decoder: Decoder<File>,
    format: &Format,
    revolutions: usize,
) -> Result<()> {
    let info = summarize(fpath, decoder, revolutions)?;

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &info).context("serializing to json")
        }
        Format::Text => {
            let data = render_text(&info).context("serializing info")?;
            stdout()
                .write_all(str::as_bytes(&data))
                .context("writing to stdout")
        }
    }
}

fn render_text(info: &Info) -> Result<String> {
    handlebars_helper!(percent: |num: u64, total: u64| {
        if total == 0 {
            "-".to_string()
        } else {
            format!("{:.2}%", num as f64 * 100.0 / total as f64)
        }
    });
    let mut hb = handlebars::Handlebars::new();
    hb.register_helper("percent", Box::new(percent));
    hb.register_template_string("info", TEXT_TEMPLATE)
        .context("registering template")?;

    hb.render("info", &info).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ input }}
===============================================================================
Frames/Read:  {{ opts.frames_per_read }}
Tolerance:    {{ crc_tolerance }} frames/revolution ({{ opts.crc_tolerance_percent }}%)
Sync Frames:  {{ opts.sync_frames }}
Sync Offset:  {{ lock.offset }}
Restarts:     {{ lock.restarts }}
-------------------------------------------------------------------------------
Batches:      {{ summary.batches }}
Frames:       {{ summary.frames }}
Revolutions:  {{ summary.revolutions }}
CRC Failures: {{ summary.crc_failures }} ({{ percent summary.crc_failures summary.frames }})
Skips:        {{ summary.skips }}
Missing:      {{ summary.missing }}
Sync Lost:    {{ summary.sync_lost }}
Invalid:      {{ summary.invalid_readings }}
Low Strength: {{ summary.low_strength_readings }}
";
