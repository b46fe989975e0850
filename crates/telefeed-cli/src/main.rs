// crates/telefeed-cli/src/main.rs
//
// Headless front-end: open a source, pull conditioned frames and samples,
// rotate the Eurocrypt control words on schedule, and write raw RGBA +
// s16le PCM to disk for a downstream modulator to pick up.
//
// Disk I/O runs on its own thread behind a bounded channel so a slow drive
// stalls the pull loop (and through it the whole pipeline) instead of
// silently dropping output.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use telefeed_core::eurocrypt::{CwParity, Eurocrypt, EurocryptPreset};
use telefeed_core::{FeedConfig, WidescreenFit};
use telefeed_media::FeedSource;

#[derive(Parser)]
#[command(name = "telefeed", about = "Analogue TV feed synthesizer")]
struct Args {
    /// Source URL or path (use '-' for stdin).
    input: String,

    /// JSON feed configuration to start from.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output frame width.
    #[arg(long)]
    width: Option<usize>,

    /// Output frame height (active lines).
    #[arg(long)]
    lines: Option<usize>,

    /// Output frame rate, as "25" or "30000/1001".
    #[arg(long)]
    frame_rate: Option<String>,

    /// Emit at field rate (doubles the video clock).
    #[arg(long)]
    interlace: bool,

    /// Disable the audio lane.
    #[arg(long)]
    no_audio: bool,

    /// Seek offset in minutes.
    #[arg(long)]
    position: Option<u64>,

    /// Letterbox widescreen sources to 4:3.
    #[arg(long, conflicts_with = "pillarbox")]
    letterbox: bool,

    /// Crop widescreen sources to 4:3.
    #[arg(long)]
    pillarbox: bool,

    /// Apply the 5.1 to stereo downmix matrix.
    #[arg(long)]
    downmix: bool,

    /// Audio gain multiplier.
    #[arg(long)]
    volume: Option<f32>,

    /// RGBA PNG logo overlaid on every frame.
    #[arg(long)]
    logo: Option<PathBuf>,

    /// Overlay a wall-clock timestamp.
    #[arg(long)]
    timestamp: bool,

    /// Render subtitles onto the picture.
    #[arg(long)]
    subtitles: bool,

    /// Ingest subtitle text for out-of-band carriage.
    #[arg(long)]
    txsubtitles: bool,

    /// Eurocrypt channel preset (ctv, tvplus, tv1000, filmnet).
    #[arg(long)]
    eurocrypt: Option<EurocryptPreset>,

    /// Rotate the control-word parity every this many frames.
    #[arg(long, default_value_t = 250)]
    ecm_interval: u64,

    /// Stop after this many video frames.
    #[arg(long)]
    frames: Option<u64>,

    /// Raw RGBA output path.
    #[arg(long, default_value = "out.rgba")]
    video_out: PathBuf,

    /// Raw s16le PCM output path.
    #[arg(long, default_value = "out.pcm")]
    audio_out: PathBuf,
}

/// Blocks handed to the writer thread.
enum Block {
    Video(Vec<u8>),
    Audio(Vec<u8>),
}

fn build_config(args: &Args) -> Result<FeedConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("open config {}", path.display()))?;
            serde_json::from_reader(file)
                .with_context(|| format!("parse config {}", path.display()))?
        }
        None => FeedConfig::default(),
    };

    if let Some(w) = args.width {
        cfg.active_width = w;
    }
    if let Some(l) = args.lines {
        cfg.active_lines = l;
    }
    if let Some(rate) = &args.frame_rate {
        let (num, den) = match rate.split_once('/') {
            Some((n, d)) => (n.parse()?, d.parse()?),
            None => (rate.parse()?, 1),
        };
        cfg.frame_rate_num = num;
        cfg.frame_rate_den = den;
    }
    if args.interlace {
        cfg.interlace = true;
    }
    if args.no_audio {
        cfg.audio = false;
    }
    if let Some(p) = args.position {
        cfg.position = p;
    }
    if args.letterbox {
        cfg.fit = WidescreenFit::Letterbox;
    }
    if args.pillarbox {
        cfg.fit = WidescreenFit::Pillarbox;
    }
    if args.downmix {
        cfg.downmix = true;
    }
    if let Some(v) = args.volume {
        cfg.volume = v;
    }
    if args.logo.is_some() {
        cfg.logo = args.logo.clone();
    }
    if args.timestamp {
        cfg.timestamp = true;
    }
    if args.subtitles {
        cfg.subtitles = true;
    }
    if args.txsubtitles {
        cfg.txsubtitles = true;
    }
    Ok(cfg)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(" ")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = build_config(&args)?;

    let mut ec = args.eurocrypt.map(|preset| {
        info!("eurocrypt enabled ({preset})");
        Eurocrypt::new(preset)
    });
    if let Some(ec) = &ec {
        info!("initial ecm: {}", hex(ec.ecm()));
    }

    let mut feed = FeedSource::open(&args.input, &cfg)
        .with_context(|| format!("open feed '{}'", args.input))?;

    // Writer thread: bounded so a slow disk backpressures the pull loop.
    let (tx, rx) = bounded::<Block>(8);
    let video_path = args.video_out.clone();
    let audio_path = args.audio_out.clone();
    let writer = thread::spawn(move || -> Result<()> {
        let mut video = BufWriter::new(
            File::create(&video_path)
                .with_context(|| format!("create {}", video_path.display()))?,
        );
        let mut audio = BufWriter::new(
            File::create(&audio_path)
                .with_context(|| format!("create {}", audio_path.display()))?,
        );
        for block in rx {
            match block {
                Block::Video(data) => video.write_all(&data)?,
                Block::Audio(data) => audio.write_all(&data)?,
            }
        }
        video.flush()?;
        audio.flush()?;
        Ok(())
    });

    let mut frames: u64 = 0;
    let mut samples: u64 = 0;
    let mut active_parity = CwParity::Even;

    while !feed.eof() {
        if let Some((frame, ratio)) = feed.read_video() {
            // Strip the stride padding so the file is tightly packed.
            let stride = frame.stride(0);
            let row = frame.width() as usize * 4;
            let data = frame.data(0);
            let mut packed = Vec::with_capacity(row * frame.height() as usize);
            for y in 0..frame.height() as usize {
                packed.extend_from_slice(&data[y * stride..y * stride + row]);
            }
            if tx.send(Block::Video(packed)).is_err() {
                break;
            }

            frames += 1;
            if frames == 1 {
                debug!("first frame out (display ratio {ratio:.3})");
            }

            // Control-word rotation: switching to the opposite parity
            // re-randomises the slot that just went off air.
            if let Some(ec) = &mut ec {
                if frames % args.ecm_interval == 0 {
                    let retiring = active_parity;
                    active_parity = match active_parity {
                        CwParity::Even => CwParity::Odd,
                        CwParity::Odd => CwParity::Even,
                    };
                    ec.generate_ecm(retiring);
                    info!(
                        "cw parity now {:?}; ecm: {}",
                        active_parity,
                        hex(ec.ecm()),
                    );
                }
            }
        }

        if let Some(block) = feed.read_audio() {
            samples += (block.len() / 2) as u64;
            let mut bytes = Vec::with_capacity(block.len() * 2);
            for s in block {
                bytes.extend_from_slice(&s.to_le_bytes());
            }
            if tx.send(Block::Audio(bytes)).is_err() {
                break;
            }
        }

        if let Some(limit) = args.frames {
            if frames >= limit {
                break;
            }
        }
    }

    feed.close();
    drop(tx);
    writer.join().expect("writer thread panicked")?;

    info!(
        "done: {frames} frames, {samples} audio samples → {} / {}",
        args.video_out.display(),
        args.audio_out.display(),
    );
    Ok(())
}
