// crates/telefeed-media/src/feed.rs
//
// FeedSource: open the source, stand the five stage threads up, and expose
// the blocking pull interface the modulator drives.
//
// Open order: identify streams → build decoders → compute the graph specs →
// allocate queues and double buffers (output frames preallocated once) →
// work out the start-time cursors (and seek) → spawn demux, video decode,
// video scale, audio decode, audio resample.
//
// Close order: raise the abort latch → abort both packet queues → join the
// demuxer → abort the four frame buffers → join the stage threads. Stage
// failures never cross thread boundaries; a dead stage aborts its output
// buffer and the consumer simply sees end of stream.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{self, Pixel, Sample};
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::media::Type;
use ffmpeg::util::channel_layout::ChannelLayoutMask;
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::{codec, Rational, Rescale};
use thiserror::Error;
use tracing::{debug, info, warn};

use telefeed_core::clock::{AudioAligner, VideoCadence, AUDIO_SAMPLE_RATE};
use telefeed_core::config::{ConfigError, FeedConfig, WidescreenFit};
use telefeed_core::overlay::{self, LogoPosition, Raster};
use telefeed_core::subtitle::SubtitleStore;

use crate::audio::AudioResampleStage;
use crate::dbuffer::{Flip, FrameDoubleBuffer};
use crate::decode::DecodeStage;
use crate::demux::{DemuxStage, SubtitleLane};
use crate::filters;
use crate::logo::load_logo;
use crate::queue::PacketQueue;
use crate::video::{OverlaySettings, VideoScaleStage};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not open source '{url}': {source}")]
    Open { url: String, source: ffmpeg::Error },
    #[error("no video or audio streams found")]
    NoStreams,
    #[error("video decoder: {0}")]
    VideoDecoder(ffmpeg::Error),
    #[error("audio decoder: {0}")]
    AudioDecoder(ffmpeg::Error),
    #[error("subtitle decoder: {0}")]
    SubtitleDecoder(ffmpeg::Error),
    #[error("could not load logo '{path}': {reason}")]
    Logo { path: PathBuf, reason: String },
}

/// Library-global codec registration, once per process.
fn ffmpeg_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = ffmpeg::init();
        ffmpeg::format::network::init();
    });
}

/// Per-stream facts captured while the input context is still borrowable.
struct StreamProbe {
    index:      usize,
    time_base:  Rational,
    start_time: i64,
}

fn probe(ictx: &format::context::Input, kind: Type) -> Option<StreamProbe> {
    ictx.streams().best(kind).map(|s| {
        let start = s.start_time();
        StreamProbe {
            index:      s.index(),
            time_base:  s.time_base(),
            start_time: if start == ffmpeg::ffi::AV_NOPTS_VALUE { 0 } else { start },
        }
    })
}

pub struct FeedSource {
    abort:    Arc<AtomicBool>,
    settled:  Arc<AtomicBool>,
    demux:    Option<JoinHandle<()>>,
    stages:   Vec<JoinHandle<()>>,

    video_queue: Arc<PacketQueue>,
    audio_queue: Arc<PacketQueue>,
    in_video:    Option<Arc<FrameDoubleBuffer<VideoFrame>>>,
    out_video:   Option<Arc<FrameDoubleBuffer<VideoFrame>>>,
    in_audio:    Option<Arc<FrameDoubleBuffer<AudioFrame>>>,
    out_audio:   Option<Arc<FrameDoubleBuffer<AudioFrame>>>,

    front_video: VideoFrame,
    front_audio: AudioFrame,
    video_eof:   bool,
    audio_eof:   bool,

    // Seek placeholder state (pulses between two greys until settled).
    background:        u8,
    background_rising: bool,
    logo:              Option<(Raster, LogoPosition)>,

    src_dims: (u32, u32),
    fit:      WidescreenFit,
    closed:   bool,
}

impl FeedSource {
    pub fn open(url: &str, cfg: &FeedConfig) -> Result<Self, FeedError> {
        cfg.validate()?;
        ffmpeg_init();

        // Stdin alias.
        let url = if url == "-" { "pipe:" } else { url };

        let mut ictx = format::input(&url).map_err(|source| FeedError::Open {
            url: url.to_owned(),
            source,
        })?;

        let video_probe = probe(&ictx, Type::Video);
        let audio_probe = if cfg.audio { probe(&ictx, Type::Audio) } else { None };
        let subtitle_probe = if cfg.subtitles || cfg.txsubtitles {
            probe(&ictx, Type::Subtitle)
        } else {
            None
        };

        if video_probe.is_none() && audio_probe.is_none() {
            return Err(FeedError::NoStreams);
        }

        let logo = match &cfg.logo {
            Some(path) => {
                let raster = load_logo(path).map_err(|reason| FeedError::Logo {
                    path: path.clone(),
                    reason,
                })?;
                Some((raster, cfg.logo_position))
            }
            None => None,
        };

        // The reference clock base: the video stream when present, else audio.
        let reference = video_probe
            .as_ref()
            .or(audio_probe.as_ref())
            .expect("at least one stream");
        let ref_time_base = reference.time_base;
        let ref_start = reference.start_time;

        let position_secs = cfg.position_secs() as i64;
        let request_ts = if position_secs > 0 {
            ref_start + position_secs.rescale(Rational::new(1, 1), ref_time_base)
        } else {
            ref_start
        };

        if position_secs > 0 {
            let seek_to = position_secs * i64::from(ffmpeg::ffi::AV_TIME_BASE);
            if let Err(e) = ictx.seek(seek_to, ..=seek_to) {
                warn!("seek to {position_secs}s failed, starting from the top: {e}");
            }
        }

        let abort = Arc::new(AtomicBool::new(false));
        let settled = Arc::new(AtomicBool::new(false));
        let video_queue = Arc::new(PacketQueue::new());
        let audio_queue = Arc::new(PacketQueue::new());
        let started = Instant::now();

        let store = subtitle_probe
            .as_ref()
            .map(|_| Arc::new(Mutex::new(SubtitleStore::new())));

        // ── Video lane ────────────────────────────────────────────────────────
        let output_time_base = {
            let (num, den) = cfg.video_time_base();
            Rational::new(num as i32, den as i32)
        };

        let mut video_stages = None;
        let mut in_video = None;
        let mut out_video = None;
        let mut src_dims = (0u32, 0u32);
        let mut front_video = VideoFrame::empty();

        if let Some(vp) = &video_probe {
            let stream = ictx.stream(vp.index).ok_or(FeedError::NoStreams)?;
            let dctx = codec::context::Context::from_parameters(stream.parameters())
                .map_err(FeedError::VideoDecoder)?;
            let decoder = dctx.decoder().video().map_err(FeedError::VideoDecoder)?;

            let (w, h) = (decoder.width(), decoder.height());
            src_dims = (w, h);
            info!("using video stream {} ({w}x{h})", vp.index);

            let chain = filters::video_filter_chain(cfg.fit, cfg.active_lines, w, h);
            let graph_args = (chain != "null").then(|| {
                let pix: ffmpeg::ffi::AVPixelFormat = decoder.format().into();
                (
                    filters::video_buffer_args(w, h, pix as i32, vp.time_base, decoder.aspect_ratio()),
                    format!("[in]{chain}[out]"),
                )
            });

            let in_buf = Arc::new(FrameDoubleBuffer::new(VideoFrame::empty()));
            let out_buf = Arc::new(FrameDoubleBuffer::new(VideoFrame::new(
                Pixel::RGBA,
                cfg.active_width as u32,
                cfg.active_lines as u32,
            )));
            front_video = VideoFrame::new(Pixel::RGBA, cfg.active_width as u32, cfg.active_lines as u32);

            let decode = DecodeStage {
                label:      "video decode",
                decoder,
                queue:      Arc::clone(&video_queue),
                in_buf:     Arc::clone(&in_buf),
                graph_args,
                audio:      false,
                abort:      Arc::clone(&abort),
                empty:      VideoFrame::empty,
            };

            let scale = VideoScaleStage {
                in_buf:           Arc::clone(&in_buf),
                out_buf:          Arc::clone(&out_buf),
                front:            VideoFrame::empty(),
                cadence:          VideoCadence::new(request_ts.rescale(ref_time_base, output_time_base)),
                stream_time_base: vp.time_base,
                output_time_base,
                active_width:     cfg.active_width as u32,
                active_lines:     cfg.active_lines as u32,
                overlays:         OverlaySettings {
                    logo:      logo.clone(),
                    timestamp: cfg.timestamp,
                    started,
                    offset:    cfg.position_secs(),
                    subtitles: cfg.subtitles.then(|| store.clone()).flatten(),
                },
                settled: Arc::clone(&settled),
                abort:   Arc::clone(&abort),
            };

            video_stages = Some((decode, scale));
            in_video = Some(in_buf);
            out_video = Some(out_buf);
        } else {
            info!("no video stream found");
        }

        // ── Audio lane ────────────────────────────────────────────────────────
        let mut audio_stages = None;
        let mut in_audio = None;
        let mut out_audio = None;
        let mut front_audio = AudioFrame::empty();

        if let Some(ap) = &audio_probe {
            let stream = ictx.stream(ap.index).ok_or(FeedError::NoStreams)?;
            let dctx = codec::context::Context::from_parameters(stream.parameters())
                .map_err(FeedError::AudioDecoder)?;
            let decoder = dctx.decoder().audio().map_err(FeedError::AudioDecoder)?;

            let source_rate = decoder.rate() as i32;
            let channels = decoder.ch_layout().channels();
            info!("using audio stream {} ({source_rate} Hz, {channels}ch)", ap.index);

            // The audio clock counts source samples.
            let audio_time_base = Rational::new(1, source_rate.max(1));

            // Batch size: the codec's frame size rescaled to the output
            // rate, rounded up; a full second when the codec reports none.
            let codec_frame = decoder.frame_size() as i64;
            let out_frame_size = if codec_frame > 0 && source_rate > 0 {
                let num = codec_frame * AUDIO_SAMPLE_RATE as i64;
                ((num + source_rate as i64 - 1) / source_rate as i64) as usize
            } else {
                AUDIO_SAMPLE_RATE as usize
            };

            // ±20 ms in source samples.
            let allowed_error = (source_rate as i64 / 50).max(1);

            let graph_args = Some((
                filters::audio_buffer_args(audio_time_base, source_rate as u32, decoder.format(), channels),
                filters::audio_filter_spec(
                    cfg.downmix,
                    cfg.volume,
                    filters::sample_precision(decoder.format()),
                ),
            ));

            let new_out_frame = || {
                let mut f = AudioFrame::new(
                    Sample::I16(SampleType::Packed),
                    out_frame_size,
                    ChannelLayoutMask::STEREO,
                );
                f.set_rate(AUDIO_SAMPLE_RATE as u32);
                f
            };

            let in_buf = Arc::new(FrameDoubleBuffer::new(AudioFrame::empty()));
            let out_buf = Arc::new(FrameDoubleBuffer::new(new_out_frame()));
            front_audio = new_out_frame();

            let decode = DecodeStage {
                label:      "audio decode",
                decoder,
                queue:      Arc::clone(&audio_queue),
                in_buf:     Arc::clone(&in_buf),
                graph_args,
                audio:      true,
                abort:      Arc::clone(&abort),
                empty:      AudioFrame::empty,
            };

            let resample = AudioResampleStage {
                in_buf:           Arc::clone(&in_buf),
                out_buf:          Arc::clone(&out_buf),
                front:            AudioFrame::empty(),
                aligner:          AudioAligner::new(
                    request_ts.rescale(ref_time_base, audio_time_base),
                    allowed_error,
                ),
                stream_time_base: ap.time_base,
                source_rate,
                out_frame_size,
                abort:            Arc::clone(&abort),
            };

            audio_stages = Some((decode, resample));
            in_audio = Some(in_buf);
            out_audio = Some(out_buf);
        } else if cfg.audio {
            info!("no audio stream found");
        }

        // ── Subtitle lane (decoded inline by the demuxer) ─────────────────────
        let subtitle_lane = match (&subtitle_probe, &store) {
            (Some(sp), Some(store)) => {
                let stream = ictx.stream(sp.index).ok_or(FeedError::NoStreams)?;
                let dctx = codec::context::Context::from_parameters(stream.parameters())
                    .map_err(FeedError::SubtitleDecoder)?;
                let decoder = dctx.decoder().subtitle().map_err(FeedError::SubtitleDecoder)?;
                info!("using subtitle stream {}", sp.index);
                Some(SubtitleLane {
                    index:          sp.index,
                    decoder,
                    time_base:      sp.time_base,
                    store:          Arc::clone(store),
                    active_width:   cfg.active_width,
                    render_bitmaps: cfg.subtitles,
                })
            }
            _ => None,
        };

        // ── Demuxer ───────────────────────────────────────────────────────────
        let demux_stage = DemuxStage {
            ictx,
            video_index: video_probe.as_ref().map(|p| p.index),
            audio_index: audio_probe.as_ref().map(|p| p.index),
            video_queue: Arc::clone(&video_queue),
            audio_queue: Arc::clone(&audio_queue),
            subtitle:    subtitle_lane,
            abort:       Arc::clone(&abort),
        };

        // Demuxer first, then the lanes downstream of it.
        let demux = Some(thread::spawn(move || demux_stage.run()));
        let mut stages: Vec<JoinHandle<()>> = Vec::new();
        if let Some((decode, scale)) = video_stages {
            stages.push(thread::spawn(move || decode.run()));
            stages.push(thread::spawn(move || scale.run()));
        }
        if let Some((decode, resample)) = audio_stages {
            stages.push(thread::spawn(move || decode.run()));
            stages.push(thread::spawn(move || resample.run()));
        }

        Ok(Self {
            abort,
            settled,
            demux,
            stages,
            video_queue,
            audio_queue,
            in_video,
            out_video,
            in_audio,
            out_audio,
            front_video,
            front_audio,
            video_eof: false,
            audio_eof: false,
            background: 0x25,
            background_rising: true,
            logo,
            src_dims,
            fit: cfg.fit,
            closed: false,
        })
    }

    /// Pull the next scaled frame. Blocks until one is available; `None`
    /// once the video lane has ended. The returned frame (and its display
    /// aspect) stays valid until the next call.
    pub fn read_video(&mut self) -> Option<(&VideoFrame, f32)> {
        let out = self.out_video.as_ref()?;
        if self.video_eof {
            return None;
        }
        if self.abort.load(Ordering::Relaxed)
            || out.flip(&mut self.front_video) == Flip::Aborted
        {
            self.video_eof = true;
            return None;
        }

        // Until the first two frames have timed in, present a pulsing flat
        // placeholder instead of half-seeked picture content.
        if !self.settled.load(Ordering::Relaxed) {
            self.paint_placeholder();
        }

        let ratio = if self.fit == WidescreenFit::Fit && self.src_dims.1 > 0 {
            self.src_dims.0 as f32 / self.src_dims.1 as f32
        } else {
            4.0 / 3.0
        };

        Some((&self.front_video, ratio))
    }

    /// Pull the next audio batch: interleaved signed 16-bit stereo at
    /// 32 kHz. The slice holds `samples * 2` values and stays valid until
    /// the next call. `None` once the audio lane has ended.
    pub fn read_audio(&mut self) -> Option<&[i16]> {
        let out = self.out_audio.as_ref()?;
        if self.audio_eof {
            return None;
        }
        if self.abort.load(Ordering::Relaxed)
            || out.flip(&mut self.front_audio) == Flip::Aborted
        {
            self.audio_eof = true;
            return None;
        }

        let samples = self.front_audio.samples();
        let data = self.front_audio.data(0);
        let wanted = samples * 2 * std::mem::size_of::<i16>();
        let len = wanted.min(data.len()) / std::mem::size_of::<i16>();
        Some(unsafe { std::slice::from_raw_parts(data.as_ptr().cast::<i16>(), len) })
    }

    /// True once every enabled lane has reported end of stream.
    pub fn eof(&self) -> bool {
        (self.out_video.is_none() || self.video_eof)
            && (self.out_audio.is_none() || self.audio_eof)
    }

    /// Orderly shutdown. Safe to call more than once; also runs on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!("feed: closing");

        self.abort.store(true, Ordering::Relaxed);
        self.video_queue.abort();
        self.audio_queue.abort();

        if let Some(handle) = self.demux.take() {
            let _ = handle.join();
        }

        for buf in [&self.in_video, &self.out_video] {
            if let Some(b) = buf {
                b.abort();
            }
        }
        for buf in [&self.in_audio, &self.out_audio] {
            if let Some(b) = buf {
                b.abort();
            }
        }

        for handle in self.stages.drain(..) {
            let _ = handle.join();
        }
        debug!("feed: closed");
    }

    fn paint_placeholder(&mut self) {
        if self.background_rising {
            self.background += 1;
            if self.background == 0x50 {
                self.background_rising = false;
            }
        } else {
            self.background -= 1;
            if self.background == 0x25 {
                self.background_rising = true;
            }
        }

        let stride_px = self.front_video.stride(0) / 4;
        let lines = self.front_video.height() as usize;
        let width = self.front_video.width() as usize;
        let bg = self.background;
        let data = self.front_video.data_mut(0);
        data.fill(bg);

        if let Some((logo, position)) = &self.logo {
            let (x, y) = overlay::logo_origin(*position, width, lines, logo.width, logo.height);
            overlay::blit(data, stride_px, lines, logo, x, y);
        }
    }
}

impl Drop for FeedSource {
    fn drop(&mut self) {
        self.close();
    }
}
