// crates/telefeed-media/src/demux.rs
//
// Input thread: pulls packets off the source and routes them by stream
// index. Video and audio go to their byte-bounded queues (blocking here is
// the pipeline's backpressure); subtitles are decoded inline and deposited
// into the shared store; anything else is dropped.
//
// On EOF or a fatal read error both queues get their EOF marker so the
// decode stages can drain and terminate through the normal path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::subtitle::{Rect, Subtitle as DecodedSubtitle};
use ffmpeg::util::error::EAGAIN;
use ffmpeg::{decoder, format, Packet, Rational, Rescale};
use tracing::{debug, warn};

use telefeed_core::subtitle::{ass_dialogue_text, composite_rects, SubtitleRect, SubtitleStore};

use crate::queue::PacketQueue;

/// Subtitle timestamps are stored in milliseconds; both the demuxer and the
/// scaler rescale into this base.
pub(crate) fn subtitle_time_base() -> Rational {
    Rational::new(1, 1000)
}

pub(crate) struct SubtitleLane {
    pub index:          usize,
    pub decoder:        decoder::subtitle::Subtitle,
    pub time_base:      Rational,
    pub store:          Arc<Mutex<SubtitleStore>>,
    pub active_width:   usize,
    /// Composite bitmap subtitles (on-screen rendering requested).
    pub render_bitmaps: bool,
}

pub(crate) struct DemuxStage {
    pub ictx:        format::context::Input,
    pub video_index: Option<usize>,
    pub audio_index: Option<usize>,
    pub video_queue: Arc<PacketQueue>,
    pub audio_queue: Arc<PacketQueue>,
    pub subtitle:    Option<SubtitleLane>,
    pub abort:       Arc<AtomicBool>,
}

impl DemuxStage {
    pub fn run(self) {
        let DemuxStage {
            mut ictx,
            video_index,
            audio_index,
            video_queue,
            audio_queue,
            mut subtitle,
            abort,
        } = self;

        debug!("demux: starting");

        let mut packets = ictx.packets();
        while !abort.load(Ordering::Relaxed) {
            match packets.next() {
                Some(Ok((stream, packet))) => {
                    let index = stream.index();
                    if Some(index) == video_index {
                        if video_queue.push(packet).is_err() {
                            break;
                        }
                    } else if Some(index) == audio_index {
                        if audio_queue.push(packet).is_err() {
                            break;
                        }
                    } else if let Some(lane) = subtitle.as_mut() {
                        if index == lane.index {
                            lane.ingest(&packet);
                        }
                    }
                }
                Some(Err(ffmpeg::Error::Other { errno: EAGAIN })) => {
                    thread::sleep(Duration::from_millis(10));
                }
                Some(Err(ffmpeg::Error::Eof)) | None => break,
                Some(Err(e)) => {
                    warn!("demux: read failed: {e}");
                    break;
                }
            }
        }

        video_queue.push_eof();
        audio_queue.push_eof();
        debug!("demux: ending");
    }
}

impl SubtitleLane {
    /// Decode one subtitle packet and store whatever it produced. Decode
    /// failures are logged and the packet dropped; the pipeline carries on.
    fn ingest(&mut self, packet: &Packet) {
        let mut sub = DecodedSubtitle::new();
        match self.decoder.decode(packet, &mut sub) {
            Ok(true) => self.store_subtitle(packet, &sub),
            Ok(false) => {}
            Err(e) => debug!("subtitle decode failed: {e}"),
        }
    }

    fn store_subtitle(&mut self, packet: &Packet, sub: &DecodedSubtitle) {
        let pts_ms = packet
            .pts()
            .unwrap_or(0)
            .rescale(self.time_base, subtitle_time_base());
        // Display times are already milliseconds, relative to the packet.
        let start = pts_ms + sub.start() as i64;
        let mut end = pts_ms + sub.end() as i64;
        if end <= start {
            end = start + 1;
        }

        let mut texts: Vec<String> = Vec::new();
        for rect in sub.rects() {
            match rect {
                Rect::Text(t) => texts.push(t.get().to_owned()),
                Rect::Ass(a) => texts.push(ass_dialogue_text(a.get())),
                _ => {}
            }
        }

        let bitmaps = if self.render_bitmaps {
            unsafe { bitmap_rects(sub) }
        } else {
            Vec::new()
        };

        let mut store = self.store.lock().unwrap();
        if !texts.is_empty() {
            store.push_text(start, end, texts.join(" "));
        }
        if !bitmaps.is_empty() {
            let raster = composite_rects(&bitmaps, self.active_width);
            if raster.width > 0 {
                store.push_bitmap(start, end, raster);
            }
        }
        // Keep a minute of history at most.
        store.purge_before(start - 60_000);
    }
}

/// Copy the palettised pixel payloads out of a decoded subtitle's bitmap
/// rects. The safe wrapper exposes rect geometry but not the pixel planes,
/// so this walks the raw structure.
unsafe fn bitmap_rects(sub: &DecodedSubtitle) -> Vec<SubtitleRect> {
    let raw = &*sub.as_ptr();
    let mut rects = Vec::new();

    for i in 0..raw.num_rects as usize {
        let rect = &**raw.rects.add(i);
        if rect.w <= 0 || rect.h <= 0 || rect.data[0].is_null() || rect.data[1].is_null() {
            continue;
        }

        let (w, h) = (rect.w as usize, rect.h as usize);
        let stride = rect.linesize[0] as usize;

        let mut indices = vec![0u8; w * h];
        for y in 0..h {
            let row = std::slice::from_raw_parts(rect.data[0].add(y * stride), w);
            indices[y * w..(y + 1) * w].copy_from_slice(row);
        }

        let colors = (rect.nb_colors.max(0) as usize).min(256);
        let palette_bytes = std::slice::from_raw_parts(rect.data[1], colors * 4);
        let palette: Vec<[u8; 4]> = palette_bytes
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();

        rects.push(SubtitleRect { w, h, indices, palette });
    }

    rects
}
