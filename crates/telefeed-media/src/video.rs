// crates/telefeed-media/src/video.rs
//
// Video scale stage: pulls decoded frames, arbitrates them against the
// output frame clock (drop past frames, pad the future with repeats),
// scales into the preallocated RGBA output slot, records the reduced pixel
// aspect, and composites the configured overlays.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::{Rational, Rescale};
use tracing::{debug, warn};

use telefeed_core::clock::{FrameTiming, VideoCadence};
use telefeed_core::overlay::{self, LogoPosition, Raster};
use telefeed_core::subtitle::{SubtitleContent, SubtitleStore};

use crate::dbuffer::{Flip, FrameDoubleBuffer};
use crate::demux::subtitle_time_base;

/// Everything the scale stage composites on top of the picture.
pub(crate) struct OverlaySettings {
    pub logo:      Option<(Raster, LogoPosition)>,
    pub timestamp: bool,
    /// Wall-clock reference for the timestamp stamp.
    pub started:   Instant,
    /// Seek offset in seconds, added to the elapsed time.
    pub offset:    u64,
    pub subtitles: Option<Arc<Mutex<SubtitleStore>>>,
}

pub(crate) struct VideoScaleStage {
    pub in_buf:           Arc<FrameDoubleBuffer<VideoFrame>>,
    pub out_buf:          Arc<FrameDoubleBuffer<VideoFrame>>,
    /// Consumer-side front frame for `in_buf`.
    pub front:            VideoFrame,
    pub cadence:          VideoCadence,
    pub stream_time_base: Rational,
    pub output_time_base: Rational,
    pub active_width:     u32,
    pub active_lines:     u32,
    pub overlays:         OverlaySettings,
    /// Latched once the first two frames have been timed successfully.
    pub settled:          Arc<AtomicBool>,
    pub abort:            Arc<AtomicBool>,
}

impl VideoScaleStage {
    pub fn run(mut self) {
        debug!("video scale: starting");

        // The scaler is keyed on the incoming frame's properties: the
        // filtergraph may hand us padded/cropped geometry that differs from
        // the codec's, and some sources switch mid-stream.
        let mut scaler: Option<(SwsContext, (Pixel, u32, u32))> = None;
        let mut aligned = 0u8;

        'stage: loop {
            if self.abort.load(Ordering::Relaxed) {
                break;
            }
            if self.in_buf.flip(&mut self.front) == Flip::Aborted {
                break;
            }

            if let Some(ts) = self.front.timestamp() {
                let pts = ts.rescale(self.stream_time_base, self.output_time_base);
                match self.cadence.classify(pts) {
                    FrameTiming::Past => continue,
                    FrameTiming::Ahead(n) => {
                        for _ in 0..n {
                            if self.out_buf.repeat().is_err() {
                                break 'stage;
                            }
                            self.cadence.advance();
                        }
                    }
                    FrameTiming::Due => {}
                }
            }

            if aligned < 2 {
                aligned += 1;
                if aligned == 2 {
                    self.settled.store(true, Ordering::Relaxed);
                }
            }

            let Some(mut out) = self.out_buf.back_buffer() else {
                break;
            };

            let key = (self.front.format(), self.front.width(), self.front.height());
            if scaler.as_ref().map(|(_, k)| *k) != Some(key) {
                match SwsContext::get(
                    key.0,
                    key.1,
                    key.2,
                    Pixel::RGBA,
                    self.active_width,
                    self.active_lines,
                    Flags::BICUBIC,
                ) {
                    Ok(ctx) => scaler = Some((ctx, key)),
                    Err(e) => {
                        warn!("video scale: no converter for {key:?}: {e}");
                        self.out_buf.restore(out);
                        break;
                    }
                }
            }

            let (ctx, _) = scaler.as_mut().expect("scaler was just built");
            if let Err(e) = ctx.run(&self.front, &mut out) {
                warn!("video scale: conversion failed: {e}");
                self.out_buf.restore(out);
                break;
            }

            self.set_output_aspect(&mut out);
            self.draw_overlays(&mut out);

            if self.out_buf.publish(out).is_err() {
                break;
            }
            self.cadence.advance();
        }

        self.out_buf.abort();
        debug!("video scale: ending");
    }

    /// Record the display aspect of the scaled frame: the source pixel
    /// aspect corrected for the geometry change, reduced to lowest terms.
    fn set_output_aspect(&self, out: &mut VideoFrame) {
        let src_sar = unsafe { (*self.front.as_ptr()).sample_aspect_ratio };
        let (num, den) = reduced_sar(
            self.front.width(),
            self.front.height(),
            src_sar.num,
            src_sar.den,
            self.active_width,
            self.active_lines,
        );
        unsafe {
            (*out.as_mut_ptr()).sample_aspect_ratio = ffmpeg::ffi::AVRational { num, den };
        }
    }

    fn draw_overlays(&self, out: &mut VideoFrame) {
        let stride_px = out.stride(0) / 4;
        let lines = self.active_lines as usize;
        let width = self.active_width as usize;
        let frame_ts = self.front.timestamp();
        let data = out.data_mut(0);

        if let Some((logo, position)) = &self.overlays.logo {
            let (x, y) = overlay::logo_origin(*position, width, lines, logo.width, logo.height);
            overlay::blit(data, stride_px, lines, logo, x, y);
        }

        if self.overlays.timestamp {
            let secs = self.overlays.started.elapsed().as_secs() + self.overlays.offset;
            overlay::draw_clock(data, stride_px, lines, secs);
        }

        if let (Some(store), Some(ts)) = (&self.overlays.subtitles, frame_ts) {
            let ms = ts.rescale(self.stream_time_base, subtitle_time_base());
            let store = store.lock().unwrap();
            if let Some(entry) = store.active_at(ms) {
                if let SubtitleContent::Bitmap(raster) = &entry.content {
                    let x = (width as isize - raster.width as isize) / 2;
                    let y = (lines as isize - raster.height as isize - 32).max(0);
                    overlay::blit(data, stride_px, lines, raster, x, y);
                }
            }
        }
    }
}

/// `(src_w * sar_num * dst_h) / (src_h * sar_den * dst_w)` in lowest terms,
/// defaulting the source pixel aspect to square when degenerate.
pub(crate) fn reduced_sar(
    src_w: u32,
    src_h: u32,
    sar_num: i32,
    sar_den: i32,
    dst_w: u32,
    dst_h: u32,
) -> (i32, i32) {
    let (sar_num, sar_den) = if sar_num <= 0 || sar_den <= 0 {
        (1, 1)
    } else {
        (sar_num, sar_den)
    };

    let num = src_w as i64 * sar_num as i64 * dst_h as i64;
    let den = src_h as i64 * sar_den as i64 * dst_w as i64;
    if num == 0 || den == 0 {
        return (1, 1);
    }
    let g = gcd(num, den);
    ((num / g) as i32, (den / g) as i32)
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_pixels_at_matching_geometry() {
        assert_eq!(reduced_sar(720, 576, 1, 1, 720, 576), (1, 1));
    }

    #[test]
    fn degenerate_source_sar_defaults_to_square() {
        assert_eq!(reduced_sar(720, 576, 0, 0, 720, 576), (1, 1));
        assert_eq!(reduced_sar(720, 576, -4, 3, 720, 576), (1, 1));
    }

    #[test]
    fn downscale_adjusts_pixel_aspect() {
        // 1920x1080 square pixels onto a 720x576 raster.
        let (num, den) = reduced_sar(1920, 1080, 1, 1, 720, 576);
        // 1920*576 / (1080*720) = 1105920 / 777600 = 32/22.5 → 64/45.
        assert_eq!((num, den), (64, 45));
    }

    #[test]
    fn reduction_is_in_lowest_terms() {
        let (num, den) = reduced_sar(704, 576, 12, 11, 704, 576);
        assert_eq!((num, den), (12, 11));
    }
}
