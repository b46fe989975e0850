// crates/telefeed-media/src/audio.rs
//
// Audio resample stage: aligns each decoded frame against the sample clock
// (drop / head-trim / silence-pad inside a ±20 ms window), then drives the
// resampler until it runs dry, publishing fixed-format batches — 32 kHz,
// interleaved signed 16-bit stereo — of at most `out_frame_size` samples.
//
// The convert loop calls swresample directly: the safe wrapper has no
// silence injection and no way to hand over plane pointers offset by a head
// trim, both of which this stage is built on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::software::resampling;
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::format::sample::{Sample, Type as SampleType};
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::{Rational, Rescale};
use tracing::{debug, warn};

use telefeed_core::clock::{AudioAdjust, AudioAligner, AUDIO_SAMPLE_RATE};

use crate::dbuffer::{Flip, FrameDoubleBuffer};

pub(crate) struct AudioResampleStage {
    pub in_buf:           Arc<FrameDoubleBuffer<AudioFrame>>,
    pub out_buf:          Arc<FrameDoubleBuffer<AudioFrame>>,
    /// Consumer-side front frame for `in_buf`.
    pub front:            AudioFrame,
    pub aligner:          AudioAligner,
    pub stream_time_base: Rational,
    /// Source sample rate; the alignment clock counts source samples.
    pub source_rate:      i32,
    /// Samples per published output batch.
    pub out_frame_size:   usize,
    pub abort:            Arc<AtomicBool>,
}

impl AudioResampleStage {
    pub fn run(mut self) {
        debug!("audio resample: starting");

        // Keyed on the incoming frame's properties — the pan filter changes
        // the layout under downmix, and some codecs re-negotiate mid-stream.
        let mut resampler: Option<(resampling::Context, (Sample, u32, u32))> = None;

        'stage: loop {
            if self.abort.load(Ordering::Relaxed) {
                break;
            }
            if self.in_buf.flip(&mut self.front) == Flip::Aborted {
                break;
            }
            let samples = self.front.samples();
            if samples == 0 {
                continue;
            }

            let key = (
                self.front.format(),
                self.front.ch_layout().channels(),
                self.front.rate(),
            );
            if resampler.as_ref().map(|(_, k)| *k) != Some(key) {
                let src_layout = if key.1 >= 2 {
                    self.front.ch_layout()
                } else {
                    ChannelLayout::MONO
                };
                match resampling::Context::get2(
                    key.0,
                    src_layout,
                    key.2,
                    Sample::I16(SampleType::Packed),
                    ChannelLayout::STEREO,
                    AUDIO_SAMPLE_RATE as u32,
                ) {
                    Ok(ctx) => resampler = Some((ctx, key)),
                    Err(e) => {
                        warn!("audio resample: no converter for {key:?}: {e}");
                        break;
                    }
                }
            }
            let (swr, _) = resampler.as_mut().expect("resampler was just built");

            // Alignment against the sample clock, in source samples.
            let mut skip = 0usize;
            if let Some(ts) = self.front.timestamp() {
                let pts = ts.rescale(self.stream_time_base, Rational::new(1, self.source_rate));
                match self.aligner.classify(pts, samples as i64) {
                    AudioAdjust::Drop => continue,
                    AudioAdjust::Trim(n) => skip = n.min(samples),
                    AudioAdjust::Pad(n) => {
                        let r = unsafe {
                            ffmpeg::ffi::swr_inject_silence(swr.as_mut_ptr(), n as _)
                        };
                        if r < 0 {
                            warn!("audio resample: silence injection failed ({r})");
                        }
                        self.aligner.advance(n);
                    }
                    AudioAdjust::Pass => {}
                }
            }

            let in_ptrs = offset_planes(&self.front, skip);
            let mut remaining = samples - skip;

            loop {
                let Some(mut out) = self.out_buf.back_buffer() else {
                    break 'stage;
                };

                let converted = unsafe {
                    let out_planes = (*out.as_mut_ptr()).data.as_mut_ptr();
                    let in_arg: *const *const u8 = if remaining > 0 {
                        in_ptrs.as_ptr()
                    } else {
                        std::ptr::null()
                    };
                    ffmpeg::ffi::swr_convert(
                        swr.as_mut_ptr(),
                        out_planes as _,
                        self.out_frame_size as _,
                        in_arg as _,
                        remaining as _,
                    )
                };

                if converted < 0 {
                    warn!("audio resample: conversion failed ({converted})");
                    self.out_buf.restore(out);
                    break 'stage;
                }
                if converted == 0 {
                    self.out_buf.restore(out);
                    break;
                }

                unsafe {
                    (*out.as_mut_ptr()).nb_samples = converted;
                }
                if self.out_buf.publish(out).is_err() {
                    break 'stage;
                }

                self.aligner.advance(remaining as i64);
                remaining = 0;
            }
        }

        self.out_buf.abort();
        debug!("audio resample: ending");
    }
}

/// Plane pointers into `frame`, advanced past `skip` samples — per plane
/// when planar, across the interleaved block otherwise.
fn offset_planes(frame: &AudioFrame, skip: usize) -> [*const u8; 8] {
    let format = frame.format();
    let planar = format.is_planar();
    let channels = frame.ch_layout().channels() as usize;
    let block_align = format.bytes() * if planar { 1 } else { channels.max(1) };
    let planes = if planar { channels.min(8) } else { 1 };

    let mut ptrs = [std::ptr::null::<u8>(); 8];
    for (i, ptr) in ptrs.iter_mut().enumerate().take(planes) {
        *ptr = unsafe { frame.data(i).as_ptr().add(skip * block_align) };
    }
    ptrs
}
