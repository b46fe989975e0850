// crates/telefeed-core/src/clock.rs
//
// Per-stream reference clocks.
//
// The pipeline's stages each carry an integer cursor in their output time
// base: one tick per output frame period for video, one tick per output
// sample for audio. Decoded material arrives at whatever rate the source
// runs at; these two small state machines decide, per frame, how to repair
// the difference — drop, repeat, trim or pad — so the downstream consumer
// can pull at a fixed cadence without ever seeing a timestamp.
//
// The arbitration is deliberately free of FFmpeg types: the caller rescales
// source PTS values into the output base first, then asks for a verdict.

/// Fixed output audio sample rate for the whole feed.
pub const AUDIO_SAMPLE_RATE: i32 = 32_000;

// ── Video cadence ─────────────────────────────────────────────────────────────

/// Verdict for one decoded video frame against the output cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameTiming {
    /// Frame is in the past — discard it without advancing the clock.
    Past,
    /// Frame lands exactly on the cursor — emit it.
    Due,
    /// Frame is `n` ticks in the future — present the previous frame `n`
    /// more times, then emit this one.
    Ahead(u32),
}

/// Output-frame cursor for the video stream.
///
/// `position()` is the PTS (in output ticks) of the next frame expected to
/// be emitted. Every emission — fresh or repeat — advances it by exactly one.
#[derive(Clone, Copy, Debug)]
pub struct VideoCadence {
    next: i64,
}

impl VideoCadence {
    pub fn new(start_pts: i64) -> Self {
        Self { next: start_pts }
    }

    pub fn position(&self) -> i64 {
        self.next
    }

    /// Classify a frame whose PTS has already been rescaled to output ticks.
    pub fn classify(&self, pts: i64) -> FrameTiming {
        let delta = pts - self.next;
        if delta < 0 {
            FrameTiming::Past
        } else if delta == 0 {
            FrameTiming::Due
        } else {
            FrameTiming::Ahead(delta as u32)
        }
    }

    /// Advance by one emitted frame (fresh or repeated).
    pub fn advance(&mut self) {
        self.next += 1;
    }
}

// ── Audio alignment ───────────────────────────────────────────────────────────

/// Verdict for one decoded audio frame against the output cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioAdjust {
    /// Every sample of the frame is in the past — discard it.
    Drop,
    /// The head of the frame is in the past — skip this many samples.
    Trim(usize),
    /// The frame starts in the future — insert this many samples of
    /// silence before it (and advance the clock by the same amount).
    Pad(i64),
    /// Within the tolerance window — pass through unmodified.
    Pass,
}

/// Output-sample cursor for the audio stream.
#[derive(Clone, Copy, Debug)]
pub struct AudioAligner {
    next:          i64,
    allowed_error: i64,
}

impl AudioAligner {
    /// `allowed_error` is the tolerance in source samples (±) inside which a
    /// misaligned frame is passed through rather than trimmed or padded.
    pub fn new(start_pts: i64, allowed_error: i64) -> Self {
        Self { next: start_pts, allowed_error }
    }

    pub fn position(&self) -> i64 {
        self.next
    }

    /// Classify a frame of `nb_samples` samples whose PTS has already been
    /// rescaled to the output sample base.
    pub fn classify(&self, pts: i64, nb_samples: i64) -> AudioAdjust {
        let rel = pts - self.next;
        if rel + nb_samples <= 0 {
            AudioAdjust::Drop
        } else if rel < -self.allowed_error {
            AudioAdjust::Trim((-rel) as usize)
        } else if rel > self.allowed_error {
            AudioAdjust::Pad(rel)
        } else {
            AudioAdjust::Pass
        }
    }

    /// Advance by a number of consumed input samples (or injected silence).
    pub fn advance(&mut self, samples: i64) {
        self.next += samples;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Video ────────────────────────────────────────────────────────────────

    #[test]
    fn frame_on_cursor_is_due() {
        let clock = VideoCadence::new(0);
        assert_eq!(clock.classify(0), FrameTiming::Due);
    }

    #[test]
    fn frame_behind_cursor_is_past() {
        let clock = VideoCadence::new(0);
        assert_eq!(clock.classify(-1), FrameTiming::Past);
    }

    #[test]
    fn frame_ahead_counts_repeats() {
        let clock = VideoCadence::new(0);
        assert_eq!(clock.classify(1), FrameTiming::Ahead(1));
        assert_eq!(clock.classify(7), FrameTiming::Ahead(7));
    }

    #[test]
    fn matched_rate_emits_every_frame_once() {
        // 250 source frames at the output rate: no drops, no repeats, the
        // cursor lands exactly 250 ticks on.
        let mut clock = VideoCadence::new(0);
        let mut emitted = 0;
        let mut repeats = 0;
        for pts in 0..250 {
            match clock.classify(pts) {
                FrameTiming::Due => {
                    clock.advance();
                    emitted += 1;
                }
                FrameTiming::Ahead(n) => {
                    for _ in 0..n {
                        clock.advance();
                        repeats += 1;
                    }
                    clock.advance();
                    emitted += 1;
                }
                FrameTiming::Past => panic!("no frame should be dropped"),
            }
        }
        assert_eq!(emitted, 250);
        assert_eq!(repeats, 0);
        assert_eq!(clock.position(), 250);
    }

    #[test]
    fn half_rate_source_alternates_repeats() {
        // One source frame every two output periods: 100 source frames
        // become 200 emissions, half of them repeats, order preserved.
        let mut clock = VideoCadence::new(0);
        let mut emitted = 0;
        let mut repeats = 0;
        for i in 0..100 {
            let pts = i * 2 + 1;
            match clock.classify(pts) {
                FrameTiming::Due => {
                    clock.advance();
                    emitted += 1;
                }
                FrameTiming::Ahead(n) => {
                    for _ in 0..n {
                        clock.advance();
                        repeats += 1;
                    }
                    clock.advance();
                    emitted += 1;
                }
                FrameTiming::Past => panic!("no frame should be dropped"),
            }
        }
        assert_eq!(emitted, 100);
        assert_eq!(repeats, 100);
        assert_eq!(clock.position(), 200);
    }

    #[test]
    fn late_then_aligned_source_drops_only_the_late_frame() {
        let mut clock = VideoCadence::new(0);
        assert_eq!(clock.classify(-1), FrameTiming::Past);
        // The drop does not move the cursor; the next frame is still due.
        assert_eq!(clock.classify(0), FrameTiming::Due);
        clock.advance();
        assert_eq!(clock.position(), 1);
    }

    // ── Audio ────────────────────────────────────────────────────────────────

    #[test]
    fn audio_fully_past_is_dropped() {
        let clock = AudioAligner::new(0, 640);
        assert_eq!(clock.classify(-2048, 1024), AudioAdjust::Drop);
        // Frame ending exactly on the cursor is still entirely in the past.
        assert_eq!(clock.classify(-1024, 1024), AudioAdjust::Drop);
    }

    #[test]
    fn audio_head_in_past_is_trimmed_by_exact_overlap() {
        let clock = AudioAligner::new(0, 640);
        assert_eq!(clock.classify(-700, 2048), AudioAdjust::Trim(700));
    }

    #[test]
    fn audio_within_tolerance_passes() {
        let clock = AudioAligner::new(0, 640);
        assert_eq!(clock.classify(-640, 1024), AudioAdjust::Pass);
        assert_eq!(clock.classify(0, 1024), AudioAdjust::Pass);
        assert_eq!(clock.classify(640, 1024), AudioAdjust::Pass);
    }

    #[test]
    fn audio_ahead_pads_silence_of_exact_gap() {
        // 50 ms ahead at 32 kHz: exactly 1600 samples of silence first.
        let mut clock = AudioAligner::new(0, 640);
        assert_eq!(clock.classify(1600, 1024), AudioAdjust::Pad(1600));
        clock.advance(1600);
        assert_eq!(clock.classify(1600, 1024), AudioAdjust::Pass);
    }

    #[test]
    fn audio_cursor_tracks_consumed_samples() {
        let mut clock = AudioAligner::new(0, 640);
        clock.advance(1024);
        clock.advance(1024);
        assert_eq!(clock.position(), 2048);
        assert_eq!(clock.classify(2048, 1024), AudioAdjust::Pass);
    }
}
