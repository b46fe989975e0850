// crates/telefeed-core/src/config.rs
//
// Feed configuration — plain serde data, no runtime handles.
// The CLI builds one of these from flags (optionally seeded from a JSON
// preset file); telefeed-media consumes it at open time and never mutates it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::overlay::LogoPosition;

/// How a widescreen source (aspect ≥ 14:9) is fitted to the 4:3 raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidescreenFit {
    /// Pad or scale to the full target, preserving the source aspect.
    Fit,
    /// Pad top/bottom to 4:3.
    Letterbox,
    /// Crop left/right to 4:3.
    Pillarbox,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Output frame width in pixels.
    pub active_width:   usize,
    /// Output frame height in lines.
    pub active_lines:   usize,
    /// Output frame rate numerator (frames per `frame_rate_den` seconds).
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    /// Interlaced output doubles the tick rate of the video clock — the
    /// consumer receives a field-rate stream of progressive frames.
    pub interlace:      bool,
    /// Decode and resample audio. Off = video-only feed.
    pub audio:          bool,
    /// Seek offset applied at open, in minutes.
    pub position:       u64,
    pub fit:            WidescreenFit,
    /// Apply the 5.1 → stereo pan matrix before resampling.
    pub downmix:        bool,
    /// Gain multiplier applied in the audio filter.
    pub volume:         f32,
    /// RGBA PNG overlaid on every output frame.
    pub logo:           Option<PathBuf>,
    pub logo_position:  LogoPosition,
    /// Overlay a wall-clock HH:MM:SS stamp.
    pub timestamp:      bool,
    /// Render subtitles onto the output frames.
    pub subtitles:      bool,
    /// Ingest subtitle text for out-of-band carriage without rendering it.
    pub txsubtitles:    bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            active_width:   720,
            active_lines:   576,
            frame_rate_num: 25,
            frame_rate_den: 1,
            interlace:      false,
            audio:          true,
            position:       0,
            fit:            WidescreenFit::Fit,
            downmix:        false,
            volume:         1.0,
            logo:           None,
            logo_position:  LogoPosition::TopRight,
            timestamp:      false,
            subtitles:      false,
            txsubtitles:    false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("output geometry must be non-zero (got {width}x{lines})")]
    ZeroGeometry { width: usize, lines: usize },
    #[error("frame rate must be non-zero (got {num}/{den})")]
    ZeroFrameRate { num: u32, den: u32 },
    #[error("volume must be non-negative (got {0})")]
    NegativeVolume(f32),
}

impl FeedConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.active_width == 0 || self.active_lines == 0 {
            return Err(ConfigError::ZeroGeometry {
                width: self.active_width,
                lines: self.active_lines,
            });
        }
        if self.frame_rate_num == 0 || self.frame_rate_den == 0 {
            return Err(ConfigError::ZeroFrameRate {
                num: self.frame_rate_num,
                den: self.frame_rate_den,
            });
        }
        if self.volume < 0.0 {
            return Err(ConfigError::NegativeVolume(self.volume));
        }
        Ok(())
    }

    /// The output video time base as (numerator, denominator) — seconds per
    /// tick. One tick is one output frame period, halved when interlaced.
    pub fn video_time_base(&self) -> (u32, u32) {
        let den = self.frame_rate_num * if self.interlace { 2 } else { 1 };
        (self.frame_rate_den, den)
    }

    /// Seek offset in whole seconds.
    pub fn position_secs(&self) -> u64 {
        self.position * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(FeedConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_geometry_rejected() {
        let cfg = FeedConfig { active_width: 0, ..FeedConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroGeometry { .. })));
    }

    #[test]
    fn zero_frame_rate_rejected() {
        let cfg = FeedConfig { frame_rate_den: 0, ..FeedConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroFrameRate { .. })));
    }

    #[test]
    fn negative_volume_rejected() {
        let cfg = FeedConfig { volume: -0.5, ..FeedConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::NegativeVolume(_))));
    }

    #[test]
    fn interlace_doubles_tick_rate() {
        let mut cfg = FeedConfig::default();
        assert_eq!(cfg.video_time_base(), (1, 25));
        cfg.interlace = true;
        assert_eq!(cfg.video_time_base(), (1, 50));
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = FeedConfig {
            active_width: 768,
            position:     3,
            fit:          WidescreenFit::Letterbox,
            downmix:      true,
            ..FeedConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: FeedConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.active_width, 768);
        assert_eq!(back.position_secs(), 180);
        assert_eq!(back.fit, WidescreenFit::Letterbox);
        assert!(back.downmix);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let back: FeedConfig = serde_json::from_str(r#"{"audio": false}"#).unwrap();
        assert!(!back.audio);
        assert_eq!(back.active_lines, 576);
        assert_eq!(back.volume, 1.0);
    }
}
