// crates/telefeed-media/src/filters.rs
//
// Filtergraph construction for the two decode stages.
//
// Video: widescreen sources (aspect ≥ 14:9) are padded or cropped back to
// the 4:3 raster according to the configured fit policy; narrower sources
// pass through untouched.
//
// Audio: an optional 5.1 → stereo pan matrix followed by a volume scaler.
// Both graphs are described as textual filter chains and parsed in one go,
// which keeps the option-to-filter mapping in a single printable place.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::Sample;
use ffmpeg::{filter, Rational};

use telefeed_core::WidescreenFit;

/// A source is treated as widescreen once it is at least this wide.
const WIDESCREEN_RATIO: f32 = 14.0 / 9.0;

pub(crate) fn is_widescreen(src_w: u32, src_h: u32) -> bool {
    src_h > 0 && src_w as f32 / src_h as f32 >= WIDESCREEN_RATIO
}

/// The filter chain (without `[in]`/`[out]` labels) that fits a source of
/// `src_w` x `src_h` onto the 4:3 output raster.
pub(crate) fn video_filter_chain(
    fit: WidescreenFit,
    active_lines: usize,
    src_w: u32,
    src_h: u32,
) -> String {
    if !is_widescreen(src_w, src_h) {
        return "null".into();
    }

    let width_43 = (active_lines as f32 * (4.0 / 3.0)) as u32;
    let width_169 = (active_lines as f32 * (16.0 / 9.0)) as u32;
    let source_ratio = src_w as f32 / src_h as f32;

    match fit {
        WidescreenFit::Letterbox => format!(
            "pad = 'iw:iw / ({width_43} / {active_lines}) : 0 : (oh - ih) / 2', scale = {src_w}:{src_h}"
        ),
        WidescreenFit::Pillarbox => format!(
            "crop = out_w = in_h * (4.0 / 3.0) : out_h = in_h, scale = {src_w}:{src_h}"
        ),
        WidescreenFit::Fit => {
            if width_169 as f32 / active_lines as f32 <= source_ratio {
                format!(
                    "pad = 'iw:iw / ({width_169} / {active_lines}) : 0 : (oh - ih) / 2', scale = {src_w}:{src_h}"
                )
            } else {
                format!(
                    "pad = 'ih * ({width_169} / {active_lines}) : ih : (ow - iw) / 2 : 0', scale = {src_w}:{src_h}"
                )
            }
        }
    }
}

/// The complete audio chain: pan (or passthrough) into a volume scaler.
pub(crate) fn audio_filter_spec(downmix: bool, volume: f32, precision: &str) -> String {
    let pan = if downmix {
        "pan=stereo|FL < FC + 0.30*FL + 0.30*BL|FR < FC + 0.30*FR + 0.30*BR"
    } else {
        "anull"
    };
    format!("[in]{pan}[downmix],[downmix]volume={volume:.6}:precision={precision}[out]")
}

/// The volume filter's working precision for a given sample format.
pub(crate) fn sample_precision(fmt: Sample) -> &'static str {
    match fmt {
        Sample::F32(_) => "float",
        Sample::F64(_) => "double",
        _ => "fixed",
    }
}

/// libavutil's name for a sample format, as used in `abuffer` arguments.
pub(crate) fn sample_fmt_name(fmt: Sample) -> &'static str {
    match fmt {
        Sample::U8(SampleType::Packed) => "u8",
        Sample::U8(SampleType::Planar) => "u8p",
        Sample::I16(SampleType::Packed) => "s16",
        Sample::I16(SampleType::Planar) => "s16p",
        Sample::I32(SampleType::Packed) => "s32",
        Sample::I32(SampleType::Planar) => "s32p",
        Sample::I64(SampleType::Packed) => "s64",
        Sample::I64(SampleType::Planar) => "s64p",
        Sample::F32(SampleType::Packed) => "flt",
        Sample::F32(SampleType::Planar) => "fltp",
        Sample::F64(SampleType::Packed) => "dbl",
        Sample::F64(SampleType::Planar) => "dblp",
        Sample::None => "none",
    }
}

/// Channel layout spec accepted by `abuffer`: well-known names where they
/// exist, a bare channel count otherwise.
pub(crate) fn channel_layout_name(channels: u32) -> String {
    match channels {
        1 => "mono".into(),
        2 => "stereo".into(),
        n => format!("{n}c"),
    }
}

/// `buffer` source arguments for a video stream.
pub(crate) fn video_buffer_args(
    w: u32,
    h: u32,
    pix_fmt: i32,
    time_base: Rational,
    sar: Rational,
) -> String {
    let (sar_n, sar_d) = if sar.denominator() > 0 {
        (sar.numerator(), sar.denominator())
    } else {
        (0, 1)
    };
    format!(
        "video_size={w}x{h}:pix_fmt={pix_fmt}:time_base={}/{}:pixel_aspect={sar_n}/{sar_d}",
        time_base.numerator(),
        time_base.denominator(),
    )
}

/// `abuffer` source arguments for an audio stream.
pub(crate) fn audio_buffer_args(
    time_base: Rational,
    sample_rate: u32,
    fmt: Sample,
    channels: u32,
) -> String {
    format!(
        "time_base={}/{}:sample_rate={sample_rate}:sample_fmt={}:channel_layout={}",
        time_base.numerator(),
        time_base.denominator(),
        sample_fmt_name(fmt),
        channel_layout_name(channels),
    )
}

/// Build and validate a `[in] … [out]` graph around a `buffer`/`buffersink`
/// pair (video) or `abuffer`/`abuffersink` pair (audio).
pub(crate) fn build_graph(
    audio: bool,
    src_args: &str,
    spec: &str,
) -> Result<filter::Graph, ffmpeg::Error> {
    let (src_name, sink_name) = if audio {
        ("abuffer", "abuffersink")
    } else {
        ("buffer", "buffersink")
    };

    let mut graph = filter::Graph::new();
    graph.add(
        &filter::find(src_name).ok_or(ffmpeg::Error::FilterNotFound)?,
        "in",
        src_args,
    )?;
    graph.add(
        &filter::find(sink_name).ok_or(ffmpeg::Error::FilterNotFound)?,
        "out",
        "",
    )?;
    graph.output("in", 0)?.input("out", 0)?.parse(spec)?;
    graph.validate()?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_source_passes_through() {
        assert_eq!(video_filter_chain(WidescreenFit::Fit, 576, 720, 576), "null");
        assert_eq!(video_filter_chain(WidescreenFit::Letterbox, 576, 704, 576), "null");
    }

    #[test]
    fn widescreen_detection_threshold() {
        assert!(!is_widescreen(4, 3));
        assert!(is_widescreen(14, 9));
        assert!(is_widescreen(16, 9));
        assert!(!is_widescreen(16, 0));
    }

    #[test]
    fn letterbox_pads_to_four_thirds() {
        let chain = video_filter_chain(WidescreenFit::Letterbox, 576, 1920, 1080);
        assert!(chain.starts_with("pad = "), "{chain}");
        assert!(chain.contains("768 / 576"), "{chain}");
        assert!(chain.ends_with("scale = 1920:1080"), "{chain}");
    }

    #[test]
    fn pillarbox_crops_to_four_thirds() {
        let chain = video_filter_chain(WidescreenFit::Pillarbox, 576, 1920, 1080);
        assert!(chain.starts_with("crop = "), "{chain}");
        assert!(chain.contains("in_h * (4.0 / 3.0)"), "{chain}");
    }

    #[test]
    fn fit_pads_vertically_for_wider_than_sixteen_nine() {
        // 21:9 source is wider than the 16:9 window: pad top/bottom.
        let chain = video_filter_chain(WidescreenFit::Fit, 576, 2520, 1080);
        assert!(chain.contains("iw / (1024 / 576)"), "{chain}");
    }

    #[test]
    fn fit_pads_horizontally_for_fourteen_nine() {
        // 14:9 source is narrower than 16:9: pad left/right.
        let chain = video_filter_chain(WidescreenFit::Fit, 576, 1400, 900);
        assert!(chain.contains("ih * (1024 / 576)"), "{chain}");
    }

    #[test]
    fn audio_passthrough_keeps_anull() {
        let spec = audio_filter_spec(false, 1.0, "float");
        assert_eq!(
            spec,
            "[in]anull[downmix],[downmix]volume=1.000000:precision=float[out]"
        );
    }

    #[test]
    fn audio_downmix_uses_pan_matrix() {
        let spec = audio_filter_spec(true, 0.5, "fixed");
        assert!(spec.contains("pan=stereo|FL < FC + 0.30*FL + 0.30*BL"), "{spec}");
        assert!(spec.contains("volume=0.500000:precision=fixed"), "{spec}");
    }

    #[test]
    fn precision_tracks_sample_format() {
        assert_eq!(sample_precision(Sample::F32(SampleType::Packed)), "float");
        assert_eq!(sample_precision(Sample::F64(SampleType::Planar)), "double");
        assert_eq!(sample_precision(Sample::I16(SampleType::Packed)), "fixed");
    }

    #[test]
    fn buffer_args_are_printable() {
        let args = video_buffer_args(1920, 1080, 0, Rational::new(1, 25), Rational::new(0, 0));
        assert_eq!(
            args,
            "video_size=1920x1080:pix_fmt=0:time_base=1/25:pixel_aspect=0/1"
        );

        let aargs = audio_buffer_args(
            Rational::new(1, 48000),
            48000,
            Sample::F32(SampleType::Planar),
            6,
        );
        assert_eq!(
            aargs,
            "time_base=1/48000:sample_rate=48000:sample_fmt=fltp:channel_layout=6c"
        );
    }

    #[test]
    fn layout_names() {
        assert_eq!(channel_layout_name(1), "mono");
        assert_eq!(channel_layout_name(2), "stereo");
        assert_eq!(channel_layout_name(6), "6c");
    }
}
