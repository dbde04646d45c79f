use crate::media::LutFile;
use crate::plan::EncodePlan;
use crate::settings::{Codec, CompressionSettings, LUT_ONLY_QUALITY, SpeedPreset};

use super::path_to_string;

/// `lut3d` filter for a LUT file.
///
/// The value is quoted for the graph parser and `:` is escaped for the option parser. A quote
/// cannot appear inside quotes, so it closes the quoted run and is escaped for both levels.
pub fn lut_filter(lut: &LutFile) -> String {
    let escaped = path_to_string(lut.path())
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', r"'\\\''");
    format!("lut3d=file='{}'", escaped)
}

fn push_pair(args: &mut Vec<String>, flag: &str, value: impl Into<String>) {
    args.push(flag.to_string());
    args.push(value.into());
}

/// Encoder parameters for one file, without input/output framing.
///
/// LUT-only mode (with a LUT present) bakes in the grade at a fixed quality on the fastest
/// preset and ignores `plan`. Otherwise `plan` drives rate control; None falls back to the
/// configured constant quality. Audio is always stream-copied.
pub fn build_encode_args(
    settings: &CompressionSettings,
    lut: Option<&LutFile>,
    plan: Option<&EncodePlan>,
) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(lut) = lut
        && settings.effective_lut_only_mode()
    {
        log::debug!(
            target: "batchvideo::ffmpeg::builder",
            "LUT-only encode: lut={}",
            lut.path().display()
        );
        push_pair(&mut args, "-vf", lut_filter(lut));
        push_pair(&mut args, "-c:v", Codec::compatibility().encoder());
        push_pair(&mut args, "-preset", SpeedPreset::fastest().as_str());
        push_pair(&mut args, "-crf", LUT_ONLY_QUALITY.to_string());
        push_pair(&mut args, "-c:a", "copy");
        return args;
    }

    let mut filters = Vec::with_capacity(2);
    if let Some(lut) = lut {
        filters.push(lut_filter(lut));
    }
    if let Some(width) = settings.effective_resolution().width() {
        filters.push(format!("scale={}:-2", width));
    }
    if !filters.is_empty() {
        push_pair(&mut args, "-vf", filters.join(","));
    }

    let codec = settings.effective_codec();
    push_pair(&mut args, "-c:v", codec.encoder());
    if codec == Codec::H265 {
        push_pair(&mut args, "-tag:v", "hvc1");
    }

    let fallback;
    let plan = match plan {
        Some(plan) => plan,
        None => {
            fallback = crate::plan::constant_quality_plan(settings);
            &fallback
        }
    };
    match *plan {
        EncodePlan::Bitrate { video_kbps } => {
            push_pair(&mut args, "-b:v", format!("{}k", video_kbps));
        }
        EncodePlan::ConstantQuality {
            value,
            cap_kbps,
            buffer_kbps,
        } => {
            push_pair(&mut args, "-crf", value.to_string());
            if let Some(cap) = cap_kbps {
                push_pair(&mut args, "-maxrate", format!("{}k", cap));
                let buffer = buffer_kbps.unwrap_or(cap.saturating_mul(2));
                push_pair(&mut args, "-bufsize", format!("{}k", buffer));
            }
        }
    }

    push_pair(&mut args, "-preset", settings.effective_preset().as_str());
    push_pair(&mut args, "-c:a", "copy");

    log::debug!(
        target: "batchvideo::ffmpeg::builder",
        "Encode args: codec={}, plan={:?}, filters={}",
        codec.encoder(),
        plan,
        filters.len()
    );
    args
}

/// Full FFmpeg argument list: framing flags, input, encode params, output.
pub fn build_ffmpeg_invocation(input_path: &str, params: &[String], output_path: &str) -> Vec<String> {
    let mut args = vec![
        "-nostdin".to_string(),
        "-y".to_string(),
        "-threads".to_string(),
        "0".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-i".to_string(),
        input_path.to_string(),
    ];
    args.extend(params.iter().cloned());
    args.push(output_path.to_string());
    args
}

/// Grab the first frame, 320 px wide, as a single JPEG image.
pub fn build_thumbnail_args(input_path: &str, output_path: &str) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input_path.to_string(),
        "-vframes".to_string(),
        "1".to_string(),
        "-vf".to_string(),
        "scale=320:-1".to_string(),
        output_path.to_string(),
    ]
}

/// One flag (with its value) per line, for showing a command to the user.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    if args.is_empty() {
        return String::new();
    }
    let mut lines = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let line = if arg.starts_with('-') && i + 1 < args.len() && !args[i + 1].starts_with('-') {
            let value = &args[i + 1];
            i += 2;
            format!("  {} {}", arg, value)
        } else {
            i += 1;
            format!("  {}", arg)
        };
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{CompressionMethod, Resolution};

    fn lut() -> LutFile {
        LutFile::new("/luts/film.cube").expect("lut")
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn default_settings_fall_back_to_crf_23() {
        let args = build_encode_args(&CompressionSettings::default(), None, None);
        assert_eq!(
            args,
            vec!["-c:v", "libx264", "-crf", "23", "-preset", "medium", "-c:a", "copy"]
        );
    }

    #[test]
    fn bitrate_plan_sets_average_bitrate() {
        let plan = EncodePlan::Bitrate { video_kbps: 8064 };
        let args = build_encode_args(&CompressionSettings::default(), None, Some(&plan));
        assert_eq!(value_after(&args, "-b:v"), Some("8064k"));
        assert!(!args.iter().any(|a| a == "-crf"));
    }

    #[test]
    fn capped_quality_adds_maxrate_and_bufsize() {
        let plan = EncodePlan::ConstantQuality {
            value: 20,
            cap_kbps: Some(3000),
            buffer_kbps: Some(6000),
        };
        let args = build_encode_args(&CompressionSettings::default(), None, Some(&plan));
        assert_eq!(value_after(&args, "-crf"), Some("20"));
        assert_eq!(value_after(&args, "-maxrate"), Some("3000k"));
        assert_eq!(value_after(&args, "-bufsize"), Some("6000k"));
    }

    #[test]
    fn lut_and_scale_share_one_filter_chain() {
        let settings = CompressionSettings {
            resolution: Some(Resolution::W1280),
            ..Default::default()
        };
        let args = build_encode_args(&settings, Some(&lut()), None);
        assert_eq!(args.iter().filter(|a| *a == "-vf").count(), 1);
        assert_eq!(
            value_after(&args, "-vf"),
            Some("lut3d=file='/luts/film.cube',scale=1280:-2")
        );
    }

    #[test]
    fn scale_only_without_lut() {
        let settings = CompressionSettings {
            resolution: Some(Resolution::W854),
            ..Default::default()
        };
        let args = build_encode_args(&settings, None, None);
        assert_eq!(value_after(&args, "-vf"), Some("scale=854:-2"));
    }

    #[test]
    fn lut_only_ignores_size_targets() {
        let settings = CompressionSettings {
            compression_method: Some(CompressionMethod::Percentage),
            codec: Some(Codec::H265),
            preset: Some(SpeedPreset::Veryslow),
            resolution: Some(Resolution::W1920),
            lut_only_mode: Some(true),
            ..Default::default()
        };
        let plan = EncodePlan::Bitrate { video_kbps: 900 };
        let args = build_encode_args(&settings, Some(&lut()), Some(&plan));
        assert_eq!(
            args,
            vec![
                "-vf",
                "lut3d=file='/luts/film.cube'",
                "-c:v",
                "libx264",
                "-preset",
                "ultrafast",
                "-crf",
                "18",
                "-c:a",
                "copy"
            ]
        );
    }

    #[test]
    fn lut_only_without_lut_is_a_normal_encode() {
        let settings = CompressionSettings {
            lut_only_mode: Some(true),
            ..Default::default()
        };
        let args = build_encode_args(&settings, None, None);
        assert!(!args.iter().any(|a| a == "-vf"));
        assert_eq!(value_after(&args, "-preset"), Some("medium"));
    }

    #[test]
    fn h265_tags_hvc1() {
        let settings = CompressionSettings {
            codec: Some(Codec::H265),
            ..Default::default()
        };
        let args = build_encode_args(&settings, None, None);
        assert_eq!(value_after(&args, "-c:v"), Some("libx265"));
        assert_eq!(value_after(&args, "-tag:v"), Some("hvc1"));
    }

    #[test]
    fn identical_inputs_give_identical_args() {
        let settings = CompressionSettings {
            resolution: Some(Resolution::W1920),
            max_bitrate: Some(4000),
            ..Default::default()
        };
        let plan = crate::plan::plan_or_fallback(&settings, 1_000_000, Some(12.0));
        let a = build_encode_args(&settings, Some(&lut()), Some(&plan));
        let b = build_encode_args(&settings, Some(&lut()), Some(&plan));
        assert_eq!(a, b);
    }

    #[test]
    fn lut_path_is_escaped_for_filtergraph() {
        let lut = LutFile::new("C:\\Grades\\warm.cube").expect("lut");
        assert_eq!(lut_filter(&lut), "lut3d=file='C\\:/Grades/warm.cube'");
    }

    #[test]
    fn lut_path_quote_leaves_the_quoted_run() {
        let lut = LutFile::new("/luts/John's.cube").expect("lut");
        // Graph level yields `file=/luts/John\'s.cube`, which the option parser reads as `John's`.
        assert_eq!(lut_filter(&lut), r"lut3d=file='/luts/John'\\\''s.cube'");
    }

    #[test]
    fn invocation_frames_params_between_input_and_output() {
        let params = vec!["-c:v".to_string(), "libx264".to_string()];
        let args = build_ffmpeg_invocation("in.mov", &params, "out.mp4");
        assert_eq!(value_after(&args, "-progress"), Some("pipe:1"));
        assert_eq!(value_after(&args, "-i"), Some("in.mov"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
        assert!(args.iter().any(|a| a == "-y"));
    }

    #[test]
    fn multiline_display_pairs_flags_with_values() {
        let args: Vec<String> = ["-i", "in.mp4", "-y", "out.mp4"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            format_args_for_display_multiline(&args),
            "  -i in.mp4\n  -y out.mp4"
        );
    }
}
