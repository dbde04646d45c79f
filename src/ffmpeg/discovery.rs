use crate::error::AppError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

#[cfg(target_os = "windows")]
const PATH_LOOKUP: &str = "where";
#[cfg(not(target_os = "windows"))]
const PATH_LOOKUP: &str = "which";

fn find_in_path(program: &str) -> Option<PathBuf> {
    let output = Command::new(PATH_LOOKUP).arg(program).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(PathBuf::from(first))
    }
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

static FFMPEG_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// A binary shipped next to the running executable, if present.
pub fn resolve_bundled_path(base_name: &str) -> Option<PathBuf> {
    let exe_dir = std::env::current_exe().ok()?.parent()?.to_path_buf();
    let path = exe_dir.join(format!("{}{}", base_name, std::env::consts::EXE_SUFFIX));
    if path.exists() {
        log::debug!(
            target: "batchvideo::ffmpeg::discovery",
            "FFmpeg found next to executable: {}",
            path.display()
        );
        Some(path)
    } else {
        None
    }
}

fn resolve_ffmpeg_path() -> Result<PathBuf, AppError> {
    for path in common_paths() {
        if path.exists() {
            log::debug!(
                target: "batchvideo::ffmpeg::discovery",
                "FFmpeg found in common path: {}",
                path.display()
            );
            return Ok(path);
        }
    }

    if let Some(p) = find_in_path("ffmpeg")
        && p.exists()
    {
        log::debug!(
            target: "batchvideo::ffmpeg::discovery",
            "FFmpeg found in PATH: {}",
            p.display()
        );
        return Ok(p);
    }

    if let Some(p) = resolve_bundled_path("ffmpeg") {
        return Ok(p);
    }

    log::error!(
        target: "batchvideo::ffmpeg::discovery",
        "FFmpeg not found in PATH or common locations"
    );
    Err(AppError::FfmpegNotFound(
        "FFmpeg not found. Please install FFmpeg on your system:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// FFmpeg path, resolved once per process.
/// `FFMPEG_PATH` wins when it points at an existing file.
pub fn get_ffmpeg_path() -> Result<&'static Path, AppError> {
    if let Some(path) = FFMPEG_PATH_CACHE.get() {
        return Ok(path.as_path());
    }
    let from_env = std::env::var_os("FFMPEG_PATH")
        .map(PathBuf::from)
        .filter(|p| p.exists());
    let path = match from_env {
        Some(p) => {
            log::debug!(
                target: "batchvideo::ffmpeg::discovery",
                "FFmpeg path from FFMPEG_PATH env: {}",
                p.display()
            );
            p
        }
        None => resolve_ffmpeg_path()?,
    };
    // Another thread may have raced us; either answer is valid.
    Ok(FFMPEG_PATH_CACHE.get_or_init(|| path).as_path())
}

/// ffprobe locations to try for an ffmpeg binary: same suffix first, then plain.
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = ffmpeg_path.parent() else {
        return vec![];
    };
    let exe = std::env::consts::EXE_SUFFIX;
    let mut candidates = Vec::with_capacity(2);
    if let Some(suffix) = ffmpeg_path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.strip_prefix("ffmpeg"))
        && !suffix.is_empty()
    {
        candidates.push(parent.join(format!("ffprobe{suffix}{exe}")));
    }
    candidates.push(parent.join(format!("ffprobe{exe}")));
    candidates
}

/// ffprobe next to the resolved ffmpeg.
pub fn get_ffprobe_path() -> Result<PathBuf, AppError> {
    let ffmpeg = get_ffmpeg_path()?;
    let candidates = ffprobe_candidates(ffmpeg);
    if let Some(found) = candidates.iter().find(|c| c.exists()) {
        return Ok(found.clone());
    }
    Err(AppError::FfmpegNotFound(format!(
        "ffprobe not found next to FFmpeg ({})",
        ffmpeg.display()
    )))
}

/// What the local FFmpeg can do.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegStatus {
    pub available: bool,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
    pub has_libx264: bool,
    pub has_libx265: bool,
}

/// Probe the FFmpeg install: version banner and the H.264/H.265 encoders.
pub fn check_ffmpeg() -> FfmpegStatus {
    let path = match get_ffmpeg_path() {
        Ok(p) => p,
        Err(e) => {
            log::warn!(target: "batchvideo::ffmpeg::discovery", "FFmpeg unavailable: {}", e);
            return FfmpegStatus::default();
        }
    };
    let version = Command::new(path)
        .args(["-hide_banner", "-version"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| parse_version_line(&String::from_utf8_lossy(&o.stdout)));
    let encoders = Command::new(path)
        .args(["-hide_banner", "-encoders"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| parse_encoder_names(&String::from_utf8_lossy(&o.stdout)))
        .unwrap_or_default();
    let status = FfmpegStatus {
        available: true,
        path: Some(path.to_path_buf()),
        version,
        has_libx264: encoders.iter().any(|e| e == "libx264"),
        has_libx265: encoders.iter().any(|e| e == "libx265"),
    };
    log::info!(
        target: "batchvideo::ffmpeg::discovery",
        "FFmpeg status: version={:?}, libx264={}, libx265={}",
        status.version,
        status.has_libx264,
        status.has_libx265
    );
    status
}

fn parse_version_line(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .next()
        .map(str::trim)
        .filter(|l| l.starts_with("ffmpeg version"))
        .map(str::to_string)
}

/// Encoder names from `ffmpeg -encoders`: rows after the ` ------` separator,
/// each `<flags> <name> <description>`.
fn parse_encoder_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip_while(|l| !l.trim_start().starts_with("------"))
        .skip(1)
        .filter_map(|l| l.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}
