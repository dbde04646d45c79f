mod builder;
pub mod discovery;
mod engine;
mod error;
pub mod ffprobe;
mod progress;
mod runner;
mod temp;

pub use builder::{
    build_encode_args, build_ffmpeg_invocation, build_thumbnail_args,
    format_args_for_display_multiline, lut_filter,
};
pub use discovery::{FfmpegStatus, check_ffmpeg};
pub use engine::FfmpegEngine;
pub use error::{FfmpegErrorPayload, inline_error_message, parse_ffmpeg_error};
pub use progress::to_percent;
pub use runner::{FractionCallback, ProcessTable, run_ffmpeg_blocking};
pub use temp::{TempFile, TempFileManager, cleanup_old_temp_files};

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
