//! Native [`Engine`]: FFmpeg and ffprobe as child processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::engine::{Engine, EngineJob, EngineOutput, ProbeResult, ProgressCallback};
use crate::error::AppError;
use crate::media::{JobId, MediaSource};

use super::builder::{build_ffmpeg_invocation, build_thumbnail_args};
use super::discovery::get_ffmpeg_path;
use super::ffprobe::get_video_metadata;
use super::progress::to_percent;
use super::runner::{FractionCallback, ProcessTable, run_ffmpeg_blocking};
use super::temp::{TempFile, TempFileManager};
use super::path_to_string;

#[derive(Clone, Default)]
pub struct FfmpegEngine {
    processes: ProcessTable,
    temp: TempFileManager,
}

impl FfmpegEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scratch files (spilled in-memory inputs, thumbnails) go to `dir`.
    pub fn with_temp_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            processes: ProcessTable::new(),
            temp: TempFileManager::in_dir(dir),
        }
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// Path FFmpeg can read. In-memory sources are spilled to a temp file that lives
    /// as long as the returned guard.
    fn materialize(&self, source: &MediaSource) -> Result<(PathBuf, Option<TempFile>), AppError> {
        match source {
            MediaSource::Path { path } => Ok((path.clone(), None)),
            MediaSource::Memory { name, bytes } => {
                let file = self.temp.create(&sanitize_file_name(name), Some(&bytes[..]))?;
                Ok((file.path().to_path_buf(), Some(file)))
            }
        }
    }

    fn extract_thumbnail(&self, source: &MediaSource) -> Result<Vec<u8>, AppError> {
        let (input, _input_guard) = self.materialize(source)?;
        let output = self.temp.create("thumb.jpg", None)?;
        let args = build_thumbnail_args(&path_to_string(&input), &path_to_string(output.path()));
        let result = Command::new(get_ffmpeg_path()?)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;
        if !result.status.success() {
            return Err(AppError::ffmpeg_failed(
                result.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&result.stderr).to_string(),
            ));
        }
        Ok(fs::read(output.path())?)
    }
}

fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if base.is_empty() {
        "input".to_string()
    } else {
        base
    }
}

impl Engine for FfmpegEngine {
    fn probe(&self, source: &MediaSource) -> Result<ProbeResult, AppError> {
        let (input, _guard) = self.materialize(source)?;
        let meta = get_video_metadata(&input)?;
        Ok(ProbeResult::from(&meta))
    }

    fn thumbnail(&self, source: &MediaSource) -> Option<Vec<u8>> {
        match self.extract_thumbnail(source) {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                log::warn!(
                    target: "batchvideo::ffmpeg::engine",
                    "thumbnail failed for {}: {}",
                    source.name(),
                    e
                );
                None
            }
        }
    }

    fn run(&self, job: &EngineJob, on_progress: ProgressCallback) -> Result<EngineOutput, AppError> {
        if self.processes.is_killed(&job.job_id) {
            return Err(AppError::aborted());
        }
        let (input, _input_guard) = self.materialize(&job.source)?;
        if let Some(parent) = job.output.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let args = build_ffmpeg_invocation(
            &path_to_string(&input),
            &job.params,
            &path_to_string(&job.output),
        );
        let callback: FractionCallback = Arc::new(move |fraction| on_progress(to_percent(fraction)));
        run_ffmpeg_blocking(
            &args,
            &job.job_id,
            &self.processes,
            job.duration_secs,
            Some(callback),
        )?;
        let size_bytes = fs::metadata(&job.output)?.len();
        Ok(EngineOutput {
            location: job.output.clone(),
            size_bytes,
        })
    }

    fn terminate(&self, job_id: &JobId) -> bool {
        self.processes.terminate(job_id)
    }

    fn reserve(&self, job_id: &JobId) {
        self.processes.reserve(job_id);
    }

    fn release(&self, job_id: &JobId) {
        self.processes.release(job_id);
    }
}
