//! Operations behind the sidecar's JSON-lines methods. The binary only parses requests
//! and writes responses; everything else lives here so it can be tested in-process.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::batch::{BatchEvent, BatchOrchestrator, BatchSnapshot, BatchSummary};
use crate::engine::Engine;
use crate::error::AppError;
use crate::ffmpeg::ffprobe::{VideoMetadata, get_video_metadata as probe_metadata};
use crate::ffmpeg::{
    FfmpegEngine, FfmpegErrorPayload, FfmpegStatus, TempFileManager, check_ffmpeg,
    cleanup_old_temp_files, parse_ffmpeg_error,
};
use crate::media::{JobId, LutFile, MediaSource};
use crate::settings::CompressionSettings;

pub const PROTOCOL_VERSION: u8 = 1;

/// Summary shown when a batch fails as a whole rather than file by file.
pub const BATCH_ERROR_SUMMARY: &str = "An error occurred during processing. Please try again.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub ffmpeg: FfmpegStatus,
}

pub fn app_capabilities() -> AppCapabilitiesResult {
    AppCapabilitiesResult {
        protocol_version: PROTOCOL_VERSION,
        ffmpeg: check_ffmpeg(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadataResult {
    duration: f64,
    width: u32,
    height: u32,
    size: u64,
    size_mb: f64,
    fps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    codec_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bit_rate: Option<u64>,
}

impl From<VideoMetadata> for VideoMetadataResult {
    fn from(meta: VideoMetadata) -> Self {
        Self {
            duration: meta.duration,
            width: meta.width,
            height: meta.height,
            size: meta.size,
            size_mb: meta.size as f64 / 1024.0 / 1024.0,
            fps: (meta.fps * 100.0).round() / 100.0,
            codec_name: meta.codec_name,
            format_name: meta.format_name,
            bit_rate: meta.bit_rate,
        }
    }
}

pub fn get_video_metadata(path: PathBuf) -> Result<VideoMetadataResult, AppError> {
    Ok(probe_metadata(&path)?.into())
}

/// `batch.configure` params. Absent fields are left as they are.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureParams {
    pub settings: Option<CompressionSettings>,
    pub lut_path: Option<PathBuf>,
    #[serde(default)]
    pub clear_lut: bool,
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub clear_output_dir: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResult {
    pub cancelled: bool,
    pub job_id: Option<JobId>,
    /// Running jobs that were terminated.
    pub terminated: usize,
}

/// The `{summary, detail}` payload for an error response.
pub fn error_payload(err: &AppError) -> FfmpegErrorPayload {
    match err {
        AppError::FfmpegFailed { code, stderr } if *code == -1 => FfmpegErrorPayload {
            summary: stderr.clone(),
            detail: stderr.clone(),
        },
        AppError::FfmpegFailed { code, stderr } => parse_ffmpeg_error(stderr, Some(*code)),
        AppError::Batch(detail) => FfmpegErrorPayload {
            summary: BATCH_ERROR_SUMMARY.to_string(),
            detail: detail.clone(),
        },
        _ => {
            let text = err.to_string();
            FfmpegErrorPayload {
                summary: text.clone(),
                detail: text,
            }
        }
    }
}

/// Event name and payload for a batch change.
pub fn event_message(event: &BatchEvent) -> (&'static str, Value) {
    match event {
        BatchEvent::FileChanged(file) => (
            "batch.file",
            serde_json::to_value(file).unwrap_or(Value::Null),
        ),
        BatchEvent::FilesRemoved(ids) => ("batch.removed", json!({ "jobIds": ids })),
        BatchEvent::ProcessingChanged(processing) => {
            ("batch.processing", json!({ "isProcessing": processing }))
        }
    }
}

/// One batch driven over the sidecar protocol.
#[derive(Clone)]
pub struct SidecarSession {
    batch: BatchOrchestrator,
    temp: TempFileManager,
}

impl Default for SidecarSession {
    fn default() -> Self {
        Self::new(Arc::new(FfmpegEngine::new()))
    }
}

impl SidecarSession {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            batch: BatchOrchestrator::new(engine),
            temp: TempFileManager::default(),
        }
    }

    pub fn batch(&self) -> &BatchOrchestrator {
        &self.batch
    }

    /// Add files by path and start probing them in the background.
    pub fn add(&self, paths: Vec<PathBuf>) -> Result<Vec<JobId>, AppError> {
        let ids = self
            .batch
            .add_files(paths.into_iter().map(MediaSource::path).collect())?;
        self.batch.spawn_probes(ids.clone());
        Ok(ids)
    }

    pub fn remove(&self, job_id: &JobId) -> Result<(), AppError> {
        if self.batch.remove_file(job_id) {
            Ok(())
        } else {
            Err(AppError::invalid_input(format!("Unknown jobId: {}", job_id)))
        }
    }

    pub fn clear(&self) -> usize {
        self.batch.clear_files()
    }

    /// LUT changes are applied before settings so LUT-only mode can be enabled in one call.
    /// Everything is validated up front; a rejected payload changes nothing.
    pub fn configure(&self, params: ConfigureParams) -> Result<BatchSnapshot, AppError> {
        if let Some(settings) = &params.settings {
            settings.validate()?;
        }
        let lut = match params.lut_path {
            Some(path) if !params.clear_lut => Some(LutFile::new(path)?),
            _ => None,
        };

        if params.clear_lut {
            self.batch.set_lut(None);
        } else if lut.is_some() {
            self.batch.set_lut(lut);
        }
        if params.clear_output_dir {
            self.batch.set_output_dir(None);
        } else if let Some(dir) = params.output_dir {
            self.batch.set_output_dir(Some(dir));
        }
        if let Some(settings) = params.settings {
            self.batch.set_settings(settings)?;
        }
        Ok(self.batch.snapshot())
    }

    pub fn state(&self) -> BatchSnapshot {
        self.batch.snapshot()
    }

    /// Write the file's thumbnail to a temp JPEG and return its path, or None if there is none yet.
    pub fn thumbnail(&self, job_id: &JobId) -> Result<Option<PathBuf>, AppError> {
        let file = self
            .batch
            .file(job_id)
            .ok_or_else(|| AppError::invalid_input(format!("Unknown jobId: {}", job_id)))?;
        let Some(bytes) = file.thumbnail else {
            return Ok(None);
        };
        let path = self
            .temp
            .create(&format!("{}-thumb.jpg", job_id), Some(&bytes[..]))?
            .persist();
        Ok(Some(path))
    }

    pub fn command_preview(&self, input_path: Option<PathBuf>) -> String {
        let source = MediaSource::path(input_path.unwrap_or_else(|| PathBuf::from("<input>")));
        self.batch.command_preview_for(source)
    }

    pub async fn process(&self) -> Result<BatchSummary, AppError> {
        self.batch.run_batch().await.map_err(|e| match e {
            AppError::BatchInProgress => e,
            other => {
                log::error!(target: "batchvideo::sidecar", "batch failed: {}", other);
                AppError::Batch(other.to_string())
            }
        })
    }

    pub fn cancel(&self, job_id: Option<JobId>) -> Result<CancelResult, AppError> {
        match job_id {
            Some(id) => {
                if self.batch.file(&id).is_none() {
                    return Err(AppError::invalid_input(format!("Unknown jobId: {}", id)));
                }
                let cancelled = self.batch.cancel_file(&id);
                Ok(CancelResult {
                    cancelled,
                    job_id: Some(id),
                    terminated: usize::from(cancelled),
                })
            }
            None => {
                let was_processing = self.batch.is_processing();
                let terminated = self.batch.cancel();
                Ok(CancelResult {
                    cancelled: was_processing,
                    job_id: None,
                    terminated,
                })
            }
        }
    }
}

/// Remove temp files left behind by earlier runs.
pub fn cleanup_startup_temp(max_age: Duration) {
    cleanup_old_temp_files(max_age);
}

/// Remove a thumbnail file handed out earlier.
pub fn discard_file(path: PathBuf) -> Result<(), AppError> {
    fs::remove_file(path)?;
    Ok(())
}
