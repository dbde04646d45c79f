//! The boundary between the batch core and whatever actually encodes video.
//!
//! The native adapter is [`crate::ffmpeg::FfmpegEngine`]; tests and other runtimes plug in
//! their own [`Engine`].

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::error::AppError;
use crate::jobs::JobHandle;
use crate::media::{JobId, MediaSource};

/// Upper bound on in-memory (browser-style) inputs.
pub const WEB_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Receives whole-number progress percentages for one job.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: Option<u32>,
}

/// Everything an engine needs to encode one file.
#[derive(Debug, Clone)]
pub struct EngineJob {
    pub job_id: JobId,
    pub source: MediaSource,
    /// Encoder parameters from the command builder, without input/output.
    pub params: Vec<String>,
    pub output: PathBuf,
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOutput {
    pub location: PathBuf,
    pub size_bytes: u64,
}

/// An encoder the orchestrator can drive. Calls block; the orchestrator runs them on
/// tokio's blocking pool.
pub trait Engine: Send + Sync {
    fn probe(&self, source: &MediaSource) -> Result<ProbeResult, AppError>;

    /// First-frame preview image. Best-effort: failures are None.
    fn thumbnail(&self, source: &MediaSource) -> Option<Vec<u8>>;

    /// Encode one file. Terminated jobs fail with [`AppError::Aborted`].
    fn run(&self, job: &EngineJob, on_progress: ProgressCallback) -> Result<EngineOutput, AppError>;

    /// Forcefully stop a job. Returns whether it was running or about to run.
    ///
    /// Between [`Engine::reserve`] and [`Engine::release`] a terminate must stick: a `run`
    /// that has not spawned anything yet fails with [`AppError::Aborted`] instead.
    fn terminate(&self, job_id: &JobId) -> bool;

    /// Called before a job becomes cancellable, ahead of `run`.
    fn reserve(&self, _job_id: &JobId) {}

    /// Called once a job can no longer be cancelled, whether or not it ran.
    fn release(&self, _job_id: &JobId) {}

    /// Largest accepted input in bytes, if the engine has a limit.
    fn max_file_size(&self) -> Option<u64> {
        None
    }
}

/// Size cap for one source. In-memory sources never exceed [`WEB_MAX_FILE_SIZE`], whatever
/// the engine allows.
pub fn max_input_size(source: &MediaSource, engine_limit: Option<u64>) -> Option<u64> {
    match source {
        MediaSource::Path { .. } => engine_limit,
        MediaSource::Memory { .. } => Some(
            engine_limit.map_or(WEB_MAX_FILE_SIZE, |limit| limit.min(WEB_MAX_FILE_SIZE)),
        ),
    }
}

/// Registry handle that stops a job through its engine.
pub struct EngineJobHandle {
    engine: Arc<dyn Engine>,
    job_id: JobId,
}

impl EngineJobHandle {
    pub fn new(engine: Arc<dyn Engine>, job_id: JobId) -> Self {
        Self { engine, job_id }
    }
}

impl JobHandle for EngineJobHandle {
    fn terminate(&self) -> bool {
        self.engine.terminate(&self.job_id)
    }
}
