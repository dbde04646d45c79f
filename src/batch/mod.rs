//! Batch orchestration: owns the file list and settings, runs files one at a time
//! through an [`Engine`], and reports every change to subscribers.

mod file;

pub use file::{
    BatchStats, CANCELLED_MESSAGE, FailureKind, FileStatus, GENERIC_FAILURE_MESSAGE, VideoFile,
    overall_progress,
};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::engine::{
    Engine, EngineJob, EngineJobHandle, EngineOutput, ProgressCallback, max_input_size,
};
use crate::error::AppError;
use crate::ffmpeg::{
    build_encode_args, build_ffmpeg_invocation, format_args_for_display_multiline,
    inline_error_message, path_to_string,
};
use crate::jobs::JobRegistry;
use crate::media::{JobId, LutFile, MediaSource, is_valid_video_file, output_path_for};
use crate::plan::plan_or_fallback;
use crate::predict::predict_output_size;
use crate::settings::CompressionSettings;

/// A change subscribers are told about.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    FileChanged(VideoFile),
    FilesRemoved(Vec<JobId>),
    ProcessingChanged(bool),
}

pub type BatchListener = Arc<dyn Fn(&BatchEvent) + Send + Sync>;

/// Point-in-time copy of the batch state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub files: Vec<VideoFile>,
    pub settings: CompressionSettings,
    pub lut: Option<LutFile>,
    pub output_dir: Option<PathBuf>,
    pub is_processing: bool,
    pub current_file_index: Option<usize>,
    pub stats: BatchStats,
    pub overall_progress: u8,
}

/// Tally of one `run_batch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

enum FileOutcome {
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

struct BatchState {
    files: Vec<VideoFile>,
    settings: CompressionSettings,
    lut: Option<LutFile>,
    output_dir: Option<PathBuf>,
    is_processing: bool,
    current_file_index: Option<usize>,
    /// Jobs cancelled one by one; their result is voided like a batch cancel.
    cancelled_jobs: HashSet<JobId>,
}

impl BatchState {
    fn file_mut(&mut self, job_id: &JobId) -> Option<&mut VideoFile> {
        self.files.iter_mut().find(|f| &f.id == job_id)
    }

    fn predicted_size(&self, file: &VideoFile) -> Option<u64> {
        predict_output_size(file.size, file.duration, &self.settings)
    }

    /// Recompute every prediction; returns the files whose prediction changed.
    fn refresh_predictions(&mut self) -> Vec<VideoFile> {
        let settings = self.settings.clone();
        self.files
            .iter_mut()
            .filter_map(|f| {
                let predicted = predict_output_size(f.size, f.duration, &settings);
                (predicted != f.predicted_size).then(|| {
                    f.predicted_size = predicted;
                    f.clone()
                })
            })
            .collect()
    }

    fn encode_params(&self, file: &VideoFile) -> Vec<String> {
        let lut_only = self.lut.is_some() && self.settings.effective_lut_only_mode();
        let plan = (!lut_only).then(|| plan_or_fallback(&self.settings, file.size, file.duration));
        build_encode_args(&self.settings, self.lut.as_ref(), plan.as_ref())
    }

    fn render_command(&self, file: &VideoFile) -> String {
        let params = self.encode_params(file);
        let output = output_path_for(&file.source, self.output_dir.as_deref());
        let input = match file.source.as_path() {
            Some(path) => path_to_string(path),
            None => file.name.clone(),
        };
        let args = build_ffmpeg_invocation(&input, &params, &path_to_string(&output));
        format!("ffmpeg\n{}", format_args_for_display_multiline(&args))
    }
}

struct Shared {
    engine: Arc<dyn Engine>,
    state: Mutex<BatchState>,
    cancelled: AtomicBool,
    registry: JobRegistry,
    listeners: Mutex<Vec<(u64, BatchListener)>>,
    next_listener_id: AtomicU64,
}

/// Cheap-to-clone handle on one batch.
///
/// Locks are never held across an await or while calling the engine or a listener.
#[derive(Clone)]
pub struct BatchOrchestrator {
    shared: Arc<Shared>,
}

/// Resets processing state however `run_batch` exits.
struct ProcessingGuard {
    orchestrator: BatchOrchestrator,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        let shared = &self.orchestrator.shared;
        {
            let mut state = shared.state.lock();
            state.is_processing = false;
            state.current_file_index = None;
            state.cancelled_jobs.clear();
        }
        shared.cancelled.store(false, Ordering::SeqCst);
        self.orchestrator.notify(BatchEvent::ProcessingChanged(false));
    }
}

fn failure_message(error: &AppError) -> String {
    match error {
        AppError::FfmpegFailed { code, stderr } => inline_error_message(stderr, *code),
        other => other.to_string(),
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

impl BatchOrchestrator {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self::with_settings(engine, CompressionSettings::default())
    }

    pub fn with_settings(engine: Arc<dyn Engine>, settings: CompressionSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine,
                state: Mutex::new(BatchState {
                    files: Vec::new(),
                    settings,
                    lut: None,
                    output_dir: None,
                    is_processing: false,
                    current_file_index: None,
                    cancelled_jobs: HashSet::new(),
                }),
                cancelled: AtomicBool::new(false),
                registry: JobRegistry::new(),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.shared.engine
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.shared.registry
    }

    /// Register a listener; returns an id for [`Self::unsubscribe`].
    pub fn subscribe(&self, listener: BatchListener) -> u64 {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.lock().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.shared.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn notify(&self, event: BatchEvent) {
        let listeners: Vec<BatchListener> = self
            .shared
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    fn notify_files(&self, files: Vec<VideoFile>) {
        for file in files {
            self.notify(BatchEvent::FileChanged(file));
        }
    }

    /// Add videos to the end of the batch. All sources are validated first; one bad
    /// source rejects the whole request.
    pub fn add_files(&self, sources: Vec<MediaSource>) -> Result<Vec<JobId>, AppError> {
        let engine_limit = self.shared.engine.max_file_size();
        let mut sized = Vec::with_capacity(sources.len());
        for source in sources {
            let name = source.name();
            if !is_valid_video_file(&name) {
                return Err(AppError::invalid_input(format!(
                    "Unsupported video format: {}",
                    name
                )));
            }
            let size = source.byte_len()?;
            if let Some(max) = max_input_size(&source, engine_limit)
                && size > max
            {
                return Err(AppError::invalid_input(format!(
                    "{} is too large ({} bytes, limit {} bytes)",
                    name, size, max
                )));
            }
            sized.push((source, size));
        }

        let timestamp = now_millis();
        let added: Vec<VideoFile> = {
            let mut state = self.shared.state.lock();
            let added: Vec<VideoFile> = sized
                .into_iter()
                .enumerate()
                .map(|(index, (source, size))| {
                    let mut file = VideoFile::new(JobId::generate(timestamp, index), source, size);
                    file.predicted_size = state.predicted_size(&file);
                    file
                })
                .collect();
            state.files.extend(added.iter().cloned());
            added
        };
        log::info!(
            target: "batchvideo::batch",
            "added {} file(s)",
            added.len()
        );
        let ids = added.iter().map(|f| f.id.clone()).collect();
        self.notify_files(added);
        Ok(ids)
    }

    /// Remove one file. A file that is encoding has its job cancelled first.
    pub fn remove_file(&self, job_id: &JobId) -> bool {
        let removed = {
            let mut state = self.shared.state.lock();
            let before = state.files.len();
            state.files.retain(|f| &f.id != job_id);
            state.files.len() != before
        };
        if removed {
            self.shared.registry.cancel(job_id);
            self.notify(BatchEvent::FilesRemoved(vec![job_id.clone()]));
        }
        removed
    }

    /// Remove every file, cancelling any that is encoding.
    pub fn clear_files(&self) -> usize {
        let ids: Vec<JobId> = {
            let mut state = self.shared.state.lock();
            state.files.drain(..).map(|f| f.id).collect()
        };
        for id in &ids {
            self.shared.registry.cancel(id);
        }
        if !ids.is_empty() {
            self.notify(BatchEvent::FilesRemoved(ids.clone()));
        }
        ids.len()
    }

    pub fn settings(&self) -> CompressionSettings {
        self.shared.state.lock().settings.clone()
    }

    /// Replace the settings. Invalid settings are rejected and the old ones kept.
    /// LUT-only mode is dropped when no LUT is loaded.
    pub fn set_settings(&self, mut settings: CompressionSettings) -> Result<(), AppError> {
        settings.validate()?;
        let changed = {
            let mut state = self.shared.state.lock();
            if state.lut.is_none() && settings.effective_lut_only_mode() {
                log::debug!(
                    target: "batchvideo::batch",
                    "ignoring LUT-only mode without a LUT"
                );
                settings.lut_only_mode = Some(false);
            }
            state.settings = settings;
            state.refresh_predictions()
        };
        self.notify_files(changed);
        Ok(())
    }

    pub fn lut(&self) -> Option<LutFile> {
        self.shared.state.lock().lut.clone()
    }

    /// Set or clear the LUT. Clearing it also turns LUT-only mode off.
    pub fn set_lut(&self, lut: Option<LutFile>) {
        let changed = {
            let mut state = self.shared.state.lock();
            if lut.is_none() {
                state.settings.lut_only_mode = Some(false);
            }
            state.lut = lut;
            state.refresh_predictions()
        };
        self.notify_files(changed);
    }

    pub fn set_output_dir(&self, dir: Option<PathBuf>) {
        self.shared.state.lock().output_dir = dir;
    }

    pub fn file(&self, job_id: &JobId) -> Option<VideoFile> {
        self.shared
            .state
            .lock()
            .files
            .iter()
            .find(|f| &f.id == job_id)
            .cloned()
    }

    pub fn files(&self) -> Vec<VideoFile> {
        self.shared.state.lock().files.clone()
    }

    pub fn is_processing(&self) -> bool {
        self.shared.state.lock().is_processing
    }

    pub fn stats(&self) -> BatchStats {
        BatchStats::from_files(&self.shared.state.lock().files)
    }

    pub fn overall_progress(&self) -> u8 {
        overall_progress(&self.shared.state.lock().files)
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        let state = self.shared.state.lock();
        BatchSnapshot {
            files: state.files.clone(),
            settings: state.settings.clone(),
            lut: state.lut.clone(),
            output_dir: state.output_dir.clone(),
            is_processing: state.is_processing,
            current_file_index: state.current_file_index,
            stats: BatchStats::from_files(&state.files),
            overall_progress: overall_progress(&state.files),
        }
    }

    /// The FFmpeg command a file would be encoded with under the current settings.
    pub fn command_preview(&self, job_id: &JobId) -> Result<String, AppError> {
        let state = self.shared.state.lock();
        let file = state
            .files
            .iter()
            .find(|f| &f.id == job_id)
            .ok_or_else(|| AppError::invalid_input(format!("Unknown job {}", job_id)))?;
        Ok(state.render_command(file))
    }

    /// Command preview for a file that is not in the batch. Size-targeting methods fall
    /// back to constant quality since the duration is unknown.
    pub fn command_preview_for(&self, source: MediaSource) -> String {
        let size = source.byte_len().unwrap_or(0);
        let file = VideoFile::new(JobId::from("preview"), source, size);
        self.shared.state.lock().render_command(&file)
    }

    /// Store a progress report for a processing file (monotonic, clamped to 100).
    pub fn record_progress(&self, job_id: &JobId, percent: u8) {
        let changed = {
            let mut state = self.shared.state.lock();
            match state.file_mut(job_id) {
                Some(f) => f.record_progress(percent).then(|| f.clone()),
                None => None,
            }
        };
        if let Some(file) = changed {
            log::trace!(
                target: "batchvideo::batch",
                "progress {}: {}%",
                job_id,
                file.progress
            );
            self.notify(BatchEvent::FileChanged(file));
        }
    }

    /// Probe duration and thumbnail for one file, then refresh its prediction.
    /// Probe failures are logged and recorded as duration 0.
    pub async fn probe_file(&self, job_id: &JobId) -> Result<(), AppError> {
        let source = self
            .file(job_id)
            .map(|f| f.source)
            .ok_or_else(|| AppError::invalid_input(format!("Unknown job {}", job_id)))?;
        let engine = Arc::clone(&self.shared.engine);
        let (probe, thumbnail) = tokio::task::spawn_blocking(move || {
            let probe = engine.probe(&source);
            let thumbnail = engine.thumbnail(&source);
            (probe, thumbnail)
        })
        .await
        .map_err(|e| AppError::Probe(format!("probe task failed: {}", e)))?;

        let duration = match probe {
            Ok(result) => result.duration_secs,
            Err(e) => {
                log::warn!(
                    target: "batchvideo::batch",
                    "metadata probe failed for {}: {}",
                    job_id,
                    e
                );
                0.0
            }
        };

        let updated = {
            let mut state = self.shared.state.lock();
            let settings = state.settings.clone();
            state.file_mut(job_id).map(|f| {
                f.duration = Some(duration);
                if let Some(bytes) = thumbnail {
                    f.thumbnail = Some(Arc::from(bytes));
                }
                f.predicted_size = predict_output_size(f.size, f.duration, &settings);
                f.clone()
            })
        };
        if let Some(file) = updated {
            self.notify(BatchEvent::FileChanged(file));
        }
        Ok(())
    }

    /// Probe files in the background. Needs a tokio runtime; without one nothing is probed.
    pub fn spawn_probes(&self, job_ids: Vec<JobId>) -> Vec<JoinHandle<()>> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!(
                target: "batchvideo::batch",
                "no async runtime; skipping metadata probes"
            );
            return Vec::new();
        };
        job_ids
            .into_iter()
            .map(|job_id| {
                let this = self.clone();
                handle.spawn(async move {
                    if let Err(e) = this.probe_file(&job_id).await {
                        log::warn!(
                            target: "batchvideo::batch",
                            "probe for {} abandoned: {}",
                            job_id,
                            e
                        );
                    }
                })
            })
            .collect()
    }

    /// Stop the batch: no further files start, and running jobs are terminated.
    /// Returns how many jobs were running.
    pub fn cancel(&self) -> usize {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        let count = self.shared.registry.cancel_all();
        log::info!(
            target: "batchvideo::batch",
            "batch cancelled ({} running job(s) terminated)",
            count
        );
        count
    }

    /// Stop one running file. The rest of the batch continues. Returns whether the file was
    /// processing; a job that has not reached the engine yet is cancelled before it starts.
    pub fn cancel_file(&self, job_id: &JobId) -> bool {
        {
            let mut state = self.shared.state.lock();
            let running = state
                .files
                .iter()
                .any(|f| &f.id == job_id && f.status == FileStatus::Processing);
            if !running {
                return false;
            }
            state.cancelled_jobs.insert(job_id.clone());
        }
        if !self.shared.registry.cancel(job_id) {
            log::debug!(
                target: "batchvideo::batch",
                "{} not registered yet; cancelled before start",
                job_id
            );
        }
        true
    }

    /// Encode every file that is not already completed, one at a time, in insertion order.
    ///
    /// Per-file failures never stop the batch; they are recorded on the file. An error is
    /// returned only when the batch itself could not run.
    pub async fn run_batch(&self) -> Result<BatchSummary, AppError> {
        let ids: Vec<JobId> = {
            let mut state = self.shared.state.lock();
            if state.is_processing {
                return Err(AppError::BatchInProgress);
            }
            state.is_processing = true;
            state.cancelled_jobs.clear();
            state.files.iter().map(|f| f.id.clone()).collect()
        };
        self.shared.cancelled.store(false, Ordering::SeqCst);
        let _guard = ProcessingGuard {
            orchestrator: self.clone(),
        };
        self.notify(BatchEvent::ProcessingChanged(true));
        log::info!(
            target: "batchvideo::batch",
            "batch started: {} file(s)",
            ids.len()
        );

        let mut summary = BatchSummary::default();
        for (index, job_id) in ids.iter().enumerate() {
            match self.process_file(index, job_id).await? {
                FileOutcome::Completed => summary.completed += 1,
                FileOutcome::Failed => summary.failed += 1,
                FileOutcome::Cancelled => summary.cancelled += 1,
                FileOutcome::Skipped => summary.skipped += 1,
            }
        }

        log::info!(
            target: "batchvideo::batch",
            "batch finished: {} completed, {} failed, {} cancelled, {} skipped",
            summary.completed,
            summary.failed,
            summary.cancelled,
            summary.skipped
        );
        Ok(summary)
    }

    async fn process_file(&self, index: usize, job_id: &JobId) -> Result<FileOutcome, AppError> {
        let (job, started) = {
            let mut state = self.shared.state.lock();
            let Some(pos) = state.files.iter().position(|f| &f.id == job_id) else {
                // Removed after the batch started.
                return Ok(FileOutcome::Skipped);
            };
            if state.files[pos].status == FileStatus::Completed {
                return Ok(FileOutcome::Skipped);
            }
            if self.shared.cancelled.load(Ordering::SeqCst) {
                // Files left in error from an earlier run keep their message.
                if state.files[pos].status != FileStatus::Pending {
                    return Ok(FileOutcome::Skipped);
                }
                let file = &mut state.files[pos];
                file.cancel();
                let file = file.clone();
                drop(state);
                self.notify(BatchEvent::FileChanged(file));
                return Ok(FileOutcome::Cancelled);
            }

            state.current_file_index = Some(index);
            let params = state.encode_params(&state.files[pos]);
            let output = output_path_for(&state.files[pos].source, state.output_dir.as_deref());
            let file = &mut state.files[pos];
            file.mark_processing();
            let job = EngineJob {
                job_id: job_id.clone(),
                source: file.source.clone(),
                params,
                output,
                duration_secs: file.duration.filter(|d| *d > 0.0),
            };
            (job, file.clone())
        };
        self.notify(BatchEvent::FileChanged(started));
        log::info!(
            target: "batchvideo::batch",
            "processing {} ({}): {:?}",
            job_id,
            index,
            job.params
        );

        let engine = Arc::clone(&self.shared.engine);
        engine.reserve(job_id);
        let handle = Arc::new(EngineJobHandle::new(Arc::clone(&engine), job_id.clone()));
        if let Err(e) = self.shared.registry.register(job_id.clone(), handle) {
            engine.release(job_id);
            log::error!(target: "batchvideo::batch", "{}", e);
            self.finish_file(job_id, |f| f.fail(e.to_string(), FailureKind::Failed));
            return Ok(FileOutcome::Failed);
        }

        // A cancel or removal that landed before registration never reached the engine.
        let (cancelled, removed) = {
            let mut state = self.shared.state.lock();
            let cancelled =
                self.shared.cancelled.load(Ordering::SeqCst) || state.cancelled_jobs.remove(job_id);
            (cancelled, !state.files.iter().any(|f| &f.id == job_id))
        };
        if cancelled || removed {
            self.shared.registry.release(job_id);
            engine.release(job_id);
            if removed {
                return Ok(FileOutcome::Skipped);
            }
            log::info!(target: "batchvideo::batch", "{} cancelled before start", job_id);
            self.finish_file(job_id, VideoFile::cancel);
            return Ok(FileOutcome::Cancelled);
        }

        let this = self.clone();
        let progress_id = job_id.clone();
        let on_progress: ProgressCallback =
            Arc::new(move |percent| this.record_progress(&progress_id, percent));
        let result = {
            let engine = Arc::clone(&engine);
            tokio::task::spawn_blocking(move || engine.run(&job, on_progress)).await
        };
        self.shared.registry.release(job_id);
        engine.release(job_id);

        let result = match result {
            Ok(result) => result,
            Err(join_error) => {
                log::error!(
                    target: "batchvideo::batch",
                    "engine task for {} failed: {}",
                    job_id,
                    join_error
                );
                self.finish_file(job_id, |f| f.fail(GENERIC_FAILURE_MESSAGE, FailureKind::Failed));
                return Err(AppError::Batch(format!(
                    "Engine task for {} failed: {}",
                    job_id, join_error
                )));
            }
        };

        let cancelled = self.shared.cancelled.load(Ordering::SeqCst)
            || self.shared.state.lock().cancelled_jobs.remove(job_id);
        Ok(self.settle(job_id, result, cancelled))
    }

    fn settle(
        &self,
        job_id: &JobId,
        result: Result<EngineOutput, AppError>,
        cancelled: bool,
    ) -> FileOutcome {
        match result {
            Ok(_) | Err(AppError::Aborted) if cancelled => {
                log::info!(target: "batchvideo::batch", "{} cancelled", job_id);
                self.finish_file(job_id, VideoFile::cancel);
                FileOutcome::Cancelled
            }
            Err(AppError::Aborted) => {
                log::info!(target: "batchvideo::batch", "{} terminated", job_id);
                self.finish_file(job_id, VideoFile::cancel);
                FileOutcome::Cancelled
            }
            Ok(output) => {
                log::info!(
                    target: "batchvideo::batch",
                    "{} completed: {} ({} bytes)",
                    job_id,
                    output.location.display(),
                    output.size_bytes
                );
                self.finish_file(job_id, |f| f.complete(output));
                FileOutcome::Completed
            }
            Err(e) => {
                log::error!(target: "batchvideo::batch", "{} failed: {}", job_id, e);
                let message = failure_message(&e);
                self.finish_file(job_id, |f| f.fail(message, FailureKind::Failed));
                FileOutcome::Failed
            }
        }
    }

    fn finish_file(&self, job_id: &JobId, apply: impl FnOnce(&mut VideoFile)) {
        let updated = {
            let mut state = self.shared.state.lock();
            state.file_mut(job_id).map(|f| {
                apply(f);
                f.clone()
            })
        };
        if let Some(file) = updated {
            self.notify(BatchEvent::FileChanged(file));
        }
    }
}
