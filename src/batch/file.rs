use std::path::PathBuf;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::engine::EngineOutput;
use crate::media::{JobId, MediaSource};

pub const CANCELLED_MESSAGE: &str = "Cancelled by user";
pub const GENERIC_FAILURE_MESSAGE: &str = "Processing failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

/// Why a file ended in [`FileStatus::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Cancelled,
    Failed,
}

fn serialize_present<S: Serializer>(thumb: &Option<Arc<[u8]>>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_bool(thumb.is_some())
}

/// One item in the batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFile {
    pub id: JobId,
    pub name: String,
    pub source: MediaSource,
    pub size: u64,
    /// Seconds; None until probed, 0 when probing failed.
    pub duration: Option<f64>,
    #[serde(rename = "hasThumbnail", serialize_with = "serialize_present")]
    pub thumbnail: Option<Arc<[u8]>>,
    pub status: FileStatus,
    pub progress: u8,
    pub output: Option<PathBuf>,
    pub output_size: Option<u64>,
    pub predicted_size: Option<u64>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
}

impl VideoFile {
    pub fn new(id: JobId, source: MediaSource, size: u64) -> Self {
        Self {
            id,
            name: source.name(),
            source,
            size,
            duration: None,
            thumbnail: None,
            status: FileStatus::Pending,
            progress: 0,
            output: None,
            output_size: None,
            predicted_size: None,
            error: None,
            failure: None,
        }
    }

    pub(crate) fn mark_processing(&mut self) {
        self.status = FileStatus::Processing;
        self.progress = 0;
        self.output = None;
        self.output_size = None;
        self.error = None;
        self.failure = None;
    }

    /// Applies an engine progress report. Ignored unless processing; never moves backwards.
    /// Returns whether the stored value changed.
    pub(crate) fn record_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if self.status != FileStatus::Processing || percent <= self.progress {
            return false;
        }
        self.progress = percent;
        true
    }

    pub(crate) fn complete(&mut self, output: EngineOutput) {
        self.status = FileStatus::Completed;
        self.progress = 100;
        self.output = Some(output.location);
        self.output_size = Some(output.size_bytes);
        self.error = None;
        self.failure = None;
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>, kind: FailureKind) {
        let message = message.into();
        self.status = FileStatus::Error;
        self.error = Some(if message.trim().is_empty() {
            GENERIC_FAILURE_MESSAGE.to_string()
        } else {
            message
        });
        self.failure = Some(kind);
    }

    pub(crate) fn cancel(&mut self) {
        self.fail(CANCELLED_MESSAGE, FailureKind::Cancelled);
    }

    pub fn is_cancelled(&self) -> bool {
        self.failure == Some(FailureKind::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
}

impl BatchStats {
    pub fn from_files(files: &[VideoFile]) -> Self {
        let count = |status| files.iter().filter(|f| f.status == status).count();
        Self {
            total: files.len(),
            pending: count(FileStatus::Pending),
            processing: count(FileStatus::Processing),
            completed: count(FileStatus::Completed),
            error: count(FileStatus::Error),
        }
    }
}

/// Mean completion over the batch: completed files count 100, processing files their progress.
pub fn overall_progress(files: &[VideoFile]) -> u8 {
    if files.is_empty() {
        return 0;
    }
    let total: u64 = files
        .iter()
        .map(|f| match f.status {
            FileStatus::Completed => 100,
            FileStatus::Processing => u64::from(f.progress.min(100)),
            FileStatus::Pending | FileStatus::Error => 0,
        })
        .sum();
    (total as f64 / files.len() as f64).round().clamp(0.0, 100.0) as u8
}
