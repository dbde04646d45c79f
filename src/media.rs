//! Inputs to a batch: job ids, video sources, LUT files, and where outputs land.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const ACCEPTED_VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mts", "m4v", "avi", "mkv"];
pub const ACCEPTED_LUT_EXTENSIONS: &[&str] = &["cube"];

/// Opaque per-file job identifier, unique within a batch-add event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// `<millis>-<index>`, one timestamp per add event.
    pub fn generate(timestamp_ms: u128, index: usize) -> Self {
        Self(format!("{}-{}", timestamp_ms, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where a video comes from: a file on disk (native) or bytes already in memory.
#[derive(Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaSource {
    Path {
        path: PathBuf,
    },
    Memory {
        name: String,
        #[serde(skip)]
        bytes: Arc<[u8]>,
    },
}

impl MediaSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path { path: path.into() }
    }

    pub fn memory(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Memory {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// File name shown to the user.
    pub fn name(&self) -> String {
        match self {
            Self::Path { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string_lossy().to_string()),
            Self::Memory { name, .. } => name.clone(),
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path { path } => Some(path),
            Self::Memory { .. } => None,
        }
    }

    /// Byte size of the source as it is now.
    pub fn byte_len(&self) -> Result<u64, AppError> {
        match self {
            Self::Path { path } => Ok(fs::metadata(path)?.len()),
            Self::Memory { bytes, .. } => Ok(bytes.len() as u64),
        }
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path { path } => f.debug_tuple("Path").field(path).finish(),
            Self::Memory { name, bytes } => f
                .debug_struct("Memory")
                .field("name", name)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

/// A `.cube` 3D LUT on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LutFile(PathBuf);

impl LutFile {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let name = path.to_string_lossy();
        if !is_valid_lut_file(&name) {
            return Err(AppError::invalid_input(format!(
                "LUT file must have a .cube extension: {}",
                path.display()
            )));
        }
        Ok(Self(path))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

fn has_extension(file_name: &str, allowed: &[&str]) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

pub fn is_valid_video_file(file_name: &str) -> bool {
    has_extension(file_name, ACCEPTED_VIDEO_EXTENSIONS)
}

pub fn is_valid_lut_file(file_name: &str) -> bool {
    has_extension(file_name, ACCEPTED_LUT_EXTENSIONS)
}

/// Output location for a processed file.
///
/// Files on disk become `<stem>_processed.mp4` next to the input (or in `output_dir`);
/// in-memory sources become `processed_<name>` in `output_dir` or the temp directory.
pub fn output_path_for(source: &MediaSource, output_dir: Option<&Path>) -> PathBuf {
    match source {
        MediaSource::Path { path } => {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "output".to_string());
            let dir = output_dir
                .map(Path::to_path_buf)
                .or_else(|| path.parent().map(Path::to_path_buf))
                .unwrap_or_default();
            dir.join(format!("{}_processed.mp4", stem))
        }
        MediaSource::Memory { name, .. } => {
            let dir = output_dir
                .map(Path::to_path_buf)
                .unwrap_or_else(std::env::temp_dir);
            dir.join(format!("processed_{}", name))
        }
    }
}
