use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TEMP_PREFIX: &str = "batchvideo-";

/// Generates a short suffix for temp filenames. For uniqueness only, not security.
fn random_alphanumeric_suffix(len: usize) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    static STATE: AtomicU64 = AtomicU64::new(0);
    let mut s = String::with_capacity(len);
    for _ in 0..len {
        let idx = STATE.fetch_add(1, Ordering::Relaxed) as usize % CHARS.len();
        s.push(CHARS[idx] as char);
    }
    s
}

/// Creates uniquely named files in a scratch directory (the system temp dir by default).
#[derive(Debug, Clone)]
pub struct TempFileManager {
    dir: PathBuf,
}

impl Default for TempFileManager {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir(),
        }
    }
}

impl TempFileManager {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// New path `batchvideo-<millis>-<rand>-<suffix>`, written with `content` when given.
    pub fn create(&self, suffix: &str, content: Option<&[u8]>) -> io::Result<TempFile> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let name = format!(
            "{}{}-{}-{}",
            TEMP_PREFIX,
            millis,
            random_alphanumeric_suffix(9),
            suffix
        );
        let path = self.dir.join(name);
        if let Some(data) = content {
            fs::write(&path, data)?;
        }
        Ok(TempFile { path, keep: false })
    }
}

/// A temp file removed when dropped.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    keep: bool,
}

impl TempFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file on disk and hand back its path.
    pub fn persist(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            log::warn!(
                target: "batchvideo::ffmpeg::temp",
                "failed to remove temp file {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Remove our temp files older than `max_age` left behind by earlier runs. Returns the count removed.
pub fn cleanup_old_temp_files(max_age: Duration) -> usize {
    cleanup_old_temp_files_in(&std::env::temp_dir(), max_age)
}

pub fn cleanup_old_temp_files_in(dir: &Path, max_age: Duration) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }
        let is_stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age >= max_age);
        if is_stale && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        log::info!(
            target: "batchvideo::ffmpeg::temp",
            "removed {} stale temp file(s) from {}",
            removed,
            dir.display()
        );
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = TempFileManager::in_dir(dir.path());
        let file = manager.create("clip.mp4", Some(b"data")).expect("create");
        let path = file.path().to_path_buf();
        assert!(path.exists());
        assert!(
            path.file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with(TEMP_PREFIX))
        );
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn persisted_file_survives_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = TempFileManager::in_dir(dir.path());
        let path = manager.create("thumb.jpg", Some(b"jpg")).expect("create").persist();
        assert!(path.exists());
    }

    #[test]
    fn names_are_unique() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = TempFileManager::in_dir(dir.path());
        let a = manager.create("x", None).expect("a");
        let b = manager.create("x", None).expect("b");
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn cleanup_only_touches_prefixed_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ours = dir.path().join(format!("{}old.mp4", TEMP_PREFIX));
        let theirs = dir.path().join("keep.mp4");
        fs::write(&ours, b"1").expect("write");
        fs::write(&theirs, b"2").expect("write");
        assert_eq!(cleanup_old_temp_files_in(dir.path(), Duration::ZERO), 1);
        assert!(!ours.exists());
        assert!(theirs.exists());
    }

    #[test]
    fn cleanup_keeps_fresh_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ours = dir.path().join(format!("{}new.mp4", TEMP_PREFIX));
        fs::write(&ours, b"1").expect("write");
        assert_eq!(
            cleanup_old_temp_files_in(dir.path(), Duration::from_secs(3600)),
            0
        );
        assert!(ours.exists());
    }
}
