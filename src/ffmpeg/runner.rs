//! FFmpeg process spawning and progress parsing.
//!
//! Spawns FFmpeg as a child process, parses progress from stdout (pipe:1) and keeps a
//! bounded stderr tail for error reporting. Reader threads drain both pipes while the
//! calling thread waits for them to close.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};

#[cfg(windows)]
use std::os::windows::process::CommandExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::discovery::get_ffmpeg_path;
use super::progress::parse_ffmpeg_progress;
use crate::error::AppError;
use crate::media::JobId;

/// AtomicU64 cannot hold Option<f64>, so duration is stored as f64 bits; u64::MAX means unknown.
const NONE_DURATION_BITS: u64 = u64::MAX;

/// Minimum interval between progress callbacks.
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(150);
/// Keep only the last N bytes of stderr.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Receives progress as a fraction in [0,1].
pub type FractionCallback = Arc<dyn Fn(f64) + Send + Sync>;

enum Slot {
    /// Claimed for a job whose process has not been spawned yet.
    Reserved,
    Running(Child),
    /// Terminated before or while running; the runner reports `Aborted`.
    Killed,
}

/// FFmpeg children keyed by job. Terminating a job leaves a `Killed` slot behind, which is how
/// the runner learns the job was aborted, including when the kill lands before the spawn.
#[derive(Clone, Default)]
pub struct ProcessTable {
    slots: Arc<Mutex<HashMap<JobId, Slot>>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a slot for a job about to run, so an early terminate is remembered.
    /// A slot left over from an earlier run of the same id is replaced.
    pub fn reserve(&self, job_id: &JobId) {
        let mut slots = self.slots.lock();
        if !matches!(slots.get(job_id), Some(Slot::Running(_))) {
            slots.insert(job_id.clone(), Slot::Reserved);
        }
    }

    /// Drop whatever is left of a job's slot once it is no longer cancellable.
    pub fn release(&self, job_id: &JobId) {
        let removed = self.slots.lock().remove(job_id);
        if let Some(Slot::Running(mut child)) = removed {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    pub fn is_running(&self, job_id: &JobId) -> bool {
        matches!(self.slots.lock().get(job_id), Some(Slot::Running(_)))
    }

    /// Whether a terminate reached this job before its process finished.
    pub fn is_killed(&self, job_id: &JobId) -> bool {
        matches!(self.slots.lock().get(job_id), Some(Slot::Killed))
    }

    /// Number of live processes.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Running(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn attach(&self, job_id: &JobId, child: Child) -> Result<(), (AppError, Child)> {
        let mut slots = self.slots.lock();
        match slots.get(job_id) {
            Some(Slot::Killed) => Err((AppError::aborted(), child)),
            Some(Slot::Running(_)) => Err((AppError::DuplicateJob(job_id.clone()), child)),
            Some(Slot::Reserved) | None => {
                slots.insert(job_id.clone(), Slot::Running(child));
                Ok(())
            }
        }
    }

    /// Take the child back once its pipes closed. None means the job was killed.
    fn detach(&self, job_id: &JobId) -> Option<Child> {
        let mut slots = self.slots.lock();
        match slots.remove(job_id) {
            Some(Slot::Running(child)) => Some(child),
            Some(Slot::Killed) => {
                slots.insert(job_id.clone(), Slot::Killed);
                None
            }
            _ => None,
        }
    }

    /// Kill one job's process, or mark a reserved job so it never spawns.
    /// Returns whether the job was live in the table.
    pub fn terminate(&self, job_id: &JobId) -> bool {
        let mut child = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(job_id) else {
                return false;
            };
            match std::mem::replace(slot, Slot::Killed) {
                Slot::Running(child) => child,
                Slot::Reserved => {
                    log::info!(
                        target: "batchvideo::ffmpeg::runner",
                        "Job {} cancelled before FFmpeg started",
                        job_id
                    );
                    return true;
                }
                Slot::Killed => return false,
            }
        };
        log::info!(
            target: "batchvideo::ffmpeg::runner",
            "Terminating FFmpeg for job {}",
            job_id
        );
        let _ = child.kill();
        let _ = child.wait();
        true
    }
}

struct ReadStreamConfig {
    collect_stderr: Option<Arc<Mutex<Vec<u8>>>>,
    duration: Arc<AtomicU64>,
    progress_callback: Option<FractionCallback>,
}

fn read_stream<R: std::io::Read + Send + 'static>(
    reader: R,
    config: ReadStreamConfig,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let load_duration = || {
            let bits = config.duration.load(Ordering::Relaxed);
            if bits == NONE_DURATION_BITS {
                None
            } else {
                Some(f64::from_bits(bits))
            }
        };
        let mut last_emit = Instant::now();
        let mut last_progress = 0.0_f64;
        let mut stream_reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while stream_reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            let line = String::from_utf8_lossy(&line_buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(ref buf) = config.collect_stderr {
                let mut guard = buf.lock();
                guard.extend_from_slice(line.as_bytes());
                guard.push(b'\n');
                if guard.len() > MAX_STDERR_BYTES {
                    let excess = guard.len() - MAX_STDERR_BYTES;
                    guard.drain(..excess);
                }
            }
            // Duration may be learned on stderr while progress arrives on stdout.
            let (progress, d) = parse_ffmpeg_progress(line, load_duration());
            if let Some(new_dur) = d {
                config.duration.store(new_dur.to_bits(), Ordering::Relaxed);
            }
            if let Some(p) = progress
                && let Some(ref cb) = config.progress_callback
            {
                let now = Instant::now();
                let should_emit = now.duration_since(last_emit) >= PROGRESS_EMIT_INTERVAL
                    || (p - last_progress).abs() >= 0.01
                    || p >= 1.0;
                if should_emit {
                    last_emit = now;
                    last_progress = p;
                    cb(p);
                }
            }
            line_buf.clear();
        }
    })
}

/// Run FFmpeg for `job_id` and block until it exits.
///
/// The child is parked in `table` while it runs so [`ProcessTable::terminate`] can kill it;
/// a job killed that way returns [`AppError::Aborted`]. So does a job terminated after
/// [`ProcessTable::reserve`] but before the spawn, without starting FFmpeg at all.
///
/// `duration_secs` seeds progress so `out_time_ms` lines can be turned into a fraction before
/// FFmpeg prints its own `Duration:` line.
pub fn run_ffmpeg_blocking(
    args: &[String],
    job_id: &JobId,
    table: &ProcessTable,
    duration_secs: Option<f64>,
    progress_callback: Option<FractionCallback>,
) -> Result<(), AppError> {
    if table.is_killed(job_id) {
        return Err(AppError::aborted());
    }
    let ffmpeg_path = get_ffmpeg_path()?;

    let input_arg = args
        .iter()
        .position(|a| a == "-i")
        .and_then(|i| args.get(i + 1));
    log::debug!(
        target: "batchvideo::ffmpeg::runner",
        "Spawning FFmpeg: job={}, path={}, input={:?}, output={:?}",
        job_id,
        ffmpeg_path.display(),
        input_arg,
        args.last()
    );

    let mut cmd = Command::new(ffmpeg_path);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::ffmpeg_failed(-1, format!("Failed to spawn FFmpeg: {}", e)))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(AppError::ffmpeg_failed(-1, "Failed to capture FFmpeg output"));
    };

    if let Err((e, mut child)) = table.attach(job_id, child) {
        let _ = child.kill();
        let _ = child.wait();
        return Err(e);
    }

    let duration = Arc::new(AtomicU64::new(
        duration_secs
            .filter(|&d| d > 0.0)
            .map(f64::to_bits)
            .unwrap_or(NONE_DURATION_BITS),
    ));
    let stderr_buffer = Arc::new(Mutex::new(Vec::new()));

    let stdout_handle = read_stream(
        stdout,
        ReadStreamConfig {
            collect_stderr: None,
            duration: Arc::clone(&duration),
            progress_callback,
        },
    );
    let stderr_handle = read_stream(
        stderr,
        ReadStreamConfig {
            collect_stderr: Some(Arc::clone(&stderr_buffer)),
            duration: Arc::clone(&duration),
            progress_callback: None,
        },
    );

    let _ = stdout_handle.join();
    let _ = stderr_handle.join();

    let status = match table.detach(job_id) {
        Some(mut c) => c.wait()?,
        None => {
            log::warn!(
                target: "batchvideo::ffmpeg::runner",
                "FFmpeg for job {} was terminated",
                job_id
            );
            return Err(AppError::aborted());
        }
    };

    let stderr_str = String::from_utf8_lossy(&stderr_buffer.lock()).to_string();

    if status.success() {
        log::info!(
            target: "batchvideo::ffmpeg::runner",
            "FFmpeg completed: job={}",
            job_id
        );
        Ok(())
    } else {
        let code = status.code().unwrap_or(-1);
        let err_preview = stderr_str
            .lines()
            .rev()
            .take(3)
            .collect::<Vec<_>>()
            .join("; ");
        log::error!(
            target: "batchvideo::ffmpeg::runner",
            "FFmpeg failed: job={}, code={}: {}",
            job_id,
            code,
            err_preview
        );
        Err(AppError::FfmpegFailed {
            code,
            stderr: stderr_str,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate_unknown_job_is_false() {
        let table = ProcessTable::new();
        assert!(!table.terminate(&JobId::from("missing")));
        assert!(!table.is_killed(&JobId::from("missing")));
        assert!(table.is_empty());
    }

    #[test]
    fn terminate_before_spawn_aborts_the_run() {
        let table = ProcessTable::new();
        let id = JobId::from("early");
        table.reserve(&id);
        assert!(table.terminate(&id));
        assert!(table.is_killed(&id));
        assert!(!table.terminate(&id));

        let args = vec!["-version".to_string()];
        assert!(matches!(
            run_ffmpeg_blocking(&args, &id, &table, None, None),
            Err(AppError::Aborted)
        ));
        assert!(table.is_empty());

        table.release(&id);
        assert!(!table.is_killed(&id));
    }

    #[test]
    fn reserve_clears_a_stale_kill() {
        let table = ProcessTable::new();
        let id = JobId::from("retry");
        table.reserve(&id);
        assert!(table.terminate(&id));
        table.reserve(&id);
        assert!(!table.is_killed(&id));
        table.release(&id);
    }

    #[cfg(unix)]
    #[test]
    fn terminate_kills_only_the_named_job() {
        let table = ProcessTable::new();
        let a = JobId::from("a");
        let b = JobId::from("b");
        for id in [&a, &b] {
            let child = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
            assert!(table.attach(id, child).is_ok());
        }
        assert!(table.terminate(&a));
        assert!(!table.is_running(&a));
        assert!(table.is_killed(&a));
        assert!(table.is_running(&b));
        assert!(!table.terminate(&a));
        assert!(table.detach(&a).is_none());
        assert!(table.terminate(&b));
        assert!(table.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn killed_slot_rejects_a_late_spawn() {
        let table = ProcessTable::new();
        let id = JobId::from("late");
        table.reserve(&id);
        assert!(table.terminate(&id));
        let child = Command::new("sleep").arg("30").spawn().expect("spawn");
        match table.attach(&id, child) {
            Err((AppError::Aborted, mut child)) => {
                let _ = child.kill();
                let _ = child.wait();
            }
            _ => panic!("expected the killed slot to refuse the child"),
        }
        assert!(table.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn duplicate_attach_is_rejected() {
        let table = ProcessTable::new();
        let id = JobId::from("dup");
        let first = Command::new("sleep").arg("30").spawn().expect("spawn");
        assert!(table.attach(&id, first).is_ok());
        let second = Command::new("sleep").arg("30").spawn().expect("spawn");
        match table.attach(&id, second) {
            Err((AppError::DuplicateJob(dup), mut child)) => {
                assert_eq!(dup, id);
                let _ = child.kill();
                let _ = child.wait();
            }
            _ => panic!("expected duplicate rejection"),
        }
        assert!(table.terminate(&id));
        assert!(table.is_empty());
    }
}
