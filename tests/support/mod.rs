#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use batchvideo_core::batch::{BatchEvent, BatchOrchestrator};
use batchvideo_core::engine::{Engine, EngineJob, EngineOutput, ProbeResult, ProgressCallback};
use batchvideo_core::error::AppError;
use batchvideo_core::media::{JobId, MediaSource};
use parking_lot::{Condvar, Mutex};

pub const OUTPUT_SIZE: u64 = 1_000;
const HOLD_TIMEOUT: Duration = Duration::from_secs(10);

/// What the scripted engine does for one file name.
#[derive(Debug, Clone)]
pub enum Script {
    /// Reports the given percentages, then succeeds.
    Progress(Vec<u8>),
    /// Exits like FFmpeg with a non-zero code.
    Fail { code: i32, stderr: String },
    /// Reports `at` percent, then waits for [`ScriptedEngine::release`] or a terminate.
    Hold { at: u8, on_terminate: HoldEnd },
    /// Takes `delay` to get going before spawning anything, then succeeds. A terminate that
    /// arrives meanwhile aborts the job before it spawns.
    SlowStart { delay: Duration },
    /// The engine call panics.
    Panic,
}

/// How a held job ends when it is terminated.
#[derive(Debug, Clone, Copy)]
pub enum HoldEnd {
    Aborted,
    /// The process finished just as it was killed.
    Succeeded,
}

impl Script {
    pub fn fail(code: i32, stderr: &str) -> Self {
        Script::Fail {
            code,
            stderr: stderr.to_string(),
        }
    }

    pub fn hold(at: u8) -> Self {
        Script::Hold {
            at,
            on_terminate: HoldEnd::Aborted,
        }
    }
}

#[derive(Default)]
struct Gates {
    reserved: HashSet<JobId>,
    killed: HashSet<JobId>,
    starting: HashSet<String>,
    active: HashSet<JobId>,
    holding: HashSet<String>,
    released: HashSet<String>,
    terminated: HashSet<JobId>,
}

/// In-process [`Engine`] that follows a per-file script and records what it was asked to do.
#[derive(Default)]
pub struct ScriptedEngine {
    scripts: Mutex<HashMap<String, Script>>,
    runs: Mutex<Vec<String>>,
    spawns: Mutex<Vec<String>>,
    params: Mutex<HashMap<String, Vec<String>>>,
    terminations: Mutex<Vec<JobId>>,
    gates: Mutex<Gates>,
    changed: Condvar,
    /// None makes every probe fail.
    probe_duration: Mutex<Option<f64>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, name: &str, script: Script) {
        self.scripts.lock().insert(name.to_string(), script);
    }

    pub fn set_probe_duration(&self, duration: Option<f64>) {
        *self.probe_duration.lock() = duration;
    }

    /// File names in the order they were run.
    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().clone()
    }

    /// File names whose job got past startup, in order.
    pub fn spawns(&self) -> Vec<String> {
        self.spawns.lock().clone()
    }

    /// Encoder parameters the last run of `name` received.
    pub fn params(&self, name: &str) -> Option<Vec<String>> {
        self.params.lock().get(name).cloned()
    }

    pub fn terminations(&self) -> Vec<JobId> {
        self.terminations.lock().clone()
    }

    /// Let a held job finish successfully.
    pub fn release(&self, name: &str) {
        self.gates.lock().released.insert(name.to_string());
        self.changed.notify_all();
    }

    /// Block until the named file is held, or give up after a timeout.
    pub fn wait_until_holding(&self, name: &str) -> bool {
        let mut gates = self.gates.lock();
        while !gates.holding.contains(name) {
            if self.changed.wait_for(&mut gates, HOLD_TIMEOUT).timed_out() {
                return gates.holding.contains(name);
            }
        }
        true
    }

    /// Block until the named file is inside a slow start, or give up after a timeout.
    pub fn wait_until_starting(&self, name: &str) -> bool {
        let mut gates = self.gates.lock();
        while !gates.starting.contains(name) {
            if self.changed.wait_for(&mut gates, HOLD_TIMEOUT).timed_out() {
                return gates.starting.contains(name);
            }
        }
        true
    }

    /// Sleeps through startup; false means the job was terminated before it spawned.
    fn start(&self, job: &EngineJob, name: &str, delay: Duration) -> bool {
        self.gates.lock().starting.insert(name.to_string());
        self.changed.notify_all();
        // A terminate does not cut startup short.
        thread::sleep(delay);
        let mut gates = self.gates.lock();
        gates.starting.remove(name);
        !gates.killed.contains(&job.job_id)
    }

    fn output(job: &EngineJob) -> EngineOutput {
        EngineOutput {
            location: job.output.clone(),
            size_bytes: OUTPUT_SIZE,
        }
    }

    fn hold(
        &self,
        job: &EngineJob,
        name: &str,
        at: u8,
        on_terminate: HoldEnd,
        on_progress: &ProgressCallback,
    ) -> Result<EngineOutput, AppError> {
        on_progress(at);
        let mut gates = self.gates.lock();
        gates.holding.insert(name.to_string());
        self.changed.notify_all();
        loop {
            if gates.terminated.remove(&job.job_id) {
                gates.holding.remove(name);
                return match on_terminate {
                    HoldEnd::Aborted => Err(AppError::Aborted),
                    HoldEnd::Succeeded => Ok(Self::output(job)),
                };
            }
            if gates.released.remove(name) {
                gates.holding.remove(name);
                drop(gates);
                on_progress(100);
                return Ok(Self::output(job));
            }
            if self.changed.wait_for(&mut gates, HOLD_TIMEOUT).timed_out() {
                gates.holding.remove(name);
                return Err(AppError::from("held job was never released"));
            }
        }
    }
}

impl Engine for ScriptedEngine {
    fn probe(&self, _source: &MediaSource) -> Result<ProbeResult, AppError> {
        match *self.probe_duration.lock() {
            Some(duration_secs) => Ok(ProbeResult {
                duration_secs,
                width: 1920,
                height: 1080,
                bitrate_kbps: Some(8_000),
            }),
            None => Err(AppError::Probe("scripted probe failure".into())),
        }
    }

    fn thumbnail(&self, _source: &MediaSource) -> Option<Vec<u8>> {
        self.probe_duration.lock().map(|_| vec![0xFF, 0xD8, 0xFF])
    }

    fn run(&self, job: &EngineJob, on_progress: ProgressCallback) -> Result<EngineOutput, AppError> {
        let name = job.source.name();
        self.runs.lock().push(name.clone());
        self.params.lock().insert(name.clone(), job.params.clone());
        let script = self
            .scripts
            .lock()
            .get(&name)
            .cloned()
            .unwrap_or_else(|| Script::Progress(vec![50]));
        if let Script::SlowStart { delay } = script
            && !self.start(job, &name, delay)
        {
            return Err(AppError::Aborted);
        }
        {
            let mut gates = self.gates.lock();
            if gates.killed.contains(&job.job_id) {
                return Err(AppError::Aborted);
            }
            gates.active.insert(job.job_id.clone());
        }
        self.spawns.lock().push(name.clone());
        let result = match script {
            Script::SlowStart { .. } => {
                on_progress(100);
                Ok(Self::output(job))
            }
            Script::Panic => panic!("scripted engine panic for {}", name),
            Script::Progress(steps) => {
                for step in steps {
                    on_progress(step);
                }
                Ok(Self::output(job))
            }
            Script::Fail { code, stderr } => {
                on_progress(30);
                Err(AppError::ffmpeg_failed(code, stderr))
            }
            Script::Hold { at, on_terminate } => {
                self.hold(job, &name, at, on_terminate, &on_progress)
            }
        };
        self.gates.lock().active.remove(&job.job_id);
        result
    }

    fn terminate(&self, job_id: &JobId) -> bool {
        self.terminations.lock().push(job_id.clone());
        let mut gates = self.gates.lock();
        if gates.active.contains(job_id) {
            gates.terminated.insert(job_id.clone());
        } else if gates.reserved.contains(job_id) {
            gates.killed.insert(job_id.clone());
        } else {
            return false;
        }
        self.changed.notify_all();
        true
    }

    fn reserve(&self, job_id: &JobId) {
        let mut gates = self.gates.lock();
        gates.killed.remove(job_id);
        gates.reserved.insert(job_id.clone());
    }

    fn release(&self, job_id: &JobId) {
        let mut gates = self.gates.lock();
        gates.reserved.remove(job_id);
        gates.killed.remove(job_id);
    }
}

pub fn memory(name: &str, len: usize) -> MediaSource {
    MediaSource::memory(name, vec![0u8; len])
}

pub fn orchestrator(engine: &Arc<ScriptedEngine>) -> BatchOrchestrator {
    let engine: Arc<dyn Engine> = engine.clone();
    BatchOrchestrator::new(engine)
}

/// Collects every event the orchestrator emits.
pub fn record_events(batch: &BatchOrchestrator) -> Arc<Mutex<Vec<BatchEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    batch.subscribe(Arc::new(move |event: &BatchEvent| {
        sink.lock().push(event.clone());
    }));
    events
}
