//! Cancellable handles for jobs that are currently encoding.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AppError;
use crate::media::JobId;

/// Something that can forcefully stop one running job.
pub trait JobHandle: Send + Sync {
    /// Returns whether anything was actually stopped.
    fn terminate(&self) -> bool;
}

/// Job id to handle, shared between the batch loop and cancel requests.
///
/// Handles are always terminated outside the lock so a slow kill never blocks a
/// concurrent `register`/`release`.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<JobId, Arc<dyn JobHandle>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each id is registered once; a second registration is a bug in the caller.
    pub fn register(&self, job_id: JobId, handle: Arc<dyn JobHandle>) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job_id) {
            return Err(AppError::DuplicateJob(job_id));
        }
        jobs.insert(job_id, handle);
        Ok(())
    }

    /// Terminate and forget one job. False when it was not registered.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let handle = self.jobs.lock().remove(job_id);
        match handle {
            Some(handle) => {
                let stopped = handle.terminate();
                log::info!(
                    target: "batchvideo::jobs",
                    "cancelled job {} (process stopped: {})",
                    job_id,
                    stopped
                );
                true
            }
            None => false,
        }
    }

    /// Terminate every registered job. Returns how many were registered.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(JobId, Arc<dyn JobHandle>)> = self.jobs.lock().drain().collect();
        for (job_id, handle) in &drained {
            let stopped = handle.terminate();
            log::debug!(
                target: "batchvideo::jobs",
                "cancel_all: job {} (process stopped: {})",
                job_id,
                stopped
            );
        }
        drained.len()
    }

    /// Forget a finished job without terminating it.
    pub fn release(&self, job_id: &JobId) {
        self.jobs.lock().remove(job_id);
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.jobs.lock().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHandle {
        terminated: AtomicUsize,
    }

    impl JobHandle for CountingHandle {
        fn terminate(&self) -> bool {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn cancel_terminates_once_and_is_idempotent() {
        let registry = JobRegistry::new();
        let handle = Arc::new(CountingHandle::default());
        let id = JobId::from("1-0");
        registry.register(id.clone(), handle.clone()).expect("register");

        assert!(registry.cancel(&id));
        assert!(!registry.cancel(&id));
        assert_eq!(handle.terminated.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = JobRegistry::new();
        let id = JobId::from("1-0");
        registry
            .register(id.clone(), Arc::new(CountingHandle::default()))
            .expect("first");
        let err = registry
            .register(id.clone(), Arc::new(CountingHandle::default()))
            .expect_err("second");
        assert!(matches!(err, AppError::DuplicateJob(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn cancel_all_counts_and_clears() {
        let registry = JobRegistry::new();
        let handles: Vec<_> = (0..3).map(|_| Arc::new(CountingHandle::default())).collect();
        for (i, h) in handles.iter().enumerate() {
            registry
                .register(JobId::generate(1, i), h.clone())
                .expect("register");
        }
        assert_eq!(registry.cancel_all(), 3);
        assert!(registry.is_empty());
        assert!(handles.iter().all(|h| h.terminated.load(Ordering::SeqCst) == 1));
        assert_eq!(registry.cancel_all(), 0);
    }

    #[test]
    fn release_does_not_terminate() {
        let registry = JobRegistry::new();
        let handle = Arc::new(CountingHandle::default());
        let id = JobId::from("1-0");
        registry.register(id.clone(), handle.clone()).expect("register");
        registry.release(&id);
        assert!(!registry.contains(&id));
        assert!(!registry.cancel(&id));
        assert_eq!(handle.terminated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_register_and_cancel() {
        let registry = JobRegistry::new();
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let id = JobId::generate(7, i);
                    registry
                        .register(id.clone(), Arc::new(CountingHandle::default()))
                        .expect("register");
                    if i % 2 == 0 {
                        assert!(registry.cancel(&id));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().expect("thread");
        }
        assert_eq!(registry.len(), 4);
    }
}
