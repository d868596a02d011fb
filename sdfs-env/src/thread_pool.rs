//! Fixed-priority background worker pool.
//!
//! Workers block on a condition variable until a job is queued. The pool can
//! be resized at any time: growing spawns workers immediately, shrinking lets
//! surplus workers retire once they finish their current job.

use crate::env::{Job, JobTag, Priority};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

struct QueuedJob {
    run: Job,
    tag: Option<JobTag>,
    unschedule: Option<Job>,
}

#[derive(Default)]
struct State {
    queue: VecDeque<QueuedJob>,
    target: usize,
    live: usize,
    spawned: usize,
    exit_all: bool,
    workers: Vec<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<State>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ThreadPool {
    priority: Priority,
    shared: Arc<Shared>,
}

impl ThreadPool {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                cv: Condvar::new(),
            }),
        }
    }

    pub fn schedule(&self, run: Job, tag: Option<JobTag>, unschedule: Option<Job>) {
        self.shared.lock().queue.push_back(QueuedJob {
            run,
            tag,
            unschedule,
        });
        self.shared.cv.notify_one();
    }

    /// Drops every queued job carrying `tag` and runs its unschedule callback.
    pub fn unschedule(&self, tag: JobTag) -> usize {
        let withdrawn: Vec<QueuedJob> = {
            let mut state = self.shared.lock();
            let (withdrawn, kept): (Vec<_>, Vec<_>) = state
                .queue
                .drain(..)
                .partition(|job| job.tag == Some(tag));
            state.queue = kept.into();
            withdrawn
        };
        let count = withdrawn.len();
        for job in withdrawn {
            if let Some(callback) = job.unschedule {
                callback();
            }
        }
        count
    }

    pub fn queue_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn background_threads(&self) -> usize {
        self.shared.lock().target
    }

    pub fn set_background_threads(&self, number: usize) {
        let mut state = self.shared.lock();
        self.resize(&mut state, number);
    }

    pub fn inc_background_threads_if_needed(&self, number: usize) {
        let mut state = self.shared.lock();
        if number > state.target {
            self.resize(&mut state, number);
        }
    }

    fn resize(&self, state: &mut State, number: usize) {
        state.target = number;
        state.workers.retain(|handle| !handle.is_finished());
        while state.live < state.target {
            let index = state.spawned;
            let shared = self.shared.clone();
            let priority = self.priority;
            let spawned = thread::Builder::new()
                .name(format!("sdfs-bg-{}-{}", priority.as_str(), index))
                .spawn(move || worker(shared, priority));
            match spawned {
                Ok(handle) => {
                    state.workers.push(handle);
                    state.live += 1;
                    state.spawned += 1;
                }
                Err(e) => {
                    error!(
                        priority = self.priority.as_str(),
                        "failed to spawn background thread: {e}"
                    );
                    state.target = state.live;
                    break;
                }
            }
        }
        debug!(
            priority = self.priority.as_str(),
            threads = state.target,
            "background pool resized"
        );
        self.shared.cv.notify_all();
    }
}

fn worker(shared: Arc<Shared>, priority: Priority) {
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if state.live > state.target {
                    state.live -= 1;
                    return;
                }
                if let Some(job) = state.queue.pop_front() {
                    break job;
                }
                if state.exit_all {
                    state.live -= 1;
                    return;
                }
                state = shared.cv.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
        };
        if panic::catch_unwind(AssertUnwindSafe(job.run)).is_err() {
            error!(priority = priority.as_str(), "background job panicked");
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        let workers = {
            let mut state = self.shared.lock();
            state.exit_all = true;
            std::mem::take(&mut state.workers)
        };
        self.shared.cv.notify_all();
        for handle in workers {
            if handle.join().is_err() {
                error!(
                    priority = self.priority.as_str(),
                    "background worker exited abnormally"
                );
            }
        }

        // Only a pool without workers can still hold jobs here.
        let stranded = std::mem::take(&mut self.shared.lock().queue);
        for job in stranded {
            if let Some(callback) = job.unschedule {
                callback();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Barrier};
    use std::time::Duration;

    #[test]
    fn test_schedule_runs_job() {
        let pool = ThreadPool::new(Priority::Low);
        pool.set_background_threads(1);

        let (tx, rx) = mpsc::channel();
        pool.schedule(Box::new(move || tx.send(7).unwrap()), None, None);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn test_unschedule_runs_callbacks() {
        let pool = ThreadPool::new(Priority::Bottom);
        let ran = Arc::new(AtomicUsize::new(0));
        let withdrawn = Arc::new(AtomicUsize::new(0));

        for tag in [1, 1, 2] {
            let ran = ran.clone();
            let withdrawn = withdrawn.clone();
            pool.schedule(
                Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }),
                Some(tag),
                Some(Box::new(move || {
                    withdrawn.fetch_add(1, Ordering::SeqCst);
                })),
            );
        }
        assert_eq!(pool.queue_len(), 3);
        assert_eq!(pool.unschedule(1), 2);
        assert_eq!(pool.queue_len(), 1);
        assert_eq!(withdrawn.load(Ordering::SeqCst), 2);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resize_runs_jobs_concurrently() {
        let pool = ThreadPool::new(Priority::High);
        pool.set_background_threads(2);
        assert_eq!(pool.background_threads(), 2);

        let barrier = Arc::new(Barrier::new(3));
        for _ in 0..2 {
            let barrier = barrier.clone();
            pool.schedule(
                Box::new(move || {
                    barrier.wait();
                }),
                None,
                None,
            );
        }
        barrier.wait();

        pool.inc_background_threads_if_needed(1);
        assert_eq!(pool.background_threads(), 2);
        pool.inc_background_threads_if_needed(4);
        assert_eq!(pool.background_threads(), 4);
    }

    #[test]
    fn test_worker_survives_panicking_job() {
        let pool = ThreadPool::new(Priority::Low);
        pool.set_background_threads(1);

        pool.schedule(Box::new(|| panic!("compaction failed")), None, None);
        let (tx, rx) = mpsc::channel();
        pool.schedule(Box::new(move || tx.send(1).unwrap()), None, None);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert_eq!(pool.background_threads(), 1);
        assert_eq!(pool.queue_len(), 0);
    }

    #[test]
    fn test_resize_prunes_retired_workers() {
        let pool = ThreadPool::new(Priority::High);
        for _ in 0..5 {
            pool.set_background_threads(3);
            pool.set_background_threads(0);
            while !pool
                .shared
                .lock()
                .workers
                .iter()
                .all(|handle| handle.is_finished())
            {
                thread::yield_now();
            }
        }
        pool.set_background_threads(1);
        assert_eq!(pool.shared.lock().workers.len(), 1);
    }

    #[test]
    fn test_drop_runs_unschedule_for_stranded_jobs() {
        let ran = Arc::new(AtomicUsize::new(0));
        let withdrawn = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(Priority::Bottom);
            let ran = ran.clone();
            let withdrawn = withdrawn.clone();
            pool.schedule(
                Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }),
                Some(9),
                Some(Box::new(move || {
                    withdrawn.fetch_add(1, Ordering::SeqCst);
                })),
            );
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(withdrawn.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_drains_queue() {
        let done = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(Priority::Low);
            pool.set_background_threads(1);
            for _ in 0..16 {
                let done = done.clone();
                pool.schedule(
                    Box::new(move || {
                        done.fetch_add(1, Ordering::SeqCst);
                    }),
                    None,
                    None,
                );
            }
        }
        assert_eq!(done.load(Ordering::SeqCst), 16);
    }
}
