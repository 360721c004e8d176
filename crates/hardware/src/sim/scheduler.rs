//! A persistent host thread pool that drives CPU timeslices.
//!
//! Workers block on a mutex-protected FIFO job queue (the "global work
//! list"), waking on a condition variable that stands in for the reference
//! implementation's counted semaphore. Submitting one frame's jobs and
//! waiting for them to drain is a second, much smaller producer/consumer
//! pair: the "frame driver" pushes a job per live processor, then blocks
//! until the pending count returns to zero.
//!
//! This collapses the architecture notes' per-thread "schedule after me"
//! chain and separate next-frame list into one queue drained fully every
//! frame; nothing here reorders jobs relative to one another, since no two
//! jobs in a frame touch the same processor.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: VecDeque<Job>,
    pending: usize,
    shutdown: bool,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A fixed pool of worker threads that run boxed per-CPU dispatch closures.
pub struct Scheduler {
    shared: Arc<Mutex<Shared>>,
    work_ready: Arc<Condvar>,
    drained: Arc<Condvar>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns `worker_count` persistent OS threads (at least one).
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            queue: VecDeque::new(),
            pending: 0,
            shutdown: false,
        }));
        let work_ready = Arc::new(Condvar::new());
        let drained = Arc::new(Condvar::new());

        let workers = (0..worker_count.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                let work_ready = Arc::clone(&work_ready);
                let drained = Arc::clone(&drained);
                thread::spawn(move || worker_loop(&shared, &work_ready, &drained))
            })
            .collect();

        Self { shared, work_ready, drained, workers }
    }

    /// Submits `jobs` as one frame's work and blocks until every job has
    /// run. Jobs may land on any worker; no ordering is guaranteed between
    /// them, matching the architecture notes' "no globally ordered
    /// interrupt assertion" stance on cross-CPU timing.
    pub fn run_frame(&self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        {
            let mut state = lock(&self.shared);
            state.pending += jobs.len();
            state.queue.extend(jobs);
        }
        self.work_ready.notify_all();

        let mut state = lock(&self.shared);
        while state.pending > 0 {
            state = self.drained.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

fn worker_loop(shared: &Arc<Mutex<Shared>>, work_ready: &Arc<Condvar>, drained: &Arc<Condvar>) {
    loop {
        let job = {
            let mut state = lock(shared);
            loop {
                if let Some(job) = state.queue.pop_front() {
                    break Some(job);
                }
                if state.shutdown {
                    break None;
                }
                state = work_ready.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
        };
        let Some(job) = job else { return };
        job();
        let mut state = lock(shared);
        state.pending -= 1;
        if state.pending == 0 {
            drained.notify_all();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        lock(&self.shared).shutdown = true;
        self.work_ready.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: &Arc<AtomicUsize>) -> Job {
        let counter = Arc::clone(counter);
        Box::new(move || {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn run_frame_executes_every_job_exactly_once() {
        let scheduler = Scheduler::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<Job> = (0..8).map(|_| counting_job(&counter)).collect();
        scheduler.run_frame(jobs);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn successive_frames_each_drain_fully() {
        let scheduler = Scheduler::new(3);
        for _ in 0..4 {
            let counter = Arc::new(AtomicUsize::new(0));
            let jobs: Vec<Job> = (0..5).map(|_| counting_job(&counter)).collect();
            scheduler.run_frame(jobs);
            assert_eq!(counter.load(Ordering::SeqCst), 5);
        }
    }

    #[test]
    fn single_worker_runs_jobs_one_by_one() {
        let scheduler = Scheduler::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<Job> = (0..16).map(|_| counting_job(&counter)).collect();
        scheduler.run_frame(jobs);
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }
}
