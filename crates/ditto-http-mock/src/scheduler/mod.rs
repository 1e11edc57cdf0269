//! Task scheduler used for listener notification and action dispatch.
//!
//! Tasks run on a bounded pool of OS threads. When the queue is full the
//! submitting thread runs the task itself. In synchronous mode every task runs
//! inline on the caller, which keeps tests deterministic.

mod pool;
mod timer;

use crate::model::Delay;
use parking_lot::Mutex;
use pool::{run_task, PoolHandle, WorkerPool};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use timer::{Timer, TimerHandle};
use tokio::sync::oneshot;
use tracing::info;

/// A unit of work for the scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads
    pub threads: usize,
    /// Pending tasks accepted before callers run tasks themselves
    pub queue_size: usize,
    /// Run every task inline on the submitting thread
    pub synchronous: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads: (num_cpus::get() / 2).clamp(2, 16),
            queue_size: 1000,
            synchronous: false,
        }
    }
}

struct Running {
    pool: WorkerPool,
    timer: Timer,
}

pub struct Scheduler {
    pool: PoolHandle,
    timer: TimerHandle,
    synchronous: bool,
    worker_count: usize,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> std::io::Result<Self> {
        let pool = WorkerPool::new(config.threads.max(1), config.queue_size.max(1))?;
        let dispatch = pool.handle();
        let timer = Timer::new(move |task| dispatch.execute(task))?;
        Ok(Self {
            pool: pool.handle(),
            timer: timer.handle(),
            synchronous: config.synchronous,
            worker_count: pool.worker_count(),
            running: Mutex::new(Some(Running { pool, timer })),
        })
    }

    /// A scheduler that runs every task on the calling thread.
    pub fn synchronous() -> std::io::Result<Self> {
        Self::new(&SchedulerConfig {
            threads: 1,
            queue_size: 1,
            synchronous: true,
        })
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_depth(&self) -> usize {
        self.running
            .lock()
            .as_ref()
            .map_or(0, |r| r.pool.queue_depth())
    }

    /// Run a task, inline when `synchronous` (or the scheduler is synchronous),
    /// otherwise on the pool.
    pub fn submit<F>(&self, task: F, synchronous: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        if synchronous || self.synchronous {
            run_task(Box::new(task));
        } else {
            self.pool.execute(Box::new(task));
        }
    }

    /// Queue a task for the pool without ever running it on the caller.
    ///
    /// The task passes through the timer thread's unbounded queue, so a full
    /// pool makes the timer thread run it instead. Synchronous schedulers and a
    /// stopped timer still run it inline.
    pub fn submit_detached<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.synchronous {
            run_task(Box::new(task));
        } else {
            self.timer.schedule(Duration::ZERO, Box::new(task));
        }
    }

    /// Run a task after the sum of `delays`.
    ///
    /// Synchronous scheduling sleeps on the calling thread before running it.
    pub fn schedule<F>(&self, task: F, synchronous: bool, delays: &[Delay])
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = Delay::total(delays);
        if synchronous || self.synchronous {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            run_task(Box::new(task));
        } else if delay.is_zero() {
            self.pool.execute(Box::new(task));
        } else {
            self.timer.schedule(delay, Box::new(task));
        }
    }

    /// Run a computation on the pool and receive its result.
    pub fn spawn_with_result<T, F>(&self, work: F, delay: Duration) -> oneshot::Receiver<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task = move || {
            let _ = tx.send(work());
        };
        if delay.is_zero() {
            self.submit(task, false);
        } else if self.synchronous {
            std::thread::sleep(delay);
            run_task(Box::new(task));
        } else {
            self.timer.schedule(delay, Box::new(task));
        }
        rx
    }

    /// Stop the timer and workers, draining queued tasks. Idempotent.
    pub fn shutdown(&self) {
        let running = self.running.lock().take();
        if let Some(mut running) = running {
            info!("Shutting down scheduler with {} workers", self.worker_count);
            running.timer.shutdown();
            running.pool.shutdown();
            info!("Scheduler shutdown complete");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Instant;

    fn config(threads: usize, queue_size: usize) -> SchedulerConfig {
        SchedulerConfig {
            threads,
            queue_size,
            synchronous: false,
        }
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert!(config.threads >= 2);
        assert!(config.threads <= 16);
        assert_eq!(config.queue_size, 1000);
        assert!(!config.synchronous);
    }

    #[test]
    fn test_synchronous_submit_runs_inline() {
        let scheduler = Scheduler::new(&config(2, 10)).unwrap();
        let caller = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));
        let slot = ran_on.clone();
        scheduler.submit(move || *slot.lock() = Some(thread::current().id()), true);
        assert_eq!(*ran_on.lock(), Some(caller));
    }

    #[test]
    fn test_async_submit_runs_on_worker() {
        let scheduler = Scheduler::new(&config(2, 10)).unwrap();
        let (tx, rx) = crossbeam::channel::bounded(1);
        scheduler.submit(
            move || {
                let _ = tx.send(thread::current().name().map(str::to_string));
            },
            false,
        );
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(name.unwrap().starts_with("ditto-worker-"));
    }

    #[test]
    fn test_saturated_pool_runs_on_caller() {
        let scheduler = Scheduler::new(&config(1, 1)).unwrap();
        let gate = Arc::new(Barrier::new(2));

        // Occupy the only worker
        let g = gate.clone();
        scheduler.submit(move || { g.wait(); }, false);
        // Wait until the worker has taken the blocking task off the queue
        let deadline = Instant::now() + Duration::from_secs(5);
        while scheduler.queue_depth() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        // Fill the queue
        scheduler.submit(|| {}, false);

        let caller = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));
        let slot = ran_on.clone();
        scheduler.submit(move || *slot.lock() = Some(thread::current().id()), false);
        assert_eq!(*ran_on.lock(), Some(caller));

        gate.wait();
        scheduler.shutdown();
    }

    #[test]
    fn test_detached_submit_avoids_caller_when_saturated() {
        let scheduler = Scheduler::new(&config(1, 1)).unwrap();
        let gate = Arc::new(Barrier::new(2));

        let g = gate.clone();
        scheduler.submit(move || { g.wait(); }, false);
        let deadline = Instant::now() + Duration::from_secs(5);
        while scheduler.queue_depth() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        scheduler.submit(|| {}, false);

        let (tx, rx) = crossbeam::channel::bounded(1);
        scheduler.submit_detached(move || {
            let _ = tx.send(thread::current().id());
        });
        let ran_on = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(ran_on, thread::current().id());

        gate.wait();
        scheduler.shutdown();
    }

    #[test]
    fn test_delays_are_summed() {
        let scheduler = Scheduler::new(&config(2, 10)).unwrap();
        let start = Instant::now();
        let elapsed = Arc::new(Mutex::new(None));
        let slot = elapsed.clone();
        scheduler.schedule(
            move || *slot.lock() = Some(start.elapsed()),
            true,
            &[Delay::millis(30), Delay::millis(40)],
        );
        assert!(elapsed.lock().unwrap() >= Duration::from_millis(70));
    }

    #[test]
    fn test_overflowing_delay_does_not_stop_the_timer() {
        let scheduler = Scheduler::new(&config(2, 10)).unwrap();
        let never = Delay {
            time_unit: crate::model::TimeUnit::Days,
            value: u64::MAX,
        };
        scheduler.schedule(|| {}, false, &[never]);
        let rx = scheduler.spawn_with_result(|| (), never.to_duration());
        drop(rx);

        let (tx, done) = crossbeam::channel::bounded(1);
        scheduler.schedule(
            move || {
                let _ = tx.send(());
            },
            false,
            &[Delay::millis(10)],
        );
        done.recv_timeout(Duration::from_secs(5)).unwrap();
        scheduler.shutdown();
    }

    #[test]
    fn test_async_delayed_schedule() {
        let scheduler = Scheduler::new(&config(2, 10)).unwrap();
        let (tx, rx) = crossbeam::channel::bounded(1);
        let start = Instant::now();
        scheduler.schedule(
            move || {
                let _ = tx.send(start.elapsed());
            },
            false,
            &[Delay::millis(20), Delay::millis(30)],
        );
        let elapsed = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(elapsed >= Duration::from_millis(50));
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let scheduler = Scheduler::new(&config(1, 10)).unwrap();
        scheduler.submit(|| panic!("boom"), false);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let (tx, rx) = crossbeam::channel::bounded(1);
        scheduler.submit(
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            },
            false,
        );
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawn_with_result() {
        let scheduler = Scheduler::new(&config(2, 10)).unwrap();
        let rx = scheduler.spawn_with_result(|| 6 * 7, Duration::ZERO);
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let scheduler = Scheduler::new(&config(2, 10)).unwrap();
        scheduler.shutdown();
        scheduler.shutdown();
        // Still usable: tasks fall back to the caller
        let hit = Arc::new(AtomicUsize::new(0));
        let h = hit.clone();
        scheduler.submit(move || { h.fetch_add(1, Ordering::SeqCst); }, false);
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }
}
