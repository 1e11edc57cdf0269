use super::Task;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run a task, containing any panic it raises.
pub(super) fn run_task(task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!("Scheduled task panicked");
    }
}

struct Worker {
    worker_id: usize,
    thread_handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        worker_id: usize,
        work_rx: Receiver<Task>,
        shutdown_rx: Receiver<()>,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("ditto-worker-{worker_id}"))
            .spawn(move || {
                debug!("Worker {} started", worker_id);
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }
                    match work_rx.recv_timeout(POLL_INTERVAL) {
                        Ok(task) => run_task(task),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                // Drain whatever was queued before shutdown
                while let Ok(task) = work_rx.try_recv() {
                    run_task(task);
                }
                debug!("Worker {} stopped", worker_id);
            })?;
        Ok(Self {
            worker_id,
            thread_handle: Some(handle),
        })
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!("Waiting for worker {} to finish", self.worker_id);
            let _ = handle.join();
        }
    }
}

/// Submission side of the pool, cloneable into other threads.
#[derive(Clone)]
pub(super) struct PoolHandle {
    work_tx: Sender<Task>,
}

impl PoolHandle {
    /// Queue a task; when the queue is full the calling thread runs it.
    pub(super) fn execute(&self, task: Task) {
        match self.work_tx.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Full(task)) => {
                warn!("Scheduler queue is full, running task on the calling thread");
                run_task(task);
            }
            Err(TrySendError::Disconnected(task)) => {
                debug!("Scheduler pool is shut down, running task on the calling thread");
                run_task(task);
            }
        }
    }
}

/// Bounded worker pool with caller-runs backpressure.
pub(super) struct WorkerPool {
    workers: Vec<Worker>,
    handle: PoolHandle,
    shutdown_tx: Sender<()>,
}

impl WorkerPool {
    pub(super) fn new(threads: usize, queue_size: usize) -> std::io::Result<Self> {
        info!(
            "Creating scheduler pool with {} workers, queue size {}",
            threads, queue_size
        );
        let (work_tx, work_rx) = bounded(queue_size);
        let (shutdown_tx, shutdown_rx) = bounded(threads);
        let workers = (0..threads)
            .map(|id| Worker::spawn(id, work_rx.clone(), shutdown_rx.clone()))
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(Self {
            workers,
            handle: PoolHandle { work_tx },
            shutdown_tx,
        })
    }

    pub(super) fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub(super) fn queue_depth(&self) -> usize {
        self.handle.work_tx.len()
    }

    pub(super) fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    pub(super) fn execute(&self, task: Task) {
        self.handle.execute(task);
    }

    pub(super) fn shutdown(&mut self) {
        for _ in 0..self.workers.len() {
            let _ = self.shutdown_tx.send(());
        }
        for worker in &mut self.workers {
            worker.join();
        }
    }
}
