use super::pool::run_task;
use super::Task;
use crossbeam::channel::{unbounded, RecvTimeoutError, Sender};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

const IDLE_WAIT: Duration = Duration::from_secs(3_600);
// Deadline used when a delay does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

enum TimerMessage {
    Schedule(Instant, Task),
    Shutdown,
}

struct Entry {
    due: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the max-heap yields the earliest deadline
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Submission side of the timer.
#[derive(Clone)]
pub(super) struct TimerHandle {
    tx: Sender<TimerMessage>,
}

impl TimerHandle {
    /// Schedule a task; runs it immediately if the timer has stopped.
    pub(super) fn schedule(&self, delay: Duration, task: Task) {
        let now = Instant::now();
        let due = now
            .checked_add(delay)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        if let Err(err) = self.tx.send(TimerMessage::Schedule(due, task)) {
            if let TimerMessage::Schedule(_, task) = err.into_inner() {
                run_task(task);
            }
        }
    }
}

/// Single thread that releases delayed tasks to a dispatch function once due.
pub(super) struct Timer {
    handle: TimerHandle,
    thread: Option<JoinHandle<()>>,
}

impl Timer {
    pub(super) fn new<F>(dispatch: F) -> std::io::Result<Self>
    where
        F: Fn(Task) + Send + 'static,
    {
        let (tx, rx) = unbounded::<TimerMessage>();
        let handle = thread::Builder::new()
            .name("ditto-timer".to_string())
            .spawn(move || {
                let mut heap: BinaryHeap<Entry> = BinaryHeap::new();
                let mut seq = 0u64;
                loop {
                    let wait = heap
                        .peek()
                        .map(|e| e.due.saturating_duration_since(Instant::now()))
                        .unwrap_or(IDLE_WAIT);
                    match rx.recv_timeout(wait) {
                        Ok(TimerMessage::Schedule(due, task)) => {
                            seq += 1;
                            heap.push(Entry { due, seq, task });
                        }
                        Ok(TimerMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    let now = Instant::now();
                    while heap.peek().is_some_and(|e| e.due <= now) {
                        if let Some(entry) = heap.pop() {
                            dispatch(entry.task);
                        }
                    }
                }
                if !heap.is_empty() {
                    debug!("Timer stopping with {} pending task(s)", heap.len());
                }
            })?;
        Ok(Self {
            handle: TimerHandle { tx },
            thread: Some(handle),
        })
    }

    pub(super) fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }

    pub(super) fn shutdown(&mut self) {
        let _ = self.handle.tx.send(TimerMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
