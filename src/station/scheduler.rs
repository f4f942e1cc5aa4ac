//! Deferred-task scheduling for retries and confirmation replies.
//!
//! Instead of scattering `tokio::spawn` + `sleep` around the codebase, every
//! piece of delayed work becomes a [`DeferredTask`] with an explicit due
//! time. [`TaskQueue`] is a plain data structure (a Vec kept sorted on
//! drain - queue sizes here are tiny), so ordering is testable by handing it
//! fabricated `Instant`s. A spawned dispatcher loop owns the queue at
//! runtime and emits due tasks into a channel the station's executor
//! consumes; the sensing tick never sleeps on behalf of deferred work.

use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// One peer inside a retry cycle. `original_id` is the packet the first
/// attempt went out under, re-checked at execution time so a late ack
/// cancels the resend for that peer.
#[derive(Debug, Clone)]
pub struct RetryTarget {
    pub peer: String,
    pub address: u32,
    pub original_id: u32,
    /// Signal value observed at the original send, carried into the fresh
    /// pending entry the resend creates.
    pub signal: Option<f32>,
}

/// Work that runs later, off the tick path.
#[derive(Debug, Clone)]
pub enum DeferredTask {
    /// The single per-batch retry: resend `payload` to every target still
    /// unconfirmed when the task fires.
    Retry {
        payload: String,
        targets: Vec<RetryTarget>,
    },
    /// Deferred confirmation reply to a peer whose ack was real, carrying
    /// the signal value observed at original send time.
    Confirmation {
        peer: String,
        address: u32,
        signal: Option<f32>,
    },
}

#[derive(Debug)]
struct ScheduledTask {
    due: Instant,
    task: DeferredTask,
}

/// Due-time queue. Pure data; the caller supplies `now`.
#[derive(Debug, Default)]
pub struct TaskQueue {
    queue: Vec<ScheduledTask>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self { queue: Vec::new() }
    }

    pub fn schedule_at(&mut self, due: Instant, task: DeferredTask) {
        self.queue.push(ScheduledTask { due, task });
    }

    pub fn schedule_after(&mut self, delay: Duration, task: DeferredTask) {
        self.schedule_at(Instant::now() + delay, task);
    }

    /// Remove and return every task due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<DeferredTask> {
        let mut due: Vec<ScheduledTask> = Vec::new();
        let mut rest: Vec<ScheduledTask> = Vec::new();
        for entry in self.queue.drain(..) {
            if entry.due <= now {
                due.push(entry);
            } else {
                rest.push(entry);
            }
        }
        self.queue = rest;
        due.sort_by_key(|e| e.due);
        due.into_iter().map(|e| e.task).collect()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.queue.iter().map(|e| e.due).min()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

enum DispatchCommand {
    Schedule { delay: Duration, task: DeferredTask },
    Queued(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle for scheduling deferred work from any task.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<DispatchCommand>,
}

impl DispatcherHandle {
    pub fn schedule(&self, delay: Duration, task: DeferredTask) {
        if self
            .tx
            .send(DispatchCommand::Schedule { delay, task })
            .is_err()
        {
            warn!("dispatcher gone; dropping deferred task");
        }
    }

    /// Number of tasks waiting on their due time.
    pub async fn queued(&self) -> Option<usize> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(DispatchCommand::Queued(tx)).is_ok() {
            rx.await.ok()
        } else {
            None
        }
    }

    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(DispatchCommand::Shutdown(tx));
        let _ = rx.await;
    }
}

/// Spawn the dispatcher loop. Due tasks are pushed into `due_tx`; the
/// station's executor performs the actual sends.
pub fn start_dispatcher(due_tx: mpsc::UnboundedSender<DeferredTask>) -> DispatcherHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<DispatchCommand>();
    let handle = DispatcherHandle { tx };

    tokio::spawn(async move {
        let mut queue = TaskQueue::new();
        const TICK: Duration = Duration::from_millis(50);
        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        Some(DispatchCommand::Schedule { delay, task }) => {
                            debug!("deferred task scheduled in {:?}", delay);
                            queue.schedule_after(delay, task);
                        }
                        Some(DispatchCommand::Queued(resp)) => { let _ = resp.send(queue.len()); }
                        Some(DispatchCommand::Shutdown(done)) => { let _ = done.send(()); break; }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(TICK) => {}
            }
            for task in queue.take_due(Instant::now()) {
                if due_tx.send(task).is_err() {
                    warn!("task executor gone; dispatcher stopping");
                    return;
                }
            }
        }
        debug!("dispatcher loop terminated");
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmation(peer: &str) -> DeferredTask {
        DeferredTask::Confirmation {
            peer: peer.to_string(),
            address: 1,
            signal: None,
        }
    }

    #[tokio::test]
    async fn take_due_respects_due_times() {
        let mut q = TaskQueue::new();
        let now = Instant::now();
        q.schedule_at(now + Duration::from_secs(30), confirmation("late"));
        q.schedule_at(now + Duration::from_secs(5), confirmation("early"));

        assert!(q.take_due(now).is_empty(), "nothing due yet");
        assert_eq!(q.len(), 2);

        let due = q.take_due(now + Duration::from_secs(5));
        assert_eq!(due.len(), 1);
        match &due[0] {
            DeferredTask::Confirmation { peer, .. } => assert_eq!(peer, "early"),
            other => panic!("unexpected task {:?}", other),
        }
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn take_due_orders_by_due_time() {
        let mut q = TaskQueue::new();
        let now = Instant::now();
        q.schedule_at(now + Duration::from_secs(3), confirmation("b"));
        q.schedule_at(now + Duration::from_secs(1), confirmation("a"));
        q.schedule_at(now + Duration::from_secs(2), confirmation("middle"));
        let due = q.take_due(now + Duration::from_secs(10));
        let names: Vec<String> = due
            .into_iter()
            .map(|t| match t {
                DeferredTask::Confirmation { peer, .. } => peer,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(names, vec!["a", "middle", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatcher_emits_after_delay_not_before() {
        let (due_tx, mut due_rx) = mpsc::unbounded_channel();
        let handle = start_dispatcher(due_tx);
        handle.schedule(Duration::from_secs(60), confirmation("deferred"));

        // Let the dispatcher pick the command up without reaching the due time.
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(due_rx.try_recv().is_err(), "fired before its due time");
        assert_eq!(handle.queued().await, Some(1));

        tokio::time::advance(Duration::from_secs(61)).await;
        let fired = due_rx.recv().await.expect("task");
        assert!(matches!(fired, DeferredTask::Confirmation { .. }));
        handle.shutdown().await;
    }
}
