//! In-process leased queue.

use super::{Lease, QueueError, QueueStats, TaskQueue};
use crate::store::TaskRef;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
struct Pending {
    task: TaskRef,
    deliveries: u32,
}

#[derive(Debug)]
struct InFlight {
    task: TaskRef,
    deliveries: u32,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Pending>,
    leased: HashMap<Uuid, InFlight>,
}

impl QueueState {
    /// Return expired leases to the front of the queue, oldest deadline first.
    fn reclaim_expired(&mut self, now: Instant) -> usize {
        let mut expired: Vec<(Uuid, Instant)> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, lease)| (*id, lease.deadline))
            .collect();
        if expired.is_empty() {
            return 0;
        }

        // Pushed to the front in reverse, so the earliest deadline ends up first.
        expired.sort_by(|a, b| b.1.cmp(&a.1));
        for (id, _) in &expired {
            if let Some(lease) = self.leased.remove(id) {
                self.ready.push_front(Pending {
                    task: lease.task,
                    deliveries: lease.deliveries,
                });
            }
        }
        expired.len()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.leased.values().map(|lease| lease.deadline).min()
    }
}

/// # In-Memory Task Queue
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    closed: AtomicBool,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, refs: Vec<TaskRef>) -> Result<(), QueueError> {
        {
            // `close` flips the flag under this lock, so an enqueue either
            // lands before the close or is rejected.
            let mut state = self.state.lock().await;
            if self.is_closed() {
                return Err(QueueError::Closed);
            }
            state
                .ready
                .extend(refs.into_iter().map(|task| Pending { task, deliveries: 0 }));
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, lease_for: Duration, wait: Duration) -> Result<Option<Lease>, QueueError> {
        let give_up_at = Instant::now() + wait;
        loop {
            // Register interest before looking at the state so an enqueue
            // between the check and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(QueueError::Closed);
            }

            let wake_at = {
                let now = Instant::now();
                let mut state = self.state.lock().await;
                let reclaimed = state.reclaim_expired(now);
                if reclaimed > 0 {
                    warn!(count = reclaimed, "Lease expired; task references made visible for redelivery");
                }

                if let Some(pending) = state.ready.pop_front() {
                    let id = Uuid::new_v4();
                    let deliveries = pending.deliveries + 1;
                    state.leased.insert(
                        id,
                        InFlight {
                            task: pending.task.clone(),
                            deliveries,
                            deadline: now + lease_for,
                        },
                    );
                    return Ok(Some(Lease {
                        id,
                        task: pending.task,
                        delivery: deliveries,
                    }));
                }

                if now >= give_up_at {
                    return Ok(None);
                }
                state
                    .next_deadline()
                    .map_or(give_up_at, |deadline| deadline.min(give_up_at))
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        match state.leased.remove(&lease.id) {
            Some(_) => Ok(()),
            None => {
                debug!(lease = %lease.id, task = %lease.task, "Ack for unknown lease");
                Err(QueueError::LeaseExpired(lease.id))
            }
        }
    }

    async fn extend(&self, lease: &Lease, lease_for: Duration) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        match state.leased.get_mut(&lease.id) {
            Some(in_flight) => {
                in_flight.deadline = Instant::now() + lease_for;
                Ok(())
            }
            None => Err(QueueError::LeaseExpired(lease.id)),
        }
    }

    async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            ready: state.ready.len(),
            in_flight: state.leased.len(),
        }
    }

    async fn close(&self) {
        {
            let _state = self.state.lock().await;
            self.closed.store(true, Ordering::Release);
        }
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
