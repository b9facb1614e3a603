use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::info;
use ulid::Ulid;

use crate::engine::Engine;

const JOB_CHANNEL_CAPACITY: usize = 256;

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// A side-effect job handed to external collaborators. Dispatched only
/// after the lifecycle transition that produced it has committed; a
/// collaborator failure never rolls back booking state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Ask the client for a review, scheduled with a visible delay.
    ReviewRequest { booking_id: Ulid, due_at_ms: i64 },
    /// Record a financial transaction for a confirmed or completed booking.
    RecordTransaction {
        booking_id: Ulid,
        amount_cents: i64,
        provider_payout_cents: i64,
    },
}

/// Per-studio queue of delayed side effects.
///
/// Review requests are keyed by booking id: scheduling the same booking
/// twice is a no-op, which makes completion retries safe. Transaction
/// records have no delay and go straight to the channel.
pub struct JobQueue {
    scheduled_reviews: DashMap<Ulid, i64>, // booking id → due_at unix ms
    tx: broadcast::Sender<Job>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            scheduled_reviews: DashMap::new(),
            tx: broadcast::channel(JOB_CHANNEL_CAPACITY).0,
        }
    }

    /// Collaborators consume due jobs from here. Fire-and-forget: with no
    /// subscriber, dispatched jobs are dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        self.tx.subscribe()
    }

    /// Schedule a review request `delay_min` minutes from now. Idempotent
    /// per booking id.
    pub fn schedule_review(&self, booking_id: Ulid, delay_min: u32) {
        self.scheduled_reviews
            .entry(booking_id)
            .or_insert_with(|| now_ms() + delay_min as i64 * 60_000);
    }

    /// Emit a transaction record immediately.
    pub fn record_transaction(
        &self,
        booking_id: Ulid,
        amount_cents: i64,
        provider_payout_cents: i64,
    ) {
        let _ = self.tx.send(Job::RecordTransaction {
            booking_id,
            amount_cents,
            provider_payout_cents,
        });
        metrics::counter!(crate::observability::JOBS_DISPATCHED_TOTAL).increment(1);
    }

    pub fn pending_reviews(&self) -> usize {
        self.scheduled_reviews.len()
    }

    /// Move every due review onto the channel. Returns how many were sent.
    pub(crate) fn dispatch_due(&self, now: i64) -> usize {
        let due: Vec<(Ulid, i64)> = self
            .scheduled_reviews
            .iter()
            .filter(|e| *e.value() <= now)
            .map(|e| (*e.key(), *e.value()))
            .collect();
        for (booking_id, due_at_ms) in &due {
            self.scheduled_reviews.remove(booking_id);
            let _ = self.tx.send(Job::ReviewRequest {
                booking_id: *booking_id,
                due_at_ms: *due_at_ms,
            });
            metrics::counter!(crate::observability::JOBS_DISPATCHED_TOTAL).increment(1);
        }
        due.len()
    }
}

/// Background task that moves due review requests to the job channel.
pub async fn run_dispatcher(queue: Arc<JobQueue>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        let sent = queue.dispatch_due(now_ms());
        if sent > 0 {
            info!("dispatched {sent} due review request(s)");
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL after {appends} appends"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schedule_is_idempotent_per_booking() {
        let queue = JobQueue::new();
        let id = Ulid::new();
        queue.schedule_review(id, 120);
        queue.schedule_review(id, 5);
        assert_eq!(queue.pending_reviews(), 1);
    }

    #[tokio::test]
    async fn dispatch_due_sends_and_clears() {
        let queue = JobQueue::new();
        let mut rx = queue.subscribe();
        let id = Ulid::new();
        queue.schedule_review(id, 0);

        let sent = queue.dispatch_due(now_ms() + 1);
        assert_eq!(sent, 1);
        assert_eq!(queue.pending_reviews(), 0);
        match rx.recv().await.unwrap() {
            Job::ReviewRequest { booking_id, .. } => assert_eq!(booking_id, id),
            other => panic!("unexpected job: {other:?}"),
        }

        // Nothing left to dispatch
        assert_eq!(queue.dispatch_due(now_ms() + 1), 0);
    }

    #[tokio::test]
    async fn future_jobs_stay_queued() {
        let queue = JobQueue::new();
        let id = Ulid::new();
        queue.schedule_review(id, 120);
        assert_eq!(queue.dispatch_due(now_ms()), 0);
        assert_eq!(queue.pending_reviews(), 1);
    }

    #[tokio::test]
    async fn transactions_bypass_the_delay_queue() {
        let queue = JobQueue::new();
        let mut rx = queue.subscribe();
        let id = Ulid::new();
        queue.record_transaction(id, 20_000, 12_000);
        match rx.recv().await.unwrap() {
            Job::RecordTransaction {
                booking_id,
                amount_cents,
                provider_payout_cents,
            } => {
                assert_eq!(booking_id, id);
                assert_eq!(amount_cents, 20_000);
                assert_eq!(provider_payout_cents, 12_000);
            }
            other => panic!("unexpected job: {other:?}"),
        }
    }
}
