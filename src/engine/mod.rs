mod admin;
mod assignment;
mod availability;
mod capacity;
mod error;
mod lifecycle;
mod queries;

pub use assignment::{Assignment, ProviderSlot};
pub use availability::{PROVIDER_BUFFER_MIN, Unavailable};
pub use capacity::{CapacityCheck, CapacityReport};
pub use error::EngineError;
pub use lifecycle::{BookingRequest, CreatedBooking, PLATFORM_FEE_CENTS};
pub use queries::{CapacityStatus, HourlyCapacity, ProviderSchedule, SlotStatus};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::catalog::DurationCatalog;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::tasks::JobQueue;
use crate::wal::Wal;

pub type SharedDayState = Arc<RwLock<DayState>>;

/// Per-engine configuration, passed at construction so tests can substitute
/// fixtures without shared state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub catalog: DurationCatalog,
    /// New bookings start `pending` until payment confirms; otherwise they
    /// are auto-confirmed.
    pub payment_required: bool,
    /// Delay before the post-completion review request fires.
    pub review_request_delay_min: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog: DurationCatalog::standard(),
            payment_required: true,
            review_request_delay_min: 120,
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One business's capacity and assignment state. Every decision is a pure
/// function of a fresh read of this state; durability goes through the WAL.
pub struct Engine {
    studio: String,
    pub(super) config: EngineConfig,
    pub(super) settings: RwLock<CapacitySettings>,
    pub(super) providers: DashMap<Ulid, Provider>,
    pub(super) exceptions: DashMap<(Ulid, NaiveDate), AvailabilityException>,
    pub(super) days: DashMap<NaiveDate, SharedDayState>,
    /// Reverse lookup: booking id → date it currently lives on.
    pub(super) booking_to_date: DashMap<Ulid, NaiveDate>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    jobs: Arc<JobQueue>,
}

/// Apply a booking-scoped event to a DayState. No locking here; the caller
/// holds the lock and maintains the booking index.
pub(super) fn apply_to_day(day: &mut DayState, event: &Event) {
    match event {
        Event::BookingCreated { booking } => {
            day.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged {
            id,
            status,
            provider_earnings_cents,
        } => {
            if let Some(b) = day.booking_mut(*id) {
                b.status = *status;
                if provider_earnings_cents.is_some() {
                    b.provider_earnings_cents = *provider_earnings_cents;
                }
            }
        }
        Event::BookingReassigned { id, provider_id } => {
            if let Some(b) = day.booking_mut(*id) {
                b.provider_id = Some(*provider_id);
            }
        }
        Event::SlotManaged { slot } => {
            day.apply_slot(slot.clone());
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(
        studio: impl Into<String>,
        wal_path: PathBuf,
        config: EngineConfig,
        notify: Arc<NotifyHub>,
        jobs: Arc<JobQueue>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            studio: studio.into(),
            config,
            settings: RwLock::new(CapacitySettings::default()),
            providers: DashMap::new(),
            exceptions: DashMap::new(),
            days: DashMap::new(),
            booking_to_date: DashMap::new(),
            wal_tx,
            notify,
            jobs,
        };

        // Replay: we are the sole owner of these Arcs, so try_write always
        // succeeds. blocking_write is off-limits here; this may run inside
        // an async context (lazy studio creation).
        for event in &events {
            engine.replay_apply(event);
        }
        tracing::info!(
            studio = %engine.studio,
            events = events.len(),
            "engine opened"
        );

        Ok(engine)
    }

    fn replay_apply(&self, event: &Event) {
        match event {
            Event::SettingsUpdated { settings } => {
                let mut guard = self.settings.try_write().expect("replay: uncontended write");
                *guard = *settings;
            }
            Event::ProviderUpserted { provider } => {
                self.providers.insert(provider.id, provider.clone());
            }
            Event::ProviderRemoved { id } => {
                self.providers.remove(id);
            }
            Event::ExceptionSet { exception } => {
                self.exceptions
                    .insert((exception.provider_id, exception.date), exception.clone());
            }
            Event::SlotManaged { slot } => {
                let day = self.day(slot.date);
                let mut guard = day.try_write().expect("replay: uncontended write");
                apply_to_day(&mut guard, event);
            }
            Event::BookingCreated { booking } => {
                let day = self.day(booking.date);
                let mut guard = day.try_write().expect("replay: uncontended write");
                apply_to_day(&mut guard, event);
                self.booking_to_date.insert(booking.id, booking.date);
            }
            Event::BookingStatusChanged { id, .. } | Event::BookingReassigned { id, .. } => {
                if let Some(date) = self.booking_to_date.get(id).map(|e| *e.value()) {
                    let day = self.day(date);
                    let mut guard = day.try_write().expect("replay: uncontended write");
                    apply_to_day(&mut guard, event);
                }
            }
            Event::BookingRescheduled { id, date, start } => {
                if let Some(old_date) = self.booking_to_date.get(id).map(|e| *e.value()) {
                    let old_day = self.day(old_date);
                    let mut old_guard = old_day.try_write().expect("replay: uncontended write");
                    if let Some(mut booking) = old_guard.remove_booking(*id) {
                        booking.date = *date;
                        booking.start = *start;
                        booking.capacity_group_id = format!("{date}_{start}");
                        drop(old_guard);
                        let new_day = self.day(*date);
                        let mut new_guard =
                            new_day.try_write().expect("replay: uncontended write");
                        new_guard.insert_booking(booking);
                        self.booking_to_date.insert(*id, *date);
                    }
                }
            }
        }
    }

    pub fn studio(&self) -> &str {
        &self.studio
    }

    pub fn jobs(&self) -> &Arc<JobQueue> {
        &self.jobs
    }

    /// The day entry for `date`, created empty on first touch.
    pub(super) fn day(&self, date: NaiveDate) -> SharedDayState {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::default())))
            .value()
            .clone()
    }

    pub(super) fn existing_day(&self, date: NaiveDate) -> Option<SharedDayState> {
        self.days.get(&date).map(|e| e.value().clone())
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply to the locked day + notify, in one call.
    pub(super) async fn persist_and_apply(
        &self,
        day: &mut DayState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(day, event);
        self.notify.send(&self.studio, event);
        Ok(())
    }

    /// WAL-append + notify for events that the caller applies itself
    /// (settings, providers, exceptions).
    pub(super) async fn persist(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.notify.send(&self.studio, event);
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. `BookingCreated` carries the full record
    /// (status and earnings included), so one event per booking suffices.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        events.push(Event::SettingsUpdated {
            settings: *self.settings.read().await,
        });
        for entry in self.providers.iter() {
            events.push(Event::ProviderUpserted {
                provider: entry.value().clone(),
            });
        }
        for entry in self.exceptions.iter() {
            events.push(Event::ExceptionSet {
                exception: entry.value().clone(),
            });
        }

        let dates: Vec<NaiveDate> = self.days.iter().map(|e| *e.key()).collect();
        for date in dates {
            let day = match self.existing_day(date) {
                Some(d) => d,
                None => continue,
            };
            let guard = day.read().await;
            for slot in &guard.blocked {
                events.push(Event::SlotManaged { slot: slot.clone() });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

// ── Boundary parsing ─────────────────────────────────────────────

pub(super) fn parse_date(s: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| EngineError::InvalidDate(s.to_string()))
}

pub(super) fn parse_time(s: &str) -> Result<TimeOfDay, EngineError> {
    TimeOfDay::parse(s).ok_or_else(|| EngineError::InvalidTime(s.to_string()))
}
