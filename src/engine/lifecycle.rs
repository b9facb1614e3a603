use ulid::Ulid;

use super::capacity::validate_against;
use super::{Engine, EngineError, parse_date, parse_time};
use crate::limits;
use crate::model::{Booking, BookingStatus, Event};

/// Flat platform fee recorded when a booking confirms.
pub const PLATFORM_FEE_CENTS: i64 = 500;

/// Everything the caller supplies to create a booking. Pricing is decided
/// upstream; the engine stores the quoted price as-is.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub style: String,
    /// "YYYY-MM-DD"
    pub date: String,
    /// "HH:MM"
    pub time: String,
    /// Defaults to the catalog duration for `style`.
    pub duration_min: Option<u32>,
    pub final_price_cents: i64,
    pub preferred_provider_id: Option<Ulid>,
}

/// What `create_booking` reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedBooking {
    pub booking_id: Ulid,
    /// `None` when assignment failed and the booking proceeds unassigned.
    pub provider_id: Option<Ulid>,
    pub provider_name: Option<String>,
    pub overlapping_count: u32,
    pub remaining_capacity: u32,
    pub status: BookingStatus,
}

impl Engine {
    /// Create a booking: capacity validation is fatal, provider assignment
    /// is not. The day's write lock is held from validation through the
    /// WAL append, so two racing requests for the last slot serialize and
    /// the loser sees the winner's booking.
    pub async fn create_booking(
        &self,
        id: Ulid,
        req: BookingRequest,
    ) -> Result<CreatedBooking, EngineError> {
        if self.booking_to_date.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if req.style.len() > limits::MAX_STYLE_LEN {
            return Err(EngineError::LimitExceeded("style name too long"));
        }
        let date = parse_date(&req.date)?;
        let start = parse_time(&req.time)?;
        let duration_min = req
            .duration_min
            .unwrap_or_else(|| self.config.catalog.duration_minutes(&req.style));
        if duration_min == 0 || duration_min > limits::MAX_DURATION_MIN {
            return Err(EngineError::LimitExceeded("duration out of range"));
        }

        let settings = *self.settings.read().await;
        let day = self.day(date);
        let mut guard = day.write().await;

        if guard.bookings.len() >= limits::MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings on this day"));
        }

        let check = match validate_against(&settings, &guard, start, duration_min, None) {
            Ok(check) => check,
            Err(e) => {
                metrics::counter!(crate::observability::CAPACITY_REJECTIONS_TOTAL).increment(1);
                return Err(e);
            }
        };

        // Assignment failure downgrades to an unassigned booking; staff
        // resolve it manually.
        let assignment = match self
            .assign_within(
                &guard,
                date,
                start,
                duration_min,
                &req.style,
                req.preferred_provider_id,
            )
            .await
        {
            Ok(a) => Some(a),
            Err(e) => {
                tracing::warn!(booking = %id, "assignment failed, proceeding unassigned: {e}");
                metrics::counter!(crate::observability::ASSIGNMENT_FAILURES_TOTAL).increment(1);
                None
            }
        };

        let status = if self.config.payment_required {
            BookingStatus::Pending
        } else {
            BookingStatus::Confirmed
        };
        let booking = Booking {
            id,
            provider_id: assignment.as_ref().map(|a| a.provider_id),
            preferred_provider_id: req.preferred_provider_id,
            date,
            start,
            duration_min,
            style: req.style,
            final_price_cents: req.final_price_cents,
            status,
            capacity_group_id: format!("{}_{}", req.date, req.time),
            concurrent_booking_count: check.overlapping_count + 1,
            provider_earnings_cents: None,
        };

        self.persist_and_apply(&mut guard, &Event::BookingCreated { booking })
            .await?;
        self.booking_to_date.insert(id, date);
        metrics::counter!(
            crate::observability::BOOKINGS_CREATED_TOTAL,
            "status" => status.to_string()
        )
        .increment(1);

        Ok(CreatedBooking {
            booking_id: id,
            provider_id: assignment.as_ref().map(|a| a.provider_id),
            provider_name: assignment.map(|a| a.provider_name),
            overlapping_count: check.overlapping_count,
            remaining_capacity: check.remaining_capacity - 1,
            status,
        })
    }

    /// Payment confirmed: pending → confirmed, and the platform fee is
    /// recorded once the transition has committed.
    pub async fn confirm_booking(&self, id: Ulid) -> Result<(), EngineError> {
        self.transition(id, &[BookingStatus::Pending], BookingStatus::Confirmed)
            .await?;
        self.jobs().record_transaction(id, PLATFORM_FEE_CENTS, 0);
        Ok(())
    }

    /// Cancel from pending or confirmed. The slot's capacity frees
    /// immediately; terminal states (including no-show) stay put.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<(), EngineError> {
        self.transition(
            id,
            &[BookingStatus::Pending, BookingStatus::Confirmed],
            BookingStatus::Cancelled,
        )
        .await?;
        Ok(())
    }

    /// Service delivered: confirmed → completed. Provider earnings are
    /// computed from the commission split, then the revenue transaction and
    /// the delayed review request fire after the commit.
    pub async fn complete_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let date = self
            .booking_to_date
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let day = self.day(date);
        let mut guard = day.write().await;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?.clone();
        if booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidStateTransition {
                from: booking.status,
                to: BookingStatus::Completed,
            });
        }

        // Integer division truncates toward zero; remainders stay with the
        // platform.
        let earnings = booking.provider_id.map(|provider_id| {
            let split = self
                .providers
                .get(&provider_id)
                .map(|p| p.value().split_or_default())
                .unwrap_or(60);
            booking.final_price_cents * split as i64 / 100
        });

        self.persist_and_apply(
            &mut guard,
            &Event::BookingStatusChanged {
                id,
                status: BookingStatus::Completed,
                provider_earnings_cents: earnings,
            },
        )
        .await?;
        drop(guard);
        metrics::counter!(
            crate::observability::TRANSITIONS_TOTAL,
            "to" => "completed"
        )
        .increment(1);

        self.jobs()
            .record_transaction(id, booking.final_price_cents, earnings.unwrap_or(0));
        self.jobs()
            .schedule_review(id, self.config.review_request_delay_min);
        Ok(())
    }

    /// Client never showed: confirmed → no_show. Terminal; a no-show is
    /// not cancellable afterwards.
    pub async fn mark_no_show(&self, id: Ulid) -> Result<(), EngineError> {
        self.transition(id, &[BookingStatus::Confirmed], BookingStatus::NoShow)
            .await?;
        Ok(())
    }

    /// Move a pending or confirmed booking to a new date/time, re-running
    /// capacity validation with the booking itself excluded. A full slot
    /// surfaces as `ConflictOnReschedule`; an administrative block keeps
    /// its own error.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        new_date: &str,
        new_time: &str,
    ) -> Result<(), EngineError> {
        let old_date = self
            .booking_to_date
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let date = parse_date(new_date)?;
        let start = parse_time(new_time)?;
        let settings = *self.settings.read().await;

        let old_day = self.day(old_date);
        if date == old_date {
            let mut guard = old_day.write().await;
            let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?.clone();
            check_reschedulable(&booking)?;
            validate_against(&settings, &guard, start, booking.duration_min, Some(id)).map_err(
                |e| match e {
                    EngineError::CapacityExceeded { .. } => {
                        EngineError::ConflictOnReschedule { booking_id: id }
                    }
                    other => other,
                },
            )?;

            let event = Event::BookingRescheduled { id, date, start };
            self.wal_append(&event).await?;
            if let Some(mut b) = guard.remove_booking(id) {
                b.start = start;
                b.capacity_group_id = format!("{new_date}_{new_time}");
                guard.insert_booking(b);
            }
            self.notify.send(self.studio(), &event);
            return Ok(());
        }

        // Two days involved: lock in date order so concurrent reschedules
        // between the same pair cannot deadlock.
        let new_day = self.day(date);
        let (mut old_guard, mut new_guard) = if old_date < date {
            let a = old_day.write().await;
            let b = new_day.write().await;
            (a, b)
        } else {
            let b = new_day.write().await;
            let a = old_day.write().await;
            (a, b)
        };

        let booking = old_guard
            .booking(id)
            .ok_or(EngineError::NotFound(id))?
            .clone();
        check_reschedulable(&booking)?;
        if new_guard.bookings.len() >= limits::MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings on this day"));
        }
        validate_against(&settings, &new_guard, start, booking.duration_min, Some(id)).map_err(
            |e| match e {
                EngineError::CapacityExceeded { .. } => {
                    EngineError::ConflictOnReschedule { booking_id: id }
                }
                other => other,
            },
        )?;

        let event = Event::BookingRescheduled { id, date, start };
        self.wal_append(&event).await?;
        if let Some(mut b) = old_guard.remove_booking(id) {
            b.date = date;
            b.start = start;
            b.capacity_group_id = format!("{new_date}_{new_time}");
            new_guard.insert_booking(b);
        }
        self.booking_to_date.insert(id, date);
        self.notify.send(self.studio(), &event);
        Ok(())
    }

    /// Hand a non-terminal booking to a different provider, who must pass
    /// the full availability check for the booking's window (the booking
    /// itself excluded from conflict counting).
    pub async fn reassign_booking(
        &self,
        id: Ulid,
        provider_id: Ulid,
    ) -> Result<(), EngineError> {
        let date = self
            .booking_to_date
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let provider = self
            .providers
            .get(&provider_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(provider_id))?;
        let exception = self
            .exceptions
            .get(&(provider_id, date))
            .map(|e| e.value().clone());

        let day = self.day(date);
        let mut guard = day.write().await;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?.clone();
        if booking.status.is_terminal() {
            return Err(EngineError::InvalidStateTransition {
                from: booking.status,
                to: booking.status,
            });
        }

        if super::availability::provider_availability(
            &provider,
            exception.as_ref(),
            &guard,
            date,
            booking.start,
            booking.duration_min,
            Some(id),
        )
        .is_err()
        {
            return Err(EngineError::NoAvailableProviders);
        }

        self.persist_and_apply(&mut guard, &Event::BookingReassigned { id, provider_id })
            .await?;
        metrics::counter!(crate::observability::ASSIGNMENTS_TOTAL).increment(1);
        Ok(())
    }

    /// Shared guarded status write. `from` lists the admissible current
    /// states.
    async fn transition(
        &self,
        id: Ulid,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let date = self
            .booking_to_date
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let day = self.day(date);
        let mut guard = day.write().await;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?.status;
        if !from.contains(&current) {
            return Err(EngineError::InvalidStateTransition { from: current, to });
        }

        self.persist_and_apply(
            &mut guard,
            &Event::BookingStatusChanged {
                id,
                status: to,
                provider_earnings_cents: None,
            },
        )
        .await?;
        let updated = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        drop(guard);
        metrics::counter!(
            crate::observability::TRANSITIONS_TOTAL,
            "to" => to.to_string()
        )
        .increment(1);
        Ok(updated)
    }
}

fn check_reschedulable(booking: &Booking) -> Result<(), EngineError> {
    match booking.status {
        BookingStatus::Pending | BookingStatus::Confirmed => Ok(()),
        other => Err(EngineError::InvalidStateTransition {
            from: other,
            to: other,
        }),
    }
}
