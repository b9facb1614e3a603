use chrono::NaiveDate;
use ulid::Ulid;

use super::{Engine, EngineError, parse_date, parse_time};
use crate::model::{
    AvailabilityException, DayState, Min, Provider, Span, TimeOfDay, day_number,
};

/// Fixed personal setup/cleanup margin around each provider's bookings,
/// independent of the business-wide capacity buffer.
pub const PROVIDER_BUFFER_MIN: u32 = 30;

/// Why a provider cannot take a given window. Variants are ordered the way
/// the checks run; the first failing check wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    Inactive,
    OffDay,
    OutsideHours,
    /// A whole-day exception marks the provider off.
    DayException,
    /// A windowed exception intersects the requested window.
    WindowException,
    /// An existing booking for this provider conflicts, buffer included.
    BookingConflict(Ulid),
    DailyCapReached,
}

/// Decide whether `provider` can take the window starting at `start` for
/// `duration_min` minutes on `date`. Pure over a snapshot of the day.
///
/// Checks run in a fixed order and short-circuit: active → working day →
/// default hours → date exception → booking conflicts → daily cap.
pub(super) fn provider_availability(
    provider: &Provider,
    exception: Option<&AvailabilityException>,
    day: &DayState,
    date: NaiveDate,
    start: TimeOfDay,
    duration_min: u32,
    excluding: Option<Ulid>,
) -> Result<(), Unavailable> {
    if !provider.is_active {
        return Err(Unavailable::Inactive);
    }

    if !provider.working_days.contains(&day_number(date)) {
        return Err(Unavailable::OffDay);
    }

    let requested = Span::new(start.minutes(), start.minutes() + duration_min as Min);
    // Ending exactly at closing time is allowed.
    if requested.start < provider.default_start.minutes()
        || requested.end > provider.default_end.minutes()
    {
        return Err(Unavailable::OutsideHours);
    }

    if let Some(exc) = exception
        && !exc.is_available
    {
        match exc.window {
            None => return Err(Unavailable::DayException),
            Some((w_start, w_end)) => {
                let blocked = Span::new(w_start.minutes(), w_end.minutes());
                if blocked.overlaps(&requested) {
                    return Err(Unavailable::WindowException);
                }
            }
        }
    }

    let mut count = 0u32;
    for b in day.active() {
        if b.provider_id != Some(provider.id) || Some(b.id) == excluding {
            continue;
        }
        count += 1;
        // The personal buffer pads both sides of the existing booking.
        let padded = Span::new(
            b.span().start - PROVIDER_BUFFER_MIN as Min,
            b.span().end + PROVIDER_BUFFER_MIN as Min,
        );
        if padded.overlaps(&requested) {
            return Err(Unavailable::BookingConflict(b.id));
        }
    }

    if let Some(cap) = provider.max_daily_bookings
        && count >= cap
    {
        return Err(Unavailable::DailyCapReached);
    }

    Ok(())
}

/// Sum of booked minutes (no buffer) for one provider on a day.
pub(super) fn workload_minutes(day: &DayState, provider_id: Ulid) -> u32 {
    day.active()
        .filter(|b| b.provider_id == Some(provider_id))
        .map(|b| b.duration_min)
        .sum()
}

impl Engine {
    /// Can this provider take the window? `Ok(false)` is the ordinary
    /// "no"; errors are reserved for unknown providers and bad input.
    pub async fn is_provider_available(
        &self,
        provider_id: Ulid,
        date: &str,
        time: &str,
        duration_min: u32,
    ) -> Result<bool, EngineError> {
        Ok(self
            .explain_provider_availability(provider_id, date, time, duration_min)
            .await?
            .is_none())
    }

    /// Like `is_provider_available` but names the first failing check.
    pub async fn explain_provider_availability(
        &self,
        provider_id: Ulid,
        date: &str,
        time: &str,
        duration_min: u32,
    ) -> Result<Option<Unavailable>, EngineError> {
        let parsed_date = parse_date(date)?;
        let start = parse_time(time)?;
        if duration_min == 0 || duration_min > crate::limits::MAX_DURATION_MIN {
            return Err(EngineError::LimitExceeded("duration out of range"));
        }
        let provider = self
            .providers
            .get(&provider_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(provider_id))?;
        let exception = self
            .exceptions
            .get(&(provider_id, parsed_date))
            .map(|e| e.value().clone());

        let result = match self.existing_day(parsed_date) {
            Some(day) => {
                let guard = day.read().await;
                provider_availability(
                    &provider,
                    exception.as_ref(),
                    &guard,
                    parsed_date,
                    start,
                    duration_min,
                    None,
                )
            }
            None => provider_availability(
                &provider,
                exception.as_ref(),
                &DayState::default(),
                parsed_date,
                start,
                duration_min,
                None,
            ),
        };
        Ok(result.err())
    }

    /// Booked minutes for a provider on one date.
    pub async fn provider_workload(
        &self,
        provider_id: Ulid,
        date: &str,
    ) -> Result<u32, EngineError> {
        if !self.providers.contains_key(&provider_id) {
            return Err(EngineError::NotFound(provider_id));
        }
        let date = parse_date(date)?;
        let Some(day) = self.existing_day(date) else {
            return Ok(0);
        };
        let guard = day.read().await;
        Ok(workload_minutes(&guard, provider_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, BookingStatus};

    fn time(s: &str) -> TimeOfDay {
        TimeOfDay::parse(s).unwrap()
    }

    // 2025-06-02 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn provider() -> Provider {
        Provider {
            id: Ulid::new(),
            name: "Ada".into(),
            specialties: vec!["Box Braids".into()],
            is_active: true,
            working_days: vec![1, 2, 3, 4, 5],
            default_start: time("09:00"),
            default_end: time("18:00"),
            max_daily_bookings: None,
            split_percentage: None,
        }
    }

    fn booking_for(provider_id: Ulid, start: &str, duration_min: u32) -> Booking {
        Booking {
            id: Ulid::new(),
            provider_id: Some(provider_id),
            preferred_provider_id: None,
            date: monday(),
            start: time(start),
            duration_min,
            style: "Box Braids".into(),
            final_price_cents: 20_000,
            status: BookingStatus::Confirmed,
            capacity_group_id: format!("2025-06-02_{start}"),
            concurrent_booking_count: 1,
            provider_earnings_cents: None,
        }
    }

    fn check(
        p: &Provider,
        exc: Option<&AvailabilityException>,
        day: &DayState,
        start: &str,
        duration_min: u32,
    ) -> Result<(), Unavailable> {
        provider_availability(p, exc, day, monday(), time(start), duration_min, None)
    }

    #[test]
    fn available_inside_hours() {
        let p = provider();
        assert_eq!(check(&p, None, &DayState::default(), "09:00", 240), Ok(()));
    }

    #[test]
    fn inactive_wins_over_everything() {
        let mut p = provider();
        p.is_active = false;
        p.working_days = vec![]; // would also be OffDay
        assert_eq!(
            check(&p, None, &DayState::default(), "09:00", 60),
            Err(Unavailable::Inactive)
        );
    }

    #[test]
    fn off_day() {
        let mut p = provider();
        p.working_days = vec![0, 6]; // weekends only
        assert_eq!(
            check(&p, None, &DayState::default(), "09:00", 60),
            Err(Unavailable::OffDay)
        );
    }

    #[test]
    fn outside_default_hours() {
        let p = provider();
        let day = DayState::default();
        assert_eq!(check(&p, None, &day, "08:00", 60), Err(Unavailable::OutsideHours));
        // 16:00 + 180 runs past 18:00
        assert_eq!(check(&p, None, &day, "16:00", 180), Err(Unavailable::OutsideHours));
        // Ending exactly at close is fine
        assert_eq!(check(&p, None, &day, "15:00", 180), Ok(()));
    }

    #[test]
    fn whole_day_exception_blocks_all_times() {
        let p = provider();
        let exc = AvailabilityException {
            provider_id: p.id,
            date: monday(),
            is_available: false,
            window: None,
            reason: Some("sick".into()),
        };
        let day = DayState::default();
        assert_eq!(
            check(&p, Some(&exc), &day, "09:00", 60),
            Err(Unavailable::DayException)
        );
        assert_eq!(
            check(&p, Some(&exc), &day, "17:00", 60),
            Err(Unavailable::DayException)
        );
    }

    #[test]
    fn windowed_exception_blocks_overlap_only() {
        let p = provider();
        let exc = AvailabilityException {
            provider_id: p.id,
            date: monday(),
            is_available: false,
            window: Some((time("12:00"), time("14:00"))),
            reason: None,
        };
        let day = DayState::default();
        // Partial overlap with the window blocks, not just containment.
        assert_eq!(
            check(&p, Some(&exc), &day, "11:00", 120),
            Err(Unavailable::WindowException)
        );
        assert_eq!(
            check(&p, Some(&exc), &day, "13:00", 120),
            Err(Unavailable::WindowException)
        );
        // Adjacent windows are fine.
        assert_eq!(check(&p, Some(&exc), &day, "10:00", 120), Ok(()));
        assert_eq!(check(&p, Some(&exc), &day, "14:00", 120), Ok(()));
    }

    #[test]
    fn available_exception_is_inert() {
        let p = provider();
        let exc = AvailabilityException {
            provider_id: p.id,
            date: monday(),
            is_available: true,
            window: Some((time("09:00"), time("18:00"))),
            reason: None,
        };
        assert_eq!(check(&p, Some(&exc), &DayState::default(), "10:00", 60), Ok(()));
    }

    #[test]
    fn booking_conflict_pads_both_sides() {
        let p = provider();
        let mut day = DayState::default();
        // [12:00, 14:00), padded to [11:30, 14:30)
        day.insert_booking(booking_for(p.id, "12:00", 120));

        // Ends at 11:30, exactly at the padded edge: allowed.
        assert_eq!(check(&p, None, &day, "10:30", 60), Ok(()));
        // Ends at 12:00, inside the leading pad.
        assert!(matches!(
            check(&p, None, &day, "11:00", 60),
            Err(Unavailable::BookingConflict(_))
        ));
        // Starts at 14:00, inside the trailing pad.
        assert!(matches!(
            check(&p, None, &day, "14:00", 60),
            Err(Unavailable::BookingConflict(_))
        ));
        // Starts at 14:30, at the padded edge: allowed.
        assert_eq!(check(&p, None, &day, "14:30", 60), Ok(()));
    }

    #[test]
    fn other_providers_bookings_do_not_conflict() {
        let p = provider();
        let mut day = DayState::default();
        day.insert_booking(booking_for(Ulid::new(), "12:00", 120));
        assert_eq!(check(&p, None, &day, "12:00", 120), Ok(()));
    }

    #[test]
    fn cancelled_booking_frees_the_window() {
        let p = provider();
        let mut day = DayState::default();
        let mut b = booking_for(p.id, "12:00", 120);
        b.status = BookingStatus::Cancelled;
        day.insert_booking(b);
        assert_eq!(check(&p, None, &day, "12:00", 120), Ok(()));
    }

    #[test]
    fn daily_cap_is_strictly_less() {
        let mut p = provider();
        p.max_daily_bookings = Some(1);
        let mut day = DayState::default();
        day.insert_booking(booking_for(p.id, "09:00", 120));
        // One booking already: next request trips the cap even with no overlap.
        assert_eq!(
            check(&p, None, &day, "15:00", 120),
            Err(Unavailable::DailyCapReached)
        );
    }

    #[test]
    fn excluding_skips_own_booking_for_cap_and_conflict() {
        let mut p = provider();
        p.max_daily_bookings = Some(1);
        let mut day = DayState::default();
        let b = booking_for(p.id, "09:00", 120);
        let id = b.id;
        day.insert_booking(b);
        let r = provider_availability(&p, None, &day, monday(), time("09:00"), 120, Some(id));
        assert_eq!(r, Ok(()));
    }

    #[test]
    fn workload_sums_active_minutes() {
        let p = provider();
        let mut day = DayState::default();
        day.insert_booking(booking_for(p.id, "09:00", 240));
        day.insert_booking(booking_for(p.id, "14:00", 120));
        let mut cancelled = booking_for(p.id, "17:00", 60);
        cancelled.status = BookingStatus::Cancelled;
        day.insert_booking(cancelled);
        day.insert_booking(booking_for(Ulid::new(), "09:00", 480));
        assert_eq!(workload_minutes(&day, p.id), 360);
    }
}
