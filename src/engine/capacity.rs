use serde::Serialize;

use super::{Engine, EngineError, parse_date, parse_time};
use crate::model::{CapacitySettings, DayState, Min, Span, TimeOfDay};

/// Outcome of a successful capacity validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityCheck {
    /// Active bookings whose buffered interval overlaps the request's.
    pub overlapping_count: u32,
    pub remaining_capacity: u32,
}

/// Non-failing capacity probe, for pre-booking UI checks.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CapacityReport {
    pub has_capacity: bool,
    pub overlapping_count: u32,
    pub max_capacity: u32,
    pub remaining_capacity: u32,
    pub service_duration_min: u32,
    pub buffer_min: u32,
}

/// Validate a requested window against a day's state. Pure: the caller
/// holds whatever lock covers `day`, so the answer stays true until the
/// caller releases it.
///
/// Two gates, in order: the buffered-overlap count against the concurrency
/// limit, then the unbuffered window against administrative blocks.
pub(super) fn validate_against(
    settings: &CapacitySettings,
    day: &DayState,
    start: TimeOfDay,
    duration_min: u32,
    excluding: Option<ulid::Ulid>,
) -> Result<CapacityCheck, EngineError> {
    if !settings.capacity_enabled {
        return Ok(CapacityCheck {
            overlapping_count: 0,
            remaining_capacity: settings.max_concurrent,
        });
    }

    let overlapping = overlap_count(settings, day, start, duration_min, excluding);
    if overlapping >= settings.max_concurrent {
        return Err(EngineError::CapacityExceeded {
            limit: settings.max_concurrent,
        });
    }

    // Blocks compare against the unbuffered request window.
    let requested = Span::new(
        start.minutes(),
        start.minutes() + duration_min as Min,
    );
    for slot in &day.blocked {
        if slot.blocked && slot.span().overlaps(&requested) {
            return Err(EngineError::SlotBlocked {
                reason: slot
                    .reason
                    .clone()
                    .unwrap_or_else(|| "Administrative block".to_string()),
            });
        }
    }

    Ok(CapacityCheck {
        overlapping_count: overlapping,
        remaining_capacity: settings.max_concurrent - overlapping,
    })
}

/// Count active bookings whose buffered interval overlaps the buffered
/// request interval. Symmetric: the buffer extends both the request and
/// every existing booking.
pub(super) fn overlap_count(
    settings: &CapacitySettings,
    day: &DayState,
    start: TimeOfDay,
    duration_min: u32,
    excluding: Option<ulid::Ulid>,
) -> u32 {
    let requested = Span::new(
        start.minutes(),
        start.minutes() + (duration_min + settings.buffer_min) as Min,
    );
    day.active()
        .filter(|b| Some(b.id) != excluding)
        .filter(|b| b.buffered_span(settings.buffer_min).overlaps(&requested))
        .count() as u32
}

impl Engine {
    /// Validate that a booking could be placed at `date`/`time` for
    /// `duration_min` minutes. Read-only; the answer can go stale the
    /// moment the lock drops, so `create_booking` re-validates under its
    /// own write lock.
    pub async fn validate_capacity(
        &self,
        date: &str,
        time: &str,
        duration_min: u32,
    ) -> Result<CapacityCheck, EngineError> {
        let date = parse_date(date)?;
        let start = parse_time(time)?;
        if duration_min == 0 || duration_min > crate::limits::MAX_DURATION_MIN {
            return Err(EngineError::LimitExceeded("duration out of range"));
        }
        let settings = *self.settings.read().await;

        let Some(day) = self.existing_day(date) else {
            // Untouched day: only the enabled/limit defaults apply.
            return validate_against(&settings, &DayState::default(), start, duration_min, None);
        };
        let guard = day.read().await;
        validate_against(&settings, &guard, start, duration_min, None)
    }

    /// Probe capacity for a style without failing: blocked slots and full
    /// capacity both come back as `has_capacity: false`.
    pub async fn check_capacity(
        &self,
        date: &str,
        time: &str,
        style: &str,
    ) -> Result<CapacityReport, EngineError> {
        let duration_min = self.config.catalog.duration_minutes(style);
        let settings = *self.settings.read().await;
        let result = self.validate_capacity(date, time, duration_min).await;

        let report = match result {
            Ok(check) => CapacityReport {
                has_capacity: true,
                overlapping_count: check.overlapping_count,
                max_capacity: settings.max_concurrent,
                remaining_capacity: check.remaining_capacity,
                service_duration_min: duration_min,
                buffer_min: settings.buffer_min,
            },
            Err(EngineError::CapacityExceeded { limit }) => CapacityReport {
                has_capacity: false,
                overlapping_count: limit,
                max_capacity: limit,
                remaining_capacity: 0,
                service_duration_min: duration_min,
                buffer_min: settings.buffer_min,
            },
            Err(EngineError::SlotBlocked { .. }) => CapacityReport {
                has_capacity: false,
                overlapping_count: 0,
                max_capacity: settings.max_concurrent,
                remaining_capacity: 0,
                service_duration_min: duration_min,
                buffer_min: settings.buffer_min,
            },
            Err(e) => return Err(e),
        };
        Ok(report)
    }
}
