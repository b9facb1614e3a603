use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use super::availability::{provider_availability, workload_minutes};
use super::{Engine, EngineError, parse_date, parse_time};
use crate::model::{DayState, TimeOfDay};

/// The chosen provider for a booking window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub provider_id: Ulid,
    pub provider_name: String,
    pub split_percentage: u8,
    /// Booked minutes the provider already carried on that day.
    pub workload_minutes: u32,
}

/// One row of the `available_providers` listing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProviderSlot {
    pub provider_id: Ulid,
    pub name: String,
    pub qualified: bool,
    pub available: bool,
    pub workload_minutes: u32,
}

impl Engine {
    /// Pick a provider for the window. Runs against the caller's snapshot
    /// of the day, so `create_booking` can assign under the same write lock
    /// that admits the booking.
    ///
    /// Preference order: the requested provider if they pass every check,
    /// otherwise the candidate with the lowest same-day workload. Failure
    /// reasons distinguish "nobody on staff", "nobody does this style" and
    /// "everyone qualified is busy".
    pub(super) async fn assign_within(
        &self,
        day: &DayState,
        date: NaiveDate,
        start: TimeOfDay,
        duration_min: u32,
        style: &str,
        preferred: Option<Ulid>,
    ) -> Result<Assignment, EngineError> {
        let active: Vec<_> = self
            .providers
            .iter()
            .filter(|e| e.value().is_active)
            .map(|e| e.value().clone())
            .collect();
        if active.is_empty() {
            return Err(EngineError::NoActiveProviders);
        }

        let qualified: Vec<_> = active.into_iter().filter(|p| p.qualified_for(style)).collect();
        if qualified.is_empty() {
            return Err(EngineError::NoQualifiedProviders {
                style: style.to_string(),
            });
        }

        let mut best: Option<Assignment> = None;
        for p in &qualified {
            let exception = self
                .exceptions
                .get(&(p.id, date))
                .map(|e| e.value().clone());
            if provider_availability(p, exception.as_ref(), day, date, start, duration_min, None)
                .is_err()
            {
                continue;
            }

            let workload = workload_minutes(day, p.id);
            let candidate = Assignment {
                provider_id: p.id,
                provider_name: p.name.clone(),
                split_percentage: p.split_or_default(),
                workload_minutes: workload,
            };

            if preferred == Some(p.id) {
                metrics::counter!(crate::observability::ASSIGNMENTS_TOTAL).increment(1);
                return Ok(candidate);
            }
            // Strict less-than: ties keep the earlier candidate.
            match &best {
                Some(b) if candidate.workload_minutes >= b.workload_minutes => {}
                _ => best = Some(candidate),
            }
        }

        match best {
            Some(a) => {
                metrics::counter!(crate::observability::ASSIGNMENTS_TOTAL).increment(1);
                Ok(a)
            }
            None => Err(EngineError::NoAvailableProviders),
        }
    }

    /// Pick a provider for a hypothetical booking. Advisory: the answer
    /// is not reserved; `create_booking` re-runs assignment under its lock.
    pub async fn auto_assign(
        &self,
        style: &str,
        date: &str,
        time: &str,
        duration_min: Option<u32>,
        preferred: Option<Ulid>,
    ) -> Result<Assignment, EngineError> {
        let parsed_date = parse_date(date)?;
        let start = parse_time(time)?;
        let duration = duration_min.unwrap_or_else(|| self.config.catalog.duration_minutes(style));
        if duration == 0 || duration > crate::limits::MAX_DURATION_MIN {
            return Err(EngineError::LimitExceeded("duration out of range"));
        }

        match self.existing_day(parsed_date) {
            Some(day) => {
                let guard = day.read().await;
                self.assign_within(&guard, parsed_date, start, duration, style, preferred)
                    .await
            }
            None => {
                self.assign_within(
                    &DayState::default(),
                    parsed_date,
                    start,
                    duration,
                    style,
                    preferred,
                )
                .await
            }
        }
    }

    /// Every active provider's fitness for a window, qualified ones first,
    /// each group ordered by ascending workload.
    pub async fn available_providers(
        &self,
        date: &str,
        time: &str,
        style: &str,
        duration_min: Option<u32>,
    ) -> Result<Vec<ProviderSlot>, EngineError> {
        let parsed_date = parse_date(date)?;
        let start = parse_time(time)?;
        let duration = duration_min.unwrap_or_else(|| self.config.catalog.duration_minutes(style));
        if duration == 0 || duration > crate::limits::MAX_DURATION_MIN {
            return Err(EngineError::LimitExceeded("duration out of range"));
        }

        let day_arc = self.existing_day(parsed_date);
        let default_day;
        let guard;
        let day: &DayState = match &day_arc {
            Some(arc) => {
                guard = arc.read().await;
                &guard
            }
            None => {
                default_day = DayState::default();
                &default_day
            }
        };

        let mut slots = Vec::new();
        for entry in self.providers.iter() {
            let p = entry.value();
            if !p.is_active {
                continue;
            }
            let exception = self
                .exceptions
                .get(&(p.id, parsed_date))
                .map(|e| e.value().clone());
            let available = provider_availability(
                p,
                exception.as_ref(),
                day,
                parsed_date,
                start,
                duration,
                None,
            )
            .is_ok();
            slots.push(ProviderSlot {
                provider_id: p.id,
                name: p.name.clone(),
                qualified: p.qualified_for(style),
                available,
                workload_minutes: workload_minutes(day, p.id),
            });
        }

        slots.sort_by(|a, b| {
            b.qualified
                .cmp(&a.qualified)
                .then(a.workload_minutes.cmp(&b.workload_minutes))
                .then(a.name.cmp(&b.name))
        });
        Ok(slots)
    }
}
