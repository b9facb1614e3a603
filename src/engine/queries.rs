use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use super::availability::workload_minutes;
use super::{Engine, EngineError, parse_date};
use crate::limits;
use crate::model::{Booking, BookingStatus, Min, TimeOfDay};

/// Hourly occupancy grid bounds, matching typical studio hours.
const GRID_OPEN_HOUR: u16 = 9;
const GRID_CLOSE_HOUR: u16 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotStatus {
    Available,
    Busy,
    Full,
    Blocked,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HourlyCapacity {
    pub time: TimeOfDay,
    pub booking_count: u32,
    pub status: SlotStatus,
}

/// One day's occupancy overview for dashboards.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CapacityStatus {
    pub date: NaiveDate,
    pub capacity_enabled: bool,
    pub max_capacity: u32,
    pub buffer_min: u32,
    pub hours: Vec<HourlyCapacity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSchedule {
    pub provider_id: Ulid,
    pub bookings: Vec<Booking>,
    pub exceptions: Vec<crate::model::AvailabilityException>,
    pub total_minutes: u32,
}

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let date = self
            .booking_to_date
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let day = self.day(date);
        let guard = day.read().await;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Bookings on a date in start-time order, optionally filtered by
    /// status.
    pub async fn bookings_for_date(
        &self,
        date: &str,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, EngineError> {
        let date = parse_date(date)?;
        let Some(day) = self.existing_day(date) else {
            return Ok(Vec::new());
        };
        let guard = day.read().await;
        Ok(guard
            .bookings
            .iter()
            .filter(|b| status.is_none_or(|s| b.status == s))
            .cloned()
            .collect())
    }

    /// A provider's bookings across an inclusive date range, with their
    /// summed active minutes.
    pub async fn provider_schedule(
        &self,
        provider_id: Ulid,
        from: &str,
        to: &str,
    ) -> Result<ProviderSchedule, EngineError> {
        if !self.providers.contains_key(&provider_id) {
            return Err(EngineError::NotFound(provider_id));
        }
        let from = parse_date(from)?;
        let to = parse_date(to)?;
        if to < from {
            return Err(EngineError::InvalidDate(format!("{to} is before {from}")));
        }
        if (to - from).num_days() > limits::MAX_SCHEDULE_RANGE_DAYS {
            return Err(EngineError::LimitExceeded("schedule range too wide"));
        }

        let mut bookings = Vec::new();
        let mut exceptions = Vec::new();
        let mut total_minutes = 0u32;
        let mut date = from;
        while date <= to {
            if let Some(exc) = self.exceptions.get(&(provider_id, date)) {
                exceptions.push(exc.value().clone());
            }
            if let Some(day) = self.existing_day(date) {
                let guard = day.read().await;
                total_minutes += workload_minutes(&guard, provider_id);
                bookings.extend(
                    guard
                        .bookings
                        .iter()
                        .filter(|b| b.provider_id == Some(provider_id))
                        .cloned(),
                );
            }
            date = date.succ_opt().ok_or_else(|| {
                EngineError::InvalidDate("date range exceeds calendar".to_string())
            })?;
        }

        Ok(ProviderSchedule {
            provider_id,
            bookings,
            exceptions,
            total_minutes,
        })
    }

    /// Hour-by-hour occupancy from 09:00 to 18:00. A booking counts toward
    /// an hour when its buffered interval covers the hour's start; an hour
    /// inside an administrative block reads as blocked regardless of
    /// occupancy.
    pub async fn capacity_status(&self, date: &str) -> Result<CapacityStatus, EngineError> {
        let parsed_date = parse_date(date)?;
        let settings = *self.settings.read().await;

        let day_arc = self.existing_day(parsed_date);
        let default_day;
        let guard;
        let day: &crate::model::DayState = match &day_arc {
            Some(arc) => {
                guard = arc.read().await;
                &guard
            }
            None => {
                default_day = crate::model::DayState::default();
                &default_day
            }
        };

        let mut hours = Vec::with_capacity((GRID_CLOSE_HOUR - GRID_OPEN_HOUR) as usize);
        for hour in GRID_OPEN_HOUR..GRID_CLOSE_HOUR {
            let hour_start = (hour * 60) as Min;
            let count = day
                .active()
                .filter(|b| {
                    let span = b.buffered_span(settings.buffer_min);
                    span.start <= hour_start && hour_start < span.end
                })
                .count() as u32;
            let in_block = day.blocked.iter().any(|s| {
                s.blocked && s.start.minutes() <= hour_start && hour_start < s.end.minutes()
            });

            let status = if in_block {
                SlotStatus::Blocked
            } else if !settings.capacity_enabled {
                SlotStatus::Available
            } else if count >= settings.max_concurrent {
                SlotStatus::Full
            } else if count as f64 > settings.max_concurrent as f64 * 0.7 {
                SlotStatus::Busy
            } else {
                SlotStatus::Available
            };

            hours.push(HourlyCapacity {
                time: TimeOfDay::from_minutes(hour * 60).ok_or_else(|| {
                    EngineError::InvalidTime(format!("{hour}:00"))
                })?,
                booking_count: count,
                status,
            });
        }

        Ok(CapacityStatus {
            date: parsed_date,
            capacity_enabled: settings.capacity_enabled,
            max_capacity: settings.max_concurrent,
            buffer_min: settings.buffer_min,
            hours,
        })
    }

    pub fn provider(&self, id: Ulid) -> Option<crate::model::Provider> {
        self.providers.get(&id).map(|e| e.value().clone())
    }

    pub fn providers_list(&self) -> Vec<crate::model::Provider> {
        let mut list: Vec<_> = self.providers.iter().map(|e| e.value().clone()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn capacity_settings(&self) -> crate::model::CapacitySettings {
        *self.settings.read().await
    }
}
