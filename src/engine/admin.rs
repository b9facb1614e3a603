use ulid::Ulid;

use super::{Engine, EngineError, parse_date, parse_time};
use crate::limits;
use crate::model::{AvailabilityException, BlockedSlot, CapacitySettings, Event, Provider};

impl Engine {
    /// Merge partial settings into the current ones. `None` leaves a field
    /// untouched. Takes effect for every validation after the write lock
    /// drops; existing bookings are never re-checked.
    pub async fn update_capacity_settings(
        &self,
        max_concurrent: Option<u32>,
        buffer_min: Option<u32>,
        capacity_enabled: Option<bool>,
    ) -> Result<CapacitySettings, EngineError> {
        let mut guard = self.settings.write().await;
        let merged = CapacitySettings {
            max_concurrent: max_concurrent.unwrap_or(guard.max_concurrent),
            buffer_min: buffer_min.unwrap_or(guard.buffer_min),
            capacity_enabled: capacity_enabled.unwrap_or(guard.capacity_enabled),
        };
        if merged.max_concurrent == 0 {
            return Err(EngineError::LimitExceeded("max_concurrent must be at least 1"));
        }
        if merged.max_concurrent > limits::MAX_BOOKINGS_PER_DAY as u32 {
            return Err(EngineError::LimitExceeded("max_concurrent too large"));
        }
        // Span arithmetic adds the buffer to a request's minutes; an
        // unbounded buffer would overflow that sum.
        if merged.buffer_min > limits::MAX_DURATION_MIN {
            return Err(EngineError::LimitExceeded("buffer_min too large"));
        }
        self.persist(&Event::SettingsUpdated { settings: merged })
            .await?;
        *guard = merged;
        Ok(merged)
    }

    /// Create or replace a provider record.
    pub async fn upsert_provider(&self, provider: Provider) -> Result<(), EngineError> {
        if provider.name.is_empty() || provider.name.len() > limits::MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("provider name length"));
        }
        if provider.specialties.len() > limits::MAX_SPECIALTIES_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many specialties"));
        }
        if provider
            .specialties
            .iter()
            .any(|s| s.len() > limits::MAX_STYLE_LEN)
        {
            return Err(EngineError::LimitExceeded("specialty name too long"));
        }
        if provider.working_days.iter().any(|d| *d > 6) {
            return Err(EngineError::LimitExceeded("working day out of range"));
        }
        if provider.default_start >= provider.default_end {
            return Err(EngineError::LimitExceeded("working hours window is empty"));
        }
        if let Some(split) = provider.split_percentage
            && split > 100
        {
            return Err(EngineError::LimitExceeded("split percentage above 100"));
        }
        if !self.providers.contains_key(&provider.id)
            && self.providers.len() >= limits::MAX_PROVIDERS_PER_STUDIO
        {
            return Err(EngineError::LimitExceeded("too many providers"));
        }

        self.persist(&Event::ProviderUpserted {
            provider: provider.clone(),
        })
        .await?;
        self.providers.insert(provider.id, provider);
        Ok(())
    }

    /// Remove a provider and their date exceptions. Existing bookings keep
    /// their (now dangling) assignment; completion falls back to the
    /// default commission split.
    pub async fn remove_provider(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.providers.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist(&Event::ProviderRemoved { id }).await?;
        self.providers.remove(&id);
        self.exceptions.retain(|(provider_id, _), _| *provider_id != id);
        Ok(())
    }

    /// Set a provider's availability override for one date. Overwrites any
    /// earlier exception for the same (provider, date).
    pub async fn set_provider_availability(
        &self,
        exception: AvailabilityException,
    ) -> Result<(), EngineError> {
        if !self.providers.contains_key(&exception.provider_id) {
            return Err(EngineError::NotFound(exception.provider_id));
        }
        if let Some(reason) = &exception.reason
            && reason.len() > limits::MAX_REASON_LEN
        {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        if let Some((start, end)) = exception.window
            && start >= end
        {
            return Err(EngineError::LimitExceeded("exception window is empty"));
        }

        self.persist(&Event::ExceptionSet {
            exception: exception.clone(),
        })
        .await?;
        self.exceptions
            .insert((exception.provider_id, exception.date), exception);
        Ok(())
    }

    /// Block or unblock an administrative window. A slot with the same
    /// window is replaced in place, so unblocking reuses the same call
    /// with `blocked: false`.
    pub async fn manage_time_slot(
        &self,
        date: &str,
        start: &str,
        end: &str,
        blocked: bool,
        reason: Option<String>,
    ) -> Result<Ulid, EngineError> {
        let parsed_date = parse_date(date)?;
        let start = parse_time(start)?;
        let end = parse_time(end)?;
        if start >= end {
            return Err(EngineError::LimitExceeded("slot window is empty"));
        }
        if let Some(reason) = &reason
            && reason.len() > limits::MAX_REASON_LEN
        {
            return Err(EngineError::LimitExceeded("reason too long"));
        }

        let day = self.day(parsed_date);
        let mut guard = day.write().await;
        let replaces_existing = guard
            .blocked
            .iter()
            .any(|s| s.start == start && s.end == end);
        if !replaces_existing && guard.blocked.len() >= limits::MAX_BLOCKED_SLOTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many blocked slots on this day"));
        }

        let slot = BlockedSlot {
            id: Ulid::new(),
            date: parsed_date,
            start,
            end,
            blocked,
            reason,
        };
        let slot_id = slot.id;
        self.persist_and_apply(&mut guard, &Event::SlotManaged { slot })
            .await?;
        Ok(slot_id)
    }
}
