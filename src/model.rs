use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Whole minutes, the only duration/offset unit.
pub type Min = i32;

/// A clock time as minutes since midnight, parsed from "HH:MM".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn from_minutes(minutes: u16) -> Option<Self> {
        if minutes < 24 * 60 { Some(Self(minutes)) } else { None }
    }

    /// Parse "HH:MM". Returns `None` for anything malformed or out of range.
    pub fn parse(s: &str) -> Option<Self> {
        let (h, m) = s.split_once(':')?;
        if h.len() != 2 || m.len() != 2 {
            return None;
        }
        let hours: u16 = h.parse().ok()?;
        let minutes: u16 = m.parse().ok()?;
        if hours >= 24 || minutes >= 60 {
            return None;
        }
        Some(Self(hours * 60 + minutes))
    }

    pub fn minutes(&self) -> Min {
        self.0 as Min
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Day-of-week as 0..=6 with 0 = Sunday, matching working-day sets.
pub fn day_number(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Half-open interval `[start, end)` in minutes. May extend past midnight
/// (buffered ends) or below zero (buffered starts); only relative overlap
/// matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Min,
    pub end: Min,
}

impl Span {
    pub fn new(start: Min, end: Min) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_min(&self) -> Min {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Entities ─────────────────────────────────────────────────────

/// Business-wide concurrency settings, read on every validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySettings {
    /// Max simultaneously in-progress bookings, buffer-inclusive.
    pub max_concurrent: u32,
    /// Buffer appended to every booking's occupied interval.
    pub buffer_min: u32,
    /// Capacity management can be fully disabled per business.
    pub capacity_enabled: bool,
}

impl Default for CapacitySettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            buffer_min: 30,
            capacity_enabled: true,
        }
    }
}

/// A staff member with independent availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: Ulid,
    pub name: String,
    /// Empty set means qualified for every style, not for none.
    pub specialties: Vec<String>,
    pub is_active: bool,
    /// Days 0..=6 (0 = Sunday) the provider normally works.
    pub working_days: Vec<u8>,
    pub default_start: TimeOfDay,
    pub default_end: TimeOfDay,
    pub max_daily_bookings: Option<u32>,
    /// Commission split; read through `split_or_default` (60 if unset).
    pub split_percentage: Option<u8>,
}

impl Provider {
    pub fn split_or_default(&self) -> u8 {
        self.split_percentage.unwrap_or(60)
    }

    pub fn qualified_for(&self, style: &str) -> bool {
        self.specialties.is_empty() || self.specialties.iter().any(|s| s == style)
    }
}

/// Date-scoped override of a provider's normal hours. One record per
/// (provider, date); a later write replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityException {
    pub provider_id: Ulid,
    pub date: NaiveDate,
    pub is_available: bool,
    /// Absent window + `is_available == false` blocks the whole day.
    pub window: Option<(TimeOfDay, TimeOfDay)>,
    pub reason: Option<String>,
}

/// An administratively blocked window, consulted by the capacity validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedSlot {
    pub id: Ulid,
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub blocked: bool,
    pub reason: Option<String>,
}

impl BlockedSlot {
    pub fn span(&self) -> Span {
        Span::new(self.start.minutes(), self.end.minutes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::NoShow)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub provider_id: Option<Ulid>,
    pub preferred_provider_id: Option<Ulid>,
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub duration_min: u32,
    pub style: String,
    /// Quoted price, computed elsewhere; the engine only consumes it.
    pub final_price_cents: i64,
    pub status: BookingStatus,
    pub capacity_group_id: String,
    /// Overlap count + 1 at the moment of creation.
    pub concurrent_booking_count: u32,
    /// Set on completion when a provider is assigned.
    pub provider_earnings_cents: Option<i64>,
}

impl Booking {
    /// The occupied interval without any buffer.
    pub fn span(&self) -> Span {
        let start = self.start.minutes();
        Span::new(start, start + self.duration_min as Min)
    }

    /// The occupied interval with `buffer_min` appended at the end.
    pub fn buffered_span(&self, buffer_min: u32) -> Span {
        let start = self.start.minutes();
        Span::new(start, start + (self.duration_min + buffer_min) as Min)
    }
}

/// One calendar day of a business: bookings sorted by start time plus any
/// administratively blocked windows. Cancelled bookings stay in the list;
/// capacity and availability math skips them via `active()`.
#[derive(Debug, Clone, Default)]
pub struct DayState {
    pub bookings: Vec<Booking>,
    pub blocked: Vec<BlockedSlot>,
}

impl DayState {
    /// Insert booking maintaining sort order by start time.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.start, |b| b.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Non-cancelled bookings, the only ones relevant to capacity and
    /// availability math.
    pub fn active(&self) -> impl Iterator<Item = &Booking> {
        self.bookings
            .iter()
            .filter(|b| b.status != BookingStatus::Cancelled)
    }

    /// Upsert a blocked slot: same id or same window replaces in place.
    pub fn apply_slot(&mut self, slot: BlockedSlot) {
        if let Some(existing) = self
            .blocked
            .iter_mut()
            .find(|s| s.id == slot.id || (s.start == slot.start && s.end == slot.end))
        {
            *existing = slot;
        } else {
            self.blocked.push(slot);
        }
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types: flat, no nesting beyond model structs. This is the
/// WAL record format and the notify payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SettingsUpdated {
        settings: CapacitySettings,
    },
    ProviderUpserted {
        provider: Provider,
    },
    ProviderRemoved {
        id: Ulid,
    },
    ExceptionSet {
        exception: AvailabilityException,
    },
    SlotManaged {
        slot: BlockedSlot,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        status: BookingStatus,
        provider_earnings_cents: Option<i64>,
    },
    BookingRescheduled {
        id: Ulid,
        date: NaiveDate,
        start: TimeOfDay,
    },
    BookingReassigned {
        id: Ulid,
        provider_id: Ulid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn booking_at(start: &str, duration_min: u32) -> Booking {
        Booking {
            id: Ulid::new(),
            provider_id: None,
            preferred_provider_id: None,
            date: date("2025-06-02"),
            start: TimeOfDay::parse(start).unwrap(),
            duration_min,
            style: "Box Braids".into(),
            final_price_cents: 20_000,
            status: BookingStatus::Confirmed,
            capacity_group_id: format!("2025-06-02_{start}"),
            concurrent_booking_count: 1,
            provider_earnings_cents: None,
        }
    }

    #[test]
    fn time_parse_and_format() {
        let t = TimeOfDay::parse("09:30").unwrap();
        assert_eq!(t.minutes(), 570);
        assert_eq!(t.to_string(), "09:30");
        assert_eq!(TimeOfDay::parse("00:00").unwrap().minutes(), 0);
        assert_eq!(TimeOfDay::parse("23:59").unwrap().minutes(), 1439);
    }

    #[test]
    fn time_parse_rejects_malformed() {
        for bad in ["", "9:30", "09:3", "24:00", "12:60", "ab:cd", "12-30", "12:30:00"] {
            assert!(TimeOfDay::parse(bad).is_none(), "accepted {bad:?}");
        }
    }

    #[test]
    fn span_overlap_half_open() {
        let a = Span::new(540, 780);
        let b = Span::new(720, 900);
        let c = Span::new(780, 900);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert_eq!(a.duration_min(), 240);
    }

    #[test]
    fn day_number_sunday_is_zero() {
        assert_eq!(day_number(date("2025-06-01")), 0); // Sunday
        assert_eq!(day_number(date("2025-06-02")), 1); // Monday
        assert_eq!(day_number(date("2025-06-07")), 6); // Saturday
    }

    #[test]
    fn booking_spans() {
        let b = booking_at("09:00", 240);
        assert_eq!(b.span(), Span::new(540, 780));
        assert_eq!(b.buffered_span(30), Span::new(540, 810));
    }

    #[test]
    fn day_insert_keeps_order() {
        let mut day = DayState::default();
        day.insert_booking(booking_at("13:00", 60));
        day.insert_booking(booking_at("09:00", 60));
        day.insert_booking(booking_at("11:00", 60));
        let starts: Vec<_> = day.bookings.iter().map(|b| b.start.to_string()).collect();
        assert_eq!(starts, vec!["09:00", "11:00", "13:00"]);
    }

    #[test]
    fn day_active_skips_cancelled() {
        let mut day = DayState::default();
        let mut cancelled = booking_at("09:00", 60);
        cancelled.status = BookingStatus::Cancelled;
        day.insert_booking(cancelled);
        day.insert_booking(booking_at("10:00", 60));
        assert_eq!(day.active().count(), 1);
    }

    #[test]
    fn slot_upsert_replaces_same_window() {
        let mut day = DayState::default();
        let first = BlockedSlot {
            id: Ulid::new(),
            date: date("2025-06-02"),
            start: TimeOfDay::parse("12:00").unwrap(),
            end: TimeOfDay::parse("13:00").unwrap(),
            blocked: true,
            reason: Some("cleaning".into()),
        };
        day.apply_slot(first.clone());
        let unblock = BlockedSlot {
            id: Ulid::new(),
            blocked: false,
            reason: None,
            ..first
        };
        day.apply_slot(unblock);
        assert_eq!(day.blocked.len(), 1);
        assert!(!day.blocked[0].blocked);
    }

    #[test]
    fn empty_specialties_is_open_qualification() {
        let p = Provider {
            id: Ulid::new(),
            name: "Ada".into(),
            specialties: vec![],
            is_active: true,
            working_days: vec![1, 2, 3, 4, 5, 6],
            default_start: TimeOfDay::parse("09:00").unwrap(),
            default_end: TimeOfDay::parse("18:00").unwrap(),
            max_daily_bookings: None,
            split_percentage: None,
        };
        assert!(p.qualified_for("Box Braids"));
        assert!(p.qualified_for("Some Unknown Style"));
        assert_eq!(p.split_or_default(), 60);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            booking: booking_at("10:00", 180),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn event_json_payload_shape() {
        // External collaborators consume notify payloads as JSON.
        let event = Event::BookingStatusChanged {
            id: Ulid::new(),
            status: BookingStatus::Completed,
            provider_earnings_cents: Some(12_000),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("BookingStatusChanged").is_some());
    }
}
