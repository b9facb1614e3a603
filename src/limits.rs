//! Hard caps on inputs and collection sizes. Everything here exists to keep
//! a single misbehaving caller from growing unbounded state.

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_STYLE_LEN: usize = 64;
pub const MAX_REASON_LEN: usize = 256;

pub const MAX_PROVIDERS_PER_STUDIO: usize = 256;
pub const MAX_SPECIALTIES_PER_PROVIDER: usize = 32;
pub const MAX_BOOKINGS_PER_DAY: usize = 512;
pub const MAX_BLOCKED_SLOTS_PER_DAY: usize = 64;

pub const MAX_STUDIOS: usize = 1024;
pub const MAX_STUDIO_NAME_LEN: usize = 256;

/// Widest provider-schedule query, in days.
pub const MAX_SCHEDULE_RANGE_DAYS: i64 = 92;

/// A single appointment cannot exceed one day.
pub const MAX_DURATION_MIN: u32 = 24 * 60;
