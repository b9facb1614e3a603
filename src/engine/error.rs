use ulid::Ulid;

use crate::model::BookingStatus;

/// Error taxonomy of the engine. Every variant carries enough structured
/// detail for the caller to build its own user-facing message; the engine
/// itself defines no user-facing text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Business-wide concurrency limit hit. Fatal to the booking request.
    CapacityExceeded {
        limit: u32,
    },
    /// The requested window intersects an administrative block.
    SlotBlocked {
        reason: String,
    },
    NoActiveProviders,
    NoQualifiedProviders {
        style: String,
    },
    NoAvailableProviders,
    ConflictOnReschedule {
        booking_id: Ulid,
    },
    InvalidStateTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    InvalidDate(String),
    InvalidTime(String),
    InvalidName(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::CapacityExceeded { limit } => {
                write!(f, "maximum capacity of {limit} concurrent bookings reached")
            }
            EngineError::SlotBlocked { reason } => {
                write!(f, "time slot is blocked: {reason}")
            }
            EngineError::NoActiveProviders => write!(f, "no active providers"),
            EngineError::NoQualifiedProviders { style } => {
                write!(f, "no providers qualified for {style}")
            }
            EngineError::NoAvailableProviders => {
                write!(f, "no qualified providers available at this time")
            }
            EngineError::ConflictOnReschedule { booking_id } => {
                write!(f, "new slot conflicts for booking {booking_id}")
            }
            EngineError::InvalidStateTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::InvalidDate(s) => write!(f, "invalid date: {s:?}"),
            EngineError::InvalidTime(s) => write!(f, "invalid time: {s:?}"),
            EngineError::InvalidName(s) => write!(f, "invalid name: {s:?}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
