//! Capacity validation and provider assignment for appointment-based
//! businesses. Each studio gets an isolated [`engine::Engine`] holding
//! bookings, providers and blocked slots in memory, durable through a
//! per-studio write-ahead log.

pub mod catalog;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod studio;
pub mod tasks;
pub mod wal;
