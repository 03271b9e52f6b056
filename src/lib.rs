/*!
 # Hot-Water Schedule Controller Library

 A Rust library that decides when a hot-water appliance may run.
 Schedules are named, recurring time-of-day windows keyed by weekday,
 and two overrides sit on top of them: a vacation window that suppresses
 all schedules and a monthly pump-exercise pulse.

 ## Features

 * Up to ten named weekly windows, midnight-spanning windows included
 * "Is a window active now" and "when is the next start/end" queries
 * Vacation suppression
 * Monthly pump exercise (one pulse per calendar month)
 * Compact binary persistence for non-volatile storage
 * A controller that serializes access to the real-time clock and
   broadcasts schedule transitions

 ## Example

 ```rust
 use chrono::NaiveDate;
 use hotwater_scheduler::*;

 fn main() -> Result<()> {
     let start = NaiveDate::from_ymd_opt(2025, 3, 3)
         .and_then(|d| d.and_hms_opt(6, 30, 0))
         .ok_or_else(|| Error::InvalidTime("bad date".into()))?;
     let clock = ClockBus::new(ManualClock::new(start));
     let mut controller = HotWaterController::new(clock)?;

     // Weekday mornings, 06:00 to 07:30
     controller.add_schedule(Schedule::new(
         "Morning Shower",
         WEEK_DAYS.week_days,
         (6, 0),
         (7, 30),
     ))?;

     assert!(controller.is_within_any_schedule()?);
     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the hot-water scheduler library
#[derive(Error, Debug)]
pub enum Error {
    /// The schedule store is at capacity
    #[error("Schedule store is full ({0} schedules)")]
    Full(usize),

    /// No schedule with the given id
    #[error("Schedule {0} not found")]
    NotFound(u8),

    /// A schedule with the given id already exists
    #[error("Schedule id {0} is already in use")]
    DuplicateId(u8),

    /// Malformed or rejected timestamp
    #[error("Invalid time: {0}")]
    InvalidTime(String),

    /// Value out of range
    #[error("Value {0} out of range ({1}..{2})")]
    ValueOutOfRange(u32, u32, u32),

    /// Buffer is shorter than the data it must hold
    #[error("Buffer too small: need {needed} bytes, have {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    /// Persisted blob does not start with the expected magic bytes
    #[error("Invalid magic bytes {0:#04x} {1:#04x}")]
    InvalidMagic(u8, u8),

    /// Persisted blob has a format version this build cannot read
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// Persisted blob claims more schedules than the store can hold
    #[error("Too many schedules in persisted data: {0}")]
    TooManySchedules(u8),

    /// Persisted record failed a range check
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// Clock hardware not ready or not present
    #[error("Clock unavailable: {0}")]
    Unavailable(String),

    /// I/O error while reading or writing persisted state
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means the caller handed in bad data
    /// (as opposed to a full store, a missing id or absent hardware).
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Error::DuplicateId(_)
                | Error::InvalidTime(_)
                | Error::ValueOutOfRange(..)
                | Error::BufferTooSmall { .. }
                | Error::InvalidMagic(..)
                | Error::UnsupportedVersion(_)
                | Error::TooManySchedules(_)
                | Error::CorruptRecord(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod clock;
pub mod controller;
pub mod days;
pub mod overrides;
pub mod persistence;
pub mod recurrence;
pub mod schedule;
pub mod state;

// Re-export key types
pub use clock::{Clock, ClockBus, ManualClock, SystemClock};
pub use controller::{ControllerEvent, HotWaterController, TemperatureData};
pub use days::{Days, WEEK_DAYS};
pub use overrides::{PumpExercise, VacationMode};
pub use recurrence::NO_EVENT_SECONDS;
pub use schedule::{Schedule, ScheduleStore, MAX_SCHEDULES};
pub use state::ScheduleState;
