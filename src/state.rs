/*!
 # Schedule state

 [`ScheduleState`] bundles the schedule store with both overrides and
 answers every scheduling question for a caller-supplied "now". It owns
 no clock, so it can be used and tested on its own; the controller adds
 the clock and the event plumbing.
*/

use std::path::Path;

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::overrides::{PumpExercise, VacationMode};
use crate::persistence;
use crate::recurrence;
use crate::schedule::{Schedule, ScheduleStore};
use crate::{Error, Result};

/// Everything that is persisted: schedules plus overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleState {
    pub schedules: ScheduleStore,
    pub vacation: VacationMode,
    pub pump: PumpExercise,
}

impl ScheduleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether hot water may run at `now`
    ///
    /// An active vacation suppresses every schedule.
    pub fn is_within_any_schedule(&self, now: &NaiveDateTime) -> bool {
        if self.vacation.is_active(now) {
            debug!("Vacation mode active, schedules disabled");
            return false;
        }
        recurrence::any_active(self.schedules.list(), now)
    }

    /// Whether schedule `id` is active at `now`, ignoring vacation
    pub fn is_within_schedule(&self, id: u8, now: &NaiveDateTime) -> bool {
        self.schedules
            .get(id)
            .is_some_and(|s| recurrence::is_active(s, now))
    }

    /// First active schedule in store order, ignoring vacation
    pub fn current_active_schedule(&self, now: &NaiveDateTime) -> Option<&Schedule> {
        recurrence::first_active(self.schedules.list(), now)
    }

    pub fn next_scheduled_start(&self, now: &NaiveDateTime) -> Option<NaiveDateTime> {
        recurrence::next_start(self.schedules.list(), now)
    }

    pub fn next_scheduled_end(&self, now: &NaiveDateTime) -> Option<NaiveDateTime> {
        recurrence::next_end(self.schedules.list(), now)
    }

    pub fn seconds_until_next_event(&self, now: &NaiveDateTime) -> Option<u32> {
        recurrence::seconds_until_next_event(self.schedules.list(), now)
    }

    pub fn is_vacation_active(&self, now: &NaiveDateTime) -> bool {
        self.vacation.is_active(now)
    }

    pub fn is_pump_exercise_time(&self, now: &NaiveDateTime) -> bool {
        self.pump.is_due(now, &self.vacation)
    }

    pub fn mark_pump_exercise_complete(&mut self, now: NaiveDateTime) {
        self.pump.mark_complete(now);
        info!("Pump exercise completed at {}", now);
    }

    /// Replaces the vacation settings
    pub fn set_vacation_mode(&mut self, vacation: VacationMode) {
        self.vacation = vacation;
        info!(
            "Vacation mode {}",
            if vacation.enabled { "enabled" } else { "disabled" }
        );
        if vacation.enabled {
            info!(
                "Vacation period: {} to {}",
                vacation.start.format("%Y-%m-%d"),
                vacation.end.format("%Y-%m-%d")
            );
        }
    }

    /// Replaces the pump exercise configuration, keeping the last run
    ///
    /// Rejects a day outside 1..=31 or an invalid time of day.
    pub fn set_pump_exercise(
        &mut self,
        enabled: bool,
        day_of_month: u8,
        hour: u8,
        minute: u8,
        duration_seconds: u16,
    ) -> Result<()> {
        if !(1..=31).contains(&day_of_month) {
            return Err(Error::ValueOutOfRange(day_of_month as u32, 1, 31));
        }
        if hour > 23 {
            return Err(Error::ValueOutOfRange(hour as u32, 0, 23));
        }
        if minute > 59 {
            return Err(Error::ValueOutOfRange(minute as u32, 0, 59));
        }

        self.pump = PumpExercise {
            enabled,
            day_of_month,
            hour,
            minute,
            duration_seconds,
            last_run: self.pump.last_run,
        };
        info!(
            "Pump exercise {}: day {} at {:02}:{:02} for {} seconds",
            if enabled { "enabled" } else { "disabled" },
            day_of_month,
            hour,
            minute,
            duration_seconds
        );
        Ok(())
    }

    /// One-line summary of what the scheduler is doing at `now`
    pub fn status(&self, now: &NaiveDateTime) -> String {
        if self.vacation.is_active(now) {
            return "Vacation Mode Active".to_string();
        }

        if let Some(active) = self.current_active_schedule(now) {
            return format!("Active: {}", active.name);
        }

        match self.next_scheduled_start(now) {
            Some(next) => format!("Next: {}", next.format("%H:%M:%S")),
            None => "No Active Schedules".to_string(),
        }
    }

    /// Serializes the whole state with the persistence codec
    pub fn encode(&self) -> Vec<u8> {
        persistence::encode(self)
    }

    /// Replaces this state with a persisted blob
    ///
    /// The blob is decoded completely before anything is touched, so a
    /// failure leaves the current state as it was. Override sections
    /// missing from a truncated blob keep their current values.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        let decoded = persistence::decode(bytes)?;

        self.schedules = decoded.schedules;
        if let Some(vacation) = decoded.vacation {
            self.vacation = vacation;
        }
        if let Some(pump) = decoded.pump {
            self.pump = pump;
        }

        info!("Restored {} schedules", self.schedules.len());
        Ok(())
    }

    /// Reads a state file, or returns an empty state when there is none
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut state = Self::new();
        if !path.exists() {
            info!("No state file at {}, starting empty", path.display());
            return Ok(state);
        }

        state.restore(&std::fs::read(path)?)?;
        Ok(state)
    }

    /// Writes the encoded state to `path`
    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.encode())?;
        info!("Saved state to {}", path.display());
        Ok(())
    }
}
