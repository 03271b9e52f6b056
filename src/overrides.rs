/*!
 # Overrides

 Rules that sit above ordinary window matching:

 * [`VacationMode`] suppresses every schedule while it is active.
 * [`PumpExercise`] asks for a short pump run once a month so the pump
   does not seize during long idle periods.
*/

use chrono::{Datelike, NaiveDateTime, Timelike};

/// Vacation mode settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VacationMode {
    pub enabled: bool,
    /// First instant of the vacation (inclusive)
    pub start: NaiveDateTime,
    /// Last instant of the vacation (inclusive)
    pub end: NaiveDateTime,
    /// Still run pump exercise during vacation
    pub run_pump_exercise: bool,
}

impl VacationMode {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, run_pump_exercise: bool) -> Self {
        Self {
            enabled: true,
            start,
            end,
            run_pump_exercise,
        }
    }

    /// Whether schedules are suppressed at `now`
    pub fn is_active(&self, now: &NaiveDateTime) -> bool {
        self.enabled && *now >= self.start && *now <= self.end
    }
}

/// Monthly pump exercise to prevent seizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpExercise {
    pub enabled: bool,
    /// 1-31
    pub day_of_month: u8,
    /// 0-23
    pub hour: u8,
    /// 0-59
    pub minute: u8,
    /// How long to run
    pub duration_seconds: u16,
    /// Last completed run, `None` until the first one
    pub last_run: Option<NaiveDateTime>,
}

impl Default for PumpExercise {
    fn default() -> Self {
        Self {
            enabled: false,
            day_of_month: 1,
            hour: 3,
            minute: 0,
            duration_seconds: 300,
            last_run: None,
        }
    }
}

impl PumpExercise {
    /// Enabled pump exercise with no run recorded yet
    pub fn new(day_of_month: u8, hour: u8, minute: u8, duration_seconds: u16) -> Self {
        Self {
            enabled: true,
            day_of_month,
            hour,
            minute,
            duration_seconds,
            last_run: None,
        }
    }

    /// Whether a run has already completed in the calendar month of `now`
    pub fn has_run_this_month(&self, now: &NaiveDateTime) -> bool {
        self.last_run
            .is_some_and(|last| last.year() == now.year() && last.month() == now.month())
    }

    /// Whether the pump should be started at `now`
    ///
    /// Fires only during the configured minute, at most once per month,
    /// and not during an active vacation unless the vacation allows it.
    pub fn is_due(&self, now: &NaiveDateTime, vacation: &VacationMode) -> bool {
        if !self.enabled {
            return false;
        }

        if vacation.is_active(now) && !vacation.run_pump_exercise {
            return false;
        }

        now.day() == self.day_of_month as u32
            && now.hour() == self.hour as u32
            && now.minute() == self.minute as u32
            && !self.has_run_this_month(now)
    }

    /// Records a completed run
    pub fn mark_complete(&mut self, now: NaiveDateTime) {
        self.last_run = Some(now);
    }
}
