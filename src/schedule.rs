/*!
 # Schedules and the schedule store

 A [`Schedule`] is a named window (start and end time of day) that recurs
 on the weekdays set in its day mask. The [`ScheduleStore`] holds up to
 [`MAX_SCHEDULES`] of them in insertion order, which is also the order
 queries use to break ties.
*/

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::days::{format_day_mask, is_day_in_mask, WEEK_DAYS};
use crate::{Error, Result};

/// Maximum number of schedules a store holds
pub const MAX_SCHEDULES: usize = 10;

/// Longest name (in bytes) that survives persistence
pub const MAX_NAME_LEN: usize = 31;

/// A recurring hot-water window
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schedule {
    /// Unique id, 0 until the store assigns one
    pub id: u8,
    /// Bit mask of days (bit 0 = Sunday, bit 6 = Saturday)
    pub day_mask: u8,
    /// Start hour (0-23)
    pub start_hour: u8,
    /// Start minute (0-59)
    pub start_minute: u8,
    /// End hour (0-23)
    pub end_hour: u8,
    /// End minute (0-59)
    pub end_minute: u8,
    /// Disabled schedules are kept but never match
    pub enabled: bool,
    /// Label such as "Morning Shower"
    pub name: String,
}

impl Schedule {
    /// Creates an enabled schedule with an unassigned id
    ///
    /// # Arguments
    ///
    /// * `name` - Label for the window
    /// * `day_mask` - Bitmask of days (use the WEEK_DAYS constants)
    /// * `start` - `(hour, minute)` the window opens
    /// * `end` - `(hour, minute)` the window closes, may be earlier than `start`
    pub fn new(name: impl Into<String>, day_mask: u8, start: (u8, u8), end: (u8, u8)) -> Self {
        Self {
            id: 0,
            day_mask,
            start_hour: start.0,
            start_minute: start.1,
            end_hour: end.0,
            end_minute: end.1,
            enabled: true,
            name: name.into(),
        }
    }

    pub fn is_day_enabled(&self, dow: u8) -> bool {
        is_day_in_mask(self.day_mask, dow)
    }

    pub fn set_day(&mut self, dow: u8, enable: bool) {
        if dow >= 7 {
            return;
        }
        if enable {
            self.day_mask |= 1 << dow;
        } else {
            self.day_mask &= !(1 << dow);
        }
    }

    /// Start of the window in minutes since midnight
    pub fn start_minutes(&self) -> u16 {
        self.start_hour as u16 * 60 + self.start_minute as u16
    }

    /// End of the window in minutes since midnight
    pub fn end_minutes(&self) -> u16 {
        self.end_hour as u16 * 60 + self.end_minute as u16
    }

    /// Whether the window closes on the day after it opens
    pub fn spans_midnight(&self) -> bool {
        self.end_minutes() < self.start_minutes()
    }

    /// Checks every field against the range the persistence format accepts
    pub fn validate(&self) -> Result<()> {
        if self.day_mask > WEEK_DAYS.all {
            return Err(Error::ValueOutOfRange(
                self.day_mask as u32,
                0,
                WEEK_DAYS.all as u32,
            ));
        }
        for hour in [self.start_hour, self.end_hour] {
            if hour > 23 {
                return Err(Error::ValueOutOfRange(hour as u32, 0, 23));
            }
        }
        for minute in [self.start_minute, self.end_minute] {
            if minute > 59 {
                return Err(Error::ValueOutOfRange(minute as u32, 0, 59));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} '{}': {}, {:02}:{:02}-{:02}:{:02}, days={}",
            self.id,
            self.name,
            if self.enabled { "ON" } else { "OFF" },
            self.start_hour,
            self.start_minute,
            self.end_hour,
            self.end_minute,
            format_day_mask(self.day_mask)
        )
    }
}

/// Parses `"HH:MM"` (24-hour) into `(hour, minute)`
pub fn parse_time_of_day(s: &str) -> Result<(u8, u8)> {
    let invalid = || Error::InvalidTime(format!("'{s}' is not HH:MM"));

    let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u8 = hour.parse().map_err(|_| invalid())?;
    let minute: u8 = minute.parse().map_err(|_| invalid())?;

    if hour > 23 {
        return Err(Error::ValueOutOfRange(hour as u32, 0, 23));
    }
    if minute > 59 {
        return Err(Error::ValueOutOfRange(minute as u32, 0, 59));
    }
    Ok((hour, minute))
}

/// Ordered, bounded collection of schedules indexed by id
#[derive(Debug, Clone, Default)]
pub struct ScheduleStore {
    schedules: Vec<Schedule>,
    /// id -> position in `schedules`
    index: HashMap<u8, usize>,
}

impl PartialEq for ScheduleStore {
    fn eq(&self, other: &Self) -> bool {
        self.schedules == other.schedules
    }
}

impl Eq for ScheduleStore {}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a schedule at the end of the store
    ///
    /// An id of 0 is replaced by the lowest free id. Returns the id the
    /// schedule is stored under.
    pub fn add(&mut self, schedule: Schedule) -> Result<u8> {
        if self.is_full() {
            warn!("Maximum number of schedules ({}) reached", MAX_SCHEDULES);
            return Err(Error::Full(MAX_SCHEDULES));
        }
        schedule.validate()?;

        let mut schedule = schedule;
        if schedule.id == 0 {
            schedule.id = self.next_free_id();
        } else if self.index.contains_key(&schedule.id) {
            warn!("Schedule id {} already in use", schedule.id);
            return Err(Error::DuplicateId(schedule.id));
        }

        info!("Added schedule {}", schedule);
        let id = schedule.id;
        self.index.insert(id, self.schedules.len());
        self.schedules.push(schedule);
        Ok(id)
    }

    /// Replaces every field of schedule `id` except the id itself
    pub fn update(&mut self, id: u8, schedule: Schedule) -> Result<()> {
        let Some(&pos) = self.index.get(&id) else {
            warn!("Schedule {} not found", id);
            return Err(Error::NotFound(id));
        };
        schedule.validate()?;

        let mut schedule = schedule;
        schedule.id = id;
        self.schedules[pos] = schedule;
        info!("Updated schedule {}", self.schedules[pos]);
        Ok(())
    }

    /// Removes schedule `id`, keeping the order of the others
    pub fn remove(&mut self, id: u8) -> Result<Schedule> {
        let Some(pos) = self.index.remove(&id) else {
            warn!("Schedule {} not found", id);
            return Err(Error::NotFound(id));
        };

        let removed = self.schedules.remove(pos);
        self.reindex();
        info!("Removed schedule {}", id);
        Ok(removed)
    }

    pub fn get(&self, id: u8) -> Option<&Schedule> {
        self.index.get(&id).map(|&pos| &self.schedules[pos])
    }

    /// All schedules in insertion order
    pub fn list(&self) -> &[Schedule] {
        &self.schedules
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.schedules.len() >= MAX_SCHEDULES
    }

    pub fn clear(&mut self) {
        self.schedules.clear();
        self.index.clear();
        info!("All schedules cleared");
    }

    /// Lowest id not in use, scanning up from 1 and stopping at 255
    fn next_free_id(&self) -> u8 {
        let id = (1..u8::MAX)
            .find(|id| !self.index.contains_key(id))
            .unwrap_or(u8::MAX);
        debug!("Next free schedule id: {}", id);
        id
    }

    fn reindex(&mut self) {
        self.index = self
            .schedules
            .iter()
            .enumerate()
            .map(|(pos, s)| (s.id, pos))
            .collect();
    }
}
