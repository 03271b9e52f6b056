/*!
 # Hot-water controller

 [`HotWaterController`] ties the schedule state to a real clock. Every
 question is answered against the clock's current time, every schedule
 change re-arms the clock alarm for the next start, and [`poll`] turns
 state changes into [`ControllerEvent`]s for anyone subscribed.

 [`poll`]: HotWaterController::poll
*/

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::clock::{Clock, ClockBus};
use crate::overrides::{PumpExercise, VacationMode};
use crate::schedule::Schedule;
use crate::state::ScheduleState;
use crate::{Error, Result};

/// How often a caller is expected to [`HotWaterController::poll`]
pub const SCHEDULE_CHECK_INTERVAL_SECONDS: u64 = 30;

/// 2000-01-01T00:00:00Z; earlier epochs are rejected as unset clocks
const MIN_VALID_UTC_EPOCH: i64 = 946_684_800;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Notifications published by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// The clock was set
    TimeChanged(NaiveDateTime),
    /// A schedule window opened and hot water may run
    ScheduleStarted { id: u8, name: String },
    /// The window that was running closed (or was suppressed)
    ScheduleEnded { id: u8, name: String },
    /// The armed alarm time was reached
    AlarmFired(NaiveDateTime),
    /// The monthly pump exercise should start now
    PumpExerciseDue { duration_seconds: u16 },
}

/// Temperature reading with its conversion and time of capture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureData {
    pub celsius: f32,
    pub fahrenheit: f32,
    pub timestamp: NaiveDateTime,
}

/// Schedule controller bound to a clock
pub struct HotWaterController<C: Clock> {
    /// Serialized access to the clock hardware
    clock: ClockBus<C>,
    /// Schedules and overrides
    state: ScheduleState,
    /// Next schedule start, as programmed into the clock alarm
    next_alarm: Option<NaiveDateTime>,
    /// Id and name of the schedule that was running at the last poll
    active_schedule: Option<(u8, String)>,
    /// Minute in which the pump exercise was last announced
    pump_announced: Option<NaiveDateTime>,
    /// Time of the last poll
    last_check: NaiveDateTime,
    events: broadcast::Sender<ControllerEvent>,
}

impl<C: Clock> HotWaterController<C> {
    /// Creates a controller with an empty schedule state
    #[instrument(skip(clock))]
    pub fn new(clock: ClockBus<C>) -> Result<Self> {
        Self::with_state(clock, ScheduleState::new())
    }

    /// Creates a controller around previously loaded state
    ///
    /// Fails if the clock cannot be read.
    #[instrument(skip(clock, state))]
    pub fn with_state(clock: ClockBus<C>, state: ScheduleState) -> Result<Self> {
        info!("Initializing hot-water controller");

        let now = {
            let bus = clock.lock();
            let now = bus.now().inspect_err(|e| error!("Failed to read clock: {}", e))?;
            // Clear any pending alarm
            bus.clear_alarm()?;
            now
        };

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut controller = Self {
            clock,
            state,
            next_alarm: None,
            active_schedule: None,
            pump_announced: None,
            last_check: now,
            events,
        };
        controller.rearm();

        info!(
            "Controller initialized with {} schedules. Current time: {}",
            controller.state.schedules.len(),
            now
        );
        Ok(controller)
    }

    /// Subscribes to controller events
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Handle to the clock bus, for sharing with other clock users
    pub fn clock(&self) -> &ClockBus<C> {
        &self.clock
    }

    /// Schedules and overrides
    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    // Time management

    /// Current local time from the clock
    pub fn now(&self) -> Result<NaiveDateTime> {
        self.clock.now()
    }

    /// Whether the clock answers
    pub fn is_running(&self) -> bool {
        self.clock.now().is_ok()
    }

    /// Sets the clock to a local time
    #[instrument(skip(self))]
    pub fn set_time(&mut self, time: NaiveDateTime) -> Result<()> {
        debug!("Setting clock time to: {}", time);
        self.clock.set_time(time)?;

        self.emit(ControllerEvent::TimeChanged(time));
        self.rearm();
        Ok(())
    }

    /// Sets the clock from a UTC epoch plus the local offset
    ///
    /// # Arguments
    ///
    /// * `utc_epoch` - Seconds since 1970-01-01 UTC, must be in 2000 or later
    /// * `offset_seconds` - Local offset east of UTC
    #[instrument(skip(self))]
    pub fn set_time_from_utc(&mut self, utc_epoch: i64, offset_seconds: i32) -> Result<()> {
        if utc_epoch < MIN_VALID_UTC_EPOCH {
            error!("Invalid UTC epoch: {} (before year 2000)", utc_epoch);
            return Err(Error::InvalidTime(format!(
                "UTC epoch {utc_epoch} is before year 2000"
            )));
        }

        let local_epoch = utc_epoch + offset_seconds as i64;
        let local = DateTime::from_timestamp(local_epoch, 0)
            .ok_or_else(|| Error::InvalidTime(format!("epoch {local_epoch} out of range")))?
            .naive_utc();

        debug!(
            "Setting clock from UTC: UTC epoch={}, offset={}, local time={}",
            utc_epoch, offset_seconds, local
        );

        if !(2000..=2100).contains(&local.year()) {
            error!("Invalid year {} after conversion - rejecting time update", local.year());
            return Err(Error::ValueOutOfRange(local.year().max(0) as u32, 2000, 2100));
        }

        self.set_time(local)
    }

    /// Current time as a UTC epoch, given the local offset
    pub fn now_utc(&self, offset_seconds: i32) -> Result<i64> {
        let local_epoch = self.now()?.and_utc().timestamp();
        let utc_epoch = local_epoch - offset_seconds as i64;
        trace!(
            "Converting clock to UTC: local epoch={}, offset={}, UTC epoch={}",
            local_epoch,
            offset_seconds,
            utc_epoch
        );
        Ok(utc_epoch)
    }

    /// `HH:MM:SS`, or dashes when the clock cannot be read
    pub fn formatted_time(&self) -> String {
        self.now()
            .map(|now| now.format("%H:%M:%S").to_string())
            .unwrap_or_else(|_| "--:--:--".to_string())
    }

    /// `YYYY-MM-DD`, or dashes when the clock cannot be read
    pub fn formatted_date(&self) -> String {
        self.now()
            .map(|now| now.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|_| "----/--/--".to_string())
    }

    // Schedule management

    /// Adds a schedule, returning its id
    #[instrument(skip(self))]
    pub fn add_schedule(&mut self, schedule: Schedule) -> Result<u8> {
        let id = self.state.schedules.add(schedule)?;
        self.rearm();
        Ok(id)
    }

    /// Replaces schedule `id`, keeping its id
    #[instrument(skip(self))]
    pub fn update_schedule(&mut self, id: u8, schedule: Schedule) -> Result<()> {
        self.state.schedules.update(id, schedule)?;
        self.rearm();
        Ok(())
    }

    /// Enables or disables schedule `id`
    #[instrument(skip(self))]
    pub fn set_schedule_enabled(&mut self, id: u8, enabled: bool) -> Result<()> {
        let mut schedule = self
            .state
            .schedules
            .get(id)
            .cloned()
            .ok_or(Error::NotFound(id))?;
        schedule.enabled = enabled;
        self.update_schedule(id, schedule)
    }

    #[instrument(skip(self))]
    pub fn remove_schedule(&mut self, id: u8) -> Result<Schedule> {
        let removed = self.state.schedules.remove(id)?;
        self.rearm();
        Ok(removed)
    }

    pub fn schedule(&self, id: u8) -> Option<&Schedule> {
        self.state.schedules.get(id)
    }

    pub fn schedules(&self) -> &[Schedule] {
        self.state.schedules.list()
    }

    #[instrument(skip(self))]
    pub fn clear_schedules(&mut self) {
        self.state.schedules.clear();
        self.rearm();
    }

    // Schedule queries

    /// Whether hot water may run now (vacation suppresses every schedule)
    pub fn is_within_any_schedule(&self) -> Result<bool> {
        let now = self.now()?;
        Ok(self.state.is_within_any_schedule(&now))
    }

    pub fn is_within_schedule(&self, id: u8) -> Result<bool> {
        let now = self.now()?;
        Ok(self.state.is_within_schedule(id, &now))
    }

    pub fn current_active_schedule(&self) -> Result<Option<&Schedule>> {
        let now = self.now()?;
        Ok(self.state.current_active_schedule(&now))
    }

    pub fn next_scheduled_start(&self) -> Result<Option<NaiveDateTime>> {
        let now = self.now()?;
        Ok(self.state.next_scheduled_start(&now))
    }

    pub fn next_scheduled_end(&self) -> Result<Option<NaiveDateTime>> {
        let now = self.now()?;
        Ok(self.state.next_scheduled_end(&now))
    }

    pub fn seconds_until_next_event(&self) -> Result<Option<u32>> {
        let now = self.now()?;
        Ok(self.state.seconds_until_next_event(&now))
    }

    /// Alarm time currently armed for the next schedule start
    pub fn next_alarm(&self) -> Option<NaiveDateTime> {
        self.next_alarm
    }

    // Vacation mode

    #[instrument(skip(self))]
    pub fn set_vacation_mode(&mut self, vacation: VacationMode) {
        self.state.set_vacation_mode(vacation);
    }

    pub fn vacation_mode(&self) -> VacationMode {
        self.state.vacation
    }

    /// Whether a vacation is suppressing schedules right now
    pub fn is_vacation_mode(&self) -> Result<bool> {
        if !self.state.vacation.enabled {
            return Ok(false);
        }
        let now = self.now()?;
        Ok(self.state.is_vacation_active(&now))
    }

    // Pump exercise

    #[instrument(skip(self))]
    pub fn set_pump_exercise(
        &mut self,
        enabled: bool,
        day_of_month: u8,
        hour: u8,
        minute: u8,
        duration_seconds: u16,
    ) -> Result<()> {
        self.state
            .set_pump_exercise(enabled, day_of_month, hour, minute, duration_seconds)
    }

    pub fn pump_exercise(&self) -> PumpExercise {
        self.state.pump
    }

    pub fn is_pump_exercise_time(&self) -> Result<bool> {
        if !self.state.pump.enabled {
            return Ok(false);
        }

        let now = self.now()?;
        Ok(self.state.is_pump_exercise_time(&now))
    }

    /// Records that the pump exercise ran now
    #[instrument(skip(self))]
    pub fn mark_pump_exercise_complete(&mut self) -> Result<()> {
        let now = self.now()?;
        self.state.mark_pump_exercise_complete(now);
        Ok(())
    }

    // Temperature monitoring

    pub fn temperature(&self) -> Result<TemperatureData> {
        let bus = self.clock.lock();
        let celsius = bus.temperature_celsius()?;
        let timestamp = bus.now()?;

        let data = TemperatureData {
            celsius,
            fahrenheit: celsius * 9.0 / 5.0 + 32.0,
            timestamp,
        };
        debug!(
            "Temperature: {:.2}°C / {:.2}°F",
            data.celsius, data.fahrenheit
        );
        Ok(data)
    }

    pub fn temperature_celsius(&self) -> Result<f32> {
        self.clock.temperature_celsius()
    }

    // Event processing

    /// Checks for schedule transitions, alarms and pump exercise
    ///
    /// Returns the events found, which are also broadcast to subscribers.
    /// Meant to be called every [`SCHEDULE_CHECK_INTERVAL_SECONDS`].
    pub fn poll(&mut self) -> Result<Vec<ControllerEvent>> {
        let bus = self.clock.clone();
        let _guard = bus.lock();
        let now = self.now()?;
        let mut events = Vec::new();

        // Vacation counts as "nothing running"
        let active = if self.state.is_within_any_schedule(&now) {
            self.state
                .current_active_schedule(&now)
                .map(|s| (s.id, s.name.clone()))
        } else {
            None
        };

        let active_id = active.as_ref().map(|(id, _)| *id);
        let previous_id = self.active_schedule.as_ref().map(|(id, _)| *id);
        if active_id != previous_id {
            if let Some((id, name)) = self.active_schedule.take() {
                events.push(ControllerEvent::ScheduleEnded { id, name });
            }
            if let Some((id, name)) = &active {
                events.push(ControllerEvent::ScheduleStarted {
                    id: *id,
                    name: name.clone(),
                });
            }
            self.active_schedule = active;
        }

        if let Some(alarm) = self.next_alarm.filter(|alarm| now >= *alarm) {
            events.push(ControllerEvent::AlarmFired(alarm));
            self.rearm();
        }

        let this_minute = now.date().and_hms_opt(now.hour(), now.minute(), 0);
        if self.state.is_pump_exercise_time(&now) && self.pump_announced != this_minute {
            events.push(ControllerEvent::PumpExerciseDue {
                duration_seconds: self.state.pump.duration_seconds,
            });
            self.pump_announced = this_minute;
        }

        self.last_check = now;
        for event in &events {
            info!("Controller event: {:?}", event);
            self.emit(event.clone());
        }
        Ok(events)
    }

    // Persistence

    /// Serializes schedules and overrides for non-volatile storage
    pub fn save(&self) -> Vec<u8> {
        self.state.encode()
    }

    /// Replaces schedules and overrides from a persisted blob
    ///
    /// On failure the current state is kept. The schedule running before
    /// the load stays recorded, so the next [`poll`](Self::poll) reports
    /// only real transitions against the new state.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub fn load(&mut self, bytes: &[u8]) -> Result<()> {
        self.state.restore(bytes)?;
        self.rearm();
        Ok(())
    }

    // Utility methods

    /// One-line summary of what the controller is doing
    pub fn status(&self) -> Result<String> {
        let now = self.now()?;
        Ok(self.state.status(&now))
    }

    /// Logs time, temperature, schedules and overrides
    pub fn log_diagnostics(&self) {
        let _bus = self.clock.lock();

        info!("=== Hot-Water Controller Diagnostics ===");
        match self.now() {
            Ok(now) => info!("Current Time: {}", now),
            Err(e) => warn!("Current Time: unavailable ({})", e),
        }
        info!("Last Check: {}", self.last_check);
        match self.temperature_celsius() {
            Ok(celsius) => info!("Temperature: {:.2}°C", celsius),
            Err(e) => info!("Temperature: unavailable ({})", e),
        }
        info!("Total Schedules: {}", self.state.schedules.len());
        for schedule in self.state.schedules.list() {
            info!("  Schedule {}", schedule);
        }
        info!(
            "Vacation Mode: {}",
            if self.state.vacation.enabled { "ON" } else { "OFF" }
        );
        info!(
            "Pump Exercise: {}",
            if self.state.pump.enabled { "ON" } else { "OFF" }
        );
        match self.next_alarm {
            Some(alarm) => info!("Next Alarm: {}", alarm),
            None => info!("Next Alarm: none"),
        }
        match self.status() {
            Ok(status) => info!("Current Status: {}", status),
            Err(e) => warn!("Current Status: unavailable ({})", e),
        }
        info!("========================================");
    }

    /// Recomputes the next start and programs the clock alarm
    ///
    /// Failures are logged only: the mutation that triggered the re-arm
    /// has already happened.
    fn rearm(&mut self) {
        if let Err(e) = self.try_rearm() {
            warn!("Could not update alarm: {}", e);
        }
    }

    fn try_rearm(&mut self) -> Result<()> {
        let bus = self.clock.lock();
        let now = bus.now()?;
        let next = self.state.next_scheduled_start(&now);

        match next {
            Some(at) => {
                info!("Setting alarm for {}", at);
                bus.set_alarm(at)?;
            }
            None => {
                warn!("No upcoming schedules to set alarm for");
                bus.clear_alarm()?;
            }
        }

        drop(bus);
        self.next_alarm = next;
        Ok(())
    }

    fn emit(&self, event: ControllerEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}
