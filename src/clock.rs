/*!
 # Clock sources

 The scheduler only needs a handful of things from a real-time clock:
 the current local time, a way to set it, a temperature reading for
 diagnostics and (optionally) a hardware alarm. [`Clock`] is that
 interface; [`ClockBus`] serializes access to one clock so several
 callers can share it.
*/

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{FixedOffset, NaiveDateTime, TimeDelta, Utc};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, trace};

use crate::{Error, Result};

/// Default location of the board temperature on Linux
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// A source of local wall-clock time
pub trait Clock: Send {
    /// Current local time
    fn now(&self) -> Result<NaiveDateTime>;

    /// Sets the local time
    fn set_time(&self, time: NaiveDateTime) -> Result<()>;

    /// Temperature of the clock chip or board, for diagnostics only
    fn temperature_celsius(&self) -> Result<f32>;

    /// Programs the wake-up alarm, if the hardware has one
    fn set_alarm(&self, _at: NaiveDateTime) -> Result<()> {
        Ok(())
    }

    /// Clears a pending alarm
    fn clear_alarm(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared, serialized access to a clock
///
/// The lock is reentrant: a thread already holding it may lock again,
/// so a locked section can call helpers that lock on their own.
pub struct ClockBus<C> {
    inner: Arc<ReentrantMutex<C>>,
}

impl<C> Clone for ClockBus<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Clock> ClockBus<C> {
    pub fn new(clock: C) -> Self {
        Self {
            inner: Arc::new(ReentrantMutex::new(clock)),
        }
    }

    /// Locks the bus for a sequence of clock operations
    pub fn lock(&self) -> ReentrantMutexGuard<'_, C> {
        trace!("Acquiring clock bus");
        self.inner.lock()
    }

    pub fn now(&self) -> Result<NaiveDateTime> {
        self.lock().now()
    }

    pub fn set_time(&self, time: NaiveDateTime) -> Result<()> {
        self.lock().set_time(time)
    }

    pub fn temperature_celsius(&self) -> Result<f32> {
        self.lock().temperature_celsius()
    }

    pub fn set_alarm(&self, at: NaiveDateTime) -> Result<()> {
        self.lock().set_alarm(at)
    }

    pub fn clear_alarm(&self) -> Result<()> {
        self.lock().clear_alarm()
    }
}

/// Host clock shifted by a fixed UTC offset
///
/// Setting the time does not touch the operating system clock; the
/// difference is kept as a software adjustment.
#[derive(Debug)]
pub struct SystemClock {
    offset: FixedOffset,
    adjustment: Mutex<TimeDelta>,
    thermal_zone: PathBuf,
}

impl SystemClock {
    /// Creates a clock for local time `utc_offset_seconds` east of UTC
    pub fn new(utc_offset_seconds: i32) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_seconds).ok_or_else(|| {
            Error::InvalidTime(format!("UTC offset of {utc_offset_seconds} seconds"))
        })?;

        Ok(Self {
            offset,
            adjustment: Mutex::new(TimeDelta::zero()),
            thermal_zone: PathBuf::from(DEFAULT_THERMAL_ZONE),
        })
    }

    /// Reads the temperature from another sysfs file (millidegrees Celsius)
    pub fn with_thermal_zone(mut self, path: impl Into<PathBuf>) -> Self {
        self.thermal_zone = path.into();
        self
    }

    fn host_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Result<NaiveDateTime> {
        Ok(self.host_now() + *self.adjustment.lock())
    }

    fn set_time(&self, time: NaiveDateTime) -> Result<()> {
        let adjustment = time - self.host_now();
        debug!("Adjusting software clock by {}s", adjustment.num_seconds());
        *self.adjustment.lock() = adjustment;
        Ok(())
    }

    fn temperature_celsius(&self) -> Result<f32> {
        let raw = std::fs::read_to_string(&self.thermal_zone).map_err(|e| {
            Error::Unavailable(format!("{}: {}", self.thermal_zone.display(), e))
        })?;
        let millidegrees: f32 = raw.trim().parse().map_err(|_| {
            Error::Unavailable(format!("unreadable temperature '{}'", raw.trim()))
        })?;
        Ok(millidegrees / 1000.0)
    }
}

/// Clock that only moves when told to
///
/// Used by tests and bench setups without clock hardware.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
    temperature: Mutex<f32>,
    alarm: Mutex<Option<NaiveDateTime>>,
    available: AtomicBool,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
            temperature: Mutex::new(25.0),
            alarm: Mutex::new(None),
            available: AtomicBool::new(true),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock() += by;
    }

    pub fn set_temperature(&self, celsius: f32) {
        *self.temperature.lock() = celsius;
    }

    /// The alarm last programmed through [`Clock::set_alarm`]
    pub fn alarm(&self) -> Option<NaiveDateTime> {
        *self.alarm.lock()
    }

    /// Simulates the clock dropping off the bus
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Unavailable("manual clock offline".into()))
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Result<NaiveDateTime> {
        self.ensure_available()?;
        Ok(*self.now.lock())
    }

    fn set_time(&self, time: NaiveDateTime) -> Result<()> {
        self.ensure_available()?;
        *self.now.lock() = time;
        Ok(())
    }

    fn temperature_celsius(&self) -> Result<f32> {
        self.ensure_available()?;
        Ok(*self.temperature.lock())
    }

    fn set_alarm(&self, at: NaiveDateTime) -> Result<()> {
        self.ensure_available()?;
        *self.alarm.lock() = Some(at);
        Ok(())
    }

    fn clear_alarm(&self) -> Result<()> {
        self.ensure_available()?;
        *self.alarm.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(start());
        clock.advance(TimeDelta::minutes(90));
        assert_eq!(clock.now().unwrap(), start() + TimeDelta::minutes(90));
    }

    #[test]
    fn test_manual_clock_offline() {
        let clock = ManualClock::new(start());
        clock.set_available(false);
        assert!(matches!(clock.now(), Err(Error::Unavailable(_))));
        clock.set_available(true);
        assert!(clock.now().is_ok());
    }

    #[test]
    fn test_bus_lock_is_reentrant() {
        let bus = ClockBus::new(ManualClock::new(start()));
        let guard = bus.lock();
        // Nested acquisition on the same thread must not deadlock
        assert_eq!(bus.now().unwrap(), guard.now().unwrap());
    }

    #[test]
    fn test_system_clock_set_time_applies_adjustment() {
        let clock = SystemClock::new(3600).unwrap();
        let target = start();
        clock.set_time(target).unwrap();

        let drift = (clock.now().unwrap() - target).num_seconds();
        assert!((0..5).contains(&drift));
    }

    #[test]
    fn test_system_clock_rejects_bad_offset() {
        assert!(SystemClock::new(30 * 3600).is_err());
    }

    #[test]
    fn test_system_clock_missing_thermal_zone() {
        let clock = SystemClock::new(0)
            .unwrap()
            .with_thermal_zone("/nonexistent/thermal/temp");
        assert!(matches!(clock.temperature_celsius(), Err(Error::Unavailable(_))));
    }
}
