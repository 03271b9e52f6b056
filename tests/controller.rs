use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};
use hotwater_scheduler::*;

/// Monday 2025-03-03 at the given time
fn monday(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 3)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

fn controller_at(start: NaiveDateTime) -> HotWaterController<ManualClock> {
    HotWaterController::new(ClockBus::new(ManualClock::new(start))).unwrap()
}

fn morning_shower() -> Schedule {
    Schedule::new("Morning Shower", WEEK_DAYS.week_days, (6, 0), (7, 30))
}

fn advance(controller: &HotWaterController<ManualClock>, by: TimeDelta) {
    controller.clock().lock().advance(by);
}

#[test]
fn test_poll_reports_start_and_end_transitions() {
    let mut controller = controller_at(monday(5, 59));
    let id = controller.add_schedule(morning_shower()).unwrap();
    let mut events = controller.subscribe();

    assert!(controller.poll().unwrap().is_empty());

    advance(&controller, TimeDelta::minutes(1));
    let fired = controller.poll().unwrap();
    assert_eq!(
        fired,
        vec![
            ControllerEvent::ScheduleStarted {
                id,
                name: "Morning Shower".into()
            },
            ControllerEvent::AlarmFired(monday(6, 0)),
        ]
    );
    // Subscribers see the same events
    assert_eq!(events.try_recv().unwrap(), fired[0]);
    assert_eq!(events.try_recv().unwrap(), fired[1]);

    // Re-armed for Tuesday
    assert_eq!(controller.next_alarm(), Some(monday(6, 0) + TimeDelta::days(1)));

    // Still running, nothing new
    advance(&controller, TimeDelta::minutes(30));
    assert!(controller.poll().unwrap().is_empty());

    advance(&controller, TimeDelta::minutes(60));
    assert_eq!(
        controller.poll().unwrap(),
        vec![ControllerEvent::ScheduleEnded {
            id,
            name: "Morning Shower".into()
        }]
    );
}

#[test]
fn test_alarm_follows_schedule_changes() {
    let mut controller = controller_at(monday(12, 0));
    assert_eq!(controller.next_alarm(), None);

    let id = controller.add_schedule(morning_shower()).unwrap();
    let tuesday_morning = monday(6, 0) + TimeDelta::days(1);
    assert_eq!(controller.next_alarm(), Some(tuesday_morning));
    assert_eq!(controller.clock().lock().alarm(), Some(tuesday_morning));

    let evening = Schedule::new("Evening", WEEK_DAYS.all, (18, 0), (19, 0));
    controller.add_schedule(evening).unwrap();
    assert_eq!(controller.clock().lock().alarm(), Some(monday(18, 0)));

    controller.clear_schedules();
    assert_eq!(controller.next_alarm(), None);
    assert_eq!(controller.clock().lock().alarm(), None);

    assert!(matches!(controller.remove_schedule(id), Err(Error::NotFound(_))));
}

#[test]
fn test_disabled_schedule_is_ignored() {
    let mut controller = controller_at(monday(6, 30));
    let id = controller.add_schedule(morning_shower()).unwrap();
    assert!(controller.is_within_schedule(id).unwrap());

    controller.set_schedule_enabled(id, false).unwrap();
    assert!(!controller.is_within_any_schedule().unwrap());
    assert_eq!(controller.current_active_schedule().unwrap(), None);
    assert_eq!(controller.status().unwrap(), "No Active Schedules");

    controller.set_schedule_enabled(id, true).unwrap();
    assert_eq!(controller.status().unwrap(), "Active: Morning Shower");
}

#[test]
fn test_vacation_suppresses_running_schedule() {
    let mut controller = controller_at(monday(6, 30));
    let id = controller.add_schedule(morning_shower()).unwrap();
    controller.poll().unwrap();
    assert!(controller.is_within_any_schedule().unwrap());

    controller.set_vacation_mode(VacationMode::new(
        monday(0, 0),
        monday(23, 59) + TimeDelta::days(6),
        false,
    ));
    assert!(controller.is_vacation_mode().unwrap());
    assert!(!controller.is_within_any_schedule().unwrap());
    assert_eq!(controller.status().unwrap(), "Vacation Mode Active");

    // A suppressed schedule counts as ended
    assert_eq!(
        controller.poll().unwrap(),
        vec![ControllerEvent::ScheduleEnded {
            id,
            name: "Morning Shower".into()
        }]
    );

    controller.set_vacation_mode(VacationMode::default());
    assert!(!controller.is_vacation_mode().unwrap());
    assert!(controller.is_within_any_schedule().unwrap());
}

#[test]
fn test_pump_exercise_runs_once_per_month() {
    let mut controller = controller_at(monday(3, 0));
    controller.set_pump_exercise(true, 3, 3, 0, 120).unwrap();
    assert!(controller.is_pump_exercise_time().unwrap());

    assert_eq!(
        controller.poll().unwrap(),
        vec![ControllerEvent::PumpExerciseDue {
            duration_seconds: 120
        }]
    );
    // Announced once per minute
    advance(&controller, TimeDelta::seconds(20));
    assert!(controller.poll().unwrap().is_empty());

    controller.mark_pump_exercise_complete().unwrap();
    assert!(!controller.is_pump_exercise_time().unwrap());
    assert_eq!(controller.pump_exercise().last_run, Some(monday(3, 0) + TimeDelta::seconds(20)));

    // Same slot next month fires again
    let next_month = NaiveDate::from_ymd_opt(2025, 4, 3)
        .unwrap()
        .and_hms_opt(3, 0, 30)
        .unwrap();
    controller.set_time(next_month).unwrap();
    assert!(controller.is_pump_exercise_time().unwrap());
}

#[test]
fn test_pump_exercise_during_vacation() {
    let mut controller = controller_at(monday(3, 0));
    controller.set_pump_exercise(true, 3, 3, 0, 300).unwrap();

    let away = VacationMode::new(monday(0, 0), monday(0, 0) + TimeDelta::days(10), false);
    controller.set_vacation_mode(away);
    assert!(!controller.is_pump_exercise_time().unwrap());

    controller.set_vacation_mode(VacationMode {
        run_pump_exercise: true,
        ..away
    });
    assert!(controller.is_pump_exercise_time().unwrap());
}

#[test]
fn test_save_and_load_between_controllers() {
    let mut controller = controller_at(monday(12, 0));
    controller.add_schedule(morning_shower()).unwrap();
    controller
        .add_schedule(Schedule::new("Late Bath", WEEK_DAYS.weekend_days, (23, 0), (0, 30)))
        .unwrap();
    controller.set_vacation_mode(VacationMode::new(monday(0, 0), monday(23, 59), true));
    controller.set_pump_exercise(true, 15, 4, 30, 600).unwrap();
    let blob = controller.save();

    let mut restored = controller_at(monday(12, 0));
    restored.load(&blob).unwrap();
    assert_eq!(restored.state(), controller.state());
    assert_eq!(restored.next_alarm(), controller.next_alarm());

    // A bad blob leaves the loaded state alone
    let mut corrupt = blob.clone();
    corrupt[0] = 0x00;
    assert!(matches!(restored.load(&corrupt), Err(Error::InvalidMagic(0x00, 0x23))));
    assert_eq!(restored.state(), controller.state());
}

#[test]
fn test_load_keeps_running_schedule() {
    let mut controller = controller_at(monday(6, 30));
    let id = controller.add_schedule(morning_shower()).unwrap();
    assert_eq!(controller.poll().unwrap().len(), 1);

    // Reloading the same state is not a transition
    let blob = controller.save();
    controller.load(&blob).unwrap();
    assert!(controller.poll().unwrap().is_empty());

    // A state where something else is running ends the old one first
    let mut other = controller_at(monday(6, 30));
    let mut bath = Schedule::new("Early Bath", WEEK_DAYS.all, (6, 0), (8, 0));
    bath.id = 7;
    other.add_schedule(bath).unwrap();
    controller.load(&other.save()).unwrap();

    assert_eq!(
        controller.poll().unwrap(),
        vec![
            ControllerEvent::ScheduleEnded {
                id,
                name: "Morning Shower".into()
            },
            ControllerEvent::ScheduleStarted {
                id: 7,
                name: "Early Bath".into()
            },
        ]
    );
}

#[test]
fn test_set_time_from_utc() {
    let mut controller = controller_at(monday(12, 0));
    let mut events = controller.subscribe();

    let result = controller.set_time_from_utc(946_684_799, 0);
    assert!(matches!(result, Err(Error::InvalidTime(_))));
    assert_eq!(controller.now().unwrap(), monday(12, 0));

    let epoch = 1_741_000_000;
    controller.set_time_from_utc(epoch, 3600).unwrap();
    let expected = DateTime::from_timestamp(epoch + 3600, 0).unwrap().naive_utc();
    assert_eq!(controller.now().unwrap(), expected);
    assert_eq!(controller.now_utc(3600).unwrap(), epoch);
    assert_eq!(events.try_recv().unwrap(), ControllerEvent::TimeChanged(expected));
}

#[test]
fn test_unavailable_clock_propagates() {
    let mut controller = controller_at(monday(6, 30));
    controller.add_schedule(morning_shower()).unwrap();
    controller.clock().lock().set_available(false);

    assert!(!controller.is_running());
    assert!(matches!(controller.is_within_any_schedule(), Err(Error::Unavailable(_))));
    assert!(matches!(controller.poll(), Err(Error::Unavailable(_))));
    assert!(matches!(controller.temperature(), Err(Error::Unavailable(_))));
    assert_eq!(controller.formatted_time(), "--:--:--");
    assert_eq!(controller.formatted_date(), "----/--/--");

    // Mutations still apply, only the alarm update is skipped
    controller
        .add_schedule(Schedule::new("Evening", WEEK_DAYS.all, (18, 0), (19, 0)))
        .unwrap();
    assert_eq!(controller.schedules().len(), 2);

    controller.clock().lock().set_available(true);
    assert!(controller.is_within_any_schedule().unwrap());
}

#[test]
fn test_store_capacity_through_controller() {
    let mut controller = controller_at(monday(12, 0));
    for hour in 0..MAX_SCHEDULES as u8 {
        controller
            .add_schedule(Schedule::new("Slot", WEEK_DAYS.all, (hour, 0), (hour, 30)))
            .unwrap();
    }
    let before = controller.state().clone();

    let result = controller.add_schedule(morning_shower());
    assert!(matches!(result, Err(Error::Full(MAX_SCHEDULES))));
    assert_eq!(controller.state(), &before);
}

#[test]
fn test_temperature_reading() {
    let controller = controller_at(monday(12, 0));
    controller.clock().lock().set_temperature(30.0);

    let reading = controller.temperature().unwrap();
    assert_eq!(reading.celsius, 30.0);
    assert_eq!(reading.fahrenheit, 86.0);
    assert_eq!(reading.timestamp, monday(12, 0));
}

#[test]
fn test_seconds_until_next_event() {
    let mut controller = controller_at(monday(5, 0));
    assert_eq!(controller.seconds_until_next_event().unwrap(), None);

    controller.add_schedule(morning_shower()).unwrap();
    assert_eq!(controller.seconds_until_next_event().unwrap(), Some(3600));

    // While running, the end is nearer than the next start
    controller.set_time(monday(7, 0)).unwrap();
    assert_eq!(controller.seconds_until_next_event().unwrap(), Some(1800));
    assert_eq!(controller.next_scheduled_end().unwrap(), Some(monday(7, 30)));
}
