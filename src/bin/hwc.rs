use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use hotwater_scheduler::days::parse_days;
use hotwater_scheduler::schedule::parse_time_of_day;
use hotwater_scheduler::*;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// File holding the persisted schedules and overrides
    #[arg(short, long, env = "HWC_STATE", default_value = "hotwater.bin")]
    state: PathBuf,

    /// Local offset from UTC in seconds
    #[arg(short, long, env = "HWC_UTC_OFFSET", default_value_t = 0, allow_negative_numbers = true)]
    utc_offset: i32,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List all schedules
    List,
    /// Add a schedule
    Add {
        /// Label for the window
        name: String,
        /// Days (mon,tue,wed,thu,fri,sat,sun,all,weekdays,weekend)
        #[arg(short, long, default_value = "weekdays")]
        days: String,
        /// Start time (HH:MM)
        #[arg(long, value_parser = time_of_day)]
        start: (u8, u8),
        /// End time (HH:MM), may be earlier than the start
        #[arg(long, value_parser = time_of_day)]
        end: (u8, u8),
        /// Explicit id (1-255), the lowest free one otherwise
        #[arg(long)]
        id: Option<u8>,
        /// Store the schedule disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Replace an existing schedule
    Update {
        /// Schedule id
        id: u8,
        /// Label for the window
        name: String,
        /// Days (mon,tue,wed,thu,fri,sat,sun,all,weekdays,weekend)
        #[arg(short, long, default_value = "weekdays")]
        days: String,
        /// Start time (HH:MM)
        #[arg(long, value_parser = time_of_day)]
        start: (u8, u8),
        /// End time (HH:MM)
        #[arg(long, value_parser = time_of_day)]
        end: (u8, u8),
        /// Store the schedule disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a schedule
    Remove {
        /// Schedule id
        id: u8,
    },
    /// Enable a schedule
    Enable {
        /// Schedule id
        id: u8,
    },
    /// Disable a schedule without removing it
    Disable {
        /// Schedule id
        id: u8,
    },
    /// Remove every schedule
    Clear,
    /// Show what the scheduler is doing right now
    Status,
    /// Show the next start, the next end and the seconds until the next event
    Next,
    /// Suppress all schedules between two dates (inclusive)
    Vacation {
        /// First day (YYYY-MM-DD)
        #[arg(value_parser = calendar_date)]
        start: NaiveDate,
        /// Last day (YYYY-MM-DD)
        #[arg(value_parser = calendar_date)]
        end: NaiveDate,
        /// Keep the monthly pump exercise running while away
        #[arg(long)]
        pump: bool,
    },
    /// Turn vacation mode off
    VacationOff,
    /// Configure the monthly pump exercise
    Pump {
        /// Day of the month (1-31), a day missing from a month skips that month
        #[arg(short, long, default_value_t = 1)]
        day: u8,
        /// Time of day (HH:MM)
        #[arg(short, long, value_parser = time_of_day, default_value = "03:00")]
        at: (u8, u8),
        /// Run time in seconds
        #[arg(long, default_value_t = 300)]
        duration: u16,
    },
    /// Turn the pump exercise off
    PumpOff,
    /// Show the clock temperature
    Temp,
    /// Log a full diagnostics dump
    Diagnostics,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("hotwater_scheduler=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    let state = ScheduleState::load_file(&cli.state)?;
    let clock = ClockBus::new(SystemClock::new(cli.utc_offset)?);
    let mut controller = HotWaterController::with_state(clock, state)?;

    let mutated = run(&mut controller, cli.command.unwrap_or(Commands::Status))?;
    if mutated {
        controller.state().save_file(&cli.state)?;
    }

    Ok(())
}

/// Executes one command, returning whether the state changed
fn run(controller: &mut HotWaterController<SystemClock>, command: Commands) -> Result<bool> {
    match command {
        Commands::List => {
            if controller.schedules().is_empty() {
                println!("No schedules");
            }
            for schedule in controller.schedules() {
                println!("{schedule}");
            }
            Ok(false)
        }
        Commands::Add {
            name,
            days,
            start,
            end,
            id,
            disabled,
        } => {
            let mut schedule = build_schedule(name, &days, start, end, disabled)?;
            schedule.id = id.unwrap_or(0);
            let id = controller.add_schedule(schedule)?;
            println!("Added schedule {id}");
            Ok(true)
        }
        Commands::Update {
            id,
            name,
            days,
            start,
            end,
            disabled,
        } => {
            let schedule = build_schedule(name, &days, start, end, disabled)?;
            controller.update_schedule(id, schedule)?;
            println!("Updated schedule {id}");
            Ok(true)
        }
        Commands::Remove { id } => {
            let removed = controller.remove_schedule(id)?;
            println!("Removed {removed}");
            Ok(true)
        }
        Commands::Enable { id } => {
            controller.set_schedule_enabled(id, true)?;
            Ok(true)
        }
        Commands::Disable { id } => {
            controller.set_schedule_enabled(id, false)?;
            Ok(true)
        }
        Commands::Clear => {
            controller.clear_schedules();
            Ok(true)
        }
        Commands::Status => {
            println!(
                "{} {}  {}",
                controller.formatted_date(),
                controller.formatted_time(),
                controller.status()?
            );
            Ok(false)
        }
        Commands::Next => {
            println!("Next start: {}", describe(controller.next_scheduled_start()?));
            println!("Next end:   {}", describe(controller.next_scheduled_end()?));
            match controller.seconds_until_next_event()? {
                Some(seconds) => println!("Seconds until next event: {seconds}"),
                None => println!("Seconds until next event: none"),
            }
            Ok(false)
        }
        Commands::Vacation { start, end, pump } => {
            if end < start {
                return Err(eyre!("vacation ends ({end}) before it starts ({start})"));
            }
            let vacation = VacationMode::new(
                start.and_hms_opt(0, 0, 0).ok_or_else(|| eyre!("bad start date"))?,
                end.and_hms_opt(23, 59, 59).ok_or_else(|| eyre!("bad end date"))?,
                pump,
            );
            controller.set_vacation_mode(vacation);
            Ok(true)
        }
        Commands::VacationOff => {
            controller.set_vacation_mode(VacationMode::default());
            Ok(true)
        }
        Commands::Pump { day, at, duration } => {
            controller.set_pump_exercise(true, day, at.0, at.1, duration)?;
            Ok(true)
        }
        Commands::PumpOff => {
            let pump = controller.pump_exercise();
            controller.set_pump_exercise(
                false,
                pump.day_of_month,
                pump.hour,
                pump.minute,
                pump.duration_seconds,
            )?;
            Ok(true)
        }
        Commands::Temp => {
            let temp = controller.temperature()?;
            println!("{:.1}°C / {:.1}°F", temp.celsius, temp.fahrenheit);
            Ok(false)
        }
        Commands::Diagnostics => {
            controller.log_diagnostics();
            Ok(false)
        }
    }
}

fn build_schedule(
    name: String,
    days: &str,
    start: (u8, u8),
    end: (u8, u8),
    disabled: bool,
) -> Result<Schedule> {
    let day_mask = parse_days(days);
    debug!("Days value: {:#04x}", day_mask);
    if day_mask == 0 && !days.eq_ignore_ascii_case("none") {
        return Err(eyre!("no valid days in '{days}'"));
    }

    let mut schedule = Schedule::new(name, day_mask, start, end);
    schedule.enabled = !disabled;
    Ok(schedule)
}

fn describe(time: Option<NaiveDateTime>) -> String {
    time.map(|t| t.format("%a %Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "none".to_string())
}

fn time_of_day(s: &str) -> std::result::Result<(u8, u8), String> {
    parse_time_of_day(s).map_err(|e| e.to_string())
}

fn calendar_date(s: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("'{s}': {e}"))
}
