use std::path::{Path, PathBuf};
use std::{env, io, thread};

use color_eyre::eyre::Result;
use hotwater_scheduler::controller::SCHEDULE_CHECK_INTERVAL_SECONDS;
use hotwater_scheduler::*;
use tokio::sync::mpsc;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("hotwater_scheduler=info")),
        )
        .with_writer(io::stderr)
        .compact()
        .init();

    color_eyre::install()?;

    let usage = "Usage: hwd <state file> [utc offset seconds]";
    let args: Vec<_> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{usage}");
        std::process::exit(1);
    }
    if args[1] == "-h" || args[1] == "--help" {
        eprintln!("{usage}");
        std::process::exit(0);
    }

    let path = PathBuf::from(&args[1]);
    let utc_offset: i32 = match args.get(2) {
        Some(offset) => offset.parse()?,
        None => 0,
    };

    let state = ScheduleState::load_file(&path)?;
    let clock = ClockBus::new(SystemClock::new(utc_offset)?);
    let mut controller = HotWaterController::with_state(clock, state)?;

    // Inform about successful initialization
    println!("OK");

    // stdin is blocking, so it gets its own thread
    let (tx, mut lines) = mpsc::unbounded_channel::<String>();
    thread::spawn(move || {
        for line in io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut ticker = time::interval(Duration::from_secs(SCHEDULE_CHECK_INTERVAL_SECONDS));

    // Mainloop: poll the schedules and answer commands, line by line
    loop {
        tokio::select! {
            _ = ticker.tick() => match controller.poll() {
                Ok(events) => {
                    for event in events {
                        println!("EVENT {}", describe_event(&event));
                    }
                }
                Err(e) => warn!("Schedule check failed: {}", e),
            },
            line = lines.recv() => {
                let Some(line) = line else {
                    info!("Input closed, shutting down");
                    break;
                };
                match execute(&mut controller, line.trim(), &path, utc_offset) {
                    Ok(reply) if reply.is_empty() => println!("OK"),
                    Ok(reply) => println!("OK {reply}"),
                    Err(e) => println!("ERR {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    save(&controller, &path)?;
    Ok(())
}

/// Runs one protocol command and returns the text after `OK`
fn execute(
    controller: &mut HotWaterController<SystemClock>,
    input: &str,
    path: &Path,
    utc_offset: i32,
) -> Result<String> {
    debug!("Command: {}", input);
    let mut cmd = input.splitn(2, ':');
    match cmd.next() {
        Some("status") => Ok(controller.status()?),
        Some("active") => Ok(controller.is_within_any_schedule()?.to_string()),
        Some("next") => Ok(controller
            .next_scheduled_start()?
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "none".to_string())),
        Some("seconds") => Ok(controller
            .seconds_until_next_event()?
            .unwrap_or(NO_EVENT_SECONDS)
            .to_string()),
        Some("list") => Ok(controller
            .schedules()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("; ")),
        Some("time") => {
            let epoch: i64 = cmd
                .next()
                .ok_or_else(|| Error::InvalidTime("no epoch given".into()))?
                .trim()
                .parse()?;
            controller.set_time_from_utc(epoch, utc_offset)?;
            Ok(controller.formatted_time())
        }
        Some("pump_done") => {
            controller.mark_pump_exercise_complete()?;
            save(controller, path)?;
            Ok(String::new())
        }
        Some("save") => {
            save(controller, path)?;
            Ok(String::new())
        }
        Some("diag") => {
            controller.log_diagnostics();
            Ok(String::new())
        }
        Some("") | None => Err(color_eyre::eyre::eyre!("No command given")),
        Some(other) => Err(color_eyre::eyre::eyre!("Unknown command: {other}")),
    }
}

fn describe_event(event: &ControllerEvent) -> String {
    match event {
        ControllerEvent::TimeChanged(time) => format!("time:{time}"),
        ControllerEvent::ScheduleStarted { id, name } => format!("start:{id} {name}"),
        ControllerEvent::ScheduleEnded { id, name } => format!("end:{id} {name}"),
        ControllerEvent::AlarmFired(at) => format!("alarm:{at}"),
        ControllerEvent::PumpExerciseDue { duration_seconds } => {
            format!("pump:{duration_seconds}")
        }
    }
}

fn save(controller: &HotWaterController<SystemClock>, path: &Path) -> Result<()> {
    Ok(controller.state().save_file(path)?)
}
