//! Lock In Coach - posture coaching from the terminal
//!
//! Reads commands from stdin while the capture, gesture, feedback and timer
//! loops run in the background. Hold a closed fist in view for five seconds to
//! start a focus session.

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::Receiver;
use lockin_coach::timer::{completion_notice, format_remaining, is_final_stretch, progress_percent};
use lockin_coach::vision::gesture::progress_indicator;
use lockin_coach::{Coach, CoachConfig, CoachError, CoachEvent, Credentials, Severity};
use log::LevelFilter;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "lockin-coach")]
#[command(about = "Real-time posture coaching with a hold-to-start focus timer", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Base URL of the posture analysis service
    #[arg(long, value_name = "URL")]
    backend_url: Option<String>,

    /// Camera device index
    #[arg(long, value_name = "INDEX")]
    camera: Option<i32>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Calibrate,
    TimerStart,
    TimerStop,
    TimerReset,
    Tips,
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let command = match words.as_slice() {
        ["start"] => Command::Start,
        ["stop"] => Command::Stop,
        ["calibrate"] => Command::Calibrate,
        ["timer", "start"] => Command::TimerStart,
        ["timer", "stop"] => Command::TimerStop,
        ["timer", "reset"] => Command::TimerReset,
        ["tips"] => Command::Tips,
        ["status"] => Command::Status,
        ["help"] | ["?"] => Command::Help,
        ["quit"] | ["exit"] => Command::Quit,
        _ => return None,
    };
    Some(command)
}

fn print_help() {
    println!("Commands:");
    println!("  start | stop          start or stop the camera");
    println!("  calibrate             use the current head angle as neutral");
    println!("  timer start|stop|reset");
    println!("  tips                  ask for a few posture tips");
    println!("  status                show posture and timer state");
    println!("  quit");
}

/// Print coaching events as they arrive
fn spawn_event_printer(events: Receiver<CoachEvent>, work_duration_secs: u32) {
    std::thread::spawn(move || {
        for event in events {
            match event {
                CoachEvent::Posture(Some(state)) => {
                    log::debug!("Posture {} at {:.1}°", state.label.as_str(), state.angle_deg);
                }
                CoachEvent::Posture(None) => {}
                CoachEvent::Feedback(feedback) => {
                    let marker = match feedback.severity {
                        Severity::Good => "✓",
                        Severity::Warning => "!",
                        Severity::Neutral => "·",
                    };
                    println!("[{marker}] {}", feedback.assessment);
                    println!("    → {}", feedback.instruction);
                }
                CoachEvent::Gesture(state) => {
                    if let Some(indicator) = progress_indicator(&state) {
                        log::info!(
                            "Hold fist: {}s ({:.0}%)",
                            indicator.remaining_secs,
                            indicator.progress * 100.0
                        );
                    }
                }
                CoachEvent::GestureConfirmed(_) => println!("Fist held, starting focus session"),
                CoachEvent::Timer(state) => {
                    let suffix = if state.running && is_final_stretch(&state) {
                        " (final stretch)"
                    } else {
                        ""
                    };
                    log::info!(
                        "Timer {} {:.0}%{suffix}",
                        format_remaining(state.remaining_seconds),
                        progress_percent(&state, work_duration_secs)
                    );
                }
                CoachEvent::CycleComplete { completed_cycles } => {
                    println!("{}", completion_notice(completed_cycles));
                }
            }
        }
    });
}

async fn handle(coach: &mut Coach, command: Command) {
    match command {
        Command::Start => match coach.start_capture().await {
            Ok(()) => println!("Camera started"),
            Err(CoachError::Permission(e)) => println!("Camera unavailable: {e}"),
            Err(e) => log::error!("Failed to start capture: {e}"),
        },
        Command::Stop => {
            coach.stop_capture().await;
            println!("Camera stopped");
        }
        Command::Calibrate => {
            if coach.calibrate() {
                println!("Calibrating to your current posture");
            } else {
                println!("No posture reading yet, sit in view of the camera first");
            }
        }
        Command::TimerStart => coach.timer().start(),
        Command::TimerStop => coach.timer().stop(),
        Command::TimerReset => coach.timer().reset(),
        Command::Tips => match coach.request_tips().await {
            Ok(tips) => tips.iter().for_each(|tip| println!("  • {tip}")),
            Err(e) => println!("Could not fetch tips: {e}"),
        },
        Command::Status => {
            match coach.posture() {
                Some(state) => println!(
                    "Posture: {} ({:.1}°{})",
                    state.label.as_str(),
                    state.angle_deg,
                    state
                        .reason_code
                        .map(|r| format!(", {r}"))
                        .unwrap_or_default()
                ),
                None if coach.is_capturing() => println!("Posture: waiting for a reading"),
                None => println!("Posture: camera off"),
            }
            let timer = coach.timer().state();
            println!(
                "Timer: {} {} | sessions today: {}",
                format_remaining(timer.remaining_seconds),
                if timer.running { "running" } else { "paused" },
                timer.completed_cycles
            );
        }
        Command::Help => print_help(),
        Command::Quit => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .init();

    let mut config = match cli.config {
        Some(ref path) => CoachConfig::load(path)?,
        None => CoachConfig::default(),
    };
    if let Some(url) = cli.backend_url {
        config.backend_url = url;
    }
    if let Some(index) = cli.camera {
        config.camera_index = index;
    }

    let credentials = match Credentials::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            log::error!("Set the text-completion API key before starting");
            return Err(e.into());
        }
    };

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    spawn_event_printer(events_rx, config.work_duration_secs);

    let mut coach = Coach::from_config(&config, &credentials, events_tx).await?;
    log::info!("Posture service at {}", config.backend_url);
    print_help();

    // Set up Ctrl+C handler
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal...");
        let _ = tx.blocking_send(());
    })?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = rx.recv() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Some(Command::Quit) => break,
                    Some(command) => handle(&mut coach, command).await,
                    None => println!("Unknown command: {} (try 'help')", line.trim()),
                }
            }
        }
    }

    coach.shutdown().await?;
    log::info!("Shutdown complete. Sit up straight!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("start"), Some(Command::Start));
        assert_eq!(parse_command("  timer   reset "), Some(Command::TimerReset));
        assert_eq!(parse_command("timer"), None);
        assert_eq!(parse_command("exit"), Some(Command::Quit));
        assert_eq!(parse_command("dance"), None);
    }
}
