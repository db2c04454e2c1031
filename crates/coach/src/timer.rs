//! Focus interval timer (Pomodoro-style countdown)

use crate::types::{CoachEvent, TimerState};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Remaining time below which the session is in its final stretch
const FINAL_STRETCH_SECS: u32 = 5 * 60;

/// Countdown state machine. One call to [`IntervalTimer::tick`] is one second.
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    work_duration_secs: u32,
    state: TimerState,
}

impl IntervalTimer {
    pub fn new(work_duration_secs: u32) -> Self {
        let work_duration_secs = work_duration_secs.max(1);
        Self {
            work_duration_secs,
            state: TimerState {
                remaining_seconds: work_duration_secs,
                running: false,
                completed_cycles: 0,
            },
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn work_duration_secs(&self) -> u32 {
        self.work_duration_secs
    }

    /// Returns whether anything changed
    pub fn start(&mut self) -> bool {
        let changed = !self.state.running;
        self.state.running = true;
        changed
    }

    /// Returns whether anything changed
    pub fn stop(&mut self) -> bool {
        let changed = self.state.running;
        self.state.running = false;
        changed
    }

    pub fn reset(&mut self) {
        self.state.running = false;
        self.state.remaining_seconds = self.work_duration_secs;
    }

    /// Count down one second. Returns the new cycle count when a session completes.
    pub fn tick(&mut self) -> Option<u32> {
        if !self.state.running {
            return None;
        }
        self.state.remaining_seconds = self.state.remaining_seconds.saturating_sub(1);
        if self.state.remaining_seconds > 0 {
            return None;
        }
        self.state.completed_cycles += 1;
        self.state.running = false;
        self.state.remaining_seconds = self.work_duration_secs;
        Some(self.state.completed_cycles)
    }
}

/// `MM:SS`
pub fn format_remaining(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

pub fn progress_percent(state: &TimerState, work_duration_secs: u32) -> f32 {
    let total = work_duration_secs.max(1) as f32;
    let elapsed = work_duration_secs.saturating_sub(state.remaining_seconds) as f32;
    elapsed / total * 100.0
}

pub fn is_final_stretch(state: &TimerState) -> bool {
    state.remaining_seconds < FINAL_STRETCH_SECS
}

pub fn completion_notice(completed_cycles: u32) -> String {
    let plural = if completed_cycles == 1 { "" } else { "s" };
    format!(
        "Focus session complete! You've completed {completed_cycles} focus session{plural} today. Time for a break!"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    Start,
    Stop,
    Reset,
}

/// Control handle for a running timer task
#[derive(Clone)]
pub struct TimerHandle {
    commands: mpsc::UnboundedSender<TimerCommand>,
    state: watch::Receiver<TimerState>,
}

impl TimerHandle {
    fn send(&self, command: TimerCommand) {
        if self.commands.send(command).is_err() {
            log::warn!("Timer task is gone, dropping {command:?}");
        }
    }

    pub fn start(&self) {
        self.send(TimerCommand::Start);
    }

    pub fn stop(&self) {
        self.send(TimerCommand::Stop);
    }

    pub fn reset(&self) {
        self.send(TimerCommand::Reset);
    }

    pub fn state(&self) -> TimerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerState> {
        self.state.clone()
    }
}

fn publish(events: &mpsc::UnboundedSender<CoachEvent>, event: CoachEvent) {
    if events.send(event).is_err() {
        log::debug!("Timer event dropped, coordinator gone");
    }
}

/// Run `timer` on a one-second ticker until every handle is dropped
pub fn spawn_timer(
    mut timer: IntervalTimer,
    events: mpsc::UnboundedSender<CoachEvent>,
) -> (TimerHandle, JoinHandle<()>) {
    let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(timer.state());

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            let before = timer.state();
            tokio::select! {
                command = commands_rx.recv() => {
                    let Some(command) = command else { break };
                    match command {
                        TimerCommand::Start => {
                            if timer.start() {
                                ticker.reset();
                                log::info!("Focus session started");
                            }
                        }
                        TimerCommand::Stop => {
                            timer.stop();
                        }
                        TimerCommand::Reset => timer.reset(),
                    }
                }
                _ = ticker.tick() => {
                    if let Some(completed_cycles) = timer.tick() {
                        log::info!("{}", completion_notice(completed_cycles));
                        publish(&events, CoachEvent::CycleComplete { completed_cycles });
                    }
                }
            }

            let after = timer.state();
            if after != before {
                state_tx.send_replace(after);
                publish(&events, CoachEvent::Timer(after));
            }
        }
        log::debug!("Timer task stopped");
    });

    (
        TimerHandle {
            commands: commands_tx,
            state: state_rx,
        },
        task,
    )
}
