//! Engine runtime: a single tokio task with channel-based command dispatch.
//!
//! Owns the `Controller` inside one task, so no Send/Sync juggling is needed
//! for engine state. External code talks to it through `EngineHandle`
//! (wraps an unbounded `mpsc::Sender<Command>`). Driver events, the
//! reconcile tick and the interval sweep are polled in the same `select!`,
//! so every mutation is applied one at a time.

use crate::controller::Controller;
use crate::driver::PlaybackEvent;
use crate::schedule::Schedule;
use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

// ── Commands ─────────────────────────────────────────────────────────────────

/// Inputs to the engine task.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Next,
    Shuffle,
    AddItem(PathBuf),
    SetFilter(BTreeSet<String>),
    EditSchedule {
        group: String,
        schedule: Option<Schedule>,
    },
    AddGroup(String),
    DeleteGroup(String),
    RenameGroup {
        old: String,
        new: String,
    },
    AssignGroup {
        path: PathBuf,
        group: String,
    },
    RemoveFromGroup {
        path: PathBuf,
        group: String,
    },
    SetItemPlayback {
        path: PathBuf,
        duration: Option<Duration>,
        loop_count: u32,
    },
    ScanFolder {
        dir: PathBuf,
        group: Option<String>,
    },
    SetRepeat(bool),
    /// Posted by an interval timer task.
    TimerFired {
        group: String,
        token: u64,
    },
    Shutdown,
}

// ── Clock ────────────────────────────────────────────────────────────────────

/// Source of wall-clock time for schedule evaluation.
pub trait Clock: Send + 'static {
    fn now(&self) -> NaiveDateTime;
}

/// Local time of the host.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Thread-safe handle for sending commands to the engine task.
/// Every method returns as soon as the command is queued.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<String>,
}

impl EngineHandle {
    pub fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("engine task is gone, command dropped");
        }
    }

    pub fn start(&self) {
        self.send(Command::Start);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn manual_advance(&self) {
        self.send(Command::Next);
    }

    pub fn shuffle(&self) {
        self.send(Command::Shuffle);
    }

    pub fn add_item(&self, path: PathBuf) {
        self.send(Command::AddItem(path));
    }

    pub fn set_filter(&self, groups: BTreeSet<String>) {
        self.send(Command::SetFilter(groups));
    }

    pub fn edit_schedule(&self, group: &str, schedule: Option<Schedule>) {
        self.send(Command::EditSchedule {
            group: group.to_string(),
            schedule,
        });
    }

    pub fn add_group(&self, name: &str) {
        self.send(Command::AddGroup(name.to_string()));
    }

    pub fn delete_group(&self, name: &str) {
        self.send(Command::DeleteGroup(name.to_string()));
    }

    pub fn rename_group(&self, old: &str, new: &str) {
        self.send(Command::RenameGroup {
            old: old.to_string(),
            new: new.to_string(),
        });
    }

    pub fn assign_group(&self, path: PathBuf, group: &str) {
        self.send(Command::AssignGroup {
            path,
            group: group.to_string(),
        });
    }

    pub fn remove_from_group(&self, path: PathBuf, group: &str) {
        self.send(Command::RemoveFromGroup {
            path,
            group: group.to_string(),
        });
    }

    pub fn set_item_playback(&self, path: PathBuf, duration: Option<Duration>, loop_count: u32) {
        self.send(Command::SetItemPlayback {
            path,
            duration,
            loop_count,
        });
    }

    pub fn scan_folder(&self, dir: PathBuf, group: Option<String>) {
        self.send(Command::ScanFolder { dir, group });
    }

    pub fn set_repeat(&self, on: bool) {
        self.send(Command::SetRepeat(on));
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    /// Latest status text. Updated after every input the engine handles.
    pub fn status(&self) -> String {
        self.status.borrow().clone()
    }

    /// A receiver for status changes.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.status.clone()
    }
}

// ── Runtime ──────────────────────────────────────────────────────────────────

/// Periods of the two scheduler timers.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    pub tick: Duration,
    pub sweep: Duration,
}

impl Default for Cadence {
    fn default() -> Self {
        Cadence {
            tick: Duration::from_secs(1),
            sweep: Duration::from_secs(60),
        }
    }
}

/// Move the controller into its own task and start ticking.
///
/// `events` is the receiving end of the channel the playback driver posts to.
/// Must be called from inside a tokio runtime.
pub fn spawn_engine<C: Clock>(
    mut controller: Controller,
    mut events: mpsc::UnboundedReceiver<PlaybackEvent>,
    cadence: Cadence,
    clock: C,
) -> (EngineHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
    let (status_tx, status_rx) = watch::channel(String::new());
    controller.attach_timers(tx.clone());

    let task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(cadence.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep = tokio::time::interval_at(Instant::now() + cadence.sweep, cadence.sweep);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("engine running");
        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        controller.shutdown(clock.now());
                        break;
                    }
                    Some(command) => apply(&mut controller, command, clock.now()),
                },
                Some(event) = events.recv() => controller.on_playback_event(event, clock.now()),
                _ = tick.tick() => controller.reconcile(clock.now()),
                _ = sweep.tick() => controller.sweep_intervals(clock.now()),
            }
            status_tx.send_replace(controller.status_text(clock.now()));
        }
        info!("engine shut down");
    });

    (
        EngineHandle {
            tx,
            status: status_rx,
        },
        task,
    )
}

/// Apply one command. Management errors are logged and surface in the status text.
fn apply(controller: &mut Controller, command: Command, now: NaiveDateTime) {
    let result = match command {
        Command::Start => {
            controller.start(now);
            Ok(())
        }
        Command::Stop => {
            controller.stop(now);
            Ok(())
        }
        Command::Next => {
            controller.manual_advance(now);
            Ok(())
        }
        Command::Shuffle => {
            controller.shuffle();
            Ok(())
        }
        Command::AddItem(path) => {
            controller.add_item(&path);
            Ok(())
        }
        Command::SetFilter(groups) => {
            controller.set_filter(groups);
            Ok(())
        }
        Command::EditSchedule { group, schedule } => {
            controller.edit_schedule(&group, schedule, now)
        }
        Command::AddGroup(name) => controller.add_group(&name),
        Command::DeleteGroup(name) => controller.delete_group(&name),
        Command::RenameGroup { old, new } => controller.rename_group(&old, &new, now),
        Command::AssignGroup { path, group } => controller.assign_group(&path, &group).map(|_| ()),
        Command::RemoveFromGroup { path, group } => {
            controller.remove_from_group(&path, &group).map(|_| ())
        }
        Command::SetItemPlayback {
            path,
            duration,
            loop_count,
        } => controller.set_item_playback(&path, duration, loop_count),
        Command::ScanFolder { dir, group } => {
            controller.scan_folder(&dir, group.as_deref()).map(|_| ())
        }
        Command::SetRepeat(on) => {
            controller.set_repeat(on);
            Ok(())
        }
        Command::TimerFired { group, token } => {
            controller.on_timer_fired(&group, token, now);
            Ok(())
        }
        Command::Shutdown => Ok(()),
    };
    if let Err(e) = result {
        warn!("command failed: {}", e);
        controller.report(e.to_string());
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
