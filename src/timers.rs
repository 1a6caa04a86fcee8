//! One-shot interval timers keyed by group name.
//!
//! Arming a group replaces whatever was armed for it before. Each arm gets a
//! fresh token; a fire carrying an older token is stale and gets dropped by
//! [`TimerSet::take_if_current`]. When attached to a runtime, a tokio task
//! sleeps until the deadline and posts [`Command::TimerFired`]; detached
//! timers only record their deadline.

use crate::runtime::Command;
use chrono::{NaiveDateTime, TimeDelta};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

struct ArmedTimer {
    token: u64,
    due: NaiveDateTime,
    task: Option<JoinHandle<()>>,
}

impl ArmedTimer {
    fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[derive(Default)]
pub struct TimerSet {
    armed: HashMap<String, ArmedTimer>,
    next_token: u64,
    tx: Option<UnboundedSender<Command>>,
}

impl TimerSet {
    /// Timers that only record deadlines.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Timers that post `TimerFired` on `tx` when they expire. Must be armed
    /// from inside a tokio runtime.
    pub fn attached(tx: UnboundedSender<Command>) -> Self {
        TimerSet {
            armed: HashMap::new(),
            next_token: 0,
            tx: Some(tx),
        }
    }

    pub fn attach(&mut self, tx: UnboundedSender<Command>) {
        self.tx = Some(tx);
    }

    /// Arm a one-shot timer for `group`, `minutes` from `now`. Returns the token.
    pub fn arm(&mut self, group: &str, minutes: u32, now: NaiveDateTime) -> u64 {
        self.arm_until(group, now + TimeDelta::minutes(i64::from(minutes)), now)
    }

    /// Arm a one-shot timer for `group` that expires at `due`.
    pub fn arm_until(&mut self, group: &str, due: NaiveDateTime, now: NaiveDateTime) -> u64 {
        self.cancel(group);
        self.next_token += 1;
        let token = self.next_token;
        let wait = (due - now).to_std().unwrap_or(Duration::ZERO);

        let task = self.tx.clone().map(|tx| {
            let group = group.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                let _ = tx.send(Command::TimerFired { group, token });
            })
        });

        debug!(group, wait_secs = wait.as_secs(), token, "interval timer armed");
        self.armed.insert(
            group.to_string(),
            ArmedTimer {
                token,
                due,
                task,
            },
        );
        token
    }

    /// Move the timer armed for `old` over to `new`, keeping its deadline.
    pub fn rename(&mut self, old: &str, new: &str, now: NaiveDateTime) -> Option<u64> {
        let due = self.deadline(old)?;
        self.cancel(old);
        Some(self.arm_until(new, due, now))
    }

    pub fn cancel(&mut self, group: &str) -> bool {
        match self.armed.remove(group) {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.armed.drain() {
            timer.abort();
        }
    }

    pub fn armed_token(&self, group: &str) -> Option<u64> {
        self.armed.get(group).map(|t| t.token)
    }

    pub fn is_armed(&self, group: &str) -> bool {
        self.armed.contains_key(group)
    }

    pub fn deadline(&self, group: &str) -> Option<NaiveDateTime> {
        self.armed.get(group).map(|t| t.due)
    }

    /// Disarm `group` if `token` is the one currently armed for it.
    /// Returns false for stale fires.
    pub fn take_if_current(&mut self, group: &str, token: u64) -> bool {
        if self.armed_token(group) == Some(token) {
            self.armed.remove(group);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
