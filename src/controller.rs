//! Controller: owns all engine state and applies every input to it.
//!
//! Operator commands, timer fires, driver events, the reconcile tick and the
//! interval sweep all end up as method calls here. Nothing in this type is
//! shared: the runtime moves it into a single task so no two mutations ever
//! run at the same time. Every method takes the wall-clock `now` explicitly.

use crate::driver::{PlayRequest, PlaybackDriver, PlaybackEvent};
use crate::error::{EngineError, Result};
use crate::media::{self, DEFAULT_IMAGE_DURATION, MediaKind};
use crate::play_log::PlayLog;
use crate::queue::{
    AdvanceOutcome, EngineState, FinishOutcome, InsertOutcome, QueueEngine, StartOutcome, Step,
};
use crate::registry::GroupRegistry;
use crate::runtime::Command;
use crate::schedule::{GroupKind, Schedule};
use crate::store::{Snapshot, StateStore};
use crate::timers::TimerSet;
use chrono::{NaiveDateTime, TimeDelta};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

pub struct Controller {
    registry: GroupRegistry,
    queue: QueueEngine,
    timers: TimerSet,
    last_run: BTreeMap<String, NaiveDateTime>,
    previous_active: BTreeSet<String>,
    filter: BTreeSet<String>,
    last_folder: Option<PathBuf>,
    /// Tag of the most recent dispatch; driver events carrying another tag are stale.
    generation: u64,
    message: Option<String>,
    image_duration: Duration,
    target_size: (u32, u32),
    driver: Box<dyn PlaybackDriver>,
    store: Option<Box<dyn StateStore>>,
    play_log: Option<PlayLog>,
}

impl Controller {
    pub fn new(driver: Box<dyn PlaybackDriver>) -> Self {
        Self::from_snapshot(Snapshot::default(), driver)
    }

    /// Build from a snapshot as-is. See [`Snapshot::settle`] for load-time fixups.
    pub fn from_snapshot(snapshot: Snapshot, driver: Box<dyn PlaybackDriver>) -> Self {
        let registry = snapshot.registry();
        let mut queue = QueueEngine::new();
        queue.repeat = snapshot.repeat;
        Controller {
            registry,
            queue,
            timers: TimerSet::detached(),
            last_run: snapshot.last_run,
            previous_active: BTreeSet::new(),
            filter: snapshot.filter,
            last_folder: snapshot.last_folder,
            generation: 0,
            message: None,
            image_duration: DEFAULT_IMAGE_DURATION,
            target_size: (864, 432),
            driver,
            store: None,
            play_log: None,
        }
    }

    /// Load state from `store`, settle it against `now`, and keep the store
    /// for saving after every change.
    pub fn load(
        store: Box<dyn StateStore>,
        driver: Box<dyn PlaybackDriver>,
        now: NaiveDateTime,
    ) -> Result<Self> {
        let mut snapshot = store.load_state()?;
        snapshot.settle(now);
        info!(
            groups = snapshot.groups.len(),
            items = snapshot.items.len(),
            "state loaded"
        );
        let mut controller = Self::from_snapshot(snapshot, driver);
        controller.store = Some(store);
        Ok(controller)
    }

    pub fn with_play_log(mut self, log: PlayLog) -> Self {
        self.play_log = Some(log);
        self
    }

    pub fn with_target_size(mut self, size: (u32, u32)) -> Self {
        self.target_size = size;
        self
    }

    pub fn with_image_duration(mut self, duration: Duration) -> Self {
        self.image_duration = duration;
        self
    }

    /// Route interval timer fires to the runtime's command channel.
    pub fn attach_timers(&mut self, tx: UnboundedSender<Command>) {
        self.timers.attach(tx);
    }

    // --- Accessors ---

    pub fn registry(&self) -> &GroupRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &QueueEngine {
        &self.queue
    }

    pub fn state(&self) -> EngineState {
        self.queue.state()
    }

    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    pub fn last_run(&self) -> &BTreeMap<String, NaiveDateTime> {
        &self.last_run
    }

    pub fn filter(&self) -> &BTreeSet<String> {
        &self.filter
    }

    pub fn repeat(&self) -> bool {
        self.queue.repeat
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            groups: self.registry.groups().to_vec(),
            items: self.registry.items().to_vec(),
            last_run: self.last_run.clone(),
            filter: self.filter.clone(),
            repeat: self.queue.repeat,
            last_folder: self.last_folder.clone(),
        }
    }

    /// Save if a store is attached. Failures are logged, never propagated.
    pub fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_state(&self.snapshot()) {
                warn!("failed to save state: {}", e);
            }
        }
    }

    fn set_message(&mut self, text: impl Into<String>) {
        self.message = Some(text.into());
    }

    /// Show a one-off message in the status text.
    pub fn report(&mut self, text: impl Into<String>) {
        self.set_message(text);
    }

    fn active_main(&self, now: NaiveDateTime) -> BTreeSet<String> {
        self.registry.active_of_kind(now, GroupKind::Main)
    }

    fn interval_minutes(&self, group: &str) -> Option<u32> {
        self.registry.schedule(group).and_then(Schedule::run_interval)
    }

    // --- Playback control ---

    /// Build the main queue and begin playing. Ignored while already playing.
    pub fn start(&mut self, now: NaiveDateTime) {
        if self.queue.state() == EngineState::Playing {
            info!("start ignored: already playing");
            return;
        }
        info!("starting playback");

        self.timers.cancel_all();
        for group in self.registry.active_of_kind(now, GroupKind::Interval) {
            if let Some(minutes) = self.interval_minutes(&group) {
                self.timers.arm(&group, minutes, now);
                self.last_run.insert(group, now);
            }
        }

        let active = self.active_main(now);
        match self.queue.start(&self.registry, &active, &self.filter) {
            StartOutcome::AlreadyPlaying => {}
            StartOutcome::Idle => {
                let text = if active.is_empty() {
                    "No active main groups, waiting for interval groups."
                } else {
                    "No files for the selected groups."
                };
                info!("{}", text);
                self.set_message(text);
            }
            StartOutcome::Started(outcome) => self.apply_advance(outcome, now),
        }
        self.persist();
    }

    /// Stop playback and forget the queue and all interval bookkeeping.
    pub fn stop(&mut self, now: NaiveDateTime) {
        info!("stopping playback");
        self.halt("Playback stopped.", now);
        self.persist();
    }

    fn halt(&mut self, text: &str, now: NaiveDateTime) {
        self.driver.stop_item();
        if let Some(log) = &mut self.play_log {
            log.finish(now);
        }
        self.timers.cancel_all();
        self.last_run.clear();
        self.queue.stop();
        self.set_message(text);
    }

    /// Operator skip to the next item.
    pub fn manual_advance(&mut self, now: NaiveDateTime) {
        if self.queue.state() != EngineState::Playing {
            self.set_message("Nothing is playing.");
            return;
        }
        let active = self.active_main(now);
        let outcome = self
            .queue
            .manual_advance(&mut self.registry, &active, &self.filter);
        self.apply_advance(outcome, now);
    }

    pub fn shuffle(&mut self) {
        if self.queue.shuffle() {
            info!(len = self.queue.len(), "queue shuffled");
            self.set_message("Playlist shuffled.");
        } else {
            self.set_message("Playlist is empty, nothing to shuffle.");
        }
    }

    pub fn set_repeat(&mut self, on: bool) {
        self.queue.repeat = on;
        self.set_message(if on { "Repeat on." } else { "Repeat off." });
        self.persist();
    }

    /// Restrict the main queue to `groups` (empty = no restriction).
    /// Takes effect on the next rebuild or append.
    pub fn set_filter(&mut self, groups: BTreeSet<String>) {
        info!(?groups, "group filter changed");
        self.filter = groups;
        self.set_message(if self.filter.is_empty() {
            "Filter cleared.".to_string()
        } else {
            format!(
                "Filter: {}",
                self.filter.iter().cloned().collect::<Vec<_>>().join(", ")
            )
        });
        self.persist();
    }

    /// Stop the current session without touching saved state.
    pub fn shutdown(&mut self, now: NaiveDateTime) {
        self.driver.stop_item();
        if let Some(log) = &mut self.play_log {
            log.finish(now);
        }
        self.timers.cancel_all();
        self.persist();
    }

    fn apply_advance(&mut self, outcome: AdvanceOutcome, now: NaiveDateTime) {
        for group in &outcome.drained {
            info!(group = %group, "interval run finished");
            if let Some(minutes) = self.interval_minutes(group) {
                self.timers.arm(group, minutes, now);
                self.last_run.insert(group.clone(), now);
            }
        }
        if !outcome.drained.is_empty() {
            self.persist();
        }
        if outcome.wrapped {
            debug!(len = self.queue.len(), "queue rebuilt for repeat");
        }
        match outcome.step {
            Step::Play(path) => self.dispatch(&path, now),
            Step::Stopped(reason) => {
                info!(?reason, "playback stopped");
                self.halt(reason.message(), now);
                self.persist();
            }
            Step::Ignored => {}
        }
    }

    fn dispatch(&mut self, path: &Path, now: NaiveDateTime) {
        self.driver.stop_item();
        self.generation += 1;

        let item = self.registry.item(path);
        let request = PlayRequest {
            generation: self.generation,
            path: path.to_path_buf(),
            kind: MediaKind::from_path(path),
            duration: item.and_then(|i| i.duration),
            target_size: self.target_size,
        };
        if let Some(log) = &mut self.play_log {
            let groups = item.map(|i| i.groups.clone()).unwrap_or_default();
            log.begin(path, &groups, now);
        }

        info!(
            path = %path.display(),
            generation = self.generation,
            position = self.queue.cursor().map_or(0, |c| c + 1),
            len = self.queue.len(),
            "dispatching"
        );
        self.driver.start_item(request);
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        self.set_message(format!("Playing: {}", name));
    }

    /// Apply an event from the driver. Events from superseded sessions are dropped.
    pub fn on_playback_event(&mut self, event: PlaybackEvent, now: NaiveDateTime) {
        if event.generation() != self.generation {
            debug!(
                event_generation = event.generation(),
                current = self.generation,
                "stale playback event dropped"
            );
            return;
        }
        match event {
            PlaybackEvent::FrameReady { .. } => debug!("first frame shown"),
            PlaybackEvent::Finished {
                frames_shown,
                reason,
                ..
            } => {
                if frames_shown == 0 {
                    warn!(
                        path = ?self.queue.current(),
                        "media could not be decoded, skipping"
                    );
                }
                if let Some(log) = &mut self.play_log {
                    log.finish(now);
                }
                let active = self.active_main(now);
                match self.queue.on_item_finished(
                    &mut self.registry,
                    frames_shown,
                    reason,
                    &active,
                    &self.filter,
                ) {
                    FinishOutcome::Replay(path) => self.dispatch(&path, now),
                    FinishOutcome::Advanced(outcome) => self.apply_advance(outcome, now),
                }
            }
        }
    }

    // --- Interval groups ---

    /// A timer fired. Only the currently armed token for the group counts.
    pub fn on_timer_fired(&mut self, group: &str, token: u64, now: NaiveDateTime) {
        if !self.timers.take_if_current(group, token) {
            debug!(group, token, "stale timer fire dropped");
            return;
        }
        self.trigger_interval_group(group, now);
    }

    /// Splice the group's items after the cursor, or play them right away
    /// when nothing is queued. Returns true if anything was inserted.
    pub fn trigger_interval_group(&mut self, group: &str, now: NaiveDateTime) -> bool {
        if self.queue.state() == EngineState::Stopped {
            debug!(group, "interval trigger ignored: stopped");
            return false;
        }
        if self.queue.is_interval_active(group) {
            debug!(group, "interval trigger ignored: group already playing");
            return false;
        }
        self.timers.cancel(group);

        let items = self.registry.items_in(group);
        match self.queue.insert_interval_group(group, items) {
            InsertOutcome::Replaced(path) => {
                info!(group, "interval group started on empty queue");
                self.dispatch(&path, now);
                true
            }
            InsertOutcome::Spliced { at, count } => {
                info!(group, at, count, "interval group spliced");
                true
            }
            InsertOutcome::NoItems => {
                debug!(group, "interval group has no files");
                false
            }
            InsertOutcome::AlreadyActive => false,
        }
    }

    // --- Scheduling ---

    /// One scheduler tick: react to groups whose window just opened.
    pub fn reconcile(&mut self, now: NaiveDateTime) {
        let active = self.registry.active_groups(now);
        let newly: Vec<String> = active
            .difference(&self.previous_active)
            .cloned()
            .collect();

        let mut newly_main = Vec::new();
        let mut newly_interval = Vec::new();
        for group in newly {
            match self.registry.kind_of(&group) {
                Some(GroupKind::Main) => newly_main.push(group),
                Some(GroupKind::Interval) => newly_interval.push(group),
                None => {}
            }
        }

        if !newly_main.is_empty() {
            match self.queue.state() {
                EngineState::Stopped | EngineState::Idle => {
                    info!(groups = ?newly_main, "main groups became active");
                    self.start(now);
                }
                EngineState::Playing => {
                    for group in &newly_main {
                        if !self.filter.is_empty() && !self.filter.contains(group) {
                            continue;
                        }
                        let added = self.queue.append(self.registry.items_in(group));
                        info!(group = %group, added, "main group appended");
                    }
                }
            }
        }

        let mut stamped = false;
        if self.queue.state() != EngineState::Stopped {
            for group in newly_interval {
                if self.timers.is_armed(&group) || self.queue.is_interval_active(&group) {
                    continue;
                }
                if let Some(minutes) = self.interval_minutes(&group) {
                    info!(group = %group, minutes, "interval group became active");
                    self.timers.arm(&group, minutes, now);
                    self.last_run.insert(group, now);
                    stamped = true;
                }
            }
        }

        self.previous_active = active;
        if stamped {
            self.persist();
        }
    }

    /// Catch up on interval groups whose timer should have fired but did not.
    /// Inactive interval groups lose their last-run stamp and timer.
    pub fn sweep_intervals(&mut self, now: NaiveDateTime) {
        if self.queue.state() == EngineState::Stopped {
            return;
        }
        let intervals: Vec<(String, u32, bool)> = self
            .registry
            .groups()
            .iter()
            .filter_map(|g| {
                let schedule = g.schedule.as_ref()?;
                let minutes = schedule.run_interval()?;
                Some((g.name.clone(), minutes, schedule.is_active_at(now)))
            })
            .collect();

        let mut changed = false;
        for (group, minutes, active) in intervals {
            if !active {
                changed |= self.last_run.remove(&group).is_some();
                self.timers.cancel(&group);
                continue;
            }
            if self.queue.is_interval_active(&group) {
                continue;
            }
            let due = match self.last_run.get(&group) {
                Some(at) => now - *at >= TimeDelta::minutes(i64::from(minutes)),
                None => true,
            };
            if due {
                info!(group = %group, "interval group overdue, triggering");
                self.last_run.insert(group.clone(), now);
                self.trigger_interval_group(&group, now);
                changed = true;
            }
        }
        if changed {
            self.persist();
        }
    }

    /// Multi-line status: clock, engine state, active groups, interval countdowns.
    pub fn status_text(&self, now: NaiveDateTime) -> String {
        let mut lines = vec![now.format("%H:%M:%S %A").to_string()];

        let state = match (self.queue.state(), self.queue.current()) {
            (EngineState::Playing, Some(path)) => format!(
                "State: playing {}/{} {}",
                self.queue.cursor().map_or(0, |c| c + 1),
                self.queue.len(),
                path.file_name()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default()
            ),
            (state, _) => format!("State: {}", state),
        };
        lines.push(state);

        let mut active = self.registry.active_groups(now);
        if !self.filter.is_empty() {
            active = active.intersection(&self.filter).cloned().collect();
        }
        if active.is_empty() {
            lines.push("No active groups".to_string());
        } else {
            lines.push(format!(
                "Active groups: {}",
                active.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }

        for group in self.registry.groups() {
            let Some(minutes) = group.schedule.as_ref().and_then(Schedule::run_interval) else {
                continue;
            };
            let line = match self.last_run.get(&group.name) {
                Some(at) => {
                    let next = *at + TimeDelta::minutes(i64::from(minutes));
                    let left = (next - now).num_seconds().max(0);
                    format!("{}: in {} min {} s", group.name, left / 60, left % 60)
                }
                None => format!("{}: waiting", group.name),
            };
            lines.push(line);
        }

        if let Some(message) = &self.message {
            lines.push(message.clone());
        }
        lines.join("\n")
    }

    // --- Management ---

    pub fn add_group(&mut self, name: &str) -> Result<()> {
        self.registry.add_group(name)?;
        info!(group = name.trim(), "group created");
        self.set_message(format!("Group \"{}\" created.", name.trim()));
        self.persist();
        Ok(())
    }

    /// Delete a group. Items already queued stay queued.
    pub fn delete_group(&mut self, name: &str) -> Result<()> {
        self.registry.delete_group(name)?;
        self.timers.cancel(name);
        self.last_run.remove(name);
        self.filter.remove(name);
        self.previous_active.remove(name);
        info!(group = name, "group deleted");
        self.set_message(format!("Group \"{}\" deleted.", name));
        self.persist();
        Ok(())
    }

    /// Rename a group. A queued run, an armed timer and the last-run stamp
    /// follow the group to its new name.
    pub fn rename_group(&mut self, old: &str, new: &str, now: NaiveDateTime) -> Result<()> {
        self.registry.rename_group(old, new)?;
        let new = new.trim();
        if old == new {
            return Ok(());
        }
        self.queue.rename_interval(old, new);
        self.timers.rename(old, new, now);
        if let Some(at) = self.last_run.remove(old) {
            self.last_run.insert(new.to_string(), at);
        }
        if self.filter.remove(old) {
            self.filter.insert(new.to_string());
        }
        if self.previous_active.remove(old) {
            self.previous_active.insert(new.to_string());
        }
        info!(old, new, "group renamed");
        self.set_message(format!("Group \"{}\" renamed to \"{}\".", old, new));
        self.persist();
        Ok(())
    }

    /// Replace a group's schedule. Any pending interval timer is reset.
    pub fn edit_schedule(
        &mut self,
        name: &str,
        schedule: Option<Schedule>,
        now: NaiveDateTime,
    ) -> Result<()> {
        self.registry.set_schedule(name, schedule)?;
        self.timers.cancel(name);
        self.last_run.remove(name);

        let runs = self.interval_minutes(name).filter(|_| {
            self.registry
                .schedule(name)
                .is_some_and(|s| s.is_active_at(now))
        });
        if let Some(minutes) = runs {
            if self.queue.state() != EngineState::Stopped && !self.queue.is_interval_active(name) {
                self.timers.arm(name, minutes, now);
                self.last_run.insert(name.to_string(), now);
            }
        }
        info!(group = name, "schedule updated");
        self.set_message(format!("Schedule for \"{}\" saved.", name));
        self.persist();
        Ok(())
    }

    fn register(&mut self, path: &Path) -> bool {
        if !self.registry.add_item(path.to_path_buf()) {
            return false;
        }
        if MediaKind::from_path(path) == Some(MediaKind::Image) {
            if let Some(item) = self.registry.item_mut(path) {
                item.duration = Some(self.image_duration);
            }
        }
        true
    }

    /// Register a media file. Returns false if it was already known.
    pub fn add_item(&mut self, path: &Path) -> bool {
        let added = self.register(path);
        if added {
            info!(path = %path.display(), "item added");
            self.persist();
        }
        added
    }

    /// Put a file into a group, registering it first if needed.
    pub fn assign_group(&mut self, path: &Path, group: &str) -> Result<bool> {
        if self.registry.group(group).is_none() {
            return Err(EngineError::UnknownGroup(group.to_string()));
        }
        self.register(path);
        let added = self.registry.assign(path, group)?;
        self.persist();
        Ok(added)
    }

    pub fn remove_from_group(&mut self, path: &Path, group: &str) -> Result<bool> {
        let removed = self.registry.unassign(path, group)?;
        self.persist();
        Ok(removed)
    }

    /// Set an item's duration override and loop count (0 = forever).
    pub fn set_item_playback(
        &mut self,
        path: &Path,
        duration: Option<Duration>,
        loop_count: u32,
    ) -> Result<()> {
        self.registry.set_playback(path, duration, loop_count)?;
        self.persist();
        Ok(())
    }

    /// Register every supported file directly inside `dir`, optionally adding
    /// them to `group`. Returns the number of newly registered files.
    pub fn scan_folder(&mut self, dir: &Path, group: Option<&str>) -> Result<usize> {
        if let Some(g) = group {
            if self.registry.group(g).is_none() {
                return Err(EngineError::UnknownGroup(g.to_string()));
            }
        }
        let files = media::scan_folder(dir)?;
        let mut added = 0;
        for file in &files {
            if self.register(file) {
                added += 1;
            }
            if let Some(g) = group {
                self.registry.assign(file, g)?;
            }
        }
        self.last_folder = Some(dir.to_path_buf());
        info!(dir = %dir.display(), found = files.len(), added, "folder scanned");
        self.set_message(format!("Added {} file(s) from {}", added, dir.display()));
        self.persist();
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FinishReason;
    use crate::store::JsonStateStore;
    use chrono::{NaiveDate, NaiveTime};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        started: Arc<Mutex<Vec<PlayRequest>>>,
        stops: Arc<Mutex<usize>>,
    }

    impl PlaybackDriver for Recorder {
        fn start_item(&mut self, request: PlayRequest) {
            self.started.lock().unwrap().push(request);
        }

        fn stop_item(&mut self) {
            *self.stops.lock().unwrap() += 1;
        }
    }

    impl Recorder {
        fn names(&self) -> Vec<String> {
            self.started
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.path.display().to_string())
                .collect()
        }
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn all_days() -> Vec<u8> {
        (0..7).collect()
    }

    /// Morning 09:00-12:00 (m1, m2), Ads every 15 min 09:00-17:00 (a1).
    fn controller() -> (Controller, Recorder) {
        let rec = Recorder::default();
        let mut c = Controller::new(Box::new(rec.clone()));
        c.add_group("Morning").unwrap();
        c.add_group("Ads").unwrap();
        c.edit_schedule(
            "Morning",
            Some(Schedule::window(t(9, 0), t(12, 0), all_days())),
            at(8, 0, 0),
        )
        .unwrap();
        c.edit_schedule(
            "Ads",
            Some(Schedule::interval(15, t(9, 0), t(17, 0), all_days())),
            at(8, 0, 0),
        )
        .unwrap();
        c.assign_group(Path::new("m1.mp4"), "Morning").unwrap();
        c.assign_group(Path::new("m2.mp4"), "Morning").unwrap();
        c.assign_group(Path::new("a1.mp4"), "Ads").unwrap();
        (c, rec)
    }

    fn finish(c: &mut Controller, now: NaiveDateTime) {
        let generation = c.generation();
        c.on_playback_event(
            PlaybackEvent::Finished {
                generation,
                frames_shown: 100,
                reason: FinishReason::EndOfMedia,
            },
            now,
        );
    }

    #[test]
    fn reconcile_starts_when_main_group_opens() {
        let (mut c, rec) = controller();
        c.reconcile(at(8, 59, 59));
        assert_eq!(c.state(), EngineState::Stopped);
        c.reconcile(at(9, 0, 0));
        assert_eq!(c.state(), EngineState::Playing);
        assert_eq!(rec.names(), vec!["m1.mp4"]);
        assert!(c.timers().is_armed("Ads"));
        assert_eq!(c.last_run().get("Ads"), Some(&at(9, 0, 0)));
    }

    #[test]
    fn reconcile_is_quiet_on_steady_state() {
        let (mut c, rec) = controller();
        c.reconcile(at(9, 0, 0));
        let token = c.timers().armed_token("Ads");
        c.reconcile(at(9, 0, 1));
        c.reconcile(at(9, 0, 2));
        assert_eq!(rec.names().len(), 1);
        assert_eq!(c.timers().armed_token("Ads"), token);
    }

    #[test]
    fn start_while_playing_is_ignored() {
        let (mut c, rec) = controller();
        c.start(at(9, 30, 0));
        let generation = c.generation();
        c.start(at(9, 30, 5));
        assert_eq!(c.generation(), generation);
        assert_eq!(rec.names().len(), 1);
    }

    #[test]
    fn start_without_main_groups_is_idle() {
        let (mut c, rec) = controller();
        c.start(at(13, 0, 0));
        assert_eq!(c.state(), EngineState::Idle);
        assert!(rec.names().is_empty());
        assert!(c.timers().is_armed("Ads"));
    }

    #[test]
    fn interval_trigger_in_idle_plays_group() {
        let (mut c, rec) = controller();
        c.start(at(13, 0, 0));
        let token = c.timers().armed_token("Ads").unwrap();
        c.on_timer_fired("Ads", token, at(13, 15, 0));
        assert_eq!(c.state(), EngineState::Playing);
        assert_eq!(rec.names(), vec!["a1.mp4"]);
        assert!(!c.timers().is_armed("Ads"));
    }

    #[test]
    fn stale_timer_fire_is_ignored() {
        let (mut c, _rec) = controller();
        c.start(at(9, 30, 0));
        let token = c.timers().armed_token("Ads").unwrap();
        c.on_timer_fired("Ads", token + 100, at(9, 45, 0));
        assert!(!c.queue().is_interval_active("Ads"));
        assert!(c.timers().is_armed("Ads"));
    }

    #[test]
    fn trigger_when_stopped_is_ignored() {
        let (mut c, _rec) = controller();
        assert!(!c.trigger_interval_group("Ads", at(9, 30, 0)));
        assert!(c.queue().is_empty());
    }

    #[test]
    fn stale_generation_is_dropped() {
        let (mut c, rec) = controller();
        c.start(at(9, 30, 0));
        let old = c.generation();
        c.manual_advance(at(9, 30, 2));
        assert_eq!(rec.names(), vec!["m1.mp4", "m2.mp4"]);
        c.on_playback_event(
            PlaybackEvent::Finished {
                generation: old,
                frames_shown: 10,
                reason: FinishReason::EndOfMedia,
            },
            at(9, 30, 3),
        );
        assert_eq!(c.queue().cursor(), Some(1));
        assert_eq!(rec.names().len(), 2);
    }

    #[test]
    fn drained_group_is_rearmed_full_interval() {
        let (mut c, _rec) = controller();
        c.start(at(9, 0, 0));
        let token = c.timers().armed_token("Ads").unwrap();
        c.on_timer_fired("Ads", token, at(9, 15, 0));
        finish(&mut c, at(9, 15, 10)); // m1 -> a1
        assert!(c.queue().is_interval_active("Ads"));
        assert!(!c.timers().is_armed("Ads"));
        finish(&mut c, at(9, 15, 20)); // a1 -> m2
        assert!(!c.queue().is_interval_active("Ads"));
        assert_eq!(c.last_run().get("Ads"), Some(&at(9, 15, 20)));
        assert_eq!(c.timers().deadline("Ads"), Some(at(9, 30, 20)));
    }

    #[test]
    fn stop_clears_everything() {
        let (mut c, rec) = controller();
        c.start(at(9, 0, 0));
        c.stop(at(9, 1, 0));
        assert_eq!(c.state(), EngineState::Stopped);
        assert!(c.queue().is_empty());
        assert!(c.timers().is_empty());
        assert!(c.last_run().is_empty());
        assert!(*rec.stops.lock().unwrap() >= 1);
    }

    #[test]
    fn sweep_triggers_overdue_group() {
        let (mut c, _rec) = controller();
        c.start(at(9, 0, 0));
        c.sweep_intervals(at(9, 14, 0));
        assert!(!c.queue().is_interval_active("Ads"));
        c.sweep_intervals(at(9, 15, 0));
        assert!(c.queue().is_interval_active("Ads"));
        assert_eq!(c.last_run().get("Ads"), Some(&at(9, 15, 0)));
    }

    #[test]
    fn sweep_forgets_inactive_group() {
        let (mut c, _rec) = controller();
        c.start(at(9, 0, 0));
        c.sweep_intervals(at(17, 30, 0));
        assert!(c.last_run().get("Ads").is_none());
        assert!(!c.timers().is_armed("Ads"));
    }

    #[test]
    fn sweep_does_nothing_when_stopped() {
        let (mut c, _rec) = controller();
        c.sweep_intervals(at(10, 0, 0));
        assert!(c.queue().is_empty());
        assert!(c.last_run().is_empty());
    }

    #[test]
    fn status_shows_countdown_and_groups() {
        let (mut c, _rec) = controller();
        c.start(at(9, 0, 0));
        let text = c.status_text(at(9, 3, 30));
        assert!(text.starts_with("09:03:30 Thursday"));
        assert!(text.contains("State: playing 1/2 m1.mp4"));
        assert!(text.contains("Active groups: Ads, Morning"));
        assert!(text.contains("Ads: in 11 min 30 s"));
    }

    #[test]
    fn status_waiting_without_last_run() {
        let (c, _rec) = controller();
        let text = c.status_text(at(13, 0, 0));
        assert!(text.contains("Ads: waiting"));
        assert!(text.contains("State: stopped"));
    }

    #[test]
    fn status_respects_filter() {
        let (mut c, _rec) = controller();
        c.set_filter(["Morning".to_string()].into_iter().collect());
        let text = c.status_text(at(9, 0, 0));
        assert!(text.contains("Active groups: Morning"));
        assert!(!text.contains("Active groups: Ads"));
    }

    #[test]
    fn rename_carries_bookkeeping() {
        let (mut c, _rec) = controller();
        c.start(at(9, 0, 0));
        c.set_filter(["Ads".to_string()].into_iter().collect());
        c.rename_group("Ads", "Promo", at(9, 1, 0)).unwrap();
        assert_eq!(c.last_run().get("Promo"), Some(&at(9, 0, 0)));
        assert!(c.filter().contains("Promo"));
        assert!(!c.timers().is_armed("Ads"));
        assert_eq!(c.timers().deadline("Promo"), Some(at(9, 15, 0)));
        assert!(c.registry().item(Path::new("a1.mp4")).unwrap().in_group("Promo"));
    }

    #[test]
    fn rename_during_run_does_not_splice_twice() {
        let (mut c, _rec) = controller();
        c.reconcile(at(9, 0, 0));
        let token = c.timers().armed_token("Ads").unwrap();
        c.on_timer_fired("Ads", token, at(9, 15, 0));
        c.rename_group("Ads", "Promo", at(9, 15, 30)).unwrap();
        c.sweep_intervals(at(9, 16, 0));
        c.reconcile(at(9, 16, 0));

        let spliced = c
            .queue()
            .entries()
            .iter()
            .filter(|p| p.as_path() == Path::new("a1.mp4"))
            .count();
        assert_eq!(spliced, 1);
        assert!(c.queue().is_interval_active("Promo"));
        assert!(!c.queue().is_interval_active("Ads"));

        finish(&mut c, at(9, 16, 10)); // m1 -> a1
        finish(&mut c, at(9, 16, 20)); // a1 -> m2
        assert_eq!(c.timers().deadline("Promo"), Some(at(9, 31, 20)));
    }

    #[test]
    fn engine_bookkeeping_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(&dir.path().join("state.json"));
        let path = store.path().to_path_buf();
        let (c, _rec) = controller();
        let mut c = Controller::from_snapshot(c.snapshot(), Box::new(Recorder::default()));
        c.store = Some(Box::new(store));
        let saved_run = |p: &Path| JsonStateStore::new(p).load_state().unwrap().last_run;

        c.start(at(9, 0, 0));
        let token = c.timers().armed_token("Ads").unwrap();
        c.on_timer_fired("Ads", token, at(9, 15, 0));
        finish(&mut c, at(9, 16, 10)); // m1 -> a1
        finish(&mut c, at(9, 16, 20)); // a1 -> m2, run drained
        assert_eq!(saved_run(&path).get("Ads"), Some(&at(9, 16, 20)));

        // Overdue catch-up stamps are saved too.
        c.sweep_intervals(at(9, 40, 0));
        assert_eq!(saved_run(&path).get("Ads"), Some(&at(9, 40, 0)));

        // Leaving the window drops the stamp on disk.
        c.sweep_intervals(at(17, 30, 0));
        assert!(saved_run(&path).get("Ads").is_none());
    }

    #[test]
    fn delete_group_keeps_queue() {
        let (mut c, _rec) = controller();
        c.start(at(9, 0, 0));
        c.delete_group("Morning").unwrap();
        assert_eq!(c.queue().len(), 2);
        assert!(matches!(
            c.delete_group("Morning"),
            Err(EngineError::UnknownGroup(_))
        ));
    }

    #[test]
    fn edit_schedule_rearms_interval() {
        let (mut c, _rec) = controller();
        c.start(at(9, 0, 0));
        c.edit_schedule(
            "Ads",
            Some(Schedule::interval(5, t(9, 0), t(17, 0), all_days())),
            at(9, 2, 0),
        )
        .unwrap();
        assert_eq!(c.timers().deadline("Ads"), Some(at(9, 7, 0)));
        assert_eq!(c.last_run().get("Ads"), Some(&at(9, 2, 0)));
    }

    #[test]
    fn assign_unknown_group_fails() {
        let (mut c, _rec) = controller();
        let err = c.assign_group(Path::new("x.mp4"), "Nope").unwrap_err();
        assert!(matches!(err, EngineError::UnknownGroup(_)));
        assert!(c.registry().item(Path::new("x.mp4")).is_none());
    }

    #[test]
    fn added_images_get_configured_duration() {
        let mut c = Controller::new(Box::new(Recorder::default()))
            .with_image_duration(Duration::from_secs(8));
        assert!(c.add_item(Path::new("poster.jpg")));
        assert!(!c.add_item(Path::new("poster.jpg")));
        let item = c.registry().item(Path::new("poster.jpg")).unwrap();
        assert_eq!(item.duration, Some(Duration::from_secs(8)));
    }

    #[test]
    fn scan_folder_assigns_group() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.mp4", "b.png", "c.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let (mut c, _rec) = controller();
        let added = c.scan_folder(dir.path(), Some("Morning")).unwrap();
        assert_eq!(added, 2);
        assert_eq!(c.registry().items_in("Morning").len(), 4);
        assert_eq!(c.snapshot().last_folder, Some(dir.path().to_path_buf()));
    }
}
