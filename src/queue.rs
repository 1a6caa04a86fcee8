use crate::registry::GroupRegistry;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not running; interval timers are disarmed.
    Stopped,
    /// Running, but no main group had anything to play. Interval groups may still fire.
    Idle,
    /// An item is dispatched.
    Playing,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Idle => write!(f, "idle"),
            EngineState::Playing => write!(f, "playing"),
        }
    }
}

/// Why the engine stopped at the end of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Repeat is off and the last item finished.
    EndOfQueue,
    /// Repeat is on but no main group is active anymore.
    NoActiveGroups,
    /// Main groups are active but none of their items pass the filter.
    NoMatchingItems,
}

impl StopReason {
    pub fn message(&self) -> &'static str {
        match self {
            StopReason::EndOfQueue => "Playlist finished.",
            StopReason::NoActiveGroups => "No active main groups.",
            StopReason::NoMatchingItems => "No files for the active groups.",
        }
    }
}

/// What the engine should do after the cursor moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Dispatch this item.
    Play(PathBuf),
    /// The engine stopped; the queue is cleared.
    Stopped(StopReason),
    /// Nothing to do (engine not playing).
    Ignored,
}

/// Result of moving the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceOutcome {
    /// Interval groups whose spliced run has fully passed the cursor.
    pub drained: Vec<String>,
    pub step: Step,
    /// The queue was rebuilt and the cursor restarted at 0.
    pub wrapped: bool,
}

impl AdvanceOutcome {
    fn ignored() -> Self {
        AdvanceOutcome {
            drained: Vec::new(),
            step: Step::Ignored,
            wrapped: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Start was requested while already playing.
    AlreadyPlaying,
    /// Nothing to play from main groups; waiting for schedules or interval groups.
    Idle,
    Started(AdvanceOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The group already has unplayed items in the queue.
    AlreadyActive,
    /// The group has no items.
    NoItems,
    /// The queue was empty or not started; it now holds only the group's items.
    Replaced(PathBuf),
    /// Items were spliced right after the cursor.
    Spliced { at: usize, count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishOutcome {
    /// Play the same item again.
    Replay(PathBuf),
    Advanced(AdvanceOutcome),
}

/// How a playback session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The media reached its end.
    EndOfMedia,
    /// The item's duration override ran out.
    DurationElapsed,
}

/// Items of the selected main groups, in registration order.
///
/// An empty `filter` means no restriction; otherwise only active groups
/// that are also in the filter count.
pub fn build_main_queue(
    registry: &GroupRegistry,
    active_main: &BTreeSet<String>,
    filter: &BTreeSet<String>,
) -> Vec<PathBuf> {
    let selection: BTreeSet<String> = if filter.is_empty() {
        active_main.clone()
    } else {
        active_main.intersection(filter).cloned().collect()
    };
    registry.items_matching(&selection)
}

/// The ordered play queue, its cursor, and the set of interval groups
/// with spliced items still ahead of the cursor.
#[derive(Debug, Clone)]
pub struct QueueEngine {
    entries: Vec<PathBuf>,
    cursor: Option<usize>,
    active_intervals: BTreeSet<String>,
    state: EngineState,
    pub repeat: bool,
}

impl Default for QueueEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueEngine {
    pub fn new() -> Self {
        QueueEngine {
            entries: Vec::new(),
            cursor: None,
            active_intervals: BTreeSet::new(),
            state: EngineState::Stopped,
            repeat: true,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cursor position; `None` before the first item is dispatched.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&PathBuf> {
        self.cursor.and_then(|c| self.entries.get(c))
    }

    pub fn active_intervals(&self) -> &BTreeSet<String> {
        &self.active_intervals
    }

    pub fn is_interval_active(&self, group: &str) -> bool {
        self.active_intervals.contains(group)
    }

    /// Rebuild the queue from the active main groups and dispatch the first item.
    pub fn start(
        &mut self,
        registry: &GroupRegistry,
        active_main: &BTreeSet<String>,
        filter: &BTreeSet<String>,
    ) -> StartOutcome {
        if self.state == EngineState::Playing {
            return StartOutcome::AlreadyPlaying;
        }
        self.active_intervals.clear();
        self.cursor = None;
        self.entries = build_main_queue(registry, active_main, filter);
        if self.entries.is_empty() {
            self.state = EngineState::Idle;
            return StartOutcome::Idle;
        }
        self.state = EngineState::Playing;
        StartOutcome::Started(self.advance(registry, active_main, filter))
    }

    /// Move the cursor forward, settle drained interval groups, and apply
    /// the repeat policy at the end of the queue.
    pub fn advance(
        &mut self,
        registry: &GroupRegistry,
        active_main: &BTreeSet<String>,
        filter: &BTreeSet<String>,
    ) -> AdvanceOutcome {
        if self.state != EngineState::Playing {
            return AdvanceOutcome::ignored();
        }
        let next = self.cursor.map_or(0, |c| c + 1);
        self.cursor = Some(next);

        // An entry whose item vanished from the registry counts as a non-member,
        // so a run never stays active without a way to drain.
        let at_cursor = self.entries.get(next).and_then(|p| registry.item(p));
        let drained: Vec<String> = self
            .active_intervals
            .iter()
            .filter(|g| at_cursor.is_none_or(|item| !item.in_group(g)))
            .cloned()
            .collect();
        for group in &drained {
            self.active_intervals.remove(group);
        }

        let mut wrapped = false;
        if next >= self.entries.len() {
            if !self.repeat {
                return self.halt(drained, StopReason::EndOfQueue);
            }
            if active_main.is_empty() {
                return self.halt(drained, StopReason::NoActiveGroups);
            }
            let rebuilt = build_main_queue(registry, active_main, filter);
            if rebuilt.is_empty() {
                return self.halt(drained, StopReason::NoMatchingItems);
            }
            self.entries = rebuilt;
            self.cursor = Some(0);
            wrapped = true;
        }

        let step = match self.current() {
            Some(path) => Step::Play(path.clone()),
            None => Step::Ignored,
        };
        AdvanceOutcome {
            drained,
            step,
            wrapped,
        }
    }

    fn halt(&mut self, drained: Vec<String>, reason: StopReason) -> AdvanceOutcome {
        self.stop();
        AdvanceOutcome {
            drained,
            step: Step::Stopped(reason),
            wrapped: false,
        }
    }

    /// Put an interval group's items into the queue, at most one run at a time.
    pub fn insert_interval_group(&mut self, group: &str, items: Vec<PathBuf>) -> InsertOutcome {
        if self.active_intervals.contains(group) {
            return InsertOutcome::AlreadyActive;
        }
        if items.is_empty() {
            return InsertOutcome::NoItems;
        }
        self.active_intervals.insert(group.to_string());

        match self.cursor {
            Some(c) if !self.entries.is_empty() => {
                let at = (c + 1).min(self.entries.len());
                let count = items.len();
                self.entries.splice(at..at, items);
                InsertOutcome::Spliced { at, count }
            }
            _ => {
                self.entries = items;
                self.cursor = Some(0);
                self.state = EngineState::Playing;
                InsertOutcome::Replaced(self.entries[0].clone())
            }
        }
    }

    /// Carry an in-flight run over to a renamed group.
    pub fn rename_interval(&mut self, old: &str, new: &str) -> bool {
        if self.active_intervals.remove(old) {
            self.active_intervals.insert(new.to_string());
            true
        } else {
            false
        }
    }

    /// Add items to the tail without touching what is already queued.
    pub fn append(&mut self, items: Vec<PathBuf>) -> usize {
        let count = items.len();
        self.entries.extend(items);
        count
    }

    /// Resolve per-item looping for the current item, then advance.
    ///
    /// `frames_shown == 0` is a decode failure: the loop counter is reset and
    /// the queue moves on without spending loop budget. A run cut short by the
    /// duration override also moves on directly.
    pub fn on_item_finished(
        &mut self,
        registry: &mut GroupRegistry,
        frames_shown: u64,
        reason: FinishReason,
        active_main: &BTreeSet<String>,
        filter: &BTreeSet<String>,
    ) -> FinishOutcome {
        if let Some(path) = self.current().cloned() {
            if let Some(item) = registry.item_mut(&path) {
                let replay = if frames_shown == 0 || reason == FinishReason::DurationElapsed {
                    item.reset_loops();
                    false
                } else {
                    item.consume_loop()
                };
                if replay {
                    return FinishOutcome::Replay(path);
                }
            }
        }
        FinishOutcome::Advanced(self.advance(registry, active_main, filter))
    }

    /// Operator skip: forget the current item's loop progress and advance.
    pub fn manual_advance(
        &mut self,
        registry: &mut GroupRegistry,
        active_main: &BTreeSet<String>,
        filter: &BTreeSet<String>,
    ) -> AdvanceOutcome {
        if let Some(item) = self.current().cloned().and_then(|p| registry.item_mut(&p)) {
            item.reset_loops();
        }
        self.advance(registry, active_main, filter)
    }

    /// Shuffle the queue, keeping the item under the cursor in its slot.
    pub fn shuffle(&mut self) -> bool {
        self.shuffle_with(&mut fastrand::Rng::new())
    }

    pub fn shuffle_with(&mut self, rng: &mut fastrand::Rng) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        match self.cursor {
            Some(k) if k < self.entries.len() => {
                let current = self.entries.remove(k);
                rng.shuffle(&mut self.entries);
                self.entries.insert(k, current);
            }
            _ => rng.shuffle(&mut self.entries),
        }
        true
    }

    /// Drop the queue and every in-flight interval run.
    pub fn stop(&mut self) {
        self.entries.clear();
        self.cursor = None;
        self.active_intervals.clear();
        self.state = EngineState::Stopped;
    }
}
