use crate::error::{EngineError, Result};
use crate::media::MediaItem;
use crate::schedule::{GroupKind, Schedule};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A named group. Groups without a schedule take no part in scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub schedule: Option<Schedule>,
}

impl Group {
    pub fn new(name: String) -> Self {
        Group {
            name,
            schedule: None,
        }
    }

    pub fn kind(&self) -> Option<GroupKind> {
        self.schedule.as_ref().map(Schedule::kind)
    }
}

/// Groups, their schedules, and the registered media items.
///
/// Items keep their registration order; that order is the order every
/// queue is built in.
#[derive(Debug, Clone, Default)]
pub struct GroupRegistry {
    groups: Vec<Group>,
    items: Vec<MediaItem>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(groups: Vec<Group>, items: Vec<MediaItem>) -> Self {
        GroupRegistry { groups, items }
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn schedule(&self, name: &str) -> Option<&Schedule> {
        self.group(name).and_then(|g| g.schedule.as_ref())
    }

    pub fn kind_of(&self, name: &str) -> Option<GroupKind> {
        self.group(name).and_then(Group::kind)
    }

    /// Create an unscheduled group.
    pub fn add_group(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidName(name.to_string()));
        }
        if self.group(name).is_some() {
            return Err(EngineError::DuplicateGroup(name.to_string()));
        }
        self.groups.push(Group::new(name.to_string()));
        Ok(())
    }

    /// Delete a group and drop it from every item's memberships.
    pub fn delete_group(&mut self, name: &str) -> Result<Group> {
        let pos = self
            .groups
            .iter()
            .position(|g| g.name == name)
            .ok_or_else(|| EngineError::UnknownGroup(name.to_string()))?;
        for item in &mut self.items {
            item.groups.remove(name);
        }
        Ok(self.groups.remove(pos))
    }

    /// Rename a group, carrying its schedule and memberships along.
    pub fn rename_group(&mut self, old: &str, new: &str) -> Result<()> {
        let new = new.trim();
        if new.is_empty() {
            return Err(EngineError::InvalidName(new.to_string()));
        }
        if old == new {
            return Ok(());
        }
        if self.group(new).is_some() {
            return Err(EngineError::DuplicateGroup(new.to_string()));
        }
        let group = self
            .groups
            .iter_mut()
            .find(|g| g.name == old)
            .ok_or_else(|| EngineError::UnknownGroup(old.to_string()))?;
        group.name = new.to_string();
        for item in &mut self.items {
            if item.groups.remove(old) {
                item.groups.insert(new.to_string());
            }
        }
        Ok(())
    }

    /// Replace a group's schedule as a whole.
    pub fn set_schedule(&mut self, name: &str, schedule: Option<Schedule>) -> Result<()> {
        let group = self
            .groups
            .iter_mut()
            .find(|g| g.name == name)
            .ok_or_else(|| EngineError::UnknownGroup(name.to_string()))?;
        group.schedule = schedule;
        Ok(())
    }

    pub fn item(&self, path: &Path) -> Option<&MediaItem> {
        self.items.iter().find(|i| i.path == path)
    }

    pub fn item_mut(&mut self, path: &Path) -> Option<&mut MediaItem> {
        self.items.iter_mut().find(|i| i.path == path)
    }

    /// Register a file. Returns false if the path is already known.
    pub fn add_item(&mut self, path: PathBuf) -> bool {
        if self.item(&path).is_some() {
            return false;
        }
        self.items.push(MediaItem::new(path));
        true
    }

    /// Add `group` to the item's memberships, registering the file first
    /// if needed. Returns true if the membership is new.
    pub fn assign(&mut self, path: &Path, group: &str) -> Result<bool> {
        if self.group(group).is_none() {
            return Err(EngineError::UnknownGroup(group.to_string()));
        }
        self.add_item(path.to_path_buf());
        let item = self
            .item_mut(path)
            .ok_or_else(|| EngineError::UnknownItem(path.display().to_string()))?;
        Ok(item.groups.insert(group.to_string()))
    }

    /// Remove `group` from the item's memberships. Returns true if it was present.
    pub fn unassign(&mut self, path: &Path, group: &str) -> Result<bool> {
        let item = self
            .item_mut(path)
            .ok_or_else(|| EngineError::UnknownItem(path.display().to_string()))?;
        Ok(item.groups.remove(group))
    }

    /// Set the duration override and loop count of an item.
    pub fn set_playback(
        &mut self,
        path: &Path,
        duration: Option<Duration>,
        loop_count: u32,
    ) -> Result<()> {
        let item = self
            .item_mut(path)
            .ok_or_else(|| EngineError::UnknownItem(path.display().to_string()))?;
        item.duration = duration.filter(|d| !d.is_zero());
        item.loop_count = loop_count;
        item.reset_loops();
        Ok(())
    }

    /// Paths of the items in `group`, in registration order.
    pub fn items_in(&self, group: &str) -> Vec<PathBuf> {
        self.items
            .iter()
            .filter(|i| i.in_group(group))
            .map(|i| i.path.clone())
            .collect()
    }

    /// Paths of the items belonging to any group of `selection`, in registration order.
    pub fn items_matching(&self, selection: &BTreeSet<String>) -> Vec<PathBuf> {
        self.items
            .iter()
            .filter(|i| i.in_any(selection))
            .map(|i| i.path.clone())
            .collect()
    }

    /// Every scheduled group whose schedule admits `now`.
    pub fn active_groups(&self, now: NaiveDateTime) -> BTreeSet<String> {
        self.groups
            .iter()
            .filter(|g| g.schedule.as_ref().is_some_and(|s| s.is_active_at(now)))
            .map(|g| g.name.clone())
            .collect()
    }

    /// Active groups of the given kind.
    pub fn active_of_kind(&self, now: NaiveDateTime, kind: GroupKind) -> BTreeSet<String> {
        self.groups
            .iter()
            .filter(|g| {
                g.schedule
                    .as_ref()
                    .is_some_and(|s| s.kind() == kind && s.is_active_at(now))
            })
            .map(|g| g.name.clone())
            .collect()
    }
}
