//! Persistence of groups, items and interval bookkeeping.

use crate::error::Result;
use crate::media::MediaItem;
use crate::registry::{Group, GroupRegistry};
use crate::schedule::GroupKind;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Everything that survives a restart. Queue position does not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub groups: Vec<Group>,
    pub items: Vec<MediaItem>,
    pub last_run: BTreeMap<String, NaiveDateTime>,
    pub filter: BTreeSet<String>,
    pub repeat: bool,
    pub last_folder: Option<PathBuf>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot {
            groups: Vec::new(),
            items: Vec::new(),
            last_run: BTreeMap::new(),
            filter: BTreeSet::new(),
            repeat: true,
            last_folder: None,
        }
    }
}

impl Snapshot {
    /// Bring a freshly loaded snapshot in line with `now`.
    ///
    /// - last-run stamps from another calendar day are dropped;
    /// - items whose file is gone are dropped;
    /// - an active interval group without a stamp gets `now`;
    /// - inactive interval groups lose their stamp.
    pub fn settle(&mut self, now: NaiveDateTime) {
        let today = now.date();
        self.last_run.retain(|_, at| at.date() == today);

        let before = self.items.len();
        self.items.retain(|item| item.path.exists());
        if self.items.len() != before {
            info!("Dropped {} missing media file(s)", before - self.items.len());
        }

        for group in &self.groups {
            let Some(schedule) = &group.schedule else {
                continue;
            };
            if schedule.kind() != GroupKind::Interval || schedule.run_interval().is_none() {
                continue;
            }
            if schedule.is_active_at(now) {
                self.last_run.entry(group.name.clone()).or_insert(now);
            } else {
                self.last_run.remove(&group.name);
            }
        }
    }

    pub fn registry(&self) -> GroupRegistry {
        GroupRegistry::from_parts(self.groups.clone(), self.items.clone())
    }
}

/// Where snapshots are loaded from and saved to.
pub trait StateStore: Send {
    fn load_state(&self) -> Result<Snapshot>;
    fn save_state(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Pretty-printed JSON file.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonStateStore {
    /// A missing file is an empty snapshot.
    fn load_state(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no state file yet");
            return Ok(Snapshot::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save_state(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
