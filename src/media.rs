use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const VIDEO_EXTS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];
pub const IMAGE_EXTS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Display time given to still images added without an explicit duration.
pub const DEFAULT_IMAGE_DURATION: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    /// Classify a path by extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        if VIDEO_EXTS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else if IMAGE_EXTS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else {
            None
        }
    }
}

/// One playable file and its group memberships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub path: PathBuf,
    /// Explicit play time; `None` plays the media for its natural length.
    #[serde(default, with = "duration_ms", rename = "duration_ms")]
    pub duration: Option<Duration>,
    /// Plays per dispatch before the queue moves on (0 = forever).
    #[serde(default = "default_loops")]
    pub loop_count: u32,
    #[serde(skip)]
    pub current_loop: u32,
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

fn default_loops() -> u32 {
    1
}

impl MediaItem {
    /// Create an item with the defaults used by manual add and folder scan:
    /// one loop, and a fixed display time for still images.
    pub fn new(path: PathBuf) -> Self {
        let duration = match MediaKind::from_path(&path) {
            Some(MediaKind::Image) => Some(DEFAULT_IMAGE_DURATION),
            _ => None,
        };
        MediaItem {
            path,
            duration,
            loop_count: 1,
            current_loop: 0,
            groups: BTreeSet::new(),
        }
    }

    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_path(&self.path)
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Whether the item belongs to any of `groups`.
    pub fn in_any(&self, groups: &BTreeSet<String>) -> bool {
        self.groups.iter().any(|g| groups.contains(g))
    }

    /// Record one finished play. Returns true when the item should be
    /// replayed in place, false once its loop budget is spent (the counter
    /// is reset in that case).
    pub fn consume_loop(&mut self) -> bool {
        self.current_loop += 1;
        if self.loop_count == 0 || self.current_loop < self.loop_count {
            true
        } else {
            self.current_loop = 0;
            false
        }
    }

    pub fn reset_loops(&mut self) {
        self.current_loop = 0;
    }

    /// Short label: "file.mp4 [video, loops=1, groups=A, B]".
    pub fn label(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string());
        let dur = match self.duration {
            Some(d) => format!("{:.1}s", d.as_secs_f64()),
            None => "natural".to_string(),
        };
        let loops = if self.loop_count == 0 {
            "inf".to_string()
        } else {
            self.loop_count.to_string()
        };
        let groups = if self.groups.is_empty() {
            "-".to_string()
        } else {
            self.groups.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        format!("{} [{}, loops={}, groups={}]", name, dur, loops, groups)
    }
}

/// List supported media files directly inside `dir`, sorted by file name.
pub fn scan_folder(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && MediaKind::from_path(p).is_some())
        .collect();
    files.sort();
    Ok(files)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        dur.map(|d| d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let ms = Option::<u64>::deserialize(d)?;
        Ok(ms.filter(|ms| *ms > 0).map(Duration::from_millis))
    }
}
