use chrono::NaiveDateTime;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const STAMP: &str = "%Y-%m-%d %H:%M:%S";

/// The play currently being timed.
#[derive(Debug, Clone, PartialEq)]
struct OpenEntry {
    file: String,
    groups: String,
    start: NaiveDateTime,
}

/// Append-only text log of finished plays.
///
/// One line per play: `file | groups | start | end | seconds`. A play is
/// opened when an item is dispatched and written when the next dispatch or
/// a stop closes it. Write failures are logged and otherwise ignored.
pub struct PlayLog {
    path: PathBuf,
    open: Option<OpenEntry>,
}

impl PlayLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            open: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start timing a play. An entry still open is closed at `at` first.
    pub fn begin<'a>(
        &mut self,
        file: &Path,
        groups: impl IntoIterator<Item = &'a String>,
        at: NaiveDateTime,
    ) {
        self.finish(at);
        let file = file
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string());
        let groups: Vec<&str> = groups.into_iter().map(String::as_str).collect();
        let groups = if groups.is_empty() {
            "-".to_string()
        } else {
            groups.join(",")
        };
        self.open = Some(OpenEntry {
            file,
            groups,
            start: at,
        });
    }

    /// Close the open entry, if any, and append it to the file.
    pub fn finish(&mut self, at: NaiveDateTime) {
        let Some(entry) = self.open.take() else {
            return;
        };
        let secs = (at - entry.start).num_milliseconds().max(0) as f64 / 1000.0;
        let line = format!(
            "{} | {} | {} | {} | {:.2} s\n",
            entry.file,
            entry.groups,
            entry.start.format(STAMP),
            at.format(STAMP),
            secs
        );
        if let Err(e) = self.append(&line) {
            warn!(path = %self.path.display(), "failed to write play log: {}", e);
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}
