use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::models::TitleRef;
use crate::sources::SourceKind;

/// Entries untouched for this long are dropped on load.
pub const RETENTION_DAYS: u64 = 365;

/// Last thing watched for one title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub title: String,
    pub episode_index: usize,
    pub episode_title: Option<String>,
    /// Seconds into the episode when the player was last seen
    pub position: f64,
    pub duration: f64,
    pub last_watched: u64,
}

impl WatchEntry {
    pub fn progress_percent(&self) -> f64 {
        if self.duration > 0.0 {
            self.position / self.duration * 100.0
        } else {
            0.0
        }
    }
}

/// Watch history stored on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchHistory {
    /// Map from "{source}:{id or slug}" to watch entry
    entries: HashMap<String, WatchEntry>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl WatchHistory {
    /// Load history from the platform data directory, forgetting stale entries
    pub fn load() -> Self {
        let mut history = match Self::history_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        };
        history.cleanup_old(RETENTION_DAYS);
        history
    }

    /// Load history from `path`; a missing or corrupt file starts empty.
    pub fn load_from(path: &Path) -> Self {
        let mut history = if !path.exists() {
            Self::default()
        } else {
            match std::fs::read_to_string(path) {
                Ok(contents) => match serde_json::from_str::<WatchHistory>(&contents) {
                    Ok(history) => {
                        debug!(entries = history.entries.len(), "loaded watch history");
                        history
                    }
                    Err(e) => {
                        error!("failed to parse history: {}", e);
                        Self::default()
                    }
                },
                Err(e) => {
                    error!("failed to read history: {}", e);
                    Self::default()
                }
            }
        };
        history.path = Some(path.to_path_buf());
        history
    }

    /// History that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Save history to disk
    pub fn save(&self) {
        let Some(path) = self.path.as_deref() else {
            return;
        };

        if let Some(parent) = path.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            error!("failed to create history directory: {}", e);
            return;
        }

        match serde_json::to_string_pretty(self) {
            Ok(contents) => {
                if let Err(e) = std::fs::write(path, contents) {
                    error!("failed to write history: {}", e);
                }
            }
            Err(e) => {
                error!("failed to serialize history: {}", e);
            }
        }
    }

    fn history_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "anistream").map(|dirs| dirs.data_dir().join("history.json"))
    }

    pub fn make_key(source: SourceKind, reference: &TitleRef) -> String {
        format!("{}:{}", source.name(), reference)
    }

    pub fn get(&self, key: &str) -> Option<&WatchEntry> {
        self.entries.get(key)
    }

    /// Record where the user got to in an episode
    pub fn update(
        &mut self,
        key: String,
        title: String,
        episode_index: usize,
        episode_title: Option<String>,
        position: f64,
        duration: f64,
    ) {
        self.entries.insert(
            key,
            WatchEntry {
                title,
                episode_index,
                episode_title,
                position,
                duration,
                last_watched: now(),
            },
        );
    }

    /// Resume position for this episode if it was left between 5% and 90%
    pub fn resume_point(&self, key: &str, episode_index: usize) -> Option<f64> {
        self.entries
            .get(key)
            .filter(|e| e.episode_index == episode_index)
            .filter(|e| {
                let percent = e.progress_percent();
                (5.0..90.0).contains(&percent)
            })
            .map(|e| e.position)
    }

    /// Clear entries older than given days
    pub fn cleanup_old(&mut self, days: u64) {
        let cutoff = now().saturating_sub(days * 24 * 60 * 60);
        self.entries.retain(|_, e| e.last_watched >= cutoff);
    }
}
