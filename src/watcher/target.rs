//! Watch targets and the task configurations that own them.
//!
//! Both types live behind `Arc` and are shared between the configuration
//! holder, the registry and the watcher threads. Identity is by pointer:
//! two targets with identical fields are still two different targets.

use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glob::Pattern;
use parking_lot::RwLock;

use crate::config::{TaskProfile, WatchFolderConfig};

use super::conflict::ConflictPolicy;

/// One configured directory to watch.
#[derive(Debug)]
pub struct WatchTarget {
    folder: PathBuf,
    filter: String,
    pattern: Option<Pattern>,
    include_subdirectories: bool,
    move_to_destination: bool,
    enabled: AtomicBool,
}

impl WatchTarget {
    pub fn new(config: WatchFolderConfig) -> Arc<Self> {
        let pattern = match Pattern::new(&config.filter) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                tracing::warn!(
                    "[target] invalid filter '{}' for {}: {e}, accepting all files",
                    config.filter,
                    config.path.display()
                );
                None
            }
        };

        Arc::new(Self {
            folder: config.path,
            filter: config.filter,
            pattern,
            include_subdirectories: config.include_subdirectories,
            move_to_destination: config.move_to_destination,
            enabled: AtomicBool::new(config.enabled),
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn include_subdirectories(&self) -> bool {
        self.include_subdirectories
    }

    pub fn move_to_destination(&self) -> bool {
        self.move_to_destination
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Flip the per-target switch. Call `WatchRegistry::update_state`
    /// afterwards for the change to take effect.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Whether a new file at `path` passes this target's filter.
    pub fn matches(&self, path: &Path) -> bool {
        let Some(pattern) = &self.pattern else {
            return true;
        };
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| pattern.matches(name))
    }

    /// Persisted form of this target.
    pub fn to_config(&self) -> WatchFolderConfig {
        WatchFolderConfig {
            path: self.folder.clone(),
            filter: self.filter.clone(),
            include_subdirectories: self.include_subdirectories,
            move_to_destination: self.move_to_destination,
            enabled: self.is_enabled(),
        }
    }
}

/// Settings of a task that the arrival pipeline reads.
///
/// Cloned out of the owning [`TaskConfig`] when an event is delivered, so a
/// pipeline run never observes a half-applied update.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSettings {
    pub name: String,
    pub watch_enabled: bool,
    pub destination_folder: PathBuf,
    pub subfolder_pattern: Option<String>,
    pub conflict_policy: ConflictPolicy,
}

impl TaskSettings {
    /// Folder that receives moved files, with the subfolder pattern expanded
    /// against the current local time.
    ///
    /// A pattern chrono cannot format falls back to the bare destination.
    pub fn destination_dir(&self) -> PathBuf {
        let Some(pattern) = self.subfolder_pattern.as_deref().filter(|p| !p.is_empty()) else {
            return self.destination_folder.clone();
        };

        let mut subfolder = String::new();
        if write!(subfolder, "{}", chrono::Local::now().format(pattern)).is_err() {
            tracing::warn!("[task] invalid subfolder pattern '{pattern}' for {}", self.name);
            return self.destination_folder.clone();
        }
        self.destination_folder.join(subfolder)
    }
}

/// A task configuration with its ordered list of watch targets.
#[derive(Debug)]
pub struct TaskConfig {
    settings: RwLock<TaskSettings>,
    targets: RwLock<Vec<Arc<WatchTarget>>>,
}

impl TaskConfig {
    pub fn new(settings: TaskSettings) -> Arc<Self> {
        Arc::new(Self {
            settings: RwLock::new(settings),
            targets: RwLock::new(Vec::new()),
        })
    }

    /// Build a task and its targets from the persisted profile.
    pub fn from_profile(profile: &TaskProfile) -> Arc<Self> {
        let task = Self::new(TaskSettings {
            name: profile.name.clone(),
            watch_enabled: profile.watch_enabled,
            destination_folder: profile.destination_folder.clone(),
            subfolder_pattern: profile.subfolder_pattern.clone(),
            conflict_policy: profile.conflict_policy,
        });
        task.targets.write().extend(
            profile
                .watch_folders
                .iter()
                .cloned()
                .map(WatchTarget::new),
        );
        task
    }

    /// Persisted form of this task, including its current targets.
    pub fn to_profile(&self) -> TaskProfile {
        let settings = self.snapshot();
        TaskProfile {
            name: settings.name,
            watch_enabled: settings.watch_enabled,
            destination_folder: settings.destination_folder,
            subfolder_pattern: settings.subfolder_pattern,
            conflict_policy: settings.conflict_policy,
            watch_folders: self.targets().iter().map(|t| t.to_config()).collect(),
        }
    }

    pub fn name(&self) -> String {
        self.settings.read().name.clone()
    }

    /// Copy of the current settings.
    pub fn snapshot(&self) -> TaskSettings {
        self.settings.read().clone()
    }

    /// Apply a change to the settings under the write lock.
    pub fn update(&self, f: impl FnOnce(&mut TaskSettings)) {
        f(&mut *self.settings.write());
    }

    pub fn is_watch_enabled(&self) -> bool {
        self.settings.read().watch_enabled
    }

    /// Whether `target` should currently be watched.
    pub fn is_target_active(&self, target: &WatchTarget) -> bool {
        self.is_watch_enabled() && target.is_enabled()
    }

    /// Snapshot of the target list, in order.
    pub fn targets(&self) -> Vec<Arc<WatchTarget>> {
        self.targets.read().clone()
    }

    pub fn contains_target(&self, target: &Arc<WatchTarget>) -> bool {
        self.targets.read().iter().any(|t| Arc::ptr_eq(t, target))
    }

    /// Append `target` unless this exact instance is already listed.
    pub(crate) fn ensure_target(&self, target: &Arc<WatchTarget>) -> bool {
        let mut targets = self.targets.write();
        if targets.iter().any(|t| Arc::ptr_eq(t, target)) {
            return false;
        }
        targets.push(Arc::clone(target));
        true
    }

    pub(crate) fn remove_target(&self, target: &Arc<WatchTarget>) -> bool {
        let mut targets = self.targets.write();
        let before = targets.len();
        targets.retain(|t| !Arc::ptr_eq(t, target));
        targets.len() != before
    }
}
