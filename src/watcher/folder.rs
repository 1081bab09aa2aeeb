//! A single watch folder bound to one OS subscription.
//!
//! # Lifecycle
//!
//! ```text
//! Constructed --enable--> Enabled --dispose--> Disposed
//!                            ^                    |
//!                            +------enable--------+   (fresh subscription)
//! ```
//!
//! Every enable creates a new subscription tagged with a new generation.
//! Event delivery holds the generation gate for reading while the pipeline
//! runs; dispose clears it under the write lock, so it waits for in-flight
//! runs and any event delivered afterwards sees a stale generation and is
//! dropped.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::backend::{EventHandler, Subscription, WatchBackend};
use super::error::WatchError;
use super::pipeline::{ArrivalPipeline, PipelineContext};
use super::target::{TaskConfig, WatchTarget};

/// Observable state of a [`FolderWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Registered but never enabled.
    Constructed,
    /// Holding a live subscription.
    Enabled,
    /// Subscription released. Enabling again acquires a new one.
    Disposed,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WatcherState::Constructed => "dormant",
            WatcherState::Enabled => "watching",
            WatcherState::Disposed => "stopped",
        };
        f.write_str(label)
    }
}

struct Lifecycle {
    state: WatcherState,
    generation: u64,
    subscription: Option<Box<dyn Subscription>>,
}

struct Shared {
    target: Arc<WatchTarget>,
    task: Arc<TaskConfig>,
    ctx: Arc<PipelineContext>,
    /// Serializes enable and dispose. Held while dispose waits on the gate.
    transition: Mutex<()>,
    /// Only ever held briefly, so `state()` stays available to callbacks.
    lifecycle: Mutex<Lifecycle>,
    /// Generation currently allowed to run the pipeline; 0 means none.
    gate: RwLock<u64>,
}

impl Shared {
    fn deliver(&self, generation: u64, path: &Path) {
        if !self.target.matches(path) {
            crate::debug_event!("watcher", "filtered", path = path);
            return;
        }

        let live = self.gate.read();
        if *live != generation {
            crate::debug_event!("watcher", "stale event dropped", path = path);
            return;
        }

        let task = self.task.snapshot();
        if let Err(e) = ArrivalPipeline::new(&self.target, &task, &self.ctx).run(path) {
            self.ctx.report_failure(path, &e);
        }
    }
}

/// Runtime binding of a [`WatchTarget`] to a directory subscription.
pub struct FolderWatcher {
    shared: Arc<Shared>,
    backend: Arc<dyn WatchBackend>,
}

impl FolderWatcher {
    pub fn new(
        target: Arc<WatchTarget>,
        task: Arc<TaskConfig>,
        backend: Arc<dyn WatchBackend>,
        ctx: Arc<PipelineContext>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                target,
                task,
                ctx,
                transition: Mutex::new(()),
                lifecycle: Mutex::new(Lifecycle {
                    state: WatcherState::Constructed,
                    generation: 0,
                    subscription: None,
                }),
                gate: RwLock::new(0),
            }),
            backend,
        }
    }

    pub fn target(&self) -> &Arc<WatchTarget> {
        &self.shared.target
    }

    pub fn task(&self) -> &Arc<TaskConfig> {
        &self.shared.task
    }

    pub fn folder(&self) -> &Path {
        self.shared.target.folder()
    }

    pub fn state(&self) -> WatcherState {
        self.shared.lifecycle.lock().state
    }

    pub fn is_bound_to(&self, target: &Arc<WatchTarget>) -> bool {
        Arc::ptr_eq(&self.shared.target, target)
    }

    /// Acquire a subscription unless one is already held.
    ///
    /// Returns `true` if a new subscription was acquired. On failure the
    /// watcher keeps its previous state and holds nothing.
    pub fn enable(&self) -> Result<bool, WatchError> {
        let _transition = self.shared.transition.lock();
        let mut lifecycle = self.shared.lifecycle.lock();
        if lifecycle.subscription.is_some() {
            return Ok(false);
        }

        let generation = lifecycle.generation + 1;
        // Open the gate first so events arriving during subscribe are kept
        *self.shared.gate.write() = generation;

        let target = &self.shared.target;
        let handler = event_handler(&self.shared, generation);
        match self
            .backend
            .subscribe(target.folder(), target.include_subdirectories(), handler)
        {
            Ok(subscription) => {
                lifecycle.subscription = Some(subscription);
                lifecycle.generation = generation;
                lifecycle.state = WatcherState::Enabled;
                crate::log_event!("watcher", "enabled", path = target.folder());
                Ok(true)
            }
            Err(e) => {
                *self.shared.gate.write() = 0;
                lifecycle.generation = generation;
                Err(e)
            }
        }
    }

    /// Release the subscription if one is held.
    ///
    /// Waits for pipeline runs already in progress, so it must not be called
    /// from this watcher's own uploader or failure hook. Safe to call any
    /// number of times; returns `true` only for the call that released
    /// something.
    pub fn dispose(&self) -> bool {
        let _transition = self.shared.transition.lock();
        if self.shared.lifecycle.lock().subscription.is_none() {
            return false;
        }

        // Blocks until running pipelines finish. The lifecycle lock is not
        // held here, so their callbacks can still read this watcher's state.
        *self.shared.gate.write() = 0;

        let mut lifecycle = self.shared.lifecycle.lock();
        drop(lifecycle.subscription.take());
        lifecycle.state = WatcherState::Disposed;
        crate::log_event!("watcher", "disposed", path = self.folder());
        true
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for FolderWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FolderWatcher")
            .field("folder", &self.folder())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Handler registered with the backend. Holds only a weak reference, so a
/// subscription the backend leaks cannot keep the watcher alive.
fn event_handler(shared: &Arc<Shared>, generation: u64) -> EventHandler {
    let weak: Weak<Shared> = Arc::downgrade(shared);
    Arc::new(move |path: PathBuf| {
        if let Some(shared) = weak.upgrade() {
            shared.deliver(generation, &path);
        }
    })
}
