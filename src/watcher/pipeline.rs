//! Arrival pipeline run for every new file in a watched folder.
//!
//! 1. Wait for the file to stop growing
//! 2. Optionally move it into the task's destination folder
//! 3. Hand the final path to the uploader
//!
//! A failing run only affects its own file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::WatchOptions;

use super::conflict::{ConflictPolicy, Resolution, resolve_destination};
use super::error::PipelineError;
use super::target::{TaskSettings, WatchTarget};
use super::upload::{UploadRequest, Uploader};

/// Observer for per-event failures.
///
/// Runs inside the pipeline; the same rules as for [`Uploader`] apply.
pub type FailureHook = Arc<dyn Fn(&Path, &PipelineError) + Send + Sync>;

/// Collaborators shared by every watcher of a registry.
pub struct PipelineContext {
    pub uploader: Arc<dyn Uploader>,
    pub options: WatchOptions,
    pub on_failure: Option<FailureHook>,
}

impl PipelineContext {
    pub(crate) fn report_failure(&self, path: &Path, error: &PipelineError) {
        tracing::warn!("[pipeline] {} aborted: {error}", path.display());
        if let Some(hook) = &self.on_failure {
            hook(path, error);
        }
    }
}

/// One pipeline run, bound to a target and a task snapshot.
pub struct ArrivalPipeline<'a> {
    target: &'a WatchTarget,
    task: &'a TaskSettings,
    ctx: &'a PipelineContext,
}

impl<'a> ArrivalPipeline<'a> {
    pub fn new(target: &'a WatchTarget, task: &'a TaskSettings, ctx: &'a PipelineContext) -> Self {
        Self { target, task, ctx }
    }

    /// Process `source` and return the path handed to the uploader.
    pub fn run(&self, source: &Path) -> Result<PathBuf, PipelineError> {
        wait_until_settled(source, &self.ctx.options)?;

        let final_path = if self.target.move_to_destination() {
            self.relocate(source)?
        } else {
            source.to_path_buf()
        };

        crate::log_event!("pipeline", "upload", path = final_path, task = self.task.name);
        self.ctx.uploader.upload(UploadRequest {
            path: final_path.clone(),
            task: self.task.clone(),
        });

        Ok(final_path)
    }

    fn relocate(&self, source: &Path) -> Result<PathBuf, PipelineError> {
        let file_name = source
            .file_name()
            .ok_or_else(|| PipelineError::InvalidFileName {
                path: source.to_path_buf(),
            })?;

        let dir = self.task.destination_dir();
        fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;

        match resolve_destination(
            &dir,
            Path::new(file_name),
            self.task.conflict_policy,
            self.ctx.options.max_conflict_attempts,
        )? {
            Resolution::KeepSource => {
                crate::debug_event!("pipeline", "name taken, keeping source", path = source);
                Ok(source.to_path_buf())
            }
            Resolution::MoveTo(dest) => {
                if let Err(e) = move_file(source, &dest) {
                    // Give back the reserved name
                    if self.task.conflict_policy != ConflictPolicy::Overwrite {
                        let _ = fs::remove_file(&dest);
                    }
                    return Err(e);
                }
                crate::log_event!("pipeline", "moved", path = dest, from = source.display());
                Ok(dest)
            }
        }
    }
}

fn file_len(path: &Path) -> Result<u64, PipelineError> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(PipelineError::SourceMissing {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(PipelineError::io(path, e)),
    }
}

/// Block until the file size is unchanged across one poll interval.
///
/// Gives up waiting after `settle_timeout_ms` and lets the file through.
fn wait_until_settled(path: &Path, options: &WatchOptions) -> Result<(), PipelineError> {
    let poll = Duration::from_millis(options.settle_poll_ms);
    // A timeout too large to represent means no deadline
    let deadline = Instant::now().checked_add(Duration::from_millis(options.settle_timeout_ms));

    let mut last = file_len(path)?;
    if poll.is_zero() {
        return Ok(());
    }

    loop {
        thread::sleep(poll);
        let len = file_len(path)?;
        if len == last {
            return Ok(());
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::warn!(
                "[pipeline] {} still growing after {}ms, processing anyway",
                path.display(),
                options.settle_timeout_ms
            );
            return Ok(());
        }
        last = len;
    }
}

/// Rename, falling back to copy and delete across filesystems.
///
/// `dest` may be a placeholder reserved by conflict resolution; both paths
/// replace it.
fn move_file(source: &Path, dest: &Path) -> Result<(), PipelineError> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound && !source.exists() => {
            Err(PipelineError::SourceMissing {
                path: source.to_path_buf(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(source, dest).map_err(|e| PipelineError::io(dest, e))?;
            fs::remove_file(source).map_err(|e| PipelineError::io(source, e))
        }
        Err(e) => Err(PipelineError::io(dest, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchFolderConfig;
    use parking_lot::Mutex;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::io::Write;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        watch: PathBuf,
        dest: PathBuf,
        uploads: Arc<Mutex<Vec<UploadRequest>>>,
        failures: Arc<Mutex<Vec<String>>>,
        ctx: PipelineContext,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let watch = temp.path().join("watch");
        let dest = temp.path().join("dest");
        fs::create_dir_all(&watch).unwrap();

        let uploads = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&uploads);
        let seen = Arc::clone(&failures);

        let ctx = PipelineContext {
            uploader: Arc::new(move |req: UploadRequest| sink.lock().push(req)),
            options: WatchOptions {
                settle_poll_ms: 0,
                settle_timeout_ms: 0,
                max_conflict_attempts: 3,
            },
            on_failure: Some(Arc::new(move |_: &Path, e: &PipelineError| {
                seen.lock().push(e.to_string())
            })),
        };

        Fixture {
            _temp: temp,
            watch,
            dest,
            uploads,
            failures,
            ctx,
        }
    }

    fn task(dest: &Path, policy: ConflictPolicy) -> TaskSettings {
        TaskSettings {
            name: "shots".to_string(),
            watch_enabled: true,
            destination_folder: dest.to_path_buf(),
            subfolder_pattern: None,
            conflict_policy: policy,
        }
    }

    fn target(folder: &Path, move_files: bool) -> Arc<WatchTarget> {
        let mut config = WatchFolderConfig::new(folder);
        config.move_to_destination = move_files;
        WatchTarget::new(config)
    }

    #[test]
    fn test_moves_into_destination_and_uploads() {
        let fx = fixture();
        let source = fx.watch.join("photo.png");
        fs::write(&source, b"png").unwrap();

        let target = target(&fx.watch, true);
        let task = task(&fx.dest, ConflictPolicy::Suffix);
        let final_path = ArrivalPipeline::new(&target, &task, &fx.ctx).run(&source).unwrap();

        assert_eq!(final_path, fx.dest.join("photo.png"));
        assert!(!source.exists());
        assert_eq!(fs::read(&final_path).unwrap(), b"png");

        let uploads = fx.uploads.lock();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].path, final_path);
        assert_eq!(uploads[0].task, task);
    }

    #[test]
    fn test_existing_destination_gets_suffix() {
        let fx = fixture();
        fs::create_dir_all(&fx.dest).unwrap();
        fs::write(fx.dest.join("photo.png"), b"old").unwrap();

        let source = fx.watch.join("photo.png");
        fs::write(&source, b"new").unwrap();

        let target = target(&fx.watch, true);
        let task = task(&fx.dest, ConflictPolicy::Suffix);
        let final_path = ArrivalPipeline::new(&target, &task, &fx.ctx).run(&source).unwrap();

        assert_eq!(final_path, fx.dest.join("photo(1).png"));
        assert_eq!(fs::read(fx.dest.join("photo.png")).unwrap(), b"old");
        assert_eq!(fs::read(&final_path).unwrap(), b"new");
    }

    #[test]
    fn test_keep_source_uploads_original() {
        let fx = fixture();
        fs::create_dir_all(&fx.dest).unwrap();
        fs::write(fx.dest.join("a.txt"), b"old").unwrap();
        let source = fx.watch.join("a.txt");
        fs::write(&source, b"new").unwrap();

        let target = target(&fx.watch, true);
        let task = task(&fx.dest, ConflictPolicy::KeepSource);
        let final_path = ArrivalPipeline::new(&target, &task, &fx.ctx).run(&source).unwrap();

        assert_eq!(final_path, source);
        assert!(source.exists());
        assert_eq!(fx.uploads.lock()[0].path, source);
    }

    #[test]
    fn test_without_move_flag_file_stays() {
        let fx = fixture();
        let source = fx.watch.join("doc.pdf");
        fs::write(&source, b"pdf").unwrap();

        let target = target(&fx.watch, false);
        let task = task(&fx.dest, ConflictPolicy::Suffix);
        let final_path = ArrivalPipeline::new(&target, &task, &fx.ctx).run(&source).unwrap();

        assert_eq!(final_path, source);
        assert!(!fx.dest.exists());
        assert_eq!(fx.uploads.lock().len(), 1);
    }

    #[test]
    fn test_vanished_source_aborts_without_upload() {
        let fx = fixture();
        let source = fx.watch.join("gone.png");

        let target = target(&fx.watch, true);
        let task = task(&fx.dest, ConflictPolicy::Suffix);
        let err = ArrivalPipeline::new(&target, &task, &fx.ctx)
            .run(&source)
            .unwrap_err();

        assert!(matches!(err, PipelineError::SourceMissing { .. }));
        assert!(fx.uploads.lock().is_empty());
    }

    #[test]
    fn test_exhausted_names_abort_and_leave_source() {
        let fx = fixture();
        fs::create_dir_all(&fx.dest).unwrap();
        for name in ["a.txt", "a(1).txt", "a(2).txt", "a(3).txt"] {
            fs::write(fx.dest.join(name), b"x").unwrap();
        }
        let source = fx.watch.join("a.txt");
        fs::write(&source, b"new").unwrap();

        let target = target(&fx.watch, true);
        let task = task(&fx.dest, ConflictPolicy::Suffix);
        let err = ArrivalPipeline::new(&target, &task, &fx.ctx)
            .run(&source)
            .unwrap_err();
        fx.ctx.report_failure(&source, &err);

        assert!(matches!(err, PipelineError::ConflictExhausted { attempts: 3, .. }));
        assert!(source.exists());
        assert!(fx.uploads.lock().is_empty());
        assert_eq!(fx.failures.lock().len(), 1);
    }

    #[test]
    fn test_settle_wait_returns_for_stable_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stable.bin");
        fs::write(&path, vec![0u8; 128]).unwrap();

        let options = WatchOptions {
            settle_poll_ms: 5,
            settle_timeout_ms: 1_000,
            max_conflict_attempts: 1,
        };
        let started = Instant::now();
        wait_until_settled(&path, &options).unwrap();
        assert!(started.elapsed() < Duration::from_millis(1_000));
    }

    #[test]
    fn test_settle_wait_gives_up_on_growing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("growing.bin");
        fs::write(&path, b"start").unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let writer = {
            let path = path.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
                while !stop.load(Ordering::SeqCst) {
                    file.write_all(&[0u8; 64]).unwrap();
                    file.flush().unwrap();
                    thread::yield_now();
                }
            })
        };

        let options = WatchOptions {
            settle_poll_ms: 20,
            settle_timeout_ms: 100,
            max_conflict_attempts: 1,
        };
        let started = Instant::now();
        let result = wait_until_settled(&path, &options);
        let elapsed = started.elapsed();
        stop.store(true, Ordering::SeqCst);
        writer.join().unwrap();

        assert!(result.is_ok());
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_huge_settle_timeout_does_not_overflow() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stable.bin");
        fs::write(&path, b"data").unwrap();

        let options = WatchOptions {
            settle_poll_ms: 1,
            settle_timeout_ms: u64::MAX,
            max_conflict_attempts: 1,
        };
        wait_until_settled(&path, &options).unwrap();
    }

    #[test]
    fn test_simultaneous_arrivals_never_share_a_name() {
        let fx = fixture();
        let other = fx.watch.with_file_name("other");
        fs::create_dir_all(&other).unwrap();

        let task = task(&fx.dest, ConflictPolicy::Suffix);
        let targets = [target(&fx.watch, true), target(&other, true)];

        for round in 0..50 {
            let name = format!("photo-{round}.png");
            let sources = [fx.watch.join(&name), other.join(&name)];
            fs::write(&sources[0], b"first").unwrap();
            fs::write(&sources[1], b"second").unwrap();

            let barrier = Barrier::new(2);
            let finals: Vec<PathBuf> = thread::scope(|s| {
                let handles: Vec<_> = sources
                    .iter()
                    .zip(&targets)
                    .map(|(source, target)| {
                        let (barrier, task, ctx) = (&barrier, &task, &fx.ctx);
                        s.spawn(move || {
                            barrier.wait();
                            ArrivalPipeline::new(target, task, ctx).run(source).unwrap()
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            assert_ne!(finals[0], finals[1], "round {round}");
            let mut contents: Vec<Vec<u8>> = finals.iter().map(|p| fs::read(p).unwrap()).collect();
            contents.sort();
            assert_eq!(contents, vec![b"first".to_vec(), b"second".to_vec()], "round {round}");
        }

        assert_eq!(fx.uploads.lock().len(), 100);
    }

    #[test]
    fn test_occupied_name_of_any_kind_is_skipped() {
        let fx = fixture();
        let source = fx.watch.join("photo.png");
        fs::write(&source, b"png").unwrap();

        fs::create_dir_all(fx.dest.join("photo.png")).unwrap();
        let target = target(&fx.watch, true);
        let task = task(&fx.dest, ConflictPolicy::Suffix);
        let final_path = ArrivalPipeline::new(&target, &task, &fx.ctx).run(&source).unwrap();

        assert_eq!(final_path, fx.dest.join("photo(1).png"));
        assert_eq!(fs::read(&final_path).unwrap(), b"png");
    }
}
