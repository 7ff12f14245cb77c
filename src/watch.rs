//! Watch Scheduler
//!
//! One recursive filesystem watch per bundle source root. Raw events are
//! resolved to create/modify/delete, dispatched onto the owning bundle's
//! maps, and coalesced per bundle into one debounced rebuild. A rebuilt
//! bundle cascades one hop to the bundles that include it.

use indexmap::IndexMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::builder::Builder;
use crate::bundle::{read_lock, write_lock, BuildSummary, ChangeFlags};
use crate::discovery::list_children;
use crate::error::{BuildError, BuildResult};

const IDLE_POLL: Duration = Duration::from_millis(500);
const BUSY_RETRIES: u32 = 10;
const BUSY_DELAY: Duration = Duration::from_millis(50);

// ═══════════════════════════════════════════════════════════════════════════════
// DEBOUNCER
// ═══════════════════════════════════════════════════════════════════════════════

/// Coalescing queue keyed by bundle. The first event for a bundle arms its
/// timer; later events within the window only OR their flags in.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: IndexMap<String, (Instant, ChangeFlags)>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            pending: IndexMap::new(),
        }
    }

    pub fn push(&mut self, bundle: &str, flags: ChangeFlags, now: Instant) {
        if !flags.any() {
            return;
        }
        self.pending
            .entry(bundle.to_string())
            .or_insert((now, ChangeFlags::default()))
            .1
            .merge(flags);
    }

    /// Take every request whose window has elapsed.
    pub fn due(&mut self, now: Instant) -> Vec<(String, ChangeFlags)> {
        let window = self.window;
        let mut fired = Vec::new();
        self.pending.retain(|bundle, (armed, flags)| {
            if now.duration_since(*armed) >= window {
                fired.push((bundle.clone(), *flags));
                false
            } else {
                true
            }
        });
        fired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|(armed, _)| *armed + self.window)
            .min()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PATH POLLING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    File,
    Directory,
    Missing,
}

#[cfg(unix)]
fn is_busy(e: &io::Error) -> bool {
    // EBUSY
    e.raw_os_error() == Some(16)
}

#[cfg(windows)]
fn is_busy(e: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    matches!(e.raw_os_error(), Some(32) | Some(33))
}

#[cfg(not(any(unix, windows)))]
fn is_busy(_e: &io::Error) -> bool {
    false
}

/// Stat `path`, retrying while the OS reports it transiently busy.
pub fn poll_path(path: &Path) -> PathState {
    let mut attempts = 0;
    loop {
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_dir() => return PathState::Directory,
            Ok(_) => return PathState::File,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return PathState::Missing,
            Err(e) if is_busy(&e) && attempts < BUSY_RETRIES => {
                attempts += 1;
                thread::sleep(BUSY_DELAY);
            }
            Err(e) => {
                warn!("Failed to stat {:?}, treating as removed: {}", path, e);
                return PathState::Missing;
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCHEDULER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct WatchScheduler<'b> {
    builder: &'b Builder,
    debouncer: Debouncer,
}

impl<'b> WatchScheduler<'b> {
    pub fn new(builder: &'b Builder) -> Self {
        WatchScheduler {
            builder,
            debouncer: Debouncer::new(Duration::from_millis(builder.config().debounce_ms)),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.next_deadline()
    }

    /// Dispatch one changed path of `bundle` and queue the rebuild it needs.
    pub fn handle_path(&mut self, bundle: &str, path: &Path, now: Instant) {
        let builder = self.builder;
        let Some(handle) = builder.bundle(bundle) else {
            return;
        };
        if read_lock(handle).ignores_path(path) {
            debug!("[{}] Ignoring change under {:?}", bundle, path);
            return;
        }
        builder.observer().on_file_change(bundle, path);

        let flags = match poll_path(path) {
            PathState::Directory => {
                for child in list_children(path) {
                    self.handle_path(bundle, &child, now);
                }
                return;
            }
            PathState::File => write_lock(handle).file_changed(path),
            PathState::Missing => write_lock(handle).path_removed(path),
        };

        if flags.global {
            // Every stylesheet in every bundle compiles against the header.
            for (name, _) in builder.bundles() {
                let mut style = ChangeFlags::style();
                style.global = true;
                self.debouncer.push(name, style, now);
            }
        }
        self.debouncer.push(bundle, flags, now);
    }

    /// Rebuild every bundle whose debounce window has elapsed, then the
    /// bundles that include them. Per-file errors are logged, never raised.
    pub fn fire_due(&mut self, now: Instant) -> Vec<BuildSummary> {
        let due = self.debouncer.due(now);
        if due.is_empty() {
            return Vec::new();
        }

        if due.iter().any(|(_, flags)| flags.global) {
            write_lock(self.builder.globals()).recompute();
        }

        let mut targets: IndexMap<String, ChangeFlags> = due.into_iter().collect();
        let direct: Vec<(String, ChangeFlags)> =
            targets.iter().map(|(n, f)| (n.clone(), *f)).collect();
        for (name, flags) in direct {
            for dependent in self.builder.dependents_of(&name) {
                targets
                    .entry(dependent)
                    .or_insert_with(ChangeFlags::default)
                    .merge(flags);
            }
        }

        let mut summaries = Vec::new();
        for wave in self.builder.waves() {
            for name in wave {
                let Some(flags) = targets.get(name).copied() else {
                    continue;
                };
                let Some(handle) = self.builder.bundle(name) else {
                    continue;
                };
                match write_lock(handle).rebuild(flags) {
                    Ok(summary) => summaries.push(summary),
                    Err(e) => warn!("[{}] Rebuild failed: {}", name, e),
                }
                for error in read_lock(handle).errors() {
                    self.builder.observer().on_error(&error);
                }
                self.builder.observer().on_rebuild(name, flags);
            }
        }

        if let Err(e) = self.builder.save_cache() {
            warn!("Failed to save build cache: {}", e);
        }
        summaries
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WATCH LOOP
// ═══════════════════════════════════════════════════════════════════════════════

enum WatchMessage {
    Event(String, Result<Event, notify::Error>),
    Stop,
}

/// A running watch. Dropping it without [`WatchHandle::stop`] leaves the
/// scheduler thread running until the watchers go away.
pub struct WatchHandle {
    tx: Sender<WatchMessage>,
    thread: Option<JoinHandle<()>>,
    _watchers: Vec<RecommendedWatcher>,
}

impl WatchHandle {
    pub fn stop(mut self) {
        let _ = self.tx.send(WatchMessage::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Watch thread panicked");
            }
        }
    }
}

/// Build once, then keep rebuilding on change until stopped. Per-file
/// errors never end the watch.
pub fn watch(builder: Builder) -> BuildResult<WatchHandle> {
    match builder.build() {
        Ok(_) => {}
        Err(BuildError::Failed(errors)) => {
            warn!("Initial build finished with {} error(s)", errors.len());
        }
        Err(e) => return Err(e),
    }

    let (tx, rx) = channel();
    let mut watchers = Vec::new();
    for (name, handle) in builder.bundles() {
        let source_dir: PathBuf = read_lock(handle).source_dir().to_path_buf();
        if !source_dir.exists() {
            debug!("[{}] No source directory to watch at {:?}", name, source_dir);
            continue;
        }
        let tx = tx.clone();
        let bundle = name.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let _ = tx.send(WatchMessage::Event(bundle.clone(), res));
        })?;
        watcher.watch(&source_dir, RecursiveMode::Recursive)?;
        info!("[{}] Watching {:?}", name, source_dir);
        watchers.push(watcher);
    }

    let thread = thread::spawn(move || {
        let mut scheduler = WatchScheduler::new(&builder);
        loop {
            let timeout = scheduler
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_POLL);

            match rx.recv_timeout(timeout) {
                Ok(WatchMessage::Event(bundle, Ok(event))) => {
                    if !matches!(event.kind, EventKind::Access(_)) {
                        for path in &event.paths {
                            scheduler.handle_path(&bundle, path, Instant::now());
                        }
                    }
                }
                Ok(WatchMessage::Event(bundle, Err(e))) => {
                    warn!("[{}] Watch error: {}", bundle, e);
                }
                Ok(WatchMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            scheduler.fire_due(Instant::now());
        }
        info!("Stopped watching");
    });

    Ok(WatchHandle {
        tx,
        thread: Some(thread),
        _watchers: watchers,
    })
}
