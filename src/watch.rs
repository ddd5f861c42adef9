//! Watch mode binds glob patterns to targets.
//!
//! The static roots of all bound globs are observed recursively with
//! `notify`, debounced so that a single save produces a single batch of
//! events. Every changed path is matched against each binding; a matching
//! binding runs its task (or asks the clients to reload) in the background.
//!
//! Runs of one binding never overlap. A change arriving while the binding is
//! busy is remembered, and exactly one more run starts once the current one
//! is done, however many changes came in meanwhile.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};

use crate::error::WatchError;
use crate::globs::Globs;
use crate::live::Reload;
use crate::task::Task;

const DEBOUNCE: Duration = Duration::from_millis(250);

pub enum Target {
    Task(Task),
    /// Reload connected clients without building anything.
    Reload,
}

impl Target {
    pub fn name(&self) -> String {
        match self {
            Target::Task(task) => task.name(),
            Target::Reload => "reload".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    Queued,
}

/// Queue-latest guard of a single binding.
#[derive(Debug)]
struct Guard(Mutex<State>);

impl Guard {
    fn new() -> Self {
        Self(Mutex::new(State::Idle))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a change. Returns true when the caller should start a run.
    fn trigger(&self) -> bool {
        let mut state = self.lock();
        match *state {
            State::Idle => {
                *state = State::Running;
                true
            }
            State::Running | State::Queued => {
                *state = State::Queued;
                false
            }
        }
    }

    /// Marks a run as done. Returns true when another run is due.
    fn finish(&self) -> bool {
        let mut state = self.lock();
        match *state {
            State::Queued => {
                *state = State::Running;
                true
            }
            State::Idle | State::Running => {
                *state = State::Idle;
                false
            }
        }
    }

    #[cfg(test)]
    fn state(&self) -> State {
        *self.lock()
    }
}

pub struct Binding {
    globs: Globs,
    target: Target,
    guard: Guard,
}

impl Binding {
    pub fn new(globs: Globs, target: Target) -> Self {
        Self {
            globs,
            target,
            guard: Guard::new(),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn matches(&self, path: &Utf8Path) -> bool {
        self.globs.matches(path)
    }
}

async fn run_binding(binding: Arc<Binding>, reload: Option<Arc<dyn Reload>>) {
    loop {
        match &binding.target {
            Target::Task(task) => {
                if let Err(e) = task.run().await {
                    tracing::error!("{e}");
                }
            }
            Target::Reload => {
                if let Some(reload) = &reload {
                    reload.reload();
                }
            }
        }

        if !binding.guard.finish() {
            break;
        }

        tracing::debug!("'{}' changed during the run, running again", binding.target.name());
    }
}

pub struct Watcher {
    root: Utf8PathBuf,
    bindings: Vec<Arc<Binding>>,
    reload: Option<Arc<dyn Reload>>,
}

impl Watcher {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            bindings: Vec::new(),
            reload: None,
        }
    }

    pub fn notify(mut self, reload: Option<Arc<dyn Reload>>) -> Self {
        self.reload = reload;
        self
    }

    /// Registers a binding. Globs are relative to the project root.
    pub fn watch(&mut self, globs: Globs, target: Target) -> &mut Self {
        self.bindings.push(Arc::new(Binding::new(globs, target)));
        self
    }

    pub fn bindings(&self) -> &[Arc<Binding>] {
        &self.bindings
    }

    /// Bindings matching a path relative to the project root.
    pub fn matching(&self, path: &Utf8Path) -> Vec<&Binding> {
        self.bindings
            .iter()
            .filter(|binding| binding.matches(path))
            .map(Arc::as_ref)
            .collect()
    }

    /// Starts every binding matching the path, unless it is already running.
    /// Returns the number of matching bindings.
    fn dispatch(&self, path: &Utf8Path) -> usize {
        let mut matched = 0;

        for binding in self.bindings.iter().filter(|b| b.matches(path)) {
            matched += 1;
            if binding.guard.trigger() {
                tracing::info!("'{}' changed, running '{}'", path, binding.target.name());
                tokio::spawn(run_binding(binding.clone(), self.reload.clone()));
            }
        }

        matched
    }

    /// Directories to observe: the existing part of every glob base,
    /// without the ones nested in another.
    fn roots(&self, root: &Utf8Path) -> Vec<Utf8PathBuf> {
        let mut dirs: Vec<_> = self
            .bindings
            .iter()
            .flat_map(|binding| binding.globs.roots())
            .map(|base| existing_ancestor(root, &base))
            .collect();
        dirs.sort();
        dirs.dedup();

        // sorted, a directory comes before everything nested in it
        let mut roots: Vec<Utf8PathBuf> = Vec::new();
        for dir in dirs {
            if !roots.iter().any(|kept| dir.starts_with(kept)) {
                roots.push(dir);
            }
        }
        roots
    }

    /// Observes the file system until the process exits.
    pub async fn run(self) -> Result<(), WatchError> {
        let root = self.root.canonicalize_utf8()?;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            tx.send(result).ok();
        })?;

        for path in self.roots(&root) {
            tracing::info!("watching {}", path);
            debouncer.watch(&path, RecursiveMode::Recursive)?;
        }

        while let Some(result) = rx.recv().await {
            let events = match result {
                Ok(events) => events,
                Err(errors) => {
                    for e in errors {
                        tracing::error!("watch error: {e:?}");
                    }
                    continue;
                }
            };

            let mut changed = HashSet::new();
            for event in &events {
                if !matches!(
                    event.event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    continue;
                }

                for path in &event.event.paths {
                    let Some(path) = Utf8Path::from_path(path) else {
                        continue;
                    };
                    if let Ok(relative) = path.strip_prefix(&root) {
                        changed.insert(relative.to_path_buf());
                    }
                }
            }

            for path in changed {
                if self.dispatch(&path) == 0 {
                    tracing::debug!("'{path}' changed, nothing bound to it");
                }
            }
        }

        Err(WatchError::Closed)
    }
}

/// Closest directory at or above `root/base` which exists, never leaving
/// `root`.
fn existing_ancestor(root: &Utf8Path, base: &Utf8Path) -> Utf8PathBuf {
    root.join(base)
        .ancestors()
        .take_while(|dir| dir.starts_with(root))
        .find(|dir| dir.is_dir())
        .unwrap_or(root)
        .to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::tests::Recorder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_guard_queues_latest() {
        let guard = Guard::new();

        assert!(guard.trigger());
        assert!(!guard.trigger());
        assert!(!guard.trigger());
        assert_eq!(guard.state(), State::Queued);

        // three triggers during a run collapse into one re-run
        assert!(guard.finish());
        assert!(!guard.finish());
        assert_eq!(guard.state(), State::Idle);

        assert!(guard.trigger());
    }

    async fn until(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_changes_during_run_rerun_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(tokio::sync::Semaphore::new(0));

        let task = {
            let runs = runs.clone();
            let gate = gate.clone();
            Task::new("scripts", move || {
                let runs = runs.clone();
                let gate = gate.clone();
                async move {
                    gate.acquire().await?.forget();
                    runs.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            })
        };

        let mut watcher = Watcher::new(".");
        watcher.watch(Globs::new(["src/js/**/*.js"]).unwrap(), Target::Task(task));

        let path = Utf8Path::new("src/js/main.js");
        assert_eq!(watcher.dispatch(path), 1);
        assert_eq!(watcher.dispatch(path), 1);
        assert_eq!(watcher.dispatch(path), 1);

        gate.add_permits(1);
        until(|| runs.load(Ordering::SeqCst) == 1).await;

        gate.add_permits(1);
        until(|| runs.load(Ordering::SeqCst) == 2).await;

        let guard = &watcher.bindings()[0].guard;
        until(|| guard.state() == State::Idle).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_run_keeps_binding_usable() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = {
            let runs = runs.clone();
            Task::new("broken", move || {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("nope"))
                }
            })
        };

        let mut watcher = Watcher::new(".");
        watcher.watch(Globs::new(["src/*.html"]).unwrap(), Target::Task(task));

        watcher.dispatch(Utf8Path::new("src/index.html"));
        until(|| watcher.bindings()[0].guard.state() == State::Idle).await;

        watcher.dispatch(Utf8Path::new("src/index.html"));
        until(|| runs.load(Ordering::SeqCst) == 2).await;
    }

    #[tokio::test]
    async fn test_reload_target() {
        let recorder = Arc::new(Recorder::default());
        let mut watcher = Watcher::new(".").notify(Some(recorder.clone()));
        watcher.watch(Globs::new(["src/**/*.html"]).unwrap(), Target::Reload);

        assert_eq!(watcher.dispatch(Utf8Path::new("src/index.html")), 1);
        assert_eq!(watcher.dispatch(Utf8Path::new("src/js/main.js")), 0);

        until(|| *recorder.reloads.lock().unwrap() == 1).await;
        assert!(recorder.streamed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_roots() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::create_dir_all(root.join("src/sass")).unwrap();

        let mut watcher = Watcher::new(root);
        watcher
            .watch(Globs::new(["src/sass/**/*.scss"]).unwrap(), Target::Reload)
            .watch(Globs::new(["src/js/**/*.js"]).unwrap(), Target::Reload)
            .watch(Globs::new(["assets/*.txt"]).unwrap(), Target::Reload);

        // missing directories fall back to their closest existing ancestor
        assert_eq!(watcher.roots(root), vec![root.to_path_buf()]);

        let mut watcher = Watcher::new(root);
        watcher.watch(Globs::new(["src/sass/**/*.scss"]).unwrap(), Target::Reload);
        assert_eq!(watcher.roots(root), vec![root.join("src/sass")]);
    }

    #[test]
    fn test_roots_skip_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::create_dir_all(root.join("src/images/icons")).unwrap();
        std::fs::create_dir_all(root.join("src/fonts")).unwrap();

        let mut watcher = Watcher::new(root);
        watcher
            .watch(Globs::new(["src/images/icons/*.svg"]).unwrap(), Target::Reload)
            .watch(Globs::new(["src/images/**/*.png"]).unwrap(), Target::Reload)
            .watch(Globs::new(["src/fonts/*.ttf"]).unwrap(), Target::Reload);

        assert_eq!(
            watcher.roots(root),
            vec![root.join("src/fonts"), root.join("src/images")]
        );
    }

    #[test]
    fn test_roots_keep_siblings_sharing_a_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::create_dir_all(root.join("src/js")).unwrap();
        std::fs::create_dir_all(root.join("src/js-vendor")).unwrap();

        let mut watcher = Watcher::new(root);
        watcher
            .watch(Globs::new(["src/js/**/*.js"]).unwrap(), Target::Reload)
            .watch(Globs::new(["src/js-vendor/*.js"]).unwrap(), Target::Reload);

        // src/js-vendor is not nested in src/js
        assert_eq!(
            watcher.roots(root),
            vec![root.join("src/js"), root.join("src/js-vendor")]
        );
    }
}
