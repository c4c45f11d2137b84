use fs_err as fs;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{instance_id_from_path, read_hook_report_file, HookStatus};
use crate::error::{DeckError, Result};

const DEBOUNCE: Duration = Duration::from_millis(100);
const POLL_TICK: Duration = Duration::from_millis(50);

type StatusTable = Arc<RwLock<HashMap<String, HookStatus>>>;

/// Keeps the latest hook report per instance, fed by filesystem events.
pub struct HookStatusWatcher {
    hooks_dir: PathBuf,
    statuses: StatusTable,
    stop_flag: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HookStatusWatcher {
    pub fn new(hooks_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&hooks_dir).map_err(|err| DeckError::io("creating hooks dir", err))?;
        Ok(Self {
            hooks_dir,
            statuses: Arc::new(RwLock::new(HashMap::new())),
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    pub fn hooks_dir(&self) -> &Path {
        &self.hooks_dir
    }

    /// Primes the table, then watches the directory on a background thread.
    ///
    /// A second call while running does nothing.
    pub fn start(&self) -> Result<()> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| DeckError::InvalidArgument("hook watcher lock poisoned".to_string()))?;
        if worker.is_some() {
            return Ok(());
        }

        self.load_existing();

        let (tx, rx) = mpsc::channel();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            })?;
        watcher.watch(&self.hooks_dir, RecursiveMode::NonRecursive)?;

        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_flag = Arc::clone(&self.stop_flag);
        let statuses = Arc::clone(&self.statuses);
        let handle = thread::Builder::new()
            .name("hook-watcher".to_string())
            .spawn(move || run_event_loop(watcher, rx, stop_flag, statuses))
            .map_err(|err| DeckError::io("spawning hook watcher thread", err))?;
        *worker = Some(handle);

        info!(hooks_dir = %self.hooks_dir.display(), "Hook status watcher started");
        Ok(())
    }

    pub fn stop(&self) {
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        let Some(handle) = handle else {
            return;
        };
        self.stop_flag.store(true, Ordering::SeqCst);
        if handle.join().is_err() {
            warn!("Hook status watcher thread panicked");
        }
        info!("Hook status watcher stopped");
    }

    /// Processes every report currently in the directory.
    pub fn load_existing(&self) {
        let entries = match fs::read_dir(&self.hooks_dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(error = %err, "Hook directory unreadable");
                return;
            }
        };
        for entry in entries.flatten() {
            self.process_file(&entry.path());
        }
    }

    pub fn process_file(&self, path: &Path) {
        ingest_file(&self.statuses, path);
    }

    pub fn get_hook_status(&self, instance_id: &str) -> Option<HookStatus> {
        self.statuses
            .read()
            .ok()
            .and_then(|table| table.get(instance_id).cloned())
    }
}

impl Drop for HookStatusWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ingest_file(statuses: &StatusTable, path: &Path) {
    let Some(instance_id) = instance_id_from_path(path) else {
        return;
    };
    let Some(status) = read_hook_report_file(path) else {
        debug!(path = %path.display(), "Ignoring unparseable hook report");
        return;
    };
    if let Ok(mut table) = statuses.write() {
        table.insert(instance_id, status);
    }
}

fn run_event_loop(
    // Held so the OS watch stays registered for the life of the loop.
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Event>,
    stop_flag: Arc<AtomicBool>,
    statuses: StatusTable,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }

        match rx.recv_timeout(POLL_TICK) {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    for path in event.paths {
                        if instance_id_from_path(&path).is_some() {
                            pending.insert(path, Instant::now());
                        }
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        let ready: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) >= DEBOUNCE)
            .map(|(path, _)| path.clone())
            .collect();
        for path in ready {
            pending.remove(&path);
            ingest_file(&statuses, &path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{write_hook_status_file, HookReport};
    use crate::status::SessionStatus;
    use tempfile::tempdir;

    fn report(status: &str, event: &str) -> HookReport {
        HookReport {
            status: status.to_string(),
            session_id: "session".to_string(),
            event: event.to_string(),
            ts: 0,
        }
    }

    #[test]
    fn new_creates_directory() {
        let temp = tempdir().expect("temp dir");
        let dir = temp.path().join("nested").join("hooks");
        let watcher = HookStatusWatcher::new(dir.clone()).expect("watcher");
        assert!(dir.is_dir());
        assert_eq!(watcher.hooks_dir(), dir.as_path());
    }

    #[test]
    fn process_file_ignores_bad_reports() {
        let temp = tempdir().expect("temp dir");
        let watcher = HookStatusWatcher::new(temp.path().to_path_buf()).expect("watcher");

        fs::write(temp.path().join("broken.json"), b"{oops").expect("write");
        fs::write(temp.path().join("empty.json"), br#"{"status":""}"#).expect("write");
        fs::write(temp.path().join("other.txt"), br#"{"status":"waiting"}"#).expect("write");
        watcher.load_existing();

        assert!(watcher.get_hook_status("broken").is_none());
        assert!(watcher.get_hook_status("empty").is_none());
        assert!(watcher.get_hook_status("other").is_none());
    }

    #[test]
    fn newer_report_replaces_entry() {
        let temp = tempdir().expect("temp dir");
        let watcher = HookStatusWatcher::new(temp.path().to_path_buf()).expect("watcher");

        let path =
            write_hook_status_file(temp.path(), "a", &report("running", "UserPromptSubmit"))
                .expect("write");
        watcher.process_file(&path);
        write_hook_status_file(temp.path(), "a", &report("waiting", "Stop")).expect("write");
        watcher.process_file(&path);

        let status = watcher.get_hook_status("a").expect("status");
        assert_eq!(status.status, SessionStatus::Waiting);
        assert_eq!(status.event, "Stop");
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let temp = tempdir().expect("temp dir");
        write_hook_status_file(temp.path(), "primed", &report("waiting", "Stop")).expect("write");
        let watcher = HookStatusWatcher::new(temp.path().to_path_buf()).expect("watcher");

        watcher.start().expect("start");
        watcher.start().expect("second start");
        assert_eq!(
            watcher.get_hook_status("primed").map(|s| s.status),
            Some(SessionStatus::Waiting)
        );

        watcher.stop();
        watcher.stop();
    }

    #[test]
    fn picks_up_files_written_after_start() {
        let temp = tempdir().expect("temp dir");
        let watcher = HookStatusWatcher::new(temp.path().to_path_buf()).expect("watcher");
        watcher.start().expect("start");

        write_hook_status_file(temp.path(), "late", &report("waiting", "Stop")).expect("write");

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = None;
        while Instant::now() < deadline {
            seen = watcher.get_hook_status("late");
            if seen.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(25));
        }
        watcher.stop();
        assert_eq!(seen.map(|s| s.status), Some(SessionStatus::Waiting));
    }
}
