//! OTA update service
//!
//! Periodically checks the install repository's remote for new commits and,
//! on command, fast-forwards the local checkout and asks for a restart.
//! This is a checkout-and-restart mechanism, not a signed software-update
//! protocol: the git history is the distribution channel.
//!
//! Check and apply are mutually exclusive; each invocation runs on its own
//! short-lived thread and every remote operation is bounded by a timeout
//! (realized by waiting on the worker's result channel, so a hung network
//! call degrades to a status line instead of a wedged service).

mod repo;

pub use repo::{find_repo_root, RemoteTip};

use std::path::PathBuf;
use std::process::Command as ProcessCommand;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Delay before the first automatic check, letting the application finish
/// its own startup I/O.
pub const FIRST_CHECK_DELAY: Duration = Duration::from_secs(30);

/// Interval between automatic re-checks.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Bound on the remote fetch during a check.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on the pull during an apply.
pub const APPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Caps on error text surfaced in status lines.
const FETCH_ERROR_CAP: usize = 80;
const GENERIC_ERROR_CAP: usize = 60;

/// Errors from git plumbing.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// libgit2 failure
    #[error("{0}")]
    Git(#[from] git2::Error),

    /// Local and remote histories have diverged; a fast-forward is the only
    /// update this service will perform
    #[error("local history has diverged from the remote")]
    Diverged,
}

/// Update state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    /// Nothing happening
    Idle,
    /// A check is running
    Checking,
    /// The remote is ahead; an apply may be requested
    UpdateAvailable,
    /// Local checkout matches the remote
    UpToDate,
    /// The last check or apply failed (recoverable; re-checks continue)
    CheckFailed,
    /// An apply is running
    Applying,
}

/// Result of the most recent successful check. Superseded wholesale on
/// every check; never partially merged.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCheckResult {
    /// Local HEAD short id
    pub local_revision: String,
    /// Remote tip short id
    pub remote_revision: String,
    /// Remote tip commit subject
    pub remote_summary: String,
    /// Remote tip commit time, human-readable
    pub remote_timestamp: String,
    /// Commits the remote is ahead of local
    pub commits_behind: usize,
}

/// Events emitted to the service's consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    /// Whether a newer revision exists
    Available(bool),
    /// Human-readable status line
    Status(String),
    /// Apply started / finished
    InProgress(bool),
    /// Live log line from an apply
    Log(String),
}

/// Update service configuration.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Directory the application runs from; the repository root is searched
    /// upward from here
    pub install_dir: PathBuf,
    /// Branch tracked for updates
    pub branch: String,
    /// Delay before the first automatic check
    pub first_check_delay: Duration,
    /// Interval between automatic checks
    pub check_interval: Duration,
    /// Bound on the remote fetch during a check
    pub fetch_timeout: Duration,
    /// Bound on the pull during an apply
    pub apply_timeout: Duration,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            install_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            branch: "main".to_string(),
            first_check_delay: FIRST_CHECK_DELAY,
            check_interval: CHECK_INTERVAL,
            fetch_timeout: FETCH_TIMEOUT,
            apply_timeout: APPLY_TIMEOUT,
        }
    }
}

/// Background OTA update checker and installer.
pub struct UpdateService {
    shared: Arc<Shared>,
    scheduler: Option<JoinHandle<()>>,
}

struct Shared {
    config: UpdateConfig,
    busy: AtomicBool,
    has_update: AtomicBool,
    running: AtomicBool,
    phase: Mutex<UpdatePhase>,
    last_check: Mutex<Option<UpdateCheckResult>>,
    events: Sender<UpdateEvent>,
}

impl UpdateService {
    /// Create a service. Automatic checks start only after [`start`].
    ///
    /// [`start`]: UpdateService::start
    pub fn new(config: UpdateConfig, events: Sender<UpdateEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                busy: AtomicBool::new(false),
                has_update: AtomicBool::new(false),
                running: AtomicBool::new(false),
                phase: Mutex::new(UpdatePhase::Idle),
                last_check: Mutex::new(None),
                events,
            }),
            scheduler: None,
        }
    }

    /// Start periodic checking: one check after the initial delay, then on
    /// the configured interval.
    pub fn start(&mut self) {
        if self.scheduler.is_some() {
            return;
        }
        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        self.scheduler = Some(thread::spawn(move || {
            if !sleep_while_running(shared.config.first_check_delay, &shared.running) {
                return;
            }
            loop {
                Shared::spawn_check(Arc::clone(&shared));
                if !sleep_while_running(shared.config.check_interval, &shared.running) {
                    return;
                }
            }
        }));
    }

    /// Stop periodic checking. An in-flight check or apply finishes on its
    /// own thread.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.scheduler.take() {
            let _ = handle.join();
        }
    }

    /// Trigger a check now. Silent no-op while a check or apply is running.
    pub fn check_for_updates(&self) {
        Shared::spawn_check(Arc::clone(&self.shared));
    }

    /// Apply the available update. Silent no-op when no update is known or
    /// while another operation is running.
    pub fn apply_update(&self) {
        Shared::spawn_apply(Arc::clone(&self.shared));
    }

    /// Whether a newer revision is known to exist.
    pub fn has_update(&self) -> bool {
        self.shared.has_update.load(Ordering::SeqCst)
    }

    /// Whether a check or apply is currently running.
    pub fn in_progress(&self) -> bool {
        self.shared.busy.load(Ordering::SeqCst)
    }

    /// Current state machine phase.
    pub fn phase(&self) -> UpdatePhase {
        *lock(&self.shared.phase)
    }

    /// The most recent check result, superseded wholesale per check.
    pub fn last_check(&self) -> Option<UpdateCheckResult> {
        lock(&self.shared.last_check).clone()
    }
}

impl Drop for UpdateService {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn spawn_check(shared: Arc<Shared>) {
        if shared
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        thread::spawn(move || {
            shared.run_check();
            shared.busy.store(false, Ordering::SeqCst);
        });
    }

    fn spawn_apply(shared: Arc<Shared>) {
        if !shared.has_update.load(Ordering::SeqCst) {
            return;
        }
        if shared
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        thread::spawn(move || {
            shared.run_apply();
            shared.busy.store(false, Ordering::SeqCst);
        });
    }

    fn run_check(&self) {
        self.set_phase(UpdatePhase::Checking);
        self.status("Checking for updates...");

        let Some(root) = repo::find_repo_root(&self.config.install_dir) else {
            self.status("No git repo found");
            self.set_phase(UpdatePhase::CheckFailed);
            return;
        };

        let branch = self.config.branch.clone();
        let fetch_root = root.clone();
        let fetch_branch = branch.clone();
        match run_with_timeout(self.config.fetch_timeout, move || {
            repo::fetch_branch(&fetch_root, &fetch_branch)
        }) {
            None => {
                self.status("Check timed out — no network?");
                self.set_phase(UpdatePhase::CheckFailed);
                return;
            }
            Some(Err(e)) => {
                self.status(&format!(
                    "Fetch failed: {}",
                    truncate(&e.to_string(), FETCH_ERROR_CAP)
                ));
                self.set_phase(UpdatePhase::CheckFailed);
                return;
            }
            Some(Ok(())) => {}
        }

        let outcome = (|| -> Result<(String, RemoteTip, usize), UpdateError> {
            let local = repo::local_head(&root)?;
            let tip = repo::remote_tip(&root, &branch)?;
            let behind = repo::commits_behind(&root, &branch)?;
            Ok((local, tip, behind))
        })();

        match outcome {
            Err(e) => {
                self.status(&format!(
                    "Check failed: {}",
                    truncate(&e.to_string(), GENERIC_ERROR_CAP)
                ));
                self.set_phase(UpdatePhase::CheckFailed);
            }
            Ok((local, tip, behind)) => {
                *lock(&self.last_check) = Some(UpdateCheckResult {
                    local_revision: local.clone(),
                    remote_revision: tip.short_id.clone(),
                    remote_summary: tip.subject.clone(),
                    remote_timestamp: tip.timestamp.clone(),
                    commits_behind: behind,
                });

                if behind > 0 {
                    self.has_update.store(true, Ordering::SeqCst);
                    let _ = self.events.send(UpdateEvent::Available(true));
                    self.status(&format!(
                        "Update available ({behind} commit{}): {}",
                        if behind > 1 { "s" } else { "" },
                        tip.subject
                    ));
                    self.set_phase(UpdatePhase::UpdateAvailable);
                } else {
                    self.has_update.store(false, Ordering::SeqCst);
                    let _ = self.events.send(UpdateEvent::Available(false));
                    self.status(&format!("Up to date ({local})"));
                    self.set_phase(UpdatePhase::UpToDate);
                }
            }
        }
    }

    fn run_apply(&self) {
        self.set_phase(UpdatePhase::Applying);
        let _ = self.events.send(UpdateEvent::InProgress(true));
        self.status("Updating...");

        let Some(root) = repo::find_repo_root(&self.config.install_dir) else {
            self.status("No git repo found");
            self.set_phase(UpdatePhase::CheckFailed);
            let _ = self.events.send(UpdateEvent::InProgress(false));
            return;
        };

        self.log("Pulling latest changes...");
        let branch = self.config.branch.clone();
        let pull_root = root.clone();
        match run_with_timeout(self.config.apply_timeout, move || {
            repo::fetch_branch(&pull_root, &branch)?;
            repo::fast_forward(&pull_root, &branch)
        }) {
            None => {
                self.log("Update timed out");
                self.status("Update timed out");
                self.set_phase(UpdatePhase::CheckFailed);
            }
            Some(Err(e)) => {
                // Error text goes to the log stream verbatim; only the
                // status line is kept short.
                self.log(&format!("Pull failed: {e}"));
                self.status("Update failed — see log");
                self.set_phase(UpdatePhase::CheckFailed);
            }
            Some(Ok(new_head)) => {
                self.install_manifest_deps(&root);
                self.log("Update complete! Restart to apply.");
                self.has_update.store(false, Ordering::SeqCst);
                let _ = self.events.send(UpdateEvent::Available(false));
                self.status(&format!("Updated to {new_head}! Restart to apply"));
                self.set_phase(UpdatePhase::Idle);
            }
        }

        let _ = self.events.send(UpdateEvent::InProgress(false));
    }

    /// Best-effort dependency install when the updated checkout declares a
    /// manifest. Failure never fails the apply; the new code may still run.
    fn install_manifest_deps(&self, root: &std::path::Path) {
        let manifest = root.join("requirements.txt");
        if !manifest.exists() {
            return;
        }
        self.log("Updating dependencies...");
        let result = ProcessCommand::new("pip3")
            .args(["install", "--break-system-packages", "-r"])
            .arg(&manifest)
            .current_dir(root)
            .output();
        match result {
            Ok(output) if !output.status.success() => {
                tracing::warn!(
                    "dependency install failed: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("dependency install could not run: {e}"),
        }
    }

    fn set_phase(&self, phase: UpdatePhase) {
        *lock(&self.phase) = phase;
    }

    fn status(&self, text: &str) {
        tracing::info!("update: {text}");
        let _ = self.events.send(UpdateEvent::Status(text.to_string()));
    }

    fn log(&self, text: &str) {
        let _ = self.events.send(UpdateEvent::Log(text.to_string()));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run a blocking git operation on its own thread and wait for the result
/// with a bound. `None` means the bound elapsed; the worker is left to
/// finish (or fail) in the background and its late result is discarded.
fn run_with_timeout<T: Send + 'static>(
    timeout: Duration,
    op: impl FnOnce() -> T + Send + 'static,
) -> Option<T> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(op());
    });
    rx.recv_timeout(timeout).ok()
}

/// Sleep in slices so a stop request is observed promptly. Returns `false`
/// when stopped during the sleep.
fn sleep_while_running(total: Duration, running: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        thread::sleep(Duration::from_millis(50).min(total));
    }
    running.load(Ordering::SeqCst)
}

fn truncate(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        text.to_string()
    } else {
        text.chars().take(cap).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::repo::testutil::{commit_file, default_branch, fixture};
    use super::*;
    use std::sync::mpsc::Receiver;

    fn service_for(
        install_dir: PathBuf,
        branch: String,
    ) -> (UpdateService, Receiver<UpdateEvent>) {
        let (tx, rx) = mpsc::channel();
        let config = UpdateConfig {
            install_dir,
            branch,
            first_check_delay: Duration::from_millis(20),
            check_interval: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(20),
            apply_timeout: Duration::from_secs(20),
        };
        (UpdateService::new(config, tx), rx)
    }

    /// Drain events until one matches, or time out.
    fn wait_for(
        rx: &Receiver<UpdateEvent>,
        timeout: Duration,
        pred: impl Fn(&UpdateEvent) -> bool,
    ) -> Vec<UpdateEvent> {
        let mut seen = Vec::new();
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(ev) => {
                    let done = pred(&ev);
                    seen.push(ev);
                    if done {
                        return seen;
                    }
                }
                Err(_) => {}
            }
        }
        panic!("timed out waiting for event; saw {seen:?}");
    }

    #[test]
    fn check_reports_update_available() {
        let (_fix, origin_path, clone_path) = fixture();
        let branch = default_branch(&clone_path);

        let origin = git2::Repository::open(&origin_path).expect("open origin");
        commit_file(&origin, "app.txt", "v2", "Improve alert hysteresis");

        let (service, rx) = service_for(clone_path, branch);
        service.check_for_updates();

        let events = wait_for(&rx, Duration::from_secs(30), |e| {
            matches!(e, UpdateEvent::Status(s) if s.starts_with("Update available"))
        });

        assert!(events.contains(&UpdateEvent::Available(true)));
        let status = events
            .iter()
            .rev()
            .find_map(|e| match e {
                UpdateEvent::Status(s) => Some(s.clone()),
                _ => None,
            })
            .expect("status event");
        assert_eq!(status, "Update available (1 commit): Improve alert hysteresis");

        // The service records the check result wholesale.
        let deadline = Instant::now() + Duration::from_secs(5);
        while service.in_progress() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        let check = service.last_check().expect("check result recorded");
        assert_eq!(check.commits_behind, 1);
        assert_eq!(check.remote_summary, "Improve alert hysteresis");
        assert!(service.has_update());
        assert_eq!(service.phase(), UpdatePhase::UpdateAvailable);
    }

    #[test]
    fn check_when_up_to_date() {
        let (_fix, _origin_path, clone_path) = fixture();
        let branch = default_branch(&clone_path);

        let (service, rx) = service_for(clone_path, branch);
        service.check_for_updates();

        let events = wait_for(&rx, Duration::from_secs(30), |e| {
            matches!(e, UpdateEvent::Status(s) if s.starts_with("Up to date"))
        });
        assert!(events.contains(&UpdateEvent::Available(false)));
        assert!(!service.has_update());
    }

    #[test]
    fn check_without_repository_fails_softly() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let (service, rx) = service_for(dir.path().to_path_buf(), "main".to_string());
        service.check_for_updates();

        wait_for(&rx, Duration::from_secs(10), |e| {
            matches!(e, UpdateEvent::Status(s) if s == "No git repo found")
        });
        assert_eq!(
            wait_for_idle(&service),
            UpdatePhase::CheckFailed,
            "soft failure, process keeps running"
        );
    }

    #[test]
    fn apply_pulls_once_despite_concurrent_requests() {
        let (_fix, origin_path, clone_path) = fixture();
        let branch = default_branch(&clone_path);

        let origin = git2::Repository::open(&origin_path).expect("open origin");
        commit_file(&origin, "app.txt", "v2", "Ship OTA fix");

        let (service, rx) = service_for(clone_path.clone(), branch);
        service.check_for_updates();
        wait_for(&rx, Duration::from_secs(30), |e| {
            matches!(e, UpdateEvent::Available(true))
        });
        wait_for_idle(&service);

        // Two requests back to back: the busy flag admits exactly one.
        service.apply_update();
        service.apply_update();

        let events = wait_for(&rx, Duration::from_secs(30), |e| {
            matches!(e, UpdateEvent::InProgress(false))
        });
        let pulls = events
            .iter()
            .filter(|e| matches!(e, UpdateEvent::Log(l) if l == "Pulling latest changes..."))
            .count();
        assert_eq!(pulls, 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, UpdateEvent::Log(l) if l == "Update complete! Restart to apply.")));
        assert!(events
            .iter()
            .any(|e| matches!(e, UpdateEvent::Status(s) if s.contains("Restart to apply"))));

        // Working tree was actually fast-forwarded.
        let contents = std::fs::read_to_string(clone_path.join("app.txt")).expect("read app.txt");
        assert_eq!(contents, "v2");
        assert!(!service.has_update());
    }

    #[test]
    fn apply_without_update_is_a_no_op() {
        let (_fix, _origin_path, clone_path) = fixture();
        let branch = default_branch(&clone_path);
        let (service, rx) = service_for(clone_path, branch);

        service.apply_update();
        thread::sleep(Duration::from_millis(100));
        assert!(rx.try_iter().next().is_none());
        assert!(!service.in_progress());
    }

    #[test]
    fn scheduler_runs_first_check_after_delay() {
        let (_fix, _origin_path, clone_path) = fixture();
        let branch = default_branch(&clone_path);
        let (mut service, rx) = service_for(clone_path, branch);

        service.start();
        wait_for(&rx, Duration::from_secs(30), |e| {
            matches!(e, UpdateEvent::Status(s) if s == "Checking for updates...")
        });
        service.stop();
    }

    #[test]
    fn error_text_is_truncated() {
        assert_eq!(truncate("short", 80), "short");
        let long = "x".repeat(200);
        assert_eq!(truncate(&long, 80).len(), 80);
        assert_eq!(truncate(&long, 60).len(), 60);
    }

    fn wait_for_idle(service: &UpdateService) -> UpdatePhase {
        let deadline = Instant::now() + Duration::from_secs(10);
        while service.in_progress() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        service.phase()
    }
}
