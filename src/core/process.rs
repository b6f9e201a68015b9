//! Launch supervision - Spawning, observing and terminating game processes

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{LauncherError, LauncherResult};
use super::instance::{Instance, SessionStatus};
use super::launch::{build_command, LaunchCommand, LaunchContext, LaunchProfile};
use super::settings::Settings;
use super::store::InstanceStore;
use crate::platform;

/// Log file written inside `<instance>/logs`
pub const LOG_FILE: &str = "latest.log";

/// How often the log is re-read while waiting for the ready line
const LOG_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Snapshot of a launch session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub name: String,
    pub session_id: Uuid,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
}

/// Handle returned by a successful launch
#[derive(Debug, Clone)]
pub struct LaunchHandle {
    pub name: String,
    pub session_id: Uuid,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    status: watch::Receiver<SessionStatus>,
}

impl LaunchHandle {
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Wait until the process has exited, returning its exit code
    pub async fn wait_for_exit(&mut self) -> Option<i32> {
        // Reaper gone; the last published value is final
        let status = match exit_status(&mut self.status).await {
            Some(status) => status,
            None => *self.status.borrow(),
        };
        match status {
            SessionStatus::Exited(code) => code,
            _ => None,
        }
    }
}

struct Session {
    id: Uuid,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    status: watch::Receiver<SessionStatus>,
    /// Cancelling makes the reaper kill the child
    kill: CancellationToken,
}

impl Session {
    fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    fn info(&self, name: &str) -> SessionInfo {
        SessionInfo {
            name: name.to_string(),
            session_id: self.id,
            pid: self.pid,
            started_at: self.started_at,
            status: self.status(),
        }
    }
}

/// Starts game processes and tracks their sessions
///
/// At most one session per instance name is active at a time. Exits are
/// observed by one reaper task per session awaiting the child. Game output
/// goes straight to `logs/latest.log`, so games keep running unharmed after
/// the launcher exits.
pub struct LaunchSupervisor {
    store: Arc<InstanceStore>,
    settings: Arc<Settings>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl LaunchSupervisor {
    pub fn new(store: Arc<InstanceStore>, settings: Arc<Settings>) -> Self {
        Self {
            store,
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a Starting or Running session exists for `name`
    pub fn is_active(&self, name: &str) -> bool {
        self.sessions()
            .get(name)
            .map(|s| s.status().is_active())
            .unwrap_or(false)
    }

    pub fn status(&self, name: &str) -> Option<SessionInfo> {
        self.sessions().get(name).map(|s| s.info(name))
    }

    pub fn active_count(&self) -> usize {
        self.sessions()
            .values()
            .filter(|s| s.status().is_active())
            .count()
    }

    /// Drop the record of an exited session
    pub fn forget(&self, name: &str) {
        let mut sessions = self.sessions();
        if sessions.get(name).is_some_and(|s| !s.status().is_active()) {
            sessions.remove(name);
        }
    }

    /// Launch the named instance and wait until it is running
    pub async fn launch(&self, name: &str, username: &str) -> LauncherResult<LaunchHandle> {
        let instance = self.store.get(name)?;
        let instance_dir = instance.dir_path(self.store.instances_dir());

        let (status_tx, status_rx) = watch::channel(SessionStatus::Starting);
        let status_tx = Arc::new(status_tx);
        let kill = CancellationToken::new();
        let session_id = Uuid::new_v4();
        let started_at = Utc::now();

        // Reserve the name before any await point
        {
            let mut sessions = self.sessions();
            if sessions.get(name).is_some_and(|s| s.status().is_active()) {
                return Err(LauncherError::AlreadyRunning(name.to_string()));
            }
            sessions.insert(
                name.to_string(),
                Session {
                    id: session_id,
                    pid: None,
                    started_at,
                    status: status_rx.clone(),
                    kill: kill.clone(),
                },
            );
        }

        let command = match self.prepare(&instance, &instance_dir, username).await {
            Ok(command) => command,
            Err(e) => {
                self.discard(name, session_id);
                self.store
                    .record_event(name, "launch_failed", Some(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        info!(
            "Launching '{}': {} {:?}",
            name, command.program, command.args
        );

        let log_path = instance_dir.join("logs").join(LOG_FILE);
        let spawned = match open_log(&log_path).await {
            Ok(log) => spawn(&command, log),
            Err(e) => Err(io::Error::new(
                e.kind(),
                format!("cannot create {}: {}", log_path.display(), e),
            )),
        };
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                self.discard(name, session_id);
                let err = LauncherError::launch_failed(name, e);
                error!("{}", err);
                self.store
                    .record_event(name, "launch_failed", Some(err.to_string()))
                    .await;
                return Err(err);
            }
        };

        let pid = child.id();
        if let Some(session) = self.sessions().get_mut(name) {
            if session.id == session_id {
                session.pid = pid;
            }
        }
        info!("Spawned '{}' with PID {:?}", name, pid);

        let ready_rx = command.ready_pattern.clone().map(|pattern| {
            let (ready_tx, ready_rx) = oneshot::channel();
            tokio::spawn(watch_for_ready(
                log_path.clone(),
                pattern,
                ready_tx,
                status_tx.subscribe(),
            ));
            ready_rx
        });

        self.store
            .record_event(name, "launched", pid.map(|p| format!("pid {}", p)))
            .await;
        if let Err(e) = self.store.touch_last_played(name).await {
            warn!("Failed to update last played time of '{}': {}", name, e);
        }
        self.spawn_reaper(name, child, Arc::clone(&status_tx), kill);

        let handle = LaunchHandle {
            name: name.to_string(),
            session_id,
            pid,
            started_at,
            status: status_rx.clone(),
        };

        match ready_rx {
            Some(ready_rx) => {
                self.await_readiness(name, status_tx, status_rx, ready_rx)
                    .await?
            }
            None => mark_running(name, &status_tx),
        }
        Ok(handle)
    }

    async fn prepare(
        &self,
        instance: &Instance,
        instance_dir: &Path,
        username: &str,
    ) -> LauncherResult<LaunchCommand> {
        let name = instance.name.clone();
        if !tokio::fs::metadata(instance_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(LauncherError::launch_failed(
                &name,
                format!("instance directory {} is missing", instance_dir.display()),
            ));
        }

        let dir = instance_dir.to_path_buf();
        let profile = tokio::task::spawn_blocking(move || LaunchProfile::load(&dir))
            .await?
            .map_err(|e| LauncherError::launch_failed(&name, e))?;

        let ctx = LaunchContext {
            instance,
            instance_dir,
            settings: &self.settings,
            username,
        };
        build_command(&ctx, &profile)
    }

    /// Remove a reservation that never got a process
    fn discard(&self, name: &str, session_id: Uuid) {
        let mut sessions = self.sessions();
        if sessions.get(name).is_some_and(|s| s.id == session_id) {
            sessions.remove(name);
        }
    }

    async fn await_readiness(
        &self,
        name: &str,
        status_tx: Arc<watch::Sender<SessionStatus>>,
        mut status_rx: watch::Receiver<SessionStatus>,
        ready_rx: oneshot::Receiver<()>,
    ) -> LauncherResult<()> {
        let timeout = self.settings.launch_timeout();

        tokio::select! {
            ready = ready_rx => {
                if ready.is_ok() {
                    mark_running(name, &status_tx);
                    return Ok(());
                }
                // The log watcher only gives up once the process has exited
                let mut exit_rx = status_tx.subscribe();
                let status = tokio::time::timeout(timeout, exit_status(&mut exit_rx))
                    .await
                    .ok()
                    .flatten();
                Err(exited_early(name, status))
            }
            status = exit_status(&mut status_rx) => {
                Err(exited_early(name, status))
            }
            _ = tokio::time::sleep(timeout) => {
                warn!("'{}' did not become ready within {:?}", name, timeout);
                Err(LauncherError::Timeout {
                    name: name.to_string(),
                    waiting_for: "become ready",
                    secs: timeout.as_secs(),
                })
            }
        }
    }

    fn spawn_reaper(
        &self,
        name: &str,
        mut child: Child,
        status_tx: Arc<watch::Sender<SessionStatus>>,
        kill: CancellationToken,
    ) {
        let name = name.to_string();
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            let result = tokio::select! {
                result = child.wait() => result,
                _ = kill.cancelled() => {
                    debug!("Force killing '{}'", name);
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill '{}': {}", name, e);
                    }
                    child.wait().await
                }
            };

            let code = match result {
                Ok(status) => status.code(),
                Err(e) => {
                    error!("Error waiting for '{}': {}", name, e);
                    None
                }
            };

            status_tx.send_replace(SessionStatus::Exited(code));
            info!("Instance '{}' exited with code {:?}", name, code);
            store
                .record_event(&name, "exited", code.map(|c| format!("code {}", c)))
                .await;
        });
    }

    /// Stop a running session, gracefully unless `force` is set
    pub async fn terminate(&self, name: &str, force: bool) -> LauncherResult<()> {
        let (pid, kill, mut status_rx) = {
            let sessions = self.sessions();
            match sessions.get(name) {
                Some(session) if session.status().is_active() => {
                    (session.pid, session.kill.clone(), session.status.clone())
                }
                _ => return Err(LauncherError::NotRunning(name.to_string())),
            }
        };

        info!("Terminating '{}' (force: {})", name, force);

        match pid {
            Some(pid) if !force => {
                if let Err(e) = platform::terminate_process(pid) {
                    warn!("Graceful termination failed: {}, forcing kill", e);
                    kill.cancel();
                }
            }
            Some(pid) => {
                // Take the whole process group down, not just the leader
                if let Err(e) = platform::kill_process(pid) {
                    debug!("Group kill of '{}' failed: {}", name, e);
                }
                kill.cancel();
            }
            None => kill.cancel(),
        }

        let timeout = self.settings.terminate_timeout();
        match tokio::time::timeout(timeout, exit_status(&mut status_rx)).await {
            Ok(_) => {
                self.store
                    .record_event(name, "terminated", force.then(|| "forced".to_string()))
                    .await;
                Ok(())
            }
            Err(_) => Err(LauncherError::Timeout {
                name: name.to_string(),
                waiting_for: "exit",
                secs: timeout.as_secs(),
            }),
        }
    }

    /// Force kill a running session
    pub async fn kill(&self, name: &str) -> LauncherResult<()> {
        self.terminate(name, true).await
    }

    /// Stop running games if configured to, otherwise leave them detached
    pub async fn shutdown(&self) {
        if self.settings.stop_instances_on_exit {
            self.stop_all().await;
        } else if self.active_count() > 0 {
            info!("Leaving {} running instance(s) detached", self.active_count());
        }
    }

    /// Terminate every active session, escalating to a kill on timeout
    pub async fn stop_all(&self) {
        let names: Vec<String> = self
            .sessions()
            .iter()
            .filter(|(_, s)| s.status().is_active())
            .map(|(name, _)| name.clone())
            .collect();

        for name in names {
            match self.terminate(&name, false).await {
                Ok(()) | Err(LauncherError::NotRunning(_)) => {}
                Err(e) => {
                    warn!("{}; killing", e);
                    if let Err(e) = self.terminate(&name, true).await {
                        error!("Failed to stop '{}': {}", name, e);
                    }
                }
            }
        }
    }
}

fn mark_running(name: &str, status_tx: &watch::Sender<SessionStatus>) {
    let changed = status_tx.send_if_modified(|status| {
        if *status == SessionStatus::Starting {
            *status = SessionStatus::Running;
            true
        } else {
            false
        }
    });
    if changed {
        info!("Instance '{}' is running", name);
    }
}

fn exited_early(name: &str, status: Option<SessionStatus>) -> LauncherError {
    let code = match status {
        Some(SessionStatus::Exited(code)) => code,
        _ => None,
    };
    LauncherError::launch_failed(
        name,
        match code {
            Some(code) => format!("process exited with code {} before becoming ready", code),
            None => "process exited before becoming ready".to_string(),
        },
    )
}

/// Wait for the session to leave Starting/Running; `None` if the reaper is gone
async fn exit_status(status: &mut watch::Receiver<SessionStatus>) -> Option<SessionStatus> {
    status.wait_for(|s| !s.is_active()).await.map(|s| *s).ok()
}

/// Create (truncating) the log file a game writes to
async fn open_log(path: &Path) -> io::Result<fs::File> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::File::create(&path)
    })
    .await
    .map_err(io::Error::other)?
}

fn spawn(command: &LaunchCommand, log: fs::File) -> io::Result<Child> {
    let stderr = log.try_clone()?;

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&command.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(false);

    // Own process group so termination reaches the whole game
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn()
}

fn is_ready_line(pattern: &Regex, line: &[u8]) -> bool {
    let text = String::from_utf8_lossy(line);
    pattern.is_match(text.trim_end_matches(['\r', '\n']))
}

/// Follow a game's log until a line matches `pattern`
///
/// Signals `ready_tx` on a match. Gives up when the launch stops waiting or
/// when the process has exited and its final output has been read.
async fn watch_for_ready(
    path: PathBuf,
    pattern: Regex,
    ready_tx: oneshot::Sender<()>,
    mut status: watch::Receiver<SessionStatus>,
) {
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("Cannot follow {}: {}", path.display(), e);
            return;
        }
    };
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    let mut reaper_gone = false;

    loop {
        if ready_tx.is_closed() {
            return;
        }
        // Checked before reading so output written before the exit is seen
        let exited = reaper_gone || !status.borrow().is_active();

        loop {
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) if line.ends_with(b"\n") => {
                    if is_ready_line(&pattern, &line) {
                        let _ = ready_tx.send(());
                        return;
                    }
                    line.clear();
                }
                // Partial line; the rest has not been written yet
                Ok(_) => break,
                Err(e) => {
                    warn!("Failed to read {}: {}", path.display(), e);
                    return;
                }
            }
        }

        if exited {
            if !line.is_empty() && is_ready_line(&pattern, &line) {
                let _ = ready_tx.send(());
            }
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(LOG_POLL_INTERVAL) => {}
            changed = status.changed() => reaper_gone = changed.is_err(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::launch::PROFILE_FILE;
    use crate::persistence::Database;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<InstanceStore>,
        supervisor: LaunchSupervisor,
    }

    async fn fixture(settings: Settings) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("craftline.db")).unwrap();
        db.initialize().unwrap();
        let store = Arc::new(InstanceStore::new(Arc::new(db), dir.path().join("instances")));
        let supervisor = LaunchSupervisor::new(Arc::clone(&store), Arc::new(settings));
        Fixture {
            _dir: dir,
            store,
            supervisor,
        }
    }

    async fn shell_instance(store: &InstanceStore, name: &str, script: &str, ready: Option<&str>) {
        store.create(name, "1.21.5", None).await.unwrap();
        let profile = serde_json::json!({
            "program": "/bin/sh",
            "jvmArgs": ["-c", script],
            "readyPattern": ready,
        });
        std::fs::write(
            store.dir_for(name).join(PROFILE_FILE),
            serde_json::to_vec(&profile).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn launch_without_pattern_runs_until_exit() {
        let f = fixture(Settings::default()).await;
        shell_instance(&f.store, "Survival", "sleep 0.2; exit 3", None).await;

        let mut handle = f.supervisor.launch("Survival", "Alice").await.unwrap();
        assert!(handle.pid.is_some());
        assert!(f.supervisor.is_active("Survival"));

        assert_eq!(handle.wait_for_exit().await, Some(3));
        assert_eq!(
            f.supervisor.status("Survival").unwrap().status,
            SessionStatus::Exited(Some(3))
        );
        assert!(f.store.get("Survival").unwrap().last_played.is_some());
    }

    #[tokio::test]
    async fn ready_pattern_gates_running_and_output_is_logged() {
        let f = fixture(Settings::default()).await;
        shell_instance(
            &f.store,
            "Survival",
            "echo booting; echo 'Done (1.2s)!'; exec sleep 30",
            Some(r"^Done \("),
        )
        .await;

        let handle = f.supervisor.launch("Survival", "Alice").await.unwrap();
        assert_eq!(handle.status(), SessionStatus::Running);

        f.supervisor.terminate("Survival", false).await.unwrap();
        assert!(!f.supervisor.is_active("Survival"));

        let log = std::fs::read_to_string(f.store.dir_for("Survival").join("logs").join(LOG_FILE))
            .unwrap();
        assert!(log.contains("booting"));

        let events: Vec<String> = f
            .store
            .history("Survival")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert!(events.contains(&"launched".to_string()));
        assert!(events.contains(&"terminated".to_string()));
    }

    #[tokio::test]
    async fn undecodable_output_does_not_hide_the_ready_line() {
        let f = fixture(Settings::default()).await;
        shell_instance(
            &f.store,
            "Survival",
            "printf '\\377\\n'; echo ready; exec sleep 30",
            Some("^ready$"),
        )
        .await;

        let handle = f.supervisor.launch("Survival", "Alice").await.unwrap();
        assert_eq!(handle.status(), SessionStatus::Running);

        f.supervisor.kill("Survival").await.unwrap();
    }

    #[test]
    fn games_keep_writing_their_log_after_the_launcher_stops() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (f, pid) = runtime.block_on(async {
            let f = fixture(Settings::default()).await;
            shell_instance(
                &f.store,
                "Survival",
                "echo ready; sleep 0.5; echo still here; exec sleep 30",
                Some("^ready$"),
            )
            .await;
            let handle = f.supervisor.launch("Survival", "Alice").await.unwrap();
            (f, handle.pid.unwrap())
        });

        // Tears down every task the supervisor started
        drop(runtime);
        std::thread::sleep(Duration::from_millis(1500));

        let log = fs::read_to_string(f.store.dir_for("Survival").join("logs").join(LOG_FILE))
            .unwrap();
        assert!(log.contains("still here"), "log was: {log}");
        platform::kill_process(pid).unwrap();
    }

    #[tokio::test]
    async fn second_launch_is_rejected_while_running() {
        let f = fixture(Settings::default()).await;
        shell_instance(&f.store, "Survival", "exec sleep 30", None).await;

        f.supervisor.launch("Survival", "Alice").await.unwrap();
        let err = f.supervisor.launch("Survival", "Alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyRunning);

        f.supervisor.terminate("Survival", true).await.unwrap();
    }

    #[tokio::test]
    async fn exit_before_ready_is_a_launch_failure() {
        let f = fixture(Settings::default()).await;
        shell_instance(&f.store, "Crashy", "echo oops; exit 1", Some("never")).await;

        let err = f.supervisor.launch("Crashy", "Alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LaunchFailed);
        assert!(!f.supervisor.is_active("Crashy"));

        // A failed session does not block the next attempt
        let err = f.supervisor.launch("Crashy", "Alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LaunchFailed);
    }

    #[tokio::test]
    async fn missing_program_leaves_no_session() {
        let f = fixture(Settings::default()).await;
        f.store.create("Broken", "1.21.5", None).await.unwrap();
        std::fs::write(
            f.store.dir_for("Broken").join(PROFILE_FILE),
            r#"{"program": "/definitely/not/here"}"#,
        )
        .unwrap();

        let err = f.supervisor.launch("Broken", "Alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LaunchFailed);
        assert!(f.supervisor.status("Broken").is_none());
    }

    #[tokio::test]
    async fn readiness_timeout_keeps_session_starting() {
        let settings = Settings {
            launch_timeout_secs: 1,
            ..Settings::default()
        };
        let f = fixture(settings).await;
        shell_instance(&f.store, "Slow", "exec sleep 30", Some("never")).await;

        let err = f.supervisor.launch("Slow", "Alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(
            f.supervisor.status("Slow").unwrap().status,
            SessionStatus::Starting
        );

        f.supervisor.kill("Slow").await.unwrap();
        assert!(!f.supervisor.is_active("Slow"));
    }

    #[tokio::test]
    async fn unknown_or_idle_instances_are_not_running() {
        let f = fixture(Settings::default()).await;
        let err = f.supervisor.launch("Ghost", "Alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = f.supervisor.terminate("Ghost", false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotRunning);
    }

    #[tokio::test]
    async fn stop_all_terminates_every_session() {
        let f = fixture(Settings::default()).await;
        shell_instance(&f.store, "A", "exec sleep 30", None).await;
        shell_instance(&f.store, "B", "exec sleep 30", None).await;
        f.supervisor.launch("A", "Alice").await.unwrap();
        f.supervisor.launch("B", "Alice").await.unwrap();
        assert_eq!(f.supervisor.active_count(), 2);

        f.supervisor.stop_all().await;
        assert_eq!(f.supervisor.active_count(), 0);
    }
}
