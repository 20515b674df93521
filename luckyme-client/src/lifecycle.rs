//! Detecting, starting, and restarting the daemon process.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use luckyme_core::{io_err, ClientError, DaemonStatus};

use crate::paths::pid_file_path;

pub const DEFAULT_SPAWN_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Query and launch operations on the daemon.
pub trait DaemonControl: Send + Sync {
    /// Non-blocking status query.
    fn status(&self) -> DaemonStatus;

    /// Launch the daemon and wait until it is reachable.
    ///
    /// `on_progress` receives the elapsed milliseconds on every poll; a
    /// negative return cancels the wait. Returns `true` once the daemon is
    /// running, including when something else started it concurrently.
    fn spawn(&self, on_progress: &mut dyn FnMut(u64) -> i32) -> bool;
}

/// Daemon started as a child process and tracked through its pid file.
pub struct ProcessDaemon {
    program: PathBuf,
    args: Vec<String>,
    pid_file: PathBuf,
    spawn_timeout: Duration,
    poll_interval: Duration,
    child: Mutex<Option<Child>>,
}

impl ProcessDaemon {
    pub fn new(binary: impl Into<PathBuf>, home: &Path) -> Self {
        Self {
            program: binary.into(),
            args: vec!["-d".to_string()],
            pid_file: pid_file_path(home),
            spawn_timeout: DEFAULT_SPAWN_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            child: Mutex::new(None),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_spawn_timeout(mut self, timeout: Duration) -> Self {
        self.spawn_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Pid recorded by the daemon, if the pid file is readable.
    pub fn pid(&self) -> Option<u32> {
        read_pid(&self.pid_file).ok().flatten()
    }

    /// True when the launched child already exited with a failure status.
    fn child_failed(&self) -> bool {
        let mut guard = self.child.lock();
        let Some(child) = guard.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                *guard = None;
                if status.success() {
                    false
                } else {
                    tracing::error!(%status, "daemon process exited during startup");
                    true
                }
            }
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(error = %err, "could not poll daemon process");
                false
            }
        }
    }
}

impl DaemonControl for ProcessDaemon {
    fn status(&self) -> DaemonStatus {
        read_status(&self.pid_file)
    }

    fn spawn(&self, on_progress: &mut dyn FnMut(u64) -> i32) -> bool {
        if self.status() == DaemonStatus::Running {
            return true;
        }

        tracing::info!(program = %self.program.display(), "launching daemon");
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match child {
            Ok(child) => *self.child.lock() = Some(child),
            Err(err) => {
                tracing::error!(program = %self.program.display(), error = %err, "daemon launch failed");
                return false;
            }
        }

        let started = Instant::now();
        loop {
            sleep(self.poll_interval);
            let elapsed = started.elapsed();
            if on_progress(elapsed.as_millis() as u64) < 0 {
                tracing::info!("daemon launch wait cancelled");
                return false;
            }
            if self.status() == DaemonStatus::Running {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "daemon is running");
                return true;
            }
            if self.child_failed() {
                return false;
            }
            if elapsed >= self.spawn_timeout {
                tracing::error!(timeout_secs = self.spawn_timeout.as_secs(), "daemon did not start in time");
                return false;
            }
        }
    }
}

/// Derive the daemon status from its pid file.
pub fn read_status(pid_file: &Path) -> DaemonStatus {
    match read_pid(pid_file) {
        Ok(None) => DaemonStatus::NotRunning,
        Ok(Some(pid)) if process_alive(pid) => DaemonStatus::Running,
        Ok(Some(_)) => DaemonStatus::Crashed,
        Err(err) => {
            tracing::warn!(path = %pid_file.display(), error = %err, "unreadable daemon pid file");
            DaemonStatus::Error
        }
    }
}

fn read_pid(pid_file: &Path) -> Result<Option<u32>, ClientError> {
    let raw = match fs::read_to_string(pid_file) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(pid_file, err)),
    };
    match raw.trim().parse::<u32>() {
        Ok(pid) if pid > 0 => Ok(Some(pid)),
        _ => Err(ClientError::Daemon(format!(
            "pid file {} does not contain a pid",
            pid_file.display()
        ))),
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn process_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    AlreadyRunning,
    Started,
    /// A crashed daemon was relaunched.
    Restarted,
}

/// Make sure the daemon is running, launching it if needed.
///
/// `before_launch` runs before every (re)launch and is where daemon files get
/// backed up. A crashed daemon gets exactly one relaunch. An `Error` status is
/// returned to the caller untouched.
pub fn ensure_running(
    control: &dyn DaemonControl,
    mut before_launch: impl FnMut(),
    on_progress: &mut dyn FnMut(u64) -> i32,
) -> Result<LaunchOutcome, ClientError> {
    let (outcome, failure) = match control.status() {
        DaemonStatus::Running => return Ok(LaunchOutcome::AlreadyRunning),
        DaemonStatus::NotRunning => (LaunchOutcome::Started, "daemon did not start"),
        DaemonStatus::Crashed => {
            tracing::warn!("daemon quit without cleaning up, relaunching once");
            (LaunchOutcome::Restarted, "daemon did not restart after a crash")
        }
        DaemonStatus::Error => {
            return Err(ClientError::Daemon(
                "daemon status could not be determined".to_string(),
            ))
        }
    };

    before_launch();
    if control.spawn(on_progress) || control.status() == DaemonStatus::Running {
        tracing::info!(?outcome, "daemon ready");
        Ok(outcome)
    } else {
        Err(ClientError::DaemonSpawnFailed(failure.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackDaemon;
    use tempfile::TempDir;

    fn no_progress() -> impl FnMut(u64) -> i32 {
        |_| 0
    }

    #[test]
    fn status_follows_pid_file() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("daemon.pid");
        assert_eq!(read_status(&pid_file), DaemonStatus::NotRunning);

        fs::write(&pid_file, format!("{}\n", std::process::id())).unwrap();
        assert_eq!(read_status(&pid_file), DaemonStatus::Running);

        fs::write(&pid_file, "not-a-pid").unwrap();
        assert_eq!(read_status(&pid_file), DaemonStatus::Error);

        fs::write(&pid_file, "").unwrap();
        assert_eq!(read_status(&pid_file), DaemonStatus::Error);
    }

    #[test]
    fn dead_pid_reads_as_crashed() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("daemon.pid");
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        fs::write(&pid_file, pid.to_string()).unwrap();
        assert_eq!(read_status(&pid_file), DaemonStatus::Crashed);
    }

    #[test]
    fn running_daemon_is_left_alone() {
        let daemon = LoopbackDaemon::new();
        let mut backups = 0;
        let outcome = ensure_running(&daemon, || backups += 1, &mut no_progress()).unwrap();
        assert_eq!(outcome, LaunchOutcome::AlreadyRunning);
        assert_eq!(backups, 0);
        assert_eq!(daemon.spawn_count(), 0);
    }

    #[test]
    fn stopped_daemon_is_started_after_backup() {
        let daemon = LoopbackDaemon::new().with_status(DaemonStatus::NotRunning);
        let mut backups = 0;
        let outcome = ensure_running(&daemon, || backups += 1, &mut no_progress()).unwrap();
        assert_eq!(outcome, LaunchOutcome::Started);
        assert_eq!(backups, 1);
        assert_eq!(daemon.status(), DaemonStatus::Running);
    }

    #[test]
    fn crashed_daemon_gets_one_respawn() {
        let daemon = LoopbackDaemon::new()
            .with_status(DaemonStatus::Crashed)
            .fail_spawns();
        let err = ensure_running(&daemon, || {}, &mut no_progress()).unwrap_err();
        assert!(matches!(err, ClientError::DaemonSpawnFailed(_)));
        assert_eq!(daemon.spawn_count(), 1);

        let daemon = LoopbackDaemon::new().with_status(DaemonStatus::Crashed);
        let outcome = ensure_running(&daemon, || {}, &mut no_progress()).unwrap();
        assert_eq!(outcome, LaunchOutcome::Restarted);
    }

    #[test]
    fn error_status_is_not_recovered() {
        let daemon = LoopbackDaemon::new().with_status(DaemonStatus::Error);
        let err = ensure_running(&daemon, || {}, &mut no_progress()).unwrap_err();
        assert!(matches!(err, ClientError::Daemon(_)));
        assert_eq!(daemon.spawn_count(), 0);
    }

    #[test]
    fn negative_progress_cancels_the_spawn() {
        let daemon = LoopbackDaemon::new().with_status(DaemonStatus::NotRunning);
        let mut cancel = |_: u64| -1;
        assert!(!daemon.spawn(&mut cancel));
        assert_eq!(daemon.status(), DaemonStatus::NotRunning);
    }

    #[test]
    fn process_daemon_spawns_until_pid_file_is_live() {
        let home = TempDir::new().unwrap();
        let pid_file = pid_file_path(home.path());
        let script = home.path().join("fake-daemon.sh");
        fs::write(
            &script,
            format!(
                "mkdir -p '{dir}'\necho $$ > '{pid}'\nexec sleep 2\n",
                dir = pid_file.parent().unwrap().display(),
                pid = pid_file.display()
            ),
        )
        .unwrap();

        let daemon = ProcessDaemon::new("/bin/sh", home.path())
            .with_args([script.display().to_string(), "-d".to_string()])
            .with_poll_interval(Duration::from_millis(50))
            .with_spawn_timeout(Duration::from_secs(5));
        assert_eq!(daemon.status(), DaemonStatus::NotRunning);

        let mut polls = Vec::new();
        assert!(daemon.spawn(&mut |elapsed| {
            polls.push(elapsed);
            0
        }));
        assert_eq!(daemon.status(), DaemonStatus::Running);
        assert!(!polls.is_empty());
        assert!(daemon.pid().is_some());
    }

    #[test]
    fn process_daemon_reports_missing_binary() {
        let home = TempDir::new().unwrap();
        let daemon = ProcessDaemon::new(home.path().join("no-such-daemon"), home.path())
            .with_poll_interval(Duration::from_millis(10));
        assert!(!daemon.spawn(&mut no_progress()));
    }
}
