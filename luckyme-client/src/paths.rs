use std::path::{Path, PathBuf};

pub const DAEMON_PID_FILE: &str = "daemon.pid";
pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const DAEMON_LOG: &str = "daemon.log";
pub const DAEMON_STATE_DB: &str = "daemon.db";
pub const CONFIG_FILE: &str = "config.yaml";

pub fn luckyme_root(home: &Path) -> PathBuf {
    home.join(".luckyme")
}

pub fn pid_file_path(home: &Path) -> PathBuf {
    luckyme_root(home).join(DAEMON_PID_FILE)
}

pub fn socket_path(home: &Path) -> PathBuf {
    luckyme_root(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    luckyme_root(home).join("logs")
}

pub fn daemon_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_LOG)
}

pub fn daemon_state_path(home: &Path) -> PathBuf {
    luckyme_root(home).join(DAEMON_STATE_DB)
}

pub fn backups_dir(home: &Path) -> PathBuf {
    luckyme_root(home).join("backups")
}

pub fn config_path(home: &Path) -> PathBuf {
    luckyme_root(home).join(CONFIG_FILE)
}

/// Files backed up before every daemon (re)launch.
pub fn rotated_files(home: &Path) -> Vec<PathBuf> {
    vec![daemon_log_path(home), daemon_state_path(home)]
}
