use std::path::{Path, PathBuf};
use std::time::Duration;

use statusfeed_core::config;
use statusfeed_sync::history;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

pub const DAEMON_SOCKET: &str = "statusfeed.sock";

pub fn statusfeed_root(home: &Path) -> PathBuf {
    config::root_at(home)
}

pub fn config_path(home: &Path) -> PathBuf {
    config::config_path_at(home)
}

pub fn history_path(home: &Path) -> PathBuf {
    history::history_path_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    statusfeed_root(home).join(DAEMON_SOCKET)
}
