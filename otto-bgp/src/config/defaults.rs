//! Named defaults for every config field, referenced both by
//! `Config::default()` and by the `WrapperWithDefault` scalar wrappers so
//! each default lives in exactly one place.

use std::time::Duration;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SSH_PARALLEL_WORKERS: usize = 5;
pub const DEFAULT_SSH_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SSH_SESSION_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_SSH_RETRY_ATTEMPTS: usize = 3;

pub const DEFAULT_NETCONF_PORT: u16 = 830;
pub const DEFAULT_NETCONF_CONFIRM_WINDOW: Duration = Duration::from_secs(120);
pub const DEFAULT_NETCONF_MONITOR_WINDOW: Duration = Duration::from_secs(300);

pub const DEFAULT_BGPQ4_TIMEOUT: Duration = Duration::from_secs(45);
pub const DEFAULT_BGPQ4_WORKERS: usize = 5;
pub const DEFAULT_BGPQ4_WORKERS_PROXY: usize = 4;

pub const DEFAULT_RPKI_MAX_AGE: Duration = Duration::from_secs(86_400);

pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_SMTP_SUBJECT_PREFIX: &str = "[otto-bgp]";

pub const DEFAULT_PREFIX_CHANGE_RATIO_SYSTEM: f64 = 0.25;
pub const DEFAULT_PREFIX_CHANGE_RATIO_AUTONOMOUS: f64 = 0.10;

pub const DEFAULT_AUTO_APPLY_THRESHOLD: u32 = 100;

pub const DEFAULT_MAX_CONFIG_SIZE_BYTES: usize = 1024 * 1024;

#[cfg(target_os = "macos")]
pub fn default_data_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/local/var/otto-bgp")
}

#[cfg(not(target_os = "macos"))]
pub fn default_data_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/var/lib/otto-bgp")
}

pub fn default_config_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/etc/otto-bgp")
}

pub const FOLDER_NAME_POLICIES: &str = "policies";
