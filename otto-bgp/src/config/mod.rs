pub mod defaults;
pub mod store;

use otto_bgp_macros::WrapperWithDefault;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Informational operator context echoed into notifications; never a gate
/// on `should_auto_apply`. See DESIGN.md Open Question #3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, WrapperWithDefault)]
#[wrapper_default_value(defaults::DEFAULT_AUTO_APPLY_THRESHOLD)]
pub struct AutoApplyThreshold(u32);

/// Upper bound on collected raw BGP configuration text per router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, WrapperWithDefault)]
#[wrapper_default_value(defaults::DEFAULT_MAX_CONFIG_SIZE_BYTES)]
pub struct MaxBgpConfigSize(usize);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("cross-field validation failed: {0}")]
    CrossField(&'static str),
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse JSON config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationMode {
    User,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    Basic,
    Enhanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bgpq4Mode {
    Native,
    Docker,
    Podman,
    Auto,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    pub username: Option<String>,
    pub key_path: Option<PathBuf>,
    pub password_auth_allowed: bool,
    pub password: Option<String>,
    pub parallel_workers: usize,
    pub command_timeout: Duration,
    pub session_timeout: Duration,
    pub retry_attempts: usize,
    pub known_hosts_path: Option<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            username: None,
            key_path: None,
            password_auth_allowed: false,
            password: None,
            parallel_workers: defaults::DEFAULT_SSH_PARALLEL_WORKERS,
            command_timeout: defaults::DEFAULT_SSH_COMMAND_TIMEOUT,
            session_timeout: defaults::DEFAULT_SSH_SESSION_TIMEOUT,
            retry_attempts: defaults::DEFAULT_SSH_RETRY_ATTEMPTS,
            known_hosts_path: None,
        }
    }
}

impl fmt::Debug for RedactedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted>")
    }
}

/// Wrapper that prints `<redacted>` in `Debug` output; used for any field
/// that must never land in logs.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct RedactedString(pub String);

#[derive(Debug, Clone, Deserialize)]
pub struct NetconfConfig {
    pub username: Option<String>,
    pub port: u16,
    pub confirm_window: Duration,
    pub monitor_window: Duration,
}

impl Default for NetconfConfig {
    fn default() -> Self {
        Self {
            username: None,
            port: defaults::DEFAULT_NETCONF_PORT,
            confirm_window: defaults::DEFAULT_NETCONF_CONFIRM_WINDOW,
            monitor_window: defaults::DEFAULT_NETCONF_MONITOR_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Bgpq4Config {
    pub mode: Bgpq4Mode,
    pub timeout: Duration,
    pub workers: usize,
    pub workers_proxy: usize,
}

impl Default for Bgpq4Config {
    fn default() -> Self {
        Self {
            mode: Bgpq4Mode::Auto,
            timeout: defaults::DEFAULT_BGPQ4_TIMEOUT,
            workers: defaults::DEFAULT_BGPQ4_WORKERS,
            workers_proxy: defaults::DEFAULT_BGPQ4_WORKERS_PROXY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpkiConfig {
    pub enabled: bool,
    pub cache_dir: Option<PathBuf>,
    pub max_age: Duration,
    pub allowlist: Vec<String>,
}

impl Default for RpkiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_dir: None,
            max_age: defaults::DEFAULT_RPKI_MAX_AGE,
            allowlist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardrailConfig {
    pub prefix_change_ratio_system: f64,
    pub prefix_change_ratio_autonomous: f64,
    pub session_impact_percent: f64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            prefix_change_ratio_system: defaults::DEFAULT_PREFIX_CHANGE_RATIO_SYSTEM,
            prefix_change_ratio_autonomous: defaults::DEFAULT_PREFIX_CHANGE_RATIO_AUTONOMOUS,
            session_impact_percent: 20.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AutonomousConfig {
    pub enabled: bool,
    pub auto_apply_threshold: AutoApplyThreshold,
}

#[derive(Clone, Deserialize)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub server: Option<String>,
    pub port: u16,
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<RedactedString>,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject_prefix: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server: None,
            port: defaults::DEFAULT_SMTP_PORT,
            tls: true,
            username: None,
            password: None,
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            subject_prefix: defaults::DEFAULT_SMTP_SUBJECT_PREFIX.to_string(),
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("enabled", &self.enabled)
            .field("server", &self.server)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .field("to", &self.to)
            .field("cc", &self.cc)
            .field("subject_prefix", &self.subject_prefix)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TunnelSpec {
    pub name: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub jump_host: Option<String>,
    pub jump_user: Option<String>,
    pub key_file: Option<PathBuf>,
    pub known_hosts_file: Option<PathBuf>,
    pub tunnels: Vec<TunnelSpec>,
}

/// Immutable, fully-validated configuration snapshot. Built once by
/// `ConfigStore::load` and never re-read mid-run.
#[derive(Debug, Clone)]
pub struct Config {
    pub installation_mode: InstallationMode,
    pub optimization_level: OptimizationLevel,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub ssh: SshConfig,
    pub netconf: NetconfConfig,
    pub bgpq4: Bgpq4Config,
    pub rpki: RpkiConfig,
    pub guardrails: GuardrailConfig,
    pub autonomous: AutonomousConfig,
    pub smtp: SmtpConfig,
    pub proxy: ProxyConfig,
    pub max_bgp_config_size: MaxBgpConfigSize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = defaults::default_data_dir();
        Self {
            installation_mode: InstallationMode::User,
            optimization_level: OptimizationLevel::Basic,
            config_dir: defaults::default_config_dir(),
            output_dir: data_dir.join(defaults::FOLDER_NAME_POLICIES),
            data_dir,
            ssh: SshConfig::default(),
            netconf: NetconfConfig::default(),
            bgpq4: Bgpq4Config::default(),
            rpki: RpkiConfig::default(),
            guardrails: GuardrailConfig::default(),
            autonomous: AutonomousConfig::default(),
            smtp: SmtpConfig::default(),
            proxy: ProxyConfig::default(),
            max_bgp_config_size: MaxBgpConfigSize::default(),
        }
    }
}

impl Config {
    /// Cross-field and range validation performed once, at startup, before
    /// any side effect.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if u32::from(self.autonomous.auto_apply_threshold) < 1 {
            return Err(ConfigError::InvalidValue {
                field: "autonomous.auto_apply_threshold",
                value: u32::from(self.autonomous.auto_apply_threshold).to_string(),
                reason: "must be >= 1",
            });
        }

        if self.ssh.parallel_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ssh.parallel_workers",
                value: "0".to_string(),
                reason: "must be >= 1",
            });
        }

        if self.autonomous.enabled && self.smtp.enabled {
            if self.smtp.server.as_deref().unwrap_or("").is_empty() {
                return Err(ConfigError::CrossField(
                    "autonomous mode with email enabled requires smtp.server",
                ));
            }
            if self.smtp.to.is_empty() {
                return Err(ConfigError::CrossField(
                    "autonomous mode with email enabled requires a non-empty smtp.to recipient list",
                ));
            }
        }

        // Containerized bgpq4 cannot reach host-bound tunnel ports.
        if self.proxy.enabled
            && !self.proxy.tunnels.is_empty()
            && matches!(self.bgpq4.mode, Bgpq4Mode::Docker | Bgpq4Mode::Podman)
        {
            return Err(ConfigError::CrossField(
                "proxy tunnels require bgpq4.mode native (or auto resolving to native)",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn threshold_default_comes_from_named_constant() {
        assert_eq!(
            u32::from(AutoApplyThreshold::default()),
            defaults::DEFAULT_AUTO_APPLY_THRESHOLD
        );
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let mut config = Config::default();
        config.autonomous.auto_apply_threshold = 0u32.into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "autonomous.auto_apply_threshold", .. })
        ));
    }

    #[test]
    fn autonomous_email_without_recipients_is_rejected() {
        let mut config = Config::default();
        config.autonomous.enabled = true;
        config.smtp.enabled = true;
        config.smtp.server = Some("smtp.example.com".to_string());
        config.smtp.to = Vec::new();
        assert!(matches!(config.validate(), Err(ConfigError::CrossField(_))));
    }

    #[test]
    fn autonomous_email_without_server_is_rejected() {
        let mut config = Config::default();
        config.autonomous.enabled = true;
        config.smtp.enabled = true;
        config.smtp.to = vec!["ops@example.com".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::CrossField(_))));
    }

    #[test]
    fn container_bgpq4_with_proxy_tunnels_is_rejected() {
        let mut config = Config::default();
        config.bgpq4.mode = Bgpq4Mode::Docker;
        config.proxy.enabled = true;
        config.proxy.tunnels.push(TunnelSpec {
            name: "rs1".to_string(),
            local_port: 10043,
            remote_host: "rr.example.net".to_string(),
            remote_port: 43,
        });
        assert!(matches!(config.validate(), Err(ConfigError::CrossField(_))));
    }

    #[test]
    fn smtp_debug_redacts_password() {
        let mut smtp = SmtpConfig::default();
        smtp.password = Some(RedactedString("hunter2".to_string()));
        let rendered = format!("{smtp:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
