//! Three typed snapshots (defaults, JSON overlay, environment overlay)
//! merged field-by-field with `env > json > defaults` precedence,
//! last-writer-wins.

use super::{
    Bgpq4Mode, Config, ConfigError, InstallationMode, OptimizationLevel, ProxyConfig,
    RedactedString,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A partial configuration document: every field is optional so a JSON
/// overlay can specify only what it wants to change. Field names mirror
/// `Config` one-to-one. Unknown keys warn rather than fail.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigOverlay {
    pub installation_mode: Option<InstallationMode>,
    pub optimization_level: Option<OptimizationLevel>,
    pub config_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub ssh: Option<SshOverlay>,
    pub netconf: Option<NetconfOverlay>,
    pub bgpq4: Option<Bgpq4Overlay>,
    pub rpki: Option<RpkiOverlay>,
    pub guardrails: Option<GuardrailOverlay>,
    pub autonomous: Option<AutonomousOverlay>,
    pub smtp: Option<SmtpOverlay>,
    pub proxy: Option<ProxyConfig>,
    pub max_bgp_config_size_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SshOverlay {
    pub username: Option<String>,
    pub key_path: Option<PathBuf>,
    pub password_auth_allowed: Option<bool>,
    pub password: Option<String>,
    pub parallel_workers: Option<usize>,
    pub command_timeout_secs: Option<u64>,
    pub session_timeout_secs: Option<u64>,
    pub retry_attempts: Option<usize>,
    pub known_hosts_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
pub struct NetconfOverlay {
    pub username: Option<String>,
    pub port: Option<u16>,
    pub confirm_window_secs: Option<u64>,
    pub monitor_window_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Bgpq4Overlay {
    pub mode: Option<Bgpq4Mode>,
    pub timeout_secs: Option<u64>,
    pub workers: Option<usize>,
    pub workers_proxy: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RpkiOverlay {
    pub enabled: Option<bool>,
    pub cache_dir: Option<PathBuf>,
    pub max_age_secs: Option<u64>,
    pub allowlist: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct GuardrailOverlay {
    pub prefix_change_ratio_system: Option<f64>,
    pub prefix_change_ratio_autonomous: Option<f64>,
    pub session_impact_percent: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AutonomousOverlay {
    pub enabled: Option<bool>,
    pub auto_apply_threshold: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SmtpOverlay {
    pub enabled: Option<bool>,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    pub to: Option<Vec<String>>,
    pub cc: Option<Vec<String>>,
    pub subject_prefix: Option<String>,
}

pub struct ConfigStore;

impl ConfigStore {
    /// Load `Config`, overlaying an optional JSON document on top of
    /// defaults, then overlaying environment variables on top of that.
    /// Validates the merged result and never re-reads afterward.
    pub fn load(json_path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if let Some(path) = json_path {
            if path.exists() {
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                warn_on_unknown_keys(&contents, path);
                let overlay: ConfigOverlay =
                    serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
                        path: path.to_path_buf(),
                        source,
                    })?;
                apply_json_overlay(&mut config, overlay);
            }
        }

        apply_env_overlay(&mut config);
        config.validate()?;
        Ok(config)
    }
}

fn warn_on_unknown_keys(contents: &str, path: &Path) {
    const KNOWN_TOP_LEVEL: &[&str] = &[
        "installation_mode",
        "optimization_level",
        "config_dir",
        "data_dir",
        "output_dir",
        "ssh",
        "netconf",
        "bgpq4",
        "rpki",
        "guardrails",
        "autonomous",
        "smtp",
        "proxy",
        "max_bgp_config_size_bytes",
    ];
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(contents)
    {
        for key in map.keys() {
            if !KNOWN_TOP_LEVEL.contains(&key.as_str()) {
                tracing::warn!(path = %path.display(), key, "unknown key in JSON config, ignoring");
            }
        }
    }
}

fn apply_json_overlay(config: &mut Config, overlay: ConfigOverlay) {
    macro_rules! set {
        ($field:expr, $value:expr) => {
            if let Some(value) = $value {
                $field = value;
            }
        };
    }
    macro_rules! set_opt {
        ($field:expr, $value:expr) => {
            if let Some(value) = $value {
                $field = Some(value);
            }
        };
    }

    set!(config.installation_mode, overlay.installation_mode);
    set!(config.optimization_level, overlay.optimization_level);
    set!(config.config_dir, overlay.config_dir);
    set!(config.data_dir, overlay.data_dir);
    set!(config.output_dir, overlay.output_dir);
    set!(
        config.max_bgp_config_size,
        overlay.max_bgp_config_size_bytes.map(Into::into)
    );
    set!(config.proxy, overlay.proxy);

    if let Some(ssh) = overlay.ssh {
        set_opt!(config.ssh.username, ssh.username);
        set_opt!(config.ssh.key_path, ssh.key_path);
        set!(config.ssh.password_auth_allowed, ssh.password_auth_allowed);
        set_opt!(config.ssh.password, ssh.password);
        set!(config.ssh.parallel_workers, ssh.parallel_workers);
        set!(
            config.ssh.command_timeout,
            ssh.command_timeout_secs.map(Duration::from_secs)
        );
        set!(
            config.ssh.session_timeout,
            ssh.session_timeout_secs.map(Duration::from_secs)
        );
        set!(config.ssh.retry_attempts, ssh.retry_attempts);
        set_opt!(config.ssh.known_hosts_path, ssh.known_hosts_path);
    }

    if let Some(netconf) = overlay.netconf {
        set_opt!(config.netconf.username, netconf.username);
        set!(config.netconf.port, netconf.port);
        set!(
            config.netconf.confirm_window,
            netconf.confirm_window_secs.map(Duration::from_secs)
        );
        set!(
            config.netconf.monitor_window,
            netconf.monitor_window_secs.map(Duration::from_secs)
        );
    }

    if let Some(bgpq4) = overlay.bgpq4 {
        set!(config.bgpq4.mode, bgpq4.mode);
        set!(config.bgpq4.timeout, bgpq4.timeout_secs.map(Duration::from_secs));
        set!(config.bgpq4.workers, bgpq4.workers);
        set!(config.bgpq4.workers_proxy, bgpq4.workers_proxy);
    }

    if let Some(rpki) = overlay.rpki {
        set!(config.rpki.enabled, rpki.enabled);
        set_opt!(config.rpki.cache_dir, rpki.cache_dir);
        set!(config.rpki.max_age, rpki.max_age_secs.map(Duration::from_secs));
        set!(config.rpki.allowlist, rpki.allowlist);
    }

    if let Some(guardrails) = overlay.guardrails {
        set!(
            config.guardrails.prefix_change_ratio_system,
            guardrails.prefix_change_ratio_system
        );
        set!(
            config.guardrails.prefix_change_ratio_autonomous,
            guardrails.prefix_change_ratio_autonomous
        );
        set!(
            config.guardrails.session_impact_percent,
            guardrails.session_impact_percent
        );
    }

    if let Some(autonomous) = overlay.autonomous {
        set!(config.autonomous.enabled, autonomous.enabled);
        set!(
            config.autonomous.auto_apply_threshold,
            autonomous.auto_apply_threshold.map(Into::into)
        );
    }

    if let Some(smtp) = overlay.smtp {
        set!(config.smtp.enabled, smtp.enabled);
        set_opt!(config.smtp.server, smtp.server);
        set!(config.smtp.port, smtp.port);
        set!(config.smtp.tls, smtp.tls);
        set_opt!(config.smtp.username, smtp.username);
        set_opt!(config.smtp.password, smtp.password.map(RedactedString));
        set_opt!(config.smtp.from, smtp.from);
        set!(config.smtp.to, smtp.to);
        set!(config.smtp.cc, smtp.cc);
        set!(config.smtp.subject_prefix, smtp.subject_prefix);
    }
}

fn apply_env_overlay(config: &mut Config) {
    use std::env;

    if let Ok(v) = env::var("OTTO_BGP_CONFIG_DIR") {
        config.config_dir = PathBuf::from(v);
    }
    if let Ok(v) = env::var("OTTO_BGP_DATA_DIR") {
        config.data_dir = PathBuf::from(v);
    }
    if let Ok(v) = env::var("SSH_USERNAME") {
        config.ssh.username = Some(v);
    }
    if let Ok(v) = env::var("SSH_KEY_PATH") {
        config.ssh.key_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = env::var("NETCONF_USERNAME") {
        config.netconf.username = Some(v);
    }
    if let Ok(v) = env::var("NETCONF_PORT") {
        if let Ok(port) = v.parse() {
            config.netconf.port = port;
        }
    }
    // Recipients are deliberately JSON-only; env can point at a different
    // relay but cannot grow the audience of autonomous-mode mail.
    if let Ok(v) = env::var("OTTO_BGP_SMTP_SERVER") {
        config.smtp.server = Some(v);
        config.smtp.enabled = true;
    }
    if let Ok(v) = env::var("OTTO_BGP_SMTP_PORT") {
        if let Ok(port) = v.parse() {
            config.smtp.port = port;
        }
    }
    if let Ok(v) = env::var("OTTO_BGP_SMTP_TLS") {
        config.smtp.tls = parse_bool(&v);
    }
    if let Ok(v) = env::var("OTTO_BGP_SMTP_FROM") {
        config.smtp.from = Some(v);
    }
    if let Ok(v) = env::var("OTTO_BGP_SMTP_USERNAME") {
        config.smtp.username = Some(v);
    }
    if let Ok(v) = env::var("OTTO_BGP_SMTP_PASSWORD") {
        config.smtp.password = Some(RedactedString(v));
    }
    if let Ok(v) = env::var("OTTO_BGP_AUTONOMOUS_ENABLED") {
        config.autonomous.enabled = parse_bool(&v);
    }
    if let Ok(v) = env::var("OTTO_BGP_AUTO_APPLY_THRESHOLD") {
        if let Ok(threshold) = v.parse::<u32>() {
            config.autonomous.auto_apply_threshold = threshold.into();
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
