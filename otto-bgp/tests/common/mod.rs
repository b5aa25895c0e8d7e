//! Shared doubles for the end-to-end pipeline scenarios: an SSH session
//! serving canned router configs, a deterministic bgpq4 runner, and a
//! scripted NETCONF session.

use async_trait::async_trait;
use otto_bgp::bgpq4::{Bgpq4Error, CommandOutput, CommandRunner, ExecutableData};
use otto_bgp::collector::{CollectionError, SshSession};
use otto_bgp::config::Config;
use otto_bgp::inventory::DeviceInfo;
use otto_bgp::netconf::{NetconfError, NetconfSession};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Serves one canned `show` output per hostname; hostnames absent from the
/// map fail with the configured error.
pub struct CannedSshSession {
    pub configs: Arc<BTreeMap<String, Result<String, CollectionError>>>,
    connected: Option<String>,
}

impl CannedSshSession {
    pub fn factory(
        configs: BTreeMap<String, Result<String, CollectionError>>,
    ) -> Arc<dyn Fn() -> Box<dyn SshSession> + Send + Sync> {
        let configs = Arc::new(configs);
        Arc::new(move || {
            Box::new(CannedSshSession {
                configs: Arc::clone(&configs),
                connected: None,
            }) as Box<dyn SshSession>
        })
    }
}

#[async_trait]
impl SshSession for CannedSshSession {
    async fn connect(&mut self, device: &DeviceInfo) -> Result<(), CollectionError> {
        match self.configs.get(&device.hostname) {
            Some(Ok(_)) => {
                self.connected = Some(device.hostname.clone());
                Ok(())
            }
            Some(Err(err)) => Err(err.clone()),
            None => Err(CollectionError::TransportError {
                hostname: device.hostname.clone(),
                detail: "unknown device".to_string(),
            }),
        }
    }

    async fn run_command(&mut self, _command: &str) -> Result<String, CollectionError> {
        let hostname = self.connected.clone().unwrap_or_default();
        match self.configs.get(&hostname) {
            Some(Ok(config)) => Ok(config.clone()),
            _ => Ok(String::new()),
        }
    }

    async fn close(&mut self) {}
}

/// Emits one deterministic prefix-list per AS; specific AS numbers can be
/// overridden to produce poisoned output (bogons) or failures.
pub struct ScriptedRunner {
    pub overrides: BTreeMap<u32, String>,
}

impl ScriptedRunner {
    pub fn plain() -> Arc<dyn CommandRunner> {
        Arc::new(Self {
            overrides: BTreeMap::new(),
        })
    }

    pub fn with_override(as_number: u32, juniper_text: &str) -> Arc<dyn CommandRunner> {
        let mut overrides = BTreeMap::new();
        overrides.insert(as_number, juniper_text.to_string());
        Arc::new(Self { overrides })
    }

    fn default_policy(as_number: u32) -> String {
        // Stable mapping from AS number into the 198.51.100.0/24 range's
        // neighbours keeps outputs deterministic and bogon-free.
        format!(
            "policy-options {{\nreplace:\nprefix-list AS{as_number} {{\n    198.51.{}.0/24;\n}}\n}}\n",
            as_number % 100
        )
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        executable: &ExecutableData,
        _timeout: Duration,
    ) -> Result<CommandOutput, Bgpq4Error> {
        let as_arg = executable
            .args
            .iter()
            .rev()
            .find(|arg| arg.starts_with("AS"))
            .cloned()
            .unwrap_or_default();
        let as_number: u32 = as_arg.trim_start_matches("AS").parse().unwrap_or(0);

        let stdout = self
            .overrides
            .get(&as_number)
            .cloned()
            .unwrap_or_else(|| Self::default_policy(as_number));
        Ok(CommandOutput {
            success: true,
            stdout,
            stderr: String::new(),
        })
    }

    async fn probe(&self, bin: &str) -> bool {
        bin == "bgpq4"
    }
}

/// Scripted NETCONF session: succeeds every step (unless the health probe
/// is scripted to fail) and records the order.
#[derive(Default)]
pub struct ScriptedNetconfSession {
    pub log: Arc<Mutex<Vec<String>>>,
    pub health_should_fail: bool,
}

#[async_trait]
impl NetconfSession for ScriptedNetconfSession {
    async fn connect(&mut self, host: &str, _port: u16, _username: &str) -> Result<(), NetconfError> {
        self.log.lock().unwrap().push(format!("connect {host}"));
        Ok(())
    }

    async fn load_candidate(&mut self, _xml: &str) -> Result<(), NetconfError> {
        self.log.lock().unwrap().push("load".to_string());
        Ok(())
    }

    async fn diff(&mut self) -> Result<String, NetconfError> {
        self.log.lock().unwrap().push("diff".to_string());
        Ok("[edit policy-options]\n+  prefix-list ...".to_string())
    }

    async fn commit_confirmed(&mut self, _window: Duration) -> Result<String, NetconfError> {
        self.log.lock().unwrap().push("commit-confirmed".to_string());
        Ok("re0-1000".to_string())
    }

    async fn health_check(&mut self) -> Result<(), NetconfError> {
        self.log.lock().unwrap().push("health".to_string());
        if self.health_should_fail {
            Err(NetconfError::Rpc("bgp summary unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    async fn confirm_commit(&mut self) -> Result<(), NetconfError> {
        self.log.lock().unwrap().push("confirm".to_string());
        Ok(())
    }

    async fn cancel_commit(&mut self) -> Result<(), NetconfError> {
        self.log.lock().unwrap().push("cancel".to_string());
        Ok(())
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().push("close".to_string());
    }
}

pub fn device(hostname: &str, address: &str) -> DeviceInfo {
    DeviceInfo {
        address: address.to_string(),
        hostname: hostname.to_string(),
        username: None,
        port: 22,
        role: None,
        region: None,
    }
}

pub fn router_config(peers: &[(&str, u32)]) -> String {
    let mut neighbors = String::new();
    for (idx, (group, asn)) in peers.iter().enumerate() {
        neighbors.push_str(&format!(
            "        group {group} {{\n            neighbor 192.0.2.{idx} {{\n                peer-as {asn};\n            }}\n        }}\n"
        ));
    }
    format!("protocols {{\n    bgp {{\n{neighbors}    }}\n}}\n")
}

/// Autonomous-mode test config with instant health-check windows.
pub fn autonomous_config(output_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.autonomous.enabled = true;
    config.netconf.monitor_window = Duration::from_millis(0);
    config.bgpq4.mode = otto_bgp::config::Bgpq4Mode::Native;
    config.output_dir = output_dir.to_path_buf();
    config
}
