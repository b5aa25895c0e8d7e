//! Builds and runs `bgpq4` invocations to turn an AS number into a Juniper
//! prefix-list policy. Argv is always an explicit `Vec<String>`, never a
//! shell string, and execution goes through a `CommandRunner` trait so the
//! batch logic is testable without the binary installed.

use crate::config::{Bgpq4Config, Bgpq4Mode};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Semaphore;

fn policy_name_regex() -> Regex {
    Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap()
}

#[derive(Error, Debug, Clone)]
pub enum Bgpq4Error {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("bgpq4 invocation timed out after {0:?}")]
    Timeout(Duration),
    #[error("bgpq4 execution failed: {0}")]
    Execution(String),
    #[error("irr proxy unavailable: {0}")]
    ProxyUnavailable(String),
}

#[derive(Debug, Clone)]
pub struct PolicyArtifact {
    pub as_number: u32,
    pub policy_name: String,
    pub juniper_text: String,
    /// Name of the IRR proxy tunnel the query was routed through, if any.
    pub source_irr: Option<String>,
}

/// A single invocation's build inputs: binary plus an explicit argv list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableData {
    pub bin: String,
    pub args: Vec<String>,
}

impl ExecutableData {
    fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            args: Vec::new(),
        }
    }

    fn with_args(self, args: Vec<String>) -> Self {
        Self { args, ..self }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Executes a prepared argv with a wall-clock timeout. The production
/// implementation shells nothing: it spawns the argv directly.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        executable: &ExecutableData,
        timeout: Duration,
    ) -> Result<CommandOutput, Bgpq4Error>;

    /// True when `bin --version` exits successfully; used by `auto` mode
    /// probing.
    async fn probe(&self, bin: &str) -> bool;
}

pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        executable: &ExecutableData,
        timeout: Duration,
    ) -> Result<CommandOutput, Bgpq4Error> {
        let mut command = Command::new(&executable.bin);
        command
            .args(&executable.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| Bgpq4Error::Timeout(timeout))?
            .map_err(|err| Bgpq4Error::Execution(err.to_string()))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn probe(&self, bin: &str) -> bool {
        Command::new(bin)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

pub struct BGPq4Wrapper;

impl BGPq4Wrapper {
    pub fn validate_policy_name(name: &str) -> Result<(), Bgpq4Error> {
        if policy_name_regex().is_match(name) {
            Ok(())
        } else {
            Err(Bgpq4Error::Validation(format!("invalid policy name '{name}'")))
        }
    }

    pub fn validate_as_number(as_number: u64) -> Result<(), Bgpq4Error> {
        if as_number <= u32::MAX as u64 {
            Ok(())
        } else {
            Err(Bgpq4Error::Validation(format!(
                "as number {as_number} is out of range"
            )))
        }
    }

    /// Run one `bgpq4` invocation for `as_number`, named `policy_name`.
    /// `proxy`, when set, is the `(tunnel_name, local_port)` the query must
    /// be routed through.
    pub async fn generate_one(
        runner: &dyn CommandRunner,
        as_number: u32,
        policy_name: &str,
        config: &Bgpq4Config,
        proxy: Option<(&str, u16)>,
    ) -> Result<PolicyArtifact, Bgpq4Error> {
        Self::validate_policy_name(policy_name)?;

        let mode = resolve_mode(runner, config.mode).await?;
        if proxy.is_some() && !matches!(mode, ResolvedMode::Native) {
            // Containerized bgpq4 cannot reach host-bound tunnel ports.
            return Err(Bgpq4Error::ProxyUnavailable(
                "proxy tunnels require native bgpq4, not a container runtime".to_string(),
            ));
        }

        let executable = build_command(mode, policy_name, as_number, proxy.map(|(_, port)| port));
        let output = runner.run(&executable, config.timeout).await?;

        if !output.success {
            return Err(Bgpq4Error::Execution(output.stderr.trim().to_string()));
        }

        Ok(PolicyArtifact {
            as_number,
            policy_name: policy_name.to_string(),
            juniper_text: output.stdout,
            source_irr: proxy.map(|(name, _)| name.to_string()),
        })
    }

    /// Generate policies for every `(as_number, policy_name)` pair, bounded
    /// to `config.workers` (or `workers_proxy` under an active proxy).
    /// Per-AS failures are recorded, never abort the batch. Result order
    /// matches input order.
    pub async fn generate_batch(
        runner: Arc<dyn CommandRunner>,
        targets: &[(u32, String)],
        config: &Bgpq4Config,
        proxy_snapshot: Option<Arc<BTreeMap<String, u16>>>,
    ) -> Vec<Result<PolicyArtifact, Bgpq4Error>> {
        let worker_count = if proxy_snapshot.is_some() {
            config.workers_proxy.max(1)
        } else {
            config.workers.max(1)
        };
        let semaphore = Arc::new(Semaphore::new(worker_count));

        let mut handles = Vec::with_capacity(targets.len());
        for (as_number, policy_name) in targets.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let runner = Arc::clone(&runner);
            let config = config.clone();
            let proxy_snapshot = proxy_snapshot.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let proxy = proxy_snapshot
                    .as_ref()
                    .and_then(|snapshot| snapshot.iter().next())
                    .map(|(name, port)| (name.clone(), *port));
                Self::generate_one(
                    runner.as_ref(),
                    as_number,
                    &policy_name,
                    &config,
                    proxy.as_ref().map(|(name, port)| (name.as_str(), *port)),
                )
                .await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(_join_err) => results.push(Err(Bgpq4Error::Execution(
                    "worker task panicked".to_string(),
                ))),
            }
        }
        results
    }
}

#[derive(Debug, Clone, Copy)]
enum ResolvedMode {
    Native,
    Docker,
    Podman,
}

async fn resolve_mode(
    runner: &dyn CommandRunner,
    configured: Bgpq4Mode,
) -> Result<ResolvedMode, Bgpq4Error> {
    match configured {
        Bgpq4Mode::Native => Ok(ResolvedMode::Native),
        Bgpq4Mode::Docker => Ok(ResolvedMode::Docker),
        Bgpq4Mode::Podman => Ok(ResolvedMode::Podman),
        Bgpq4Mode::Auto => {
            for (mode, probe) in [
                (ResolvedMode::Native, "bgpq4"),
                (ResolvedMode::Docker, "docker"),
                (ResolvedMode::Podman, "podman"),
            ] {
                if runner.probe(probe).await {
                    return Ok(mode);
                }
            }
            Err(Bgpq4Error::Execution(
                "no usable bgpq4 execution mode found".to_string(),
            ))
        }
    }
}

fn build_command(
    mode: ResolvedMode,
    policy_name: &str,
    as_number: u32,
    proxy_local_port: Option<u16>,
) -> ExecutableData {
    let mut bgpq4_args = vec![
        "-Jl".to_string(),
        policy_name.to_string(),
    ];
    if let Some(port) = proxy_local_port {
        bgpq4_args.push("-h".to_string());
        bgpq4_args.push(format!("127.0.0.1:{port}"));
    }
    bgpq4_args.push(format!("AS{as_number}"));

    match mode {
        ResolvedMode::Native => ExecutableData::new("bgpq4").with_args(bgpq4_args),
        ResolvedMode::Docker => {
            let mut args = vec!["run".to_string(), "--rm".to_string(), "bgpq4/bgpq4".to_string()];
            args.extend(bgpq4_args);
            ExecutableData::new("docker").with_args(args)
        }
        ResolvedMode::Podman => {
            let mut args = vec!["run".to_string(), "--rm".to_string(), "bgpq4/bgpq4".to_string()];
            args.extend(bgpq4_args);
            ExecutableData::new("podman").with_args(args)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeRunner {
        stdout: String,
        succeed: bool,
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(
            &self,
            _executable: &ExecutableData,
            _timeout: Duration,
        ) -> Result<CommandOutput, Bgpq4Error> {
            Ok(CommandOutput {
                success: self.succeed,
                stdout: self.stdout.clone(),
                stderr: if self.succeed { String::new() } else { "ERROR".to_string() },
            })
        }

        async fn probe(&self, bin: &str) -> bool {
            bin == "bgpq4"
        }
    }

    #[test]
    fn policy_name_validation_accepts_standard_names() {
        assert!(BGPq4Wrapper::validate_policy_name("AS-CUSTOMER-13335").is_ok());
        assert!(BGPq4Wrapper::validate_policy_name("").is_err());
        assert!(BGPq4Wrapper::validate_policy_name("has space").is_err());
        assert!(BGPq4Wrapper::validate_policy_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn as_number_validation_rejects_overflow() {
        assert!(BGPq4Wrapper::validate_as_number(u32::MAX as u64).is_ok());
        assert!(BGPq4Wrapper::validate_as_number(u32::MAX as u64 + 1).is_err());
    }

    #[test]
    fn native_command_has_expected_argv_shape() {
        let executable = build_command(ResolvedMode::Native, "AS-CUSTOMER", 13335, None);
        assert_eq!(executable.bin, "bgpq4");
        assert_eq!(executable.args, vec!["-Jl", "AS-CUSTOMER", "AS13335"]);
    }

    #[test]
    fn proxy_port_inserts_irr_host_argument() {
        let executable = build_command(ResolvedMode::Native, "AS-CUSTOMER", 13335, Some(10043));
        assert_eq!(
            executable.args,
            vec!["-Jl", "AS-CUSTOMER", "-h", "127.0.0.1:10043", "AS13335"]
        );
    }

    #[test]
    fn docker_command_wraps_native_argv() {
        let executable = build_command(ResolvedMode::Docker, "AS-CUSTOMER", 13335, None);
        assert_eq!(executable.bin, "docker");
        assert_eq!(
            executable.args,
            vec!["run", "--rm", "bgpq4/bgpq4", "-Jl", "AS-CUSTOMER", "AS13335"]
        );
    }

    #[tokio::test]
    async fn generate_one_records_proxy_source() {
        let runner = FakeRunner {
            stdout: "policy-options {\n}\n".to_string(),
            succeed: true,
        };
        let config = Bgpq4Config {
            mode: Bgpq4Mode::Native,
            ..Default::default()
        };
        let artifact =
            BGPq4Wrapper::generate_one(&runner, 13335, "AS13335", &config, Some(("ntt", 10043)))
                .await
                .unwrap();
        assert_eq!(artifact.source_irr.as_deref(), Some("ntt"));
    }

    #[tokio::test]
    async fn container_mode_refuses_proxy_tunnels() {
        let runner = FakeRunner {
            stdout: String::new(),
            succeed: true,
        };
        let config = Bgpq4Config {
            mode: Bgpq4Mode::Docker,
            ..Default::default()
        };
        let result =
            BGPq4Wrapper::generate_one(&runner, 13335, "AS13335", &config, Some(("ntt", 10043)))
                .await;
        assert!(matches!(result, Err(Bgpq4Error::ProxyUnavailable(_))));
    }

    #[tokio::test]
    async fn batch_failure_does_not_abort_other_targets() {
        let runner: Arc<dyn CommandRunner> = Arc::new(FakeRunner {
            stdout: "x".to_string(),
            succeed: true,
        });
        let config = Bgpq4Config {
            mode: Bgpq4Mode::Native,
            ..Default::default()
        };
        let targets = vec![
            (13335, "AS13335".to_string()),
            (15169, "bad name".to_string()),
        ];
        let results = BGPq4Wrapper::generate_batch(runner, &targets, &config, None).await;
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Bgpq4Error::Validation(_))));
    }
}
