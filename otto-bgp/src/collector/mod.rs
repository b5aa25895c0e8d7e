//! Opens SSH sessions to collect raw BGP configuration text. Built on an
//! `SshSession` trait so the collector's retry/parallelism/host-key logic
//! stays testable without a real router.

pub mod ssh_session;

use crate::config::Config;
use crate::inventory::DeviceInfo;
use crate::util::retry::{Classification, retry_async};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

pub use ssh_session::{HostKeyPolicy, RealSshSession, SshSession};

/// The fixed, allowlisted command set. No shell metacharacters are ever
/// concatenated onto these; each is sent verbatim over the SSH channel.
pub const ALLOWED_COMMANDS: &[&str] = &[
    "show configuration protocols bgp",
    "show bgp group brief",
];

#[derive(Error, Debug, Clone)]
pub enum CollectionError {
    #[error("host key verification failed for {hostname}")]
    HostKeyError { hostname: String },
    #[error("authentication failed for {hostname}")]
    AuthError { hostname: String },
    #[error("timed out collecting from {hostname}: {detail}")]
    TimeoutError { hostname: String, detail: String },
    #[error("transport error for {hostname}: {detail}")]
    TransportError { hostname: String, detail: String },
    #[error("command error for {hostname}: {detail}")]
    CommandError { hostname: String, detail: String },
}

impl CollectionError {
    fn classify(&self) -> Classification {
        match self {
            CollectionError::HostKeyError { .. }
            | CollectionError::AuthError { .. }
            | CollectionError::CommandError { .. } => Classification::Terminal,
            CollectionError::TimeoutError { .. } | CollectionError::TransportError { .. } => {
                Classification::Retry
            }
        }
    }

    pub fn is_security_event(&self) -> bool {
        matches!(self, CollectionError::HostKeyError { .. })
    }
}

#[derive(Debug, Clone)]
pub struct CollectionResult {
    pub hostname: String,
    pub address: String,
    pub raw_config: Option<String>,
    pub error: Option<CollectionError>,
}

impl CollectionResult {
    pub fn success(device: &DeviceInfo, raw_config: String) -> Self {
        Self {
            hostname: device.hostname.clone(),
            address: device.address.clone(),
            raw_config: Some(raw_config),
            error: None,
        }
    }

    pub fn failure(device: &DeviceInfo, error: CollectionError) -> Self {
        Self {
            hostname: device.hostname.clone(),
            address: device.address.clone(),
            raw_config: None,
            error: Some(error),
        }
    }
}

pub struct SSHCollector;

impl SSHCollector {
    /// Collect from every device, bounded to `config.ssh.parallel_workers`
    /// concurrent SSH sessions. Failed devices are recorded, never abort
    /// the stage.
    pub async fn collect_all(
        devices: &[DeviceInfo],
        config: &Config,
        session_factory: Arc<dyn Fn() -> Box<dyn SshSession> + Send + Sync>,
    ) -> Vec<CollectionResult> {
        let semaphore = Arc::new(Semaphore::new(config.ssh.parallel_workers.max(1)));
        let mut handles = Vec::with_capacity(devices.len());

        for device in devices.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let factory = Arc::clone(&session_factory);
            let retry_attempts = config.ssh.retry_attempts.max(1);
            let command_timeout = config.ssh.command_timeout;
            let session_timeout = config.ssh.session_timeout;
            let max_config_size = usize::from(config.max_bgp_config_size);

            let task_device = device.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                Self::collect_one(
                    &task_device,
                    factory.as_ref(),
                    retry_attempts,
                    command_timeout,
                    session_timeout,
                    max_config_size,
                )
                .await
            });
            handles.push((device, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (device, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    // Worker panicked; record the device as failed rather
                    // than losing it from the batch.
                    results.push(CollectionResult::failure(
                        &device,
                        CollectionError::TransportError {
                            hostname: device.hostname.clone(),
                            detail: format!("collection worker panicked: {join_err}"),
                        },
                    ));
                }
            }
        }
        results
    }

    async fn collect_one(
        device: &DeviceInfo,
        session_factory: &(dyn Fn() -> Box<dyn SshSession> + Send + Sync),
        retry_attempts: usize,
        command_timeout: Duration,
        session_timeout: Duration,
        max_config_size: usize,
    ) -> CollectionResult {
        let outcome = retry_async(
            retry_attempts,
            Duration::from_millis(500),
            |err: &CollectionError| err.classify(),
            || async {
                let mut session = session_factory();
                tokio::time::timeout(session_timeout, session.connect(device))
                    .await
                    .map_err(|_| CollectionError::TimeoutError {
                        hostname: device.hostname.clone(),
                        detail: "connect timed out".to_string(),
                    })??;

                let mut output = String::new();
                for command in ALLOWED_COMMANDS {
                    let chunk = tokio::time::timeout(
                        command_timeout,
                        session.run_command(command),
                    )
                    .await
                    .map_err(|_| CollectionError::TimeoutError {
                        hostname: device.hostname.clone(),
                        detail: format!("command '{command}' timed out"),
                    })??;
                    output.push_str(&chunk);
                    output.push('\n');
                    if output.len() > max_config_size {
                        session.close().await;
                        return Err(CollectionError::CommandError {
                            hostname: device.hostname.clone(),
                            detail: format!(
                                "collected configuration exceeds {max_config_size} bytes"
                            ),
                        });
                    }
                }
                session.close().await;
                Ok(output)
            },
        )
        .await;

        match outcome {
            Ok(raw_config) => CollectionResult::success(device, raw_config),
            Err(error) => CollectionResult::failure(device, error),
        }
    }
}
