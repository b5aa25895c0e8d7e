use super::CollectionError;
use crate::inventory::DeviceInfo;
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use std::path::PathBuf;
use std::sync::Arc;

/// Abstracts a single router SSH session so the collector's retry,
/// parallelism, and command-allowlist logic can be exercised against a
/// mock in tests. Object-safe via `async_trait`.
#[async_trait]
pub trait SshSession: Send {
    async fn connect(&mut self, device: &DeviceInfo) -> Result<(), CollectionError>;
    async fn run_command(&mut self, command: &str) -> Result<String, CollectionError>;
    async fn close(&mut self);
}

/// Host-key verification policy. Strict by default; `RecordNew` exists only
/// for an explicit, operator-invoked setup flow and must never be the
/// default for a normal collection run.
pub enum HostKeyPolicy {
    Strict { known_hosts: PathBuf },
    RecordNew { known_hosts: PathBuf },
}

impl HostKeyPolicy {
    pub fn is_setup_mode(&self) -> bool {
        matches!(self, HostKeyPolicy::RecordNew { .. })
    }
}

struct StrictHostKeyHandler {
    host: String,
    port: u16,
    known_hosts: PathBuf,
    record_new: bool,
}

impl client::Handler for StrictHostKeyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match russh::keys::check_known_hosts_path(
            &self.host,
            self.port,
            server_public_key,
            &self.known_hosts,
        ) {
            Ok(true) => Ok(true),
            Ok(false) if self.record_new => {
                russh::keys::known_hosts::learn_known_hosts_path(
                    &self.host,
                    self.port,
                    server_public_key,
                    &self.known_hosts,
                )
                .ok();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

pub struct RealSshSession {
    username: String,
    key_path: Option<PathBuf>,
    password: Option<String>,
    policy_known_hosts: PathBuf,
    record_new: bool,
    handle: Option<Handle<StrictHostKeyHandler>>,
}

impl RealSshSession {
    pub fn new(
        username: String,
        key_path: Option<PathBuf>,
        password: Option<String>,
        policy: &HostKeyPolicy,
    ) -> Self {
        let (policy_known_hosts, record_new) = match policy {
            HostKeyPolicy::Strict { known_hosts } => (known_hosts.clone(), false),
            HostKeyPolicy::RecordNew { known_hosts } => (known_hosts.clone(), true),
        };
        Self {
            username,
            key_path,
            password,
            policy_known_hosts,
            record_new,
            handle: None,
        }
    }
}

#[async_trait]
impl SshSession for RealSshSession {
    async fn connect(&mut self, device: &DeviceInfo) -> Result<(), CollectionError> {
        let config = Arc::new(client::Config::default());
        let handler = StrictHostKeyHandler {
            host: device.address.clone(),
            port: device.port,
            known_hosts: self.policy_known_hosts.clone(),
            record_new: self.record_new,
        };

        let mut handle = client::connect(config, (device.address.as_str(), device.port), handler)
            .await
            .map_err(|err| match err {
                russh::Error::UnknownKey => CollectionError::HostKeyError {
                    hostname: device.hostname.clone(),
                },
                other => CollectionError::TransportError {
                    hostname: device.hostname.clone(),
                    detail: other.to_string(),
                },
            })?;

        let authenticated = if let Some(key_path) = &self.key_path {
            let key = load_secret_key(key_path, None).map_err(|_| CollectionError::AuthError {
                hostname: device.hostname.clone(),
            })?;
            handle
                .authenticate_publickey(
                    &self.username,
                    PrivateKeyWithHashAlg::new(Arc::new(key), None),
                )
                .await
                .map_err(|_| CollectionError::AuthError {
                    hostname: device.hostname.clone(),
                })?
        } else if let Some(password) = &self.password {
            handle
                .authenticate_password(&self.username, password)
                .await
                .map_err(|_| CollectionError::AuthError {
                    hostname: device.hostname.clone(),
                })?
        } else {
            return Err(CollectionError::AuthError {
                hostname: device.hostname.clone(),
            });
        };

        if !authenticated.success() {
            return Err(CollectionError::AuthError {
                hostname: device.hostname.clone(),
            });
        }

        self.handle = Some(handle);
        Ok(())
    }

    async fn run_command(&mut self, command: &str) -> Result<String, CollectionError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| CollectionError::TransportError {
                hostname: "unknown".to_string(),
                detail: "session not connected".to_string(),
            })?;

        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|err| CollectionError::TransportError {
                hostname: "unknown".to_string(),
                detail: err.to_string(),
            })?;

        channel
            .exec(true, command)
            .await
            .map_err(|err| CollectionError::CommandError {
                hostname: "unknown".to_string(),
                detail: err.to_string(),
            })?;

        let mut output = Vec::new();
        while let Some(msg) = channel.wait().await {
            if let russh::ChannelMsg::Data { data } = msg {
                output.extend_from_slice(&data);
            }
        }

        String::from_utf8(output).map_err(|err| CollectionError::CommandError {
            hostname: "unknown".to_string(),
            detail: err.to_string(),
        })
    }

    async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        }
    }
}
