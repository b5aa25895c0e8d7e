//! NETCONF-over-SSH transport and RPC envelope construction. The `russh`
//! "netconf" subsystem channel carries NETCONF 1.0 delimiter framing
//! (`]]>]]>`); envelopes are hand-built XML strings escaped through
//! `quick-xml`, matching the collector's "no shell, explicit bytes" style.

use crate::bgpq4::PolicyArtifact;
use async_trait::async_trait;
use quick_xml::escape::escape;
use russh::client::{self, Handle};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

const FRAMING_DELIMITER: &str = "]]>]]>";
static MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Error, Debug)]
pub enum NetconfError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("host key verification failed for {0}")]
    HostKey(String),
    #[error("authentication failed")]
    AuthFailed,
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("session not connected")]
    NotConnected,
}

#[async_trait]
pub trait NetconfSession: Send {
    async fn connect(&mut self, host: &str, port: u16, username: &str) -> Result<(), NetconfError>;
    async fn load_candidate(&mut self, candidate_xml: &str) -> Result<(), NetconfError>;
    /// Candidate-vs-running diff in Junos text form, for the preview event.
    async fn diff(&mut self) -> Result<String, NetconfError>;
    async fn commit_confirmed(&mut self, window: Duration) -> Result<String, NetconfError>;
    /// Post-commit health probe run inside the confirmation window. `Err`
    /// means "do not confirm, let the router roll the commit back".
    async fn health_check(&mut self) -> Result<(), NetconfError>;
    async fn confirm_commit(&mut self) -> Result<(), NetconfError>;
    async fn cancel_commit(&mut self) -> Result<(), NetconfError>;
    async fn close(&mut self);
}

struct StrictHostKeyHandler {
    host: String,
    port: u16,
    known_hosts: PathBuf,
}

impl client::Handler for StrictHostKeyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(russh::keys::check_known_hosts_path(
            &self.host,
            self.port,
            server_public_key,
            &self.known_hosts,
        )
        .unwrap_or(false))
    }
}

pub struct RealNetconfSession {
    key_path: Option<PathBuf>,
    password: Option<String>,
    known_hosts: PathBuf,
    handle: Option<Handle<StrictHostKeyHandler>>,
    channel: Option<russh::Channel<client::Msg>>,
}

impl RealNetconfSession {
    pub fn new(key_path: Option<PathBuf>, password: Option<String>, known_hosts: PathBuf) -> Self {
        Self {
            key_path,
            password,
            known_hosts,
            handle: None,
            channel: None,
        }
    }

    async fn send_rpc(&mut self, body: String) -> Result<String, NetconfError> {
        let channel = self.channel.as_mut().ok_or(NetconfError::NotConnected)?;
        let framed = format!("{body}\n{FRAMING_DELIMITER}");
        channel
            .data(framed.as_bytes())
            .await
            .map_err(|err| NetconfError::Transport(err.to_string()))?;

        let mut reply = Vec::new();
        loop {
            match channel.wait().await {
                Some(russh::ChannelMsg::Data { data }) => {
                    reply.extend_from_slice(&data);
                    if reply
                        .windows(FRAMING_DELIMITER.len())
                        .any(|window| window == FRAMING_DELIMITER.as_bytes())
                    {
                        break;
                    }
                }
                Some(russh::ChannelMsg::Eof) | None => break,
                _ => {}
            }
        }

        let text = String::from_utf8_lossy(&reply).replace(FRAMING_DELIMITER, "");
        if text.contains("<rpc-error>") {
            return Err(NetconfError::Rpc(text));
        }
        Ok(text)
    }
}

#[async_trait]
impl NetconfSession for RealNetconfSession {
    async fn connect(&mut self, host: &str, port: u16, username: &str) -> Result<(), NetconfError> {
        let config = Arc::new(client::Config::default());
        let handler = StrictHostKeyHandler {
            host: host.to_string(),
            port,
            known_hosts: self.known_hosts.clone(),
        };
        let mut handle = client::connect(config, (host, port), handler)
            .await
            .map_err(|err| match err {
                russh::Error::UnknownKey => NetconfError::HostKey(host.to_string()),
                other => NetconfError::Transport(other.to_string()),
            })?;

        let authenticated = if let Some(key_path) = &self.key_path {
            let key = load_secret_key(key_path, None).map_err(|_| NetconfError::AuthFailed)?;
            handle
                .authenticate_publickey(username, PrivateKeyWithHashAlg::new(Arc::new(key), None))
                .await
                .map_err(|_| NetconfError::AuthFailed)?
        } else if let Some(password) = &self.password {
            handle
                .authenticate_password(username, password)
                .await
                .map_err(|_| NetconfError::AuthFailed)?
        } else {
            return Err(NetconfError::AuthFailed);
        };
        if !authenticated.success() {
            return Err(NetconfError::AuthFailed);
        }

        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|err| NetconfError::Transport(err.to_string()))?;
        channel
            .request_subsystem(true, "netconf")
            .await
            .map_err(|err| NetconfError::Transport(err.to_string()))?;

        self.handle = Some(handle);
        self.channel = Some(channel);

        self.send_rpc(build_hello()).await?;
        Ok(())
    }

    async fn load_candidate(&mut self, candidate_xml: &str) -> Result<(), NetconfError> {
        let rpc = build_edit_config_rpc(next_message_id(), candidate_xml);
        self.send_rpc(rpc).await.map(|_| ())
    }

    async fn diff(&mut self) -> Result<String, NetconfError> {
        let rpc = build_compare_rpc(next_message_id());
        self.send_rpc(rpc).await
    }

    async fn commit_confirmed(&mut self, window: Duration) -> Result<String, NetconfError> {
        let rpc = build_commit_confirmed_rpc(next_message_id(), window.as_secs());
        let reply = self.send_rpc(rpc).await?;
        Ok(parse_commit_id(&reply)
            .unwrap_or_else(|| format!("junos-{}", next_message_id())))
    }

    /// The new policies took effect at commit time, so a BGP summary that
    /// still answers means the sessions survived the change. An rpc-error
    /// or a dead transport both read as "unhealthy".
    async fn health_check(&mut self) -> Result<(), NetconfError> {
        let rpc = build_bgp_summary_rpc(next_message_id());
        self.send_rpc(rpc).await.map(|_| ())
    }

    async fn confirm_commit(&mut self) -> Result<(), NetconfError> {
        let rpc = build_commit_rpc(next_message_id());
        self.send_rpc(rpc).await.map(|_| ())
    }

    async fn cancel_commit(&mut self) -> Result<(), NetconfError> {
        let rpc = build_discard_changes_rpc(next_message_id());
        self.send_rpc(rpc).await.map(|_| ())
    }

    async fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            let _ = channel.close().await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.disconnect(russh::Disconnect::ByApplication, "", "en").await;
        }
    }
}

fn next_message_id() -> u64 {
    MESSAGE_ID.fetch_add(1, Ordering::SeqCst)
}

fn build_hello() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities>
    <capability>urn:ietf:params:netconf:base:1.0</capability>
  </capabilities>
</hello>"#
        .to_string()
}

fn rpc_envelope(message_id: u64, operation: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rpc message-id="{message_id}" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
{operation}
</rpc>"#
    )
}

fn build_edit_config_rpc(message_id: u64, candidate_xml: &str) -> String {
    let operation = format!(
        r#"<edit-config>
  <target><candidate/></target>
  <default-operation>merge</default-operation>
  <config>
{candidate_xml}
  </config>
</edit-config>"#
    );
    rpc_envelope(message_id, &operation)
}

/// Junos extension: diff of the candidate against rollback 0 (the running
/// configuration), rendered as configuration-diff text.
fn build_compare_rpc(message_id: u64) -> String {
    rpc_envelope(
        message_id,
        r#"<get-configuration compare="rollback" rollback="0" format="text"/>"#,
    )
}

fn build_commit_confirmed_rpc(message_id: u64, confirm_timeout_secs: u64) -> String {
    let operation = format!(
        r#"<commit>
  <confirmed/>
  <confirm-timeout>{confirm_timeout_secs}</confirm-timeout>
</commit>"#
    );
    rpc_envelope(message_id, &operation)
}

fn build_commit_rpc(message_id: u64) -> String {
    rpc_envelope(message_id, "<commit/>")
}

/// Junos operational RPC used as the autonomous health probe.
fn build_bgp_summary_rpc(message_id: u64) -> String {
    rpc_envelope(message_id, "<get-bgp-summary-information/>")
}

fn build_discard_changes_rpc(message_id: u64) -> String {
    rpc_envelope(message_id, "<discard-changes/>")
}

/// Junos replies may carry `<commit-id>` inside `<commit-results>`. Absent
/// that, the caller synthesizes an identifier.
fn parse_commit_id(reply: &str) -> Option<String> {
    let start = reply.find("<commit-id>")? + "<commit-id>".len();
    let end = reply[start..].find("</commit-id>")? + start;
    let id = reply[start..end].trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Combine every generated policy into one Junos `policy-options` candidate
/// using `replace: prefix-list <name> { ... }` form.
pub fn build_candidate_config(artifacts: &[PolicyArtifact]) -> String {
    let mut prefix_lists = String::new();
    for artifact in artifacts {
        let escaped = escape(&artifact.juniper_text);
        prefix_lists.push_str(&format!(
            "replace: prefix-list {} {{\n{}\n}}\n",
            escape(&artifact.policy_name),
            escaped
        ));
    }
    format!(
        r#"<configuration>
  <policy-options>
{prefix_lists}
  </policy-options>
</configuration>"#
    )
}
