//! Opens SSH local port-forwards from a jump host so IRR whois lookups
//! (TCP/43) can reach hosts otherwise unreachable from the collector's
//! network. One `russh` session, one `direct-tcpip` channel per inbound
//! connection on each forwarded port.

use crate::config::ProxyConfig;
use russh::client::{self, Handle};
use russh::keys::load_secret_key;
use std::collections::BTreeMap;
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("local port {port} for tunnel '{name}' is already in use")]
    PortUnavailable { name: String, port: u16 },
    #[error("host key verification failed for proxy jump host")]
    HostKeyError,
    #[error("authentication failed for proxy jump host")]
    AuthError,
    #[error("transport error: {0}")]
    TransportError(String),
    #[error("liveness check failed for tunnel '{name}' on port {port}")]
    LivenessFailed { name: String, port: u16 },
    #[error("proxy config missing required field '{0}'")]
    MissingField(&'static str),
}

struct ProxyHostKeyHandler {
    jump_host: String,
    known_hosts: std::path::PathBuf,
}

impl client::Handler for ProxyHostKeyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(russh::keys::check_known_hosts_path(
            &self.jump_host,
            22,
            server_public_key,
            &self.known_hosts,
        )
        .unwrap_or(false))
    }
}

struct TunnelHandle {
    name: String,
    local_port: u16,
    accept_task: JoinHandle<()>,
}

/// A live set of port forwards. Dropping or calling `shutdown` tears down
/// every accept loop and disconnects the underlying SSH session.
pub struct ActiveProxy {
    session: Arc<Handle<ProxyHostKeyHandler>>,
    tunnels: Vec<TunnelHandle>,
}

impl ActiveProxy {
    /// `name -> local_port` handed to bgpq4 workers so each can target the
    /// right forwarded port without knowing tunnel internals. Sorted by
    /// tunnel name so worker target selection is deterministic.
    pub fn snapshot(&self) -> BTreeMap<String, u16> {
        self.tunnels
            .iter()
            .map(|tunnel| (tunnel.name.clone(), tunnel.local_port))
            .collect()
    }

    pub async fn shutdown(mut self) {
        for tunnel in self.tunnels.drain(..) {
            tunnel.accept_task.abort();
        }
        let _ = self
            .session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await;
    }
}

pub struct IRRProxyManager;

impl IRRProxyManager {
    pub async fn start(config: &ProxyConfig) -> Result<ActiveProxy, ProxyError> {
        for tunnel in &config.tunnels {
            check_port_available(&tunnel.name, tunnel.local_port)?;
        }

        let jump_host = config
            .jump_host
            .as_deref()
            .ok_or(ProxyError::MissingField("jump_host"))?;
        let jump_user = config
            .jump_user
            .as_deref()
            .ok_or(ProxyError::MissingField("jump_user"))?;
        let key_file = config
            .key_file
            .as_deref()
            .ok_or(ProxyError::MissingField("key_file"))?;
        let known_hosts_file = config
            .known_hosts_file
            .clone()
            .ok_or(ProxyError::MissingField("known_hosts_file"))?;

        let russh_config = Arc::new(client::Config::default());
        let handler = ProxyHostKeyHandler {
            jump_host: jump_host.to_string(),
            known_hosts: known_hosts_file,
        };

        let mut session = client::connect(russh_config, (jump_host, 22), handler)
            .await
            .map_err(|err| ProxyError::TransportError(err.to_string()))?;

        let key = load_secret_key(key_file, None).map_err(|_| ProxyError::AuthError)?;
        let authenticated = session
            .authenticate_publickey(
                jump_user,
                russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), None),
            )
            .await
            .map_err(|_| ProxyError::AuthError)?;
        if !authenticated.success() {
            return Err(ProxyError::AuthError);
        }

        let session = Arc::new(session);

        let mut tunnels = Vec::with_capacity(config.tunnels.len());
        for tunnel in &config.tunnels {
            let listener = TcpListener::bind(("127.0.0.1", tunnel.local_port))
                .await
                .map_err(|_| ProxyError::PortUnavailable {
                    name: tunnel.name.clone(),
                    port: tunnel.local_port,
                })?;

            let session_for_task = session.clone();
            let remote_host = tunnel.remote_host.clone();
            let remote_port = tunnel.remote_port;
            let local_port = tunnel.local_port;
            let tunnel_name = tunnel.name.clone();

            let accept_task = tokio::spawn(async move {
                loop {
                    let (stream, _addr) = match listener.accept().await {
                        Ok(pair) => pair,
                        Err(err) => {
                            error!(tunnel = %tunnel_name, error = %err, "accept failed");
                            continue;
                        }
                    };
                    let session = session_for_task.clone();
                    let remote_host = remote_host.clone();
                    let tunnel_name = tunnel_name.clone();
                    tokio::spawn(async move {
                        if let Err(err) =
                            forward_connection(&session, stream, &remote_host, remote_port, local_port)
                                .await
                        {
                            debug!(tunnel = %tunnel_name, error = %err, "forwarded connection ended");
                        }
                    });
                }
            });

            tunnels.push(TunnelHandle {
                name: tunnel.name.clone(),
                local_port: tunnel.local_port,
                accept_task,
            });
        }

        for tunnel in &tunnels {
            check_liveness(tunnel.local_port)
                .await
                .map_err(|_| ProxyError::LivenessFailed {
                    name: tunnel.name.clone(),
                    port: tunnel.local_port,
                })?;
        }

        Ok(ActiveProxy { session, tunnels })
    }
}

async fn forward_connection(
    session: &Handle<ProxyHostKeyHandler>,
    stream: TcpStream,
    remote_host: &str,
    remote_port: u16,
    local_port: u16,
) -> Result<(), russh::Error> {
    let channel = session
        .channel_open_direct_tcpip(remote_host, remote_port as u32, "127.0.0.1", local_port as u32)
        .await?;
    let mut channel_stream = channel.into_stream();
    let (mut stream_read, mut stream_write) = tokio::io::split(stream);
    let (mut channel_read, mut channel_write) =
        tokio::io::split(&mut channel_stream);

    let to_remote = tokio::io::copy(&mut stream_read, &mut channel_write);
    let to_local = tokio::io::copy(&mut channel_read, &mut stream_write);
    let _ = tokio::try_join!(to_remote, to_local);
    Ok(())
}

fn check_port_available(name: &str, port: u16) -> Result<(), ProxyError> {
    match StdTcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(_) => Err(ProxyError::PortUnavailable {
            name: name.to_string(),
            port,
        }),
    }
}

async fn check_liveness(port: u16) -> std::io::Result<()> {
    TcpStream::connect(("127.0.0.1", port)).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_availability_check_detects_bound_port() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let result = check_port_available("busy", port);
        assert!(matches!(result, Err(ProxyError::PortUnavailable { .. })));
    }

    #[test]
    fn port_availability_check_allows_free_port() {
        // Bind and immediately drop to find a free ephemeral port, then
        // confirm the check reports it available.
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(check_port_available("free", port).is_ok());
    }

    #[tokio::test]
    async fn start_requires_jump_host_configuration() {
        let config = ProxyConfig {
            enabled: true,
            tunnels: vec![crate::config::TunnelSpec {
                name: "rs1".to_string(),
                local_port: 0,
                remote_host: "rr.example.net".to_string(),
                remote_port: 43,
            }],
            ..Default::default()
        };
        let result = IRRProxyManager::start(&config).await;
        assert!(matches!(result, Err(ProxyError::MissingField("jump_host"))));
    }
}
