//! The seven invocation entry points external collaborators (CLI, web UI)
//! call into: `collect`, `discover`, `policy`, `apply`, `pipeline`,
//! `rpki_check`, `test_proxy`. Flag parsing lives in `bin/main.rs`; this
//! module only knows typed `Config` and paths.

use crate::bgpq4::SystemRunner;
use crate::collector::{HostKeyPolicy, RealSshSession, SshSession};
use crate::config::Config;
use crate::inventory::{DeviceInfo, InventoryLoader};
use crate::irr_proxy::{ActiveProxy, IRRProxyManager, ProxyError};
use crate::netconf::{NetconfSession, RealNetconfSession};
use crate::pipeline::artifacts::PolicyFiles;
use crate::pipeline::{PipelineContext, PipelineOrchestrator};
use crate::rpki::{RPKIValidator, RpkiError};
use crate::safety::UnifiedSafetyManager;
use crate::util::lock::{LockError, OperationLock};
use crate::util::retry::{Classification, retry};
use otto_bgp_fs::file::LocalFile;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum EntrypointError {
    #[error("failed to load inventory: {0}")]
    Inventory(#[from] crate::inventory::InventoryError),
    #[error("failed to acquire operation lock: {0}")]
    Lock(#[from] LockError),
    #[error("rpki error: {0}")]
    Rpki(#[from] RpkiError),
    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),
    #[error("report write failed: {0}")]
    Report(#[from] std::io::Error),
}

fn known_hosts_path(config: &Config) -> PathBuf {
    config
        .ssh
        .known_hosts_path
        .clone()
        .unwrap_or_else(|| config.data_dir.join("known_hosts"))
}

/// Password auth is opt-in; without the explicit config flag only key
/// material is offered to the router.
fn permitted_password(config: &Config) -> Option<String> {
    if config.ssh.password_auth_allowed {
        config.ssh.password.clone()
    } else {
        None
    }
}

fn ssh_session_factory(
    config: &Config,
    record_new_hosts: bool,
) -> Arc<dyn Fn() -> Box<dyn SshSession> + Send + Sync> {
    let username = config.ssh.username.clone().unwrap_or_default();
    let key_path = config.ssh.key_path.clone();
    let password = permitted_password(config);
    let known_hosts = known_hosts_path(config);

    Arc::new(move || {
        let policy = if record_new_hosts {
            HostKeyPolicy::RecordNew {
                known_hosts: known_hosts.clone(),
            }
        } else {
            HostKeyPolicy::Strict {
                known_hosts: known_hosts.clone(),
            }
        };
        Box::new(RealSshSession::new(
            username.clone(),
            key_path.clone(),
            password.clone(),
            &policy,
        )) as Box<dyn SshSession>
    })
}

fn netconf_session_factory(config: &Config) -> impl Fn() -> Box<dyn NetconfSession> {
    let key_path = config.ssh.key_path.clone();
    let password = permitted_password(config);
    let known_hosts = known_hosts_path(config);
    move || {
        Box::new(RealNetconfSession::new(
            key_path.clone(),
            password.clone(),
            known_hosts.clone(),
        )) as Box<dyn NetconfSession>
    }
}

/// Rollback action registered for the span of each confirmed-commit
/// window: a short-lived session that explicitly discards the pending
/// commit. Runs on the signal-handler thread, hence the dedicated
/// current-thread runtime.
fn netconf_rollback_builder(
    config: &Config,
) -> impl Fn(&DeviceInfo) -> Box<dyn FnOnce() + Send> + Sync {
    let key_path = config.ssh.key_path.clone();
    let password = permitted_password(config);
    let known_hosts = known_hosts_path(config);
    let port = config.netconf.port;
    let fallback_user = config.netconf.username.clone();

    move |device: &DeviceInfo| {
        let key_path = key_path.clone();
        let password = password.clone();
        let known_hosts = known_hosts.clone();
        let address = device.address.clone();
        let hostname = device.hostname.clone();
        let username = device
            .username
            .clone()
            .or_else(|| fallback_user.clone())
            .unwrap_or_default();

        Box::new(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    error!(hostname = %hostname, error = %err, "cannot build rollback runtime, relying on the router's confirmation timeout");
                    return;
                }
            };
            let outcome = retry(
                3,
                std::time::Duration::from_millis(500),
                |_: &String| Classification::Retry,
                || {
                    runtime.block_on(async {
                        let mut session = RealNetconfSession::new(
                            key_path.clone(),
                            password.clone(),
                            known_hosts.clone(),
                        );
                        session
                            .connect(&address, port, &username)
                            .await
                            .map_err(|err| err.to_string())?;
                        let result = session.cancel_commit().await.map_err(|err| err.to_string());
                        session.close().await;
                        result
                    })
                },
            );
            match outcome {
                Ok(()) => warn!(hostname = %hostname, "pending confirmed commit explicitly discarded"),
                Err(err) => {
                    error!(hostname = %hostname, error = %err, "rollback session failed, relying on the router's confirmation timeout");
                }
            }
        })
    }
}

fn load_devices(inventory_path: &Path) -> Result<Vec<DeviceInfo>, EntrypointError> {
    Ok(InventoryLoader::load(inventory_path)?)
}

/// Entry point: `collect`. SSH into every device and return the in-memory
/// raw configs. `record_new_hosts` is the out-of-band setup mode: it must
/// only be true when the operator passed the dedicated setup flag.
pub async fn collect(
    config: &Config,
    inventory_path: &Path,
    record_new_hosts: bool,
) -> Result<PipelineContext, EntrypointError> {
    let devices = load_devices(inventory_path)?;
    let ctx = PipelineContext::new(devices);
    Ok(PipelineOrchestrator::collect(ctx, config, ssh_session_factory(config, record_new_hosts)).await)
}

/// Entry point: `discover`. Collect, then parse and persist the router-AS
/// mapping. Returns the context so the caller can inspect `discovery_outcome`.
pub async fn discover(config: &Config, inventory_path: &Path) -> Result<PipelineContext, EntrypointError> {
    let ctx = collect(config, inventory_path, false).await?;
    Ok(PipelineOrchestrator::discover(ctx, &config.output_dir))
}

/// Entry point: `policy`. Collect, discover, then generate policy files
/// (optionally through an IRR proxy tunnel).
pub async fn policy(config: &Config, inventory_path: &Path) -> Result<PipelineContext, EntrypointError> {
    let ctx = discover(config, inventory_path).await?;

    let active_proxy = start_proxy_if_enabled(config).await?;
    let snapshot = active_proxy.as_ref().map(|proxy| Arc::new(proxy.snapshot()));

    let ctx = PipelineOrchestrator::generate(
        ctx,
        config,
        Arc::new(SystemRunner),
        snapshot,
        &config.output_dir,
    )
    .await;

    if let Some(proxy) = active_proxy {
        proxy.shutdown().await;
    }
    Ok(ctx)
}

/// Entry point: `apply`. Full collect → discover → generate → validate →
/// apply run. Baselines for the change-ratio guardrail are snapshotted from
/// the previous run's policy files before Generate overwrites them.
pub async fn apply(
    config: &Config,
    inventory_path: &Path,
    dry_run: bool,
) -> Result<PipelineContext, EntrypointError> {
    let safety = Arc::new(UnifiedSafetyManager::new(config));
    apply_with_safety(config, inventory_path, dry_run, &safety).await
}

async fn apply_with_safety(
    config: &Config,
    inventory_path: &Path,
    dry_run: bool,
    safety: &Arc<UnifiedSafetyManager>,
) -> Result<PipelineContext, EntrypointError> {
    let ctx = discover(config, inventory_path).await?;
    let baselines = PolicyFiles::load_baselines(&LocalFile, &ctx.profiles, &config.output_dir);

    let active_proxy = start_proxy_if_enabled(config).await?;
    let snapshot = active_proxy.as_ref().map(|proxy| Arc::new(proxy.snapshot()));
    let ctx = PipelineOrchestrator::generate(
        ctx,
        config,
        Arc::new(SystemRunner),
        snapshot,
        &config.output_dir,
    )
    .await;

    let ctx = PipelineOrchestrator::validate(ctx, config);

    let factory = netconf_session_factory(config);
    let rollback = netconf_rollback_builder(config);
    let ctx = PipelineOrchestrator::apply(
        ctx,
        config,
        safety,
        &baselines,
        factory,
        Some(&rollback),
        dry_run,
    )
    .await;

    if let Some(proxy) = active_proxy {
        proxy.shutdown().await;
    }
    Ok(ctx)
}

/// Entry point: `pipeline`. Runs every stage end to end, under the global
/// operation lock and with the signal handler installed, then writes the
/// Report stage's artifacts.
pub async fn pipeline(
    config: &Config,
    inventory_path: &Path,
    dry_run: bool,
) -> Result<PipelineContext, EntrypointError> {
    let _lock = OperationLock::acquire(&config.data_dir)?;

    let safety = Arc::new(UnifiedSafetyManager::new(config));
    if let Err(err) = safety.install_signal_handler() {
        warn!(error = %err, "signal handler already installed, reusing existing one");
    }

    let ctx = apply_with_safety(config, inventory_path, dry_run, &safety).await?;
    PipelineOrchestrator::report(&ctx, &config.output_dir)?;
    Ok(ctx)
}

/// Entry point: `rpki_check`. Loads the VRP cache and reports its staleness
/// without running the rest of the pipeline.
pub fn rpki_check(config: &Config) -> Result<(bool, usize), EntrypointError> {
    let cache_dir = config
        .rpki
        .cache_dir
        .as_deref()
        .ok_or_else(|| RpkiError::CacheNotFound("rpki.cache_dir not configured".to_string()))?;
    let index = RPKIValidator::load_cache(cache_dir)?;
    let stale = index.is_stale(config.rpki.max_age, chrono::Utc::now());
    Ok((stale, index.record_count()))
}

/// Entry point: `test_proxy`. Starts the configured IRR proxy tunnels and
/// hands them back for the caller to inspect and tear down.
pub async fn test_proxy(config: &Config) -> Result<ActiveProxy, EntrypointError> {
    Ok(IRRProxyManager::start(&config.proxy).await?)
}

async fn start_proxy_if_enabled(config: &Config) -> Result<Option<ActiveProxy>, EntrypointError> {
    if config.proxy.enabled {
        Ok(Some(IRRProxyManager::start(&config.proxy).await?))
    } else {
        Ok(None)
    }
}
