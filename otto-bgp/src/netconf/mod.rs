//! Drives the per-router NETCONF-over-SSH confirmed-commit state machine:
//! connect, load, preview, commit-confirmed, monitor, confirm-or-rollback,
//! disconnect. Every transition emits a `NotificationEvent` through
//! `UnifiedSafetyManager` in strict order.

pub mod session;

use crate::bgpq4::PolicyArtifact;
use crate::config::Config;
use crate::event::{DeliveryStatus, NetconfEventType, NotificationEvent};
use crate::guardrails::{SafetyVerdict, Severity};
use crate::inventory::DeviceInfo;
use crate::safety::UnifiedSafetyManager;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, warn};

pub use session::{NetconfError, NetconfSession, RealNetconfSession};

static COMMIT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// How much of a router diff is quoted into the preview notification.
const DIFF_EXCERPT_LIMIT: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Loaded,
    Previewed,
    DryRunComplete,
    Committing,
    ConfirmationPending,
    Confirmed,
    RolledBack,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ApplicationResult {
    pub hostname: String,
    pub success: bool,
    pub autonomous: bool,
    pub final_state: SessionState,
    pub policies_applied: usize,
    pub router_commit_id: Option<String>,
    pub otto_commit_id: String,
    pub rollback_attempted: bool,
    pub risk_level: Severity,
    pub risk_factors: Vec<String>,
    pub manual_approval_required: bool,
    pub notifications_sent: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub message: String,
}

impl ApplicationResult {
    /// A router the safety verdict refused to touch: no session was ever
    /// opened, the verdict is persisted for the operator.
    pub fn blocked(hostname: &str, verdict: &SafetyVerdict, autonomous: bool) -> Self {
        let now = Utc::now();
        Self {
            hostname: hostname.to_string(),
            success: false,
            autonomous,
            final_state: SessionState::Idle,
            policies_applied: 0,
            router_commit_id: None,
            otto_commit_id: next_otto_commit_id(),
            rollback_attempted: false,
            risk_level: verdict.risk_level,
            risk_factors: verdict
                .risk_factors
                .iter()
                .map(|factor| format!("{}: {}", factor.guardrail, factor.message))
                .collect(),
            manual_approval_required: true,
            notifications_sent: 0,
            started_at: now,
            finished_at: now,
            message: format!("blocked: {}", verdict.rationale),
        }
    }
}

/// Builds the rollback action registered with the safety manager for the
/// span of a confirmed-commit window. The production builder opens a fresh
/// session and sends an explicit discard; tests substitute a recorder.
pub type RollbackBuilder<'a> = &'a (dyn Fn(&DeviceInfo) -> Box<dyn FnOnce() + Send> + Sync);

/// How the confirmation window is resolved.
pub enum ConfirmMode<'a> {
    /// Wait out the monitoring window, then confirm iff the router's
    /// health probe passes and no shutdown signal landed. A failed probe
    /// withholds confirmation so the router rolls the commit back itself.
    Autonomous,
    /// The operator's answer (or a test override).
    Interactive(&'a (dyn Fn() -> bool + Sync)),
}

impl ConfirmMode<'_> {
    fn is_autonomous(&self) -> bool {
        matches!(self, ConfirmMode::Autonomous)
    }
}

/// Caller-supplied knobs for one apply run.
pub struct ApplyOptions<'a> {
    pub dry_run: bool,
    pub verdict: Option<&'a SafetyVerdict>,
    pub confirm: ConfirmMode<'a>,
    pub rollback_builder: Option<RollbackBuilder<'a>>,
}

fn next_otto_commit_id() -> String {
    let seq = COMMIT_SEQUENCE.fetch_add(1, Ordering::SeqCst);
    format!("{}-{seq}", Utc::now().format("%Y%m%dT%H%M%SZ"))
}

fn excerpt(text: &str) -> &str {
    if text.len() <= DIFF_EXCERPT_LIMIT {
        text
    } else {
        let mut end = DIFF_EXCERPT_LIMIT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }
}

pub struct NETCONFApplier;

impl NETCONFApplier {
    /// Run the full per-router lifecycle against an already-constructed
    /// session implementation. Any fatal error during load/commit attempts
    /// an immediate rollback before returning.
    pub async fn apply(
        session: &mut dyn NetconfSession,
        device: &DeviceInfo,
        artifacts: &[PolicyArtifact],
        config: &Config,
        safety: &UnifiedSafetyManager,
        options: &ApplyOptions<'_>,
    ) -> ApplicationResult {
        let started_at = Utc::now();
        let otto_commit_id = next_otto_commit_id();
        let mut delivered = 0usize;
        let mut emit = |event: NotificationEvent| -> DeliveryStatus {
            let status = safety.emit_netconf_event(event);
            if status == DeliveryStatus::Delivered {
                delivered += 1;
            }
            status
        };

        let (risk_level, risk_factors) = match options.verdict {
            Some(verdict) => (
                verdict.risk_level,
                verdict
                    .risk_factors
                    .iter()
                    .map(|factor| format!("{}: {}", factor.guardrail, factor.message))
                    .collect(),
            ),
            None => (Severity::Low, Vec::new()),
        };

        let autonomous = options.confirm.is_autonomous();
        let base = |state: SessionState,
                    success: bool,
                    rollback_attempted: bool,
                    router_commit_id: Option<String>,
                    notifications_sent: usize,
                    message: String| ApplicationResult {
            hostname: device.hostname.clone(),
            success,
            autonomous,
            final_state: state,
            policies_applied: if success && !options.dry_run { artifacts.len() } else { 0 },
            router_commit_id,
            otto_commit_id: otto_commit_id.clone(),
            rollback_attempted,
            risk_level,
            risk_factors: risk_factors.clone(),
            manual_approval_required: false,
            notifications_sent,
            started_at,
            finished_at: Utc::now(),
            message,
        };

        let mut state = SessionState::Connecting;
        if let Err(err) = session
            .connect(&device.address, config.netconf.port, &device_username(device, config))
            .await
        {
            emit(NotificationEvent::new(
                NetconfEventType::Connect,
                &device.hostname,
                false,
                err.to_string(),
            ));
            return base(SessionState::Failed, false, false, None, delivered, err.to_string());
        }
        emit(NotificationEvent::new(
            NetconfEventType::Connect,
            &device.hostname,
            true,
            "connected",
        ));

        let candidate_xml = session::build_candidate_config(artifacts);
        if let Err(err) = session.load_candidate(&candidate_xml).await {
            let message = Self::fail_and_disconnect(session, device, state, &mut emit, err).await;
            return base(SessionState::Failed, false, true, None, delivered, message);
        }
        state = SessionState::Loaded;

        let diff = match session.diff().await {
            Ok(diff) => diff,
            Err(err) => {
                let message = Self::fail_and_disconnect(session, device, state, &mut emit, err).await;
                return base(SessionState::Failed, false, true, None, delivered, message);
            }
        };
        state = SessionState::Previewed;
        emit(NotificationEvent::new(
            NetconfEventType::Preview,
            &device.hostname,
            true,
            format!("{} policies\n{}", artifacts.len(), excerpt(&diff)),
        ));

        if options.dry_run {
            tracing::debug!(hostname = %device.hostname, state = ?state, "dry run, stopping before commit");
            let _ = session.cancel_commit().await;
            session.close().await;
            emit(NotificationEvent::new(
                NetconfEventType::Disconnect,
                &device.hostname,
                true,
                "dry run: no commit issued",
            ));
            return base(
                SessionState::DryRunComplete,
                true,
                false,
                None,
                delivered,
                "dry run complete, no changes applied".to_string(),
            );
        }

        state = SessionState::Committing;
        let router_commit_id = match session.commit_confirmed(config.netconf.confirm_window).await {
            Ok(id) => id,
            Err(err) => {
                let message = Self::fail_and_disconnect(session, device, state, &mut emit, err).await;
                return base(SessionState::Failed, false, true, None, delivered, message);
            }
        };
        state = SessionState::ConfirmationPending;
        tracing::debug!(hostname = %device.hostname, state = ?state, commit = %router_commit_id, "entering confirmation window");

        // Cover the confirmation window: a signal between here and
        // confirm/rollback must explicitly discard the pending commit.
        match options.rollback_builder {
            Some(builder) => safety.register_rollback(builder(device)),
            None => {
                let hostname = device.hostname.clone();
                let commit = otto_commit_id.clone();
                safety.register_rollback(move || {
                    warn!(hostname = %hostname, commit = %commit, "pending confirmed commit left to expire on the router");
                });
            }
        }

        let confirmed = match &options.confirm {
            ConfirmMode::Autonomous => {
                // Let the change soak for the monitoring window, then ask
                // the router itself whether its BGP sessions survived.
                tokio::time::sleep(config.netconf.monitor_window).await;
                if safety.signal_flag().is_set() {
                    warn!(hostname = %device.hostname, "shutdown requested during confirmation window, withholding confirm");
                    false
                } else {
                    match session.health_check().await {
                        Ok(()) => true,
                        Err(err) => {
                            warn!(hostname = %device.hostname, error = %err, "health check failed, letting the confirmation window expire");
                            false
                        }
                    }
                }
            }
            ConfirmMode::Interactive(decision) => decision(),
        };

        let result = if confirmed {
            match session.confirm_commit().await {
                Ok(()) => {
                    emit(NotificationEvent::new(
                        NetconfEventType::Commit,
                        &device.hostname,
                        true,
                        format!(
                            "otto_commit_id={otto_commit_id} router_commit_id={router_commit_id} auto_apply_threshold={} (informational)",
                            u32::from(config.autonomous.auto_apply_threshold)
                        ),
                    ));
                    base(
                        SessionState::Confirmed,
                        true,
                        false,
                        Some(router_commit_id.clone()),
                        0,
                        format!("applied: commit {router_commit_id}"),
                    )
                }
                Err(err) => {
                    let _ = session.cancel_commit().await;
                    emit(NotificationEvent::new(
                        NetconfEventType::Rollback,
                        &device.hostname,
                        true,
                        format!("confirm failed, rolled back: {err}"),
                    ));
                    base(
                        SessionState::RolledBack,
                        false,
                        true,
                        Some(router_commit_id.clone()),
                        0,
                        format!("confirm failed, rolled back: {err}"),
                    )
                }
            }
        } else {
            let _ = session.cancel_commit().await;
            let reason = if autonomous {
                "rolled back: confirmation window expired"
            } else {
                "rolled back: confirmation withheld"
            };
            emit(NotificationEvent::new(
                NetconfEventType::Rollback,
                &device.hostname,
                true,
                reason,
            ));
            base(
                SessionState::RolledBack,
                false,
                true,
                Some(router_commit_id.clone()),
                0,
                reason.to_string(),
            )
        };

        safety.clear_rollback();
        session.close().await;
        emit(NotificationEvent::new(
            NetconfEventType::Disconnect,
            &device.hostname,
            true,
            "disconnected",
        ));

        ApplicationResult {
            notifications_sent: delivered,
            finished_at: Utc::now(),
            ..result
        }
    }

    /// Best-effort cleanup after a fatal load/diff/commit error: discard
    /// any pending changes, tear the session down, and record the failed
    /// disconnect. Returns the message for the `Failed` result.
    async fn fail_and_disconnect(
        session: &mut dyn NetconfSession,
        device: &DeviceInfo,
        reached: SessionState,
        emit: &mut dyn FnMut(NotificationEvent) -> DeliveryStatus,
        err: NetconfError,
    ) -> String {
        error!(hostname = %device.hostname, state = ?reached, error = %err, "netconf operation failed, attempting rollback");
        let _ = session.cancel_commit().await;
        session.close().await;
        emit(NotificationEvent::new(
            NetconfEventType::Disconnect,
            &device.hostname,
            false,
            err.to_string(),
        ));
        err.to_string()
    }
}

fn device_username(device: &DeviceInfo, config: &Config) -> String {
    device
        .username
        .clone()
        .or_else(|| config.netconf.username.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct MockNetconfSession {
        commit_should_fail: bool,
        confirm_should_fail: bool,
        health_should_fail: bool,
        events: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl NetconfSession for MockNetconfSession {
        async fn connect(&mut self, _host: &str, _port: u16, _username: &str) -> Result<(), NetconfError> {
            self.events.lock().unwrap().push("connect");
            Ok(())
        }

        async fn load_candidate(&mut self, _xml: &str) -> Result<(), NetconfError> {
            self.events.lock().unwrap().push("load");
            Ok(())
        }

        async fn diff(&mut self) -> Result<String, NetconfError> {
            self.events.lock().unwrap().push("diff");
            Ok("+ prefix-list AS13335".to_string())
        }

        async fn commit_confirmed(&mut self, _window: Duration) -> Result<String, NetconfError> {
            self.events.lock().unwrap().push("commit");
            if self.commit_should_fail {
                Err(NetconfError::Rpc("commit rejected".to_string()))
            } else {
                Ok("1000".to_string())
            }
        }

        async fn health_check(&mut self) -> Result<(), NetconfError> {
            self.events.lock().unwrap().push("health");
            if self.health_should_fail {
                Err(NetconfError::Rpc("bgp summary unavailable".to_string()))
            } else {
                Ok(())
            }
        }

        async fn confirm_commit(&mut self) -> Result<(), NetconfError> {
            self.events.lock().unwrap().push("confirm");
            if self.confirm_should_fail {
                Err(NetconfError::Rpc("confirm rejected".to_string()))
            } else {
                Ok(())
            }
        }

        async fn cancel_commit(&mut self) -> Result<(), NetconfError> {
            self.events.lock().unwrap().push("cancel");
            Ok(())
        }

        async fn close(&mut self) {
            self.events.lock().unwrap().push("close");
        }
    }

    fn device() -> DeviceInfo {
        DeviceInfo {
            address: "10.1.1.1".to_string(),
            hostname: "r1".to_string(),
            username: None,
            port: 830,
            role: None,
            region: None,
        }
    }

    fn artifact() -> PolicyArtifact {
        PolicyArtifact {
            as_number: 13335,
            policy_name: "AS13335".to_string(),
            juniper_text: "198.51.100.0/24;\n".to_string(),
            source_irr: None,
        }
    }

    fn interactive<'a>(dry_run: bool, decision: &'a (dyn Fn() -> bool + Sync)) -> ApplyOptions<'a> {
        ApplyOptions {
            dry_run,
            verdict: None,
            confirm: ConfirmMode::Interactive(decision),
            rollback_builder: None,
        }
    }

    fn autonomous<'a>() -> ApplyOptions<'a> {
        ApplyOptions {
            dry_run: false,
            verdict: None,
            confirm: ConfirmMode::Autonomous,
            rollback_builder: None,
        }
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.netconf.monitor_window = Duration::from_millis(0);
        config
    }

    #[tokio::test]
    async fn interactive_confirmation_reaches_confirmed_state() {
        let config = fast_config();
        let safety = UnifiedSafetyManager::new(&config);
        let mut session = MockNetconfSession::default();
        let decision = || true;
        let options = interactive(false, &decision);

        let result = NETCONFApplier::apply(&mut session, &device(), &[artifact()], &config, &safety, &options).await;
        assert!(result.success);
        assert_eq!(result.final_state, SessionState::Confirmed);
        assert_eq!(result.policies_applied, 1);
        assert!(!result.rollback_attempted);
        assert_eq!(result.router_commit_id.as_deref(), Some("1000"));
    }

    #[tokio::test]
    async fn withheld_confirmation_rolls_back() {
        let config = fast_config();
        let safety = UnifiedSafetyManager::new(&config);
        let mut session = MockNetconfSession::default();
        let decision = || false;
        let options = interactive(false, &decision);

        let result = NETCONFApplier::apply(&mut session, &device(), &[artifact()], &config, &safety, &options).await;
        assert!(!result.success);
        assert_eq!(result.final_state, SessionState::RolledBack);
        assert!(result.rollback_attempted);
        assert!(session.events.lock().unwrap().contains(&"cancel"));
    }

    #[tokio::test]
    async fn autonomous_confirms_only_after_passing_health_check() {
        let config = fast_config();
        let safety = UnifiedSafetyManager::new(&config);
        let mut session = MockNetconfSession::default();

        let result = NETCONFApplier::apply(&mut session, &device(), &[artifact()], &config, &safety, &autonomous()).await;
        assert!(result.success);
        assert!(result.autonomous);
        assert_eq!(result.final_state, SessionState::Confirmed);
        let events = session.events.lock().unwrap();
        let health_at = events.iter().position(|e| *e == "health").unwrap();
        let confirm_at = events.iter().position(|e| *e == "confirm").unwrap();
        assert!(health_at < confirm_at);
    }

    #[tokio::test]
    async fn failed_health_check_expires_window_and_rolls_back() {
        let config = fast_config();
        let safety = UnifiedSafetyManager::new(&config);
        let mut session = MockNetconfSession {
            health_should_fail: true,
            ..Default::default()
        };

        let result = NETCONFApplier::apply(&mut session, &device(), &[artifact()], &config, &safety, &autonomous()).await;
        assert!(!result.success);
        assert!(result.rollback_attempted);
        assert!(result.message.contains("confirmation window expired"));
        let events = session.events.lock().unwrap();
        assert!(events.contains(&"cancel"));
        assert!(!events.contains(&"confirm"));
    }

    #[tokio::test]
    async fn signal_during_window_withholds_autonomous_confirm() {
        let config = fast_config();
        let safety = UnifiedSafetyManager::new(&config);
        // Healthy router, but a shutdown landed before the window closed.
        safety.trigger_shutdown();
        let mut session = MockNetconfSession::default();

        let result = NETCONFApplier::apply(&mut session, &device(), &[artifact()], &config, &safety, &autonomous()).await;
        assert!(!result.success);
        assert_eq!(result.final_state, SessionState::RolledBack);
        assert!(!session.events.lock().unwrap().contains(&"confirm"));
    }

    #[tokio::test]
    async fn dry_run_stops_after_preview_without_commit() {
        let config = fast_config();
        let safety = UnifiedSafetyManager::new(&config);
        let mut session = MockNetconfSession::default();
        let decision = || true;
        let options = interactive(true, &decision);

        let result = NETCONFApplier::apply(&mut session, &device(), &[artifact()], &config, &safety, &options).await;
        assert!(result.success);
        assert_eq!(result.final_state, SessionState::DryRunComplete);
        assert_eq!(result.policies_applied, 0);
        assert!(!session.events.lock().unwrap().contains(&"commit"));
    }

    #[tokio::test]
    async fn confirm_failure_falls_back_to_cancel() {
        let config = fast_config();
        let safety = UnifiedSafetyManager::new(&config);
        let mut session = MockNetconfSession {
            confirm_should_fail: true,
            ..Default::default()
        };
        let decision = || true;
        let options = interactive(false, &decision);

        let result = NETCONFApplier::apply(&mut session, &device(), &[artifact()], &config, &safety, &options).await;
        assert!(!result.success);
        assert_eq!(result.final_state, SessionState::RolledBack);
        assert!(session.events.lock().unwrap().contains(&"cancel"));
    }

    #[tokio::test]
    async fn commit_failure_attempts_rollback_and_fails() {
        let config = fast_config();
        let safety = UnifiedSafetyManager::new(&config);
        let mut session = MockNetconfSession {
            commit_should_fail: true,
            ..Default::default()
        };
        let decision = || true;
        let options = interactive(false, &decision);

        let result = NETCONFApplier::apply(&mut session, &device(), &[artifact()], &config, &safety, &options).await;
        assert!(!result.success);
        assert_eq!(result.final_state, SessionState::Failed);
        assert!(result.rollback_attempted);
        assert!(session.events.lock().unwrap().contains(&"cancel"));
    }

    #[tokio::test]
    async fn rollback_builder_is_invoked_on_shutdown_during_window() {
        let config = fast_config();
        let safety = UnifiedSafetyManager::new(&config);
        let mut session = MockNetconfSession::default();
        let fired = Arc::new(Mutex::new(false));

        let fired_for_builder = Arc::clone(&fired);
        let builder = move |_device: &DeviceInfo| -> Box<dyn FnOnce() + Send> {
            let fired = Arc::clone(&fired_for_builder);
            Box::new(move || *fired.lock().unwrap() = true)
        };
        let safety_ref = &safety;
        let decision = move || {
            // Simulate SIGTERM landing inside the confirmation window.
            safety_ref.trigger_shutdown();
            false
        };
        let options = ApplyOptions {
            dry_run: false,
            verdict: None,
            confirm: ConfirmMode::Interactive(&decision),
            rollback_builder: Some(&builder),
        };

        let result = NETCONFApplier::apply(&mut session, &device(), &[artifact()], &config, safety_ref, &options).await;
        assert!(!result.success);
        assert!(*fired.lock().unwrap());
    }

    #[tokio::test]
    async fn verdict_is_persisted_on_the_result() {
        let config = fast_config();
        let safety = UnifiedSafetyManager::new(&config);
        let mut session = MockNetconfSession::default();
        let verdict = SafetyVerdict {
            risk_level: Severity::Low,
            risk_factors: vec![],
            blocking: false,
            rationale: "no risk factors triggered".to_string(),
        };
        let options = ApplyOptions {
            dry_run: false,
            verdict: Some(&verdict),
            confirm: ConfirmMode::Autonomous,
            rollback_builder: None,
        };

        let result = NETCONFApplier::apply(&mut session, &device(), &[artifact()], &config, &safety, &options).await;
        assert!(result.success);
        assert!(result.autonomous);
        assert_eq!(result.risk_level, Severity::Low);
    }
}
