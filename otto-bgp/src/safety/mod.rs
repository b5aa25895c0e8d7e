//! Combines `GuardrailEngine` with `NotificationSink` into the single
//! decision point the pipeline consults before an autonomous apply, plus
//! the signal-driven rollback registry NETCONFApplier relies on during a
//! confirmed-commit window.

use crate::bgpq4::PolicyArtifact;
use crate::config::Config;
use crate::event::broadcaster::unbounded::UnboundedBroadcast;
use crate::event::channel::EventConsumer;
use crate::event::{DeliveryStatus, NotificationEvent};
use crate::guardrails::{GuardrailContext, GuardrailEngine, HistoricalBaseline, SafetyVerdict, Severity};
use crate::notify::NotificationSink;
use crate::parser::RouterProfile;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

type RollbackFn = Box<dyn FnOnce() + Send>;

/// Shared signal flag. A single `ctrlc` handler installed once per process
/// flips this rather than touching any other global mutable state.
#[derive(Clone, Default)]
pub struct SignalFlag(Arc<AtomicBool>);

impl SignalFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct UnifiedSafetyManager {
    guardrails: GuardrailEngine,
    notifier: NotificationSink,
    events: UnboundedBroadcast<NotificationEvent>,
    signal: SignalFlag,
    rollbacks: Mutex<Vec<RollbackFn>>,
}

impl UnifiedSafetyManager {
    pub fn new(config: &Config) -> Self {
        Self {
            guardrails: GuardrailEngine::default(),
            notifier: NotificationSink::new(config.smtp.clone()),
            events: UnboundedBroadcast::new(),
            signal: SignalFlag::default(),
            rollbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn signal_flag(&self) -> SignalFlag {
        self.signal.clone()
    }

    /// Observe every NETCONF lifecycle event this manager emits, in
    /// emission order. Used by progress renderers and test harnesses.
    pub fn subscribe_events(&self) -> EventConsumer<NotificationEvent> {
        self.events.subscribe()
    }

    /// Install a process-wide SIGINT/SIGTERM handler that refuses further
    /// work, runs every registered rollback, and exits with the dedicated
    /// signal exit code.
    pub fn install_signal_handler(self: &Arc<Self>) -> Result<(), ctrlc::Error> {
        let manager = Arc::clone(self);
        ctrlc::set_handler(move || {
            manager.trigger_shutdown();
            std::process::exit(crate::ExitCode::Sigterm as i32);
        })
    }

    /// The signal handler's body, separated so shutdown behavior is
    /// testable without delivering a real signal: flips the flag (new work
    /// is refused via the signal guardrail) and drains the rollback
    /// registry in registration order.
    pub fn trigger_shutdown(&self) {
        self.signal.set();
        let mut rollbacks = self.rollbacks.lock().unwrap();
        for rollback in rollbacks.drain(..) {
            rollback();
        }
    }

    pub fn register_rollback(&self, rollback: impl FnOnce() + Send + 'static) {
        self.rollbacks.lock().unwrap().push(Box::new(rollback));
    }

    pub fn clear_rollback(&self) {
        self.rollbacks.lock().unwrap().clear();
    }

    pub fn evaluate(
        &self,
        artifacts: &[PolicyArtifact],
        profile: &RouterProfile,
        config: &Config,
        baseline: Option<&HistoricalBaseline>,
        context: &GuardrailContext,
    ) -> SafetyVerdict {
        let mut context = context.clone();
        context.signal_requested = context.signal_requested || self.signal.is_set();
        self.guardrails.evaluate(artifacts, profile, config, baseline, &context)
    }

    /// True iff autonomous mode is enabled, the verdict is low-risk and
    /// non-blocking, and RPKI passed when it is enabled. Never consults
    /// `auto_apply_threshold`; see DESIGN.md Open Question #3.
    pub fn should_auto_apply(&self, verdict: &SafetyVerdict, config: &Config) -> bool {
        if !config.autonomous.enabled {
            return false;
        }
        if verdict.blocking || verdict.risk_level != Severity::Low {
            return false;
        }
        if config.rpki.enabled && verdict.risk_factors.iter().any(|f| f.guardrail == "rpki") {
            return false;
        }
        true
    }

    /// Dispatch one lifecycle event: best-effort SMTP, then fan-out to
    /// subscribers with the final delivery status stamped on the event.
    pub fn emit_netconf_event(&self, mut event: NotificationEvent) -> DeliveryStatus {
        info!(event = event.event_type.as_str(), hostname = %event.hostname, success = event.success, "netconf event");
        event.delivery_status = self.notifier.send_event(&event);
        let status = event.delivery_status;
        self.events.broadcast(event);
        status
    }
}

impl Drop for UnifiedSafetyManager {
    fn drop(&mut self) {
        if let Ok(rollbacks) = self.rollbacks.lock() {
            if !rollbacks.is_empty() {
                warn!(count = rollbacks.len(), "safety manager dropped with unrun rollbacks");
            }
        }
    }
}
