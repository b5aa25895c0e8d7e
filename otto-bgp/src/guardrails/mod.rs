//! Always-active risk checks run over a batch of generated policies before
//! they reach the NETCONF applier. Each guardrail is a pure function of
//! its inputs; the engine seeds the non-removable built-in set once in its
//! constructor and never lets callers drop one.

use crate::bgpq4::PolicyArtifact;
use crate::config::Config;
use crate::parser::RouterProfile;
use crate::util::prefixes::{count_prefixes, extract_prefixes};
use ipnetwork::IpNetwork;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone)]
pub struct RiskFactor {
    pub guardrail: &'static str,
    pub severity: Severity,
    pub blocking: bool,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SafetyVerdict {
    pub risk_level: Severity,
    pub risk_factors: Vec<RiskFactor>,
    pub blocking: bool,
    pub rationale: String,
}

/// The previously committed policy state for a router/AS, used by the
/// prefix-count-ratio guardrail. Absent on first run for a given target.
#[derive(Debug, Clone)]
pub struct HistoricalBaseline {
    pub previous_prefix_count: usize,
}

/// Runtime facts a pure `(artifacts, profile, config, baseline)` guardrail
/// can't observe on its own: process-level lock state, a delivered signal,
/// and the RPKI pass computed earlier in the same pipeline run.
#[derive(Debug, Clone, Default)]
pub struct GuardrailContext {
    pub lock_held_by_other_process: bool,
    pub signal_requested: bool,
    pub rpki_invalid_count: usize,
    pub rpki_cache_stale: bool,
    pub projected_session_impact_percent: Option<f64>,
}

pub trait Guardrail: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(
        &self,
        artifacts: &[PolicyArtifact],
        profile: &RouterProfile,
        config: &Config,
        baseline: Option<&HistoricalBaseline>,
        context: &GuardrailContext,
    ) -> Vec<RiskFactor>;
}

fn total_prefix_count(artifacts: &[PolicyArtifact]) -> usize {
    artifacts
        .iter()
        .map(|artifact| count_prefixes(&artifact.juniper_text))
        .sum()
}

struct PrefixCountRatioGuardrail;

impl Guardrail for PrefixCountRatioGuardrail {
    fn name(&self) -> &'static str {
        "prefix_count_ratio"
    }

    fn evaluate(
        &self,
        artifacts: &[PolicyArtifact],
        _profile: &RouterProfile,
        config: &Config,
        baseline: Option<&HistoricalBaseline>,
        _context: &GuardrailContext,
    ) -> Vec<RiskFactor> {
        let Some(baseline) = baseline else {
            return Vec::new();
        };
        if baseline.previous_prefix_count == 0 {
            return Vec::new();
        }

        let current = total_prefix_count(artifacts);
        let ratio = (current as f64 - baseline.previous_prefix_count as f64).abs()
            / baseline.previous_prefix_count as f64;

        let autonomous = config.autonomous.enabled;
        let threshold = if autonomous {
            config.guardrails.prefix_change_ratio_autonomous
        } else {
            config.guardrails.prefix_change_ratio_system
        };

        if ratio > threshold {
            vec![RiskFactor {
                guardrail: self.name(),
                severity: Severity::High,
                blocking: autonomous,
                message: format!(
                    "prefix count changed {:.1}% (baseline {}, current {}), threshold {:.1}%",
                    ratio * 100.0,
                    baseline.previous_prefix_count,
                    current,
                    threshold * 100.0
                ),
            }]
        } else {
            Vec::new()
        }
    }
}

const BOGON_RANGES: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "::/8",
    "fe80::/10",
    "fc00::/7",
    "2001:db8::/32",
    "ff00::/8",
];

struct BogonDetectionGuardrail;

impl Guardrail for BogonDetectionGuardrail {
    fn name(&self) -> &'static str {
        "bogon_detection"
    }

    fn evaluate(
        &self,
        artifacts: &[PolicyArtifact],
        _profile: &RouterProfile,
        _config: &Config,
        _baseline: Option<&HistoricalBaseline>,
        _context: &GuardrailContext,
    ) -> Vec<RiskFactor> {
        let bogons: Vec<IpNetwork> = BOGON_RANGES
            .iter()
            .filter_map(|s| IpNetwork::from_str(s).ok())
            .collect();

        let mut hits = Vec::new();
        for artifact in artifacts {
            for candidate in extract_prefixes(&artifact.juniper_text) {
                if bogons.iter().any(|bogon| {
                    bogon.prefix() <= candidate.prefix() && network_contains(bogon, &candidate)
                }) {
                    hits.push(candidate.to_string());
                }
            }
        }

        if hits.is_empty() {
            Vec::new()
        } else {
            vec![RiskFactor {
                guardrail: self.name(),
                severity: Severity::Critical,
                blocking: true,
                message: format!("bogon prefixes found: {}", hits.join(", ")),
            }]
        }
    }
}

fn network_contains(wide: &IpNetwork, narrow: &IpNetwork) -> bool {
    match (wide, narrow) {
        (IpNetwork::V4(w), IpNetwork::V4(n)) => w.contains(n.network()),
        (IpNetwork::V6(w), IpNetwork::V6(n)) => w.contains(n.network()),
        _ => false,
    }
}

struct ConcurrencyLockGuardrail;

impl Guardrail for ConcurrencyLockGuardrail {
    fn name(&self) -> &'static str {
        "concurrency_lock"
    }

    fn evaluate(
        &self,
        _artifacts: &[PolicyArtifact],
        _profile: &RouterProfile,
        _config: &Config,
        _baseline: Option<&HistoricalBaseline>,
        context: &GuardrailContext,
    ) -> Vec<RiskFactor> {
        if context.lock_held_by_other_process {
            vec![RiskFactor {
                guardrail: self.name(),
                severity: Severity::Critical,
                blocking: true,
                message: "another live process holds the operation lock".to_string(),
            }]
        } else {
            Vec::new()
        }
    }
}

struct SignalStopGuardrail;

impl Guardrail for SignalStopGuardrail {
    fn name(&self) -> &'static str {
        "signal_requested_stop"
    }

    fn evaluate(
        &self,
        _artifacts: &[PolicyArtifact],
        _profile: &RouterProfile,
        _config: &Config,
        _baseline: Option<&HistoricalBaseline>,
        context: &GuardrailContext,
    ) -> Vec<RiskFactor> {
        if context.signal_requested {
            vec![RiskFactor {
                guardrail: self.name(),
                severity: Severity::Critical,
                blocking: true,
                message: "SIGINT/SIGTERM received during execution".to_string(),
            }]
        } else {
            Vec::new()
        }
    }
}

struct RpkiGuardrail;

impl Guardrail for RpkiGuardrail {
    fn name(&self) -> &'static str {
        "rpki"
    }

    fn evaluate(
        &self,
        _artifacts: &[PolicyArtifact],
        _profile: &RouterProfile,
        config: &Config,
        _baseline: Option<&HistoricalBaseline>,
        context: &GuardrailContext,
    ) -> Vec<RiskFactor> {
        if !config.rpki.enabled {
            return Vec::new();
        }

        let mut factors = Vec::new();
        if context.rpki_invalid_count > 0 {
            factors.push(RiskFactor {
                guardrail: self.name(),
                severity: Severity::High,
                blocking: config.autonomous.enabled,
                message: format!("{} RPKI INVALID prefixes", context.rpki_invalid_count),
            });
        }
        if context.rpki_cache_stale {
            let severity = if config.autonomous.enabled {
                Severity::High
            } else {
                Severity::Medium
            };
            factors.push(RiskFactor {
                guardrail: self.name(),
                severity,
                blocking: config.autonomous.enabled,
                message: "RPKI VRP cache is stale".to_string(),
            });
        }
        factors
    }
}

struct SessionImpactGuardrail;

impl Guardrail for SessionImpactGuardrail {
    fn name(&self) -> &'static str {
        "session_impact"
    }

    fn evaluate(
        &self,
        _artifacts: &[PolicyArtifact],
        _profile: &RouterProfile,
        config: &Config,
        _baseline: Option<&HistoricalBaseline>,
        context: &GuardrailContext,
    ) -> Vec<RiskFactor> {
        let Some(projected) = context.projected_session_impact_percent else {
            return Vec::new();
        };
        if projected > config.guardrails.session_impact_percent {
            vec![RiskFactor {
                guardrail: self.name(),
                severity: Severity::Medium,
                blocking: false,
                message: format!(
                    "projected session churn {:.1}% exceeds advisory threshold {:.1}%",
                    projected, config.guardrails.session_impact_percent
                ),
            }]
        } else {
            Vec::new()
        }
    }
}

pub struct GuardrailEngine {
    guardrails: Vec<Box<dyn Guardrail>>,
}

impl Default for GuardrailEngine {
    fn default() -> Self {
        Self {
            guardrails: vec![
                Box::new(PrefixCountRatioGuardrail),
                Box::new(BogonDetectionGuardrail),
                Box::new(ConcurrencyLockGuardrail),
                Box::new(SignalStopGuardrail),
                Box::new(RpkiGuardrail),
                Box::new(SessionImpactGuardrail),
            ],
        }
    }
}

impl GuardrailEngine {
    /// Append an extra guardrail on top of the built-ins. There is no
    /// removal counterpart: the built-in set always runs.
    pub fn with_additional(mut self, guardrail: Box<dyn Guardrail>) -> Self {
        self.guardrails.push(guardrail);
        self
    }

    pub fn evaluate(
        &self,
        artifacts: &[PolicyArtifact],
        profile: &RouterProfile,
        config: &Config,
        baseline: Option<&HistoricalBaseline>,
        context: &GuardrailContext,
    ) -> SafetyVerdict {
        let risk_factors: Vec<RiskFactor> = self
            .guardrails
            .iter()
            .flat_map(|guardrail| guardrail.evaluate(artifacts, profile, config, baseline, context))
            .collect();

        let risk_level = risk_factors
            .iter()
            .map(|factor| factor.severity)
            .max()
            .unwrap_or(Severity::Low);
        let blocking = risk_factors.iter().any(|factor| factor.blocking);

        let rationale = if risk_factors.is_empty() {
            "no risk factors triggered".to_string()
        } else {
            risk_factors
                .iter()
                .map(|factor| format!("{}: {}", factor.guardrail, factor.message))
                .collect::<Vec<_>>()
                .join("; ")
        };

        SafetyVerdict {
            risk_level,
            risk_factors,
            blocking,
            rationale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> RouterProfile {
        RouterProfile::new("r1", "10.0.0.1", String::new())
    }

    fn artifact(text: &str) -> PolicyArtifact {
        PolicyArtifact {
            as_number: 13335,
            policy_name: "AS-CUSTOMER".to_string(),
            juniper_text: text.to_string(),
            source_irr: None,
        }
    }

    #[test]
    fn clean_batch_is_low_risk_and_non_blocking() {
        let engine = GuardrailEngine::default();
        let verdict = engine.evaluate(
            &[artifact("prefix-list AS13335 {\n198.51.0.0/24;\n}\n")],
            &profile(),
            &Config::default(),
            None,
            &GuardrailContext::default(),
        );
        assert_eq!(verdict.risk_level, Severity::Low);
        assert!(!verdict.blocking);
    }

    #[test]
    fn bogon_prefix_is_critical_and_always_blocking() {
        let engine = GuardrailEngine::default();
        let verdict = engine.evaluate(
            &[artifact("prefix-list AS13335 {\n10.0.0.0/24;\n}\n")],
            &profile(),
            &Config::default(),
            None,
            &GuardrailContext::default(),
        );
        assert_eq!(verdict.risk_level, Severity::Critical);
        assert!(verdict.blocking);
    }

    #[test]
    fn prefix_ratio_exceeding_autonomous_threshold_blocks_only_when_autonomous() {
        let mut config = Config::default();
        config.autonomous.enabled = true;
        let engine = GuardrailEngine::default();
        let baseline = HistoricalBaseline {
            previous_prefix_count: 10,
        };
        let text = (0..20)
            .map(|i| format!("198.51.{i}.0/24;\n"))
            .collect::<String>();
        let verdict = engine.evaluate(
            &[artifact(&text)],
            &profile(),
            &config,
            Some(&baseline),
            &GuardrailContext::default(),
        );
        assert!(verdict.blocking);
    }

    #[test]
    fn ratio_exactly_at_threshold_does_not_trigger() {
        let engine = GuardrailEngine::default();
        let baseline = HistoricalBaseline {
            previous_prefix_count: 100,
        };
        let policy = |count: usize| {
            let text = (0..count)
                .map(|i| format!("198.51.{}.{}/32;\n", i / 256, i % 256))
                .collect::<String>();
            artifact(&text)
        };

        // Default system threshold is 25%: 125 prefixes is exactly at it.
        let at = engine.evaluate(
            &[policy(125)],
            &profile(),
            &Config::default(),
            Some(&baseline),
            &GuardrailContext::default(),
        );
        assert!(at.risk_factors.iter().all(|f| f.guardrail != "prefix_count_ratio"));

        let above = engine.evaluate(
            &[policy(126)],
            &profile(),
            &Config::default(),
            Some(&baseline),
            &GuardrailContext::default(),
        );
        assert!(above.risk_factors.iter().any(|f| f.guardrail == "prefix_count_ratio"));
    }

    #[test]
    fn signal_requested_stop_always_blocks() {
        let engine = GuardrailEngine::default();
        let context = GuardrailContext {
            signal_requested: true,
            ..Default::default()
        };
        let verdict = engine.evaluate(&[], &profile(), &Config::default(), None, &context);
        assert!(verdict.blocking);
        assert_eq!(verdict.risk_level, Severity::Critical);
    }

    #[test]
    fn additional_guardrails_compose_with_builtins() {
        struct AlwaysMedium;
        impl Guardrail for AlwaysMedium {
            fn name(&self) -> &'static str {
                "always_medium"
            }

            fn evaluate(
                &self,
                _artifacts: &[PolicyArtifact],
                _profile: &RouterProfile,
                _config: &Config,
                _baseline: Option<&HistoricalBaseline>,
                _context: &GuardrailContext,
            ) -> Vec<RiskFactor> {
                vec![RiskFactor {
                    guardrail: "always_medium",
                    severity: Severity::Medium,
                    blocking: false,
                    message: "injected".to_string(),
                }]
            }
        }

        let engine = GuardrailEngine::default().with_additional(Box::new(AlwaysMedium));
        let verdict = engine.evaluate(
            &[artifact("prefix-list X {\n10.0.0.0/24;\n}\n")],
            &profile(),
            &Config::default(),
            None,
            &GuardrailContext::default(),
        );
        // The injected check runs alongside the built-ins, which still
        // flag the bogon.
        assert!(verdict.risk_factors.iter().any(|f| f.guardrail == "always_medium"));
        assert_eq!(verdict.risk_level, Severity::Critical);
    }

    #[test]
    fn session_impact_is_advisory_only() {
        let mut config = Config::default();
        config.guardrails.session_impact_percent = 5.0;
        let context = GuardrailContext {
            projected_session_impact_percent: Some(20.0),
            ..Default::default()
        };
        let engine = GuardrailEngine::default();
        let verdict = engine.evaluate(&[], &profile(), &config, None, &context);
        assert_eq!(verdict.risk_level, Severity::Medium);
        assert!(!verdict.blocking);
    }
}
