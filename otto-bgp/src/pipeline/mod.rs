//! Sequences the six pipeline stages: Collect, Discover, Generate,
//! Validate, Apply, Report. Stage functions take and return a
//! `PipelineContext` rather than mutating global state, so each stage stays
//! independently testable.

pub mod artifacts;

use crate::bgpq4::{BGPq4Wrapper, CommandRunner, PolicyArtifact};
use crate::collector::{CollectionResult, SSHCollector, SshSession};
use crate::config::Config;
use crate::discovery::{DiscoveryStore, WriteOutcome};
use crate::guardrails::{GuardrailContext, HistoricalBaseline};
use crate::inventory::DeviceInfo;
use crate::netconf::{ApplicationResult, ApplyOptions, ConfirmMode, NETCONFApplier, NetconfSession, RollbackBuilder, SessionState};
use crate::parser::{BGPConfigParser, RouterProfile};
use crate::rpki::{PolicyRpkiSummary, RPKIValidator};
use crate::safety::UnifiedSafetyManager;
use artifacts::PolicyFiles;
use otto_bgp_fs::file::LocalFile;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    pub stage_durations: BTreeMap<String, Duration>,
}

impl ExecutionMetrics {
    fn record(&mut self, stage: &str, elapsed: Duration) {
        self.stage_durations.insert(stage.to_string(), elapsed);
    }
}

/// Threaded through every stage. Each stage only reads/appends the fields
/// it owns; nothing is mutated out from under a later stage.
pub struct PipelineContext {
    pub execution_id: Uuid,
    pub current_stage: &'static str,
    pub devices: Vec<DeviceInfo>,
    pub collection_results: Vec<CollectionResult>,
    pub profiles: Vec<RouterProfile>,
    pub discovery_outcome: Option<WriteOutcome>,
    pub artifacts: Vec<PolicyArtifact>,
    pub generation_errors: Vec<String>,
    pub rpki_summaries: BTreeMap<String, PolicyRpkiSummary>,
    pub rpki_cache_stale: bool,
    pub apply_results: Vec<ApplicationResult>,
    pub warnings: Vec<String>,
    pub metrics: ExecutionMetrics,
}

impl PipelineContext {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            current_stage: "idle",
            devices,
            collection_results: Vec::new(),
            profiles: Vec::new(),
            discovery_outcome: None,
            artifacts: Vec::new(),
            generation_errors: Vec::new(),
            rpki_summaries: BTreeMap::new(),
            rpki_cache_stale: false,
            apply_results: Vec::new(),
            warnings: Vec::new(),
            metrics: ExecutionMetrics::default(),
        }
    }

    /// Hostnames that failed collection and were dropped from downstream
    /// stages.
    pub fn failed_devices(&self) -> Vec<&str> {
        self.collection_results
            .iter()
            .filter(|result| result.error.is_some())
            .map(|result| result.hostname.as_str())
            .collect()
    }
}

/// Maps the finished context to the process exit code: guardrail-blocked
/// autonomous applies dominate, then hard apply failures. Partial
/// collection failures alone still count as success.
pub fn exit_code_for_context(ctx: &PipelineContext) -> crate::ExitCode {
    if ctx
        .apply_results
        .iter()
        .any(|result| result.manual_approval_required)
    {
        return crate::ExitCode::AutonomousOperationBlocked;
    }
    if ctx
        .apply_results
        .iter()
        .any(|result| result.final_state == SessionState::Failed)
    {
        return crate::ExitCode::NetconfConnectionFailed;
    }
    crate::ExitCode::Success
}

pub struct PipelineOrchestrator;

impl PipelineOrchestrator {
    pub async fn collect(
        mut ctx: PipelineContext,
        config: &Config,
        session_factory: Arc<dyn Fn() -> Box<dyn SshSession> + Send + Sync>,
    ) -> PipelineContext {
        let started = Instant::now();
        ctx.current_stage = "collect";

        let results = SSHCollector::collect_all(&ctx.devices, config, session_factory)
            .instrument(info_span!("stage", stage = "collect"))
            .await;
        for result in &results {
            if let Some(error) = &result.error {
                if error.is_security_event() {
                    warn!(security = true, hostname = %result.hostname, error = %error, "security event during collection");
                }
                ctx.warnings
                    .push(format!("collect: {} failed: {error}", result.hostname));
            }
        }
        ctx.collection_results = results;
        ctx.metrics.record("collect", started.elapsed());
        ctx
    }

    pub fn discover(mut ctx: PipelineContext, output_dir: &Path) -> PipelineContext {
        let span = info_span!("stage", stage = "discover");
        let _guard = span.enter();
        let started = Instant::now();
        ctx.current_stage = "discover";

        ctx.profiles = BGPConfigParser::parse_all(&ctx.collection_results);

        match DiscoveryStore::write(&ctx.profiles, output_dir) {
            Ok(outcome) => ctx.discovery_outcome = Some(outcome),
            Err(err) => ctx.warnings.push(format!("discover: failed to persist mapping: {err}")),
        }

        ctx.metrics.record("discover", started.elapsed());
        ctx
    }

    pub async fn generate(
        mut ctx: PipelineContext,
        config: &Config,
        runner: Arc<dyn CommandRunner>,
        proxy_snapshot: Option<Arc<BTreeMap<String, u16>>>,
        output_dir: &Path,
    ) -> PipelineContext {
        let started = Instant::now();
        ctx.current_stage = "generate";

        let mut as_numbers: Vec<u32> = ctx
            .profiles
            .iter()
            .flat_map(|profile| profile.discovered_as_numbers.iter().copied())
            .collect();
        as_numbers.sort_unstable();
        as_numbers.dedup();

        if as_numbers.is_empty() {
            ctx.warnings
                .push("generate: no AS numbers discovered, skipping Apply".to_string());
            ctx.metrics.record("generate", started.elapsed());
            return ctx;
        }

        let targets: Vec<(u32, String)> = as_numbers
            .iter()
            .map(|asn| (*asn, format!("AS{asn}")))
            .collect();

        let results = BGPq4Wrapper::generate_batch(runner, &targets, &config.bgpq4, proxy_snapshot)
            .instrument(info_span!("stage", stage = "generate"))
            .await;

        for (result, (as_number, _)) in results.into_iter().zip(targets.iter()) {
            match result {
                Ok(artifact) => ctx.artifacts.push(artifact),
                Err(err) => ctx.generation_errors.push(format!("AS{as_number}: {err}")),
            }
        }

        if !ctx.artifacts.is_empty() {
            if let Err(err) =
                PolicyFiles::write_router_aware(&LocalFile, &ctx.profiles, &ctx.artifacts, output_dir)
            {
                ctx.warnings.push(format!("generate: {err}"));
            }
            if let Err(err) = PolicyFiles::write_combined(&LocalFile, &ctx.artifacts, output_dir) {
                ctx.warnings.push(format!("generate: {err}"));
            }
        }

        ctx.metrics.record("generate", started.elapsed());
        ctx
    }

    pub fn validate(mut ctx: PipelineContext, config: &Config) -> PipelineContext {
        let span = info_span!("stage", stage = "validate");
        let _guard = span.enter();
        let started = Instant::now();
        ctx.current_stage = "validate";

        let Some(cache_dir) = config.rpki.cache_dir.as_deref() else {
            if config.rpki.enabled {
                ctx.warnings
                    .push("validate: rpki enabled but no cache_dir configured".to_string());
            }
            ctx.metrics.record("validate", started.elapsed());
            return ctx;
        };
        if !config.rpki.enabled {
            ctx.metrics.record("validate", started.elapsed());
            return ctx;
        }

        let index = match RPKIValidator::load_cache(cache_dir) {
            Ok(index) => index,
            Err(err) => {
                ctx.warnings.push(format!("validate: failed to load VRP cache: {err}"));
                ctx.metrics.record("validate", started.elapsed());
                return ctx;
            }
        };

        ctx.rpki_cache_stale = index.is_stale(config.rpki.max_age, chrono::Utc::now());
        if ctx.rpki_cache_stale {
            ctx.warnings.push(format!(
                "validate: VRP cache is stale (loaded_at {})",
                index.loaded_at.to_rfc3339()
            ));
        }

        for artifact in &ctx.artifacts {
            let summary = RPKIValidator::validate_artifact(
                &index,
                artifact,
                &config.rpki,
                config.autonomous.enabled && ctx.rpki_cache_stale,
                10,
            );
            ctx.rpki_summaries.insert(artifact.policy_name.clone(), summary);
        }

        ctx.metrics.record("validate", started.elapsed());
        ctx
    }

    /// Autonomous-mode only. Per-router apply, gated by `UnifiedSafetyManager`;
    /// sequential across routers, per the default single-router-at-a-time
    /// application policy.
    pub async fn apply(
        mut ctx: PipelineContext,
        config: &Config,
        safety: &UnifiedSafetyManager,
        baselines: &BTreeMap<String, HistoricalBaseline>,
        session_factory: impl Fn() -> Box<dyn NetconfSession>,
        rollback_builder: Option<RollbackBuilder<'_>>,
        dry_run: bool,
    ) -> PipelineContext {
        let started = Instant::now();
        ctx.current_stage = "apply";

        if !config.autonomous.enabled {
            ctx.metrics.record("apply", started.elapsed());
            return ctx;
        }
        if ctx.artifacts.is_empty() {
            ctx.warnings.push("apply: no artifacts generated, skipping".to_string());
            ctx.metrics.record("apply", started.elapsed());
            return ctx;
        }

        let rpki_invalid_count = ctx.rpki_summaries.values().map(|summary| summary.invalid).sum();

        for profile in &ctx.profiles {
            let Some(device) = ctx.devices.iter().find(|d| d.hostname == profile.hostname) else {
                continue;
            };

            let router_artifacts: Vec<PolicyArtifact> = ctx
                .artifacts
                .iter()
                .filter(|artifact| profile.discovered_as_numbers.contains(&artifact.as_number))
                .cloned()
                .collect();
            if router_artifacts.is_empty() {
                continue;
            }

            let context = GuardrailContext {
                lock_held_by_other_process: false,
                signal_requested: false,
                rpki_invalid_count,
                rpki_cache_stale: ctx.rpki_cache_stale,
                projected_session_impact_percent: None,
            };
            let baseline = baselines.get(&profile.hostname);
            let verdict = safety.evaluate(&router_artifacts, profile, config, baseline, &context);

            if !safety.should_auto_apply(&verdict, config) {
                ctx.warnings.push(format!(
                    "apply: {} blocked by guardrails: {}",
                    profile.hostname, verdict.rationale
                ));
                ctx.apply_results
                    .push(ApplicationResult::blocked(&profile.hostname, &verdict, true));
                continue;
            }

            let mut session = session_factory();
            let options = ApplyOptions {
                dry_run,
                verdict: Some(&verdict),
                confirm: ConfirmMode::Autonomous,
                rollback_builder,
            };
            let result =
                NETCONFApplier::apply(session.as_mut(), device, &router_artifacts, config, safety, &options)
                    .instrument(info_span!("device", hostname = %profile.hostname))
                    .await;
            ctx.apply_results.push(result);
        }

        ctx.metrics.record("apply", started.elapsed());
        ctx
    }

    pub fn report(ctx: &PipelineContext, output_dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(output_dir)?;

        let mut matrix = csv::Writer::from_path(output_dir.join("discovery_matrix.csv"))?;
        matrix.write_record(["hostname", "address", "as_numbers"])?;
        for profile in &ctx.profiles {
            let as_list = profile
                .discovered_as_numbers
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(";");
            matrix.write_record([&profile.hostname, &profile.address, &as_list])?;
        }
        matrix.flush()?;

        let mut as_distribution: BTreeMap<u32, usize> = BTreeMap::new();
        for profile in &ctx.profiles {
            for asn in &profile.discovered_as_numbers {
                *as_distribution.entry(*asn).or_insert(0) += 1;
            }
        }
        std::fs::write(
            output_dir.join("as_distribution.json"),
            serde_json::to_string_pretty(&as_distribution)?,
        )?;

        let performance_summary: BTreeMap<&str, f64> = ctx
            .metrics
            .stage_durations
            .iter()
            .map(|(stage, duration)| (stage.as_str(), duration.as_secs_f64()))
            .collect();
        std::fs::write(
            output_dir.join("performance_summary.json"),
            serde_json::to_string_pretty(&performance_summary)?,
        )?;

        let apply_verdicts: Vec<serde_json::Value> = ctx
            .apply_results
            .iter()
            .map(|result| {
                serde_json::json!({
                    "router": result.hostname,
                    "success": result.success,
                    "autonomous": result.autonomous,
                    "risk_level": format!("{:?}", result.risk_level),
                    "manual_approval_required": result.manual_approval_required,
                    "commit_id": result.router_commit_id,
                    "reason": result.message,
                })
            })
            .collect();
        let rpki_invalid_total: usize = ctx.rpki_summaries.values().map(|s| s.invalid).sum();
        let report = serde_json::json!({
            "execution_id": ctx.execution_id.to_string(),
            "devices_total": ctx.devices.len(),
            "devices_failed": ctx.failed_devices(),
            "policies_generated": ctx.artifacts.len(),
            "generation_errors": ctx.generation_errors,
            "rpki_invalid_total": rpki_invalid_total,
            "rpki_cache_stale": ctx.rpki_cache_stale,
            "apply_verdicts": apply_verdicts,
            "warnings": ctx.warnings,
        });
        std::fs::write(
            output_dir.join("pipeline_report.json"),
            serde_json::to_string_pretty(&report)?,
        )?;

        if let Some(WriteOutcome::Changed { changes }) = &ctx.discovery_outcome {
            let report = format!(
                "added routers: {:?}\nremoved routers: {:?}\nadded AS numbers: {:?}\nremoved AS numbers: {:?}\n",
                changes.added_routers, changes.removed_routers, changes.added_as_numbers, changes.removed_as_numbers
            );
            std::fs::write(output_dir.join("change_report.txt"), report)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bgpq4::{Bgpq4Error, CommandOutput, ExecutableData};
    use crate::collector::CollectionResult;
    use async_trait::async_trait;

    struct NoopRunner;

    #[async_trait]
    impl CommandRunner for NoopRunner {
        async fn run(
            &self,
            _executable: &ExecutableData,
            _timeout: Duration,
        ) -> Result<CommandOutput, Bgpq4Error> {
            Ok(CommandOutput {
                success: true,
                stdout: "192.0.2.0/24;\n".to_string(),
                stderr: String::new(),
            })
        }

        async fn probe(&self, bin: &str) -> bool {
            bin == "bgpq4"
        }
    }

    fn profile(hostname: &str, as_numbers: &[u32]) -> RouterProfile {
        let mut profile = RouterProfile::new(hostname, "10.0.0.1", String::new());
        profile.discovered_as_numbers.extend(as_numbers);
        profile
    }

    fn artifact(as_number: u32, text: &str) -> PolicyArtifact {
        PolicyArtifact {
            as_number,
            policy_name: format!("AS{as_number}"),
            juniper_text: text.to_string(),
            source_irr: None,
        }
    }

    #[test]
    fn discover_parses_only_successful_collections() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = PipelineContext::new(vec![]);
        ctx.collection_results = vec![
            CollectionResult {
                hostname: "r1".to_string(),
                address: "10.0.0.1".to_string(),
                raw_config: Some(
                    "protocols { bgp { group EXT { neighbor 10.0.0.2 { peer-as 13335; } } } }".to_string(),
                ),
                error: None,
            },
            CollectionResult {
                hostname: "r2".to_string(),
                address: "10.0.0.2".to_string(),
                raw_config: None,
                error: None,
            },
        ];

        let ctx = PipelineOrchestrator::discover(ctx, tmp.path());
        assert_eq!(ctx.profiles.len(), 1);
        assert_eq!(ctx.profiles[0].hostname, "r1");
    }

    #[tokio::test]
    async fn generate_skips_when_no_as_numbers_discovered() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::default();
        let mut ctx = PipelineContext::new(vec![]);
        ctx.profiles = vec![profile("r1", &[])];

        let ctx = PipelineOrchestrator::generate(ctx, &config, Arc::new(NoopRunner), None, tmp.path()).await;
        assert!(ctx.artifacts.is_empty());
        assert!(ctx.warnings.iter().any(|w| w.contains("skipping Apply")));
    }

    #[tokio::test]
    async fn generate_writes_router_aware_policy_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.bgpq4.mode = crate::config::Bgpq4Mode::Native;
        let mut ctx = PipelineContext::new(vec![]);
        ctx.profiles = vec![profile("r1", &[13335])];

        let ctx = PipelineOrchestrator::generate(ctx, &config, Arc::new(NoopRunner), None, tmp.path()).await;
        assert_eq!(ctx.artifacts.len(), 1);
        assert!(tmp.path().join("routers/r1/AS13335_policy.txt").is_file());
        assert!(tmp.path().join("bgpq4_output.txt").is_file());
    }

    #[test]
    fn validate_is_noop_when_rpki_disabled() {
        let config = Config::default();
        let mut ctx = PipelineContext::new(vec![]);
        ctx.artifacts.push(artifact(13335, "198.51.100.0/24;"));

        let ctx = PipelineOrchestrator::validate(ctx, &config);
        assert!(ctx.rpki_summaries.is_empty());
    }

    #[tokio::test]
    async fn apply_is_noop_outside_autonomous_mode() {
        let config = Config::default();
        let safety = UnifiedSafetyManager::new(&config);
        let mut ctx = PipelineContext::new(vec![]);
        ctx.artifacts.push(artifact(13335, "198.51.100.0/24;"));

        let ctx = PipelineOrchestrator::apply(
            ctx,
            &config,
            &safety,
            &BTreeMap::new(),
            || panic!("should not be called when autonomous mode is disabled"),
            None,
            false,
        )
        .await;
        assert!(ctx.apply_results.is_empty());
    }

    #[test]
    fn blocked_apply_maps_to_blocked_exit_code() {
        use crate::guardrails::Severity;
        let mut ctx = PipelineContext::new(vec![]);
        let verdict = crate::guardrails::SafetyVerdict {
            risk_level: Severity::Critical,
            risk_factors: vec![],
            blocking: true,
            rationale: "bogon prefixes found".to_string(),
        };
        ctx.apply_results
            .push(ApplicationResult::blocked("r1", &verdict, true));
        assert_eq!(
            exit_code_for_context(&ctx),
            crate::ExitCode::AutonomousOperationBlocked
        );
    }

    #[test]
    fn clean_context_maps_to_success() {
        let ctx = PipelineContext::new(vec![]);
        assert_eq!(exit_code_for_context(&ctx), crate::ExitCode::Success);
    }
}
