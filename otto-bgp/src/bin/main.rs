//! Thin CLI shell around the library's invocation entry points. Flag
//! parsing lives entirely here; `otto_bgp::entrypoints` never sees a
//! `clap` type.

use anyhow::Context;
use clap::{Parser, Subcommand};
use otto_bgp::ExitCode;
use otto_bgp::config::store::ConfigStore;
use otto_bgp::config::Config;
use otto_bgp::entrypoints::{self, EntrypointError};
use otto_bgp::pipeline::exit_code_for_context;
use std::path::PathBuf;
use std::process::ExitCode as ProcessExitCode;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "otto-bgp", about = "BGP prefix-list policy lifecycle automation")]
struct Cli {
    /// Path to a JSON configuration overlay.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the device inventory CSV. Required by every subcommand
    /// except `rpki-check` and `test-proxy`.
    #[arg(long, global = true)]
    inventory: Option<PathBuf>,

    /// Stop after the preview stage; never commit to a router.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect raw BGP configuration from every router.
    Collect {
        /// Record unknown host keys into known_hosts instead of failing.
        /// Out-of-band setup only; normal runs verify strictly.
        #[arg(long)]
        setup_host_keys: bool,
    },
    /// Collect, then parse and persist the router-AS discovery mapping.
    Discover,
    /// Collect, discover, then generate prefix-list policies.
    Policy,
    /// Run the full pipeline through NETCONF apply (autonomous mode only).
    Apply,
    /// Run every stage end to end and write the report artifacts.
    Pipeline,
    /// Load the VRP cache and report its staleness.
    RpkiCheck,
    /// Start the configured IRR proxy tunnels, then tear them down.
    TestProxy,
}

fn init_logging(config: &Config) -> anyhow::Result<WorkerGuard> {
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "otto-bgp.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> ProcessExitCode {
    let cli = Cli::parse();
    let config = match ConfigStore::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return ExitCode::Usage.into();
        }
    };

    let _log_guard = match init_logging(&config) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("file logging disabled: {err}");
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .init();
            None
        }
    };

    let needs_inventory = !matches!(cli.command, Command::RpkiCheck | Command::TestProxy);
    let inventory = if needs_inventory {
        match cli.inventory.clone() {
            Some(path) => path,
            None => {
                tracing::error!("this subcommand requires --inventory");
                return ExitCode::Usage.into();
            }
        }
    } else {
        PathBuf::new()
    };

    let result: Result<ExitCode, ProcessExitCode> = match cli.command {
        Command::Collect { setup_host_keys } => {
            entrypoints::collect(&config, &inventory, setup_host_keys)
                .await
                .map(|_| ExitCode::Success)
                .map_err(exit_code_for)
        }
        Command::Discover => entrypoints::discover(&config, &inventory)
            .await
            .map(|_| ExitCode::Success)
            .map_err(exit_code_for),
        Command::Policy => entrypoints::policy(&config, &inventory)
            .await
            .map(|_| ExitCode::Success)
            .map_err(exit_code_for),
        Command::Apply => entrypoints::apply(&config, &inventory, cli.dry_run)
            .await
            .map(|ctx| exit_code_for_context(&ctx))
            .map_err(exit_code_for),
        Command::Pipeline => entrypoints::pipeline(&config, &inventory, cli.dry_run)
            .await
            .map(|ctx| {
                for warning in &ctx.warnings {
                    tracing::warn!(%warning, "pipeline warning");
                }
                exit_code_for_context(&ctx)
            })
            .map_err(exit_code_for),
        Command::RpkiCheck => match entrypoints::rpki_check(&config) {
            Ok((stale, count)) => {
                tracing::info!(stale, records = count, "rpki cache status");
                Ok(ExitCode::Success)
            }
            Err(err) => Err(exit_code_for(err)),
        },
        Command::TestProxy => match entrypoints::test_proxy(&config).await {
            Ok(proxy) => {
                proxy.shutdown().await;
                Ok(ExitCode::Success)
            }
            Err(err) => Err(exit_code_for(err)),
        },
    };

    match result {
        Ok(code) => code.into(),
        Err(code) => code,
    }
}

fn exit_code_for(err: EntrypointError) -> ProcessExitCode {
    tracing::error!(error = %err, "entry point failed");
    let code = match err {
        EntrypointError::Inventory(_) => ExitCode::InputValidationFailed,
        EntrypointError::Lock(_) => ExitCode::GuardrailViolation,
        EntrypointError::Rpki(_) => ExitCode::PolicyValidationFailed,
        EntrypointError::Proxy(_) => ExitCode::NetconfConnectionFailed,
        EntrypointError::Report(_) => ExitCode::General,
    };
    code.into()
}
