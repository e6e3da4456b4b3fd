//! `gapflow` command line

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use gapflow_artifact::{decode_versioned, ArtifactStore};
use gapflow_core::execution::read_evidence;
use gapflow_core::{
    ArtifactReader, Collaborators, EventBus, ExecutionRequest, HealthService, HealthStatus, PipelineConfig, RunConfig,
    RunContext, RunId, RunOrchestrator, SnapshotId, TestEngine,
};
use gapflow_graph::{compute_delta, validate_delta, RunView, ScanResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Scan collaborator backed by an analyzer's JSON output on disk
struct ScanFile(PathBuf);

#[async_trait]
impl Collaborators for ScanFile {
    async fn scan(&self, _ctx: &RunContext) -> anyhow::Result<ScanResult> {
        let text = std::fs::read_to_string(&self.0).with_context(|| format!("reading {}", self.0.display()))?;
        let value: serde_json::Value =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", self.0.display()))?;
        Ok(decode_versioned(&self.0, value)?)
    }
}

fn cli() -> Command {
    let run_id = || Arg::new("run-id").required(true).value_parser(value_parser!(RunId)).help("Run id (ULID)");
    Command::new("gapflow")
        .version(gapflow_core::VERSION)
        .about("API coverage run orchestration with safe apply and rollback")
        .subcommand_required(true)
        .arg(
            Arg::new("workspace")
                .long("workspace")
                .short('w')
                .global(true)
                .default_value(".")
                .value_parser(value_parser!(PathBuf))
                .help("Workspace root"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("JSON logs and JSON output"),
        )
        .subcommand(
            Command::new("analyze")
                .about("Run the pipeline over an analyzer's scan output")
                .arg(
                    Arg::new("scan")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("scan.json produced by the analyzer"),
                ),
        )
        .subcommand(
            Command::new("delta")
                .about("Compare two runs")
                .arg(Arg::new("from").required(true).help("Older run id"))
                .arg(Arg::new("to").required(true).help("Newer run id")),
        )
        .subcommand(Command::new("health").about("Check the artifact folder"))
        .subcommand(Command::new("recover").about("Clean up runs left locked by a crash"))
        .subcommand(Command::new("snapshots").about("List snapshots of a run").arg(run_id()))
        .subcommand(
            Command::new("rollback")
                .about("Restore the workspace from a snapshot")
                .arg(run_id())
                .arg(
                    Arg::new("snapshot")
                        .long("snapshot")
                        .value_parser(value_parser!(SnapshotId))
                        .help("Snapshot id; defaults to the newest"),
                ),
        )
        .subcommand(
            Command::new("exec")
                .about("Run one test file under the execution controller")
                .arg(run_id())
                .arg(Arg::new("file").required(true).help("Workspace-relative test file"))
                .arg(
                    Arg::new("engine")
                        .long("engine")
                        .value_parser(value_parser!(TestEngine))
                        .help("jest, mocha, pytest or shell"),
                )
                .arg(
                    Arg::new("timeout-ms")
                        .long("timeout-ms")
                        .value_parser(value_parser!(u64))
                        .help("Wall-clock limit"),
                )
                .arg(Arg::new("test-id").long("test-id").help("Evidence key; derived from the file if omitted")),
        )
        .subcommand(Command::new("verify").about("Verify a run's mutation log chain").arg(run_id()))
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .init();
    }
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<PipelineConfig> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    }
    .with_env_overrides();
    config.validate()?;
    Ok(config)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let json = matches.get_flag("json");
    init_logging(json);

    let config = load_config(&matches)?;
    let workspace = matches
        .get_one::<PathBuf>("workspace")
        .map_or_else(|| PathBuf::from("."), Clone::clone);
    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("workspace {} not found", workspace.display()))?;
    let store = Arc::new(ArtifactStore::open(config.artifact_root(&workspace), &config.store));
    tracing::debug!(workspace = %workspace.display(), artifacts = %store.root().display(), "starting");

    match matches.subcommand() {
        Some(("analyze", args)) => analyze(args, &config, store, &workspace, json).await,
        Some(("delta", args)) => delta(args, &store, json),
        Some(("health", _)) => {
            let report = HealthService::new(store).run();
            if json {
                print_json(&report)?;
            } else {
                for check in &report.checks {
                    println!("{:<5} {:<20} {}", format!("{:?}", check.status).to_uppercase(), check.name, check.message);
                }
                println!("\n{}", report.summary);
                for step in &report.remediation {
                    println!("  - {step}");
                }
            }
            if report.status == HealthStatus::Fail {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(("recover", _)) => {
            let recovered = HealthService::new(store).recover_locked_runs(&[])?;
            for run in &recovered {
                let to = run.new_state.map_or_else(|| "unlocked".to_string(), |s| s.to_string());
                println!("{} -> {to}", run.run_id);
            }
            println!("{} run(s) recovered", recovered.len());
            Ok(())
        }
        Some(("snapshots", args)) => {
            let run_id = *args.get_one::<RunId>("run-id").context("run id")?;
            let orchestrator = offline(store, &config);
            for snapshot in orchestrator.mutation().list_snapshots(run_id)? {
                println!(
                    "{}  {}  preview={}  files={}",
                    snapshot.snapshot_id,
                    snapshot.created_at.to_rfc3339(),
                    snapshot.preview_id,
                    snapshot.files.len()
                );
            }
            Ok(())
        }
        Some(("rollback", args)) => {
            let run_id = *args.get_one::<RunId>("run-id").context("run id")?;
            let orchestrator = offline(store, &config);
            let outcome = match args.get_one::<SnapshotId>("snapshot") {
                Some(id) => orchestrator.mutation().rollback(*id, run_id).await?,
                None => orchestrator.mutation().rollback_latest(run_id).await?,
            };
            if json {
                print_json(&serde_json::json!({
                    "rollbackId": outcome.rollback_id,
                    "snapshotId": outcome.snapshot_id,
                    "filesRestored": outcome.files_restored,
                    "unchanged": outcome.unchanged,
                }))?;
            } else {
                println!(
                    "rolled back snapshot {}: {} file(s), {} already in place",
                    outcome.snapshot_id, outcome.files_restored, outcome.unchanged
                );
            }
            Ok(())
        }
        Some(("exec", args)) => exec(args, store, &config, json).await,
        Some(("verify", args)) => {
            let run_id = *args.get_one::<RunId>("run-id").context("run id")?;
            let entries = offline(store, &config).mutation().verify_log(run_id)?;
            println!("mutation log of {run_id} intact ({entries} entries)");
            Ok(())
        }
        _ => bail!("unknown command"),
    }
}

/// Orchestrator for commands that never scan
fn offline(store: Arc<ArtifactStore>, config: &PipelineConfig) -> RunOrchestrator {
    RunOrchestrator::new(store, Arc::new(EventBus::new()), Arc::new(ScanFile(PathBuf::new())), config)
}

async fn analyze(
    args: &ArgMatches,
    config: &PipelineConfig,
    store: Arc<ArtifactStore>,
    workspace: &Path,
    json: bool,
) -> anyhow::Result<()> {
    let scan = args.get_one::<PathBuf>("scan").context("scan file")?.clone();
    let orchestrator = RunOrchestrator::new(store, Arc::new(EventBus::new()), Arc::new(ScanFile(scan)), config);
    let run = orchestrator.create_run(workspace, RunConfig::analysis_only())?;
    let summary = orchestrator.execute_run(run.id).await?;

    let report = ArtifactReader::new(Arc::clone(orchestrator.store())).report(run.id)?;
    if json {
        print_json(&serde_json::json!({
            "runId": run.id,
            "state": summary.state,
            "durationMs": summary.duration_ms,
            "summary": report.summary,
            "severity": report.severity,
            "gaps": report.gaps.len(),
        }))?;
    } else {
        println!("run {} {} in {}ms", run.id, summary.state, summary.duration_ms);
        println!(
            "coverage {:.2} ({} of {} endpoints), severity {}",
            report.summary.coverage_ratio,
            report.summary.matched_endpoints,
            report.summary.total_endpoints,
            report.severity
        );
        for rec in &report.recommendations {
            println!("  {}. {}", rec.rank, rec.description);
        }
    }
    Ok(())
}

fn delta(args: &ArgMatches, store: &ArtifactStore, json: bool) -> anyhow::Result<()> {
    let from = args.get_one::<String>("from").context("from")?;
    let to = args.get_one::<String>("to").context("to")?;
    let load = |id: &str| -> anyhow::Result<_> {
        let layout = store.layout(id);
        Ok((
            store.read_versioned::<gapflow_graph::Graph>(layout.graph())?,
            store.read_versioned::<gapflow_graph::Report>(layout.report())?,
        ))
    };
    let (from_graph, from_report) = load(from)?;
    let (to_graph, to_report) = load(to)?;
    let delta = compute_delta(
        RunView {
            run_id: from,
            graph: &from_graph,
            report: &from_report,
        },
        RunView {
            run_id: to,
            graph: &to_graph,
            report: &to_report,
        },
    );
    validate_delta(&delta)?;
    if json {
        print_json(&delta)?;
    } else {
        let s = &delta.statistics;
        println!("{from} -> {to}: {}", delta.trend);
        println!("  endpoints +{} -{}", s.new_endpoints, s.removed_endpoints);
        println!("  gaps      +{} -{}", s.new_gaps, s.resolved_gaps);
        println!("  coverage  {:+.2}", s.coverage_change);
    }
    Ok(())
}

async fn exec(args: &ArgMatches, store: Arc<ArtifactStore>, config: &PipelineConfig, json: bool) -> anyhow::Result<()> {
    let run_id = *args.get_one::<RunId>("run-id").context("run id")?;
    let file = args.get_one::<String>("file").context("test file")?;
    let test_id = args
        .get_one::<String>("test-id")
        .cloned()
        .unwrap_or_else(|| gapflow_artifact::stable_id(&[file.as_str()]));
    let mut request = ExecutionRequest::new(test_id, file.clone());
    if let Some(engine) = args.get_one::<TestEngine>("engine") {
        request = request.with_engine(*engine);
    }
    if let Some(timeout_ms) = args.get_one::<u64>("timeout-ms") {
        request = request.with_timeout_ms(*timeout_ms);
    }

    let orchestrator = offline(Arc::clone(&store), config);
    let result = orchestrator.executor().execute_test(run_id, &request).await?;
    if json {
        print_json(&result)?;
    } else {
        println!("{} {} in {}ms (exit {:?})", result.test_id, result.status, result.duration_ms, result.exit_code);
        let evidence = read_evidence(&store, run_id, &result.test_id)?;
        for artifact in [&evidence.stdout, &evidence.stderr, &evidence.coverage].into_iter().flatten() {
            println!("  {} ({} bytes)", artifact.path.display(), artifact.size);
        }
    }
    if result.status != gapflow_core::ExecutionStatus::Passed {
        std::process::exit(1);
    }
    Ok(())
}
