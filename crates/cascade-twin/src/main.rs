//! cascade-twin: forecasting and closed-loop stabilization against a
//! simulated infrastructure network

mod infra;

use anyhow::{bail, Context, Result};
use cascade_control::{CascadeEngine, Collaborators, EngineConfig, EngineSnapshot};
use cascade_forecast::{DependencyGraph, FailureMode, ForecastError, NodeId, TopologySpec};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use infra::{SimulatedInfrastructure, TwinSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Config file layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct TwinConfig {
    engine: EngineConfig,
    world: TwinSettings,
}

struct Session {
    engine: Arc<CascadeEngine>,
    twin: Arc<SimulatedInfrastructure>,
    name: String,
}

fn parse_mode(s: &str) -> Result<FailureMode, ForecastError> {
    s.parse()
}

fn node_arg() -> Arg {
    Arg::new("node")
        .long("node")
        .required(true)
        .help("Node that fails first")
}

fn mode_arg() -> Arg {
    Arg::new("mode")
        .long("mode")
        .default_value("equipment_failure")
        .value_parser(parse_mode)
        .help("Failure mode: overload, weather_damage, structural_damage, equipment_failure, power_outage, connectivity_loss")
}

fn cli() -> Command {
    Command::new("cascade-twin")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Cascade forecasting and closed-loop stabilization digital twin")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("topology")
                .long("topology")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Topology file (.json, .yaml, .toml); defaults to the built-in metro network"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML config with [engine] and [world] sections"),
        )
        .arg(
            Arg::new("state")
                .long("state")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Engine snapshot to resume from and save to"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .global(true)
                .value_parser(value_parser!(u64))
                .help("Seed for simulations and the simulated world"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Log output format"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print results as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a Monte-Carlo cascade simulation")
                .arg(node_arg())
                .arg(mode_arg())
                .arg(
                    Arg::new("trials")
                        .long("trials")
                        .value_parser(value_parser!(usize))
                        .help("Number of trials"),
                ),
        )
        .subcommand(
            Command::new("critical")
                .about("Rank nodes by stabilization priority")
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .default_value("10")
                        .value_parser(value_parser!(usize))
                        .help("Number of nodes to show"),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Plan pre-stabilization for a predicted failure")
                .arg(node_arg())
                .arg(mode_arg())
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .default_value("5")
                        .value_parser(value_parser!(usize))
                        .help("Number of strategies to show"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Run the closed-loop controller against the simulated world")
                .arg(
                    Arg::new("duration")
                        .long("duration")
                        .default_value("30")
                        .value_parser(value_parser!(u64))
                        .help("Seconds to run before shutting down"),
                )
                .arg(
                    Arg::new("fault")
                        .long("fault")
                        .action(ArgAction::Append)
                        .help("Node to fault at startup (repeatable)"),
                )
                .arg(
                    Arg::new("drain")
                        .long("drain")
                        .default_value("60")
                        .value_parser(value_parser!(u64))
                        .help("Seconds to wait for active loops after shutdown"),
                ),
        )
        .subcommand(
            Command::new("report")
                .about("Summarize engine state")
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .default_value("10")
                        .value_parser(value_parser!(usize))
                        .help("Number of completed loops to show"),
                ),
        )
}

fn init_logging(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<TwinConfig> {
    let Some(path) = path else {
        return Ok(TwinConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn load_topology(path: Option<&PathBuf>) -> Result<TopologySpec> {
    match path {
        Some(path) => {
            TopologySpec::load(path).with_context(|| format!("loading topology {}", path.display()))
        }
        None => Ok(TopologySpec::metro_reference()?),
    }
}

fn open_session(
    topology_path: Option<&PathBuf>,
    state_path: Option<&Path>,
    mut config: TwinConfig,
    seed: Option<u64>,
) -> Result<Session> {
    if let Some(seed) = seed {
        config.engine.forecast.simulation.seed = Some(seed);
    }

    let snapshot = match state_path.filter(|p| p.exists()) {
        Some(path) => Some(
            EngineSnapshot::load(path)
                .with_context(|| format!("loading state {}", path.display()))?,
        ),
        None => None,
    };
    let topology = match &snapshot {
        Some(snapshot) => snapshot.topology.clone(),
        None => load_topology(topology_path)?,
    };
    let name = if topology.name.is_empty() {
        "twin".to_string()
    } else {
        topology.name.clone()
    };

    let twin = Arc::new(SimulatedInfrastructure::new(
        &topology,
        config.world.clone(),
        seed.unwrap_or_else(rand::random),
    ));
    let collaborators = Collaborators::new(twin.clone(), twin.clone(), twin.clone());
    let engine = match snapshot {
        Some(snapshot) => CascadeEngine::restore(snapshot, collaborators, config.engine)?,
        None => CascadeEngine::new(
            DependencyGraph::from_topology(&topology)?,
            collaborators,
            config.engine,
        ),
    };

    Ok(Session {
        engine: Arc::new(engine),
        twin,
        name,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn simulate(session: &Session, args: &ArgMatches, json: bool) -> Result<()> {
    let node = NodeId::new(args.get_one::<String>("node").cloned().unwrap_or_default());
    let mode = args
        .get_one::<FailureMode>("mode")
        .copied()
        .unwrap_or(FailureMode::EquipmentFailure);
    let trials = args.get_one::<usize>("trials").copied();

    let prediction = session.engine.predict_cascade(&node, mode, trials)?;
    if json {
        return print_json(&prediction);
    }

    println!("Cascade forecast: {} ({})", prediction.initial_failure_node, prediction.failure_mode);
    println!("  Trials: {}", prediction.trials);
    println!("  Cascade probability: {:.3}", prediction.cascade_probability);
    println!("  Confidence: {:.3}", prediction.confidence);
    println!("  Radius: {:.1} km", prediction.predicted_radius_km);
    println!("  Impact score: {:.2}", prediction.total_impact_score);
    println!("  Affected nodes:");
    for id in &prediction.affected_nodes {
        println!("    {:<32} {:.3}", id.as_str(), prediction.membership_of(id));
    }
    println!("  Modal timeline:");
    for event in &prediction.cascade_timeline {
        println!("    t+{:>4} min  {}", event.minute, event.node_id);
    }
    Ok(())
}

fn critical(session: &Session, args: &ArgMatches, json: bool) -> Result<()> {
    let limit = args.get_one::<usize>("limit").copied().unwrap_or(10);
    let ranking = session.engine.critical_nodes(limit);
    if json {
        return print_json(&ranking);
    }

    println!("{:<32} {:>8} {:>8} {:>8} {:>8}", "node", "priority", "central", "cascade", "vuln");
    for analysis in &ranking {
        println!(
            "{:<32} {:>8.3} {:>8.3} {:>8.3} {:>8.3}",
            analysis.node_id.as_str(),
            analysis.stabilization_priority,
            analysis.centrality_score,
            analysis.cascade_contribution_score,
            analysis.vulnerability_score
        );
    }
    Ok(())
}

fn plan(session: &Session, args: &ArgMatches, json: bool) -> Result<()> {
    let node = NodeId::new(args.get_one::<String>("node").cloned().unwrap_or_default());
    let mode = args
        .get_one::<FailureMode>("mode")
        .copied()
        .unwrap_or(FailureMode::EquipmentFailure);
    let limit = args.get_one::<usize>("limit").copied().unwrap_or(5);

    let prediction = session.engine.predict_cascade(&node, mode, None)?;
    let strategies = session.engine.pre_stabilization_strategies(limit);
    if json {
        return print_json(&strategies);
    }

    println!(
        "Cascade probability for {}: {:.3}",
        prediction.initial_failure_node, prediction.cascade_probability
    );
    if strategies.is_empty() {
        println!("No pre-stabilization needed");
        return Ok(());
    }
    for strategy in &strategies {
        let targets: Vec<&str> = strategy.target_nodes.iter().map(NodeId::as_str).collect();
        println!(
            "  [{:.4}] {} on {} (reduction {:.3}, cost {:.1}, {} min)",
            strategy.priority_score,
            strategy.kind,
            targets.join(", "),
            strategy.expected_cascade_reduction,
            strategy.implementation_cost,
            strategy.implementation_time_minutes
        );
    }
    Ok(())
}

async fn drain(engine: &CascadeEngine, limit: Duration) {
    let waited = tokio::time::timeout(limit, async {
        while engine.loops().active_count() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if waited.is_err() {
        tracing::warn!(
            active = engine.loops().active_count(),
            "Loops still active after drain period"
        );
    }
}

async fn run(session: &Session, args: &ArgMatches, json: bool) -> Result<()> {
    let duration = Duration::from_secs(args.get_one::<u64>("duration").copied().unwrap_or(30));
    let drain_limit = Duration::from_secs(args.get_one::<u64>("drain").copied().unwrap_or(60));

    for node in args.get_many::<String>("fault").into_iter().flatten() {
        let id = NodeId::new(node.clone());
        if !session.twin.inject_fault(&id, 0.1) {
            bail!("unknown node: {node}");
        }
        tracing::info!(node = %id, "Injected fault");
    }

    let (stop, shutdown) = watch::channel(false);
    let runner = tokio::spawn(Arc::clone(&session.engine).run(shutdown));

    tokio::select! {
        () = tokio::time::sleep(duration) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for ctrl-c")?;
            tracing::info!("Interrupted, shutting down");
        }
    }
    // The runner may already be gone if it panicked
    let _ = stop.send(true);
    runner.await.context("engine runner failed")?;
    drain(&session.engine, drain_limit).await;

    let summary = session.engine.system_effectiveness();
    if json {
        return print_json(&summary);
    }
    println!("Closed-loop run finished");
    println!("  Loops: {}", summary.total_loops);
    println!("  Successful: {} ({:.1}%)", summary.successful_loops, summary.success_rate * 100.0);
    println!("  Average effectiveness: {:.3}", summary.average_effectiveness);
    println!("  Average duration: {:.1}s", summary.average_duration_secs);
    Ok(())
}

fn report(session: &Session, args: &ArgMatches, json: bool) -> Result<()> {
    let limit = args.get_one::<usize>("limit").copied().unwrap_or(10);
    let effectiveness = session.engine.system_effectiveness();
    let metrics = session.engine.system_metrics();
    let risk = session.engine.real_time_probabilities();
    let loops = session.engine.completed_loops(limit);

    if json {
        return print_json(&serde_json::json!({
            "network": session.name,
            "metrics": metrics,
            "effectiveness": effectiveness,
            "risk": risk,
            "completed_loops": loops,
        }));
    }

    println!("Network: {}", session.name);
    println!("  Nodes: {}  Dependencies: {}", metrics.total_nodes, metrics.total_dependencies);
    println!("  Average health: {:.3}  Average load: {:.3}", metrics.average_health, metrics.average_load);
    println!("  High-risk nodes: {}  Critical nodes: {}", metrics.high_risk_nodes, metrics.critical_nodes);
    println!("  Predictions: {}  Strategies: {}", metrics.active_predictions, metrics.available_strategies);
    println!("  System risk: {:?} (mean {:.3})", risk.system_risk, risk.mean_probability);
    println!();
    println!("Stabilization");
    println!("  Loops: {}  Success rate: {:.1}%", effectiveness.total_loops, effectiveness.success_rate * 100.0);
    println!("  Average effectiveness: {:.3}", effectiveness.average_effectiveness);
    let thresholds = &effectiveness.risk_thresholds;
    println!(
        "  Thresholds: cascade {:.3}  overload {:.3}  failure {:.3}",
        thresholds.cascade_probability, thresholds.infrastructure_overload, thresholds.failure_rate
    );
    let weights = &effectiveness.learning_weights;
    println!(
        "  Weights: risk reduction {:.3}  recovery speed {:.3}  containment {:.3}",
        weights.risk_reduction, weights.recovery_speed, weights.cascade_containment
    );
    if !loops.is_empty() {
        println!();
        println!("Recent loops");
        for record in &loops {
            println!(
                "  {} {:<28} {:<22} {:<10} {}",
                record.loop_id,
                record.detection.target_node.as_str(),
                record.detection.risk_type.as_str(),
                record.status().as_str(),
                record
                    .effectiveness
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |e| format!("{:.3}", e.overall_effectiveness))
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_logging(
        matches
            .get_one::<String>("log-format")
            .map_or("text", String::as_str),
    );

    let config = load_config(matches.get_one::<PathBuf>("config"))?;
    let state = matches.get_one::<PathBuf>("state");
    let json = matches.get_flag("json");
    let session = open_session(
        matches.get_one::<PathBuf>("topology"),
        state.map(PathBuf::as_path),
        config,
        matches.get_one::<u64>("seed").copied(),
    )?;

    match matches.subcommand() {
        Some(("simulate", args)) => simulate(&session, args, json)?,
        Some(("critical", args)) => critical(&session, args, json)?,
        Some(("plan", args)) => plan(&session, args, json)?,
        Some(("run", args)) => run(&session, args, json).await?,
        Some(("report", args)) => {
            if state.map_or(true, |p| !p.exists()) {
                bail!("report needs an existing --state snapshot");
            }
            report(&session, args, json)?;
        }
        _ => {}
    }

    if let Some(path) = state {
        session
            .engine
            .snapshot(&session.name)
            .save(path)
            .with_context(|| format!("saving state {}", path.display()))?;
    }
    Ok(())
}
