use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kinetica_kernel::{KernelError, Pose, World, WorldEvent};
use kinetica_scenario::Scenario;
use serde_json::json;
use tracing_subscriber::EnvFilter;

const DEFAULT_TICKS: u64 = 600;

#[derive(Parser)]
#[command(name = "kinetica-cli", about = "Run kinetica worlds from the command line")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions and the built-in agent types
    Info,
    /// Load a scenario file and step its world
    Run {
        /// Scenario file (.json, .yaml or .yml)
        scenario: PathBuf,
        /// Ticks to simulate; overrides the scenario's own value
        #[arg(short, long)]
        ticks: Option<u64>,
        /// Print a progress line every N ticks (0 disables)
        #[arg(short, long, default_value = "60")]
        report_every: u64,
        /// Print the final world snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Wanderers patrolling a walled arena with blocks in the way
    Demo {
        /// Number of ticks to simulate
        #[arg(short, long, default_value = "600")]
        ticks: u64,
        /// Number of wanderers to spawn
        #[arg(short, long, default_value = "3")]
        wanderers: usize,
    },
}

fn builtin(world: &mut World) -> Result<(), KernelError> {
    kinetica_agents::register_builtin(world.plugins_mut())
}

fn contacts(world: &mut World) -> usize {
    world
        .drain_events()
        .iter()
        .filter(|e| matches!(e, WorldEvent::ContactBegan { .. }))
        .count()
}

fn report(world: &World, contacts: usize) {
    println!(
        "tick={:>6} agents={:>3} contacts={:>4} hash={:#018x}",
        world.tick(),
        world.agent_count(),
        contacts,
        world.state_hash()
    );
}

fn arena(wanderers: usize) -> Result<World, KernelError> {
    let mut world = World::new("demo");
    builtin(&mut world)?;
    world.spawn("Wall", Pose::new(-15.0, 5.0, 0.0), None)?;
    world.spawn("Wall", Pose::new(25.0, 5.0, 0.0), None)?;
    world.spawn("Block", Pose::new(5.0, 0.0, 0.0), None)?;
    world.spawn("Block", Pose::new(10.0, 8.0, 0.0), None)?;
    for i in 0..wanderers {
        let y = i as f64 * 3.0;
        world.spawn("Wanderer", Pose::new(0.0, y, 0.0), Some(json!({ "fill": "teal" })))?;
    }
    Ok(world)
}

fn run_demo(ticks: u64, wanderers: usize) -> Result<World, KernelError> {
    let mut world = arena(wanderers)?;
    for _ in 0..ticks {
        world.update()?;
    }
    Ok(world)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("kinetica-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("kernel: {}", kinetica_kernel::crate_info());
            println!("scenario: {}", kinetica_scenario::crate_info());
            let mut world = World::new("info");
            builtin(&mut world)?;
            let kinds: Vec<_> = world.plugins().kinds().collect();
            println!("agent types: {}", kinds.join(", "));
            println!("timestep: {:.6}s", world.timestep());
        }
        Commands::Run {
            scenario,
            ticks,
            report_every,
            json,
        } => {
            let loaded = Scenario::load(&scenario)
                .with_context(|| format!("loading {}", scenario.display()))?;
            let mut world = loaded.build_world(builtin)?;
            let ticks = ticks.or(loaded.config().ticks).unwrap_or(DEFAULT_TICKS);
            tracing::info!(world = %world.name(), ticks, agents = world.agent_count(), "running scenario");

            let mut seen = 0;
            for _ in 0..ticks {
                world.update()?;
                seen += contacts(&mut world);
                if report_every > 0 && world.tick() % report_every == 0 {
                    report(&world, seen);
                }
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&world.snapshot())?);
            } else {
                report(&world, seen);
            }
        }
        Commands::Demo { ticks, wanderers } => {
            println!("Demo: {wanderers} wanderers, {ticks} ticks");

            let mut first = run_demo(ticks, wanderers)?;
            let bumps = contacts(&mut first);
            for agent in first.agents().filter(|a| a.type_name() == "Wanderer") {
                println!(
                    "{} at ({:.2}, {:.2}) heading {:.2} fill={}",
                    agent.id(),
                    agent.x(),
                    agent.y(),
                    agent.angle(),
                    agent.style()["fill"]
                );
            }
            report(&first, bumps);

            // A second run from scratch must land on the same state.
            let second = run_demo(ticks, wanderers)?;
            println!(
                "Rerun: {}",
                if first.state_hash() == second.state_hash() {
                    "OK"
                } else {
                    "MISMATCH"
                }
            );
        }
    }

    Ok(())
}
