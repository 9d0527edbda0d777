//! ISR mission planner CLI.
//!
//! Thin front-end over the planning and mission crates: solve an
//! environment file, inspect or re-export environments and segmented
//! missions.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use isr_mission::io::{self, ImportedMission};
use isr_mission::MissionEngine;
use isr_planner::{CancelToken, Planner, SolveOptions, Strategy};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "isr",
    about = "Mission planning for small reconnaissance drone fleets",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Solve an environment file and print the per-drone routes
    Solve {
        /// Environment or segmented mission JSON file
        #[arg(long)]
        env: PathBuf,
        /// Allocation strategy: efficient, greedy, balanced, geographic, exclusive
        #[arg(long, default_value = "efficient")]
        strategy: String,
        /// Skip the post-optimizers
        #[arg(long)]
        no_optimize: bool,
        /// Write the solution JSON here
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate and describe an environment or mission file
    Inspect {
        #[arg(long)]
        env: PathBuf,
    },
    /// Canonicalize an environment file and re-export it
    Export {
        #[arg(long)]
        env: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    match Cli::parse().command {
        Command::Solve {
            env,
            strategy,
            no_optimize,
            output,
        } => solve(&env, &strategy, no_optimize, output.as_deref()),
        Command::Inspect { env } => inspect(&env),
        Command::Export { env, output } => export(&env, &output),
    }
}

fn load(path: &Path) -> Result<(serde_json::Value, String)> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((value, filename))
}

fn solve(path: &Path, strategy: &str, no_optimize: bool, output: Option<&Path>) -> Result<()> {
    let strategy: Strategy = strategy
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let (value, filename) = load(path)?;
    let cancel = CancelToken::new();

    match io::import(&value, &filename)? {
        ImportedMission::Environment { env, drone_configs } => {
            let planner = Planner::new();
            let options = SolveOptions {
                strategy,
                post_optimize: !no_optimize,
                ..SolveOptions::default()
            };
            let solution = planner.solve(&env, &drone_configs, &options, &cancel)?;

            println!("{:<6} {:>7} {:>10}  route", "drone", "points", "distance");
            for (drone_id, route) in &solution.routes {
                let waypoints: Vec<&str> =
                    route.waypoints.iter().map(|w| w.as_str()).collect();
                println!(
                    "{:<6} {:>7} {:>10.3}  {}",
                    drone_id,
                    route.points,
                    route.distance,
                    waypoints.join(" -> ")
                );
            }
            println!(
                "total: {} points over {:.3} units",
                solution.total_points(),
                solution.total_distance()
            );

            if let Some(out) = output {
                fs::write(out, serde_json::to_string_pretty(&solution)?)
                    .with_context(|| format!("writing {}", out.display()))?;
                info!(path = %out.display(), "solution written");
            }
        }
        imported @ ImportedMission::Segmented { .. } => {
            let engine = MissionEngine::restore(imported, Arc::new(Planner::new()), &cancel)?;
            println!("segmented mission: {} segments", engine.store().len());
            for segment in engine.store().segments() {
                let points: u32 = segment.solution.total_points();
                println!(
                    "  segment {} (cut at {}): {} points, {:.3} units",
                    segment.index,
                    segment
                        .cut_distance
                        .map(|d| format!("{d:.1}"))
                        .unwrap_or_else(|| "start".into()),
                    points,
                    segment.solution.total_distance()
                );
            }
            for (drone_id, poly) in engine.build_combined_routes() {
                println!(
                    "  {} combined playback: {:.3} units",
                    drone_id,
                    isr_core::geometry::polyline_length(&poly)
                );
            }
            if output.is_some() {
                bail!("--output applies to plain environments only");
            }
        }
    }
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let (value, filename) = load(path)?;
    match io::import(&value, &filename)? {
        ImportedMission::Environment { env, drone_configs } => {
            println!(
                "environment: {} airports, {} targets, {} SAMs, {} drones",
                env.airports.len(),
                env.targets.len(),
                env.sams.len(),
                drone_configs.len()
            );
            let polygons = isr_core::wrap_sams(&env.sams);
            println!("wrapped SAM polygons: {}", polygons.len());
        }
        ImportedMission::Segmented { segments } => {
            println!(
                "segmented mission ({} segments, filename marker {:?})",
                segments.len(),
                io::detect_segment_count(&filename)
            );
            for s in &segments {
                println!(
                    "  segment {}: {} targets remaining, {} visited, cut {:?}",
                    s.index,
                    s.env.targets.len(),
                    s.visited_targets.len(),
                    s.cut_distance
                );
            }
        }
    }
    Ok(())
}

fn export(path: &Path, output: &Path) -> Result<()> {
    let (value, filename) = load(path)?;
    match io::import(&value, &filename)? {
        ImportedMission::Environment { env, drone_configs } => {
            let canonical = io::export_environment(&env, &drone_configs);
            fs::write(output, serde_json::to_string_pretty(&canonical)?)
                .with_context(|| format!("writing {}", output.display()))?;
            info!(path = %output.display(), "environment exported");
            Ok(())
        }
        ImportedMission::Segmented { .. } => {
            bail!("re-export of segmented missions happens from a live engine")
        }
    }
}
