//! kshetra-nav command line.
//!
//! ```bash
//! # Plan every active zone around the saved map and print the paths as JSON
//! kshetra-nav plan --zones zones.json
//!
//! # Verify a saved map
//! kshetra-nav check-map lawn.ksmp
//!
//! # Closed-loop run against the built-in simulator
//! kshetra-nav simulate --zones zones.json --duration 900
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use kshetra_nav::algorithms::coverage::{CoveragePattern, CoveragePlanner, mapped_obstacles};
use kshetra_nav::algorithms::mapping::{MapManager, OccupancyGrid};
use kshetra_nav::core::types::Point2D;
use kshetra_nav::error::{NavError, Result};
use kshetra_nav::io::ZoneStore;
use kshetra_nav::navigation::{ExecutorState, Path};
use kshetra_nav::sim::{SimConfig, SimHarness, SimObstacle};
use kshetra_nav::threads::ControlCommand;
use kshetra_nav::{KshetraConfig, NavEvent};

#[derive(Parser, Debug)]
#[command(name = "kshetra-nav", author, version, about = "Lawn mower navigation core", long_about = None)]
struct Cli {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Plan coverage paths and print them as JSON
    Plan {
        /// Zone file; defaults to paths.zones_file
        #[arg(short, long)]
        zones: Option<PathBuf>,

        /// Only this zone
        #[arg(long)]
        zone_id: Option<u32>,

        /// Override each zone's pattern
        #[arg(long, value_enum)]
        pattern: Option<CoveragePattern>,

        /// Write JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load a map file and verify its checksum
    CheckMap {
        /// Map file; defaults to paths.map_file
        path: Option<PathBuf>,
    },

    /// Mow the zones with the simulated robot
    Simulate {
        /// Zone file; defaults to paths.zones_file
        #[arg(short, long)]
        zones: Option<PathBuf>,

        /// Simulated seconds
        #[arg(long, default_value = "1800")]
        duration: f32,

        /// Noise seed (0 = random)
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Round obstacle as "x,y,radius"; repeatable
        #[arg(long = "obstacle", value_parser = parse_obstacle)]
        obstacles: Vec<SimObstacle>,

        /// Battery at start (percent)
        #[arg(long, default_value = "100")]
        battery: f32,
    },
}

fn parse_obstacle(s: &str) -> std::result::Result<SimObstacle, String> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse::<f32>().map_err(|e| format!("{}: {}", p, e)))
        .collect::<std::result::Result<_, _>>()?;
    match parts.as_slice() {
        [x, y, r] if *r > 0.0 => Ok(SimObstacle {
            center: Point2D::new(*x, *y),
            radius: *r,
        }),
        _ => Err("expected x,y,radius with a positive radius".into()),
    }
}

#[derive(Serialize)]
struct MapSummary {
    width: usize,
    height: usize,
    resolution: f32,
    origin: (f32, f32),
    obstacle_cells: usize,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} - {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => KshetraConfig::load(path)?,
        None => KshetraConfig::default(),
    };

    match cli.command {
        Commands::Plan {
            zones,
            zone_id,
            pattern,
            output,
        } => plan(&config, zones, zone_id, pattern, output).map(|()| ExitCode::SUCCESS),
        Commands::CheckMap { path } => check_map(&config, path).map(|()| ExitCode::SUCCESS),
        Commands::Simulate {
            zones,
            duration,
            seed,
            obstacles,
            battery,
        } => simulate(&config, zones, duration, seed, obstacles, battery),
    }
}

fn plan(
    config: &KshetraConfig,
    zones: Option<PathBuf>,
    zone_id: Option<u32>,
    pattern: Option<CoveragePattern>,
    output: Option<PathBuf>,
) -> Result<()> {
    let store = ZoneStore::new(zones.unwrap_or_else(|| config.paths.zones_file.clone()));
    let set = store.load()?;
    let planner = CoveragePlanner::new(config.coverage.clone(), config.robot.working_width);
    let (map, _) = MapManager::load_or_empty(&config.paths.map_file, config.map.clone());
    let map = map.snapshot();

    let selected: Vec<_> = match zone_id {
        Some(id) => vec![set.get(id).ok_or_else(|| NavError::Config(format!("no zone with id {}", id)))?],
        None => set.execution_order(),
    };

    let mut paths: Vec<Path> = Vec::with_capacity(selected.len());
    for zone in selected {
        let mut obstacles = mapped_obstacles(&map, zone, config.avoidance.safety_margin);
        obstacles.extend(set.restricted_overlaps(zone));
        let pattern = pattern.unwrap_or(zone.pattern);
        let path = planner
            .plan(zone, &obstacles, pattern)
            .map_err(|e| NavError::planning(zone.id.to_string(), e))?;
        log::info!(
            "Zone {} ({}): {} waypoints, {:.1}m mowing, {:.1}m transit, {}",
            zone.id,
            zone.name,
            path.len(),
            path.mowing_length(),
            path.transit_length(),
            path.pattern.as_str()
        );
        paths.push(path);
    }

    let json = serde_json::to_string_pretty(&paths)?;
    match output {
        Some(path) => std::fs::write(&path, json)?,
        None => println!("{}", json),
    }
    Ok(())
}

fn check_map(config: &KshetraConfig, path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(|| config.paths.map_file.clone());
    let grid = OccupancyGrid::load(&path, config.map.clone())?;
    let summary = MapSummary {
        width: grid.width(),
        height: grid.height(),
        resolution: grid.resolution(),
        origin: grid.origin(),
        obstacle_cells: grid.count_obstacles(),
    };
    log::info!("{} is intact", path.display());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn simulate(
    config: &KshetraConfig,
    zones: Option<PathBuf>,
    duration: f32,
    seed: u64,
    obstacles: Vec<SimObstacle>,
    battery: f32,
) -> Result<ExitCode> {
    let store = ZoneStore::new(zones.unwrap_or_else(|| config.paths.zones_file.clone()));
    let set = store.load()?;
    if set.execution_order().is_empty() {
        return Err(NavError::Config(format!("no active zones in {}", store.path().display())));
    }

    let sim = SimConfig {
        wheel_base: config.robot.wheel_base,
        start_pose: config.executor.docking.target.dock_pose,
        dock_pose: config.executor.docking.target.dock_pose,
        obstacles,
        initial_battery: battery,
        seed,
        ..Default::default()
    };
    let mut harness = SimHarness::new(config, sim);
    harness.command(ControlCommand::Start(set));

    let finished = harness.run_until(duration, |h| {
        let all_done = h.events().iter().any(|e| matches!(e, NavEvent::AllZonesComplete));
        match h.state() {
            ExecutorState::Error => true,
            ExecutorState::Idle | ExecutorState::Charging => all_done,
            _ => false,
        }
    });
    if !finished {
        log::warn!("Simulation stopped after {:.0}s of simulated time", duration);
    }

    let report = harness.finish();
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.final_state == ExecutorState::Error {
        log::error!("Simulation ended in the error state");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
