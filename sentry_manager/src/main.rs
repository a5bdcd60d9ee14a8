use anyhow::Context;
use clap::Parser;
use colored::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sentry_core::hal::sim::SimWorld;
use sentry_core::{Drivers, MotionEvent, RunSummary, SentryConfig, ShutdownHandle, Supervisor};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sentry")]
#[command(about = "Sentry - square patrol with obstacle scanning and intruder alarm")]
#[command(version = "0.1.0")]
struct Cli {
    /// Configuration file (.yaml, .yml or .toml)
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Stop after this many patrol cycles
    #[arg(short = 'n', long = "cycles")]
    cycles: Option<u64>,

    /// Stop after this many seconds
    #[arg(short = 'd', long = "duration", value_name = "SECS")]
    duration: Option<u64>,

    /// Shrink every delay tenfold
    #[arg(short = 'f', long = "fast")]
    fast: bool,

    /// Seed for the simulated world
    #[arg(short = 's', long = "seed", default_value = "7")]
    seed: u64,

    /// How often the simulated world changes, in milliseconds
    #[arg(long = "world-step", value_name = "MS", default_value = "1500")]
    world_step_ms: u64,

    /// Print the run summary as JSON
    #[arg(short = 'j', long = "json")]
    json: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => SentryConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SentryConfig::default(),
    };
    if cli.cycles.is_some() {
        config.patrol.max_cycles = cli.cycles;
    }
    if cli.fast {
        speed_up(&mut config);
    }

    let world = SimWorld::new();
    let supervisor = Supervisor::new(config.clone(), Drivers::simulated(&world))
        .context("starting sentry")?;
    let shutdown = supervisor.shutdown_handle();

    let handle = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!("{}", "\nCtrl+C received! Returning to safe state...".red());
        handle.shutdown();
    })
    .context("installing Ctrl+C handler")?;

    if let Some(secs) = cli.duration {
        let handle = shutdown.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(secs));
            handle.shutdown();
        });
    }

    let step = Duration::from_millis(cli.world_step_ms.max(1));
    let simulation = {
        let world = world.clone();
        let shutdown = shutdown.clone();
        let scan = config.scan.clone();
        let seed = cli.seed;
        std::thread::Builder::new()
            .name("world".into())
            .spawn(move || drive_world(world, scan, shutdown, seed, step))?
    };

    print_banner(&config, cli.seed);
    let summary = supervisor.run()?;
    shutdown.shutdown();
    let _ = simulation.join();

    if cli.json {
        println!("{}", summary.to_json()?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn speed_up(config: &mut SentryConfig) {
    config.scan.settle_ms = (config.scan.settle_ms / 10).max(1);
    let patrol = &mut config.patrol;
    patrol.forward_ms /= 10;
    patrol.blink_interval_ms = (patrol.blink_interval_ms / 10).max(1);
    patrol.turn_pause_ms /= 10;
    patrol.cycle_pause_ms /= 10;
    patrol.low_voltage_idle_ms /= 10;
    patrol.obstacle_alert_interval_ms /= 10;
    config.alarm.step_ms = (config.alarm.step_ms / 10).max(1);
    config.power.low_battery_step_ms /= 10;
}

/// Random obstacles, intruders and battery sag for the simulated robot
fn drive_world(
    world: SimWorld,
    scan: sentry_core::params::ScanConfig,
    shutdown: ShutdownHandle,
    seed: u64,
    step: Duration,
) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut intruder_present = false;

    while !shutdown.is_shutdown() {
        world.set_obstacles(
            &scan,
            rng.gen_bool(0.3),
            rng.gen_bool(0.3),
            rng.gen_bool(0.3),
        );

        if intruder_present {
            if rng.gen_bool(0.5) {
                intruder_present = false;
                world.fire_motion(MotionEvent::MotionEnd);
            }
        } else if rng.gen_bool(0.15) {
            intruder_present = true;
            tracing::info!("simulated intruder enters");
            world.fire_motion(MotionEvent::MotionStart);
        }

        let battery = if rng.gen_bool(0.05) {
            rng.gen_range(0.80..0.95)
        } else {
            rng.gen_range(0.98..1.0)
        };
        world.set_battery_reading(battery);

        std::thread::sleep(step);
    }
}

fn print_banner(config: &SentryConfig, seed: u64) {
    println!("{}", "=".repeat(50).cyan());
    println!("{}", " SENTRY PATROL ".bold().cyan());
    println!("{}", "=".repeat(50).cyan());
    println!(
        "  {} {} moves per side",
        "Patrol:".bold(),
        config.patrol.counter_limit
    );
    println!(
        "  {} {:.0} cm threshold at {:.0}/{:.0}/{:.0} deg",
        "Scan:".bold(),
        config.scan.obstacle_threshold_cm,
        config.scan.left_angle,
        config.scan.center_angle,
        config.scan.right_angle
    );
    println!(
        "  {} {} s cooldown, min battery {:.1} V",
        "Alarm:".bold(),
        config.alarm.cooldown_secs,
        config.power.min_voltage
    );
    println!("  {} simulated (seed {})", "Backend:".bold(), seed);
    println!("{}", "Press Ctrl+C to stop".dimmed());
}

fn print_summary(summary: &RunSummary) {
    let elapsed = summary.finished_at - summary.started_at;
    println!();
    println!("{}", "Patrol summary".bold().green());
    println!(
        "  Ran {}s, patrol {} / intruder {}",
        elapsed.num_seconds(),
        state_label(&summary.patrol_state),
        state_label(&summary.intruder_state)
    );

    let p = &summary.patrol;
    println!(
        "  Cycles {}: {} forward, {} left, {} right, {} retreats, {} stops",
        p.cycles, p.forwards, p.turns_left, p.turns_right, p.retreats, p.stops
    );
    println!(
        "  Corners {} ({} squares), scan faults {}, low-voltage idles {}",
        p.corner_turns, p.squares, p.scan_faults, p.low_voltage_idles
    );
    if p.emergency_stops > 0 {
        println!("  {} {}", "Emergency stops:".red(), p.emergency_stops);
    }

    let i = &summary.intruder;
    println!(
        "  Motion {} starts / {} ends, alarms {} ({} debounced, {} absorbed)",
        i.motion_starts, i.motion_ends, i.sequences_started, i.debounced, i.absorbed
    );

    let safe = if summary.final_outputs.is_safe() {
        "safe".green()
    } else {
        "NOT SAFE".red().bold()
    };
    println!("  Final outputs: {}", safe);
}

fn state_label(state: &str) -> ColoredString {
    if state == "Stopped" {
        state.green()
    } else {
        state.red()
    }
}
