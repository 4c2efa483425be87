//! Command-line driver: live walks, replays, and store maintenance.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use driftwalk_core::{
    GeoPoint, WalkConfig, WalkEngine, WalkObserver, WalkPoint, WalkScheduler, distance_between,
    longitude_span_degrees,
};
use driftwalk_storage::{StorePipeline, WalkStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "driftwalk",
    version,
    about = "Simulates a wandering walk tethered to a real location"
)]
struct Cli {
    /// JSON file holding the saved walk history.
    #[arg(long, global = true, default_value = "driftwalk-history.json")]
    store: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a live walk anchored to the given coordinates.
    Walk(WalkArgs),
    /// Re-emit the saved walk point by point.
    Replay(ReplayArgs),
    /// Print the saved walk.
    Show,
    /// Delete the saved walk.
    Clear,
}

#[derive(Args, Debug)]
struct WalkArgs {
    /// Anchor latitude in decimal degrees.
    #[arg(long, allow_negative_numbers = true)]
    lat: f64,
    /// Anchor longitude in decimal degrees.
    #[arg(long, allow_negative_numbers = true)]
    lon: f64,
    /// Seconds between generated points.
    #[arg(long, default_value_t = 30.0)]
    interval: f64,
    /// Stop after this many points (0 runs until interrupted).
    #[arg(long, default_value_t = 0)]
    ticks: u64,
    /// Fixed RNG seed for a reproducible walk.
    #[arg(long)]
    seed: Option<u64>,
    /// Launch radius in meters for the first point.
    #[arg(long, default_value_t = 160_935.0)]
    radius: f64,
    /// Points retained before the oldest is evicted.
    #[arg(long, default_value_t = 48)]
    max_history: usize,
    /// Discard any saved walk before starting.
    #[arg(long)]
    fresh: bool,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Seconds between replayed points.
    #[arg(long, default_value_t = 1.0)]
    interval: f64,
}

fn main() -> Result<()> {
    init_tracing();
    let Cli { store, command } = Cli::parse();
    match command {
        Command::Walk(args) => run_walk(&store, &args),
        Command::Replay(args) => run_replay(&store, &args),
        Command::Show => run_show(&store),
        Command::Clear => run_clear(&store),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn run_walk(store_path: &Path, args: &WalkArgs) -> Result<()> {
    if !(-90.0..=90.0).contains(&args.lat) {
        bail!("latitude {} is outside [-90, 90]", args.lat);
    }
    if !(-180.0..=180.0).contains(&args.lon) {
        bail!("longitude {} is outside [-180, 180]", args.lon);
    }
    let config = WalkConfig {
        radius_meters: args.radius,
        max_history_size: args.max_history,
        update_interval: duration_from_secs(args.interval)?,
        rng_seed: args.seed,
        ..WalkConfig::default()
    };

    let pipeline = StorePipeline::new(store_path)
        .with_context(|| format!("opening walk store at {}", store_path.display()))?;
    let mut engine = WalkEngine::with_persistence(config, Box::new(pipeline))?;
    engine.add_observer(Box::new(ConsoleObserver::default()));
    let counter = PointCounter::default();
    let generated = Arc::clone(&counter.count);
    engine.add_observer(Box::new(counter));

    if args.fresh {
        engine.restart();
    } else {
        let restored = engine.load_persisted();
        if restored > 0 {
            info!(restored, "continuing the saved walk");
        }
    }
    engine.set_anchor(args.lat, args.lon);

    let scheduler = WalkScheduler::spawn(engine)?;
    scheduler.start()?;
    if args.ticks == 0 {
        info!("walking; press Ctrl-C to stop");
        loop {
            thread::sleep(Duration::from_secs(3600));
        }
    }
    while generated.load(Ordering::SeqCst) < args.ticks {
        thread::sleep(Duration::from_millis(50));
    }
    scheduler.stop();
    Ok(())
}

fn run_replay(store_path: &Path, args: &ReplayArgs) -> Result<()> {
    let config = WalkConfig {
        replay_interval: duration_from_secs(args.interval)?,
        ..WalkConfig::default()
    };

    let pipeline = StorePipeline::new(store_path)
        .with_context(|| format!("opening walk store at {}", store_path.display()))?;
    let mut engine = WalkEngine::with_persistence(config, Box::new(pipeline))?;
    engine.add_observer(Box::new(ConsoleObserver::default()));
    let watcher = ReplayWatcher::default();
    let finished = Arc::clone(&watcher.finished);
    engine.add_observer(Box::new(watcher));

    if engine.load_persisted() == 0 {
        warn!("no saved walk to replay");
    }

    let scheduler = WalkScheduler::spawn(engine)?;
    scheduler.replay()?;
    while !finished.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(25));
    }
    scheduler.stop();
    Ok(())
}

fn run_show(store_path: &Path) -> Result<()> {
    let store = WalkStore::open(store_path)?;
    let Some(outcome) = store.load_points()? else {
        println!("no saved walk at {}", store_path.display());
        return Ok(());
    };
    if outcome.skipped > 0 {
        warn!(skipped = outcome.skipped, "ignoring malformed records");
    }
    let mut points = outcome.points;
    points.sort_unstable_by_key(|point| point.ordinal);
    let mut previous = None;
    for point in &points {
        print_point(&mut previous, point);
    }
    println!("{} points retained", points.len());
    Ok(())
}

fn run_clear(store_path: &Path) -> Result<()> {
    WalkStore::open(store_path)?.clear()?;
    info!(store = %store_path.display(), "saved walk deleted");
    Ok(())
}

fn duration_from_secs(seconds: f64) -> Result<Duration> {
    if !seconds.is_finite() || seconds <= 0.0 {
        bail!("interval must be a positive number of seconds");
    }
    Ok(Duration::from_secs_f64(seconds))
}

fn print_point(previous: &mut Option<GeoPoint>, point: &WalkPoint) {
    match previous.replace(point.position) {
        Some(prev) => println!(
            "#{:>3} {}  ({:.0} m leg)",
            point.ordinal,
            point.position,
            distance_between(prev, point.position)
        ),
        None => println!("#{:>3} {}", point.ordinal, point.position),
    }
}

/// Prints walk activity for a human following along in the terminal.
#[derive(Default)]
struct ConsoleObserver {
    previous: Option<GeoPoint>,
}

impl WalkObserver for ConsoleObserver {
    fn on_anchor_updated(&mut self, anchor: GeoPoint) {
        println!(
            "anchor fixed at {anchor}  (longitude span {:.4} deg)",
            longitude_span_degrees(anchor.latitude)
        );
    }

    fn on_point_generated(&mut self, point: &WalkPoint) {
        print_point(&mut self.previous, point);
    }

    fn on_replay_status(&mut self, starting: bool) {
        self.previous = None;
        if starting {
            println!("replaying saved walk");
        } else {
            println!("replay finished");
        }
    }
}

/// Counts emitted points so `--ticks` can stop the walk.
#[derive(Clone, Default)]
struct PointCounter {
    count: Arc<AtomicU64>,
}

impl WalkObserver for PointCounter {
    fn on_point_generated(&mut self, _point: &WalkPoint) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Flags replay completion so the process knows when to exit.
#[derive(Clone, Default)]
struct ReplayWatcher {
    finished: Arc<AtomicBool>,
}

impl WalkObserver for ReplayWatcher {
    fn on_replay_status(&mut self, starting: bool) {
        if !starting {
            self.finished.store(true, Ordering::SeqCst);
        }
    }
}
