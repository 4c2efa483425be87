//! Core walk-generation engine shared across the driftwalk workspace.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Errors surfaced by engine construction and scheduler control.
#[derive(Debug, Error)]
pub enum WalkError {
    /// Configuration failed validation checks.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The scheduler worker thread could not be spawned or reached.
    #[error("scheduler worker error: {0}")]
    Worker(String),
}

/// Mean Earth radius in meters used for all great-circle math.
pub const EARTH_RADIUS_METERS: f64 = 6_372_797.6;

/// First generated point lands at least this fraction of the walk radius
/// away from the anchor.
const BOOTSTRAP_MIN_FRACTION: f64 = 0.90;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// One generated walk position together with its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalkPoint {
    /// Strictly increasing sequence number, starting at 1 for a fresh walk.
    pub ordinal: u64,
    pub position: GeoPoint,
}

impl WalkPoint {
    #[must_use]
    pub const fn new(ordinal: u64, position: GeoPoint) -> Self {
        Self { ordinal, position }
    }
}

/// Initial compass bearing in degrees from `from` to `to`, normalized
/// into `[0, 360)`.
///
/// Returns the forward azimuth of the great circle through both points.
#[must_use]
pub fn bearing_between(from: GeoPoint, to: GeoPoint) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let delta_lon = (to.longitude - from.longitude).to_radians();
    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Point reached by travelling `distance_meters` along the great circle
/// leaving `origin` at `bearing_degrees`.
///
/// Latitude is clamped to `[-90, 90]` and longitude normalized into
/// `[-180, 180)`, so antimeridian crossings wrap instead of walking off
/// the chart.
#[must_use]
pub fn destination_point(origin: GeoPoint, bearing_degrees: f64, distance_meters: f64) -> GeoPoint {
    let angular = distance_meters / EARTH_RADIUS_METERS;
    let bearing = bearing_degrees.to_radians();
    let lat1 = origin.latitude.to_radians();
    let lon1 = origin.longitude.to_radians();
    let sin_lat2 = lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos();
    // Rounding can push the sine a hair past 1 near the poles.
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();
    let lon2 = lon1
        + (bearing.sin() * angular.sin() * lat1.cos())
            .atan2(angular.cos() - lat1.sin() * lat2.sin());
    GeoPoint {
        latitude: lat2.to_degrees().clamp(-90.0, 90.0),
        longitude: (lon2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0,
    }
}

/// Perturbs a bearing by a uniform delta in `[0, max_delta_degrees)`,
/// added or subtracted on a fair coin flip.
///
/// The result is deliberately left un-normalized; trigonometric callers
/// are periodic in the bearing, and wrapping here would bias nothing
/// but cost precision at the seam.
#[must_use]
pub fn randomize_bearing<R: Rng>(rng: &mut R, bearing_degrees: f64, max_delta_degrees: f64) -> f64 {
    if max_delta_degrees <= 0.0 {
        return bearing_degrees;
    }
    let delta = rng.random_range(0.0..max_delta_degrees);
    if rng.random_bool(0.5) {
        bearing_degrees + delta
    } else {
        bearing_degrees - delta
    }
}

/// Great-circle distance in meters between two points (haversine form).
#[must_use]
pub fn distance_between(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();
    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// Width in degrees of longitude covered by a fixed ground distance at
/// the given latitude. Grows toward the poles as meridians converge.
#[must_use]
pub fn longitude_span_degrees(latitude: f64) -> f64 {
    100.0 / (69.0 - (90.0 / 69.0) * latitude.abs())
}

/// Tunable parameters for walk generation and scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkConfig {
    /// Upper bound in meters on the first point's distance from the anchor.
    pub radius_meters: f64,
    /// Minimum step length in meters between consecutive points.
    pub movement_delta_min: f64,
    /// Upper bound in meters (exclusive) on the step length draw.
    pub movement_delta_max: f64,
    /// Maximum deviation in degrees applied to the anchor-facing bearing.
    pub random_bearing_adjustment: f64,
    /// Number of points retained before the oldest is evicted.
    pub max_history_size: usize,
    /// Delay between live generation ticks.
    pub update_interval: Duration,
    /// Delay between replayed points.
    pub replay_interval: Duration,
    /// Fixed RNG seed for reproducible walks; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            radius_meters: 160_935.0,
            movement_delta_min: 1_000.0,
            movement_delta_max: 3_218.7,
            random_bearing_adjustment: 45.0,
            max_history_size: 48,
            update_interval: Duration::from_secs(30),
            replay_interval: Duration::from_secs(1),
            rng_seed: None,
        }
    }
}

impl WalkConfig {
    /// Checks cross-field consistency before the engine starts using the
    /// values.
    pub fn validate(&self) -> Result<(), WalkError> {
        if !self.radius_meters.is_finite() || self.radius_meters <= 0.0 {
            return Err(WalkError::InvalidConfig(
                "radius_meters must be finite and positive",
            ));
        }
        if !self.movement_delta_min.is_finite() || self.movement_delta_min <= 0.0 {
            return Err(WalkError::InvalidConfig(
                "movement_delta_min must be finite and positive",
            ));
        }
        if !self.movement_delta_max.is_finite() || self.movement_delta_max < self.movement_delta_min
        {
            return Err(WalkError::InvalidConfig(
                "movement_delta_max must be finite and at least movement_delta_min",
            ));
        }
        if !self.random_bearing_adjustment.is_finite() || self.random_bearing_adjustment < 0.0 {
            return Err(WalkError::InvalidConfig(
                "random_bearing_adjustment must be finite and non-negative",
            ));
        }
        if self.max_history_size == 0 {
            return Err(WalkError::InvalidConfig(
                "max_history_size must be at least 1",
            ));
        }
        if self.update_interval.is_zero() {
            return Err(WalkError::InvalidConfig(
                "update_interval must be non-zero",
            ));
        }
        if self.replay_interval.is_zero() {
            return Err(WalkError::InvalidConfig(
                "replay_interval must be non-zero",
            ));
        }
        Ok(())
    }

    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random::<u64>()),
        }
    }
}

/// Bounded collection of walk points with ordinal-based eviction.
///
/// Insertion order is not meaningful; ordering queries go through the
/// ordinals. When full, an insert overwrites the slot holding the
/// smallest ordinal, so the buffer always keeps the most recent window
/// of the walk.
#[derive(Debug, Clone)]
pub struct WalkHistory {
    points: Vec<WalkPoint>,
    max_size: usize,
}

impl WalkHistory {
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            points: Vec::with_capacity(max_size),
            max_size,
        }
    }

    /// Inserts a point, evicting and returning the smallest-ordinal
    /// point when the buffer is already full.
    pub fn insert(&mut self, point: WalkPoint) -> Option<WalkPoint> {
        debug_assert!(
            self.points
                .iter()
                .all(|existing| existing.ordinal != point.ordinal),
            "duplicate ordinal {} inserted into walk history",
            point.ordinal
        );
        if self.points.len() < self.max_size {
            self.points.push(point);
            return None;
        }
        let oldest = self
            .points
            .iter()
            .enumerate()
            .min_by_key(|(_, existing)| existing.ordinal)
            .map(|(index, _)| index)?;
        Some(std::mem::replace(&mut self.points[oldest], point))
    }

    /// Most recently generated point, i.e. the one with the highest
    /// ordinal.
    #[must_use]
    pub fn latest(&self) -> Option<&WalkPoint> {
        self.points.iter().max_by_key(|point| point.ordinal)
    }

    /// All retained points sorted by ascending ordinal.
    #[must_use]
    pub fn snapshot(&self) -> Vec<WalkPoint> {
        let mut ordered = self.points.clone();
        ordered.sort_unstable_by_key(|point| point.ordinal);
        ordered
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

/// Produces the next walk point from the current history.
///
/// With an empty history the point is thrown a near-radius distance from
/// the anchor in a uniformly random direction. Afterwards each point
/// steps a short, bounded distance from its predecessor along a bearing
/// aimed at the anchor and fuzzed by the configured adjustment, which
/// keeps the walk wandering without escaping the anchor's pull.
#[must_use]
pub fn next_point<R: Rng>(
    config: &WalkConfig,
    anchor: GeoPoint,
    history: &WalkHistory,
    rng: &mut R,
) -> WalkPoint {
    match history.latest() {
        None => {
            let distance =
                rng.random_range(config.radius_meters * BOOTSTRAP_MIN_FRACTION..=config.radius_meters);
            let bearing = rng.random_range(0.0..360.0);
            WalkPoint::new(1, destination_point(anchor, bearing, distance))
        }
        Some(last) => {
            // Sub-floor draws are shifted up by the floor rather than
            // clamped, which leaves short steps twice as likely as the
            // longest ones.
            let mut distance = rng.random_range(0.0..config.movement_delta_max);
            if distance < config.movement_delta_min {
                distance += config.movement_delta_min;
            }
            let toward_anchor = bearing_between(last.position, anchor);
            let bearing = randomize_bearing(rng, toward_anchor, config.random_bearing_adjustment);
            WalkPoint::new(
                last.ordinal + 1,
                destination_point(last.position, bearing, distance),
            )
        }
    }
}

/// Sink for durable history snapshots.
///
/// `save` receives the full ordered history after every mutation and is
/// fire-and-forget; implementations report their own failures. `load` is
/// consulted once at startup.
pub trait WalkPersistence: Send {
    fn save(&mut self, points: &[WalkPoint]);
    fn load(&mut self) -> Option<Vec<WalkPoint>>;
}

/// Persistence sink that drops every snapshot.
#[derive(Debug, Default)]
pub struct NullPersistence;

impl WalkPersistence for NullPersistence {
    fn save(&mut self, _points: &[WalkPoint]) {}

    fn load(&mut self) -> Option<Vec<WalkPoint>> {
        None
    }
}

/// Receives engine lifecycle notifications.
///
/// All methods default to no-ops so implementations subscribe only to
/// the events they care about.
pub trait WalkObserver: Send {
    /// The anchor location was accepted and frozen.
    fn on_anchor_updated(&mut self, _anchor: GeoPoint) {}
    /// A point was generated live or emitted by a replay.
    fn on_point_generated(&mut self, _point: &WalkPoint) {}
    /// A replay started (`true`) or finished (`false`).
    fn on_replay_status(&mut self, _starting: bool) {}
}

/// Owns the walk state: anchor, RNG, history, persistence sink, and
/// observer list.
pub struct WalkEngine {
    config: WalkConfig,
    rng: SmallRng,
    anchor: Option<GeoPoint>,
    history: WalkHistory,
    persistence: Box<dyn WalkPersistence>,
    observers: Vec<Box<dyn WalkObserver>>,
}

impl fmt::Debug for WalkEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalkEngine")
            .field("config", &self.config)
            .field("anchor", &self.anchor)
            .field("history_len", &self.history.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl WalkEngine {
    /// Builds an engine with no durable persistence.
    pub fn new(config: WalkConfig) -> Result<Self, WalkError> {
        Self::with_persistence(config, Box::new(NullPersistence))
    }

    /// Builds an engine that saves history snapshots to `persistence`.
    pub fn with_persistence(
        config: WalkConfig,
        persistence: Box<dyn WalkPersistence>,
    ) -> Result<Self, WalkError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let history = WalkHistory::new(config.max_history_size);
        Ok(Self {
            config,
            rng,
            anchor: None,
            history,
            persistence,
            observers: Vec::new(),
        })
    }

    /// Swaps the persistence sink; the previous sink is returned so
    /// callers can flush or inspect it.
    pub fn set_persistence(&mut self, persistence: Box<dyn WalkPersistence>) -> Box<dyn WalkPersistence> {
        std::mem::replace(&mut self.persistence, persistence)
    }

    pub fn add_observer(&mut self, observer: Box<dyn WalkObserver>) {
        self.observers.push(observer);
    }

    /// Accepts the first location fix as the walk anchor. Later fixes
    /// are ignored and `false` is returned, so the walk stays centered
    /// on where it began.
    pub fn set_anchor(&mut self, latitude: f64, longitude: f64) -> bool {
        if self.anchor.is_some() {
            debug!(latitude, longitude, "anchor already frozen; ignoring fix");
            return false;
        }
        let anchor = GeoPoint::new(latitude, longitude);
        self.anchor = Some(anchor);
        info!(
            latitude,
            longitude,
            span_degrees = longitude_span_degrees(latitude),
            "anchor location frozen"
        );
        for observer in &mut self.observers {
            observer.on_anchor_updated(anchor);
        }
        true
    }

    #[must_use]
    pub fn anchor(&self) -> Option<GeoPoint> {
        self.anchor
    }

    #[must_use]
    pub fn config(&self) -> &WalkConfig {
        &self.config
    }

    #[must_use]
    pub fn history(&self) -> &WalkHistory {
        &self.history
    }

    /// Ordered copy of the retained walk.
    #[must_use]
    pub fn snapshot(&self) -> Vec<WalkPoint> {
        self.history.snapshot()
    }

    #[must_use]
    pub fn latest(&self) -> Option<WalkPoint> {
        self.history.latest().copied()
    }

    /// Runs one generation tick: produce a point, retain it, persist the
    /// snapshot, and notify observers. Returns `None` until an anchor
    /// fix has been accepted.
    pub fn step(&mut self) -> Option<WalkPoint> {
        let Some(anchor) = self.anchor else {
            trace!("no anchor fix yet; skipping generation tick");
            return None;
        };
        let point = next_point(&self.config, anchor, &self.history, &mut self.rng);
        if let Some(evicted) = self.history.insert(point) {
            debug!(evicted = evicted.ordinal, "history full; dropped oldest point");
        }
        self.persistence.save(&self.history.snapshot());
        for observer in &mut self.observers {
            observer.on_point_generated(&point);
        }
        debug!(
            ordinal = point.ordinal,
            latitude = point.position.latitude,
            longitude = point.position.longitude,
            "generated walk point"
        );
        Some(point)
    }

    /// Discards the retained walk and persists the now-empty snapshot.
    /// The anchor stays frozen; the next step bootstraps a fresh walk
    /// around it.
    pub fn restart(&mut self) {
        self.history.clear();
        self.persistence.save(&[]);
        info!("walk history cleared");
    }

    /// Restores a previously saved walk from the persistence sink.
    ///
    /// Records are ordered by ordinal, duplicate ordinals dropped, and
    /// the survivors re-bounded through the history buffer so an
    /// oversized file cannot inflate it. Returns the number of records
    /// applied.
    pub fn load_persisted(&mut self) -> usize {
        let Some(mut points) = self.persistence.load() else {
            return 0;
        };
        points.sort_unstable_by_key(|point| point.ordinal);
        points.dedup_by_key(|point| point.ordinal);
        let applied = points.len();
        for point in points {
            self.history.insert(point);
        }
        if applied > 0 {
            info!(retained = self.history.len(), "restored saved walk history");
        }
        applied
    }

    pub(crate) fn notify_replay_status(&mut self, starting: bool) {
        for observer in &mut self.observers {
            observer.on_replay_status(starting);
        }
    }

    pub(crate) fn notify_replay_point(&mut self, point: &WalkPoint) {
        for observer in &mut self.observers {
            observer.on_point_generated(point);
        }
    }
}

#[derive(Debug)]
enum SchedulerCommand {
    Start,
    Restart,
    Replay,
    Stop,
}

/// Worker-side mode. At most one tick stream is armed at a time, so a
/// mode switch atomically cancels whatever was pending.
enum Mode {
    Idle,
    Live {
        deadline: Instant,
    },
    Replaying {
        points: Vec<WalkPoint>,
        index: usize,
        deadline: Instant,
        was_live: bool,
    },
}

/// Drives a [`WalkEngine`] on a dedicated worker thread.
///
/// Commands are queued over a channel and applied between ticks, so
/// callers never race the tick timer: a `replay` issued mid-walk
/// suspends live generation until the replay finishes, then live ticks
/// resume on a fresh interval.
pub struct WalkScheduler {
    commands: mpsc::Sender<SchedulerCommand>,
    engine: Arc<Mutex<WalkEngine>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WalkScheduler {
    /// Moves the engine onto a named worker thread and returns the
    /// control handle. The worker starts idle; no ticks fire until
    /// [`start`](Self::start) or [`replay`](Self::replay).
    pub fn spawn(engine: WalkEngine) -> Result<Self, WalkError> {
        let update_interval = engine.config().update_interval;
        let replay_interval = engine.config().replay_interval;
        let engine = Arc::new(Mutex::new(engine));
        let (commands, receiver) = mpsc::channel();
        let worker_engine = Arc::clone(&engine);
        let handle = thread::Builder::new()
            .name("driftwalk-scheduler".into())
            .spawn(move || worker_loop(&worker_engine, &receiver, update_interval, replay_interval))
            .map_err(|err| WalkError::Worker(format!("failed to spawn scheduler thread: {err}")))?;
        Ok(Self {
            commands,
            engine,
            handle: Some(handle),
        })
    }

    /// Shared handle to the engine for inspection while the worker runs.
    #[must_use]
    pub fn engine(&self) -> Arc<Mutex<WalkEngine>> {
        Arc::clone(&self.engine)
    }

    /// Begins live generation; the first point lands after one full
    /// update interval.
    pub fn start(&self) -> Result<(), WalkError> {
        self.send(SchedulerCommand::Start)
    }

    /// Clears the walk and resumes live generation from scratch.
    pub fn restart(&self) -> Result<(), WalkError> {
        self.send(SchedulerCommand::Restart)
    }

    /// Re-emits the retained walk point by point at the replay interval,
    /// then returns to whatever the scheduler was doing before.
    pub fn replay(&self) -> Result<(), WalkError> {
        self.send(SchedulerCommand::Replay)
    }

    /// Stops the worker. Queued commands ahead of the stop still apply.
    pub fn stop(&self) {
        let _ = self.commands.send(SchedulerCommand::Stop);
    }

    fn send(&self, command: SchedulerCommand) -> Result<(), WalkError> {
        self.commands
            .send(command)
            .map_err(|_| WalkError::Worker("scheduler worker is not running".to_string()))
    }
}

impl Drop for WalkScheduler {
    fn drop(&mut self) {
        let _ = self.commands.send(SchedulerCommand::Stop);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("scheduler worker thread panicked");
        }
    }
}

fn lock_engine<'a>(engine: &'a Mutex<WalkEngine>) -> MutexGuard<'a, WalkEngine> {
    match engine.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("engine mutex poisoned; continuing with recovered state");
            poisoned.into_inner()
        }
    }
}

fn worker_loop(
    engine: &Mutex<WalkEngine>,
    commands: &mpsc::Receiver<SchedulerCommand>,
    update_interval: Duration,
    replay_interval: Duration,
) {
    let mut mode = Mode::Idle;
    loop {
        let received = match &mode {
            Mode::Idle => match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
            Mode::Live { deadline } | Mode::Replaying { deadline, .. } => {
                let wait = deadline.saturating_duration_since(Instant::now());
                match commands.recv_timeout(wait) {
                    Ok(command) => Some(command),
                    Err(mpsc::RecvTimeoutError::Timeout) => None,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        };

        match received {
            Some(SchedulerCommand::Start) => {
                finish_interrupted_replay(engine, &mut mode);
                info!("live walk generation started");
                mode = Mode::Live {
                    deadline: Instant::now() + update_interval,
                };
            }
            Some(SchedulerCommand::Restart) => {
                finish_interrupted_replay(engine, &mut mode);
                lock_engine(engine).restart();
                info!("walk restarted with a cleared history");
                mode = Mode::Live {
                    deadline: Instant::now() + update_interval,
                };
            }
            Some(SchedulerCommand::Replay) => {
                let was_live = match &mode {
                    Mode::Live { .. } => true,
                    Mode::Replaying { was_live, .. } => *was_live,
                    Mode::Idle => false,
                };
                finish_interrupted_replay(engine, &mut mode);
                let points = {
                    let mut guard = lock_engine(engine);
                    let snapshot = guard.snapshot();
                    guard.notify_replay_status(true);
                    snapshot
                };
                if points.is_empty() {
                    info!("replay requested with no retained points");
                    lock_engine(engine).notify_replay_status(false);
                    mode = resume_after_replay(was_live, update_interval);
                } else {
                    info!(points = points.len(), "replay started");
                    mode = Mode::Replaying {
                        points,
                        index: 0,
                        deadline: Instant::now() + replay_interval,
                        was_live,
                    };
                }
            }
            Some(SchedulerCommand::Stop) => {
                finish_interrupted_replay(engine, &mut mode);
                break;
            }
            None => mode = fire_tick(mode, engine, update_interval, replay_interval),
        }
    }
    debug!("scheduler worker stopped");
}

/// Closes out a replay cut short by another command so observers always
/// see a balanced start/finish pair.
fn finish_interrupted_replay(engine: &Mutex<WalkEngine>, mode: &mut Mode) {
    if matches!(mode, Mode::Replaying { .. }) {
        info!("replay interrupted");
        lock_engine(engine).notify_replay_status(false);
        *mode = Mode::Idle;
    }
}

fn resume_after_replay(was_live: bool, update_interval: Duration) -> Mode {
    if was_live {
        Mode::Live {
            deadline: Instant::now() + update_interval,
        }
    } else {
        Mode::Idle
    }
}

fn fire_tick(
    mode: Mode,
    engine: &Mutex<WalkEngine>,
    update_interval: Duration,
    replay_interval: Duration,
) -> Mode {
    match mode {
        Mode::Idle => Mode::Idle,
        Mode::Live { .. } => {
            lock_engine(engine).step();
            Mode::Live {
                deadline: Instant::now() + update_interval,
            }
        }
        Mode::Replaying {
            points,
            index,
            was_live,
            ..
        } => {
            let mut guard = lock_engine(engine);
            guard.notify_replay_point(&points[index]);
            let next = index + 1;
            if next == points.len() {
                guard.notify_replay_status(false);
                drop(guard);
                info!("replay finished");
                resume_after_replay(was_live, update_interval)
            } else {
                drop(guard);
                Mode::Replaying {
                    points,
                    index: next,
                    deadline: Instant::now() + replay_interval,
                    was_live,
                }
            }
        }
    }
}
