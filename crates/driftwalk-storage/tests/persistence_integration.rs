//! Round-trips through the file store and the background pipeline.

use driftwalk_core::{GeoPoint, WalkConfig, WalkEngine, WalkPersistence, WalkPoint};
use driftwalk_storage::{StorePipeline, WalkStore};
use std::fs;
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

fn temp_store_path(tag: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("driftwalk-{tag}-{}-{stamp}.json", process::id()))
}

fn wait_until(timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if ready() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    ready()
}

fn sample_points() -> Vec<WalkPoint> {
    vec![
        WalkPoint::new(1, GeoPoint::new(40.748_4, -73.985_7)),
        WalkPoint::new(2, GeoPoint::new(40.752_9, -73.977_2)),
        WalkPoint::new(3, GeoPoint::new(40.758_1, -73.985_5)),
    ]
}

#[test]
fn saved_walks_survive_a_reopen() {
    let path = temp_store_path("reopen");
    let store = WalkStore::open(&path).expect("store open");
    store.save_points(&sample_points()).expect("save");

    let reopened = WalkStore::open(&path).expect("store reopen");
    let outcome = reopened
        .load_points()
        .expect("load")
        .expect("file should exist");
    assert_eq!(outcome.points, sample_points());
    assert_eq!(outcome.skipped, 0);
    fs::remove_file(&path).ok();
}

#[test]
fn missing_file_loads_nothing() {
    let store = WalkStore::open(temp_store_path("missing")).expect("store open");
    assert!(store.load_points().expect("load").is_none());
}

#[test]
fn clear_removes_the_saved_walk_and_is_idempotent() {
    let path = temp_store_path("clear");
    let store = WalkStore::open(&path).expect("store open");
    store.save_points(&sample_points()).expect("save");
    store.clear().expect("clear");
    assert!(store.load_points().expect("load").is_none());
    store.clear().expect("second clear");
}

#[test]
fn pipeline_writes_snapshots_in_arrival_order() {
    let path = temp_store_path("pipeline");
    let mut pipeline = StorePipeline::new(&path).expect("pipeline spawn");
    let points = sample_points();

    pipeline.save(&points[..1]);
    let shared = pipeline.store();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let store = shared.lock().expect("store mutex");
            matches!(store.load_points(), Ok(Some(outcome)) if outcome.points.len() == 1)
        }),
        "first snapshot never reached the file"
    );

    pipeline.save(&points);
    drop(pipeline);

    let outcome = WalkStore::open(&path)
        .expect("store open")
        .load_points()
        .expect("load")
        .expect("file should exist");
    assert_eq!(outcome.points, points, "last snapshot wins");
    fs::remove_file(&path).ok();
}

#[test]
fn engine_walks_round_trip_through_the_pipeline() {
    let path = temp_store_path("engine-roundtrip");
    let config = WalkConfig {
        rng_seed: Some(21),
        ..WalkConfig::default()
    };

    let pipeline = StorePipeline::new(&path).expect("pipeline spawn");
    let mut engine = WalkEngine::with_persistence(config.clone(), Box::new(pipeline))
        .expect("engine construction");
    engine.set_anchor(40.0, -74.0);
    for _ in 0..3 {
        engine.step().expect("anchored step");
    }
    let saved = engine.snapshot();
    // Dropping the engine drains the pipeline queue.
    drop(engine);

    let reopened = StorePipeline::new(&path).expect("pipeline reopen");
    let mut restored =
        WalkEngine::with_persistence(config, Box::new(reopened)).expect("engine construction");
    assert_eq!(restored.load_persisted(), 3);
    assert_eq!(restored.snapshot(), saved);
    fs::remove_file(&path).ok();
}
