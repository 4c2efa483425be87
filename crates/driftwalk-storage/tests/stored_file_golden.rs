//! Fixed store files, including damaged ones, pinned against the
//! on-disk record shape.

use driftwalk_core::{GeoPoint, WalkPoint};
use driftwalk_storage::{StoreError, WalkStore};
use std::fs;
use std::path::PathBuf;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_store_path(tag: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("driftwalk-golden-{tag}-{}-{stamp}.json", process::id()))
}

const MIXED_RECORDS: &str = r#"[
  { "id": 4, "lat": 40.75, "lon": -73.99 },
  { "id": "seven", "lat": 1.0, "lon": 2.0 },
  { "lat": 3.0, "lon": 4.0 },
  { "id": 2, "lat": 40.70, "lon": -74.01, "note": "extra fields pass through" },
  17,
  { "id": 9, "lat": "north", "lon": 0.0 }
]"#;

#[test]
fn malformed_records_are_skipped_not_fatal() {
    let path = temp_store_path("mixed");
    fs::write(&path, MIXED_RECORDS).expect("write fixture");

    let outcome = WalkStore::open(&path)
        .expect("store open")
        .load_points()
        .expect("load")
        .expect("file should exist");
    let ids: Vec<u64> = outcome.points.iter().map(|p| p.ordinal).collect();
    assert_eq!(ids, vec![4, 2], "well-formed records keep their file order");
    assert_eq!(outcome.skipped, 4);
    fs::remove_file(&path).ok();
}

#[test]
fn empty_array_is_an_empty_walk() {
    let path = temp_store_path("empty");
    fs::write(&path, "[]").expect("write fixture");

    let outcome = WalkStore::open(&path)
        .expect("store open")
        .load_points()
        .expect("load")
        .expect("file should exist");
    assert!(outcome.points.is_empty());
    assert_eq!(outcome.skipped, 0);
    fs::remove_file(&path).ok();
}

#[test]
fn non_array_file_fails_the_load() {
    let path = temp_store_path("non-array");
    fs::write(&path, r#"{ "walk": [] }"#).expect("write fixture");

    let result = WalkStore::open(&path).expect("store open").load_points();
    assert!(matches!(result, Err(StoreError::Json(_))));
    fs::remove_file(&path).ok();
}

#[test]
fn fractional_ids_are_rejected_per_record() {
    let path = temp_store_path("fractional");
    fs::write(&path, r#"[ { "id": 2.5, "lat": 0, "lon": 0 } ]"#).expect("write fixture");

    let outcome = WalkStore::open(&path)
        .expect("store open")
        .load_points()
        .expect("load")
        .expect("file should exist");
    assert!(outcome.points.is_empty());
    assert_eq!(outcome.skipped, 1);
    fs::remove_file(&path).ok();
}

#[test]
fn saved_records_use_the_stable_field_names() {
    let path = temp_store_path("field-names");
    let store = WalkStore::open(&path).expect("store open");
    store
        .save_points(&[WalkPoint::new(7, GeoPoint::new(49.5, 11.0))])
        .expect("save");

    let raw = fs::read_to_string(&path).expect("read raw file");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
    assert_eq!(value[0]["id"], 7);
    assert_eq!(value[0]["lat"], 49.5);
    assert_eq!(value[0]["lon"], 11.0);
    fs::remove_file(&path).ok();
}
