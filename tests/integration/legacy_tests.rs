use modeldex::cache::{CacheConfig, CacheError, DiskCache};
use modeldex::progress::ProgressCallback;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

use super::common::{mtime_secs, touch};

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<String>>,
}

impl ProgressCallback for RecordingProgress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        self.events.lock().unwrap().push(format!("start {phase} {total}"));
    }

    fn on_progress(&self, current: usize, item: &str) {
        self.events.lock().unwrap().push(format!("{current} {item}"));
    }

    fn on_phase_end(&self, phase: &str) {
        self.events.lock().unwrap().push(format!("end {phase}"));
    }
}

fn write_legacy(base: &Path, document: &Value) {
    fs::write(base.join("cache.json"), serde_json::to_vec(document).unwrap()).unwrap();
}

#[test]
fn test_legacy_entries_are_imported() {
    let data = tempdir().unwrap();
    let source = data.path().join("models/foo.safetensors");
    touch(&source);

    write_legacy(
        data.path(),
        &json!({
            "safetensors-metadata": {
                "lora/foo": {"mtime": mtime_secs(&source), "value": {"ss_output_name": "bar"}}
            },
            "hashes": {
                "a": {"mtime": 1.0, "value": "abc"},
                "b": {"mtime": 2.0, "value": "def"}
            }
        }),
    );

    let progress = Arc::new(RecordingProgress::default());
    let cache = DiskCache::open(CacheConfig::in_dir(data.path()))
        .with_progress(Arc::clone(&progress) as Arc<dyn ProgressCallback>);

    // The imported entry is fresh, so compute never runs
    let value: Option<Value> = cache
        .get_or_compute("safetensors-metadata", "lora/foo", &source, || {
            Ok::<_, CacheError>(Some(json!({"ss_output_name": "recomputed"})))
        })
        .unwrap();
    assert_eq!(value, Some(json!({"ss_output_name": "bar"})));

    let hashes = cache.get("hashes", "b").unwrap().unwrap();
    assert_eq!(hashes.mtime, 2.0);
    assert_eq!(hashes.value, json!("def"));

    let events = progress.events.lock().unwrap();
    assert_eq!(events.first().map(String::as_str), Some("start converting cache 3"));
    assert_eq!(events.last().map(String::as_str), Some("end converting cache"));
    assert!(events.contains(&"3 b".to_string()));
}

#[test]
fn test_existing_cache_dir_ignores_legacy_file() {
    let data = tempdir().unwrap();
    fs::create_dir_all(data.path().join(".cache")).unwrap();
    write_legacy(
        data.path(),
        &json!({"s": {"t": {"mtime": 1.0, "value": 1}}}),
    );

    let progress = Arc::new(RecordingProgress::default());
    let cache = DiskCache::open(CacheConfig::in_dir(data.path()))
        .with_progress(Arc::clone(&progress) as Arc<dyn ProgressCallback>);

    assert!(cache.get("s", "t").unwrap().is_none());
    assert!(progress.events.lock().unwrap().is_empty());
}

#[test]
fn test_import_happens_once_across_processes() {
    let data = tempdir().unwrap();
    write_legacy(
        data.path(),
        &json!({"s": {"t": {"mtime": 1.0, "value": "legacy"}}}),
    );

    let first = DiskCache::open(CacheConfig::in_dir(data.path()));
    assert!(first.get("s", "t").unwrap().is_some());
    first.clear("s").unwrap();
    first.close().unwrap();

    // The legacy file is still there, but the partitioned directory now exists
    assert!(data.path().join("cache.json").is_file());
    let second = DiskCache::open(CacheConfig::in_dir(data.path()));
    assert!(second.get("s", "t").unwrap().is_none());
}

#[test]
fn test_corrupt_legacy_file_is_ignored() {
    let data = tempdir().unwrap();
    fs::write(data.path().join("cache.json"), b"{ not json").unwrap();

    let cache = DiskCache::open(CacheConfig::in_dir(data.path()));
    assert!(cache.get("s", "t").unwrap().is_none());
    assert!(data.path().join(".cache/s/cache.db").is_file());
}

#[test]
fn test_malformed_legacy_entries_are_skipped() {
    let data = tempdir().unwrap();
    write_legacy(
        data.path(),
        &json!({
            "s": {
                "good": {"mtime": 1.0, "value": [1, 2]},
                "bad": "not an entry"
            },
            "not-an-object": 5
        }),
    );

    let cache = DiskCache::open(CacheConfig::in_dir(data.path()));
    assert_eq!(cache.get("s", "good").unwrap().unwrap().value, json!([1, 2]));
    assert!(cache.get("s", "bad").unwrap().is_none());
    assert_eq!(cache.subsections().unwrap(), vec!["s"]);
}

#[test]
fn test_concurrent_first_access_imports_once() {
    let data = tempdir().unwrap();
    write_legacy(
        data.path(),
        &json!({"s": {"t": {"mtime": 1.0, "value": "legacy"}}}),
    );

    let progress = Arc::new(RecordingProgress::default());
    let cache = Arc::new(
        DiskCache::open(CacheConfig::in_dir(data.path()))
            .with_progress(Arc::clone(&progress) as Arc<dyn ProgressCallback>),
    );

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || cache.subsection(&format!("other{i}")).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let starts = progress
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with("start"))
        .count();
    assert_eq!(starts, 1);
    assert!(cache.get("s", "t").unwrap().is_some());
}
