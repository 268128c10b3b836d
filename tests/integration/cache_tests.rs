use modeldex::cache::{CacheConfig, CacheEntry, CacheError, DiskCache};
use serde_json::json;
use std::cell::Cell;
use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

use super::common::{past, set_mtime, touch};

fn compute_counted(calls: &Cell<usize>, value: &str) -> Result<Option<String>, CacheError> {
    calls.set(calls.get() + 1);
    Ok(Some(value.to_string()))
}

#[test]
fn test_compute_runs_once_for_unchanged_file() {
    let data = tempdir().unwrap();
    let source = data.path().join("model.safetensors");
    touch(&source);

    let cache = DiskCache::open(CacheConfig::in_dir(data.path()));
    let calls = Cell::new(0);

    for _ in 0..3 {
        let value = cache
            .get_or_compute("meta", "lora/model", &source, || compute_counted(&calls, "v1"))
            .unwrap();
        assert_eq!(value.as_deref(), Some("v1"));
    }
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_newer_mtime_recomputes() {
    let data = tempdir().unwrap();
    let source = data.path().join("model.safetensors");
    touch(&source);
    let stamp = past();
    set_mtime(&source, stamp);

    let cache = DiskCache::open(CacheConfig::in_dir(data.path()));
    let calls = Cell::new(0);

    let first = cache
        .get_or_compute("meta", "t", &source, || compute_counted(&calls, "old"))
        .unwrap();
    assert_eq!(first.as_deref(), Some("old"));

    set_mtime(&source, stamp + 60);
    let second = cache
        .get_or_compute("meta", "t", &source, || compute_counted(&calls, "new"))
        .unwrap();
    assert_eq!(second.as_deref(), Some("new"));
    assert_eq!(calls.get(), 2);

    // The regenerated entry carries the new mtime and is fresh again
    let third = cache
        .get_or_compute("meta", "t", &source, || compute_counted(&calls, "newer"))
        .unwrap();
    assert_eq!(third.as_deref(), Some("new"));
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_older_mtime_keeps_entry() {
    let data = tempdir().unwrap();
    let source = data.path().join("model.safetensors");
    touch(&source);
    let stamp = past();
    set_mtime(&source, stamp);

    let cache = DiskCache::open(CacheConfig::in_dir(data.path()));
    let calls = Cell::new(0);
    cache
        .get_or_compute("meta", "t", &source, || compute_counted(&calls, "kept"))
        .unwrap();

    // Restored from a backup with an older timestamp
    set_mtime(&source, stamp - 600);
    let value = cache
        .get_or_compute("meta", "t", &source, || compute_counted(&calls, "other"))
        .unwrap();
    assert_eq!(value.as_deref(), Some("kept"));
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_failure_is_not_cached() {
    let data = tempdir().unwrap();
    let source = data.path().join("broken.safetensors");
    touch(&source);

    let cache = DiskCache::open(CacheConfig::in_dir(data.path()));
    let calls = Cell::new(0);

    for _ in 0..2 {
        let value: Option<String> = cache
            .get_or_compute("meta", "broken", &source, || {
                calls.set(calls.get() + 1);
                Ok::<_, CacheError>(None)
            })
            .unwrap();
        assert!(value.is_none());
    }
    assert_eq!(calls.get(), 2);
    assert!(cache.get("meta", "broken").unwrap().is_none());
}

#[test]
fn test_compute_error_propagates_unchanged() {
    let data = tempdir().unwrap();
    let source = data.path().join("a.bin");
    touch(&source);

    let cache = DiskCache::open(CacheConfig::in_dir(data.path()));
    let result: anyhow::Result<Option<u32>> =
        cache.get_or_compute("meta", "a", &source, || Err(anyhow::anyhow!("parser exploded")));

    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "parser exploded");
    assert!(cache.get("meta", "a").unwrap().is_none());
}

#[test]
fn test_missing_source_is_an_error() {
    let data = tempdir().unwrap();
    let cache = DiskCache::open(CacheConfig::in_dir(data.path()));

    let result = cache.get_or_compute("meta", "gone", &data.path().join("gone.pt"), || {
        Ok::<_, CacheError>(Some(1u32))
    });
    assert!(matches!(result, Err(CacheError::SourceMissing(_))));
}

#[test]
fn test_unexpected_stored_shape_regenerates() {
    let data = tempdir().unwrap();
    let source = data.path().join("a.safetensors");
    touch(&source);

    let cache = DiskCache::open(CacheConfig::in_dir(data.path()));
    cache
        .set("meta", "a", &CacheEntry::new(f64::MAX, json!("not a number")))
        .unwrap();

    let value = cache
        .get_or_compute("meta", "a", &source, || Ok::<_, CacheError>(Some(42u64)))
        .unwrap();
    assert_eq!(value, Some(42));
    assert_eq!(cache.get("meta", "a").unwrap().unwrap().value, json!(42));
}

#[test]
fn test_subsections_do_not_share_keys() {
    let data = tempdir().unwrap();
    let source = data.path().join("a.safetensors");
    touch(&source);

    let cache = DiskCache::open(CacheConfig::in_dir(data.path()));
    cache
        .get_or_compute("one", "same", &source, || Ok::<_, CacheError>(Some("first".to_string())))
        .unwrap();
    let other = cache
        .get_or_compute("two", "same", &source, || Ok::<_, CacheError>(Some("second".to_string())))
        .unwrap();

    assert_eq!(other.as_deref(), Some("second"));
    assert_eq!(cache.subsections().unwrap(), vec!["one", "two"]);
    assert!(data.path().join(".cache/one/cache.db").is_file());
}

#[test]
fn test_entries_survive_reopen() {
    let data = tempdir().unwrap();
    let source = data.path().join("a.safetensors");
    touch(&source);

    let cache = DiskCache::open(CacheConfig::in_dir(data.path()));
    cache
        .get_or_compute("meta", "a", &source, || Ok::<_, CacheError>(Some(vec![1, 2, 3])))
        .unwrap();
    cache.close().unwrap();

    let cache = DiskCache::open(CacheConfig::in_dir(data.path()));
    let value: Option<Vec<i32>> = cache
        .get_or_compute("meta", "a", &source, || -> Result<_, CacheError> {
            panic!("should be served from disk")
        })
        .unwrap();
    assert_eq!(value, Some(vec![1, 2, 3]));
}

#[test]
fn test_concurrent_first_access_opens_one_store() {
    let data = tempdir().unwrap();
    let cache = Arc::new(DiskCache::open(CacheConfig::in_dir(data.path())));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.subsection("shared").unwrap()
            })
        })
        .collect();

    let stores: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for store in &stores[1..] {
        assert!(Arc::ptr_eq(&stores[0], store));
    }
}

#[test]
fn test_clear_and_stats() {
    let data = tempdir().unwrap();
    let cache = DiskCache::open(CacheConfig::in_dir(data.path()));

    for i in 0..5 {
        cache
            .set("meta", &format!("t{i}"), &CacheEntry::new(1.0, json!({"i": i})))
            .unwrap();
    }
    let stats = cache.stats("meta").unwrap();
    assert_eq!(stats.entries, 5);
    assert!(stats.total_size > 0);

    assert_eq!(cache.clear("meta").unwrap(), 5);
    assert_eq!(cache.stats("meta").unwrap().entries, 0);
}

#[test]
fn test_size_limit_culls_oldest() {
    let data = tempdir().unwrap();
    let config = CacheConfig {
        size_limit: 2_000,
        ..CacheConfig::in_dir(data.path())
    };
    let cache = DiskCache::open(config);

    let payload = "x".repeat(400);
    for i in 0..10 {
        cache
            .set("meta", &format!("t{i}"), &CacheEntry::new(1.0, json!(payload)))
            .unwrap();
    }

    let stats = cache.stats("meta").unwrap();
    assert!(stats.total_size <= 2_000, "total {}", stats.total_size);
    assert!(cache.get("meta", "t0").unwrap().is_none());
    assert!(cache.get("meta", "t9").unwrap().is_some());
}

#[test]
fn test_large_values_go_to_files() {
    let data = tempdir().unwrap();
    let config = CacheConfig {
        min_file_size: 1_024,
        ..CacheConfig::in_dir(data.path())
    };
    let cache = DiskCache::open(config);

    let big = json!({"ss_tag_frequency": "y".repeat(4_096)});
    cache.set("meta", "big", &CacheEntry::new(1.0, big.clone())).unwrap();

    let values_dir = data.path().join(".cache/meta/values");
    let files: usize = fs::read_dir(&values_dir)
        .unwrap()
        .map(|d| fs::read_dir(d.unwrap().path()).unwrap().count())
        .sum();
    assert_eq!(files, 1);
    assert_eq!(cache.get("meta", "big").unwrap().unwrap().value, big);
}

#[test]
fn test_invalid_subsection_names() {
    let data = tempdir().unwrap();
    let cache = DiskCache::open(CacheConfig::in_dir(data.path()));
    for name in ["", "..", "a/b"] {
        assert!(matches!(
            cache.subsection(name),
            Err(CacheError::InvalidSubsection(_))
        ));
    }
}
