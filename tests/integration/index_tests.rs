use modeldex::cache::{CacheConfig, DiskCache};
use modeldex::models::safetensors::METADATA_SUBSECTION;
use modeldex::models::{IndexConfig, ModelError, ModelIndex, SdVersion};
use modeldex::registry::{FolderConfig, ModelPaths, LORAS};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

use super::common::{past, set_mtime, touch, write_safetensors};

const LORA_EXTENSIONS: &[&str] = &[".pt", ".ckpt", ".safetensors"];

struct Fixture {
    _data: TempDir,
    models: PathBuf,
    cache: Arc<DiskCache>,
}

impl Fixture {
    fn new() -> Self {
        let data = tempdir().unwrap();
        let models = data.path().join("loras");
        fs::create_dir_all(&models).unwrap();
        let cache = Arc::new(DiskCache::open(CacheConfig::in_dir(data.path())));
        Self {
            _data: data,
            models,
            cache,
        }
    }

    fn index_over(&self, dirs: Vec<PathBuf>) -> ModelIndex {
        let mut folders = BTreeMap::new();
        folders.insert(LORAS.to_string(), FolderConfig::new(dirs, LORA_EXTENSIONS));
        ModelIndex::new(
            Arc::new(ModelPaths::new(folders)),
            Arc::clone(&self.cache),
            IndexConfig::default(),
        )
    }

    fn index(&self) -> ModelIndex {
        self.index_over(vec![self.models.clone()])
    }

    fn lora(&self, relative: &str) -> PathBuf {
        self.models.join(relative)
    }
}

fn names(index: &ModelIndex) -> Vec<String> {
    index.list().into_iter().map(|r| r.name).collect()
}

#[test]
fn test_alias_collision_is_forbidden() {
    let fx = Fixture::new();
    write_safetensors(&fx.lora("a.safetensors"), &json!({"ss_output_name": "shared"}));
    write_safetensors(&fx.lora("b.safetensors"), &json!({"ss_output_name": "shared"}));

    let index = fx.index();
    let summary = index.rescan().unwrap();
    assert_eq!(summary.records, 2);
    // "none" and "Addams" are seeded, "shared" collided
    assert_eq!(summary.forbidden_aliases, 3);

    assert!(index.resolve("shared").is_none());
    assert_eq!(index.resolve("a").unwrap().filename, fx.lora("a.safetensors"));
    assert_eq!(index.resolve("b").unwrap().filename, fx.lora("b.safetensors"));

    let a = index.resolve("a").unwrap();
    assert_eq!(index.display_name(&a), "a");
}

#[test]
fn test_unique_alias_resolves() {
    let fx = Fixture::new();
    write_safetensors(&fx.lora("add_detail.safetensors"), &json!({"ss_output_name": "detail"}));

    let index = fx.index();
    index.rescan().unwrap();

    let by_alias = index.resolve("detail").unwrap();
    assert_eq!(by_alias.name, "add_detail");
    assert_eq!(index.display_name(&by_alias), "detail");
    // Lookup is case-sensitive
    assert!(index.resolve("Detail").is_none());
}

#[test]
fn test_alias_none_never_resolves() {
    let fx = Fixture::new();
    write_safetensors(&fx.lora("x.safetensors"), &json!({"ss_output_name": "None"}));

    let index = fx.index();
    index.rescan().unwrap();

    assert!(index.resolve("None").is_none());
    assert!(index.resolve("x").is_some());
}

#[test]
fn test_default_seeds_forbid_addams() {
    let fx = Fixture::new();
    write_safetensors(&fx.lora("family.safetensors"), &json!({"ss_output_name": "Addams"}));

    let index = fx.index();
    index.rescan().unwrap();

    assert!(index.resolve("Addams").is_none());
    let record = index.resolve("family").unwrap();
    assert_eq!(index.display_name(&record), "family");
}

#[test]
fn test_versions_are_detected() {
    let fx = Fixture::new();
    write_safetensors(&fx.lora("v1.safetensors"), &json!({"ss_base_model_version": "sd_v1"}));
    write_safetensors(&fx.lora("xl.safetensors"), &json!({"ss_base_model_version": "sdxl_base_v0-9"}));
    write_safetensors(
        &fx.lora("v2.safetensors"),
        &json!({"ss_v2": "True", "ss_base_model_version": "sd_v1"}),
    );
    write_safetensors(
        &fx.lora("legacy.safetensors"),
        &json!({"ss_sd_model_name": "model.ckpt", "ss_resolution": "(512, 512)"}),
    );
    touch(&fx.lora("plain.pt"));

    let index = fx.index();
    index.rescan().unwrap();

    let version = |id: &str| index.resolve(id).unwrap().version;
    assert_eq!(version("v1"), SdVersion::V1);
    assert_eq!(version("xl"), SdVersion::VariantXL);
    assert_eq!(version("v2"), SdVersion::V2);
    assert_eq!(version("legacy"), SdVersion::V1);
    assert_eq!(version("plain"), SdVersion::Unknown);
}

#[test]
fn test_non_safetensors_files_have_empty_metadata() {
    let fx = Fixture::new();
    touch(&fx.lora("old.ckpt"));
    fs::write(fx.lora("readme.txt"), b"ignored").unwrap();

    let index = fx.index();
    let summary = index.rescan().unwrap();
    assert_eq!(summary.files_seen, 1);

    let record = index.resolve("old").unwrap();
    assert!(record.metadata.is_empty());
    assert_eq!(record.alias, "old");
    assert_eq!(fx.cache.stats(METADATA_SUBSECTION).unwrap().entries, 0);
}

#[test]
fn test_unparsable_header_keeps_record_without_caching() {
    let fx = Fixture::new();
    fs::write(fx.lora("broken.safetensors"), b"\x04\x00\x00\x00\x00\x00\x00\x00nope").unwrap();

    let index = fx.index();
    let summary = index.rescan().unwrap();
    assert_eq!(summary.records, 1);
    assert_eq!(summary.skipped, 0);

    let record = index.resolve("broken").unwrap();
    assert!(record.metadata.is_empty());
    assert!(fx.cache.get(METADATA_SUBSECTION, "lora/broken").unwrap().is_none());
}

#[test]
fn test_cached_metadata_is_reused_until_mtime_advances() {
    let fx = Fixture::new();
    let path = fx.lora("style.safetensors");
    let stamp = past();
    write_safetensors(&path, &json!({"ss_output_name": "first"}));
    set_mtime(&path, stamp);

    let index = fx.index();
    index.rescan().unwrap();
    assert!(index.resolve("first").is_some());

    // New content behind an unchanged timestamp is not noticed
    write_safetensors(&path, &json!({"ss_output_name": "second"}));
    set_mtime(&path, stamp);
    index.rescan().unwrap();
    assert!(index.resolve("first").is_some());
    assert!(index.resolve("second").is_none());

    set_mtime(&path, stamp + 10);
    index.rescan().unwrap();
    assert!(index.resolve("second").is_some());
    assert!(index.resolve("first").is_none());
}

#[test]
fn test_cache_titles_use_prefix_and_name() {
    let fx = Fixture::new();
    write_safetensors(&fx.lora("sub/deep.safetensors"), &json!({"ss_output_name": "d"}));

    fx.index().rescan().unwrap();

    let entry = fx.cache.get(METADATA_SUBSECTION, "lora/deep").unwrap().unwrap();
    assert_eq!(entry.value, json!({"ss_output_name": "d"}));
}

#[test]
fn test_rescan_is_idempotent() {
    let fx = Fixture::new();
    write_safetensors(&fx.lora("a.safetensors"), &json!({"ss_output_name": "x"}));
    write_safetensors(&fx.lora("b.safetensors"), &json!({"ss_output_name": "x"}));
    write_safetensors(&fx.lora("c.safetensors"), &json!({"ss_output_name": "y"}));

    let index = fx.index();
    let first = index.rescan().unwrap();
    let first_names = names(&index);
    let second = index.rescan().unwrap();

    assert_eq!(first.records, second.records);
    assert_eq!(first.forbidden_aliases, second.forbidden_aliases);
    assert_eq!(first_names, names(&index));
    assert!(index.resolve("x").is_none());
    assert_eq!(index.resolve("y").unwrap().name, "c");
}

#[test]
fn test_hidden_directories_are_skipped() {
    let fx = Fixture::new();
    write_safetensors(&fx.lora("visible.safetensors"), &json!({}));
    write_safetensors(&fx.lora(".trash/hidden.safetensors"), &json!({}));
    write_safetensors(&fx.lora("sub/.git/inner.safetensors"), &json!({}));

    let index = fx.index();
    index.rescan().unwrap();
    assert_eq!(names(&index), vec!["visible"]);
}

#[test]
fn test_discovery_order_is_natural() {
    let fx = Fixture::new();
    for name in ["lora10", "lora2", "lora1"] {
        touch(&fx.lora(&format!("{name}.pt")));
    }

    let index = fx.index();
    index.rescan().unwrap();
    assert_eq!(names(&index), vec!["lora1", "lora2", "lora10"]);
}

#[test]
fn test_multiple_directories_and_duplicate_names() {
    let fx = Fixture::new();
    let second = fx.models.parent().unwrap().join("shared_loras");
    write_safetensors(&fx.lora("dup.safetensors"), &json!({"ss_output_name": "from_first"}));
    write_safetensors(&second.join("dup.safetensors"), &json!({"ss_output_name": "from_second"}));
    write_safetensors(&second.join("only.safetensors"), &json!({}));

    let index = fx.index_over(vec![fx.models.clone(), second.clone()]);
    let summary = index.rescan().unwrap();
    assert_eq!(summary.files_seen, 3);
    assert_eq!(summary.records, 2);

    // The later file with the same name replaces the earlier record
    let dup = index.resolve("dup").unwrap();
    assert_eq!(dup.filename, second.join("dup.safetensors"));
    assert!(index.resolve("only").is_some());

    // The replaced record's alias no longer points anywhere
    assert!(index.resolve("from_first").is_none());
    assert_eq!(index.resolve("from_second").unwrap().name, "dup");
}

#[test]
fn test_missing_directory_gives_empty_index() {
    let fx = Fixture::new();
    let index = fx.index_over(vec![fx.models.join("does-not-exist")]);
    let summary = index.rescan().unwrap();
    assert_eq!(summary.records, 0);
    assert!(index.is_empty());
}

#[test]
fn test_unknown_category_fails_rescan() {
    let fx = Fixture::new();
    let mut folders = BTreeMap::new();
    folders.insert(LORAS.to_string(), FolderConfig::new(vec![fx.models.clone()], LORA_EXTENSIONS));
    let config = IndexConfig {
        category: "lorass".to_string(),
        ..IndexConfig::default()
    };
    let index = ModelIndex::new(Arc::new(ModelPaths::new(folders)), Arc::clone(&fx.cache), config);

    let err = index.rescan().unwrap_err();
    assert!(matches!(err, ModelError::Registry(_)));
    assert!(err.to_string().contains("did you mean 'loras'"));
}

#[test]
fn test_snapshot_survives_rescan() {
    let fx = Fixture::new();
    write_safetensors(&fx.lora("keep.safetensors"), &json!({"ss_output_name": "k"}));

    let index = fx.index();
    index.rescan().unwrap();
    let before = index.snapshot();

    fs::remove_file(fx.lora("keep.safetensors")).unwrap();
    index.rescan().unwrap();

    assert!(index.resolve("keep").is_none());
    assert_eq!(before.len(), 1);
    assert_eq!(before.resolve("k").unwrap().name, "keep");
}

#[test]
fn test_hash_lookup() {
    let fx = Fixture::new();
    write_safetensors(
        &fx.lora("hashed.safetensors"),
        &json!({"sshs_model_hash": "0123456789abcdef0123"}),
    );

    let index = fx.index();
    index.rescan().unwrap();

    let record = index.resolve_hash("0123456789ab").unwrap();
    assert_eq!(record.name, "hashed");
    assert_eq!(record.shorthash.as_deref(), Some("0123456789ab"));
}

#[cfg(unix)]
#[test]
fn test_unreadable_file_is_skipped() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new();
    let locked = fx.lora("locked.safetensors");
    write_safetensors(&locked, &json!({"ss_output_name": "locked"}));
    write_safetensors(&fx.lora("open.safetensors"), &json!({}));
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users can read it anyway
    if fs::File::open(&locked).is_ok() {
        return;
    }

    let index = fx.index();
    let summary = index.rescan().unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

    assert_eq!(summary.files_seen, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(names(&index), vec!["open"]);
}

#[test]
fn test_metadata_values_keep_priority_order() {
    let fx = Fixture::new();
    write_safetensors(
        &fx.lora("ordered.safetensors"),
        &json!({"zzz_custom": "1", "ss_output_name": "o", "ss_sd_model_name": "base.ckpt"}),
    );

    let index = fx.index();
    index.rescan().unwrap();

    let record = index.resolve("o").unwrap();
    let keys: Vec<&str> = record.metadata.keys().map(String::as_str).collect();
    // Known keys first, the rest in file order
    assert_eq!(keys, vec!["ss_sd_model_name", "zzz_custom", "ss_output_name"]);
}
