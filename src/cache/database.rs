//! SQLite-backed storage for a single cache subsection.
//!
//! Each subsection lives in its own directory:
//!
//! ```text
//! <cache_dir>/<subsection>/cache.db                 entry table
//! <cache_dir>/<subsection>/values/<hh>/<sha256>.json  large values
//! ```
//!
//! Values whose serialized size reaches `min_file_size` are written to a
//! separate file and only referenced from the database; smaller ones are
//! stored inline. Once the summed size of all values exceeds `size_limit`,
//! the oldest entries are culled until the subsection fits again.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use super::{CacheEntry, CacheError, CacheResult};

/// Database filename inside a subsection directory.
const DB_FILENAME: &str = "cache.db";
/// Directory holding out-of-line values.
const VALUES_DIR: &str = "values";
/// Number of rows removed per culling round.
const CULL_BATCH: i64 = 16;

/// Entry count and stored size of a subsection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubsectionStats {
    /// Number of entries
    pub entries: u64,
    /// Sum of serialized value sizes in bytes
    pub total_size: u64,
}

/// Persistent store for one subsection.
///
/// The connection is serialized behind a mutex; SQLite runs in WAL mode so
/// other processes can share the same store.
pub struct SubsectionStore {
    name: String,
    dir: PathBuf,
    conn: Mutex<Connection>,
    size_limit: u64,
    min_file_size: u64,
}

impl std::fmt::Debug for SubsectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubsectionStore")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("size_limit", &self.size_limit)
            .field("min_file_size", &self.min_file_size)
            .finish_non_exhaustive()
    }
}

impl SubsectionStore {
    /// Open or create the store for `name` inside `dir`.
    pub fn open(name: &str, dir: &Path, size_limit: u64, min_file_size: u64) -> CacheResult<Self> {
        fs::create_dir_all(dir).map_err(|e| CacheError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let db_path = dir.join(DB_FILENAME);
        let conn = Connection::open(&db_path).map_err(|e| db_error(name, e))?;
        Self::configure_connection(&conn).map_err(|e| db_error(name, e))?;
        Self::ensure_schema(&conn).map_err(|e| db_error(name, e))?;

        log::debug!("Opened cache subsection '{}' at {}", name, dir.display());

        Ok(Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            conn: Mutex::new(conn),
            size_limit,
            min_file_size,
        })
    }

    fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=30000;
            PRAGMA synchronous=NORMAL;
            ",
        )
    }

    fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                title TEXT PRIMARY KEY,
                mtime REAL NOT NULL,
                store_time REAL NOT NULL,
                size INTEGER NOT NULL,
                value TEXT,
                file TEXT
            )",
            [],
        )?;
        Ok(())
    }

    /// Directory backing this subsection.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Look up an entry by title.
    ///
    /// An entry whose out-of-line value file has vanished is dropped and
    /// reported as absent.
    pub fn get(&self, title: &str) -> CacheResult<Option<CacheEntry>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT mtime, value, file FROM entries WHERE title = ?1",
                params![title],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| db_error(&self.name, e))?;

        let Some((mtime, inline, file)) = row else {
            return Ok(None);
        };

        let json = match (inline, file) {
            (Some(json), _) => json,
            (None, Some(file)) => {
                let path = self.dir.join(&file);
                match fs::read_to_string(&path) {
                    Ok(json) => json,
                    Err(e) => {
                        log::warn!(
                            "Cache value file for '{}' is unreadable ({}): {}",
                            title,
                            path.display(),
                            e
                        );
                        conn.execute("DELETE FROM entries WHERE title = ?1", params![title])
                            .map_err(|e| db_error(&self.name, e))?;
                        return Ok(None);
                    }
                }
            }
            (None, None) => return Ok(None),
        };

        let value = serde_json::from_str(&json).map_err(|e| CacheError::Serialization {
            title: title.to_string(),
            source: e,
        })?;

        Ok(Some(CacheEntry::new(mtime, value)))
    }

    /// Insert or overwrite an entry, then cull if the subsection is over its limit.
    pub fn set(&self, title: &str, entry: &CacheEntry) -> CacheResult<()> {
        let json = serde_json::to_string(&entry.value).map_err(|e| CacheError::Serialization {
            title: title.to_string(),
            source: e,
        })?;
        let size = json.len() as u64;
        let store_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |d| d.as_secs_f64());

        let conn = self.lock()?;

        let previous_file: Option<String> = conn
            .query_row(
                "SELECT file FROM entries WHERE title = ?1",
                params![title],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map_err(|e| db_error(&self.name, e))?
            .flatten();

        let (inline, file) = if size >= self.min_file_size {
            let relative = value_file_name(title);
            self.write_value_file(&relative, &json)?;
            (None, Some(relative))
        } else {
            (Some(json), None)
        };

        // INSERT OR REPLACE assigns a fresh rowid, which is the age order used for culling
        conn.execute(
            "INSERT OR REPLACE INTO entries (title, mtime, store_time, size, value, file)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![title, entry.mtime, store_time, size as i64, inline, file],
        )
        .map_err(|e| db_error(&self.name, e))?;

        if let Some(previous) = previous_file {
            if file.as_deref() != Some(previous.as_str()) {
                self.remove_value_file(&previous);
            }
        }

        log::trace!("Stored '{}' in subsection '{}' ({} bytes)", title, self.name, size);

        self.cull(&conn)
    }

    /// Remove the oldest entries until the stored size fits `size_limit`.
    fn cull(&self, conn: &Connection) -> CacheResult<()> {
        loop {
            let total: i64 = conn
                .query_row("SELECT COALESCE(SUM(size), 0) FROM entries", [], |row| {
                    row.get(0)
                })
                .map_err(|e| db_error(&self.name, e))?;

            if total as u64 <= self.size_limit {
                return Ok(());
            }

            let victims: Vec<(String, Option<String>)> = {
                let mut stmt = conn
                    .prepare("SELECT title, file FROM entries ORDER BY rowid ASC LIMIT ?1")
                    .map_err(|e| db_error(&self.name, e))?;
                let rows = stmt
                    .query_map(params![CULL_BATCH], |row| Ok((row.get(0)?, row.get(1)?)))
                    .map_err(|e| db_error(&self.name, e))?;
                rows.collect::<rusqlite::Result<_>>()
                    .map_err(|e| db_error(&self.name, e))?
            };

            if victims.is_empty() {
                return Ok(());
            }

            let mut freed = total as u64;
            for (title, file) in victims {
                let size: i64 = conn
                    .query_row(
                        "SELECT size FROM entries WHERE title = ?1",
                        params![title],
                        |row| row.get(0),
                    )
                    .map_err(|e| db_error(&self.name, e))?;
                conn.execute("DELETE FROM entries WHERE title = ?1", params![title])
                    .map_err(|e| db_error(&self.name, e))?;
                if let Some(file) = file {
                    self.remove_value_file(&file);
                }
                log::debug!("Culled '{}' from subsection '{}'", title, self.name);

                freed = freed.saturating_sub(size as u64);
                if freed <= self.size_limit {
                    break;
                }
            }
        }
    }

    /// Delete every entry and value file of this subsection.
    pub fn clear(&self) -> CacheResult<u64> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM entries", [])
            .map_err(|e| db_error(&self.name, e))?;

        let values_dir = self.dir.join(VALUES_DIR);
        if values_dir.exists() {
            fs::remove_dir_all(&values_dir).map_err(|e| CacheError::Io {
                path: values_dir.clone(),
                source: e,
            })?;
        }

        log::info!("Cleared {} entries from subsection '{}'", removed, self.name);
        Ok(removed as u64)
    }

    /// Entry count and total stored size.
    pub fn stats(&self) -> CacheResult<SubsectionStats> {
        let conn = self.lock()?;
        let (entries, total_size): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| db_error(&self.name, e))?;

        Ok(SubsectionStats {
            entries: entries as u64,
            total_size: total_size as u64,
        })
    }

    /// Flush the write-ahead log into the main database file.
    pub fn checkpoint(&self) -> CacheResult<()> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .map_err(|e| db_error(&self.name, e))
    }

    fn write_value_file(&self, relative: &str, json: &str) -> CacheResult<()> {
        let path = self.dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        // Write then rename so readers never see a partial value
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| CacheError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &path).map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e,
        })
    }

    fn remove_value_file(&self, relative: &str) {
        let path = self.dir.join(relative);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove cache value file {}: {}", path.display(), e);
            }
        }
    }
}

/// Relative path of the out-of-line file for `title`.
fn value_file_name(title: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(title.as_bytes()));
    format!("{}/{}/{}.json", VALUES_DIR, &digest[..2], digest)
}

fn db_error(subsection: &str, source: rusqlite::Error) -> CacheError {
    CacheError::Database {
        subsection: subsection.to_string(),
        source,
    }
}
