//! SQLite persistence layer for engine snapshots.
//!
//! Each named save slot holds one [`EngineSnapshot`] serialised to JSON
//! inside a per-playthrough SQLite database. The schema is intentionally
//! simple:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS save_slots (
//!     slot       TEXT PRIMARY KEY,
//!     data       BLOB NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     checksum   TEXT
//! );
//! ```
//!
//! - WAL mode so the game can keep reading while a save is written.
//! - JSON inside a BLOB column keeps the schema stable across snapshot
//!   layout changes (forward-compatible).
//! - Optional CRC-32 checksum detects save corruption.
//! - Backup support via SQLite's online-backup API.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::engine::EngineSnapshot;
use crate::error::{EchoError, Result};

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

/// Compute a CRC-32 checksum of `data` and return it as a lowercase hex
/// string.
fn crc32_hex(data: &[u8]) -> String {
    let crc = crc32_compute(data);
    format!("{crc:08x}")
}

/// Basic CRC-32 (ISO 3309 / ITU-T V.42) computation.
fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

// ---------------------------------------------------------------------------
// SaveStore
// ---------------------------------------------------------------------------

/// Handle to an open SQLite database that stores [`EngineSnapshot`]s.
///
/// # Usage
///
/// ```no_run
/// # use echoline_core::persistence::SaveStore;
/// # use echoline_core::config::{EngineConfig, PersistenceConfig};
/// # use echoline_core::engine::NarrativeEngine;
/// # use echoline_core::types::LocationId;
/// let store = SaveStore::open("playthrough.db", &PersistenceConfig::default())?;
/// let engine = NarrativeEngine::new(EngineConfig::default(), LocationId::new("hollowbrook"));
/// store.save_slot("autosave", &engine.snapshot())?;
/// let loaded = store.load_slot("autosave")?;
/// # Ok::<(), echoline_core::error::EchoError>(())
/// ```
pub struct SaveStore {
    conn: Connection,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for SaveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveStore")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS save_slots (
    slot       TEXT PRIMARY KEY,
    data       BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    checksum   TEXT
);";

impl SaveStore {
    /// Open (or create) an SQLite database at `path`.
    ///
    /// The schema is automatically created if it does not exist.
    /// WAL mode is enabled when `config.wal_mode` is `true`.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "Save store opened"
        );

        Ok(Self {
            conn,
            config: config.clone(),
            db_path,
        })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn,
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    // ------------------------------------------------------------------
    // Core CRUD
    // ------------------------------------------------------------------

    /// Save (upsert) a snapshot into a named slot.
    ///
    /// The snapshot is serialised to JSON. If `config.checksum_enabled` is
    /// true, a CRC-32 of the JSON bytes is stored alongside the data.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::Serialization`] if JSON encoding fails, or
    /// [`EchoError::Database`] on SQLite failures.
    pub fn save_slot(&self, slot: &str, snapshot: &EngineSnapshot) -> Result<()> {
        let start = Instant::now();

        let json =
            serde_json::to_vec(snapshot).map_err(|e| EchoError::Serialization(e.to_string()))?;

        let checksum = if self.config.checksum_enabled {
            Some(crc32_hex(&json))
        } else {
            None
        };

        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO save_slots (slot, data, updated_at, checksum)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(slot) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                checksum = excluded.checksum",
            params![slot, json, now, checksum],
        )?;

        debug!(
            slot,
            turn = snapshot.turn,
            bytes = json.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Saved snapshot"
        );

        Ok(())
    }

    /// Load the snapshot from a named slot.
    ///
    /// Returns `None` if no row exists for the slot. If checksums are
    /// enabled and the stored checksum doesn't match, a warning is logged
    /// but the data is still returned.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::Serialization`] if JSON decoding fails, or
    /// [`EchoError::Database`] on SQLite failures.
    pub fn load_slot(&self, slot: &str) -> Result<Option<EngineSnapshot>> {
        let start = Instant::now();

        let mut stmt = self
            .conn
            .prepare_cached("SELECT data, checksum FROM save_slots WHERE slot = ?1")?;

        let result: Option<(Vec<u8>, Option<String>)> = stmt
            .query_row(params![slot], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        let Some((data, stored_checksum)) = result else {
            return Ok(None);
        };

        if self.config.checksum_enabled {
            if let Some(ref expected) = stored_checksum {
                let actual = crc32_hex(&data);
                if *expected != actual {
                    warn!(
                        slot,
                        expected = %expected,
                        actual = %actual,
                        "Checksum mismatch — possible save corruption"
                    );
                }
            }
        }

        let snapshot: EngineSnapshot =
            serde_json::from_slice(&data).map_err(|e| EchoError::Serialization(e.to_string()))?;

        debug!(
            slot,
            turn = snapshot.turn,
            elapsed_us = start.elapsed().as_micros(),
            "Loaded snapshot"
        );

        Ok(Some(snapshot))
    }

    /// Delete a save slot.
    ///
    /// Returns `true` if a row was actually deleted.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::Database`] on SQLite failures.
    pub fn delete_slot(&self, slot: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM save_slots WHERE slot = ?1", params![slot])?;
        Ok(deleted > 0)
    }

    /// List all slot names with a saved snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::Database`] on SQLite failures.
    pub fn list_slots(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT slot FROM save_slots ORDER BY slot")?;

        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut slots = Vec::new();
        for row in rows {
            slots.push(row?);
        }
        Ok(slots)
    }

    /// Return the total number of save slots.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::Database`] on SQLite failures.
    pub fn slot_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM save_slots", [], |row| row.get(0))?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Backup
    // ------------------------------------------------------------------

    /// Create a backup of the database to `dest_path` using SQLite's
    /// online-backup API. Safe to call while the database is in use.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::Database`] on SQLite failures, or
    /// [`EchoError::Io`] if the destination is not writable.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dest)?;

        // Step through 256 pages at a time, sleeping 50ms between steps.
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;

        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Database backup completed"
        );
        Ok(())
    }

    /// Create a numbered backup alongside the database file, rotating old
    /// backups so that at most `config.backup_count` are kept.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::Database`] or [`EchoError::Io`] on failure.
    pub fn create_rotating_backup(&self) -> Result<()> {
        if self.db_path.as_os_str() == ":memory:" {
            return Ok(());
        }

        let max = self.config.backup_count;
        if max == 0 {
            return Ok(());
        }

        // Rotate existing backups (highest first so we don't overwrite).
        for i in (1..max).rev() {
            let src = self.backup_path(i);
            let dst = self.backup_path(i + 1);
            if src.exists() {
                std::fs::rename(&src, &dst)?;
            }
        }

        let oldest = self.backup_path(max + 1);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }

        let dest = self.backup_path(1);
        self.backup(&dest)?;

        info!(max_backups = max, "Rotating backup created");

        Ok(())
    }

    /// Path to a numbered backup file (e.g. `playthrough.db.bak.1`).
    fn backup_path(&self, n: u32) -> PathBuf {
        let mut p = self.db_path.clone();
        let ext = format!(
            "{}.bak.{n}",
            p.extension()
                .map_or(String::new(), |e| e.to_string_lossy().into_owned())
        );
        p.set_extension(ext);
        p
    }

    // ------------------------------------------------------------------
    // Utility
    // ------------------------------------------------------------------

    /// Return the path to the database file (or `:memory:` for in-memory DBs).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run an integrity check on the database.
    ///
    /// Returns `Ok(true)` if the database passes the check, `Ok(false)` if
    /// corruption is detected.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::Database`] if the check query itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    /// Reclaim unused space by running `VACUUM`.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::Database`] on SQLite failures.
    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM;")?;
        Ok(())
    }
}

/// Extension trait that adds an `.optional()` combinator to `rusqlite::Result`.
///
/// Converts `Err(QueryReturnedNoRows)` into `Ok(None)`.
trait OptionalExt<T> {
    /// Convert `QueryReturnedNoRows` into `Ok(None)`.
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::NarrativeEngine;
    use crate::types::{EntityId, LocationId};

    fn test_config() -> PersistenceConfig {
        PersistenceConfig {
            checksum_enabled: true,
            ..PersistenceConfig::default()
        }
    }

    fn sample_snapshot() -> EngineSnapshot {
        let mut engine =
            NarrativeEngine::new(EngineConfig::default(), LocationId::new("hollowbrook"));
        engine
            .promise(EntityId::new("mirren"), 10, 5)
            .expect("promise");
        engine
            .record_trust(&EntityId::echo(), 1.5, "kept-word")
            .expect("record");
        engine.set_flag("grove_intact", true);
        engine.advance_turn(3).expect("advance");
        engine.snapshot()
    }

    #[test]
    fn round_trip_save_load() {
        let store = SaveStore::open_in_memory(&test_config()).expect("open");
        let snapshot = sample_snapshot();

        store.save_slot("autosave", &snapshot).expect("save");
        let loaded = store.load_slot("autosave").expect("load").expect("Some");

        assert_eq!(loaded.turn, snapshot.turn);
        assert!(
            (loaded.ledger.value_of(&EntityId::echo())
                - snapshot.ledger.value_of(&EntityId::echo()))
            .abs()
                < f64::EPSILON
        );
        assert!(loaded.flags.is_set("grove_intact"));
    }

    #[test]
    fn load_nonexistent_returns_none() {
        let store = SaveStore::open_in_memory(&test_config()).expect("open");
        assert!(store.load_slot("missing").expect("load").is_none());
    }

    #[test]
    fn upsert_overwrites() {
        let store = SaveStore::open_in_memory(&test_config()).expect("open");

        let mut engine =
            NarrativeEngine::new(EngineConfig::default(), LocationId::new("hollowbrook"));
        store.save_slot("slot1", &engine.snapshot()).expect("save1");

        engine.advance_turn(7).expect("advance");
        store.save_slot("slot1", &engine.snapshot()).expect("save2");

        let loaded = store.load_slot("slot1").expect("load").expect("Some");
        assert_eq!(loaded.turn, 7, "Should reflect the second save");
    }

    #[test]
    fn delete_slot_works() {
        let store = SaveStore::open_in_memory(&test_config()).expect("open");
        store
            .save_slot("autosave", &sample_snapshot())
            .expect("save");
        assert!(store.delete_slot("autosave").expect("delete"));
        assert!(!store.delete_slot("autosave").expect("delete again"));
        assert!(store.load_slot("autosave").expect("load").is_none());
    }

    #[test]
    fn list_slots_and_count() {
        let store = SaveStore::open_in_memory(&test_config()).expect("open");
        let snapshot = sample_snapshot();

        store.save_slot("autosave", &snapshot).expect("save");
        store.save_slot("chapter-2", &snapshot).expect("save");
        store.save_slot("manual", &snapshot).expect("save");

        let slots = store.list_slots().expect("list");
        assert_eq!(slots, vec!["autosave", "chapter-2", "manual"]);
        assert_eq!(store.slot_count().expect("count"), 3);
    }

    #[test]
    fn integrity_check_passes() {
        let store = SaveStore::open_in_memory(&test_config()).expect("open");
        assert!(store.integrity_check().expect("check"));
    }

    #[test]
    fn checksum_detection() {
        // Save with checksums, then manually corrupt and reload to verify
        // the warning path. We can't easily assert on tracing output, so we
        // just ensure the load still succeeds (warnings are logged).
        let store = SaveStore::open_in_memory(&test_config()).expect("open");
        store
            .save_slot("autosave", &sample_snapshot())
            .expect("save");

        store
            .conn
            .execute(
                "UPDATE save_slots SET checksum = 'deadbeef' WHERE slot = ?1",
                params!["autosave"],
            )
            .expect("corrupt checksum");

        let loaded = store.load_slot("autosave").expect("load").expect("Some");
        assert_eq!(loaded.turn, sample_snapshot().turn);
    }

    #[test]
    fn file_based_open_and_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("playthrough.db");
        let config = test_config();

        let store = SaveStore::open(&db_path, &config).expect("open");
        store
            .save_slot("autosave", &sample_snapshot())
            .expect("save");

        let backup_path = dir.path().join("playthrough_backup.db");
        store.backup(&backup_path).expect("backup");

        let backup_store = SaveStore::open(&backup_path, &config).expect("open backup");
        let loaded = backup_store
            .load_slot("autosave")
            .expect("load from backup")
            .expect("Some");
        assert_eq!(loaded.turn, 3);
    }

    #[test]
    fn rotating_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("playthrough.db");
        let mut config = test_config();
        config.backup_count = 2;

        let store = SaveStore::open(&db_path, &config).expect("open");
        store
            .save_slot("autosave", &sample_snapshot())
            .expect("save");

        // Create 3 backups, should keep at most 2.
        store.create_rotating_backup().expect("backup 1");
        store.create_rotating_backup().expect("backup 2");
        store.create_rotating_backup().expect("backup 3");

        assert!(dir.path().join("playthrough.db.bak.1").exists());
        assert!(dir.path().join("playthrough.db.bak.2").exists());
        assert!(!dir.path().join("playthrough.db.bak.3").exists());
    }

    #[test]
    fn crc32_basic() {
        // Known test vector: CRC-32 of "123456789" = 0xCBF43926
        let crc = crc32_compute(b"123456789");
        assert_eq!(crc, 0xCBF4_3926);
    }
}
