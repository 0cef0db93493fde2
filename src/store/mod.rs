//! File-backed document store shared by every scraping task.
//!
//! Records are grouped into collections. Keyed collections hold an object of
//! `key → document` in `<name>.json` and support UPSERT. Append collections
//! only ever grow, so they are split by capture day into
//! `<name>-<YYYY-MM-DD>.json` arrays and a write only rewrites today's file.
//!
//! Every mutation runs under one short-held lock:
//! ```text
//!  modify in-memory copy ─▶ serialize ─▶ <file>.json.tmp
//!                                         │ copy old file → <file>.json.bak
//!                                         ▼
//!                              rename tmp → <file>.json
//! ```
//! so a reader (or a restart after a crash) only ever sees a fully written
//! file. The in-memory copy is kept even when the disk write fails, and the
//! next successful write of that file carries it to disk.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;

pub mod models;

/// Named groups of records, each persisted to its own file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Matches,
    Live,
    Results,
    Odds,
    Goals,
    Standings,
    TimerReadings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Keyed,
    Append,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::Matches,
        Collection::Live,
        Collection::Results,
        Collection::Odds,
        Collection::Goals,
        Collection::Standings,
        Collection::TimerReadings,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Matches => "matches",
            Collection::Live => "live",
            Collection::Results => "results",
            Collection::Odds => "odds",
            Collection::Goals => "goals",
            Collection::Standings => "standings",
            Collection::TimerReadings => "timer_readings",
        }
    }

    pub fn mode(self) -> Mode {
        match self {
            Collection::Matches | Collection::Live | Collection::Results => Mode::Keyed,
            _ => Mode::Append,
        }
    }

    /// File holding the collection, or one day of it for append collections.
    fn file_name(self, day: Option<&str>) -> String {
        match day {
            Some(day) => format!("{}-{}.json", self.name(), day),
            None => format!("{}.json", self.name()),
        }
    }
}

/// Partition key for append writes made at `at`.
pub fn capture_day(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

enum Docs {
    Keyed(Map<String, Value>),
    /// Records by capture day, oldest first
    Append(BTreeMap<String, Vec<Value>>),
}

impl Docs {
    fn len(&self) -> usize {
        match self {
            Docs::Keyed(m) => m.len(),
            Docs::Append(days) => days.values().map(Vec::len).sum(),
        }
    }

    /// Contents of one file: the whole map, or one day's records.
    fn part(&self, day: Option<&str>) -> Value {
        match (self, day) {
            (Docs::Keyed(m), _) => Value::Object(m.clone()),
            (Docs::Append(days), Some(day)) => {
                Value::Array(days.get(day).cloned().unwrap_or_default())
            }
            (Docs::Append(_), None) => Value::Array(Vec::new()),
        }
    }

    fn days(&self) -> Vec<Option<String>> {
        match self {
            Docs::Keyed(_) => vec![None],
            Docs::Append(days) => days.keys().cloned().map(Some).collect(),
        }
    }
}

/// One file of one collection.
type Part = (Collection, Option<String>);

struct StoreInner {
    dir: PathBuf,
    collections: BTreeMap<Collection, Docs>,
    /// Files whose in-memory state is ahead of disk
    dirty: BTreeSet<Part>,
    write_failures: u64,
}

/// Thread-safe handle to the store (cheap to clone).
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<StoreInner>>,
}

/// Record counts per collection plus failure bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub counts: BTreeMap<String, usize>,
    pub write_failures: u64,
    pub dirty_collections: Vec<String>,
}

impl Store {
    /// Open (or create) the store rooted at `dir`, loading every collection.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let mut collections = BTreeMap::new();
        for c in Collection::ALL {
            let docs = load_collection(&dir, c);
            debug!("Loaded {} {} record(s)", docs.len(), c.name());
            collections.insert(c, docs);
        }

        Ok(Store {
            inner: Arc::new(Mutex::new(StoreInner {
                dir,
                collections,
                dirty: BTreeSet::new(),
                write_failures: 0,
            })),
        })
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    /// Insert `record` under `key`, or merge it into the existing document.
    /// Fields absent from `record` (or null in it) keep their stored value.
    pub fn upsert<T: Serialize>(
        &self,
        collection: Collection,
        key: &str,
        record: &T,
    ) -> Result<(), StoreError> {
        let patch = serde_json::to_value(record)?;
        let mut inner = self.inner.lock();
        match inner.collections.get_mut(&collection) {
            Some(Docs::Keyed(map)) => match map.get_mut(key) {
                Some(existing) => merge(existing, patch),
                None => {
                    map.insert(key.to_string(), strip_nulls(patch));
                }
            },
            _ => {
                return Err(StoreError::WrongMode {
                    collection: collection.name(),
                    operation: "upsert",
                })
            }
        }
        inner.persist((collection, None))
    }

    /// Strictly additive write to an append-only collection.
    pub fn append<T: Serialize>(&self, collection: Collection, record: &T) -> Result<(), StoreError> {
        self.append_on(collection, record, &capture_day(Utc::now()))
    }

    fn append_on<T: Serialize>(
        &self,
        collection: Collection,
        record: &T,
        day: &str,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)?;
        let mut inner = self.inner.lock();
        match inner.collections.get_mut(&collection) {
            Some(Docs::Append(days)) => days.entry(day.to_string()).or_default().push(value),
            _ => {
                return Err(StoreError::WrongMode {
                    collection: collection.name(),
                    operation: "append",
                })
            }
        }
        inner.persist((collection, Some(day.to_string())))
    }

    /// Rewrite every file whose last write failed.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let pending: Vec<Part> = inner.dirty.iter().cloned().collect();
        for part in pending {
            inner.persist(part)?;
        }
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn get(&self, collection: Collection, key: &str) -> Option<Value> {
        let inner = self.inner.lock();
        match inner.collections.get(&collection) {
            Some(Docs::Keyed(map)) => map.get(key).cloned(),
            _ => None,
        }
    }

    pub fn get_as<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> Option<T> {
        let value = self.get(collection, key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Stored {} record {} has unexpected shape: {}", collection.name(), key, e);
                None
            }
        }
    }

    /// All records of an append collection (or all documents of a keyed one).
    pub fn list(&self, collection: Collection) -> Vec<Value> {
        let inner = self.inner.lock();
        match inner.collections.get(&collection) {
            Some(Docs::Keyed(map)) => map.values().cloned().collect(),
            Some(Docs::Append(days)) => days.values().flatten().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn list_as<T: DeserializeOwned>(&self, collection: Collection) -> Vec<T> {
        self.list(collection)
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            counts: inner
                .collections
                .iter()
                .map(|(c, docs)| (c.name().to_string(), docs.len()))
                .collect(),
            write_failures: inner.write_failures,
            dirty_collections: inner
                .dirty
                .iter()
                .map(|(c, _)| c.name())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    // ── Backups ───────────────────────────────────────────────────────────────

    /// Copy every collection file (every day of append collections) into
    /// `backups/<timestamp>/`.
    pub fn backup(&self) -> Result<PathBuf, StoreError> {
        let inner = self.inner.lock();
        let root = inner.dir.join("backups");
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let mut target = root.join(&stamp);
        let mut n = 1;
        while target.exists() {
            target = root.join(format!("{}_{}", stamp, n));
            n += 1;
        }
        fs::create_dir_all(&target).map_err(|e| StoreError::io(&target, e))?;

        let mut copied = 0;
        for (c, docs) in &inner.collections {
            for day in docs.days() {
                let name = c.file_name(day.as_deref());
                let src = inner.dir.join(&name);
                if src.exists() {
                    let dst = target.join(&name);
                    fs::copy(&src, &dst).map_err(|e| StoreError::io(&dst, e))?;
                    copied += 1;
                }
            }
        }
        info!("Backup created: {} ({} file(s))", target.display(), copied);
        Ok(target)
    }
}

impl StoreInner {
    fn persist(&mut self, part: Part) -> Result<(), StoreError> {
        let (collection, day) = &part;
        let Some(docs) = self.collections.get(collection) else {
            return Ok(());
        };
        let name = collection.file_name(day.as_deref());
        let path = self.dir.join(&name);
        let result = serde_json::to_vec_pretty(&docs.part(day.as_deref()))
            .map_err(StoreError::from)
            .and_then(|bytes| write_atomic(&path, &bytes));

        match result {
            Ok(()) => {
                self.dirty.remove(&part);
                Ok(())
            }
            Err(e) => {
                self.write_failures += 1;
                error!("🛑 Store write failed for {} (kept in memory): {}", name, e);
                self.dirty.insert(part);
                Err(e)
            }
        }
    }
}

// ── File helpers ───────────────────────────────────────────────────────────────

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Write to a temp file, keep a copy of the previous version, then rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = sibling(path, ".tmp");
    {
        let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
        file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    }
    if path.exists() {
        let bak = sibling(path, ".bak");
        fs::copy(path, &bak).map_err(|e| StoreError::io(&bak, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

fn read_value(path: &Path, mode: Mode) -> Option<Value> {
    let text = fs::read_to_string(path).ok()?;
    let value: Value = serde_json::from_str(&text).ok()?;
    match (mode, &value) {
        (Mode::Keyed, Value::Object(_)) | (Mode::Append, Value::Array(_)) => Some(value),
        _ => None,
    }
}

/// Load the last fully written version of one file.
fn load_file(path: &Path, mode: Mode) -> Option<Value> {
    let tmp = sibling(path, ".tmp");
    if tmp.exists() {
        warn!("Discarding interrupted write {}", tmp.display());
        if let Err(e) = fs::remove_file(&tmp) {
            warn!("Could not remove {}: {}", tmp.display(), e);
        }
    }

    if let Some(value) = read_value(path, mode) {
        return Some(value);
    }
    if path.exists() {
        warn!("{} is unreadable, trying backup copy", path.display());
    }
    let bak = sibling(path, ".bak");
    let value = read_value(&bak, mode)?;
    info!("Recovered {} from {}", path.display(), bak.display());
    Some(value)
}

/// Days for which `collection` has a file, a backup copy or a stray temp file.
fn partition_days(dir: &Path, collection: Collection) -> BTreeSet<String> {
    let prefix = format!("{}-", collection.name());
    let Ok(entries) = fs::read_dir(dir) else {
        return BTreeSet::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter_map(|name| {
            let rest = name.strip_prefix(&prefix)?;
            let day = [".json.tmp", ".json.bak", ".json"]
                .iter()
                .find_map(|suffix| rest.strip_suffix(*suffix))?;
            NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
            Some(day.to_string())
        })
        .collect()
}

fn load_collection(dir: &Path, collection: Collection) -> Docs {
    match collection.mode() {
        Mode::Keyed => match load_file(&dir.join(collection.file_name(None)), Mode::Keyed) {
            Some(Value::Object(map)) => Docs::Keyed(map),
            _ => Docs::Keyed(Map::new()),
        },
        Mode::Append => {
            let mut days = BTreeMap::new();
            for day in partition_days(dir, collection) {
                let path = dir.join(collection.file_name(Some(&day)));
                if let Some(Value::Array(records)) = load_file(&path, Mode::Append) {
                    days.insert(day, records);
                }
            }
            Docs::Append(days)
        }
    }
}

// ── Merge ──────────────────────────────────────────────────────────────────────

/// Deep-merge `patch` into `target`: objects merge key by key, anything else
/// replaces, and nulls in the patch are ignored.
fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(dst), Value::Object(src)) => {
            for (k, v) in src {
                if v.is_null() {
                    continue;
                }
                match dst.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        dst.insert(k, strip_nulls(v));
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (dst, src) => *dst = src,
    }
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DAY: &str = "2026-10-17";

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_upsert_inserts_then_merges() {
        let (_dir, store) = open_temp();
        store
            .upsert(Collection::Matches, "m1", &json!({"home_team": "Red FC", "state": "MATCHDAY"}))
            .unwrap();
        store
            .upsert(Collection::Matches, "m1", &json!({"state": "PRE_LIVE", "away_team": "Blue FC"}))
            .unwrap();

        let doc = store.get(Collection::Matches, "m1").unwrap();
        assert_eq!(doc["home_team"], "Red FC");
        assert_eq!(doc["away_team"], "Blue FC");
        assert_eq!(doc["state"], "PRE_LIVE");
    }

    #[test]
    fn test_upsert_ignores_null_fields() {
        let (_dir, store) = open_temp();
        store
            .upsert(Collection::Matches, "m1", &json!({"home_team": "Red FC"}))
            .unwrap();
        store
            .upsert(Collection::Matches, "m1", &json!({"home_team": null, "state": "LIVE"}))
            .unwrap();
        let doc = store.get(Collection::Matches, "m1").unwrap();
        assert_eq!(doc["home_team"], "Red FC");
    }

    #[test]
    fn test_append_is_additive() {
        let (_dir, store) = open_temp();
        let goal = json!({"match_id": "m1", "team": "home", "minute": "23"});
        store.append(Collection::Goals, &goal).unwrap();
        store.append(Collection::Goals, &goal).unwrap();
        assert_eq!(store.list(Collection::Goals).len(), 2);
        assert_eq!(store.stats().counts["goals"], 2);
    }

    #[test]
    fn test_wrong_mode_is_rejected() {
        let (_dir, store) = open_temp();
        assert!(matches!(
            store.append(Collection::Matches, &json!({})),
            Err(StoreError::WrongMode { .. })
        ));
        assert!(matches!(
            store.upsert(Collection::Goals, "k", &json!({})),
            Err(StoreError::WrongMode { .. })
        ));
    }

    #[test]
    fn test_reopen_loads_persisted_records() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path()).unwrap();
            store
                .upsert(Collection::Results, "m1", &json!({"home_score": 2}))
                .unwrap();
            store
                .append(Collection::Standings, &json!({"league": "english"}))
                .unwrap();
        }
        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.get(Collection::Results, "m1").unwrap()["home_score"], 2);
        assert_eq!(store.list(Collection::Standings).len(), 1);
    }

    #[test]
    fn test_interrupted_write_keeps_last_good_version() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path()).unwrap();
            store
                .upsert(Collection::Matches, "m1", &json!({"state": "LIVE"}))
                .unwrap();
        }
        // Crash after the temp file was written but before the rename.
        fs::write(dir.path().join("matches.json.tmp"), b"{\"m1\": {\"state\": \"FIN").unwrap();

        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.get(Collection::Matches, "m1").unwrap()["state"], "LIVE");
        assert!(!dir.path().join("matches.json.tmp").exists());
    }

    #[test]
    fn test_missing_target_recovers_from_backup_copy() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path()).unwrap();
            store
                .upsert(Collection::Matches, "m1", &json!({"state": "MATCHDAY"}))
                .unwrap();
            store
                .upsert(Collection::Matches, "m1", &json!({"state": "PRE_LIVE"}))
                .unwrap();
        }
        // Target lost between the backup copy and the rename.
        fs::remove_file(dir.path().join("matches.json")).unwrap();
        fs::write(dir.path().join("matches.json.tmp"), b"garbage").unwrap();

        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.get(Collection::Matches, "m1").unwrap()["state"], "MATCHDAY");
    }

    #[test]
    fn test_corrupt_target_recovers_from_backup_copy() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path()).unwrap();
            store.append_on(Collection::Odds, &json!({"n": 1}), DAY).unwrap();
            store.append_on(Collection::Odds, &json!({"n": 2}), DAY).unwrap();
        }
        fs::write(dir.path().join("odds-2026-10-17.json"), b"[{\"n\": 1}, {\"n\"").unwrap();
        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.list(Collection::Odds).len(), 1);
    }

    #[test]
    fn test_append_writes_only_the_capture_day_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path()).unwrap();
            store.append_on(Collection::Odds, &json!({"n": 1}), "2026-10-16").unwrap();
            store.append_on(Collection::Odds, &json!({"n": 2}), "2026-10-16").unwrap();
            store.append_on(Collection::Odds, &json!({"n": 3}), DAY).unwrap();
            assert_eq!(store.stats().counts["odds"], 3);
        }

        let read = |name: &str| -> Value {
            serde_json::from_str(&fs::read_to_string(dir.path().join(name)).unwrap()).unwrap()
        };
        assert_eq!(read("odds-2026-10-16.json"), json!([{"n": 1}, {"n": 2}]));
        assert_eq!(read("odds-2026-10-17.json"), json!([{"n": 3}]));
        // Today's first write had no previous version to keep.
        assert!(!dir.path().join("odds-2026-10-17.json.bak").exists());
        assert!(!dir.path().join("odds.json").exists());

        let store = Store::open(dir.path()).unwrap();
        let ns: Vec<i64> = store
            .list(Collection::Odds)
            .iter()
            .map(|v| v["n"].as_i64().unwrap())
            .collect();
        assert_eq!(ns, vec![1, 2, 3]);
    }

    #[test]
    fn test_stray_files_are_not_partitions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("odds-latest.json"), b"[{\"n\": 9}]").unwrap();
        fs::write(dir.path().join("goals-2026-10-17.json"), b"[{\"minute\": \"3\"}]").unwrap();
        let store = Store::open(dir.path()).unwrap();
        assert!(store.list(Collection::Odds).is_empty());
        assert_eq!(store.list(Collection::Goals).len(), 1);
    }

    #[test]
    fn test_failed_write_is_retained_and_flushed_later() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let store = Store::open(&data).unwrap();

        // Replace the data directory with a plain file so writes fail.
        fs::remove_dir_all(&data).unwrap();
        fs::write(&data, b"not a directory").unwrap();

        let res = store.upsert(Collection::Matches, "m1", &json!({"state": "LIVE"}));
        assert!(res.is_err());
        assert_eq!(store.stats().write_failures, 1);
        assert_eq!(store.stats().dirty_collections, vec!["matches".to_string()]);
        assert_eq!(store.get(Collection::Matches, "m1").unwrap()["state"], "LIVE");

        fs::remove_file(&data).unwrap();
        fs::create_dir_all(&data).unwrap();
        store.flush().unwrap();
        assert!(store.stats().dirty_collections.is_empty());

        let reopened = Store::open(&data).unwrap();
        assert_eq!(reopened.get(Collection::Matches, "m1").unwrap()["state"], "LIVE");
    }

    #[test]
    fn test_backup_copies_collection_files() {
        let (dir, store) = open_temp();
        store.append_on(Collection::Goals, &json!({"minute": "12"}), DAY).unwrap();
        store.append_on(Collection::Goals, &json!({"minute": "3"}), "2026-10-16").unwrap();
        store
            .upsert(Collection::Matches, "m1", &json!({"state": "LIVE"}))
            .unwrap();

        let first = store.backup().unwrap();
        let second = store.backup().unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with(dir.path().join("backups")));
        assert!(first.join("goals-2026-10-17.json").exists());
        assert!(first.join("goals-2026-10-16.json").exists());
        assert!(first.join("matches.json").exists());
        assert!(!first.join("results.json").exists());
    }

    #[test]
    fn test_typed_round_trip_through_get_as() {
        use super::models::{MatchRecord, MatchState};
        let (_dir, store) = open_temp();
        let mut rec = MatchRecord::new("english_0_0130", "english", 0);
        rec.advance(MatchState::Matchday);
        store.upsert(Collection::Matches, &rec.match_id, &rec).unwrap();
        let back: MatchRecord = store.get_as(Collection::Matches, &rec.match_id).unwrap();
        assert_eq!(back.state, MatchState::Matchday);
        assert_eq!(back.home_team, None);
    }
}
