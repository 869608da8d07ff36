//! On-disk property store.
//!
//! The file is one JSON document, `{"version": 2, "records": {key: record}}`.
//! Older stores used parallel arrays keyed by a shared `unique_ids` list; those
//! are upgraded and rewritten on first load. Saves go through a temporary
//! sibling that is verified before it replaces the live file, with the previous
//! file parked at `<path>.backup` until the swap completes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use astrocache_domain::{merge_records, PropertyRecord};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::StoreGuard;
use crate::fsutil::{emergency_copy, read_json, sibling, write_temp_json};

pub const STORE_FORMAT_VERSION: u32 = 2;

pub type Records = BTreeMap<String, PropertyRecord>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(
        "[AC300] refusing destructive write to {}: {incoming} records would replace {existing}; existing store copied to {}",
        path.display(),
        emergency.display()
    )]
    DestructiveWrite {
        path: PathBuf,
        existing: usize,
        incoming: usize,
        emergency: PathBuf,
    },
    #[error("[AC301] staged property store for {} did not round-trip", path.display())]
    VerificationFailed { path: PathBuf },
    #[error("[AC302] property store {} uses unsupported format version {found}", path.display())]
    UnsupportedVersion { path: PathBuf, found: u32 },
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    records: Records,
}

#[derive(Debug, Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    records: &'a Records,
}

/// Columnar layout written by earlier releases.
#[derive(Debug, Deserialize)]
struct LegacyStoreFile {
    unique_ids: Vec<String>,
    #[serde(default)]
    star_names: Vec<Option<String>>,
    #[serde(default)]
    spectral_types: Vec<Option<String>>,
    #[serde(default, rename = "V_magnitudes")]
    v_magnitudes: Vec<Option<f64>>,
    #[serde(default, rename = "B_magnitudes")]
    b_magnitudes: Vec<Option<f64>>,
    #[serde(default)]
    object_types: Vec<Option<String>>,
    #[serde(default)]
    is_supplemental: Vec<Option<bool>>,
}

impl LegacyStoreFile {
    fn into_records(self) -> Records {
        fn at<T: Clone>(column: &[Option<T>], idx: usize) -> Option<T> {
            column.get(idx).cloned().flatten()
        }
        let rows = self.unique_ids.iter().enumerate().map(|(idx, key)| {
            let record = PropertyRecord {
                display_name: at(&self.star_names, idx),
                spectral_type: at(&self.spectral_types, idx),
                v_mag: at(&self.v_magnitudes, idx),
                b_mag: at(&self.b_magnitudes, idx),
                object_type: at(&self.object_types, idx),
                supplemental: at(&self.is_supplemental, idx).unwrap_or(false),
                ..PropertyRecord::default()
            };
            (key.clone(), record)
        });
        let mut records = Records::new();
        merge_records(&mut records, rows);
        records
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OnDisk {
    Current(StoreFile),
    Legacy(LegacyStoreFile),
}

struct Decoded {
    records: Records,
    legacy: bool,
}

fn decode(path: &Path) -> Result<Decoded> {
    match read_json::<OnDisk>(path)? {
        OnDisk::Current(file) if file.version > STORE_FORMAT_VERSION => {
            Err(StoreError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: file.version,
            }
            .into())
        }
        OnDisk::Current(file) => Ok(Decoded {
            records: file.records,
            legacy: false,
        }),
        OnDisk::Legacy(file) => Ok(Decoded {
            records: file.into_records(),
            legacy: true,
        }),
    }
}

/// Load the store at `path`.
///
/// Never fails: a corrupt or missing primary falls back to `<path>.backup`,
/// and when neither decodes the result is empty. Legacy layouts and recovered
/// backups are written back in the current layout before returning.
pub fn load_records(path: &Path) -> Records {
    let primary = if path.exists() {
        match decode(path) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{err:#}"), "property store unreadable");
                None
            }
        }
    } else {
        None
    };

    match primary {
        Some(decoded) if decoded.legacy => {
            info!(path = %path.display(), records = decoded.records.len(), "upgrading legacy property store");
            if let Err(err) = save_records(&decoded.records, path, StoreGuard::disabled()) {
                warn!(path = %path.display(), error = %format!("{err:#}"), "failed to rewrite property store");
            }
            decoded.records
        }
        Some(decoded) => decoded.records,
        None => {
            let backup = sibling(path, ".backup");
            if !backup.exists() {
                if path.exists() {
                    warn!(path = %path.display(), "no backup available; starting with an empty property store");
                }
                return Records::new();
            }
            match decode(&backup) {
                Ok(decoded) => {
                    warn!(
                        path = %path.display(),
                        backup = %backup.display(),
                        records = decoded.records.len(),
                        "restoring property store from backup"
                    );
                    if let Err(err) = restore_primary(&decoded.records, path, &backup) {
                        warn!(path = %path.display(), error = %format!("{err:#}"), "failed to restore property store; backup kept");
                    }
                    decoded.records
                }
                Err(err) => {
                    warn!(
                        backup = %backup.display(),
                        error = %format!("{err:#}"),
                        "property store backup unreadable; starting empty"
                    );
                    Records::new()
                }
            }
        }
    }
}

/// Write `records` over an unreadable primary, consuming `backup` only once the primary is in place.
fn restore_primary(records: &Records, path: &Path, backup: &Path) -> Result<()> {
    let staged = stage_verified(records, path)?;
    staged
        .persist(path)
        .with_context(|| format!("replacing {}", path.display()))?;
    fs::remove_file(backup).with_context(|| format!("removing {}", backup.display()))
}

/// Serialize `records` beside `path` and check the staged file decodes to the same records.
fn stage_verified(records: &Records, path: &Path) -> Result<NamedTempFile> {
    let staged = write_temp_json(
        path,
        &StoreFileRef {
            version: STORE_FORMAT_VERSION,
            records,
        },
    )?;
    let verified: StoreFile = read_json(staged.path())?;
    if verified.records != *records {
        return Err(StoreError::VerificationFailed {
            path: path.to_path_buf(),
        }
        .into());
    }
    Ok(staged)
}

/// Park the live file at `backup`, run `install`, and move it back if `install` fails.
fn replace_with_rollback(
    path: &Path,
    backup: &Path,
    install: impl FnOnce() -> Result<()>,
) -> Result<()> {
    let had_previous = path.exists();
    if had_previous {
        fs::rename(path, backup).with_context(|| {
            format!("moving {} to {}", path.display(), backup.display())
        })?;
    }
    if let Err(err) = install() {
        if had_previous {
            if let Err(restore) = fs::rename(backup, path) {
                warn!(path = %path.display(), error = %restore, "failed to restore property store backup");
            }
        }
        return Err(err);
    }
    if had_previous {
        if let Err(err) = fs::remove_file(backup) {
            warn!(backup = %backup.display(), %err, "failed to remove property store backup");
        }
    }
    Ok(())
}

/// Count of records currently on disk, or zero when the file is absent or unreadable.
fn existing_count(path: &Path) -> usize {
    if !path.exists() {
        return 0;
    }
    decode(path).map_or(0, |decoded| decoded.records.len())
}

/// Atomically replace the store at `path` with `records`.
///
/// # Errors
/// Returns [`StoreError::DestructiveWrite`] (after copying the current file to an
/// emergency backup) when `guard` refuses the shrink, and any I/O failure from the
/// write sequence. The previous file is restored from `.backup` on failure.
pub fn save_records(records: &Records, path: &Path, guard: StoreGuard) -> Result<()> {
    let existing = existing_count(path);
    if guard.refuses(existing, records.len()) {
        let emergency = emergency_copy(path, OffsetDateTime::now_utc())?;
        warn!(
            path = %path.display(),
            existing,
            incoming = records.len(),
            emergency = %emergency.display(),
            "refusing destructive property store write"
        );
        return Err(StoreError::DestructiveWrite {
            path: path.to_path_buf(),
            existing,
            incoming: records.len(),
            emergency,
        }
        .into());
    }

    let staged = stage_verified(records, path)?;
    replace_with_rollback(path, &sibling(path, ".backup"), || {
        staged
            .persist(path)
            .map(drop)
            .map_err(|err| err.error)
            .with_context(|| format!("replacing {}", path.display()))
    })?;
    debug!(path = %path.display(), records = records.len(), "property store saved");
    Ok(())
}

/// Property records for one query mode, owned by the caller and backed by one file.
#[derive(Debug)]
pub struct PropertyStore {
    path: PathBuf,
    records: Records,
    guard: StoreGuard,
}

impl PropertyStore {
    /// Load the store at `path`, recovering from backups where needed.
    pub fn open(path: impl Into<PathBuf>, guard: StoreGuard) -> Self {
        let path = path.into();
        let records = load_records(&path);
        debug!(path = %path.display(), records = records.len(), "property store opened");
        Self {
            path,
            records,
            guard,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A copy of the record stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<PropertyRecord> {
        self.records.get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// A copy of every record.
    #[must_use]
    pub fn snapshot(&self) -> Records {
        self.records.clone()
    }

    /// Merge records by key. Returns how many keys were new.
    pub fn merge<I>(&mut self, incoming: I) -> usize
    where
        I: IntoIterator<Item = (String, PropertyRecord)>,
    {
        merge_records(&mut self.records, incoming)
    }

    /// Mark `key` as attempted. Existing records are left alone.
    pub fn insert_placeholder(&mut self, key: &str, at: OffsetDateTime) -> bool {
        if self.records.contains_key(key) {
            return false;
        }
        self.records
            .insert(key.to_string(), PropertyRecord::placeholder(key, at));
        true
    }

    /// # Errors
    /// See [`save_records`].
    pub fn save(&self) -> Result<()> {
        save_records(&self.records, &self.path, self.guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record(v_mag: f64) -> PropertyRecord {
        PropertyRecord {
            display_name: Some(format!("star {v_mag}")),
            spectral_type: Some("K0III".into()),
            v_mag: Some(v_mag),
            b_mag: Some(v_mag + 1.1),
            fetched_at: Some(datetime!(2024-06-01 0:00 UTC)),
            ..PropertyRecord::default()
        }
    }

    fn records(count: usize) -> Records {
        (0..count)
            .map(|idx| {
                #[allow(clippy::cast_precision_loss)]
                let mag = 0.1 * idx as f64 + 0.123_456_789;
                (format!("HIP {idx}"), record(mag))
            })
            .collect()
    }

    #[test]
    fn save_then_load_round_trips() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("star_properties_distance.json");
        let original = records(25);
        save_records(&original, &path, StoreGuard::default())?;
        assert_eq!(load_records(&path), original);
        assert!(!sibling(&path, ".backup").exists());

        // a second save rotates through the backup and cleans it up
        let mut updated = original.clone();
        updated.insert("HIP 999".into(), record(3.3));
        save_records(&updated, &path, StoreGuard::default())?;
        assert_eq!(load_records(&path), updated);
        assert!(!sibling(&path, ".backup").exists());
        Ok(())
    }

    #[test]
    fn destructive_write_is_refused_and_file_untouched() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("store.json");
        save_records(&records(150), &path, StoreGuard::default())?;
        let before = fs::read(&path)?;

        let err = save_records(&records(5), &path, StoreGuard::default()).unwrap_err();
        let store_err = err.downcast_ref::<StoreError>().expect("typed store error");
        assert!(matches!(
            store_err,
            StoreError::DestructiveWrite {
                existing: 150,
                incoming: 5,
                ..
            }
        ));
        assert!(err.to_string().starts_with("[AC300]"));
        assert_eq!(fs::read(&path)?, before);

        let emergency: Vec<_> = fs::read_dir(tmp.path())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("store.json.emergency-")
            })
            .collect();
        assert_eq!(emergency.len(), 1);
        assert_eq!(fs::read(emergency[0].path())?, before);
        Ok(())
    }

    #[test]
    fn small_stores_may_shrink() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("store.json");
        save_records(&records(100), &path, StoreGuard::default())?;
        save_records(&Records::new(), &path, StoreGuard::default())?;
        assert!(load_records(&path).is_empty());
        Ok(())
    }

    #[test]
    fn corrupt_primary_falls_back_to_backup() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("store.json");
        let backup = sibling(&path, ".backup");
        let original = records(3);
        save_records(&original, &path, StoreGuard::default())?;
        fs::rename(&path, &backup)?;
        fs::write(&path, b"{\"version\": 2, \"records\": {\"HIP")?;

        assert_eq!(load_records(&path), original);
        // the primary is repaired and the backup consumed
        assert_eq!(decode(&path)?.records, original);
        assert!(!backup.exists());
        Ok(())
    }

    #[test]
    fn missing_primary_recovers_from_backup() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("store.json");
        let original = records(2);
        save_records(&original, &path, StoreGuard::default())?;
        fs::rename(&path, sibling(&path, ".backup"))?;
        assert_eq!(load_records(&path), original);
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn unreadable_store_without_backup_is_empty() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("store.json");
        fs::write(&path, b"not json")?;
        assert!(load_records(&path).is_empty());
        assert!(load_records(&tmp.path().join("absent.json")).is_empty());
        Ok(())
    }

    #[test]
    fn legacy_columnar_layout_is_upgraded_on_load() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("store.json");
        let legacy = serde_json::json!({
            "unique_ids": ["HIP 32349", "HIP 91262", "M31"],
            "star_names": ["* alf CMa", "* alf Lyr", "M 31"],
            "spectral_types": ["A1V", "A0Va", null],
            "V_magnitudes": [-1.46, 0.03, 3.44],
            "B_magnitudes": [-1.46, 0.03],
            "object_types": ["SB*", "dS*", "G"],
            "is_supplemental": [false, false, true]
        });
        fs::write(&path, serde_json::to_vec(&legacy)?)?;

        let loaded = load_records(&path);
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded["HIP 91262"].spectral_type.as_deref(), Some("A0Va"));
        assert_eq!(loaded["M31"].b_mag, None);
        assert!(loaded["M31"].supplemental);

        let on_disk: serde_json::Value = serde_json::from_slice(&fs::read(&path)?)?;
        assert_eq!(on_disk["version"], STORE_FORMAT_VERSION);
        assert_eq!(load_records(&path), loaded);
        Ok(())
    }

    #[test]
    fn newer_format_versions_are_not_trusted() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("store.json");
        fs::write(&path, br#"{"version": 9, "records": {}}"#)?;
        let err = decode(&path).err().expect("future version rejected");
        assert!(err.to_string().starts_with("[AC302]"));
        Ok(())
    }

    #[test]
    fn store_hands_out_copies_and_merges_additively() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut store = PropertyStore::open(tmp.path().join("store.json"), StoreGuard::default());
        assert!(store.is_empty());
        assert_eq!(store.merge([("HIP 1".to_string(), record(4.0))]), 1);

        let mut copy = store.get("HIP 1").expect("present");
        copy.v_mag = None;
        assert_eq!(store.get("HIP 1").and_then(|r| r.v_mag), Some(4.0));

        let at = datetime!(2024-07-01 0:00 UTC);
        assert!(!store.insert_placeholder("HIP 1", at));
        assert!(store.insert_placeholder("HIP 2", at));
        assert_eq!(store.keys().collect::<Vec<_>>(), vec!["HIP 1", "HIP 2"]);

        store.save()?;
        let reopened = PropertyStore::open(store.path(), StoreGuard::default());
        assert_eq!(reopened.snapshot(), store.snapshot());
        assert!(reopened.contains("HIP 2"));
        Ok(())
    }

    fn file_names(dir: &Path) -> Result<Vec<String>> {
        let mut names = fs::read_dir(dir)?
            .map(|entry| -> Result<String> {
                Ok(entry?.file_name().to_string_lossy().into_owned())
            })
            .collect::<Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    #[test]
    fn failed_install_puts_the_previous_file_back() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("store.json");
        save_records(&records(3), &path, StoreGuard::default())?;
        let before = fs::read(&path)?;

        let backup = sibling(&path, ".backup");
        let err = replace_with_rollback(&path, &backup, || {
            assert!(!path.exists(), "live file is parked during install");
            Err(anyhow::anyhow!("disk full"))
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(fs::read(&path)?, before);
        assert_eq!(file_names(tmp.path())?, vec!["store.json".to_string()]);
        Ok(())
    }

    #[test]
    fn unverifiable_save_leaves_no_trace() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("store.json");
        save_records(&records(3), &path, StoreGuard::default())?;
        let before = fs::read(&path)?;

        // NaN has no JSON form, so the staged copy cannot match
        let mut broken = records(3);
        broken.insert(
            "HIP 7".into(),
            PropertyRecord {
                v_mag: Some(f64::NAN),
                ..PropertyRecord::default()
            },
        );
        let err = save_records(&broken, &path, StoreGuard::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::VerificationFailed { .. })
        ));
        assert_eq!(fs::read(&path)?, before);
        assert_eq!(file_names(tmp.path())?, vec!["store.json".to_string()]);
        Ok(())
    }

    #[test]
    fn non_finite_enrichment_does_not_block_saves() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("store.json");
        let mut store = PropertyStore::open(&path, StoreGuard::default());
        store.merge([("HIP 1".to_string(), record(4.0))]);
        store.merge([(
            "HIP 1".to_string(),
            PropertyRecord {
                derived: astrocache_domain::DerivedFields {
                    luminosity_solar: Some(f64::NAN),
                    ..astrocache_domain::DerivedFields::default()
                },
                ..PropertyRecord::default()
            },
        )]);
        store.save()?;
        store.merge([("HIP 2".to_string(), record(5.0))]);
        store.save()?;
        assert_eq!(load_records(&path), store.snapshot());
        Ok(())
    }

    #[test]
    fn failed_recovery_keeps_the_backup() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("store.json");
        let backup = sibling(&path, ".backup");
        let original = records(4);
        save_records(&original, &tmp.path().join("seed.json"), StoreGuard::default())?;
        fs::rename(tmp.path().join("seed.json"), &backup)?;
        let backup_bytes = fs::read(&backup)?;

        // an unreadable primary that cannot be replaced either
        fs::create_dir(&path)?;
        fs::write(path.join("occupied"), b"x")?;

        assert_eq!(load_records(&path), original);
        assert_eq!(fs::read(&backup)?, backup_bytes);
        assert_eq!(decode(&backup)?.records, original);
        Ok(())
    }
}
