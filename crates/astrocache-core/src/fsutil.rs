//! Temp-sibling JSON writes shared by the property store and dataset cache.

use std::ffi::OsString;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use time::macros::format_description;
use time::OffsetDateTime;

/// `path` with `suffix` appended to its file name (`store.json` -> `store.json.backup`).
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(OsString::new, ToOwned::to_owned);
    name.push(suffix);
    path.with_file_name(name)
}

pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Serialize `value` into a temporary file next to `dest`. Nothing at `dest` is touched.
pub(crate) fn write_temp_json<T: Serialize>(dest: &Path, value: &T) -> Result<NamedTempFile> {
    let dir = parent_dir(dest);
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temporary file in {}", dir.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut writer, value)
            .with_context(|| format!("serializing {}", dest.display()))?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("flushing temporary file for {}", dest.display()))?;
    Ok(tmp)
}

/// Decode the file at `path` as JSON.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

/// Copy `path` to `<path>.emergency-<timestamp>` and return the copy's location.
pub(crate) fn emergency_copy(path: &Path, now: OffsetDateTime) -> Result<PathBuf> {
    let stamp = now
        .format(format_description!("[year][month][day]T[hour][minute][second]"))
        .context("formatting emergency backup timestamp")?;
    let target = sibling(path, &format!(".emergency-{stamp}"));
    fs::copy(path, &target).with_context(|| {
        format!(
            "copying {} to emergency backup {}",
            path.display(),
            target.display()
        )
    })?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn sibling_appends_to_file_name() {
        let path = Path::new("/cache/star_properties_distance.json");
        assert_eq!(
            sibling(path, ".backup"),
            PathBuf::from("/cache/star_properties_distance.json.backup")
        );
        assert_eq!(parent_dir(Path::new("bare.json")), Path::new("."));
    }

    #[test]
    fn temp_json_lands_beside_destination() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let dest = tmp.path().join("nested").join("data.json");
        let staged = write_temp_json(&dest, &vec![1, 2, 3])?;
        assert_eq!(staged.path().parent(), dest.parent());
        assert!(!dest.exists());
        let decoded: Vec<u32> = read_json(staged.path())?;
        assert_eq!(decoded, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn emergency_copy_is_timestamped() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("store.json");
        fs::write(&path, b"{}")?;
        let copy = emergency_copy(&path, datetime!(2024-02-03 04:05:06 UTC))?;
        assert_eq!(copy, tmp.path().join("store.json.emergency-20240203T040506"));
        assert_eq!(fs::read(&copy)?, b"{}");
        Ok(())
    }
}
