//! File-backed per-jacket state index.
//!
//! The index is derived data: it makes current-revision lookups and tag
//! queries O(1)-ish but can always be rebuilt from the history chain. Layout
//! under the index directory:
//!
//! - `_state`: fixed-width records, 10 bytes each (9 zero-padded ASCII
//!   digits + newline). Record 0 is the current history number; record `e`
//!   is the current revision of entry `e`. Zeros mean "absent".
//! - `_list`: one line per live tag, `<9-digit file id> <tag name>`.
//! - per-tag files named by their 9-digit id: 30-byte records
//!   `YYYY-MM-DD HH:MM:SS <9-digit entry>`, sorted ascending by time.
//!
//! All mutation happens under the jacket's exclusive lock; readers see a
//! snapshot under the shared lock.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::core::{TagDelta, TimeStr};

const STATE_FILE: &str = "_state";
const LIST_FILE: &str = "_list";
const STATE_RECORD: u64 = 10;
const TAG_RECORD: usize = 30;

/// Largest number representable in the 9-digit fixed-width records.
pub const MAX_STATE_NUMBER: u64 = 999_999_999;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StateError {
    #[error("state i/o: {0}")]
    Io(#[from] io::Error),
    #[error("state index corrupt in {file}: {reason}")]
    Corrupt { file: String, reason: String },
    #[error("number {value} exceeds the state format's 9-digit capacity")]
    TooLarge { value: u64 },
}

fn corrupt(file: &str, reason: impl Into<String>) -> StateError {
    StateError::Corrupt {
        file: file.to_string(),
        reason: reason.into(),
    }
}

/// Mutable per-jacket index: current revisions plus per-tag entry lists.
#[derive(Debug)]
pub struct StateIndex {
    dir: PathBuf,
}

impl StateIndex {
    /// Open the index directory, creating it (and empty `_state`/`_list`)
    /// on first use or after a reset.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let index = Self { dir: dir.into() };
        fs::create_dir_all(&index.dir)?;
        for name in [STATE_FILE, LIST_FILE] {
            let path = index.dir.join(name);
            if !path.exists() {
                File::create(&path)?;
            }
        }
        Ok(index)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current revision of entry `e` (`e >= 1`), or the current history
    /// number for `e == 0`. Zero means "never written".
    pub fn current(&self, e: u64) -> Result<u64, StateError> {
        check_width(e)?;
        let mut file = File::open(self.dir.join(STATE_FILE))?;
        let len = file.metadata()?.len();
        if len % STATE_RECORD != 0 {
            return Err(corrupt(STATE_FILE, "length is not a multiple of 10"));
        }
        let offset = e * STATE_RECORD;
        if offset >= len {
            return Ok(0);
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut record = [0u8; STATE_RECORD as usize];
        file.read_exact(&mut record)?;
        parse_state_record(&record)
    }

    pub fn set_current(&self, e: u64, value: u64) -> Result<(), StateError> {
        check_width(e)?;
        check_width(value)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.dir.join(STATE_FILE))?;
        let len = file.metadata()?.len();
        if len % STATE_RECORD != 0 {
            return Err(corrupt(STATE_FILE, "length is not a multiple of 10"));
        }
        let offset = e * STATE_RECORD;
        if len < offset {
            file.seek(SeekFrom::Start(len))?;
            let zero = b"000000000\n";
            for _ in (len..offset).step_by(STATE_RECORD as usize) {
                file.write_all(zero)?;
            }
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(format!("{:09}\n", value).as_bytes())?;
        Ok(())
    }

    pub fn current_history(&self) -> Result<u64, StateError> {
        self.current(0)
    }

    pub fn set_current_history(&self, history: u64) -> Result<(), StateError> {
        self.set_current(0, history)
    }

    /// Tag directory, ascending by tag name.
    pub fn tag_names(&self) -> Result<Vec<String>, StateError> {
        let mut names: Vec<String> = self.read_list()?.into_iter().map(|(_, name)| name).collect();
        names.sort();
        Ok(names)
    }

    /// Total list size plus a newest-first window of up to `max` pairs after
    /// skipping `offset`, computed by seeking rather than materializing the
    /// whole list.
    pub fn read_tag(
        &self,
        tag: &str,
        offset: usize,
        max: usize,
    ) -> Result<(usize, Vec<(TimeStr, u64)>), StateError> {
        let Some(id) = self.tag_id(tag)? else {
            return Ok((0, Vec::new()));
        };
        let path = self.tag_path(id);
        let mut file = File::open(&path)?;
        let len = file.metadata()?.len() as usize;
        if len % TAG_RECORD != 0 {
            return Err(corrupt(&tag_file_name(id), "length is not a multiple of 30"));
        }
        let total = len / TAG_RECORD;
        if offset >= total || max == 0 {
            return Ok((total, Vec::new()));
        }
        let hi = total - offset;
        let lo = hi.saturating_sub(max);
        file.seek(SeekFrom::Start((lo * TAG_RECORD) as u64))?;
        let mut span = vec![0u8; (hi - lo) * TAG_RECORD];
        file.read_exact(&mut span)?;

        let mut window = Vec::with_capacity(hi - lo);
        for record in span.chunks(TAG_RECORD) {
            window.push(parse_tag_record(record, &tag_file_name(id))?);
        }
        window.reverse();
        Ok((total, window))
    }

    /// Apply a write's tag delta.
    ///
    /// Each touched tag file is rewritten via temp-and-rename, so readers
    /// never see a half-written list; `_list` is rewritten once at the end.
    pub fn apply_delta(&self, delta: &TagDelta) -> Result<(), StateError> {
        let mut list = self.read_list()?;
        let mut list_dirty = false;

        for (tag, ops) in delta.iter() {
            let existing = list.iter().find(|(_, name)| name == tag).map(|(id, _)| *id);
            let mut records = match existing {
                Some(id) => self.read_tag_file(id)?,
                None => Vec::new(),
            };

            for (&entry, op) in ops {
                check_width(entry)?;
                records.retain(|(_, e)| *e != entry);
                if let Some(time) = op {
                    let at = records.partition_point(|(t, _)| t <= time);
                    records.insert(at, (time.clone(), entry));
                }
            }

            if records.is_empty() {
                if let Some(id) = existing {
                    fs::remove_file(self.tag_path(id))?;
                    list.retain(|(other, _)| *other != id);
                    list_dirty = true;
                }
                continue;
            }

            let id = match existing {
                Some(id) => id,
                None => {
                    let id = list.iter().map(|(id, _)| *id).max().unwrap_or(0) + 1;
                    list.push((id, tag.to_string()));
                    list_dirty = true;
                    id
                }
            };
            let mut temp = NamedTempFile::new_in(&self.dir)?;
            for (time, entry) in &records {
                temp.write_all(format!("{} {:09}\n", time, entry).as_bytes())?;
            }
            temp.flush()?;
            temp.persist(self.tag_path(id)).map_err(|e| e.error)?;
        }

        if list_dirty {
            self.write_list(&list)?;
        }
        Ok(())
    }

    /// Drop the whole index, leaving it empty. Used before a full rebuild.
    pub fn reset(&self) -> Result<(), StateError> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        fs::create_dir_all(&self.dir)?;
        File::create(self.dir.join(STATE_FILE))?;
        File::create(self.dir.join(LIST_FILE))?;
        Ok(())
    }

    fn tag_path(&self, id: u64) -> PathBuf {
        self.dir.join(tag_file_name(id))
    }

    fn tag_id(&self, tag: &str) -> Result<Option<u64>, StateError> {
        Ok(self
            .read_list()?
            .into_iter()
            .find(|(_, name)| name == tag)
            .map(|(id, _)| id))
    }

    fn read_list(&self) -> Result<Vec<(u64, String)>, StateError> {
        let mut raw = String::new();
        File::open(self.dir.join(LIST_FILE))?.read_to_string(&mut raw)?;
        let mut list = Vec::new();
        for line in raw.lines() {
            let (id, name) = line
                .split_once(' ')
                .ok_or_else(|| corrupt(LIST_FILE, "missing separator"))?;
            if id.len() != 9 || !id.bytes().all(|b| b.is_ascii_digit()) {
                return Err(corrupt(LIST_FILE, "malformed tag file id"));
            }
            let id: u64 = id
                .parse()
                .map_err(|_| corrupt(LIST_FILE, "malformed tag file id"))?;
            if name.is_empty() {
                return Err(corrupt(LIST_FILE, "empty tag name"));
            }
            list.push((id, name.to_string()));
        }
        Ok(list)
    }

    fn write_list(&self, list: &[(u64, String)]) -> Result<(), StateError> {
        let mut temp = NamedTempFile::new_in(&self.dir)?;
        for (id, name) in list {
            temp.write_all(format!("{:09} {}\n", id, name).as_bytes())?;
        }
        temp.flush()?;
        temp.persist(self.dir.join(LIST_FILE)).map_err(|e| e.error)?;
        Ok(())
    }

    fn read_tag_file(&self, id: u64) -> Result<Vec<(TimeStr, u64)>, StateError> {
        let mut bytes = Vec::new();
        File::open(self.tag_path(id))?.read_to_end(&mut bytes)?;
        if bytes.len() % TAG_RECORD != 0 {
            return Err(corrupt(&tag_file_name(id), "length is not a multiple of 30"));
        }
        bytes
            .chunks(TAG_RECORD)
            .map(|record| parse_tag_record(record, &tag_file_name(id)))
            .collect()
    }
}

fn tag_file_name(id: u64) -> String {
    format!("{:09}", id)
}

fn check_width(value: u64) -> Result<(), StateError> {
    if value > MAX_STATE_NUMBER {
        return Err(StateError::TooLarge { value });
    }
    Ok(())
}

fn parse_state_record(record: &[u8; STATE_RECORD as usize]) -> Result<u64, StateError> {
    if record[9] != b'\n' || !record[..9].iter().all(u8::is_ascii_digit) {
        return Err(corrupt(STATE_FILE, "malformed record"));
    }
    let digits = std::str::from_utf8(&record[..9])
        .map_err(|_| corrupt(STATE_FILE, "malformed record"))?;
    digits
        .parse()
        .map_err(|_| corrupt(STATE_FILE, "malformed record"))
}

fn parse_tag_record(record: &[u8], file: &str) -> Result<(TimeStr, u64), StateError> {
    if record.len() != TAG_RECORD || record[19] != b' ' || record[29] != b'\n' {
        return Err(corrupt(file, "malformed record"));
    }
    let time = std::str::from_utf8(&record[..19])
        .ok()
        .and_then(|raw| TimeStr::parse(raw).ok())
        .ok_or_else(|| corrupt(file, "malformed time"))?;
    let entry = std::str::from_utf8(&record[20..29])
        .ok()
        .filter(|raw| raw.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| corrupt(file, "malformed entry number"))?;
    Ok((time, entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TagDelta;

    fn index() -> (tempfile::TempDir, StateIndex) {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = StateIndex::open(dir.path().join("state")).expect("open state");
        (dir, index)
    }

    fn time(raw: &str) -> TimeStr {
        TimeStr::parse(raw).unwrap()
    }

    #[test]
    fn current_defaults_to_zero_and_persists() {
        let (_dir, index) = index();
        assert_eq!(index.current_history().unwrap(), 0);
        assert_eq!(index.current(7).unwrap(), 0);

        index.set_current(7, 3).unwrap();
        index.set_current_history(2).unwrap();
        assert_eq!(index.current(7).unwrap(), 3);
        assert_eq!(index.current_history().unwrap(), 2);
        // Sparse growth pads the gap with zero records.
        assert_eq!(index.current(3).unwrap(), 0);
    }

    #[test]
    fn state_records_are_fixed_width() {
        let (_dir, index) = index();
        index.set_current(2, 1).unwrap();
        let raw = fs::read(index.dir().join(STATE_FILE)).unwrap();
        assert_eq!(raw.len(), 30);
        assert_eq!(&raw, b"000000000\n000000000\n000000001\n");
    }

    #[test]
    fn apply_delta_inserts_sorted_and_windows_newest_first() {
        let (_dir, index) = index();
        let mut delta = TagDelta::new();
        delta.set("t", 1, Some(time("2026-01-01 00:00:02")));
        delta.set("t", 2, Some(time("2026-01-01 00:00:01")));
        delta.set("t", 3, Some(time("2026-01-01 00:00:03")));
        index.apply_delta(&delta).unwrap();

        let (total, window) = index.read_tag("t", 0, 10).unwrap();
        assert_eq!(total, 3);
        let entries: Vec<_> = window.iter().map(|(_, e)| *e).collect();
        assert_eq!(entries, vec![3, 1, 2]);

        let (total, window) = index.read_tag("t", 1, 1).unwrap();
        assert_eq!(total, 3);
        assert_eq!(window[0].1, 1);

        let (total, window) = index.read_tag("t", 3, 5).unwrap();
        assert_eq!(total, 3);
        assert!(window.is_empty());
    }

    #[test]
    fn delta_moves_and_tombstones_entries() {
        let (_dir, index) = index();
        let mut delta = TagDelta::new();
        delta.set("t", 1, Some(time("2026-01-01 00:00:01")));
        delta.set("t", 2, Some(time("2026-01-01 00:00:02")));
        index.apply_delta(&delta).unwrap();

        // Move entry 1 to a newer time; tombstone entry 2.
        let mut delta = TagDelta::new();
        delta.set("t", 1, Some(time("2026-01-01 00:00:09")));
        delta.set("t", 2, None);
        index.apply_delta(&delta).unwrap();

        let (total, window) = index.read_tag("t", 0, 10).unwrap();
        assert_eq!(total, 1);
        assert_eq!(window[0].1, 1);
        assert_eq!(window[0].0.as_str(), "2026-01-01 00:00:09");
    }

    #[test]
    fn empty_tags_leave_the_directory() {
        let (_dir, index) = index();
        let mut delta = TagDelta::new();
        delta.set("gone", 1, Some(time("2026-01-01 00:00:01")));
        delta.set("kept", 1, Some(time("2026-01-01 00:00:01")));
        index.apply_delta(&delta).unwrap();
        assert_eq!(index.tag_names().unwrap(), vec!["gone", "kept"]);

        let mut delta = TagDelta::new();
        delta.set("gone", 1, None);
        index.apply_delta(&delta).unwrap();
        assert_eq!(index.tag_names().unwrap(), vec!["kept"]);
        assert_eq!(index.read_tag("gone", 0, 10).unwrap().0, 0);
    }

    #[test]
    fn equal_times_keep_insertion_order() {
        let (_dir, index) = index();
        let t = time("2026-01-01 00:00:01");
        for entry in [1u64, 2, 3] {
            let mut delta = TagDelta::new();
            delta.set("t", entry, Some(t.clone()));
            index.apply_delta(&delta).unwrap();
        }
        let (_, window) = index.read_tag("t", 0, 10).unwrap();
        let entries: Vec<_> = window.iter().map(|(_, e)| *e).collect();
        // Newest-first: later insertions at equal times come first.
        assert_eq!(entries, vec![3, 2, 1]);
    }

    #[test]
    fn reset_clears_everything() {
        let (_dir, index) = index();
        index.set_current(1, 1).unwrap();
        let mut delta = TagDelta::new();
        delta.set("t", 1, Some(time("2026-01-01 00:00:01")));
        index.apply_delta(&delta).unwrap();

        index.reset().unwrap();
        assert_eq!(index.current(1).unwrap(), 0);
        assert!(index.tag_names().unwrap().is_empty());
        assert_eq!(index.read_tag("t", 0, 10).unwrap().0, 0);
    }
}
