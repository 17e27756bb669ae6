//! The jacket: orchestration of store, lock, state index, and records.
//!
//! A `Jacket` is an *open* handle: `open`/`create` produce it, `close`
//! consumes it, and a closed jacket has no read/write surface. All logical
//! operations take the jacket lock for their duration: shared for reads,
//! exclusive for writes, restore, and rebuild.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256 as Sha2};

use crate::config::JacketConfig;
use crate::core::{
    Clock, CoreError, Entry, History, ItemKind, JacketId, Sha256, SystemClock, TAG_ALL, TagDelta,
    TimeStr, attach_id, entry_id, history_id, sha256_bytes,
};
use crate::error::Error;
use crate::lock::JacketLock;
use crate::state::StateIndex;
use crate::store::{FsStore, ItemStore, read_bytes, write_bytes};
use crate::Result;

/// Jacket info format version this crate reads and writes.
pub const JACKET_FORMAT_VERSION: u32 = 1;

const INFO_FILE: &str = "_jacket";
const STATE_DIR: &str = "state";
const STORE_DIR: &str = "store";

/// Contents of the jacket info blob (also the lock sentinel file).
#[derive(Debug, Serialize, Deserialize)]
struct JacketInfo {
    sgfa_jacket_ver: u32,
    id_hash: String,
    id_text: String,
}

/// Sink for human-readable reports from `validate`, `backup_push`, and
/// `restore`. The core performs no other logging on these paths.
pub trait ReportSink {
    fn report(&mut self, line: &str);
}

impl ReportSink for Vec<String> {
    fn report(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

/// Forwards reports to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn report(&mut self, line: &str) {
        tracing::info!(target: "sgfa::report", "{line}");
    }
}

/// Result of an accepted write.
#[derive(Debug)]
pub struct WriteOutcome {
    /// Number of the history record that carries the write.
    pub history: u64,
    /// The finalized entries, with numbers and revisions assigned.
    pub entries: Vec<Entry>,
}

/// One page of a tag query, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPage {
    pub total: usize,
    pub entries: Vec<(TimeStr, u64)>,
}

/// Parameters for [`Jacket::validate`].
#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub min_history: u64,
    pub max_history: Option<u64>,
    /// Tolerated number of missing history blobs before the walk stops.
    pub miss_history: u64,
    /// Known-good hash the record at `max_history` must match.
    pub max_hash: Option<Sha256>,
    pub hash_entry: bool,
    pub hash_attach: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            min_history: 1,
            max_history: None,
            miss_history: 0,
            max_hash: None,
            hash_entry: false,
            hash_attach: false,
        }
    }
}

/// Parameters for [`Jacket::backup_push`] and [`Jacket::restore`].
#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub min_history: u64,
    pub max_history: Option<u64>,
    pub skip_history: bool,
    pub skip_entries: bool,
    pub skip_files: bool,
    /// Probe the destination before copying and skip blobs already present.
    pub stat: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            min_history: 1,
            max_history: None,
            skip_history: false,
            skip_entries: false,
            skip_files: false,
            stat: true,
        }
    }
}

/// Capabilities injected at jacket construction.
pub struct JacketOptions {
    store: Option<Box<dyn ItemStore>>,
    clock: Box<dyn Clock>,
    config: JacketConfig,
}

impl Default for JacketOptions {
    fn default() -> Self {
        Self {
            store: None,
            clock: Box::new(SystemClock),
            config: JacketConfig::default(),
        }
    }
}

impl JacketOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `store` instead of the default file-system store under the
    /// jacket root.
    pub fn store(mut self, store: Box<dyn ItemStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: JacketConfig) -> Self {
        self.config = config;
        self
    }
}

/// An open jacket.
///
/// Not safe to share across threads without external serialization; the
/// cross-process concurrency discipline is the advisory lock.
pub struct Jacket {
    id: JacketId,
    root: PathBuf,
    lock: JacketLock,
    store: Box<dyn ItemStore>,
    state: StateIndex,
    clock: Box<dyn Clock>,
    config: JacketConfig,
}

impl std::fmt::Debug for Jacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jacket")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Jacket {
    /// Create a new jacket rooted at `root`.
    pub fn create(root: impl Into<PathBuf>, id_text: &str) -> Result<Self> {
        Self::create_with(root, id_text, JacketOptions::default())
    }

    pub fn create_with(
        root: impl Into<PathBuf>,
        id_text: &str,
        options: JacketOptions,
    ) -> Result<Self> {
        let root = root.into();
        let id = JacketId::new(id_text)?;
        fs::create_dir_all(&root).map_err(Error::from_io)?;
        let info_path = root.join(INFO_FILE);
        if info_path.exists() {
            return Err(Error::sanity(format!(
                "jacket already exists at {}",
                root.display()
            )));
        }
        let info = JacketInfo {
            sgfa_jacket_ver: JACKET_FORMAT_VERSION,
            id_hash: id.hash().to_hex(),
            id_text: id.text().to_string(),
        };
        let mut blob = serde_json::to_string_pretty(&info)
            .map_err(|e| Error::sanity(format!("encode jacket info: {e}")))?;
        blob.push('\n');
        fs::write(&info_path, blob).map_err(Error::from_io)?;
        Self::open_with(root, options)
    }

    /// Open an existing jacket, verifying `id_hash == SHA256(id_text)`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(root, JacketOptions::default())
    }

    pub fn open_with(root: impl Into<PathBuf>, options: JacketOptions) -> Result<Self> {
        let root = root.into();
        let info_path = root.join(INFO_FILE);
        let raw = match fs::read(&info_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::non_existent(format!(
                    "jacket at {}",
                    root.display()
                )));
            }
            Err(err) => return Err(Error::from_io(err)),
        };
        let info: JacketInfo = serde_json::from_slice(&raw)
            .map_err(|e| Error::corrupt("jacket info", e.to_string()))?;
        if info.sgfa_jacket_ver != JACKET_FORMAT_VERSION {
            return Err(Error::corrupt(
                "jacket info",
                format!("unsupported version {}", info.sgfa_jacket_ver),
            ));
        }
        let id = JacketId::new(&info.id_text)?;
        let recorded = Sha256::from_hex(&info.id_hash)
            .map_err(|_| Error::corrupt("jacket info", "malformed id_hash"))?;
        if &recorded != id.hash() {
            return Err(Error::corrupt(
                "jacket info",
                "id_hash does not match id_text",
            ));
        }

        let lock = JacketLock::open(&info_path)?;
        let state = StateIndex::open(root.join(STATE_DIR))?;
        let store = match options.store {
            Some(store) => store,
            None => Box::new(FsStore::open(root.join(STORE_DIR))?),
        };
        Ok(Self {
            id,
            root,
            lock,
            store,
            state,
            clock: options.clock,
            config: options.config,
        })
    }

    pub fn id(&self) -> &JacketId {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &JacketConfig {
        &self.config
    }

    /// Close the jacket, releasing any lock still held.
    pub fn close(mut self) -> Result<()> {
        self.lock.unlock()?;
        Ok(())
    }

    fn release<T>(&mut self, result: Result<T>) -> Result<T> {
        match self.lock.unlock() {
            Ok(()) => result,
            Err(err) => result.and(Err(err.into())),
        }
    }

    // =========================================================================
    // Write protocol
    // =========================================================================

    /// Write one or more entry drafts as a single history record.
    ///
    /// Runs under the exclusive lock. The current-history pointer moves only
    /// after every dependent blob is durable, so shared-lock readers never
    /// see a pointer to a missing blob. A crash mid-write leaves orphan
    /// blobs but cannot corrupt the state index; no rollback is attempted.
    pub fn write(
        &mut self,
        user: &str,
        entries: Vec<Entry>,
        time: Option<TimeStr>,
    ) -> Result<WriteOutcome> {
        self.lock.exclusive()?;
        let result = self.write_locked(user, entries, time);
        self.release(result)
    }

    fn write_locked(
        &mut self,
        user: &str,
        mut entries: Vec<Entry>,
        time: Option<TimeStr>,
    ) -> Result<WriteOutcome> {
        if entries.is_empty() {
            return Err(Error::sanity("write needs at least one entry"));
        }

        // Optimistic-concurrency gate: nothing is persisted past a stale
        // revision.
        let mut numbered = std::collections::BTreeSet::new();
        for entry in &entries {
            if let Some(number) = entry.entry() {
                if !numbered.insert(number) {
                    return Err(Error::sanity(format!(
                        "entry {number} appears twice in one write"
                    )));
                }
                let current = self.state.current(number)?;
                if entry.revision() != current + 1 {
                    return Err(Error::Conflict {
                        entry: number,
                        expected: current + 1,
                        found: entry.revision(),
                    });
                }
            }
        }

        let now = match time {
            Some(time) => time,
            None => self.clock.now(),
        };
        let current_history = self.state.current_history()?;
        let (mut history, changes) = if current_history == 0 {
            let mut first = History::first(*self.id.hash());
            let changes = first.process(user, &mut entries, &now)?;
            (first, changes)
        } else {
            let mut prev = self.load_history(current_history)?;
            prev.next(user, &mut entries, &now)?
        };
        let number = history.number();

        for entry in &mut entries {
            let e = entry
                .entry()
                .ok_or_else(|| Error::sanity("processed entry lost its number"))?;
            let revision = entry.revision();
            let bytes = entry.canonical()?.to_vec();
            write_bytes(
                self.store.as_ref(),
                ItemKind::Entry,
                &entry_id(self.id.hash(), e, revision),
                &bytes,
            )?;
            self.state.set_current(e, revision)?;
        }

        for file in &changes.files {
            write_bytes(
                self.store.as_ref(),
                ItemKind::File,
                &attach_id(self.id.hash(), file.entry, file.attach, number),
                &file.bytes,
            )?;
        }

        self.state.apply_delta(&changes.tag_delta)?;

        let bytes = history.canonical()?.to_vec();
        write_bytes(
            self.store.as_ref(),
            ItemKind::History,
            &history_id(self.id.hash(), number),
            &bytes,
        )?;

        // Commit point for readers.
        self.state.set_current_history(number)?;
        tracing::debug!(history = number, entries = entries.len(), "write committed");

        Ok(WriteOutcome {
            history: number,
            entries,
        })
    }

    // =========================================================================
    // Read protocol
    // =========================================================================

    /// Read entry `entry` at `revision`, or at its current revision when
    /// `revision == 0`.
    pub fn read_entry(&mut self, entry: u64, revision: u64) -> Result<Entry> {
        self.lock.shared()?;
        let result = self.read_entry_locked(entry, revision);
        self.release(result)
    }

    fn read_entry_locked(&mut self, entry: u64, revision: u64) -> Result<Entry> {
        if entry == 0 {
            return Err(Error::sanity("entry number must be positive"));
        }
        let at_current = revision == 0;
        let revision = if at_current {
            match self.state.current(entry)? {
                0 => return Err(Error::non_existent(format!("entry {entry}"))),
                current => current,
            }
        } else {
            revision
        };
        let id = entry_id(self.id.hash(), entry, revision);
        let Some(bytes) = read_bytes(self.store.as_ref(), ItemKind::Entry, &id)? else {
            return Err(if at_current {
                Error::corrupt(
                    format!("entry {entry}-{revision}"),
                    "state references a missing blob",
                )
            } else {
                Error::non_existent(format!("entry {entry}-{revision}"))
            });
        };
        let decoded = Entry::decode(&bytes, &self.config.limits).map_err(CoreError::from)?;
        if decoded.entry() != Some(entry)
            || decoded.revision() != revision
            || decoded.jacket() != Some(self.id.hash())
        {
            return Err(Error::corrupt(
                format!("entry {entry}-{revision}"),
                "blob does not match its address",
            ));
        }
        Ok(decoded)
    }

    /// Read history record `history`, or the current one when `history == 0`.
    pub fn read_history(&mut self, history: u64) -> Result<History> {
        self.lock.shared()?;
        let result = self.read_history_locked(history);
        self.release(result)
    }

    fn read_history_locked(&mut self, history: u64) -> Result<History> {
        let at_current = history == 0;
        let history = if at_current {
            match self.state.current_history()? {
                0 => return Err(Error::non_existent("history")),
                current => current,
            }
        } else {
            history
        };
        match self.fetch_history(history)? {
            Some(record) => Ok(record),
            None if at_current => Err(Error::corrupt(
                format!("history {history}"),
                "state references a missing blob",
            )),
            None => Err(Error::non_existent(format!("history {history}"))),
        }
    }

    /// Readable handle over attachment `(entry, attach)` as introduced in
    /// history `history`. Never cached; the caller must release it.
    pub fn read_attach(&mut self, entry: u64, attach: u64, history: u64) -> Result<Box<dyn Read>> {
        self.lock.shared()?;
        let id = attach_id(self.id.hash(), entry, attach, history);
        let result = match self.store.read(ItemKind::File, &id) {
            Ok(Some(handle)) => Ok(handle),
            Ok(None) => Err(Error::non_existent(format!(
                "attachment {entry}-{attach} of history {history}"
            ))),
            Err(err) => Err(err.into()),
        };
        self.release(result)
    }

    /// Newest-first window over a tag's entry list.
    ///
    /// Callers that pass `max == 0` get the configured default page size.
    pub fn read_tag(&mut self, tag: &str, offset: usize, max: usize) -> Result<TagPage> {
        let max = if max == 0 {
            self.config.default_tag_page
        } else {
            max
        };
        let tag = if tag == TAG_ALL {
            tag.to_string()
        } else {
            self.config.limits.check_tag(tag)?
        };
        self.lock.shared()?;
        let result = self
            .state
            .read_tag(&tag, offset, max)
            .map(|(total, entries)| TagPage { total, entries })
            .map_err(Error::from);
        self.release(result)
    }

    /// Enumerate the tag directory, ascending by name.
    pub fn read_list(&mut self) -> Result<Vec<String>> {
        self.lock.shared()?;
        let result = self.state.tag_names().map_err(Error::from);
        self.release(result)
    }

    // =========================================================================
    // Validate
    // =========================================================================

    /// Walk the history chain and verify its integrity.
    ///
    /// Returns true iff no errors were reported and, when `max_history` is
    /// given, the walk actually reached it.
    pub fn validate(&mut self, options: &CheckOptions, sink: &mut dyn ReportSink) -> Result<bool> {
        self.lock.shared()?;
        let result = self.validate_locked(options, sink);
        self.release(result)
    }

    fn validate_locked(
        &mut self,
        options: &CheckOptions,
        sink: &mut dyn ReportSink,
    ) -> Result<bool> {
        let min = options.min_history.max(1);
        let mut ok = true;
        let mut misses = 0u64;
        let mut prev: Option<(u64, Sha256)> = None;
        let mut last_hash: Option<Sha256> = None;
        let mut first_present: Option<u64> = None;
        let mut last_present: Option<u64> = None;
        let mut reached_max = false;

        let mut h = min;
        loop {
            if let Some(max) = options.max_history
                && h > max
            {
                reached_max = true;
                break;
            }
            let id = history_id(self.id.hash(), h);
            let Some(bytes) = read_bytes(self.store.as_ref(), ItemKind::History, &id)? else {
                misses += 1;
                if misses > options.miss_history {
                    if let (Some(first), Some(last)) = (first_present, last_present) {
                        sink.report(&format!("History valid {first}-{last}"));
                    }
                    break;
                }
                sink.report(&format!("History missing {h}"));
                prev = None;
                h += 1;
                continue;
            };
            let hash = sha256_bytes(&bytes);
            first_present.get_or_insert(h);
            last_present = Some(h);

            match History::decode(&bytes, &self.config.limits) {
                Err(err) => {
                    sink.report(&format!("History invalid {h}"));
                    tracing::warn!(history = h, "history decode failed: {err}");
                    ok = false;
                }
                Ok(record) => {
                    let linked = match prev {
                        Some((number, prev_hash)) if number + 1 == h => {
                            record.previous() == &prev_hash
                        }
                        Some(_) | None if h == 1 => record.previous().is_zero(),
                        _ => true,
                    };
                    if !linked {
                        sink.report(&format!("History broken {h}"));
                        ok = false;
                    }
                    if options.hash_entry && !self.check_entry_hashes(&record, sink)? {
                        ok = false;
                    }
                    if options.hash_attach && !self.check_attach_hashes(&record, sink)? {
                        ok = false;
                    }
                }
            }
            prev = Some((h, hash));
            last_hash = Some(hash);
            h += 1;
        }

        if reached_max
            && let Some(want) = options.max_hash
            && last_hash != Some(want)
        {
            sink.report("Chain hash mismatch");
            ok = false;
        }

        Ok(ok && (options.max_history.is_none() || reached_max))
    }

    fn check_entry_hashes(&self, record: &History, sink: &mut dyn ReportSink) -> Result<bool> {
        let mut ok = true;
        for e in record.entries() {
            let id = entry_id(self.id.hash(), e.entry, e.revision);
            match read_bytes(self.store.as_ref(), ItemKind::Entry, &id)? {
                None => {
                    // A pruned entry blob is tolerable; a wrong one is not.
                    sink.report(&format!("Entry missing {}-{}", e.entry, e.revision));
                }
                Some(bytes) if sha256_bytes(&bytes) != e.hash => {
                    sink.report(&format!("Entry invalid {}-{}", e.entry, e.revision));
                    ok = false;
                }
                Some(_) => {}
            }
        }
        Ok(ok)
    }

    fn check_attach_hashes(&self, record: &History, sink: &mut dyn ReportSink) -> Result<bool> {
        let mut ok = true;
        for a in record.attachments() {
            let id = attach_id(self.id.hash(), a.entry, a.attach, record.number());
            match self.store.read(ItemKind::File, &id)? {
                None => {
                    sink.report(&format!("Attach missing {}-{}", a.entry, a.attach));
                }
                Some(handle) => {
                    if hash_reader(handle)? != a.hash {
                        sink.report(&format!("Attach invalid {}-{}", a.entry, a.attach));
                        ok = false;
                    }
                }
            }
        }
        Ok(ok)
    }

    // =========================================================================
    // Backup
    // =========================================================================

    /// Copy histories (and the blobs they reference) into `dest`, ascending,
    /// so the destination always holds a consistent prefix of the chain.
    /// Never deletes from the destination.
    pub fn backup_push(
        &mut self,
        dest: &dyn ItemStore,
        options: &BackupOptions,
        sink: &mut dyn ReportSink,
    ) -> Result<()> {
        self.lock.shared()?;
        let result = self.push_locked(dest, options, sink);
        self.release(result)
    }

    fn push_locked(
        &mut self,
        dest: &dyn ItemStore,
        options: &BackupOptions,
        sink: &mut dyn ReportSink,
    ) -> Result<()> {
        let mut h = options.min_history.max(1);
        loop {
            if let Some(max) = options.max_history
                && h > max
            {
                break;
            }
            let id = history_id(self.id.hash(), h);
            let Some(bytes) = read_bytes(self.store.as_ref(), ItemKind::History, &id)? else {
                if options.max_history.is_none() {
                    break;
                }
                sink.report(&format!("History missing {h}"));
                h += 1;
                continue;
            };
            if !options.skip_history {
                push_item(dest, ItemKind::History, &id, &bytes, options.stat)?;
            }
            match History::decode(&bytes, &self.config.limits) {
                Err(_) => sink.report(&format!("History invalid {h}")),
                Ok(record) => {
                    if !options.skip_entries {
                        for e in record.entries() {
                            let id = entry_id(self.id.hash(), e.entry, e.revision);
                            if !self.push_from_store(dest, ItemKind::Entry, &id, options.stat)? {
                                sink.report(&format!("Entry missing {}-{}", e.entry, e.revision));
                            }
                        }
                    }
                    if !options.skip_files {
                        for a in record.attachments() {
                            let id = attach_id(self.id.hash(), a.entry, a.attach, h);
                            if !self.push_from_store(dest, ItemKind::File, &id, options.stat)? {
                                sink.report(&format!("Attach missing {}-{}", a.entry, a.attach));
                            }
                        }
                    }
                }
            }
            h += 1;
        }
        Ok(())
    }

    /// Copy one source blob into `dest`; false when the source lacks it.
    fn push_from_store(
        &self,
        dest: &dyn ItemStore,
        kind: ItemKind,
        id: &Sha256,
        stat: bool,
    ) -> Result<bool> {
        if stat && dest.size(kind, id)?.is_some() {
            return Ok(true);
        }
        let Some(mut handle) = self.store.read(kind, id)? else {
            return Ok(false);
        };
        let mut temp = dest.temp()?;
        io::copy(&mut handle, &mut temp).map_err(Error::from_io)?;
        dest.write(kind, id, temp)?;
        Ok(true)
    }

    /// Pull histories (and the blobs they reference) from a backup store,
    /// then rebuild the state index. Holds the exclusive lock for the whole
    /// operation.
    pub fn restore(
        &mut self,
        src: &dyn ItemStore,
        options: &BackupOptions,
        sink: &mut dyn ReportSink,
    ) -> Result<()> {
        self.lock.exclusive()?;
        let result = self.restore_locked(src, options, sink);
        self.release(result)
    }

    fn restore_locked(
        &mut self,
        src: &dyn ItemStore,
        options: &BackupOptions,
        sink: &mut dyn ReportSink,
    ) -> Result<()> {
        let min = options.min_history.max(1);
        let mut top = 0u64;
        let mut h = min;
        loop {
            if let Some(max) = options.max_history
                && h > max
            {
                break;
            }
            let id = history_id(self.id.hash(), h);
            if options.stat && self.store.size(ItemKind::History, &id)?.is_some() {
                top = h;
                h += 1;
                continue;
            }
            let Some(bytes) = read_bytes(src, ItemKind::History, &id)? else {
                if options.max_history.is_none() {
                    break;
                }
                sink.report(&format!("History missing {h}"));
                h += 1;
                continue;
            };
            write_bytes(self.store.as_ref(), ItemKind::History, &id, &bytes)?;
            match History::decode(&bytes, &self.config.limits) {
                Err(_) => sink.report(&format!("History invalid {h}")),
                Ok(record) => {
                    if !options.skip_entries {
                        for e in record.entries() {
                            let id = entry_id(self.id.hash(), e.entry, e.revision);
                            if !self.pull_from_store(src, ItemKind::Entry, &id, options.stat)? {
                                sink.report(&format!("Entry missing {}-{}", e.entry, e.revision));
                            }
                        }
                    }
                    if !options.skip_files {
                        for a in record.attachments() {
                            let id = attach_id(self.id.hash(), a.entry, a.attach, h);
                            if !self.pull_from_store(src, ItemKind::File, &id, options.stat)? {
                                sink.report(&format!("Attach missing {}-{}", a.entry, a.attach));
                            }
                        }
                    }
                }
            }
            top = h;
            h += 1;
        }

        if top >= min {
            if min == 1 {
                self.state.reset()?;
            }
            self.rebuild_locked(min, top)?;
        }
        Ok(())
    }

    fn pull_from_store(
        &self,
        src: &dyn ItemStore,
        kind: ItemKind,
        id: &Sha256,
        stat: bool,
    ) -> Result<bool> {
        if stat && self.store.size(kind, id)?.is_some() {
            return Ok(true);
        }
        let Some(mut handle) = src.read(kind, id)? else {
            return Ok(false);
        };
        let mut temp = self.store.temp()?;
        io::copy(&mut handle, &mut temp).map_err(Error::from_io)?;
        self.store.write(kind, id, temp)?;
        Ok(true)
    }

    // =========================================================================
    // State rebuild
    // =========================================================================

    /// Re-derive the state index from histories `min..=max`.
    ///
    /// This is the sole recovery mechanism after restore or corruption;
    /// writing is suspended by the exclusive lock for its duration.
    pub fn rebuild_state(&mut self, min: u64, max: u64) -> Result<()> {
        self.lock.exclusive()?;
        let result = (|| {
            if min == 1 {
                self.state.reset()?;
            }
            self.rebuild_locked(min, max)
        })();
        self.release(result)
    }

    fn rebuild_locked(&mut self, min: u64, max: u64) -> Result<()> {
        if min == 0 || max < min {
            return Err(Error::sanity("rebuild needs 1 <= min <= max"));
        }
        let mut seen = std::collections::BTreeSet::new();
        let mut delta = TagDelta::new();
        let mut pending = 0usize;
        let mut top_history = 0u64;

        // Downward walk: the first sighting of an entry number is its
        // current revision.
        for h in (min..=max).rev() {
            let id = history_id(self.id.hash(), h);
            let Some(bytes) = read_bytes(self.store.as_ref(), ItemKind::History, &id)? else {
                tracing::warn!(history = h, "missing history during state rebuild");
                continue;
            };
            let record = History::decode(&bytes, &self.config.limits).map_err(CoreError::from)?;
            if top_history == 0 {
                top_history = h;
            }
            for e in record.entries() {
                if !seen.insert(e.entry) {
                    continue;
                }
                self.state.set_current(e.entry, e.revision)?;

                let entry = self.read_entry_locked(e.entry, e.revision).map_err(|err| {
                    if err.is_non_existent() {
                        Error::corrupt(
                            format!("entry {}-{}", e.entry, e.revision),
                            "referenced by history but missing from the store",
                        )
                    } else {
                        err
                    }
                })?;
                let time = match entry.time() {
                    Some(time) => time.clone(),
                    None => continue,
                };
                for tag in entry.tags() {
                    delta.set(tag, e.entry, Some(time.clone()));
                }
                delta.set(TAG_ALL, e.entry, Some(time.clone()));

                if min > 1 && e.revision > 1 {
                    // Partial rebuild: tombstone tags the prior revision had
                    // and the current one dropped.
                    let prior = entry_id(self.id.hash(), e.entry, e.revision - 1);
                    if let Some(bytes) =
                        read_bytes(self.store.as_ref(), ItemKind::Entry, &prior)?
                        && let Ok(prior) = Entry::decode(&bytes, &self.config.limits)
                    {
                        for tag in prior.tags() {
                            if !entry.tags().contains(tag) {
                                delta.set(tag, e.entry, None);
                            }
                        }
                    }
                }

                pending += 1;
                if pending >= self.config.rebuild_flush_entries {
                    self.state.apply_delta(&delta)?;
                    delta.clear();
                    pending = 0;
                }
            }
        }

        if !delta.is_empty() {
            self.state.apply_delta(&delta)?;
        }
        if top_history > 0 {
            self.state.set_current_history(top_history)?;
        }
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn fetch_history(&self, history: u64) -> Result<Option<History>> {
        let id = history_id(self.id.hash(), history);
        let Some(bytes) = read_bytes(self.store.as_ref(), ItemKind::History, &id)? else {
            return Ok(None);
        };
        let record = History::decode(&bytes, &self.config.limits).map_err(CoreError::from)?;
        if record.number() != history || record.jacket() != Some(self.id.hash()) {
            return Err(Error::corrupt(
                format!("history {history}"),
                "blob does not match its address",
            ));
        }
        Ok(Some(record))
    }

    fn load_history(&self, history: u64) -> Result<History> {
        self.fetch_history(history)?.ok_or_else(|| {
            Error::corrupt(
                format!("history {history}"),
                "state references a missing blob",
            )
        })
    }
}

fn push_item(
    dest: &dyn ItemStore,
    kind: ItemKind,
    id: &Sha256,
    bytes: &[u8],
    stat: bool,
) -> Result<()> {
    if stat && dest.size(kind, id)?.is_some() {
        return Ok(());
    }
    write_bytes(dest, kind, id, bytes)?;
    Ok(())
}

fn hash_reader(mut handle: Box<dyn Read>) -> Result<Sha256> {
    let mut hasher = Sha2::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = handle.read(&mut buf).map_err(Error::from_io)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let out = hasher.finalize();
    let mut sum = [0u8; 32];
    sum.copy_from_slice(&out);
    Ok(Sha256(sum))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_writes_info_and_open_verifies_it() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("jacket");
        let jacket = Jacket::create(&root, "demo").unwrap();
        assert_eq!(jacket.id().text(), "demo");
        jacket.close().unwrap();

        let raw = fs::read_to_string(root.join(INFO_FILE)).unwrap();
        assert!(raw.ends_with('\n'));
        assert!(raw.contains("\"sgfa_jacket_ver\": 1"));

        let reopened = Jacket::open(&root).unwrap();
        assert_eq!(reopened.id().text(), "demo");
    }

    #[test]
    fn create_refuses_to_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("jacket");
        Jacket::create(&root, "demo").unwrap();
        let err = Jacket::create(&root, "demo").unwrap_err();
        assert_eq!(err.kind(), Some(crate::ErrorKind::Sanity));
    }

    #[test]
    fn open_missing_jacket_is_non_existent() {
        let dir = tempfile::tempdir().unwrap();
        let err = Jacket::open(dir.path().join("nowhere")).unwrap_err();
        assert!(err.is_non_existent());
    }

    #[test]
    fn open_detects_tampered_info() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("jacket");
        Jacket::create(&root, "demo").unwrap();

        let info_path = root.join(INFO_FILE);
        let tampered = fs::read_to_string(&info_path)
            .unwrap()
            .replace("demo", "evil");
        fs::write(&info_path, tampered).unwrap();

        let err = Jacket::open(&root).unwrap_err();
        assert!(err.is_corrupt());
    }
}
