//! History records: the tamper-evident change log.
//!
//! Each history record binds a set of entry writes to the jacket's chain:
//! `previous` is the SHA-256 of the prior record's canonical bytes (all
//! zeros for record #1), so any alteration of an earlier record invalidates
//! every later one.

use std::collections::BTreeMap;

use super::codec::{Lines, field, parse_decimal, parse_hash, parse_positive};
use super::entry::{Entry, TAG_ALL};
use super::error::{CoreError, DecodeError, RecordStateError};
use super::identity::{Sha256, sha256_bytes};
use super::limits::Limits;
use super::time::TimeStr;

/// Entry write recorded by a history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub entry: u64,
    pub revision: u64,
    pub hash: Sha256,
}

/// Attachment introduction recorded by a history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryAttach {
    pub entry: u64,
    pub attach: u64,
    pub hash: Sha256,
}

/// How the per-tag index must change after a write.
///
/// Maps tag → entry → new `time_str` (insert/move) or `None` (tombstone).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagDelta(BTreeMap<String, BTreeMap<u64, Option<TimeStr>>>);

impl TagDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, tag: &str, entry: u64, time: Option<TimeStr>) {
        self.0.entry(tag.to_string()).or_default().insert(entry, time);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<u64, Option<TimeStr>>)> {
        self.0.iter().map(|(tag, entries)| (tag.as_str(), entries))
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// New attachment content to persist, in discovery order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewFile {
    pub entry: u64,
    pub attach: u64,
    pub hash: Sha256,
    pub bytes: Vec<u8>,
}

/// Aggregate change-set produced by [`History::process`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryChanges {
    pub tag_delta: TagDelta,
    pub files: Vec<NewFile>,
}

/// One record of the jacket's change log.
#[derive(Clone, Debug)]
pub struct History {
    limits: Limits,
    jacket: Option<Sha256>,
    history: u64,
    entry_max: u64,
    time: Option<TimeStr>,
    previous: Sha256,
    user: Option<String>,
    entries: Vec<HistoryEntry>,
    attachments: Vec<HistoryAttach>,
    cached: Option<(Vec<u8>, Sha256)>,
}

impl History {
    /// History #1: zero `previous`, empty jacket so far.
    pub fn first(jacket: Sha256) -> Self {
        Self {
            limits: Limits::default(),
            jacket: Some(jacket),
            history: 1,
            entry_max: 0,
            time: None,
            previous: Sha256::zero(),
            user: None,
            entries: Vec::new(),
            attachments: Vec::new(),
            cached: None,
        }
    }

    pub fn jacket(&self) -> Option<&Sha256> {
        self.jacket.as_ref()
    }

    pub fn number(&self) -> u64 {
        self.history
    }

    pub fn entry_max(&self) -> u64 {
        self.entry_max
    }

    pub fn time(&self) -> Option<&TimeStr> {
        self.time.as_ref()
    }

    pub fn previous(&self) -> &Sha256 {
        &self.previous
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn attachments(&self) -> &[HistoryAttach] {
        &self.attachments
    }

    /// Finalize a set of drafts into this record.
    ///
    /// Assigns missing entry numbers sequentially above `entry_max`,
    /// finalizes each draft, aggregates entry and attachment hashes (entries
    /// in input order, attachments in discovery order), and computes the tag
    /// delta for the state index.
    pub fn process(
        &mut self,
        user: &str,
        drafts: &mut [Entry],
        time: &TimeStr,
    ) -> Result<HistoryChanges, CoreError> {
        self.limits.check_user(user)?;
        let jacket = self.jacket.ok_or(RecordStateError::NotSet { field: "jacket" })?;
        if self.history == 0 {
            return Err(RecordStateError::NotSet { field: "history" }.into());
        }
        if !self.entries.is_empty() {
            return Err(RecordStateError::AlreadySet { field: "entries" }.into());
        }

        self.user = Some(user.to_string());
        self.time = Some(time.clone());
        self.cached = None;

        let mut changes = HistoryChanges::default();
        for draft in drafts.iter_mut() {
            draft.set_jacket(jacket)?;
            let entry = match draft.entry() {
                Some(entry) => {
                    self.entry_max = self.entry_max.max(entry);
                    entry
                }
                None => {
                    self.entry_max += 1;
                    draft.set_entry(self.entry_max)?;
                    self.entry_max
                }
            };

            let entry_changes = draft.update(self.history, time)?;
            self.entries.push(HistoryEntry {
                entry,
                revision: draft.revision(),
                hash: draft.hash()?,
            });

            for (attach, file) in entry_changes.files {
                self.attachments.push(HistoryAttach {
                    entry,
                    attach,
                    hash: file.hash,
                });
                changes.files.push(NewFile {
                    entry,
                    attach,
                    hash: file.hash,
                    bytes: file.bytes,
                });
            }

            let entry_time = draft
                .time()
                .ok_or(RecordStateError::NotSet { field: "time" })?
                .clone();
            if entry_changes.time_changed {
                // A moved (or fresh) timestamp re-anchors the entry under
                // every tag it carries.
                for tag in draft.tags() {
                    changes.tag_delta.set(tag, entry, Some(entry_time.clone()));
                }
                changes.tag_delta.set(TAG_ALL, entry, Some(entry_time.clone()));
            } else {
                for tag in &entry_changes.tags_added {
                    changes.tag_delta.set(tag, entry, Some(entry_time.clone()));
                }
            }
            for tag in &entry_changes.tags_removed {
                changes.tag_delta.set(tag, entry, None);
            }
        }

        Ok(changes)
    }

    /// Produce the successor record and process `drafts` into it.
    pub fn next(
        &mut self,
        user: &str,
        drafts: &mut [Entry],
        time: &TimeStr,
    ) -> Result<(History, HistoryChanges), CoreError> {
        let previous = self.hash()?;
        let mut next = History {
            limits: self.limits.clone(),
            jacket: self.jacket,
            history: self.history + 1,
            entry_max: self.entry_max,
            time: None,
            previous,
            user: None,
            entries: Vec::new(),
            attachments: Vec::new(),
            cached: None,
        };
        let changes = next.process(user, drafts, time)?;
        Ok((next, changes))
    }

    pub fn canonical(&mut self) -> Result<&[u8], CoreError> {
        if self.cached.is_none() {
            let bytes = self.encode()?;
            let hash = sha256_bytes(&bytes);
            self.cached = Some((bytes, hash));
        }
        Ok(self.cached.as_ref().map(|(b, _)| b.as_slice()).unwrap_or(&[]))
    }

    pub fn hash(&mut self) -> Result<Sha256, CoreError> {
        self.canonical()?;
        match &self.cached {
            Some((_, hash)) => Ok(*hash),
            None => Err(RecordStateError::Draft.into()),
        }
    }

    fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let jacket = self.jacket.ok_or(RecordStateError::NotSet { field: "jacket" })?;
        if self.history == 0 {
            return Err(RecordStateError::NotSet { field: "history" }.into());
        }
        let time = self
            .time
            .as_ref()
            .ok_or(RecordStateError::NotSet { field: "time" })?;
        let user = self
            .user
            .as_ref()
            .ok_or(RecordStateError::NotSet { field: "user" })?;

        let mut out = String::new();
        out.push_str(&format!("jckt {}\n", jacket.to_hex()));
        out.push_str(&format!("hist {}\n", self.history));
        out.push_str(&format!("emax {}\n", self.entry_max));
        out.push_str(&format!("time {}\n", time));
        out.push_str(&format!("prev {}\n", self.previous.to_hex()));
        out.push_str(&format!("user {}\n", user));
        for e in &self.entries {
            out.push_str(&format!("entr {} {} {}\n", e.entry, e.revision, e.hash.to_hex()));
        }
        for a in &self.attachments {
            out.push_str(&format!("atch {} {} {}\n", a.entry, a.attach, a.hash.to_hex()));
        }
        Ok(out.into_bytes())
    }

    /// Decode canonical bytes. Strict; preserves list order.
    pub fn decode(bytes: &[u8], limits: &Limits) -> Result<Self, DecodeError> {
        let mut lines = Lines::new(bytes);

        let line = lines.next_line()?;
        let jacket = parse_hash(field(line, "jckt", lines.line_no())?, lines.line_no())?;
        let line = lines.next_line()?;
        let history = parse_positive(field(line, "hist", lines.line_no())?, lines.line_no())?;
        let line = lines.next_line()?;
        let entry_max = parse_decimal(field(line, "emax", lines.line_no())?, lines.line_no())?;

        let line = lines.next_line()?;
        let raw = field(line, "time", lines.line_no())?;
        let time = TimeStr::parse(raw).map_err(|e| DecodeError::FieldInvalid {
            line: lines.line_no(),
            field: "time",
            reason: e.reason.to_string(),
        })?;

        let line = lines.next_line()?;
        let previous = parse_hash(field(line, "prev", lines.line_no())?, lines.line_no())?;
        if history == 1 && !previous.is_zero() {
            return Err(DecodeError::Malformed {
                line: lines.line_no(),
                reason: "history #1 must have zero previous",
            });
        }

        let line = lines.next_line()?;
        let user = field(line, "user", lines.line_no())?;
        limits
            .check_user(user)
            .map_err(|e| DecodeError::FieldInvalid {
                line: lines.line_no(),
                field: "user",
                reason: e.reason,
            })?;
        let user = user.to_string();

        let mut entries: Vec<HistoryEntry> = Vec::new();
        while lines.peek_starts_with("entr ") {
            let line = lines.next_line()?;
            let rest = field(line, "entr", lines.line_no())?;
            let mut parts = rest.splitn(3, ' ');
            let (Some(e), Some(r), Some(h)) = (parts.next(), parts.next(), parts.next()) else {
                return Err(DecodeError::Malformed {
                    line: lines.line_no(),
                    reason: "entry line needs entry, revision, hash",
                });
            };
            let entry = parse_positive(e, lines.line_no())?;
            let revision = parse_positive(r, lines.line_no())?;
            let hash = parse_hash(h, lines.line_no())?;
            if entry > entry_max {
                return Err(DecodeError::Malformed {
                    line: lines.line_no(),
                    reason: "entry number exceeds emax",
                });
            }
            if entries.iter().any(|known| known.entry == entry) {
                return Err(DecodeError::Malformed {
                    line: lines.line_no(),
                    reason: "duplicate entry number",
                });
            }
            entries.push(HistoryEntry {
                entry,
                revision,
                hash,
            });
        }

        let mut attachments: Vec<HistoryAttach> = Vec::new();
        while lines.peek_starts_with("atch ") {
            let line = lines.next_line()?;
            let rest = field(line, "atch", lines.line_no())?;
            let mut parts = rest.splitn(3, ' ');
            let (Some(e), Some(a), Some(h)) = (parts.next(), parts.next(), parts.next()) else {
                return Err(DecodeError::Malformed {
                    line: lines.line_no(),
                    reason: "attachment line needs entry, attachment, hash",
                });
            };
            let entry = parse_positive(e, lines.line_no())?;
            let attach = parse_positive(a, lines.line_no())?;
            let hash = parse_hash(h, lines.line_no())?;
            if !entries.iter().any(|known| known.entry == entry) {
                return Err(DecodeError::Malformed {
                    line: lines.line_no(),
                    reason: "attachment references entry not in this record",
                });
            }
            if attachments
                .iter()
                .any(|known| known.entry == entry && known.attach == attach)
            {
                return Err(DecodeError::Malformed {
                    line: lines.line_no(),
                    reason: "duplicate attachment",
                });
            }
            attachments.push(HistoryAttach {
                entry,
                attach,
                hash,
            });
        }

        if !lines.at_end() {
            return Err(DecodeError::Malformed {
                line: lines.line_no() + 1,
                reason: "trailing bytes after record",
            });
        }

        Ok(Self {
            limits: limits.clone(),
            jacket: Some(jacket),
            history,
            entry_max,
            time: Some(time),
            previous,
            user: Some(user),
            entries,
            attachments,
            cached: Some((bytes.to_vec(), sha256_bytes(bytes))),
        })
    }
}

/// Logical equality: persisted fields only.
impl PartialEq for History {
    fn eq(&self, other: &Self) -> bool {
        self.jacket == other.jacket
            && self.history == other.history
            && self.entry_max == other.entry_max
            && self.time == other.time
            && self.previous == other.previous
            && self.user == other.user
            && self.entries == other.entries
            && self.attachments == other.attachments
    }
}

impl Eq for History {}
