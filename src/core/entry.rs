//! Entry records.
//!
//! An entry is a versioned record holding title, body, tags, and attachment
//! metadata. A record with no history number is a *draft*: it has no stable
//! hash and is never persisted. Finalizing a draft via [`Entry::update`]
//! binds it to the history record that carries it; any later mutation turns
//! it back into a draft at the next revision.

use std::collections::{BTreeMap, BTreeSet};

use super::codec::{Lines, field, parse_decimal, parse_hash, parse_positive};
use super::error::{CoreError, DecodeError, LimitViolation, RecordStateError};
use super::identity::{Sha256, sha256_bytes};
use super::limits::Limits;
use super::time::TimeStr;

/// Implicit tag tracking every live entry.
pub const TAG_ALL: &str = "_all";

/// Attachment slot tracked by an entry.
///
/// `history` is the history record that introduced the current content;
/// 0 marks a pending introduction that [`Entry::update`] rewrites.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub history: u64,
    pub name: String,
}

/// New or replaced attachment content leaving [`Entry::update`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileChange {
    pub bytes: Vec<u8>,
    pub hash: Sha256,
}

/// Change-set produced by finalizing a draft.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryChanges {
    pub time_changed: bool,
    pub tags_added: BTreeSet<String>,
    pub tags_removed: BTreeSet<String>,
    pub files: BTreeMap<u64, FileChange>,
}

/// A versioned record in a jacket.
#[derive(Clone, Debug)]
pub struct Entry {
    limits: Limits,
    jacket: Option<Sha256>,
    entry: Option<u64>,
    revision: u64,
    history: Option<u64>,
    attach_max: u64,
    time: Option<TimeStr>,
    title: Option<String>,
    body: Option<String>,
    tags: BTreeSet<String>,
    attachments: BTreeMap<u64, Attachment>,
    pending: BTreeMap<u64, Vec<u8>>,
    tags_added: BTreeSet<String>,
    tags_removed: BTreeSet<String>,
    time_dirty: bool,
    cached: Option<(Vec<u8>, Sha256)>,
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

impl Entry {
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self {
            limits,
            jacket: None,
            entry: None,
            revision: 1,
            history: None,
            attach_max: 0,
            time: None,
            title: None,
            body: None,
            tags: BTreeSet::new(),
            attachments: BTreeMap::new(),
            pending: BTreeMap::new(),
            tags_added: BTreeSet::new(),
            tags_removed: BTreeSet::new(),
            time_dirty: false,
            cached: None,
        }
    }

    pub fn jacket(&self) -> Option<&Sha256> {
        self.jacket.as_ref()
    }

    pub fn entry(&self) -> Option<u64> {
        self.entry
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn history(&self) -> Option<u64> {
        self.history
    }

    pub fn attach_max(&self) -> u64 {
        self.attach_max
    }

    pub fn time(&self) -> Option<&TimeStr> {
        self.time.as_ref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn attachments(&self) -> &BTreeMap<u64, Attachment> {
        &self.attachments
    }

    /// A draft has not been bound to a history record yet.
    pub fn is_draft(&self) -> bool {
        self.history.is_none()
    }

    /// Reopen a finalized record for editing.
    ///
    /// The first mutation after finalization bumps the revision; every
    /// mutation invalidates the cached canonical form.
    fn touch(&mut self) {
        if self.history.take().is_some() {
            self.revision += 1;
            self.tags_added.clear();
            self.tags_removed.clear();
            self.time_dirty = false;
        }
        self.cached = None;
    }

    /// Bind the entry to a jacket. Settable once; rebinding to the same hash
    /// is a no-op.
    pub fn set_jacket(&mut self, jacket: Sha256) -> Result<(), CoreError> {
        match self.jacket {
            Some(existing) if existing == jacket => Ok(()),
            Some(_) => Err(RecordStateError::AlreadySet { field: "jacket" }.into()),
            None => {
                self.touch();
                self.jacket = Some(jacket);
                Ok(())
            }
        }
    }

    /// Assign the entry number. Settable once.
    pub fn set_entry(&mut self, entry: u64) -> Result<(), CoreError> {
        if entry == 0 {
            return Err(LimitViolation::new("entry", "must be positive").into());
        }
        match self.entry {
            Some(existing) if existing == entry => Ok(()),
            Some(_) => Err(RecordStateError::AlreadySet { field: "entry" }.into()),
            None => {
                self.touch();
                self.entry = Some(entry);
                Ok(())
            }
        }
    }

    pub fn set_title(&mut self, title: &str) -> Result<(), CoreError> {
        self.limits.check_title(title)?;
        self.touch();
        self.title = Some(title.to_string());
        Ok(())
    }

    pub fn set_body(&mut self, body: &str) -> Result<(), CoreError> {
        self.limits.check_body(body)?;
        self.touch();
        self.body = Some(body.to_string());
        Ok(())
    }

    pub fn set_time(&mut self, time: TimeStr) {
        self.touch();
        if self.time.as_ref() != Some(&time) {
            self.time = Some(time);
            self.time_dirty = true;
        }
    }

    pub fn set_time_str(&mut self, raw: &str) -> Result<(), CoreError> {
        let time = TimeStr::parse(raw)
            .map_err(|e| LimitViolation::new("time", e.reason))?;
        self.set_time(time);
        Ok(())
    }

    /// Add a tag, normalizing `prefix:suffix` to `prefix: suffix`.
    ///
    /// Returns the normalized tag.
    pub fn add_tag(&mut self, tag: &str) -> Result<String, CoreError> {
        let tag = self.limits.check_tag(tag)?;
        self.touch();
        if self.tags.insert(tag.clone()) && !self.tags_removed.remove(&tag) {
            self.tags_added.insert(tag.clone());
        }
        Ok(tag)
    }

    /// Remove a tag (accepts unnormalized input). Returns whether it was set.
    pub fn remove_tag(&mut self, tag: &str) -> Result<bool, CoreError> {
        let tag = self.limits.check_tag(tag)?;
        self.touch();
        let removed = self.tags.remove(&tag);
        if removed && !self.tags_added.remove(&tag) {
            self.tags_removed.insert(tag);
        }
        Ok(removed)
    }

    /// Attach new content under the next attachment number.
    ///
    /// Numbers are never reused, even after deletion. The introduction
    /// history stays provisional (0) until [`Entry::update`].
    pub fn attach(&mut self, name: &str, bytes: Vec<u8>) -> Result<u64, CoreError> {
        self.limits.check_attach_name(name)?;
        self.touch();
        let attach = self.attach_max + 1;
        self.attach_max = attach;
        self.attachments.insert(
            attach,
            Attachment {
                history: 0,
                name: name.to_string(),
            },
        );
        self.pending.insert(attach, bytes);
        Ok(attach)
    }

    pub fn rename_attach(&mut self, attach: u64, name: &str) -> Result<(), CoreError> {
        self.limits.check_attach_name(name)?;
        if !self.attachments.contains_key(&attach) {
            return Err(RecordStateError::UnknownAttachment { attach }.into());
        }
        self.touch();
        if let Some(slot) = self.attachments.get_mut(&attach) {
            slot.name = name.to_string();
        }
        Ok(())
    }

    /// Replace an attachment's content. The introduction history resets to
    /// the next finalizing history; the previous blob stays reachable via
    /// the history chain.
    pub fn replace_attach(&mut self, attach: u64, bytes: Vec<u8>) -> Result<(), CoreError> {
        if !self.attachments.contains_key(&attach) {
            return Err(RecordStateError::UnknownAttachment { attach }.into());
        }
        self.touch();
        if let Some(slot) = self.attachments.get_mut(&attach) {
            slot.history = 0;
        }
        self.pending.insert(attach, bytes);
        Ok(())
    }

    pub fn delete_attach(&mut self, attach: u64) -> Result<(), CoreError> {
        if self.attachments.remove(&attach).is_none() {
            return Err(RecordStateError::UnknownAttachment { attach }.into());
        }
        self.touch();
        self.pending.remove(&attach);
        Ok(())
    }

    /// Finalize the draft into the given history record.
    ///
    /// Defaults the time to `default_time` when unset, rewrites provisional
    /// attachment introductions, and returns the change-set the jacket uses
    /// to drive persistence and the tag index.
    pub fn update(
        &mut self,
        history: u64,
        default_time: &TimeStr,
    ) -> Result<EntryChanges, CoreError> {
        if history == 0 {
            return Err(LimitViolation::new("history", "must be positive").into());
        }
        if self.jacket.is_none() {
            return Err(RecordStateError::NotSet { field: "jacket" }.into());
        }
        if self.entry.is_none() {
            return Err(RecordStateError::NotSet { field: "entry" }.into());
        }
        if self.title.is_none() {
            return Err(RecordStateError::NotSet { field: "title" }.into());
        }
        if self.body.is_none() {
            return Err(RecordStateError::NotSet { field: "body" }.into());
        }
        if self.time.is_none() {
            self.time = Some(default_time.clone());
            self.time_dirty = true;
        }

        let is_new = self.revision == 1;
        let time_changed = self.time_dirty || is_new;

        self.history = Some(history);
        for slot in self.attachments.values_mut() {
            if slot.history == 0 {
                slot.history = history;
            }
        }

        let mut files = BTreeMap::new();
        for (attach, bytes) in std::mem::take(&mut self.pending) {
            let hash = sha256_bytes(&bytes);
            files.insert(attach, FileChange { bytes, hash });
        }

        self.time_dirty = false;
        self.cached = None;

        Ok(EntryChanges {
            time_changed,
            tags_added: std::mem::take(&mut self.tags_added),
            tags_removed: std::mem::take(&mut self.tags_removed),
            files,
        })
    }

    /// Canonical bytes. Only valid once the record is finalized.
    pub fn canonical(&mut self) -> Result<&[u8], CoreError> {
        if self.cached.is_none() {
            let bytes = self.encode()?;
            let hash = sha256_bytes(&bytes);
            self.cached = Some((bytes, hash));
        }
        Ok(self.cached.as_ref().map(|(b, _)| b.as_slice()).unwrap_or(&[]))
    }

    /// `SHA256(canonical)`. Only valid once the record is finalized.
    pub fn hash(&mut self) -> Result<Sha256, CoreError> {
        self.canonical()?;
        match &self.cached {
            Some((_, hash)) => Ok(*hash),
            None => Err(RecordStateError::Draft.into()),
        }
    }

    fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let history = self.history.ok_or(RecordStateError::Draft)?;
        let jacket = self.jacket.ok_or(RecordStateError::NotSet { field: "jacket" })?;
        let entry = self.entry.ok_or(RecordStateError::NotSet { field: "entry" })?;
        let time = self
            .time
            .as_ref()
            .ok_or(RecordStateError::NotSet { field: "time" })?;
        let title = self
            .title
            .as_ref()
            .ok_or(RecordStateError::NotSet { field: "title" })?;
        let body = self
            .body
            .as_ref()
            .ok_or(RecordStateError::NotSet { field: "body" })?;

        let mut out = String::new();
        out.push_str(&format!("jckt {}\n", jacket.to_hex()));
        out.push_str(&format!("entr {}\n", entry));
        out.push_str(&format!("revn {}\n", self.revision));
        out.push_str(&format!("hist {}\n", history));
        out.push_str(&format!("amax {}\n", self.attach_max));
        out.push_str(&format!("time {}\n", time));
        out.push_str(&format!("titl {}\n", title));
        for tag in &self.tags {
            out.push_str(&format!("tags {}\n", tag));
        }
        for (attach, slot) in &self.attachments {
            out.push_str(&format!("atch {} {} {}\n", attach, slot.history, slot.name));
        }
        out.push('\n');
        out.push_str(body);
        Ok(out.into_bytes())
    }

    /// Decode canonical bytes into a finalized entry.
    ///
    /// Strict: field order, sort order, number formatting, and limits are
    /// all enforced, so `encode(decode(bytes)) == bytes` for accepted input.
    pub fn decode(bytes: &[u8], limits: &Limits) -> Result<Self, DecodeError> {
        let mut lines = Lines::new(bytes);

        let line = lines.next_line()?;
        let jacket = parse_hash(field(line, "jckt", lines.line_no())?, lines.line_no())?;
        let line = lines.next_line()?;
        let entry = parse_positive(field(line, "entr", lines.line_no())?, lines.line_no())?;
        let line = lines.next_line()?;
        let revision = parse_positive(field(line, "revn", lines.line_no())?, lines.line_no())?;
        let line = lines.next_line()?;
        let history = parse_positive(field(line, "hist", lines.line_no())?, lines.line_no())?;
        let line = lines.next_line()?;
        let attach_max = parse_decimal(field(line, "amax", lines.line_no())?, lines.line_no())?;

        let line = lines.next_line()?;
        let raw = field(line, "time", lines.line_no())?;
        let time = TimeStr::parse(raw).map_err(|e| DecodeError::FieldInvalid {
            line: lines.line_no(),
            field: "time",
            reason: e.reason.to_string(),
        })?;

        let line = lines.next_line()?;
        let title = field(line, "titl", lines.line_no())?;
        limits
            .check_title(title)
            .map_err(|e| DecodeError::FieldInvalid {
                line: lines.line_no(),
                field: "title",
                reason: e.reason,
            })?;
        let title = title.to_string();

        let mut tags = BTreeSet::new();
        let mut last_tag: Option<String> = None;
        while lines.peek_starts_with("tags ") {
            let line = lines.next_line()?;
            let raw = field(line, "tags", lines.line_no())?;
            let tag = limits
                .check_tag(raw)
                .map_err(|e| DecodeError::FieldInvalid {
                    line: lines.line_no(),
                    field: "tag",
                    reason: e.reason,
                })?;
            if tag != raw {
                return Err(DecodeError::Malformed {
                    line: lines.line_no(),
                    reason: "tag is not in normalized form",
                });
            }
            if last_tag.as_deref().is_some_and(|last| last >= raw) {
                return Err(DecodeError::Malformed {
                    line: lines.line_no(),
                    reason: "tags out of order",
                });
            }
            last_tag = Some(tag.clone());
            tags.insert(tag);
        }

        let mut attachments = BTreeMap::new();
        let mut last_attach = 0u64;
        while lines.peek_starts_with("atch ") {
            let line = lines.next_line()?;
            let rest = field(line, "atch", lines.line_no())?;
            let (anum_raw, rest) = rest.split_once(' ').ok_or(DecodeError::Malformed {
                line: lines.line_no(),
                reason: "attachment line needs number, history, name",
            })?;
            let (hnum_raw, name) = rest.split_once(' ').ok_or(DecodeError::Malformed {
                line: lines.line_no(),
                reason: "attachment line needs number, history, name",
            })?;
            let attach = parse_positive(anum_raw, lines.line_no())?;
            let introduced = parse_positive(hnum_raw, lines.line_no())?;
            limits
                .check_attach_name(name)
                .map_err(|e| DecodeError::FieldInvalid {
                    line: lines.line_no(),
                    field: "attachment name",
                    reason: e.reason,
                })?;
            if attach <= last_attach {
                return Err(DecodeError::Malformed {
                    line: lines.line_no(),
                    reason: "attachments out of order",
                });
            }
            last_attach = attach;
            attachments.insert(
                attach,
                Attachment {
                    history: introduced,
                    name: name.to_string(),
                },
            );
        }
        if last_attach > attach_max {
            return Err(DecodeError::Malformed {
                line: lines.line_no(),
                reason: "attachment number exceeds amax",
            });
        }

        let line = lines.next_line()?;
        if !line.is_empty() {
            return Err(DecodeError::Malformed {
                line: lines.line_no(),
                reason: "expected blank separator before body",
            });
        }

        let body_line = lines.line_no() + 1;
        let body = std::str::from_utf8(lines.remainder()).map_err(|_| DecodeError::NotUtf8)?;
        limits
            .check_body(body)
            .map_err(|e| DecodeError::FieldInvalid {
                line: body_line,
                field: "body",
                reason: e.reason,
            })?;

        Ok(Self {
            limits: limits.clone(),
            jacket: Some(jacket),
            entry: Some(entry),
            revision,
            history: Some(history),
            attach_max,
            time: Some(time),
            title: Some(title),
            body: Some(body.to_string()),
            tags,
            attachments,
            pending: BTreeMap::new(),
            tags_added: BTreeSet::new(),
            tags_removed: BTreeSet::new(),
            time_dirty: false,
            cached: Some((bytes.to_vec(), sha256_bytes(bytes))),
        })
    }
}

/// Logical equality: persisted fields only, not edit-session bookkeeping.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.jacket == other.jacket
            && self.entry == other.entry
            && self.revision == other.revision
            && self.history == other.history
            && self.attach_max == other.attach_max
            && self.time == other.time
            && self.title == other.title
            && self.body == other.body
            && self.tags == other.tags
            && self.attachments == other.attachments
    }
}

impl Eq for Entry {}

#[cfg(test)]
mod tests {
    use super::*;

    fn jacket_hash() -> Sha256 {
        sha256_bytes(b"demo")
    }

    fn time(raw: &str) -> TimeStr {
        TimeStr::parse(raw).unwrap()
    }

    fn draft() -> Entry {
        let mut entry = Entry::new();
        entry.set_jacket(jacket_hash()).unwrap();
        entry.set_entry(1).unwrap();
        entry.set_title("hello").unwrap();
        entry.set_body("world").unwrap();
        entry
    }

    #[test]
    fn draft_has_no_canonical_form() {
        let mut entry = draft();
        assert!(entry.is_draft());
        assert!(entry.hash().is_err());
    }

    #[test]
    fn update_finalizes_and_canonical_is_stable() {
        let now = time("2026-01-02 03:04:05");
        let mut entry = draft();
        entry.add_tag("a").unwrap();
        entry.add_tag("b:c").unwrap();
        let changes = entry.update(1, &now).unwrap();
        assert!(changes.time_changed);
        assert_eq!(
            changes.tags_added,
            BTreeSet::from(["a".to_string(), "b: c".to_string()])
        );

        let expect = format!(
            "jckt {}\nentr 1\nrevn 1\nhist 1\namax 0\ntime 2026-01-02 03:04:05\n\
             titl hello\ntags a\ntags b: c\n\nworld",
            jacket_hash().to_hex()
        );
        assert_eq!(entry.canonical().unwrap(), expect.as_bytes());
        let first = entry.hash().unwrap();
        assert_eq!(entry.hash().unwrap(), first);
    }

    #[test]
    fn mutation_reopens_at_next_revision() {
        let now = time("2026-01-02 03:04:05");
        let mut entry = draft();
        entry.update(1, &now).unwrap();
        assert_eq!(entry.revision(), 1);

        entry.set_title("hello again").unwrap();
        assert!(entry.is_draft());
        assert_eq!(entry.revision(), 2);
        assert!(entry.hash().is_err());

        let changes = entry.update(2, &now).unwrap();
        assert!(!changes.time_changed);
        assert!(changes.tags_added.is_empty());
    }

    #[test]
    fn tag_deltas_track_net_changes() {
        let now = time("2026-01-02 03:04:05");
        let mut entry = draft();
        entry.add_tag("x").unwrap();
        entry.update(1, &now).unwrap();

        entry.add_tag("y").unwrap();
        entry.remove_tag("x").unwrap();
        // Re-adding then removing within one edit nets out.
        entry.add_tag("z").unwrap();
        entry.remove_tag("z").unwrap();
        let changes = entry.update(2, &now).unwrap();
        assert_eq!(changes.tags_added, BTreeSet::from(["y".to_string()]));
        assert_eq!(changes.tags_removed, BTreeSet::from(["x".to_string()]));
    }

    #[test]
    fn attachment_numbers_are_never_reused() {
        let now = time("2026-01-02 03:04:05");
        let mut entry = draft();
        let a1 = entry.attach("one.txt", b"one".to_vec()).unwrap();
        let a2 = entry.attach("two.txt", b"two".to_vec()).unwrap();
        assert_eq!((a1, a2), (1, 2));
        entry.delete_attach(a1).unwrap();
        let a3 = entry.attach("three.txt", b"three".to_vec()).unwrap();
        assert_eq!(a3, 3);
        assert_eq!(entry.attach_max(), 3);

        let changes = entry.update(1, &now).unwrap();
        assert_eq!(
            changes.files.keys().copied().collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert_eq!(entry.attachments()[&2].history, 1);
    }

    #[test]
    fn replace_resets_introduction_history() {
        let now = time("2026-01-02 03:04:05");
        let mut entry = draft();
        entry.attach("doc.txt", b"v1".to_vec()).unwrap();
        entry.update(1, &now).unwrap();
        assert_eq!(entry.attachments()[&1].history, 1);

        entry.replace_attach(1, b"v2".to_vec()).unwrap();
        let changes = entry.update(2, &now).unwrap();
        assert_eq!(entry.attachments()[&1].history, 2);
        assert_eq!(changes.files[&1].hash, sha256_bytes(b"v2"));
    }

    #[test]
    fn canonical_roundtrip() {
        let now = time("2026-01-02 03:04:05");
        let mut entry = draft();
        entry.add_tag("alpha").unwrap();
        entry.attach("doc.txt", b"data".to_vec()).unwrap();
        entry.set_body("line one\nline two").unwrap();
        entry.update(7, &now).unwrap();

        let bytes = entry.canonical().unwrap().to_vec();
        let decoded = Entry::decode(&bytes, &Limits::default()).unwrap();
        assert_eq!(decoded, entry);
        let mut decoded = decoded;
        assert_eq!(decoded.canonical().unwrap(), bytes.as_slice());
    }

    #[test]
    fn decode_rejects_malformed_records() {
        let now = time("2026-01-02 03:04:05");
        let mut entry = draft();
        entry.add_tag("a").unwrap();
        entry.add_tag("b").unwrap();
        entry.update(1, &now).unwrap();
        let good = String::from_utf8(entry.canonical().unwrap().to_vec()).unwrap();

        // Reordered tag lines.
        let bad = good.replace("tags a\ntags b\n", "tags b\ntags a\n");
        assert!(Entry::decode(bad.as_bytes(), &Limits::default()).is_err());
        // Leading zero in a number.
        let bad = good.replace("entr 1\n", "entr 01\n");
        assert!(Entry::decode(bad.as_bytes(), &Limits::default()).is_err());
        // Missing blank separator.
        let bad = good.replacen("\n\n", "\n", 1);
        assert!(Entry::decode(bad.as_bytes(), &Limits::default()).is_err());
        // Truncated header.
        assert!(Entry::decode(b"jckt abc", &Limits::default()).is_err());
        // Unnormalized tag.
        let bad = good.replace("tags a\n", "tags x:y\n");
        assert!(Entry::decode(bad.as_bytes(), &Limits::default()).is_err());
    }

    #[test]
    fn set_entry_is_single_assignment() {
        let mut entry = Entry::new();
        entry.set_entry(4).unwrap();
        assert!(entry.set_entry(4).is_ok());
        assert!(entry.set_entry(5).is_err());
        assert!(Entry::new().set_entry(0).is_err());
    }
}
