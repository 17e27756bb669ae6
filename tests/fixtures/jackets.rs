#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use sgfa::{Entry, FixedClock, Jacket, JacketConfig, JacketOptions, TimeStr};

pub fn time(raw: &str) -> TimeStr {
    TimeStr::parse(raw).expect("fixture time")
}

/// Default fixture instant; explicit times in tests count up from here.
pub const T0: &str = "2026-01-02 03:04:05";

/// A jacket in a temp directory, opened with a pinned clock.
pub struct TempJacket {
    _temp: TempDir,
    root: PathBuf,
}

impl TempJacket {
    pub fn create(id_text: &str) -> (Self, Jacket) {
        Self::create_with_config(id_text, JacketConfig::default())
    }

    pub fn create_with_config(id_text: &str, config: JacketConfig) -> (Self, Jacket) {
        let temp = TempDir::new().expect("tempdir");
        let root = temp.path().join("jacket");
        let jacket = Jacket::create_with(&root, id_text, Self::options().config(config))
            .expect("create jacket");
        (Self { _temp: temp, root }, jacket)
    }

    pub fn reopen(&self) -> Jacket {
        Jacket::open_with(&self.root, Self::options()).expect("reopen jacket")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    fn options() -> JacketOptions {
        JacketOptions::new().clock(Box::new(FixedClock(time(T0))))
    }
}

/// Entry draft with title, body, and tags set.
pub fn draft(title: &str, body: &str, tags: &[&str]) -> Entry {
    let mut entry = Entry::new();
    entry.set_title(title).expect("fixture title");
    entry.set_body(body).expect("fixture body");
    for tag in tags {
        entry.add_tag(tag).expect("fixture tag");
    }
    entry
}

/// Snapshot every file in a directory as (relative name, bytes).
pub fn dir_snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).expect("read dir") {
        let entry = entry.expect("dir entry");
        let name = entry.file_name().to_string_lossy().into_owned();
        let bytes = std::fs::read(entry.path()).expect("read file");
        files.push((name, bytes));
    }
    files.sort();
    files
}
