//! End-to-end filing scenarios: write, read, conflict, and tag behavior.

mod fixtures;

use std::io::Read as _;

use fixtures::jackets::{TempJacket, draft, time};
use sgfa::ErrorKind;

#[test]
fn create_write_read() {
    let (_temp, mut jacket) = TempJacket::create("demo");
    let outcome = jacket
        .write(
            "alice",
            vec![draft("hello", "world", &["a", "b: c"])],
            Some(time("2026-01-02 03:04:05")),
        )
        .unwrap();
    assert_eq!(outcome.history, 1);
    assert_eq!(outcome.entries[0].entry(), Some(1));
    assert_eq!(outcome.entries[0].revision(), 1);

    let entry = jacket.read_entry(1, 0).unwrap();
    assert_eq!(entry.title(), Some("hello"));
    assert_eq!(entry.body(), Some("world"));
    assert!(entry.has_tag("b: c"));

    let all = jacket.read_tag("_all", 0, 10).unwrap();
    assert_eq!(all.total, 1);
    assert_eq!(all.entries[0].1, 1);

    assert_eq!(jacket.read_tag("b: c", 0, 10).unwrap().total, 1);
    // Queries normalize colon tags too.
    assert_eq!(jacket.read_tag("b:c", 0, 10).unwrap().total, 1);

    assert_eq!(jacket.read_list().unwrap(), vec!["_all", "a", "b: c"]);
}

#[test]
fn history_one_hash_is_stable() {
    let at = Some(time("2026-01-02 03:04:05"));
    let (_t1, mut first) = TempJacket::create("demo");
    first
        .write("alice", vec![draft("hello", "world", &["a"])], at.clone())
        .unwrap();
    let (_t2, mut second) = TempJacket::create("demo");
    second
        .write("alice", vec![draft("hello", "world", &["a"])], at)
        .unwrap();

    let mut a = first.read_history(1).unwrap();
    let mut b = second.read_history(1).unwrap();
    assert!(a.previous().is_zero());
    assert_eq!(a.hash().unwrap(), b.hash().unwrap());
}

#[test]
fn revision_conflict_leaves_state_unchanged() {
    let (_temp, mut jacket) = TempJacket::create("demo");
    jacket
        .write(
            "alice",
            vec![draft("hello", "world", &[])],
            Some(time("2026-01-02 03:04:05")),
        )
        .unwrap();

    // Two writers independently load revision 1.
    let mut first = jacket.read_entry(1, 0).unwrap();
    let mut second = jacket.read_entry(1, 0).unwrap();
    first.set_body("first wins").unwrap();
    second.set_body("second loses").unwrap();

    jacket
        .write("alice", vec![first], Some(time("2026-01-02 03:04:06")))
        .unwrap();
    let err = jacket
        .write("bob", vec![second], Some(time("2026-01-02 03:04:07")))
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Conflict));

    let current = jacket.read_entry(1, 0).unwrap();
    assert_eq!(current.body(), Some("first wins"));
    assert_eq!(current.revision(), 2);
    assert_eq!(jacket.read_history(0).unwrap().number(), 2);
}

#[test]
fn tag_move_between_revisions() {
    let (_temp, mut jacket) = TempJacket::create("demo");
    jacket
        .write(
            "alice",
            vec![draft("entry", "body", &["x"])],
            Some(time("2026-01-02 03:04:05")),
        )
        .unwrap();

    let mut entry = jacket.read_entry(1, 0).unwrap();
    entry.remove_tag("x").unwrap();
    entry.add_tag("y").unwrap();
    jacket
        .write("alice", vec![entry], Some(time("2026-01-02 03:04:06")))
        .unwrap();

    assert_eq!(jacket.read_tag("x", 0, 10).unwrap().total, 0);
    let y = jacket.read_tag("y", 0, 10).unwrap();
    assert_eq!(y.total, 1);
    assert_eq!(y.entries[0].1, 1);
    assert_eq!(jacket.read_tag("_all", 0, 10).unwrap().total, 1);
    // The emptied tag leaves the directory entirely.
    assert_eq!(jacket.read_list().unwrap(), vec!["_all", "y"]);
}

#[test]
fn new_entries_number_sequentially() {
    let (_temp, mut jacket) = TempJacket::create("demo");
    let first = jacket
        .write(
            "alice",
            vec![draft("one", "body", &[]), draft("two", "body", &[])],
            Some(time("2026-01-02 03:04:05")),
        )
        .unwrap();
    assert_eq!(
        first.entries.iter().map(|e| e.entry()).collect::<Vec<_>>(),
        vec![Some(1), Some(2)]
    );

    let second = jacket
        .write(
            "bob",
            vec![draft("three", "body", &[])],
            Some(time("2026-01-02 03:04:06")),
        )
        .unwrap();
    assert_eq!(second.entries[0].entry(), Some(3));
    assert_eq!(second.entries[0].revision(), 1);
    assert_eq!(second.history, 2);
}

#[test]
fn tag_windowing_pages_newest_first() {
    let (_temp, mut jacket) = TempJacket::create("demo");
    for i in 1..=5u64 {
        jacket
            .write(
                "alice",
                vec![draft(&format!("entry {i}"), "body", &["t"])],
                Some(time(&format!("2026-01-02 03:04:{:02}", i))),
            )
            .unwrap();
    }

    let page = jacket.read_tag("t", 0, 2).unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.entries.iter().map(|(_, e)| *e).collect::<Vec<_>>(), vec![5, 4]);

    let page = jacket.read_tag("t", 2, 2).unwrap();
    assert_eq!(page.entries.iter().map(|(_, e)| *e).collect::<Vec<_>>(), vec![3, 2]);

    // Last page comes up short.
    let page = jacket.read_tag("t", 4, 2).unwrap();
    assert_eq!(page.entries.iter().map(|(_, e)| *e).collect::<Vec<_>>(), vec![1]);

    let page = jacket.read_tag("t", 5, 2).unwrap();
    assert!(page.entries.is_empty());
}

#[test]
fn zero_max_falls_back_to_configured_page_size() {
    let mut config = sgfa::JacketConfig::default();
    config.default_tag_page = 2;
    let (_temp, mut jacket) = TempJacket::create_with_config("demo", config);
    for i in 1..=3u64 {
        jacket
            .write(
                "alice",
                vec![draft(&format!("entry {i}"), "body", &["t"])],
                Some(time(&format!("2026-01-02 03:04:{:02}", i))),
            )
            .unwrap();
    }

    let page = jacket.read_tag("t", 0, 0).unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.entries.iter().map(|(_, e)| *e).collect::<Vec<_>>(), vec![3, 2]);
}

#[test]
fn attachments_roundtrip_and_history_pins_old_content() {
    let (_temp, mut jacket) = TempJacket::create("demo");
    let mut entry = draft("docs", "body", &[]);
    entry.attach("doc.txt", b"version one".to_vec()).unwrap();
    jacket
        .write("alice", vec![entry], Some(time("2026-01-02 03:04:05")))
        .unwrap();

    let mut blob = Vec::new();
    jacket
        .read_attach(1, 1, 1)
        .unwrap()
        .read_to_end(&mut blob)
        .unwrap();
    assert_eq!(blob, b"version one");

    let mut entry = jacket.read_entry(1, 0).unwrap();
    entry.replace_attach(1, b"version two".to_vec()).unwrap();
    jacket
        .write("alice", vec![entry], Some(time("2026-01-02 03:04:06")))
        .unwrap();

    let current = jacket.read_entry(1, 0).unwrap();
    assert_eq!(current.attachments()[&1].history, 2);

    let mut blob = Vec::new();
    jacket
        .read_attach(1, 1, 2)
        .unwrap()
        .read_to_end(&mut blob)
        .unwrap();
    assert_eq!(blob, b"version two");

    // The superseded blob stays reachable through the older history.
    let mut blob = Vec::new();
    jacket
        .read_attach(1, 1, 1)
        .unwrap()
        .read_to_end(&mut blob)
        .unwrap();
    assert_eq!(blob, b"version one");
}

#[test]
fn reading_missing_entries_reports_non_existent() {
    let (_temp, mut jacket) = TempJacket::create("demo");
    assert_eq!(
        jacket.read_entry(1, 0).unwrap_err().kind(),
        Some(ErrorKind::NonExistent)
    );
    assert_eq!(
        jacket.read_history(5).unwrap_err().kind(),
        Some(ErrorKind::NonExistent)
    );

    jacket
        .write(
            "alice",
            vec![draft("hello", "world", &[])],
            Some(time("2026-01-02 03:04:05")),
        )
        .unwrap();
    // A specific prior revision that was never written is NonExistent.
    assert_eq!(
        jacket.read_entry(1, 9).unwrap_err().kind(),
        Some(ErrorKind::NonExistent)
    );
}

#[test]
fn reopened_jacket_sees_persisted_writes() {
    let (temp, mut jacket) = TempJacket::create("demo");
    jacket
        .write(
            "alice",
            vec![draft("hello", "world", &["a"])],
            Some(time("2026-01-02 03:04:05")),
        )
        .unwrap();
    jacket.close().unwrap();

    let mut reopened = temp.reopen();
    assert_eq!(reopened.read_entry(1, 0).unwrap().title(), Some("hello"));
    assert_eq!(reopened.read_tag("a", 0, 10).unwrap().total, 1);
}
