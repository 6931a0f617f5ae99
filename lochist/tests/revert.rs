use lochist::{
    Cancellation, ChangeRange, ChangeSet, DifferenceReverter, FileSystemGateway, LocalHistory,
    MemoryFs, Revision, RevisionsCollector, SessionStamp, Timestamp,
};

fn history() -> LocalHistory {
    LocalHistory::temporary(SessionStamp(42)).unwrap()
}

/// Runs `edit` inside one recorded change-set.
fn recorded(
    history: &LocalHistory,
    fs: &mut MemoryFs,
    edit: impl FnOnce(&mut dyn FileSystemGateway),
) -> ChangeSet {
    history.begin_change_set();
    {
        let mut tracked = history.tracked(fs);
        edit(&mut tracked);
    }
    history.end_change_set(None).unwrap()
}

fn content(revision: &Revision) -> Option<&[u8]> {
    revision.entry().and_then(|e| e.content.as_deref())
}

/// `/a.txt` = "x", then "y", then renamed to `/b.txt`.
fn scenario(history: &LocalHistory, fs: &mut MemoryFs) -> [ChangeSet; 3] {
    let created = recorded(history, fs, |g| {
        g.find_or_create("/a.txt", false).unwrap();
        g.set_content("/a.txt", b"x", Timestamp(1)).unwrap();
    });
    let modified = recorded(history, fs, |g| {
        g.set_content("/a.txt", b"y", Timestamp(2)).unwrap();
    });
    let renamed = recorded(history, fs, |g| {
        g.rename("/a.txt", "b.txt").unwrap();
    });
    [created, modified, renamed]
}

#[test]
fn revisions_follow_renames() {
    let history = history();
    let mut fs = MemoryFs::new();
    let [created, modified, renamed] = scenario(&history, &mut fs);

    let revisions = RevisionsCollector::new(&history, "/b.txt")
        .collect(&fs)
        .unwrap();
    assert_eq!(revisions.len(), 4);

    assert!(matches!(revisions[0], Revision::Current(_)));
    assert_eq!(revisions[0].path(), "/b.txt");
    assert_eq!(content(&revisions[0]), Some(&b"y"[..]));

    let ids: Vec<_> = revisions[1..]
        .iter()
        .map(|r| r.change_set().unwrap().id())
        .collect();
    assert_eq!(ids, vec![renamed.id(), modified.id(), created.id()]);

    assert_eq!(revisions[1].path(), "/b.txt");
    assert_eq!(revisions[2].path(), "/a.txt");
    assert_eq!(content(&revisions[2]), Some(&b"y"[..]));
    assert_eq!(revisions[3].path(), "/a.txt");
    assert_eq!(content(&revisions[3]), Some(&b"x"[..]));
}

#[test]
fn reverting_everything_leaves_nothing() {
    let history = history();
    let mut fs = MemoryFs::new();
    let [created, _, renamed] = scenario(&history, &mut fs);

    ChangeRange::new(created.id(), renamed.id())
        .revert(&history, &mut fs, &Cancellation::new())
        .unwrap();
    assert!(!fs.exists("/a.txt"));
    assert!(!fs.exists("/b.txt"));
}

#[test]
fn revert_round_trip_restores_the_tree() {
    let history = history();
    let mut fs = MemoryFs::new();
    fs.write("/keep/readme", b"hello").unwrap();
    fs.write("/src/lib.rs", b"fn a() {}").unwrap();
    fs.write("/src/old.rs", b"old").unwrap();
    let before = fs.tree();

    let first = recorded(&history, &mut fs, |g| {
        g.set_content("/src/lib.rs", b"fn b() {}", Timestamp(10)).unwrap();
        g.delete("/src/old.rs").unwrap();
        g.find_or_create("/src/new/mod.rs", false).unwrap();
    });
    let last = recorded(&history, &mut fs, |g| {
        g.rename("/src", "source").unwrap();
        g.delete("/keep").unwrap();
    });
    assert_ne!(fs.tree(), before);

    let undo = ChangeRange::new(first.id(), last.id())
        .revert(&history, &mut fs, &Cancellation::new())
        .unwrap();
    assert_eq!(fs.tree(), before);

    let after_undo = fs.tree();
    ChangeRange::new(first.id(), last.id())
        .revert(&history, &mut fs, &Cancellation::new())
        .unwrap();
    assert_eq!(fs.tree(), after_undo, "reverting twice is a no-op");

    undo.revert(&history, &mut fs, &Cancellation::new()).unwrap();
    assert!(fs.exists("/source/new/mod.rs"));
    assert!(!fs.exists("/keep"));
    assert_eq!(fs.read("/source/lib.rs"), Some(&b"fn b() {}"[..]));
}

#[test]
fn revert_is_recorded_as_one_change_set() {
    let history = history();
    let mut fs = MemoryFs::new();
    let [created, _, renamed] = scenario(&history, &mut fs);
    let range = ChangeRange::new(created.id(), renamed.id());

    let undo = range.revert(&history, &mut fs, &Cancellation::new()).unwrap();
    assert_eq!(undo.from, undo.to);
    assert!(undo.from > renamed.id());
    let recorded = history.find_change_set(undo.from).unwrap();
    assert_eq!(recorded.name(), Some(format!("Revert {range}").as_str()));
}

#[test]
fn difference_reverter_restores_an_old_revision() {
    let history = history();
    let mut fs = MemoryFs::new();
    recorded(&history, &mut fs, |g| {
        g.find_or_create("/dir/a", false).unwrap();
        g.set_content("/dir/a", b"1", Timestamp(1)).unwrap();
        g.find_or_create("/dir/gone", false).unwrap();
        g.set_content("/dir/gone", b"g", Timestamp(1)).unwrap();
    });
    recorded(&history, &mut fs, |g| {
        g.set_content("/dir/a", b"2", Timestamp(2)).unwrap();
        g.delete("/dir/gone").unwrap();
        g.find_or_create("/dir/extra/file", false).unwrap();
        g.rename("/dir", "renamed").unwrap();
    });

    let revisions = RevisionsCollector::new(&history, "/renamed")
        .collect(&fs)
        .unwrap();
    let current = &revisions[0];
    let oldest = revisions.last().unwrap();
    assert_eq!(oldest.path(), "/dir");

    let differences = oldest.differences_from(current);
    DifferenceReverter::new(&history, differences)
        .named("Revert to first version")
        .revert(&mut fs, true)
        .unwrap();

    assert_eq!(fs.paths(), vec!["/dir", "/dir/a", "/dir/gone"]);
    assert_eq!(fs.read("/dir/a"), Some(&b"1"[..]));
    assert_eq!(fs.read("/dir/gone"), Some(&b"g"[..]));
    let newest = history.change_sets().next().unwrap();
    assert_eq!(newest.name(), Some("Revert to first version"));
}

#[test]
fn name_filter_limits_revisions() {
    let history = history();
    let mut fs = MemoryFs::new();
    history.begin_change_set();
    history
        .tracked(&mut fs)
        .write("/f", b"1", Timestamp(1))
        .unwrap();
    history.end_change_set(Some("Initial import"));
    history.begin_change_set();
    history
        .tracked(&mut fs)
        .write("/f", b"2", Timestamp(2))
        .unwrap();
    history.end_change_set(Some("tweak"));

    let revisions = RevisionsCollector::new(&history, "/f")
        .filtered("IMPORT")
        .collect(&fs)
        .unwrap();
    assert_eq!(revisions.len(), 2);
    assert_eq!(
        revisions[1].change_set().unwrap().name(),
        Some("Initial import")
    );
    assert_eq!(content(&revisions[1]), Some(&b"1"[..]));
}
