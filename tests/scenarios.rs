//! End-to-end scenarios over the session API.

use std::collections::HashSet;
use std::thread;

use tablevc::catalog::{Column, DataType, Row, Schema, SchemaBuilder, Tag, Value};
use tablevc::diff::{DiffType, RowDiff, TableChange};
use tablevc::merge::Resolution;
use tablevc::session::{
    CommitOptions, ErrorKind, MergeOptions, MergeStatus, Repository, RepositoryConfig, Session, SessionError,
};
use tablevc::storage::{BranchName, RefManager, TableName};
use tablevc::warnings::Warnings;

// =============================================================================
// Helpers
// =============================================================================

fn t() -> TableName {
    TableName::new("t").unwrap()
}

fn schema() -> Schema {
    // fixed tags, so every call describes the same columns
    SchemaBuilder::new()
        .column(Column::with_tag(Tag::new(1), "pk", DataType::Int))
        .column(Column::with_tag(Tag::new(2), "c", DataType::Int))
        .primary_key("pk")
        .build()
        .unwrap()
}

fn row(pk: i64, c: i64) -> Row {
    schema().row([("pk", pk), ("c", c)]).unwrap()
}

fn c_of(session: &Session, pk: i64) -> Option<Value> {
    let table = session.table(&t()).unwrap();
    table
        .get(&[Value::Int(pk)])
        .unwrap()
        .map(|r| r.get_by_name(table.schema(), "c").clone())
}

/// Repository whose main branch holds t = {(1, 1)}, plus a `dev` branch at
/// the same commit.
fn setup(config: RepositoryConfig) -> (Repository, Session, Session) {
    let repo = Repository::open(config).unwrap();
    let main = repo.default_session().unwrap();
    main.create_table(&t(), schema()).unwrap();
    main.insert(&t(), &[row(1, 1)]).unwrap();
    main.commit_all("base", CommitOptions::new()).unwrap();
    let dev = BranchName::new("dev").unwrap();
    repo.create_branch(&dev, "main").unwrap();
    let dev = repo.session(&dev).unwrap();
    (repo, main, dev)
}

// =============================================================================
// Numbered scenarios
// =============================================================================

#[test]
fn scenario_conflicting_updates_report_one_conflict() {
    let (_repo, main, dev) = setup(RepositoryConfig::in_memory());
    main.update(&t(), &[row(1, 2)]).unwrap();
    main.commit_all("c = 2", CommitOptions::new()).unwrap();
    dev.update(&t(), &[row(1, 3)]).unwrap();
    dev.commit_all("c = 3", CommitOptions::new()).unwrap();

    let MergeStatus::Merging(report) = main.begin_merge("dev", MergeOptions::new()).unwrap() else {
        panic!("expected a merge in progress");
    };
    assert_eq!(report.conflicts, 1);

    let conflicts = main.conflicts(Some(&t())).unwrap();
    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.key, vec![Value::Int(1)]);
    assert_eq!(conflict.base, Some(row(1, 1)));
    assert_eq!(conflict.ours, Some(row(1, 2)));
    assert_eq!(conflict.theirs, Some(row(1, 3)));
    // the candidate keeps the base value
    assert_eq!(c_of(&main, 1), Some(Value::Int(1)));
}

#[test]
fn scenario_dropped_and_recreated_column_is_not_modified() {
    let (_repo, main, _dev) = setup(RepositoryConfig::in_memory());
    main.drop_column(&t(), "c").unwrap();
    main.commit_all("drop c", CommitOptions::new()).unwrap();
    main.add_column(&t(), Column::new("c", DataType::Int)).unwrap();
    main.commit_all("add c", CommitOptions::new()).unwrap();

    let delta = main.diff(&t(), "HEAD~2", "HEAD", true).unwrap();
    let c_columns: Vec<_> = delta.mapping().columns().iter().filter(|c| c.name() == "c").collect();
    assert_eq!(c_columns.len(), 2);
    assert!(c_columns.iter().all(|c| !c.is_matched()));

    let diffs: Vec<RowDiff> = delta.row_diffs().unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(diffs.len(), 1);
    let projected = delta.project(&diffs[0], &mut Warnings::new());
    // new c: null on both sides; old c: removed value on the from side only
    assert_eq!(projected.to, vec![Value::Int(1), Value::Null, Value::Null]);
    assert_eq!(projected.from, vec![Value::Int(1), Value::Null, Value::Int(1)]);
}

#[test]
fn scenario_fast_forward_has_no_conflicts() {
    let (_repo, main, dev) = setup(RepositoryConfig::in_memory());
    dev.update(&t(), &[row(1, 7)]).unwrap();
    dev.insert(&t(), &[row(2, 2)]).unwrap();
    let tip = dev.commit_all("dev work", CommitOptions::new()).unwrap();

    match main.begin_merge("dev", MergeOptions::new()).unwrap() {
        MergeStatus::FastForward { commit } => assert_eq!(commit, tip),
        other => panic!("expected fast-forward, got {:?}", other),
    }
    assert_eq!(main.head().unwrap(), tip);
    assert!(main.conflicts(None).unwrap().is_empty());
    assert_eq!(c_of(&main, 1), Some(Value::Int(7)));
}

/// Without a merge base, comparing two diverged branches directly reports
/// what differs between their tips, not what each side did. A row deleted
/// on one branch looks like a plain removal, and a table both branches
/// created under one name is unrelated content.
#[test]
fn scenario_two_way_diff_across_branches() {
    let (_repo, main, dev) = setup(RepositoryConfig::in_memory());
    main.delete_keys(&t(), &[vec![Value::Int(1)]]).unwrap();
    main.commit_all("delete 1", CommitOptions::new()).unwrap();

    let u = TableName::new("u").unwrap();
    main.create_table(&u, schema()).unwrap();
    main.insert(&u, &[row(1, 1)]).unwrap();
    main.commit_all("u on main", CommitOptions::new()).unwrap();
    dev.create_table(&u, schema()).unwrap();
    dev.insert(&u, &[row(1, 1)]).unwrap();
    dev.commit_all("u on dev", CommitOptions::new()).unwrap();

    let t_delta = main.diff(&t(), "dev", "main", false).unwrap();
    let kinds: Vec<DiffType> = t_delta.row_diffs().unwrap().map(|d| d.unwrap().diff_type()).collect();
    assert_eq!(kinds, vec![DiffType::Removed]);

    let u_delta = main.diff(&u, "dev", "main", false).unwrap();
    assert_eq!(u_delta.change(), TableChange::Replaced);
    let kinds: HashSet<DiffType> = u_delta.row_diffs().unwrap().map(|d| d.unwrap().diff_type()).collect();
    assert_eq!(kinds, HashSet::from([DiffType::Removed, DiffType::Added]));

    // the branches are not ordered, so a strict diff is refused
    let err = main.diff(&t(), "dev", "main", true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAncestry);
}

// =============================================================================
// Workflow
// =============================================================================

#[test]
fn staging_commits_only_added_tables() {
    let (_repo, main, _dev) = setup(RepositoryConfig::in_memory());
    let u = TableName::new("u").unwrap();
    main.create_table(&u, schema()).unwrap();
    main.update(&t(), &[row(1, 5)]).unwrap();

    main.add(&[u.clone()]).unwrap();
    let commit = main.commit("add u", CommitOptions::new()).unwrap();
    let committed = main.repository().root_of(commit).unwrap();
    assert!(committed.contains(&u));

    let status = main.status().unwrap();
    assert!(status.staged.is_empty());
    assert_eq!(status.unstaged.len(), 1);
    assert_eq!(status.unstaged[0].table, t());
    assert_eq!(c_of(&main, 1), Some(Value::Int(5)));
}

#[test]
fn checkout_refuses_uncommitted_changes() {
    let (_repo, mut main, _dev) = setup(RepositoryConfig::in_memory());
    main.insert(&t(), &[row(2, 2)]).unwrap();
    let dev = BranchName::new("dev").unwrap();
    assert!(matches!(main.checkout(&dev), Err(SessionError::UncommittedChanges(_))));

    main.commit_all("row 2", CommitOptions::new()).unwrap();
    main.checkout(&dev).unwrap();
    assert_eq!(main.branch(), &dev);
    assert_eq!(c_of(&main, 2), None);
}

#[test]
fn abort_then_resolve_and_commit() {
    let (repo, main, dev) = setup(RepositoryConfig::in_memory());
    main.update(&t(), &[row(1, 2)]).unwrap();
    main.insert(&t(), &[row(5, 5)]).unwrap();
    let ours = main.commit_all("ours", CommitOptions::new()).unwrap();
    dev.update(&t(), &[row(1, 3)]).unwrap();
    dev.insert(&t(), &[row(6, 6)]).unwrap();
    let theirs = dev.commit_all("theirs", CommitOptions::new()).unwrap();

    main.begin_merge("dev", MergeOptions::new()).unwrap();
    main.abort_merge().unwrap();
    assert!(main.status().unwrap().is_clean());
    assert_eq!(c_of(&main, 6), None);

    main.begin_merge("dev", MergeOptions::new()).unwrap();
    assert!(main.status().unwrap().conflicts.contains(&t()));
    // the non-conflicting insert from theirs is already merged
    assert_eq!(c_of(&main, 6), Some(Value::Int(6)));

    main.resolve_conflict(&t(), &[Value::Int(1)], Resolution::Ours).unwrap();
    let merge = main.commit("", CommitOptions::new()).unwrap();
    let commit = repo.graph().commit(merge).unwrap();
    assert_eq!(commit.parents, vec![ours, theirs]);
    assert_eq!(c_of(&main, 1), Some(Value::Int(2)));
    assert!(repo.graph().is_ancestor(theirs, main.head().unwrap()).unwrap());
}

#[test]
fn deleting_conflicts_keeps_the_candidate() {
    let (_repo, main, dev) = setup(RepositoryConfig::in_memory());
    main.update(&t(), &[row(1, 2)]).unwrap();
    main.commit_all("ours", CommitOptions::new()).unwrap();
    dev.delete_keys(&t(), &[vec![Value::Int(1)]]).unwrap();
    dev.commit_all("theirs", CommitOptions::new()).unwrap();

    main.begin_merge("dev", MergeOptions::new()).unwrap();
    let conflicts = main.conflicts(None).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].theirs, None);

    assert_eq!(main.delete_conflicts(&t()).unwrap(), 1);
    main.commit("keep base", CommitOptions::new()).unwrap();
    assert_eq!(c_of(&main, 1), Some(Value::Int(1)));
}

#[test]
fn git_backed_repository_persists_merges() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("data.git");
    let head = {
        let (_repo, main, dev) = setup(RepositoryConfig::new(&path));
        dev.insert(&t(), &[row(2, 2)]).unwrap();
        dev.commit_all("dev", CommitOptions::new()).unwrap();
        main.insert(&t(), &[row(3, 3)]).unwrap();
        main.commit_all("main", CommitOptions::new()).unwrap();
        main.begin_merge("dev", MergeOptions::new()).unwrap();
        main.commit("", CommitOptions::new()).unwrap()
    };

    let repo = Repository::open(RepositoryConfig::new(&path).create_if_missing(false)).unwrap();
    let main = repo.default_session().unwrap();
    assert_eq!(main.head().unwrap(), head);
    assert_eq!(main.table(&t()).unwrap().row_count().unwrap(), 3);
    assert_eq!(main.log("HEAD").unwrap().len(), 5);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn concurrent_writers_do_not_lose_updates() {
    let (repo, _main, _dev) = setup(RepositoryConfig::in_memory());
    let writers: Vec<_> = (0..4i64)
        .map(|w| {
            let session = repo.default_session().unwrap();
            thread::spawn(move || {
                for i in 0..10i64 {
                    let pk = 100 + w * 10 + i;
                    loop {
                        match session.insert(&t(), &[row(pk, w)]) {
                            Ok(_) => break,
                            Err(e) if e.is_retriable() => continue,
                            Err(e) => panic!("insert failed: {}", e),
                        }
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let main = repo.default_session().unwrap();
    assert_eq!(main.table(&t()).unwrap().row_count().unwrap(), 41);
}

#[test]
fn stale_branch_update_is_rejected() {
    let (repo, main, _dev) = setup(RepositoryConfig::in_memory());
    let stale = main.head().unwrap();
    main.commit("empty", CommitOptions::new().allow_empty(true)).unwrap();

    let err = RefManager::update_branch_if_unchanged(repo.store().refs(), main.branch(), stale, stale).unwrap_err();
    assert!(err.is_retriable());
    assert_eq!(SessionError::from(err).kind(), ErrorKind::ConcurrentUpdate);
    assert_ne!(main.head().unwrap(), stale);
}
