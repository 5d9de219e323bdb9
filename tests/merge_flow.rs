mod support;

use forgekit::error::Error;
use forgekit::merge::MergeOutcome;
use forgekit::model::RequestStatus;
use forgekit::notify::NotifierRegistry;
use forgekit::service::{self, NewRequest};
use forgekit::store::Store;
use support::TestForge;

fn forge_with_project() -> (TestForge, Store, u64) {
    let forge = TestForge::init();
    let mut store = forge.store();
    forge.add_user(&mut store, "alice");
    forge.add_user(&mut store, "bob");
    let parent = service::create_project(&mut store, &forge.config, "demo", None, "alice")
        .expect("create project");
    (forge, store, parent)
}

fn open_request(
    forge: &TestForge,
    store: &mut Store,
    fork: u64,
    parent: u64,
    title: &str,
) -> forgekit::model::PullRequest {
    let mut notifiers = NotifierRegistry::new();
    service::create_pull_request(
        store,
        &forge.config,
        &mut notifiers,
        &NewRequest {
            source_project: fork,
            branch_from: "main",
            target_project: parent,
            branch: "main",
            title,
            user: "bob",
        },
    )
    .expect("create pull request")
}

#[test]
fn empty_target_single_commit_fast_forwards() {
    // Scenario: the target project has no commits at all; the fork carries
    // one commit adding `sources`.
    let (forge, mut store, parent) = forge_with_project();
    let fork = service::create_fork(&mut store, &forge.config, parent, "bob").expect("fork");
    let fork_repo = forge.open_code_repo(&store, fork);
    let c1 = forge.commit_file(&fork_repo, "main", "sources", "foo\n bar\n", "add sources");

    let request = open_request(&forge, &mut store, fork, parent, "test pull-request");
    assert_eq!(request.commit_start.as_deref(), Some(c1.to_string().as_str()));
    assert_eq!(request.commit_stop.as_deref(), Some(c1.to_string().as_str()));

    let mut notifiers = NotifierRegistry::new();
    let outcome =
        service::merge_pull_request(&mut store, &forge.config, &mut notifiers, &request.uid, "alice")
            .expect("merge");
    assert_eq!(outcome, MergeOutcome::FastForward(c1));
    assert_eq!(forge.branch_tip(&store, parent, "main"), Some(c1));
    assert_eq!(
        store.request(&request.uid).unwrap().status,
        RequestStatus::Merged
    );
}

#[test]
fn shared_root_fast_forwards_without_merge_commit() {
    // Scenario: target and fork share the root commit; the fork adds one
    // commit introducing `.gitignore`.
    let (forge, mut store, parent) = forge_with_project();
    let parent_repo = forge.open_code_repo(&store, parent);
    forge.commit_file(&parent_repo, "main", "sources", "foo\n bar\n", "add sources");

    let fork = service::create_fork(&mut store, &forge.config, parent, "bob").expect("fork");
    let fork_repo = forge.open_code_repo(&store, fork);
    let c2 = forge.commit_file(&fork_repo, "main", ".gitignore", "*~\n", "add gitignore");

    let request = open_request(&forge, &mut store, fork, parent, "ignore backups");
    assert_eq!(request.commit_stop.as_deref(), Some(c2.to_string().as_str()));
    assert_eq!(request.commit_start, request.commit_stop);

    let mut notifiers = NotifierRegistry::new();
    let outcome =
        service::merge_pull_request(&mut store, &forge.config, &mut notifiers, &request.uid, "alice")
            .expect("merge");
    assert_eq!(outcome, MergeOutcome::FastForward(c2));
    assert_eq!(forge.branch_tip(&store, parent, "main"), Some(c2));

    // fast-forward means no merge commit: the new tip is the fork commit
    let tip = parent_repo.find_commit(c2).unwrap();
    assert_eq!(tip.parent_count(), 1);
}

#[test]
fn conflicting_edits_abort_and_mutate_nothing() {
    // Scenario: target and fork both modify the same line of `sources` from
    // a shared ancestor.
    let (forge, mut store, parent) = forge_with_project();
    let parent_repo = forge.open_code_repo(&store, parent);
    forge.commit_file(&parent_repo, "main", "sources", "foo\n bar\n", "add sources");

    let fork = service::create_fork(&mut store, &forge.config, parent, "bob").expect("fork");
    let target_change = forge.commit_file(
        &parent_repo,
        "main",
        "sources",
        "foo\n bar\nbaz\n boose\n",
        "target extension",
    );
    let fork_repo = forge.open_code_repo(&store, fork);
    forge.commit_file(
        &fork_repo,
        "main",
        "sources",
        "foo\n bar\nbaz\n ",
        "fork extension",
    );

    let request = open_request(&forge, &mut store, fork, parent, "conflicting change");

    let mut notifiers = NotifierRegistry::new();
    let err =
        service::merge_pull_request(&mut store, &forge.config, &mut notifiers, &request.uid, "alice")
            .unwrap_err();
    assert!(matches!(err, Error::MergeConflict));
    assert_eq!(err.to_string(), "Merge conflicts!");

    // no partial mutation: the target ref and the request are untouched
    assert_eq!(forge.branch_tip(&store, parent, "main"), Some(target_change));
    assert_eq!(
        store.request(&request.uid).unwrap().status,
        RequestStatus::Open
    );
}

#[test]
fn forced_merge_commit_even_when_fast_forward_possible() {
    // Scenario: the project requires merge commits unconditionally.
    let (forge, mut store, parent) = forge_with_project();
    let parent_repo = forge.open_code_repo(&store, parent);
    let root = forge.commit_file(&parent_repo, "main", "sources", "foo\n bar\n", "add sources");
    store.project_mut(parent).unwrap().settings.require_merge_commit = true;
    store.save().unwrap();

    let fork = service::create_fork(&mut store, &forge.config, parent, "bob").expect("fork");
    let fork_repo = forge.open_code_repo(&store, fork);
    let ahead = forge.commit_file(&fork_repo, "main", ".gitignore", "*~\n", "add gitignore");

    let request = open_request(&forge, &mut store, fork, parent, "test pull-request");

    let mut notifiers = NotifierRegistry::new();
    let outcome =
        service::merge_pull_request(&mut store, &forge.config, &mut notifiers, &request.uid, "alice")
            .expect("merge");
    let merge_oid = match outcome {
        MergeOutcome::MergeCommitCreated(oid) => oid,
        other => panic!("expected a merge commit, got {other:?}"),
    };

    assert_eq!(forge.branch_tip(&store, parent, "main"), Some(merge_oid));
    let merge = parent_repo.find_commit(merge_oid).unwrap();
    assert_eq!(merge.parent_count(), 2);
    assert_eq!(merge.parent_id(0).unwrap(), root);
    assert_eq!(merge.parent_id(1).unwrap(), ahead);
    let message = merge.message().unwrap();
    assert!(message.contains(&format!("#{}", request.id)));
    assert!(message.contains("test pull-request"));
}

#[test]
fn merging_twice_is_idempotent() {
    let (forge, mut store, parent) = forge_with_project();
    let fork = service::create_fork(&mut store, &forge.config, parent, "bob").expect("fork");
    let fork_repo = forge.open_code_repo(&store, fork);
    let c1 = forge.commit_file(&fork_repo, "main", "sources", "foo\n", "add sources");

    let request = open_request(&forge, &mut store, fork, parent, "test pull-request");
    let mut notifiers = NotifierRegistry::new();
    service::merge_pull_request(&mut store, &forge.config, &mut notifiers, &request.uid, "alice")
        .expect("first merge");

    let again =
        service::merge_pull_request(&mut store, &forge.config, &mut notifiers, &request.uid, "alice")
            .expect("second merge");
    assert_eq!(again, MergeOutcome::AlreadyMerged);
    assert_eq!(forge.branch_tip(&store, parent, "main"), Some(c1));
    assert_eq!(
        store.request(&request.uid).unwrap().status,
        RequestStatus::Merged
    );
}

#[test]
fn merging_without_commit_access_is_denied() {
    let (forge, mut store, parent) = forge_with_project();
    forge.add_user(&mut store, "mallory");
    let fork = service::create_fork(&mut store, &forge.config, parent, "bob").expect("fork");
    let fork_repo = forge.open_code_repo(&store, fork);
    forge.commit_file(&fork_repo, "main", "sources", "foo\n", "add sources");

    let request = open_request(&forge, &mut store, fork, parent, "test pull-request");
    let mut notifiers = NotifierRegistry::new();
    let err = service::merge_pull_request(
        &mut store,
        &forge.config,
        &mut notifiers,
        &request.uid,
        "mallory",
    )
    .unwrap_err();
    assert!(matches!(err, Error::AccessDenied(_)));
    assert!(forge.branch_tip(&store, parent, "main").is_none());
}

#[test]
fn empty_fork_cannot_open_a_request() {
    let (forge, mut store, parent) = forge_with_project();
    let fork = service::create_fork(&mut store, &forge.config, parent, "bob").expect("fork");

    let mut notifiers = NotifierRegistry::new();
    let err = service::create_pull_request(
        &mut store,
        &forge.config,
        &mut notifiers,
        &NewRequest {
            source_project: fork,
            branch_from: "main",
            target_project: parent,
            branch: "main",
            title: "nothing here",
            user: "bob",
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::EmptyRepository(_)));
    assert!(store.requests().is_empty());
}

#[test]
fn fork_without_new_commits_cannot_open_a_request() {
    let (forge, mut store, parent) = forge_with_project();
    let parent_repo = forge.open_code_repo(&store, parent);
    forge.commit_file(&parent_repo, "main", "sources", "foo\n", "add sources");
    let fork = service::create_fork(&mut store, &forge.config, parent, "bob").expect("fork");

    let mut notifiers = NotifierRegistry::new();
    let err = service::create_pull_request(
        &mut store,
        &forge.config,
        &mut notifiers,
        &NewRequest {
            source_project: fork,
            branch_from: "main",
            target_project: parent,
            branch: "main",
            title: "no changes",
            user: "bob",
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn signed_off_enforcement_rejects_unsigned_commits() {
    let (forge, mut store, parent) = forge_with_project();
    store.project_mut(parent).unwrap().settings.enforce_signed_off = true;
    store.save().unwrap();

    let fork = service::create_fork(&mut store, &forge.config, parent, "bob").expect("fork");
    let fork_repo = forge.open_code_repo(&store, fork);
    forge.commit_file(&fork_repo, "main", "sources", "foo\n", "add sources");

    let request = open_request(&forge, &mut store, fork, parent, "unsigned work");
    let mut notifiers = NotifierRegistry::new();
    let err =
        service::merge_pull_request(&mut store, &forge.config, &mut notifiers, &request.uid, "alice")
            .unwrap_err();
    assert!(matches!(err, Error::SignedOffRequired));
    assert!(forge.branch_tip(&store, parent, "main").is_none());
}

#[test]
fn signed_off_enforcement_accepts_signed_series() {
    let (forge, mut store, parent) = forge_with_project();
    store.project_mut(parent).unwrap().settings.enforce_signed_off = true;
    store.save().unwrap();

    let fork = service::create_fork(&mut store, &forge.config, parent, "bob").expect("fork");
    let fork_repo = forge.open_code_repo(&store, fork);
    let c1 = forge.commit_file(
        &fork_repo,
        "main",
        "sources",
        "foo\n",
        "add sources\n\nSigned-off-by: Bob <bob@forge.example>",
    );

    let request = open_request(&forge, &mut store, fork, parent, "signed work");
    let mut notifiers = NotifierRegistry::new();
    let outcome =
        service::merge_pull_request(&mut store, &forge.config, &mut notifiers, &request.uid, "alice")
            .expect("merge");
    assert_eq!(outcome, MergeOutcome::FastForward(c1));
}
