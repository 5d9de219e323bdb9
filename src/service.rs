//! Service-layer operations over the forge.
//!
//! Plain functions over domain values plus an explicit persistence handle:
//! no request-scoped globals, so the same operations serve a CLI, an HTTP
//! handler, or a git hook. Each mutating operation saves the store itself and
//! emits its notification events through the registry it is handed.

use git2::Oid;
use tracing::info;
use uuid::Uuid;

use crate::acl;
use crate::config::Config;
use crate::diff;
use crate::error::{Error, Result};
use crate::locator::{self, RepoRoot};
use crate::merge::{self, MergeContext, MergeOutcome};
use crate::model::{MergeReadiness, Project, PullRequest, RequestStatus};
use crate::notify::{Event, EventKind, NotifierRegistry};
use crate::range::{self, CommitMeta};
use crate::request;
use crate::store::Store;

/// Register a top-level project: state entry, bare repositories for every
/// root, and a fresh ACL generation so the SSH layer learns about it.
pub fn create_project(
    store: &mut Store,
    config: &Config,
    name: &str,
    namespace: Option<String>,
    owner: &str,
) -> Result<u64> {
    let id = store.create_project(name, namespace, owner)?;
    let project = store.project(id)?.clone();
    locator::init_project_repos(config, &project)?;
    store.save()?;
    acl::write_acls(store, config)?;
    info!(project = %project.fullname(), "project created");
    Ok(id)
}

/// Fork a project for `owner`: the fork's code repository is a bare clone of
/// the parent's, the other roots start empty.
pub fn create_fork(store: &mut Store, config: &Config, parent: u64, owner: &str) -> Result<u64> {
    let id = store.create_fork(parent, owner)?;
    let parent_project = store.project(parent)?.clone();
    let fork = store.project(id)?.clone();

    let parent_code = locator::repo_path(config, &parent_project, RepoRoot::Code);
    let fork_code = locator::repo_path(config, &fork, RepoRoot::Code);
    if let Some(dir) = fork_code.parent() {
        std::fs::create_dir_all(dir)?;
    }
    git2::build::RepoBuilder::new()
        .bare(true)
        .clone(&parent_code.to_string_lossy(), &fork_code)?;
    for root in [RepoRoot::Docs, RepoRoot::Tickets, RepoRoot::Requests] {
        let path = locator::repo_path(config, &fork, root);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        git2::Repository::init_bare(&path)?;
    }

    store.save()?;
    acl::write_acls(store, config)?;
    info!(fork = %fork.fullname(), "fork created");
    Ok(id)
}

/// Delete a project: its pull requests go with it (both sides), forks are
/// detached, the bare repositories are removed from disk, and the ACLs are
/// regenerated without it.
pub fn delete_project(store: &mut Store, config: &Config, id: u64) -> Result<()> {
    let project = store.remove_project(id)?;
    for root in [
        RepoRoot::Code,
        RepoRoot::Docs,
        RepoRoot::Tickets,
        RepoRoot::Requests,
    ] {
        let path = locator::repo_path(config, &project, root);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
    }
    store.save()?;
    acl::write_acls(store, config)?;
    info!(project = %project.fullname(), "project deleted");
    Ok(())
}

/// Inputs for opening a pull request.
#[derive(Debug, Clone)]
pub struct NewRequest<'a> {
    pub source_project: u64,
    pub branch_from: &'a str,
    pub target_project: u64,
    pub branch: &'a str,
    pub title: &'a str,
    pub user: &'a str,
}

/// Open a pull request. Requires a non-empty resolved commit range.
pub fn create_pull_request(
    store: &mut Store,
    config: &Config,
    notifiers: &mut NotifierRegistry,
    new: &NewRequest<'_>,
) -> Result<PullRequest> {
    store.user(new.user)?;
    let target = store.project(new.target_project)?.clone();
    let source = store.project(new.source_project)?.clone();

    let commits = live_range(config, &source, new.branch_from, &target, new.branch)?;
    let (start, stop) = range::range_bounds(&commits).ok_or_else(|| {
        Error::InvalidArgument(format!(
            "{}:{} has no commits beyond {}:{}",
            source.fullname(),
            new.branch_from,
            target.fullname(),
            new.branch
        ))
    })?;

    let now = chrono::Utc::now();
    let pull_request = PullRequest {
        id: store.next_request_id(target.id),
        uid: Uuid::new_v4().simple().to_string(),
        title: new.title.to_string(),
        project: target.id,
        branch: new.branch.to_string(),
        project_from: source.id,
        branch_from: new.branch_from.to_string(),
        user: new.user.to_string(),
        status: RequestStatus::Open,
        commit_start: Some(start.to_string()),
        commit_stop: Some(stop.to_string()),
        merge_status: None,
        assignee: None,
        comments: Vec::new(),
        created_at: now,
        updated_at: now,
        closed_at: None,
        closed_by: None,
    };
    store.insert_request(pull_request.clone());
    store.save()?;

    notifiers.broadcast(
        &Event::new(
            EventKind::RequestCreated,
            new.user,
            target.fullname(),
            pull_request.id,
            new.title,
        )
        .with_data(serde_json::json!({
            "branch": new.branch,
            "branch_from": new.branch_from,
            "source": source.fullname(),
        }))?,
    )?;

    info!(
        project = %target.fullname(),
        request = pull_request.id,
        "pull request opened"
    );
    Ok(pull_request)
}

/// Re-resolve an open request's commit range after new pushes.
///
/// Returns whether the recorded bounds moved (which also drops the cached
/// merge status). Merged and Closed requests are untouched.
pub fn refresh_pull_request(store: &mut Store, config: &Config, uid: &str) -> Result<bool> {
    let snapshot = store.request(uid)?.clone();
    if !snapshot.is_open() {
        return Ok(false);
    }
    let target = store.project(snapshot.project)?.clone();
    let source = store.project(snapshot.project_from)?.clone();
    let commits = live_range(config, &source, &snapshot.branch_from, &target, &snapshot.branch)?;

    let moved = match range::range_bounds(&commits) {
        Some((start, stop)) => request::update_range(
            store.request_mut(uid)?,
            Some(start.to_string()),
            Some(stop.to_string()),
        ),
        // Nothing ahead anymore (e.g. merged out of band): keep the last
        // recorded bounds rather than erasing history.
        None => false,
    };
    if moved {
        store.save()?;
    }
    Ok(moved)
}

/// The commits a request proposes to integrate, newest first.
///
/// Open requests resolve live against the repositories (updating the cached
/// bounds); Merged and Closed requests replay their frozen bounds.
pub fn pull_request_commits(
    store: &mut Store,
    config: &Config,
    uid: &str,
) -> Result<Vec<CommitMeta>> {
    refresh_pull_request(store, config, uid)?;
    let snapshot = store.request(uid)?.clone();
    let target = store.project(snapshot.project)?.clone();
    let source = store.project(snapshot.project_from)?.clone();

    if snapshot.is_open() {
        return live_range(config, &source, &snapshot.branch_from, &target, &snapshot.branch);
    }

    let (start, stop) = frozen_bounds(&snapshot)?;
    let source_repo = locator::open_repo(config, &source, RepoRoot::Code)?;
    range::commits_between(&source_repo, stop, start)
}

/// Unified diff text spanning the request's commit range.
pub fn pull_request_diff(store: &mut Store, config: &Config, uid: &str) -> Result<String> {
    let commits = pull_request_commits(store, config, uid)?;
    if commits.is_empty() {
        return Ok(String::new());
    }
    let snapshot = store.request(uid)?.clone();
    let source = store.project(snapshot.project_from)?.clone();
    let source_repo = locator::open_repo(config, &source, RepoRoot::Code)?;
    let range_diff = diff::range_diff(&source_repo, &commits)?;
    diff::patch_text(&range_diff)
}

/// Mail-format patch series for the request, oldest commit first so it
/// applies in order.
pub fn pull_request_patch(store: &mut Store, config: &Config, uid: &str) -> Result<String> {
    let mut commits = pull_request_commits(store, config, uid)?;
    if commits.is_empty() {
        return Ok(String::new());
    }
    commits.reverse();
    let snapshot = store.request(uid)?.clone();
    let source = store.project(snapshot.project_from)?.clone();
    let source_repo = locator::open_repo(config, &source, RepoRoot::Code)?;
    diff::commits_to_patch(&source_repo, &commits)
}

/// Contents of a file as proposed by the request, read from the tree of its
/// newest commit.
pub fn pull_request_file(
    store: &mut Store,
    config: &Config,
    uid: &str,
    path: &str,
) -> Result<Vec<u8>> {
    let commits = pull_request_commits(store, config, uid)?;
    let newest = commits
        .first()
        .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
    let snapshot = store.request(uid)?.clone();
    let source = store.project(snapshot.project_from)?.clone();
    let source_repo = locator::open_repo(config, &source, RepoRoot::Code)?;
    let blob = diff::blob_at_path(&source_repo, newest.oid, path)?;
    Ok(blob.content().to_vec())
}

/// Dry-run merge evaluation, cached on the request until its range moves.
pub fn analyze_pull_request(
    store: &mut Store,
    config: &Config,
    uid: &str,
) -> Result<MergeReadiness> {
    refresh_pull_request(store, config, uid)?;
    let snapshot = store.request(uid)?.clone();
    if let Some(cached) = snapshot.merge_status {
        return Ok(cached);
    }

    let target = store.project(snapshot.project)?.clone();
    let source = store.project(snapshot.project_from)?.clone();
    let ctx = merge_context(config, &target, &source, &snapshot);
    let readiness = merge::analyze(&ctx)?;

    store.request_mut(uid)?.merge_status = Some(readiness);
    store.save()?;
    Ok(readiness)
}

/// Merge a pull request into its target branch.
///
/// Guards commit access, refreshes the range one last time, runs the
/// executor, and only transitions the request to Merged once the ref update
/// is confirmed. A conflicted merge surfaces as `Error::MergeConflict` with
/// the request left Open.
pub fn merge_pull_request(
    store: &mut Store,
    config: &Config,
    notifiers: &mut NotifierRegistry,
    uid: &str,
    username: &str,
) -> Result<MergeOutcome> {
    store.user(username)?;
    let snapshot = store.request(uid)?.clone();
    let target = store.project(snapshot.project)?.clone();
    let source = store.project(snapshot.project_from)?.clone();
    request::ensure_can_merge(&target, store.groups(), username)?;

    match snapshot.status {
        RequestStatus::Open => {}
        // Idempotent: the work was already done.
        RequestStatus::Merged => return Ok(MergeOutcome::AlreadyMerged),
        RequestStatus::Closed => {
            return Err(Error::InvalidTransition(format!(
                "pull request #{} is closed; reopen it before merging",
                snapshot.id
            )))
        }
    }

    // Record the range one last time before it freezes.
    refresh_pull_request(store, config, uid)?;
    let snapshot = store.request(uid)?.clone();

    if target.settings.enforce_signed_off {
        let commits = live_range(config, &source, &snapshot.branch_from, &target, &snapshot.branch)?;
        let all_signed = commits
            .iter()
            .all(|commit| commit.message.to_lowercase().contains("signed-off-by"));
        if !all_signed {
            return Err(Error::SignedOffRequired);
        }
    }

    let ctx = merge_context(config, &target, &source, &snapshot);
    let outcome = merge::execute(&ctx)?;

    match outcome {
        MergeOutcome::ConflictedAbort => {
            // Nothing persistent changed; resolution happens outside.
            Err(Error::MergeConflict)
        }
        MergeOutcome::AlreadyMerged
        | MergeOutcome::FastForward(_)
        | MergeOutcome::MergeCommitCreated(_) => {
            let pull_request = store.request_mut(uid)?;
            if pull_request.is_open() {
                request::mark_merged(pull_request, username)?;
            }
            store.save()?;
            notifiers.broadcast(&Event::new(
                EventKind::RequestMerged,
                username,
                target.fullname(),
                snapshot.id,
                snapshot.title.clone(),
            ))?;
            Ok(outcome)
        }
    }
}

/// Close a pull request without merging.
pub fn close_pull_request(
    store: &mut Store,
    notifiers: &mut NotifierRegistry,
    uid: &str,
    username: &str,
) -> Result<()> {
    store.user(username)?;
    let snapshot = store.request(uid)?.clone();
    let target = store.project(snapshot.project)?.clone();
    request::ensure_can_close(&target, store.groups(), &snapshot, username)?;

    request::mark_closed(store.request_mut(uid)?, username)?;
    store.save()?;
    notifiers.broadcast(&Event::new(
        EventKind::RequestClosed,
        username,
        target.fullname(),
        snapshot.id,
        snapshot.title,
    ))?;
    Ok(())
}

/// Reopen a closed pull request.
pub fn reopen_pull_request(
    store: &mut Store,
    notifiers: &mut NotifierRegistry,
    uid: &str,
    username: &str,
) -> Result<()> {
    store.user(username)?;
    let snapshot = store.request(uid)?.clone();
    let target = store.project(snapshot.project)?.clone();
    request::ensure_can_reopen(&target, store.groups(), username)?;

    request::mark_reopened(store.request_mut(uid)?, username)?;
    store.save()?;
    notifiers.broadcast(&Event::new(
        EventKind::RequestReopened,
        username,
        target.fullname(),
        snapshot.id,
        snapshot.title,
    ))?;
    Ok(())
}

/// Add a user comment to a pull request.
pub fn comment_on_request(
    store: &mut Store,
    notifiers: &mut NotifierRegistry,
    uid: &str,
    username: &str,
    body: &str,
) -> Result<()> {
    store.user(username)?;
    let snapshot = store.request(uid)?.clone();
    let target = store.project(snapshot.project)?.clone();

    request::add_comment(store.request_mut(uid)?, username, body, false);
    store.save()?;
    notifiers.broadcast(&Event::new(
        EventKind::RequestCommented,
        username,
        target.fullname(),
        snapshot.id,
        snapshot.title,
    ))?;
    Ok(())
}

/// Assign (or unassign) a pull request.
pub fn assign_request(
    store: &mut Store,
    notifiers: &mut NotifierRegistry,
    uid: &str,
    actor: &str,
    assignee: Option<&str>,
) -> Result<()> {
    store.user(actor)?;
    if let Some(assignee) = assignee {
        store.user(assignee)?;
    }
    let snapshot = store.request(uid)?.clone();
    let target = store.project(snapshot.project)?.clone();
    request::ensure_can_merge(&target, store.groups(), actor)?;

    let pull_request = store.request_mut(uid)?;
    pull_request.assignee = assignee.map(str::to_string);
    pull_request.updated_at = chrono::Utc::now();
    store.save()?;
    notifiers.broadcast(&Event::new(
        EventKind::RequestAssigned,
        actor,
        target.fullname(),
        snapshot.id,
        snapshot.title,
    ))?;
    Ok(())
}

/// Regenerate the full access-control output from the current state.
pub fn regenerate_acls(store: &Store, config: &Config) -> Result<()> {
    acl::write_acls(store, config)
}

fn live_range(
    config: &Config,
    source: &Project,
    branch_from: &str,
    target: &Project,
    branch: &str,
) -> Result<Vec<CommitMeta>> {
    let source_repo = locator::open_repo(config, source, RepoRoot::Code)?;
    let target_repo = locator::open_repo(config, target, RepoRoot::Code)?;
    range::commits_ahead(
        &source_repo,
        &source.fullname(),
        branch_from,
        &target_repo,
        branch,
    )
}

fn frozen_bounds(request: &PullRequest) -> Result<(Oid, Oid)> {
    let start = request
        .commit_start
        .as_deref()
        .ok_or_else(|| Error::InvalidArgument("request has no recorded range".to_string()))?;
    let stop = request
        .commit_stop
        .as_deref()
        .ok_or_else(|| Error::InvalidArgument("request has no recorded range".to_string()))?;
    let start = Oid::from_str(start).map_err(|_| Error::CommitNotFound(start.to_string()))?;
    let stop = Oid::from_str(stop).map_err(|_| Error::CommitNotFound(stop.to_string()))?;
    Ok((start, stop))
}

fn merge_context(
    config: &Config,
    target: &Project,
    source: &Project,
    request: &PullRequest,
) -> MergeContext {
    MergeContext {
        target_repo: locator::repo_path(config, target, RepoRoot::Code),
        source_repo: locator::repo_path(config, source, RepoRoot::Code),
        target_branch: request.branch.clone(),
        source_branch: request.branch_from.clone(),
        target_label: target.fullname(),
        source_label: source.fullname(),
        // The fork appears in the disposable clone under this remote name.
        source_remote: format!("{}_{}", request.user, source.name),
        require_merge_commit: target.settings.require_merge_commit,
        request_id: request.id,
        title: request.title.clone(),
        lock_timeout_ms: config.merge.lock_timeout_ms,
    }
}
