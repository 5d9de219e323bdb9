//! Merge execution against bare target repositories.
//!
//! The executor takes a pull request's resolved tips and integrates them into
//! the target branch: a direct fast-forward when possible, otherwise a true
//! merge staged inside a disposable clone. The persistent target repository
//! is only ever mutated by a single atomic ref update; a conflicted or failed
//! attempt leaves it untouched. A per-ref file lock serializes attempts
//! against the same branch.

use std::path::Path;

use git2::{ErrorCode, MergeOptions, Oid, Repository, Signature};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::lock::{ref_lock_path, FileLock};
use crate::model::MergeReadiness;
use crate::range::branch_tip;

/// What the executor did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The target already contained the source tip; no refs were touched.
    AlreadyMerged,
    /// The target ref moved directly to the source tip.
    FastForward(Oid),
    /// A two-parent merge commit was created and pushed.
    MergeCommitCreated(Oid),
    /// The merged index had conflicts; nothing persistent changed.
    ConflictedAbort,
}

/// Everything the executor needs about one merge attempt.
#[derive(Debug, Clone)]
pub struct MergeContext {
    pub target_repo: std::path::PathBuf,
    pub source_repo: std::path::PathBuf,
    pub target_branch: String,
    pub source_branch: String,
    /// Display name of the target project.
    pub target_label: String,
    /// Display name of the source project.
    pub source_label: String,
    /// Remote name used for the fork inside the disposable clone.
    pub source_remote: String,
    /// Always create a merge commit, even when a fast-forward would do.
    pub require_merge_commit: bool,
    pub request_id: u64,
    pub title: String,
    pub lock_timeout_ms: u64,
}

fn open_bare(path: &Path) -> Result<Repository> {
    Repository::open_bare(path).map_err(|err| {
        if err.code() == ErrorCode::NotFound {
            Error::RepoNotFound(path.to_path_buf())
        } else {
            Error::Git(err)
        }
    })
}

/// Target branch tip, `None` when the repository is empty or the branch does
/// not exist yet.
fn target_branch_tip(target: &Repository, branch: &str) -> Result<Option<Oid>> {
    if target.is_empty()? {
        return Ok(None);
    }
    match target.find_branch(branch, git2::BranchType::Local) {
        Ok(branch_ref) => Ok(branch_ref.get().target()),
        Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
        Err(err) => Err(Error::Git(err)),
    }
}

/// Fetch the source branch's objects into a repository's object store.
///
/// No local refs are created or moved; only FETCH_HEAD is written.
fn fetch_source(repo: &Repository, source_repo: &Path, source_branch: &str) -> Result<()> {
    let url = source_repo.to_string_lossy();
    let mut remote = repo.remote_anonymous(&url)?;
    let refspec = format!("refs/heads/{source_branch}");
    remote.fetch(&[refspec.as_str()], None, None)?;
    Ok(())
}

/// Bare clone of the target into a scratch directory.
///
/// The merge is computed on trees and leaves as a push, so no working tree
/// is checked out; the target's HEAD may also still be unborn.
fn disposable_clone(target_repo: &Path, into: &Path) -> Result<Repository> {
    Ok(git2::build::RepoBuilder::new()
        .bare(true)
        .clone(&target_repo.to_string_lossy(), into)?)
}

fn owned_signature(signature: &Signature<'_>) -> Result<Signature<'static>> {
    let when = signature.when();
    Ok(Signature::new(
        signature.name().unwrap_or(""),
        signature.email().unwrap_or(""),
        &when,
    )?)
}

/// Perform the merge described by `ctx`.
///
/// Holds the per-ref lock for the whole attempt. The caller owns the
/// pull-request state transition and must only mark the request merged on a
/// success outcome.
pub fn execute(ctx: &MergeContext) -> Result<MergeOutcome> {
    let target = open_bare(&ctx.target_repo)?;
    let source = open_bare(&ctx.source_repo)?;
    if source.is_empty()? {
        return Err(Error::EmptyRepository(ctx.source_label.to_string()));
    }

    // Serialize against other attempts on the same ref before resolving tips.
    let _ref_lock = FileLock::acquire(
        ref_lock_path(&ctx.target_repo, &ctx.target_branch),
        ctx.lock_timeout_ms,
    )?;

    let source_tip = branch_tip(&source, &ctx.source_branch, &ctx.source_label)?;
    let target_tip = target_branch_tip(&target, &ctx.target_branch)?;

    if let Some(tip) = target_tip {
        if tip == source_tip
            || (target.find_commit(source_tip).is_ok()
                && target.graph_descendant_of(tip, source_tip)?)
        {
            debug!(
                target_branch = %ctx.target_branch,
                "source tip already reachable, nothing to merge"
            );
            return Ok(MergeOutcome::AlreadyMerged);
        }
    }

    // Bring the source objects over before any ref decision; the target's
    // refs stay where they are until the single update below.
    fetch_source(&target, &ctx.source_repo, &ctx.source_branch)?;

    let refname = format!("refs/heads/{}", ctx.target_branch);
    match target_tip {
        None => {
            // Empty target or new branch: the ref creation is the merge.
            target.reference(
                &refname,
                source_tip,
                true,
                &format!("merge: create {} at {}", ctx.target_branch, source_tip),
            )?;
            info!(branch = %ctx.target_branch, %source_tip, "fast-forward (branch created)");
            Ok(MergeOutcome::FastForward(source_tip))
        }
        Some(tip) => {
            let fast_forwardable = target.graph_descendant_of(source_tip, tip)?;
            if fast_forwardable && !ctx.require_merge_commit {
                let mut reference = target.find_reference(&refname)?;
                reference.set_target(
                    source_tip,
                    &format!("merge: fast-forward to {source_tip}"),
                )?;
                info!(branch = %ctx.target_branch, %source_tip, "fast-forward");
                Ok(MergeOutcome::FastForward(source_tip))
            } else {
                true_merge(ctx, &target, tip, source_tip)
            }
        }
    }
}

/// Evaluate a merge without mutating anything persistent.
///
/// All object juggling happens inside a disposable clone, so the target
/// repository's object store stays pristine too.
pub fn analyze(ctx: &MergeContext) -> Result<MergeReadiness> {
    let target = open_bare(&ctx.target_repo)?;
    let source = open_bare(&ctx.source_repo)?;
    if source.is_empty()? {
        return Err(Error::EmptyRepository(ctx.source_label.to_string()));
    }
    let source_tip = branch_tip(&source, &ctx.source_branch, &ctx.source_label)?;
    let target_tip = match target_branch_tip(&target, &ctx.target_branch)? {
        // Nothing on the target side: the ref move is trivially clean.
        None => return Ok(MergeReadiness::FastForward),
        Some(tip) => tip,
    };

    if target_tip == source_tip
        || (target.find_commit(source_tip).is_ok()
            && target.graph_descendant_of(target_tip, source_tip)?)
    {
        return Ok(MergeReadiness::NoChange);
    }

    let scratch = tempfile::Builder::new()
        .prefix("forgekit-analyze-")
        .tempdir()?;
    let clone = disposable_clone(&ctx.target_repo, scratch.path())?;
    fetch_source(&clone, &ctx.source_repo, &ctx.source_branch)?;

    if clone.graph_descendant_of(target_tip, source_tip)? {
        return Ok(MergeReadiness::NoChange);
    }
    if clone.graph_descendant_of(source_tip, target_tip)? {
        return Ok(if ctx.require_merge_commit {
            MergeReadiness::MergeCommit
        } else {
            MergeReadiness::FastForward
        });
    }

    let index = merged_index(&clone, target_tip, source_tip)?;
    if index.has_conflicts() {
        Ok(MergeReadiness::Conflicts)
    } else {
        Ok(MergeReadiness::MergeCommit)
    }
}

fn merged_index(repo: &Repository, ours: Oid, theirs: Oid) -> Result<git2::Index> {
    let base_oid = repo.merge_base(ours, theirs).map_err(|err| {
        if err.code() == ErrorCode::NotFound {
            Error::OperationFailed(format!(
                "no common ancestor between {ours} and {theirs}"
            ))
        } else {
            Error::Git(err)
        }
    })?;
    let base_tree = repo.find_commit(base_oid)?.tree()?;
    let our_tree = repo.find_commit(ours)?.tree()?;
    let their_tree = repo.find_commit(theirs)?.tree()?;

    let mut options = MergeOptions::new();
    options.find_renames(true);
    Ok(repo.merge_trees(&base_tree, &our_tree, &their_tree, Some(&mut options))?)
}

/// Stage a real merge inside a disposable clone and push the result back.
///
/// The clone directory is removed on every path out of this function; the
/// only persistent effect is the pushed ref update.
fn true_merge(
    ctx: &MergeContext,
    _target: &Repository,
    target_tip: Oid,
    source_tip: Oid,
) -> Result<MergeOutcome> {
    let scratch = tempfile::Builder::new()
        .prefix("forgekit-merge-")
        .tempdir()?;
    let clone = disposable_clone(&ctx.target_repo, scratch.path())?;

    // The fork becomes a temporary remote of the clone.
    let mut fork = clone.remote(&ctx.source_remote, &ctx.source_repo.to_string_lossy())?;
    let refspec = format!("refs/heads/{}", ctx.source_branch);
    fork.fetch(&[refspec.as_str()], None, None)?;

    let index = merged_index(&clone, target_tip, source_tip)?;
    if index.has_conflicts() {
        debug!(
            target = %ctx.target_label,
            source = %ctx.source_label,
            "merge produced conflicts, aborting"
        );
        return Ok(MergeOutcome::ConflictedAbort);
    }

    let mut index = index;
    let tree = clone.find_tree(index.write_tree_to(&clone)?)?;
    let ours = clone.find_commit(target_tip)?;
    let theirs = clone.find_commit(source_tip)?;
    let author = owned_signature(&theirs.author())?;
    let committer = owned_signature(&theirs.committer())?;
    let message = format!("Merge #{} `{}`", ctx.request_id, ctx.title);

    let refname = format!("refs/heads/{}", ctx.target_branch);
    if clone.find_reference(&refname).is_err() {
        clone.reference(&refname, target_tip, true, "merge staging branch")?;
    }
    let merge_oid = clone.commit(
        Some(&refname),
        &author,
        &committer,
        &message,
        &tree,
        &[&ours, &theirs],
    )?;

    let mut origin = clone.find_remote("origin")?;
    let push_spec = format!("{refname}:{refname}");
    origin
        .push(&[push_spec.as_str()], None)
        .map_err(|err| Error::PushRejected(format!("{refname}: {err}")))?;

    info!(
        branch = %ctx.target_branch,
        %merge_oid,
        request = ctx.request_id,
        "merge commit pushed"
    );
    Ok(MergeOutcome::MergeCommitCreated(merge_oid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::tests::seed_commit;

    struct Repos {
        _dir: tempfile::TempDir,
        target_path: std::path::PathBuf,
        source_path: std::path::PathBuf,
    }

    fn repos() -> Repos {
        let dir = tempfile::tempdir().unwrap();
        let target_path = dir.path().join("demo.git");
        let source_path = dir.path().join("forks/bob/demo.git");
        std::fs::create_dir_all(source_path.parent().unwrap()).unwrap();
        Repository::init_bare(&target_path).unwrap();
        Repository::init_bare(&source_path).unwrap();
        Repos {
            _dir: dir,
            target_path,
            source_path,
        }
    }

    fn ctx(repos: &Repos, require_merge_commit: bool) -> MergeContext {
        MergeContext {
            target_repo: repos.target_path.clone(),
            source_repo: repos.source_path.clone(),
            target_branch: "main".to_string(),
            source_branch: "main".to_string(),
            target_label: "demo".to_string(),
            source_label: "bob/demo".to_string(),
            source_remote: "bob_demo".to_string(),
            require_merge_commit,
            request_id: 1,
            title: "test request".to_string(),
            lock_timeout_ms: 1000,
        }
    }

    fn tip(path: &Path, branch: &str) -> Option<Oid> {
        let repo = Repository::open_bare(path).unwrap();
        repo.find_branch(branch, git2::BranchType::Local)
            .ok()
            .and_then(|b| b.get().target())
    }

    #[test]
    fn empty_target_fast_forwards_to_source_tip() {
        let repos = repos();
        let source = Repository::open_bare(&repos.source_path).unwrap();
        let c1 = seed_commit(&source, "main", "sources", "one\n", "first", 1_700_000_000, None);

        let outcome = execute(&ctx(&repos, false)).unwrap();
        assert_eq!(outcome, MergeOutcome::FastForward(c1));
        assert_eq!(tip(&repos.target_path, "main"), Some(c1));
    }

    #[test]
    fn already_merged_touches_nothing() {
        let repos = repos();
        let target = Repository::open_bare(&repos.target_path).unwrap();
        let source = Repository::open_bare(&repos.source_path).unwrap();
        let c1 = seed_commit(&target, "main", "sources", "one\n", "first", 1_700_000_000, None);
        let same = seed_commit(&source, "main", "sources", "one\n", "first", 1_700_000_000, None);
        assert_eq!(c1, same);

        let outcome = execute(&ctx(&repos, false)).unwrap();
        assert_eq!(outcome, MergeOutcome::AlreadyMerged);
        assert_eq!(tip(&repos.target_path, "main"), Some(c1));
    }

    #[test]
    fn conflicting_changes_abort_without_mutation() {
        let repos = repos();
        let target = Repository::open_bare(&repos.target_path).unwrap();
        let source = Repository::open_bare(&repos.source_path).unwrap();

        let root = seed_commit(&target, "main", "sources", "base\n", "root", 1_700_000_000, None);
        let ours = seed_commit(
            &target,
            "main",
            "sources",
            "target side\n",
            "target change",
            1_700_000_100,
            Some(root),
        );
        let fork_root = seed_commit(&source, "main", "sources", "base\n", "root", 1_700_000_000, None);
        seed_commit(
            &source,
            "main",
            "sources",
            "fork side\n",
            "fork change",
            1_700_000_200,
            Some(fork_root),
        );

        let outcome = execute(&ctx(&repos, false)).unwrap();
        assert_eq!(outcome, MergeOutcome::ConflictedAbort);
        assert_eq!(tip(&repos.target_path, "main"), Some(ours));
    }

    #[test]
    fn forced_merge_commit_references_the_request() {
        let repos = repos();
        let target = Repository::open_bare(&repos.target_path).unwrap();
        let source = Repository::open_bare(&repos.source_path).unwrap();

        let root = seed_commit(&target, "main", "sources", "base\n", "root", 1_700_000_000, None);
        let fork_root = seed_commit(&source, "main", "sources", "base\n", "root", 1_700_000_000, None);
        let ahead = seed_commit(
            &source,
            "main",
            ".gitignore",
            "target/\n",
            "add gitignore",
            1_700_000_100,
            Some(fork_root),
        );

        let outcome = execute(&ctx(&repos, true)).unwrap();
        let merge_oid = match outcome {
            MergeOutcome::MergeCommitCreated(oid) => oid,
            other => panic!("expected merge commit, got {other:?}"),
        };

        assert_eq!(tip(&repos.target_path, "main"), Some(merge_oid));
        let merge = target.find_commit(merge_oid).unwrap();
        assert_eq!(merge.parent_count(), 2);
        assert_eq!(merge.parent_id(0).unwrap(), root);
        assert_eq!(merge.parent_id(1).unwrap(), ahead);
        let message = merge.message().unwrap();
        assert!(message.contains("#1"));
        assert!(message.contains("test request"));
    }

    #[test]
    fn analyze_reports_without_mutating() {
        let repos = repos();
        let target = Repository::open_bare(&repos.target_path).unwrap();
        let source = Repository::open_bare(&repos.source_path).unwrap();

        let root = seed_commit(&target, "main", "sources", "base\n", "root", 1_700_000_000, None);
        let fork_root = seed_commit(&source, "main", "sources", "base\n", "root", 1_700_000_000, None);
        seed_commit(
            &source,
            "main",
            "sources",
            "base\nmore\n",
            "extend",
            1_700_000_100,
            Some(fork_root),
        );

        assert_eq!(analyze(&ctx(&repos, false)).unwrap(), MergeReadiness::FastForward);
        assert_eq!(analyze(&ctx(&repos, true)).unwrap(), MergeReadiness::MergeCommit);
        // target untouched by analysis
        assert_eq!(tip(&repos.target_path, "main"), Some(root));
    }

    #[test]
    fn analyze_detects_conflicts() {
        let repos = repos();
        let target = Repository::open_bare(&repos.target_path).unwrap();
        let source = Repository::open_bare(&repos.source_path).unwrap();

        let root = seed_commit(&target, "main", "sources", "base\n", "root", 1_700_000_000, None);
        seed_commit(
            &target,
            "main",
            "sources",
            "target side\n",
            "target change",
            1_700_000_100,
            Some(root),
        );
        let fork_root = seed_commit(&source, "main", "sources", "base\n", "root", 1_700_000_000, None);
        seed_commit(
            &source,
            "main",
            "sources",
            "fork side\n",
            "fork change",
            1_700_000_200,
            Some(fork_root),
        );

        assert_eq!(analyze(&ctx(&repos, false)).unwrap(), MergeReadiness::Conflicts);
    }
}
