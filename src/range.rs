//! Commit range resolution between a source and a target branch.
//!
//! The resolver walks the source branch newest-first in commit-time order and
//! collects commits until it reaches one already reachable from the target
//! branch. This is a time-ordered membership walk, not a merge-base
//! computation; it matches the linear histories pull requests carry and keeps
//! the walk a single pass per side.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use git2::{BranchType, Oid, Repository, Signature, Sort};

use crate::error::{Error, Result};

/// Author or committer identity on a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonMeta {
    pub name: String,
    pub email: String,
    pub when: DateTime<Utc>,
}

impl PersonMeta {
    fn from_signature(signature: &Signature<'_>) -> Self {
        let seconds = signature.when().seconds();
        let when =
            DateTime::<Utc>::from_timestamp(seconds, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self {
            name: signature.name().unwrap_or("").to_string(),
            email: signature.email().unwrap_or("").to_string(),
            when,
        }
    }
}

/// Commit metadata detached from the underlying repository handle.
#[derive(Debug, Clone)]
pub struct CommitMeta {
    pub oid: Oid,
    pub parents: Vec<Oid>,
    pub tree: Oid,
    pub author: PersonMeta,
    pub committer: PersonMeta,
    pub message: String,
}

impl CommitMeta {
    pub fn from_commit(commit: &git2::Commit<'_>) -> Self {
        Self {
            oid: commit.id(),
            parents: commit.parent_ids().collect(),
            tree: commit.tree_id(),
            author: PersonMeta::from_signature(&commit.author()),
            committer: PersonMeta::from_signature(&commit.committer()),
            message: commit.message().unwrap_or("").to_string(),
        }
    }

    /// First line of the commit message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// Message body after the first line, without the separating newline.
    pub fn body(&self) -> &str {
        match self.message.split_once('\n') {
            Some((_, rest)) => rest,
            None => "",
        }
    }
}

/// Resolve a local branch tip, distinguishing a missing branch from other
/// failures.
pub fn branch_tip(repo: &Repository, branch: &str, repo_label: &str) -> Result<Oid> {
    let branch_ref =
        repo.find_branch(branch, BranchType::Local)
            .map_err(|err| match err.code() {
                git2::ErrorCode::NotFound => Error::BranchNotFound {
                    branch: branch.to_string(),
                    repo: repo_label.to_string(),
                },
                _ => Error::Git(err),
            })?;
    branch_ref
        .get()
        .target()
        .ok_or_else(|| Error::BranchNotFound {
            branch: branch.to_string(),
            repo: repo_label.to_string(),
        })
}

/// Every oid reachable from `tip`, for membership testing.
fn reachable_set(repo: &Repository, tip: Oid) -> Result<HashSet<Oid>> {
    let mut revwalk = repo.revwalk()?;
    revwalk.push(tip)?;
    revwalk.set_sorting(Sort::TIME)?;
    let mut set = HashSet::new();
    for oid in revwalk {
        set.insert(oid?);
    }
    Ok(set)
}

/// Commits reachable from `branch_from` in the source repository that are not
/// yet reachable from `branch` in the target repository, newest first.
///
/// An empty or branch-less target means the entire source history is ahead.
/// An empty source repository is the "fork is empty" condition, reported as
/// `Error::EmptyRepository` with the source label.
pub fn commits_ahead(
    source: &Repository,
    source_label: &str,
    branch_from: &str,
    target: &Repository,
    branch: &str,
) -> Result<Vec<CommitMeta>> {
    if source.is_empty()? {
        return Err(Error::EmptyRepository(source_label.to_string()));
    }
    let source_tip = branch_tip(source, branch_from, source_label)?;

    let target_set = if target.is_empty()? {
        HashSet::new()
    } else {
        match target.find_branch(branch, BranchType::Local) {
            Ok(branch_ref) => match branch_ref.get().target() {
                Some(tip) => reachable_set(target, tip)?,
                None => HashSet::new(),
            },
            // Target branch does not exist yet: the pull request would create
            // it, so everything on the source side is ahead.
            Err(err) if err.code() == git2::ErrorCode::NotFound => HashSet::new(),
            Err(err) => return Err(Error::Git(err)),
        }
    };

    let mut revwalk = source.revwalk()?;
    revwalk.push(source_tip)?;
    revwalk.set_sorting(Sort::TIME)?;

    let mut commits = Vec::new();
    for oid in revwalk {
        let oid = oid?;
        if target_set.contains(&oid) {
            break;
        }
        let commit = source.find_commit(oid)?;
        commits.push(CommitMeta::from_commit(&commit));
    }

    Ok(commits)
}

/// Oldest and newest oid of a resolved range, when non-empty.
pub fn range_bounds(commits: &[CommitMeta]) -> Option<(Oid, Oid)> {
    let newest = commits.first()?;
    let oldest = commits.last()?;
    Some((oldest.oid, newest.oid))
}

/// Reconstruct a frozen range from its recorded bounds: commits from
/// `newest` back to `oldest`, both inclusive, newest first.
///
/// Fails fast when `oldest` is not reachable from `newest`, which means the
/// recorded bounds no longer describe this repository.
pub fn commits_between(repo: &Repository, newest: Oid, oldest: Oid) -> Result<Vec<CommitMeta>> {
    let mut revwalk = repo.revwalk()?;
    revwalk.push(newest)?;
    revwalk.set_sorting(Sort::TIME)?;

    let mut commits = Vec::new();
    for oid in revwalk {
        let oid = oid?;
        let commit = repo
            .find_commit(oid)
            .map_err(|_| Error::CommitNotFound(oid.to_string()))?;
        commits.push(CommitMeta::from_commit(&commit));
        if oid == oldest {
            return Ok(commits);
        }
    }

    Err(Error::CommitNotFound(oldest.to_string()))
}
