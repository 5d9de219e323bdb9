//! Diff and patch generation.
//!
//! Two shapes come out of here: structured per-file change lists for display,
//! and mail-format patch text (one `From ...` stanza per commit) that
//! standard patch-from-email tooling can apply. Output is deterministic:
//! identical input produces byte-identical text.

use std::path::PathBuf;

use git2::{Delta, Diff, DiffFindOptions, DiffFormat, Oid, Patch, Repository};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::range::CommitMeta;

/// How a file changed within a diff.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// One file's change within a diff.
#[derive(Debug, Clone, Serialize)]
pub struct FileChange {
    /// Path before the change, when it differs from `path`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<PathBuf>,
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// Unified hunk text for this file; `None` for binary content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

/// Diff of a single commit against its sole parent, or against the empty
/// tree for a root commit (every blob shows as added).
///
/// A missing commit or a broken parent link is an error, never skipped.
pub fn commit_diff<'r>(repo: &'r Repository, oid: Oid) -> Result<Diff<'r>> {
    let commit = repo
        .find_commit(oid)
        .map_err(|_| Error::CommitNotFound(oid.to_string()))?;
    let tree = commit.tree()?;

    if commit.parent_count() == 0 {
        return Ok(repo.diff_tree_to_tree(None, Some(&tree), None)?);
    }

    let parent_oid = commit.parent_id(0)?;
    let parent = repo
        .find_commit(parent_oid)
        .map_err(|_| Error::CommitNotFound(parent_oid.to_string()))?;
    Ok(repo.diff_tree_to_tree(Some(&parent.tree()?), Some(&tree), None)?)
}

/// Diff spanning a resolved commit range (newest first, as the resolver
/// returns it): from the oldest commit's parent tree to the newest commit's
/// tree.
pub fn range_diff<'r>(repo: &'r Repository, commits: &[CommitMeta]) -> Result<Diff<'r>> {
    let newest = commits
        .first()
        .ok_or_else(|| Error::InvalidArgument("empty commit range".to_string()))?;
    let oldest = commits.last().unwrap_or(newest);

    let new_tree = repo.find_tree(newest.tree)?;
    let old_tree = match oldest.parents.first() {
        Some(parent_oid) => {
            let parent = repo
                .find_commit(*parent_oid)
                .map_err(|_| Error::CommitNotFound(parent_oid.to_string()))?;
            Some(parent.tree()?)
        }
        None => None,
    };

    Ok(repo.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), None)?)
}

/// Render a diff as unified patch text.
pub fn patch_text(diff: &Diff<'_>) -> Result<String> {
    let mut text = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        match line.origin() {
            '+' | '-' | ' ' => text.push(line.origin()),
            _ => {}
        }
        text.push_str(&String::from_utf8_lossy(line.content()));
        true
    })?;
    Ok(text)
}

/// Structured file-change list with rename detection.
pub fn file_changes(diff: &mut Diff<'_>) -> Result<Vec<FileChange>> {
    let mut find = DiffFindOptions::new();
    find.renames(true);
    diff.find_similar(Some(&mut find))?;

    let mut changes = Vec::new();
    for (idx, delta) in diff.deltas().enumerate() {
        let kind = match delta.status() {
            Delta::Added => ChangeKind::Added,
            Delta::Deleted => ChangeKind::Deleted,
            Delta::Modified | Delta::Typechange => ChangeKind::Modified,
            Delta::Renamed | Delta::Copied => ChangeKind::Renamed,
            _ => continue,
        };

        let path = delta
            .new_file()
            .path()
            .map(PathBuf::from)
            .unwrap_or_default();
        let old_path = delta.old_file().path().map(PathBuf::from);
        let old_path = match kind {
            ChangeKind::Renamed => old_path,
            _ => old_path.filter(|old| *old != path),
        };

        let patch = match Patch::from_diff(diff, idx)? {
            Some(mut patch) => {
                let buf = patch.to_buf()?;
                buf.as_str().map(|text| text.to_string())
            }
            None => None,
        };

        changes.push(FileChange {
            old_path,
            path,
            kind,
            patch,
        });
    }

    Ok(changes)
}

/// Look up a blob inside a commit's tree by slash-separated path.
///
/// A single bounded loop over the path components; a component that is
/// missing, or that is a tree where a blob is expected (and vice versa), is
/// an explicit `FileNotFound`.
pub fn blob_at_path<'r>(
    repo: &'r Repository,
    commit_oid: Oid,
    path: &str,
) -> Result<git2::Blob<'r>> {
    let commit = repo
        .find_commit(commit_oid)
        .map_err(|_| Error::CommitNotFound(commit_oid.to_string()))?;
    let mut tree = commit.tree()?;

    let not_found = || Error::FileNotFound(path.to_string());
    let mut components = path.split('/').filter(|c| !c.is_empty());
    let mut current = components.next().ok_or_else(not_found)?;

    loop {
        let entry_id = tree.get_name(current).ok_or_else(not_found)?.id();
        match components.next() {
            Some(next) => {
                tree = repo.find_tree(entry_id).map_err(|_| not_found())?;
                current = next;
            }
            None => return repo.find_blob(entry_id).map_err(|_| not_found()),
        }
    }
}

/// Render a commit series as mail-format patch text, oldest first.
///
/// Each commit becomes a `From <oid>` stanza with From/Date/Subject headers
/// derived from the author identity; multi-commit series number their
/// subjects `[PATCH i/N]`.
pub fn commits_to_patch(repo: &Repository, commits: &[CommitMeta]) -> Result<String> {
    let total = commits.len();
    let mut patch = String::new();

    for (index, commit) in commits.iter().enumerate() {
        let diff = commit_diff(repo, commit.oid)?;
        let diff_text = patch_text(&diff)?;

        let mut subject = commit.summary().to_string();
        if total > 1 {
            subject = format!("[PATCH {}/{}] {}", index + 1, total, subject);
        }

        let date = commit.author.when.format("%b %d %Y %H:%M:%S +0000");

        patch.push_str(&format!(
            "From {oid} Mon Sep 17 00:00:00 2001\n\
             From: {name} <{email}>\n\
             Date: {date}\n\
             Subject: {subject}\n\
             \n\
             {body}\n\
             ---\n\
             \n\
             {diff}\n",
            oid = commit.oid,
            name = commit.author.name,
            email = commit.author.email,
            date = date,
            subject = subject,
            body = commit.body(),
            diff = diff_text,
        ));
    }

    Ok(patch)
}
