//! Pull request state machine and access guards.
//!
//! Transitions: Open -> Merged (terminal), Open -> Closed, Closed -> Open.
//! Every transition appends a system-authored comment; the service layer is
//! responsible for emitting the matching notification event. Guards live here
//! so any boundary (CLI, HTTP handler, git hook) enforces the same rules.

use chrono::Utc;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::model::{AccessLevel, Comment, Group, Project, PullRequest, RequestStatus};

/// Effective access of `username` on a project: owner grant, direct user
/// grant, or the highest grant of any group the user belongs to.
pub fn effective_access(
    project: &Project,
    groups: &[Group],
    username: &str,
) -> Option<AccessLevel> {
    if project.owner == username {
        return Some(AccessLevel::Owner);
    }

    let mut best: Option<AccessLevel> = None;
    for (user, level) in project.user_grantees() {
        if user == username {
            best = best.max(Some(level));
        }
    }
    for (group_name, level) in project.group_grantees() {
        let member = groups
            .iter()
            .find(|group| group.name == group_name)
            .map(|group| group.members.iter().any(|m| m == username))
            .unwrap_or(false);
        if member {
            best = best.max(Some(level));
        }
    }
    best
}

fn has_commit_access(project: &Project, groups: &[Group], username: &str) -> bool {
    effective_access(project, groups, username)
        .map(|level| level.grants_push())
        .unwrap_or(false)
}

/// Merging requires commit access on the target project.
pub fn ensure_can_merge(project: &Project, groups: &[Group], username: &str) -> Result<()> {
    if has_commit_access(project, groups, username) {
        return Ok(());
    }
    Err(Error::AccessDenied(format!(
        "{username} cannot merge into {}",
        project.fullname()
    )))
}

/// Closing requires commit access on the target project or authorship of the
/// request.
pub fn ensure_can_close(
    project: &Project,
    groups: &[Group],
    request: &PullRequest,
    username: &str,
) -> Result<()> {
    if request.user == username || has_commit_access(project, groups, username) {
        return Ok(());
    }
    Err(Error::AccessDenied(format!(
        "{username} cannot close pull request #{} on {}",
        request.id,
        project.fullname()
    )))
}

/// Reopening requires commit access; authorship alone is not enough to put a
/// request back in front of the maintainers.
pub fn ensure_can_reopen(project: &Project, groups: &[Group], username: &str) -> Result<()> {
    if has_commit_access(project, groups, username) {
        return Ok(());
    }
    Err(Error::AccessDenied(format!(
        "{username} cannot reopen pull requests on {}",
        project.fullname()
    )))
}

/// Append a comment; system comments record transitions.
pub fn add_comment(request: &mut PullRequest, author: &str, body: &str, system: bool) {
    let now = Utc::now();
    request.comments.push(Comment {
        id: Ulid::new().to_string(),
        author: author.to_string(),
        body: body.to_string(),
        created_at: now,
        system,
    });
    request.updated_at = now;
}

/// Record the resolved range on an open request.
///
/// Merged and Closed requests keep their frozen commits; calling this on one
/// is a no-op. Returns whether the bounds moved, which invalidates the cached
/// merge status.
pub fn update_range(
    request: &mut PullRequest,
    commit_start: Option<String>,
    commit_stop: Option<String>,
) -> bool {
    if !request.is_open() {
        return false;
    }
    let moved = request.commit_start != commit_start || request.commit_stop != commit_stop;
    if moved {
        request.commit_start = commit_start;
        request.commit_stop = commit_stop;
        request.merge_status = None;
        request.updated_at = Utc::now();
    }
    moved
}

/// Open -> Merged. Terminal.
pub fn mark_merged(request: &mut PullRequest, actor: &str) -> Result<()> {
    match request.status {
        RequestStatus::Open => {
            request.status = RequestStatus::Merged;
            let now = Utc::now();
            request.closed_at = Some(now);
            request.closed_by = Some(actor.to_string());
            request.updated_at = now;
            add_comment(request, actor, "Pull request merged", true);
            Ok(())
        }
        RequestStatus::Merged => Err(Error::InvalidTransition(format!(
            "pull request #{} is already merged",
            request.id
        ))),
        RequestStatus::Closed => Err(Error::InvalidTransition(format!(
            "pull request #{} is closed; reopen it before merging",
            request.id
        ))),
    }
}

/// Open -> Closed.
pub fn mark_closed(request: &mut PullRequest, actor: &str) -> Result<()> {
    match request.status {
        RequestStatus::Open => {
            request.status = RequestStatus::Closed;
            let now = Utc::now();
            request.closed_at = Some(now);
            request.closed_by = Some(actor.to_string());
            request.updated_at = now;
            add_comment(request, actor, "Pull request closed", true);
            Ok(())
        }
        status => Err(Error::InvalidTransition(format!(
            "pull request #{} is {} and cannot be closed",
            request.id,
            status.as_str()
        ))),
    }
}

/// Closed -> Open. Rejected once truly merged.
pub fn mark_reopened(request: &mut PullRequest, actor: &str) -> Result<()> {
    match request.status {
        RequestStatus::Closed => {
            request.status = RequestStatus::Open;
            request.closed_at = None;
            request.closed_by = None;
            request.updated_at = Utc::now();
            add_comment(request, actor, "Pull request reopened", true);
            Ok(())
        }
        RequestStatus::Merged => Err(Error::InvalidTransition(format!(
            "pull request #{} was merged and cannot be reopened",
            request.id
        ))),
        RequestStatus::Open => Err(Error::InvalidTransition(format!(
            "pull request #{} is already open",
            request.id
        ))),
    }
}
