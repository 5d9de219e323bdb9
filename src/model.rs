//! Domain model: users, groups, projects, and pull requests.
//!
//! These are plain values; persistence lives in `store` and git operations in
//! `locator`/`range`/`diff`/`merge`. Nothing here touches the filesystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Graded access to a project, lowest to highest.
///
/// `Commit` and above may push to the repositories and merge pull requests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Ticket,
    Collaborator,
    Commit,
    Admin,
    Owner,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Ticket => "ticket",
            AccessLevel::Collaborator => "collaborator",
            AccessLevel::Commit => "commit",
            AccessLevel::Admin => "admin",
            AccessLevel::Owner => "owner",
        }
    }

    /// Whether this level allows pushing refs and merging pull requests.
    pub fn grants_push(&self) -> bool {
        *self >= AccessLevel::Commit
    }
}

/// The holder of a grant: a single user or a named group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    User(String),
    Group(String),
}

/// One access grant on a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Grant {
    pub subject: Subject,
    pub level: AccessLevel,
}

/// A registered forge user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
    /// SSH public keys, one per line as registered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_keys: Vec<String>,
}

/// A named group of users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub members: Vec<String>,
}

/// Per-project switches affecting the merge executor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectSettings {
    /// Always create a merge commit, even when a fast-forward is possible.
    #[serde(default)]
    pub require_merge_commit: bool,

    /// Reject merges whose commits lack a Signed-off-by line.
    #[serde(default)]
    pub enforce_signed_off: bool,
}

/// A hosted project: a set of bare repositories plus its permission grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub owner: String,
    /// Parent project id when this project is a fork.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grants: Vec<Grant>,
    #[serde(default)]
    pub settings: ProjectSettings,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn is_fork(&self) -> bool {
        self.parent.is_some()
    }

    /// The display and ACL name: `[namespace/]name`, owner-qualified for
    /// forks (`owner/[namespace/]name`).
    pub fn fullname(&self) -> String {
        let mut name = String::new();
        if self.is_fork() {
            name.push_str(&self.owner);
            name.push('/');
        }
        if let Some(namespace) = &self.namespace {
            name.push_str(namespace);
            name.push('/');
        }
        name.push_str(&self.name);
        name
    }

    /// Users with explicit user grants, in grant order.
    pub fn user_grantees(&self) -> impl Iterator<Item = (&str, AccessLevel)> {
        self.grants.iter().filter_map(|grant| match &grant.subject {
            Subject::User(username) => Some((username.as_str(), grant.level)),
            Subject::Group(_) => None,
        })
    }

    /// Groups with explicit grants, in grant order.
    pub fn group_grantees(&self) -> impl Iterator<Item = (&str, AccessLevel)> {
        self.grants.iter().filter_map(|grant| match &grant.subject {
            Subject::Group(name) => Some((name.as_str(), grant.level)),
            Subject::User(_) => None,
        })
    }
}

/// Lifecycle state of a pull request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestStatus {
    Open,
    Merged,
    Closed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Open => "Open",
            RequestStatus::Merged => "Merged",
            RequestStatus::Closed => "Closed",
        }
    }
}

/// Cached result of the last dry-run merge evaluation.
///
/// Invalidated whenever the resolved commit range moves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeReadiness {
    /// Everything already reachable from the target; nothing to do.
    NoChange,
    /// Target tip is an ancestor of the source tip.
    FastForward,
    /// A clean merge is possible but needs a merge commit.
    MergeCommit,
    /// The merged index has conflicts.
    Conflicts,
}

/// A comment on a pull request. Transition comments carry `system = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub system: bool,
}

/// A request to pull `branch_from` of the source project into `branch` of the
/// target project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// Sequential id within the target project.
    pub id: u64,
    /// Globally unique id.
    pub uid: String,
    pub title: String,
    /// Target project id.
    pub project: u64,
    /// Target branch.
    pub branch: String,
    /// Source project id (usually a fork of the target).
    pub project_from: u64,
    /// Source branch.
    pub branch_from: String,
    /// Requesting user.
    pub user: String,
    pub status: RequestStatus,
    /// Oldest commit of the resolved range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_start: Option<String>,
    /// Newest commit of the resolved range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_stop: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_status: Option<MergeReadiness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_by: Option<String>,
}

impl PullRequest {
    pub fn is_open(&self) -> bool {
        self.status == RequestStatus::Open
    }
}
