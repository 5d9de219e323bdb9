//! Error types for forgekit
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (unknown project, missing branch, empty repository)
//! - 3: Blocked by policy (access denied, invalid state transition)
//! - 4: Operation failed (git error, merge conflict, rejected push)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the forgekit CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const POLICY_BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for forgekit operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Pull request not found: {0}")]
    RequestNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Branch {branch} could not be found in the repo {repo}")]
    BranchNotFound { branch: String, repo: String },

    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("No git repository at {0}")]
    RepoNotFound(PathBuf),

    #[error("Fork {0} is empty, there are no commits to request pulling")]
    EmptyRepository(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Policy blocks (exit code 3)
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid pull request transition: {0}")]
    InvalidTransition(String),

    #[error("This repo enforces that all commits are signed off by their author")]
    SignedOffRequired,

    // Operation failures (exit code 4)
    #[error("Merge conflicts!")]
    MergeConflict,

    #[error("Push rejected for {0}")]
    PushRejected(String),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::ProjectNotFound(_)
            | Error::RequestNotFound(_)
            | Error::UserNotFound(_)
            | Error::BranchNotFound { .. }
            | Error::CommitNotFound(_)
            | Error::FileNotFound(_)
            | Error::RepoNotFound(_)
            | Error::EmptyRepository(_)
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_) => exit_codes::USER_ERROR,

            // Policy blocks
            Error::AccessDenied(_) | Error::InvalidTransition(_) | Error::SignedOffRequired => {
                exit_codes::POLICY_BLOCKED
            }

            // Operation failures
            Error::MergeConflict
            | Error::PushRejected(_)
            | Error::Git(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for machine-readable error envelopes.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::BranchNotFound { branch, repo } => Some(serde_json::json!({
                "branch": branch,
                "repo": repo,
            })),
            Error::LockFailed(path) => Some(serde_json::json!({
                "lock": path.display().to_string(),
            })),
            _ => None,
        }
    }
}

/// Result type alias for forgekit operations
pub type Result<T> = std::result::Result<T, Error>;
