//! Repository location and opening.
//!
//! Maps a project identity to the on-disk bare repositories backing it. Each
//! project owns up to four repository roots: the code repository plus the
//! docs, tickets, and requests stores. Top-level projects live directly under
//! the code folder; forks are namespaced under `forks/<owner>/`.

use std::path::PathBuf;

use git2::{ErrorCode, Repository};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::Project;

/// The repository roots a project owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoRoot {
    Code,
    Docs,
    Tickets,
    Requests,
}

impl RepoRoot {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoRoot::Code => "code",
            RepoRoot::Docs => "docs",
            RepoRoot::Tickets => "tickets",
            RepoRoot::Requests => "requests",
        }
    }
}

/// Canonical path of a project's bare repository for the given root.
pub fn repo_path(config: &Config, project: &Project, root: RepoRoot) -> PathBuf {
    let relative = format!("{}.git", project.fullname());
    match root {
        RepoRoot::Code => {
            if project.is_fork() {
                config.paths.repos_folder.join("forks").join(relative)
            } else {
                config.paths.repos_folder.join(relative)
            }
        }
        RepoRoot::Docs => config.paths.docs_folder.join(relative),
        RepoRoot::Tickets => config.paths.tickets_folder.join(relative),
        RepoRoot::Requests => config.paths.requests_folder.join(relative),
    }
}

/// Open a project's bare repository, failing with `RepoNotFound` when it is
/// absent or not a repository.
pub fn open_repo(config: &Config, project: &Project, root: RepoRoot) -> Result<Repository> {
    let path = repo_path(config, project, root);
    Repository::open_bare(&path).map_err(|err| {
        if err.code() == ErrorCode::NotFound {
            Error::RepoNotFound(path)
        } else {
            Error::Git(err)
        }
    })
}

/// Open a project's bare repository, treating absence as "no repository yet"
/// rather than an error. Callers use this where a missing store means an
/// empty project.
pub fn open_repo_if_exists(
    config: &Config,
    project: &Project,
    root: RepoRoot,
) -> Result<Option<Repository>> {
    let path = repo_path(config, project, root);
    if !path.exists() {
        return Ok(None);
    }
    match Repository::open_bare(&path) {
        Ok(repo) => Ok(Some(repo)),
        Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
        Err(err) => Err(Error::Git(err)),
    }
}

/// Initialize the bare repositories for a project (all four roots).
pub fn init_project_repos(config: &Config, project: &Project) -> Result<()> {
    for root in [
        RepoRoot::Code,
        RepoRoot::Docs,
        RepoRoot::Tickets,
        RepoRoot::Requests,
    ] {
        let path = repo_path(config, project, root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut opts = git2::RepositoryInitOptions::new();
        opts.bare(true);
        opts.initial_head("main");
        Repository::init_opts(&path, &opts)?;
    }
    Ok(())
}
