//! Persistence handle for forge state.
//!
//! The whole directory of users, groups, projects, and pull requests lives in
//! one JSON document on disk. A `Store` is loaded once per operation and
//! threaded explicitly through the service layer; there is no process-global
//! session. Writes go through a file lock plus atomic rename so concurrent
//! workers never observe torn state.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lock::{write_atomic_locked, FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::model::{Group, Project, ProjectSettings, PullRequest, User};

const STATE_SCHEMA_VERSION: &str = "forgekit.state.v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ForgeState {
    schema_version: String,
    next_project_id: u64,
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    groups: Vec<Group>,
    #[serde(default)]
    projects: Vec<Project>,
    #[serde(default)]
    requests: Vec<PullRequest>,
}

impl ForgeState {
    fn empty() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION.to_string(),
            next_project_id: 1,
            users: Vec::new(),
            groups: Vec::new(),
            projects: Vec::new(),
            requests: Vec::new(),
        }
    }
}

/// Handle to the persistent forge state.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    state: ForgeState,
}

impl Store {
    /// Open the state file, starting empty when it does not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            let lock_path = PathBuf::from(format!("{}.lock", path.display()));
            let _lock = FileLock::acquire(&lock_path, DEFAULT_LOCK_TIMEOUT_MS)?;
            let raw = std::fs::read(path)?;
            serde_json::from_slice(&raw)?
        } else {
            ForgeState::empty()
        };
        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    /// Persist the current state (locked, atomic).
    pub fn save(&self) -> Result<()> {
        let mut data = serde_json::to_vec_pretty(&self.state)?;
        data.push(b'\n');
        write_atomic_locked(&self.path, &data, DEFAULT_LOCK_TIMEOUT_MS)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Users and groups
    // =========================================================================

    pub fn users(&self) -> &[User] {
        &self.state.users
    }

    pub fn user(&self, username: &str) -> Result<&User> {
        self.state
            .users
            .iter()
            .find(|user| user.username == username)
            .ok_or_else(|| Error::UserNotFound(username.to_string()))
    }

    pub fn add_user(&mut self, user: User) -> Result<()> {
        if user.username.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "username cannot be empty".to_string(),
            ));
        }
        if self.user(&user.username).is_ok() {
            return Err(Error::InvalidArgument(format!(
                "user already exists: {}",
                user.username
            )));
        }
        self.state.users.push(user);
        Ok(())
    }

    pub fn add_user_key(&mut self, username: &str, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidArgument("key cannot be empty".to_string()));
        }
        let user = self
            .state
            .users
            .iter_mut()
            .find(|user| user.username == username)
            .ok_or_else(|| Error::UserNotFound(username.to_string()))?;
        user.public_keys.push(key.to_string());
        Ok(())
    }

    pub fn groups(&self) -> &[Group] {
        &self.state.groups
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.state.groups.iter().find(|group| group.name == name)
    }

    pub fn add_group(&mut self, group: Group) -> Result<()> {
        if self.group(&group.name).is_some() {
            return Err(Error::InvalidArgument(format!(
                "group already exists: {}",
                group.name
            )));
        }
        self.state.groups.push(group);
        Ok(())
    }

    // =========================================================================
    // Projects
    // =========================================================================

    pub fn projects(&self) -> &[Project] {
        &self.state.projects
    }

    pub fn project(&self, id: u64) -> Result<&Project> {
        self.state
            .projects
            .iter()
            .find(|project| project.id == id)
            .ok_or_else(|| Error::ProjectNotFound(format!("#{id}")))
    }

    pub fn project_mut(&mut self, id: u64) -> Result<&mut Project> {
        self.state
            .projects
            .iter_mut()
            .find(|project| project.id == id)
            .ok_or_else(|| Error::ProjectNotFound(format!("#{id}")))
    }

    pub fn project_by_fullname(&self, fullname: &str) -> Result<&Project> {
        self.state
            .projects
            .iter()
            .find(|project| project.fullname() == fullname)
            .ok_or_else(|| Error::ProjectNotFound(fullname.to_string()))
    }

    /// Register a top-level project owned by `owner`.
    pub fn create_project(
        &mut self,
        name: &str,
        namespace: Option<String>,
        owner: &str,
    ) -> Result<u64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument(
                "project name cannot be empty".to_string(),
            ));
        }
        self.user(owner)?;
        let candidate = Project {
            id: 0,
            name: name.to_string(),
            namespace,
            owner: owner.to_string(),
            parent: None,
            grants: Vec::new(),
            settings: ProjectSettings::default(),
            created_at: Utc::now(),
        };
        self.insert_project(candidate)
    }

    /// Register a fork of `parent_id` owned by `owner`. The fork keeps the
    /// parent's name and namespace; its paths are owner-qualified.
    pub fn create_fork(&mut self, parent_id: u64, owner: &str) -> Result<u64> {
        self.user(owner)?;
        let parent = self.project(parent_id)?;
        if parent.is_fork() {
            return Err(Error::InvalidArgument(format!(
                "cannot fork a fork: {}",
                parent.fullname()
            )));
        }
        let candidate = Project {
            id: 0,
            name: parent.name.clone(),
            namespace: parent.namespace.clone(),
            owner: owner.to_string(),
            parent: Some(parent_id),
            grants: Vec::new(),
            settings: ProjectSettings::default(),
            created_at: Utc::now(),
        };
        self.insert_project(candidate)
    }

    fn insert_project(&mut self, mut project: Project) -> Result<u64> {
        let fullname = project.fullname();
        if self
            .state
            .projects
            .iter()
            .any(|existing| existing.fullname() == fullname)
        {
            return Err(Error::InvalidArgument(format!(
                "project already exists: {fullname}"
            )));
        }
        project.id = self.state.next_project_id;
        self.state.next_project_id += 1;
        let id = project.id;
        self.state.projects.push(project);
        Ok(id)
    }

    /// Delete a project, its pull requests (either side), and detach its
    /// forks from the deleted parent.
    pub fn remove_project(&mut self, id: u64) -> Result<Project> {
        let position = self
            .state
            .projects
            .iter()
            .position(|project| project.id == id)
            .ok_or_else(|| Error::ProjectNotFound(format!("#{id}")))?;
        let removed = self.state.projects.remove(position);
        self.state
            .requests
            .retain(|request| request.project != id && request.project_from != id);
        for project in &mut self.state.projects {
            if project.parent == Some(id) {
                project.parent = None;
            }
        }
        Ok(removed)
    }

    // =========================================================================
    // Pull requests
    // =========================================================================

    pub fn requests(&self) -> &[PullRequest] {
        &self.state.requests
    }

    /// Next sequential id within a target project.
    pub fn next_request_id(&self, project_id: u64) -> u64 {
        self.state
            .requests
            .iter()
            .filter(|request| request.project == project_id)
            .map(|request| request.id)
            .max()
            .unwrap_or(0)
            + 1
    }

    pub fn insert_request(&mut self, request: PullRequest) {
        self.state.requests.push(request);
    }

    pub fn request(&self, uid: &str) -> Result<&PullRequest> {
        self.state
            .requests
            .iter()
            .find(|request| request.uid == uid)
            .ok_or_else(|| Error::RequestNotFound(uid.to_string()))
    }

    pub fn request_mut(&mut self, uid: &str) -> Result<&mut PullRequest> {
        self.state
            .requests
            .iter_mut()
            .find(|request| request.uid == uid)
            .ok_or_else(|| Error::RequestNotFound(uid.to_string()))
    }

    /// Look a request up by its per-project sequential id.
    pub fn request_by_project_id(&self, project_id: u64, id: u64) -> Result<&PullRequest> {
        self.state
            .requests
            .iter()
            .find(|request| request.project == project_id && request.id == id)
            .ok_or_else(|| Error::RequestNotFound(format!("#{id}")))
    }

    pub fn requests_for_project(&self, project_id: u64) -> Vec<&PullRequest> {
        self.state
            .requests
            .iter()
            .filter(|request| request.project == project_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RequestStatus;

    fn store_with_users() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = Store::open(&dir.path().join("forge.json")).expect("open");
        store
            .add_user(User {
                username: "alice".to_string(),
                fullname: Some("Alice".to_string()),
                public_keys: Vec::new(),
            })
            .unwrap();
        store
            .add_user(User {
                username: "bob".to_string(),
                fullname: None,
                public_keys: Vec::new(),
            })
            .unwrap();
        (dir, store)
    }

    fn open_request(project: u64, project_from: u64, id: u64, uid: &str) -> PullRequest {
        PullRequest {
            id,
            uid: uid.to_string(),
            title: "test".to_string(),
            project,
            branch: "main".to_string(),
            project_from,
            branch_from: "main".to_string(),
            user: "bob".to_string(),
            status: RequestStatus::Open,
            commit_start: None,
            commit_stop: None,
            merge_status: None,
            assignee: None,
            comments: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
            closed_by: None,
        }
    }

    #[test]
    fn save_and_reopen_round_trips() {
        let (dir, mut store) = store_with_users();
        let id = store.create_project("demo", None, "alice").unwrap();
        store.save().unwrap();

        let reopened = Store::open(&dir.path().join("forge.json")).unwrap();
        assert_eq!(reopened.project(id).unwrap().name, "demo");
        assert_eq!(reopened.users().len(), 2);
    }

    #[test]
    fn fork_paths_are_owner_qualified_and_unique() {
        let (_dir, mut store) = store_with_users();
        let parent = store.create_project("demo", None, "alice").unwrap();
        let fork = store.create_fork(parent, "bob").unwrap();

        assert_eq!(store.project(fork).unwrap().fullname(), "bob/demo");
        assert!(store.create_fork(parent, "bob").is_err());
        assert!(matches!(
            store.create_fork(fork, "alice"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn request_ids_are_sequential_per_project() {
        let (_dir, mut store) = store_with_users();
        let a = store.create_project("a", None, "alice").unwrap();
        let b = store.create_project("b", None, "alice").unwrap();

        assert_eq!(store.next_request_id(a), 1);
        store.insert_request(open_request(a, a, 1, "uid-1"));
        store.insert_request(open_request(b, b, 1, "uid-2"));
        assert_eq!(store.next_request_id(a), 2);
        assert_eq!(store.next_request_id(b), 2);
    }

    #[test]
    fn remove_project_cascades() {
        let (_dir, mut store) = store_with_users();
        let parent = store.create_project("demo", None, "alice").unwrap();
        let fork = store.create_fork(parent, "bob").unwrap();
        store.insert_request(open_request(parent, fork, 1, "uid-1"));

        store.remove_project(parent).unwrap();
        assert!(store.requests().is_empty());
        assert!(store.project(fork).unwrap().parent.is_none());
    }

    #[test]
    fn unknown_lookups_surface_not_found() {
        let (_dir, store) = store_with_users();
        assert!(matches!(
            store.project(99),
            Err(Error::ProjectNotFound(_))
        ));
        assert!(matches!(
            store.request("missing"),
            Err(Error::RequestNotFound(_))
        ));
        assert!(matches!(
            store.user("nobody"),
            Err(Error::UserNotFound(_))
        ));
    }
}
