use std::path::{Path, PathBuf};

use git2::{Oid, Repository, Signature, Time};
use tempfile::TempDir;

use forgekit::config::Config;
use forgekit::locator::{self, RepoRoot};
use forgekit::model::User;
use forgekit::store::Store;

/// A self-contained forge rooted in a temp directory: config, state file,
/// and bare repositories under `repositories/`.
pub struct TestForge {
    dir: TempDir,
    pub config: Config,
    clock: std::cell::Cell<i64>,
}

impl TestForge {
    pub fn init() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let config = Config::load_from_dir(dir.path()).expect("config");
        Self {
            dir,
            config,
            clock: std::cell::Cell::new(1_700_000_000),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn store(&self) -> Store {
        Store::open(&self.config.paths.state_file).expect("open store")
    }

    /// Monotonic commit timestamps keep the time-ordered history walk stable.
    pub fn next_time(&self) -> i64 {
        let time = self.clock.get() + 100;
        self.clock.set(time);
        time
    }

    pub fn add_user(&self, store: &mut Store, username: &str) {
        store
            .add_user(User {
                username: username.to_string(),
                fullname: None,
                public_keys: Vec::new(),
            })
            .expect("add user");
    }

    pub fn repo_path(&self, store: &Store, project: u64, root: RepoRoot) -> PathBuf {
        let project = store.project(project).expect("project").clone();
        locator::repo_path(&self.config, &project, root)
    }

    pub fn open_code_repo(&self, store: &Store, project: u64) -> Repository {
        Repository::open_bare(self.repo_path(store, project, RepoRoot::Code)).expect("open repo")
    }

    /// Commit one file change straight into a bare repository branch.
    pub fn commit_file(
        &self,
        repo: &Repository,
        branch: &str,
        file: &str,
        contents: &str,
        message: &str,
    ) -> Oid {
        let blob = repo.blob(contents.as_bytes()).expect("blob");
        let parent = repo
            .find_branch(branch, git2::BranchType::Local)
            .ok()
            .and_then(|b| b.get().target())
            .map(|oid| repo.find_commit(oid).expect("parent commit"));
        let base_tree = parent.as_ref().map(|commit| commit.tree().expect("tree"));
        let mut builder = repo.treebuilder(base_tree.as_ref()).expect("treebuilder");
        builder.insert(file, blob, 0o100644).expect("insert");
        let tree = repo.find_tree(builder.write().expect("write tree")).expect("tree");
        let sig = Signature::new(
            "Forge Test",
            "test@forge.example",
            &Time::new(self.next_time(), 0),
        )
        .expect("signature");
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(
            Some(&format!("refs/heads/{branch}")),
            &sig,
            &sig,
            message,
            &tree,
            &parents,
        )
        .expect("commit")
    }

    pub fn branch_tip(&self, store: &Store, project: u64, branch: &str) -> Option<Oid> {
        let repo = self.open_code_repo(store, project);
        repo.find_branch(branch, git2::BranchType::Local)
            .ok()
            .and_then(|b| b.get().target())
    }
}
