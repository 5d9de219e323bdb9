//! Configuration loading and management
//!
//! Handles parsing of `forgekit.toml` configuration files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default configuration file name
pub const CONFIG_FILE: &str = "forgekit.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Repository folder layout
    #[serde(default)]
    pub paths: PathsConfig,

    /// Access-control generation
    #[serde(default)]
    pub acl: AclConfig,

    /// Merge execution
    #[serde(default)]
    pub merge: MergeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            acl: AclConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

/// On-disk layout of the bare repositories.
///
/// Every root holds `<fullname>.git` repositories; the code root additionally
/// namespaces forks under `forks/<owner>/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root folder for the main code repositories
    #[serde(default = "default_repos_folder")]
    pub repos_folder: PathBuf,

    /// Root folder for the documentation repositories
    #[serde(default = "default_docs_folder")]
    pub docs_folder: PathBuf,

    /// Root folder for the ticket repositories
    #[serde(default = "default_tickets_folder")]
    pub tickets_folder: PathBuf,

    /// Root folder for the pull-request repositories
    #[serde(default = "default_requests_folder")]
    pub requests_folder: PathBuf,

    /// Path of the persistent forge state file
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

fn default_repos_folder() -> PathBuf {
    PathBuf::from("repositories")
}

fn default_docs_folder() -> PathBuf {
    PathBuf::from("repositories/docs")
}

fn default_tickets_folder() -> PathBuf {
    PathBuf::from("repositories/tickets")
}

fn default_requests_folder() -> PathBuf {
    PathBuf::from("repositories/requests")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("forge.json")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            repos_folder: default_repos_folder(),
            docs_folder: default_docs_folder(),
            tickets_folder: default_tickets_folder(),
            requests_folder: default_requests_folder(),
            state_file: default_state_file(),
        }
    }
}

/// Access-control generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclConfig {
    /// Where the gitolite-style configuration is written
    #[serde(default = "default_gitolite_config")]
    pub gitolite_config: PathBuf,

    /// Where the authorized_keys file is written
    #[serde(default = "default_authorized_keys")]
    pub authorized_keys: PathBuf,

    /// Directory receiving one `<user>.pub` file per user
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,

    /// Restricted command invoked for every SSH connection, passed the
    /// username as its single argument
    #[serde(default = "default_auth_command")]
    pub auth_command: String,
}

fn default_gitolite_config() -> PathBuf {
    PathBuf::from("gitolite.conf")
}

fn default_authorized_keys() -> PathBuf {
    PathBuf::from("authorized_keys")
}

fn default_key_dir() -> PathBuf {
    PathBuf::from("keydir")
}

fn default_auth_command() -> String {
    "/usr/libexec/forgekit/aclchecker".to_string()
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            gitolite_config: default_gitolite_config(),
            authorized_keys: default_authorized_keys(),
            key_dir: default_key_dir(),
            auth_command: default_auth_command(),
        }
    }
}

/// Merge execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// How long to wait for the per-ref merge lock, in milliseconds
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit file path.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| Error::InvalidConfig(format!("{}: {}", path.display(), err)))?;
        let mut config: Config = toml::from_str(&raw)?;
        config.anchor(path.parent().unwrap_or_else(|| Path::new(".")));
        Ok(config)
    }

    /// Load `forgekit.toml` from a directory, falling back to defaults when
    /// the file does not exist.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            let mut config = Config::default();
            config.anchor(dir);
            Ok(config)
        }
    }

    // Relative paths in the file are resolved against the config location,
    // so the engine can be invoked from anywhere.
    fn anchor(&mut self, base: &Path) {
        for path in [
            &mut self.paths.repos_folder,
            &mut self.paths.docs_folder,
            &mut self.paths.tickets_folder,
            &mut self.paths.requests_folder,
            &mut self.paths.state_file,
            &mut self.acl.gitolite_config,
            &mut self.acl.authorized_keys,
            &mut self.acl.key_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&path);
            }
        }
    }
}
