//! forgekit - Git Forge Integration Engine
//!
//! This library implements the engine that turns a fork/branch pair into an
//! integration decision: commit range resolution, diff and patch generation,
//! real merges against on-disk bare repositories, pull-request lifecycle
//! tracking, and deterministic access-control generation for the SSH layer.
//!
//! # Core Concepts
//!
//! - **Projects and forks**: bare repository sets (code/docs/tickets/requests)
//!   with ordered permission grants
//! - **Pull requests**: per-project sequential requests with a resolved
//!   commit range and an Open/Merged/Closed lifecycle
//! - **Merge execution**: fast-forward or true merge via a disposable clone,
//!   conflict detection, single atomic ref update
//! - **ACL synthesis**: byte-stable gitolite config and authorized_keys
//!   generation
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `forgekit.toml`
//! - `error`: Error types and result aliases
//! - `model`: Domain values (projects, users, pull requests)
//! - `store`: Explicit persistence handle over a JSON state file
//! - `locator`: Project identity to bare-repository paths
//! - `range`: Commit range resolution between branches
//! - `diff`: Structured diffs and mail-format patches
//! - `merge`: Merge execution with per-ref locking
//! - `request`: Pull-request state machine and access guards
//! - `service`: Service-layer operations callable from any boundary
//! - `acl`: Access-control synthesis for the SSH layer
//! - `notify`: Structured event boundary with an explicit registry
//! - `lock`: File locking and atomic writes

pub mod acl;
pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod locator;
pub mod lock;
pub mod merge;
pub mod model;
pub mod notify;
pub mod output;
pub mod range;
pub mod request;
pub mod service;
pub mod store;

pub use error::{Error, Result};
