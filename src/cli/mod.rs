//! Command-line interface for forgekit.
//!
//! The CLI is one consumer of the service layer; every operation here is a
//! thin wrapper over `service` plus output formatting. Pull requests are
//! addressed either by their global uid or as `<project>#<id>`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{AccessLevel, Grant, Group, Subject, User};
use crate::notify::{EventDestination, NotifierRegistry};
use crate::output::{emit_raw, emit_success, HumanOutput, OutputOptions};
use crate::service::{self, NewRequest};
use crate::store::Store;
use crate::{acl, merge};

#[derive(Parser)]
#[command(name = "forgekit", version, about = "Git forge integration engine")]
pub struct Cli {
    /// Configuration file (defaults to ./forgekit.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON envelopes
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress human-readable output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Notification destination: '-' for stdout or a JSONL file path
    #[arg(long, global = true, env = "FORGEKIT_EVENTS")]
    pub events: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage forge users
    #[command(subcommand)]
    User(UserCommand),
    /// Manage user groups
    #[command(subcommand)]
    Group(GroupCommand),
    /// Manage projects and forks
    #[command(subcommand)]
    Project(ProjectCommand),
    /// Work with pull requests
    #[command(subcommand)]
    Pr(PrCommand),
    /// Generate access-control output
    #[command(subcommand)]
    Acl(AclCommand),
}

#[derive(Subcommand)]
enum UserCommand {
    /// Register a user
    Add {
        username: String,
        #[arg(long)]
        fullname: Option<String>,
    },
    /// Attach an SSH public key to a user
    KeyAdd { username: String, key: String },
}

#[derive(Subcommand)]
enum GroupCommand {
    /// Register a group
    Add {
        name: String,
        /// Comma-separated member usernames
        #[arg(long, value_delimiter = ',')]
        members: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// Create a top-level project
    Create {
        name: String,
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long)]
        owner: String,
    },
    /// Fork a project for another user
    Fork {
        /// Fullname of the project to fork
        project: String,
        #[arg(long)]
        owner: String,
    },
    /// Grant access on a project
    Grant {
        project: String,
        /// User to grant; mutually exclusive with --group
        #[arg(long, conflicts_with = "group")]
        user: Option<String>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long, value_parser = parse_level, default_value = "commit")]
        level: AccessLevel,
    },
    /// Change project settings
    Set {
        project: String,
        #[arg(long)]
        require_merge_commit: Option<bool>,
        #[arg(long)]
        enforce_signed_off: Option<bool>,
    },
    /// List projects
    List,
    /// Delete a project and everything attached to it
    Remove { project: String },
}

#[derive(Subcommand)]
enum PrCommand {
    /// Open a pull request
    Create {
        /// Source project fullname (usually a fork)
        #[arg(long)]
        source: String,
        #[arg(long)]
        branch_from: String,
        /// Target project fullname
        #[arg(long)]
        target: String,
        #[arg(long, default_value = "main")]
        branch: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        user: String,
    },
    /// List pull requests on a project
    List { project: String },
    /// Print the unified diff of a request's commit range
    Diff { request: String },
    /// Print the mail-format patch series, oldest commit first
    Patch { request: String },
    /// Dry-run merge evaluation
    Analyze { request: String },
    /// Print a file as proposed by the request
    Cat { request: String, path: String },
    /// Merge a pull request
    Merge {
        request: String,
        #[arg(long)]
        user: String,
    },
    /// Close without merging
    Close {
        request: String,
        #[arg(long)]
        user: String,
    },
    /// Reopen a closed request
    Reopen {
        request: String,
        #[arg(long)]
        user: String,
    },
    /// Comment on a request
    Comment {
        request: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        message: String,
    },
    /// Assign or unassign a request
    Assign {
        request: String,
        #[arg(long)]
        user: String,
        /// Assignee; omit to clear
        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Subcommand)]
enum AclCommand {
    /// Write the gitolite config, authorized_keys, and per-user key files
    Write,
    /// Print the gitolite-style configuration
    Show,
    /// Print the derived access entries
    Entries,
}

fn parse_level(raw: &str) -> std::result::Result<AccessLevel, String> {
    match raw {
        "ticket" => Ok(AccessLevel::Ticket),
        "collaborator" => Ok(AccessLevel::Collaborator),
        "commit" => Ok(AccessLevel::Commit),
        "admin" => Ok(AccessLevel::Admin),
        "owner" => Ok(AccessLevel::Owner),
        other => Err(format!("unknown access level: {other}")),
    }
}

impl Cli {
    pub fn run(&self) -> Result<()> {
        let config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::load_from_dir(&std::env::current_dir()?)?,
        };
        let mut store = Store::open(&config.paths.state_file)?;
        let mut notifiers = NotifierRegistry::new();
        if let Some(destination) = EventDestination::parse(self.events.as_deref()) {
            notifiers.register(Box::new(destination.open()?));
        }
        let options = OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };

        match &self.command {
            Command::User(cmd) => run_user(cmd, &mut store, options),
            Command::Group(cmd) => run_group(cmd, &mut store, options),
            Command::Project(cmd) => run_project(cmd, &mut store, &config, options),
            Command::Pr(cmd) => run_pr(cmd, &mut store, &config, &mut notifiers, options),
            Command::Acl(cmd) => run_acl(cmd, &store, &config, options),
        }
    }
}

fn run_user(cmd: &UserCommand, store: &mut Store, options: OutputOptions) -> Result<()> {
    match cmd {
        UserCommand::Add { username, fullname } => {
            store.add_user(User {
                username: username.clone(),
                fullname: fullname.clone(),
                public_keys: Vec::new(),
            })?;
            store.save()?;
            let mut human = HumanOutput::new(format!("User {username} added"));
            human.push_summary("username", username.clone());
            emit_success(
                options,
                "user add",
                &serde_json::json!({ "username": username }),
                Some(&human),
            )
        }
        UserCommand::KeyAdd { username, key } => {
            store.add_user_key(username, key)?;
            store.save()?;
            let human = HumanOutput::new(format!("Key added for {username}"));
            emit_success(
                options,
                "user key-add",
                &serde_json::json!({ "username": username }),
                Some(&human),
            )
        }
    }
}

fn run_group(cmd: &GroupCommand, store: &mut Store, options: OutputOptions) -> Result<()> {
    match cmd {
        GroupCommand::Add { name, members } => {
            store.add_group(Group {
                name: name.clone(),
                members: members.clone(),
            })?;
            store.save()?;
            let mut human = HumanOutput::new(format!("Group {name} added"));
            human.push_summary("members", members.join(", "));
            emit_success(
                options,
                "group add",
                &serde_json::json!({ "name": name, "members": members }),
                Some(&human),
            )
        }
    }
}

#[derive(Serialize)]
struct ProjectRow {
    id: u64,
    fullname: String,
    owner: String,
    fork: bool,
}

fn run_project(
    cmd: &ProjectCommand,
    store: &mut Store,
    config: &Config,
    options: OutputOptions,
) -> Result<()> {
    match cmd {
        ProjectCommand::Create {
            name,
            namespace,
            owner,
        } => {
            let id = service::create_project(store, config, name, namespace.clone(), owner)?;
            let fullname = store.project(id)?.fullname();
            let mut human = HumanOutput::new(format!("Project {fullname} created"));
            human.push_summary("id", id.to_string());
            emit_success(
                options,
                "project create",
                &serde_json::json!({ "id": id, "fullname": fullname }),
                Some(&human),
            )
        }
        ProjectCommand::Fork { project, owner } => {
            let parent = store.project_by_fullname(project)?.id;
            let id = service::create_fork(store, config, parent, owner)?;
            let fullname = store.project(id)?.fullname();
            let human = HumanOutput::new(format!("Fork {fullname} created"));
            emit_success(
                options,
                "project fork",
                &serde_json::json!({ "id": id, "fullname": fullname }),
                Some(&human),
            )
        }
        ProjectCommand::Grant {
            project,
            user,
            group,
            level,
        } => {
            let subject = match (user, group) {
                (Some(user), None) => {
                    store.user(user)?;
                    Subject::User(user.clone())
                }
                (None, Some(group)) => {
                    store
                        .group(group)
                        .ok_or_else(|| Error::InvalidArgument(format!("unknown group: {group}")))?;
                    Subject::Group(group.clone())
                }
                _ => {
                    return Err(Error::InvalidArgument(
                        "exactly one of --user or --group is required".to_string(),
                    ))
                }
            };
            let id = store.project_by_fullname(project)?.id;
            store.project_mut(id)?.grants.push(Grant {
                subject,
                level: *level,
            });
            store.save()?;
            acl::write_acls(store, config)?;
            let human = HumanOutput::new(format!("Granted {} on {project}", level.as_str()));
            emit_success(
                options,
                "project grant",
                &serde_json::json!({ "project": project, "level": level.as_str() }),
                Some(&human),
            )
        }
        ProjectCommand::Set {
            project,
            require_merge_commit,
            enforce_signed_off,
        } => {
            let id = store.project_by_fullname(project)?.id;
            {
                let settings = &mut store.project_mut(id)?.settings;
                if let Some(value) = require_merge_commit {
                    settings.require_merge_commit = *value;
                }
                if let Some(value) = enforce_signed_off {
                    settings.enforce_signed_off = *value;
                }
            }
            store.save()?;
            let settings = store.project(id)?.settings.clone();
            let human = HumanOutput::new(format!("Settings updated for {project}"));
            emit_success(
                options,
                "project set",
                &serde_json::json!({ "project": project, "settings": settings }),
                Some(&human),
            )
        }
        ProjectCommand::List => {
            let rows: Vec<ProjectRow> = store
                .projects()
                .iter()
                .map(|project| ProjectRow {
                    id: project.id,
                    fullname: project.fullname(),
                    owner: project.owner.clone(),
                    fork: project.is_fork(),
                })
                .collect();
            let mut human = HumanOutput::new(format!("{} project(s)", rows.len()));
            for row in &rows {
                human.push_detail(format!(
                    "#{} {}{}",
                    row.id,
                    row.fullname,
                    if row.fork { " (fork)" } else { "" }
                ));
            }
            emit_success(options, "project list", &rows, Some(&human))
        }
        ProjectCommand::Remove { project } => {
            let id = store.project_by_fullname(project)?.id;
            service::delete_project(store, config, id)?;
            let human = HumanOutput::new(format!("Project {project} removed"));
            emit_success(
                options,
                "project remove",
                &serde_json::json!({ "fullname": project }),
                Some(&human),
            )
        }
    }
}

/// Resolve `<project>#<id>` or a bare uid to a request uid.
fn resolve_request_uid(store: &Store, spec: &str) -> Result<String> {
    if let Some((fullname, id)) = spec.rsplit_once('#') {
        let project = store.project_by_fullname(fullname)?;
        let id: u64 = id
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("invalid request id: {id}")))?;
        return Ok(store.request_by_project_id(project.id, id)?.uid.clone());
    }
    Ok(store.request(spec)?.uid.clone())
}

#[derive(Serialize)]
struct RequestRow {
    id: u64,
    uid: String,
    title: String,
    status: &'static str,
    user: String,
    branch_from: String,
    branch: String,
}

fn run_pr(
    cmd: &PrCommand,
    store: &mut Store,
    config: &Config,
    notifiers: &mut NotifierRegistry,
    options: OutputOptions,
) -> Result<()> {
    match cmd {
        PrCommand::Create {
            source,
            branch_from,
            target,
            branch,
            title,
            user,
        } => {
            let source_id = store.project_by_fullname(source)?.id;
            let target_id = store.project_by_fullname(target)?.id;
            let request = service::create_pull_request(
                store,
                config,
                notifiers,
                &NewRequest {
                    source_project: source_id,
                    branch_from,
                    target_project: target_id,
                    branch,
                    title,
                    user,
                },
            )?;
            let mut human =
                HumanOutput::new(format!("Pull request #{} opened on {target}", request.id));
            human.push_summary("uid", request.uid.clone());
            human.push_summary("range", format_range(&request));
            emit_success(options, "pr create", &request, Some(&human))
        }
        PrCommand::List { project } => {
            let id = store.project_by_fullname(project)?.id;
            let rows: Vec<RequestRow> = store
                .requests_for_project(id)
                .into_iter()
                .map(|request| RequestRow {
                    id: request.id,
                    uid: request.uid.clone(),
                    title: request.title.clone(),
                    status: request.status.as_str(),
                    user: request.user.clone(),
                    branch_from: request.branch_from.clone(),
                    branch: request.branch.clone(),
                })
                .collect();
            let mut human = HumanOutput::new(format!("{} pull request(s) on {project}", rows.len()));
            for row in &rows {
                human.push_detail(format!(
                    "#{} [{}] {} ({} -> {})",
                    row.id, row.status, row.title, row.branch_from, row.branch
                ));
            }
            emit_success(options, "pr list", &rows, Some(&human))
        }
        PrCommand::Diff { request } => {
            let uid = resolve_request_uid(store, request)?;
            let text = service::pull_request_diff(store, config, &uid)?;
            if options.json {
                return emit_success(
                    options,
                    "pr diff",
                    &serde_json::json!({ "uid": uid, "diff": text }),
                    None,
                );
            }
            emit_raw(options, &text);
            Ok(())
        }
        PrCommand::Patch { request } => {
            let uid = resolve_request_uid(store, request)?;
            let text = service::pull_request_patch(store, config, &uid)?;
            if options.json {
                return emit_success(
                    options,
                    "pr patch",
                    &serde_json::json!({ "uid": uid, "patch": text }),
                    None,
                );
            }
            emit_raw(options, &text);
            Ok(())
        }
        PrCommand::Cat { request, path } => {
            let uid = resolve_request_uid(store, request)?;
            let contents = service::pull_request_file(store, config, &uid, path)?;
            if options.json {
                return emit_success(
                    options,
                    "pr cat",
                    &serde_json::json!({
                        "uid": uid,
                        "path": path,
                        "contents": String::from_utf8_lossy(&contents),
                    }),
                    None,
                );
            }
            emit_raw(options, &String::from_utf8_lossy(&contents));
            Ok(())
        }
        PrCommand::Analyze { request } => {
            let uid = resolve_request_uid(store, request)?;
            let readiness = service::analyze_pull_request(store, config, &uid)?;
            let mut human = HumanOutput::new("Merge analysis");
            human.push_summary("readiness", format!("{readiness:?}"));
            emit_success(
                options,
                "pr analyze",
                &serde_json::json!({ "uid": uid, "readiness": readiness }),
                Some(&human),
            )
        }
        PrCommand::Merge { request, user } => {
            let uid = resolve_request_uid(store, request)?;
            let outcome = service::merge_pull_request(store, config, notifiers, &uid, user)?;
            let (label, oid) = match outcome {
                merge::MergeOutcome::AlreadyMerged => ("already-merged", None),
                merge::MergeOutcome::FastForward(oid) => ("fast-forward", Some(oid)),
                merge::MergeOutcome::MergeCommitCreated(oid) => ("merge-commit", Some(oid)),
                merge::MergeOutcome::ConflictedAbort => ("conflicts", None),
            };
            let mut human = HumanOutput::new("Changes merged!");
            human.push_summary("outcome", label);
            if let Some(oid) = oid {
                human.push_summary("commit", oid.to_string());
            }
            emit_success(
                options,
                "pr merge",
                &serde_json::json!({
                    "uid": uid,
                    "outcome": label,
                    "commit": oid.map(|oid| oid.to_string()),
                }),
                Some(&human),
            )
        }
        PrCommand::Close { request, user } => {
            let uid = resolve_request_uid(store, request)?;
            service::close_pull_request(store, notifiers, &uid, user)?;
            let human = HumanOutput::new("Pull request closed");
            emit_success(
                options,
                "pr close",
                &serde_json::json!({ "uid": uid }),
                Some(&human),
            )
        }
        PrCommand::Reopen { request, user } => {
            let uid = resolve_request_uid(store, request)?;
            service::reopen_pull_request(store, notifiers, &uid, user)?;
            let human = HumanOutput::new("Pull request reopened");
            emit_success(
                options,
                "pr reopen",
                &serde_json::json!({ "uid": uid }),
                Some(&human),
            )
        }
        PrCommand::Comment {
            request,
            user,
            message,
        } => {
            let uid = resolve_request_uid(store, request)?;
            service::comment_on_request(store, notifiers, &uid, user, message)?;
            let human = HumanOutput::new("Comment added");
            emit_success(
                options,
                "pr comment",
                &serde_json::json!({ "uid": uid }),
                Some(&human),
            )
        }
        PrCommand::Assign { request, user, to } => {
            let uid = resolve_request_uid(store, request)?;
            service::assign_request(store, notifiers, &uid, user, to.as_deref())?;
            let human = HumanOutput::new(match to {
                Some(assignee) => format!("Assigned to {assignee}"),
                None => "Assignee cleared".to_string(),
            });
            emit_success(
                options,
                "pr assign",
                &serde_json::json!({ "uid": uid, "assignee": to }),
                Some(&human),
            )
        }
    }
}

fn run_acl(cmd: &AclCommand, store: &Store, config: &Config, options: OutputOptions) -> Result<()> {
    match cmd {
        AclCommand::Write => {
            service::regenerate_acls(store, config)?;
            let mut human = HumanOutput::new("Access control regenerated");
            human.push_summary(
                "gitolite config",
                config.acl.gitolite_config.display().to_string(),
            );
            human.push_summary(
                "authorized_keys",
                config.acl.authorized_keys.display().to_string(),
            );
            emit_success(
                options,
                "acl write",
                &serde_json::json!({
                    "gitolite_config": config.acl.gitolite_config,
                    "authorized_keys": config.acl.authorized_keys,
                }),
                Some(&human),
            )
        }
        AclCommand::Show => {
            let text = acl::synthesize_config(store);
            if options.json {
                return emit_success(
                    options,
                    "acl show",
                    &serde_json::json!({ "config": text }),
                    None,
                );
            }
            emit_raw(options, &text);
            Ok(())
        }
        AclCommand::Entries => {
            let entries = acl::access_entries(store);
            let mut human = HumanOutput::new(format!("{} access entries", entries.len()));
            for entry in &entries {
                let subject = match &entry.subject {
                    Subject::User(name) => name.clone(),
                    Subject::Group(name) => format!("@{name}"),
                };
                human.push_detail(format!(
                    "{} {} {}",
                    entry.project,
                    subject,
                    entry.level.as_str()
                ));
            }
            emit_success(options, "acl entries", &entries, Some(&human))
        }
    }
}

fn format_range(request: &crate::model::PullRequest) -> String {
    match (&request.commit_start, &request.commit_stop) {
        (Some(start), Some(stop)) => format!("{}..{}", &start[..8.min(start.len())], &stop[..8.min(stop.len())]),
        _ => "(unresolved)".to_string(),
    }
}
