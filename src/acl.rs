//! Access-control synthesis for the SSH git-access layer.
//!
//! Produces the gitolite-style configuration covering every repository root
//! of every project, plus an `authorized_keys` file whose entries are pinned
//! to a restricted command. Both outputs are regenerated from scratch and are
//! diffed/version-tracked downstream, so regeneration from unchanged input
//! must be byte-identical: every iteration below is over id- or name-sorted
//! collections, never raw map order.

use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::lock::write_atomic_str;
use crate::model::{AccessLevel, Project, Subject};
use crate::store::Store;

/// Derived permission row feeding the synthesizer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AccessEntry {
    pub project: String,
    pub subject: Subject,
    pub level: AccessLevel,
}

/// Flattened view of every grant on every project, owners included.
///
/// Ordered by project id, owner first, then explicit grants in grant order.
pub fn access_entries(store: &Store) -> Vec<AccessEntry> {
    let mut entries = Vec::new();
    for project in sorted_projects(store) {
        let fullname = project.fullname();
        entries.push(AccessEntry {
            project: fullname.clone(),
            subject: Subject::User(project.owner.clone()),
            level: AccessLevel::Owner,
        });
        for grant in &project.grants {
            entries.push(AccessEntry {
                project: fullname.clone(),
                subject: grant.subject.clone(),
                level: grant.level,
            });
        }
    }
    entries
}

fn sorted_projects(store: &Store) -> Vec<&Project> {
    let mut projects: Vec<&Project> = store.projects().iter().collect();
    projects.sort_by_key(|project| project.id);
    projects
}

/// Render the gitolite-style configuration for every project.
///
/// Group definitions come first (sorted by name), then one block per
/// repository root per project: read for everyone, read-write for the owner
/// and each non-owner grantee. Fork code repositories carry the `forks/`
/// prefix.
pub fn synthesize_config(store: &Store) -> String {
    let mut output = String::new();

    // Only groups actually granted somewhere make it into the header.
    let mut granted_groups: Vec<&str> = store
        .projects()
        .iter()
        .flat_map(|project| project.group_grantees().map(|(name, _)| name))
        .collect();
    granted_groups.sort_unstable();
    granted_groups.dedup();

    for name in &granted_groups {
        let members = store
            .group(name)
            .map(|group| group.members.join(" "))
            .unwrap_or_default();
        output.push_str(&format!("@{name}   = {members}\n"));
    }
    output.push('\n');

    for project in sorted_projects(store) {
        let fullname = project.fullname();
        let code_prefix = if project.is_fork() { "forks/" } else { "" };
        for prefix in [code_prefix, "docs/", "tickets/", "requests/"] {
            output.push_str(&format!("repo {prefix}{fullname}\n"));
            output.push_str("  R   = @all\n");

            let groups: Vec<String> = project
                .group_grantees()
                .map(|(name, _)| format!("@{name}"))
                .collect();
            if !groups.is_empty() {
                output.push_str(&format!("  RW+ = {}\n", groups.join(" ")));
            }

            output.push_str(&format!("  RW+ = {}\n", project.owner));
            for (user, _) in project.user_grantees() {
                if user != project.owner {
                    output.push_str(&format!("  RW+ = {user}\n"));
                }
            }
            output.push('\n');
        }
    }

    output
}

/// Render the `authorized_keys` file.
///
/// One line per registered key, users sorted by username, each key pinned to
/// the restricted auth command so key holders never get a shell.
pub fn synthesize_authorized_keys(store: &Store, auth_command: &str) -> String {
    let mut output = String::from("# gitolite start\n");

    let mut users: Vec<_> = store.users().iter().collect();
    users.sort_by(|a, b| a.username.cmp(&b.username));

    for user in users {
        for key in &user.public_keys {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            output.push_str(&format!(
                "command=\"{auth_command} {user}\",no-port-forwarding,no-X11-forwarding,\
                 no-agent-forwarding,no-pty {key}\n",
                auth_command = auth_command,
                user = user.username,
                key = key,
            ));
        }
    }

    output.push_str("# gitolite end\n");
    output
}

/// Regenerate every access-control artifact: the gitolite config, the
/// authorized_keys file, and one `<user>.pub` file per user with keys.
pub fn write_acls(store: &Store, config: &Config) -> Result<()> {
    write_atomic_str(&config.acl.gitolite_config, &synthesize_config(store))?;
    write_atomic_str(
        &config.acl.authorized_keys,
        &synthesize_authorized_keys(store, &config.acl.auth_command),
    )?;

    for user in store.users() {
        if user.public_keys.is_empty() {
            continue;
        }
        let mut contents = String::new();
        for key in &user.public_keys {
            let key = key.trim();
            if !key.is_empty() {
                contents.push_str(key);
                contents.push('\n');
            }
        }
        write_atomic_str(
            config.acl.key_dir.join(format!("{}.pub", user.username)),
            &contents,
        )?;
    }

    Ok(())
}
