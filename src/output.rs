//! Shared output formatting for forgekit CLI commands.

use serde::Serialize;

use crate::error::Result;

pub const SCHEMA_VERSION: &str = "forgekit.v1";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone)]
pub struct HumanOutput {
    header: String,
    summary: Vec<(String, String)>,
    details: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            summary: Vec::new(),
            details: Vec::new(),
        }
    }

    pub fn push_summary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.summary.push((key.into(), value.into()));
    }

    pub fn push_detail(&mut self, value: impl Into<String>) {
        self.details.push(value.into());
    }
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        #[derive(Serialize)]
        struct Envelope<'a, T: Serialize> {
            schema_version: &'static str,
            command: &'a str,
            status: &'static str,
            data: &'a T,
        }

        let payload = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "success",
            data,
        };

        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if options.quiet {
        return Ok(());
    }

    if let Some(human) = human {
        println!("{}", format_human(human));
    }

    Ok(())
}

/// Emit raw text untouched (diff/patch/ACL output that must stay byte-exact).
pub fn emit_raw(options: OutputOptions, text: &str) {
    if !options.quiet {
        print!("{text}");
    }
}

pub fn emit_error(command: &str, err: &crate::error::Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);
    if json {
        let mut error = serde_json::json!({
            "message": err.to_string(),
            "code": err.exit_code(),
            "kind": error_kind(err),
        });
        if let Some(details) = err.details() {
            error["details"] = details;
        }
        let mut payload = serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "command": command,
            "status": "error",
            "error": error,
        });
        if !next_steps.is_empty() {
            payload["next_steps"] = serde_json::json!(next_steps);
        }
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    eprintln!("error: {err}");
    if let Some(hint) = next_steps.first() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

pub fn format_human(output: &HumanOutput) -> String {
    let mut lines = Vec::new();
    lines.push(output.header.clone());

    if !output.summary.is_empty() {
        lines.push(String::new());
        for (key, value) in &output.summary {
            if value.is_empty() {
                lines.push(format!("- {key}"));
            } else {
                lines.push(format!("- {key}: {value}"));
            }
        }
    }

    if !output.details.is_empty() {
        lines.push(String::new());
        for item in &output.details {
            lines.push(item.clone());
        }
    }

    lines.join("\n")
}

/// Best-effort "command subcommand" label for error envelopes, recoverable
/// even when argument parsing itself fails.
pub fn infer_command_name_from_args() -> String {
    let mut positional = std::env::args()
        .skip(1)
        .filter(|arg| !arg.starts_with('-'));

    let command = match positional.next() {
        Some(command) => command,
        None => return "forgekit".to_string(),
    };
    let has_subcommands = matches!(
        command.as_str(),
        "user" | "group" | "project" | "pr" | "acl"
    );
    match positional.next() {
        Some(sub) if has_subcommands => format!("{command} {sub}"),
        _ => command,
    }
}

fn error_kind(err: &crate::error::Error) -> &'static str {
    match err.exit_code() {
        2 => "user_error",
        3 => "policy_blocked",
        _ => "operation_failed",
    }
}

fn error_next_steps(err: &crate::error::Error) -> Vec<String> {
    use crate::error::Error;

    match err {
        Error::MergeConflict => {
            vec!["resolve the conflicts on the source branch, push, and retry".to_string()]
        }
        Error::EmptyRepository(_) => vec!["push commits to the fork first".to_string()],
        Error::RepoNotFound(_) | Error::InvalidConfig(_) => {
            vec!["check the repository folders in forgekit.toml".to_string()]
        }
        Error::SignedOffRequired => {
            vec!["amend the commits with Signed-off-by trailers".to_string()]
        }
        Error::LockFailed(_) => {
            vec!["another merge is in flight on this branch; retry shortly".to_string()]
        }
        _ => Vec::new(),
    }
}
