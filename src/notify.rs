//! Notification boundary for external integrations.
//!
//! The engine emits structured events at pull-request transitions; delivery
//! is someone else's job. Dispatchers implement the `Notifier` capability and
//! are registered explicitly in a `NotifierRegistry`; there is no runtime
//! discovery of handler types.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};

pub const EVENT_SCHEMA_VERSION: &str = "forgekit.event.v1";

/// High-level event kinds emitted by the engine.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RequestCreated,
    RequestMerged,
    RequestClosed,
    RequestReopened,
    RequestCommented,
    RequestAssigned,
}

/// A structured event with optional payload.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub schema_version: &'static str,
    pub event: EventKind,
    pub timestamp: DateTime<Utc>,
    /// User who caused the transition.
    pub actor: String,
    /// Fullname of the target project.
    pub project: String,
    /// Per-project pull request id.
    pub request_id: u64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    pub fn new(
        event: EventKind,
        actor: impl Into<String>,
        project: impl Into<String>,
        request_id: u64,
        title: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION,
            event,
            timestamp: Utc::now(),
            actor: actor.into(),
            project: project.into(),
            request_id,
            title: title.into(),
            data: None,
        }
    }

    /// Attach a serializable payload to the event.
    pub fn with_data<T: Serialize>(mut self, data: T) -> Result<Self> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(self)
    }
}

/// A notification dispatcher.
pub trait Notifier: Send {
    fn notify(&mut self, event: &Event) -> Result<()>;
}

/// Explicit registry of dispatchers; events fan out to every entry.
#[derive(Default)]
pub struct NotifierRegistry {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, notifier: Box<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Deliver an event to every registered dispatcher. The first failure
    /// aborts the fan-out.
    pub fn broadcast(&mut self, event: &Event) -> Result<()> {
        for notifier in &mut self.notifiers {
            notifier.notify(event)?;
        }
        Ok(())
    }
}

/// Where JSONL events go.
#[derive(Debug, Clone)]
pub enum EventDestination {
    Stdout,
    File(PathBuf),
}

impl EventDestination {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed == "-" {
                return Some(EventDestination::Stdout);
            }
            Some(EventDestination::File(PathBuf::from(trimmed)))
        })
    }

    pub fn open(&self) -> Result<JsonlNotifier> {
        match self {
            EventDestination::Stdout => Ok(JsonlNotifier::stdout()),
            EventDestination::File(path) => JsonlNotifier::file(path),
        }
    }
}

/// Notifier writing one JSON line per event.
pub struct JsonlNotifier {
    writer: Box<dyn Write + Send>,
}

impl JsonlNotifier {
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(std::io::stdout()),
        }
    }

    pub fn file(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Box::new(file),
        })
    }
}

impl Notifier for JsonlNotifier {
    fn notify(&mut self, event: &Event) -> Result<()> {
        let serialized = serde_json::to_vec(event)?;
        self.writer.write_all(&serialized)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().map_err(Error::Io)?;
        Ok(())
    }
}
