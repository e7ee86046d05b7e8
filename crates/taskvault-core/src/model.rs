//! Domain model for the work-item store.
//!
//! Projects and tasks share one flat collection. In memory they are an
//! explicit tagged union, [`Entity`]; every optional field has a typed default
//! filled in by the normalizer, so consumers never see a half-formed record.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EntityKind;

/// Title given to projects stored without a usable name.
pub const UNTITLED_PROJECT: &str = "Untitled Project";
/// Title given to tasks stored without a usable title.
pub const UNTITLED_TASK: &str = "Untitled Task";

// ============================================================================
// Status / Priority
// ============================================================================

/// Lifecycle status: `not-started → in-progress → {completed, canceled}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Canceled,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }

    /// Parse the spellings found in stored records ("Not Started", "in_progress", "done", ...).
    #[must_use]
    pub fn parse_lenient(s: &str) -> Option<Self> {
        let key = s.trim().to_ascii_lowercase().replace([' ', '_'], "-");
        match key.as_str() {
            "not-started" | "notstarted" | "todo" | "pending" | "open" => Some(Self::NotStarted),
            "in-progress" | "inprogress" | "active" | "ongoing" | "started" => {
                Some(Self::InProgress)
            }
            "completed" | "complete" | "done" | "closed" => Some(Self::Completed),
            "canceled" | "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Apply the automatic start transition.
    ///
    /// A `not-started` item whose start date is today or earlier becomes
    /// `in-progress`. Every other status is returned unchanged.
    #[must_use]
    pub fn with_start_rule(self, start_date: Option<DateTime<Utc>>, today: NaiveDate) -> Self {
        match (self, start_date) {
            (Self::NotStarted, Some(start)) if start.date_naive() <= today => Self::InProgress,
            _ => self,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    #[must_use]
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" | "critical" => Some(Self::Urgent),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Comments / Attachments
// ============================================================================

/// Append-only comment. Never edited; removed only by exact match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub author_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Where an attachment's bytes live. The blob store owns them either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentSource {
    /// Path in the external blob store
    Path(String),
    /// Inline-encoded payload (e.g., base64)
    Inline(String),
}

/// Attachment metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub size: u64,
    pub media_kind: String,
    #[serde(flatten)]
    pub source: AttachmentSource,
    pub uploaded_at: DateTime<Utc>,
    /// Stable per-file key (name + upload time) for list rendering.
    pub key: String,
}

impl Attachment {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        size: u64,
        media_kind: impl Into<String>,
        source: AttachmentSource,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        let key = attachment_key(&name, &uploaded_at);
        Self {
            name,
            size,
            media_kind: media_kind.into(),
            source,
            uploaded_at,
            key,
        }
    }
}

/// Build the unique key of an attachment.
#[must_use]
pub fn attachment_key(name: &str, uploaded_at: &DateTime<Utc>) -> String {
    format!("{name}-{}", uploaded_at.timestamp_millis())
}

// ============================================================================
// Entities
// ============================================================================

/// Fields shared by projects and tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFields {
    pub description: String,
    pub status: Status,
    pub priority: Priority,
    pub assignees: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    /// Newest first.
    pub comments: Vec<Comment>,
    pub attachments: Vec<Attachment>,
}

/// Container entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub fields: ItemFields,
    /// Denormalized ids of every task whose `projectId` is this project.
    pub sub_task_ids: Vec<String>,
}

/// Unit of work, optionally owned by a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(flatten)]
    pub fields: ItemFields,
    pub project_id: Option<String>,
}

/// A normalized document from the flat collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entity {
    Project(Project),
    Task(Task),
}

impl Entity {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Project(p) => &p.id,
            Self::Task(t) => &t.id,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Project(_) => EntityKind::Project,
            Self::Task(_) => EntityKind::Task,
        }
    }

    #[must_use]
    pub const fn is_project(&self) -> bool {
        matches!(self, Self::Project(_))
    }

    /// Project name or task title.
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Project(p) => &p.name,
            Self::Task(t) => &t.title,
        }
    }

    pub fn set_title(&mut self, title: String) {
        match self {
            Self::Project(p) => p.name = title,
            Self::Task(t) => t.title = title,
        }
    }

    #[must_use]
    pub const fn fields(&self) -> &ItemFields {
        match self {
            Self::Project(p) => &p.fields,
            Self::Task(t) => &t.fields,
        }
    }

    pub fn fields_mut(&mut self) -> &mut ItemFields {
        match self {
            Self::Project(p) => &mut p.fields,
            Self::Task(t) => &mut t.fields,
        }
    }

    /// Parent project of a task; always `None` for projects.
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::Project(_) => None,
            Self::Task(t) => t.project_id.as_deref(),
        }
    }

    /// Child ids of a project; always empty for tasks.
    #[must_use]
    pub fn sub_task_ids(&self) -> &[String] {
        match self {
            Self::Project(p) => &p.sub_task_ids,
            Self::Task(_) => &[],
        }
    }

    #[must_use]
    pub const fn as_task(&self) -> Option<&Task> {
        match self {
            Self::Task(t) => Some(t),
            Self::Project(_) => None,
        }
    }

    #[must_use]
    pub fn into_task(self) -> Option<Task> {
        match self {
            Self::Task(t) => Some(t),
            Self::Project(_) => None,
        }
    }
}

// ============================================================================
// Operation payloads
// ============================================================================

/// Payload for creating a project or task.
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub kind: EntityKind,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub assignees: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    /// Parent project (tasks only).
    pub project_id: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl NewEntity {
    #[must_use]
    pub fn project(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Project, name.into())
    }

    #[must_use]
    pub fn task(title: impl Into<String>) -> Self {
        Self::new(EntityKind::Task, title.into())
    }

    const fn new(kind: EntityKind, title: String) -> Self {
        Self {
            kind,
            title,
            description: None,
            status: None,
            priority: None,
            assignees: Vec::new(),
            start_date: None,
            due_date: None,
            project_id: None,
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn in_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    #[must_use]
    pub const fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub const fn with_start_date(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = Some(start_date);
        self
    }
}

/// Partial update. `None` leaves a field untouched; for the dates,
/// `Some(None)` clears the stored value.
#[derive(Debug, Clone, Default)]
pub struct EntityPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub assignees: Option<Vec<String>>,
    pub start_date: Option<Option<DateTime<Utc>>>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    /// Present only to be rejected when it differs from the stored parent.
    pub project_id: Option<Option<String>>,
    pub attachments: Option<Vec<Attachment>>,
}

impl EntityPatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.assignees.is_none()
            && self.start_date.is_none()
            && self.due_date.is_none()
            && self.project_id.is_none()
            && self.attachments.is_none()
    }
}

/// Payload for appending a comment.
#[derive(Debug, Clone)]
pub struct NewComment {
    pub author_id: String,
    pub text: String,
}
