//! Canonical identifiers for projects and tasks.
//!
//! Canonical ids are a kind prefix plus a 1-based, zero-padded counter value:
//! `PID-001`, `TID-042`. Values past 999 print in full (`PID-1000`).
//! Anything else is a legacy id.

use serde::{Deserialize, Serialize};

/// Prefix for project IDs
const PROJECT_PREFIX: &str = "PID";
/// Prefix for task IDs
const TASK_PREFIX: &str = "TID";

/// Minimum width of the numeric suffix
const PAD_WIDTH: usize = 3;

/// The two entity kinds held in the flat document collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Project,
    Task,
}

impl EntityKind {
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Project => PROJECT_PREFIX,
            Self::Task => TASK_PREFIX,
        }
    }

    /// Name of the singleton counter record for this kind.
    #[must_use]
    pub const fn counter_name(self) -> &'static str {
        match self {
            Self::Project => "projectCounter",
            Self::Task => "taskCounter",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Task => "task",
        }
    }

    #[must_use]
    pub const fn from_is_project(is_project: bool) -> Self {
        if is_project {
            Self::Project
        } else {
            Self::Task
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format a counter value as a canonical id (e.g., `format_id(Project, 7)` is "PID-007").
#[must_use]
pub fn format_id(kind: EntityKind, n: u64) -> String {
    format!("{}-{:0width$}", kind.prefix(), n, width = PAD_WIDTH)
}

/// Parse a canonical id into its kind and counter value.
///
/// Only ids that `format_id` could have produced are accepted, so `PID-0001`,
/// `PID-000` and `pid-001` are all rejected.
#[must_use]
pub fn parse_id(s: &str) -> Option<(EntityKind, u64)> {
    let (prefix, digits) = s.split_once('-')?;
    let kind = match prefix {
        PROJECT_PREFIX => EntityKind::Project,
        TASK_PREFIX => EntityKind::Task,
        _ => return None,
    };
    if digits.len() < PAD_WIDTH || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let n: u64 = digits.parse().ok()?;
    if n == 0 || format_id(kind, n) != s {
        return None;
    }
    Some((kind, n))
}

/// Check if a string is a canonical id of any kind.
#[must_use]
pub fn is_canonical(s: &str) -> bool {
    parse_id(s).is_some()
}

/// Check if a string is a canonical id of the given kind.
#[must_use]
pub fn is_canonical_for(s: &str, kind: EntityKind) -> bool {
    matches!(parse_id(s), Some((k, _)) if k == kind)
}
