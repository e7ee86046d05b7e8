//! Authorization seam.
//!
//! The store trusts its caller: before invoking a mutating operation the
//! caller asks an [`Authorizer`] whether the action is allowed. Nothing in
//! this crate consults the authorizer itself.

use serde::Serialize;

/// A mutating action a caller may be allowed or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    CreateProject,
    CreateTask,
    Update,
    Delete,
    Comment,
    Migrate,
}

impl Action {
    pub const ALL: [Self; 6] = [
        Self::CreateProject,
        Self::CreateTask,
        Self::Update,
        Self::Delete,
        Self::Comment,
        Self::Migrate,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateProject => "create-project",
            Self::CreateTask => "create-task",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Comment => "comment",
            Self::Migrate => "migrate",
        }
    }

    /// Parse an action name as written in policy lists.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.into_iter().find(|a| a.as_str().eq_ignore_ascii_case(s))
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allow/deny predicate supplied by the authorization collaborator.
pub trait Authorizer {
    fn allowed(&self, action: Action) -> bool;
}

/// Authorizer that permits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn allowed(&self, _action: Action) -> bool {
        true
    }
}

/// Authorizer that denies a fixed set of actions.
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    denied: Vec<Action>,
}

impl DenyList {
    #[must_use]
    pub const fn new(denied: Vec<Action>) -> Self {
        Self { denied }
    }

    /// Build from a comma-separated list such as `"delete,migrate"`.
    ///
    /// Unknown names are ignored; `*` denies every action.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        if list.split(',').any(|s| s.trim() == "*") {
            return Self::new(Action::ALL.to_vec());
        }
        Self::new(list.split(',').filter_map(Action::parse).collect())
    }
}

impl Authorizer for DenyList {
    fn allowed(&self, action: Action) -> bool {
        !self.denied.contains(&action)
    }
}
