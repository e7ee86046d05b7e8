//! CLI command definitions and handlers.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use taskvault_core::ids::EntityKind;
use taskvault_core::model::{Priority, Status};

use crate::output::OutputFormat;

pub mod commands;

/// Shared project and task store with canonical ids
#[derive(Parser, Debug)]
#[command(name = "taskvault")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Shorthand for --format json
    #[arg(long, global = true)]
    pub json: bool,

    /// Override actor identity (default: $TASKVAULT_ACTOR or $TV_ACTOR or $USER)
    #[arg(long, global = true)]
    pub actor: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Directory holding the .taskvault store (default: current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    #[must_use]
    pub const fn output_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new .taskvault directory
    Init,

    /// Manage projects
    #[command(subcommand)]
    Projects(ProjectsCommands),

    /// Manage tasks
    #[command(subcommand)]
    Tasks(TasksCommands),

    /// Update fields of a project or task
    Update {
        /// Entity ID (PID-... or TID-...)
        id: String,

        #[command(flatten)]
        args: UpdateArgs,
    },

    /// Delete a project (with all its tasks) or a task
    Delete {
        /// Entity ID
        id: String,
    },

    /// Manage comments
    #[command(subcommand)]
    Comments(CommentsCommands),

    /// List the tasks of a project
    Children {
        /// Project ID
        project_id: String,
    },

    /// Reserve the next canonical id without creating anything
    Allocate {
        #[arg(value_enum)]
        kind: EntityKind,
    },

    /// Load raw records written by older clients (one JSON object per line)
    Import {
        /// JSONL file; each line needs "id" and "isProject"
        file: PathBuf,
    },

    /// Rewrite legacy ids to canonical ids
    Migrate {
        /// Show migration state instead of running it
        #[arg(long)]
        status: bool,
    },

    /// Follow the store and print each change as it lands
    Watch {
        /// Print one snapshot and exit
        #[arg(long)]
        once: bool,

        /// Exit after this many publications
        #[arg(long)]
        count: Option<u64>,
    },
}

// ============================================================================
// Shared field arguments
// ============================================================================

#[derive(Args, Debug, Clone, Default)]
pub struct CreateArgs {
    /// Project name or task title
    #[arg(long)]
    pub title: String,

    /// Optional description
    #[arg(long = "description", visible_alias = "desc")]
    pub description: Option<String>,

    #[arg(long, value_enum)]
    pub status: Option<Status>,

    #[arg(long, value_enum)]
    pub priority: Option<Priority>,

    /// Assignee id (repeatable)
    #[arg(long = "assignee")]
    pub assignees: Vec<String>,

    /// Start date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub start: Option<String>,

    /// Due date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub due: Option<String>,

    /// Attach a local file by path (repeatable)
    #[arg(long = "attach")]
    pub attachments: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct UpdateArgs {
    #[arg(long)]
    pub title: Option<String>,

    #[arg(long = "description", visible_alias = "desc")]
    pub description: Option<String>,

    #[arg(long, value_enum)]
    pub status: Option<Status>,

    #[arg(long, value_enum)]
    pub priority: Option<Priority>,

    /// Replace the assignee list (repeatable)
    #[arg(long = "assignee")]
    pub assignees: Option<Vec<String>>,

    #[arg(long, conflicts_with = "clear_start")]
    pub start: Option<String>,

    /// Remove the start date
    #[arg(long)]
    pub clear_start: bool,

    #[arg(long, conflicts_with = "clear_due")]
    pub due: Option<String>,

    /// Remove the due date
    #[arg(long)]
    pub clear_due: bool,

    /// Parent project; must match the current one
    #[arg(long)]
    pub project: Option<String>,
}

// ============================================================================
// Projects subcommands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum ProjectsCommands {
    /// Create a project
    Create(CreateArgs),

    /// List projects
    List,

    /// Show project details
    Show {
        /// Project ID
        id: String,
    },
}

// ============================================================================
// Tasks subcommands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum TasksCommands {
    /// Create a task
    Create {
        #[command(flatten)]
        args: CreateArgs,

        /// Parent project ID
        #[arg(long)]
        project: Option<String>,
    },

    /// List tasks
    List {
        /// Only tasks of this project
        #[arg(long)]
        project: Option<String>,

        /// Filter by status
        #[arg(long, value_enum)]
        status: Option<Status>,
    },

    /// Show task details
    Show {
        /// Task ID
        id: String,
    },
}

// ============================================================================
// Comments subcommands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum CommentsCommands {
    /// Add a comment to a project or task
    Add {
        /// Entity ID
        id: String,

        /// Comment text
        text: String,
    },

    /// List comments, newest first
    List {
        /// Entity ID
        id: String,
    },

    /// Remove a comment by its position in `comments list` (0 = newest)
    Remove {
        /// Entity ID
        id: String,

        #[arg(long)]
        index: usize,
    },
}
