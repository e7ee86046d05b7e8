//! Implementation of `taskvault comments` subcommands.

use anyhow::{bail, Result};
use std::path::Path;

use taskvault_core::access::Action;
use taskvault_core::identity::resolve_actor;
use taskvault_core::model::NewComment;

use crate::cli::commands::helpers::{not_found_error, open_services, require};
use crate::output::{Formatter, OutputFormat};

/// Add a comment to a project or task.
#[tracing::instrument(skip(root, text, format))]
pub fn run_comments_add(
    root: &Path,
    id: &str,
    text: &str,
    actor: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    require(Action::Comment)?;
    let author = resolve_actor(actor)?;
    let services = open_services(root)?;

    let comment = NewComment {
        author_id: author.clone(),
        text: text.to_string(),
    };
    if !services.add_comment(id, comment)? {
        return Err(not_found_error(id));
    }

    Formatter::new(format).print(&serde_json::json!({
        "id": id,
        "authorId": author,
        "text": text,
    }))
}

/// List comments, newest first, with their removal index.
pub fn run_comments_list(root: &Path, id: &str, format: OutputFormat) -> Result<()> {
    let services = open_services(root)?;
    let entity = services.get(id)?.ok_or_else(|| not_found_error(id))?;

    let rows: Vec<serde_json::Value> = entity
        .fields()
        .comments
        .iter()
        .enumerate()
        .map(|(index, c)| {
            serde_json::json!({
                "index": index,
                "authorId": c.author_id,
                "timestamp": c.timestamp,
                "text": c.text,
            })
        })
        .collect();

    Formatter::new(format).print_list(
        &rows,
        "No comments",
        "comments",
        &["taskvault comments add <id> <text>"],
    )
}

/// Remove the comment at `index` in the newest-first listing.
#[tracing::instrument(skip(root, format))]
pub fn run_comments_remove(
    root: &Path,
    id: &str,
    index: usize,
    format: OutputFormat,
) -> Result<()> {
    require(Action::Comment)?;
    let services = open_services(root)?;
    let entity = services.get(id)?.ok_or_else(|| not_found_error(id))?;

    let Some(target) = entity.fields().comments.get(index).cloned() else {
        bail!(
            "No comment at index {index} on {id}\n  To fix: taskvault comments list {id}"
        );
    };
    let removed = services.remove_comment(id, &target)?;

    Formatter::new(format).print(&serde_json::json!({
        "id": id,
        "removed": removed,
        "authorId": target.author_id,
        "text": target.text,
    }))
}
