//! Comment service: append and delete-by-match.
//!
//! Comments are never edited. Both operations rewrite only the stored
//! `comments` array, inside a write transaction, so other fields keep the
//! encoding they were stored with.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::{Comment, NewComment};
use crate::normalize::{normalize_comment_value, record_time_fallback};
use crate::store::{load_document, write_body, DocumentStore};

use super::{CoreError, CoreResult};

/// Service for comment operations.
pub struct CommentService<'a> {
    store: &'a DocumentStore,
}

impl<'a> CommentService<'a> {
    pub(crate) const fn new(store: &'a DocumentStore) -> Self {
        Self { store }
    }

    /// Append a comment stamped with the current time.
    ///
    /// Returns `Ok(false)` if the entity does not exist.
    pub fn add(&self, id: &str, comment: NewComment) -> CoreResult<bool> {
        if comment.author_id.trim().is_empty() {
            return Err(CoreError::validation("comment author is required"));
        }
        if comment.text.trim().is_empty() {
            return Err(CoreError::validation("comment text is required"));
        }

        let stored = Comment {
            author_id: comment.author_id,
            text: comment.text,
            timestamp: Utc::now(),
        };
        let element = serde_json::to_value(&stored).context("Failed to encode comment")?;

        let added = self.edit_comments(id, |comments, _| {
            comments.insert(0, element);
            true
        })?;
        if added {
            tracing::info!(id, author = %stored.author_id, "added comment");
        }
        Ok(added)
    }

    /// Remove every comment equal to `target` (author, text, and timestamp).
    ///
    /// Returns `Ok(false)` if the entity does not exist or nothing matched.
    pub fn remove(&self, id: &str, target: &Comment) -> CoreResult<bool> {
        let removed = self.edit_comments(id, |comments, fallback| {
            let before = comments.len();
            comments.retain(|value| {
                normalize_comment_value(id, value, fallback).as_ref() != Some(target)
            });
            comments.len() != before
        })?;
        if removed {
            tracing::info!(id, author = %target.author_id, "removed comment");
        }
        Ok(removed)
    }

    /// Run `edit` over the raw comment array; it returns whether to write.
    ///
    /// `edit` also receives the time that stands in for undated comments.
    fn edit_comments<F>(&self, id: &str, edit: F) -> CoreResult<bool>
    where
        F: FnOnce(&mut Vec<Value>, Option<DateTime<Utc>>) -> bool,
    {
        let tx = self
            .store
            .begin_immediate()
            .map_err(|e| CoreError::storage(e, "Failed to begin comment write"))?;
        let Some(doc) = load_document(&tx, id)? else {
            return Ok(false);
        };

        let mut body: Value = serde_json::from_str(&doc.body)
            .with_context(|| format!("Failed to parse document {id}"))?;
        let Some(map) = body.as_object_mut() else {
            return Err(CoreError::Internal(anyhow::anyhow!(
                "Document {id} is not a JSON object"
            )));
        };
        let fallback = record_time_fallback(map);
        let entry = map
            .entry("comments")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        if !entry
            .as_array_mut()
            .is_some_and(|comments| edit(comments, fallback))
        {
            return Ok(false);
        }

        write_body(&tx, id, &body)?;
        tx.commit()
            .map_err(|e| CoreError::storage(e, "Failed to commit comment write"))?;
        Ok(true)
    }
}
