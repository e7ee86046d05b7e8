//! Entity normalizer.
//!
//! Turns stored documents into [`Entity`] values. Stored records come from
//! several generations of clients, so the reader is loose:
//! - timestamps may be RFC 3339 strings, bare dates, epoch milliseconds, or
//!   `{seconds, nanoseconds}` objects (with or without leading underscores)
//! - any field may be missing or hold an unexpected type; such fields get
//!   typed defaults here and nowhere else
//!
//! Only a body that is not a JSON object is unreadable.
//!
//! Output is canonical: comments newest first, attachment keys filled in,
//! blank titles replaced.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::model::{
    Attachment, AttachmentSource, Comment, Entity, ItemFields, Priority, Project, Status, Task,
    UNTITLED_PROJECT, UNTITLED_TASK,
};
use crate::store::RawDocument;

/// Convert any timestamp-like value into a UTC instant.
///
/// Returns `None` for values that carry no recognizable time.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .and_then(DateTime::from_timestamp_millis),
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0);
            DateTime::from_timestamp(seconds, nanos)
        }
        _ => None,
    }
}

/// Parse a timestamp string: RFC 3339, naive datetime (assumed UTC), or a bare date.
#[must_use]
pub fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

// ============================================================================
// Field readers
// ============================================================================
//
// Each reader takes the first present key and falls back to `None` (or an
// empty list) when the stored value has an unexpected shape.

fn field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k)).filter(|v| !v.is_null())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    field(map, keys).and_then(scalar_text)
}

fn non_blank_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    text(map, keys).filter(|v| !v.trim().is_empty())
}

/// A list of ids. A lone string counts as a one-element list.
fn text_list(map: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    match field(map, keys) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(scalar_text)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn timestamp(map: &Map<String, Value>, keys: &[&str]) -> Option<DateTime<Utc>> {
    field(map, keys).and_then(parse_timestamp)
}

/// Byte size stored as an integer, a float, or a numeric string.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn size(map: &Map<String, Value>) -> u64 {
    match field(map, &["size"]) {
        Some(Value::Number(n)) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f.round() as u64)
        }),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .unwrap_or(0)
}

fn object_list<'a>(map: &'a Map<String, Value>, key: &str) -> Vec<&'a Map<String, Value>> {
    match map.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

/// Time shown for comments and attachments stored without one.
#[must_use]
pub fn record_time_fallback(map: &Map<String, Value>) -> Option<DateTime<Utc>> {
    timestamp(map, &["createdAt"]).or_else(|| timestamp(map, &["updatedAt"]))
}

/// Parse a stored body into its top-level object.
///
/// # Errors
///
/// Returns an error if the body is not JSON or not an object.
pub fn parse_body(doc: &RawDocument) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(&doc.body)
        .with_context(|| format!("Malformed document body for {}", doc.id))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => bail!("Document {} is not a JSON object", doc.id),
    }
}

/// Normalize a single stored document.
///
/// # Errors
///
/// Returns an error only when [`parse_body`] does.
pub fn normalize_document(doc: &RawDocument) -> Result<Entity> {
    let map = parse_body(doc)?;
    let fallback = record_time_fallback(&map);

    let mut comments: Vec<Comment> = map
        .get("comments")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| normalize_comment_value(&doc.id, c, fallback))
                .collect()
        })
        .unwrap_or_default();
    comments.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let attachments = object_list(&map, "attachments")
        .into_iter()
        .filter_map(|a| normalize_attachment(&doc.id, a, fallback))
        .collect();

    let fields = ItemFields {
        description: text(&map, &["description"]).unwrap_or_default(),
        status: text(&map, &["status"])
            .as_deref()
            .and_then(Status::parse_lenient)
            .unwrap_or_default(),
        priority: text(&map, &["priority"])
            .as_deref()
            .and_then(Priority::parse_lenient)
            .unwrap_or_default(),
        assignees: text_list(&map, &["assignees", "assignedTo"]),
        start_date: timestamp(&map, &["startDate"]),
        due_date: timestamp(&map, &["dueDate"]),
        created_at: timestamp(&map, &["createdAt"]),
        created_by: non_blank_text(&map, &["createdBy"]),
        updated_at: timestamp(&map, &["updatedAt"]),
        updated_by: non_blank_text(&map, &["updatedBy"]),
        comments,
        attachments,
    };

    let entity = if doc.is_project {
        let mut sub_task_ids = Vec::new();
        for id in text_list(&map, &["subTaskIds"]) {
            if !sub_task_ids.contains(&id) {
                sub_task_ids.push(id);
            }
        }
        Entity::Project(Project {
            id: doc.id.clone(),
            name: non_blank_text(&map, &["name", "title"])
                .unwrap_or_else(|| UNTITLED_PROJECT.to_string()),
            fields,
            sub_task_ids,
        })
    } else {
        Entity::Task(Task {
            id: doc.id.clone(),
            title: non_blank_text(&map, &["title", "name"])
                .unwrap_or_else(|| UNTITLED_TASK.to_string()),
            fields,
            project_id: non_blank_text(&map, &["projectId"]).or_else(|| doc.project_id.clone()),
        })
    };
    Ok(entity)
}

/// Read one stored comment element the way [`normalize_document`] does.
///
/// `fallback` stands in for a missing or unreadable timestamp.
pub(crate) fn normalize_comment_value(
    doc_id: &str,
    value: &Value,
    fallback: Option<DateTime<Utc>>,
) -> Option<Comment> {
    let map = value.as_object()?;
    let Some(text) = text(map, &["text", "comment", "body"]) else {
        tracing::warn!(doc_id, "dropping comment without text");
        return None;
    };
    Some(Comment {
        author_id: text_of(map, &["authorId", "author", "userId"]),
        text,
        timestamp: timestamp(map, &["timestamp", "createdAt"])
            .or(fallback)
            .unwrap_or_default(),
    })
}

fn text_of(map: &Map<String, Value>, keys: &[&str]) -> String {
    text(map, keys).unwrap_or_default()
}

fn normalize_attachment(
    doc_id: &str,
    map: &Map<String, Value>,
    fallback: Option<DateTime<Utc>>,
) -> Option<Attachment> {
    let name = text_of(map, &["name"]);
    let source = match (
        non_blank_text(map, &["path", "url", "storagePath"]),
        text(map, &["inline", "data", "base64"]),
    ) {
        (Some(path), _) => AttachmentSource::Path(path),
        (None, Some(inline)) => AttachmentSource::Inline(inline),
        (None, None) => {
            tracing::warn!(doc_id, name, "dropping attachment without path or payload");
            return None;
        }
    };
    Some(Attachment::new(
        name,
        size(map),
        non_blank_text(map, &["mediaKind", "type", "kind"])
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        source,
        timestamp(map, &["uploadedAt", "timestamp", "createdAt"])
            .or(fallback)
            .unwrap_or_default(),
    ))
}

/// Normalize a whole collection, skipping (and logging) unreadable records.
#[must_use]
pub fn normalize_all(docs: &[RawDocument]) -> Vec<Entity> {
    docs.iter()
        .filter_map(|doc| match normalize_document(doc) {
            Ok(entity) => Some(entity),
            Err(e) => {
                tracing::warn!(doc_id = %doc.id, error = %e, "skipping unreadable document");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(id: &str, is_project: bool, body: &Value) -> RawDocument {
        RawDocument {
            id: id.to_string(),
            is_project,
            project_id: None,
            body: body.to_string(),
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_timestamp_encodings_agree() {
        let expected = at("2024-05-01T12:30:00Z");
        assert_eq!(parse_timestamp(&json!("2024-05-01T12:30:00Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-05-01T14:30:00+02:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-05-01T12:30:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!(expected.timestamp_millis())), Some(expected));
        assert_eq!(
            parse_timestamp(&json!({"seconds": expected.timestamp(), "nanoseconds": 0})),
            Some(expected)
        );
        assert_eq!(
            parse_timestamp(&json!({"_seconds": expected.timestamp(), "_nanoseconds": 0})),
            Some(expected)
        );
    }

    #[test]
    fn test_bare_date_is_midnight_utc() {
        assert_eq!(
            parse_timestamp(&json!("2024-05-01")),
            Some(at("2024-05-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_unrecognized_timestamps() {
        assert_eq!(parse_timestamp(&json!("next tuesday")), None);
        assert_eq!(parse_timestamp(&json!("")), None);
        assert_eq!(parse_timestamp(&json!(true)), None);
        assert_eq!(parse_timestamp(&json!({"minutes": 3})), None);
    }

    #[test]
    fn test_blank_titles_get_defaults() {
        let project = normalize_document(&raw("p", true, &json!({"name": "  "}))).unwrap();
        assert_eq!(project.title(), UNTITLED_PROJECT);

        let task = normalize_document(&raw("t", false, &json!({}))).unwrap();
        assert_eq!(task.title(), UNTITLED_TASK);
    }

    #[test]
    fn test_is_project_comes_from_stored_flag() {
        // Body claims otherwise; the stored flag wins
        let doc = raw("x", true, &json!({"isProject": false, "title": "T"}));
        let entity = normalize_document(&doc).unwrap();
        assert!(entity.is_project());
        assert_eq!(entity.title(), "T");
    }

    #[test]
    fn test_comments_sorted_newest_first() {
        let doc = raw(
            "t",
            false,
            &json!({
                "title": "T",
                "comments": [
                    {"authorId": "a", "text": "first", "timestamp": "2024-01-01T00:00:00Z"},
                    {"authorId": "b", "text": "third", "timestamp": 1_714_521_600_000_i64},
                    {"author": "c", "comment": "second", "createdAt": {"seconds": 1_706_745_600, "nanoseconds": 0}}
                ]
            }),
        );
        let entity = normalize_document(&doc).unwrap();
        let texts: Vec<&str> = entity
            .fields()
            .comments
            .iter()
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(texts, vec!["third", "second", "first"]);
        assert_eq!(entity.fields().comments[1].author_id, "c");
    }

    #[test]
    fn test_attachments_get_keys() {
        let doc = raw(
            "t",
            false,
            &json!({
                "attachments": [
                    {"name": "a.png", "size": 10, "type": "image/png", "url": "blobs/a.png", "timestamp": 1000},
                    {"name": "b.txt", "size": 3, "data": "aGk=", "uploadedAt": "1970-01-01T00:00:02Z"},
                    {"name": "orphan"}
                ]
            }),
        );
        let entity = normalize_document(&doc).unwrap();
        let attachments = &entity.fields().attachments;
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].key, "a.png-1000");
        assert_eq!(attachments[0].source, AttachmentSource::Path("blobs/a.png".into()));
        assert_eq!(attachments[1].key, "b.txt-2000");
        assert_eq!(attachments[1].source, AttachmentSource::Inline("aGk=".into()));
    }

    #[test]
    fn test_loose_status_and_duplicate_children() {
        let doc = raw(
            "p",
            true,
            &json!({
                "name": "P",
                "status": "In Progress",
                "priority": "HIGH",
                "subTaskIds": ["t1", "t2", "t1"]
            }),
        );
        let entity = normalize_document(&doc).unwrap();
        assert_eq!(entity.fields().status, Status::InProgress);
        assert_eq!(entity.fields().priority, Priority::High);
        assert_eq!(entity.sub_task_ids(), ["t1", "t2"]);
    }

    #[test]
    fn test_normalize_all_skips_garbage() {
        let docs = vec![
            raw("good", false, &json!({"title": "ok"})),
            RawDocument {
                id: "bad".into(),
                is_project: false,
                project_id: None,
                body: "not json".into(),
            },
            raw("not-an-object", false, &json!(["title", "x"])),
        ];
        let entities = normalize_all(&docs);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id(), "good");
    }

    #[test]
    fn test_mistyped_fields_fall_back() {
        let doc = raw(
            "t",
            false,
            &json!({
                "title": "T",
                "assignees": "alice",
                "description": ["not", "text"],
                "status": 7,
                "dueDate": "soon",
                "comments": {"oops": true},
                "attachments": [
                    {"name": "a.bin", "size": "12", "url": "blobs/a", "timestamp": 5},
                    {"name": "b.bin", "size": 3.6, "url": "blobs/b", "timestamp": 6},
                    "stray"
                ]
            }),
        );
        let entity = normalize_document(&doc).unwrap();
        let fields = entity.fields();
        assert_eq!(entity.title(), "T");
        assert_eq!(fields.assignees, ["alice"]);
        assert_eq!(fields.description, "");
        assert_eq!(fields.status, Status::NotStarted);
        assert!(fields.due_date.is_none());
        assert!(fields.comments.is_empty());
        assert_eq!(fields.attachments[0].size, 12);
        assert_eq!(fields.attachments[1].size, 4);
    }

    #[test]
    fn test_missing_comment_time_uses_record_time() {
        let doc = raw(
            "t",
            false,
            &json!({
                "title": "T",
                "createdAt": "2024-03-01T09:00:00Z",
                "comments": [{"authorId": "u", "text": "hi"}],
                "attachments": [{"name": "a.txt", "url": "blobs/a.txt"}]
            }),
        );
        let entity = normalize_document(&doc).unwrap();
        let created = at("2024-03-01T09:00:00Z");
        assert_eq!(entity.fields().comments[0].timestamp, created);
        assert_eq!(entity.fields().attachments[0].uploaded_at, created);
        assert_eq!(
            entity.fields().attachments[0].key,
            format!("a.txt-{}", created.timestamp_millis())
        );
    }

    #[test]
    fn test_stored_entity_roundtrips() {
        use crate::store::document_body;

        let doc = raw(
            "TID-001",
            false,
            &json!({
                "title": "Ship",
                "status": "in-progress",
                "startDate": "2024-02-02T00:00:00Z",
                "projectId": "PID-001",
                "comments": [{"authorId": "a", "text": "hi", "timestamp": "2024-02-03T00:00:00Z"}]
            }),
        );
        let entity = normalize_document(&doc).unwrap();
        let rewritten = RawDocument {
            body: document_body(&entity).unwrap(),
            ..doc
        };
        assert_eq!(normalize_document(&rewritten).unwrap(), entity);
    }
}
