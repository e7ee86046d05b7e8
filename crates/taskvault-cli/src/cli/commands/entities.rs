//! Implementation of the project, task, update, and delete commands.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::fs;
use std::path::Path;

use taskvault_core::access::Action;
use taskvault_core::identity::resolve_actor;
use taskvault_core::ids::EntityKind;
use taskvault_core::model::{Attachment, AttachmentSource, EntityPatch, NewEntity, Status};

use crate::cli::commands::helpers::{
    not_found_error, open_services, parse_date, parse_optional_date, require,
};
use crate::cli::{CreateArgs, UpdateArgs};
use crate::output::{Formatter, OutputFormat};

/// Guess a media type from the file extension.
fn media_kind(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some("json") => "application/json",
        Some("txt" | "md" | "log") => "text/plain",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}

/// Attachment metadata for a local file. The bytes stay where they are.
fn attachment_for(path: &Path) -> Result<Attachment> {
    let meta = fs::metadata(path)
        .with_context(|| format!("Failed to read attachment: {}", path.display()))?;
    if !meta.is_file() {
        bail!("Not a file: {}", path.display());
    }
    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
    Ok(Attachment::new(
        name,
        meta.len(),
        media_kind(path),
        AttachmentSource::Path(path.display().to_string()),
        Utc::now(),
    ))
}

fn new_entity(kind: EntityKind, args: CreateArgs, project: Option<String>) -> Result<NewEntity> {
    let mut new = match kind {
        EntityKind::Project => NewEntity::project(args.title),
        EntityKind::Task => NewEntity::task(args.title),
    };
    new.description = args.description;
    new.status = args.status;
    new.priority = args.priority;
    new.assignees = args.assignees;
    new.start_date = parse_optional_date("start", args.start.as_deref())?;
    new.due_date = parse_optional_date("due", args.due.as_deref())?;
    new.project_id = project;
    new.attachments = args
        .attachments
        .iter()
        .map(|p| attachment_for(p))
        .collect::<Result<_>>()?;
    Ok(new)
}

fn run_create(
    root: &Path,
    kind: EntityKind,
    args: CreateArgs,
    project: Option<String>,
    actor: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    require(match kind {
        EntityKind::Project => Action::CreateProject,
        EntityKind::Task => Action::CreateTask,
    })?;
    let actor = resolve_actor(actor)?;
    let services = open_services(root)?;

    let new = new_entity(kind, args, project)?;
    let id = services.create_entity(new, &actor)?;
    let entity = services
        .get(&id)?
        .ok_or_else(|| not_found_error(&id))?;

    Formatter::new(format).print(&serde_json::json!({
        "id": id,
        "kind": kind,
        "title": entity.title(),
        "status": entity.fields().status,
        "projectId": entity.project_id(),
    }))
}

/// Create a project.
#[tracing::instrument(skip(root, args, format))]
pub fn run_projects_create(
    root: &Path,
    args: CreateArgs,
    actor: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    run_create(root, EntityKind::Project, args, None, actor, format)
}

/// Create a task, optionally inside a project.
#[tracing::instrument(skip(root, args, format))]
pub fn run_tasks_create(
    root: &Path,
    args: CreateArgs,
    project: Option<String>,
    actor: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    run_create(root, EntityKind::Task, args, project, actor, format)
}

pub fn run_projects_list(root: &Path, format: OutputFormat) -> Result<()> {
    let services = open_services(root)?;
    let projects = services.entities().list_kind(EntityKind::Project)?;
    Formatter::new(format).print_list(
        &projects,
        "No projects found",
        "projects",
        &["taskvault projects show <id>", "taskvault children <id>"],
    )
}

pub fn run_tasks_list(
    root: &Path,
    project: Option<&str>,
    status: Option<Status>,
    format: OutputFormat,
) -> Result<()> {
    let services = open_services(root)?;
    let mut tasks = services.entities().list_kind(EntityKind::Task)?;
    if let Some(project) = project {
        tasks.retain(|t| t.project_id() == Some(project));
    }
    if let Some(status) = status {
        tasks.retain(|t| t.fields().status == status);
    }
    Formatter::new(format).print_list(
        &tasks,
        "No tasks found",
        "tasks",
        &["taskvault tasks show <id>"],
    )
}

/// Show one entity. With `kind`, an entity of the other kind is "not found".
pub fn run_show(
    root: &Path,
    id: &str,
    kind: Option<EntityKind>,
    format: OutputFormat,
) -> Result<()> {
    let services = open_services(root)?;
    let entity = services
        .get(id)?
        .filter(|e| kind.is_none_or(|k| e.kind() == k))
        .ok_or_else(|| not_found_error(id))?;
    Formatter::new(format).print(&entity)
}

pub fn run_children(root: &Path, project_id: &str, format: OutputFormat) -> Result<()> {
    let services = open_services(root)?;
    let is_project = services.get(project_id)?.is_some_and(|e| e.is_project());
    if !is_project {
        return Err(not_found_error(project_id));
    }
    let tasks = services.list_child_tasks(project_id)?;
    Formatter::new(format).print_list(
        &tasks,
        "No tasks in this project",
        "tasks",
        &["taskvault tasks create --project <id> --title <title>"],
    )
}

fn patch_from(args: UpdateArgs) -> Result<EntityPatch> {
    let start_date = if args.clear_start {
        Some(None)
    } else {
        args.start.as_deref().map(|s| parse_date("start", s).map(Some)).transpose()?
    };
    let due_date = if args.clear_due {
        Some(None)
    } else {
        args.due.as_deref().map(|s| parse_date("due", s).map(Some)).transpose()?
    };
    Ok(EntityPatch {
        title: args.title,
        description: args.description,
        status: args.status,
        priority: args.priority,
        assignees: args.assignees,
        start_date,
        due_date,
        project_id: args.project.map(Some),
        attachments: None,
    })
}

/// Apply a partial update.
#[tracing::instrument(skip(root, args, format))]
pub fn run_update(
    root: &Path,
    id: &str,
    args: UpdateArgs,
    actor: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    require(Action::Update)?;
    let patch = patch_from(args)?;
    if patch.is_empty() {
        bail!("Nothing to update\n  To fix: pass at least one field, e.g. --status completed");
    }
    let actor = resolve_actor(actor)?;
    let services = open_services(root)?;

    if !services.update_entity(id, patch, &actor)? {
        return Err(not_found_error(id));
    }
    let entity = services.get(id)?.ok_or_else(|| not_found_error(id))?;
    Formatter::new(format).print(&entity)
}

/// Delete an entity; a project takes its tasks with it.
#[tracing::instrument(skip(root, format))]
pub fn run_delete(root: &Path, id: &str, format: OutputFormat) -> Result<()> {
    require(Action::Delete)?;
    let services = open_services(root)?;

    let children = match services.get(id)? {
        Some(e) if e.is_project() => e.sub_task_ids().len(),
        Some(_) => 0,
        None => return Err(not_found_error(id)),
    };
    let deleted = services.delete_entity(id)?;

    Formatter::new(format).print(&serde_json::json!({
        "id": id,
        "deleted": deleted,
        "childrenDeleted": children,
    }))
}

/// Reserve an id without creating a document.
pub fn run_allocate(root: &Path, kind: EntityKind, format: OutputFormat) -> Result<()> {
    require(match kind {
        EntityKind::Project => Action::CreateProject,
        EntityKind::Task => Action::CreateTask,
    })?;
    let services = open_services(root)?;
    let id = services.allocate(kind)?;
    Formatter::new(format).print(&serde_json::json!({ "id": id, "kind": kind }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::init::run_init;
    use taskvault_core::core::VaultContext;
    use tempfile::tempdir;

    fn args(title: &str) -> CreateArgs {
        CreateArgs {
            title: title.into(),
            ..CreateArgs::default()
        }
    }

    #[test]
    fn test_create_project_and_task() {
        let dir = tempdir().unwrap();
        run_init(dir.path()).unwrap();

        run_projects_create(dir.path(), args("Launch"), Some("alice"), OutputFormat::Json)
            .unwrap();
        run_tasks_create(
            dir.path(),
            args("Write notes"),
            Some("PID-001".into()),
            Some("alice"),
            OutputFormat::Json,
        )
        .unwrap();

        let services = VaultContext::new(dir.path()).unwrap().services().unwrap();
        let project = services.get("PID-001").unwrap().unwrap();
        assert_eq!(project.sub_task_ids(), ["TID-001"]);
        let task = services.get("TID-001").unwrap().unwrap();
        assert_eq!(task.fields().created_by.as_deref(), Some("alice"));
    }

    #[test]
    fn test_create_task_in_missing_project_fails() {
        let dir = tempdir().unwrap();
        run_init(dir.path()).unwrap();
        let result = run_tasks_create(
            dir.path(),
            args("orphan"),
            Some("PID-404".into()),
            Some("alice"),
            OutputFormat::Json,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_create_with_attachment() {
        let dir = tempdir().unwrap();
        run_init(dir.path()).unwrap();
        let file = dir.path().join("notes.txt");
        fs::write(&file, "hello").unwrap();

        let mut create = args("with file");
        create.attachments = vec![file];
        run_tasks_create(dir.path(), create, None, Some("alice"), OutputFormat::Json).unwrap();

        let services = VaultContext::new(dir.path()).unwrap().services().unwrap();
        let task = services.get("TID-001").unwrap().unwrap();
        let attachment = &task.fields().attachments[0];
        assert_eq!(attachment.name, "notes.txt");
        assert_eq!(attachment.size, 5);
        assert_eq!(attachment.media_kind, "text/plain");
    }

    #[test]
    fn test_update_and_clear_dates() {
        let dir = tempdir().unwrap();
        run_init(dir.path()).unwrap();
        let mut create = args("dated");
        create.due = Some("2030-01-01".into());
        run_tasks_create(dir.path(), create, None, Some("alice"), OutputFormat::Json).unwrap();

        let update = UpdateArgs {
            clear_due: true,
            priority: Some(taskvault_core::model::Priority::High),
            ..UpdateArgs::default()
        };
        run_update(dir.path(), "TID-001", update, Some("bob"), OutputFormat::Json).unwrap();

        let services = VaultContext::new(dir.path()).unwrap().services().unwrap();
        let task = services.get("TID-001").unwrap().unwrap();
        assert!(task.fields().due_date.is_none());
        assert_eq!(task.fields().updated_by.as_deref(), Some("bob"));
    }

    #[test]
    fn test_update_requires_a_field() {
        let dir = tempdir().unwrap();
        run_init(dir.path()).unwrap();
        let err = run_update(
            dir.path(),
            "TID-001",
            UpdateArgs::default(),
            Some("bob"),
            OutputFormat::Json,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Nothing to update"));
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let dir = tempdir().unwrap();
        run_init(dir.path()).unwrap();
        let err = run_delete(dir.path(), "PID-009", OutputFormat::Json).unwrap_err();
        assert!(err.to_string().contains("Not found"));
    }

    #[test]
    fn test_show_checks_kind() {
        let dir = tempdir().unwrap();
        run_init(dir.path()).unwrap();
        run_tasks_create(dir.path(), args("t"), None, Some("alice"), OutputFormat::Json).unwrap();

        assert!(run_show(dir.path(), "TID-001", Some(EntityKind::Task), OutputFormat::Json).is_ok());
        assert!(
            run_show(dir.path(), "TID-001", Some(EntityKind::Project), OutputFormat::Json).is_err()
        );
    }

    #[test]
    fn test_media_kind() {
        assert_eq!(media_kind(Path::new("a/b.PNG")), "image/png");
        assert_eq!(media_kind(Path::new("archive.tar.gz")), "application/octet-stream");
    }
}
