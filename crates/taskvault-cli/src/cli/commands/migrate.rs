//! Implementation of `taskvault migrate` and `taskvault import`.
//!
//! `import` loads records exactly as an older client wrote them; the next
//! open of the services migrates whatever legacy ids it brought in.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

use taskvault_core::access::Action;
use taskvault_core::allocator::SequenceAllocator;
use taskvault_core::ids::{is_canonical_for, EntityKind};
use taskvault_core::migration::{MigrationEngine, MigrationOutcome};
use taskvault_core::store::import_raw_document;

use crate::cli::commands::helpers::{open_context, open_services, require};
use crate::output::{Formatter, OutputFormat};

/// Run the legacy id migration, or report its state with `--status`.
#[tracing::instrument(skip(root, format))]
pub fn run_migrate(root: &Path, status_only: bool, format: OutputFormat) -> Result<()> {
    if status_only {
        let services = open_context(root)?.services()?;
        let status = services.migration().status()?;
        return Formatter::new(format).print(&status);
    }

    require(Action::Migrate)?;
    let services = open_services(root)?;

    // Opening the services already made one attempt; report that one if it did the work.
    let report = match services.startup_migration() {
        Some(report) if report.outcome == MigrationOutcome::Completed => report.clone(),
        _ => services.migration().run()?,
    };
    if report.outcome == MigrationOutcome::LeaseHeld {
        eprintln!("Another client is migrating this store; try again shortly.");
    }
    Formatter::new(format).print(&report)
}

/// One parsed line of an import file.
struct ImportRecord {
    id: String,
    is_project: bool,
    body: Value,
}

fn parse_record(line_no: usize, line: &str) -> Result<ImportRecord> {
    let value: Value = serde_json::from_str(line)
        .with_context(|| format!("line {line_no}: invalid JSON"))?;
    let Value::Object(mut map) = value else {
        bail!("line {line_no}: expected a JSON object");
    };
    let Some(Value::String(id)) = map.remove("id") else {
        bail!("line {line_no}: missing string \"id\"");
    };
    if id.trim().is_empty() {
        bail!("line {line_no}: \"id\" must not be blank");
    }
    let is_project = match map.remove("isProject") {
        Some(Value::Bool(b)) => b,
        None => map.contains_key("name") && !map.contains_key("title"),
        Some(other) => bail!("line {line_no}: \"isProject\" must be a boolean, got {other}"),
    };
    Ok(ImportRecord {
        id,
        is_project,
        body: Value::Object(map),
    })
}

/// Import raw records from a JSONL file, then migrate them.
#[tracing::instrument(skip(root, format))]
pub fn run_import(root: &Path, file: &Path, format: OutputFormat) -> Result<()> {
    require(Action::Migrate)?;
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read import file: {}", file.display()))?;
    let records = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| parse_record(n + 1, line))
        .collect::<Result<Vec<_>>>()?;

    let ctx = open_context(root)?;
    // An id with the other kind's prefix is legacy too.
    let legacy = records
        .iter()
        .filter(|r| !is_canonical_for(&r.id, EntityKind::from_is_project(r.is_project)))
        .count();
    {
        let store = ctx.open_store()?;
        if legacy > 0 && MigrationEngine::new(&store, ctx.config()).is_complete()? {
            bail!(
                "{legacy} record(s) have legacy ids but this store has already been migrated\n  To fix: import into a fresh store (taskvault --root <dir> init)"
            );
        }

        let tx = store
            .begin_immediate()
            .context("Failed to begin import transaction")?;
        for record in &records {
            import_raw_document(&tx, &record.id, record.is_project, &record.body)?;
        }
        tx.commit().context("Failed to commit import")?;

        let allocator = SequenceAllocator::new(&store, ctx.config().max_allocation_attempts);
        allocator.reconcile(EntityKind::Project)?;
        allocator.reconcile(EntityKind::Task)?;
    }
    tracing::info!(records = records.len(), legacy, "imported raw records");

    let services = ctx.services()?;
    Formatter::new(format).print(&serde_json::json!({
        "imported": records.len(),
        "legacy": legacy,
        "migration": services.startup_migration(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::init::run_init;
    use taskvault_core::core::VaultContext;
    use tempfile::tempdir;

    #[test]
    fn test_parse_record() {
        let record = parse_record(1, r#"{"id": "abc", "isProject": true, "name": "X"}"#).unwrap();
        assert_eq!(record.id, "abc");
        assert!(record.is_project);
        assert_eq!(record.body, serde_json::json!({"name": "X"}));

        let inferred = parse_record(2, r#"{"id": "t1", "title": "T"}"#).unwrap();
        assert!(!inferred.is_project);

        assert!(parse_record(3, r#"{"isProject": false}"#).is_err());
        assert!(parse_record(4, "[1, 2]").is_err());
    }

    #[test]
    fn test_import_migrates_legacy_records() {
        let dir = tempdir().unwrap();
        run_init(dir.path()).unwrap();
        let file = dir.path().join("legacy.jsonl");
        fs::write(
            &file,
            concat!(
                r#"{"id": "old-project", "isProject": true, "name": "Legacy"}"#,
                "\n\n",
                r#"{"id": "old-task", "isProject": false, "title": "child", "projectId": "old-project"}"#,
                "\n",
                r#"{"id": "PID-007", "isProject": true, "name": "Already canonical"}"#,
                "\n",
            ),
        )
        .unwrap();

        run_import(dir.path(), &file, OutputFormat::Json).unwrap();

        let services = VaultContext::new(dir.path()).unwrap().services().unwrap();
        let all = services.list().unwrap();
        assert!(all.iter().all(|e| is_canonical_for(e.id(), e.kind())));
        let legacy = all.iter().find(|e| e.title() == "Legacy").unwrap();
        // Counter was raised past PID-007 before ids were assigned
        assert_eq!(legacy.id(), "PID-008");
        let child = all.iter().find(|e| e.title() == "child").unwrap();
        assert_eq!(child.project_id(), Some("PID-008"));
    }

    #[test]
    fn test_import_refuses_legacy_after_migration() {
        let dir = tempdir().unwrap();
        run_init(dir.path()).unwrap();
        // Opening services on an empty store sets the marker
        VaultContext::new(dir.path()).unwrap().services().unwrap();

        let file = dir.path().join("late.jsonl");
        fs::write(&file, r#"{"id": "late", "isProject": true, "name": "Late"}"#).unwrap();
        let err = run_import(dir.path(), &file, OutputFormat::Json).unwrap_err();
        assert!(err.to_string().contains("already been migrated"));
    }

    #[test]
    fn test_migrate_status() {
        let dir = tempdir().unwrap();
        run_init(dir.path()).unwrap();
        run_migrate(dir.path(), true, OutputFormat::Json).unwrap();
        run_migrate(dir.path(), false, OutputFormat::Json).unwrap();
    }

    #[test]
    fn test_import_refuses_wrong_prefix_after_migration() {
        let dir = tempdir().unwrap();
        run_init(dir.path()).unwrap();
        VaultContext::new(dir.path()).unwrap().services().unwrap();

        let file = dir.path().join("mislabeled.jsonl");
        fs::write(&file, r#"{"id": "PID-003", "isProject": false, "title": "Task"}"#).unwrap();
        let err = run_import(dir.path(), &file, OutputFormat::Json).unwrap_err();
        assert!(err.to_string().contains("1 record(s) have legacy ids"));

        let services = VaultContext::new(dir.path()).unwrap().services().unwrap();
        assert!(services.list().unwrap().is_empty());
    }
}
