//! Implementation of `taskvault watch`.

use anyhow::Result;
use std::path::Path;

use taskvault_core::sync::Publication;

use crate::cli::commands::helpers::open_context;
use crate::output::{Formatter, OutputFormat};

fn summary(publication: &Publication) -> serde_json::Value {
    serde_json::json!({
        "sequence": publication.sequence,
        "entities": publication.entities.len(),
        "changes": publication.changes.len(),
        "migration": publication.migration,
    })
}

fn print_publication(formatter: &Formatter, publication: &Publication) -> Result<()> {
    if formatter.output_format() == OutputFormat::Json {
        return formatter.print(publication);
    }
    formatter.print(&summary(publication))?;
    if publication.sequence > 1 {
        formatter.print(&publication.changes)?;
    }
    Ok(())
}

/// Print snapshots as the store changes.
///
/// The first publication is the full snapshot; later ones list only what
/// changed. Runs until `count` publications were printed, or forever.
#[tracing::instrument(skip(root, format))]
pub fn run_watch(root: &Path, once: bool, count: Option<u64>, format: OutputFormat) -> Result<()> {
    let formatter = Formatter::new(format);
    let mut sync = open_context(root)?.live_sync()?;

    if once {
        let publication = sync.refresh()?;
        return print_publication(&formatter, &publication);
    }

    let feed = sync.subscribe();
    let handle = sync.spawn()?;
    let mut printed = 0u64;
    for publication in &feed {
        print_publication(&formatter, &publication)?;
        printed += 1;
        if count.is_some_and(|limit| printed >= limit) {
            break;
        }
    }
    handle.stop();
    Ok(())
}
