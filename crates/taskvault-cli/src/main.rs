//! taskvault - shared project and task store with canonical ids

use anyhow::Result;
use clap::Parser;
use std::env;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use taskvault_cli::cli::commands::{
    run_allocate, run_children, run_comments_add, run_comments_list, run_comments_remove,
    run_delete, run_import, run_init, run_migrate, run_projects_create, run_projects_list,
    run_show, run_tasks_create, run_tasks_list, run_update, run_watch,
};
use taskvault_cli::cli::{Cli, Commands, CommentsCommands, ProjectsCommands, TasksCommands};
use taskvault_core::ids::EntityKind;

/// Log filter variable; defaults to warnings only so stdout stays clean.
const LOG_ENV: &str = "TASKVAULT_LOG";

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let root = match &cli.root {
        Some(root) => root.clone(),
        None => env::current_dir()?,
    };
    let format = cli.output_format();
    let actor = cli.actor.as_deref();

    match cli.command {
        Commands::Init => {
            run_init(&root)?;
        }

        Commands::Projects(cmd) => match cmd {
            ProjectsCommands::Create(args) => {
                run_projects_create(&root, args, actor, format)?;
            }
            ProjectsCommands::List => {
                run_projects_list(&root, format)?;
            }
            ProjectsCommands::Show { id } => {
                run_show(&root, &id, Some(EntityKind::Project), format)?;
            }
        },

        Commands::Tasks(cmd) => match cmd {
            TasksCommands::Create { args, project } => {
                run_tasks_create(&root, args, project, actor, format)?;
            }
            TasksCommands::List { project, status } => {
                run_tasks_list(&root, project.as_deref(), status, format)?;
            }
            TasksCommands::Show { id } => {
                run_show(&root, &id, Some(EntityKind::Task), format)?;
            }
        },

        Commands::Update { id, args } => {
            run_update(&root, &id, args, actor, format)?;
        }

        Commands::Delete { id } => {
            run_delete(&root, &id, format)?;
        }

        Commands::Comments(cmd) => match cmd {
            CommentsCommands::Add { id, text } => {
                run_comments_add(&root, &id, &text, actor, format)?;
            }
            CommentsCommands::List { id } => {
                run_comments_list(&root, &id, format)?;
            }
            CommentsCommands::Remove { id, index } => {
                run_comments_remove(&root, &id, index, format)?;
            }
        },

        Commands::Children { project_id } => {
            run_children(&root, &project_id, format)?;
        }

        Commands::Allocate { kind } => {
            run_allocate(&root, kind, format)?;
        }

        Commands::Import { file } => {
            run_import(&root, &file, format)?;
        }

        Commands::Migrate { status } => {
            run_migrate(&root, status, format)?;
        }

        Commands::Watch { once, count } => {
            run_watch(&root, once, count, format)?;
        }
    }

    Ok(())
}
