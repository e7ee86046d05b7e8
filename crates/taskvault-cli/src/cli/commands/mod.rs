//! Command implementations.

pub mod comments;
pub mod entities;
pub mod helpers;
pub mod init;
pub mod migrate;
pub mod watch;

pub use comments::{run_comments_add, run_comments_list, run_comments_remove};
pub use entities::{
    run_allocate, run_children, run_delete, run_projects_create, run_projects_list, run_show,
    run_tasks_create, run_tasks_list, run_update,
};
pub use init::run_init;
pub use migrate::{run_import, run_migrate};
pub use watch::run_watch;
