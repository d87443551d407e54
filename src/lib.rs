//! Local-first data layer for notes, tasks, projects and bookmarks: durable
//! write-through stores, derived views, analytics and snapshot undo.

pub mod analytics;
pub mod backup;
pub mod clock;
pub mod db;
pub mod errors;
pub mod links;
pub mod models;
pub mod notes;
pub mod persistence;
pub mod projects;
pub mod recurrence;
pub mod scheduler;
pub mod search;
pub mod settings;
pub mod store;
pub mod tags;
pub mod tasks;
pub mod workspace;

mod debounce;
mod history;
mod slot;

pub use crate::analytics::{AnalyticsReport, TaskAnalytics};
pub use crate::backup::ExportBundle;
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult};
pub use crate::links::{LinkBook, SectionLink};
pub use crate::models::{
    Comment, CommentKind, Link, LinkPatch, Note, NotePatch, Priority, Project, ProjectPatch, Recurrence,
    RecurrenceKind, Section, TagCount, Task, TaskPatch, TaskStatus,
};
pub use crate::notes::NoteStore;
pub use crate::persistence::{KvAdapter, MemoryKv};
pub use crate::projects::ProjectStore;
pub use crate::scheduler::Scheduler;
pub use crate::settings::{AppSettings, RetirementTimer, Theme};
pub use crate::store::{Entity, EntityStore, Updated};
pub use crate::tags::{ColorPicker, HashColorPicker, RandomColorPicker, TagPalette};
pub use crate::tasks::TaskStore;
pub use crate::workspace::{start_background_jobs, LogReminderSink, ReminderSink, Workspace};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// JSON logs to `<data_dir>/logs/homebase.log.<date>`, filtered by
/// `RUST_LOG` (default `info`). Only the first call installs a subscriber.
pub fn init_tracing(data_dir: &Path) -> AppResult<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "homebase.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
