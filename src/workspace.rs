use crate::analytics::TaskAnalytics;
use crate::backup::{BundleData, BundleSettings, ExportBundle, BUNDLE_VERSION};
use crate::clock::{Clock, SystemClock};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::links::LinkBook;
use crate::models::Task;
use crate::notes::NoteStore;
use crate::persistence::{
    KvAdapter, MemoryKv, BACKUP_KEY, BOOKMARKS_KEY, NOTES_KEY, PROJECTS_KEY, RETIREMENT_TIMER_KEY, SETTINGS_KEY,
    TAG_COLORS_KEY, TASKS_KEY,
};
use crate::projects::ProjectStore;
use crate::scheduler::Scheduler;
use crate::settings::{AppSettings, AppSettingsStore, RetirementTimerStore};
use crate::tags::TagPalette;
use crate::tasks::TaskStore;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

pub const DATABASE_FILE: &str = "state.sqlite";
pub const AUTO_BACKUP_JOB: &str = "auto-backup";
pub const REMINDER_JOB: &str = "reminders";
pub const FLUSH_JOB: &str = "flush-writes";

pub trait ReminderSink: Send + Sync {
    fn deliver(&self, tasks: &[Task]);
}

#[derive(Debug, Default)]
pub struct LogReminderSink;

impl ReminderSink for LogReminderSink {
    fn deliver(&self, tasks: &[Task]) {
        for task in tasks {
            tracing::info!(
                task_id = %task.id,
                text = %task.text,
                due_date = ?task.due_date,
                "task reminder"
            );
        }
    }
}

/// Every store of one local workspace, sharing a persistence adapter and a
/// clock. Built once at start and handed to consumers.
pub struct Workspace {
    kv: Arc<dyn KvAdapter>,
    clock: Arc<dyn Clock>,
    notes: NoteStore,
    tasks: TaskStore,
    projects: ProjectStore,
    links: LinkBook,
    tag_palette: TagPalette,
    settings: AppSettingsStore,
    retirement_timer: RetirementTimerStore,
    reminded: HashSet<String>,
}

impl Workspace {
    pub fn open(data_dir: &Path) -> AppResult<Self> {
        let database = Database::new(&data_dir.join(DATABASE_FILE))?;
        tracing::info!(path = %database.path().display(), "workspace database opened");
        Ok(Self::with_parts(Arc::new(database), Arc::new(SystemClock)))
    }

    pub fn in_memory() -> Self {
        Self::with_parts(Arc::new(MemoryKv::new()), Arc::new(SystemClock))
    }

    pub fn with_parts(kv: Arc<dyn KvAdapter>, clock: Arc<dyn Clock>) -> Self {
        let mut workspace = Self {
            notes: NoteStore::open(kv.clone(), NOTES_KEY, clock.clone()),
            tasks: TaskStore::open(kv.clone(), TASKS_KEY, clock.clone()),
            projects: ProjectStore::open(kv.clone(), PROJECTS_KEY, clock.clone()),
            links: LinkBook::open(kv.clone(), clock.clone()),
            tag_palette: TagPalette::open(kv.clone(), clock.clone()),
            settings: AppSettingsStore::open(kv.clone(), clock.clone()),
            retirement_timer: RetirementTimerStore::open(kv.clone(), clock.clone()),
            reminded: HashSet::new(),
            kv,
            clock,
        };
        workspace.apply_write_delay();
        workspace
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn notes(&self) -> &NoteStore {
        &self.notes
    }

    pub fn notes_mut(&mut self) -> &mut NoteStore {
        &mut self.notes
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut TaskStore {
        &mut self.tasks
    }

    pub fn projects(&self) -> &ProjectStore {
        &self.projects
    }

    pub fn projects_mut(&mut self) -> &mut ProjectStore {
        &mut self.projects
    }

    pub fn links(&self) -> &LinkBook {
        &self.links
    }

    pub fn links_mut(&mut self) -> &mut LinkBook {
        &mut self.links
    }

    pub fn tag_palette(&self) -> &TagPalette {
        &self.tag_palette
    }

    pub fn tag_palette_mut(&mut self) -> &mut TagPalette {
        &mut self.tag_palette
    }

    pub fn settings(&self) -> &AppSettings {
        self.settings.get()
    }

    pub fn retirement_timer(&self) -> &RetirementTimerStore {
        &self.retirement_timer
    }

    pub fn retirement_timer_mut(&mut self) -> &mut RetirementTimerStore {
        &mut self.retirement_timer
    }

    /// Merges a JSON patch into the app settings and applies the new write
    /// delay. Background jobs pick up new periods on restart.
    pub fn update_settings(&mut self, patch: serde_json::Value) -> AppResult<AppSettings> {
        let settings = self.settings.update(patch)?;
        self.apply_write_delay();
        Ok(settings)
    }

    pub fn analytics(&self) -> TaskAnalytics<'_> {
        TaskAnalytics::new(self.tasks.items(), self.clock.as_ref())
    }

    pub fn live_tags(&self) -> BTreeSet<String> {
        self.notes
            .items()
            .iter()
            .flat_map(|note| note.tags.iter())
            .chain(self.tasks.items().iter().flat_map(|task| task.tags.iter()))
            .cloned()
            .collect()
    }

    pub fn prune_tag_colors(&mut self) -> usize {
        let live = self.live_tags();
        self.tag_palette.prune(live.iter().map(String::as_str))
    }

    /// Open tasks due today or earlier that have not been reminded yet in
    /// this process.
    pub fn take_reminders(&mut self) -> Vec<Task> {
        let due = self.tasks.reminders();
        let live: HashSet<&str> = due.iter().map(|task| task.id.as_str()).collect();
        self.reminded.retain(|id| live.contains(id.as_str()));
        due.into_iter()
            .filter(|task| self.reminded.insert(task.id.clone()))
            .collect()
    }

    pub fn export_bundle(&self, full: bool) -> ExportBundle {
        let settings = self.settings.get();
        ExportBundle {
            version: BUNDLE_VERSION,
            timestamp: self.clock.now(),
            data: BundleData {
                bookmarks: self.links.sections().to_vec(),
                settings: BundleSettings {
                    username: settings.username.clone(),
                    theme: settings.theme,
                    primary_color: settings.primary_color.clone(),
                },
                notes: full.then(|| self.notes.items().to_vec()),
                tasks: full.then(|| self.tasks.items().to_vec()),
                projects: full.then(|| self.projects.items().to_vec()),
                tag_colors: full.then(|| self.tag_palette.colors().clone()),
            },
        }
    }

    /// Validates the whole bundle first, then replaces live state. Parts
    /// the bundle does not carry are left alone.
    pub fn import_bundle(&mut self, bundle: ExportBundle) -> AppResult<()> {
        bundle.validate()?;
        let data = bundle.data;

        self.links.replace_all(data.bookmarks)?;
        let mut settings = self.settings.get().clone();
        settings.username = data.settings.username;
        settings.theme = data.settings.theme;
        settings.primary_color = data.settings.primary_color;
        self.settings.replace(settings)?;

        if let Some(notes) = data.notes {
            self.notes.replace_all(notes)?;
        }
        if let Some(tasks) = data.tasks {
            self.tasks.replace_all(tasks)?;
        }
        if let Some(projects) = data.projects {
            self.projects.replace_all(projects)?;
        }
        if let Some(colors) = data.tag_colors {
            self.tag_palette.replace_all(colors)?;
        }
        tracing::info!(timestamp = %bundle.timestamp, "backup imported");
        Ok(())
    }

    pub fn import_json(&mut self, raw: &str) -> AppResult<()> {
        let bundle = ExportBundle::parse(raw)?;
        self.import_bundle(bundle)
    }

    pub fn write_backup(&mut self) -> AppResult<()> {
        self.flush_all();
        let payload = self.export_bundle(true).to_json()?;
        self.kv.set(BACKUP_KEY, &payload)?;
        tracing::info!(bytes = payload.len(), "rolling backup written");
        Ok(())
    }

    /// Imports the rolling backup. `Ok(false)` when none exists.
    pub fn restore_backup(&mut self) -> AppResult<bool> {
        let Some(raw) = self.kv.get(BACKUP_KEY)? else {
            return Ok(false);
        };
        self.import_json(&raw)?;
        Ok(true)
    }

    pub fn flush_due_all(&mut self) {
        self.notes.flush_due();
        self.tasks.flush_due();
        self.projects.flush_due();
        self.links.flush_due();
        self.tag_palette.flush_due();
    }

    pub fn flush_all(&mut self) {
        self.notes.flush();
        self.tasks.flush();
        self.projects.flush();
        self.links.flush();
        self.tag_palette.flush();
    }

    pub fn persistence_failures(&self) -> Vec<(&'static str, AppError)> {
        let failures = [
            (NOTES_KEY, self.notes.last_persist_failure()),
            (TASKS_KEY, self.tasks.last_persist_failure()),
            (PROJECTS_KEY, self.projects.last_persist_failure()),
            (BOOKMARKS_KEY, self.links.last_persist_failure()),
            (TAG_COLORS_KEY, self.tag_palette.last_persist_failure()),
            (SETTINGS_KEY, self.settings.last_persist_failure()),
            (RETIREMENT_TIMER_KEY, self.retirement_timer.last_persist_failure()),
        ];
        failures
            .into_iter()
            .filter_map(|(key, failure)| failure.map(|error| (key, error.clone())))
            .collect()
    }

    fn apply_write_delay(&mut self) {
        let delay = self.settings.get().persist_debounce();
        self.notes.set_write_delay(delay);
        self.tasks.set_write_delay(delay);
        self.projects.set_write_delay(delay);
        self.links.set_write_delay(delay);
        self.tag_palette.set_write_delay(delay);
    }
}

/// Registers the workspace's recurring jobs from its current settings.
/// Calling again restarts them; jobs whose period is now 0 are cancelled.
pub fn start_background_jobs(
    workspace: Arc<Mutex<Workspace>>,
    scheduler: &Scheduler,
    sink: Arc<dyn ReminderSink>,
) -> AppResult<()> {
    let settings = workspace
        .lock()
        .map_err(|_| AppError::Internal("workspace mutex poisoned".to_string()))?
        .settings()
        .clone();

    match minutes(settings.auto_backup_minutes) {
        Some(period) => {
            let workspace = workspace.clone();
            scheduler.schedule(AUTO_BACKUP_JOB, period, move || {
                let workspace = workspace.clone();
                async move {
                    with_workspace(&workspace, AUTO_BACKUP_JOB, |workspace| {
                        if let Err(error) = workspace.write_backup() {
                            tracing::warn!(error = %error, "auto backup failed");
                        }
                    });
                }
            })?;
        }
        None => {
            scheduler.cancel(AUTO_BACKUP_JOB);
        }
    }

    match minutes(settings.reminder_minutes) {
        Some(period) => {
            let workspace = workspace.clone();
            scheduler.schedule(REMINDER_JOB, period, move || {
                let workspace = workspace.clone();
                let sink = sink.clone();
                async move {
                    let due = with_workspace(&workspace, REMINDER_JOB, Workspace::take_reminders)
                        .unwrap_or_default();
                    if !due.is_empty() {
                        sink.deliver(&due);
                    }
                }
            })?;
        }
        None => {
            scheduler.cancel(REMINDER_JOB);
        }
    }

    match settings.persist_debounce_ms {
        0 => {
            scheduler.cancel(FLUSH_JOB);
        }
        millis => {
            let workspace = workspace.clone();
            scheduler.schedule(FLUSH_JOB, Duration::from_millis(u64::from(millis)), move || {
                let workspace = workspace.clone();
                async move {
                    with_workspace(&workspace, FLUSH_JOB, Workspace::flush_due_all);
                }
            })?;
        }
    }
    Ok(())
}

fn minutes(value: u32) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(u64::from(value) * 60))
}

fn with_workspace<R>(
    workspace: &Mutex<Workspace>,
    job: &str,
    f: impl FnOnce(&mut Workspace) -> R,
) -> Option<R> {
    match workspace.lock() {
        Ok(mut guard) => Some(f(&mut guard)),
        Err(_) => {
            tracing::warn!(job = %job, "workspace mutex poisoned; skipping job run");
            None
        }
    }
}
