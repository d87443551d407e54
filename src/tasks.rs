use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::models::{Comment, CommentKind, Task, TaskPatch, TaskStatus};
use crate::notes::normalize_tags;
use crate::recurrence;
use crate::search::Searchable;
use crate::store::{new_id, Entity, EntityStore, Updated};
use crate::tags::Tagged;
use chrono::{DateTime, NaiveDate, Utc};

pub type TaskStore = EntityStore<Task>;

impl Entity for Task {
    type Patch = TaskPatch;

    const KIND: &'static str = "task";
    const ID_PREFIX: &'static str = "task";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    fn set_timestamps(&mut self, created_at: DateTime<Utc>, modified_at: DateTime<Utc>) {
        self.created_at = created_at;
        self.modified_at = modified_at;
    }

    fn validate(&self) -> AppResult<()> {
        if self.text.trim().is_empty() {
            return Err(AppError::Validation("task text must not be empty".to_string()));
        }
        match self.recurrence.as_ref() {
            Some(rule) if rule.interval < 1 => Err(AppError::Validation(
                "recurrence interval must be at least 1".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn apply_patch(&mut self, patch: TaskPatch, now: DateTime<Utc>) {
        if let Some(text) = patch.text {
            self.text = text;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(tags) = patch.tags {
            self.tags = normalize_tags(tags);
        }
        if let Some(project_id) = patch.project_id {
            self.project_id = project_id;
        }
        if let Some(recurrence) = patch.recurrence {
            self.recurrence = recurrence;
        }
        if let Some(estimated) = patch.estimated_pomodoros {
            self.estimated_pomodoros = estimated;
        }
        if let Some(completed) = patch.pomodoros_completed {
            self.pomodoros_completed = completed;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
        if let Some(status) = patch.status {
            transition(self, status, now);
        }
    }

    fn normalize(&mut self, now: DateTime<Utc>) {
        self.tags = normalize_tags(std::mem::take(&mut self.tags));
        if self.status == TaskStatus::Done {
            self.completed_at.get_or_insert(now);
        } else {
            self.completed_at = None;
        }
    }

    fn follow_up(&self, previous: &Self, existing: &[Self], clock: &dyn Clock) -> Option<Self> {
        if previous.is_completed() || !self.is_completed() || !self.is_recurring() {
            return None;
        }
        // A reopened and re-completed instance already spawned its successor.
        if existing
            .iter()
            .any(|task| task.recurrence_parent_id.as_deref() == Some(self.id.as_str()))
        {
            return None;
        }
        let completed_on = clock.local_date(self.completed_at.unwrap_or_else(|| clock.now()));
        let next = recurrence::spawn_next(self, completed_on);
        if next.is_none() {
            tracing::info!(task_id = %self.id, "recurrence series ended");
        }
        next
    }
}

impl Tagged for Task {
    fn tags(&self) -> &[String] {
        &self.tags
    }
}

impl Searchable for Task {
    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.text.as_str()];
        if let Some(notes) = self.notes.as_deref() {
            fields.push(notes);
        }
        fields
    }
}

/// Moves a task to `status`, keeping `completedAt` in step and logging the
/// change as a system comment.
fn transition(task: &mut Task, status: TaskStatus, now: DateTime<Utc>) {
    let from = task.status;
    if from == status {
        return;
    }
    task.status = status;
    task.completed_at = if status == TaskStatus::Done { Some(now) } else { None };
    task.comments.push(Comment {
        id: new_id("comment", now),
        text: format!("Status changed from {} to {}", from.as_str(), status.as_str()),
        kind: CommentKind::System,
        created_at: now,
    });
}

impl EntityStore<Task> {
    pub fn set_status(&mut self, id: &str, status: TaskStatus) -> AppResult<Option<Updated<Task>>> {
        self.update_detailed(id, TaskPatch::status(status))
    }

    pub fn complete(&mut self, id: &str) -> AppResult<Option<Updated<Task>>> {
        self.set_status(id, TaskStatus::Done)
    }

    pub fn toggle_complete(&mut self, id: &str) -> AppResult<Option<Updated<Task>>> {
        let Some(task) = self.get_by_id(id) else {
            return Ok(None);
        };
        let next = if task.is_completed() {
            TaskStatus::Todo
        } else {
            TaskStatus::Done
        };
        self.set_status(id, next)
    }

    pub fn add_comment(&mut self, task_id: &str, text: &str, kind: CommentKind) -> AppResult<Option<Comment>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("comment must not be empty".to_string()));
        }
        let updated = self.mutate(task_id, |task, now| {
            task.comments.push(Comment {
                id: new_id("comment", now),
                text: text.to_string(),
                kind,
                created_at: now,
            });
            Ok(())
        })?;
        Ok(updated.and_then(|task| task.comments.last().cloned()))
    }

    pub fn delete_comment(&mut self, task_id: &str, comment_id: &str) -> bool {
        let exists = self
            .get_by_id(task_id)
            .map(|task| task.comments.iter().any(|comment| comment.id == comment_id))
            .unwrap_or(false);
        if !exists {
            return false;
        }
        let result = self.mutate(task_id, |task, _now| {
            task.comments.retain(|comment| comment.id != comment_id);
            Ok(())
        });
        matches!(result, Ok(Some(_)))
    }

    pub fn record_pomodoro(&mut self, task_id: &str) -> AppResult<Option<Task>> {
        self.mutate(task_id, |task, _now| {
            task.pomodoros_completed = task.pomodoros_completed.saturating_add(1);
            Ok(())
        })
    }

    /// `None` selects tasks without a project.
    pub fn by_project(&self, project_id: Option<&str>) -> Vec<Task> {
        self.list(|task| task.project_id.as_deref() == project_id)
    }

    pub fn by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.list(|task| task.status == status)
    }

    pub fn due_on(&self, date: NaiveDate) -> Vec<Task> {
        self.list(|task| task.due_date == Some(date))
    }

    pub fn overdue(&self) -> Vec<Task> {
        let today = self.clock().today();
        self.list(|task| !task.is_completed() && task.due_date.map(|due| due < today).unwrap_or(false))
    }

    /// Open tasks due today or earlier, oldest due date first.
    pub fn reminders(&self) -> Vec<Task> {
        let today = self.clock().today();
        let mut due = self.list(|task| {
            !task.is_completed() && task.due_date.map(|due| due <= today).unwrap_or(false)
        });
        due.sort_by_key(|task| task.due_date);
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{Priority, Recurrence, RecurrenceKind};
    use crate::persistence::{MemoryKv, TASKS_KEY};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn fixture() -> (ManualClock, TaskStore) {
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        let store = TaskStore::open(Arc::new(MemoryKv::new()), TASKS_KEY, Arc::new(clock.clone()));
        (clock, store)
    }

    #[test]
    fn completing_sets_and_reopening_clears_completed_at() {
        let (clock, mut store) = fixture();
        let task = store.add(Task::new("Write report")).expect("added");

        clock.advance(Duration::hours(2));
        let done = store.complete(&task.id).expect("ok").expect("exists").item;
        assert!(done.is_completed());
        assert_eq!(done.completed_at, Some(clock.now()));
        assert_eq!(done.comments.len(), 1);
        assert_eq!(done.comments[0].kind, CommentKind::System);
        assert_eq!(done.comments[0].text, "Status changed from todo to done");

        let reopened = store.toggle_complete(&task.id).expect("ok").expect("exists").item;
        assert_eq!(reopened.status, TaskStatus::Todo);
        assert_eq!(reopened.completed_at, None);
    }

    #[test]
    fn added_task_completed_at_follows_status() {
        let (clock, mut store) = fixture();
        let mut done = Task::new("Already finished").with_tags(["x", "x"]);
        done.status = TaskStatus::Done;
        let done = store.add(done).expect("added");
        assert_eq!(done.completed_at, Some(clock.now()));
        assert_eq!(done.tags, vec!["x".to_string()]);

        let mut stale = Task::new("Not started");
        stale.completed_at = Some(clock.now() - Duration::days(3));
        let stale = store.add(stale).expect("added");
        assert_eq!(stale.status, TaskStatus::Todo);
        assert_eq!(stale.completed_at, None);
        assert_eq!(store.get_by_id(&stale.id).and_then(|t| t.completed_at), None);
    }

    #[test]
    fn daily_recurrence_spawns_next_instance_on_completion() {
        let (_clock, mut store) = fixture();
        let task = store
            .add(
                Task::new("Stretch")
                    .with_due_date(date(2024, 1, 1))
                    .with_recurrence(Recurrence::new(RecurrenceKind::Daily, 2)),
            )
            .expect("added");

        let outcome = store.complete(&task.id).expect("ok").expect("exists");
        let spawned = outcome.spawned.expect("next instance");
        assert_eq!(spawned.due_date, Some(date(2024, 1, 3)));
        assert_eq!(spawned.status, TaskStatus::Todo);
        assert_ne!(spawned.id, task.id);
        assert_eq!(store.len(), 2);
        assert!(store.get_by_id(&task.id).expect("original kept").is_completed());
    }

    #[test]
    fn recurrence_past_end_date_spawns_nothing() {
        let (_clock, mut store) = fixture();
        let task = store
            .add(
                Task::new("Stretch")
                    .with_due_date(date(2024, 1, 1))
                    .with_recurrence(Recurrence::new(RecurrenceKind::Daily, 2).until(date(2024, 1, 2))),
            )
            .expect("added");

        let outcome = store.complete(&task.id).expect("ok").expect("exists");
        assert!(outcome.spawned.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn recurrence_without_due_date_uses_completion_day() {
        let (_clock, mut store) = fixture();
        let task = store
            .add(Task::new("Inbox zero").with_recurrence(Recurrence::new(RecurrenceKind::Weekly, 1)))
            .expect("added");
        let spawned = store.complete(&task.id).expect("ok").expect("exists").spawned;
        assert_eq!(spawned.and_then(|t| t.due_date), Some(date(2024, 1, 8)));
    }

    #[test]
    fn recompleting_a_reopened_instance_does_not_spawn_twice() {
        let (_clock, mut store) = fixture();
        let task = store
            .add(Task::new("Pay rent").with_recurrence(Recurrence::new(RecurrenceKind::Monthly, 1)))
            .expect("added");
        assert!(store.complete(&task.id).expect("ok").expect("exists").spawned.is_some());
        store.set_status(&task.id, TaskStatus::InProgress).expect("ok");
        assert!(store.complete(&task.id).expect("ok").expect("exists").spawned.is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn undo_after_recurring_completion_removes_spawn_and_reopens() {
        let (_clock, mut store) = fixture();
        let task = store
            .add(Task::new("Stretch").with_recurrence(Recurrence::new(RecurrenceKind::Daily, 1)))
            .expect("added");
        store.complete(&task.id).expect("ok");
        assert!(store.undo());
        assert_eq!(store.len(), 1);
        assert!(!store.items()[0].is_completed());
    }

    #[test]
    fn comments_append_and_delete_by_id() {
        let (_clock, mut store) = fixture();
        let task = store.add(Task::new("Call plumber")).expect("added");
        let comment = store
            .add_comment(&task.id, "left voicemail", CommentKind::User)
            .expect("ok")
            .expect("task exists");
        assert_eq!(store.get_by_id(&task.id).expect("task").comments.len(), 1);

        assert!(store.add_comment(&task.id, "  ", CommentKind::User).is_err());
        assert!(store.add_comment("missing", "hi", CommentKind::User).expect("ok").is_none());
        assert!(!store.delete_comment(&task.id, "nope"));
        assert!(store.delete_comment(&task.id, &comment.id));
        assert!(store.get_by_id(&task.id).expect("task").comments.is_empty());
    }

    #[test]
    fn overdue_and_reminders_use_local_today() {
        let (_clock, mut store) = fixture();
        store.add(Task::new("late").with_due_date(date(2023, 12, 30))).expect("added");
        store.add(Task::new("today").with_due_date(date(2024, 1, 1))).expect("added");
        store.add(Task::new("later").with_due_date(date(2024, 1, 5))).expect("added");
        let finished = store
            .add(Task::new("late but done").with_due_date(date(2023, 12, 1)))
            .expect("added");
        store.complete(&finished.id).expect("ok");

        let overdue: Vec<String> = store.overdue().into_iter().map(|t| t.text).collect();
        assert_eq!(overdue, vec!["late"]);
        let reminders: Vec<String> = store.reminders().into_iter().map(|t| t.text).collect();
        assert_eq!(reminders, vec!["late", "today"]);
    }

    #[test]
    fn filters_by_project_status_and_pomodoros() {
        let (_clock, mut store) = fixture();
        let a = store
            .add(Task::new("a").with_project("p1").with_priority(Priority::High))
            .expect("added");
        store.add(Task::new("b")).expect("added");
        store.record_pomodoro(&a.id).expect("ok");
        let a = store.record_pomodoro(&a.id).expect("ok").expect("exists");

        assert_eq!(a.pomodoros_completed, 2);
        assert_eq!(store.by_project(Some("p1")).len(), 1);
        assert_eq!(store.by_project(None).len(), 1);
        assert_eq!(store.by_status(TaskStatus::Todo).len(), 2);
        assert!(store.search("A").iter().any(|t| t.id == a.id));
    }

    #[test]
    fn invalid_recurrence_is_rejected() {
        let (_clock, mut store) = fixture();
        let error = store
            .add(Task::new("bad").with_recurrence(Recurrence::new(RecurrenceKind::Daily, 0)))
            .expect_err("interval zero");
        assert!(matches!(error, AppError::Validation(_)));
        assert!(store.is_empty());
    }
}
