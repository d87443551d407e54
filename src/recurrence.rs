use crate::models::{Recurrence, RecurrenceKind, Task, TaskStatus};
use chrono::{DateTime, Duration, Months, NaiveDate, Utc};

/// Advances `from` by one step of the rule. Month arithmetic clamps to the
/// last day of the target month (Jan 31 + 1 month = Feb 28/29).
pub fn advance(from: NaiveDate, rule: &Recurrence) -> Option<NaiveDate> {
    let interval = rule.interval.max(1);
    match rule.kind {
        RecurrenceKind::Daily => from.checked_add_signed(Duration::days(i64::from(interval))),
        RecurrenceKind::Weekly => from.checked_add_signed(Duration::days(7 * i64::from(interval))),
        RecurrenceKind::Monthly => from.checked_add_months(Months::new(interval)),
        RecurrenceKind::Yearly => interval
            .checked_mul(12)
            .and_then(|months| from.checked_add_months(Months::new(months))),
    }
}

/// Due date of the next occurrence, or `None` when the series has ended.
pub fn next_due_date(base: NaiveDate, rule: &Recurrence) -> Option<NaiveDate> {
    let next = advance(base, rule)?;
    match rule.end_date {
        Some(end) if next > end => None,
        _ => Some(next),
    }
}

/// Template for the next instance of `completed`, or `None` when the task is
/// not recurring or the series is over. The returned task has no id and
/// unset timestamps; the store assigns both on insert.
pub fn spawn_next(completed: &Task, completed_on: NaiveDate) -> Option<Task> {
    let rule = completed.recurrence.as_ref()?;
    let base = completed.due_date.unwrap_or(completed_on);
    let due = next_due_date(base, rule)?;

    Some(Task {
        id: String::new(),
        text: completed.text.clone(),
        status: TaskStatus::Todo,
        completed_at: None,
        priority: completed.priority,
        due_date: Some(due),
        tags: completed.tags.clone(),
        project_id: completed.project_id.clone(),
        comments: Vec::new(),
        recurrence: Some(rule.clone()),
        pomodoros_completed: 0,
        estimated_pomodoros: completed.estimated_pomodoros,
        notes: completed.notes.clone(),
        recurrence_parent_id: Some(completed.id.clone()),
        created_at: DateTime::<Utc>::default(),
        modified_at: DateTime::<Utc>::default(),
    })
}
