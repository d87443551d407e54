use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Blocked,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [Self::Todo, Self::InProgress, Self::Done, Self::Blocked];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Done => "done",
            Self::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Self::Low, Self::Medium, Self::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommentKind {
    User,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recurrence {
    #[serde(rename = "type")]
    pub kind: RecurrenceKind,
    pub interval: u32,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl Recurrence {
    pub fn new(kind: RecurrenceKind, interval: u32) -> Self {
        Self {
            kind,
            interval,
            end_date: None,
        }
    }

    pub fn until(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: CommentKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub modified_at: DateTime<Utc>,
}

impl Note {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            created_at: DateTime::default(),
            modified_at: DateTime::default(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// A task. `completed` is not stored: it is `status == Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "TaskRecord", from = "TaskRecord")]
pub struct Task {
    pub id: String,
    pub text: String,
    pub status: TaskStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub tags: Vec<String>,
    pub project_id: Option<String>,
    pub comments: Vec<Comment>,
    pub recurrence: Option<Recurrence>,
    pub pomodoros_completed: u32,
    pub estimated_pomodoros: u32,
    pub notes: Option<String>,
    pub recurrence_parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            text: text.into(),
            status: TaskStatus::Todo,
            completed_at: None,
            priority: Priority::Medium,
            due_date: None,
            tags: Vec::new(),
            project_id: None,
            comments: Vec::new(),
            recurrence: None,
            pomodoros_completed: 0,
            estimated_pomodoros: 0,
            notes: None,
            recurrence_parent_id: None,
            created_at: DateTime::default(),
            modified_at: DateTime::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Done
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }
}

/// Wire shape of a task, including the redundant `completed` and
/// `isRecurring` flags older payloads carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRecord {
    #[serde(default)]
    id: String,
    text: String,
    #[serde(default)]
    status: Option<TaskStatus>,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    due_date: Option<NaiveDate>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    comments: Vec<Comment>,
    #[serde(default)]
    is_recurring: bool,
    #[serde(default)]
    recurrence: Option<Recurrence>,
    #[serde(default)]
    pomodoros_completed: u32,
    #[serde(default)]
    estimated_pomodoros: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recurrence_parent_id: Option<String>,
    #[serde(default)]
    created_at: DateTime<Utc>,
    #[serde(default)]
    modified_at: DateTime<Utc>,
}

impl From<Task> for TaskRecord {
    fn from(task: Task) -> Self {
        Self {
            completed: task.is_completed(),
            is_recurring: task.is_recurring(),
            id: task.id,
            text: task.text,
            status: Some(task.status),
            completed_at: task.completed_at,
            priority: task.priority,
            due_date: task.due_date,
            tags: task.tags,
            project_id: task.project_id,
            comments: task.comments,
            recurrence: task.recurrence,
            pomodoros_completed: task.pomodoros_completed,
            estimated_pomodoros: task.estimated_pomodoros,
            notes: task.notes,
            recurrence_parent_id: task.recurrence_parent_id,
            created_at: task.created_at,
            modified_at: task.modified_at,
        }
    }
}

impl From<TaskRecord> for Task {
    fn from(record: TaskRecord) -> Self {
        let status = if record.completed {
            TaskStatus::Done
        } else {
            record.status.unwrap_or_default()
        };
        let completed_at = if status == TaskStatus::Done {
            record.completed_at.or(Some(record.modified_at))
        } else {
            None
        };
        let recurrence = if record.is_recurring {
            record.recurrence.filter(|rule| rule.interval >= 1)
        } else {
            None
        };
        let modified_at = record.modified_at.max(record.created_at);

        Self {
            id: record.id,
            text: record.text,
            status,
            completed_at,
            priority: record.priority,
            due_date: record.due_date,
            tags: record.tags,
            project_id: record.project_id,
            comments: record.comments,
            recurrence,
            pomodoros_completed: record.pomodoros_completed,
            estimated_pomodoros: record.estimated_pomodoros,
            notes: record.notes,
            recurrence_parent_id: record.recurrence_parent_id,
            created_at: record.created_at,
            modified_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskPatch {
    pub text: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    #[serde(deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,
    pub tags: Option<Vec<String>>,
    #[serde(deserialize_with = "double_option")]
    pub project_id: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub recurrence: Option<Option<Recurrence>>,
    pub estimated_pomodoros: Option<u32>,
    pub pomodoros_completed: Option<u32>,
    #[serde(deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub modified_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            color: None,
            description: None,
            created_at: DateTime::default(),
            modified_at: DateTime::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectPatch {
    pub name: Option<String>,
    #[serde(deserialize_with = "double_option")]
    pub color: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub favorite: Option<bool>,
}

/// Named bucket of links. The name is the section's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub name: String,
    #[serde(default)]
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Distinguishes an absent field from an explicit `null` in patches.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
