use crate::clock::Clock;
use crate::models::{Priority, Task, TaskStatus};
use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

const WEEK_FROM_SUNDAY: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayCount {
    pub date: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub key: String,
    pub total: usize,
    pub completed: usize,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityCount {
    pub priority: Priority,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: TaskStatus,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub completion_rate: f64,
    pub average_completion_hours: f64,
    pub overdue_count: usize,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub most_productive_day: Option<Weekday>,
    pub weekly_trend: Vec<DayCount>,
    pub project_stats: Vec<GroupStats>,
    pub tag_stats: Vec<GroupStats>,
    pub priority_distribution: Vec<PriorityCount>,
    pub status_distribution: Vec<StatusCount>,
}

/// Read-only aggregation over a task snapshot. Calendar days are the
/// clock's local dates.
pub struct TaskAnalytics<'a> {
    tasks: &'a [Task],
    clock: &'a dyn Clock,
}

impl<'a> TaskAnalytics<'a> {
    pub fn new(tasks: &'a [Task], clock: &'a dyn Clock) -> Self {
        Self { tasks, clock }
    }

    /// Percent of tasks completed, one decimal place. `range` bounds the
    /// creation date, inclusive on both ends.
    pub fn completion_rate(&self, range: Option<(NaiveDate, NaiveDate)>) -> f64 {
        let in_range: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|task| match range {
                Some((start, end)) => {
                    let created = self.clock.local_date(task.created_at);
                    created >= start && created <= end
                }
                None => true,
            })
            .collect();
        let completed = in_range.iter().filter(|task| task.is_completed()).count();
        percent(completed, in_range.len())
    }

    /// Completions per day for the last `days` days, oldest first, ending today.
    pub fn completion_trend(&self, days: u32) -> Vec<DayCount> {
        let per_day = self.completions_per_day();
        let today = self.clock.today();
        (0..days)
            .rev()
            .filter_map(|offset| today.checked_sub_days(Days::new(u64::from(offset))))
            .map(|date| DayCount {
                date,
                count: per_day.get(&date).copied().unwrap_or(0),
            })
            .collect()
    }

    /// Mean hours from creation to completion, one decimal place.
    pub fn average_completion_hours(&self) -> f64 {
        let durations: Vec<f64> = self
            .tasks
            .iter()
            .filter_map(|task| task.completed_at.map(|done| done - task.created_at))
            .map(|elapsed| elapsed.num_seconds() as f64 / 3600.0)
            .collect();
        if durations.is_empty() {
            return 0.0;
        }
        round1(durations.iter().sum::<f64>() / durations.len() as f64)
    }

    /// Per-project totals; tasks without a project are left out.
    pub fn project_stats(&self) -> Vec<GroupStats> {
        group_stats(
            self.tasks
                .iter()
                .filter_map(|task| task.project_id.as_deref().map(|project| (project, task))),
        )
    }

    pub fn tag_stats(&self) -> Vec<GroupStats> {
        group_stats(
            self.tasks
                .iter()
                .flat_map(|task| task.tags.iter().map(move |tag| (tag.as_str(), task))),
        )
    }

    /// Open tasks by priority; every priority is listed.
    pub fn priority_distribution(&self) -> Vec<PriorityCount> {
        Priority::ALL
            .iter()
            .map(|priority| PriorityCount {
                priority: *priority,
                count: self
                    .tasks
                    .iter()
                    .filter(|task| !task.is_completed() && task.priority == *priority)
                    .count(),
            })
            .collect()
    }

    pub fn status_distribution(&self) -> Vec<StatusCount> {
        TaskStatus::ALL
            .iter()
            .map(|status| StatusCount {
                status: *status,
                count: self.tasks.iter().filter(|task| task.status == *status).count(),
            })
            .collect()
    }

    pub fn overdue_count(&self) -> usize {
        let today = self.clock.today();
        self.tasks
            .iter()
            .filter(|task| !task.is_completed() && task.due_date.map(|due| due < today).unwrap_or(false))
            .count()
    }

    /// Consecutive days with a completion, counting back from today. Zero
    /// when nothing was completed today.
    pub fn current_streak(&self) -> u32 {
        let days = self.completion_days();
        let mut cursor = Some(self.clock.today());
        let mut streak = 0;
        while let Some(day) = cursor.filter(|day| days.contains(day)) {
            streak += 1;
            cursor = day.pred_opt();
        }
        streak
    }

    pub fn longest_streak(&self) -> u32 {
        let mut longest = 0;
        let mut run = 0;
        let mut previous: Option<NaiveDate> = None;
        for day in self.completion_days() {
            run = match previous.and_then(|prev| prev.succ_opt()) {
                Some(expected) if expected == day => run + 1,
                _ => 1,
            };
            longest = longest.max(run);
            previous = Some(day);
        }
        longest
    }

    /// Weekday with the most completions; the earliest from Sunday wins a tie.
    pub fn most_productive_day(&self) -> Option<Weekday> {
        let mut counts = [0usize; 7];
        for task in self.tasks {
            if let Some(done) = task.completed_at {
                let weekday = self.clock.local_date(done).weekday();
                counts[weekday.num_days_from_sunday() as usize] += 1;
            }
        }
        let mut best: Option<(usize, usize)> = None;
        for (index, count) in counts.iter().enumerate() {
            if *count > 0 && best.map(|(_, top)| *count > top).unwrap_or(true) {
                best = Some((index, *count));
            }
        }
        best.map(|(index, _)| WEEK_FROM_SUNDAY[index])
    }

    pub fn summary(&self) -> AnalyticsReport {
        AnalyticsReport {
            total_tasks: self.tasks.len(),
            completed_tasks: self.tasks.iter().filter(|task| task.is_completed()).count(),
            completion_rate: self.completion_rate(None),
            average_completion_hours: self.average_completion_hours(),
            overdue_count: self.overdue_count(),
            current_streak: self.current_streak(),
            longest_streak: self.longest_streak(),
            most_productive_day: self.most_productive_day(),
            weekly_trend: self.completion_trend(7),
            project_stats: self.project_stats(),
            tag_stats: self.tag_stats(),
            priority_distribution: self.priority_distribution(),
            status_distribution: self.status_distribution(),
        }
    }

    fn completions_per_day(&self) -> HashMap<NaiveDate, usize> {
        let mut per_day = HashMap::new();
        for task in self.tasks {
            if let Some(done) = task.completed_at {
                *per_day.entry(self.clock.local_date(done)).or_insert(0) += 1;
            }
        }
        per_day
    }

    fn completion_days(&self) -> BTreeSet<NaiveDate> {
        self.tasks
            .iter()
            .filter_map(|task| task.completed_at)
            .map(|done| self.clock.local_date(done))
            .collect()
    }
}

fn group_stats<'t, I>(entries: I) -> Vec<GroupStats>
where
    I: Iterator<Item = (&'t str, &'t Task)>,
{
    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, (usize, usize)> = HashMap::new();
    for (key, task) in entries {
        let entry = totals.entry(key.to_string()).or_insert_with(|| {
            order.push(key.to_string());
            (0, 0)
        });
        entry.0 += 1;
        if task.is_completed() {
            entry.1 += 1;
        }
    }
    order
        .into_iter()
        .map(|key| {
            let (total, completed) = totals.get(&key).copied().unwrap_or((0, 0));
            GroupStats {
                rate: percent(completed, total),
                key,
                total,
                completed,
            }
        })
        .collect()
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round1(part as f64 * 100.0 / whole as f64)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
