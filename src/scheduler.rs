use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub name: String,
    pub period: Duration,
    pub scheduled_at: DateTime<Utc>,
}

struct ScheduledJob {
    info: JobInfo,
    handle: JoinHandle<()>,
}

/// Named recurring jobs on the tokio runtime. Scheduling a name that is
/// already taken restarts it with the new period and body.
#[derive(Clone, Default)]
pub struct Scheduler {
    jobs: Arc<Mutex<HashMap<String, ScheduledJob>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `job` every `period`, first after one full period. Must be called
    /// from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, name: &str, period: Duration, job: F) -> AppResult<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(AppError::Validation(format!("job '{}' needs a non-zero period", name)));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| AppError::Internal("scheduler requires a tokio runtime".to_string()))?;

        let mut jobs = self.lock()?;
        let job: Job = Arc::new(move || Box::pin(job()) as JobFuture);
        let job_name = name.to_string();
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracing::debug!(job = %job_name, "running scheduled job");
                job().await;
            }
        });

        let scheduled = ScheduledJob {
            info: JobInfo {
                name: name.to_string(),
                period,
                scheduled_at: Utc::now(),
            },
            handle,
        };
        if let Some(previous) = jobs.insert(name.to_string(), scheduled) {
            previous.handle.abort();
            tracing::info!(job = %name, "scheduled job restarted");
        } else {
            tracing::info!(job = %name, period_ms = period.as_millis() as u64, "job scheduled");
        }
        Ok(())
    }

    pub fn cancel(&self, name: &str) -> bool {
        let removed = self.lock_or_recover().remove(name);
        match removed {
            Some(job) => {
                job.handle.abort();
                tracing::info!(job = %name, "job cancelled");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<ScheduledJob> = self.lock_or_recover().drain().map(|(_, job)| job).collect();
        for job in &drained {
            job.handle.abort();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "all jobs cancelled");
        }
        drained.len()
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.lock_or_recover()
            .get(name)
            .map(|job| !job.handle.is_finished())
            .unwrap_or(false)
    }

    /// Active jobs ordered by name.
    pub fn jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self
            .lock_or_recover()
            .values()
            .filter(|job| !job.handle.is_finished())
            .map(|job| job.info.clone())
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, HashMap<String, ScheduledJob>>> {
        self.jobs
            .lock()
            .map_err(|_| AppError::Internal("scheduler mutex poisoned".to_string()))
    }

    fn lock_or_recover(&self) -> MutexGuard<'_, HashMap<String, ScheduledJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
