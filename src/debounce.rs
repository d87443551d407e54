use chrono::{DateTime, Duration, Utc};

/// Coalesces rapid successive writes of one blob into a single write.
///
/// Scheduling replaces the pending payload and pushes the deadline out, so
/// only the latest state is written once the burst settles.
#[derive(Debug, Clone)]
pub struct WriteDebouncer {
    delay: Duration,
    pending: Option<PendingWrite>,
}

#[derive(Debug, Clone)]
struct PendingWrite {
    payload: String,
    due_at: DateTime<Utc>,
}

impl WriteDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: None }
    }

    pub fn schedule(&mut self, now: DateTime<Utc>, payload: String) {
        self.pending = Some(PendingWrite {
            payload,
            due_at: now + self.delay,
        });
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn take_due(&mut self, now: DateTime<Utc>) -> Option<String> {
        match self.pending.as_ref() {
            Some(pending) if pending.due_at <= now => self.take(),
            _ => None,
        }
    }

    pub fn take(&mut self) -> Option<String> {
        self.pending.take().map(|pending| pending.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::WriteDebouncer;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn rescheduling_replaces_payload_and_resets_deadline() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let mut debouncer = WriteDebouncer::new(Duration::milliseconds(500));

        debouncer.schedule(start, "first".to_string());
        debouncer.schedule(start + Duration::milliseconds(400), "second".to_string());

        assert_eq!(debouncer.take_due(start + Duration::milliseconds(600)), None);
        assert_eq!(
            debouncer.take_due(start + Duration::milliseconds(900)).as_deref(),
            Some("second")
        );
        assert!(!debouncer.is_pending());
    }
}
