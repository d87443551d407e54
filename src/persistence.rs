use crate::errors::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::Mutex;

pub const NOTES_KEY: &str = "notes";
pub const TASKS_KEY: &str = "tasks";
pub const PROJECTS_KEY: &str = "projects";
pub const BOOKMARKS_KEY: &str = "bookmarks";
pub const TAG_COLORS_KEY: &str = "tagColors";
pub const SETTINGS_KEY: &str = "settings";
pub const RETIREMENT_TIMER_KEY: &str = "retirementTimer";
pub const BACKUP_KEY: &str = "backup";

/// Named-blob storage underneath every store.
///
/// Writes are whole-value overwrites; adapters hold no business logic.
pub trait KvAdapter: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> AppResult<()>;

    fn remove(&self, key: &str) -> AppResult<()>;
}

/// Process-memory adapter. An optional byte quota makes writes fail the way
/// an exhausted browser storage area does.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| AppError::Internal("memory store mutex poisoned".to_string()))
    }
}

impl KvAdapter for MemoryKv {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut entries = self.lock()?;
        if let Some(quota) = self.quota_bytes {
            let others: usize = entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(existing, stored)| existing.len() + stored.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                return Err(AppError::Persistence(format!(
                    "quota exceeded writing '{}' ({} of {} bytes)",
                    key, needed, quota
                )));
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_kv_round_trips_and_removes() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get("notes").expect("get"), None);
        kv.set("notes", "[]").expect("set");
        assert_eq!(kv.get("notes").expect("get").as_deref(), Some("[]"));
        kv.remove("notes").expect("remove");
        assert_eq!(kv.get("notes").expect("get"), None);
    }

    #[test]
    fn quota_rejects_oversized_writes_and_keeps_previous_value() {
        let kv = MemoryKv::with_quota(16);
        kv.set("k", "small").expect("fits");
        let error = kv.set("k", "a value that is far too large").expect_err("over quota");
        assert!(error.to_string().contains("quota exceeded"));
        assert_eq!(kv.get("k").expect("get").as_deref(), Some("small"));
    }
}
