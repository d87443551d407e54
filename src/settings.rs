use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::persistence::{KvAdapter, RETIREMENT_TIMER_KEY, SETTINGS_KEY};
use crate::slot::PersistentSlot;
use crate::tags::HEX_COLOR_RE;
use chrono::{Duration, NaiveDate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppSettings {
    pub username: String,
    pub theme: Theme,
    pub primary_color: String,
    /// Minutes between rolling backups; 0 disables them.
    pub auto_backup_minutes: u32,
    /// Minutes between reminder checks; 0 disables them.
    pub reminder_minutes: u32,
    /// Write-coalescing delay; 0 writes through synchronously.
    pub persist_debounce_ms: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            username: String::new(),
            theme: Theme::System,
            primary_color: "#3b82f6".to_string(),
            auto_backup_minutes: 60,
            reminder_minutes: 1,
            persist_debounce_ms: 0,
        }
    }
}

impl AppSettings {
    pub fn persist_debounce(&self) -> Option<Duration> {
        (self.persist_debounce_ms > 0).then(|| Duration::milliseconds(i64::from(self.persist_debounce_ms)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetirementTimer {
    pub target_date: Option<NaiveDate>,
    pub label: String,
}

impl RetirementTimer {
    /// Whole days from `today` until the target, never negative.
    pub fn days_remaining(&self, today: NaiveDate) -> Option<i64> {
        self.target_date
            .map(|target| target.signed_duration_since(today).num_days().max(0))
    }
}

/// A single-object settings blob.
pub trait SettingsDocument: Serialize + DeserializeOwned + Default + Clone + Send {
    const KEY: &'static str;

    fn validate(&self) -> AppResult<()> {
        Ok(())
    }
}

impl SettingsDocument for AppSettings {
    const KEY: &'static str = SETTINGS_KEY;

    fn validate(&self) -> AppResult<()> {
        if !HEX_COLOR_RE.is_match(&self.primary_color) {
            return Err(AppError::Validation(format!(
                "primary color '{}' is not a #rrggbb value",
                self.primary_color
            )));
        }
        Ok(())
    }
}

impl SettingsDocument for RetirementTimer {
    const KEY: &'static str = RETIREMENT_TIMER_KEY;
}

/// Loads with defaults on missing or corrupt data and persists every change.
/// Settings are not part of undo history.
pub struct SettingsStore<S: SettingsDocument> {
    value: S,
    slot: PersistentSlot,
}

impl<S: SettingsDocument> SettingsStore<S> {
    pub fn open(kv: Arc<dyn KvAdapter>, clock: Arc<dyn Clock>) -> Self {
        let mut slot = PersistentSlot::new(kv, S::KEY, clock);
        let loaded: S = slot.load_json();
        let value = match loaded.validate() {
            Ok(()) => loaded,
            Err(error) => {
                tracing::warn!(key = S::KEY, error = %error, "stored settings invalid; using defaults");
                S::default()
            }
        };
        Self { value, slot }
    }

    pub fn get(&self) -> &S {
        &self.value
    }

    /// Deep-merges a JSON patch over the current value, validates, persists.
    pub fn update(&mut self, patch: serde_json::Value) -> AppResult<S> {
        let mut merged = serde_json::to_value(&self.value)?;
        merge_json(&mut merged, patch);
        let next: S = serde_json::from_value(merged)
            .map_err(|error| AppError::Validation(format!("invalid {} update: {}", S::KEY, error)))?;
        self.replace(next.clone())?;
        Ok(next)
    }

    pub fn replace(&mut self, value: S) -> AppResult<()> {
        value.validate()?;
        self.value = value;
        self.slot.store(&self.value);
        tracing::debug!(key = S::KEY, "settings saved");
        Ok(())
    }

    pub fn last_persist_failure(&self) -> Option<&AppError> {
        self.slot.last_failure()
    }
}

pub type AppSettingsStore = SettingsStore<AppSettings>;
pub type RetirementTimerStore = SettingsStore<RetirementTimer>;

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
