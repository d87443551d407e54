use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::models::TagCount;
use crate::persistence::{KvAdapter, TAG_COLORS_KEY};
use crate::slot::PersistentSlot;
use chrono::Duration;
use once_cell::sync::Lazy;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

pub const TAG_PALETTE: [&str; 17] = [
    "#ef4444", "#f97316", "#f59e0b", "#eab308", "#84cc16", "#22c55e", "#10b981", "#14b8a6",
    "#06b6d4", "#0ea5e9", "#3b82f6", "#6366f1", "#8b5cf6", "#a855f7", "#d946ef", "#ec4899",
    "#f43f5e",
];

pub(crate) static HEX_COLOR_RE: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"^#[0-9a-fA-F]{6}$").expect("valid hex color regex"));

pub trait Tagged {
    fn tags(&self) -> &[String];
}

/// Tag usage across a collection, most used first. Ties keep the order in
/// which tags were first seen.
pub fn all_tags<T: Tagged>(items: &[T]) -> Vec<TagCount> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for item in items {
        for tag in item.tags() {
            let count = counts.entry(tag.clone()).or_insert_with(|| {
                order.push(tag.clone());
                0
            });
            *count += 1;
        }
    }

    let mut tags: Vec<TagCount> = order
        .into_iter()
        .map(|tag| {
            let count = counts.get(&tag).copied().unwrap_or(0);
            TagCount { tag, count }
        })
        .collect();
    tags.sort_by(|a, b| b.count.cmp(&a.count));
    tags
}

/// Chooses a palette color for a tag that has none yet.
pub trait ColorPicker: Send {
    fn pick(&mut self, tag: &str, palette: &[&'static str]) -> &'static str;
}

#[derive(Debug, Default)]
pub struct RandomColorPicker;

impl ColorPicker for RandomColorPicker {
    fn pick(&mut self, _tag: &str, palette: &[&'static str]) -> &'static str {
        let index = rand::rng().random_range(0..palette.len());
        palette[index]
    }
}

/// Same tag, same color, on every machine.
#[derive(Debug, Default)]
pub struct HashColorPicker;

impl ColorPicker for HashColorPicker {
    fn pick(&mut self, tag: &str, palette: &[&'static str]) -> &'static str {
        // FNV-1a; stable across processes unlike the std hasher.
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in tag.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        palette[(hash % palette.len() as u64) as usize]
    }
}

/// Persisted tag → color lookup with auto-assignment for unseen tags.
pub struct TagPalette {
    colors: BTreeMap<String, String>,
    picker: Box<dyn ColorPicker>,
    slot: PersistentSlot,
}

impl TagPalette {
    pub fn open(kv: Arc<dyn KvAdapter>, clock: Arc<dyn Clock>) -> Self {
        Self::with_picker(kv, clock, Box::new(RandomColorPicker))
    }

    pub fn with_picker(kv: Arc<dyn KvAdapter>, clock: Arc<dyn Clock>, picker: Box<dyn ColorPicker>) -> Self {
        let mut slot = PersistentSlot::new(kv, TAG_COLORS_KEY, clock);
        let colors: BTreeMap<String, String> = slot.load_json();
        slot.seed_history(&colors);
        Self { colors, picker, slot }
    }

    pub fn color_for(&self, tag: &str) -> Option<&str> {
        self.colors.get(tag).map(String::as_str)
    }

    /// Returns the tag's color, assigning and persisting one first if needed.
    pub fn ensure_color(&mut self, tag: &str) -> String {
        if let Some(color) = self.colors.get(tag) {
            return color.clone();
        }
        let color = self.picker.pick(tag, &TAG_PALETTE).to_string();
        self.colors.insert(tag.to_string(), color.clone());
        self.slot.commit(&self.colors);
        tracing::debug!(tag = %tag, color = %color, "tag color assigned");
        color
    }

    pub fn set_color(&mut self, tag: &str, color: &str) -> AppResult<()> {
        if tag.trim().is_empty() {
            return Err(AppError::Validation("tag must not be empty".to_string()));
        }
        if !HEX_COLOR_RE.is_match(color) {
            return Err(AppError::Validation(format!(
                "color '{}' is not a #rrggbb value",
                color
            )));
        }
        self.colors.insert(tag.to_string(), color.to_ascii_lowercase());
        self.slot.commit(&self.colors);
        Ok(())
    }

    pub fn remove_color(&mut self, tag: &str) -> bool {
        if self.colors.remove(tag).is_none() {
            return false;
        }
        self.slot.commit(&self.colors);
        true
    }

    /// Drops colors for tags not in `live_tags`. Returns how many went.
    pub fn prune<'a, I>(&mut self, live_tags: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let live: HashSet<&str> = live_tags.into_iter().collect();
        let before = self.colors.len();
        self.colors.retain(|tag, _| live.contains(tag.as_str()));
        let removed = before - self.colors.len();
        if removed > 0 {
            self.slot.commit(&self.colors);
        }
        removed
    }

    pub fn colors(&self) -> &BTreeMap<String, String> {
        &self.colors
    }

    pub fn replace_all(&mut self, colors: BTreeMap<String, String>) -> AppResult<()> {
        if let Some((tag, color)) = colors.iter().find(|(_, color)| !HEX_COLOR_RE.is_match(color)) {
            return Err(AppError::Validation(format!(
                "tag '{}' has invalid color '{}'",
                tag, color
            )));
        }
        self.colors = colors;
        self.slot.commit(&self.colors);
        Ok(())
    }

    pub fn undo(&mut self) -> bool {
        let Some(snapshot) = self.slot.undo() else {
            return false;
        };
        match serde_json::from_str(&snapshot) {
            Ok(colors) => {
                self.colors = colors;
                true
            }
            Err(error) => {
                tracing::warn!(error = %error, "tag color snapshot is corrupt");
                false
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        self.slot.can_undo()
    }

    pub fn set_write_delay(&mut self, delay: Option<Duration>) {
        self.slot.set_debounce(delay);
    }

    pub fn flush_due(&mut self) -> bool {
        self.slot.flush_due()
    }

    pub fn flush(&mut self) -> bool {
        self.slot.flush()
    }

    pub fn last_persist_failure(&self) -> Option<&AppError> {
        self.slot.last_failure()
    }
}
