use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::models::TagCount;
use crate::persistence::KvAdapter;
use crate::search::{self, Searchable};
use crate::slot::PersistentSlot;
use crate::tags::{self, Tagged};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// A record kind an [`EntityStore`] can own.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send {
    type Patch: Default;

    const KIND: &'static str;
    const ID_PREFIX: &'static str;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn created_at(&self) -> DateTime<Utc>;
    fn modified_at(&self) -> DateTime<Utc>;
    fn set_timestamps(&mut self, created_at: DateTime<Utc>, modified_at: DateTime<Utc>);

    fn validate(&self) -> AppResult<()> {
        Ok(())
    }

    fn apply_patch(&mut self, patch: Self::Patch, now: DateTime<Utc>);

    /// Brings derived fields back in line. Runs on every record entering the
    /// store, before validation.
    fn normalize(&mut self, _now: DateTime<Utc>) {}

    /// Record to insert as a consequence of a mutation, e.g. the next
    /// instance of a recurring task. `existing` is the collection before the
    /// mutation. Identity and timestamps are filled in by the store.
    fn follow_up(&self, _previous: &Self, _existing: &[Self], _clock: &dyn Clock) -> Option<Self> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Updated<T> {
    pub item: T,
    pub spawned: Option<T>,
}

/// In-memory collection of one entity kind, written through to a named blob
/// after every successful mutation. The collection is kept newest-first.
pub struct EntityStore<T: Entity> {
    items: Vec<T>,
    slot: PersistentSlot,
}

impl<T: Entity> EntityStore<T> {
    pub fn new(kv: Arc<dyn KvAdapter>, key: &'static str, clock: Arc<dyn Clock>) -> Self {
        Self {
            items: Vec::new(),
            slot: PersistentSlot::new(kv, key, clock),
        }
    }

    pub fn open(kv: Arc<dyn KvAdapter>, key: &'static str, clock: Arc<dyn Clock>) -> Self {
        let mut store = Self::new(kv, key, clock);
        store.load_all();
        store
    }

    /// Rebuilds the collection from storage. Never fails: corrupt blobs
    /// reset to empty and malformed records are skipped.
    pub fn load_all(&mut self) -> usize {
        self.items = match self.slot.read() {
            Some(raw) => decode_records(&raw, self.slot.key()),
            None => Vec::new(),
        };
        let now = self.slot.clock().now();
        for item in &mut self.items {
            item.normalize(now);
        }
        self.assign_missing_ids();
        self.slot.seed_history(&self.items);
        tracing::info!(kind = T::KIND, count = self.items.len(), "store loaded");
        self.items.len()
    }

    pub fn add(&mut self, mut draft: T) -> AppResult<T> {
        if !draft.id().is_empty() && self.position(draft.id()).is_some() {
            return Err(AppError::Validation(format!(
                "{} id '{}' already exists",
                T::KIND,
                draft.id()
            )));
        }
        draft.normalize(self.slot.clock().now());
        draft.validate()?;

        let stored = self.insert_draft(draft);
        self.commit();
        tracing::debug!(kind = T::KIND, id = %stored.id(), "entity added");
        Ok(stored)
    }

    pub fn update(&mut self, id: &str, patch: T::Patch) -> AppResult<Option<T>> {
        Ok(self.update_detailed(id, patch)?.map(|updated| updated.item))
    }

    pub fn update_detailed(&mut self, id: &str, patch: T::Patch) -> AppResult<Option<Updated<T>>> {
        self.mutate_detailed(id, |item, now| {
            item.apply_patch(patch, now);
            Ok(())
        })
    }

    /// Applies `f` to a copy of the entity, validates it, then swaps it in.
    /// `Ok(None)` when `id` does not exist.
    pub fn mutate<F>(&mut self, id: &str, f: F) -> AppResult<Option<T>>
    where
        F: FnOnce(&mut T, DateTime<Utc>) -> AppResult<()>,
    {
        Ok(self.mutate_detailed(id, f)?.map(|updated| updated.item))
    }

    pub fn mutate_detailed<F>(&mut self, id: &str, f: F) -> AppResult<Option<Updated<T>>>
    where
        F: FnOnce(&mut T, DateTime<Utc>) -> AppResult<()>,
    {
        let Some(index) = self.position(id) else {
            return Ok(None);
        };

        let now = self.slot.clock().now();
        let previous = self.items[index].clone();
        let mut next = previous.clone();
        f(&mut next, now)?;
        next.set_id(previous.id().to_string());
        next.set_timestamps(previous.created_at(), now.max(previous.created_at()));
        next.normalize(now);
        next.validate()?;

        let spawned = next.follow_up(&previous, &self.items, self.slot.clock().as_ref());
        self.items[index] = next.clone();
        let spawned = spawned.map(|draft| self.insert_draft(draft));

        self.commit();
        tracing::debug!(kind = T::KIND, id = %id, spawned = spawned.is_some(), "entity updated");
        Ok(Some(Updated { item: next, spawned }))
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        self.items.remove(index);
        self.commit();
        tracing::debug!(kind = T::KIND, id = %id, "entity removed");
        true
    }

    pub fn get_by_id(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Every entity in canonical order.
    pub fn get_all(&self) -> Vec<T> {
        search::canonical(self.items.iter().cloned().collect())
    }

    pub fn list<P>(&self, predicate: P) -> Vec<T>
    where
        P: Fn(&T) -> bool,
    {
        search::canonical(self.items.iter().filter(|item| predicate(item)).cloned().collect())
    }

    /// Raw collection order (newest insertion first).
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replaces the whole collection, e.g. on import. Records keep their
    /// identity; records without one get a fresh id.
    pub fn replace_all(&mut self, mut items: Vec<T>) -> AppResult<()> {
        let now = self.slot.clock().now();
        for item in &mut items {
            item.normalize(now);
        }
        validate_collection(&items)?;
        self.items = items;
        self.assign_missing_ids();
        self.commit();
        Ok(())
    }

    pub fn undo(&mut self) -> bool {
        let Some(snapshot) = self.slot.undo() else {
            return false;
        };
        self.items = decode_records(&snapshot, self.slot.key());
        tracing::info!(kind = T::KIND, count = self.items.len(), "store restored from history");
        true
    }

    pub fn can_undo(&self) -> bool {
        self.slot.can_undo()
    }

    pub fn history_len(&self) -> usize {
        self.slot.history_len()
    }

    pub fn set_write_delay(&mut self, delay: Option<Duration>) {
        self.slot.set_debounce(delay);
    }

    pub fn has_pending_write(&self) -> bool {
        self.slot.has_pending_write()
    }

    pub fn flush_due(&mut self) -> bool {
        self.slot.flush_due()
    }

    pub fn flush(&mut self) -> bool {
        self.slot.flush()
    }

    /// The failure from the most recent write, cleared by the next success.
    pub fn last_persist_failure(&self) -> Option<&AppError> {
        self.slot.last_failure()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.slot.clock()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    fn insert_draft(&mut self, mut draft: T) -> T {
        let now = self.slot.clock().now();
        draft.normalize(now);
        if draft.id().is_empty() {
            draft.set_id(self.unique_id(now));
        }
        draft.set_timestamps(now, now);
        self.items.insert(0, draft.clone());
        draft
    }

    fn unique_id(&self, now: DateTime<Utc>) -> String {
        loop {
            let candidate = new_id(T::ID_PREFIX, now);
            if self.position(&candidate).is_none() {
                return candidate;
            }
        }
    }

    fn assign_missing_ids(&mut self) {
        let now = self.slot.clock().now();
        for index in 0..self.items.len() {
            if self.items[index].id().is_empty() {
                let id = self.unique_id(now);
                self.items[index].set_id(id);
            }
        }
    }

    fn commit(&mut self) {
        self.slot.commit(&self.items);
    }
}

impl<T: Entity + Tagged> EntityStore<T> {
    /// Entities carrying `tag` (case-sensitive), canonical order.
    pub fn with_tag(&self, tag: &str) -> Vec<T> {
        self.list(|item| item.tags().iter().any(|candidate| candidate == tag))
    }

    pub fn all_tags(&self) -> Vec<TagCount> {
        tags::all_tags(&self.items)
    }
}

impl<T: Entity + Searchable> EntityStore<T> {
    pub fn search(&self, query: &str) -> Vec<T> {
        search::search(&self.items, query)
    }
}

/// Validates every record and rejects repeated ids.
pub fn validate_collection<T: Entity>(items: &[T]) -> AppResult<()> {
    let mut seen = HashSet::new();
    for item in items {
        item.validate()?;
        if !item.id().is_empty() && !seen.insert(item.id()) {
            return Err(AppError::Validation(format!(
                "duplicate {} id '{}'",
                T::KIND,
                item.id()
            )));
        }
    }
    Ok(())
}

pub(crate) fn new_id(prefix: &str, now: DateTime<Utc>) -> String {
    let short = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, now.format("%Y%m%d%H%M%S"), &short[..12])
}

/// Decodes a stored collection record by record, skipping malformed or
/// duplicate entries.
fn decode_records<T: Entity>(raw: &str, key: &str) -> Vec<T> {
    let values = match serde_json::from_str::<Vec<Value>>(raw) {
        Ok(values) => values,
        Err(error) => {
            tracing::warn!(key = key, error = %error, "stored collection is corrupt; resetting to empty");
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        match serde_json::from_value::<T>(value) {
            Ok(item) => {
                if !item.id().is_empty() && !seen.insert(item.id().to_string()) {
                    tracing::warn!(key = key, id = %item.id(), "skipping duplicate record id");
                    continue;
                }
                items.push(item);
            }
            Err(error) => {
                tracing::warn!(key = key, index = index, error = %error, "skipping malformed record");
            }
        }
    }
    items
}
