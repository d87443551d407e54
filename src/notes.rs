use crate::errors::{AppError, AppResult};
use crate::models::{Note, NotePatch};
use crate::search::Searchable;
use crate::store::{Entity, EntityStore};
use crate::tags::Tagged;
use chrono::{DateTime, Utc};

pub type NoteStore = EntityStore<Note>;

impl Entity for Note {
    type Patch = NotePatch;

    const KIND: &'static str = "note";
    const ID_PREFIX: &'static str = "note";

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
        if self.title.trim().is_empty() && self.content.trim().is_empty() {
            return Err(AppError::Validation(
                "note needs a title or some content".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_patch(&mut self, patch: NotePatch, _now: DateTime<Utc>) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(tags) = patch.tags {
            self.tags = normalize_tags(tags);
        }
    }

    fn normalize(&mut self, _now: DateTime<Utc>) {
        self.tags = normalize_tags(std::mem::take(&mut self.tags));
    }
}

impl Tagged for Note {
    fn tags(&self) -> &[String] {
        &self.tags
    }
}

impl Searchable for Note {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.title.as_str(), self.content.as_str()]
    }
}

/// Trims tags and drops blanks and repeats; case is preserved.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() || out.iter().any(|existing| existing == trimmed) {
            continue;
        }
        out.push(trimmed.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock, SystemClock};
    use crate::persistence::{KvAdapter, MemoryKv, NOTES_KEY};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn fixture() -> (Arc<MemoryKv>, ManualClock, NoteStore) {
        let kv = Arc::new(MemoryKv::new());
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
        let store = NoteStore::open(kv.clone(), NOTES_KEY, Arc::new(clock.clone()));
        (kv, clock, store)
    }

    #[test]
    fn added_note_is_retrievable_with_identity_filled() {
        let (_kv, clock, mut store) = fixture();
        let added = store
            .add(Note::new("Groceries", "milk, eggs").with_tags(["home"]))
            .expect("note added");

        assert!(added.id.starts_with("note_"));
        assert_eq!(added.created_at, clock.now());
        assert_eq!(added.modified_at, added.created_at);
        assert_eq!(store.get_by_id(&added.id), Some(&added));
    }

    #[test]
    fn empty_patch_only_touches_modified_at() {
        let (_kv, clock, mut store) = fixture();
        let added = store.add(Note::new("Plan", "week")).expect("added");
        clock.advance(Duration::minutes(5));

        let updated = store
            .update(&added.id, NotePatch::default())
            .expect("update ok")
            .expect("note exists");
        assert_eq!(updated.modified_at, added.modified_at + Duration::minutes(5));
        assert_eq!(
            Note {
                modified_at: added.modified_at,
                ..updated
            },
            added
        );
    }

    #[test]
    fn update_unknown_id_is_not_found_signal() {
        let (_kv, _clock, mut store) = fixture();
        let result = store.update("missing", NotePatch::default()).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn invalid_patch_is_rejected_without_mutation() {
        let (kv, _clock, mut store) = fixture();
        let added = store.add(Note::new("Title", "")).expect("added");
        let before = kv.get(NOTES_KEY).expect("get");

        let error = store
            .update(
                &added.id,
                NotePatch {
                    title: Some("  ".to_string()),
                    ..NotePatch::default()
                },
            )
            .expect_err("blank note rejected");
        assert!(matches!(error, AppError::Validation(_)));
        assert_eq!(store.get_by_id(&added.id), Some(&added));
        assert_eq!(kv.get(NOTES_KEY).expect("get"), before);
    }

    #[test]
    fn remove_reports_whether_anything_was_removed() {
        let (_kv, clock, mut store) = fixture();
        let keep = store.add(Note::new("Keep", "")).expect("added");
        clock.advance(Duration::seconds(1));
        let gone = store.add(Note::new("Gone", "")).expect("added");

        assert!(store.remove(&gone.id));
        assert!(store.get_by_id(&gone.id).is_none());
        assert!(!store.remove(&gone.id));
        assert_eq!(store.get_by_id(&keep.id).map(|n| n.modified_at), Some(keep.modified_at));
    }

    #[test]
    fn get_all_is_newest_modified_first_with_stable_ties() {
        let (_kv, clock, mut store) = fixture();
        let a = store.add(Note::new("a", "")).expect("a");
        store.add(Note::new("b", "")).expect("b");
        clock.advance(Duration::minutes(1));
        store.add(Note::new("c", "")).expect("c");
        clock.advance(Duration::minutes(1));
        store.update(&a.id, NotePatch::default()).expect("touch a");

        let order: Vec<String> = store.get_all().into_iter().map(|note| note.title).collect();
        assert_eq!(order, vec!["a", "c", "b"]);
    }

    #[test]
    fn search_matches_fields_and_tags_case_insensitively() {
        let (_kv, clock, mut store) = fixture();
        store.add(Note::new("Rust notes", "ownership")).expect("added");
        clock.advance(Duration::seconds(1));
        store
            .add(Note::new("Recipes", "bread").with_tags(["Kitchen"]))
            .expect("added");

        assert_eq!(store.search("OWNER").len(), 1);
        assert_eq!(store.search("kitchen")[0].title, "Recipes");
        assert_eq!(store.search("   "), store.get_all());
        assert_eq!(store.search(""), store.get_all());
        assert!(store.search("absent").is_empty());
    }

    #[test]
    fn tag_views_and_counts() {
        let (_kv, _clock, mut store) = fixture();
        store.add(Note::new("one", "").with_tags(["a", "b"])).expect("added");
        store.add(Note::new("two", "").with_tags(["a"])).expect("added");

        assert_eq!(store.with_tag("a").len(), 2);
        assert_eq!(store.with_tag("A").len(), 0);
        assert_eq!(store.all_tags()[0].tag, "a");
        assert_eq!(store.all_tags()[0].count, 2);
    }

    #[test]
    fn undo_restores_previous_states_then_stops() {
        let (kv, clock, mut store) = fixture();
        let a = store.add(Note::new("A", "")).expect("A");
        clock.advance(Duration::seconds(1));
        store.add(Note::new("B", "")).expect("B");
        clock.advance(Duration::seconds(1));
        store.remove(&a.id);

        assert!(store.undo());
        assert_eq!(store.len(), 2);
        assert!(store.undo());
        assert_eq!(store.len(), 1);
        assert_eq!(store.items()[0].id, a.id);
        assert!(store.undo());
        assert!(store.is_empty());
        assert!(!store.can_undo());
        assert!(!store.undo());

        let persisted = kv.get(NOTES_KEY).expect("get").expect("blob");
        assert_eq!(persisted, "[]");
    }

    #[test]
    fn corrupt_storage_loads_empty_and_keeps_working() {
        let kv = Arc::new(MemoryKv::new());
        kv.set(NOTES_KEY, "not json at all").expect("seed");
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
        let mut store = NoteStore::open(kv.clone(), NOTES_KEY, Arc::new(clock));
        assert!(store.is_empty());

        store.add(Note::new("fresh", "")).expect("added");
        let reloaded = NoteStore::open(kv, NOTES_KEY, Arc::new(SystemClock));
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn malformed_records_are_skipped_on_load() {
        let kv = Arc::new(MemoryKv::new());
        kv.set(
            NOTES_KEY,
            r#"[{"id":"n1","title":"ok"},{"id":"n2"},{"id":"n1","title":"dup"}]"#,
        )
        .expect("seed");
        let store = NoteStore::open(kv, NOTES_KEY, Arc::new(SystemClock));
        assert_eq!(store.len(), 1);
        assert_eq!(store.items()[0].title, "ok");
    }

    #[test]
    fn write_failure_is_reported_but_memory_stays_authoritative() {
        let kv = Arc::new(MemoryKv::with_quota(64));
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
        let mut store = NoteStore::open(kv, NOTES_KEY, Arc::new(clock));

        let added = store
            .add(Note::new("A note that is much too long", "for a sixty-four byte quota"))
            .expect("mutation still succeeds");
        assert!(store.last_persist_failure().is_some());
        assert_eq!(store.get_by_id(&added.id), Some(&added));
    }

    #[test]
    fn caller_supplied_duplicate_id_is_rejected() {
        let (_kv, _clock, mut store) = fixture();
        let mut first = Note::new("first", "");
        first.id = "fixed".to_string();
        store.add(first.clone()).expect("added");
        let error = store.add(first).expect_err("duplicate id");
        assert!(error.to_string().starts_with("VALIDATION"));
    }

    #[test]
    fn added_note_tags_are_a_set() {
        let (_kv, _clock, mut store) = fixture();
        let added = store
            .add(Note::new("t", "").with_tags(["a", "a", " ", " b "]))
            .expect("added");
        assert_eq!(added.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.get_by_id(&added.id).map(|n| n.tags.len()), Some(2));

        let counts = store.all_tags();
        assert_eq!(counts.len(), 2);
        assert!(counts.iter().all(|count| count.count == 1));
    }

    #[test]
    fn tags_are_normalized_on_patch() {
        assert_eq!(
            normalize_tags(vec![" a ".into(), "".into(), "a".into(), "B".into()]),
            vec!["a".to_string(), "B".to_string()]
        );
    }
}
