use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::models::{Link, LinkPatch, Section};
use crate::persistence::{KvAdapter, BOOKMARKS_KEY};
use crate::slot::PersistentSlot;
use crate::store::new_id;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

/// Link found by a cross-section query, paired with its section name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionLink {
    pub section: String,
    pub link: Link,
}

/// Bookmarks grouped into named sections. The section name is its key.
pub struct LinkBook {
    sections: Vec<Section>,
    slot: PersistentSlot,
}

impl LinkBook {
    pub fn open(kv: Arc<dyn KvAdapter>, clock: Arc<dyn Clock>) -> Self {
        let mut slot = PersistentSlot::new(kv, BOOKMARKS_KEY, clock);
        let mut sections: Vec<Section> = slot.load_json();
        let now = slot.clock().now();
        let dropped = retain_valid(&mut sections, now);
        if dropped > 0 {
            tracing::warn!(dropped = dropped, "skipped invalid stored links");
        }
        slot.seed_history(&sections);
        tracing::info!(sections = sections.len(), "link book loaded");
        Self { sections, slot }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.name == name)
    }

    pub fn get_link(&self, section: &str, id: &str) -> Option<&Link> {
        self.section(section)?.links.iter().find(|link| link.id == id)
    }

    /// Adds a link, creating the section when it does not exist yet.
    pub fn add_link(&mut self, section: &str, name: &str, url: &str) -> AppResult<Link> {
        let section_name = section.trim();
        if section_name.is_empty() {
            return Err(AppError::Validation("section name must not be empty".to_string()));
        }
        let name = validate_name(name)?;
        let url = validate_url(url)?;
        if let Some(existing) = self.section(section_name) {
            ensure_unique_url(existing, &url, None)?;
        }

        let now = self.slot.clock().now();
        let link = Link {
            id: new_id("link", now),
            name,
            url,
            favorite: false,
            created_at: now,
            modified_at: now,
        };
        let index = match self.section_index(section_name) {
            Some(index) => index,
            None => {
                self.sections.push(Section {
                    name: section_name.to_string(),
                    links: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        self.sections[index].links.push(link.clone());
        self.commit();
        tracing::debug!(section = %section_name, id = %link.id, "link added");
        Ok(link)
    }

    pub fn update_link(&mut self, section: &str, id: &str, patch: LinkPatch) -> AppResult<Option<Link>> {
        let Some((section_index, link_index)) = self.locate(section, id) else {
            return Ok(None);
        };
        let mut next = self.sections[section_index].links[link_index].clone();
        if let Some(name) = patch.name {
            next.name = validate_name(&name)?;
        }
        if let Some(url) = patch.url {
            next.url = validate_url(&url)?;
            ensure_unique_url(&self.sections[section_index], &next.url, Some(id))?;
        }
        if let Some(favorite) = patch.favorite {
            next.favorite = favorite;
        }
        next.modified_at = self.slot.clock().now().max(next.created_at);

        self.sections[section_index].links[link_index] = next.clone();
        self.commit();
        Ok(Some(next))
    }

    /// Removes a link; a section left empty goes with it.
    pub fn remove_link(&mut self, section: &str, id: &str) -> bool {
        let Some((section_index, link_index)) = self.locate(section, id) else {
            return false;
        };
        self.sections[section_index].links.remove(link_index);
        if self.sections[section_index].links.is_empty() {
            let dropped = self.sections.remove(section_index);
            tracing::debug!(section = %dropped.name, "empty section dropped");
        }
        self.commit();
        true
    }

    pub fn toggle_favorite(&mut self, section: &str, id: &str) -> Option<Link> {
        let (section_index, link_index) = self.locate(section, id)?;
        let now = self.slot.clock().now();
        let link = &mut self.sections[section_index].links[link_index];
        link.favorite = !link.favorite;
        link.modified_at = now.max(link.created_at);
        let toggled = link.clone();
        self.commit();
        Some(toggled)
    }

    /// Favorite links across every section, in section then link order.
    pub fn favorites(&self) -> Vec<SectionLink> {
        self.flatten()
            .filter(|entry| entry.link.favorite)
            .collect()
    }

    /// Moves a link into `to`, creating it when needed. The URL must not
    /// already exist in the target section.
    pub fn move_link(&mut self, from: &str, id: &str, to: &str) -> AppResult<Option<Link>> {
        let target = to.trim();
        if target.is_empty() {
            return Err(AppError::Validation("section name must not be empty".to_string()));
        }
        let Some((section_index, link_index)) = self.locate(from, id) else {
            return Ok(None);
        };
        if from == target {
            return Ok(Some(self.sections[section_index].links[link_index].clone()));
        }
        if let Some(existing) = self.section(target) {
            let url = &self.sections[section_index].links[link_index].url;
            ensure_unique_url(existing, url, None)?;
        }

        let mut link = self.sections[section_index].links.remove(link_index);
        link.modified_at = self.slot.clock().now().max(link.created_at);
        if self.sections[section_index].links.is_empty() {
            self.sections.remove(section_index);
        }
        match self.section_index(target) {
            Some(index) => self.sections[index].links.push(link.clone()),
            None => self.sections.push(Section {
                name: target.to_string(),
                links: vec![link.clone()],
            }),
        }
        self.commit();
        tracing::debug!(from = %from, to = %target, id = %id, "link moved");
        Ok(Some(link))
    }

    /// Renames a section in place. `Ok(false)` when `old` does not exist.
    pub fn rename_section(&mut self, old: &str, new: &str) -> AppResult<bool> {
        let new = new.trim();
        if new.is_empty() {
            return Err(AppError::Validation("section name must not be empty".to_string()));
        }
        let Some(index) = self.section_index(old) else {
            return Ok(false);
        };
        if old == new {
            return Ok(true);
        }
        if self.section_index(new).is_some() {
            return Err(AppError::Validation(format!("section '{}' already exists", new)));
        }
        self.sections[index].name = new.to_string();
        self.commit();
        Ok(true)
    }

    pub fn remove_section(&mut self, name: &str) -> bool {
        let Some(index) = self.section_index(name) else {
            return false;
        };
        self.sections.remove(index);
        self.commit();
        true
    }

    /// Case-insensitive match on link name and URL, newest modified first.
    pub fn search(&self, query: &str) -> Vec<SectionLink> {
        let needle = query.trim().to_lowercase();
        let mut hits: Vec<SectionLink> = self
            .flatten()
            .filter(|entry| {
                needle.is_empty()
                    || entry.link.name.to_lowercase().contains(&needle)
                    || entry.link.url.to_lowercase().contains(&needle)
            })
            .collect();
        hits.sort_by(|a, b| b.link.modified_at.cmp(&a.link.modified_at));
        hits
    }

    pub fn link_count(&self) -> usize {
        self.sections.iter().map(|section| section.links.len()).sum()
    }

    /// Replaces every section, e.g. on import.
    pub fn replace_all(&mut self, sections: Vec<Section>) -> AppResult<()> {
        validate_sections(&sections)?;
        self.sections = sections;
        let now = self.slot.clock().now();
        for link in self.sections.iter_mut().flat_map(|section| section.links.iter_mut()) {
            if link.id.is_empty() {
                link.id = new_id("link", now);
            }
        }
        self.commit();
        Ok(())
    }

    pub fn undo(&mut self) -> bool {
        let Some(snapshot) = self.slot.undo() else {
            return false;
        };
        match serde_json::from_str(&snapshot) {
            Ok(sections) => {
                self.sections = sections;
                true
            }
            Err(error) => {
                tracing::warn!(error = %error, "link book snapshot is corrupt");
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

    fn flatten(&self) -> impl Iterator<Item = SectionLink> + '_ {
        self.sections.iter().flat_map(|section| {
            section.links.iter().map(move |link| SectionLink {
                section: section.name.clone(),
                link: link.clone(),
            })
        })
    }

    fn section_index(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|section| section.name == name)
    }

    fn locate(&self, section: &str, id: &str) -> Option<(usize, usize)> {
        let section_index = self.section_index(section)?;
        let link_index = self.sections[section_index]
            .links
            .iter()
            .position(|link| link.id == id)?;
        Some((section_index, link_index))
    }

    fn commit(&mut self) {
        self.slot.commit(&self.sections);
    }
}

/// Checks an imported section list: names present and unique, links valid,
/// URLs unique per section.
pub fn validate_sections(sections: &[Section]) -> AppResult<()> {
    let mut names = HashSet::new();
    for section in sections {
        if section.name.trim().is_empty() {
            return Err(AppError::Validation("section name must not be empty".to_string()));
        }
        if !names.insert(section.name.as_str()) {
            return Err(AppError::Validation(format!(
                "duplicate section '{}'",
                section.name
            )));
        }
        let mut urls = HashSet::new();
        for link in &section.links {
            validate_name(&link.name)?;
            let url = normalized_url(&link.url)?;
            if !urls.insert(url) {
                return Err(AppError::Validation(format!(
                    "duplicate url '{}' in section '{}'",
                    link.url, section.name
                )));
            }
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> AppResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("link name must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

fn validate_url(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    Url::parse(trimmed)?;
    Ok(trimmed.to_string())
}

fn normalized_url(raw: &str) -> AppResult<String> {
    Ok(Url::parse(raw.trim())?.to_string())
}

fn ensure_unique_url(section: &Section, url: &str, except_id: Option<&str>) -> AppResult<()> {
    let wanted = normalized_url(url)?;
    let clash = section.links.iter().any(|link| {
        Some(link.id.as_str()) != except_id
            && normalized_url(&link.url).map(|existing| existing == wanted).unwrap_or(false)
    });
    if clash {
        return Err(AppError::Validation(format!(
            "url '{}' already exists in section '{}'",
            url, section.name
        )));
    }
    Ok(())
}

/// Drops stored links that no longer validate and fills in missing ids.
fn retain_valid(sections: &mut Vec<Section>, now: DateTime<Utc>) -> usize {
    let mut dropped = 0;
    for section in sections.iter_mut() {
        let before = section.links.len();
        section
            .links
            .retain(|link| validate_name(&link.name).is_ok() && validate_url(&link.url).is_ok());
        dropped += before - section.links.len();
        for link in section.links.iter_mut().filter(|link| link.id.is_empty()) {
            link.id = new_id("link", now);
        }
    }
    sections.retain(|section| !section.name.trim().is_empty());
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persistence::MemoryKv;
    use chrono::TimeZone;

    fn fixture() -> (Arc<MemoryKv>, ManualClock, LinkBook) {
        let kv = Arc::new(MemoryKv::new());
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        let book = LinkBook::open(kv.clone(), Arc::new(clock.clone()));
        (kv, clock, book)
    }

    #[test]
    fn add_link_creates_section_and_rejects_bad_input() {
        let (_kv, _clock, mut book) = fixture();
        let link = book
            .add_link("Work", "Docs", "https://docs.rs")
            .expect("added");
        assert!(link.id.starts_with("link_"));
        assert_eq!(book.sections().len(), 1);

        assert!(matches!(
            book.add_link("Work", "Relative", "/just/a/path"),
            Err(AppError::Validation(_))
        ));
        assert!(book.add_link("Work", " ", "https://example.com").is_err());
        assert!(book.add_link("Work", "Again", "https://docs.rs/").is_err());
        assert!(book.add_link("Play", "Docs", "https://docs.rs").is_ok());
    }

    #[test]
    fn removing_last_link_drops_the_section() {
        let (_kv, _clock, mut book) = fixture();
        let link = book.add_link("Temp", "One", "https://one.example").expect("added");
        assert!(book.remove_link("Temp", &link.id));
        assert!(book.section("Temp").is_none());
        assert!(!book.remove_link("Temp", &link.id));
    }

    #[test]
    fn favorites_and_search_span_sections() {
        let (_kv, clock, mut book) = fixture();
        let rust = book.add_link("Dev", "Rust Book", "https://doc.rust-lang.org/book").expect("added");
        clock.advance(Duration::seconds(1));
        book.add_link("News", "Lobsters", "https://lobste.rs").expect("added");
        clock.advance(Duration::seconds(1));
        book.toggle_favorite("Dev", &rust.id).expect("toggled");

        let favorites = book.favorites();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].section, "Dev");

        let hits = book.search("HTTPS");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].link.id, rust.id);
        assert_eq!(book.search("lobste")[0].section, "News");
    }

    #[test]
    fn move_link_checks_target_uniqueness() {
        let (_kv, _clock, mut book) = fixture();
        let a = book.add_link("A", "Site", "https://site.example").expect("added");
        book.add_link("B", "Same site", "https://site.example").expect("added");

        assert!(book.move_link("A", &a.id, "B").is_err());
        assert!(book.section("A").is_some());

        let moved = book.move_link("A", &a.id, "C").expect("ok").expect("exists");
        assert_eq!(moved.id, a.id);
        assert!(book.section("A").is_none());
        assert_eq!(book.section("C").map(|s| s.links.len()), Some(1));
    }

    #[test]
    fn rename_section_rejects_existing_target() {
        let (_kv, _clock, mut book) = fixture();
        book.add_link("Old", "x", "https://x.example").expect("added");
        book.add_link("Other", "y", "https://y.example").expect("added");

        assert!(book.rename_section("Old", "Other").is_err());
        assert!(book.rename_section("Old", "New").expect("renamed"));
        assert!(book.section("Old").is_none());
        assert!(!book.rename_section("Missing", "Whatever").expect("ok"));
    }

    #[test]
    fn update_link_validates_and_undo_restores() {
        let (kv, _clock, mut book) = fixture();
        let link = book.add_link("S", "Name", "https://a.example").expect("added");
        let patch = LinkPatch {
            url: Some("not a url".to_string()),
            ..LinkPatch::default()
        };
        assert!(book.update_link("S", &link.id, patch).is_err());

        let renamed = book
            .update_link(
                "S",
                &link.id,
                LinkPatch {
                    name: Some("Renamed".to_string()),
                    ..LinkPatch::default()
                },
            )
            .expect("ok")
            .expect("exists");
        assert_eq!(renamed.name, "Renamed");

        assert!(book.undo());
        assert_eq!(book.get_link("S", &link.id).map(|l| l.name.as_str()), Some("Name"));
        let reopened = LinkBook::open(kv, Arc::new(ManualClock::at(Utc::now())));
        assert_eq!(reopened.get_link("S", &link.id).map(|l| l.name.as_str()), Some("Name"));
    }

    #[test]
    fn validate_sections_rejects_duplicates() {
        let now = Utc::now();
        let link = |url: &str| Link {
            id: String::new(),
            name: "n".to_string(),
            url: url.to_string(),
            favorite: false,
            created_at: now,
            modified_at: now,
        };
        let dup_url = vec![Section {
            name: "S".to_string(),
            links: vec![link("https://a.example"), link("https://a.example/")],
        }];
        assert!(validate_sections(&dup_url).is_err());

        let dup_name = vec![
            Section { name: "S".to_string(), links: vec![] },
            Section { name: "S".to_string(), links: vec![] },
        ];
        assert!(validate_sections(&dup_name).is_err());
    }
}
