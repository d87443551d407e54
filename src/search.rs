use crate::store::Entity;
use crate::tags::Tagged;

/// Text an entity exposes to search, in addition to its tags.
pub trait Searchable: Tagged {
    fn search_fields(&self) -> Vec<&str>;

    fn matches(&self, needle_lower: &str) -> bool {
        self.search_fields()
            .into_iter()
            .any(|field| field.to_lowercase().contains(needle_lower))
            || self
                .tags()
                .iter()
                .any(|tag| tag.to_lowercase().contains(needle_lower))
    }
}

/// Sorts by `modifiedAt` descending. The sort is stable, so entities with
/// equal timestamps keep their collection order.
pub fn canonical<T: Entity>(mut items: Vec<T>) -> Vec<T> {
    items.sort_by(|a, b| b.modified_at().cmp(&a.modified_at()));
    items
}

/// Case-insensitive substring search. A blank query returns everything.
pub fn search<T: Entity + Searchable>(items: &[T], query: &str) -> Vec<T> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return canonical(items.to_vec());
    }
    canonical(
        items
            .iter()
            .filter(|item| item.matches(&needle))
            .cloned()
            .collect(),
    )
}
