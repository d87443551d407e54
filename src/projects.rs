use crate::errors::{AppError, AppResult};
use crate::models::{Project, ProjectPatch};
use crate::store::{Entity, EntityStore};
use crate::tags::HEX_COLOR_RE;
use chrono::{DateTime, Utc};

pub type ProjectStore = EntityStore<Project>;

impl Entity for Project {
    type Patch = ProjectPatch;

    const KIND: &'static str = "project";
    const ID_PREFIX: &'static str = "proj";

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
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("project name must not be empty".to_string()));
        }
        match self.color.as_deref() {
            Some(color) if !HEX_COLOR_RE.is_match(color) => Err(AppError::Validation(format!(
                "project color '{}' is not a #rrggbb value",
                color
            ))),
            _ => Ok(()),
        }
    }

    fn apply_patch(&mut self, patch: ProjectPatch, _now: DateTime<Utc>) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(color) = patch.color {
            self.color = color;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
    }
}

impl EntityStore<Project> {
    /// Case-insensitive lookup by display name.
    pub fn find_by_name(&self, name: &str) -> Option<&Project> {
        let wanted = name.trim().to_lowercase();
        self.items()
            .iter()
            .find(|project| project.name.trim().to_lowercase() == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::persistence::{MemoryKv, PROJECTS_KEY};
    use std::sync::Arc;

    fn store() -> ProjectStore {
        ProjectStore::open(Arc::new(MemoryKv::new()), PROJECTS_KEY, Arc::new(SystemClock))
    }

    #[test]
    fn projects_get_prefixed_ids_and_validate_color() {
        let mut store = store();
        let added = store.add(Project::new("Garden")).expect("added");
        assert!(added.id.starts_with("proj_"));

        let error = store
            .update(
                &added.id,
                ProjectPatch {
                    color: Some(Some("green".to_string())),
                    ..ProjectPatch::default()
                },
            )
            .expect_err("bad color");
        assert!(matches!(error, AppError::Validation(_)));

        let cleared = store
            .update(
                &added.id,
                ProjectPatch {
                    color: Some(Some("#22c55e".to_string())),
                    ..ProjectPatch::default()
                },
            )
            .expect("ok")
            .expect("exists");
        assert_eq!(cleared.color.as_deref(), Some("#22c55e"));
    }

    #[test]
    fn blank_name_is_rejected_and_lookup_ignores_case() {
        let mut store = store();
        assert!(store.add(Project::new("  ")).is_err());
        store.add(Project::new("Home Renovation")).expect("added");
        assert!(store.find_by_name("home renovation").is_some());
        assert!(store.find_by_name("office").is_none());
    }
}
