use crate::errors::{AppError, AppResult};
use crate::links::validate_sections;
use crate::models::{Note, Project, Section, Task};
use crate::settings::Theme;
use crate::store::validate_collection;
use crate::tags::HEX_COLOR_RE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const BUNDLE_VERSION: u32 = 1;

/// Portable export of the workspace. Version 1 bundles always carry
/// bookmarks and the visible settings; the rest is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub data: BundleData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleData {
    pub bookmarks: Vec<Section>,
    pub settings: BundleSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<Note>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<Task>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<Project>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_colors: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSettings {
    pub username: String,
    pub theme: Theme,
    pub primary_color: String,
}

impl ExportBundle {
    /// Parses and validates a bundle. Nothing is applied here.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|error| AppError::Validation(format!("backup is not valid JSON: {}", error)))?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> AppResult<Self> {
        let version = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| AppError::Validation("backup has no version".to_string()))?;
        if version != u64::from(BUNDLE_VERSION) {
            return Err(AppError::Validation(format!(
                "unsupported backup version {}",
                version
            )));
        }
        if !value
            .get("data")
            .and_then(|data| data.get("bookmarks"))
            .map(serde_json::Value::is_array)
            .unwrap_or(false)
        {
            return Err(AppError::Validation(
                "backup data.bookmarks must be a list of sections".to_string(),
            ));
        }
        let bundle: ExportBundle = serde_json::from_value(value)
            .map_err(|error| AppError::Validation(format!("malformed backup: {}", error)))?;
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn validate(&self) -> AppResult<()> {
        validate_sections(&self.data.bookmarks)?;
        if !HEX_COLOR_RE.is_match(&self.data.settings.primary_color) {
            return Err(AppError::Validation(format!(
                "primary color '{}' is not a #rrggbb value",
                self.data.settings.primary_color
            )));
        }
        if let Some(notes) = self.data.notes.as_deref() {
            validate_collection(notes)?;
        }
        if let Some(tasks) = self.data.tasks.as_deref() {
            validate_collection(tasks)?;
        }
        if let Some(projects) = self.data.projects.as_deref() {
            validate_collection(projects)?;
        }
        if let Some(colors) = self.data.tag_colors.as_ref() {
            if let Some((tag, color)) = colors.iter().find(|(_, color)| !HEX_COLOR_RE.is_match(color)) {
                return Err(AppError::Validation(format!(
                    "tag '{}' has invalid color '{}'",
                    tag, color
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
