use crate::error::{CoreError, Result};
use crate::types::*;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

/// What the script generator hands back for one recording.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedScript {
    #[serde(alias = "script_timeline")]
    pub script_timeline: Vec<ScriptSegment>,
    #[serde(default, alias = "cleanup_segments")]
    pub cleanup_segments: Vec<CleanupRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(alias = "project_id")]
    pub project_id: String,
    #[serde(alias = "generated_at")]
    pub generated_at: String,
}

/// The persisted envelope: script plus the garbage ranges it was cut against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDocument {
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub script: Vec<ScriptSegment>,
    #[serde(default, alias = "cleanup_segments")]
    pub cleanup_segments: Vec<CleanupRange>,
}

impl ScriptDocument {
    pub fn new(project_id: impl Into<String>, generated_at: DateTime<Local>) -> Self {
        Self {
            metadata: DocumentMetadata {
                project_id: project_id.into(),
                generated_at: generated_at.format("%Y%m%d_%H%M%S").to_string(),
            },
            script: vec![],
            cleanup_segments: vec![],
        }
    }

    /// Save as pretty-printed JSON.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON. Segments without an id get one.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref()).map_err(CoreError::Io)?;
        let mut doc: ScriptDocument = serde_json::from_str(&data)?;
        doc.script = assign_missing_ids(&doc.script);
        Ok(doc)
    }

    pub fn segment(&self, id: &str) -> Result<&ScriptSegment> {
        self.script
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| CoreError::SegmentNotFound(id.to_string()))
    }

    pub fn cleanup_ranges(&self) -> Vec<TimeRange> {
        self.cleanup_segments.iter().map(|c| c.range()).collect()
    }
}

/// Give every segment with an empty or duplicated id a fresh UUID.
pub fn assign_missing_ids(segments: &[ScriptSegment]) -> Vec<ScriptSegment> {
    let mut seen = HashSet::new();
    segments
        .iter()
        .map(|segment| {
            let mut segment = segment.clone();
            if segment.id.trim().is_empty() || !seen.insert(segment.id.clone()) {
                segment.id = Uuid::new_v4().to_string();
                seen.insert(segment.id.clone());
            }
            segment
        })
        .collect()
}

/// `{source stem without "raw_"}_{YYYYmmdd_HHMMSS}_{4 hex chars}`.
pub fn new_project_id(source: impl AsRef<Path>, now: DateTime<Local>) -> String {
    let stem = source
        .as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().replace("raw_", ""))
        .unwrap_or_else(|| "project".to_string());
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(4).collect();
    format!("{stem}_{}_{suffix}", now.format("%Y%m%d_%H%M%S"))
}
