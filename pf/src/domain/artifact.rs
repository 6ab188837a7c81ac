//! Consolidated stage artifacts and review annotations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::plan::ArtifactType;

/// Kind of annotation attached to an artifact for human review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// Two agents disagree on a shared decision axis
    ConflictDetected,
    /// A non-fatal warning reported by an agent
    AgentWarning,
    /// An optional step failed and its output is missing
    OptionalStepFailed,
}

/// Note surfaced to the reviewer alongside an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewAnnotation {
    pub kind: AnnotationKind,

    /// Decision axis for conflicts (e.g. `primary_datastore`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis: Option<String>,

    pub message: String,

    /// Value each agent chose on the axis, keyed by step id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, Value>,
}

/// Merged output of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_type: ArtifactType,

    /// output_key -> agent output
    pub content: Map<String, Value>,

    /// Step ids whose output was merged in
    pub sources: Vec<String>,

    #[serde(default)]
    pub annotations: Vec<ReviewAnnotation>,

    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn has_conflicts(&self) -> bool {
        self.annotations
            .iter()
            .any(|a| a.kind == AnnotationKind::ConflictDetected)
    }

    /// Compact preview sent with `approval_required` events
    pub fn preview(&self) -> Value {
        serde_json::json!({
            "artifact_type": self.artifact_type,
            "sections": self.content.keys().collect::<Vec<_>>(),
            "sources": self.sources,
            "annotations": self.annotations,
            "content": self.content,
        })
    }
}
