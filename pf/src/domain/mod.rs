//! Domain types for ProjectForge
//!
//! Core domain types: ProjectSpec, ProjectRecord, ExecutionPlan, AgentResult,
//! ApprovalState. All are plain serde structs; persistence lives in `state`.

mod agent;
mod approval;
mod artifact;
mod id;
mod plan;
mod record;
mod result;
mod spec;

pub use agent::{AgentKind, Role};
pub use approval::{ApprovalState, Decision};
pub use artifact::{AnnotationKind, Artifact, ReviewAnnotation};
pub use id::{HEX_PREFIX_LEN, ReferenceMatch, generate_id, match_reference, slugify};
pub use plan::{ArtifactType, Condition, ExecutionPlan, PlanStep, Stage};
pub use record::{ProjectRecord, ProjectStatus};
pub use result::{AgentResult, StepStatus};
pub use spec::{DiscoveryHints, Integrations, Mode, ProjectSpec, ProjectType, SpecPayload};
