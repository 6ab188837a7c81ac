//! Discovery and direct request normalization

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

use super::errors::{FieldErrorCode, ValidationErrors};
use crate::domain::{DiscoveryHints, Integrations, Mode, ProjectSpec, ProjectType, SpecPayload};

pub const MIN_NAME_LEN: usize = 2;
pub const MAX_NAME_LEN: usize = 64;
pub const MIN_OVERVIEW_LEN: usize = 10;
pub const MAX_OVERVIEW_LEN: usize = 20_000;

/// Language stacks direct-mode requests may name
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "python",
    "rust",
    "typescript",
    "javascript",
    "go",
    "java",
    "kotlin",
    "csharp",
    "ruby",
    "swift",
];

static PROJECT_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 _.\-]*$").expect("valid project name pattern"));

/// Raw intake request as submitted over REST or read from a CLI file
///
/// Every field is optional at this layer so that missing values become
/// `required` errors instead of deserialization failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeRequest {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub hints: Option<DiscoveryHints>,
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default)]
    pub language_stack: Option<String>,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub include_repo: bool,
    #[serde(default)]
    pub include_ci: bool,
    #[serde(default)]
    pub include_jira: bool,
}

impl IntakeRequest {
    /// Minimal discovery request
    pub fn discovery(project_name: impl Into<String>, overview: impl Into<String>) -> Self {
        Self {
            project_name: Some(project_name.into()),
            mode: Some(Mode::Discovery.as_str().to_string()),
            overview: Some(overview.into()),
            ..Default::default()
        }
    }

    /// Minimal direct request
    pub fn direct(
        project_name: impl Into<String>,
        project_type: impl Into<String>,
        language_stack: impl Into<String>,
    ) -> Self {
        Self {
            project_name: Some(project_name.into()),
            mode: Some(Mode::Direct.as_str().to_string()),
            project_type: Some(project_type.into()),
            language_stack: Some(language_stack.into()),
            ..Default::default()
        }
    }

    fn integrations(&self) -> Integrations {
        Integrations {
            include_repo: self.include_repo,
            include_ci: self.include_ci,
            include_jira: self.include_jira,
        }
    }
}

/// Validate and normalize a request into a `ProjectSpec`
pub fn normalize(request: &IntakeRequest) -> Result<ProjectSpec, ValidationErrors> {
    debug!(mode = ?request.mode, project_name = ?request.project_name, "normalize: called");
    let mut errors = ValidationErrors::default();

    let project_name = normalize_name(request.project_name.as_deref(), &mut errors);

    let mode = match non_blank(request.mode.as_deref()) {
        None => {
            errors.push("mode", FieldErrorCode::Required, "mode is required (discovery or direct)");
            None
        }
        Some(raw) => match raw.parse::<Mode>() {
            Ok(mode) => Some(mode),
            Err(_) => {
                errors.push(
                    "mode",
                    FieldErrorCode::Unsupported,
                    format!("mode '{}' is not supported (discovery or direct)", raw),
                );
                None
            }
        },
    };

    let project_type = match (non_blank(request.project_type.as_deref()), mode) {
        (Some(raw), _) => match raw.parse::<ProjectType>() {
            Ok(t) => Some(t),
            Err(_) => {
                errors.push(
                    "project_type",
                    FieldErrorCode::Unsupported,
                    format!("project_type '{}' is not supported", raw),
                );
                None
            }
        },
        (None, Some(Mode::Direct)) => {
            errors.push("project_type", FieldErrorCode::Required, "project_type is required in direct mode");
            None
        }
        (None, _) => Some(ProjectType::WebApp),
    };

    let payload = match mode {
        Some(Mode::Discovery) => normalize_discovery(request, &mut errors),
        Some(Mode::Direct) => normalize_direct(request, &mut errors),
        None => None,
    };

    if !errors.is_empty() {
        debug!(error_count = errors.details.len(), "normalize: rejected");
        return Err(errors);
    }

    match (project_name, project_type, payload) {
        (Some(project_name), Some(project_type), Some(payload)) => Ok(ProjectSpec {
            project_name,
            project_type,
            payload,
            integrations: request.integrations(),
        }),
        // Unreachable when no errors were recorded; report rather than panic.
        _ => {
            errors.push("request", FieldErrorCode::InvalidFormat, "request could not be normalized");
            Err(errors)
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn normalize_name(raw: Option<&str>, errors: &mut ValidationErrors) -> Option<String> {
    let Some(name) = non_blank(raw) else {
        errors.push("project_name", FieldErrorCode::Required, "project_name is required");
        return None;
    };
    let len = name.chars().count();
    if len < MIN_NAME_LEN {
        errors.push(
            "project_name",
            FieldErrorCode::TooShort,
            format!("project_name must be at least {} characters", MIN_NAME_LEN),
        );
        return None;
    }
    if len > MAX_NAME_LEN {
        errors.push(
            "project_name",
            FieldErrorCode::TooLong,
            format!("project_name must be at most {} characters", MAX_NAME_LEN),
        );
        return None;
    }
    if !PROJECT_NAME_PATTERN.is_match(name) {
        errors.push(
            "project_name",
            FieldErrorCode::InvalidFormat,
            "project_name must start with a letter or digit and contain only letters, digits, spaces, '_', '.' or '-'",
        );
        return None;
    }
    Some(name.to_string())
}

fn check_overview(field: &str, overview: &str, errors: &mut ValidationErrors) -> bool {
    let len = overview.chars().count();
    if len < MIN_OVERVIEW_LEN {
        errors.push(
            field,
            FieldErrorCode::TooShort,
            format!("{} must be at least {} characters", field, MIN_OVERVIEW_LEN),
        );
        false
    } else if len > MAX_OVERVIEW_LEN {
        errors.push(
            field,
            FieldErrorCode::TooLong,
            format!("{} must be at most {} characters", field, MAX_OVERVIEW_LEN),
        );
        false
    } else {
        true
    }
}

/// Trim, drop empties and de-duplicate while keeping first-seen order
fn clean_list(items: &[String], lowercase: bool) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .map(|s| {
            let s = s.trim();
            if lowercase { s.to_lowercase() } else { s.to_string() }
        })
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_lowercase()))
        .collect()
}

fn normalize_discovery(request: &IntakeRequest, errors: &mut ValidationErrors) -> Option<SpecPayload> {
    let Some(overview) = non_blank(request.overview.as_deref()) else {
        errors.push("overview", FieldErrorCode::Required, "overview is required in discovery mode");
        return None;
    };
    if !check_overview("overview", overview, errors) {
        return None;
    }

    let hints = request
        .hints
        .as_ref()
        .map(|h| DiscoveryHints {
            target_users: non_blank(h.target_users.as_deref()).map(str::to_string),
            key_features: clean_list(&h.key_features, false),
            constraints: clean_list(&h.constraints, false),
        })
        .unwrap_or_default();

    Some(SpecPayload::Discovery {
        overview: overview.to_string(),
        hints,
    })
}

fn normalize_direct(request: &IntakeRequest, errors: &mut ValidationErrors) -> Option<SpecPayload> {
    let language_stack = match non_blank(request.language_stack.as_deref()) {
        None => {
            errors.push(
                "language_stack",
                FieldErrorCode::Required,
                "language_stack is required in direct mode",
            );
            None
        }
        Some(raw) => {
            let lang = raw.to_lowercase();
            if SUPPORTED_LANGUAGES.contains(&lang.as_str()) {
                Some(lang)
            } else {
                errors.push(
                    "language_stack",
                    FieldErrorCode::Unsupported,
                    format!(
                        "language_stack '{}' is not supported (one of: {})",
                        raw,
                        SUPPORTED_LANGUAGES.join(", ")
                    ),
                );
                None
            }
        }
    };

    let overview = match non_blank(request.overview.as_deref()) {
        Some(text) if check_overview("overview", text, errors) => Some(text.to_string()),
        _ => None,
    };

    Some(SpecPayload::Direct {
        language_stack: language_stack?,
        frameworks: clean_list(&request.frameworks, true),
        database: non_blank(request.database.as_deref()).map(str::to_lowercase),
        overview,
    })
}
