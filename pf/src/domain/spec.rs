//! ProjectSpec domain type
//!
//! The normalized, immutable description of what to scaffold. Produced by the
//! intake normalizer and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the project description was supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Free-text overview; design phases run with human approval gates
    Discovery,
    /// Exact stack supplied up front; design phases run without gates
    Direct,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Discovery => "discovery",
            Mode::Direct => "direct",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "discovery" => Ok(Mode::Discovery),
            "direct" => Ok(Mode::Direct),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

/// Declared kind of project, the first half of the template bundle key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    WebApp,
    Api,
    Cli,
    Mobile,
    Library,
    Desktop,
}

impl ProjectType {
    pub const ALL: [ProjectType; 6] = [
        ProjectType::WebApp,
        ProjectType::Api,
        ProjectType::Cli,
        ProjectType::Mobile,
        ProjectType::Library,
        ProjectType::Desktop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::WebApp => "web_app",
            ProjectType::Api => "api",
            ProjectType::Cli => "cli",
            ProjectType::Mobile => "mobile",
            ProjectType::Library => "library",
            ProjectType::Desktop => "desktop",
        }
    }

    /// Whether the project has a user-facing frontend to architect
    pub fn has_frontend(&self) -> bool {
        matches!(self, ProjectType::WebApp | ProjectType::Mobile | ProjectType::Desktop)
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectType {
    type Err = String;

    /// Accepts `web_app`, `web-app`, `Web App` and friends
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        ProjectType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("unknown project type '{}'", s.trim()))
    }
}

/// Optional integrations the user asked for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integrations {
    #[serde(default)]
    pub include_repo: bool,
    #[serde(default)]
    pub include_ci: bool,
    #[serde(default)]
    pub include_jira: bool,
}

/// Structured hints accompanying a discovery overview
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_users: Option<String>,
    #[serde(default)]
    pub key_features: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Mode-specific part of a spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SpecPayload {
    Discovery {
        overview: String,
        #[serde(default)]
        hints: DiscoveryHints,
    },
    Direct {
        language_stack: String,
        #[serde(default)]
        frameworks: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        database: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overview: Option<String>,
    },
}

/// Normalized project specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub project_name: String,
    pub project_type: ProjectType,
    #[serde(flatten)]
    pub payload: SpecPayload,
    #[serde(default)]
    pub integrations: Integrations,
}

impl ProjectSpec {
    pub fn mode(&self) -> Mode {
        match self.payload {
            SpecPayload::Discovery { .. } => Mode::Discovery,
            SpecPayload::Direct { .. } => Mode::Direct,
        }
    }

    /// Overview text if one was supplied
    pub fn overview(&self) -> Option<&str> {
        match &self.payload {
            SpecPayload::Discovery { overview, .. } => Some(overview.as_str()),
            SpecPayload::Direct { overview, .. } => overview.as_deref(),
        }
    }

    /// Exact language stack for direct-mode specs
    pub fn language_stack(&self) -> Option<&str> {
        match &self.payload {
            SpecPayload::Direct { language_stack, .. } => Some(language_stack.as_str()),
            SpecPayload::Discovery { .. } => None,
        }
    }

    /// Explicitly requested database for direct-mode specs
    pub fn database(&self) -> Option<&str> {
        match &self.payload {
            SpecPayload::Direct { database, .. } => database.as_deref(),
            SpecPayload::Discovery { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_spec() -> ProjectSpec {
        ProjectSpec {
            project_name: "orders".to_string(),
            project_type: ProjectType::Api,
            payload: SpecPayload::Direct {
                language_stack: "python".to_string(),
                frameworks: vec!["fastapi".to_string()],
                database: None,
                overview: None,
            },
            integrations: Integrations::default(),
        }
    }

    #[test]
    fn test_project_type_parsing_variants() {
        assert_eq!("web_app".parse::<ProjectType>().unwrap(), ProjectType::WebApp);
        assert_eq!("Web-App".parse::<ProjectType>().unwrap(), ProjectType::WebApp);
        assert_eq!(" web app ".parse::<ProjectType>().unwrap(), ProjectType::WebApp);
        assert!("spaceship".parse::<ProjectType>().is_err());
    }

    #[test]
    fn test_mode_derived_from_payload() {
        let spec = direct_spec();
        assert_eq!(spec.mode(), Mode::Direct);
        assert_eq!(spec.language_stack(), Some("python"));
        assert_eq!(spec.overview(), None);
    }

    #[test]
    fn test_spec_serializes_mode_tag_inline() {
        let json = serde_json::to_value(direct_spec()).unwrap();
        assert_eq!(json["mode"], "direct");
        assert_eq!(json["language_stack"], "python");
        assert_eq!(json["project_type"], "api");

        let back: ProjectSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, direct_spec());
    }
}
