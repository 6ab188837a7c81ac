//! Agent roster
//!
//! The set of agents the engine can dispatch to is closed: every agent is an
//! `AgentKind` variant with a fixed `Role`. New agents are added here and
//! registered with the `AgentRegistry`, never dispatched by name ad hoc.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::plan::Stage;

/// Every agent the orchestration engine knows how to invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    ProductManager,
    RequirementsAnalyst,
    FrontendArchitect,
    BackendArchitect,
    DatabaseArchitect,
    InfrastructureArchitect,
    SecurityArchitect,
    StackResolver,
    CodeGenerator,
    TestEngineer,
    DevopsEngineer,
    RepositoryManager,
    CiPipeline,
    JiraIntegrator,
}

/// Coarse responsibility of an agent, used by the plan precedence table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    ProductDesign,
    Requirements,
    Architecture,
    StackResolution,
    Generation,
    Testing,
    Devops,
    Repository,
    Ci,
    Tracking,
}

impl AgentKind {
    /// All agent kinds in roster order
    pub const ALL: [AgentKind; 14] = [
        AgentKind::ProductManager,
        AgentKind::RequirementsAnalyst,
        AgentKind::FrontendArchitect,
        AgentKind::BackendArchitect,
        AgentKind::DatabaseArchitect,
        AgentKind::InfrastructureArchitect,
        AgentKind::SecurityArchitect,
        AgentKind::StackResolver,
        AgentKind::CodeGenerator,
        AgentKind::TestEngineer,
        AgentKind::DevopsEngineer,
        AgentKind::RepositoryManager,
        AgentKind::CiPipeline,
        AgentKind::JiraIntegrator,
    ];

    /// Stable identifier used in events, results and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductManager => "product_manager",
            Self::RequirementsAnalyst => "requirements_analyst",
            Self::FrontendArchitect => "frontend_architect",
            Self::BackendArchitect => "backend_architect",
            Self::DatabaseArchitect => "database_architect",
            Self::InfrastructureArchitect => "infrastructure_architect",
            Self::SecurityArchitect => "security_architect",
            Self::StackResolver => "stack_resolver",
            Self::CodeGenerator => "code_generator",
            Self::TestEngineer => "test_engineer",
            Self::DevopsEngineer => "devops_engineer",
            Self::RepositoryManager => "repository_manager",
            Self::CiPipeline => "ci_pipeline",
            Self::JiraIntegrator => "jira_integrator",
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::ProductManager => Role::ProductDesign,
            Self::RequirementsAnalyst => Role::Requirements,
            Self::FrontendArchitect
            | Self::BackendArchitect
            | Self::DatabaseArchitect
            | Self::InfrastructureArchitect
            | Self::SecurityArchitect => Role::Architecture,
            Self::StackResolver => Role::StackResolution,
            Self::CodeGenerator => Role::Generation,
            Self::TestEngineer => Role::Testing,
            Self::DevopsEngineer => Role::Devops,
            Self::RepositoryManager => Role::Repository,
            Self::CiPipeline => Role::Ci,
            Self::JiraIntegrator => Role::Tracking,
        }
    }

    /// Stage a step run by this agent belongs to
    pub fn stage(&self) -> Stage {
        self.role().stage()
    }
}

impl Role {
    pub fn stage(&self) -> Stage {
        match self {
            Role::ProductDesign => Stage::ProductDesign,
            Role::Requirements | Role::Architecture | Role::StackResolution => Stage::Architecture,
            Role::Generation | Role::Testing | Role::Devops | Role::Repository | Role::Ci | Role::Tracking => {
                Stage::Execution
            }
        }
    }

    /// Roles a step with this role must wait for (fixed precedence table)
    ///
    /// Only steps actually present in a plan become edges; the builder filters.
    pub fn precedes(&self) -> &'static [Role] {
        match self {
            Role::ProductDesign | Role::StackResolution => &[],
            Role::Requirements | Role::Architecture => &[Role::ProductDesign],
            Role::Generation => &[Role::Requirements, Role::Architecture, Role::StackResolution],
            Role::Testing => &[Role::Generation],
            Role::Devops => &[Role::Testing],
            Role::Repository => &[Role::Generation],
            Role::Ci => &[Role::Repository, Role::Devops],
            Role::Tracking => &[Role::Requirements],
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown agent '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_kind_round_trips_through_str() {
        for kind in AgentKind::ALL {
            assert_eq!(kind.as_str().parse::<AgentKind>().unwrap(), kind);
        }
        assert!("poet".parse::<AgentKind>().is_err());
    }

    #[test]
    fn test_serde_matches_as_str() {
        let json = serde_json::to_string(&AgentKind::InfrastructureArchitect).unwrap();
        assert_eq!(json, "\"infrastructure_architect\"");
    }

    #[test]
    fn test_architects_share_role_and_stage() {
        let architects = [
            AgentKind::FrontendArchitect,
            AgentKind::BackendArchitect,
            AgentKind::DatabaseArchitect,
            AgentKind::InfrastructureArchitect,
            AgentKind::SecurityArchitect,
        ];
        for kind in architects {
            assert_eq!(kind.role(), Role::Architecture);
            assert_eq!(kind.stage(), Stage::Architecture);
        }
    }

    #[test]
    fn test_precedence_never_points_to_a_later_stage() {
        for kind in AgentKind::ALL {
            let role = kind.role();
            for dep in role.precedes() {
                assert!(dep.stage() <= role.stage(), "{:?} depends on later {:?}", role, dep);
            }
        }
    }
}
