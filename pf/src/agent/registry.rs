//! Agent registry - maps every `AgentKind` to an adapter

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{AgentAdapter, AgentError, BuiltinAdapter, HttpAdapter};
use crate::config::{AdapterKind, AgentsConfig};
use crate::domain::AgentKind;

/// Request timeout for HTTP adapters without an explicit agent timeout
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Adapter lookup with per-kind overrides
#[derive(Clone)]
pub struct AgentRegistry {
    default: Arc<dyn AgentAdapter>,
    adapters: HashMap<AgentKind, Arc<dyn AgentAdapter>>,
    timeouts: HashMap<AgentKind, Duration>,
}

impl AgentRegistry {
    /// Registry that sends every kind to `default`
    pub fn new(default: Arc<dyn AgentAdapter>) -> Self {
        Self {
            default,
            adapters: HashMap::new(),
            timeouts: HashMap::new(),
        }
    }

    /// Every kind served by the builtin adapter
    pub fn builtin() -> Self {
        Self::new(Arc::new(BuiltinAdapter::new()))
    }

    /// Build from the `agents` config section
    pub fn from_config(config: &AgentsConfig) -> Result<Self, AgentError> {
        debug!(default = ?config.default, overrides = config.overrides.len(), "AgentRegistry::from_config: called");
        let default = build_adapter(config.default, config.endpoint.as_deref(), None)?;
        let mut registry = Self::new(default);

        for (kind, over) in &config.overrides {
            if let Some(adapter) = over.adapter {
                let endpoint = over.endpoint.as_deref().or(config.endpoint.as_deref());
                registry = registry.with_adapter(*kind, build_adapter(adapter, endpoint, over.timeout())?);
            } else if over.endpoint.is_some() && config.default == AdapterKind::Http {
                registry = registry.with_adapter(
                    *kind,
                    build_adapter(AdapterKind::Http, over.endpoint.as_deref(), over.timeout())?,
                );
            }
            if let Some(timeout) = over.timeout() {
                registry = registry.with_timeout(*kind, timeout);
            }
        }
        Ok(registry)
    }

    pub fn with_adapter(mut self, kind: AgentKind, adapter: Arc<dyn AgentAdapter>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }

    pub fn with_timeout(mut self, kind: AgentKind, timeout: Duration) -> Self {
        self.timeouts.insert(kind, timeout);
        self
    }

    pub fn adapter(&self, kind: AgentKind) -> Arc<dyn AgentAdapter> {
        self.adapters
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }

    /// Per-kind timeout, or `fallback` when none is configured
    pub fn timeout_for(&self, kind: AgentKind, fallback: Duration) -> Duration {
        self.timeouts.get(&kind).copied().unwrap_or(fallback)
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn build_adapter(
    kind: AdapterKind,
    endpoint: Option<&str>,
    timeout: Option<Duration>,
) -> Result<Arc<dyn AgentAdapter>, AgentError> {
    match kind {
        AdapterKind::Builtin => Ok(Arc::new(BuiltinAdapter::new())),
        AdapterKind::Http => {
            let endpoint =
                endpoint.ok_or_else(|| AgentError::Config("http adapter requires an endpoint".to_string()))?;
            Ok(Arc::new(HttpAdapter::new(
                endpoint,
                timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT),
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentOverride;

    #[test]
    fn test_builtin_default() {
        let registry = AgentRegistry::default();
        assert_eq!(registry.adapter(AgentKind::CodeGenerator).name(), "builtin");
        assert_eq!(
            registry.timeout_for(AgentKind::CodeGenerator, Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_from_config_with_overrides() {
        let mut config = AgentsConfig::default();
        config.overrides.insert(
            AgentKind::JiraIntegrator,
            AgentOverride {
                adapter: Some(AdapterKind::Http),
                endpoint: Some("http://jira-agent.local/invoke".to_string()),
                timeout_ms: Some(1500),
            },
        );
        let registry = AgentRegistry::from_config(&config).unwrap();
        assert_eq!(registry.adapter(AgentKind::JiraIntegrator).name(), "http");
        assert_eq!(registry.adapter(AgentKind::ProductManager).name(), "builtin");
        assert_eq!(
            registry.timeout_for(AgentKind::JiraIntegrator, Duration::from_secs(300)),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_http_default_requires_endpoint() {
        let config = AgentsConfig {
            default: AdapterKind::Http,
            ..Default::default()
        };
        assert!(matches!(AgentRegistry::from_config(&config), Err(AgentError::Config(_))));
    }
}
