//! Step input templates
//!
//! Inputs are handlebars templates rendered at dispatch time against
//! `{spec, artifacts, outputs, feedback}`.

use handlebars::{Handlebars, Template, handlebars_helper, no_escape};
use serde::Serialize;
use tracing::debug;

handlebars_helper!(json: |value: Json| serde_json::to_string_pretty(value).unwrap_or_default());

/// Renders step inputs
pub struct StepRenderer {
    hbs: Handlebars<'static>,
}

impl StepRenderer {
    pub fn new() -> Self {
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(no_escape);
        hbs.register_helper("json", Box::new(json));
        Self { hbs }
    }

    /// Check template syntax without rendering
    pub fn check(template: &str) -> Result<(), String> {
        Template::compile(template).map(|_| ()).map_err(|e| e.to_string())
    }

    pub fn render<T: Serialize>(&self, template: &str, context: &T) -> Result<String, String> {
        debug!(template_len = template.len(), "StepRenderer::render: called");
        self.hbs.render_template(template, context).map_err(|e| e.to_string())
    }
}

impl Default for StepRenderer {
    fn default() -> Self {
        Self::new()
    }
}
