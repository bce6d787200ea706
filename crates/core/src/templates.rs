//! Message template binding.

use std::collections::HashMap;

use crate::error::{OutreachError, OutreachResult};
use crate::types::TemplateBinding;

/// Turns a step's message key into the text sent to one prospect.
pub trait MessageRenderer: Send + Sync {
    fn render(&self, message_key: &str, binding: &TemplateBinding) -> OutreachResult<String>;
}

/// Template renderer using `{variable}` syntax over the fixed
/// `TemplateBinding` variable set.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    templates: HashMap<String, String>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn from_map(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    pub fn register_template(&mut self, key: impl Into<String>, body: impl Into<String>) {
        self.templates.insert(key.into(), body.into());
    }

    pub fn get_template(&self, key: &str) -> Option<&str> {
        self.templates.get(key).map(String::as_str)
    }

    fn substitute(&self, key: &str, body: &str, binding: &TemplateBinding) -> OutreachResult<String> {
        let mut out = String::with_capacity(body.len());
        let mut rest = body;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                OutreachError::Template(format!("template {key}: unclosed placeholder"))
            })?;
            let variable = after[..close].trim();
            let value = binding.lookup(variable).ok_or_else(|| {
                OutreachError::Template(format!("template {key}: variable {{{variable}}} is not bound"))
            })?;
            out.push_str(value);
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl MessageRenderer for TemplateRenderer {
    fn render(&self, message_key: &str, binding: &TemplateBinding) -> OutreachResult<String> {
        let body = self
            .templates
            .get(message_key)
            .ok_or_else(|| OutreachError::Template(format!("unknown message key {message_key}")))?;
        let text = self.substitute(message_key, body, binding)?;
        if text.trim().is_empty() {
            return Err(OutreachError::Template(format!(
                "template {message_key} rendered empty"
            )));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> TemplateBinding {
        TemplateBinding {
            first_name: "Grace".into(),
            company_name: Some("Navy".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_render_substitutes_declared_variables() {
        let mut renderer = TemplateRenderer::new();
        renderer.register_template("cr", "Hi {first_name}, saw your work at { company_name }.");
        let text = renderer.render("cr", &binding()).unwrap();
        assert_eq!(text, "Hi Grace, saw your work at Navy.");
    }

    #[test]
    fn test_unknown_key_and_unbound_variable_fail() {
        let mut renderer = TemplateRenderer::new();
        renderer.register_template("fu1", "Hi {first_name}, still at {title}?");
        renderer.register_template("gb", "Bye {nickname}");
        assert!(renderer.render("missing", &binding()).is_err());
        assert!(renderer.render("fu1", &binding()).is_err());
        assert!(renderer.render("gb", &binding()).is_err());
    }

    #[test]
    fn test_blank_render_is_rejected() {
        let renderer = TemplateRenderer::from_map(HashMap::from([("empty".to_string(), "   ".to_string())]));
        assert!(renderer.render("empty", &binding()).is_err());
    }
}
