//! Manifest template rendering.
//!
//! Templates use flat `{{ name }}` placeholders with no control flow. In
//! strict mode an unknown placeholder fails the render; in lenient mode it is
//! left in the output unchanged.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Result, StepwiseError, TemplateError};
use crate::registry::{DeploymentKey, DeploymentManifest};

/// Template variables.
pub type Variables = BTreeMap<String, String>;

/// How unresolved placeholders are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RenderMode {
    /// Fail on the first unresolved placeholder.
    #[default]
    Strict,
    /// Leave unresolved placeholders as literal text.
    Lenient,
}

/// Renders manifest templates.
#[derive(Debug, Default)]
pub struct TemplateRenderer {
    /// Unresolved placeholder handling.
    mode: RenderMode,
}

impl TemplateRenderer {
    /// Creates a renderer.
    #[must_use]
    pub const fn new(mode: RenderMode) -> Self {
        Self { mode }
    }

    /// Substitutes every `{{ name }}` placeholder in `template`.
    ///
    /// # Errors
    ///
    /// Returns an error in strict mode if a placeholder has no variable.
    pub fn render(&self, template: &str, variables: &Variables) -> Result<String> {
        let mut output = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            output.push_str(&rest[..start]);
            let after_open = &rest[start + 2..];

            let Some(end) = after_open.find("}}") else {
                // Unterminated braces are plain text.
                output.push_str(&rest[start..]);
                return Ok(output);
            };

            let name = after_open[..end].trim();
            match variables.get(name) {
                Some(value) => output.push_str(value),
                None if self.mode == RenderMode::Lenient => {
                    warn!("Leaving unresolved template variable '{name}' in place");
                    output.push_str(&rest[start..start + 2 + end + 2]);
                }
                None => {
                    return Err(StepwiseError::Template(TemplateError::UnresolvedVariable {
                        name: name.to_string(),
                    }));
                }
            }

            rest = &after_open[end + 2..];
        }

        output.push_str(rest);
        Ok(output)
    }

    /// Renders a template and parses the result as a YAML mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails or the result is not a mapping.
    pub fn render_document(&self, template: &str, variables: &Variables) -> Result<serde_json::Value> {
        let rendered = self.render(template, variables)?;

        let document: serde_json::Value = serde_yaml::from_str(&rendered).map_err(|e| {
            StepwiseError::Template(TemplateError::InvalidManifest {
                message: format!("Rendered template is not valid YAML: {e}"),
            })
        })?;

        if !document.is_object() {
            return Err(StepwiseError::Template(TemplateError::InvalidManifest {
                message: String::from("Rendered template must be a YAML mapping"),
            }));
        }

        Ok(document)
    }

    /// Reads a template file and renders it into a deployment manifest.
    ///
    /// `application`, `version` and `release` are always available to the
    /// template and override parameters of the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the render fails.
    pub fn render_manifest(
        &self,
        path: impl AsRef<Path>,
        key: &DeploymentKey,
        mut variables: Variables,
        replicas: u32,
    ) -> Result<DeploymentManifest> {
        let path = path.as_ref();
        debug!("Rendering manifest template {}", path.display());

        let template = std::fs::read_to_string(path)?;
        variables.insert(String::from("application"), key.application.clone());
        variables.insert(String::from("version"), key.version.clone());
        variables.insert(String::from("release"), key.release.clone());

        let body = self.render_document(&template, &variables)?;

        Ok(DeploymentManifest {
            key: key.clone(),
            replicas,
            body,
        })
    }
}

/// Parses `KEY=VALUE` parameters; the value may itself contain `=`.
///
/// # Errors
///
/// Returns an error if a parameter has no `=`.
pub fn parse_parameters<S: AsRef<str>>(parameters: &[S]) -> Result<Variables> {
    parameters
        .iter()
        .map(|p| {
            let p = p.as_ref();
            p.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| {
                    StepwiseError::Template(TemplateError::InvalidParameter {
                        parameter: p.to_string(),
                    })
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_with_and_without_spaces() {
        let renderer = TemplateRenderer::new(RenderMode::Strict);
        let out = renderer
            .render("image: {{ image }}:{{version}}", &vars(&[("image", "shop"), ("version", "1.2")]))
            .unwrap();
        assert_eq!(out, "image: shop:1.2");
    }

    #[test]
    fn test_strict_mode_fails_on_unknown() {
        let renderer = TemplateRenderer::new(RenderMode::Strict);
        let err = renderer.render("x: {{ missing }}", &Variables::new()).unwrap_err();
        assert!(matches!(
            err,
            StepwiseError::Template(TemplateError::UnresolvedVariable { ref name }) if name == "missing"
        ));
    }

    #[test]
    fn test_lenient_mode_keeps_placeholder() {
        let renderer = TemplateRenderer::new(RenderMode::Lenient);
        let out = renderer
            .render("a: {{ missing }} b: {{ x }}", &vars(&[("x", "1")]))
            .unwrap();
        assert_eq!(out, "a: {{ missing }} b: 1");
    }

    #[test]
    fn test_unterminated_braces_are_text() {
        let renderer = TemplateRenderer::new(RenderMode::Strict);
        assert_eq!(renderer.render("a: {{ b", &Variables::new()).unwrap(), "a: {{ b");
    }

    #[test]
    fn test_parse_parameters() {
        let params = parse_parameters(&["a=1", "b=x=y", "c="]).unwrap();
        assert_eq!(params["a"], "1");
        assert_eq!(params["b"], "x=y");
        assert_eq!(params["c"], "");

        assert!(parse_parameters(&["novalue"]).is_err());
    }

    #[test]
    fn test_render_document_requires_mapping() {
        let renderer = TemplateRenderer::default();
        assert!(renderer.render_document("- a\n- b\n", &Variables::new()).is_err());
        let doc = renderer
            .render_document("kind: Deployment\nspec:\n  replicas: {{ n }}\n", &vars(&[("n", "3")]))
            .unwrap();
        assert_eq!(doc["spec"]["replicas"], 3);
    }

    #[test]
    fn test_render_manifest_injects_key() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("deployment.yaml");
        std::fs::write(
            &path,
            "kind: Deployment\nmetadata:\n  name: \"{{ application }}-{{ version }}-{{ release }}\"\n",
        )
        .unwrap();

        let key = DeploymentKey::new("shop", "v2", "1").unwrap();
        let manifest = TemplateRenderer::default()
            .render_manifest(&path, &key, vars(&[("application", "ignored")]), 0)
            .unwrap();

        assert_eq!(manifest.body["metadata"]["name"], "shop-v2-1");
        assert_eq!(manifest.replicas, 0);
        assert_eq!(manifest.key, key);
    }
}
