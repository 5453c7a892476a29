//! Prompt templating for generation requests.
//!
//! A template is plain text with an `{input}` placeholder. The handler
//! substitutes the request's input text before calling the engine.

use std::path::Path;

use crate::error::{Result, VellumError};

/// The placeholder substituted with the request input.
const INPUT_PLACEHOLDER: &str = "{input}";

/// Built-in template for schema-constrained extraction.
const DEFAULT_TEMPLATE: &str = "\
Extract the requested information from the following text. \
Respond with JSON that matches the required schema exactly.

Text:
{input}
";

/// A prompt template with an `{input}` placeholder.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    /// Create a template from a string.
    ///
    /// # Errors
    /// Returns an error if the template has no `{input}` placeholder.
    pub fn new(template: String) -> Result<Self> {
        if !template.contains(INPUT_PLACEHOLDER) {
            return Err(VellumError::Config(format!(
                "prompt template is missing the {INPUT_PLACEHOLDER} placeholder"
            )));
        }
        Ok(Self { template })
    }

    /// Load a template from a file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or has no placeholder.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VellumError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::new(contents)
    }

    /// Render a prompt for the given input text.
    #[must_use]
    pub fn render(&self, input: &str) -> String {
        self.template.replace(INPUT_PLACEHOLDER, input)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self { template: DEFAULT_TEMPLATE.to_string() }
    }
}
