//! Formatter configuration loaded from a JSON file.

use crate::text_gen::TextGeneratorOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Indent size in spaces (default: 2)
    pub indent_size: usize,
    /// Re-parse the output and compare it with the input (default: true)
    pub verify: bool,
    /// Keep the detached `//` block at the top of each file (default: true)
    pub preserve_header: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            indent_size: 2,
            verify: true,
            preserve_header: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn text_options(&self) -> TextGeneratorOptions {
        TextGeneratorOptions {
            indent_size: self.indent_size,
        }
    }
}
