//! Inbound generation request: what to write, for whom, and with which model.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::provider::ModelId;

/// What kind of text a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Outline,
    #[default]
    Sections,
}

/// The document being generated, as handed over by the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    pub id: String,
    pub topic: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Target length of the whole document, in pages.
    #[serde(default = "default_page_target")]
    pub page_target: u32,
    pub model: ModelId,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_page_target() -> u32 {
    10
}

/// One section to generate, in document order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSpec {
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SectionSpec {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Key used to route live progress events to the owner's connections.
    pub owner: String,
    #[serde(default)]
    pub job_type: JobType,
    pub document: DocumentDescriptor,
    #[serde(default)]
    pub sections: Vec<SectionSpec>,
}

impl GenerationRequest {
    /// Reads a request from a `.toml` or `.json` file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read request file {}", path.display()))?;
        let request: GenerationRequest = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") => toml::from_str(&contents)?,
            other => bail!("unsupported request file extension: {other:?}"),
        };
        Ok(request)
    }

    /// Sections to generate. An outline job produces a single synthetic section.
    pub fn effective_sections(&self) -> Vec<SectionSpec> {
        match self.job_type {
            JobType::Outline if self.sections.is_empty() => vec![SectionSpec::new("Outline")],
            _ => self.sections.clone(),
        }
    }
}
