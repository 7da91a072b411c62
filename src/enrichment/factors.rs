//! Factor selection: generator-driven first, keyword matcher second,
//! catalogue head last.

use super::catalogue::{FactorCatalogue, FactorInfo};
use crate::generator::{ContentGenerator, GenerationContext};
use crate::util::extract_json_object;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Which tier produced the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    Generator,
    Keywords,
    Default,
}

#[derive(Debug, Clone)]
pub struct FactorSelection {
    pub factors: Vec<FactorInfo>,
    pub reasoning: Option<String>,
    pub source: SelectionSource,
}

impl FactorSelection {
    /// Text handed to the generation prompt.
    pub fn render(&self, requirement: &str) -> String {
        if self.factors.is_empty() {
            return "No matching factors found in the catalogue.".to_string();
        }
        let mut out = format!(
            "For the requirement \"{}\", {} factors were selected:\n\n",
            requirement,
            self.factors.len()
        );
        if let Some(reasoning) = self.reasoning.as_deref().filter(|r| !r.trim().is_empty()) {
            out.push_str(&format!("**Reasoning**: {}\n\n", reasoning.trim()));
        }
        for (i, factor) in self.factors.iter().enumerate() {
            out.push_str(&factor.render(i + 1));
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Deserialize)]
struct SelectionPayload {
    selected_factors: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

pub struct FactorSelector {
    catalogue: Arc<FactorCatalogue>,
    generator: Option<Arc<dyn ContentGenerator>>,
    max_factors: usize,
    deadline: Duration,
}

impl FactorSelector {
    pub fn new(
        catalogue: Arc<FactorCatalogue>,
        generator: Option<Arc<dyn ContentGenerator>>,
        max_factors: usize,
        deadline: Duration,
    ) -> Self {
        Self {
            catalogue,
            generator,
            max_factors: max_factors.max(1),
            deadline,
        }
    }

    pub fn catalogue(&self) -> &FactorCatalogue {
        &self.catalogue
    }

    /// Try each tier in order. Never fails.
    pub async fn select(&self, requirement: &str) -> FactorSelection {
        if let Some(selection) = self.select_with_generator(requirement).await {
            return selection;
        }

        let matched: Vec<FactorInfo> = self
            .catalogue
            .match_requirement(requirement)
            .into_iter()
            .take(self.max_factors)
            .cloned()
            .collect();
        if !matched.is_empty() {
            tracing::debug!(count = matched.len(), "Selected factors by keyword");
            return FactorSelection {
                factors: matched,
                reasoning: None,
                source: SelectionSource::Keywords,
            };
        }

        tracing::debug!("No keyword match, using catalogue head");
        FactorSelection {
            factors: self.catalogue.all().iter().take(self.max_factors).cloned().collect(),
            reasoning: None,
            source: SelectionSource::Default,
        }
    }

    async fn select_with_generator(&self, requirement: &str) -> Option<FactorSelection> {
        let generator = self.generator.as_ref()?;
        if self.catalogue.is_empty() {
            return None;
        }
        let ctx = GenerationContext::select_factors(requirement, self.catalogue.summary());
        let raw = match tokio::time::timeout(self.deadline, generator.generate(&ctx)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Factor selection call failed, falling back to keywords");
                return None;
            }
            Err(_) => {
                tracing::warn!("Factor selection call timed out, falling back to keywords");
                return None;
            }
        };

        let payload = extract_json_object(&raw)
            .and_then(|json| serde_json::from_str::<SelectionPayload>(&json).ok());
        let Some(payload) = payload else {
            tracing::warn!("Factor selection answer was not valid JSON, falling back to keywords");
            return None;
        };

        let mut factors: Vec<FactorInfo> = Vec::new();
        for name in &payload.selected_factors {
            match self.catalogue.get(name.trim()) {
                Some(f) if !factors.iter().any(|known| known.name == f.name) => factors.push(f.clone()),
                Some(_) => {}
                None => tracing::debug!(name = %name, "Generator picked an unknown factor"),
            }
        }
        factors.truncate(self.max_factors);
        if factors.is_empty() {
            tracing::warn!("Generator picked no known factors, falling back to keywords");
            return None;
        }
        Some(FactorSelection {
            factors,
            reasoning: Some(payload.reasoning),
            source: SelectionSource::Generator,
        })
    }
}
