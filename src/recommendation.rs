//! Farmer-facing guidance for predicted classes
//!
//! The table is built once at start-up and only read afterwards, so one
//! `Arc<RecommendationTable>` is shared by all requests without locking.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

pub const FALLBACK_RECOMMENDATION: &str = "No specific recommendation available for this condition.";

const BUILTIN: &[(&str, &str)] = &[
    (
        "Tomato___healthy",
        "Your plant looks healthy! Keep up the good work. Ensure consistent watering and monitor for any changes.",
    ),
    (
        "Tomato___Late_blight",
        "Late Blight detected. Late blight is a fungal disease.\n\
         1. **Action**: Immediately remove and destroy infected leaves.\n\
         2. **Treatment**: Apply a copper-based fungicide.\n\
         3. **Prevention**: Ensure good air circulation around plants and avoid overhead watering.",
    ),
];

#[derive(Debug, Clone)]
pub struct RecommendationTable {
    entries: HashMap<String, String>,
    fallback: String,
}

impl Default for RecommendationTable {
    fn default() -> Self {
        Self::new(
            BUILTIN
                .iter()
                .map(|(label, text)| (label.to_string(), text.to_string()))
                .collect(),
        )
    }
}

impl RecommendationTable {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self {
            entries,
            fallback: FALLBACK_RECOMMENDATION.to_string(),
        }
    }

    /// Built-in entries overlaid with a JSON object of `{label: text}` read from `path`
    pub fn with_overrides_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recommendations file {}", path.display()))?;
        let overrides: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid recommendations JSON in {}", path.display()))?;

        let mut table = Self::default();
        table.entries.extend(overrides);
        Ok(table)
    }

    /// Total lookup: unknown labels get the fallback text
    pub fn resolve(&self, label: &str) -> &str {
        self.entries
            .get(label)
            .map(String::as_str)
            .unwrap_or(&self.fallback)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
