// 📇 Name Registry - Registry names → knowledge base items
//
// The feed names operators and municipalities in plain Swedish text.
// A registry maps those names to items. It is filled during startup via a
// builder, then frozen: record processing only ever reads it.

use crate::statement::EntityId;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// One row of an external listing: `{"sv": "Kiruna kommun", "item": "Q..."}`
#[derive(Debug, Clone, Deserialize)]
pub struct ListingEntry {
    pub sv: String,
    pub item: String,
}

/// Accept both bare ids and entity IRIs as exported by SPARQL
pub fn entity_from_listing(item: &str) -> EntityId {
    EntityId::new(item.rsplit('/').next().unwrap_or(item).trim())
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

// ============================================================================
// BUILDER (startup only)
// ============================================================================

pub struct NameRegistryBuilder {
    kind: &'static str,
    by_name: HashMap<String, EntityId>,
}

impl NameRegistryBuilder {
    pub fn new(kind: &'static str) -> Self {
        NameRegistryBuilder {
            kind,
            by_name: HashMap::new(),
        }
    }

    /// Later registrations for the same name win
    pub fn register(&mut self, name: &str, entity: EntityId) {
        self.by_name.insert(normalize(name), entity);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(&normalize(name))
    }

    pub fn load_listing_str(&mut self, json: &str) -> Result<usize> {
        let entries: Vec<ListingEntry> =
            serde_json::from_str(json).with_context(|| format!("Failed to parse {} listing", self.kind))?;
        let count = entries.len();
        for entry in entries {
            self.register(&entry.sv, entity_from_listing(&entry.item));
        }
        debug!("Loaded {} {} names", count, self.kind);
        Ok(count)
    }

    pub fn load_listing(&mut self, path: &Path) -> Result<usize> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {} listing {}", self.kind, path.display()))?;
        self.load_listing_str(&json)
    }

    pub fn build(self) -> NameRegistry {
        NameRegistry {
            kind: self.kind,
            by_name: self.by_name,
        }
    }
}

// ============================================================================
// REGISTRY (read-only)
// ============================================================================

#[derive(Debug, Clone)]
pub struct NameRegistry {
    kind: &'static str,
    by_name: HashMap<String, EntityId>,
}

impl NameRegistry {
    pub fn empty(kind: &'static str) -> Self {
        NameRegistryBuilder::new(kind).build()
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Case and surrounding whitespace are ignored
    pub fn get(&self, name: &str) -> Option<&EntityId> {
        self.by_name.get(&normalize(name))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_listing_accepts_iris_and_ids() {
        let mut builder = NameRegistryBuilder::new("operator");
        let count = builder
            .load_listing_str(
                r#"[
                    {"sv": "Länsstyrelsen i Norrbottens län", "item": "http://www.wikidata.org/entity/Q10602420"},
                    {"sv": "Naturvårdsverket", "item": "Q1632530"}
                ]"#,
            )
            .unwrap();
        assert_eq!(count, 2);

        let registry = builder.build();
        assert_eq!(registry.get("Naturvårdsverket"), Some(&EntityId::new("Q1632530")));
        assert_eq!(
            registry.get("  länsstyrelsen i norrbottens län "),
            Some(&EntityId::new("Q10602420"))
        );
        assert_eq!(registry.get("Okänd förvaltare"), None);
    }

    #[test]
    fn test_load_listing_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"sv": "Kiruna", "item": "Q1000"}}]"#).unwrap();

        let mut builder = NameRegistryBuilder::new("municipality");
        assert_eq!(builder.load_listing(file.path()).unwrap(), 1);
        assert!(builder.contains("kiruna"));
        assert_eq!(builder.build().len(), 1);
    }

    #[test]
    fn test_broken_listing_is_an_error() {
        let mut builder = NameRegistryBuilder::new("operator");
        assert!(builder.load_listing_str("{not json").is_err());
    }
}
