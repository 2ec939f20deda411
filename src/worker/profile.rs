//! Static worker profiles and the catalog that holds them.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Ids rejected because hosts echo profile ids into plain object maps.
const RESERVED_IDS: &[&str] = &["__proto__", "prototype", "constructor"];

/// Maximum profile id length.
const MAX_ID_LEN: usize = 64;

/// What kind of work a profile is suited for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Coder,
    Vision,
    Docs,
    Architect,
    Explorer,
    Custom,
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Coder => "coder",
            Self::Vision => "vision",
            Self::Docs => "docs",
            Self::Architect => "architect",
            Self::Explorer => "explorer",
            Self::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

/// Immutable description of a worker's capability and model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub id: String,
    pub name: String,
    pub kind: CapabilityKind,
    /// Model reference in `provider/model` form.
    pub model: String,
    pub purpose: String,
    pub when_to_use: String,
    /// Tool permission overrides (`tool name -> enabled`).
    #[serde(default)]
    pub tools: BTreeMap<String, bool>,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub supports_web: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl WorkerProfile {
    /// Create a profile with empty purpose text and no overrides.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: CapabilityKind,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            model: model.into(),
            purpose: String::new(),
            when_to_use: String::new(),
            tools: BTreeMap::new(),
            supports_vision: false,
            supports_web: false,
            temperature: None,
            tags: Vec::new(),
        }
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    pub fn with_when_to_use(mut self, when_to_use: impl Into<String>) -> Self {
        self.when_to_use = when_to_use.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>, enabled: bool) -> Self {
        self.tools.insert(tool.into(), enabled);
        self
    }

    /// Case-insensitive substring match against purpose, when-to-use, id and tags.
    pub fn matches_capability(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.purpose.to_lowercase().contains(&needle)
            || self.when_to_use.to_lowercase().contains(&needle)
            || self.id.to_lowercase().contains(&needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&needle))
    }
}

/// Validate a profile id before it is used as a map key.
pub fn validate_profile_id(id: &str) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidProfileId {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    if id.is_empty() {
        return Err(invalid("empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(invalid("too long"));
    }
    if RESERVED_IDS.contains(&id) {
        return Err(invalid("reserved key"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(invalid("only [a-z0-9_-] allowed"));
    }
    Ok(())
}

/// Catalog of known profiles, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ProfileCatalog {
    profiles: HashMap<String, WorkerProfile>,
}

impl ProfileCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with the built-in profiles.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for profile in builtin_profiles() {
            // Built-in ids are static and valid.
            let _ = catalog.insert(profile);
        }
        catalog
    }

    /// Insert or replace a profile. Rejects invalid ids.
    pub fn insert(&mut self, profile: WorkerProfile) -> Result<(), RegistryError> {
        validate_profile_id(&profile.id)?;
        self.profiles.insert(profile.id.clone(), profile);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&WorkerProfile> {
        self.profiles.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.profiles.contains_key(id)
    }

    /// All profiles sorted by id.
    pub fn list(&self) -> Vec<&WorkerProfile> {
        let mut all: Vec<_> = self.profiles.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// First profile (by id order) of the given kind.
    pub fn first_of_kind(&self, kind: CapabilityKind) -> Option<&WorkerProfile> {
        self.list().into_iter().find(|p| p.kind == kind)
    }

    /// Profiles matching a capability query, sorted by id.
    pub fn search(&self, query: &str) -> Vec<&WorkerProfile> {
        self.list()
            .into_iter()
            .filter(|p| p.matches_capability(query))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// The built-in worker profiles.
pub fn builtin_profiles() -> Vec<WorkerProfile> {
    vec![
        WorkerProfile::new("coder", "Coder", CapabilityKind::Coder, "anthropic/claude-sonnet-4")
            .with_purpose("General implementation work: writing, fixing and refactoring code")
            .with_when_to_use("Default choice for code changes and general tasks")
            .with_tags(["code", "implementation", "general"]),
        WorkerProfile {
            supports_vision: true,
            ..WorkerProfile::new("vision", "Vision", CapabilityKind::Vision, "google/gemini-2.5-pro")
                .with_purpose("Analyze screenshots, diagrams and other images")
                .with_when_to_use("The task includes an image attachment")
                .with_tags(["image", "screenshot", "ui"])
                .with_tool("write", false)
                .with_tool("edit", false)
        },
        WorkerProfile {
            supports_web: true,
            temperature: Some(0.3),
            ..WorkerProfile::new("docs", "Docs", CapabilityKind::Docs, "anthropic/claude-haiku-4")
                .with_purpose("Look up library documentation and write docs")
                .with_when_to_use("Questions about APIs, READMEs, documentation")
                .with_tags(["documentation", "research"])
        },
        WorkerProfile {
            temperature: Some(0.2),
            ..WorkerProfile::new(
                "architect",
                "Architect",
                CapabilityKind::Architect,
                "openai/gpt-5",
            )
            .with_purpose("System design, architecture review and planning")
            .with_when_to_use("Design decisions, trade-offs, refactoring plans")
            .with_tags(["design", "planning", "review"])
            .with_tool("write", false)
        },
        WorkerProfile::new(
            "explorer",
            "Explorer",
            CapabilityKind::Explorer,
            "anthropic/claude-haiku-4",
        )
        .with_purpose("Fast codebase search and navigation")
        .with_when_to_use("Finding where something is defined or used")
        .with_tags(["search", "grep", "navigation"])
        .with_tool("write", false)
        .with_tool("edit", false),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_ids_rejected() {
        for id in ["__proto__", "prototype", "constructor", "", "Has Space", "../x"] {
            assert!(validate_profile_id(id).is_err(), "{id:?} should be rejected");
        }
        assert!(validate_profile_id("code-reviewer_2").is_ok());
    }

    #[test]
    fn catalog_insert_rejects_reserved() {
        let mut catalog = ProfileCatalog::new();
        let profile = WorkerProfile::new("__proto__", "x", CapabilityKind::Custom, "m");
        assert!(catalog.insert(profile).is_err());
        assert!(catalog.is_empty());
    }

    #[test]
    fn builtins_cover_every_routing_kind() {
        let catalog = ProfileCatalog::with_builtins();
        assert_eq!(catalog.len(), 5);
        for kind in [
            CapabilityKind::Coder,
            CapabilityKind::Vision,
            CapabilityKind::Docs,
            CapabilityKind::Architect,
            CapabilityKind::Explorer,
        ] {
            assert!(catalog.first_of_kind(kind).is_some(), "missing {kind}");
        }
        assert!(catalog.get("vision").unwrap().supports_vision);
    }

    #[test]
    fn capability_search_is_case_insensitive() {
        let catalog = ProfileCatalog::with_builtins();
        let hits: Vec<_> = catalog.search("SCREENSHOT").iter().map(|p| p.id.clone()).collect();
        assert_eq!(hits, vec!["vision".to_string()]);

        let hits: Vec<_> = catalog.search("explor").iter().map(|p| p.id.clone()).collect();
        assert_eq!(hits, vec!["explorer".to_string()]);

        assert!(catalog.search("   ").is_empty());
    }
}
