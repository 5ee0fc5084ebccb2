//! Request scopes: what a caller is doing, what it may see, and how much
//! context it can afford.

use serde::{Deserialize, Serialize};

/// Access level of the requesting surface.
///
/// `Restricted` consumers (reader-facing surfaces) never see privileged
/// planning data; the snapshot factory enforces this structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Restricted,
    Privileged,
}

/// Rendering shape of the assembled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Human-readable, sectioned by source layer.
    Sectioned,
    /// Structured JSON for programmatic consumers.
    Raw,
    /// Delegated to an external template renderer; falls back to Sectioned.
    Templated,
}

/// Declarative description of one read request. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextScope {
    /// Pipeline step being served ("draft_scene", "panel_layout", ...).
    pub purpose: String,
    pub access: AccessLevel,
    pub chapter: Option<String>,
    pub scene: Option<String>,
    pub entity_name: Option<String>,
    pub token_budget: usize,
    pub format: OutputFormat,
    /// Free-text request; `@mentions` in it trigger on-demand retrieval.
    pub semantic_query: Option<String>,
}

impl ContextScope {
    pub fn new(purpose: impl Into<String>, access: AccessLevel) -> Self {
        Self {
            purpose: purpose.into(),
            access,
            chapter: None,
            scene: None,
            entity_name: None,
            token_budget: 4096,
            format: OutputFormat::Sectioned,
            semantic_query: None,
        }
    }
}

/// Entity types only privileged scopes may load. Author-side planning data.
pub const PRIVILEGED_TYPES: &[&str] = &["author_note", "plot_thread"];

/// Conservative fallback for unknown purposes: every non-privileged type.
const DEFAULT_TYPES: &[&str] = &["chapter", "scene", "character", "location", "world_rule"];

/// Map a purpose to the entity types its snapshot needs.
pub fn required_entity_types(purpose: &str) -> &'static [&'static str] {
    match purpose {
        "draft_scene" => &["chapter", "scene", "character", "location", "plot_thread"],
        "character_dialogue" => &["character", "scene", "world_rule"],
        "panel_layout" => &["scene", "panel", "character"],
        "world_building" => &["location", "world_rule", "plot_thread", "author_note"],
        "revision_pass" => &["chapter", "scene", "character", "author_note"],
        _ => DEFAULT_TYPES,
    }
}

pub fn is_privileged_type(entity_type: &str) -> bool {
    PRIVILEGED_TYPES.contains(&entity_type)
}
