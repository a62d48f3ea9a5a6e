//! Agent Catalog
//!
//! Static mapping of agent identifier to profile: display name, category,
//! capabilities, system prompt, default model, complexity tier.
//!
//! The catalog is assembled once at startup from a declarative builtin list
//! and is immutable afterwards; construction validates that every referenced
//! category has a response format, so request-time lookups never hit an
//! unmapped category.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::formats::FormatRegistry;

/// Agent grouping; each category shares one response-format contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentCategory {
    Analysis,
    Creative,
    Technical,
    Research,
    Planning,
}

impl AgentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Creative => "creative",
            Self::Technical => "technical",
            Self::Research => "research",
            Self::Planning => "planning",
        }
    }

    pub fn all() -> &'static [AgentCategory] {
        &[
            Self::Analysis,
            Self::Creative,
            Self::Technical,
            Self::Research,
            Self::Planning,
        ]
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "analysis" => Some(Self::Analysis),
            "creative" => Some(Self::Creative),
            "technical" => Some(Self::Technical),
            "research" => Some(Self::Research),
            "planning" => Some(Self::Planning),
            _ => None,
        }
    }
}

/// How demanding an agent's typical task is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    Basic,
    Intermediate,
    Advanced,
    Expert,
}

/// Immutable agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Unique identifier, stable across releases
    pub id: String,
    /// Display name shown to users
    pub name: String,
    pub category: AgentCategory,
    pub description: String,
    /// Model hint passed to the provider when the request has no override
    pub default_model: String,
    pub system_prompt: String,
    /// Ordered capability tags
    pub capabilities: Vec<String>,
    pub tier: ComplexityTier,
}

/// Catalog construction errors (fatal configuration problems)
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("duplicate agent id: {0}")]
    DuplicateId(String),

    #[error("agent {agent} references category {category} with no response format")]
    OrphanCategory { agent: String, category: String },
}

/// Read-only agent catalog; safe to share across concurrent requests
pub struct AgentCatalog {
    profiles: Vec<AgentProfile>,
    index: HashMap<String, usize>,
}

impl AgentCatalog {
    /// Build a catalog, validating ids and category coverage
    pub fn new(profiles: Vec<AgentProfile>, formats: &FormatRegistry) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(profiles.len());

        for (i, profile) in profiles.iter().enumerate() {
            if index.insert(profile.id.clone(), i).is_some() {
                return Err(CatalogError::DuplicateId(profile.id.clone()));
            }
            if formats.format_for(profile.category).is_none() {
                return Err(CatalogError::OrphanCategory {
                    agent: profile.id.clone(),
                    category: profile.category.as_str().to_string(),
                });
            }
        }

        Ok(Self { profiles, index })
    }

    /// Catalog of the builtin agents
    pub fn builtin(formats: &FormatRegistry) -> Result<Self, CatalogError> {
        Self::new(builtin_profiles(), formats)
    }

    /// Look up one agent; `None` when the id is unknown
    pub fn profile(&self, agent_id: &str) -> Option<&AgentProfile> {
        self.index.get(agent_id).map(|&i| &self.profiles[i])
    }

    /// All agents in registration order
    pub fn list(&self) -> &[AgentProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn profile(
    id: &str,
    name: &str,
    category: AgentCategory,
    tier: ComplexityTier,
    model: &str,
    description: &str,
    capabilities: &[&str],
    system_prompt: &str,
) -> AgentProfile {
    AgentProfile {
        id: id.to_string(),
        name: name.to_string(),
        category,
        description: description.to_string(),
        default_model: model.to_string(),
        system_prompt: system_prompt.to_string(),
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        tier,
    }
}

/// Declarative builtin agent list; registration order is listing order
pub fn builtin_profiles() -> Vec<AgentProfile> {
    vec![
        profile(
            "reasoning",
            "Reasoning Agent",
            AgentCategory::Analysis,
            ComplexityTier::Advanced,
            "sonnet",
            "Step-by-step analysis of problems, trade-offs, and evidence",
            &["analysis", "logic", "evaluation"],
            "You are a Reasoning Agent specialized in structured analysis. \
             Break the problem into parts, weigh evidence explicitly, and \
             state your confidence in each conclusion.",
        ),
        profile(
            "critic",
            "Critic Agent",
            AgentCategory::Analysis,
            ComplexityTier::Intermediate,
            "sonnet",
            "Critical evaluation of plans, drafts, and arguments",
            &["review", "evaluation"],
            "You are a Critic Agent specialized in quality assurance. \
             Critically evaluate the input for correctness, completeness, \
             and hidden assumptions. Provide specific, constructive feedback.",
        ),
        profile(
            "writer",
            "Writer Agent",
            AgentCategory::Creative,
            ComplexityTier::Intermediate,
            "sonnet",
            "Clear prose for articles, copy, and summaries",
            &["writing", "editing"],
            "You are a Writer Agent specialized in clear, engaging prose. \
             Match the requested tone, keep sentences tight, and avoid filler.",
        ),
        profile(
            "storyteller",
            "Storyteller Agent",
            AgentCategory::Creative,
            ComplexityTier::Advanced,
            "opus",
            "Narrative fiction and scene writing",
            &["fiction", "narrative", "dialogue"],
            "You are a Storyteller Agent specialized in narrative craft. \
             Build vivid scenes with concrete detail and distinct character \
             voices.",
        ),
        profile(
            "coder",
            "Code Agent",
            AgentCategory::Technical,
            ComplexityTier::Expert,
            "sonnet",
            "Code generation, debugging, and refactoring",
            &["code", "debugging", "refactoring"],
            "You are a Code Agent specialized in programming. Write clean, \
             efficient, well-documented code. Include error handling and \
             consider edge cases.",
        ),
        profile(
            "architect",
            "Architecture Agent",
            AgentCategory::Technical,
            ComplexityTier::Expert,
            "opus",
            "System design and architecture review",
            &["architecture", "design", "scalability"],
            "You are an Architecture Agent specialized in system design. \
             Name the components, their responsibilities, and the failure \
             modes of each integration point.",
        ),
        profile(
            "researcher",
            "Research Agent",
            AgentCategory::Research,
            ComplexityTier::Advanced,
            "sonnet",
            "Information gathering and synthesis",
            &["research", "synthesis"],
            "You are a Research Agent specialized in gathering and analyzing \
             information. Focus on accurate, relevant data and separate facts \
             from interpretation.",
        ),
        profile(
            "planner",
            "Planning Agent",
            AgentCategory::Planning,
            ComplexityTier::Intermediate,
            "haiku",
            "Task decomposition and scheduling",
            &["planning", "decomposition"],
            "You are a Planning Agent specialized in task decomposition. \
             Break work into actionable steps, identify dependencies, and \
             prioritize effectively.",
        ),
    ]
}
