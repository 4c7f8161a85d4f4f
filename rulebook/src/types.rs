//! Core types for the rule model.
//!
//! A rule set holds two kinds of behavioral rules: guidelines
//! (condition/action pairs) and style guides (a stylistic principle with
//! before/after examples). Content identity is structural: two contents with
//! equal fields are the same proposal for deduplication purposes.
//!
//! With the `typescript` feature enabled, these types can be exported to
//! TypeScript using ts-rs for consistency with frontend consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Content of a guideline: when the condition holds, take the action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct GuidelineContent {
    /// Situation under which the guideline applies
    pub condition: String,
    /// Behavior the agent should adopt when the condition holds
    pub action: String,
}

impl GuidelineContent {
    /// Create guideline content from a condition/action pair.
    pub fn new(condition: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for GuidelineContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "When {}, then {}", self.condition, self.action)
    }
}

/// A before/after rendering pair illustrating a style principle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct StyleExample {
    /// A rendering that violates the principle
    pub before: String,
    /// The same message rewritten to follow the principle
    pub after: String,
}

impl StyleExample {
    /// Create a before/after example.
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
        }
    }
}

/// Content of a style guide: a principle plus illustrating examples.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct StyleGuideContent {
    /// The stylistic principle the agent should follow
    pub principle: String,
    /// Before/after examples illustrating the principle
    pub examples: Vec<StyleExample>,
}

impl StyleGuideContent {
    /// Create style-guide content from a principle and its examples.
    pub fn new(principle: impl Into<String>, examples: Vec<StyleExample>) -> Self {
        Self {
            principle: principle.into(),
            examples,
        }
    }
}

impl fmt::Display for StyleGuideContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.principle)?;
        for example in &self.examples {
            write!(
                f,
                " (instead of \"{}\", write \"{}\")",
                example.before, example.after
            )?;
        }
        Ok(())
    }
}

/// Rule content of either kind.
///
/// Findings pair contents across proposals and existing rules, so they carry
/// this sum type rather than a concrete content struct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleContent {
    /// A condition/action guideline
    Guideline(GuidelineContent),
    /// A stylistic principle
    StyleGuide(StyleGuideContent),
}

impl RuleContent {
    /// Human-readable kind name, as used in operator-facing messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Guideline(_) => "Guideline",
            Self::StyleGuide(_) => "Style guide",
        }
    }
}

impl fmt::Display for RuleContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guideline(content) => content.fmt(f),
            Self::StyleGuide(content) => content.fmt(f),
        }
    }
}

impl From<GuidelineContent> for RuleContent {
    fn from(content: GuidelineContent) -> Self {
        Self::Guideline(content)
    }
}

impl From<StyleGuideContent> for RuleContent {
    fn from(content: StyleGuideContent) -> Self {
        Self::StyleGuide(content)
    }
}

/// A guideline persisted in a rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct StoredGuideline {
    /// Unique identifier
    pub id: String,
    /// The guideline content
    pub content: GuidelineContent,
    /// When the rule was created
    pub created_at: DateTime<Utc>,
}

impl StoredGuideline {
    /// Create a stored guideline with a fresh id.
    pub fn new(content: GuidelineContent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            created_at: Utc::now(),
        }
    }
}

/// A style guide persisted in a rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct StoredStyleGuide {
    /// Unique identifier
    pub id: String,
    /// The style-guide content
    pub content: StyleGuideContent,
    /// When the rule was created
    pub created_at: DateTime<Utc>,
}

impl StoredStyleGuide {
    /// Create a stored style guide with a fresh id.
    pub fn new(content: StyleGuideContent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            created_at: Utc::now(),
        }
    }
}

/// Error types for rule storage and hashing.
#[derive(Debug, thiserror::Error)]
pub enum RulebookError {
    /// Rule lookup failed
    #[error("Rule not found: {0}")]
    NotFound(String),

    /// Content could not be serialized for hashing or storage
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RulebookError>;
