//! Rule stores: keyed persistence for guidelines and style guides.
//!
//! The evaluation pipeline consumes these as read interfaces while judging
//! proposals and as write interfaces when committing approved invoices.
//! Rules are scoped by rule set (the owning agent).

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::types::{
    GuidelineContent, Result, RulebookError, StoredGuideline, StoredStyleGuide, StyleGuideContent,
};

/// Store of guidelines, keyed by rule set.
///
/// An abstraction over the persistence mechanism, allowing for different
/// implementations (in-memory, database-backed).
#[async_trait]
pub trait GuidelineStore: Send + Sync {
    /// List every guideline in a rule set.
    async fn list(&self, rule_set: &str) -> Result<Vec<StoredGuideline>>;

    /// Read one guideline by id.
    async fn read(&self, rule_set: &str, id: &str) -> Result<StoredGuideline>;

    /// Create a guideline with a fresh id.
    async fn create(&self, rule_set: &str, content: GuidelineContent) -> Result<StoredGuideline>;

    /// Replace the content of an existing guideline.
    async fn update(
        &self,
        rule_set: &str,
        id: &str,
        content: GuidelineContent,
    ) -> Result<StoredGuideline>;
}

/// Store of style guides, keyed by rule set.
#[async_trait]
pub trait StyleGuideStore: Send + Sync {
    /// List every style guide in a rule set.
    async fn list(&self, rule_set: &str) -> Result<Vec<StoredStyleGuide>>;

    /// Read one style guide by id.
    async fn read(&self, rule_set: &str, id: &str) -> Result<StoredStyleGuide>;

    /// Create a style guide with a fresh id.
    async fn create(&self, rule_set: &str, content: StyleGuideContent)
        -> Result<StoredStyleGuide>;

    /// Replace the content of an existing style guide.
    async fn update(
        &self,
        rule_set: &str,
        id: &str,
        content: StyleGuideContent,
    ) -> Result<StoredStyleGuide>;
}

/// In-memory guideline store.
pub struct MemoryGuidelineStore {
    rules: DashMap<String, Vec<StoredGuideline>>,
}

impl MemoryGuidelineStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            rules: DashMap::new(),
        }
    }
}

impl Default for MemoryGuidelineStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GuidelineStore for MemoryGuidelineStore {
    async fn list(&self, rule_set: &str) -> Result<Vec<StoredGuideline>> {
        Ok(self
            .rules
            .get(rule_set)
            .map(|rules| rules.clone())
            .unwrap_or_default())
    }

    async fn read(&self, rule_set: &str, id: &str) -> Result<StoredGuideline> {
        self.rules
            .get(rule_set)
            .and_then(|rules| rules.iter().find(|rule| rule.id == id).cloned())
            .ok_or_else(|| {
                RulebookError::NotFound(format!("guideline '{id}' in '{rule_set}' rule set"))
            })
    }

    async fn create(&self, rule_set: &str, content: GuidelineContent) -> Result<StoredGuideline> {
        let stored = StoredGuideline::new(content);
        debug!(rule_set = %rule_set, guideline_id = %stored.id, "Created guideline");
        self.rules
            .entry(rule_set.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        rule_set: &str,
        id: &str,
        content: GuidelineContent,
    ) -> Result<StoredGuideline> {
        let mut rules = self.rules.entry(rule_set.to_string()).or_default();
        let rule = rules
            .iter_mut()
            .find(|rule| rule.id == id)
            .ok_or_else(|| {
                RulebookError::NotFound(format!("guideline '{id}' in '{rule_set}' rule set"))
            })?;
        rule.content = content;
        debug!(rule_set = %rule_set, guideline_id = %id, "Updated guideline");
        Ok(rule.clone())
    }
}

/// In-memory style-guide store.
pub struct MemoryStyleGuideStore {
    rules: DashMap<String, Vec<StoredStyleGuide>>,
}

impl MemoryStyleGuideStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            rules: DashMap::new(),
        }
    }
}

impl Default for MemoryStyleGuideStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StyleGuideStore for MemoryStyleGuideStore {
    async fn list(&self, rule_set: &str) -> Result<Vec<StoredStyleGuide>> {
        Ok(self
            .rules
            .get(rule_set)
            .map(|rules| rules.clone())
            .unwrap_or_default())
    }

    async fn read(&self, rule_set: &str, id: &str) -> Result<StoredStyleGuide> {
        self.rules
            .get(rule_set)
            .and_then(|rules| rules.iter().find(|rule| rule.id == id).cloned())
            .ok_or_else(|| {
                RulebookError::NotFound(format!("style guide '{id}' in '{rule_set}' rule set"))
            })
    }

    async fn create(
        &self,
        rule_set: &str,
        content: StyleGuideContent,
    ) -> Result<StoredStyleGuide> {
        let stored = StoredStyleGuide::new(content);
        debug!(rule_set = %rule_set, style_guide_id = %stored.id, "Created style guide");
        self.rules
            .entry(rule_set.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        rule_set: &str,
        id: &str,
        content: StyleGuideContent,
    ) -> Result<StoredStyleGuide> {
        let mut rules = self.rules.entry(rule_set.to_string()).or_default();
        let rule = rules
            .iter_mut()
            .find(|rule| rule.id == id)
            .ok_or_else(|| {
                RulebookError::NotFound(format!("style guide '{id}' in '{rule_set}' rule set"))
            })?;
        rule.content = content;
        debug!(rule_set = %rule_set, style_guide_id = %id, "Updated style guide");
        Ok(rule.clone())
    }
}
