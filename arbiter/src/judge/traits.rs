//! Core traits for semantic classification.
//!
//! This module defines the `SemanticJudge` trait - the primary abstraction
//! over the external natural-language judgment service that compares
//! behavioral rules pairwise.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use rulebook::RuleContent;

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Error types for classifier operations.
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    /// Classifier is not reachable or returned a server error
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),

    /// Request was rejected
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Rate limited by the classifier
    #[error("Rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Classifier produced output the client could not interpret
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl JudgeError {
    /// Whether a retry at a later instant could plausibly succeed.
    ///
    /// Rate limiting, network failures and server unavailability are
    /// expected operational hiccups; a rejected request or unparseable
    /// output will not improve by waiting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::RateLimited { .. } | Self::NetworkError(_)
        )
    }
}

/// One pairwise coherence judgment.
///
/// `comparison_index` addresses the comparison slice the candidate was judged
/// against. Both severities range 1..10. A pair is only treated as
/// contradictory when the rules are related at all, so the two severities
/// gate findings independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct CoherenceVerdict {
    /// Index of the compared rule within the comparison slice
    pub comparison_index: usize,
    /// How semantically related the pair is at all (1-10)
    pub relatedness_severity: u8,
    /// How strongly the pair conflicts (1-10)
    pub contradiction_severity: u8,
    /// Natural-language explanation of the judgment
    pub rationale: String,
}

/// One directional entailment judgment.
///
/// `source_index` and `target_index` address the concatenation of the
/// candidate slice followed by the comparison slice. The judgment is
/// directional: satisfying the source rule's condition implies the target
/// rule's context applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ConnectionVerdict {
    /// Index of the implying rule within `candidates ++ comparisons`
    pub source_index: usize,
    /// Index of the implied rule within `candidates ++ comparisons`
    pub target_index: usize,
    /// Strength of the entailment (1-10)
    pub score: u8,
}

/// Core trait for semantic judges.
///
/// Abstracts over classification services (OpenAI-compatible endpoints, a
/// scriptable mock) so the evaluation pipeline never depends on a concrete
/// backend.
#[async_trait]
pub trait SemanticJudge: Send + Sync {
    /// Get the judge identifier (e.g., model name).
    fn id(&self) -> &str;

    /// Check if the judge is currently available.
    async fn is_available(&self) -> bool;

    /// Judge one candidate rule against a set of comparison rules.
    ///
    /// Returns one verdict per comparison.
    async fn classify_coherence(
        &self,
        candidate: &RuleContent,
        comparisons: &[RuleContent],
    ) -> Result<Vec<CoherenceVerdict>, JudgeError>;

    /// Propose directional entailments between candidate and comparison rules.
    ///
    /// Returns only the pairs the judge considers connected; indices address
    /// `candidates ++ comparisons`.
    async fn classify_connection(
        &self,
        candidates: &[RuleContent],
        comparisons: &[RuleContent],
    ) -> Result<Vec<ConnectionVerdict>, JudgeError>;
}
