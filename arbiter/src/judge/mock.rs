//! Scripted semantic judge for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use rulebook::RuleContent;

use super::traits::*;

/// A scripted contradiction between two rules, matched in either order.
#[derive(Debug, Clone)]
struct ScriptedContradiction {
    first: String,
    second: String,
    relatedness: u8,
    contradiction: u8,
    rationale: String,
}

/// A scripted directed entailment from one rule to another.
#[derive(Debug, Clone)]
struct ScriptedConnection {
    source: String,
    target: String,
    score: u8,
}

/// Scripted judge for testing.
///
/// Rules are matched by their rendered text. Pairs not covered by a script
/// come back unrelated (severity 1), so tests only script the findings they
/// care about.
pub struct MockJudge {
    judge_id: String,
    available: AtomicBool,
    call_count: AtomicU32,
    fail_first: AtomicU32,
    contradictions: Vec<ScriptedContradiction>,
    connections: Vec<ScriptedConnection>,
}

impl MockJudge {
    /// Create a new scripted judge.
    pub fn new(judge_id: impl Into<String>) -> Self {
        Self {
            judge_id: judge_id.into(),
            available: AtomicBool::new(true),
            call_count: AtomicU32::new(0),
            fail_first: AtomicU32::new(0),
            contradictions: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Script a contradiction between two rules, matched in either order.
    pub fn with_contradiction(
        mut self,
        first: &RuleContent,
        second: &RuleContent,
        relatedness: u8,
        contradiction: u8,
        rationale: impl Into<String>,
    ) -> Self {
        self.contradictions.push(ScriptedContradiction {
            first: first.to_string(),
            second: second.to_string(),
            relatedness,
            contradiction,
            rationale: rationale.into(),
        });
        self
    }

    /// Script a directed entailment from `source` to `target`.
    pub fn with_connection(mut self, source: &RuleContent, target: &RuleContent, score: u8) -> Self {
        self.connections.push(ScriptedConnection {
            source: source.to_string(),
            target: target.to_string(),
            score,
        });
        self
    }

    /// Fail the next `count` classification calls with a transient error.
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.fail_first.store(count, Ordering::SeqCst);
        self
    }

    /// Set availability.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Get the number of classification calls made.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Fail the call if a transient failure or unavailability is scripted.
    fn check_health(&self) -> Result<(), JudgeError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(JudgeError::RateLimited {
                retry_after_ms: None,
            });
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(JudgeError::Unavailable("Mock judge disabled".to_string()));
        }

        Ok(())
    }

    fn scripted_contradiction(&self, a: &str, b: &str) -> Option<&ScriptedContradiction> {
        self.contradictions.iter().find(|s| {
            (s.first == a && s.second == b) || (s.first == b && s.second == a)
        })
    }
}

impl Default for MockJudge {
    fn default() -> Self {
        Self::new("mock-judge")
    }
}

#[async_trait]
impl SemanticJudge for MockJudge {
    fn id(&self) -> &str {
        &self.judge_id
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn classify_coherence(
        &self,
        candidate: &RuleContent,
        comparisons: &[RuleContent],
    ) -> Result<Vec<CoherenceVerdict>, JudgeError> {
        self.check_health()?;

        let candidate = candidate.to_string();
        let verdicts = comparisons
            .iter()
            .enumerate()
            .map(|(index, comparison)| {
                match self.scripted_contradiction(&candidate, &comparison.to_string()) {
                    Some(script) => CoherenceVerdict {
                        comparison_index: index,
                        relatedness_severity: script.relatedness,
                        contradiction_severity: script.contradiction,
                        rationale: script.rationale.clone(),
                    },
                    None => CoherenceVerdict {
                        comparison_index: index,
                        relatedness_severity: 1,
                        contradiction_severity: 1,
                        rationale: "No meaningful overlap".to_string(),
                    },
                }
            })
            .collect();

        Ok(verdicts)
    }

    async fn classify_connection(
        &self,
        candidates: &[RuleContent],
        comparisons: &[RuleContent],
    ) -> Result<Vec<ConnectionVerdict>, JudgeError> {
        self.check_health()?;

        let rendered: Vec<String> = candidates
            .iter()
            .chain(comparisons.iter())
            .map(|rule| rule.to_string())
            .collect();

        let verdicts = self
            .connections
            .iter()
            .filter_map(|script| {
                let source_index = rendered.iter().position(|r| *r == script.source)?;
                let target_index = rendered.iter().position(|r| *r == script.target)?;
                Some(ConnectionVerdict {
                    source_index,
                    target_index,
                    score: script.score,
                })
            })
            .collect();

        Ok(verdicts)
    }
}
