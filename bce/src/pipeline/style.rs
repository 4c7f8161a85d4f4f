//! Style-guide evaluation sub-pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use arbiter::{RetryPolicy, SemanticJudge};
use rulebook::{RuleContent, StyleGuideStore};

use crate::config::CheckConfig;
use crate::pipeline::coherence::{self, CoherenceChecker};
use crate::tasks::ProgressTracker;
use crate::types::{BceError, PayloadOperation, Result, StyleGuideData, StyleGuidePayload};

/// Evaluates the style-guide payloads of one submission.
///
/// Style guides have no connection semantics, so this is a single
/// coherence pass plus attribution.
pub struct StyleGuideEvaluator {
    checker: CoherenceChecker,
    store: Arc<dyn StyleGuideStore>,
}

impl StyleGuideEvaluator {
    /// Create an evaluator over the given judge and style-guide store.
    pub fn new(
        config: CheckConfig,
        retry: RetryPolicy,
        judge: Arc<dyn SemanticJudge>,
        store: Arc<dyn StyleGuideStore>,
    ) -> Self {
        Self {
            checker: CoherenceChecker::new(config, retry, judge),
            store,
        }
    }

    /// Evaluate payloads, keyed by submission index, against the owner's
    /// existing style guides. Returns findings for every input index.
    pub async fn evaluate(
        &self,
        owner_id: &str,
        payloads: &[(usize, StyleGuidePayload)],
        limiter: Arc<Semaphore>,
        progress: Arc<ProgressTracker>,
    ) -> Result<HashMap<usize, StyleGuideData>> {
        if payloads.is_empty() {
            return Ok(HashMap::new());
        }

        let existing = self.store.list(owner_id).await?;

        let mut unmatched_ids: HashSet<&str> = payloads
            .iter()
            .filter(|(_, p)| p.operation == PayloadOperation::Update)
            .filter_map(|(_, p)| p.updated_id.as_deref())
            .collect();

        let mut existing_contents = Vec::with_capacity(existing.len());
        for rule in &existing {
            if unmatched_ids.remove(rule.id.as_str()) {
                continue;
            }
            existing_contents.push(RuleContent::StyleGuide(rule.content.clone()));
        }

        if !unmatched_ids.is_empty() {
            let mut ids: Vec<&str> = unmatched_ids.into_iter().collect();
            ids.sort_unstable();
            return Err(BceError::Evaluation(format!(
                "Style guide ID(s): {} in '{}' agent do not exist.",
                ids.join(", "),
                owner_id
            )));
        }

        let to_evaluate: Vec<RuleContent> = payloads
            .iter()
            .filter(|(_, p)| p.coherence_check)
            .map(|(_, p)| RuleContent::StyleGuide(p.content.clone()))
            .collect();
        let comparisons: Vec<RuleContent> = payloads
            .iter()
            .filter(|(_, p)| !p.coherence_check)
            .map(|(_, p)| RuleContent::StyleGuide(p.content.clone()))
            .chain(existing_contents.iter().cloned())
            .collect();

        let incoherences = self
            .checker
            .evaluate(&to_evaluate, &comparisons, limiter, progress)
            .await?;

        let submitted: Vec<RuleContent> = payloads
            .iter()
            .map(|(_, p)| RuleContent::StyleGuide(p.content.clone()))
            .collect();

        let mut results = HashMap::with_capacity(payloads.len());
        for (index, payload) in payloads {
            let content = RuleContent::StyleGuide(payload.content.clone());

            let coherence_checks = if payload.coherence_check {
                coherence::attribute_findings(&content, &incoherences, &submitted)
            } else {
                Vec::new()
            };

            results.insert(*index, StyleGuideData { coherence_checks });
        }

        debug!(
            owner_id = %owner_id,
            payload_count = payloads.len(),
            "Style guide evaluation finished"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EvaluationStore, MemoryEvaluationStore};
    use crate::types::{CoherenceKind, GuidelinePayload, Payload};
    use arbiter::MockJudge;
    use rulebook::{GuidelineContent, MemoryStyleGuideStore, StyleGuideContent};
    use std::time::Duration;

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    async fn progress() -> Arc<ProgressTracker> {
        let store = Arc::new(MemoryEvaluationStore::new());
        let evaluation = store
            .create(
                "agent-1",
                vec![Payload::from(GuidelinePayload::add(GuidelineContent::new(
                    "x", "y",
                )))],
            )
            .await
            .unwrap();
        Arc::new(ProgressTracker::new(
            store as Arc<dyn EvaluationStore>,
            &evaluation.id,
        ))
    }

    #[tokio::test]
    async fn test_contradiction_with_existing_style_guide() {
        let store = Arc::new(MemoryStyleGuideStore::new());
        let stored = store
            .create("agent-1", StyleGuideContent::new("be brief", vec![]))
            .await
            .unwrap();

        let proposed = StyleGuideContent::new("always elaborate at length", vec![]);
        let judge = MockJudge::default().with_contradiction(
            &RuleContent::StyleGuide(stored.content.clone()),
            &RuleContent::StyleGuide(proposed.clone()),
            9,
            9,
            "brevity vs elaboration",
        );

        let evaluator = StyleGuideEvaluator::new(
            CheckConfig::default(),
            quick_retry(),
            Arc::new(judge),
            store as Arc<dyn StyleGuideStore>,
        );

        let data = evaluator
            .evaluate(
                "agent-1",
                &[(0, StyleGuidePayload::add(proposed))],
                Arc::new(Semaphore::new(4)),
                progress().await,
            )
            .await
            .unwrap();

        assert_eq!(data[&0].coherence_checks.len(), 1);
        assert_eq!(
            data[&0].coherence_checks[0].kind,
            CoherenceKind::ContradictionWithExisting
        );
    }

    #[tokio::test]
    async fn test_dangling_update_id_names_the_kind() {
        let store = Arc::new(MemoryStyleGuideStore::new());
        let evaluator = StyleGuideEvaluator::new(
            CheckConfig::default(),
            quick_retry(),
            Arc::new(MockJudge::default()),
            store as Arc<dyn StyleGuideStore>,
        );

        let payload =
            StyleGuidePayload::update("gone", StyleGuideContent::new("be brief", vec![]));
        let result = evaluator
            .evaluate(
                "agent-1",
                &[(0, payload)],
                Arc::new(Semaphore::new(4)),
                progress().await,
            )
            .await;

        match result {
            Err(BceError::Evaluation(message)) => assert_eq!(
                message,
                "Style guide ID(s): gone in 'agent-1' agent do not exist."
            ),
            other => panic!("expected evaluation error, got {:?}", other.map(|_| ())),
        }
    }
}
