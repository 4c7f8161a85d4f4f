//! Pairwise contradiction analysis.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use arbiter::{JudgeError, RetryPolicy, SemanticJudge};
use rulebook::RuleContent;

use crate::config::CheckConfig;
use crate::tasks::ProgressTracker;
use crate::types::{BceError, CoherenceCheck, CoherenceKind, Result};

/// A contradiction between two rules, not yet attributed to a payload.
#[derive(Debug, Clone)]
pub struct IncoherenceFinding {
    /// The candidate side of the pair
    pub first: RuleContent,
    /// The comparison side of the pair
    pub second: RuleContent,
    /// The judge's rationale
    pub issue: String,
    /// Contradiction severity, 1..=10
    pub severity: u8,
}

/// Drives the judge over candidate/comparison batches and keeps findings
/// above the severity thresholds.
///
/// A finding requires two independent judgments to pass: the pair must be
/// sufficiently related AND sufficiently conflicting. An unrelated pair is
/// never a contradiction, whatever its conflict score.
pub struct CoherenceChecker {
    judge: Arc<dyn SemanticJudge>,
    retry: RetryPolicy,
    config: CheckConfig,
}

impl CoherenceChecker {
    /// Create a checker over the given judge.
    pub fn new(config: CheckConfig, retry: RetryPolicy, judge: Arc<dyn SemanticJudge>) -> Self {
        Self {
            judge,
            retry,
            config,
        }
    }

    /// Compare every candidate against every later candidate and the full
    /// comparison set, one judge call per (candidate, batch) pair.
    ///
    /// Comparing only against later candidates means each unordered pair is
    /// judged exactly once. All batch tasks run concurrently under the
    /// shared limiter; transient judge failures retry inside the task.
    pub async fn evaluate(
        &self,
        candidates: &[RuleContent],
        comparison_set: &[RuleContent],
        limiter: Arc<Semaphore>,
        progress: Arc<ProgressTracker>,
    ) -> Result<Vec<IncoherenceFinding>> {
        let mut work = Vec::new();
        for (index, candidate) in candidates.iter().enumerate() {
            let material: Vec<RuleContent> = candidates[index + 1..]
                .iter()
                .chain(comparison_set.iter())
                .cloned()
                .collect();
            for batch in material.chunks(self.config.batch_size.max(1)) {
                work.push((candidate.clone(), batch.to_vec()));
            }
        }

        progress.add_total(work.len());

        let mut handles = Vec::with_capacity(work.len());
        for (candidate, batch) in work {
            let judge = Arc::clone(&self.judge);
            let retry = self.retry;
            let limiter = Arc::clone(&limiter);
            let progress = Arc::clone(&progress);
            let relatedness_threshold = self.config.relatedness_threshold;
            let contradiction_threshold = self.config.contradiction_threshold;

            handles.push(tokio::spawn(async move {
                let _permit = limiter
                    .acquire()
                    .await
                    .map_err(|e| BceError::Internal(format!("limiter closed: {e}")))?;

                let verdicts = retry
                    .run(|| judge.classify_coherence(&candidate, &batch))
                    .await?;

                let mut findings = Vec::new();
                for verdict in verdicts {
                    let comparison = batch.get(verdict.comparison_index).ok_or_else(|| {
                        BceError::Judge(JudgeError::ParseError(format!(
                            "comparison index {} out of range",
                            verdict.comparison_index
                        )))
                    })?;

                    if verdict.relatedness_severity >= relatedness_threshold
                        && verdict.contradiction_severity >= contradiction_threshold
                    {
                        findings.push(IncoherenceFinding {
                            first: candidate.clone(),
                            second: comparison.clone(),
                            issue: verdict.rationale,
                            severity: verdict.contradiction_severity,
                        });
                    }
                }

                progress.tick().await?;
                Ok::<_, BceError>(findings)
            }));
        }

        let mut findings = Vec::new();
        for handle in handles {
            let batch_findings = handle
                .await
                .map_err(|e| BceError::Internal(format!("coherence task panicked: {e}")))??;
            findings.extend(batch_findings);
        }

        debug!(finding_count = findings.len(), "Coherence evaluation finished");
        Ok(findings)
    }
}

/// Attach to one payload the findings whose either side equals its content.
///
/// The kind records whether the other side of the pair is another payload
/// from the same submission or an already-committed rule.
pub fn attribute_findings(
    content: &RuleContent,
    findings: &[IncoherenceFinding],
    submitted: &[RuleContent],
) -> Vec<CoherenceCheck> {
    findings
        .iter()
        .filter_map(|finding| {
            let other = if finding.first == *content {
                &finding.second
            } else if finding.second == *content {
                &finding.first
            } else {
                return None;
            };

            let kind = if submitted.contains(other) {
                CoherenceKind::ContradictionWithEvaluated
            } else {
                CoherenceKind::ContradictionWithExisting
            };

            Some(CoherenceCheck {
                kind,
                first: finding.first.clone(),
                second: finding.second.clone(),
                issue: finding.issue.clone(),
                severity: finding.severity,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EvaluationStore, MemoryEvaluationStore};
    use crate::types::{GuidelinePayload, Payload};
    use arbiter::MockJudge;
    use rulebook::GuidelineContent;
    use std::time::Duration;

    fn guideline(condition: &str, action: &str) -> RuleContent {
        RuleContent::Guideline(GuidelineContent::new(condition, action))
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    async fn tracker() -> (Arc<MemoryEvaluationStore>, Arc<ProgressTracker>) {
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
        let progress = Arc::new(ProgressTracker::new(
            store.clone() as Arc<dyn EvaluationStore>,
            &evaluation.id,
        ));
        (store, progress)
    }

    #[tokio::test]
    async fn test_both_thresholds_gate_findings() {
        let a = guideline("the customer greets you", "greet them back");
        let b = guideline("the customer says hello", "ignore them");
        let c = guideline("asked about pricing", "never quote prices");

        // Related and conflicting: kept. Conflicting but unrelated: dropped.
        let judge = MockJudge::default()
            .with_contradiction(&a, &b, 9, 8, "opposite replies")
            .with_contradiction(&a, &c, 2, 9, "irrelevant clash");

        let checker = CoherenceChecker::new(CheckConfig::default(), quick_retry(), Arc::new(judge));
        let (_, progress) = tracker().await;

        let findings = checker
            .evaluate(
                std::slice::from_ref(&a),
                &[b.clone(), c],
                Arc::new(Semaphore::new(4)),
                progress,
            )
            .await
            .unwrap();

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].second, b);
        assert_eq!(findings[0].severity, 8);
    }

    #[tokio::test]
    async fn test_candidate_pairs_are_judged_once() {
        let a = guideline("greeted", "say hello");
        let b = guideline("greeted warmly", "say goodbye");

        let judge = MockJudge::default().with_contradiction(&a, &b, 9, 9, "conflict");
        let checker = CoherenceChecker::new(CheckConfig::default(), quick_retry(), Arc::new(judge));
        let (_, progress) = tracker().await;

        let findings = checker
            .evaluate(
                &[a.clone(), b.clone()],
                &[],
                Arc::new(Semaphore::new(4)),
                progress,
            )
            .await
            .unwrap();

        // One finding for the unordered pair, from the earlier candidate's
        // pass over later candidates
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].first, a);
        assert_eq!(findings[0].second, b);
    }

    #[tokio::test]
    async fn test_comparison_set_is_chunked() {
        let candidate = guideline("x", "y");
        let comparisons: Vec<RuleContent> = (0..7)
            .map(|i| guideline(&format!("condition {i}"), &format!("action {i}")))
            .collect();

        let judge = Arc::new(MockJudge::default());
        let config = CheckConfig {
            batch_size: 3,
            ..CheckConfig::default()
        };
        let checker = CoherenceChecker::new(config, quick_retry(), Arc::clone(&judge) as Arc<dyn SemanticJudge>);
        let (_, progress) = tracker().await;

        checker
            .evaluate(
                std::slice::from_ref(&candidate),
                &comparisons,
                Arc::new(Semaphore::new(4)),
                progress,
            )
            .await
            .unwrap();

        // 7 comparisons at batch size 3: three judge calls
        assert_eq!(judge.call_count(), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let a = guideline("greeted", "say hello");
        let b = guideline("greeted", "stay silent");

        let judge = Arc::new(
            MockJudge::default()
                .with_contradiction(&a, &b, 9, 9, "conflict")
                .with_transient_failures(1),
        );
        let checker = CoherenceChecker::new(
            CheckConfig::default(),
            quick_retry(),
            Arc::clone(&judge) as Arc<dyn SemanticJudge>,
        );
        let (_, progress) = tracker().await;

        let findings = checker
            .evaluate(
                std::slice::from_ref(&a),
                std::slice::from_ref(&b),
                Arc::new(Semaphore::new(4)),
                progress,
            )
            .await
            .unwrap();

        assert_eq!(findings.len(), 1);
        assert_eq!(judge.call_count(), 2);
    }

    #[test]
    fn test_attribution_distinguishes_evaluated_from_existing() {
        let mine = guideline("greeted", "say hello");
        let peer = guideline("greeted", "stay silent");
        let existing = guideline("saying hello", "use formal address");

        let findings = vec![
            IncoherenceFinding {
                first: mine.clone(),
                second: peer.clone(),
                issue: "conflict".to_string(),
                severity: 8,
            },
            IncoherenceFinding {
                first: mine.clone(),
                second: existing.clone(),
                issue: "conflict".to_string(),
                severity: 7,
            },
            IncoherenceFinding {
                first: peer.clone(),
                second: existing.clone(),
                issue: "unrelated to mine".to_string(),
                severity: 9,
            },
        ];

        let submitted = vec![mine.clone(), peer];
        let attached = attribute_findings(&mine, &findings, &submitted);

        assert_eq!(attached.len(), 2);
        assert_eq!(attached[0].kind, CoherenceKind::ContradictionWithEvaluated);
        assert_eq!(attached[1].kind, CoherenceKind::ContradictionWithExisting);
    }
}
