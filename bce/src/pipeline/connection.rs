//! Directional entailment analysis.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use arbiter::{JudgeError, RetryPolicy, SemanticJudge};
use rulebook::RuleContent;

use crate::config::CheckConfig;
use crate::tasks::ProgressTracker;
use crate::types::{BceError, ConnectionKind, ConnectionProposition, Result};

/// A directed entailment between two rules, not yet attributed.
#[derive(Debug, Clone)]
pub struct EntailmentFinding {
    /// The rule whose condition entails the target
    pub source: RuleContent,
    /// The rule entailed by the source
    pub target: RuleContent,
    /// Entailment score, 1..=10
    pub score: u8,
}

/// Drives the judge to propose entailment links between rules.
///
/// Same batching and fan-out shape as the coherence checker, but the judge
/// reports directed pairs within each call, so pairing a candidate against
/// a batch once covers both directions.
pub struct ConnectionProposer {
    judge: Arc<dyn SemanticJudge>,
    retry: RetryPolicy,
    config: CheckConfig,
}

impl ConnectionProposer {
    /// Create a proposer over the given judge.
    pub fn new(config: CheckConfig, retry: RetryPolicy, judge: Arc<dyn SemanticJudge>) -> Self {
        Self {
            judge,
            retry,
            config,
        }
    }

    /// Propose entailment links between candidates, later candidates and
    /// the comparison set. Scores below the threshold are discarded, and a
    /// rule is never linked to itself.
    pub async fn propose(
        &self,
        candidates: &[RuleContent],
        comparison_set: &[RuleContent],
        limiter: Arc<Semaphore>,
        progress: Arc<ProgressTracker>,
    ) -> Result<Vec<EntailmentFinding>> {
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
            let connection_threshold = self.config.connection_threshold;

            handles.push(tokio::spawn(async move {
                let _permit = limiter
                    .acquire()
                    .await
                    .map_err(|e| BceError::Internal(format!("limiter closed: {e}")))?;

                let candidates = vec![candidate];
                let verdicts = retry
                    .run(|| judge.classify_connection(&candidates, &batch))
                    .await?;

                let mut findings = Vec::new();
                for verdict in verdicts {
                    let source = indexed(&candidates, &batch, verdict.source_index)?;
                    let target = indexed(&candidates, &batch, verdict.target_index)?;

                    if verdict.score < connection_threshold || source == target {
                        continue;
                    }

                    findings.push(EntailmentFinding {
                        source: source.clone(),
                        target: target.clone(),
                        score: verdict.score,
                    });
                }

                progress.tick().await?;
                Ok::<_, BceError>(findings)
            }));
        }

        let mut findings = Vec::new();
        for handle in handles {
            let batch_findings = handle
                .await
                .map_err(|e| BceError::Internal(format!("connection task panicked: {e}")))??;
            findings.extend(batch_findings);
        }

        debug!(finding_count = findings.len(), "Connection proposal finished");
        Ok(findings)
    }
}

/// Resolve a verdict index over the shared candidate-then-batch numbering.
fn indexed<'a>(
    candidates: &'a [RuleContent],
    batch: &'a [RuleContent],
    index: usize,
) -> Result<&'a RuleContent> {
    if index < candidates.len() {
        return Ok(&candidates[index]);
    }
    batch.get(index - candidates.len()).ok_or_else(|| {
        BceError::Judge(JudgeError::ParseError(format!(
            "connection index {index} out of range"
        )))
    })
}

/// Attach to one payload the entailments whose either side equals its
/// content, preserving direction.
pub fn attribute_findings(
    content: &RuleContent,
    findings: &[EntailmentFinding],
    submitted: &[RuleContent],
) -> Vec<ConnectionProposition> {
    findings
        .iter()
        .filter_map(|finding| {
            let other = if finding.source == *content {
                &finding.target
            } else if finding.target == *content {
                &finding.source
            } else {
                return None;
            };

            let check_kind = if submitted.contains(other) {
                ConnectionKind::ConnectionWithEvaluated
            } else {
                ConnectionKind::ConnectionWithExisting
            };

            Some(ConnectionProposition {
                check_kind,
                source: finding.source.clone(),
                target: finding.target.clone(),
            })
        })
        .collect()
}
