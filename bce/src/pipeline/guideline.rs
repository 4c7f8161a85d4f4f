//! Guideline evaluation sub-pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use arbiter::{RetryPolicy, SemanticJudge};
use rulebook::{GuidelineStore, RuleContent};

use crate::config::CheckConfig;
use crate::pipeline::coherence::{self, CoherenceChecker};
use crate::pipeline::connection::{self, ConnectionProposer};
use crate::tasks::ProgressTracker;
use crate::types::{BceError, GuidelineData, GuidelinePayload, PayloadOperation, Result};

/// Evaluates the guideline payloads of one submission.
///
/// Runs the coherence and connection passes concurrently over the same
/// inputs, then attributes findings back to payloads by content equality.
pub struct GuidelineEvaluator {
    checker: Arc<CoherenceChecker>,
    proposer: Arc<ConnectionProposer>,
    store: Arc<dyn GuidelineStore>,
}

impl GuidelineEvaluator {
    /// Create an evaluator over the given judge and guideline store.
    pub fn new(
        config: CheckConfig,
        retry: RetryPolicy,
        judge: Arc<dyn SemanticJudge>,
        store: Arc<dyn GuidelineStore>,
    ) -> Self {
        Self {
            checker: Arc::new(CoherenceChecker::new(
                config.clone(),
                retry,
                Arc::clone(&judge),
            )),
            proposer: Arc::new(ConnectionProposer::new(config, retry, judge)),
            store,
        }
    }

    /// Evaluate payloads, keyed by submission index, against the owner's
    /// existing guidelines. Returns findings for every input index.
    pub async fn evaluate(
        &self,
        owner_id: &str,
        payloads: &[(usize, GuidelinePayload)],
        limiter: Arc<Semaphore>,
        progress: Arc<ProgressTracker>,
    ) -> Result<HashMap<usize, GuidelineData>> {
        if payloads.is_empty() {
            return Ok(HashMap::new());
        }

        let existing = self.store.list(owner_id).await?;

        // An update replaces its target, so the target is excluded from the
        // comparison material. Any updated id left unmatched means the rule
        // vanished between validation and execution.
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
            existing_contents.push(RuleContent::Guideline(rule.content.clone()));
        }

        if !unmatched_ids.is_empty() {
            let mut ids: Vec<&str> = unmatched_ids.into_iter().collect();
            ids.sort_unstable();
            return Err(BceError::Evaluation(format!(
                "Guideline ID(s): {} in '{}' agent do not exist.",
                ids.join(", "),
                owner_id
            )));
        }

        let to_evaluate: Vec<RuleContent> = payloads
            .iter()
            .filter(|(_, p)| p.coherence_check)
            .map(|(_, p)| RuleContent::Guideline(p.content.clone()))
            .collect();
        let coherence_comparisons: Vec<RuleContent> = payloads
            .iter()
            .filter(|(_, p)| !p.coherence_check)
            .map(|(_, p)| RuleContent::Guideline(p.content.clone()))
            .chain(existing_contents.iter().cloned())
            .collect();

        let to_connect: Vec<RuleContent> = payloads
            .iter()
            .filter(|(_, p)| p.connection_proposition)
            .map(|(_, p)| RuleContent::Guideline(p.content.clone()))
            .collect();
        let connection_comparisons: Vec<RuleContent> = payloads
            .iter()
            .filter(|(_, p)| !p.connection_proposition)
            .map(|(_, p)| RuleContent::Guideline(p.content.clone()))
            .chain(existing_contents.iter().cloned())
            .collect();

        // Two independent read-only passes over the same material
        let coherence_handle = tokio::spawn({
            let checker = Arc::clone(&self.checker);
            let limiter = Arc::clone(&limiter);
            let progress = Arc::clone(&progress);
            async move {
                checker
                    .evaluate(&to_evaluate, &coherence_comparisons, limiter, progress)
                    .await
            }
        });
        let connection_handle = tokio::spawn({
            let proposer = Arc::clone(&self.proposer);
            let limiter = Arc::clone(&limiter);
            let progress = Arc::clone(&progress);
            async move {
                proposer
                    .propose(&to_connect, &connection_comparisons, limiter, progress)
                    .await
            }
        });

        let incoherences = coherence_handle
            .await
            .map_err(|e| BceError::Internal(format!("coherence pass panicked: {e}")))??;
        let entailments = connection_handle
            .await
            .map_err(|e| BceError::Internal(format!("connection pass panicked: {e}")))??;

        let submitted: Vec<RuleContent> = payloads
            .iter()
            .map(|(_, p)| RuleContent::Guideline(p.content.clone()))
            .collect();

        let mut results = HashMap::with_capacity(payloads.len());
        for (index, payload) in payloads {
            let content = RuleContent::Guideline(payload.content.clone());

            let coherence_checks = if payload.coherence_check {
                coherence::attribute_findings(&content, &incoherences, &submitted)
            } else {
                Vec::new()
            };

            // None means propositions were not requested, as opposed to
            // requested and none found
            let connection_propositions = if payload.connection_proposition {
                Some(connection::attribute_findings(
                    &content,
                    &entailments,
                    &submitted,
                ))
            } else {
                None
            };

            results.insert(
                *index,
                GuidelineData {
                    coherence_checks,
                    connection_propositions,
                },
            );
        }

        debug!(
            owner_id = %owner_id,
            payload_count = payloads.len(),
            "Guideline evaluation finished"
        );
        Ok(results)
    }
}
