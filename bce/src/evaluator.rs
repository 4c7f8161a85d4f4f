//! Behavioral change evaluator - the pipeline orchestrator.
//!
//! Turns a validated batch of payloads into a background evaluation task,
//! enforces single-flight execution through the store, runs the per-kind
//! sub-pipelines concurrently and assembles invoices in submission order.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::info;

use arbiter::SemanticJudge;
use rulebook::{checksum_of, GuidelineContent, GuidelineStore, StyleGuideContent, StyleGuideStore};

use crate::config::BceConfig;
use crate::pipeline::{GuidelineEvaluator, StyleGuideEvaluator};
use crate::store::{EvaluationPatch, EvaluationStore};
use crate::tasks::{ProgressTracker, TaskRunner};
use crate::types::{
    BceError, Evaluation, EvaluationStatus, Invoice, InvoiceData, Payload, PayloadOperation,
    Result,
};

/// Orchestrates the propose/evaluate stage.
///
/// Submission validates synchronously and returns an evaluation id; the
/// evaluation itself runs in the background and is observed by polling.
#[derive(Clone)]
pub struct BehavioralChangeEvaluator {
    config: BceConfig,
    evaluations: Arc<dyn EvaluationStore>,
    guidelines: Arc<dyn GuidelineStore>,
    style_guides: Arc<dyn StyleGuideStore>,
    judge: Arc<dyn SemanticJudge>,
    runner: Arc<TaskRunner>,
}

impl BehavioralChangeEvaluator {
    /// Create an evaluator over the given stores and judge.
    pub fn new(
        config: BceConfig,
        evaluations: Arc<dyn EvaluationStore>,
        guidelines: Arc<dyn GuidelineStore>,
        style_guides: Arc<dyn StyleGuideStore>,
        judge: Arc<dyn SemanticJudge>,
    ) -> Self {
        Self {
            config,
            evaluations,
            guidelines,
            style_guides,
            judge,
            runner: Arc::new(TaskRunner::new()),
        }
    }

    /// Validate a batch, persist a pending evaluation and schedule its run.
    ///
    /// Returns the evaluation id immediately; the run is fire-and-forget
    /// from the caller's point of view.
    pub async fn create_evaluation_task(
        &self,
        owner_id: &str,
        payloads: Vec<Payload>,
    ) -> Result<String> {
        self.validate(owner_id, &payloads).await?;

        let evaluation = self.evaluations.create(owner_id, payloads).await?;
        info!(
            evaluation_id = %evaluation.id,
            owner_id = %owner_id,
            payload_count = evaluation.invoices.len(),
            "Evaluation task created"
        );

        let task = self.clone();
        let run_id = evaluation.id.clone();
        self.runner
            .spawn(evaluation.id.clone(), async move {
                task.run_evaluation(run_id).await
            })
            .await;

        Ok(evaluation.id)
    }

    /// Read one evaluation by id.
    pub async fn read_evaluation(&self, evaluation_id: &str) -> Result<Evaluation> {
        self.evaluations.read(evaluation_id).await
    }

    /// List every evaluation.
    pub async fn list_evaluations(&self) -> Result<Vec<Evaluation>> {
        self.evaluations.list().await
    }

    /// Poll until the evaluation reaches a terminal status.
    pub async fn await_completion(
        &self,
        evaluation_id: &str,
        timeout: Duration,
    ) -> Result<Evaluation> {
        let deadline = Instant::now() + timeout;
        loop {
            let evaluation = self.read_evaluation(evaluation_id).await?;
            if evaluation.status.is_terminal() {
                return Ok(evaluation);
            }
            if Instant::now() >= deadline {
                return Err(BceError::Timeout(evaluation_id.to_string()));
            }
            tokio::time::sleep(self.config.polling.interval()).await;
        }
    }

    /// Reject malformed batches before any background work is scheduled.
    async fn validate(&self, owner_id: &str, payloads: &[Payload]) -> Result<()> {
        if payloads.is_empty() {
            return Err(BceError::Validation(
                "No payloads provided for the evaluation task".to_string(),
            ));
        }

        let mut guideline_contents: HashSet<&GuidelineContent> = HashSet::new();
        let mut style_contents: HashSet<&StyleGuideContent> = HashSet::new();

        for payload in payloads {
            if payload.operation() == PayloadOperation::Update && payload.updated_id().is_none() {
                return Err(BceError::Validation(format!(
                    "{} update payload is missing the id of the rule it updates",
                    payload.kind().display_name()
                )));
            }

            match payload {
                Payload::Guideline(p) => {
                    if !guideline_contents.insert(&p.content) {
                        return Err(BceError::Validation(
                            "Duplicate guideline found among the provided guidelines."
                                .to_string(),
                        ));
                    }
                }
                Payload::StyleGuide(p) => {
                    if !style_contents.insert(&p.content) {
                        return Err(BceError::Validation(
                            "Duplicate style guide found among the provided style guides."
                                .to_string(),
                        ));
                    }
                }
            }
        }

        if !guideline_contents.is_empty() {
            let existing = self.guidelines.list(owner_id).await?;
            if existing
                .iter()
                .any(|rule| guideline_contents.contains(&rule.content))
            {
                return Err(BceError::Validation(
                    "Duplicate guideline found among the existing guidelines.".to_string(),
                ));
            }
        }
        if !style_contents.is_empty() {
            let existing = self.style_guides.list(owner_id).await?;
            if existing
                .iter()
                .any(|rule| style_contents.contains(&rule.content))
            {
                return Err(BceError::Validation(
                    "Duplicate style guide found among the existing style guides.".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// The state machine body. Every path out of here leaves the evaluation
    /// Completed or Failed.
    async fn run_evaluation(self, evaluation_id: String) -> Result<()> {
        let evaluation = match self.evaluations.claim_running(&evaluation_id).await {
            Ok(evaluation) => evaluation,
            Err(e) => return self.fail(&evaluation_id, e).await,
        };

        info!(
            evaluation_id = %evaluation.id,
            owner_id = %evaluation.owner_id,
            "Evaluation started"
        );

        match self.execute(&evaluation).await {
            Ok(invoices) => {
                let approved_count = invoices.iter().filter(|i| i.approved).count();
                let invoice_count = invoices.len();
                self.evaluations
                    .update(
                        &evaluation.id,
                        EvaluationPatch::new()
                            .with_invoices(invoices)
                            .with_progress(100.0),
                    )
                    .await?;
                self.evaluations
                    .update(
                        &evaluation.id,
                        EvaluationPatch::new().with_status(EvaluationStatus::Completed),
                    )
                    .await?;
                info!(
                    evaluation_id = %evaluation.id,
                    invoice_count = invoice_count,
                    approved_count = approved_count,
                    "Evaluation completed"
                );
                Ok(())
            }
            Err(e) => self.fail(&evaluation_id, e).await,
        }
    }

    /// Record a failure. Operational errors are expected and absorbed;
    /// anything else is re-raised so the runner logs it.
    async fn fail(&self, evaluation_id: &str, error: BceError) -> Result<()> {
        let patch = EvaluationPatch::new()
            .with_status(EvaluationStatus::Failed)
            .with_error(error.to_string());

        if error.is_operational() {
            info!(evaluation_id = %evaluation_id, error = %error, "Evaluation failed");
            self.evaluations.update(evaluation_id, patch).await?;
            Ok(())
        } else {
            let _ = self.evaluations.update(evaluation_id, patch).await;
            Err(error)
        }
    }

    /// Run both per-kind sub-pipelines concurrently and assemble invoices
    /// by submission index, never by completion order.
    async fn execute(&self, evaluation: &Evaluation) -> Result<Vec<Invoice>> {
        let limiter = Arc::new(Semaphore::new(self.config.checks.max_concurrent_checks));
        let progress = Arc::new(ProgressTracker::new(
            Arc::clone(&self.evaluations),
            &evaluation.id,
        ));

        let mut guideline_payloads = Vec::new();
        let mut style_payloads = Vec::new();
        for (index, invoice) in evaluation.invoices.iter().enumerate() {
            match &invoice.payload {
                Payload::Guideline(p) => guideline_payloads.push((index, p.clone())),
                Payload::StyleGuide(p) => style_payloads.push((index, p.clone())),
            }
        }

        let retry = self.config.retry.policy();

        let guideline_handle = tokio::spawn({
            let evaluator = GuidelineEvaluator::new(
                self.config.checks.clone(),
                retry,
                Arc::clone(&self.judge),
                Arc::clone(&self.guidelines),
            );
            let owner_id = evaluation.owner_id.clone();
            let limiter = Arc::clone(&limiter);
            let progress = Arc::clone(&progress);
            async move {
                evaluator
                    .evaluate(&owner_id, &guideline_payloads, limiter, progress)
                    .await
            }
        });

        let style_handle = tokio::spawn({
            let evaluator = StyleGuideEvaluator::new(
                self.config.checks.clone(),
                retry,
                Arc::clone(&self.judge),
                Arc::clone(&self.style_guides),
            );
            let owner_id = evaluation.owner_id.clone();
            let limiter = Arc::clone(&limiter);
            let progress = Arc::clone(&progress);
            async move {
                evaluator
                    .evaluate(&owner_id, &style_payloads, limiter, progress)
                    .await
            }
        });

        // Let both passes finish before propagating either error, so a
        // failed evaluation never leaves a detached pass running
        let guideline_result = guideline_handle
            .await
            .map_err(|e| BceError::Internal(format!("guideline pass panicked: {e}")))?;
        let style_result = style_handle
            .await
            .map_err(|e| BceError::Internal(format!("style guide pass panicked: {e}")))?;
        let mut guideline_data = guideline_result?;
        let mut style_data = style_result?;

        let mut invoices = Vec::with_capacity(evaluation.invoices.len());
        for (index, invoice) in evaluation.invoices.iter().enumerate() {
            let payload = invoice.payload.clone();
            let data = match &payload {
                Payload::Guideline(_) => guideline_data.remove(&index).map(InvoiceData::Guideline),
                Payload::StyleGuide(_) => style_data.remove(&index).map(InvoiceData::StyleGuide),
            }
            .ok_or_else(|| {
                BceError::Internal(format!("no evaluation result for payload {index}"))
            })?;

            let checksum = checksum_of(&payload)?;
            let approved = data.coherence_checks().is_empty();

            invoices.push(Invoice {
                kind: payload.kind(),
                payload,
                checksum,
                approved,
                data: Some(data),
                error: None,
            });
        }

        Ok(invoices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEvaluationStore;
    use crate::types::{
        CoherenceKind, ConnectionKind, GuidelinePayload, StyleGuidePayload,
    };
    use arbiter::MockJudge;
    use rulebook::{MemoryGuidelineStore, MemoryStyleGuideStore, RuleContent};

    const AGENT: &str = "agent-1";
    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        evaluator: BehavioralChangeEvaluator,
        evaluations: Arc<MemoryEvaluationStore>,
        guidelines: Arc<MemoryGuidelineStore>,
        style_guides: Arc<MemoryStyleGuideStore>,
    }

    fn fixture(judge: MockJudge) -> Fixture {
        let mut config = BceConfig::default();
        config.retry.max_attempts = 3;
        config.retry.interval_ms = 1;
        config.polling.interval_ms = 10;

        let evaluations = Arc::new(MemoryEvaluationStore::new());
        let guidelines = Arc::new(MemoryGuidelineStore::new());
        let style_guides = Arc::new(MemoryStyleGuideStore::new());

        let evaluator = BehavioralChangeEvaluator::new(
            config,
            evaluations.clone() as Arc<dyn EvaluationStore>,
            guidelines.clone() as Arc<dyn GuidelineStore>,
            style_guides.clone() as Arc<dyn StyleGuideStore>,
            Arc::new(judge),
        );

        Fixture {
            evaluator,
            evaluations,
            guidelines,
            style_guides,
        }
    }

    fn guideline_payload(condition: &str, action: &str) -> Payload {
        Payload::from(GuidelinePayload::add(GuidelineContent::new(
            condition, action,
        )))
    }

    #[tokio::test]
    async fn test_single_payload_is_approved() {
        let fx = fixture(MockJudge::default());

        let id = fx
            .evaluator
            .create_evaluation_task(
                AGENT,
                vec![guideline_payload(
                    "the customer greets you",
                    "greet them back with 'Hello'",
                )],
            )
            .await
            .unwrap();

        let evaluation = fx.evaluator.await_completion(&id, WAIT).await.unwrap();

        assert_eq!(evaluation.status, EvaluationStatus::Completed);
        assert_eq!(evaluation.progress, 100.0);
        assert_eq!(evaluation.invoices.len(), 1);

        let invoice = &evaluation.invoices[0];
        assert!(invoice.approved);
        assert!(invoice
            .data
            .as_ref()
            .unwrap()
            .coherence_checks()
            .is_empty());
    }

    #[tokio::test]
    async fn test_contradictory_batch_is_flagged() {
        let a = GuidelineContent::new("the customer greets you", "greet back with Hello");
        let b = GuidelineContent::new("the customer greeting you", "greet back with Good bye");

        let judge = MockJudge::default().with_contradiction(
            &RuleContent::Guideline(a.clone()),
            &RuleContent::Guideline(b.clone()),
            9,
            9,
            "opposite greetings",
        );
        let fx = fixture(judge);

        let id = fx
            .evaluator
            .create_evaluation_task(
                AGENT,
                vec![
                    Payload::from(GuidelinePayload::add(a)),
                    Payload::from(GuidelinePayload::add(b)),
                ],
            )
            .await
            .unwrap();

        let evaluation = fx.evaluator.await_completion(&id, WAIT).await.unwrap();

        assert_eq!(evaluation.status, EvaluationStatus::Completed);
        assert_eq!(evaluation.invoices.len(), 2);
        assert!(evaluation.invoices.iter().any(|i| !i.approved));

        for invoice in &evaluation.invoices {
            let checks = invoice.data.as_ref().unwrap().coherence_checks();
            assert_eq!(checks.len(), 1);
            assert_eq!(checks[0].kind, CoherenceKind::ContradictionWithEvaluated);
            assert_eq!(checks[0].severity, 9);
        }
    }

    #[tokio::test]
    async fn test_coherence_optout_is_approved_despite_contradiction() {
        let a = GuidelineContent::new("the customer greets you", "greet back with Hello");
        let b = GuidelineContent::new("the customer greeting you", "greet back with Good bye");

        let judge = MockJudge::default().with_contradiction(
            &RuleContent::Guideline(a.clone()),
            &RuleContent::Guideline(b.clone()),
            9,
            9,
            "opposite greetings",
        );
        let fx = fixture(judge);

        let id = fx
            .evaluator
            .create_evaluation_task(
                AGENT,
                vec![
                    Payload::from(GuidelinePayload::add(a)),
                    Payload::from(GuidelinePayload::add(b).with_coherence_check(false)),
                ],
            )
            .await
            .unwrap();

        let evaluation = fx.evaluator.await_completion(&id, WAIT).await.unwrap();

        assert!(!evaluation.invoices[0].approved);
        assert!(evaluation.invoices[1].approved);
    }

    #[tokio::test]
    async fn test_resubmission_with_checks_disabled_is_idempotent() {
        let proposed = GuidelineContent::new("greeted", "say hello");
        let conflicting = GuidelineContent::new("greeted", "stay silent");

        let fx = fixture(MockJudge::default().with_contradiction(
            &RuleContent::Guideline(proposed.clone()),
            &RuleContent::Guideline(conflicting.clone()),
            9,
            9,
            "opposite replies",
        ));
        fx.guidelines.create(AGENT, conflicting).await.unwrap();

        let mut checksums = Vec::new();
        for _ in 0..2 {
            let id = fx
                .evaluator
                .create_evaluation_task(
                    AGENT,
                    vec![Payload::from(
                        GuidelinePayload::add(proposed.clone()).with_coherence_check(false),
                    )],
                )
                .await
                .unwrap();

            let evaluation = fx.evaluator.await_completion(&id, WAIT).await.unwrap();
            assert_eq!(evaluation.status, EvaluationStatus::Completed);
            assert!(evaluation.invoices.iter().all(|i| i.approved));
            checksums.push(evaluation.invoices[0].checksum.clone());
        }

        assert_eq!(checksums[0], checksums[1]);
    }

    #[tokio::test]
    async fn test_connection_with_existing_rule() {
        let existing =
            GuidelineContent::new("the customer asks about the weather", "provide weather update");
        let proposed =
            GuidelineContent::new("providing the weather update", "mention best time to walk");

        let judge = MockJudge::default().with_connection(
            &RuleContent::Guideline(existing.clone()),
            &RuleContent::Guideline(proposed.clone()),
            8,
        );
        let fx = fixture(judge);
        fx.guidelines.create(AGENT, existing.clone()).await.unwrap();

        let id = fx
            .evaluator
            .create_evaluation_task(
                AGENT,
                vec![Payload::from(
                    GuidelinePayload::add(proposed.clone()).with_connection_proposition(true),
                )],
            )
            .await
            .unwrap();

        let evaluation = fx.evaluator.await_completion(&id, WAIT).await.unwrap();
        assert_eq!(evaluation.status, EvaluationStatus::Completed);

        let invoice = &evaluation.invoices[0];
        assert!(invoice.approved);

        let propositions = invoice
            .data
            .as_ref()
            .unwrap()
            .connection_propositions()
            .unwrap();
        assert_eq!(propositions.len(), 1);
        assert_eq!(propositions[0].check_kind, ConnectionKind::ConnectionWithExisting);
        assert_eq!(propositions[0].source, RuleContent::Guideline(existing));
        assert_eq!(propositions[0].target, RuleContent::Guideline(proposed));
    }

    #[tokio::test]
    async fn test_dangling_update_id_fails_evaluation() {
        let fx = fixture(MockJudge::default());

        // Validation lets it through; existence is checked during the run
        let id = fx
            .evaluator
            .create_evaluation_task(
                AGENT,
                vec![Payload::from(GuidelinePayload::update(
                    "no-such-id",
                    GuidelineContent::new("a", "b"),
                ))],
            )
            .await
            .unwrap();

        let evaluation = fx.evaluator.await_completion(&id, WAIT).await.unwrap();

        assert_eq!(evaluation.status, EvaluationStatus::Failed);
        assert_eq!(
            evaluation.error.as_deref(),
            Some("Guideline ID(s): no-such-id in 'agent-1' agent do not exist.")
        );
    }

    #[tokio::test]
    async fn test_empty_batch_fails_validation() {
        let fx = fixture(MockJudge::default());

        let result = fx.evaluator.create_evaluation_task(AGENT, vec![]).await;
        match result {
            Err(BceError::Validation(message)) => {
                assert_eq!(message, "No payloads provided for the evaluation task");
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        assert!(fx.evaluations.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_payloads_fail_validation() {
        let fx = fixture(MockJudge::default());

        let result = fx
            .evaluator
            .create_evaluation_task(
                AGENT,
                vec![guideline_payload("a", "b"), guideline_payload("a", "b")],
            )
            .await;
        match result {
            Err(BceError::Validation(message)) => assert_eq!(
                message,
                "Duplicate guideline found among the provided guidelines."
            ),
            other => panic!("expected validation error, got {:?}", other),
        }

        let style = StyleGuidePayload::add(StyleGuideContent::new("be brief", vec![]));
        let result = fx
            .evaluator
            .create_evaluation_task(
                AGENT,
                vec![
                    Payload::from(style.clone()),
                    Payload::from(style),
                ],
            )
            .await;
        match result {
            Err(BceError::Validation(message)) => assert_eq!(
                message,
                "Duplicate style guide found among the provided style guides."
            ),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_of_existing_fails_validation() {
        let fx = fixture(MockJudge::default());
        fx.guidelines
            .create(AGENT, GuidelineContent::new("greeted", "say hello"))
            .await
            .unwrap();

        let result = fx
            .evaluator
            .create_evaluation_task(AGENT, vec![guideline_payload("greeted", "say hello")])
            .await;

        match result {
            Err(BceError::Validation(message)) => assert_eq!(
                message,
                "Duplicate guideline found among the existing guidelines."
            ),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_without_id_fails_validation() {
        let fx = fixture(MockJudge::default());

        let payload = Payload::Guideline(GuidelinePayload {
            content: GuidelineContent::new("a", "b"),
            operation: PayloadOperation::Update,
            updated_id: None,
            coherence_check: true,
            connection_proposition: false,
        });

        let result = fx.evaluator.create_evaluation_task(AGENT, vec![payload]).await;
        match result {
            Err(BceError::Validation(message)) => {
                assert!(message.contains("missing the id"), "got: {message}");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_flight_is_enforced() {
        let fx = fixture(MockJudge::default());

        // A crashed run can leave a Running row behind; the slot stays held
        let blocker = fx
            .evaluations
            .create(AGENT, vec![guideline_payload("x", "y")])
            .await
            .unwrap();
        fx.evaluations.claim_running(&blocker.id).await.unwrap();

        let id = fx
            .evaluator
            .create_evaluation_task(AGENT, vec![guideline_payload("a", "b")])
            .await
            .unwrap();
        let evaluation = fx.evaluator.await_completion(&id, WAIT).await.unwrap();

        assert_eq!(evaluation.status, EvaluationStatus::Failed);
        assert_eq!(
            evaluation.error,
            Some(format!(
                "an evaluation task '{}' is already running",
                blocker.id
            ))
        );

        // Freeing the slot lets new work through
        fx.evaluations
            .update(
                &blocker.id,
                EvaluationPatch::new().with_status(EvaluationStatus::Failed),
            )
            .await
            .unwrap();

        let id = fx
            .evaluator
            .create_evaluation_task(AGENT, vec![guideline_payload("c", "d")])
            .await
            .unwrap();
        let evaluation = fx.evaluator.await_completion(&id, WAIT).await.unwrap();
        assert_eq!(evaluation.status, EvaluationStatus::Completed);
    }

    #[tokio::test]
    async fn test_invoice_order_matches_submission() {
        let fx = fixture(MockJudge::default());

        let payloads = vec![
            guideline_payload("first condition", "first action"),
            Payload::from(StyleGuidePayload::add(StyleGuideContent::new(
                "be brief",
                vec![],
            ))),
            guideline_payload("third condition", "third action"),
        ];

        let id = fx
            .evaluator
            .create_evaluation_task(AGENT, payloads.clone())
            .await
            .unwrap();
        let evaluation = fx.evaluator.await_completion(&id, WAIT).await.unwrap();

        assert_eq!(evaluation.status, EvaluationStatus::Completed);
        assert_eq!(evaluation.invoices.len(), payloads.len());
        for (invoice, payload) in evaluation.invoices.iter().zip(&payloads) {
            assert_eq!(&invoice.payload, payload);
            assert_eq!(invoice.kind, payload.kind());
            assert_eq!(invoice.checksum, checksum_of(payload).unwrap());
        }
    }
}
