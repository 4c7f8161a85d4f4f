//! Core types for the evaluation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rulebook::{GuidelineContent, RuleContent, StyleGuideContent};

/// Whether a payload adds a new rule or replaces an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadOperation {
    /// Create a new rule
    Add,
    /// Replace the content of the rule named by `updated_id`
    Update,
}

/// Kind discriminator shared by payloads and invoices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// Condition/action guideline
    Guideline,
    /// Stylistic principle
    StyleGuide,
}

impl PayloadKind {
    /// Human-readable kind name, as used in operator-facing messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Guideline => "Guideline",
            Self::StyleGuide => "Style guide",
        }
    }
}

/// A proposed guideline change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidelinePayload {
    /// The proposed content
    pub content: GuidelineContent,
    /// Add a new rule or update an existing one
    pub operation: PayloadOperation,
    /// Target rule id, required when operation is `Update`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_id: Option<String>,
    /// Whether this payload should be checked for contradictions
    pub coherence_check: bool,
    /// Whether entailment links should be proposed for this payload
    pub connection_proposition: bool,
}

impl GuidelinePayload {
    /// Propose adding a new guideline.
    pub fn add(content: GuidelineContent) -> Self {
        Self {
            content,
            operation: PayloadOperation::Add,
            updated_id: None,
            coherence_check: true,
            connection_proposition: false,
        }
    }

    /// Propose replacing the content of an existing guideline.
    pub fn update(updated_id: impl Into<String>, content: GuidelineContent) -> Self {
        Self {
            content,
            operation: PayloadOperation::Update,
            updated_id: Some(updated_id.into()),
            coherence_check: true,
            connection_proposition: false,
        }
    }

    /// Set whether the payload is checked for contradictions.
    pub fn with_coherence_check(mut self, coherence_check: bool) -> Self {
        self.coherence_check = coherence_check;
        self
    }

    /// Set whether entailment links are proposed for the payload.
    pub fn with_connection_proposition(mut self, connection_proposition: bool) -> Self {
        self.connection_proposition = connection_proposition;
        self
    }
}

/// A proposed style-guide change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleGuidePayload {
    /// The proposed content
    pub content: StyleGuideContent,
    /// Add a new rule or update an existing one
    pub operation: PayloadOperation,
    /// Target rule id, required when operation is `Update`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_id: Option<String>,
    /// Whether this payload should be checked for contradictions
    pub coherence_check: bool,
}

impl StyleGuidePayload {
    /// Propose adding a new style guide.
    pub fn add(content: StyleGuideContent) -> Self {
        Self {
            content,
            operation: PayloadOperation::Add,
            updated_id: None,
            coherence_check: true,
        }
    }

    /// Propose replacing the content of an existing style guide.
    pub fn update(updated_id: impl Into<String>, content: StyleGuideContent) -> Self {
        Self {
            content,
            operation: PayloadOperation::Update,
            updated_id: Some(updated_id.into()),
            coherence_check: true,
        }
    }

    /// Set whether the payload is checked for contradictions.
    pub fn with_coherence_check(mut self, coherence_check: bool) -> Self {
        self.coherence_check = coherence_check;
        self
    }
}

/// A caller-submitted proposed change of either kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// A guideline change
    Guideline(GuidelinePayload),
    /// A style-guide change
    StyleGuide(StyleGuidePayload),
}

impl Payload {
    /// Kind discriminator.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Guideline(_) => PayloadKind::Guideline,
            Self::StyleGuide(_) => PayloadKind::StyleGuide,
        }
    }

    /// Add or update.
    pub fn operation(&self) -> PayloadOperation {
        match self {
            Self::Guideline(p) => p.operation,
            Self::StyleGuide(p) => p.operation,
        }
    }

    /// Target rule id for updates.
    pub fn updated_id(&self) -> Option<&str> {
        match self {
            Self::Guideline(p) => p.updated_id.as_deref(),
            Self::StyleGuide(p) => p.updated_id.as_deref(),
        }
    }

    /// Whether this payload should be checked for contradictions.
    pub fn coherence_check(&self) -> bool {
        match self {
            Self::Guideline(p) => p.coherence_check,
            Self::StyleGuide(p) => p.coherence_check,
        }
    }

    /// Whether entailment links were requested. Always false for style
    /// guides, which have no connection semantics.
    pub fn connection_proposition(&self) -> bool {
        match self {
            Self::Guideline(p) => p.connection_proposition,
            Self::StyleGuide(_) => false,
        }
    }

    /// The proposed content as the kind-erased sum type.
    pub fn rule_content(&self) -> RuleContent {
        match self {
            Self::Guideline(p) => RuleContent::Guideline(p.content.clone()),
            Self::StyleGuide(p) => RuleContent::StyleGuide(p.content.clone()),
        }
    }
}

impl From<GuidelinePayload> for Payload {
    fn from(payload: GuidelinePayload) -> Self {
        Self::Guideline(payload)
    }
}

impl From<StyleGuidePayload> for Payload {
    fn from(payload: StyleGuidePayload) -> Self {
        Self::StyleGuide(payload)
    }
}

/// Whether a contradiction pairs a proposal with an existing rule or with
/// another proposal from the same batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoherenceKind {
    /// The other side is an already-committed rule
    ContradictionWithExisting,
    /// The other side is another payload under evaluation
    ContradictionWithEvaluated,
}

/// A detected logical contradiction between two rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoherenceCheck {
    /// Which side the contradiction pairs the proposal with
    pub kind: CoherenceKind,
    /// One side of the contradicting pair
    pub first: RuleContent,
    /// The other side of the contradicting pair
    pub second: RuleContent,
    /// The judge's rationale for the contradiction
    pub issue: String,
    /// Contradiction severity, 1..=10
    pub severity: u8,
}

/// Whether an entailment pairs a proposal with an existing rule or with
/// another proposal from the same batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// The other side is an already-committed rule
    ConnectionWithExisting,
    /// The other side is another payload under evaluation
    ConnectionWithEvaluated,
}

/// A detected directional entailment between two rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProposition {
    /// Which side the entailment pairs the proposal with
    pub check_kind: ConnectionKind,
    /// The rule whose condition entails the target
    pub source: RuleContent,
    /// The rule entailed by the source
    pub target: RuleContent,
}

/// Findings for a guideline payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineData {
    /// Contradictions attached to this payload
    pub coherence_checks: Vec<CoherenceCheck>,
    /// Entailments attached to this payload. `None` means connection
    /// propositions were not requested, as opposed to requested and empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_propositions: Option<Vec<ConnectionProposition>>,
}

/// Findings for a style-guide payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleGuideData {
    /// Contradictions attached to this payload
    pub coherence_checks: Vec<CoherenceCheck>,
}

/// Findings for one payload, by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvoiceData {
    /// Guideline findings
    Guideline(GuidelineData),
    /// Style-guide findings
    StyleGuide(StyleGuideData),
}

impl InvoiceData {
    /// Contradictions attached to this payload, regardless of kind.
    pub fn coherence_checks(&self) -> &[CoherenceCheck] {
        match self {
            Self::Guideline(data) => &data.coherence_checks,
            Self::StyleGuide(data) => &data.coherence_checks,
        }
    }

    /// Entailments attached to this payload, if they were requested.
    pub fn connection_propositions(&self) -> Option<&[ConnectionProposition]> {
        match self {
            Self::Guideline(data) => data.connection_propositions.as_deref(),
            Self::StyleGuide(_) => None,
        }
    }
}

/// The evaluated, checksummed outcome of one payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Kind discriminator, matching the payload
    pub kind: PayloadKind,
    /// The payload this invoice answers
    pub payload: Payload,
    /// Content-addressed token over the payload; the commit step must
    /// present a payload that still hashes to this value
    pub checksum: String,
    /// True when no coherence findings are attached
    pub approved: bool,
    /// Findings, present once evaluation has run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<InvoiceData>,
    /// Per-invoice error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Invoice {
    /// Create the unapproved, empty invoice held while evaluation runs.
    pub fn pending(payload: Payload, checksum: String) -> Self {
        Self {
            kind: payload.kind(),
            payload,
            checksum,
            approved: false,
            data: None,
            error: None,
        }
    }
}

/// Lifecycle of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// Created, waiting for the background run
    Pending,
    /// The background run holds the single-flight slot
    Running,
    /// All invoices are assembled
    Completed,
    /// The run aborted; `error` carries the reason
    Failed,
}

impl EvaluationStatus {
    /// Whether the evaluation will not change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The unit of background work: one batch of payloads under evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Unique evaluation ID
    pub id: String,
    /// The rule set the payloads target
    pub owner_id: String,
    /// When the evaluation was created
    pub creation_time: DateTime<Utc>,
    /// Lifecycle state
    pub status: EvaluationStatus,
    /// Failure reason, set when status is `Failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// One invoice per payload, in submission order
    pub invoices: Vec<Invoice>,
    /// Percent complete, 0..=100, monotonically non-decreasing
    pub progress: f32,
}

impl Evaluation {
    /// Create a pending evaluation owning the given invoices.
    pub fn new(owner_id: impl Into<String>, invoices: Vec<Invoice>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            creation_time: Utc::now(),
            status: EvaluationStatus::Pending,
            error: None,
            invoices,
            progress: 0.0,
        }
    }
}

/// Error types for the evaluation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BceError {
    /// Caller-fixable submission error, raised before any background work
    #[error("{0}")]
    Validation(String),

    /// Operational failure discovered during background execution
    #[error("{0}")]
    Evaluation(String),

    /// Another evaluation holds the single-flight slot
    #[error("an evaluation task '{0}' is already running")]
    AlreadyRunning(String),

    /// Evaluation lookup failed
    #[error("Evaluation not found: {0}")]
    NotFound(String),

    /// Waited past the deadline for a terminal status
    #[error("Timed out waiting for evaluation '{0}'")]
    Timeout(String),

    /// Commit presented a payload that no longer hashes to its invoice
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The checksum recorded on the invoice
        expected: String,
        /// The checksum of the payload presented at commit time
        actual: String,
    },

    /// Judge failure that survived the retry budget
    #[error("Judge error: {0}")]
    Judge(#[from] arbiter::JudgeError),

    /// Rule store failure
    #[error("Rule store error: {0}")]
    Rulebook(#[from] rulebook::RulebookError),

    /// Invariant breach inside the pipeline
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BceError {
    /// Expected/operational failures are recorded on the evaluation and
    /// logged at info level instead of propagating to the task runner.
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Evaluation(_) | Self::AlreadyRunning(_))
    }
}

pub type Result<T> = std::result::Result<T, BceError>;
