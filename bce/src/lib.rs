//! BCE - Behavioral Change Evaluation
//!
//! A staged propose/evaluate/commit pipeline for agent rule changes:
//! - Synchronous batch validation, asynchronous background evaluation
//! - Pairwise coherence checks and connection propositions via a semantic judge
//! - Store-enforced single-flight execution (at most one run at a time)
//! - Checksummed invoices binding each commit to what was evaluated
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      BehavioralChangeEvaluator          │
//! │  (validate, schedule, poll, assemble)   │
//! └────────────────┬────────────────────────┘
//!                  │ claims the run slot
//!                  ▼
//!          ┌───────────────┐
//!          │ EvaluationStore│
//!          └───────┬───────┘
//!      ┌───────────┴───────────┐
//!      ▼                       ▼
//! ┌─────────────┐       ┌─────────────┐
//! │ Guideline   │       │ StyleGuide  │
//! │ Evaluator   │       │ Evaluator   │
//! └──────┬──────┘       └──────┬──────┘
//!        └──────────┬──────────┘
//!                   ▼
//!          ┌────────────────┐
//!          │ SemanticJudge  │
//!          └────────────────┘
//! ```

pub mod commit;
pub mod config;
pub mod evaluator;
pub mod pipeline;
pub mod store;
pub mod tasks;
pub mod types;

// Re-export main types for convenience
pub use commit::{CommittedRule, RuleCommitter};
pub use config::{BceConfig, CheckConfig, PollingConfig, RetryConfig};
pub use evaluator::BehavioralChangeEvaluator;
pub use store::{EvaluationPatch, EvaluationStore, MemoryEvaluationStore};
pub use tasks::{ProgressTracker, TaskRunner};
pub use types::*;
