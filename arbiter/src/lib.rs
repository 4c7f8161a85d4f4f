//! Arbiter - Semantic Rule Classification
//!
//! Provides the model-backed judgment layer for rule evaluation:
//! - Trait-based semantic judges (vLLM/Ollama/OpenAI, scripted mock)
//! - Pairwise coherence verdicts (relatedness and contradiction severity)
//! - Directed entailment verdicts between rules
//! - Bounded fixed-interval retry for transient judge failures
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            SemanticJudge                │
//! │  (classify_coherence / _connection)     │
//! └────────────────┬────────────────────────┘
//!                  │
//!      ┌───────────┴───────────┐
//!      ▼                       ▼
//! ┌─────────────┐       ┌─────────────┐
//! │ OpenAiJudge │       │  MockJudge  │
//! │ (vLLM/      │       │ (scripted)  │
//! │  Ollama)    │       │             │
//! └─────────────┘       └─────────────┘
//! ```

pub mod judge;
pub mod retry;

// Re-export main types for convenience
pub use judge::traits::{CoherenceVerdict, ConnectionVerdict, JudgeError, SemanticJudge};
pub use judge::{MockJudge, OpenAiJudge};
pub use retry::RetryPolicy;
