//! Semantic judge abstraction layer.
//!
//! Provides a trait-based interface over the model that classifies rule
//! pairs:
//! - OpenAI-compatible (vLLM, Ollama, OpenAI, etc.)
//! - Scripted mock judge for testing

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockJudge;
pub use openai::OpenAiJudge;
pub use traits::{CoherenceVerdict, ConnectionVerdict, JudgeError, SemanticJudge};
