//! Per-kind evaluation sub-pipelines.
//!
//! A submission is partitioned by payload kind and each kind runs as an
//! independent sub-pipeline over the judge:
//!
//! 1. **CoherenceChecker**: pairwise contradiction analysis over batches
//! 2. **ConnectionProposer**: directional entailment analysis (guidelines only)
//! 3. **GuidelineEvaluator** / **StyleGuideEvaluator**: comparison-set
//!    assembly, concurrent passes and finding attribution

mod coherence;
mod connection;
mod guideline;
mod style;

pub use coherence::{CoherenceChecker, IncoherenceFinding};
pub use connection::{ConnectionProposer, EntailmentFinding};
pub use guideline::GuidelineEvaluator;
pub use style::StyleGuideEvaluator;
