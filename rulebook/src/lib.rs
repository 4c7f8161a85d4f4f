//! Rule Model for Decorum
//!
//! This crate holds the domain model shared by the evaluation pipeline and
//! the classifier client:
//!
//! - **Guidelines**: condition/action pairs governing an AI agent's behavior
//! - **Style guides**: stylistic principles with before/after examples
//! - **Rule stores**: keyed persistence scoped by rule set (owning agent)
//! - **Checksums**: content-addressed hashes binding evaluated payloads to
//!   their commit
//!
//! # Key Components
//!
//! - [`RuleContent`]: sum type over both rule kinds, used wherever findings
//!   pair proposed and existing rules
//! - [`GuidelineStore`] / [`StyleGuideStore`]: store traits with in-memory
//!   implementations
//! - [`checksum_of`]: canonical-JSON SHA256 of any serializable value

pub mod checksum;
pub mod store;
pub mod types;

// Re-export main types
pub use checksum::{checksum_of, compute_checksum};
pub use store::{GuidelineStore, MemoryGuidelineStore, MemoryStyleGuideStore, StyleGuideStore};
pub use types::*;
