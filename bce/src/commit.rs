//! Commit stage: apply approved invoices to the rule stores.

use std::sync::Arc;
use tracing::info;

use rulebook::{checksum_of, GuidelineStore, StoredGuideline, StoredStyleGuide, StyleGuideStore};

use crate::types::{BceError, Evaluation, Invoice, Payload, PayloadOperation, Result};

/// A rule written to its store by the commit stage.
#[derive(Debug, Clone)]
pub enum CommittedRule {
    /// A guideline was created or updated
    Guideline(StoredGuideline),
    /// A style guide was created or updated
    StyleGuide(StoredStyleGuide),
}

/// Applies approved invoices to the rule stores.
///
/// An invoice is the only accepted input: commit re-derives the payload
/// checksum and refuses anything that no longer hashes to the value
/// recorded at evaluation time.
pub struct RuleCommitter {
    guidelines: Arc<dyn GuidelineStore>,
    style_guides: Arc<dyn StyleGuideStore>,
}

impl RuleCommitter {
    /// Create a committer over the given stores.
    pub fn new(guidelines: Arc<dyn GuidelineStore>, style_guides: Arc<dyn StyleGuideStore>) -> Self {
        Self {
            guidelines,
            style_guides,
        }
    }

    /// Apply one approved invoice to its store.
    pub async fn commit(&self, owner_id: &str, invoice: &Invoice) -> Result<CommittedRule> {
        if !invoice.approved {
            return Err(BceError::Validation(
                "Only approved invoices can be committed".to_string(),
            ));
        }

        let actual = checksum_of(&invoice.payload)?;
        if actual != invoice.checksum {
            return Err(BceError::ChecksumMismatch {
                expected: invoice.checksum.clone(),
                actual,
            });
        }

        let committed = match &invoice.payload {
            Payload::Guideline(payload) => {
                let stored = match payload.operation {
                    PayloadOperation::Add => {
                        self.guidelines
                            .create(owner_id, payload.content.clone())
                            .await?
                    }
                    PayloadOperation::Update => {
                        let id = payload.updated_id.as_deref().ok_or_else(|| {
                            BceError::Validation(
                                "Guideline update payload is missing the id of the rule it updates"
                                    .to_string(),
                            )
                        })?;
                        self.guidelines
                            .update(owner_id, id, payload.content.clone())
                            .await?
                    }
                };
                CommittedRule::Guideline(stored)
            }
            Payload::StyleGuide(payload) => {
                let stored = match payload.operation {
                    PayloadOperation::Add => {
                        self.style_guides
                            .create(owner_id, payload.content.clone())
                            .await?
                    }
                    PayloadOperation::Update => {
                        let id = payload.updated_id.as_deref().ok_or_else(|| {
                            BceError::Validation(
                                "Style guide update payload is missing the id of the rule it updates"
                                    .to_string(),
                            )
                        })?;
                        self.style_guides
                            .update(owner_id, id, payload.content.clone())
                            .await?
                    }
                };
                CommittedRule::StyleGuide(stored)
            }
        };

        info!(
            owner_id = %owner_id,
            kind = invoice.kind.display_name(),
            "Committed rule"
        );
        Ok(committed)
    }

    /// Apply every approved invoice of an evaluation, in submission order.
    /// Unapproved invoices are skipped, not errors.
    pub async fn commit_approved(&self, evaluation: &Evaluation) -> Result<Vec<CommittedRule>> {
        let mut committed = Vec::new();
        for invoice in evaluation.invoices.iter().filter(|i| i.approved) {
            committed.push(self.commit(&evaluation.owner_id, invoice).await?);
        }
        Ok(committed)
    }
}
