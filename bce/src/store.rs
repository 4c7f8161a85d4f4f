//! Evaluation store: the system of record for the state machine.
//!
//! All reads take a shared lock and all writes take an exclusive lock over
//! the whole store, not per record. That is what makes the single-flight
//! claim race-free: the writer holds exclusive access while it both scans
//! for any other Running evaluation and flips its own record to Running.
//! The store itself is the lock.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use rulebook::checksum_of;

use crate::types::{BceError, Evaluation, EvaluationStatus, Invoice, Payload, Result};

/// A partial update to an evaluation. Unset fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct EvaluationPatch {
    /// New lifecycle state
    pub status: Option<EvaluationStatus>,
    /// New failure reason
    pub error: Option<String>,
    /// Replacement invoice list
    pub invoices: Option<Vec<Invoice>>,
    /// New percent complete
    pub progress: Option<f32>,
}

impl EvaluationPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lifecycle state.
    pub fn with_status(mut self, status: EvaluationStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the failure reason.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Replace the invoice list.
    pub fn with_invoices(mut self, invoices: Vec<Invoice>) -> Self {
        self.invoices = Some(invoices);
        self
    }

    /// Set the percent complete.
    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Merge the patch into an evaluation record.
    pub fn apply(self, evaluation: &mut Evaluation) {
        if let Some(status) = self.status {
            evaluation.status = status;
        }
        if let Some(error) = self.error {
            evaluation.error = Some(error);
        }
        if let Some(invoices) = self.invoices {
            evaluation.invoices = invoices;
        }
        if let Some(progress) = self.progress {
            evaluation.progress = progress;
        }
    }
}

/// Store of evaluation records.
///
/// An abstraction over the persistence mechanism, allowing for different
/// implementations (in-memory, database-backed). Implementations must keep
/// `claim_running` atomic with respect to every other write.
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    /// Create a pending evaluation with one empty, unapproved invoice per
    /// payload, in submission order.
    async fn create(&self, owner_id: &str, payloads: Vec<Payload>) -> Result<Evaluation>;

    /// Read one evaluation by id.
    async fn read(&self, id: &str) -> Result<Evaluation>;

    /// List every evaluation.
    async fn list(&self) -> Result<Vec<Evaluation>>;

    /// Merge a partial update into an evaluation.
    async fn update(&self, id: &str, patch: EvaluationPatch) -> Result<Evaluation>;

    /// Atomically claim the system-wide Running slot for this evaluation.
    ///
    /// Scans the whole store under the exclusive lock; fails with
    /// `AlreadyRunning` naming the other evaluation when any other record
    /// is Running, without touching this one.
    async fn claim_running(&self, id: &str) -> Result<Evaluation>;
}

/// In-memory evaluation store.
pub struct MemoryEvaluationStore {
    evaluations: RwLock<HashMap<String, Evaluation>>,
}

impl MemoryEvaluationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            evaluations: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryEvaluationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EvaluationStore for MemoryEvaluationStore {
    async fn create(&self, owner_id: &str, payloads: Vec<Payload>) -> Result<Evaluation> {
        let mut invoices = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let checksum = checksum_of(&payload)?;
            invoices.push(Invoice::pending(payload, checksum));
        }

        let evaluation = Evaluation::new(owner_id, invoices);

        let mut evaluations = self.evaluations.write().await;
        evaluations.insert(evaluation.id.clone(), evaluation.clone());
        debug!(evaluation_id = %evaluation.id, owner_id = %owner_id, "Created evaluation");
        Ok(evaluation)
    }

    async fn read(&self, id: &str) -> Result<Evaluation> {
        self.evaluations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BceError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Evaluation>> {
        Ok(self.evaluations.read().await.values().cloned().collect())
    }

    async fn update(&self, id: &str, patch: EvaluationPatch) -> Result<Evaluation> {
        let mut evaluations = self.evaluations.write().await;
        let evaluation = evaluations
            .get_mut(id)
            .ok_or_else(|| BceError::NotFound(id.to_string()))?;
        patch.apply(evaluation);
        Ok(evaluation.clone())
    }

    async fn claim_running(&self, id: &str) -> Result<Evaluation> {
        let mut evaluations = self.evaluations.write().await;

        if let Some(running) = evaluations
            .values()
            .find(|e| e.id != id && e.status == EvaluationStatus::Running)
        {
            return Err(BceError::AlreadyRunning(running.id.clone()));
        }

        let evaluation = evaluations
            .get_mut(id)
            .ok_or_else(|| BceError::NotFound(id.to_string()))?;
        evaluation.status = EvaluationStatus::Running;
        debug!(evaluation_id = %id, "Claimed running slot");
        Ok(evaluation.clone())
    }
}
