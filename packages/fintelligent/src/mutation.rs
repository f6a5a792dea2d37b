//! Applies backend-issued cell updates as one all-or-nothing batch.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::document::{DocumentHost, DocumentTransaction};
use crate::error::DocumentError;
use crate::protocol::{CellValue, Update};

/// Function prefixes that get a leading `=` when the backend forgets it.
const FORMULA_FUNCTIONS: &[&str] = &["SUM(", "AVERAGE(", "MAX(", "MIN("];

/// Result of applying a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// Every update was written and committed. Carries the updates as received.
    Applied(Vec<Update>),
    /// Some write or the commit failed; nothing is reported as applied.
    Failed(DocumentError),
}

impl MutationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MutationOutcome::Applied(_))
    }
}

pub struct MutationApplier<H> {
    host: Arc<H>,
}

impl<H: DocumentHost> MutationApplier<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self { host }
    }

    /// Write `updates` in order inside one transaction and commit.
    ///
    /// On failure the transaction is dropped; whatever the host does on abort
    /// is the resulting document state.
    pub async fn apply(&self, updates: Vec<Update>) -> MutationOutcome {
        match self.write_all(&updates).await {
            Ok(()) => {
                debug!(count = updates.len(), "applied cell updates");
                MutationOutcome::Applied(updates)
            }
            Err(e) => {
                warn!(error = %e, count = updates.len(), "cell update batch failed");
                MutationOutcome::Failed(e)
            }
        }
    }

    async fn write_all(&self, updates: &[Update]) -> Result<(), DocumentError> {
        let mut txn = self.host.begin().await?;
        let sheet = txn.active_sheet().await?;
        for update in updates {
            let value = normalize_formula(&update.value);
            txn.set_range_values(&sheet, &update.cell, vec![vec![value]])
                .await?;
        }
        txn.commit().await
    }
}

/// Clean up formula text produced by the backend.
///
/// `==SUM(A1:A3)` loses one `=`; `sum(A1:A3)` gains one. Everything else is
/// written as-is.
pub fn normalize_formula(value: &CellValue) -> CellValue {
    let Some(text) = value.as_str() else {
        return value.clone();
    };
    if let Some(rest) = text.strip_prefix("==") {
        return CellValue::Text(format!("={rest}"));
    }
    let upper = text.trim_start().to_ascii_uppercase();
    if !text.starts_with('=') && FORMULA_FUNCTIONS.iter().any(|f| upper.starts_with(f)) {
        return CellValue::Text(format!("={}", text.trim_start()));
    }
    value.clone()
}
