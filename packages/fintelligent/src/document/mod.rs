//! Document host surface and used-range snapshots.
//!
//! The host editor is an external collaborator. All it has to offer is a
//! scoped transaction with four primitives: get the active sheet, load the
//! used range, set range values, and commit. Dropping a transaction without
//! committing it aborts it.

pub mod address;
pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::DocumentError;
use crate::protocol::{CellValue, DocumentSnapshot};

pub use memory::MemoryWorkbook;

/// Opaque handle to a worksheet, valid inside the transaction that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SheetId(pub String);

/// A document that can open scoped transactions.
#[async_trait]
pub trait DocumentHost: Send + Sync + 'static {
    type Transaction: DocumentTransaction;

    async fn begin(&self) -> Result<Self::Transaction, DocumentError>;
}

/// A batch of document operations that takes effect on [`commit`](Self::commit).
#[async_trait]
pub trait DocumentTransaction: Send {
    async fn active_sheet(&mut self) -> Result<SheetId, DocumentError>;

    /// Load the used range's values and address.
    async fn used_range(&mut self, sheet: &SheetId) -> Result<DocumentSnapshot, DocumentError>;

    async fn set_range_values(
        &mut self,
        sheet: &SheetId,
        address: &str,
        values: Vec<Vec<CellValue>>,
    ) -> Result<(), DocumentError>;

    /// Commit everything queued in this transaction.
    async fn commit(&mut self) -> Result<(), DocumentError>;
}

/// Takes fresh snapshots of the active sheet for outgoing messages.
pub struct DocumentSync<H> {
    host: Arc<H>,
}

impl<H: DocumentHost> DocumentSync<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self { host }
    }

    /// Read the active sheet's used range inside one transaction.
    ///
    /// The result reflects the document at commit time. A sheet holding only
    /// blank cells yields an empty snapshot.
    pub async fn snapshot(&self) -> Result<DocumentSnapshot, DocumentError> {
        let mut txn = self.host.begin().await?;
        let sheet = txn.active_sheet().await?;
        let range = txn.used_range(&sheet).await?;
        txn.commit().await?;

        if range.is_blank() {
            debug!(sheet = %sheet.0, "active sheet is empty");
            return Ok(DocumentSnapshot::default());
        }
        debug!(
            address = %range.address,
            rows = range.row_count(),
            cols = range.column_count(),
            "captured used range"
        );
        Ok(range)
    }
}
