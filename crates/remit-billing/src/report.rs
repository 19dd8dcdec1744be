//! Per-line-item settlement reporting.

use remit_core::{HandlerError, HandlerResult, LineItemKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Invoice, InvoiceStatus, LineItem};

/// What happened to one line item during settlement or reversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Applied,
    /// The effect was already present; nothing changed.
    AlreadyApplied,
    /// Nothing to reverse: the forward effect never took place.
    NotApplied,
    Failed {
        reason: String,
    },
}

impl ItemOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemReport {
    pub line_item_id: Uuid,
    pub kind: LineItemKind,
    pub reference_id: String,
    pub outcome: ItemOutcome,
}

/// Result of processing one payment event against one invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub invoice_id: Uuid,
    pub invoice_status: InvoiceStatus,
    /// Whether this run changed the invoice status.
    pub status_written: bool,
    pub items: Vec<LineItemReport>,
}

impl SettlementReport {
    pub fn new(invoice: &Invoice, status_written: bool) -> Self {
        Self {
            invoice_id: invoice.id,
            invoice_status: invoice.status,
            status_written,
            items: Vec::with_capacity(invoice.line_items.len()),
        }
    }

    pub fn push(&mut self, item: &LineItem, outcome: ItemOutcome) {
        self.items.push(LineItemReport {
            line_item_id: item.id,
            kind: item.kind,
            reference_id: item.reference_id.clone(),
            outcome,
        });
    }

    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|i| !i.outcome.is_failed())
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &LineItemReport> {
        self.items.iter().filter(|i| i.outcome.is_failed())
    }

    pub fn count(&self, outcome: &ItemOutcome) -> usize {
        self.items.iter().filter(|i| &i.outcome == outcome).count()
    }

    /// Success data when every item settled, otherwise a failure carrying
    /// the full report.
    pub fn into_handler_result(self) -> HandlerResult {
        let failed: Vec<String> = self
            .failed_items()
            .map(|i| match &i.outcome {
                ItemOutcome::Failed { reason } => {
                    format!("{} '{}': {}", i.kind, i.reference_id, reason)
                }
                _ => String::new(),
            })
            .collect();
        let total = self.items.len();
        let data = serde_json::to_value(&self).map_err(|e| HandlerError::failed(e.to_string()))?;
        if failed.is_empty() {
            Ok(data)
        } else {
            Err(HandlerError::failed_with(
                format!(
                    "{} of {} line items failed: {}",
                    failed.len(),
                    total,
                    failed.join("; ")
                ),
                data,
            ))
        }
    }
}
