use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fmshop_core::{Event, OrderId, ProductId};

/// Kind of stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Provisional decrement tied to an order.
    Reserve,
    /// Return of a reservation to available stock.
    Release,
    /// Finalization of a reservation; no quantity delta.
    Commit,
    /// Stock intake.
    Restock,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Reserve => "reserve",
            TransactionKind::Release => "release",
            TransactionKind::Commit => "commit",
            TransactionKind::Restock => "restock",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reserve" => Some(TransactionKind::Reserve),
            "release" => Some(TransactionKind::Release),
            "commit" => Some(TransactionKind::Commit),
            "restock" => Some(TransactionKind::Restock),
            _ => None,
        }
    }
}

/// Append-only audit entry. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub product_id: ProductId,
    /// Position in the product's log (1-based, gapless).
    pub sequence: u64,
    pub kind: TransactionKind,
    /// Magnitude of the movement; the sign comes from `kind`.
    pub quantity: u32,
    /// Owning order for reserve/release/commit entries.
    pub order_id: Option<OrderId>,
    pub occurred_at: DateTime<Utc>,
}

impl InventoryTransaction {
    /// Effect of this entry on available quantity.
    pub fn signed_quantity(&self) -> i64 {
        let q = i64::from(self.quantity);
        match self.kind {
            TransactionKind::Reserve => -q,
            TransactionKind::Release | TransactionKind::Restock => q,
            TransactionKind::Commit => 0,
        }
    }
}

impl Event for InventoryTransaction {
    fn event_type(&self) -> &'static str {
        match self.kind {
            TransactionKind::Reserve => "inventory.stock.reserved",
            TransactionKind::Release => "inventory.stock.released",
            TransactionKind::Commit => "inventory.stock.committed",
            TransactionKind::Restock => "inventory.stock.restocked",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// Sum of signed quantities over a log.
pub fn net_quantity<'a, I>(log: I) -> i64
where
    I: IntoIterator<Item = &'a InventoryTransaction>,
{
    log.into_iter().map(InventoryTransaction::signed_quantity).sum()
}
