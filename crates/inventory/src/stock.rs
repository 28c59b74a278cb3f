use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fmshop_core::{Aggregate, AggregateRoot, OrderId, ProductId};

use crate::error::InventoryError;
use crate::transaction::{InventoryTransaction, TransactionKind};

/// Derived, cached view of a product's stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub product_id: ProductId,
    /// Available quantity (restocked − reserved + released).
    pub quantity: i64,
    pub unit: String,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    Reserved,
    Released,
    Committed,
}

/// A single order's hold on this product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub order_id: OrderId,
    pub quantity: u32,
    pub state: ReservationState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockCommand {
    Reserve {
        order_id: OrderId,
        quantity: u32,
        occurred_at: DateTime<Utc>,
    },
    Release {
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    },
    Commit {
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    },
    Restock {
        quantity: u32,
        occurred_at: DateTime<Utc>,
    },
}

/// Aggregate root: stock of one product.
///
/// Every mutation goes through `handle` → [`InventoryTransaction`] → `apply`,
/// so `quantity` always equals the net of the applied log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    product_id: ProductId,
    unit: String,
    quantity: i64,
    reservations: HashMap<OrderId, Reservation>,
    version: u64,
    last_updated: Option<DateTime<Utc>>,
}

impl StockItem {
    /// Fresh record with nothing in stock.
    pub fn new(product_id: ProductId, unit: impl Into<String>) -> Self {
        Self {
            product_id,
            unit: unit.into(),
            quantity: 0,
            reservations: HashMap::new(),
            version: 0,
            last_updated: None,
        }
    }

    /// Rebuild state by replaying a product's log in sequence order.
    pub fn replay<'a, I>(product_id: ProductId, unit: impl Into<String>, log: I) -> Self
    where
        I: IntoIterator<Item = &'a InventoryTransaction>,
    {
        let mut entries: Vec<&InventoryTransaction> = log.into_iter().collect();
        entries.sort_by_key(|t| t.sequence);

        let mut item = Self::new(product_id, unit);
        for tx in entries {
            item.apply(tx);
        }
        item
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn set_unit(&mut self, unit: impl Into<String>) {
        self.unit = unit.into();
    }

    /// Quantity currently available for new reservations.
    pub fn available(&self) -> i64 {
        self.quantity
    }

    pub fn reservation(&self, order_id: OrderId) -> Option<&Reservation> {
        self.reservations.get(&order_id)
    }

    pub fn record(&self) -> InventoryRecord {
        InventoryRecord {
            product_id: self.product_id,
            quantity: self.quantity,
            unit: self.unit.clone(),
            last_updated: self.last_updated,
        }
    }

    fn entry(
        &self,
        kind: TransactionKind,
        quantity: u32,
        order_id: Option<OrderId>,
        occurred_at: DateTime<Utc>,
    ) -> InventoryTransaction {
        InventoryTransaction {
            product_id: self.product_id,
            sequence: self.version + 1,
            kind,
            quantity,
            order_id,
            occurred_at,
        }
    }

    fn handle_reserve(
        &self,
        order_id: OrderId,
        quantity: u32,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<InventoryTransaction>, InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity);
        }
        if self.reservations.contains_key(&order_id) {
            return Err(InventoryError::DuplicateReservation {
                order_id,
                product_id: self.product_id,
            });
        }
        if i64::from(quantity) > self.quantity {
            return Err(InventoryError::InsufficientStock {
                product_id: self.product_id,
                requested: quantity,
                available: self.quantity,
            });
        }
        Ok(vec![self.entry(
            TransactionKind::Reserve,
            quantity,
            Some(order_id),
            occurred_at,
        )])
    }

    fn handle_release(
        &self,
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<InventoryTransaction>, InventoryError> {
        let product_id = self.product_id;
        let reservation = self
            .reservations
            .get(&order_id)
            .ok_or(InventoryError::ReservationNotFound { order_id, product_id })?;

        match reservation.state {
            ReservationState::Reserved => Ok(vec![self.entry(
                TransactionKind::Release,
                reservation.quantity,
                Some(order_id),
                occurred_at,
            )]),
            ReservationState::Released => Ok(vec![]),
            ReservationState::Committed => {
                Err(InventoryError::ReservationCommitted { order_id, product_id })
            }
        }
    }

    fn handle_commit(
        &self,
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<InventoryTransaction>, InventoryError> {
        let product_id = self.product_id;
        let reservation = self
            .reservations
            .get(&order_id)
            .ok_or(InventoryError::ReservationNotFound { order_id, product_id })?;

        match reservation.state {
            ReservationState::Reserved => Ok(vec![self.entry(
                TransactionKind::Commit,
                reservation.quantity,
                Some(order_id),
                occurred_at,
            )]),
            ReservationState::Committed => Ok(vec![]),
            ReservationState::Released => {
                Err(InventoryError::ReservationReleased { order_id, product_id })
            }
        }
    }
}

impl AggregateRoot for StockItem {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for StockItem {
    type Command = StockCommand;
    type Event = InventoryTransaction;
    type Error = InventoryError;

    fn apply(&mut self, tx: &Self::Event) {
        self.quantity += tx.signed_quantity();

        if let Some(order_id) = tx.order_id {
            match tx.kind {
                TransactionKind::Reserve => {
                    self.reservations.insert(
                        order_id,
                        Reservation {
                            order_id,
                            quantity: tx.quantity,
                            state: ReservationState::Reserved,
                        },
                    );
                }
                TransactionKind::Release => {
                    if let Some(r) = self.reservations.get_mut(&order_id) {
                        r.state = ReservationState::Released;
                    }
                }
                TransactionKind::Commit => {
                    if let Some(r) = self.reservations.get_mut(&order_id) {
                        r.state = ReservationState::Committed;
                    }
                }
                TransactionKind::Restock => {}
            }
        }

        self.last_updated = Some(tx.occurred_at);
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::Reserve {
                order_id,
                quantity,
                occurred_at,
            } => self.handle_reserve(*order_id, *quantity, *occurred_at),
            StockCommand::Release {
                order_id,
                occurred_at,
            } => self.handle_release(*order_id, *occurred_at),
            StockCommand::Commit {
                order_id,
                occurred_at,
            } => self.handle_commit(*order_id, *occurred_at),
            StockCommand::Restock {
                quantity,
                occurred_at,
            } => {
                if *quantity == 0 {
                    return Err(InventoryError::InvalidQuantity);
                }
                Ok(vec![self.entry(
                    TransactionKind::Restock,
                    *quantity,
                    None,
                    *occurred_at,
                )])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::net_quantity;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn stocked(quantity: u32) -> StockItem {
        let mut item = StockItem::new(ProductId::new(), "kg");
        item.execute(&StockCommand::Restock {
            quantity,
            occurred_at: now(),
        })
        .unwrap();
        item
    }

    fn reserve(order_id: OrderId, quantity: u32) -> StockCommand {
        StockCommand::Reserve {
            order_id,
            quantity,
            occurred_at: now(),
        }
    }

    #[test]
    fn reserve_decrements_available() {
        let mut item = stocked(5);
        let order_id = OrderId::new();

        let events = item.execute(&reserve(order_id, 2)).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TransactionKind::Reserve);
        assert_eq!(events[0].sequence, 2);
        assert_eq!(item.available(), 3);
        assert_eq!(
            item.reservation(order_id).map(|r| r.state),
            Some(ReservationState::Reserved)
        );
    }

    #[test]
    fn reserve_beyond_available_is_insufficient_stock() {
        let item = stocked(1);
        let err = item.handle(&reserve(OrderId::new(), 2)).unwrap_err();
        match err {
            InventoryError::InsufficientStock {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 2);
                assert_eq!(available, 1);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
    }

    #[test]
    fn second_reservation_for_same_order_is_rejected() {
        let mut item = stocked(10);
        let order_id = OrderId::new();
        item.execute(&reserve(order_id, 1)).unwrap();

        let err = item.handle(&reserve(order_id, 1)).unwrap_err();
        assert!(matches!(err, InventoryError::DuplicateReservation { .. }));
    }

    #[test]
    fn release_is_idempotent() {
        let mut item = stocked(4);
        let order_id = OrderId::new();
        item.execute(&reserve(order_id, 3)).unwrap();

        let release = StockCommand::Release {
            order_id,
            occurred_at: now(),
        };
        let first = item.execute(&release).unwrap();
        let second = item.execute(&release).unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].quantity, 3);
        assert!(second.is_empty());
        assert_eq!(item.available(), 4);
    }

    #[test]
    fn commit_keeps_quantity_and_forbids_release() {
        let mut item = stocked(4);
        let order_id = OrderId::new();
        item.execute(&reserve(order_id, 3)).unwrap();

        let commit = StockCommand::Commit {
            order_id,
            occurred_at: now(),
        };
        let events = item.execute(&commit).unwrap();
        assert_eq!(events[0].signed_quantity(), 0);
        assert_eq!(item.available(), 1);

        // Duplicate commit is a no-op.
        assert!(item.execute(&commit).unwrap().is_empty());

        let err = item
            .handle(&StockCommand::Release {
                order_id,
                occurred_at: now(),
            })
            .unwrap_err();
        assert!(matches!(err, InventoryError::ReservationCommitted { .. }));
    }

    #[test]
    fn commit_after_release_is_rejected() {
        let mut item = stocked(2);
        let order_id = OrderId::new();
        item.execute(&reserve(order_id, 2)).unwrap();
        item.execute(&StockCommand::Release {
            order_id,
            occurred_at: now(),
        })
        .unwrap();

        let err = item
            .handle(&StockCommand::Commit {
                order_id,
                occurred_at: now(),
            })
            .unwrap_err();
        assert!(matches!(err, InventoryError::ReservationReleased { .. }));
    }

    #[test]
    fn release_without_reservation_is_not_found() {
        let item = stocked(2);
        let err = item
            .handle(&StockCommand::Release {
                order_id: OrderId::new(),
                occurred_at: now(),
            })
            .unwrap_err();
        assert!(matches!(err, InventoryError::ReservationNotFound { .. }));
    }

    #[test]
    fn zero_quantities_are_rejected() {
        let item = stocked(2);
        assert_eq!(
            item.handle(&reserve(OrderId::new(), 0)),
            Err(InventoryError::InvalidQuantity)
        );
        assert_eq!(
            item.handle(&StockCommand::Restock {
                quantity: 0,
                occurred_at: now(),
            }),
            Err(InventoryError::InvalidQuantity)
        );
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let item = stocked(3);
        let before = item.clone();
        let a = item.handle(&reserve(OrderId::new(), 1)).unwrap();
        let b = item.handle(&reserve(OrderId::new(), 1)).unwrap();
        assert_eq!(item, before);
        assert_eq!(a[0].sequence, b[0].sequence);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Restock(u32),
        Reserve(usize, u32),
        Release(usize),
        Commit(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u32..20).prop_map(Op::Restock),
            (0usize..6, 1u32..10).prop_map(|(o, q)| Op::Reserve(o, q)),
            (0usize..6).prop_map(Op::Release),
            (0usize..6).prop_map(Op::Commit),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of movements is accepted, the counter
        /// equals the net of the log, never goes negative, and replaying the
        /// log rebuilds the same state.
        #[test]
        fn counter_equals_net_of_log(ops in prop::collection::vec(op(), 1..60)) {
            let orders: Vec<OrderId> = (0..6).map(|_| OrderId::new()).collect();
            let mut item = StockItem::new(ProductId::new(), "pack");
            let mut log = Vec::new();

            for op in ops {
                let cmd = match op {
                    Op::Restock(q) => StockCommand::Restock { quantity: q, occurred_at: now() },
                    Op::Reserve(o, q) => reserve(orders[o], q),
                    Op::Release(o) => StockCommand::Release { order_id: orders[o], occurred_at: now() },
                    Op::Commit(o) => StockCommand::Commit { order_id: orders[o], occurred_at: now() },
                };
                if let Ok(events) = item.execute(&cmd) {
                    log.extend(events);
                }
                prop_assert!(item.available() >= 0);
                prop_assert_eq!(item.available(), net_quantity(&log));
            }

            let rebuilt = StockItem::replay(item.product_id(), "pack", &log);
            prop_assert_eq!(rebuilt, item);
        }
    }
}
