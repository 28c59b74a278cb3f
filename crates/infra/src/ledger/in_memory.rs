use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use fmshop_core::{Aggregate, OrderId, ProductId};
use fmshop_inventory::{
    InventoryError, InventoryRecord, InventoryTransaction, StockCommand, StockItem, net_quantity,
};

use super::{InventoryLedger, LedgerCheck, LedgerError};
use crate::store::StoreError;

const DEFAULT_UNIT: &str = "unit";

#[derive(Debug)]
struct Book {
    item: StockItem,
    log: Vec<InventoryTransaction>,
}

impl Book {
    fn execute(&mut self, command: StockCommand) -> Result<Vec<InventoryTransaction>, InventoryError> {
        let events = self.item.execute(&command)?;
        self.log.extend(events.iter().cloned());
        Ok(events)
    }
}

fn poisoned() -> LedgerError {
    StoreError::Backend("lock poisoned".to_string()).into()
}

/// In-memory ledger with one mutex per product.
///
/// Reservations against different products never contend; reservations
/// against the same product are serialized, so check-and-decrement is atomic.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    books: RwLock<HashMap<ProductId, Arc<Mutex<Book>>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self, product_id: ProductId) -> Result<Arc<Mutex<Book>>, LedgerError> {
        let books = self.books.read().map_err(|_| poisoned())?;
        books
            .get(&product_id)
            .cloned()
            .ok_or(InventoryError::UnknownProduct(product_id).into())
    }

    fn book_or_create(&self, product_id: ProductId, unit: Option<&str>) -> Result<Arc<Mutex<Book>>, LedgerError> {
        let mut books = self.books.write().map_err(|_| poisoned())?;
        let book = books.entry(product_id).or_insert_with(|| {
            Arc::new(Mutex::new(Book {
                item: StockItem::new(product_id, unit.unwrap_or(DEFAULT_UNIT)),
                log: Vec::new(),
            }))
        });
        Ok(book.clone())
    }

    fn with_book<T>(
        &self,
        product_id: ProductId,
        f: impl FnOnce(&mut Book) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let book = self.book(product_id)?;
        let mut guard = book.lock().map_err(|_| poisoned())?;
        f(&mut guard)
    }
}

#[async_trait]
impl InventoryLedger for InMemoryLedger {
    async fn restock(
        &self,
        product_id: ProductId,
        quantity: u32,
        unit: Option<&str>,
    ) -> Result<InventoryTransaction, LedgerError> {
        let book = self.book_or_create(product_id, unit)?;
        let mut guard = book.lock().map_err(|_| poisoned())?;
        if let Some(unit) = unit {
            guard.item.set_unit(unit);
        }
        let mut events = guard.execute(StockCommand::Restock {
            quantity,
            occurred_at: Utc::now(),
        })?;
        debug!(%product_id, quantity, available = guard.item.available(), "restocked");
        events
            .pop()
            .ok_or_else(|| StoreError::Backend("restock produced no entry".into()).into())
    }

    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<InventoryTransaction, LedgerError> {
        self.with_book(product_id, |book| {
            let mut events = book.execute(StockCommand::Reserve {
                order_id,
                quantity,
                occurred_at: Utc::now(),
            })?;
            events
                .pop()
                .ok_or_else(|| StoreError::Backend("reserve produced no entry".into()).into())
        })
    }

    async fn release(&self, order_id: OrderId, product_id: ProductId) -> Result<bool, LedgerError> {
        self.with_book(product_id, |book| {
            let events = book.execute(StockCommand::Release {
                order_id,
                occurred_at: Utc::now(),
            })?;
            Ok(!events.is_empty())
        })
    }

    async fn commit(&self, order_id: OrderId, product_id: ProductId) -> Result<bool, LedgerError> {
        self.with_book(product_id, |book| {
            let events = book.execute(StockCommand::Commit {
                order_id,
                occurred_at: Utc::now(),
            })?;
            Ok(!events.is_empty())
        })
    }

    async fn record(&self, product_id: ProductId) -> Result<InventoryRecord, LedgerError> {
        self.with_book(product_id, |book| Ok(book.item.record()))
    }

    async fn transactions(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<InventoryTransaction>, LedgerError> {
        self.with_book(product_id, |book| Ok(book.log.clone()))
    }

    async fn verify(&self, product_id: ProductId) -> Result<LedgerCheck, LedgerError> {
        self.with_book(product_id, |book| {
            Ok(LedgerCheck {
                product_id,
                recorded: book.item.available(),
                replayed: net_quantity(&book.log),
            })
        })
    }

    async fn rebuild(&self, product_id: ProductId) -> Result<InventoryRecord, LedgerError> {
        self.with_book(product_id, |book| {
            book.item = StockItem::replay(product_id, book.item.unit().to_owned(), &book.log);
            Ok(book.item.record())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmshop_inventory::TransactionKind;

    #[tokio::test]
    async fn reserve_release_commit_flow() {
        let ledger = InMemoryLedger::new();
        let product = ProductId::new();
        let order = OrderId::new();

        ledger.restock(product, 5, Some("kg")).await.unwrap();
        ledger.reserve(order, product, 3).await.unwrap();
        assert_eq!(ledger.record(product).await.unwrap().quantity, 2);

        assert!(ledger.commit(order, product).await.unwrap());
        assert!(!ledger.commit(order, product).await.unwrap());
        assert!(matches!(
            ledger.release(order, product).await,
            Err(LedgerError::Inventory(InventoryError::ReservationCommitted { .. }))
        ));

        let kinds: Vec<TransactionKind> = ledger
            .transactions(product)
            .await
            .unwrap()
            .iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![TransactionKind::Restock, TransactionKind::Reserve, TransactionKind::Commit]
        );
    }

    #[tokio::test]
    async fn unknown_product_cannot_be_reserved() {
        let ledger = InMemoryLedger::new();
        let product = ProductId::new();
        let err = ledger.reserve(OrderId::new(), product, 1).await.unwrap_err();
        assert_eq!(err, LedgerError::Inventory(InventoryError::UnknownProduct(product)));
    }

    #[tokio::test]
    async fn rebuild_matches_verify() {
        let ledger = InMemoryLedger::new();
        let product = ProductId::new();
        ledger.restock(product, 10, None).await.unwrap();
        let order = OrderId::new();
        ledger.reserve(order, product, 4).await.unwrap();
        ledger.release(order, product).await.unwrap();

        let check = ledger.verify(product).await.unwrap();
        assert!(check.is_consistent());
        assert_eq!(check.replayed, 10);

        let record = ledger.rebuild(product).await.unwrap();
        assert_eq!(record.quantity, 10);
        assert_eq!(record.unit, "unit");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_never_oversell() {
        let ledger = Arc::new(InMemoryLedger::new());
        let product = ProductId::new();
        ledger.restock(product, 7, None).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                ledger.reserve(OrderId::new(), product, 1).await
            }));
        }

        let mut admitted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(LedgerError::Inventory(InventoryError::InsufficientStock { .. })) => {}
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        assert_eq!(admitted, 7);
        assert_eq!(ledger.record(product).await.unwrap().quantity, 0);
    }
}
