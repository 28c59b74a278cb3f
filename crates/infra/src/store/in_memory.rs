use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use fmshop_core::{AggregateRoot, ExpectedVersion, Money, OrderId, PaymentId, ProductId, UserId};
use fmshop_orders::Order;
use fmshop_payments::{Payment, Provider};

use super::{Catalog, Product, SettlementStore, StoreError, UserDirectory, UserProfile};

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    payments: HashMap<PaymentId, Payment>,
    payment_refs: HashMap<(Provider, String), PaymentId>,
}

impl Tables {
    fn check_version(&self, order: &Order, expected: ExpectedVersion) -> Result<(), StoreError> {
        let current = self
            .orders
            .get(order.id())
            .ok_or_else(|| StoreError::NotFound(format!("order {}", order.id())))?;
        if !expected.matches(current.version()) {
            return Err(StoreError::Conflict(format!(
                "order {}: expected {expected:?}, found {}",
                order.id(),
                current.version()
            )));
        }
        Ok(())
    }

    fn check_payment_exists(&self, payment: &Payment) -> Result<(), StoreError> {
        if self.payments.contains_key(&payment.id()) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("payment {}", payment.id())))
        }
    }
}

/// In-memory orders and payments.
///
/// Intended for tests/dev. One lock guards all tables, which is what makes
/// `save_settlement` atomic.
#[derive(Debug, Default)]
pub struct InMemorySettlementStore {
    tables: RwLock<Tables>,
}

impl InMemorySettlementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettlementStore for InMemorySettlementStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        if tables.orders.contains_key(order.id()) {
            return Err(StoreError::Duplicate(format!("order {}", order.id())));
        }
        tables.orders.insert(*order.id(), order.clone());
        Ok(())
    }

    async fn save_order(&self, order: &Order, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables.check_version(order, expected)?;
        tables.orders.insert(*order.id(), order.clone());
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.orders.get(&id).cloned())
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.user_id() == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then(b.order_id().cmp(&a.order_id())));
        Ok(orders)
    }

    async fn stale_open_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| !o.is_terminal() && o.updated_at() < cutoff)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.updated_at());
        Ok(orders)
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let key = (payment.provider(), payment.provider_ref().to_owned());
        if tables.payments.contains_key(&payment.id()) || tables.payment_refs.contains_key(&key) {
            return Err(StoreError::Duplicate(format!(
                "payment {} / {}",
                payment.provider(),
                payment.provider_ref()
            )));
        }
        tables.payment_refs.insert(key, payment.id());
        tables.payments.insert(payment.id(), payment.clone());
        Ok(())
    }

    async fn save_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables.check_payment_exists(payment)?;
        tables.payments.insert(payment.id(), payment.clone());
        Ok(())
    }

    async fn payment_by_ref(
        &self,
        provider: Provider,
        provider_ref: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .payment_refs
            .get(&(provider, provider_ref.to_owned()))
            .and_then(|id| tables.payments.get(id))
            .cloned())
    }

    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| p.order_id() == order_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| (p.attempt(), p.created_at()));
        Ok(payments)
    }

    async fn save_settlement(
        &self,
        order: &Order,
        expected: ExpectedVersion,
        payments: &[Payment],
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        // Validate everything before touching anything.
        tables.check_version(order, expected)?;
        for payment in payments {
            tables.check_payment_exists(payment)?;
        }

        tables.orders.insert(*order.id(), order.clone());
        for payment in payments {
            tables.payments.insert(payment.id(), payment.clone());
        }
        Ok(())
    }
}

/// In-memory product catalog.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, product: Product) -> Result<(), StoreError> {
        let mut products = self.products.write().map_err(|_| poisoned())?;
        products.insert(product.id, product);
        Ok(())
    }

    pub fn set_price(&self, id: ProductId, price: Money) -> Result<(), StoreError> {
        let mut products = self.products.write().map_err(|_| poisoned())?;
        let product = products
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;
        product.price = price;
        Ok(())
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let products = self.products.read().map_err(|_| poisoned())?;
        Ok(products.get(&id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, user: UserProfile) -> Result<(), StoreError> {
        let mut users = self.users.write().map_err(|_| poisoned())?;
        users.insert(user.id, user);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, id: UserId) -> Result<Option<UserProfile>, StoreError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmshop_orders::{CancelReason, Cart, CartItem, OrderStatus, ProductSnapshot, ShippingInfo};
    use fmshop_payments::PaymentMethod;

    fn test_order() -> Order {
        let product_id = ProductId::new();
        let cart = Cart::new([CartItem {
            product_id,
            quantity: 1,
        }])
        .unwrap();
        Order::create(
            UserId::new(),
            &cart,
            ShippingInfo::default(),
            |id| {
                Some(ProductSnapshot {
                    product_id: id,
                    name: "rice".into(),
                    price: Money::new(10),
                    unit: "kg".into(),
                })
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn test_payment(order: &Order, provider_ref: &str) -> Payment {
        Payment::initiate(
            PaymentId::new(),
            order.order_id(),
            order.total_amount(),
            PaymentMethod::ZaloPayApp,
            provider_ref,
            1,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = InMemorySettlementStore::new();
        let mut order = test_order();
        store.insert_order(&order).await.unwrap();

        let expected = ExpectedVersion::Exact(order.version());
        order.mark_awaiting_payment(Utc::now()).unwrap();
        store.save_order(&order, expected).await.unwrap();

        // Same expectation again is now stale.
        let err = store.save_order(&order, expected).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn provider_reference_is_unique() {
        let store = InMemorySettlementStore::new();
        let order = test_order();
        store.insert_order(&order).await.unwrap();

        store.insert_payment(&test_payment(&order, "ref-1")).await.unwrap();
        let err = store
            .insert_payment(&test_payment(&order, "ref-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        let found = store
            .payment_by_ref(Provider::ZaloPay, "ref-1")
            .await
            .unwrap();
        assert!(found.is_some());
        assert!(
            store
                .payment_by_ref(Provider::PayOs, "ref-1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn failed_settlement_writes_nothing() {
        let store = InMemorySettlementStore::new();
        let mut order = test_order();
        store.insert_order(&order).await.unwrap();
        let mut payment = test_payment(&order, "ref-2");
        store.insert_payment(&payment).await.unwrap();

        order.mark_awaiting_payment(Utc::now()).unwrap();
        payment.mark_failed(Utc::now()).unwrap();
        let err = store
            .save_settlement(&order, ExpectedVersion::Exact(99), &[payment.clone()])
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let stored = store.payments_for_order(order.order_id()).await.unwrap();
        assert_eq!(stored[0].status(), fmshop_payments::PaymentStatus::Initiated);
        let stored_order = store.get_order(order.order_id()).await.unwrap().unwrap();
        assert_eq!(stored_order.status(), OrderStatus::Pending);
    }

    #[tokio::test]
    async fn stale_open_orders_skips_closed_and_recent() {
        let store = InMemorySettlementStore::new();
        let pending = test_order();
        let mut awaiting = test_order();
        let mut cancelled = test_order();
        for order in [&pending, &awaiting, &cancelled] {
            store.insert_order(order).await.unwrap();
        }
        let expected = ExpectedVersion::Exact(awaiting.version());
        awaiting.mark_awaiting_payment(Utc::now()).unwrap();
        store.save_order(&awaiting, expected).await.unwrap();
        let expected = ExpectedVersion::Exact(cancelled.version());
        cancelled
            .mark_cancelled(CancelReason::OutOfStock, Utc::now())
            .unwrap();
        store.save_order(&cancelled, expected).await.unwrap();

        let cutoff = Utc::now() + chrono::TimeDelta::seconds(1);
        let stale = store.stale_open_orders(cutoff).await.unwrap();
        let ids: Vec<_> = stale.iter().map(Order::order_id).collect();
        assert_eq!(ids, vec![pending.order_id(), awaiting.order_id()]);

        let earlier = pending.updated_at() - chrono::TimeDelta::seconds(1);
        assert!(store.stale_open_orders(earlier).await.unwrap().is_empty());
    }
}
