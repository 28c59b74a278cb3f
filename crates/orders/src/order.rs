use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fmshop_core::{
    Aggregate, AggregateRoot, DomainError, DomainResult, Event, Money, OrderId, ProductId, UserId,
};

use crate::cart::{Cart, ProductSnapshot, ShippingInfo};
use crate::error::OrderError;

/// Order status lifecycle.
///
/// `pending → awaiting_payment → {paid | failed}`, and
/// `pending | awaiting_payment → cancelled`. Paid, failed and cancelled are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    AwaitingPayment,
    Paid,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "awaiting_payment" => Some(OrderStatus::AwaitingPayment),
            "paid" => Some(OrderStatus::Paid),
            "failed" => Some(OrderStatus::Failed),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, AwaitingPayment)
                | (AwaitingPayment, Paid)
                | (AwaitingPayment, Failed)
                | (Pending, Cancelled)
                | (AwaitingPayment, Cancelled)
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an order was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    OutOfStock,
    UserRequested,
    Abandoned,
}

impl CancelReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CancelReason::OutOfStock => "out_of_stock",
            CancelReason::UserRequested => "user_requested",
            CancelReason::Abandoned => "abandoned",
        }
    }
}

/// Order line with its price snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    /// Unit price copied from the catalog when the order was created.
    pub price: Money,
}

impl OrderItem {
    pub fn subtotal(&self) -> DomainResult<Money> {
        self.price.times(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderCommand {
    Place {
        order_id: OrderId,
        user_id: UserId,
        items: Vec<OrderItem>,
        shipping: ShippingInfo,
        occurred_at: DateTime<Utc>,
    },
    MarkAwaitingPayment {
        occurred_at: DateTime<Utc>,
    },
    MarkPaid {
        occurred_at: DateTime<Utc>,
    },
    MarkFailed {
        occurred_at: DateTime<Utc>,
    },
    MarkCancelled {
        reason: CancelReason,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    Placed {
        order_id: OrderId,
        user_id: UserId,
        items: Vec<OrderItem>,
        total_amount: Money,
        shipping: ShippingInfo,
        occurred_at: DateTime<Utc>,
    },
    PaymentAwaited {
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    },
    Paid {
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    },
    Failed {
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    },
    Cancelled {
        order_id: OrderId,
        reason: CancelReason,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Placed { .. } => "orders.order.placed",
            OrderEvent::PaymentAwaited { .. } => "orders.order.payment_awaited",
            OrderEvent::Paid { .. } => "orders.order.paid",
            OrderEvent::Failed { .. } => "orders.order.failed",
            OrderEvent::Cancelled { .. } => "orders.order.cancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::Placed { occurred_at, .. }
            | OrderEvent::PaymentAwaited { occurred_at, .. }
            | OrderEvent::Paid { occurred_at, .. }
            | OrderEvent::Failed { occurred_at, .. }
            | OrderEvent::Cancelled { occurred_at, .. } => *occurred_at,
        }
    }
}

/// Flat view of a persisted order, used by stores to rebuild the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderParts {
    pub id: OrderId,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub shipping: ShippingInfo,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    items: Vec<OrderItem>,
    total_amount: Money,
    status: OrderStatus,
    shipping: ShippingInfo,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
    created: bool,
}

impl Order {
    /// Not-yet-placed instance, the starting point for `Place`.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            user_id: UserId::default(),
            items: Vec::new(),
            total_amount: Money::ZERO,
            status: OrderStatus::Pending,
            shipping: ShippingInfo::default(),
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            version: 0,
            created: false,
        }
    }

    /// Build a pending order from a validated cart.
    ///
    /// Prices come from `catalog` exactly once, here; the order never looks
    /// at the catalog again.
    pub fn create<F>(
        user_id: UserId,
        cart: &Cart,
        shipping: ShippingInfo,
        catalog: F,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError>
    where
        F: Fn(ProductId) -> Option<ProductSnapshot>,
    {
        let items = cart
            .items()
            .iter()
            .map(|line| {
                let product =
                    catalog(line.product_id).ok_or(OrderError::UnknownProduct(line.product_id))?;
                Ok(OrderItem {
                    product_id: line.product_id,
                    name: product.name,
                    quantity: line.quantity,
                    price: product.price,
                })
            })
            .collect::<Result<Vec<_>, OrderError>>()?;

        let order_id = OrderId::new();
        let mut order = Order::empty(order_id);
        order.execute(&OrderCommand::Place {
            order_id,
            user_id,
            items,
            shipping,
            occurred_at: now,
        })?;
        Ok(order)
    }

    /// Rebuild from persisted state.
    pub fn restore(parts: OrderParts) -> Self {
        Self {
            id: parts.id,
            user_id: parts.user_id,
            items: parts.items,
            total_amount: parts.total_amount,
            status: parts.status,
            shipping: parts.shipping,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
            version: parts.version,
            created: true,
        }
    }

    pub fn mark_awaiting_payment(&mut self, now: DateTime<Utc>) -> Result<Vec<OrderEvent>, OrderError> {
        self.execute(&OrderCommand::MarkAwaitingPayment { occurred_at: now })
    }

    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<Vec<OrderEvent>, OrderError> {
        self.execute(&OrderCommand::MarkPaid { occurred_at: now })
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) -> Result<Vec<OrderEvent>, OrderError> {
        self.execute(&OrderCommand::MarkFailed { occurred_at: now })
    }

    pub fn mark_cancelled(
        &mut self,
        reason: CancelReason,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.execute(&OrderCommand::MarkCancelled {
            reason,
            occurred_at: now,
        })
    }

    pub fn order_id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn shipping(&self) -> &ShippingInfo {
        &self.shipping
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = OrderError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::Placed {
                order_id,
                user_id,
                items,
                total_amount,
                shipping,
                occurred_at,
            } => {
                self.id = *order_id;
                self.user_id = *user_id;
                self.items = items.clone();
                self.total_amount = *total_amount;
                self.shipping = shipping.clone();
                self.status = OrderStatus::Pending;
                self.created_at = *occurred_at;
                self.created = true;
            }
            OrderEvent::PaymentAwaited { .. } => self.status = OrderStatus::AwaitingPayment,
            OrderEvent::Paid { .. } => self.status = OrderStatus::Paid,
            OrderEvent::Failed { .. } => self.status = OrderStatus::Failed,
            OrderEvent::Cancelled { .. } => self.status = OrderStatus::Cancelled,
        }

        self.updated_at = event.occurred_at();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::Place {
                order_id,
                user_id,
                items,
                shipping,
                occurred_at,
            } => self.handle_place(*order_id, *user_id, items, shipping, *occurred_at),
            OrderCommand::MarkAwaitingPayment { occurred_at } => {
                self.ensure_transition(OrderStatus::AwaitingPayment)?;
                Ok(vec![OrderEvent::PaymentAwaited {
                    order_id: self.id,
                    occurred_at: *occurred_at,
                }])
            }
            OrderCommand::MarkPaid { occurred_at } => {
                self.ensure_transition(OrderStatus::Paid)?;
                Ok(vec![OrderEvent::Paid {
                    order_id: self.id,
                    occurred_at: *occurred_at,
                }])
            }
            OrderCommand::MarkFailed { occurred_at } => {
                self.ensure_transition(OrderStatus::Failed)?;
                Ok(vec![OrderEvent::Failed {
                    order_id: self.id,
                    occurred_at: *occurred_at,
                }])
            }
            OrderCommand::MarkCancelled {
                reason,
                occurred_at,
            } => {
                self.ensure_transition(OrderStatus::Cancelled)?;
                Ok(vec![OrderEvent::Cancelled {
                    order_id: self.id,
                    reason: *reason,
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl Order {
    fn ensure_transition(&self, to: OrderStatus) -> Result<(), OrderError> {
        if !self.created {
            return Err(DomainError::not_found().into());
        }
        if !self.status.can_transition_to(to) {
            return Err(OrderError::InvalidStateTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    fn handle_place(
        &self,
        order_id: OrderId,
        user_id: UserId,
        items: &[OrderItem],
        shipping: &ShippingInfo,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.created {
            return Err(DomainError::conflict("order already placed").into());
        }
        if items.is_empty() {
            return Err(OrderError::EmptyCart);
        }
        if let Some(line) = items.iter().find(|i| i.quantity == 0) {
            return Err(OrderError::InvalidQuantity(line.product_id));
        }

        let subtotals = items
            .iter()
            .map(OrderItem::subtotal)
            .collect::<DomainResult<Vec<_>>>()?;
        let total_amount = Money::sum(subtotals)?;

        Ok(vec![OrderEvent::Placed {
            order_id,
            user_id,
            items: items.to_vec(),
            total_amount,
            shipping: shipping.clone(),
            occurred_at,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::CartItem;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn catalog(prices: &[(ProductId, u64)]) -> HashMap<ProductId, ProductSnapshot> {
        prices
            .iter()
            .map(|(id, price)| {
                (
                    *id,
                    ProductSnapshot {
                        product_id: *id,
                        name: format!("product-{id}"),
                        price: Money::new(*price),
                        unit: "kg".into(),
                    },
                )
            })
            .collect()
    }

    fn place(lines: &[(ProductId, u32)], products: &HashMap<ProductId, ProductSnapshot>) -> Order {
        let cart = Cart::new(lines.iter().map(|(product_id, quantity)| CartItem {
            product_id: *product_id,
            quantity: *quantity,
        }))
        .unwrap();
        Order::create(
            UserId::new(),
            &cart,
            ShippingInfo::default(),
            |id| products.get(&id).cloned(),
            test_time(),
        )
        .unwrap()
    }

    #[test]
    fn create_snapshots_prices_and_totals() {
        let a = ProductId::new();
        let b = ProductId::new();
        let mut products = catalog(&[(a, 50), (b, 100)]);

        let order = place(&[(a, 2), (b, 1)], &products);
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.total_amount(), Money::new(200));
        assert_eq!(order.version(), 1);

        // Later catalog changes do not reach the order.
        products.get_mut(&a).unwrap().price = Money::new(999);
        assert_eq!(order.items()[0].price, Money::new(50));
        assert_eq!(order.total_amount(), Money::new(200));
    }

    #[test]
    fn unknown_product_is_rejected() {
        let a = ProductId::new();
        let cart = Cart::new([CartItem {
            product_id: a,
            quantity: 1,
        }])
        .unwrap();
        let err = Order::create(
            UserId::new(),
            &cart,
            ShippingInfo::default(),
            |_| None,
            test_time(),
        )
        .unwrap_err();
        assert_eq!(err, OrderError::UnknownProduct(a));
    }

    #[test]
    fn place_rejects_empty_and_zero_lines() {
        let order = Order::empty(OrderId::new());
        let cmd = |items: Vec<OrderItem>| OrderCommand::Place {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            items,
            shipping: ShippingInfo::default(),
            occurred_at: test_time(),
        };

        assert_eq!(order.handle(&cmd(vec![])), Err(OrderError::EmptyCart));

        let p = ProductId::new();
        let zero = OrderItem {
            product_id: p,
            name: "rice".into(),
            quantity: 0,
            price: Money::new(10),
        };
        assert_eq!(
            order.handle(&cmd(vec![zero])),
            Err(OrderError::InvalidQuantity(p))
        );
    }

    #[test]
    fn happy_path_reaches_paid() {
        let a = ProductId::new();
        let mut order = place(&[(a, 1)], &catalog(&[(a, 10)]));

        order.mark_awaiting_payment(test_time()).unwrap();
        assert_eq!(order.status(), OrderStatus::AwaitingPayment);

        let events = order.mark_paid(test_time()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "orders.order.paid");
        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(order.version(), 3);
    }

    #[test]
    fn terminal_states_reject_transitions_without_change() {
        let a = ProductId::new();
        let mut order = place(&[(a, 1)], &catalog(&[(a, 10)]));
        order.mark_awaiting_payment(test_time()).unwrap();
        order.mark_paid(test_time()).unwrap();
        let before = order.clone();

        let err = order.mark_paid(test_time()).unwrap_err();
        assert_eq!(
            err,
            OrderError::InvalidStateTransition {
                from: OrderStatus::Paid,
                to: OrderStatus::Paid,
            }
        );
        assert!(order.mark_failed(test_time()).is_err());
        assert!(
            order
                .mark_cancelled(CancelReason::Abandoned, test_time())
                .is_err()
        );
        assert_eq!(order, before);
    }

    #[test]
    fn pending_cannot_be_paid_directly() {
        let a = ProductId::new();
        let mut order = place(&[(a, 1)], &catalog(&[(a, 10)]));
        assert!(matches!(
            order.mark_paid(test_time()),
            Err(OrderError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn pending_and_awaiting_orders_can_be_cancelled() {
        let a = ProductId::new();
        let products = catalog(&[(a, 10)]);

        let mut pending = place(&[(a, 1)], &products);
        pending
            .mark_cancelled(CancelReason::OutOfStock, test_time())
            .unwrap();
        assert_eq!(pending.status(), OrderStatus::Cancelled);

        let mut awaiting = place(&[(a, 1)], &products);
        awaiting.mark_awaiting_payment(test_time()).unwrap();
        awaiting
            .mark_cancelled(CancelReason::UserRequested, test_time())
            .unwrap();
        assert!(awaiting.is_terminal());
    }

    #[test]
    fn transitions_on_unplaced_order_are_not_found() {
        let mut order = Order::empty(OrderId::new());
        assert_eq!(
            order.mark_awaiting_payment(test_time()),
            Err(OrderError::Domain(DomainError::NotFound))
        );
    }

    #[test]
    fn restore_round_trips_persisted_fields() {
        let a = ProductId::new();
        let mut order = place(&[(a, 3)], &catalog(&[(a, 7)]));
        order.mark_awaiting_payment(test_time()).unwrap();

        let restored = Order::restore(OrderParts {
            id: order.order_id(),
            user_id: order.user_id(),
            items: order.items().to_vec(),
            total_amount: order.total_amount(),
            status: order.status(),
            shipping: order.shipping().clone(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
            version: order.version(),
        });
        assert_eq!(restored, order);
    }

    #[test]
    fn status_strings_parse_back() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::AwaitingPayment,
            OrderStatus::Paid,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("refunded"), None);
    }

    proptest! {
        /// Property: total equals Σ price × quantity over the snapshot.
        #[test]
        fn total_is_sum_of_line_subtotals(
            lines in prop::collection::vec((1u32..1_000, 0u64..5_000_000), 1..12)
        ) {
            let ids: Vec<ProductId> = lines.iter().map(|_| ProductId::new()).collect();
            let prices: Vec<(ProductId, u64)> =
                ids.iter().zip(&lines).map(|(id, (_, price))| (*id, *price)).collect();
            let quantities: Vec<(ProductId, u32)> =
                ids.iter().zip(&lines).map(|(id, (qty, _))| (*id, *qty)).collect();

            let order = place(&quantities, &catalog(&prices));
            let expected: u64 = lines.iter().map(|(q, p)| u64::from(*q) * p).sum();
            prop_assert_eq!(order.total_amount().amount(), expected);
        }
    }
}
