use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use fmshop_core::{AggregateRoot, ExpectedVersion, Money, OrderId, PaymentId, UserId};
use fmshop_inventory::InventoryError;
use fmshop_orders::{CancelReason, Cart, CartItem, Order, OrderStatus, ShippingInfo};
use fmshop_payments::{
    CallbackAck, CheckoutRequest, GatewayError, GatewayNotification, GatewayRegistry,
    GatewayStatus, Payment, PaymentGateway, PaymentMethod, PaymentStatus, Provider,
};

use super::error::SettlementError;
use super::locks::OrderLocks;
use crate::ledger::{InventoryLedger, LedgerError};
use crate::retry::RetryPolicy;
use crate::store::{Catalog, SettlementStore, UserDirectory};

/// Limits the coordinator enforces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPolicy {
    /// Age after which an open order counts as abandoned.
    pub payment_timeout: Duration,
    /// Checkout attempts per order, the first one included.
    pub max_payment_attempts: u32,
    /// In-call retries for retryable gateway failures.
    pub gateway_retry: RetryPolicy,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            payment_timeout: Duration::from_secs(15 * 60),
            max_payment_attempts: 3,
            gateway_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutCommand {
    pub user_id: UserId,
    pub items: Vec<CartItem>,
    pub shipping: Option<ShippingInfo>,
    pub method: PaymentMethod,
}

/// What the customer needs to go and pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutReceipt {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub total_amount: Money,
    pub payment_id: PaymentId,
    pub provider: Provider,
    pub provider_ref: String,
    pub checkout_url: Option<String>,
    pub qr_code: Option<String>,
}

impl CheckoutReceipt {
    fn new(order: &Order, payment: &Payment) -> Self {
        Self {
            order_id: order.order_id(),
            status: order.status(),
            total_amount: order.total_amount(),
            payment_id: payment.id(),
            provider: payment.provider(),
            provider_ref: payment.provider_ref().to_owned(),
            checkout_url: payment.checkout_url().map(str::to_owned),
            qr_code: payment.qr_code().map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderStatusView {
    pub order_id: OrderId,
    pub status: OrderStatus,
    /// Status of the latest payment attempt.
    pub payment_status: Option<PaymentStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDetail {
    pub order: Order,
    /// Oldest attempt first.
    pub payments: Vec<Payment>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub paid: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Resolved by someone else before the sweeper got the lock.
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepOutcome {
    Paid,
    Failed,
    Cancelled,
    Skipped,
}

/// Drives an order from cart to settled payment.
///
/// Every state change of an existing order happens under that order's lock,
/// so callbacks, user cancellation, retries and the abandonment sweep never
/// interleave on the same order. Inventory is released or committed before
/// the order/payment pair is written; both ledger operations are idempotent,
/// so a redelivered callback repairs a crash between the two steps.
pub struct SettlementCoordinator {
    store: Arc<dyn SettlementStore>,
    ledger: Arc<dyn InventoryLedger>,
    catalog: Arc<dyn Catalog>,
    users: Arc<dyn UserDirectory>,
    gateways: GatewayRegistry,
    locks: OrderLocks,
    policy: SettlementPolicy,
}

impl core::fmt::Debug for SettlementCoordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SettlementCoordinator")
            .field("gateways", &self.gateways)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SettlementCoordinator {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        ledger: Arc<dyn InventoryLedger>,
        catalog: Arc<dyn Catalog>,
        users: Arc<dyn UserDirectory>,
        gateways: GatewayRegistry,
        policy: SettlementPolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            catalog,
            users,
            gateways,
            locks: OrderLocks::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &SettlementPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &Arc<dyn InventoryLedger> {
        &self.ledger
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    /// Create the order, reserve its lines and open a checkout.
    ///
    /// On a stock shortfall every line reserved so far is released and the
    /// order is cancelled; it never reaches `awaiting_payment`.
    #[instrument(skip(self, command), fields(user_id = %command.user_id, method = command.method.as_str()), err)]
    pub async fn checkout(&self, command: CheckoutCommand) -> Result<CheckoutReceipt, SettlementError> {
        let cart = Cart::new(command.items)?;
        let gateway = self.gateways.get(command.method.provider())?;

        let mut snapshots = HashMap::new();
        for product_id in cart.product_ids() {
            if let Some(product) = self.catalog.get_product(product_id).await? {
                snapshots.insert(product_id, product.snapshot());
            }
        }
        let profile = self.users.get_user(command.user_id).await?;
        let shipping = command.shipping.unwrap_or_default().with_defaults(
            profile.as_ref().and_then(|u| u.full_name.as_deref()),
            profile.as_ref().and_then(|u| u.location.as_deref()),
        );

        let mut order = Order::create(
            command.user_id,
            &cart,
            shipping,
            |id| snapshots.get(&id).cloned(),
            Utc::now(),
        )?;
        let order_id = order.order_id();
        self.store.insert_order(&order).await?;
        let _guard = self.locks.lock(order_id).await;
        info!(%order_id, total = %order.total_amount(), "order created");

        if let Err(err) = self.reserve_all(&order).await {
            warn!(%order_id, reason = err.reason_code(), error = %err, "checkout rolled back");
            self.abandon_checkout(&mut order, CancelReason::OutOfStock).await;
            return Err(err);
        }

        let expected = ExpectedVersion::Exact(order.version());
        order.mark_awaiting_payment(Utc::now())?;
        if let Err(err) = self.store.save_order(&order, expected).await {
            warn!(%order_id, error = %err, "order not moved to awaiting payment; abandoning");
            match self.load_order(order_id).await {
                Ok(mut stored) => self.abandon_checkout(&mut stored, CancelReason::Abandoned).await,
                Err(load_err) => {
                    error!(%order_id, error = %load_err, "order left pending for the sweep");
                }
            }
            return Err(err.into());
        }
        info!(%order_id, "order awaiting payment");

        let payment = self
            .start_payment(&mut order, gateway.as_ref(), command.method, 1)
            .await?;
        Ok(CheckoutReceipt::new(&order, &payment))
    }

    /// Verify, then apply, a provider callback.
    ///
    /// Nothing is read or written before the signature checks out.
    #[instrument(skip(self, raw_body, signature), err)]
    pub async fn handle_callback(
        &self,
        provider: Provider,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<CallbackAck, SettlementError> {
        let gateway = self.gateways.get(provider)?;
        let notification = gateway.verify_callback(raw_body, signature).inspect_err(|err| {
            warn!(%provider, error = %err, "callback rejected");
        })?;

        let provider_ref = notification.provider_ref.clone();
        let payment = self.payment_by_ref(provider, &provider_ref).await?;
        let order_id = payment.order_id();

        let _guard = self.locks.lock(order_id).await;
        // Reload under the lock; a concurrent duplicate may have settled it.
        let payment = self.payment_by_ref(provider, &provider_ref).await?;
        let mut order = self.load_order(order_id).await?;
        self.apply_notification(&mut order, payment, &notification).await
    }

    /// Provider-specific response body for a callback outcome. `None` when the
    /// provider is not configured.
    pub fn callback_response(
        &self,
        provider: Provider,
        outcome: &Result<CallbackAck, SettlementError>,
    ) -> Option<serde_json::Value> {
        let gateway = self.gateways.get(provider).ok()?;
        let ack = match outcome {
            Ok(ack) => ack.clone(),
            Err(SettlementError::Gateway(GatewayError::InvalidSignature)) => {
                CallbackAck::InvalidSignature
            }
            Err(err) => CallbackAck::Failed(err.reason_code().to_owned()),
        };
        Some(gateway.acknowledge(&ack))
    }

    pub async fn query_order_status(&self, order_id: OrderId) -> Result<OrderStatusView, SettlementError> {
        let order = self.load_order(order_id).await?;
        let payments = self.store.payments_for_order(order_id).await?;
        Ok(OrderStatusView {
            order_id,
            status: order.status(),
            payment_status: payments.last().map(Payment::status),
        })
    }

    pub async fn order_detail(&self, order_id: OrderId) -> Result<OrderDetail, SettlementError> {
        let order = self.load_order(order_id).await?;
        let payments = self.store.payments_for_order(order_id).await?;
        Ok(OrderDetail { order, payments })
    }

    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, SettlementError> {
        Ok(self.store.orders_for_user(user_id).await?)
    }

    /// Owner-initiated cancellation of an unpaid order.
    #[instrument(skip(self), err)]
    pub async fn cancel_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order, SettlementError> {
        let _guard = self.locks.lock(order_id).await;
        let mut order = self.load_order(order_id).await?;
        if order.user_id() != user_id {
            // Do not reveal other users' orders.
            return Err(SettlementError::OrderNotFound(order_id));
        }
        if order.is_terminal() {
            return Err(SettlementError::InvalidOrderState {
                order_id,
                status: order.status(),
            });
        }
        self.cancel_locked(&mut order, CancelReason::UserRequested).await?;
        Ok(order)
    }

    /// Open a new checkout for an order whose last attempt failed at the
    /// gateway.
    #[instrument(skip(self), fields(method = method.as_str()), err)]
    pub async fn retry_payment(
        &self,
        order_id: OrderId,
        method: PaymentMethod,
    ) -> Result<CheckoutReceipt, SettlementError> {
        let gateway = self.gateways.get(method.provider())?;
        let _guard = self.locks.lock(order_id).await;
        let mut order = self.load_order(order_id).await?;
        if order.status() != OrderStatus::AwaitingPayment {
            return Err(SettlementError::InvalidOrderState {
                order_id,
                status: order.status(),
            });
        }

        let payments = self.store.payments_for_order(order_id).await?;
        if payments.iter().any(|p| !p.is_terminal()) {
            // A checkout is still open; the customer should finish that one.
            return Err(SettlementError::InvalidOrderState {
                order_id,
                status: order.status(),
            });
        }
        let attempts = u32::try_from(payments.len()).unwrap_or(u32::MAX);
        if attempts >= self.policy.max_payment_attempts {
            return Err(self.exhaust(&mut order, Vec::new(), attempts).await);
        }

        let payment = self
            .start_payment(&mut order, gateway.as_ref(), method, attempts + 1)
            .await?;
        Ok(CheckoutReceipt::new(&order, &payment))
    }

    /// Ask the provider about the order's open payment and apply the answer.
    #[instrument(skip(self), err)]
    pub async fn reconcile_payment(&self, order_id: OrderId) -> Result<OrderStatusView, SettlementError> {
        {
            let _guard = self.locks.lock(order_id).await;
            let mut order = self.load_order(order_id).await?;
            if order.status() == OrderStatus::AwaitingPayment {
                if let Some(payment) = self.open_payment(order_id).await? {
                    let gateway = self.gateways.get(payment.provider())?;
                    let notification = gateway.query_status(payment.provider_ref()).await?;
                    self.apply_notification(&mut order, payment, &notification)
                        .await?;
                }
            }
        }
        self.query_order_status(order_id).await
    }

    /// Resolve open orders untouched since `now - payment_timeout`.
    ///
    /// For `awaiting_payment` orders the open payment is queried first; only
    /// orders the provider cannot resolve are cancelled. `pending` orders are
    /// checkouts that failed before a payment was opened and are cancelled
    /// outright. Failures are counted and the sweep moves on.
    #[instrument(skip(self), err)]
    pub async fn sweep_abandoned(&self, now: DateTime<Utc>) -> Result<SweepReport, SettlementError> {
        let timeout = TimeDelta::from_std(self.policy.payment_timeout).unwrap_or(TimeDelta::MAX);
        let cutoff = now.checked_sub_signed(timeout).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let stale = self.store.stale_open_orders(cutoff).await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };
        for order in stale {
            let order_id = order.order_id();
            match self.sweep_one(order_id, cutoff).await {
                Ok(SweepOutcome::Paid) => report.paid += 1,
                Ok(SweepOutcome::Failed) => report.failed += 1,
                Ok(SweepOutcome::Cancelled) => report.cancelled += 1,
                Ok(SweepOutcome::Skipped) => report.skipped += 1,
                Err(err) => {
                    report.errors += 1;
                    warn!(%order_id, reason = err.reason_code(), error = %err, "sweep failed for order");
                }
            }
        }
        if report.examined > 0 {
            info!(?report, "abandonment sweep finished");
        }
        Ok(report)
    }

    async fn sweep_one(&self, order_id: OrderId, cutoff: DateTime<Utc>) -> Result<SweepOutcome, SettlementError> {
        let _guard = self.locks.lock(order_id).await;
        let mut order = self.load_order(order_id).await?;
        if order.is_terminal() || order.updated_at() >= cutoff {
            return Ok(SweepOutcome::Skipped);
        }

        let open = match order.status() {
            OrderStatus::AwaitingPayment => self.open_payment(order_id).await?,
            _ => None,
        };
        if let Some(payment) = open {
            let gateway = self.gateways.get(payment.provider())?;
            match gateway.query_status(payment.provider_ref()).await {
                Ok(notification) if notification.status != GatewayStatus::Pending => {
                    let status = notification.status;
                    self.apply_notification(&mut order, payment, &notification)
                        .await?;
                    return Ok(match status {
                        GatewayStatus::Success => SweepOutcome::Paid,
                        _ => SweepOutcome::Failed,
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(%order_id, error = %err, "status query failed; cancelling as unresolved");
                }
            }
        }

        self.cancel_locked(&mut order, CancelReason::Abandoned).await?;
        Ok(SweepOutcome::Cancelled)
    }

    async fn load_order(&self, order_id: OrderId) -> Result<Order, SettlementError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(SettlementError::OrderNotFound(order_id))
    }

    async fn payment_by_ref(&self, provider: Provider, provider_ref: &str) -> Result<Payment, SettlementError> {
        self.store
            .payment_by_ref(provider, provider_ref)
            .await?
            .ok_or_else(|| {
                warn!(%provider, provider_ref, "callback for unknown transaction");
                SettlementError::UnknownTransaction {
                    provider,
                    provider_ref: provider_ref.to_owned(),
                }
            })
    }

    async fn open_payment(&self, order_id: OrderId) -> Result<Option<Payment>, SettlementError> {
        let payments = self.store.payments_for_order(order_id).await?;
        Ok(payments.into_iter().rev().find(|p| !p.is_terminal()))
    }

    /// Apply a verified notification. Caller holds the order lock.
    async fn apply_notification(
        &self,
        order: &mut Order,
        payment: Payment,
        notification: &GatewayNotification,
    ) -> Result<CallbackAck, SettlementError> {
        let order_id = order.order_id();
        if payment.is_terminal() {
            if payment.status() == PaymentStatus::Failed
                && notification.status == GatewayStatus::Success
            {
                return self.flag_late_capture(order, payment, notification).await;
            }
            info!(%order_id, payment_id = %payment.id(), status = %payment.status(), "duplicate notification");
            return Ok(CallbackAck::Duplicate);
        }
        match notification.status {
            GatewayStatus::Pending => {
                debug!(%order_id, "payment still pending at provider");
            }
            GatewayStatus::Success => {
                // Failures may carry no amount; only captured money must match.
                if notification.amount != payment.amount() {
                    warn!(
                        %order_id,
                        expected = %payment.amount(),
                        actual = %notification.amount,
                        "notification amount does not match payment"
                    );
                    return Err(SettlementError::AmountMismatch {
                        expected: payment.amount(),
                        actual: notification.amount,
                    });
                }
                self.settle_paid(order, payment, notification.provider_trans_id.clone())
                    .await?;
            }
            GatewayStatus::Failed => self.settle_failed(order, payment).await?,
        }
        Ok(CallbackAck::Processed)
    }

    /// Money arrived for an attempt already failed (usually by the sweep).
    /// The attempt stays failed and the order keeps its status.
    async fn flag_late_capture(
        &self,
        order: &Order,
        mut payment: Payment,
        notification: &GatewayNotification,
    ) -> Result<CallbackAck, SettlementError> {
        payment.record_late_capture(notification.provider_trans_id.clone(), Utc::now())?;
        self.store.save_payment(&payment).await?;
        warn!(
            order_id = %order.order_id(),
            payment_id = %payment.id(),
            order_status = %order.status(),
            provider_ref = payment.provider_ref(),
            provider_trans_id = payment.provider_trans_id().unwrap_or_default(),
            amount = %notification.amount,
            "payment captured after attempt failed; refund required"
        );
        Ok(CallbackAck::Duplicate)
    }

    async fn settle_paid(
        &self,
        order: &mut Order,
        mut payment: Payment,
        provider_trans_id: Option<String>,
    ) -> Result<(), SettlementError> {
        let order_id = order.order_id();
        if order.status() != OrderStatus::AwaitingPayment {
            // Closing an order fails its open attempts, so this is a broken row.
            error!(%order_id, payment_id = %payment.id(), order_status = %order.status(), "open payment on closed order");
            return Err(SettlementError::InvalidOrderState {
                order_id,
                status: order.status(),
            });
        }
        let now = Utc::now();
        payment.mark_success(provider_trans_id, now)?;

        for item in order.items() {
            self.ledger.commit(order_id, item.product_id).await?;
        }
        let expected = ExpectedVersion::Exact(order.version());
        order.mark_paid(now)?;
        self.store
            .save_settlement(order, expected, std::slice::from_ref(&payment))
            .await?;
        info!(%order_id, payment_id = %payment.id(), amount = %payment.amount(), "order paid");
        Ok(())
    }

    async fn settle_failed(&self, order: &mut Order, mut payment: Payment) -> Result<(), SettlementError> {
        let order_id = order.order_id();
        let now = Utc::now();
        payment.mark_failed(now)?;

        if order.status() != OrderStatus::AwaitingPayment {
            self.store.save_payment(&payment).await?;
            return Ok(());
        }

        self.fail_order(order, std::slice::from_ref(&payment)).await?;
        info!(%order_id, payment_id = %payment.id(), "order payment failed");
        Ok(())
    }

    /// Release stock, fail open payments and cancel. Caller holds the lock.
    async fn cancel_locked(&self, order: &mut Order, reason: CancelReason) -> Result<(), SettlementError> {
        let order_id = order.order_id();
        let now = Utc::now();
        self.release_reservations(order).await?;

        let mut open: Vec<Payment> = self
            .store
            .payments_for_order(order_id)
            .await?
            .into_iter()
            .filter(|p| !p.is_terminal())
            .collect();
        for payment in &mut open {
            payment.mark_failed(now)?;
        }

        let expected = ExpectedVersion::Exact(order.version());
        order.mark_cancelled(reason, now)?;
        self.store.save_settlement(order, expected, &open).await?;
        info!(%order_id, reason = reason.as_str(), "order cancelled");
        Ok(())
    }

    /// Insert the attempt, then ask the gateway for a checkout.
    ///
    /// The payment row exists before the outbound call so a callback can never
    /// arrive for a reference we do not know.
    async fn start_payment(
        &self,
        order: &mut Order,
        gateway: &dyn PaymentGateway,
        method: PaymentMethod,
        attempt: u32,
    ) -> Result<Payment, SettlementError> {
        let order_id = order.order_id();
        let now = Utc::now();
        let payment_id = PaymentId::new();
        let mut payment = Payment::initiate(
            payment_id,
            order_id,
            order.total_amount(),
            method,
            gateway.transaction_ref(payment_id, now),
            attempt,
            now,
        );
        self.store.insert_payment(&payment).await?;

        let request = CheckoutRequest::for_order(order, &payment, now);
        let outcome = self
            .policy
            .gateway_retry
            .run(|| gateway.create_checkout(&request), GatewayError::is_retryable)
            .await;

        match outcome {
            Ok(session) => {
                payment.mark_pending(&session, Utc::now())?;
                self.store.save_payment(&payment).await?;
                info!(
                    %order_id,
                    %payment_id,
                    provider = %payment.provider(),
                    provider_ref = payment.provider_ref(),
                    attempt,
                    "checkout opened"
                );
                Ok(payment)
            }
            Err(err) if err.is_retryable() => {
                payment.mark_failed(Utc::now())?;
                if attempt >= self.policy.max_payment_attempts {
                    return Err(self.exhaust(order, vec![payment], attempt).await);
                }
                self.store.save_payment(&payment).await?;
                warn!(%order_id, attempt, error = %err, "gateway unavailable; payment deferred");
                Err(SettlementError::PaymentDeferred {
                    order_id,
                    message: err.to_string(),
                })
            }
            Err(err) => {
                warn!(%order_id, attempt, error = %err, "gateway rejected checkout");
                payment.mark_failed(Utc::now())?;
                self.fail_order(order, std::slice::from_ref(&payment)).await?;
                Err(err.into())
            }
        }
    }

    /// Fail the order after its last allowed attempt. Returns the error to
    /// surface, or the error that prevented the write.
    async fn exhaust(&self, order: &mut Order, payments: Vec<Payment>, attempts: u32) -> SettlementError {
        let order_id = order.order_id();
        match self.fail_order(order, &payments).await {
            Ok(()) => {
                warn!(%order_id, attempts, "payment attempts exhausted; order failed");
                SettlementError::PaymentAttemptsExhausted { order_id, attempts }
            }
            Err(err) => err,
        }
    }

    /// Release stock, then write the failed order with its payments.
    async fn fail_order(&self, order: &mut Order, payments: &[Payment]) -> Result<(), SettlementError> {
        self.release_reservations(order).await?;
        let expected = ExpectedVersion::Exact(order.version());
        order.mark_failed(Utc::now())?;
        self.store.save_settlement(order, expected, payments).await?;
        Ok(())
    }

    /// Reserve every line. On a shortfall the lines reserved so far are
    /// released; a failed release is returned in place of the shortfall.
    async fn reserve_all(&self, order: &Order) -> Result<(), SettlementError> {
        let order_id = order.order_id();
        let mut reserved = Vec::with_capacity(order.items().len());
        for item in order.items() {
            match self.ledger.reserve(order_id, item.product_id, item.quantity).await {
                Ok(_) => reserved.push(item.product_id),
                Err(err) => {
                    let mut rollback = Ok(());
                    for product_id in reserved.iter().rev() {
                        if let Err(release_err) = self.ledger.release(order_id, *product_id).await {
                            error!(%order_id, %product_id, error = %release_err, "rollback release failed");
                            rollback = Err(release_err);
                        }
                    }
                    rollback?;
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Cancel an order that never reached `awaiting_payment`. Caller holds the
    /// lock. Whatever is left undone is picked up by the sweep, which also
    /// covers `pending` orders.
    async fn abandon_checkout(&self, order: &mut Order, reason: CancelReason) {
        let order_id = order.order_id();
        match self.cancel_unplaced(order, reason).await {
            Ok(()) => info!(%order_id, reason = reason.as_str(), "checkout abandoned"),
            Err(err) => {
                error!(%order_id, error = %err, "checkout cleanup failed; order left for the sweep");
            }
        }
    }

    async fn cancel_unplaced(&self, order: &mut Order, reason: CancelReason) -> Result<(), SettlementError> {
        self.release_reservations(order).await?;
        if order.is_terminal() {
            return Ok(());
        }
        let expected = ExpectedVersion::Exact(order.version());
        order.mark_cancelled(reason, Utc::now())?;
        self.store.save_order(order, expected).await?;
        Ok(())
    }

    /// Release every line of `order`. Lines never reserved are skipped.
    async fn release_reservations(&self, order: &Order) -> Result<(), SettlementError> {
        let order_id = order.order_id();
        for item in order.items() {
            match self.ledger.release(order_id, item.product_id).await {
                Ok(_) => {}
                Err(LedgerError::Inventory(
                    InventoryError::ReservationNotFound { .. } | InventoryError::UnknownProduct(_),
                )) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}
