//! Postgres-backed settlement store, catalog and user directory.
//!
//! ## Error Mapping
//!
//! | SQLx error | code | StoreError |
//! |------------|------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (other) | any | `Backend` |
//! | PoolClosed / other | n/a | `Backend` |
//!
//! Version mismatches on `orders.version` surface as `Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use fmshop_core::{AggregateRoot, ExpectedVersion, Money, OrderId, PaymentId, ProductId, UserId};
use fmshop_orders::{Order, OrderItem, OrderParts, OrderStatus, ShippingInfo};
use fmshop_payments::{Payment, PaymentMethod, PaymentParts, PaymentStatus, Provider};

use super::{Catalog, Product, SettlementStore, StoreError, UserDirectory, UserProfile};

const SCHEMA: &str = include_str!("../../../../migrations/0001_settlement.sql");

const ORDER_COLUMNS: &str = r#"
    id, user_id, total_amount, status,
    recipient_name, recipient_phone, shipping_address,
    shipping_city, shipping_province, shipping_postal_code,
    version, created_at, updated_at
"#;

const PAYMENT_COLUMNS: &str = r#"
    id, order_id, amount, method, provider, provider_ref, status, attempt,
    checkout_url, qr_code, provider_trans_id, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub async fn upsert_product(&self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price, unit)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, price = EXCLUDED.price, unit = EXCLUDED.unit
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(to_i64(product.price.amount(), "price")?)
        .bind(&product.unit)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_product", e))?;
        Ok(())
    }

    pub async fn upsert_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, full_name, email, location)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET full_name = EXCLUDED.full_name, email = EXCLUDED.email, location = EXCLUDED.location
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(&user.location)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_user", e))?;
        Ok(())
    }

    async fn items_for(&self, order_ids: &[Uuid]) -> Result<Vec<(Uuid, OrderItem)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, name, quantity, price
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, line_no
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_order_items", e))?;

        rows.iter()
            .map(|row| {
                let order_id: Uuid = get(row, "order_id")?;
                let item = OrderItem {
                    product_id: ProductId::from_uuid(get(row, "product_id")?),
                    name: get(row, "name")?,
                    quantity: from_i64(get(row, "quantity")?, "quantity")?,
                    price: Money::new(from_i64(get(row, "price")?, "price")?),
                };
                Ok((order_id, item))
            })
            .collect()
    }

    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Order>, StoreError> {
        let ids: Vec<Uuid> = rows
            .iter()
            .map(|r| get::<Uuid>(r, "id"))
            .collect::<Result<_, _>>()?;
        let mut items = self.items_for(&ids).await?;

        rows.iter()
            .map(|row| {
                let id: Uuid = get(row, "id")?;
                let lines: Vec<OrderItem> = items
                    .iter()
                    .filter(|(order_id, _)| *order_id == id)
                    .map(|(_, item)| item.clone())
                    .collect();
                items.retain(|(order_id, _)| *order_id != id);
                order_from_row(row, lines)
            })
            .collect()
    }

    async fn update_order(
        tx: &mut Transaction<'_, Postgres>,
        order: &Order,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let expected_version = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(to_i64(v, "version")?),
        };
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, version = $3, updated_at = $4
            WHERE id = $1 AND ($5::BIGINT IS NULL OR version = $5)
            "#,
        )
        .bind(order.order_id().as_uuid())
        .bind(order.status().as_str())
        .bind(to_i64(order.version(), "version")?)
        .bind(order.updated_at())
        .bind(expected_version)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_order", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "order {} is not at {expected:?}",
                order.order_id()
            )));
        }
        Ok(())
    }

    async fn update_payment(
        tx: &mut Transaction<'_, Postgres>,
        payment: &Payment,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, checkout_url = $3, qr_code = $4,
                provider_trans_id = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(payment.id().as_uuid())
        .bind(payment.status().as_str())
        .bind(payment.checkout_url())
        .bind(payment.qr_code())
        .bind(payment.provider_trans_id())
        .bind(payment.updated_at())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_payment", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("payment {}", payment.id())));
        }
        Ok(())
    }
}

#[async_trait]
impl SettlementStore for PostgresStore {
    #[instrument(skip(self, order), fields(order_id = %order.order_id()), err)]
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let shipping = order.shipping();
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, total_amount, status,
                recipient_name, recipient_phone, shipping_address,
                shipping_city, shipping_province, shipping_postal_code,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(order.order_id().as_uuid())
        .bind(order.user_id().as_uuid())
        .bind(to_i64(order.total_amount().amount(), "total_amount")?)
        .bind(order.status().as_str())
        .bind(&shipping.recipient_name)
        .bind(&shipping.recipient_phone)
        .bind(&shipping.shipping_address)
        .bind(&shipping.shipping_city)
        .bind(&shipping.shipping_province)
        .bind(&shipping.shipping_postal_code)
        .bind(to_i64(order.version(), "version")?)
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;

        for (idx, item) in order.items().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, line_no, product_id, name, quantity, price)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.order_id().as_uuid())
            .bind(idx as i32 + 1)
            .bind(item.product_id.as_uuid())
            .bind(&item.name)
            .bind(i64::from(item.quantity))
            .bind(to_i64(item.price.amount(), "price")?)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_order_item", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, order), fields(order_id = %order.order_id(), status = %order.status()), err)]
    async fn save_order(&self, order: &Order, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Self::update_order(&mut tx, order, expected).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_order", e))?;
        Ok(self.hydrate(rows).await?.into_iter().next())
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("orders_for_user", e))?;
        self.hydrate(rows).await
    }

    async fn stale_open_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status IN ($1, $2) AND updated_at < $3 ORDER BY updated_at"
        ))
        .bind(OrderStatus::Pending.as_str())
        .bind(OrderStatus::AwaitingPayment.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("stale_open_orders", e))?;
        self.hydrate(rows).await
    }

    #[instrument(skip(self, payment), fields(payment_id = %payment.id(), provider_ref = payment.provider_ref()), err)]
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(payment.id().as_uuid())
        .bind(payment.order_id().as_uuid())
        .bind(to_i64(payment.amount().amount(), "amount")?)
        .bind(payment.method().as_str())
        .bind(payment.provider().as_str())
        .bind(payment.provider_ref())
        .bind(payment.status().as_str())
        .bind(to_i32(payment.attempt(), "attempt")?)
        .bind(payment.checkout_url())
        .bind(payment.qr_code())
        .bind(payment.provider_trans_id())
        .bind(payment.created_at())
        .bind(payment.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_payment", e))?;
        Ok(())
    }

    async fn save_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Self::update_payment(&mut tx, payment).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn payment_by_ref(
        &self,
        provider: Provider,
        provider_ref: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider = $1 AND provider_ref = $2"
        ))
        .bind(provider.as_str())
        .bind(provider_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("payment_by_ref", e))?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 ORDER BY attempt, created_at"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("payments_for_order", e))?;
        rows.iter().map(payment_from_row).collect()
    }

    #[instrument(skip(self, order, payments), fields(order_id = %order.order_id(), status = %order.status()), err)]
    async fn save_settlement(
        &self,
        order: &Order,
        expected: ExpectedVersion,
        payments: &[Payment],
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Dropping `tx` on error rolls the whole unit back.
        Self::update_order(&mut tx, order, expected).await?;
        for payment in payments {
            Self::update_payment(&mut tx, payment).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

#[async_trait]
impl Catalog for PostgresStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query("SELECT id, name, price, unit FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_product", e))?;

        row.map(|row| {
            Ok(Product {
                id: ProductId::from_uuid(get(&row, "id")?),
                name: get(&row, "name")?,
                price: Money::new(from_i64(get(&row, "price")?, "price")?),
                unit: get(&row, "unit")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl UserDirectory for PostgresStore {
    async fn get_user(&self, id: UserId) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query("SELECT id, full_name, email, location FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?;

        row.map(|row| {
            Ok(UserProfile {
                id: UserId::from_uuid(get(&row, "id")?),
                full_name: get(&row, "full_name")?,
                email: get(&row, "email")?,
                location: get(&row, "location")?,
            })
        })
        .transpose()
    }
}

fn order_from_row(row: &PgRow, items: Vec<OrderItem>) -> Result<Order, StoreError> {
    let status: String = get(row, "status")?;
    Ok(Order::restore(OrderParts {
        id: OrderId::from_uuid(get(row, "id")?),
        user_id: UserId::from_uuid(get(row, "user_id")?),
        items,
        total_amount: Money::new(from_i64(get(row, "total_amount")?, "total_amount")?),
        status: OrderStatus::parse(&status)
            .ok_or_else(|| StoreError::Backend(format!("unknown order status {status}")))?,
        shipping: ShippingInfo {
            recipient_name: get(row, "recipient_name")?,
            recipient_phone: get(row, "recipient_phone")?,
            shipping_address: get(row, "shipping_address")?,
            shipping_city: get(row, "shipping_city")?,
            shipping_province: get(row, "shipping_province")?,
            shipping_postal_code: get(row, "shipping_postal_code")?,
        },
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        version: from_i64(get(row, "version")?, "version")?,
    }))
}

fn payment_from_row(row: &PgRow) -> Result<Payment, StoreError> {
    let method: String = get(row, "method")?;
    let provider: String = get(row, "provider")?;
    let status: String = get(row, "status")?;
    let attempt: i32 = get(row, "attempt")?;

    Ok(Payment::restore(PaymentParts {
        id: PaymentId::from_uuid(get(row, "id")?),
        order_id: OrderId::from_uuid(get(row, "order_id")?),
        amount: Money::new(from_i64(get(row, "amount")?, "amount")?),
        method: PaymentMethod::parse(&method)
            .ok_or_else(|| StoreError::Backend(format!("unknown payment method {method}")))?,
        provider: Provider::parse(&provider)
            .ok_or_else(|| StoreError::Backend(format!("unknown provider {provider}")))?,
        provider_ref: get(row, "provider_ref")?,
        status: PaymentStatus::parse(&status)
            .ok_or_else(|| StoreError::Backend(format!("unknown payment status {status}")))?,
        attempt: u32::try_from(attempt)
            .map_err(|_| StoreError::Backend(format!("negative attempt {attempt}")))?,
        checkout_url: get(row, "checkout_url")?,
        qr_code: get(row, "qr_code")?,
        provider_trans_id: get(row, "provider_trans_id")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    }))
}

pub(crate) fn get<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Backend(format!("failed to read column {column}: {e}")))
}

pub(crate) fn to_i64(value: u64, field: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Backend(format!("{field} out of range")))
}

fn to_i32(value: u32, field: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Backend(format!("{field} out of range")))
}

pub(crate) fn from_i64<T: TryFrom<i64>>(value: i64, field: &str) -> Result<T, StoreError> {
    T::try_from(value).map_err(|_| StoreError::Backend(format!("{field} out of range: {value}")))
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_counters_are_backend_errors() {
        assert_eq!(to_i64(42, "sequence"), Ok(42));
        assert_eq!(
            to_i64(u64::MAX, "sequence"),
            Err(StoreError::Backend("sequence out of range".into()))
        );
        assert_eq!(to_i32(3, "attempt"), Ok(3));
        assert!(to_i32(u32::MAX, "attempt").is_err());

        let negative: Result<u64, _> = from_i64(-1, "sequence");
        assert_eq!(
            negative,
            Err(StoreError::Backend("sequence out of range: -1".into()))
        );
    }
}
