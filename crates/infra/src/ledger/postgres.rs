//! Postgres-backed inventory ledger.
//!
//! The counter row in `inventory_records` is decremented with a guarded
//! `UPDATE ... WHERE quantity >= $q`, so two concurrent reservations can never
//! both take the last unit. The log entry and the reservation row are written
//! in the same transaction as the counter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use fmshop_core::{OrderId, ProductId};
use fmshop_inventory::{
    InventoryError, InventoryRecord, InventoryTransaction, ReservationState, TransactionKind,
    net_quantity,
};

use super::{InventoryLedger, LedgerCheck, LedgerError};
use crate::store::StoreError;
use crate::store::postgres::{from_i64, get, map_sqlx_error, to_i64};

const DEFAULT_UNIT: &str = "unit";

#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, LedgerError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e).into())
    }
}

fn state_str(state: ReservationState) -> &'static str {
    match state {
        ReservationState::Reserved => "reserved",
        ReservationState::Released => "released",
        ReservationState::Committed => "committed",
    }
}

fn parse_state(s: &str) -> Result<ReservationState, LedgerError> {
    match s {
        "reserved" => Ok(ReservationState::Reserved),
        "released" => Ok(ReservationState::Released),
        "committed" => Ok(ReservationState::Committed),
        other => Err(StoreError::Backend(format!("unknown reservation state {other}")).into()),
    }
}

async fn append(
    tx: &mut Transaction<'_, Postgres>,
    entry: InventoryTransaction,
) -> Result<InventoryTransaction, LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO inventory_transactions (product_id, sequence, kind, quantity, order_id, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.product_id.as_uuid())
    .bind(to_i64(entry.sequence, "sequence")?)
    .bind(entry.kind.as_str())
    .bind(i64::from(entry.quantity))
    .bind(entry.order_id.map(|id| *id.as_uuid()))
    .bind(entry.occurred_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| match map_sqlx_error("append_inventory_transaction", e) {
        // Another writer took this sequence number.
        StoreError::Duplicate(msg) => StoreError::Conflict(msg),
        other => other,
    })?;
    Ok(entry)
}

/// Lock the reservation row; `None` when the order never reserved the product.
async fn lock_reservation(
    tx: &mut Transaction<'_, Postgres>,
    order_id: OrderId,
    product_id: ProductId,
) -> Result<Option<(u32, ReservationState)>, LedgerError> {
    let row = sqlx::query(
        r#"
        SELECT quantity, state FROM inventory_reservations
        WHERE order_id = $1 AND product_id = $2
        FOR UPDATE
        "#,
    )
    .bind(order_id.as_uuid())
    .bind(product_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_reservation", e))?;

    match row {
        None => Ok(None),
        Some(row) => {
            let quantity: u32 = from_i64(get(&row, "quantity")?, "quantity")?;
            let state: String = get(&row, "state")?;
            Ok(Some((quantity, parse_state(&state)?)))
        }
    }
}

async fn set_reservation_state(
    tx: &mut Transaction<'_, Postgres>,
    order_id: OrderId,
    product_id: ProductId,
    state: ReservationState,
) -> Result<(), LedgerError> {
    sqlx::query("UPDATE inventory_reservations SET state = $3 WHERE order_id = $1 AND product_id = $2")
        .bind(order_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(state_str(state))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_reservation", e))?;
    Ok(())
}

/// Apply `delta` to the counter and return the new version.
async fn bump_counter(
    tx: &mut Transaction<'_, Postgres>,
    product_id: ProductId,
    delta: i64,
    now: DateTime<Utc>,
) -> Result<u64, LedgerError> {
    let row = sqlx::query(
        r#"
        UPDATE inventory_records
        SET quantity = quantity + $2, version = version + 1, updated_at = $3
        WHERE product_id = $1
        RETURNING version
        "#,
    )
    .bind(product_id.as_uuid())
    .bind(delta)
    .bind(now)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_inventory_record", e))?
    .ok_or(InventoryError::UnknownProduct(product_id))?;
    Ok(from_i64(get(&row, "version")?, "version")?)
}

fn transaction_from_row(row: &PgRow) -> Result<InventoryTransaction, LedgerError> {
    let kind: String = get(row, "kind")?;
    let order_id: Option<Uuid> = get(row, "order_id")?;
    Ok(InventoryTransaction {
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        sequence: from_i64(get(row, "sequence")?, "sequence")?,
        kind: TransactionKind::parse(&kind)
            .ok_or_else(|| StoreError::Backend(format!("unknown transaction kind {kind}")))?,
        quantity: from_i64(get(row, "quantity")?, "quantity")?,
        order_id: order_id.map(OrderId::from_uuid),
        occurred_at: get(row, "occurred_at")?,
    })
}

fn record_from_row(product_id: ProductId, row: &PgRow) -> Result<InventoryRecord, LedgerError> {
    Ok(InventoryRecord {
        product_id,
        quantity: get(row, "quantity")?,
        unit: get(row, "unit")?,
        last_updated: get(row, "updated_at")?,
    })
}

#[async_trait]
impl InventoryLedger for PostgresLedger {
    #[instrument(skip(self), err)]
    async fn restock(
        &self,
        product_id: ProductId,
        quantity: u32,
        unit: Option<&str>,
    ) -> Result<InventoryTransaction, LedgerError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity.into());
        }
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO inventory_records (product_id, quantity, unit, version, updated_at)
            VALUES ($1, $2, COALESCE($3, $4), 1, $5)
            ON CONFLICT (product_id) DO UPDATE
            SET quantity = inventory_records.quantity + EXCLUDED.quantity,
                unit = COALESCE($3, inventory_records.unit),
                version = inventory_records.version + 1,
                updated_at = EXCLUDED.updated_at
            RETURNING version
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(i64::from(quantity))
        .bind(unit)
        .bind(DEFAULT_UNIT)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("restock", e))?;
        let version: u64 = from_i64(get(&row, "version")?, "version")?;

        let entry = append(
            &mut tx,
            InventoryTransaction {
                product_id,
                sequence: version,
                kind: TransactionKind::Restock,
                quantity,
                order_id: None,
                occurred_at: now,
            },
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        debug!(%product_id, quantity, "restocked");
        Ok(entry)
    }

    #[instrument(skip(self), err)]
    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<InventoryTransaction, LedgerError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity.into());
        }
        let now = Utc::now();
        let mut tx = self.begin().await?;

        if lock_reservation(&mut tx, order_id, product_id).await?.is_some() {
            return Err(InventoryError::DuplicateReservation {
                order_id,
                product_id,
            }
            .into());
        }

        let decremented = sqlx::query(
            r#"
            UPDATE inventory_records
            SET quantity = quantity - $2, version = version + 1, updated_at = $3
            WHERE product_id = $1 AND quantity >= $2
            RETURNING version
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(i64::from(quantity))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("reserve", e))?;

        let Some(row) = decremented else {
            let available: Option<i64> =
                sqlx::query_scalar("SELECT quantity FROM inventory_records WHERE product_id = $1")
                    .bind(product_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("load_inventory_record", e))?;
            return Err(match available {
                None => InventoryError::UnknownProduct(product_id),
                Some(available) => InventoryError::InsufficientStock {
                    product_id,
                    requested: quantity,
                    available,
                },
            }
            .into());
        };
        let version: u64 = from_i64(get(&row, "version")?, "version")?;

        let entry = append(
            &mut tx,
            InventoryTransaction {
                product_id,
                sequence: version,
                kind: TransactionKind::Reserve,
                quantity,
                order_id: Some(order_id),
                occurred_at: now,
            },
        )
        .await?;

        sqlx::query(
            r#"
            INSERT INTO inventory_reservations (order_id, product_id, quantity, state)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(i64::from(quantity))
        .bind(state_str(ReservationState::Reserved))
        .execute(&mut *tx)
        .await
        .map_err(|e| match map_sqlx_error("insert_reservation", e) {
            StoreError::Duplicate(_) => LedgerError::Inventory(InventoryError::DuplicateReservation {
                order_id,
                product_id,
            }),
            other => other.into(),
        })?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(entry)
    }

    #[instrument(skip(self), err)]
    async fn release(&self, order_id: OrderId, product_id: ProductId) -> Result<bool, LedgerError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let quantity = match lock_reservation(&mut tx, order_id, product_id).await? {
            None => {
                return Err(InventoryError::ReservationNotFound {
                    order_id,
                    product_id,
                }
                .into());
            }
            Some((_, ReservationState::Released)) => return Ok(false),
            Some((_, ReservationState::Committed)) => {
                return Err(InventoryError::ReservationCommitted {
                    order_id,
                    product_id,
                }
                .into());
            }
            Some((quantity, ReservationState::Reserved)) => quantity,
        };

        let version = bump_counter(&mut tx, product_id, i64::from(quantity), now).await?;
        append(
            &mut tx,
            InventoryTransaction {
                product_id,
                sequence: version,
                kind: TransactionKind::Release,
                quantity,
                order_id: Some(order_id),
                occurred_at: now,
            },
        )
        .await?;
        set_reservation_state(&mut tx, order_id, product_id, ReservationState::Released).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(true)
    }

    #[instrument(skip(self), err)]
    async fn commit(&self, order_id: OrderId, product_id: ProductId) -> Result<bool, LedgerError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;

        let quantity = match lock_reservation(&mut tx, order_id, product_id).await? {
            None => {
                return Err(InventoryError::ReservationNotFound {
                    order_id,
                    product_id,
                }
                .into());
            }
            Some((_, ReservationState::Committed)) => return Ok(false),
            Some((_, ReservationState::Released)) => {
                return Err(InventoryError::ReservationReleased {
                    order_id,
                    product_id,
                }
                .into());
            }
            Some((quantity, ReservationState::Reserved)) => quantity,
        };

        let version = bump_counter(&mut tx, product_id, 0, now).await?;
        append(
            &mut tx,
            InventoryTransaction {
                product_id,
                sequence: version,
                kind: TransactionKind::Commit,
                quantity,
                order_id: Some(order_id),
                occurred_at: now,
            },
        )
        .await?;
        set_reservation_state(&mut tx, order_id, product_id, ReservationState::Committed).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(true)
    }

    async fn record(&self, product_id: ProductId) -> Result<InventoryRecord, LedgerError> {
        let row = sqlx::query(
            "SELECT quantity, unit, updated_at FROM inventory_records WHERE product_id = $1",
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_inventory_record", e))?
        .ok_or(InventoryError::UnknownProduct(product_id))?;
        record_from_row(product_id, &row)
    }

    async fn transactions(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<InventoryTransaction>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, sequence, kind, quantity, order_id, occurred_at
            FROM inventory_transactions
            WHERE product_id = $1
            ORDER BY sequence
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_inventory_transactions", e))?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn verify(&self, product_id: ProductId) -> Result<LedgerCheck, LedgerError> {
        let record = self.record(product_id).await?;
        let log = self.transactions(product_id).await?;
        Ok(LedgerCheck {
            product_id,
            recorded: record.quantity,
            replayed: net_quantity(&log),
        })
    }

    #[instrument(skip(self), err)]
    async fn rebuild(&self, product_id: ProductId) -> Result<InventoryRecord, LedgerError> {
        let mut tx = self.begin().await?;

        // Lock the counter first so no entry lands between replay and write.
        let locked = sqlx::query("SELECT version FROM inventory_records WHERE product_id = $1 FOR UPDATE")
            .bind(product_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_inventory_record", e))?;
        if locked.is_none() {
            return Err(InventoryError::UnknownProduct(product_id).into());
        }

        let rows = sqlx::query(
            r#"
            SELECT product_id, sequence, kind, quantity, order_id, occurred_at
            FROM inventory_transactions
            WHERE product_id = $1
            ORDER BY sequence
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_inventory_transactions", e))?;
        let log = rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let quantity = net_quantity(&log);

        let row = sqlx::query(
            r#"
            UPDATE inventory_records
            SET quantity = $2, updated_at = $3
            WHERE product_id = $1
            RETURNING quantity, unit, updated_at
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(quantity)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("rebuild_inventory_record", e))?;
        let record = record_from_row(product_id, &row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(record)
    }
}
