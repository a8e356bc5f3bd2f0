use dpg_common::TokenAmount;
use log::{debug, trace};
use sqlx::{sqlite::SqliteRow, FromRow, QueryBuilder, SqliteConnection};

use crate::{
    db_types::{CreditResult, NewOrder, Order, OrderId, OrderUpdate, WithdrawalStatus},
    traits::PaymentStoreError,
};

/// Inserts the order into the database, returning `false` in the second parameter if an order
/// with the same id already exists.
pub async fn idempotent_insert(
    order: NewOrder,
    conn: &mut SqliteConnection,
) -> Result<(Order, bool), PaymentStoreError> {
    let inserted = match fetch_order_by_order_id(&order.order_id, conn).await? {
        Some(order) => (order, false),
        None => {
            let order = insert_order(order, conn).await?;
            debug!("📝️ Order {} inserted with id {}", order.order_id, order.id);
            (order, true)
        },
    };
    Ok(inserted)
}

/// Inserts a new order using the given connection. This is not atomic on its own; embed the call
/// in a transaction if atomicity with other statements is needed. The payment and withdrawal
/// statuses take their column defaults (`pending`, `waiting`).
async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, PaymentStoreError> {
    let order = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_id,
                amount,
                currency,
                payment_account,
                recipient,
                callback
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(order.order_id)
    .bind(order.amount)
    .bind(order.currency)
    .bind(order.payment_account)
    .bind(order.recipient)
    .bind(order.callback)
    .fetch_one(conn)
    .await?;
    Ok(order)
}

pub async fn fetch_order_by_order_id(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE order_id = $1").bind(order_id.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

/// Exact-match lookup on the deposit address.
pub async fn fetch_order_by_payment_account(
    account: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE payment_account = $1").bind(account).fetch_optional(conn).await?;
    Ok(order)
}

pub(crate) async fn update_order(
    id: &OrderId,
    update: OrderUpdate,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, PaymentStoreError> {
    if update.is_empty() {
        debug!("📝️ No fields to update for order {id}. Update request skipped.");
        return Err(PaymentStoreError::UpdateNoOp);
    }
    let mut builder = QueryBuilder::new("UPDATE orders SET updated_at = CURRENT_TIMESTAMP, ");
    let mut set_clause = builder.separated(", ");
    if let Some(amount) = update.new_amount {
        set_clause.push("amount = ");
        set_clause.push_bind_unseparated(amount);
    }
    if let Some(currency) = update.new_currency {
        set_clause.push("currency = ");
        set_clause.push_bind_unseparated(currency);
    }
    if let Some(callback) = update.new_callback {
        set_clause.push("callback = ");
        set_clause.push_bind_unseparated(callback);
    }
    builder.push(" WHERE order_id = ");
    builder.push_bind(id.as_str());
    builder.push(" RETURNING *");
    trace!("📝️ Executing query: {}", builder.sql());
    let res = builder.build().fetch_optional(conn).await?.map(|row: SqliteRow| Order::from_row(&row)).transpose()?;
    Ok(res)
}

/// The atomic credit: adds to the repaid tally, then flips a pending order to paid when the
/// target amount is set and covered. The two statements run on the same connection and are
/// expected to be wrapped in a transaction by the caller.
pub(crate) async fn credit_order(
    id: &OrderId,
    amount: TokenAmount,
    conn: &mut SqliteConnection,
) -> Result<CreditResult, PaymentStoreError> {
    let credited: Option<Order> = sqlx::query_as(
        "UPDATE orders SET repaid_amount = repaid_amount + $1, updated_at = CURRENT_TIMESTAMP WHERE order_id = $2 \
         RETURNING *",
    )
    .bind(amount)
    .bind(id.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    let credited = credited.ok_or_else(|| PaymentStoreError::OrderNotFound(id.clone()))?;
    let flipped: Option<Order> = sqlx::query_as(
        "UPDATE orders SET payment_status = 'paid', updated_at = CURRENT_TIMESTAMP WHERE order_id = $1 AND \
         payment_status = 'pending' AND amount IS NOT NULL AND repaid_amount >= amount RETURNING *",
    )
    .bind(id.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    match flipped {
        Some(order) => Ok(CreditResult { order, newly_paid: true }),
        None => Ok(CreditResult { order: credited, newly_paid: false }),
    }
}

pub(crate) async fn set_withdrawal_status(
    id: &OrderId,
    status: WithdrawalStatus,
    conn: &mut SqliteConnection,
) -> Result<Order, PaymentStoreError> {
    let result: Option<Order> = sqlx::query_as(
        "UPDATE orders SET withdrawal_status = $1, updated_at = CURRENT_TIMESTAMP WHERE order_id = $2 RETURNING *",
    )
    .bind(status.to_string())
    .bind(id.as_str())
    .fetch_optional(conn)
    .await?;
    result.ok_or_else(|| PaymentStoreError::OrderNotFound(id.clone()))
}

/// Compare-and-swap on the withdrawal status. `None` means the order was not in `from` (or does
/// not exist); nothing is changed in that case.
pub(crate) async fn transition_withdrawal_status(
    id: &OrderId,
    from: WithdrawalStatus,
    to: WithdrawalStatus,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, PaymentStoreError> {
    let result: Option<Order> = sqlx::query_as(
        "UPDATE orders SET withdrawal_status = $1, updated_at = CURRENT_TIMESTAMP WHERE order_id = $2 AND \
         withdrawal_status = $3 RETURNING *",
    )
    .bind(to.to_string())
    .bind(id.as_str())
    .bind(from.to_string())
    .fetch_optional(conn)
    .await?;
    Ok(result)
}
