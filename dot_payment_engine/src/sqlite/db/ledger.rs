use sqlx::SqliteConnection;

use crate::{
    db_types::{LedgerEntry, NewLedgerEntry},
    traits::PaymentStoreError,
};

/// Appends one entry to the ledger. The table is append-only: there are no update or delete
/// statements in this module, and none should ever be added.
pub async fn insert_entry(
    entry: NewLedgerEntry,
    conn: &mut SqliteConnection,
) -> Result<LedgerEntry, PaymentStoreError> {
    let entry = sqlx::query_as(
        r#"
            INSERT INTO ledger (
                block_number,
                position_in_block,
                transaction_bytes,
                sender,
                recipient,
                amount,
                currency,
                status,
                chain_name,
                transaction_hash
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *;
        "#,
    )
    .bind(entry.block_number)
    .bind(entry.position_in_block)
    .bind(entry.transaction_bytes)
    .bind(entry.sender)
    .bind(entry.recipient)
    .bind(entry.amount)
    .bind(entry.currency)
    .bind(entry.status.to_string())
    .bind(entry.chain_name)
    .bind(entry.transaction_hash)
    .fetch_one(conn)
    .await?;
    Ok(entry)
}

/// Every entry that names the account as sender or recipient, oldest first.
pub async fn fetch_entries_for_account(
    account: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<LedgerEntry>, PaymentStoreError> {
    let entries = sqlx::query_as(
        "SELECT * FROM ledger WHERE sender = $1 OR recipient = $2 ORDER BY id ASC",
    )
    .bind(account)
    .bind(account)
    .fetch_all(conn)
    .await?;
    Ok(entries)
}
