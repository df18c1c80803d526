use serde::{Deserialize, Serialize};

/// External anchor for a deposit credit: the on-chain transaction hash plus
/// the scanner cursor (`last`) it was picked up at.
#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct DepositRecord {
    pub id: i64,
    pub user_id: i64,
    pub tx_hash: String,
    pub amount: String,
    pub amount_cents: i64,
    pub last: i64,
    pub created_at: chrono::NaiveDateTime,
}
