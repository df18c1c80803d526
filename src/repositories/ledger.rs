use sqlx::{PgPool, Postgres, Transaction};

use crate::models::cards::CardRecord;
use crate::models::deposits::DepositRecord;
use crate::models::rewards::{Reward, RewardReason};
use crate::models::withdrawals::WithdrawStatus;

/// Every balance mutation and its audit row commit or roll back together.
/// Debits carry the sufficient-funds check inside the UPDATE itself; a
/// zero-row result surfaces as a typed error, never as a silent no-op.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds for user {0}")]
    InsufficientFunds(i64),
    #[error("conflicting concurrent update for user {0}")]
    Conflict(i64),
    #[error("row {0} already processed")]
    AlreadyProcessed(i64),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct LedgerRepository {
    conn: PgPool,
}

impl LedgerRepository {
    pub fn new(conn: PgPool) -> Self {
        LedgerRepository { conn }
    }

    async fn insert_reward(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        amount_cents: i64,
        reason: RewardReason,
        address: &str,
        one: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO rewards (user_id, amount_cents, reason, address, one, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, NOW(), NOW())"#,
        )
        .bind(user_id)
        .bind(amount_cents)
        .bind(reason.code())
        .bind(address)
        .bind(one)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Deposit credit: balance + secondary counter + reason-1 audit row +
    /// the external anchor record, one atomic unit. The tx hash is the
    /// idempotency anchor; a hash seen before is rejected, not re-credited.
    pub async fn deposit(
        &self,
        user_id: i64,
        tx_hash: &str,
        raw_amount: &str,
        amount_cents: i64,
        last: i64,
    ) -> Result<(), LedgerError> {
        let existing = sqlx::query_as::<_, DepositRecord>(
            "SELECT * FROM deposit_records WHERE tx_hash = $1",
        )
        .bind(tx_hash)
        .fetch_optional(&self.conn)
        .await?;
        if let Some(existing) = existing {
            return Err(LedgerError::AlreadyProcessed(existing.id));
        }

        let mut tx = self.conn.begin().await?;

        let res = sqlx::query(
            r#"UPDATE users
               SET balance_cents = balance_cents + $1,
                   amount_two_cents = amount_two_cents + $1,
                   updated_at = NOW()
               WHERE id = $2"#,
        )
        .bind(amount_cents)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(LedgerError::Conflict(user_id));
        }

        Self::insert_reward(&mut tx, user_id, amount_cents, RewardReason::DepositCredit, "", 0)
            .await?;

        sqlx::query(
            r#"INSERT INTO deposit_records (user_id, tx_hash, amount, amount_cents, last, created_at)
               VALUES ($1, $2, $3, $4, $5, NOW())"#,
        )
        .bind(user_id)
        .bind(tx_hash)
        .bind(raw_amount)
        .bind(amount_cents)
        .bind(last)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Scanner cursor: highest `last` seen across deposit records.
    pub async fn last_deposit_cursor(&self) -> Result<i64, LedgerError> {
        let last: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(last), 0) FROM deposit_records")
            .fetch_one(&self.conn)
            .await?;

        Ok(last)
    }

    /// Lifetime-total propagation step for one ancestor. Deliberately its own
    /// atomic unit: one ancestor failing must not undo the others.
    pub async fn add_lifetime_total(&self, user_id: i64, amount_cents: i64) -> Result<(), LedgerError> {
        let res = sqlx::query(
            r#"UPDATE users
               SET my_total_amount_cents = my_total_amount_cents + $1, updated_at = NOW()
               WHERE id = $2"#,
        )
        .bind(amount_cents)
        .bind(user_id)
        .execute(&self.conn)
        .await?;
        if res.rows_affected() == 0 {
            return Err(LedgerError::Conflict(user_id));
        }

        Ok(())
    }

    /// Peer transfer: the only two-account atomic unit. Debit is guarded by
    /// the balance precondition; the credit and the reason-5 row ride the
    /// same transaction.
    pub async fn transfer(
        &self,
        from_user_id: i64,
        to_user_id: i64,
        to_address: &str,
        amount_cents: i64,
    ) -> Result<(), LedgerError> {
        let mut tx = self.conn.begin().await?;

        let res = sqlx::query(
            r#"UPDATE users
               SET balance_cents = balance_cents - $1, updated_at = NOW()
               WHERE id = $2 AND balance_cents >= $1"#,
        )
        .bind(amount_cents)
        .bind(from_user_id)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(LedgerError::InsufficientFunds(from_user_id));
        }

        let res = sqlx::query(
            r#"UPDATE users
               SET balance_cents = balance_cents + $1, updated_at = NOW()
               WHERE id = $2"#,
        )
        .bind(amount_cents)
        .bind(to_user_id)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(LedgerError::Conflict(to_user_id));
        }

        Self::insert_reward(
            &mut tx,
            from_user_id,
            amount_cents,
            RewardReason::PeerTransfer,
            to_address,
            0,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Withdrawal request: guarded debit + withdraw row (`rewarded`) +
    /// reason-2 audit row.
    pub async fn withdraw(
        &self,
        user_id: i64,
        amount_cents: i64,
        rel_amount_cents: i64,
        address: &str,
    ) -> Result<(), LedgerError> {
        let mut tx = self.conn.begin().await?;

        let res = sqlx::query(
            r#"UPDATE users
               SET balance_cents = balance_cents - $1, updated_at = NOW()
               WHERE id = $2 AND balance_cents >= $1"#,
        )
        .bind(amount_cents)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(LedgerError::InsufficientFunds(user_id));
        }

        sqlx::query(
            r#"INSERT INTO withdrawals (user_id, amount_cents, rel_amount_cents, status, address, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, NOW(), NOW())"#,
        )
        .bind(user_id)
        .bind(amount_cents)
        .bind(rel_amount_cents)
        .bind(WithdrawStatus::Rewarded.as_str())
        .bind(address)
        .execute(&mut *tx)
        .await?;

        Self::insert_reward(&mut tx, user_id, amount_cents, RewardReason::WithdrawDebit, address, 0)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn update_withdraw_status(
        &self,
        withdraw_id: i64,
        from: WithdrawStatus,
        to: WithdrawStatus,
    ) -> Result<(), LedgerError> {
        let res = sqlx::query(
            "UPDATE withdrawals SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
        )
        .bind(to.as_str())
        .bind(withdraw_id)
        .bind(from.as_str())
        .execute(&self.conn)
        .await?;
        if res.rows_affected() == 0 {
            return Err(LedgerError::Conflict(withdraw_id));
        }

        Ok(())
    }

    /// Provisional card-funding debit: takes the price, flips the order
    /// sentinel to `"do"`, stores the KYC pass-through fields and the
    /// issuer-side holder/product ids, and appends the reason-3 row. The
    /// `card_order_id = 'no'` precondition rejects double requests.
    #[allow(clippy::too_many_arguments)]
    pub async fn card_funding_debit(
        &self,
        user_id: i64,
        price_cents: i64,
        request: &crate::models::users::CardRequest,
        holder_id: i64,
        product_id: i64,
        max_card_quota: i64,
    ) -> Result<(), LedgerError> {
        let mut tx = self.conn.begin().await?;

        let res = sqlx::query(
            r#"UPDATE users
               SET balance_cents = balance_cents - $1,
                   card_order_id = 'do',
                   card_user_id = $3,
                   product_id = $4,
                   max_card_quota = $5,
                   first_name = $6,
                   last_name = $7,
                   birth_date = $8,
                   email = $9,
                   country_code = $10,
                   phone = $11,
                   city = $12,
                   country = $13,
                   street = $14,
                   postal_code = $15,
                   updated_at = NOW()
               WHERE id = $2 AND balance_cents >= $1 AND card_order_id = 'no'"#,
        )
        .bind(price_cents)
        .bind(user_id)
        .bind(holder_id.to_string())
        .bind(product_id.to_string())
        .bind(max_card_quota)
        .bind(&request.first_name)
        .bind(&request.last_name)
        .bind(&request.birth_date)
        .bind(&request.email)
        .bind(&request.country_code)
        .bind(&request.phone)
        .bind(&request.city)
        .bind(&request.country)
        .bind(&request.street)
        .bind(&request.postal_code)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(LedgerError::InsufficientFunds(user_id));
        }

        Self::insert_reward(&mut tx, user_id, price_cents, RewardReason::CardFundingDebit, "", 0)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Compensating rollback: refund the provisional debit, reset the card
    /// sentinels, append the reason-7 row. The guard makes a second rollback
    /// of an already-reset user a conflict instead of a double refund.
    pub async fn rollback_card(&self, user_id: i64, refund_cents: i64) -> Result<(), LedgerError> {
        let mut tx = self.conn.begin().await?;

        let res = sqlx::query(
            r#"UPDATE users
               SET balance_cents = balance_cents + $1,
                   card_order_id = 'no',
                   card = 'no',
                   updated_at = NOW()
               WHERE id = $2 AND (card_order_id <> 'no' OR card <> 'no')"#,
        )
        .bind(refund_cents)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(LedgerError::Conflict(user_id));
        }

        Self::insert_reward(&mut tx, user_id, refund_cents, RewardReason::CardRollbackRefund, "", 0)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Commission credit. The `vip = $3` precondition pins the tier the walk
    /// planned against; a concurrent tier change voids the payout.
    pub async fn commission_credit(
        &self,
        user_id: i64,
        amount_cents: i64,
        vip: i64,
        reason: RewardReason,
        counterparty: &str,
    ) -> Result<(), LedgerError> {
        let mut tx = self.conn.begin().await?;

        let res = sqlx::query(
            r#"UPDATE users
               SET balance_cents = balance_cents + $1, updated_at = NOW()
               WHERE id = $2 AND vip = $3"#,
        )
        .bind(amount_cents)
        .bind(user_id)
        .bind(vip)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(LedgerError::Conflict(user_id));
        }

        Self::insert_reward(&mut tx, user_id, amount_cents, reason, counterparty, vip).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Appends the reason-9 work-queue row consumed by the second-track pass.
    pub async fn enqueue_second_track(&self, user_id: i64, address: &str) -> Result<(), LedgerError> {
        let mut tx = self.conn.begin().await?;
        Self::insert_reward(&mut tx, user_id, 0, RewardReason::SecondTrackSource, address, 0).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Unconsumed queue rows, oldest first.
    pub async fn unprocessed_second_track(&self) -> Result<Vec<Reward>, LedgerError> {
        let rows = sqlx::query_as::<_, Reward>(
            "SELECT * FROM rewards WHERE reason = $1 AND one = 0 ORDER BY id ASC",
        )
        .bind(RewardReason::SecondTrackSource.code())
        .fetch_all(&self.conn)
        .await?;

        Ok(rows)
    }

    /// Marks a queue row consumed. Happens before the payout walk so a
    /// failing walk can never cause reprocessing on the next pass.
    pub async fn mark_second_track_processed(&self, reward_id: i64) -> Result<(), LedgerError> {
        let res = sqlx::query("UPDATE rewards SET one = 1, updated_at = NOW() WHERE id = $1 AND one = 0")
            .bind(reward_id)
            .execute(&self.conn)
            .await?;
        if res.rows_affected() == 0 {
            return Err(LedgerError::AlreadyProcessed(reward_id));
        }

        Ok(())
    }

    /// Callback audit row. No balance effect.
    pub async fn insert_card_record(
        &self,
        user_id: i64,
        record_type: i16,
        remark: &str,
        code: &str,
        opt: &str,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"INSERT INTO card_records (user_id, record_type, remark, code, opt, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, NOW(), NOW())"#,
        )
        .bind(user_id)
        .bind(record_type)
        .bind(remark)
        .bind(code)
        .bind(opt)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    /// Callback audit trail of one user, newest first.
    pub async fn card_records_of_user(&self, user_id: i64) -> Result<Vec<CardRecord>, LedgerError> {
        let rows = sqlx::query_as::<_, CardRecord>(
            "SELECT * FROM card_records WHERE user_id = $1 ORDER BY id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(rows)
    }

    pub async fn first_rewarded_withdraw(
        &self,
    ) -> Result<Option<crate::models::withdrawals::Withdraw>, LedgerError> {
        let row = sqlx::query_as::<_, crate::models::withdrawals::Withdraw>(
            "SELECT * FROM withdrawals WHERE status = $1 ORDER BY id ASC LIMIT 1",
        )
        .bind(WithdrawStatus::Rewarded.as_str())
        .fetch_optional(&self.conn)
        .await?;

        Ok(row)
    }
}
