use std::collections::HashMap;

use anyhow::bail;
use sqlx::PgPool;

use crate::models::referrals::{encode_code, Referral};
use crate::models::users::User;

#[derive(Clone)]
pub struct UserRepository {
    conn: PgPool,
}

impl UserRepository {
    pub fn new(conn: PgPool) -> Self {
        UserRepository { conn }
    }

    /// Signup creates the user row and its referral record as one atomic
    /// pair. The new code is the sponsor's code with the sponsor appended;
    /// a user with no sponsor gets an empty code.
    pub async fn insert_user(
        &self,
        address: &str,
        sponsor_id: Option<i64>,
    ) -> Result<User, anyhow::Error> {
        let code = match sponsor_id {
            Some(sponsor_id) => {
                let sponsor = self.referral_of(sponsor_id).await?;
                match sponsor {
                    Some(sponsor) => encode_code(&sponsor.code, sponsor_id),
                    None => bail!("sponsor {} has no referral record", sponsor_id),
                }
            }
            None => String::new(),
        };

        let mut tx = self.conn.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"INSERT INTO users (address, created_at, updated_at)
               VALUES ($1, NOW(), NOW())
               RETURNING *"#,
        )
        .bind(address)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO referrals (user_id, code, created_at, updated_at)
               VALUES ($1, $2, NOW(), NOW())"#,
        )
        .bind(user.id)
        .bind(&code)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(user)
    }

    pub async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>, anyhow::Error> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    pub async fn get_user_by_address(&self, address: &str) -> Result<Option<User>, anyhow::Error> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE address = $1")
            .bind(address)
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    pub async fn get_user_by_card(&self, card: &str) -> Result<Option<User>, anyhow::Error> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE card = $1")
            .bind(card)
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    pub async fn get_user_by_holder_id(
        &self,
        holder_id: &str,
    ) -> Result<Option<User>, anyhow::Error> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE card_user_id = $1")
            .bind(holder_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    pub async fn referral_of(&self, user_id: i64) -> Result<Option<Referral>, anyhow::Error> {
        let referral = sqlx::query_as::<_, Referral>("SELECT * FROM referrals WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(referral)
    }

    /// Referral codes of every user, keyed by user id. Loaded once per queue
    /// pass alongside the user snapshot.
    pub async fn referral_codes_snapshot(&self) -> Result<HashMap<i64, String>, anyhow::Error> {
        let rows = sqlx::query_as::<_, Referral>("SELECT * FROM referrals")
            .fetch_all(&self.conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|referral| (referral.user_id, referral.code))
            .collect())
    }

    /// Pass-scoped snapshot of every user, keyed by id. Rebuilt fresh at the
    /// start of each batch run; never held across passes.
    pub async fn all_users_snapshot(&self) -> Result<HashMap<i64, User>, anyhow::Error> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id ASC")
            .fetch_all(&self.conn)
            .await?;

        Ok(users.into_iter().map(|user| (user.id, user)).collect())
    }

    /// Users waiting in `PENDING_HOLDER`: provisional debit taken, no issuer
    /// order yet.
    pub async fn users_open_card(&self) -> Result<Vec<User>, anyhow::Error> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE card_order_id = 'do' ORDER BY id ASC",
        )
        .fetch_all(&self.conn)
        .await?;

        Ok(users)
    }

    /// Users in `CARD_ORDER_CREATED`: issuer order exists, PAN not yet known.
    pub async fn users_card_pending(&self) -> Result<Vec<User>, anyhow::Error> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE card <> 'no' AND card_number = 'no' ORDER BY id ASC",
        )
        .fetch_all(&self.conn)
        .await?;

        Ok(users)
    }

    /// Persists the issuer order, leaving `PENDING_HOLDER`. Guarded by the
    /// `"do"` sentinel so a stale pass cannot overwrite a settled order.
    pub async fn set_card_order(
        &self,
        user_id: i64,
        card_order_id: &str,
        card: &str,
    ) -> Result<(), anyhow::Error> {
        let res = sqlx::query(
            r#"UPDATE users
               SET card_order_id = $1, card = $2, updated_at = NOW()
               WHERE id = $3 AND card_order_id = 'do'"#,
        )
        .bind(card_order_id)
        .bind(card)
        .bind(user_id)
        .execute(&self.conn)
        .await?;
        if res.rows_affected() == 0 {
            bail!("user {} left the pending-holder state", user_id);
        }

        Ok(())
    }

    /// Persists the PAN, reaching `CARD_ACTIVE`.
    pub async fn set_card_active(&self, user_id: i64, pan: &str) -> Result<(), anyhow::Error> {
        let res = sqlx::query(
            "UPDATE users SET card_number = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(pan)
        .bind(user_id)
        .execute(&self.conn)
        .await?;
        if res.rows_affected() == 0 {
            bail!("user {} not found", user_id);
        }

        Ok(())
    }
}
