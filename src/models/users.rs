use serde::{Deserialize, Serialize};

/// Sentinel values carried over from the persisted card columns. A user with
/// no card history has all three card columns at `"no"`; a provisional debit
/// moves `card_order_id` to `"do"` until the issuer order is created.
pub const NO_CARD: &str = "no";
pub const CARD_REQUESTED: &str = "do";

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub address: String,
    pub balance_cents: i64,
    pub amount_two_cents: i64,
    pub my_total_amount_cents: i64,
    pub vip: i64,
    pub vip_two: i64,
    pub vip_three: i64,
    pub can_vip: i64,
    pub card: String,
    pub card_number: String,
    pub card_order_id: String,
    pub card_user_id: String,
    pub product_id: String,
    pub max_card_quota: i64,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: String,
    pub email: String,
    pub country_code: String,
    pub phone: String,
    pub city: String,
    pub country: String,
    pub street: String,
    pub postal_code: String,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

/// Card lifecycle state, derived from the persisted sentinel columns.
/// Rollback resets the columns, so `None` also covers rolled-back users.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardPhase {
    None,
    PendingHolder,
    OrderCreated,
    Active,
}

impl User {
    pub fn card_phase(&self) -> CardPhase {
        if self.card_number != NO_CARD {
            CardPhase::Active
        } else if self.card != NO_CARD {
            CardPhase::OrderCreated
        } else if self.card_order_id == CARD_REQUESTED {
            CardPhase::PendingHolder
        } else {
            CardPhase::None
        }
    }

    pub fn on_secondary_track(&self) -> bool {
        self.vip_two > 0
    }
}

/// KYC and delivery payload for a card request. Pass-through to the issuer,
/// persisted on the user row only so later passes can resend it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CardRequest {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: String,
    pub email: String,
    pub country_code: String,
    pub phone: String,
    pub city: String,
    pub country: String,
    pub street: String,
    pub postal_code: String,
}

#[cfg(test)]
pub fn test_user(id: i64) -> User {
    let now = chrono::NaiveDateTime::default();
    User {
        id,
        address: format!("addr-{id}"),
        balance_cents: 0,
        amount_two_cents: 0,
        my_total_amount_cents: 0,
        vip: 0,
        vip_two: 0,
        vip_three: 0,
        can_vip: 1,
        card: NO_CARD.to_string(),
        card_number: NO_CARD.to_string(),
        card_order_id: NO_CARD.to_string(),
        card_user_id: "0".to_string(),
        product_id: "0".to_string(),
        max_card_quota: 0,
        first_name: "no".to_string(),
        last_name: "no".to_string(),
        birth_date: "no".to_string(),
        email: "no".to_string(),
        country_code: "no".to_string(),
        phone: "no".to_string(),
        city: "no".to_string(),
        country: "no".to_string(),
        street: "no".to_string(),
        postal_code: "no".to_string(),
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_phase_follows_sentinels() {
        let mut user = test_user(1);
        assert_eq!(user.card_phase(), CardPhase::None);

        user.card_order_id = CARD_REQUESTED.to_string();
        assert_eq!(user.card_phase(), CardPhase::PendingHolder);

        user.card = "card-1".to_string();
        user.card_order_id = "order-1".to_string();
        assert_eq!(user.card_phase(), CardPhase::OrderCreated);

        user.card_number = "4000123412341234".to_string();
        assert_eq!(user.card_phase(), CardPhase::Active);
    }

    #[test]
    fn rolled_back_user_reads_as_none() {
        let mut user = test_user(2);
        user.card_order_id = NO_CARD.to_string();
        user.card = NO_CARD.to_string();
        assert_eq!(user.card_phase(), CardPhase::None);
    }
}
