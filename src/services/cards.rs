use std::sync::Arc;

use super::commission::CommissionEngine;
use super::JobLease;
use crate::models::issuer::{
    card_status_decision, holder_status_decision, StatusDecision, ISSUER_OK,
};
use crate::models::users::{User, NO_CARD};
use crate::repositories::issuer::IssuerApi;
use crate::repositories::ledger::LedgerRepository;
use crate::repositories::users::UserRepository;
use crate::settings;

/// Issuer-side identifiers a pending user must already carry before the
/// open-card step can run. Both were persisted by the funding debit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenCardInput {
    pub holder_id: i64,
    pub product_id: i64,
}

/// Checks the persisted issuer identifiers of a user in `PENDING_HOLDER`.
/// A user failing any check cannot make progress on later passes either,
/// so the caller rolls them back instead of retrying.
pub fn validate_open_card(user: &User) -> Result<OpenCardInput, &'static str> {
    let holder_id = user
        .card_user_id
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or("missing issuer holder id")?;

    let product_id = user
        .product_id
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or("missing issuer product id")?;

    if user.max_card_quota <= 0 {
        return Err("product card quota exhausted");
    }

    Ok(OpenCardInput {
        holder_id,
        product_id,
    })
}

/// The refund mirrors the price the user was charged at request time, which
/// depends on their secondary track. The same amount funds the card order.
pub fn refund_cents(user: &User, cards: &settings::Cards) -> i64 {
    if user.on_secondary_track() {
        cards.price_vip_two_cents
    } else {
        cards.price_base_cents
    }
}

/// Drives users through the card lifecycle against the issuer: holder
/// confirmation, order creation, PAN retrieval. Every failure path funnels
/// into the compensating rollback; every pass is single-flight.
pub struct CardOrchestrator {
    users: UserRepository,
    ledger: LedgerRepository,
    issuer: Arc<IssuerApi>,
    commission: CommissionEngine,
    cards: settings::Cards,
    open_lease: JobLease,
    status_lease: JobLease,
}

impl CardOrchestrator {
    pub fn new(
        pool: sqlx::PgPool,
        issuer: Arc<IssuerApi>,
        commission: CommissionEngine,
        cards: settings::Cards,
    ) -> Self {
        CardOrchestrator {
            users: UserRepository::new(pool.clone()),
            ledger: LedgerRepository::new(pool),
            issuer,
            commission,
            cards,
            open_lease: JobLease::new("open-card"),
            status_lease: JobLease::new("card-status"),
        }
    }

    /// Refund the provisional debit and reset the card columns. Rollback
    /// failures are logged and left in place; the user stays visible to the
    /// next pass rather than losing money silently.
    async fn roll_back(&self, user: &User, why: &str) {
        log::warn!("rolling back card request of user {}: {}", user.id, why);
        let refund = refund_cents(user, &self.cards);
        if let Err(e) = self.ledger.rollback_card(user.id, refund).await {
            log::error!("rollback of user {} failed: {}", user.id, e);
        }
    }

    /// One pass over users in `PENDING_HOLDER`: confirm the holder with the
    /// issuer and place the card order. Users are handled independently;
    /// one failure never stops the batch.
    pub async fn open_card_pass(&self) {
        let Some(_guard) = self.open_lease.try_acquire() else {
            return;
        };

        let pending = match self.users.users_open_card().await {
            Ok(users) => users,
            Err(e) => {
                log::error!("could not load pending-holder users: {}", e);
                return;
            }
        };

        for user in pending {
            self.open_card_step(&user).await;
        }
    }

    async fn open_card_step(&self, user: &User) {
        let input = match validate_open_card(user) {
            Ok(input) => input,
            Err(why) => {
                self.roll_back(user, why).await;
                return;
            }
        };

        let holder = match self.issuer.query_holder(input.holder_id, input.product_id).await {
            Ok(resp) => resp,
            Err(e) => {
                self.roll_back(user, &format!("holder query failed: {e}")).await;
                return;
            }
        };
        let holder_status = match holder.data {
            Some(data) if holder.code == ISSUER_OK => data.status,
            _ => {
                self.roll_back(user, &format!("holder query rejected: {}", holder.msg))
                    .await;
                return;
            }
        };

        match holder_status_decision(&holder_status) {
            StatusDecision::Proceed => {}
            StatusDecision::Wait => return,
            StatusDecision::Fail => {
                self.roll_back(user, &format!("holder status {holder_status}")).await;
                return;
            }
        }

        let amount = refund_cents(user, &self.cards);
        let order = match self
            .issuer
            .create_card(amount, input.holder_id, input.product_id)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                self.roll_back(user, &format!("card order failed: {e}")).await;
                return;
            }
        };
        let order_data = match order.data {
            Some(data) if order.code == ISSUER_OK => data,
            _ => {
                self.roll_back(user, &format!("card order rejected: {}", order.msg))
                    .await;
                return;
            }
        };
        if order_data.card_id.is_empty() || order_data.card_order_id.is_empty() {
            self.roll_back(user, "card order returned empty identifiers").await;
            return;
        }

        if let Err(e) = self
            .users
            .set_card_order(user.id, &order_data.card_order_id, &order_data.card_id)
            .await
        {
            // The guarded update refused; the user settled concurrently.
            log::error!("could not persist card order for user {}: {}", user.id, e);
        }
    }

    /// One pass over users in `CARD_ORDER_CREATED`: poll the card until it is
    /// active, persist the PAN, then trigger both commission tracks. The user
    /// snapshot backing the walks is loaded once per pass.
    pub async fn card_status_pass(&self) {
        let Some(_guard) = self.status_lease.try_acquire() else {
            return;
        };

        let pending = match self.users.users_card_pending().await {
            Ok(users) => users,
            Err(e) => {
                log::error!("could not load order-created users: {}", e);
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        let snapshot = match self.users.all_users_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::error!("could not snapshot users: {}", e);
                return;
            }
        };

        for user in pending {
            if user.card.len() <= NO_CARD.len() {
                continue;
            }

            let info = match self.issuer.card_info(&user.card).await {
                Ok(resp) => resp,
                Err(e) => {
                    self.roll_back(&user, &format!("card info failed: {e}")).await;
                    continue;
                }
            };
            let data = match info.data {
                Some(data) if info.code == ISSUER_OK => data,
                _ => {
                    self.roll_back(&user, &format!("card info rejected: {}", info.msg))
                        .await;
                    continue;
                }
            };

            match card_status_decision(&data.card_status) {
                StatusDecision::Wait => continue,
                StatusDecision::Fail => {
                    self.roll_back(&user, &format!("card status {}", data.card_status))
                        .await;
                    continue;
                }
                StatusDecision::Proceed => {}
            }

            if data.pan.is_empty() {
                log::warn!("card {} active but PAN not yet available", user.card);
                continue;
            }

            if let Err(e) = self.users.set_card_active(user.id, &data.pan).await {
                log::error!("could not persist PAN for user {}: {}", user.id, e);
                continue;
            }

            if let Err(e) = self.ledger.enqueue_second_track(user.id, &user.address).await {
                log::error!("could not enqueue second-track row for user {}: {}", user.id, e);
            }

            self.commission.distribute_on_activation(&user, &snapshot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::{test_user, CARD_REQUESTED};

    fn pending_user() -> User {
        let mut user = test_user(1);
        user.card_order_id = CARD_REQUESTED.to_string();
        user.card_user_id = "501".to_string();
        user.product_id = "77".to_string();
        user.max_card_quota = 3;
        user
    }

    #[test]
    fn valid_pending_user_yields_issuer_input() {
        let input = validate_open_card(&pending_user()).unwrap();
        assert_eq!(
            input,
            OpenCardInput {
                holder_id: 501,
                product_id: 77
            }
        );
    }

    #[test]
    fn missing_holder_id_is_rejected() {
        let mut user = pending_user();
        user.card_user_id = "0".to_string();
        assert_eq!(validate_open_card(&user), Err("missing issuer holder id"));

        user.card_user_id = "not-a-number".to_string();
        assert_eq!(validate_open_card(&user), Err("missing issuer holder id"));
    }

    #[test]
    fn missing_product_id_is_rejected() {
        let mut user = pending_user();
        user.product_id = "-1".to_string();
        assert_eq!(validate_open_card(&user), Err("missing issuer product id"));
    }

    #[test]
    fn exhausted_quota_is_rejected() {
        let mut user = pending_user();
        user.max_card_quota = 0;
        assert_eq!(validate_open_card(&user), Err("product card quota exhausted"));
    }

    #[test]
    fn refund_follows_the_secondary_track() {
        let cards = settings::Cards {
            price_base_cents: 1_000,
            price_vip_two_cents: 3_000,
        };

        let user = test_user(1);
        assert_eq!(refund_cents(&user, &cards), 1_000);

        let mut tracked = test_user(2);
        tracked.vip_two = 30;
        assert_eq!(refund_cents(&tracked, &cards), 3_000);
    }
}
