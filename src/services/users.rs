use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::oneshot;

use super::{cards, RequestHandler, Service, ServiceError};
use crate::models::cards::{
    CardCreatedCallback, CardRecord, HolderCallback, RechargeCallback, RECORD_CARD_CREATED,
    RECORD_HOLDER_NOTIFY, RECORD_RECHARGE,
};
use crate::models::issuer::{CardProduct, ISSUER_OK};
use crate::models::referrals::ancestors_nearest_first;
use crate::models::users::{CardPhase, CardRequest, User};
use crate::models::withdrawals::{Withdraw, WithdrawStatus};
use crate::repositories::issuer::IssuerApi;
use crate::repositories::ledger::LedgerRepository;
use crate::repositories::users::UserRepository;
use crate::settings;

pub enum UserRequest {
    Register {
        address: String,
        sponsor_address: Option<String>,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    Deposit {
        user_id: i64,
        tx_hash: String,
        raw_amount: String,
        amount_cents: i64,
        last: i64,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    // Cursor for the external deposit scanner: highest `last` credited so far.
    LastDepositCursor {
        response: oneshot::Sender<Result<i64, ServiceError>>,
    },
    Transfer {
        from_user_id: i64,
        to_address: String,
        amount_cents: i64,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    Withdraw {
        user_id: i64,
        amount_cents: i64,
        rel_amount_cents: i64,
        address: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    NextWithdraw {
        response: oneshot::Sender<Result<Option<Withdraw>, ServiceError>>,
    },
    UpdateWithdrawStatus {
        withdraw_id: i64,
        from: String,
        to: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    RequestCard {
        request: CardRequest,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    CardRecords {
        user_id: i64,
        response: oneshot::Sender<Result<Vec<CardRecord>, ServiceError>>,
    },
    // Issuer callbacks are fire-and-forget: the issuer only expects an ack.
    HolderNotify {
        callback: HolderCallback,
    },
    CardCreatedNotify {
        callback: CardCreatedCallback,
    },
    RechargeNotify {
        callback: RechargeCallback,
    },
}

/// Picks the card product a new request is funded against: the first listed
/// product that is enabled, has a usable numeric id and has quota left.
pub fn pick_product(rows: &[CardProduct]) -> Option<(i64, i64)> {
    rows.iter().find_map(|product| {
        if product.product_status != "ENABLED" {
            return None;
        }
        let product_id = product.product_id.parse::<i64>().ok().filter(|id| *id > 0)?;
        if product.max_card_quota <= 0 {
            return None;
        }
        Some((product_id, product.max_card_quota))
    })
}

#[derive(Clone)]
pub struct UserRequestHandler {
    users: UserRepository,
    ledger: LedgerRepository,
    issuer: Arc<IssuerApi>,
    cards: settings::Cards,
}

impl UserRequestHandler {
    pub fn new(pool: PgPool, issuer: Arc<IssuerApi>, cards: settings::Cards) -> Self {
        UserRequestHandler {
            users: UserRepository::new(pool.clone()),
            ledger: LedgerRepository::new(pool),
            issuer,
            cards,
        }
    }

    async fn register(
        &self,
        address: &str,
        sponsor_address: Option<&str>,
    ) -> Result<User, ServiceError> {
        if self
            .users
            .get_user_by_address(address)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?
            .is_some()
        {
            return Err(ServiceError::Validation(format!(
                "address {address} is already registered"
            )));
        }

        let sponsor_id = match sponsor_address {
            Some(sponsor_address) => {
                let sponsor = self
                    .users
                    .get_user_by_address(sponsor_address)
                    .await
                    .map_err(|e| ServiceError::Database(e.to_string()))?
                    .ok_or_else(|| {
                        ServiceError::Validation(format!("unknown sponsor {sponsor_address}"))
                    })?;
                Some(sponsor.id)
            }
            None => None,
        };

        self.users
            .insert_user(address, sponsor_id)
            .await
            .map_err(|e| ServiceError::Repository("UserRepository".to_string(), e.to_string()))
    }

    async fn deposit(
        &self,
        user_id: i64,
        tx_hash: &str,
        raw_amount: &str,
        amount_cents: i64,
        last: i64,
    ) -> Result<(), ServiceError> {
        if amount_cents <= 0 {
            return Err(ServiceError::Validation("deposit amount must be positive".to_string()));
        }

        self.ledger
            .deposit(user_id, tx_hash, raw_amount, amount_cents, last)
            .await
            .map_err(|e| ServiceError::from_ledger("LedgerRepository", e))?;

        // Lifetime totals are best effort per ancestor: the deposit already
        // committed, so a failing ancestor is logged and skipped.
        match self.users.referral_of(user_id).await {
            Ok(Some(referral)) => {
                for ancestor_id in ancestors_nearest_first(&referral.code) {
                    if let Err(e) = self.ledger.add_lifetime_total(ancestor_id, amount_cents).await
                    {
                        log::warn!(
                            "lifetime-total update for ancestor {} of user {} failed: {}",
                            ancestor_id,
                            user_id,
                            e
                        );
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("could not load referral chain for user {}: {}", user_id, e);
            }
        }

        Ok(())
    }

    async fn transfer(
        &self,
        from_user_id: i64,
        to_address: &str,
        amount_cents: i64,
    ) -> Result<(), ServiceError> {
        if amount_cents <= 0 {
            return Err(ServiceError::Validation("transfer amount must be positive".to_string()));
        }

        let recipient = self
            .users
            .get_user_by_address(to_address)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?
            .ok_or_else(|| ServiceError::Validation(format!("unknown recipient {to_address}")))?;
        if recipient.id == from_user_id {
            return Err(ServiceError::Validation("cannot transfer to yourself".to_string()));
        }

        self.ledger
            .transfer(from_user_id, recipient.id, &recipient.address, amount_cents)
            .await
            .map_err(|e| ServiceError::from_ledger("LedgerRepository", e))
    }

    async fn withdraw(
        &self,
        user_id: i64,
        amount_cents: i64,
        rel_amount_cents: i64,
        address: &str,
    ) -> Result<(), ServiceError> {
        if amount_cents <= 0 || rel_amount_cents <= 0 {
            return Err(ServiceError::Validation("withdraw amount must be positive".to_string()));
        }

        self.ledger
            .withdraw(user_id, amount_cents, rel_amount_cents, address)
            .await
            .map_err(|e| ServiceError::from_ledger("LedgerRepository", e))
    }

    async fn update_withdraw_status(
        &self,
        withdraw_id: i64,
        from: &str,
        to: &str,
    ) -> Result<(), ServiceError> {
        let from = WithdrawStatus::parse(from)
            .ok_or_else(|| ServiceError::Validation(format!("unknown status {from}")))?;
        let to = WithdrawStatus::parse(to)
            .ok_or_else(|| ServiceError::Validation(format!("unknown status {to}")))?;
        if !from.can_transition_to(to) {
            return Err(ServiceError::Validation(format!(
                "cannot move a withdrawal from {} to {}",
                from.as_str(),
                to.as_str()
            )));
        }

        self.ledger
            .update_withdraw_status(withdraw_id, from, to)
            .await
            .map_err(|e| ServiceError::from_ledger("LedgerRepository", e))
    }

    /// Card request: pick a product, create the issuer-side holder, then take
    /// the provisional funding debit. The debit commits last so a failure in
    /// either issuer call leaves the user untouched.
    async fn request_card(&self, request: &CardRequest) -> Result<(), ServiceError> {
        let user = self
            .users
            .get_user_by_id(request.user_id)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?
            .ok_or_else(|| ServiceError::Validation(format!("unknown user {}", request.user_id)))?;

        if user.can_vip == 0 {
            return Err(ServiceError::Validation(format!(
                "card requests are disabled for user {}",
                user.id
            )));
        }
        if user.card_phase() != CardPhase::None {
            return Err(ServiceError::Validation(format!(
                "user {} already has a card request in flight",
                user.id
            )));
        }

        let price_cents = cards::refund_cents(&user, &self.cards);

        let listing = self.issuer.products().await.map_err(|e| {
            ServiceError::ExternalService(
                "IssuerApi".to_string(),
                "products".to_string(),
                e.to_string(),
            )
        })?;
        if listing.code != ISSUER_OK {
            return Err(ServiceError::ExternalService(
                "IssuerApi".to_string(),
                "products".to_string(),
                listing.msg,
            ));
        }
        let (product_id, max_card_quota) = pick_product(&listing.rows).ok_or_else(|| {
            ServiceError::ExternalService(
                "IssuerApi".to_string(),
                "products".to_string(),
                "no enabled card product with quota left".to_string(),
            )
        })?;

        let holder = self
            .issuer
            .create_holder(product_id, request)
            .await
            .map_err(|e| {
                ServiceError::ExternalService(
                    "IssuerApi".to_string(),
                    "holders/create".to_string(),
                    e.to_string(),
                )
            })?;
        let holder_id = match holder.data {
            Some(data) if holder.code == ISSUER_OK => {
                data.holder_id.parse::<i64>().ok().filter(|id| *id > 0)
            }
            _ => None,
        }
        .ok_or_else(|| {
            ServiceError::ExternalService(
                "IssuerApi".to_string(),
                "holders/create".to_string(),
                holder.msg,
            )
        })?;

        self.ledger
            .card_funding_debit(user.id, price_cents, request, holder_id, product_id, max_card_quota)
            .await
            .map_err(|e| ServiceError::from_ledger("LedgerRepository", e))
    }

    async fn holder_notify(&self, callback: &HolderCallback) {
        let user = match self.users.get_user_by_holder_id(&callback.holder_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                log::warn!("holder callback for unknown holder {}", callback.holder_id);
                return;
            }
            Err(e) => {
                log::error!("holder callback lookup failed: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .ledger
            .insert_card_record(
                user.id,
                RECORD_HOLDER_NOTIFY,
                &callback.remark,
                &callback.status,
                &callback.holder_id,
            )
            .await
        {
            log::error!("could not record holder callback for user {}: {}", user.id, e);
        }
    }

    async fn card_notify(&self, record_type: i16, card_id: &str, card_number: &str, remark: &str) {
        let user = match self.users.get_user_by_card(card_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                log::warn!("card callback for unknown card {}", card_id);
                return;
            }
            Err(e) => {
                log::error!("card callback lookup failed: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .ledger
            .insert_card_record(user.id, record_type, remark, card_number, card_id)
            .await
        {
            log::error!("could not record card callback for user {}: {}", user.id, e);
        }
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::Register {
                address,
                sponsor_address,
                response,
            } => {
                let result = self.register(&address, sponsor_address.as_deref()).await;
                let _ = response.send(result);
            }
            UserRequest::Deposit {
                user_id,
                tx_hash,
                raw_amount,
                amount_cents,
                last,
                response,
            } => {
                let result = self
                    .deposit(user_id, &tx_hash, &raw_amount, amount_cents, last)
                    .await;
                let _ = response.send(result);
            }
            UserRequest::Transfer {
                from_user_id,
                to_address,
                amount_cents,
                response,
            } => {
                let result = self.transfer(from_user_id, &to_address, amount_cents).await;
                let _ = response.send(result);
            }
            UserRequest::Withdraw {
                user_id,
                amount_cents,
                rel_amount_cents,
                address,
                response,
            } => {
                let result = self
                    .withdraw(user_id, amount_cents, rel_amount_cents, &address)
                    .await;
                let _ = response.send(result);
            }
            UserRequest::LastDepositCursor { response } => {
                let result = self
                    .ledger
                    .last_deposit_cursor()
                    .await
                    .map_err(|e| ServiceError::from_ledger("LedgerRepository", e));
                let _ = response.send(result);
            }
            UserRequest::NextWithdraw { response } => {
                let result = self
                    .ledger
                    .first_rewarded_withdraw()
                    .await
                    .map_err(|e| ServiceError::from_ledger("LedgerRepository", e));
                let _ = response.send(result);
            }
            UserRequest::UpdateWithdrawStatus {
                withdraw_id,
                from,
                to,
                response,
            } => {
                let result = self.update_withdraw_status(withdraw_id, &from, &to).await;
                let _ = response.send(result);
            }
            UserRequest::RequestCard { request, response } => {
                let result = self.request_card(&request).await;
                let _ = response.send(result);
            }
            UserRequest::CardRecords { user_id, response } => {
                let result = self
                    .ledger
                    .card_records_of_user(user_id)
                    .await
                    .map_err(|e| ServiceError::from_ledger("LedgerRepository", e));
                let _ = response.send(result);
            }
            UserRequest::HolderNotify { callback } => {
                self.holder_notify(&callback).await;
            }
            UserRequest::CardCreatedNotify { callback } => {
                self.card_notify(
                    RECORD_CARD_CREATED,
                    &callback.card_id,
                    &callback.card_number,
                    &callback.remark,
                )
                .await;
            }
            UserRequest::RechargeNotify { callback } => {
                self.card_notify(
                    RECORD_RECHARGE,
                    &callback.card_id,
                    &callback.card_number,
                    &callback.remark,
                )
                .await;
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService
    }
}

impl Default for UserService {
    fn default() -> Self {
        UserService::new()
    }
}

impl Service<UserRequest, UserRequestHandler> for UserService {}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, status: &str, quota: i64) -> CardProduct {
        CardProduct {
            product_id: id.to_string(),
            product_name: format!("product-{id}"),
            max_card_quota: quota,
            product_status: status.to_string(),
        }
    }

    #[test]
    fn pick_product_takes_the_first_usable_row() {
        let rows = vec![
            product("10", "DISABLED", 5),
            product("11", "ENABLED", 0),
            product("junk", "ENABLED", 5),
            product("12", "ENABLED", 5),
            product("13", "ENABLED", 9),
        ];

        assert_eq!(pick_product(&rows), Some((12, 5)));
    }

    #[test]
    fn pick_product_rejects_an_empty_or_unusable_listing() {
        assert_eq!(pick_product(&[]), None);

        let rows = vec![product("0", "ENABLED", 5), product("14", "ENABLED", -1)];
        assert_eq!(pick_product(&rows), None);
    }
}
