pub mod cards;
pub mod configs;
pub mod deposits;
pub mod issuer;
pub mod referrals;
pub mod rewards;
pub mod users;
pub mod withdrawals;
