pub mod configs;
pub mod issuer;
pub mod ledger;
pub mod users;
