use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Withdraw {
    pub id: i64,
    pub user_id: i64,
    pub amount_cents: i64,
    pub rel_amount_cents: i64,
    pub status: String,
    pub address: String,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

/// Withdrawal status is one-directional and driven by an external payout
/// process: `rewarded -> doing -> success`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WithdrawStatus {
    Rewarded,
    Doing,
    Success,
}

impl WithdrawStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WithdrawStatus::Rewarded => "rewarded",
            WithdrawStatus::Doing => "doing",
            WithdrawStatus::Success => "success",
        }
    }

    pub fn parse(status: &str) -> Option<Self> {
        match status {
            "rewarded" => Some(WithdrawStatus::Rewarded),
            "doing" => Some(WithdrawStatus::Doing),
            "success" => Some(WithdrawStatus::Success),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: WithdrawStatus) -> bool {
        matches!(
            (self, next),
            (WithdrawStatus::Rewarded, WithdrawStatus::Doing)
                | (WithdrawStatus::Doing, WithdrawStatus::Success)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_flow_is_one_directional() {
        assert!(WithdrawStatus::Rewarded.can_transition_to(WithdrawStatus::Doing));
        assert!(WithdrawStatus::Doing.can_transition_to(WithdrawStatus::Success));

        assert!(!WithdrawStatus::Doing.can_transition_to(WithdrawStatus::Rewarded));
        assert!(!WithdrawStatus::Success.can_transition_to(WithdrawStatus::Doing));
        assert!(!WithdrawStatus::Rewarded.can_transition_to(WithdrawStatus::Success));
        assert!(!WithdrawStatus::Success.can_transition_to(WithdrawStatus::Rewarded));
    }

    #[test]
    fn parse_matches_as_str() {
        for status in [
            WithdrawStatus::Rewarded,
            WithdrawStatus::Doing,
            WithdrawStatus::Success,
        ] {
            assert_eq!(WithdrawStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(WithdrawStatus::parse("cancelled"), None);
    }
}
