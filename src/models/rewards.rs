use serde::{Deserialize, Serialize};

/// Closed set of ledger reason codes. The numeric values are persisted and
/// must never change; new codes extend this table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum RewardReason {
    /// Balance credited from an on-chain deposit.
    DepositCredit,
    /// Audit row for a withdrawal debit.
    WithdrawDebit,
    /// Provisional debit taken when a card is requested.
    CardFundingDebit,
    /// Peer-to-peer balance transfer, debited side.
    PeerTransfer,
    /// First-track (vip) differential commission.
    TierCommission,
    /// Refund posted when a card order is rolled back.
    CardRollbackRefund,
    /// Work-queue source row for the second-track pass; `one = 0` until
    /// the row has been consumed.
    SecondTrackSource,
    /// Second-track (vip_three) commission.
    SecondTrackCommission,
}

impl RewardReason {
    pub fn code(self) -> i16 {
        match self {
            RewardReason::DepositCredit => 1,
            RewardReason::WithdrawDebit => 2,
            RewardReason::CardFundingDebit => 3,
            RewardReason::PeerTransfer => 5,
            RewardReason::TierCommission => 6,
            RewardReason::CardRollbackRefund => 7,
            RewardReason::SecondTrackSource => 9,
            RewardReason::SecondTrackCommission => 11,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(RewardReason::DepositCredit),
            2 => Some(RewardReason::WithdrawDebit),
            3 => Some(RewardReason::CardFundingDebit),
            5 => Some(RewardReason::PeerTransfer),
            6 => Some(RewardReason::TierCommission),
            7 => Some(RewardReason::CardRollbackRefund),
            9 => Some(RewardReason::SecondTrackSource),
            11 => Some(RewardReason::SecondTrackCommission),
            _ => None,
        }
    }
}

/// Append-only ledger row. `one` doubles as the earner's vip snapshot on
/// commission rows and as the processed marker on queue rows.
#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Reward {
    pub id: i64,
    pub user_id: i64,
    pub amount_cents: i64,
    pub reason: i16,
    pub address: String,
    pub one: i64,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        let table = [
            (RewardReason::DepositCredit, 1),
            (RewardReason::WithdrawDebit, 2),
            (RewardReason::CardFundingDebit, 3),
            (RewardReason::PeerTransfer, 5),
            (RewardReason::TierCommission, 6),
            (RewardReason::CardRollbackRefund, 7),
            (RewardReason::SecondTrackSource, 9),
            (RewardReason::SecondTrackCommission, 11),
        ];
        for (reason, code) in table {
            assert_eq!(reason.code(), code);
            assert_eq!(RewardReason::from_code(code), Some(reason));
        }
    }

    #[test]
    fn unknown_codes_are_rejected() {
        for code in [0, 4, 8, 10, 12, -1] {
            assert_eq!(RewardReason::from_code(code), None);
        }
    }
}
