use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;

use super::JobLease;
use crate::models::configs::{KEY_SECOND_TRACK_ONE, KEY_SECOND_TRACK_THREE, KEY_SECOND_TRACK_TWO};
use crate::models::referrals::ancestors_nearest_first;
use crate::models::rewards::{Reward, RewardReason};
use crate::models::users::User;
use crate::repositories::configs::ConfigRepository;
use crate::repositories::ledger::{LedgerError, LedgerRepository};
use crate::repositories::users::UserRepository;

/// Posting surface of the second-track queue pass. A queue row is consumed
/// through `mark_processed` before any payout math, and nothing on this
/// surface can return a consumed row to the queue.
#[async_trait]
trait SecondTrackSink: Send + Sync {
    async fn mark_processed(&self, reward_id: i64) -> Result<(), LedgerError>;
    async fn credit(&self, payout: &Payout, counterparty: &str) -> Result<(), LedgerError>;
}

#[async_trait]
impl SecondTrackSink for LedgerRepository {
    async fn mark_processed(&self, reward_id: i64) -> Result<(), LedgerError> {
        self.mark_second_track_processed(reward_id).await
    }

    async fn credit(&self, payout: &Payout, counterparty: &str) -> Result<(), LedgerError> {
        self.commission_credit(
            payout.user_id,
            payout.amount_cents,
            payout.vip,
            RewardReason::SecondTrackCommission,
            counterparty,
        )
        .await
    }
}

/// VIP tier values are small integers; one tier unit pays out 100 cents.
pub const CENTS_PER_UNIT: i64 = 100;

/// First-track tier ceiling. Users on the 30-track may hold tiers up to 30;
/// everyone else tops out at 10. A tier above the ceiling is a data
/// inconsistency, not a payable rank.
pub fn first_track_ceiling(trigger: &User) -> i64 {
    if trigger.vip_two == 30 {
        30
    } else {
        10
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payout {
    pub user_id: i64,
    pub amount_cents: i64,
    /// The earner's vip at planning time; pins the ledger credit.
    pub vip: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalkHalt {
    /// An ancestor's tier exceeds the configured ceiling. Hard abort: the
    /// remaining ancestors stay unpaid and the walk is logged for review.
    CeilingExceeded { user_id: i64, tier: i64 },
    /// The cumulative payout reached the second-track global cap.
    CapReached,
}

#[derive(Clone, Debug)]
pub struct WalkOutcome {
    pub payouts: Vec<Payout>,
    pub halt: Option<WalkHalt>,
}

/// Telescoped differential walk over the first track (`vip`): each ancestor
/// nearer than any previously paid one earns the margin by which their tier
/// exceeds the best tier already paid. Ancestors on a different secondary
/// track than the trigger are skipped entirely.
pub fn plan_first_track(
    trigger: &User,
    ancestors: &[i64],
    snapshot: &HashMap<i64, User>,
) -> WalkOutcome {
    let ceiling = first_track_ceiling(trigger);
    let mut payouts = Vec::new();
    let mut halt = None;
    let mut last_tier = 0_i64;

    for &ancestor_id in ancestors {
        let Some(ancestor) = snapshot.get(&ancestor_id) else {
            log::debug!("first-track walk: ancestor {} missing from snapshot", ancestor_id);
            continue;
        };

        // Tracks are segregated by product decision: an ancestor only earns
        // from descendants on the same secondary track.
        if ancestor.vip_two != trigger.vip_two {
            continue;
        }

        if ancestor.vip > ceiling {
            halt = Some(WalkHalt::CeilingExceeded {
                user_id: ancestor_id,
                tier: ancestor.vip,
            });
            break;
        }

        // An equal-or-higher ancestor nearer in the chain was already paid.
        if ancestor.vip <= last_tier {
            continue;
        }

        payouts.push(Payout {
            user_id: ancestor_id,
            amount_cents: (ancestor.vip - last_tier) * CENTS_PER_UNIT,
            vip: ancestor.vip,
        });
        last_tier = ancestor.vip;
    }

    WalkOutcome { payouts, halt }
}

/// Config-driven thresholds for the second track, one per discrete
/// `vip_three` level. `level_three_cents` doubles as the global cap.
#[derive(Clone, Copy, Debug)]
pub struct SecondTrackTable {
    pub level_one_cents: i64,
    pub level_two_cents: i64,
    pub level_three_cents: i64,
}

impl SecondTrackTable {
    fn threshold(&self, level: i64) -> Option<i64> {
        match level {
            1 => Some(self.level_one_cents),
            2 => Some(self.level_two_cents),
            3 => Some(self.level_three_cents),
            _ => None,
        }
    }
}

/// Deplete-to-zero walk over the second track (`vip_three`): each paying
/// ancestor tops the cumulative total up to their level's threshold, so the
/// track as a whole never pays more than the level-three cap.
pub fn plan_second_track(
    ancestors: &[i64],
    snapshot: &HashMap<i64, User>,
    table: &SecondTrackTable,
) -> WalkOutcome {
    const CEILING: i64 = 3;
    let mut payouts = Vec::new();
    let mut halt = None;
    let mut last_level = 0_i64;
    let mut paid_cents = 0_i64;

    for &ancestor_id in ancestors {
        if table.level_three_cents <= paid_cents {
            halt = Some(WalkHalt::CapReached);
            break;
        }

        let Some(ancestor) = snapshot.get(&ancestor_id) else {
            log::debug!("second-track walk: ancestor {} missing from snapshot", ancestor_id);
            continue;
        };

        if ancestor.vip_three > CEILING {
            halt = Some(WalkHalt::CeilingExceeded {
                user_id: ancestor_id,
                tier: ancestor.vip_three,
            });
            break;
        }

        if ancestor.vip_three <= last_level {
            continue;
        }
        last_level = ancestor.vip_three;

        let Some(threshold) = table.threshold(ancestor.vip_three) else {
            continue;
        };
        if threshold <= paid_cents {
            continue;
        }

        payouts.push(Payout {
            user_id: ancestor_id,
            amount_cents: threshold - paid_cents,
            vip: ancestor.vip,
        });
        paid_cents = threshold;
    }

    WalkOutcome { payouts, halt }
}

#[derive(Clone)]
pub struct CommissionEngine {
    users: UserRepository,
    ledger: LedgerRepository,
    configs: ConfigRepository,
    queue_lease: JobLease,
}

impl CommissionEngine {
    pub fn new(pool: PgPool) -> Self {
        CommissionEngine {
            users: UserRepository::new(pool.clone()),
            ledger: LedgerRepository::new(pool.clone()),
            configs: ConfigRepository::new(pool),
            queue_lease: JobLease::new("second-track"),
        }
    }

    /// First-track distribution for a user that just reached `CARD_ACTIVE`.
    /// The snapshot is loaded once per batch pass by the caller, not per
    /// ancestor. Payout failures are logged and left for review; they never
    /// fail the activation itself.
    pub async fn distribute_on_activation(&self, trigger: &User, snapshot: &HashMap<i64, User>) {
        let chain = match self.users.referral_of(trigger.id).await {
            Ok(Some(referral)) => ancestors_nearest_first(&referral.code),
            Ok(None) => {
                log::warn!("user {} has no referral record, nothing to distribute", trigger.id);
                return;
            }
            Err(e) => {
                log::error!("could not load referral chain for user {}: {}", trigger.id, e);
                return;
            }
        };

        let outcome = plan_first_track(trigger, &chain, snapshot);
        if let Some(WalkHalt::CeilingExceeded { user_id, tier }) = &outcome.halt {
            log::error!(
                "first-track walk for user {} aborted: ancestor {} holds tier {} above ceiling",
                trigger.id,
                user_id,
                tier
            );
        }

        for payout in &outcome.payouts {
            if let Err(e) = self
                .ledger
                .commission_credit(
                    payout.user_id,
                    payout.amount_cents,
                    payout.vip,
                    RewardReason::TierCommission,
                    &trigger.address,
                )
                .await
            {
                log::error!(
                    "first-track payout of {} cents to user {} failed: {}",
                    payout.amount_cents,
                    payout.user_id,
                    e
                );
            }
        }
    }

    /// Second-track queue pass. Single-flight; thresholds are re-read from
    /// the config table on every run.
    pub async fn second_track_pass(&self) {
        let Some(_guard) = self.queue_lease.try_acquire() else {
            return;
        };

        if let Err(e) = self.run_second_track().await {
            log::error!("second-track pass failed: {}", e);
        }
    }

    async fn run_second_track(&self) -> Result<(), anyhow::Error> {
        let values = self
            .configs
            .values(&[KEY_SECOND_TRACK_ONE, KEY_SECOND_TRACK_TWO, KEY_SECOND_TRACK_THREE])
            .await?;
        let table = SecondTrackTable {
            level_one_cents: ConfigRepository::cents_value(&values, KEY_SECOND_TRACK_ONE),
            level_two_cents: ConfigRepository::cents_value(&values, KEY_SECOND_TRACK_TWO),
            level_three_cents: ConfigRepository::cents_value(&values, KEY_SECOND_TRACK_THREE),
        };

        let queue = self.ledger.unprocessed_second_track().await?;
        if queue.is_empty() {
            return Ok(());
        }

        let snapshot = self.users.all_users_snapshot().await?;
        let chains = self.users.referral_codes_snapshot().await?;

        for entry in queue {
            Self::drain_entry(&self.ledger, &entry, &chains, &snapshot, &table).await;
        }

        Ok(())
    }

    /// One queue entry. The row is consumed first; a failing mark skips the
    /// walk, and a payout failure after the mark is logged with the row
    /// staying consumed.
    async fn drain_entry(
        sink: &dyn SecondTrackSink,
        entry: &Reward,
        chains: &HashMap<i64, String>,
        snapshot: &HashMap<i64, User>,
        table: &SecondTrackTable,
    ) {
        if let Err(e) = sink.mark_processed(entry.id).await {
            log::warn!("could not mark queue row {}: {}", entry.id, e);
            return;
        }

        let Some(owner) = snapshot.get(&entry.user_id) else {
            log::warn!("queue row {} references unknown user {}", entry.id, entry.user_id);
            return;
        };
        let Some(code) = chains.get(&owner.id) else {
            log::warn!("user {} has no referral record, nothing to distribute", owner.id);
            return;
        };
        let chain = ancestors_nearest_first(code);

        let outcome = plan_second_track(&chain, snapshot, table);
        if let Some(WalkHalt::CeilingExceeded { user_id, tier }) = &outcome.halt {
            log::error!(
                "second-track walk for user {} aborted: ancestor {} holds level {} above ceiling",
                owner.id,
                user_id,
                tier
            );
        }

        for payout in &outcome.payouts {
            if let Err(e) = sink.credit(payout, &owner.address).await {
                log::error!(
                    "second-track payout of {} cents to user {} failed: {}",
                    payout.amount_cents,
                    payout.user_id,
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::test_user;

    fn snapshot(users: Vec<User>) -> HashMap<i64, User> {
        users.into_iter().map(|u| (u.id, u)).collect()
    }

    fn tiered(id: i64, vip: i64) -> User {
        let mut user = test_user(id);
        user.vip = vip;
        user
    }

    #[test]
    fn differential_example_pays_nearest_highest_only() {
        // A refers B refers C; walk order from C is [B, A]. B at tier 20 is
        // paid first, then A at tier 10 is skipped (10 <= 20). Everyone sits
        // on the 30-ceiling track so tier 20 is a legal rank.
        let mut trigger = test_user(3);
        trigger.vip_two = 30;
        let snap = snapshot(
            vec![tiered(1, 10), tiered(2, 20)]
                .into_iter()
                .map(|mut u| {
                    u.vip_two = 30;
                    u
                })
                .collect(),
        );

        let outcome = plan_first_track(&trigger, &[2, 1], &snap);

        assert!(outcome.halt.is_none());
        assert_eq!(
            outcome.payouts,
            vec![Payout {
                user_id: 2,
                amount_cents: 20 * CENTS_PER_UNIT,
                vip: 20
            }]
        );
    }

    #[test]
    fn paid_tiers_are_strictly_increasing_and_capped() {
        let trigger = {
            let mut u = test_user(99);
            u.vip_two = 30;
            u
        };
        let ancestors: Vec<User> = [(1, 5), (2, 3), (3, 5), (4, 12), (5, 12), (6, 30)]
            .iter()
            .map(|&(id, vip)| {
                let mut u = tiered(id, vip);
                u.vip_two = 30;
                u
            })
            .collect();
        let snap = snapshot(ancestors);

        let outcome = plan_first_track(&trigger, &[1, 2, 3, 4, 5, 6], &snap);

        let paid: Vec<i64> = outcome.payouts.iter().map(|p| p.vip).collect();
        assert_eq!(paid, vec![5, 12, 30]);
        assert!(paid.windows(2).all(|w| w[0] < w[1]));

        // Telescoping: the sum of differentials equals the top paid tier.
        let total: i64 = outcome.payouts.iter().map(|p| p.amount_cents).sum();
        assert_eq!(total, 30 * CENTS_PER_UNIT);
    }

    #[test]
    fn tier_above_ceiling_aborts_the_walk() {
        let trigger = test_user(9);
        // Ceiling for an off-track trigger is 10; ancestor 2 at tier 11 is
        // inconsistent data. Ancestor 3 would qualify but must stay unpaid.
        let snap = snapshot(vec![tiered(1, 4), tiered(2, 11), tiered(3, 9)]);

        let outcome = plan_first_track(&trigger, &[1, 2, 3], &snap);

        assert_eq!(
            outcome.halt,
            Some(WalkHalt::CeilingExceeded { user_id: 2, tier: 11 })
        );
        assert_eq!(outcome.payouts.len(), 1);
        assert_eq!(outcome.payouts[0].user_id, 1);
    }

    #[test]
    fn ancestors_on_another_secondary_track_earn_nothing() {
        let trigger = test_user(9);
        let mut other_track = tiered(1, 8);
        other_track.vip_two = 30;
        let snap = snapshot(vec![other_track, tiered(2, 5)]);

        let outcome = plan_first_track(&trigger, &[1, 2], &snap);

        assert_eq!(outcome.payouts.len(), 1);
        assert_eq!(outcome.payouts[0].user_id, 2);
    }

    #[test]
    fn unknown_ancestors_are_skipped() {
        let trigger = test_user(9);
        let snap = snapshot(vec![tiered(2, 5)]);

        let outcome = plan_first_track(&trigger, &[77, 2], &snap);

        assert!(outcome.halt.is_none());
        assert_eq!(outcome.payouts.len(), 1);
    }

    fn leveled(id: i64, vip_three: i64) -> User {
        let mut user = test_user(id);
        user.vip_three = vip_three;
        user
    }

    const TABLE: SecondTrackTable = SecondTrackTable {
        level_one_cents: 1_000,
        level_two_cents: 2_500,
        level_three_cents: 5_000,
    };

    #[test]
    fn second_track_depletes_each_level_to_its_threshold() {
        let snap = snapshot(vec![leveled(1, 1), leveled(2, 2), leveled(3, 3)]);

        let outcome = plan_second_track(&[1, 2, 3], &snap, &TABLE);

        let amounts: Vec<i64> = outcome.payouts.iter().map(|p| p.amount_cents).collect();
        assert_eq!(amounts, vec![1_000, 1_500, 2_500]);
        let total: i64 = amounts.iter().sum();
        assert_eq!(total, TABLE.level_three_cents);
    }

    #[test]
    fn second_track_halts_once_the_cap_is_reached() {
        // The level-3 ancestor exhausts the cap; the next level-3 ancestor
        // sits behind the cap check and the walk reports it.
        let snap = snapshot(vec![leveled(1, 3), leveled(2, 3)]);

        let outcome = plan_second_track(&[1, 2], &snap, &TABLE);

        assert_eq!(outcome.payouts.len(), 1);
        assert_eq!(outcome.payouts[0].amount_cents, 5_000);
        assert_eq!(outcome.halt, Some(WalkHalt::CapReached));
    }

    #[test]
    fn second_track_skips_levels_at_or_below_the_last_paid() {
        let snap = snapshot(vec![leveled(1, 2), leveled(2, 1), leveled(3, 2)]);

        let outcome = plan_second_track(&[1, 2, 3], &snap, &TABLE);

        assert_eq!(outcome.payouts.len(), 1);
        assert_eq!(outcome.payouts[0].user_id, 1);
        assert_eq!(outcome.payouts[0].amount_cents, 2_500);
    }

    #[test]
    fn second_track_aborts_on_a_level_above_ceiling() {
        let snap = snapshot(vec![leveled(1, 1), leveled(2, 4), leveled(3, 3)]);

        let outcome = plan_second_track(&[1, 2, 3], &snap, &TABLE);

        assert_eq!(
            outcome.halt,
            Some(WalkHalt::CeilingExceeded { user_id: 2, tier: 4 })
        );
        assert_eq!(outcome.payouts.len(), 1);
    }

    #[test]
    fn second_track_with_zero_cap_pays_nothing() {
        let table = SecondTrackTable {
            level_one_cents: 0,
            level_two_cents: 0,
            level_three_cents: 0,
        };
        let snap = snapshot(vec![leveled(1, 3)]);

        let outcome = plan_second_track(&[1], &snap, &table);

        assert!(outcome.payouts.is_empty());
        assert_eq!(outcome.halt, Some(WalkHalt::CapReached));
    }

    struct RecordingSink {
        fail_mark: bool,
        fail_credit: bool,
        marked: std::sync::Mutex<Vec<i64>>,
        credited: std::sync::Mutex<Vec<i64>>,
    }

    impl RecordingSink {
        fn new(fail_mark: bool, fail_credit: bool) -> Self {
            RecordingSink {
                fail_mark,
                fail_credit,
                marked: std::sync::Mutex::new(Vec::new()),
                credited: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SecondTrackSink for RecordingSink {
        async fn mark_processed(&self, reward_id: i64) -> Result<(), LedgerError> {
            if self.fail_mark {
                return Err(LedgerError::AlreadyProcessed(reward_id));
            }
            self.marked.lock().unwrap().push(reward_id);
            Ok(())
        }

        async fn credit(&self, payout: &Payout, _counterparty: &str) -> Result<(), LedgerError> {
            if self.fail_credit {
                return Err(LedgerError::Conflict(payout.user_id));
            }
            self.credited.lock().unwrap().push(payout.user_id);
            Ok(())
        }
    }

    fn queue_row(id: i64, user_id: i64) -> Reward {
        Reward {
            id,
            user_id,
            amount_cents: 0,
            reason: RewardReason::SecondTrackSource.code(),
            address: format!("addr-{user_id}"),
            one: 0,
            created_at: chrono::NaiveDateTime::default(),
            updated_at: chrono::NaiveDateTime::default(),
        }
    }

    fn queue_fixture() -> (HashMap<i64, String>, HashMap<i64, User>) {
        let chains = HashMap::from([(9_i64, "D1".to_string())]);
        let snap = snapshot(vec![test_user(9), leveled(1, 1)]);
        (chains, snap)
    }

    #[tokio::test]
    async fn drain_marks_the_row_before_paying() {
        let sink = RecordingSink::new(false, false);
        let (chains, snap) = queue_fixture();

        CommissionEngine::drain_entry(&sink, &queue_row(100, 9), &chains, &snap, &TABLE).await;

        assert_eq!(*sink.marked.lock().unwrap(), vec![100]);
        assert_eq!(*sink.credited.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn a_failed_mark_skips_the_walk_entirely() {
        let sink = RecordingSink::new(true, false);
        let (chains, snap) = queue_fixture();

        CommissionEngine::drain_entry(&sink, &queue_row(100, 9), &chains, &snap, &TABLE).await;

        assert!(sink.marked.lock().unwrap().is_empty());
        assert!(sink.credited.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_failed_payout_leaves_the_row_consumed() {
        let sink = RecordingSink::new(false, true);
        let (chains, snap) = queue_fixture();

        CommissionEngine::drain_entry(&sink, &queue_row(100, 9), &chains, &snap, &TABLE).await;

        // The row stays consumed even though no payout landed; the sink has
        // no operation that could put it back.
        assert_eq!(*sink.marked.lock().unwrap(), vec![100]);
        assert!(sink.credited.lock().unwrap().is_empty());
    }
}
