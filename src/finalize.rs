//! Final ranking and reward payout.
//!
//! Ranking only looks at groups that were not eliminated; an eliminated
//! group gets a fixed consolation amount instead of a rank. Crediting goes
//! through the points ledger once per (group, student): the payout receipt
//! row is inserted first and a collision means the student was already paid.

use spacetimedb::Timestamp;

use crate::error::{BattleError, Result};
use crate::progression::GroupState;
use crate::store::{receipt_key, BattleStore, PointsLedger};
use crate::{Battle, BattleGroup, BattleStatus, EngineConfig, PayoutReceipt, ProgressionMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub group_id: u64,
    /// 0-based rank among non-eliminated groups; `None` when eliminated
    pub rank: Option<usize>,
    pub amount: u32,
    /// Students credited by this call, with their new totals
    pub credited: Vec<(String, u32)>,
}

/// Non-eliminated groups by score, highest first; ties keep creation order.
pub fn ranking(groups: &[BattleGroup]) -> Vec<&BattleGroup> {
    let mut active: Vec<&BattleGroup> = groups.iter().filter(|g| !g.eliminated).collect();
    active.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
    active
}

/// Rank and amount for one group, without side effects
pub fn payout_for(
    groups: &[BattleGroup],
    group_id: u64,
    config: &EngineConfig,
) -> Result<(Option<usize>, u32)> {
    let group = groups
        .iter()
        .find(|g| g.id == group_id)
        .ok_or_else(|| BattleError::not_found("group", group_id))?;
    if group.eliminated {
        return Ok((None, config.eliminated_payout));
    }
    let rank = ranking(groups)
        .iter()
        .position(|g| g.id == group_id)
        .ok_or_else(|| BattleError::not_found("group", group_id))?;
    Ok((Some(rank), config.payout_for_rank(rank)))
}

fn require_finalizable(battle: &Battle, group: &BattleGroup) -> Result<()> {
    if battle.status == BattleStatus::Finished || group.eliminated {
        return Ok(());
    }
    if battle.mode == ProgressionMode::SelfPaced
        && battle.status == BattleStatus::Active
        && GroupState::of(group, battle.question_count) == GroupState::Complete
    {
        return Ok(());
    }
    Err(BattleError::InvalidTransition(format!(
        "group {} is still playing battle {}",
        group.id, battle.id
    )))
}

/// Compute a group's payout and credit every member who has not been paid.
///
/// Safe to call any number of times: repeat calls compute the same amount
/// and credit nobody.
pub fn finalize_group(
    store: &mut dyn BattleStore,
    ledger: &mut dyn PointsLedger,
    group_id: u64,
    now: Timestamp,
) -> Result<Payout> {
    let group = store
        .group(group_id)
        .ok_or_else(|| BattleError::not_found("group", group_id))?;
    let battle = store
        .battle(group.battle_id)
        .ok_or_else(|| BattleError::not_found("battle", group.battle_id))?;
    require_finalizable(&battle, &group)?;

    let groups = store.groups(battle.id);
    let (rank, amount) = payout_for(&groups, group.id, &store.config())?;

    let mut credited = Vec::new();
    for member in store.members(group.id) {
        let receipt = PayoutReceipt {
            id: 0,
            receipt_key: receipt_key(battle.id, group.id, &member.student_id),
            battle_id: battle.id,
            group_id: group.id,
            student_id: member.student_id.clone(),
            amount,
            paid_at: now,
        };
        if store.insert_receipt(receipt).is_err() {
            log::debug!("[FINAL] already paid group:{} student:{}", group.id, member.student_id);
            continue;
        }
        let total = ledger.credit_points(&member.student_id, &battle.teacher_id, amount);
        credited.push((member.student_id, total));
    }

    log::info!(
        "[FINAL] battle:{} group:{} score:{} rank:{} payout:{} credited:{}",
        battle.id,
        group.name,
        group.score,
        rank.map(|r| (r + 1).to_string()).unwrap_or_else(|| "eliminated".to_string()),
        amount,
        credited.len()
    );
    Ok(Payout {
        group_id: group.id,
        rank,
        amount,
        credited,
    })
}
