//! Battle lifecycle: `Waiting -> Active -> Finished`, plus restart.
//!
//! No process owns a battle. Every transition here is called by whichever
//! client happens to act, often several at once, so each one is safe to
//! repeat:
//! - start is a no-op unless the battle is still waiting
//! - pointer moves are compare-and-set against the pointer the caller saw;
//!   a caller that lost the race gets the current state back unchanged
//! - restart rewrites every dependent row inside one reducer transaction
//!
//! Two strategies share the same tables. Lockstep moves one shared pointer
//! for the whole battle. Self-paced moves each group's own pointer and
//! finishes the battle once no group has anything left to answer.

use spacetimedb::{SpacetimeType, Timestamp};

use crate::clock::{elapsed_ms, rfc3339};
use crate::error::{self, BattleError};
use crate::setup::require_owner;
use crate::store::BattleStore;
use crate::submission::remaining_ms;
use crate::{Answer, Battle, BattleGroup, BattleStatus, ProgressionMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleState {
    Waiting,
    Active { question_pointer: u32 },
    Finished,
}

impl BattleState {
    pub fn of(battle: &Battle) -> Self {
        match battle.status {
            BattleStatus::Waiting => BattleState::Waiting,
            BattleStatus::Active => BattleState::Active {
                question_pointer: battle.question_pointer,
            },
            BattleStatus::Finished => BattleState::Finished,
        }
    }
}

/// Derived per-group progress; only self-paced groups move on their own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Playing { question_pointer: u32 },
    Complete,
    Eliminated,
}

impl GroupState {
    pub fn of(group: &BattleGroup, question_count: u32) -> Self {
        if group.eliminated {
            GroupState::Eliminated
        } else if group.question_pointer >= question_count {
            GroupState::Complete
        } else {
            GroupState::Playing {
                question_pointer: group.question_pointer,
            }
        }
    }

    /// Nothing left for this group to answer
    pub fn is_done(&self) -> bool {
        !matches!(self, GroupState::Playing { .. })
    }
}

pub trait ProgressionStrategy {
    /// Move the battle forward if it is still where the caller saw it.
    fn advance_battle(
        &self,
        store: &mut dyn BattleStore,
        battle_id: u64,
        expected_pointer: u32,
        now: Timestamp,
    ) -> error::Result<BattleState>;

    /// Move one group forward if it is still where the caller saw it.
    fn advance_group(
        &self,
        store: &mut dyn BattleStore,
        group_id: u64,
        expected_pointer: u32,
        now: Timestamp,
    ) -> error::Result<GroupState>;
}

/// All groups on the same question, moved by the teacher or the
/// all-answered detector.
pub struct Lockstep;

/// Every group moves through the questions on its own.
pub struct SelfPaced;

pub fn strategy_for(mode: &ProgressionMode) -> &'static dyn ProgressionStrategy {
    match mode {
        ProgressionMode::Lockstep => &Lockstep,
        ProgressionMode::SelfPaced => &SelfPaced,
    }
}

/// Advance through whichever strategy the battle was created with
pub fn advance_battle(
    store: &mut dyn BattleStore,
    battle_id: u64,
    expected_pointer: u32,
    now: Timestamp,
) -> error::Result<BattleState> {
    let mode = load_battle(store, battle_id)?.mode;
    strategy_for(&mode).advance_battle(store, battle_id, expected_pointer, now)
}

pub fn advance_group(
    store: &mut dyn BattleStore,
    group_id: u64,
    expected_pointer: u32,
    now: Timestamp,
) -> error::Result<GroupState> {
    let group = store
        .group(group_id)
        .ok_or_else(|| BattleError::not_found("group", group_id))?;
    let mode = load_battle(store, group.battle_id)?.mode;
    strategy_for(&mode).advance_group(store, group_id, expected_pointer, now)
}

fn load_battle(store: &dyn BattleStore, battle_id: u64) -> error::Result<Battle> {
    store
        .battle(battle_id)
        .ok_or_else(|| BattleError::not_found("battle", battle_id))
}

fn require_mode(battle: &Battle, mode: ProgressionMode) -> error::Result<()> {
    if battle.mode != mode {
        return Err(BattleError::InvalidTransition(format!(
            "battle {} is {:?}, not {:?}",
            battle.id, battle.mode, mode
        )));
    }
    Ok(())
}

/// `Waiting -> Active`. Calling it on a started battle changes nothing.
pub fn start_battle(
    store: &mut dyn BattleStore,
    battle_id: u64,
    now: Timestamp,
) -> error::Result<BattleState> {
    let mut battle = load_battle(store, battle_id)?;
    if battle.status != BattleStatus::Waiting {
        log::debug!("[BATTLE] start ignored battle:{} status:{:?}", battle.id, battle.status);
        return Ok(BattleState::of(&battle));
    }

    battle.status = BattleStatus::Active;
    battle.started_at = Some(now);
    battle.question_pointer = 0;
    battle.question_started_at = match battle.mode {
        ProgressionMode::Lockstep => Some(now),
        ProgressionMode::SelfPaced => None,
    };
    let battle = store.update_battle(battle);

    log::info!(
        "[BATTLE] started battle:{} code:{} mode:{:?} at:{}",
        battle.id,
        battle.code,
        battle.mode,
        rfc3339(now)
    );
    Ok(BattleState::of(&battle))
}

fn finish(store: &mut dyn BattleStore, mut battle: Battle, now: Timestamp) -> Battle {
    battle.status = BattleStatus::Finished;
    battle.finished_at = Some(now);
    battle.question_started_at = None;
    let battle = store.update_battle(battle);

    let duration_secs = battle.started_at.map(|s| elapsed_ms(s, now) / 1000).unwrap_or(0);
    log::info!(
        "[BATTLE] finished battle:{} code:{} at:{} duration:{}s",
        battle.id,
        battle.code,
        rfc3339(now),
        duration_secs
    );
    battle
}

impl ProgressionStrategy for Lockstep {
    fn advance_battle(
        &self,
        store: &mut dyn BattleStore,
        battle_id: u64,
        expected_pointer: u32,
        now: Timestamp,
    ) -> error::Result<BattleState> {
        let mut battle = load_battle(store, battle_id)?;
        require_mode(&battle, ProgressionMode::Lockstep)?;

        match battle.status {
            BattleStatus::Waiting => {
                return Err(BattleError::InvalidTransition(format!(
                    "battle {} has not started",
                    battle.id
                )));
            }
            BattleStatus::Finished => return Ok(BattleState::Finished),
            BattleStatus::Active => {}
        }

        if battle.question_pointer != expected_pointer {
            log::debug!(
                "[ADVANCE] stale battle:{} expected:{} actual:{}",
                battle.id,
                expected_pointer,
                battle.question_pointer
            );
            return Ok(BattleState::of(&battle));
        }

        battle.question_pointer += 1;
        if battle.question_pointer >= battle.question_count {
            battle.question_pointer = battle.question_count;
            return Ok(BattleState::of(&finish(store, battle, now)));
        }

        battle.question_started_at = Some(now);
        let battle = store.update_battle(battle);
        log::info!(
            "[ADVANCE] battle:{} question:{}/{}",
            battle.id,
            battle.question_pointer + 1,
            battle.question_count
        );
        Ok(BattleState::of(&battle))
    }

    fn advance_group(
        &self,
        _store: &mut dyn BattleStore,
        group_id: u64,
        _expected_pointer: u32,
        _now: Timestamp,
    ) -> error::Result<GroupState> {
        Err(BattleError::InvalidTransition(format!(
            "group {} follows the shared lockstep pointer",
            group_id
        )))
    }
}

impl ProgressionStrategy for SelfPaced {
    /// Self-paced battles have no shared pointer; this settles completion
    /// and finishes the battle once every group is done.
    fn advance_battle(
        &self,
        store: &mut dyn BattleStore,
        battle_id: u64,
        _expected_pointer: u32,
        now: Timestamp,
    ) -> error::Result<BattleState> {
        let battle = load_battle(store, battle_id)?;
        require_mode(&battle, ProgressionMode::SelfPaced)?;
        if battle.status != BattleStatus::Active {
            return Ok(BattleState::of(&battle));
        }

        let all_done = store
            .groups(battle.id)
            .iter()
            .all(|g| GroupState::of(g, battle.question_count).is_done());
        if !all_done {
            return Ok(BattleState::of(&battle));
        }
        Ok(BattleState::of(&finish(store, battle, now)))
    }

    fn advance_group(
        &self,
        store: &mut dyn BattleStore,
        group_id: u64,
        expected_pointer: u32,
        now: Timestamp,
    ) -> error::Result<GroupState> {
        let mut group = store
            .group(group_id)
            .ok_or_else(|| BattleError::not_found("group", group_id))?;
        let battle = load_battle(store, group.battle_id)?;
        require_mode(&battle, ProgressionMode::SelfPaced)?;

        match battle.status {
            BattleStatus::Waiting => {
                return Err(BattleError::InvalidTransition(format!(
                    "battle {} has not started",
                    battle.id
                )));
            }
            BattleStatus::Finished => return Ok(GroupState::of(&group, battle.question_count)),
            BattleStatus::Active => {}
        }

        let state = GroupState::of(&group, battle.question_count);
        if state.is_done() || group.question_pointer != expected_pointer {
            log::debug!(
                "[ADVANCE] group:{} unchanged state:{:?} expected:{}",
                group.id,
                state,
                expected_pointer
            );
            // A group eliminated on its last question never moves again,
            // so this may be the last chance to finish the battle
            if state.is_done() {
                SelfPaced.advance_battle(store, battle.id, 0, now)?;
            }
            return Ok(state);
        }

        // A group only moves past a question it has answered
        let current = store
            .questions(battle.id)
            .into_iter()
            .find(|q| q.position == group.question_pointer)
            .ok_or_else(|| {
                BattleError::not_found("question", format!("position {}", group.question_pointer))
            })?;
        if store.answer_for(current.id, group.id).is_none() {
            return Err(BattleError::InvalidTransition(format!(
                "group {} has not answered question {}",
                group.id, current.position
            )));
        }

        group.question_pointer += 1;
        let group = store.update_group(group);
        let state = GroupState::of(&group, battle.question_count);
        log::info!(
            "[ADVANCE] battle:{} group:{} question:{}/{}",
            battle.id,
            group.name,
            group.question_pointer,
            battle.question_count
        );

        if state.is_done() {
            SelfPaced.advance_battle(store, battle.id, 0, now)?;
        }
        Ok(state)
    }
}

/// Progress on the current lockstep question, for the all-answered detector.
/// Also what the `my_battle_progress` view hands to clients.
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub battle_id: u64,
    pub question_pointer: u32,
    /// Non-eliminated groups that answered the current question
    pub answered: u32,
    /// Non-eliminated groups in the battle
    pub required: u32,
    /// When the last of those answers arrived
    pub last_answer_at: Option<Timestamp>,
}

impl Readiness {
    pub fn all_answered(&self) -> bool {
        self.answered >= self.required
    }
}

pub fn readiness(store: &dyn BattleStore, battle: &Battle) -> error::Result<Readiness> {
    let question = store
        .questions(battle.id)
        .into_iter()
        .find(|q| q.position == battle.question_pointer)
        .ok_or_else(|| {
            BattleError::not_found("question", format!("position {}", battle.question_pointer))
        })?;

    let groups = store.groups(battle.id);
    let answers = store.answers_for_question(question.id);
    Ok(tally_readiness(battle, &groups, &answers))
}

/// Count `answers` (all for the battle's current question) from groups
/// still in the running.
pub fn tally_readiness(battle: &Battle, groups: &[BattleGroup], answers: &[Answer]) -> Readiness {
    let contenders: Vec<&BattleGroup> = groups.iter().filter(|g| !g.eliminated).collect();
    let counted: Vec<&Answer> = answers
        .iter()
        .filter(|a| contenders.iter().any(|g| g.id == a.group_id))
        .collect();

    Readiness {
        battle_id: battle.id,
        question_pointer: battle.question_pointer,
        answered: counted.len() as u32,
        required: contenders.len() as u32,
        last_answer_at: counted.iter().map(|a| a.submitted_at).max(),
    }
}

/// Lockstep advance requested by an observing client.
///
/// Goes through only when every non-eliminated group has answered (or the
/// question clock ran out) and the results delay has passed since. Early
/// calls are `InvalidTransition`; clients poll again.
pub fn auto_advance(
    store: &mut dyn BattleStore,
    battle_id: u64,
    expected_pointer: u32,
    now: Timestamp,
) -> error::Result<BattleState> {
    let battle = load_battle(store, battle_id)?;
    require_mode(&battle, ProgressionMode::Lockstep)?;
    if battle.status != BattleStatus::Active || battle.question_pointer != expected_pointer {
        return Ok(BattleState::of(&battle));
    }

    let delay_ms = u64::from(store.config().results_delay_ms);
    let ready = readiness(store, &battle)?;

    let shown_since = if ready.all_answered() {
        ready.last_answer_at.or(battle.question_started_at)
    } else if remaining_ms(&battle, now) == Some(0) {
        battle
            .question_started_at
            .map(|s| Timestamp::from_micros_since_unix_epoch(
                s.to_micros_since_unix_epoch() + i64::from(battle.time_limit_secs) * 1_000_000,
            ))
    } else {
        return Err(BattleError::InvalidTransition(format!(
            "{}/{} groups answered question {}",
            ready.answered, ready.required, ready.question_pointer
        )));
    };

    if let Some(since) = shown_since {
        let shown_ms = elapsed_ms(since, now);
        if shown_ms < delay_ms {
            return Err(BattleError::InvalidTransition(format!(
                "results showing for {}ms more",
                delay_ms - shown_ms
            )));
        }
    }

    Lockstep.advance_battle(store, battle_id, expected_pointer, now)
}

/// Reset a battle to `Waiting` with no answers and zeroed groups.
///
/// Memberships stay, so students do not have to rejoin. Owner only.
pub fn restart_battle(
    store: &mut dyn BattleStore,
    battle_id: u64,
    requester: &str,
) -> error::Result<Battle> {
    let mut battle = load_battle(store, battle_id)?;
    require_owner(&battle, requester)?;

    let answers = store.answers(battle_id);
    for answer in &answers {
        store.delete_answer(answer.id);
    }

    for mut group in store.groups(battle_id) {
        group.score = 0;
        group.correct_answers = 0;
        group.wrong_answers = 0;
        group.eliminated = false;
        group.question_pointer = 0;
        store.update_group(group);
    }

    battle.status = BattleStatus::Waiting;
    battle.question_pointer = 0;
    battle.question_started_at = None;
    battle.started_at = None;
    battle.finished_at = None;
    let battle = store.update_battle(battle);

    log::info!(
        "[BATTLE] restarted battle:{} code:{} cleared_answers:{}",
        battle.id,
        battle.code,
        answers.len()
    );
    Ok(battle)
}
