//! Answer submission: one answer per (question, group), scored once.
//!
//! The answer row's unique key is the only guard against double submission.
//! Whoever inserts first gets scored; every later attempt for the same pair
//! gets `AlreadyAnswered` and must re-read state instead of retrying.

use spacetimedb::Timestamp;

use crate::clock::elapsed_ms;
use crate::error::{BattleError, Result};
use crate::progression::{ProgressionStrategy, SelfPaced};
use crate::store::{answer_key, BattleStore};
use crate::{Answer, Battle, BattleGroup, BattleStatus, EngineConfig, ProgressionMode, Question};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub battle_id: u64,
    pub group_id: u64,
    pub question_id: u64,
    /// `None` is the "no answer" sentinel submitted on timeout; always wrong
    pub chosen_index: Option<u32>,
    pub response_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub answer_id: u64,
    pub is_correct: bool,
    pub points_earned: u32,
    /// Group state after this answer
    pub eliminated: bool,
}

pub fn submit_answer(
    store: &mut dyn BattleStore,
    sub: Submission,
    now: Timestamp,
) -> Result<AnswerOutcome> {
    let question = store
        .question(sub.question_id)
        .filter(|q| q.battle_id == sub.battle_id)
        .ok_or_else(|| BattleError::not_found("question", sub.question_id))?;
    let battle = store
        .battle(sub.battle_id)
        .ok_or_else(|| BattleError::not_found("battle", sub.battle_id))?;
    let mut group = store
        .group(sub.group_id)
        .filter(|g| g.battle_id == sub.battle_id)
        .ok_or_else(|| BattleError::not_found("group", sub.group_id))?;

    require_current(&battle, &group, &question)?;
    if sub.chosen_index.is_some() && remaining_ms(&battle, now) == Some(0) {
        // Past the deadline only the timeout sentinel is taken
        return Err(BattleError::InvalidTransition(format!(
            "time is up on question {}",
            question.position
        )));
    }

    let is_correct = sub.chosen_index == Some(question.correct_index);
    let answer = store
        .insert_answer(Answer {
            id: 0,
            battle_id: battle.id,
            group_id: group.id,
            question_id: question.id,
            answer_key: answer_key(question.id, group.id),
            chosen_index: sub.chosen_index,
            is_correct,
            response_ms: sub.response_ms,
            submitted_at: now,
        })
        .map_err(|_| {
            log::debug!("[ANSWER] duplicate group:{} question:{}", group.id, question.id);
            BattleError::AlreadyAnswered {
                question_id: question.id,
                group_id: group.id,
            }
        })?;

    let config = store.config();
    let points_earned = apply_answer(&mut group, is_correct, sub.response_ms, &config);
    let group = store.update_group(group);

    log::info!(
        "[ANSWER] battle:{} group:{} q:{} correct:{} ms:{} +{} score:{} wrong:{}{}",
        battle.id,
        group.name,
        question.position,
        is_correct,
        sub.response_ms,
        points_earned,
        group.score,
        group.wrong_answers,
        if group.eliminated { " ELIMINATED" } else { "" }
    );

    // An eliminated self-paced group never advances again, so it may have
    // been the last one the battle was waiting for
    if group.eliminated && battle.mode == ProgressionMode::SelfPaced {
        SelfPaced.advance_battle(store, battle.id, 0, now)?;
    }

    Ok(AnswerOutcome {
        answer_id: answer.id,
        is_correct,
        points_earned,
        eliminated: group.eliminated,
    })
}

/// Submit the "no answer" sentinel once the question's time is up.
///
/// Lockstep only. Refused while time remains, so a client cannot skip a
/// question early by claiming a timeout.
pub fn submit_timeout(
    store: &mut dyn BattleStore,
    battle_id: u64,
    group_id: u64,
    question_id: u64,
    now: Timestamp,
) -> Result<AnswerOutcome> {
    let battle = store
        .battle(battle_id)
        .ok_or_else(|| BattleError::not_found("battle", battle_id))?;
    if battle.mode != ProgressionMode::Lockstep {
        return Err(BattleError::InvalidTransition(
            "timeouts only apply to lockstep battles".to_string(),
        ));
    }
    match remaining_ms(&battle, now) {
        Some(0) => {}
        Some(ms) => {
            return Err(BattleError::InvalidTransition(format!("{}ms left on the clock", ms)));
        }
        None => {
            return Err(BattleError::InvalidTransition(format!(
                "battle {} has no running question clock",
                battle.id
            )));
        }
    }

    let sub = Submission {
        battle_id,
        group_id,
        question_id,
        chosen_index: None,
        response_ms: battle.time_limit_secs.saturating_mul(1000),
    };
    submit_answer(store, sub, now)
}

/// Milliseconds left on the current lockstep question.
///
/// `None` when the battle is untimed or no question is running.
pub fn remaining_ms(battle: &Battle, now: Timestamp) -> Option<u64> {
    if battle.time_limit_secs == 0 || battle.status != BattleStatus::Active {
        return None;
    }
    let started = battle.question_started_at?;
    let limit_ms = u64::from(battle.time_limit_secs) * 1000;
    Some(limit_ms.saturating_sub(elapsed_ms(started, now)))
}

/// Answers are only taken for the question currently in play: the shared
/// pointer in lockstep, the group's own pointer when self-paced.
fn require_current(battle: &Battle, group: &BattleGroup, question: &Question) -> Result<()> {
    if battle.status != BattleStatus::Active {
        return Err(BattleError::InvalidTransition(format!(
            "battle {} is {:?}",
            battle.id, battle.status
        )));
    }
    let current = match battle.mode {
        ProgressionMode::Lockstep => battle.question_pointer,
        ProgressionMode::SelfPaced => group.question_pointer,
    };
    if question.position != current {
        return Err(BattleError::InvalidTransition(format!(
            "question {} is not current (current {})",
            question.position, current
        )));
    }
    Ok(())
}

/// Score and elimination bookkeeping for one recorded answer.
///
/// Score only grows and elimination only latches on, so replaying state
/// never moves a group backwards.
pub fn apply_answer(
    group: &mut BattleGroup,
    is_correct: bool,
    response_ms: u32,
    config: &EngineConfig,
) -> u32 {
    if is_correct {
        let points = config.points_for(response_ms);
        group.correct_answers = group.correct_answers.saturating_add(1);
        group.score = group.score.saturating_add(points);
        points
    } else {
        group.wrong_answers = group.wrong_answers.saturating_add(1);
        if group.wrong_answers >= config.elimination_threshold {
            group.eliminated = true;
        }
        0
    }
}
