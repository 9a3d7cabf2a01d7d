//! Battle creation and teardown.
//!
//! A battle is created together with its groups and questions. Inside a
//! reducer that is a single transaction: any error aborts every insert.

use spacetimedb::Timestamp;

use crate::codes::normalize_code;
use crate::error::{BattleError, Result};
use crate::import::NewQuestion;
use crate::store::{group_key, question_key, BattleStore};
use crate::{Battle, BattleGroup, BattleStatus, OverflowPolicy, ProgressionMode, Question};

/// Upper bound on groups per battle
pub const MAX_GROUPS: u32 = 32;

#[derive(Debug, Clone)]
pub struct NewBattle {
    pub name: String,
    pub teacher_id: String,
    pub mode: ProgressionMode,
    pub group_count: u32,
    pub group_size: u32,
    /// Seconds per question in lockstep mode, 0 = untimed
    pub time_limit_secs: u32,
    pub overflow_policy: OverflowPolicy,
}

fn validate(new: &NewBattle, questions: &[NewQuestion]) -> Result<()> {
    if new.name.trim().is_empty() {
        return Err(BattleError::InvalidInput("battle name is empty".to_string()));
    }
    if new.group_count == 0 || new.group_count > MAX_GROUPS {
        return Err(BattleError::InvalidInput(format!(
            "group count {} outside 1..={}",
            new.group_count, MAX_GROUPS
        )));
    }
    if new.group_size == 0 {
        return Err(BattleError::InvalidInput("group size must be at least 1".to_string()));
    }
    if questions.is_empty() {
        return Err(BattleError::InvalidInput("a battle needs at least one question".to_string()));
    }
    Ok(())
}

/// Create a battle with `group_count` groups and the given questions.
///
/// `next_code` supplies candidate join codes; a candidate that collides with
/// an existing code is discarded and another is drawn, up to the configured
/// number of attempts.
pub fn create_battle(
    store: &mut dyn BattleStore,
    new: NewBattle,
    questions: Vec<NewQuestion>,
    now: Timestamp,
    next_code: &mut dyn FnMut() -> String,
) -> Result<Battle> {
    validate(&new, &questions)?;
    let attempts = store.config().code_attempts.max(1);

    let mut last_code = String::new();
    let mut created = None;
    for _ in 0..attempts {
        last_code = normalize_code(&next_code());
        let row = Battle {
            id: 0,
            name: new.name.trim().to_string(),
            teacher_id: new.teacher_id.clone(),
            code: last_code.clone(),
            mode: new.mode.clone(),
            status: BattleStatus::Waiting,
            question_count: questions.len() as u32,
            group_size: new.group_size,
            time_limit_secs: new.time_limit_secs,
            overflow_policy: new.overflow_policy.clone(),
            question_pointer: 0,
            question_started_at: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        };
        match store.insert_battle(row) {
            Ok(battle) => {
                created = Some(battle);
                break;
            }
            Err(violation) => {
                log::debug!(
                    "[BATTLE] code collision {} on {}",
                    violation.key,
                    violation.constraint
                );
            }
        }
    }
    let battle = created.ok_or(BattleError::CodeTaken(last_code))?;

    for n in 1..=new.group_count {
        create_group(store, battle.id, format!("Group {}", n), attempts, next_code)?;
    }

    for (position, q) in questions.into_iter().enumerate() {
        let position = position as u32;
        store
            .insert_question(Question {
                id: 0,
                battle_id: battle.id,
                question_key: question_key(battle.id, position),
                prompt: q.prompt,
                answers: q.answers,
                correct_index: q.correct_index,
                position,
            })
            .map_err(|v| BattleError::InvalidInput(format!("duplicate question {}", v.key)))?;
    }

    log::info!(
        "[BATTLE] created battle:{} code:{} mode:{:?} groups:{} size:{} questions:{}",
        battle.id,
        battle.code,
        battle.mode,
        new.group_count,
        battle.group_size,
        battle.question_count
    );
    Ok(battle)
}

fn create_group(
    store: &mut dyn BattleStore,
    battle_id: u64,
    name: String,
    attempts: u32,
    next_code: &mut dyn FnMut() -> String,
) -> Result<BattleGroup> {
    let mut last_code = String::new();
    for _ in 0..attempts {
        last_code = normalize_code(&next_code());
        let row = BattleGroup {
            id: 0,
            battle_id,
            group_key: group_key(battle_id, &last_code),
            code: last_code.clone(),
            name: name.clone(),
            is_full: false,
            score: 0,
            correct_answers: 0,
            wrong_answers: 0,
            eliminated: false,
            question_pointer: 0,
        };
        match store.insert_group(row) {
            Ok(group) => return Ok(group),
            Err(violation) => log::debug!("[BATTLE] group code collision {}", violation.key),
        }
    }
    Err(BattleError::CodeTaken(last_code))
}

/// Delete a battle and every row that hangs off it. Owner only.
pub fn delete_battle(store: &mut dyn BattleStore, battle_id: u64, requester: &str) -> Result<()> {
    let battle = store
        .battle(battle_id)
        .ok_or_else(|| BattleError::not_found("battle", battle_id))?;
    require_owner(&battle, requester)?;

    for answer in store.answers(battle_id) {
        store.delete_answer(answer.id);
    }
    for member in store.battle_members(battle_id) {
        store.delete_member(member.id);
    }
    for question in store.questions(battle_id) {
        store.delete_question(question.id);
    }
    for group in store.groups(battle_id) {
        store.delete_group(group.id);
    }
    store.delete_battle(battle_id);

    log::info!("[BATTLE] deleted battle:{} code:{}", battle_id, battle.code);
    Ok(())
}

pub fn require_owner(battle: &Battle, requester: &str) -> Result<()> {
    if battle.teacher_id != requester {
        return Err(BattleError::Unauthorized(format!(
            "battle {} belongs to another teacher",
            battle.id
        )));
    }
    Ok(())
}
